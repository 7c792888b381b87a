use std::sync::Arc;

use crate::cart::CartStore;
use crate::catalog::ProductStore;
use crate::content::ContentStore;
use crate::coupon::CouponStore;
use crate::enrollment::EnrollmentLedger;
use crate::entitlement::{EntitlementCache, OwnershipResolver};
use crate::orders::OrderStore;
use crate::storage::Database;

/// Every persistence seam the storefront talks to.
#[derive(Clone)]
pub struct Stores {
    pub catalog: Arc<dyn ProductStore + Send + Sync>,
    pub coupons: Arc<dyn CouponStore + Send + Sync>,
    pub carts: Arc<dyn CartStore + Send + Sync>,
    pub content: Arc<dyn ContentStore + Send + Sync>,
    pub orders: Arc<dyn OrderStore + Send + Sync>,
    pub ledger: Arc<dyn EnrollmentLedger + Send + Sync>,
    pub entitlements: Arc<dyn EntitlementCache + Send + Sync>,
}

impl Stores {
    /// All seams served by one SQLite database.
    pub fn sqlite(db: Arc<Database>) -> Self {
        Self {
            catalog: db.clone(),
            coupons: db.clone(),
            carts: db.clone(),
            content: db.clone(),
            orders: db.clone(),
            ledger: db.clone(),
            entitlements: db,
        }
    }

    pub fn resolver(&self) -> OwnershipResolver {
        OwnershipResolver::new(self.entitlements.clone(), self.ledger.clone())
    }
}
