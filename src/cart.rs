use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::catalog::{Product, ProductKind};
use crate::coupon::{AppliedCoupon, CouponError};
use crate::error::StorefrontError;

/// Snapshot of a product taken when it was added to the cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub id: String,
    pub name: String,
    pub price: i64,
    #[serde(rename = "type")]
    pub kind: ProductKind,
    pub target_ids: Vec<String>,
}

impl From<&Product> for CartItem {
    fn from(p: &Product) -> Self {
        Self {
            id: p.id.clone(),
            name: p.name.clone(),
            price: p.price,
            kind: p.kind,
            target_ids: p.target_ids.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    items: Vec<CartItem>,
    #[serde(default)]
    coupon: Option<AppliedCoupon>,
    #[serde(default)]
    open: bool,
}

impl Cart {
    /// Inserts unless an item with the same id is already held. Either way
    /// the cart is opened. Returns whether the item was inserted.
    pub fn add(&mut self, item: CartItem) -> bool {
        self.open = true;
        if self.items.iter().any(|i| i.id == item.id) {
            return false;
        }
        self.items.push(item);
        true
    }

    /// Removes every item with this id and returns how many went.
    pub fn remove(&mut self, id: &str) -> usize {
        let before = self.items.len();
        self.items.retain(|i| i.id != id);
        before - self.items.len()
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.coupon = None;
    }

    pub fn items(&self) -> &[CartItem] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn count(&self) -> usize {
        self.items.len()
    }

    pub fn total(&self) -> i64 {
        self.items.iter().map(|i| i.price).sum()
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn set_open(&mut self, open: bool) {
        self.open = open;
    }

    pub fn coupon(&self) -> Option<&AppliedCoupon> {
        self.coupon.as_ref()
    }

    /// Attaches a coupon. A second coupon is refused so discounts never stack.
    pub fn apply_coupon(&mut self, coupon: AppliedCoupon) -> Result<i64, CouponError> {
        if self.coupon.is_some() {
            return Err(CouponError::AlreadyApplied);
        }
        let discount = coupon.discount_for(self.total());
        self.coupon = Some(coupon);
        Ok(discount)
    }

    pub fn remove_coupon(&mut self) -> Option<AppliedCoupon> {
        self.coupon.take()
    }

    pub fn discount(&self) -> i64 {
        self.coupon
            .as_ref()
            .map(|c| c.discount_for(self.total()))
            .unwrap_or(0)
    }

    pub fn payable(&self) -> i64 {
        self.total() - self.discount()
    }

    pub fn summary(&self) -> CartSummary {
        CartSummary {
            items: self.items.clone(),
            count: self.count(),
            total: self.total(),
            coupon: self.coupon.clone(),
            discount: self.discount(),
            payable: self.payable(),
            open: self.is_open(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CartSummary {
    pub items: Vec<CartItem>,
    pub count: usize,
    pub total: i64,
    pub coupon: Option<AppliedCoupon>,
    pub discount: i64,
    pub payable: i64,
    pub open: bool,
}

/// Per-user cart persistence. Every mutation saves the whole cart.
#[async_trait]
pub trait CartStore: Send + Sync {
    /// Missing carts load as empty.
    async fn load_cart(&self, user_id: &str) -> Result<Cart, StorefrontError>;
    async fn save_cart(&self, user_id: &str, cart: &Cart) -> Result<(), StorefrontError>;
}
