//! Ownership resolution across the entitlement cache and the enrollment ledger.
//!
//! The cache is a best-effort mirror keyed `access_{target}_{email}`; the
//! ledger is authoritative. Reads consult both and write ledger-only
//! ownership back into the cache.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::catalog::Product;
use crate::enrollment::{EnrollmentLedger, LedgerSnapshot};
use crate::error::StorefrontError;

pub const ACCESS_GRANTED: &str = "true";

/// Cache key naming contract shared with every client of the cache.
pub fn access_key(target_id: &str, email: &str) -> String {
    format!("access_{}_{}", target_id, email)
}

#[async_trait]
pub trait EntitlementCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StorefrontError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), StorefrontError>;
}

/// The authenticated buyer: ledger rows are keyed by id, cache keys by email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Customer {
    pub user_id: String,
    pub email: String,
}

pub async fn grant_cached(
    cache: &dyn EntitlementCache,
    target_id: &str,
    email: &str,
) -> Result<(), StorefrontError> {
    cache.set(&access_key(target_id, email), ACCESS_GRANTED).await
}

/// Target ids for which the cache holds `"true"` for one user.
#[derive(Debug, Clone, Default)]
pub struct CacheSnapshot {
    granted: HashSet<String>,
}

impl CacheSnapshot {
    /// Unreadable entries count as absent.
    pub async fn load(cache: &dyn EntitlementCache, email: &str, targets: &[&str]) -> Self {
        let mut granted = Vec::new();
        for &target in targets {
            match cache.get(&access_key(target, email)).await {
                Ok(Some(v)) if v == ACCESS_GRANTED => granted.push(target),
                Ok(_) => {}
                Err(e) => tracing::warn!(target_id = target, "entitlement cache read failed: {}", e),
            }
        }
        Self::from_targets(granted)
    }

    pub fn from_targets<I, S>(targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            granted: targets.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, target_id: &str) -> bool {
        self.granted.contains(target_id)
    }
}

/// A product is owned when it unlocks something and every one of its
/// targets is granted by either store.
pub fn resolve_ownership(product: &Product, cache: &CacheSnapshot, ledger: &LedgerSnapshot) -> bool {
    targets_owned(&product.target_ids, cache, ledger)
}

pub fn targets_owned(target_ids: &[String], cache: &CacheSnapshot, ledger: &LedgerSnapshot) -> bool {
    !target_ids.is_empty()
        && target_ids
            .iter()
            .all(|t| cache.contains(t) || ledger.contains(t))
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct OwnershipReport {
    pub owned: HashSet<String>,
    /// Targets written back into the cache during this pass.
    pub backfilled: Vec<String>,
}

impl OwnershipReport {
    pub fn is_owned(&self, product_id: &str) -> bool {
        self.owned.contains(product_id)
    }
}

#[derive(Clone)]
pub struct OwnershipResolver {
    cache: Arc<dyn EntitlementCache>,
    ledger: Arc<dyn EnrollmentLedger>,
}

impl OwnershipResolver {
    pub fn new(cache: Arc<dyn EntitlementCache>, ledger: Arc<dyn EnrollmentLedger>) -> Self {
        Self { cache, ledger }
    }

    /// Cache snapshot, ledger snapshot, pure resolution, then backfill of
    /// every referenced target the ledger confirms but the cache lacks.
    pub async fn resolve(
        &self,
        customer: &Customer,
        products: &[Product],
    ) -> Result<OwnershipReport, StorefrontError> {
        let mut targets: Vec<&str> = Vec::new();
        for p in products {
            for t in &p.target_ids {
                if !targets.contains(&t.as_str()) {
                    targets.push(t.as_str());
                }
            }
        }

        let cache = CacheSnapshot::load(self.cache.as_ref(), &customer.email, &targets).await;
        // 账本读失败时仍按缓存判定，且不回填
        let (ledger, reconciled) = match LedgerSnapshot::load(self.ledger.as_ref(), &customer.user_id).await {
            Ok(ledger) => (ledger, true),
            Err(e) => {
                tracing::warn!(user_id = %customer.user_id, "enrollment ledger read failed, using cache only: {}", e);
                (LedgerSnapshot::default(), false)
            }
        };
        tracing::debug!(user_id = %customer.user_id, ledger_targets = ledger.len(), "ownership snapshot loaded");

        let owned = products
            .iter()
            .filter(|p| resolve_ownership(p, &cache, &ledger))
            .map(|p| p.id.clone())
            .collect();

        let missing: Vec<&str> = targets
            .into_iter()
            .filter(|t| ledger.contains(t) && !cache.contains(t))
            .collect();
        let backfilled = if reconciled {
            self.backfill(&customer.email, &missing).await
        } else {
            Vec::new()
        };

        Ok(OwnershipReport { owned, backfilled })
    }

    pub async fn has_access(&self, customer: &Customer, target_id: &str) -> Result<bool, StorefrontError> {
        let cache = CacheSnapshot::load(self.cache.as_ref(), &customer.email, &[target_id]).await;
        if cache.contains(target_id) {
            return Ok(true);
        }
        let ledger = LedgerSnapshot::load(self.ledger.as_ref(), &customer.user_id).await?;
        if !ledger.contains(target_id) {
            return Ok(false);
        }
        self.backfill(&customer.email, &[target_id]).await;
        Ok(true)
    }

    /// One-way ledger → cache writer. Failures are logged and skipped; the
    /// next read tries again.
    pub async fn backfill(&self, email: &str, targets: &[&str]) -> Vec<String> {
        let mut written = Vec::with_capacity(targets.len());
        for target in targets {
            match grant_cached(self.cache.as_ref(), target, email).await {
                Ok(()) => {
                    tracing::debug!(target_id = *target, "entitlement cache backfilled");
                    written.push(target.to_string());
                }
                Err(e) => tracing::warn!(target_id = *target, "entitlement backfill failed: {}", e),
            }
        }
        written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ProductKind;
    use crate::enrollment::Enrollment;
    use crate::storage::Database;
    use chrono::Utc;
    use tempfile::tempdir;

    fn product(id: &str, targets: &[&str]) -> Product {
        let now = Utc::now();
        Product {
            id: id.into(),
            name: id.into(),
            description: String::new(),
            price: 999,
            kind: ProductKind::Bundle,
            target_ids: targets.iter().map(|s| s.to_string()).collect(),
            features: Vec::new(),
            is_active: true,
            is_recommended: false,
            color: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn customer() -> Customer {
        Customer {
            user_id: "u1".into(),
            email: "u@x.com".into(),
        }
    }

    async fn temp_db() -> (tempfile::TempDir, Arc<Database>) {
        let dir = tempdir().unwrap();
        let db = Database::new(dir.path().join("entitlements.db").to_str().unwrap())
            .await
            .unwrap();
        (dir, Arc::new(db))
    }

    struct UnreadableLedger;

    #[async_trait]
    impl EnrollmentLedger for UnreadableLedger {
        async fn grant(&self, _enrollment: &Enrollment) -> Result<bool, StorefrontError> {
            Err(StorefrontError::Config("ledger write down".into()))
        }
        async fn list_enrollments(&self, _user_id: &str) -> Result<Vec<Enrollment>, StorefrontError> {
            Err(StorefrontError::Config("ledger read down".into()))
        }
    }

    struct ReadOnlyCache;

    #[async_trait]
    impl EntitlementCache for ReadOnlyCache {
        async fn get(&self, _key: &str) -> Result<Option<String>, StorefrontError> {
            Ok(None)
        }
        async fn set(&self, _key: &str, _value: &str) -> Result<(), StorefrontError> {
            Err(StorefrontError::Config("cache is read-only".into()))
        }
    }

    #[test]
    fn key_format_is_bit_exact() {
        assert_eq!(access_key("physics", "u@x.com"), "access_physics_u@x.com");
    }

    #[test]
    fn ownership_takes_either_store_per_target() {
        let bundle = product("b", &["physics", "chemistry"]);
        let none = LedgerSnapshot::default();

        assert!(resolve_ownership(
            &bundle,
            &CacheSnapshot::from_targets(["physics", "chemistry"]),
            &none
        ));
        assert!(resolve_ownership(
            &bundle,
            &CacheSnapshot::default(),
            &LedgerSnapshot::from_targets(["physics", "chemistry", "biology"])
        ));
        assert!(resolve_ownership(
            &bundle,
            &CacheSnapshot::from_targets(["physics"]),
            &LedgerSnapshot::from_targets(["chemistry"])
        ));
        assert!(!resolve_ownership(
            &bundle,
            &CacheSnapshot::from_targets(["physics"]),
            &none
        ));
        assert!(!resolve_ownership(
            &product("empty", &[]),
            &CacheSnapshot::default(),
            &none
        ));
    }

    #[tokio::test]
    async fn ledger_only_ownership_is_backfilled() {
        let (_dir, db) = temp_db().await;
        db.grant(&Enrollment {
            user_id: "u1".into(),
            target_id: "physics".into(),
            target_type: ProductKind::Subject,
            created_at: Utc::now(),
        })
        .await
        .unwrap();

        let resolver = OwnershipResolver::new(db.clone(), db.clone());
        let products = vec![product("p1", &["physics"]), product("p2", &["chemistry"])];

        let report = resolver.resolve(&customer(), &products).await.unwrap();
        assert!(report.is_owned("p1"));
        assert!(!report.is_owned("p2"));
        assert_eq!(report.backfilled, vec!["physics"]);
        assert_eq!(
            db.get("access_physics_u@x.com").await.unwrap().as_deref(),
            Some("true")
        );

        // second pass is served from the cache and writes nothing
        let again = resolver.resolve(&customer(), &products).await.unwrap();
        assert!(again.is_owned("p1"));
        assert!(again.backfilled.is_empty());
    }

    #[tokio::test]
    async fn single_target_check_uses_cache_then_ledger() {
        let (_dir, db) = temp_db().await;
        let resolver = OwnershipResolver::new(db.clone(), db.clone());
        assert!(!resolver.has_access(&customer(), "physics").await.unwrap());

        db.set("access_physics_u@x.com", "true").await.unwrap();
        assert!(resolver.has_access(&customer(), "physics").await.unwrap());

        db.grant(&Enrollment {
            user_id: "u1".into(),
            target_id: "chemistry".into(),
            target_type: ProductKind::Subject,
            created_at: Utc::now(),
        })
        .await
        .unwrap();
        assert!(resolver.has_access(&customer(), "chemistry").await.unwrap());
        assert_eq!(
            db.get("access_chemistry_u@x.com").await.unwrap().as_deref(),
            Some("true")
        );
    }

    #[tokio::test]
    async fn backfill_failure_does_not_hide_ownership() {
        let (_dir, db) = temp_db().await;
        db.grant(&Enrollment {
            user_id: "u1".into(),
            target_id: "physics".into(),
            target_type: ProductKind::Subject,
            created_at: Utc::now(),
        })
        .await
        .unwrap();

        let resolver = OwnershipResolver::new(Arc::new(ReadOnlyCache), db.clone());
        let report = resolver
            .resolve(&customer(), &[product("p1", &["physics"])])
            .await
            .unwrap();
        assert!(report.is_owned("p1"));
        assert!(report.backfilled.is_empty());
    }

    #[tokio::test]
    async fn unreadable_ledger_falls_back_to_the_cache() {
        let (_dir, db) = temp_db().await;
        db.set("access_a_u@x.com", "true").await.unwrap();
        db.set("access_b_u@x.com", "true").await.unwrap();

        let resolver = OwnershipResolver::new(db.clone(), Arc::new(UnreadableLedger));
        let products = vec![product("bundle", &["a", "b"]), product("other", &["a", "c"])];
        let report = resolver.resolve(&customer(), &products).await.unwrap();

        assert!(report.is_owned("bundle"));
        assert!(!report.is_owned("other"));
        assert!(report.backfilled.is_empty());
        assert!(resolver.has_access(&customer(), "a").await.unwrap());
    }
}
