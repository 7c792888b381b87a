use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::StorefrontError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CouponKind {
    Percent,
    Flat,
}

impl CouponKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CouponKind::Percent => "percent",
            CouponKind::Flat => "flat",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "percent" => Some(CouponKind::Percent),
            "flat" => Some(CouponKind::Flat),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CouponError {
    #[error("please enter a coupon code")]
    Empty,
    #[error("invalid or expired coupon")]
    Invalid,
    #[error("a coupon is already applied")]
    AlreadyApplied,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Coupon {
    pub code: String,
    pub discount: i64,
    #[serde(rename = "type")]
    pub kind: CouponKind,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// The coupon attached to a cart or a payment. The discount is recomputed
/// against the current total each time it is read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedCoupon {
    pub code: String,
    pub discount: i64,
    #[serde(rename = "type")]
    pub kind: CouponKind,
}

impl AppliedCoupon {
    pub fn discount_for(&self, total: i64) -> i64 {
        compute_discount(self.kind, self.discount, total)
    }
}

impl From<&Coupon> for AppliedCoupon {
    fn from(c: &Coupon) -> Self {
        Self {
            code: c.code.clone(),
            discount: c.discount,
            kind: c.kind,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CouponQuote {
    pub coupon: AppliedCoupon,
    pub total: i64,
    pub discount: i64,
    pub payable: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateCouponPayload {
    pub code: String,
    pub discount: i64,
    #[serde(rename = "type")]
    pub kind: CouponKind,
    #[serde(default = "default_active_true")]
    pub active: bool,
}

fn default_active_true() -> bool {
    true
}

impl CreateCouponPayload {
    /// Uppercases the code and checks the discount range for its kind.
    pub fn normalized(mut self) -> Result<Self, StorefrontError> {
        if self.code.is_empty() || self.code.chars().any(char::is_whitespace) {
            return Err(StorefrontError::Validation(
                "coupon code must be non-empty and contain no whitespace".into(),
            ));
        }
        self.code = normalize_code(&self.code);
        match self.kind {
            CouponKind::Percent if !(0..=100).contains(&self.discount) => Err(
                StorefrontError::Validation("percent discount must be within 0..=100".into()),
            ),
            CouponKind::Flat if self.discount < 0 => Err(StorefrontError::Validation(
                "flat discount must not be negative".into(),
            )),
            _ => Ok(self),
        }
    }
}

#[async_trait]
pub trait CouponStore: Send + Sync {
    async fn create_coupon(&self, payload: CreateCouponPayload) -> Result<Coupon, StorefrontError>;
    async fn list_coupons(&self) -> Result<Vec<Coupon>, StorefrontError>;
    /// Exact lookup on the stored (already uppercased) code.
    async fn get_coupon(&self, code: &str) -> Result<Option<Coupon>, StorefrontError>;
    async fn set_active(&self, code: &str, active: bool) -> Result<bool, StorefrontError>;
    async fn delete_coupon(&self, code: &str) -> Result<bool, StorefrontError>;
}

// Uppercase only. Surrounding whitespace is kept, so "sale50 " never matches "SALE50".
pub fn normalize_code(raw: &str) -> String {
    raw.to_uppercase()
}

/// `percent` takes `floor(total * value / 100)`, `flat` takes `value`; the
/// result always lies in `[0, total]`.
pub fn compute_discount(kind: CouponKind, value: i64, total: i64) -> i64 {
    if total <= 0 {
        return 0;
    }
    let raw = match kind {
        CouponKind::Percent => total.saturating_mul(value).div_euclid(100),
        CouponKind::Flat => value,
    };
    raw.clamp(0, total)
}

/// Looks up an active coupon by code and prices it against `total`.
pub async fn quote_coupon(
    store: &dyn CouponStore,
    code: &str,
    total: i64,
) -> Result<CouponQuote, StorefrontError> {
    if code.trim().is_empty() {
        return Err(CouponError::Empty.into());
    }
    let normalized = normalize_code(code);
    let coupon = store
        .get_coupon(&normalized)
        .await?
        .filter(|c| c.active)
        .ok_or(CouponError::Invalid)?;

    let applied = AppliedCoupon::from(&coupon);
    let discount = applied.discount_for(total);
    tracing::debug!(code = %applied.code, total, discount, "coupon quoted");
    Ok(CouponQuote {
        coupon: applied,
        total,
        discount,
        payable: total - discount,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;
    use tempfile::tempdir;

    async fn store_with(coupons: &[(&str, i64, CouponKind, bool)]) -> (tempfile::TempDir, Database) {
        let dir = tempdir().unwrap();
        let db = Database::new(dir.path().join("coupons.db").to_str().unwrap())
            .await
            .unwrap();
        for (code, discount, kind, active) in coupons {
            db.create_coupon(CreateCouponPayload {
                code: code.to_string(),
                discount: *discount,
                kind: *kind,
                active: *active,
            })
            .await
            .unwrap();
        }
        (dir, db)
    }

    #[test]
    fn flat_and_percent_discounts_stay_within_total() {
        for total in [0, 1, 99, 500, 999, 14999] {
            for value in [0, 1, 10, 50, 100, 500, 20000] {
                let flat = compute_discount(CouponKind::Flat, value, total);
                assert_eq!(total - flat, (total - value).max(0));
                if value <= 100 {
                    let pct = compute_discount(CouponKind::Percent, value, total);
                    assert_eq!(pct, total * value / 100);
                    assert!(total - pct >= 0 && total - pct <= total);
                }
            }
        }
    }

    #[test]
    fn worked_examples() {
        assert_eq!(14999 - compute_discount(CouponKind::Flat, 500, 14999), 14499);
        assert_eq!(compute_discount(CouponKind::Percent, 10, 999), 99);
        assert_eq!(999 - compute_discount(CouponKind::Percent, 10, 999), 900);
    }

    #[test]
    fn payload_validation() {
        let ok = CreateCouponPayload {
            code: "neet2026".into(),
            discount: 10,
            kind: CouponKind::Percent,
            active: true,
        }
        .normalized()
        .unwrap();
        assert_eq!(ok.code, "NEET2026");

        for (code, discount, kind) in [
            ("", 10, CouponKind::Flat),
            ("SALE 50", 10, CouponKind::Flat),
            ("BIG", 101, CouponKind::Percent),
            ("NEG", -1, CouponKind::Flat),
        ] {
            let res = CreateCouponPayload {
                code: code.into(),
                discount,
                kind,
                active: true,
            }
            .normalized();
            assert!(res.is_err(), "{code} should be rejected");
        }
    }

    #[tokio::test]
    async fn lookup_is_case_insensitive_but_not_trimmed() {
        let (_dir, db) = store_with(&[("sale50", 50, CouponKind::Percent, true)]).await;

        let quote = quote_coupon(&db, "sale50", 1000).await.unwrap();
        assert_eq!(quote.coupon.code, "SALE50");
        assert_eq!(quote.discount, 500);
        assert_eq!(quote.payable, 500);

        let err = quote_coupon(&db, "sale50 ", 1000).await.unwrap_err();
        assert!(matches!(err, StorefrontError::Coupon(CouponError::Invalid)));
    }

    #[tokio::test]
    async fn inactive_unknown_and_empty_codes_are_rejected() {
        let (_dir, db) = store_with(&[("OLD", 100, CouponKind::Flat, false)]).await;

        let err = quote_coupon(&db, "old", 1000).await.unwrap_err();
        assert_eq!(err.to_string(), "invalid or expired coupon");
        let err = quote_coupon(&db, "missing", 1000).await.unwrap_err();
        assert_eq!(err.to_string(), "invalid or expired coupon");
        let err = quote_coupon(&db, "  ", 1000).await.unwrap_err();
        assert!(matches!(err, StorefrontError::Coupon(CouponError::Empty)));
    }
}
