use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::catalog::ProductKind;
use crate::error::StorefrontError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Success,
    Failed,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "Pending",
            OrderStatus::Success => "Success",
            OrderStatus::Failed => "Failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Pending" => Some(OrderStatus::Pending),
            "Success" => Some(OrderStatus::Success),
            "Failed" => Some(OrderStatus::Failed),
            _ => None,
        }
    }
}

/// Receipt of one purchased product. Only `status` and `payment_ref` change
/// after the order is written.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    pub user_id: String,
    pub user_email: String,
    pub product_id: String,
    pub plan: String,
    /// Charged amount, after any discount.
    pub amount: i64,
    pub status: OrderStatus,
    /// Target ids this order unlocks; retries re-derive the grants from here.
    pub targets: Vec<String>,
    pub target_type: ProductKind,
    pub payment_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Product price before discounts.
    pub list_price: i64,
}

/// `ORD-` followed by the 32 hex digits of a v4 UUID.
pub fn new_order_id() -> String {
    format!("ORD-{}", Uuid::new_v4().simple().to_string().to_uppercase())
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn create_order(&self, order: &Order) -> Result<(), StorefrontError>;
    async fn get_order(&self, id: &str) -> Result<Option<Order>, StorefrontError>;
    async fn set_status(&self, id: &str, status: OrderStatus) -> Result<bool, StorefrontError>;
    async fn record_payment(&self, id: &str, payment_ref: &str) -> Result<bool, StorefrontError>;
    /// Newest first.
    async fn list_orders_for_user(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Order>, StorefrontError>;
    /// Captured but not yet fulfilled, oldest first.
    async fn list_paid_pending_orders(&self, user_id: &str) -> Result<Vec<Order>, StorefrontError>;
    async fn list_orders(&self, limit: i64, offset: i64) -> Result<Vec<Order>, StorefrontError>;
}
