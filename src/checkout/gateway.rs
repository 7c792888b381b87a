use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use uuid::Uuid;

use crate::config::settings::CheckoutConfig;
use crate::error::StorefrontError;

#[derive(Debug, Clone)]
pub struct CaptureRequest {
    /// Order id (or first order id of a cart checkout) the capture pays for.
    pub reference: String,
    pub amount: i64,
    pub email: String,
}

#[derive(Debug, Clone)]
pub struct PaymentReceipt {
    pub payment_ref: String,
    pub amount: i64,
    pub captured_at: DateTime<Utc>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn capture(&self, request: &CaptureRequest) -> Result<PaymentReceipt, StorefrontError>;
}

/// Stand-in for a card gateway: waits, then approves (or declines with the
/// configured probability).
pub struct SimulatedGateway {
    latency: Duration,
    failure_rate: f64,
}

impl SimulatedGateway {
    pub fn new(latency: Duration, failure_rate: f64) -> Self {
        Self {
            latency,
            failure_rate: failure_rate.clamp(0.0, 1.0),
        }
    }

    pub fn from_config(cfg: &CheckoutConfig) -> Self {
        Self::new(
            Duration::from_millis(cfg.gateway_latency_ms),
            cfg.gateway_failure_rate,
        )
    }
}

#[async_trait]
impl PaymentGateway for SimulatedGateway {
    async fn capture(&self, request: &CaptureRequest) -> Result<PaymentReceipt, StorefrontError> {
        if request.amount < 0 {
            return Err(StorefrontError::Validation("amount must not be negative".into()));
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let declined = self.failure_rate > 0.0 && rand::rng().random_bool(self.failure_rate);
        if declined {
            tracing::warn!(reference = %request.reference, amount = request.amount, "simulated capture declined");
            return Err(StorefrontError::Payment("card declined by gateway".into()));
        }

        let payment_ref = format!("pay_{}", Uuid::new_v4().simple());
        tracing::info!(
            reference = %request.reference,
            email = %request.email,
            amount = request.amount,
            payment_ref = %payment_ref,
            "simulated capture approved"
        );
        Ok(PaymentReceipt {
            payment_ref,
            amount: request.amount,
            captured_at: Utc::now(),
        })
    }
}
