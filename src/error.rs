use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::coupon::CouponError;

#[derive(Debug, Error)]
pub enum StorefrontError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Coupon(#[from] CouponError),

    #[error("Time parse error: {0}")]
    TimeParse(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("{0}")]
    Validation(String),

    #[error("login required")]
    LoginRequired { return_to: String },

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("payment failed: {0}")]
    Payment(String),
}

impl StorefrontError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            StorefrontError::Coupon(_) | StorefrontError::Validation(_) => StatusCode::BAD_REQUEST,
            StorefrontError::LoginRequired { .. } | StorefrontError::Unauthorized(_) => {
                StatusCode::UNAUTHORIZED
            }
            StorefrontError::Forbidden(_) => StatusCode::FORBIDDEN,
            StorefrontError::NotFound(_) => StatusCode::NOT_FOUND,
            StorefrontError::Conflict(_) => StatusCode::CONFLICT,
            StorefrontError::Payment(_) => StatusCode::PAYMENT_REQUIRED,
            StorefrontError::Json(_)
            | StorefrontError::Db(_)
            | StorefrontError::Io(_)
            | StorefrontError::TimeParse(_)
            | StorefrontError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for StorefrontError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("request failed: {}", self);
        }
        let body = match &self {
            // 未登录：引导客户端跳转登录页并带回原路径
            StorefrontError::LoginRequired { return_to } => serde_json::json!({
                "error": self.to_string(),
                "redirect": "/login",
                "return_to": return_to,
            }),
            _ => serde_json::json!({ "error": self.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, StorefrontError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_and_coupon_errors_are_bad_requests() {
        assert_eq!(
            StorefrontError::Validation("amount mismatch".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            StorefrontError::from(CouponError::Invalid).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn write_failures_keep_their_raw_message() {
        let err = StorefrontError::Db(rusqlite::Error::InvalidQuery);
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.to_string().starts_with("Database error:"));
    }
}
