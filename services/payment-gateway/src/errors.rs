use crate::models::InvoiceStatus;
use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use rust_decimal::Decimal;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, GatewayError>;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Account not found")]
    AccountNotFound,

    #[error("Invoice not found: {0}")]
    InvoiceNotFound(Uuid),

    #[error("Invalid amount {0}, must be greater than 0 with at most 4 decimal places")]
    InvalidAmount(Decimal),

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidStatus { from: InvoiceStatus, to: InvoiceStatus },

    #[error("Unauthorized access")]
    Unauthorized,

    #[error("API key is required")]
    MissingApiKey,

    #[error("API key already exists")]
    DuplicateApiKey,

    #[error("Failed to publish event: {0}")]
    PublishFailure(String),

    #[error("Persistence failure: {0}")]
    Persistence(#[from] sqlx::Error),

    #[error("Broker error: {0}")]
    Broker(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<validator::ValidationErrors> for GatewayError {
    fn from(err: validator::ValidationErrors) -> Self {
        GatewayError::Validation(err.to_string())
    }
}

impl ResponseError for GatewayError {
    fn error_response(&self) -> HttpResponse {
        let status_code = self.status_code();

        HttpResponse::build(status_code).json(json!({
            "error": {
                "code": status_code.as_u16(),
                "message": self.to_string(),
                "type": self.error_type()
            }
        }))
    }

    fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::AccountNotFound => StatusCode::NOT_FOUND,
            GatewayError::InvoiceNotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::InvalidAmount(_) => StatusCode::BAD_REQUEST,
            GatewayError::InvalidStatus { .. } => StatusCode::BAD_REQUEST,
            GatewayError::Unauthorized => StatusCode::FORBIDDEN,
            GatewayError::MissingApiKey => StatusCode::UNAUTHORIZED,
            GatewayError::DuplicateApiKey => StatusCode::CONFLICT,
            GatewayError::PublishFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Broker(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
            GatewayError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl GatewayError {
    pub fn error_type(&self) -> &'static str {
        match self {
            GatewayError::AccountNotFound => "not_found",
            GatewayError::InvoiceNotFound(_) => "not_found",
            GatewayError::InvalidAmount(_) => "invalid_amount",
            GatewayError::InvalidStatus { .. } => "invalid_status",
            GatewayError::Unauthorized => "unauthorized",
            GatewayError::MissingApiKey => "missing_api_key",
            GatewayError::DuplicateApiKey => "duplicate_error",
            GatewayError::PublishFailure(_) => "messaging_error",
            GatewayError::Persistence(_) => "database_error",
            GatewayError::Broker(_) => "messaging_error",
            GatewayError::Validation(_) => "validation_error",
            GatewayError::Config(_) => "configuration_error",
            GatewayError::Internal(_) => "internal_error",
        }
    }

    /// Validation and authorization outcomes, as opposed to infrastructure faults.
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}
