//! Engine-level error taxonomy.
//!
//! Service errors (`InventoryError`, `LedgerError`, ...) are converted into
//! [`EngineError`] at the engine boundary. Every variant carries a stable
//! [`ErrorCode`] that frontends expose to buyers.

use thiserror::Error;

use crate::category_actor::CategoryError;
use crate::engine::gateway::GatewayError;
use crate::inventory_actor::InventoryError;
use crate::ledger_actor::LedgerError;

/// Stable numeric codes shared by every frontend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    BadRequest = 40001,
    Unauthorized = 40101,
    NotFound = 40401,
    Conflict = 40901,
    UnsupportedCurrency = 42201,
    SignatureInvalid = 44001,
    OutOfStock = 46001,
    InventoryExhausted = 46002,
    Internal = 50001,
    DependencyUnavailable = 50002,
}

impl ErrorCode {
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn http_status(self) -> u16 {
        match self {
            ErrorCode::BadRequest => 400,
            ErrorCode::Unauthorized | ErrorCode::SignatureInvalid => 401,
            ErrorCode::NotFound => 404,
            ErrorCode::Conflict | ErrorCode::OutOfStock | ErrorCode::InventoryExhausted => 409,
            ErrorCode::UnsupportedCurrency => 422,
            ErrorCode::Internal => 500,
            ErrorCode::DependencyUnavailable => 502,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Out of stock: requested {requested}, available {available}")]
    OutOfStock { requested: u32, available: u32 },
    #[error("Inventory exhausted for product {0}")]
    InventoryExhausted(String),
    #[error("Unsupported currency: {0}")]
    UnsupportedCurrency(String),
    #[error("Webhook signature invalid")]
    SignatureInvalid,
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Illegal transition: {0}")]
    IllegalTransition(String),
    #[error("Dependency unavailable: {0}")]
    DependencyUnavailable(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn code(&self) -> ErrorCode {
        match self {
            EngineError::NotFound(_) => ErrorCode::NotFound,
            EngineError::OutOfStock { .. } => ErrorCode::OutOfStock,
            EngineError::InventoryExhausted(_) => ErrorCode::InventoryExhausted,
            EngineError::UnsupportedCurrency(_) => ErrorCode::UnsupportedCurrency,
            EngineError::SignatureInvalid => ErrorCode::SignatureInvalid,
            EngineError::InvalidRequest(_) => ErrorCode::BadRequest,
            EngineError::Unauthorized => ErrorCode::Unauthorized,
            EngineError::IllegalTransition(_) => ErrorCode::Conflict,
            EngineError::DependencyUnavailable(_) => ErrorCode::DependencyUnavailable,
            EngineError::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Message safe to show a buyer. Infrastructure detail stays in the logs.
    pub fn public_message(&self) -> String {
        match self {
            EngineError::OutOfStock { .. } | EngineError::InventoryExhausted(_) => {
                "This product is out of stock".to_string()
            }
            EngineError::DependencyUnavailable(_) => "Service temporarily unavailable".to_string(),
            EngineError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<InventoryError> for EngineError {
    fn from(err: InventoryError) -> Self {
        match err {
            InventoryError::ActorCommunicationError(detail) => EngineError::DependencyUnavailable(detail),
            InventoryError::InvalidRequest(detail) => EngineError::InvalidRequest(detail),
            other => EngineError::Internal(other.to_string()),
        }
    }
}

impl From<LedgerError> for EngineError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::ProductNotFound(id) => EngineError::NotFound(format!("product {id}")),
            LedgerError::OrderNotFound(id) => EngineError::NotFound(format!("order {id}")),
            LedgerError::InsufficientStock { requested, available, .. } => {
                EngineError::OutOfStock { requested, available }
            }
            LedgerError::IllegalTransition { order_id, from, to } => {
                EngineError::IllegalTransition(format!("order {order_id} cannot move from {from} to {to}"))
            }
            LedgerError::ValidationError(detail) | LedgerError::Conflict(detail) => {
                EngineError::InvalidRequest(detail)
            }
            LedgerError::ActorCommunicationError(detail) => EngineError::DependencyUnavailable(detail),
            LedgerError::StorageError(detail) => EngineError::Internal(detail),
        }
    }
}

impl From<CategoryError> for EngineError {
    fn from(err: CategoryError) -> Self {
        match err {
            CategoryError::NotFound(id) => EngineError::NotFound(format!("category {id}")),
            CategoryError::ValidationError(detail) => EngineError::InvalidRequest(detail),
            CategoryError::ActorCommunicationError(detail) => EngineError::DependencyUnavailable(detail),
        }
    }
}

impl From<GatewayError> for EngineError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::UnsupportedCurrency(currency) => EngineError::UnsupportedCurrency(currency),
            GatewayError::Unavailable(detail) => EngineError::DependencyUnavailable(detail),
            GatewayError::Rejected(detail) => EngineError::Internal(detail),
        }
    }
}
