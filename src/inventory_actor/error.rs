use thiserror::Error;

/// Errors that can occur during inventory pool operations.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum InventoryError {
    #[error("Code {code} is not tracked for product {product_id}")]
    UnknownCode { product_id: String, code: String },
    #[error("Code {code} was already used by order {order_id}")]
    AlreadyUsed { code: String, order_id: String },
    #[error("Code {code} is not reserved")]
    NotReserved { code: String },
    #[error("Invalid inventory request: {0}")]
    InvalidRequest(String),
    #[error("Actor communication error: {0}")]
    ActorCommunicationError(String),
}
