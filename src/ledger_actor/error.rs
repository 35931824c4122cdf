use thiserror::Error;

use crate::domain::OrderStatus;

/// Errors that can occur during product and order bookkeeping.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LedgerError {
    #[error("Product not found: {0}")]
    ProductNotFound(String),
    #[error("Order not found: {0}")]
    OrderNotFound(String),
    #[error("Insufficient stock for {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: String,
        requested: u32,
        available: u32,
    },
    #[error("Order {order_id} cannot move from {from} to {to}")]
    IllegalTransition {
        order_id: String,
        from: OrderStatus,
        to: OrderStatus,
    },
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Storage error: {0}")]
    StorageError(String),
    #[error("Actor communication error: {0}")]
    ActorCommunicationError(String),
}
