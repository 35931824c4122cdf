//! Digital-goods order and fulfillment engine.
//!
//! Durable state lives in actor services (`ledger_actor`, `inventory_actor`, and
//! a generic [`actor_framework::ResourceActor`] for categories). The `engine`
//! composes them into order creation, payment reconciliation and delivery, and
//! `frontends` adapt the engine to the chat and web storefronts.

/// Sends an error on a oneshot responder and returns from the handler.
macro_rules! send_error {
    ($respond_to:expr, $error:expr) => {{
        let _ = $respond_to.send(Err($error));
        return;
    }};
}

pub mod actor_framework;
pub mod app_system;
pub mod category_actor;
pub mod clients;
pub mod domain;
pub mod engine;
pub mod error;
pub mod frontends;
pub mod inventory_actor;
pub mod ledger_actor;
pub mod messages;

#[cfg(test)]
mod mock_framework;

pub use app_system::{setup_tracing, Config, FulfillmentSystem};
pub use error::{EngineError, ErrorCode};
