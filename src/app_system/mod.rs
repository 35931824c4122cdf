//! System orchestration, startup, and shutdown logic.

pub mod config;
pub mod fulfillment_system;
pub mod telemetry;

pub use config::{Config, ConfigError};
pub use fulfillment_system::FulfillmentSystem;
pub use telemetry::setup_tracing;
