//! Channel adapters over the engine.

pub mod chat;
pub mod web;

pub use chat::{ChatCommand, ChatCommerceFrontend, ChatMessage, ChatNotifier};
pub use web::{router, AppState, BuyerSession};
