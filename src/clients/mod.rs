//! Cloneable handles for talking to the services.

#[macro_use]
mod macros;

mod category_client;
mod inventory_client;
mod ledger_client;

pub use category_client::CategoryClient;
pub use inventory_client::InventoryClient;
pub use ledger_client::LedgerClient;
