pub mod catalog;
pub mod inventory;
pub mod order;
pub mod product;
pub mod receipt;

pub use catalog::*;
pub use inventory::*;
pub use order::*;
pub use product::*;
pub use receipt::*;
