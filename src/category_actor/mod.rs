//! Categories are plain keyed records, served by the generic
//! [`ResourceActor`](crate::actor_framework::ResourceActor).

mod entity;
pub mod error;

pub use error::CategoryError;
