//! Shared building blocks for verisafe services.
//!
//! - [`ServiceError`] — unified error type with stable error codes and
//!   HTTP status mapping, used at every module boundary.
//! - [`types`] — ID / timestamp helpers and list pagination types.

pub mod error;
pub mod types;

pub use error::ServiceError;
pub use types::{new_id, now_rfc3339, ListParams, ListResult};
