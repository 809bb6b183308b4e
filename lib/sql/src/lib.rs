//! Embedded SQL storage for verisafe.
//!
//! Services consume the [`SQLStore`] trait only; the concrete backend
//! ([`SqliteStore`]) is injected at startup. `exec_tx` is the single
//! transactional scope primitive: a batch of statements that commits
//! together or not at all.

pub mod sqlite;
pub mod store;

pub use sqlite::SqliteStore;
pub use store::{Row, SQLError, SQLStore, Statement, Value};
