//! SQLite history store for murmur.
//!
//! Holds the durable conversation log and answers backward pagination
//! queries for one identity scope at a time.

pub mod error;
pub mod history_db;
pub mod migration;
pub mod schema;

pub use error::{Error, Result};
pub use history_db::HistoryDb;
pub use migration::MigrationManager;
pub use schema::SCHEMA_VERSION;
