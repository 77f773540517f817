//! mtc-store - SQLite durable store
//!
//! Implements [`mtc_core::DurableStore`] on a single SQLite database file.
//! Every batch is written in one transaction; blocking database calls run
//! on the blocking thread pool.

mod rows;
mod schema;
mod sqlite;

pub use sqlite::SqliteStore;
