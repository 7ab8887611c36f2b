//! Token storage backends for persisting the session tokens.
//!
//! Provides an in-memory store for testing and a SQLite-backed store for the CLI.

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryTokenStore;
pub use sqlite::SqliteTokenStore;
