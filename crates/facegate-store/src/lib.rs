//! facegate-store — SQLite persistence for enrolled users.
//!
//! Implements the core's `EmbeddingBackend` and `AccessLog` traits on top of a
//! single SQLite database file.

pub mod sqlite;

pub use sqlite::{LoggedAttempt, SqliteStore, StoreError};
