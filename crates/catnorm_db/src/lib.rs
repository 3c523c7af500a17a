//! SQLite connection pooling and source-database validation.
//!
//! `catnorm_state` owns the schema and row types that live on top of these
//! pools; this crate only owns getting a validated, correctly-pragma'd
//! connection open in the first place (§5, §6).

pub mod error;
pub mod pool;
pub mod source_file;
pub mod timestamp;

pub use error::{DbError, Result};
pub use pool::{create_pool, require_write, AccessMode, DbConfig, DbPool};
pub use source_file::validate_source_database;
pub use timestamp::{DbTimestamp, DbTimestampError};
