//! SQLite-backed persistence layer for the catalog normalizer core.
//!
//! One module per schema concern, mirroring the teacher's own
//! `casparian_state_store` file split: `schema` owns DDL, everything else is
//! a thin repository over one or two tables. Row parsing lives in `models`.

pub mod benchmarks;
pub mod catalog_items;
pub mod clients;
pub mod models;
pub mod normalized;
pub mod pending_databases;
pub mod projects;
pub mod schema;
pub mod sessions;
pub mod source_databases;
pub mod stage_outputs;

pub use catnorm_db::{DbError, Result};
pub use schema::ensure_schema;
