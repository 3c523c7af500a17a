//! Config document loading/reload (§6), held by `main` behind an
//! `Arc<ArcSwap<Config>>` so a future reload never races an in-flight
//! read.
//!
//! `database_path` names the directory newly bound source-database files
//! are resolved under when a caller passes a bare filename; it is not a
//! third SQLite pool. `normalized_database_path`/`service_database_path`
//! both name the one SQLite file this core actually opens — every table
//! `catnorm_state::schema` owns lives in that single pool, grounded on
//! `casparian_state_store`'s own one-pool-many-tables layout rather than
//! the three-pool split the wire config's field names might suggest.

use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use catnorm_protocol::config::Config;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub fn load(path: &Path) -> Result<Config> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse config file {}", path.display()))
}

pub fn default_path() -> PathBuf {
    catnorm_logging::catnorm_home().join("config.json")
}

/// Re-read `path` and swap the live config in place. Callers holding an
/// `Arc<Config>` snapshot from before the reload keep reading it
/// unaffected; only a fresh `load()` observes the new values.
pub fn reload(path: &Path, live: &ArcSwap<Config>) -> Result<()> {
    let fresh = load(path)?;
    live.store(Arc::new(fresh));
    Ok(())
}
