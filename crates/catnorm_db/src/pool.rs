//! SQLite connection pool setup (§5, §6).
//!
//! The core opens three separate SQLite files (catalog source, normalized
//! data, and the service's own session/config store per §3a); each gets its
//! own pool so a slow preview scan on one never starves writers on another.

use crate::error::{DbError, Result};
use tracing::info;

pub type DbPool = sqlx::SqlitePool;

/// Whether a pool may write. The preview aggregator (§4.10) and any
/// read-only catalog scan open their source with `ReadOnly` so a bug there
/// can never mutate a caller's source database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadWrite,
    ReadOnly,
}

/// Connection parameters for one SQLite file (§6 `max_open_conns` /
/// `max_idle_conns` / `conn_max_lifetime_seconds`).
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub path: String,
    pub access_mode: AccessMode,
    pub max_connections: u32,
    pub conn_max_lifetime_seconds: u64,
}

impl DbConfig {
    /// Read-write config for a path the core owns outright.
    pub fn read_write(path: impl Into<String>, max_connections: u32, conn_max_lifetime_seconds: u64) -> Self {
        Self {
            path: path.into(),
            access_mode: AccessMode::ReadWrite,
            max_connections,
            conn_max_lifetime_seconds,
        }
    }

    /// Read-only config for a caller-supplied source database (§4.10, §6).
    pub fn read_only(path: impl Into<String>, max_connections: u32) -> Self {
        Self {
            path: path.into(),
            access_mode: AccessMode::ReadOnly,
            max_connections,
            conn_max_lifetime_seconds: 0,
        }
    }

    pub fn in_memory() -> Self {
        Self {
            path: ":memory:".to_string(),
            access_mode: AccessMode::ReadWrite,
            max_connections: 1,
            conn_max_lifetime_seconds: 0,
        }
    }

    fn url(&self) -> String {
        if self.path == ":memory:" {
            return "sqlite::memory:".to_string();
        }
        match self.access_mode {
            AccessMode::ReadWrite => format!("sqlite:{}?mode=rwc", self.path),
            AccessMode::ReadOnly => format!("sqlite:{}?mode=ro", self.path),
        }
    }
}

/// Open a pool for `config`, applying the WAL + `synchronous=NORMAL`
/// pragmas on read-write connections (read-only connections skip them:
/// they must not attempt to create a WAL file next to a caller's database).
pub async fn create_pool(config: DbConfig) -> Result<DbPool> {
    let mut options = sqlx::sqlite::SqlitePoolOptions::new().max_connections(config.max_connections);
    if config.conn_max_lifetime_seconds > 0 {
        options = options.max_lifetime(std::time::Duration::from_secs(config.conn_max_lifetime_seconds));
    }

    let pool = options.connect(&config.url()).await?;

    if config.access_mode == AccessMode::ReadWrite {
        apply_write_pragmas(&pool).await?;
    }

    info!(path = %config.path, mode = ?config.access_mode, "opened sqlite pool");
    Ok(pool)
}

async fn apply_write_pragmas(pool: &DbPool) -> Result<()> {
    sqlx::query("PRAGMA journal_mode=WAL").execute(pool).await?;
    sqlx::query("PRAGMA synchronous=NORMAL").execute(pool).await?;
    sqlx::query("PRAGMA foreign_keys=ON").execute(pool).await?;
    Ok(())
}

/// Reject a write attempt against a read-only pool before issuing it,
/// rather than relying on SQLite's own `mode=ro` error surfacing cleanly.
pub fn require_write(mode: AccessMode) -> Result<()> {
    match mode {
        AccessMode::ReadWrite => Ok(()),
        AccessMode::ReadOnly => Err(DbError::ReadOnly),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_in_memory_pool() {
        let pool = create_pool(DbConfig::in_memory()).await.unwrap();
        let row: (i64,) = sqlx::query_as("SELECT 1").fetch_one(&pool).await.unwrap();
        assert_eq!(row.0, 1);
    }

    #[test]
    fn require_write_rejects_read_only() {
        assert!(require_write(AccessMode::ReadOnly).is_err());
        assert!(require_write(AccessMode::ReadWrite).is_ok());
    }

    #[test]
    fn read_only_url_uses_ro_mode() {
        let config = DbConfig::read_only("/tmp/whatever.db", 2);
        assert_eq!(config.url(), "sqlite:/tmp/whatever.db?mode=ro");
    }
}
