//! Canonical default values shared across the workspace.

/// SQLite file magic the source-database reader checks before anything
/// else (§6 "Source database format").
pub const SQLITE_MAGIC: &[u8; 16] = b"SQLite format 3\0";

/// Minimum plausible size of an embedded SQL source file (§6).
pub const MIN_SOURCE_DATABASE_BYTES: u64 = 16;

/// Row-count threshold above which the preview aggregator estimates
/// duplicate density instead of scanning (§4.10, §8).
pub const PREVIEW_SHORT_CIRCUIT_ROWS: u64 = 100_000;

/// Estimated duplicate density used by the preview short-circuit (§4.10).
pub const PREVIEW_ESTIMATED_DUPLICATE_DENSITY: f64 = 0.05;

/// Default worker-visible stop-check cadence in rows (§4.6, §5).
pub const STOP_CHECK_ROW_INTERVAL: u64 = 10;

pub const CANCELLED_BY_USER_MESSAGE: &str = "cancelled by user";
