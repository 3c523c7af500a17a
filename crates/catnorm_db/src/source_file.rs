//! Source-database file validation (§6 "Source database format").
//!
//! Run before a catalog source is ever opened through [`crate::pool`]: a
//! cheap magic-byte and size check catches the common mistake of pointing
//! the importer at a non-SQLite file long before sqlx produces a less
//! legible error.

use crate::error::{DbError, Result};
use catnorm_protocol::defaults::{MIN_SOURCE_DATABASE_BYTES, SQLITE_MAGIC};
use std::io::Read;
use std::path::Path;

/// Validate that `path` looks like a SQLite database file: present,
/// large enough to hold the header, and carrying the SQLite magic bytes.
pub fn validate_source_database(path: &Path) -> Result<()> {
    let metadata = std::fs::metadata(path)?;
    if metadata.len() < MIN_SOURCE_DATABASE_BYTES {
        return Err(DbError::InvalidSourceDatabase(format!(
            "{} is {} bytes, smaller than the {}-byte minimum",
            path.display(),
            metadata.len(),
            MIN_SOURCE_DATABASE_BYTES
        )));
    }

    let mut file = std::fs::File::open(path)?;
    let mut header = [0u8; 16];
    file.read_exact(&mut header)?;
    if &header != SQLITE_MAGIC {
        return Err(DbError::InvalidSourceDatabase(format!(
            "{} does not begin with the SQLite file header",
            path.display()
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, contents: &[u8]) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents).unwrap();
        path
    }

    #[test]
    fn accepts_well_formed_header() {
        let dir = tempfile::tempdir().unwrap();
        let mut contents = SQLITE_MAGIC.to_vec();
        contents.extend_from_slice(&[0u8; 100]);
        let path = write_file(dir.path(), "ok.db", &contents);
        assert!(validate_source_database(&path).is_ok());
    }

    #[test]
    fn rejects_too_small_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "tiny.db", b"short");
        assert!(validate_source_database(&path).is_err());
    }

    #[test]
    fn rejects_wrong_magic() {
        let dir = tempfile::tempdir().unwrap();
        let mut contents = vec![0u8; 16];
        contents.extend_from_slice(&[0u8; 100]);
        let path = write_file(dir.path(), "notdb.db", &contents);
        assert!(validate_source_database(&path).is_err());
    }

    #[test]
    fn rejects_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist.db");
        assert!(validate_source_database(&missing).is_err());
    }
}
