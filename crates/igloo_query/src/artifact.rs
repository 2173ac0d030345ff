//! Content-addressed SQL artifact store.
//!
//! Every accepted statement is stored byte-for-byte under
//! `<artifact_root>/queries/by_sha/<sha256>.sql`. Writes are idempotent:
//! the sha is the identity, so a second write of the same text is a no-op
//! and no lock is needed.

use igloo_core::{fsio, sha256_hex};
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    by_sha: PathBuf,
}

impl ArtifactStore {
    pub fn new(artifact_root: &Path) -> Self {
        Self {
            by_sha: artifact_root.join("queries").join("by_sha"),
        }
    }

    /// Store a statement, returning its sha256.
    pub fn store(&self, sql: &str) -> io::Result<String> {
        let sha = sha256_hex(sql.as_bytes());
        let path = self.path_for(&sha);
        if !path.exists() {
            fsio::atomic_write_bytes(&path, sql.as_bytes())?;
        }
        Ok(sha)
    }

    /// Read a statement back by sha.
    pub fn read(&self, sha: &str) -> io::Result<String> {
        std::fs::read_to_string(self.path_for(sha))
    }

    pub fn contains(&self, sha: &str) -> bool {
        self.path_for(sha).exists()
    }

    fn path_for(&self, sha: &str) -> PathBuf {
        self.by_sha.join(format!("{}.sql", sha))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_round_trip_byte_for_byte() {
        let temp = TempDir::new().unwrap();
        let store = ArtifactStore::new(temp.path());

        let sql = "SELECT *\nFROM a.b.c -- trailing comment\n";
        let sha = store.store(sql).unwrap();
        assert_eq!(store.read(&sha).unwrap(), sql);
    }

    #[test]
    fn test_idempotent_writes() {
        let temp = TempDir::new().unwrap();
        let store = ArtifactStore::new(temp.path());

        let sha1 = store.store("SELECT 1").unwrap();
        let mtime1 = std::fs::metadata(temp.path().join(format!("queries/by_sha/{}.sql", sha1)))
            .unwrap()
            .modified()
            .unwrap();

        std::thread::sleep(std::time::Duration::from_millis(20));
        let sha2 = store.store("SELECT 1").unwrap();
        assert_eq!(sha1, sha2);

        let mtime2 = std::fs::metadata(temp.path().join(format!("queries/by_sha/{}.sql", sha2)))
            .unwrap()
            .modified()
            .unwrap();
        // Second write did not rewrite the file.
        assert_eq!(mtime1, mtime2);
    }

    #[test]
    fn test_distinct_statements_distinct_slots() {
        let temp = TempDir::new().unwrap();
        let store = ArtifactStore::new(temp.path());

        let a = store.store("SELECT 1").unwrap();
        let b = store.store("SELECT 2").unwrap();
        assert_ne!(a, b);
        assert!(store.contains(&a));
        assert!(store.contains(&b));
    }
}
