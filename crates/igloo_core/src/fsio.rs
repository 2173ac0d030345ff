//! Atomic filesystem writes and JSONL helpers.
//!
//! Every durable write in Igloo goes through `atomic_write_*`: the payload
//! lands in `<target>.tmp` in the same directory, is fsynced, renamed over
//! the target, and the directory is fsynced. Readers either see the old
//! file or the new one, never a torn write. Crash recovery can rely on a
//! leftover `.tmp` being discardable.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;

/// Write bytes atomically (tmp → fsync → rename → fsync dir).
pub fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    fs::create_dir_all(parent)?;

    let tmp_path = tmp_path_for(path);
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    sync_dir(parent);
    Ok(())
}

/// Serialize a value to pretty JSON and write it atomically.
pub fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    let json = serde_json::to_vec_pretty(value)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    atomic_write_bytes(path, &json)
}

/// The sibling tmp path used by `atomic_write_bytes`.
pub fn tmp_path_for(path: &Path) -> std::path::PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(".tmp");
    path.with_file_name(name)
}

/// Append one JSON object as a line, creating the file if needed.
///
/// The append itself is a single write syscall, so concurrent appenders
/// (guarded by a per-file mutex in-process) produce whole lines.
pub fn append_jsonl<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut line = serde_json::to_vec(value)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    line.push(b'\n');

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(&line)?;
    file.flush()?;
    Ok(())
}

/// Read a whole JSONL file, failing on the first malformed line.
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> io::Result<Vec<T>> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut out = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let value = serde_json::from_str(&line).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{}:{}: {}", path.display(), idx + 1, e),
            )
        })?;
        out.push(value);
    }
    Ok(out)
}

/// Read a JSONL file, skipping malformed lines.
///
/// Returns the parsed records and the number of lines skipped. Callers
/// that care about corruption (the report index) use the skip count to
/// decide whether to rebuild.
pub fn read_jsonl_lossy<T: DeserializeOwned>(path: &Path) -> io::Result<(Vec<T>, usize)> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut out = Vec::new();
    let mut skipped = 0;
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(value) => out.push(value),
            Err(_) => skipped += 1,
        }
    }
    Ok((out, skipped))
}

/// Fsync a directory so a rename is durable. Best-effort on platforms
/// where directories cannot be opened for sync (Windows).
fn sync_dir(dir: &Path) {
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use tempfile::TempDir;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Row {
        id: u32,
        name: String,
    }

    #[test]
    fn test_atomic_write_round_trip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested/dir/value.json");

        let value = Row {
            id: 7,
            name: "alpha".to_string(),
        };
        atomic_write_json(&path, &value).unwrap();

        let loaded: Row = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(loaded, value);
        assert!(!tmp_path_for(&path).exists());
    }

    #[test]
    fn test_atomic_write_replaces_existing() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("value.txt");

        atomic_write_bytes(&path, b"one").unwrap();
        atomic_write_bytes(&path, b"two").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"two");
    }

    #[test]
    fn test_jsonl_append_and_read() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("events.jsonl");

        for id in 0..3 {
            append_jsonl(
                &path,
                &Row {
                    id,
                    name: format!("row-{}", id),
                },
            )
            .unwrap();
        }

        let rows: Vec<Row> = read_jsonl(&path).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2].id, 2);
    }

    #[test]
    fn test_lossy_read_skips_corrupt_lines() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("events.jsonl");

        append_jsonl(&path, &Row { id: 1, name: "a".into() }).unwrap();
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            writeln!(file, "{{not json").unwrap();
        }
        append_jsonl(&path, &Row { id: 2, name: "b".into() }).unwrap();

        let (rows, skipped): (Vec<Row>, usize) = read_jsonl_lossy(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(skipped, 1);

        // Strict read reports the corruption instead.
        let strict: io::Result<Vec<Row>> = read_jsonl(&path);
        assert!(strict.is_err());
    }

    #[test]
    fn test_tmp_path_shape() {
        let path = Path::new("/data/outline.json");
        assert_eq!(tmp_path_for(path), Path::new("/data/outline.json.tmp"));
    }
}
