//! Atomic artifact and state-document IO.
//!
//! Every commit follows the same protocol: write to a named temp file in the
//! destination directory, fsync, then rename into place. A crash can only
//! leave `*.tmp.*` litter, which is garbage-collected at the next run start.
//! Artifacts are JSON Lines; state documents are single JSON values.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;

use accord_lib_core::errors::{PipelineError, PipelineResult};

fn io_error(path: &Path, e: impl std::fmt::Display) -> PipelineError {
    PipelineError::artifact(path.display().to_string(), e.to_string())
}

/// Commits one stage artifact as JSONL and returns its final path.
pub fn write_jsonl<T: Serialize>(dir: &Path, stem: &str, rows: &[T]) -> PipelineResult<PathBuf> {
    let final_path = dir.join(format!("{stem}.jsonl"));
    let mut tmp = NamedTempFile::with_prefix_in(format!("{stem}.tmp."), dir)
        .map_err(|e| io_error(&final_path, e))?;
    for row in rows {
        serde_json::to_writer(&mut tmp, row).map_err(|e| io_error(&final_path, e))?;
        tmp.write_all(b"\n").map_err(|e| io_error(&final_path, e))?;
    }
    tmp.flush().map_err(|e| io_error(&final_path, e))?;
    tmp.as_file().sync_all().map_err(|e| io_error(&final_path, e))?;
    tmp.persist(&final_path).map_err(|e| io_error(&final_path, e))?;
    Ok(final_path)
}

pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> PipelineResult<Vec<T>> {
    let file = File::open(path).map_err(|e| io_error(path, e))?;
    let reader = BufReader::new(file);
    let mut rows = Vec::new();
    for line in reader.lines() {
        let line = line.map_err(|e| io_error(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        rows.push(serde_json::from_str(&line).map_err(|e| io_error(path, e))?);
    }
    Ok(rows)
}

/// Commits a whole JSON document (state file, run index) atomically.
pub fn write_json_doc<T: Serialize>(path: &Path, value: &T) -> PipelineResult<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::with_prefix_in(".doc.tmp.", dir)
        .map_err(|e| io_error(path, e))?;
    serde_json::to_writer_pretty(&mut tmp, value).map_err(|e| io_error(path, e))?;
    tmp.write_all(b"\n").map_err(|e| io_error(path, e))?;
    tmp.flush().map_err(|e| io_error(path, e))?;
    tmp.as_file().sync_all().map_err(|e| io_error(path, e))?;
    tmp.persist(path).map_err(|e| io_error(path, e))?;
    Ok(())
}

pub fn read_json_doc<T: DeserializeOwned>(path: &Path) -> PipelineResult<T> {
    let file = File::open(path).map_err(|e| io_error(path, e))?;
    serde_json::from_reader(BufReader::new(file)).map_err(|e| io_error(path, e))
}

/// Removes temp litter left by a crashed run. Best-effort; unreadable entries
/// are skipped.
pub fn gc_stale_temps(dir: &Path) -> u64 {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };
    let mut removed = 0;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.contains(".tmp.") && fs::remove_file(entry.path()).is_ok() {
            removed += 1;
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Row {
        id: String,
        n: u64,
    }

    #[test]
    fn jsonl_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let rows = vec![
            Row { id: "a".into(), n: 1 },
            Row { id: "b".into(), n: 2 },
        ];
        let path = write_jsonl(dir.path(), "rows", &rows).unwrap();
        assert_eq!(path.file_name().unwrap(), "rows.jsonl");
        let back: Vec<Row> = read_jsonl(&path).unwrap();
        assert_eq!(back, rows);
    }

    #[test]
    fn gc_removes_only_temp_litter() {
        let dir = tempfile::tempdir().unwrap();
        let rows: Vec<Row> = vec![];
        write_jsonl(dir.path(), "keep", &rows).unwrap();
        std::fs::write(dir.path().join("scoring.tmp.abc123"), b"partial").unwrap();

        assert_eq!(gc_stale_temps(dir.path()), 1);
        assert!(dir.path().join("keep.jsonl").exists());
        assert!(!dir.path().join("scoring.tmp.abc123").exists());
    }

    #[test]
    fn json_doc_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let row = Row { id: "x".into(), n: 9 };
        write_json_doc(&path, &row).unwrap();
        let back: Row = read_json_doc(&path).unwrap();
        assert_eq!(back, row);
    }

    #[test]
    fn missing_artifact_is_an_artifact_error() {
        let err = read_jsonl::<Row>(Path::new("/nonexistent/zzz.jsonl")).unwrap_err();
        assert!(matches!(err, PipelineError::Artifact { .. }));
    }
}
