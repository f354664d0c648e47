//! The puzzle / non-puzzle output files: path derivation (§6.4) and the JSON-array append
//! procedure (§6.2) that keeps each file a valid top-level array after every flush.

use std::fs::{self, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::instrument;

use crate::error::{MiningError, Result};
use crate::record::Record;

/// The two output files for one mining run.
#[derive(Debug, Clone)]
pub struct OutputPaths {
    pub puzzles: PathBuf,
    pub nonpuzzles: PathBuf,
}

impl OutputPaths {
    /// Derives the puzzle/non-puzzle paths from an output root per §6.4: a directory gets a
    /// generated `chess960|standard-<epoch_ms>` stem, a file-like path ending in `.json`/`.jsonl`
    /// contributes its own stem.
    pub fn derive(output_root: &Path, chess960: bool, created_ms: i64) -> Self {
        let is_file_like = matches!(
            output_root.extension().and_then(|ext| ext.to_str()),
            Some("json") | Some("jsonl")
        );

        if is_file_like {
            let stem = output_root
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("output");
            let parent = output_root.parent().filter(|p| !p.as_os_str().is_empty());
            let dir = parent.unwrap_or_else(|| Path::new("."));
            Self {
                puzzles: dir.join(format!("{stem}.puzzles.json")),
                nonpuzzles: dir.join(format!("{stem}.nonpuzzles.json")),
            }
        } else {
            let variant = if chess960 { "chess960" } else { "standard" };
            let stem = format!("{variant}-{created_ms}");
            Self {
                puzzles: output_root.join(format!("{stem}.puzzles.json")),
                nonpuzzles: output_root.join(format!("{stem}.nonpuzzles.json")),
            }
        }
    }
}

fn record_json(record: &Record) -> Value {
    serde_json::json!({
        "created": record.created_ms,
        "engine": record.engine,
        "parent": record.parent.as_ref().map(|p| p.canonical_fen()),
        "position": record.position.canonical_fen(),
        "description": record.description,
        "tags": record.tags,
        "analysis": record.analysis.raw_lines(),
    })
}

/// Appends `records` to the JSON array at `path`, creating it if missing. An empty slice still
/// touches the file so downstream consumers may open it after a wave with no records of that
/// kind.
#[instrument(skip(records), fields(path = %path.display(), count = records.len()))]
pub fn append(path: &Path, records: &[Record]) -> Result<()> {
    let objects = records
        .iter()
        .map(|record| {
            serde_json::to_string(&record_json(record))
                .map_err(|err| MiningError::OutputIo(io::Error::new(io::ErrorKind::Other, err)))
        })
        .collect::<Result<Vec<_>>>()?;

    append_raw(path, &objects)
}

fn append_raw(path: &Path, objects: &[String]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(path)?;
    let len = file.metadata()?.len();

    if len == 0 {
        return write_fresh_array(&mut file, objects);
    }

    if objects.is_empty() {
        return Ok(());
    }

    let last_nonws = scan_backward_for_nonwhitespace(&mut file, len)?;
    let Some((close_pos, close_byte)) = last_nonws else {
        return write_fresh_array(&mut file, objects);
    };

    let truncate_at = if close_byte == b']' { close_pos } else { len };

    let needs_comma = match scan_backward_for_nonwhitespace(&mut file, truncate_at)? {
        Some((_, b'[')) => false,
        _ => true,
    };

    file.set_len(truncate_at)?;
    file.seek(SeekFrom::Start(truncate_at))?;

    let mut body = String::new();
    if needs_comma {
        body.push(',');
    }
    body.push_str(&objects.join(","));
    body.push(']');
    file.write_all(body.as_bytes())?;
    let _ = file.sync_all();
    Ok(())
}

fn write_fresh_array(file: &mut std::fs::File, objects: &[String]) -> Result<()> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(b"[")?;
    file.write_all(objects.join(",").as_bytes())?;
    file.write_all(b"]")?;
    let _ = file.sync_all();
    Ok(())
}

/// Scans backward from `from` for the last non-whitespace byte, returning its position and
/// value, or `None` if everything before `from` is whitespace.
fn scan_backward_for_nonwhitespace(
    file: &mut std::fs::File,
    from: u64,
) -> Result<Option<(u64, u8)>> {
    let mut pos = from;
    let mut buf = [0u8; 1];
    while pos > 0 {
        pos -= 1;
        file.seek(SeekFrom::Start(pos))?;
        file.read_exact(&mut buf)?;
        if !buf[0].is_ascii_whitespace() {
            return Ok(Some((pos, buf[0])));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::Analysis;
    use crate::position::Position;

    fn sample_record(engine: &str) -> Record {
        Record::new(Position::startpos(), None, engine.to_owned(), 1_000)
    }

    #[test]
    fn derive_paths_for_directory_root() {
        let paths = OutputPaths::derive(Path::new("/tmp/out"), false, 42);
        assert_eq!(paths.puzzles, PathBuf::from("/tmp/out/standard-42.puzzles.json"));
        assert_eq!(
            paths.nonpuzzles,
            PathBuf::from("/tmp/out/standard-42.nonpuzzles.json")
        );
    }

    #[test]
    fn derive_paths_for_chess960_directory_root() {
        let paths = OutputPaths::derive(Path::new("/tmp/out"), true, 42);
        assert_eq!(paths.puzzles, PathBuf::from("/tmp/out/chess960-42.puzzles.json"));
    }

    #[test]
    fn derive_paths_for_file_like_root() {
        let paths = OutputPaths::derive(Path::new("/tmp/run.json"), false, 42);
        assert_eq!(paths.puzzles, PathBuf::from("/tmp/run.puzzles.json"));
        assert_eq!(paths.nonpuzzles, PathBuf::from("/tmp/run.nonpuzzles.json"));
    }

    #[test]
    fn append_creates_valid_array_from_scratch() {
        let dir = std::env::temp_dir().join(format!("mining-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("fresh.json");
        let _ = fs::remove_file(&path);

        append(&path, &[sample_record("stockfish")]).unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        let parsed: Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed.as_array().unwrap().len(), 1);
    }

    #[test]
    fn append_twice_accumulates_records() {
        let dir = std::env::temp_dir().join(format!("mining-test-append-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("accum.json");
        let _ = fs::remove_file(&path);

        append(&path, &[sample_record("a"), sample_record("b")]).unwrap();
        append(&path, &[sample_record("c")]).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        let parsed: Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed.as_array().unwrap().len(), 3);
    }

    #[test]
    fn append_empty_batch_still_touches_missing_file() {
        let dir = std::env::temp_dir().join(format!("mining-test-touch-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("touch.json");
        let _ = fs::remove_file(&path);

        append(&path, &[]).unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        let parsed: Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed.as_array().unwrap().len(), 0);
    }
}
