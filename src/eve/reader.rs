use crate::eve::EveEvent;
use serde::de::Error as _;
use serde_json::Value;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("file not found: {0}")]
    NotFound(PathBuf),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed event at {path}:{line}: {source}")]
    Malformed {
        path: PathBuf,
        line: u64,
        #[source]
        source: serde_json::Error,
    },
}

/// Reads one eve.json file: one JSON object per line.
///
/// End-of-stream is a distinct non-error outcome (`Ok(None)`). A line that
/// fails to decode is fatal for the source; there is no skip-and-continue.
#[derive(Debug)]
pub struct EveReader {
    path: PathBuf,
    file: BufReader<File>,
    offset: u64,
    line_no: u64,
}

impl EveReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ReaderError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ReaderError::NotFound(path.clone()),
            _ => ReaderError::Io(e),
        })?;
        Ok(Self {
            path,
            file: BufReader::new(file),
            offset: 0,
            line_no: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes consumed so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Total size in bytes, or None when the source cannot report one.
    pub fn file_size(&self) -> Option<u64> {
        self.file.get_ref().metadata().ok().map(|m| m.len())
    }

    /// Decode the next event. `Ok(None)` means end of stream.
    pub fn next_event(&mut self) -> Result<Option<EveEvent>, ReaderError> {
        loop {
            let mut line = String::new();
            let bytes_read = self.file.read_line(&mut line)?;
            if bytes_read == 0 {
                return Ok(None);
            }

            self.offset += bytes_read as u64;
            self.line_no += 1;

            // A trailing newline or blank line is not an event.
            if line.trim().is_empty() {
                continue;
            }

            let value: Value =
                serde_json::from_str(&line).map_err(|e| ReaderError::Malformed {
                    path: self.path.clone(),
                    line: self.line_no,
                    source: e,
                })?;

            return match value {
                Value::Object(map) => Ok(Some(EveEvent::new(map))),
                _ => Err(ReaderError::Malformed {
                    path: self.path.clone(),
                    line: self.line_no,
                    source: serde_json::Error::custom("expected a JSON object"),
                }),
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_reads_events_in_order() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"{{"timestamp": "2024-01-01T00:00:00.000000+0000", "event_type": "alert"}}"#
        )
        .unwrap();
        writeln!(
            temp_file,
            r#"{{"timestamp": "2024-01-01T00:00:01.000000+0000", "event_type": "dns"}}"#
        )
        .unwrap();
        temp_file.flush().unwrap();

        let mut reader = EveReader::open(temp_file.path()).unwrap();

        let first = reader.next_event().unwrap().unwrap();
        assert_eq!(first.event_type(), Some("alert"));

        let second = reader.next_event().unwrap().unwrap();
        assert_eq!(second.event_type(), Some("dns"));

        assert!(reader.next_event().unwrap().is_none());
    }

    #[test]
    fn test_offset_tracks_bytes_consumed() {
        let mut temp_file = NamedTempFile::new().unwrap();
        let line = r#"{"event_type": "alert"}"#;
        writeln!(temp_file, "{}", line).unwrap();
        temp_file.flush().unwrap();

        let mut reader = EveReader::open(temp_file.path()).unwrap();
        assert_eq!(reader.offset(), 0);

        reader.next_event().unwrap().unwrap();
        assert_eq!(reader.offset(), line.len() as u64 + 1);
        assert_eq!(reader.file_size(), Some(line.len() as u64 + 1));
    }

    #[test]
    fn test_malformed_line_is_fatal() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, r#"{{"event_type": "alert"}}"#).unwrap();
        writeln!(temp_file, "this is not json").unwrap();
        writeln!(temp_file, r#"{{"event_type": "dns"}}"#).unwrap();
        temp_file.flush().unwrap();

        let mut reader = EveReader::open(temp_file.path()).unwrap();
        assert!(reader.next_event().unwrap().is_some());

        let err = reader.next_event().unwrap_err();
        assert!(matches!(err, ReaderError::Malformed { line: 2, .. }));
    }

    #[test]
    fn test_non_object_line_is_malformed() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "[1, 2, 3]").unwrap();
        temp_file.flush().unwrap();

        let mut reader = EveReader::open(temp_file.path()).unwrap();
        assert!(matches!(
            reader.next_event(),
            Err(ReaderError::Malformed { .. })
        ));
    }

    #[test]
    fn test_blank_lines_skipped() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file).unwrap();
        writeln!(temp_file, r#"{{"event_type": "flow"}}"#).unwrap();
        writeln!(temp_file).unwrap();
        temp_file.flush().unwrap();

        let mut reader = EveReader::open(temp_file.path()).unwrap();
        assert!(reader.next_event().unwrap().is_some());
        assert!(reader.next_event().unwrap().is_none());
    }

    #[test]
    fn test_missing_file() {
        let err = EveReader::open("/nonexistent/eve.json").unwrap_err();
        assert!(matches!(err, ReaderError::NotFound(_)));
    }
}
