//! Header metadata readers.
//!
//! Instrument file I/O is a collaborator, not part of the coordination
//! core, so header extraction sits behind [`HeaderReader`]. The packaged
//! implementation reads one JSON object of header keywords per exposure
//! file; survey-specific readers plug in the same way.

use crate::metadata::Metadata;
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Errors that can occur while reading header metadata.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Input/output operation failed.
    #[error("IO operation failed on path {path}: {source}")]
    IO {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Failed to parse the header document.
    #[error("Failed to parse header document {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    /// The header document is not a key-value object.
    #[error("Header document {path} is not a key-value object")]
    NotAnObject { path: PathBuf },
}

/// Extracts raw header metadata from one exposure file.
pub trait HeaderReader: Send + Sync {
    fn read(&self, path: &Path) -> Result<Metadata, Error>;
}

/// Reads headers stored as a flat JSON object of keyword-value pairs.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonHeaderReader;

impl HeaderReader for JsonHeaderReader {
    fn read(&self, path: &Path) -> Result<Metadata, Error> {
        let contents = std::fs::read_to_string(path).map_err(|source| Error::IO {
            path: path.to_path_buf(),
            source,
        })?;

        let value: Value = serde_json::from_str(&contents).map_err(|source| Error::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        match value {
            Value::Object(map) => Ok(map),
            _ => Err(Error::NotAnObject {
                path: path.to_path_buf(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;

    #[test]
    fn test_reads_flat_header_object() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("header.json");
        fs::write(
            &path,
            r#"{"FILTER": "r.MP9601", "EXPTIME": 15.0, "OBJECT": "D3"}"#,
        )
        .unwrap();

        let metadata = JsonHeaderReader.read(&path).unwrap();
        assert_eq!(metadata.get("FILTER"), Some(&json!("r.MP9601")));
        assert_eq!(metadata.get("EXPTIME"), Some(&json!(15.0)));
    }

    #[test]
    fn test_rejects_non_object_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("header.json");
        fs::write(&path, "[1, 2, 3]").unwrap();

        assert!(matches!(
            JsonHeaderReader.read(&path),
            Err(Error::NotAnObject { .. })
        ));
    }

    #[test]
    fn test_missing_file() {
        let result = JsonHeaderReader.read(Path::new("/nonexistent/header.json"));
        assert!(matches!(result, Err(Error::IO { .. })));
    }
}
