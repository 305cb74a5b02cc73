use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::io;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReadDocumentError {
    #[error("failed to read {path}: {source}")]
    Read { path: String, source: io::Error },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum WriteDocumentError {
    #[error("failed to encode {path}: {source}")]
    Encode {
        path: String,
        source: serde_json::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write { path: String, source: io::Error },
}

/// Reads and parses a JSON document. A missing file is `Ok(None)`.
pub fn read_json_file<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, ReadDocumentError> {
    let Some(raw) = read_text_file(path)? else {
        return Ok(None);
    };
    let parsed = serde_json::from_str::<T>(&raw).map_err(|source| ReadDocumentError::Parse {
        path: path.display().to_string(),
        source,
    })?;
    Ok(Some(parsed))
}

pub fn read_text_file(path: &Path) -> Result<Option<String>, ReadDocumentError> {
    match fs::read_to_string(path) {
        Ok(raw) => Ok(Some(raw)),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(ReadDocumentError::Read {
            path: path.display().to_string(),
            source,
        }),
    }
}

/// Whole-document replace: serialize everything, write a sibling temp file,
/// then rename it over the target.
pub fn write_json_atomic(path: &Path, value: &impl Serialize) -> Result<(), WriteDocumentError> {
    let text = serde_json::to_string_pretty(value).map_err(|source| WriteDocumentError::Encode {
        path: path.display().to_string(),
        source,
    })?;
    write_text_atomic(path, &format!("{text}\n")).map_err(|source| WriteDocumentError::Write {
        path: path.display().to_string(),
        source,
    })
}

pub fn write_text_atomic(path: &Path, text: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, text)?;
    fs::rename(tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Doc {
        version: u32,
        items: Vec<String>,
    }

    #[test]
    fn missing_file_reads_as_none() {
        let dir = tempdir().expect("tempdir");
        let parsed: Option<Doc> = read_json_file(&dir.path().join("nope.json")).expect("read");
        assert!(parsed.is_none());
    }

    #[test]
    fn writes_then_reads_back_and_leaves_no_temp_file() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("doc.json");
        let doc = Doc {
            version: 1,
            items: vec!["a".to_string()],
        };

        write_json_atomic(&path, &doc).expect("write");

        let parsed: Option<Doc> = read_json_file(&path).expect("read");
        assert_eq!(parsed, Some(doc));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn corrupt_file_is_a_parse_error() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("doc.json");
        fs::write(&path, "{not json").expect("write");
        let error = read_json_file::<Doc>(&path).expect_err("error");
        assert!(matches!(error, ReadDocumentError::Parse { .. }));
    }
}
