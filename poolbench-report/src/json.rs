//! JSON Output
//!
//! One document per benchmark, `<benchmark>.json`, mapping each attempted mode
//! to its metrics. Documents are written to a temporary file in the target
//! directory and renamed into place, so readers never see a partial file.

use crate::report::BenchmarkResult;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Failure reading or writing a metrics document.
#[derive(Debug, Error)]
pub enum DocumentError {
    /// Filesystem failure
    #[error("{action} {path}: {source}")]
    Io {
        /// What was being attempted
        action: &'static str,
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Document is not valid JSON of the expected shape
    #[error("invalid metrics document {path}: {source}")]
    Json {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: serde_json::Error,
    },
}

/// Generate a prettified JSON document.
pub fn generate_json_report(result: &BenchmarkResult) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(result)
}

/// Path of the document for `benchmark` inside `dir`.
pub fn document_path(dir: &Path, benchmark: &str) -> PathBuf {
    dir.join(format!("{benchmark}.json"))
}

/// Atomically write the document for `benchmark` into `dir`, replacing any
/// previous one. Returns the final path.
pub fn write_document(
    dir: &Path,
    benchmark: &str,
    result: &BenchmarkResult,
) -> Result<PathBuf, DocumentError> {
    let path = document_path(dir, benchmark);
    let io = |action: &'static str, path: &Path| {
        let path = path.to_path_buf();
        move |source| DocumentError::Io {
            action,
            path,
            source,
        }
    };

    let json = generate_json_report(result).map_err(|source| DocumentError::Json {
        path: path.clone(),
        source,
    })?;

    std::fs::create_dir_all(dir).map_err(io("create directory", dir))?;
    let mut tmp =
        tempfile::NamedTempFile::new_in(dir).map_err(io("create temporary file in", dir))?;
    let written = writeln!(tmp, "{json}").and_then(|()| tmp.as_file().sync_all());
    written.map_err(io("write", tmp.path()))?;
    tmp.persist(&path).map_err(|e| DocumentError::Io {
        action: "rename into",
        path: path.clone(),
        source: e.error,
    })?;

    tracing::debug!(path = %path.display(), modes = result.len(), "metrics document written");
    Ok(path)
}

/// Read a document written by [`write_document`].
pub fn load_document(path: &Path) -> Result<BenchmarkResult, DocumentError> {
    let content = std::fs::read_to_string(path).map_err(|source| DocumentError::Io {
        action: "read",
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| DocumentError::Json {
        path: path.to_path_buf(),
        source,
    })
}
