use std::path::PathBuf;
use thiserror::Error;

/// The main error type for dataset fetch and decode operations.
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{url} not available: {reason}")]
    NetworkUnavailable { url: String, reason: String },

    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Cannot use cache directory {path}: {source}")]
    CacheDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "No member matching {pattern} in {archive} (distributor layout changed or unknown dataset name)"
    )]
    MissingMember { archive: PathBuf, pattern: String },

    #[error("Corrupt archive {path}: {message}")]
    CorruptArchive { path: PathBuf, message: String },

    #[error("Unsupported archive type: {path}")]
    UnsupportedArchive { path: PathBuf },

    #[error("Invalid IDX magic in {path}: {found:#010x}")]
    InvalidMagic { path: PathBuf, found: u32 },

    #[error("IDX tensor in {path} has {found} dimension(s), {kind} expect {expected}")]
    DimensionMismatch {
        path: PathBuf,
        kind: String,
        expected: String,
        found: usize,
    },

    #[error("Truncated payload in {path}: expected {expected} bytes, {available} available")]
    PayloadTruncated {
        path: PathBuf,
        expected: usize,
        available: usize,
    },

    #[error("Failed to unpickle {path}: {message}")]
    Pickle { path: PathBuf, message: String },

    #[error("Failed to read R data from {path}: {message}")]
    Rdata { path: PathBuf, message: String },

    #[error("Malformed record in {path}: {message}")]
    MalformedRecord { path: PathBuf, message: String },

    #[error("Inconsistent rows in {path}: expected {expected}, found {found}")]
    InconsistentRows {
        path: PathBuf,
        expected: usize,
        found: usize,
    },

    #[error("Split assignment {path} has {split_rows} row(s) but the data has {data_rows}")]
    SplitMismatch {
        path: PathBuf,
        data_rows: usize,
        split_rows: usize,
    },

    #[error("Failed to parse table {path}: {source}")]
    TableParse {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Invalid value '{value}' in {path} at line {line}")]
    InvalidValue {
        path: PathBuf,
        line: usize,
        value: String,
    },

    #[error("Unknown dataset: {0}")]
    UnknownDataset(String),

    #[error("Failed to serialize report: {0}")]
    ReportSerialize(#[from] serde_json::Error),
}

impl DatasetError {
    /// True for errors raised while interpreting an archive or tensor container.
    pub fn is_archive_format(&self) -> bool {
        matches!(
            self,
            DatasetError::MissingMember { .. }
                | DatasetError::CorruptArchive { .. }
                | DatasetError::UnsupportedArchive { .. }
                | DatasetError::InvalidMagic { .. }
                | DatasetError::DimensionMismatch { .. }
        )
    }
}
