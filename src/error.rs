use std::path::PathBuf;
use thiserror::Error;

/// The main error type for datacollective operations.
#[derive(Debug, Error)]
pub enum DataCollectiveError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Rate limit exceeded. Please try again later.")]
    RateLimited,

    #[error("Unexpected response from {endpoint}: {message}")]
    ProtocolMismatch { endpoint: String, message: String },

    #[error("HTTP {status} from {url}")]
    Upstream { status: u16, url: String },

    #[error("Request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error("Failed to parse upload state from {path}: {source}")]
    UploadStateParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to write upload state to {path}: {source}")]
    UploadStateWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Upload aborted: {0}")]
    UploadAborted(String),

    #[error("Failed to extract {path}: {message}")]
    Archive { path: PathBuf, message: String },

    #[error("Unrecognized dataset layout at {path}: {message}")]
    DatasetLayout { path: PathBuf, message: String },

    #[error("Failed to read table {path}: {source}")]
    TableRead {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

impl DataCollectiveError {
    pub(crate) fn protocol(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        DataCollectiveError::ProtocolMismatch {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Whether a later call with the same plan can pick up where this one stopped.
    pub fn is_resumable(&self) -> bool {
        matches!(self, DataCollectiveError::Download(err) if err.checksum.is_some())
    }
}

/// A download that stopped part-way through.
///
/// The partial file and checksum marker stay on disk; calling the download
/// again with the same dataset resumes from `total_bytes`.
#[derive(Debug, Error)]
#[error("{}", describe_download_failure(.checksum, *.total_bytes, *.expected_bytes, .source))]
pub struct DownloadError {
    /// Bytes written during the attempt that failed.
    pub session_bytes: u64,
    /// Bytes in the partial file, including earlier attempts.
    pub total_bytes: u64,
    /// Declared archive size.
    pub expected_bytes: u64,
    /// Checksum that proves the partial file is still valid, if the dataset has one.
    pub checksum: Option<String>,
    #[source]
    pub source: Option<Box<DataCollectiveError>>,
}

impl DownloadError {
    /// Percentage of the archive still missing, rounded down.
    pub fn remaining_percent(&self) -> u64 {
        remaining_percent(self.total_bytes, self.expected_bytes)
    }
}

fn remaining_percent(total_bytes: u64, expected_bytes: u64) -> u64 {
    if expected_bytes == 0 {
        return 0;
    }
    let remaining = expected_bytes.saturating_sub(total_bytes);
    remaining.saturating_mul(100) / expected_bytes
}

fn describe_download_failure(
    checksum: &Option<String>,
    total_bytes: u64,
    expected_bytes: u64,
    source: &Option<Box<DataCollectiveError>>,
) -> String {
    let cause = source
        .as_ref()
        .map(|source| format!(" ({source})"))
        .unwrap_or_default();
    match checksum {
        Some(_) => format!(
            "Download failed with {total_bytes} of {expected_bytes} bytes written{cause} ({}% remaining). Run the download again to resume.",
            remaining_percent(total_bytes, expected_bytes)
        ),
        None => format!(
            "Download failed{cause}. This dataset does not support resuming downloads, please try again."
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn download_error_reports_resume_hint_when_checksum_known() {
        let err = DownloadError {
            session_bytes: 100,
            total_bytes: 250,
            expected_bytes: 1000,
            checksum: Some("abc".to_string()),
            source: None,
        };
        let message = err.to_string();
        assert!(message.contains("250 of 1000"));
        assert!(message.contains("75% remaining"));
        assert!(message.contains("resume"));
        assert!(DataCollectiveError::from(err).is_resumable());
    }

    #[test]
    fn download_error_without_checksum_is_not_resumable() {
        let err = DownloadError {
            session_bytes: 10,
            total_bytes: 10,
            expected_bytes: 100,
            checksum: None,
            source: Some(Box::new(DataCollectiveError::RateLimited)),
        };
        let message = err.to_string();
        assert!(message.contains("does not support resuming"));
        assert!(message.contains("Rate limit"));
        assert!(!DataCollectiveError::from(err).is_resumable());
    }

    #[test]
    fn download_error_exposes_its_cause_as_source() {
        use std::error::Error as _;

        let err = DownloadError {
            session_bytes: 0,
            total_bytes: 0,
            expected_bytes: 100,
            checksum: Some("abc".to_string()),
            source: Some(Box::new(DataCollectiveError::RateLimited)),
        };
        let source = err.source().expect("source");
        assert_eq!(source.to_string(), DataCollectiveError::RateLimited.to_string());

        let bare = DownloadError {
            source: None,
            ..err
        };
        assert!(bare.source().is_none());
    }
}
