use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::transcode::TranscodeError;

/// Failures are cloneable so every caller attached to an in-flight transfer
/// can receive the same outcome.
#[derive(Debug, Clone, Error)]
pub enum DownloadError {
    #[error("failed to build http client: {0}")]
    Client(String),
    #[error("media at {url} is {size_mb:.2} MB, over the {limit_mb} MB limit")]
    SizeLimit {
        url: String,
        size_mb: f64,
        limit_mb: u64,
    },
    #[error("media duration {seconds:.0}s is over the {limit_seconds}s limit")]
    DurationLimit { seconds: f64, limit_seconds: u64 },
    #[error("transfer from {url} failed: {message}")]
    Transport { url: String, message: String },
    #[error("downloaded file {path} is empty")]
    ZeroByte { path: PathBuf },
    #[error("io error at {path}: {message}")]
    Io { path: PathBuf, message: String },
    #[error("transcode failed: {0}")]
    Transcode(#[from] TranscodeError),
}

impl DownloadError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        DownloadError::Io {
            path: path.to_path_buf(),
            message: source.to_string(),
        }
    }

    pub(crate) fn transport(url: &str, message: impl ToString) -> Self {
        DownloadError::Transport {
            url: url.to_string(),
            message: message.to_string(),
        }
    }
}

pub type DownloadResult<T> = std::result::Result<T, DownloadError>;
