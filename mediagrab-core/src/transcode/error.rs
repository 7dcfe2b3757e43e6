use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum TranscodeError {
    #[error("failed to launch {tool}: {message}")]
    Launch { tool: String, message: String },
    #[error("{tool} failed with status {status:?}: {stderr}")]
    Process {
        tool: String,
        status: Option<i32>,
        stderr: String,
    },
    #[error("{tool} did not finish within {timeout:?}")]
    Timeout { tool: String, timeout: Duration },
    #[error("no audio stream to map in {path}")]
    MissingAudio { path: PathBuf },
    #[error("io error at {path}: {message}")]
    Io { path: PathBuf, message: String },
    #[error("no readable media streams in {path}")]
    InvalidMedia { path: PathBuf },
}

impl TranscodeError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        TranscodeError::Io {
            path: path.to_path_buf(),
            message: source.to_string(),
        }
    }
}

pub type TranscodeResult<T> = std::result::Result<T, TranscodeError>;
