use std::io;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        source: toml::de::Error,
        path: PathBuf,
    },
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, Deserialize)]
pub struct MediagrabConfig {
    pub paths: PathsSection,
    pub download: DownloadSection,
    pub transcode: TranscodeSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    pub cache_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DownloadSection {
    pub max_size_mb: u64,
    pub max_duration_seconds: u64,
    pub timeout_seconds: u64,
    pub user_agent: String,
    pub impersonate_hosts: Vec<String>,
    /// Abort a transfer whose body grows past the size limit even when the
    /// server declared no Content-Length. Off by default: many origins omit
    /// the header for generated media.
    #[serde(default)]
    pub enforce_stream_size: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranscodeSection {
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub process_timeout_seconds: u64,
    pub gif: GifSection,
    pub reencode: ReencodeSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GifSection {
    pub fps: u32,
    pub width: u32,
    pub optimize: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReencodeSection {
    pub codec: String,
    pub preset: String,
    pub crf: u8,
    pub audio_codec: String,
    pub audio_bitrate: String,
}

pub fn load_config<P: AsRef<Path>>(path: P) -> ConfigResult<MediagrabConfig> {
    load_toml(path)
}

fn load_toml<T, P>(path: P) -> ConfigResult<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_fixture_config() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/mediagrab.toml");
        let config = load_config(path).expect("fixture config should parse");
        assert_eq!(config.download.max_size_mb, 100);
        assert!(!config.download.impersonate_hosts.is_empty());
        assert!(!config.download.enforce_stream_size);
        assert_eq!(config.transcode.gif.fps, 15);
        assert_eq!(config.transcode.reencode.codec, "libx264");
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load_config("does/not/exist.toml").unwrap_err();
        match err {
            ConfigError::Io { path, .. } => {
                assert!(path.ends_with("exist.toml"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
