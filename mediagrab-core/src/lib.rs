pub mod config;
pub mod download;
mod fsutil;
pub mod transcode;

pub use config::{
    load_config, ConfigError, ConfigResult, DownloadSection, GifSection, MediagrabConfig,
    PathsSection, ReencodeSection, TranscodeSection,
};
pub use download::{
    derive_file_name, BrowserAgent, DownloadError, DownloadResult, Downloader, FetchRequest,
    ImpersonatingClient, SingleFlight,
};
pub use transcode::{
    GifOptions, GifOptimizer, MediaPair, MediaProbe, TranscodeError, TranscodeResult, Transcoder,
};
