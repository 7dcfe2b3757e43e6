use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use thiserror::Error;

use mediagrab_core::config::{load_config, ConfigError, MediagrabConfig};
use mediagrab_core::download::{
    DownloadError, Downloader, FetchRequest, HeaderMap, HeaderName, HeaderValue,
};
use mediagrab_core::transcode::{MediaProbe, TranscodeError, Transcoder};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("download error: {0}")]
    Download(#[from] DownloadError),
    #[error("transcode error: {0}")]
    Transcode(#[from] TranscodeError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("invalid header {0:?}, expected \"Name: value\"")]
    InvalidHeader(String),
    #[error("clip carries an audio track, refusing gif conversion")]
    AudioPresent,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Media acquisition pipeline control interface", long_about = None)]
pub struct Cli {
    /// Path to mediagrab.toml
    #[arg(long, default_value = "configs/mediagrab.toml")]
    pub config: PathBuf,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Download one media url into the cache
    Fetch(FetchArgs),
    /// Download a set of image urls, keeping whatever succeeds
    Gallery(GalleryArgs),
    /// Download separate video/audio streams and mux them
    Merge(MergeArgs),
    /// Convert a silent local clip to an optimized gif
    Gif(GifArgs),
    /// Print stream metadata for a local media file
    Probe(ProbeArgs),
    /// Re-encode a local clip to H.264
    Reencode(ReencodeArgs),
}

#[derive(Args, Debug)]
pub struct FetchArgs {
    pub url: String,
    /// Media kind, selects the default file extension
    #[arg(long, value_enum, default_value_t = MediaKind::Raw)]
    pub kind: MediaKind,
    /// Explicit cache file name instead of the derived one
    #[arg(long)]
    pub name: Option<String>,
    /// Extra request header, repeatable ("Name: value")
    #[arg(long = "header")]
    pub headers: Vec<String>,
    /// Known duration in seconds, rejected up front when over the limit
    #[arg(long)]
    pub duration_seconds: Option<f64>,
}

#[derive(Args, Debug)]
pub struct GalleryArgs {
    #[arg(required = true)]
    pub urls: Vec<String>,
    /// Extra request header, repeatable ("Name: value")
    #[arg(long = "header")]
    pub headers: Vec<String>,
}

#[derive(Args, Debug)]
pub struct MergeArgs {
    #[arg(long)]
    pub video_url: String,
    #[arg(long)]
    pub audio_url: String,
    #[arg(long)]
    pub output: PathBuf,
    /// Extra request header, repeatable ("Name: value")
    #[arg(long = "header")]
    pub headers: Vec<String>,
    /// Known duration in seconds, rejected up front when over the limit
    #[arg(long)]
    pub duration_seconds: Option<f64>,
}

#[derive(Args, Debug)]
pub struct GifArgs {
    pub input: PathBuf,
    #[arg(long)]
    pub output: Option<PathBuf>,
    #[arg(long)]
    pub fps: Option<u32>,
    #[arg(long)]
    pub width: Option<u32>,
    /// Skip the lossy recompression pass
    #[arg(long, default_value_t = false)]
    pub no_optimize: bool,
}

#[derive(Args, Debug)]
pub struct ProbeArgs {
    pub input: PathBuf,
}

#[derive(Args, Debug)]
pub struct ReencodeArgs {
    pub input: PathBuf,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Raw,
}

pub fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli.config)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(dispatch(cli.format, cli.command, config))
}

async fn dispatch(format: OutputFormat, command: Commands, config: MediagrabConfig) -> Result<()> {
    match command {
        Commands::Fetch(args) => {
            let downloader = Downloader::new(&config)?;
            if let Some(seconds) = args.duration_seconds {
                downloader.check_duration(seconds)?;
            }
            let mut request = FetchRequest::new(&args.url).with_headers(parse_headers(&args.headers)?);
            if let Some(name) = args.name {
                request = request.with_file_name(name);
            }
            let path = match args.kind {
                MediaKind::Image => downloader.download_image(request).await?,
                MediaKind::Video => downloader.download_video(request).await?,
                MediaKind::Audio => downloader.download_audio(request).await?,
                MediaKind::Raw => downloader.fetch(request).await?,
            };
            render(&PathReport { path }, format)
        }
        Commands::Gallery(args) => {
            let downloader = Downloader::new(&config)?;
            let downloaded = downloader
                .download_images_tolerant(&args.urls, parse_headers(&args.headers)?)
                .await;
            render(
                &GalleryReport {
                    requested: args.urls.len(),
                    downloaded,
                },
                format,
            )
        }
        Commands::Merge(args) => {
            let downloader = Downloader::new(&config)?;
            if let Some(seconds) = args.duration_seconds {
                downloader.check_duration(seconds)?;
            }
            let path = downloader
                .download_av_and_merge(
                    &args.video_url,
                    &args.audio_url,
                    &args.output,
                    parse_headers(&args.headers)?,
                )
                .await?;
            render(&PathReport { path }, format)
        }
        Commands::Gif(args) => {
            let transcoder = Transcoder::new(&config.transcode);
            if transcoder.has_audio_stream(&args.input).await {
                return Err(AppError::AudioPresent);
            }
            let mut options = transcoder.gif_defaults();
            if let Some(fps) = args.fps {
                options.fps = fps;
            }
            if let Some(width) = args.width {
                options.width = width;
            }
            if args.no_optimize {
                options.optimize = false;
            }
            let path = transcoder
                .video_to_gif(&args.input, args.output, options)
                .await?;
            render(&PathReport { path }, format)
        }
        Commands::Probe(args) => {
            let transcoder = Transcoder::new(&config.transcode);
            let probe = transcoder.probe(&args.input).await?;
            render(&ProbeReport { probe }, format)
        }
        Commands::Reencode(args) => {
            let transcoder = Transcoder::new(&config.transcode);
            let path = transcoder.reencode_video(&args.input).await?;
            render(&PathReport { path }, format)
        }
    }
}

fn parse_headers(specs: &[String]) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    for spec in specs {
        let (name, value) = spec
            .split_once(':')
            .ok_or_else(|| AppError::InvalidHeader(spec.clone()))?;
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|_| AppError::InvalidHeader(spec.clone()))?;
        let value = HeaderValue::from_str(value.trim())
            .map_err(|_| AppError::InvalidHeader(spec.clone()))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug, Serialize)]
struct PathReport {
    path: PathBuf,
}

impl DisplayFallback for PathReport {
    fn display(&self) -> String {
        self.path.display().to_string()
    }
}

#[derive(Debug, Serialize)]
struct GalleryReport {
    requested: usize,
    downloaded: Vec<PathBuf>,
}

impl DisplayFallback for GalleryReport {
    fn display(&self) -> String {
        let mut lines = vec![format!(
            "{} of {} downloaded",
            self.downloaded.len(),
            self.requested
        )];
        lines.extend(
            self.downloaded
                .iter()
                .map(|path| path.display().to_string()),
        );
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
struct ProbeReport {
    probe: MediaProbe,
}

impl DisplayFallback for ProbeReport {
    fn display(&self) -> String {
        let geometry = match (self.probe.width, self.probe.height) {
            (Some(width), Some(height)) => format!("{width}x{height}"),
            _ => "unknown".to_string(),
        };
        format!(
            "geometry: {}\nfps: {}\nduration: {}\naudio: {}",
            geometry,
            self.probe
                .fps
                .map(|fps| format!("{fps:.2}"))
                .unwrap_or_else(|| "unknown".to_string()),
            self.probe
                .duration_seconds
                .map(|seconds| format!("{seconds:.1}s"))
                .unwrap_or_else(|| "unknown".to_string()),
            if self.probe.has_audio { "yes" } else { "no" },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn headers_parse_name_value_pairs() {
        let headers =
            parse_headers(&["Referer: https://example.com".to_string()]).unwrap();
        assert_eq!(
            headers.get("referer").and_then(|value| value.to_str().ok()),
            Some("https://example.com")
        );
    }

    #[test]
    fn malformed_headers_are_rejected() {
        assert!(matches!(
            parse_headers(&["no-colon-here".to_string()]),
            Err(AppError::InvalidHeader(_))
        ));
    }
}
