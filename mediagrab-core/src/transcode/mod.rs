mod error;

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use which::which;

use crate::config::{GifSection, ReencodeSection, TranscodeSection};
use crate::fsutil::{fmt_size, remove_quietly};

pub use error::{TranscodeError, TranscodeResult};

/// Separately encoded streams owned by the merge that consumes them. Both
/// paths are removed whether or not the merge succeeds.
#[derive(Debug, Clone)]
pub struct MediaPair {
    pub video: PathBuf,
    pub audio: PathBuf,
}

#[derive(Debug, Clone, Copy)]
pub struct GifOptions {
    pub fps: u32,
    pub width: u32,
    pub optimize: bool,
}

impl From<&GifSection> for GifOptions {
    fn from(section: &GifSection) -> Self {
        Self {
            fps: section.fps,
            width: section.width,
            optimize: section.optimize,
        }
    }
}

/// Lossy GIF recompression pass, resolved once at startup.
#[derive(Debug, Clone)]
pub enum GifOptimizer {
    Gifsicle(PathBuf),
    Disabled,
}

impl GifOptimizer {
    pub fn detect() -> Self {
        match which("gifsicle") {
            Ok(path) => GifOptimizer::Gifsicle(path),
            Err(_) => GifOptimizer::Disabled,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MediaProbe {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<f64>,
    pub duration_seconds: Option<f64>,
    pub has_audio: bool,
}

#[derive(Clone)]
pub struct Transcoder {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    optimizer: GifOptimizer,
    gif_defaults: GifSection,
    reencode: ReencodeSection,
    process_timeout: Duration,
}

impl Transcoder {
    pub fn new(config: &TranscodeSection) -> Self {
        Self {
            ffmpeg: PathBuf::from(&config.ffmpeg_path),
            ffprobe: PathBuf::from(&config.ffprobe_path),
            optimizer: GifOptimizer::detect(),
            gif_defaults: config.gif.clone(),
            reencode: config.reencode.clone(),
            process_timeout: Duration::from_secs(config.process_timeout_seconds),
        }
    }

    pub fn with_optimizer(mut self, optimizer: GifOptimizer) -> Self {
        self.optimizer = optimizer;
        self
    }

    pub fn gif_defaults(&self) -> GifOptions {
        GifOptions::from(&self.gif_defaults)
    }

    /// Multiplexes the pair into one container without re-encoding.
    pub async fn merge(&self, pair: MediaPair, output: &Path) -> TranscodeResult<PathBuf> {
        let args: Vec<OsString> = vec![
            "-y".into(),
            "-i".into(),
            pair.video.clone().into_os_string(),
            "-i".into(),
            pair.audio.clone().into_os_string(),
            "-c".into(),
            "copy".into(),
            "-map".into(),
            "0:v:0".into(),
            "-map".into(),
            "1:a:0".into(),
            output.to_path_buf().into_os_string(),
        ];
        self.merge_with_args(pair, output, args).await
    }

    /// Multiplexes the pair with a broad-compatibility H.264/AAC re-encode.
    pub async fn merge_reencode(&self, pair: MediaPair, output: &Path) -> TranscodeResult<PathBuf> {
        let args: Vec<OsString> = vec![
            "-y".into(),
            "-i".into(),
            pair.video.clone().into_os_string(),
            "-i".into(),
            pair.audio.clone().into_os_string(),
            "-c:v".into(),
            self.reencode.codec.clone().into(),
            "-preset".into(),
            self.reencode.preset.clone().into(),
            "-crf".into(),
            self.reencode.crf.to_string().into(),
            "-c:a".into(),
            self.reencode.audio_codec.clone().into(),
            "-b:a".into(),
            self.reencode.audio_bitrate.clone().into(),
            "-map".into(),
            "0:v:0".into(),
            "-map".into(),
            "1:a:0".into(),
            output.to_path_buf().into_os_string(),
        ];
        self.merge_with_args(pair, output, args).await
    }

    async fn merge_with_args(
        &self,
        pair: MediaPair,
        output: &Path,
        args: Vec<OsString>,
    ) -> TranscodeResult<PathBuf> {
        // The mux maps 1:a:0; an input that probes as silent can never
        // satisfy it, so reject before launching the transcoder. Inputs are
        // owned by the attempt and removed either way.
        if let Some(false) = self.audio_stream_presence(&pair.audio).await {
            remove_quietly(&pair.video).await;
            remove_quietly(&pair.audio).await;
            return Err(TranscodeError::MissingAudio { path: pair.audio });
        }
        debug!(
            video = %pair.video.display(),
            audio = %pair.audio.display(),
            output = %output.display(),
            "merging streams"
        );
        let result = self.run_ffmpeg(&args).await;
        remove_quietly(&pair.video).await;
        remove_quietly(&pair.audio).await;
        if let Err(err) = result {
            remove_quietly(output).await;
            return Err(err);
        }
        let size = fs::metadata(output).await.map(|meta| meta.len()).unwrap_or(0);
        info!(output = %output.display(), size = %fmt_size(size), "merged streams");
        Ok(output.to_path_buf())
    }

    /// Two-pass palette conversion of a silent clip to an animated image.
    /// Callers are expected to have checked `has_audio_stream` first.
    pub async fn video_to_gif(
        &self,
        video: &Path,
        output: Option<PathBuf>,
        options: GifOptions,
    ) -> TranscodeResult<PathBuf> {
        let output = output.unwrap_or_else(|| video.with_extension("gif"));
        let stem = video
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "clip".to_string());
        let palette = video.with_file_name(format!("{stem}_palette.png"));
        let filter = format!("fps={},scale={}:-1:flags=lanczos", options.fps, options.width);

        let palette_args: Vec<OsString> = vec![
            "-y".into(),
            "-i".into(),
            video.to_path_buf().into_os_string(),
            "-vf".into(),
            format!("{filter},palettegen").into(),
            palette.clone().into_os_string(),
        ];
        let render_args: Vec<OsString> = vec![
            "-y".into(),
            "-i".into(),
            video.to_path_buf().into_os_string(),
            "-i".into(),
            palette.clone().into_os_string(),
            "-lavfi".into(),
            format!("{filter}[x];[x][1:v]paletteuse").into(),
            output.clone().into_os_string(),
        ];

        let rendered = match self.run_ffmpeg(&palette_args).await {
            Ok(()) => self.run_ffmpeg(&render_args).await,
            Err(err) => Err(err),
        };
        remove_quietly(&palette).await;
        if let Err(err) = rendered {
            remove_quietly(&output).await;
            return Err(err);
        }
        let size = fs::metadata(&output).await.map(|meta| meta.len()).unwrap_or(0);
        info!(output = %output.display(), size = %fmt_size(size), "gif rendered");

        if options.optimize {
            if let Err(err) = self.optimize_gif(&output).await {
                debug!(path = %output.display(), error = %err, "lossy recompression skipped");
            }
        }
        Ok(output)
    }

    async fn optimize_gif(&self, gif: &Path) -> TranscodeResult<()> {
        let GifOptimizer::Gifsicle(binary) = &self.optimizer else {
            debug!(path = %gif.display(), "gifsicle unavailable, keeping unoptimized gif");
            return Ok(());
        };
        let stem = gif
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "out".to_string());
        let scratch = gif.with_file_name(format!("{stem}_opt.gif"));
        let args: Vec<OsString> = vec![
            "-O3".into(),
            "--lossy=30".into(),
            "--colors".into(),
            "256".into(),
            "-o".into(),
            scratch.clone().into_os_string(),
            gif.to_path_buf().into_os_string(),
        ];
        let outcome = self.run_tool(binary, &args).await?;
        if !outcome.status.success() {
            remove_quietly(&scratch).await;
            return Err(TranscodeError::Process {
                tool: tool_name(binary),
                status: outcome.status.code(),
                stderr: String::from_utf8_lossy(&outcome.stderr).trim().to_string(),
            });
        }
        fs::rename(&scratch, gif)
            .await
            .map_err(|err| TranscodeError::io(gif, err))?;
        let size = fs::metadata(gif).await.map(|meta| meta.len()).unwrap_or(0);
        info!(path = %gif.display(), size = %fmt_size(size), "gif recompressed");
        Ok(())
    }

    /// Re-encodes a clip to H.264 next to the source (`<stem>_h264.<ext>`).
    /// Short-circuits when the output already exists; the source is removed
    /// on success.
    pub async fn reencode_video(&self, video: &Path) -> TranscodeResult<PathBuf> {
        let stem = video
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "clip".to_string());
        let suffix = video
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();
        let output = video.with_file_name(format!("{stem}_h264{suffix}"));
        if fs::metadata(&output).await.is_ok() {
            return Ok(output);
        }
        let args: Vec<OsString> = vec![
            "-y".into(),
            "-i".into(),
            video.to_path_buf().into_os_string(),
            "-c:v".into(),
            self.reencode.codec.clone().into(),
            "-preset".into(),
            self.reencode.preset.clone().into(),
            "-crf".into(),
            self.reencode.crf.to_string().into(),
            output.clone().into_os_string(),
        ];
        if let Err(err) = self.run_ffmpeg(&args).await {
            remove_quietly(&output).await;
            return Err(err);
        }
        remove_quietly(video).await;
        let size = fs::metadata(&output).await.map(|meta| meta.len()).unwrap_or(0);
        info!(output = %output.display(), size = %fmt_size(size), "re-encoded to h264");
        Ok(output)
    }

    /// Quick audio presence check. Probe failures count as "no audio" so a
    /// broken ffprobe install degrades to skipping the gif path.
    pub async fn has_audio_stream(&self, video: &Path) -> bool {
        self.audio_stream_presence(video).await.unwrap_or(false)
    }

    /// None when the probe itself cannot run; the merge pre-check then lets
    /// the transcoder attempt the mux and surface any mapping error.
    async fn audio_stream_presence(&self, path: &Path) -> Option<bool> {
        let args: Vec<OsString> = vec![
            "-v".into(),
            "error".into(),
            "-select_streams".into(),
            "a".into(),
            "-show_entries".into(),
            "stream=codec_type".into(),
            "-of".into(),
            "csv=p=0".into(),
            path.to_path_buf().into_os_string(),
        ];
        match self.run_tool(&self.ffprobe, &args).await {
            Ok(outcome) if outcome.status.success() => {
                Some(!String::from_utf8_lossy(&outcome.stdout).trim().is_empty())
            }
            Ok(outcome) => {
                let stderr = String::from_utf8_lossy(&outcome.stderr);
                warn!(path = %path.display(), stderr = %stderr.trim(), "audio probe failed");
                None
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "audio probe failed");
                None
            }
        }
    }

    /// Full stream metadata for a local media file.
    pub async fn probe(&self, path: &Path) -> TranscodeResult<MediaProbe> {
        let args: Vec<OsString> = vec![
            "-v".into(),
            "quiet".into(),
            "-print_format".into(),
            "json".into(),
            "-show_streams".into(),
            "-show_format".into(),
            path.to_path_buf().into_os_string(),
        ];
        let outcome = self.run_tool(&self.ffprobe, &args).await?;
        if !outcome.status.success() {
            return Err(TranscodeError::Process {
                tool: tool_name(&self.ffprobe),
                status: outcome.status.code(),
                stderr: String::from_utf8_lossy(&outcome.stderr).trim().to_string(),
            });
        }
        let parsed: FfprobeOutput =
            serde_json::from_slice(&outcome.stdout).map_err(|_| TranscodeError::InvalidMedia {
                path: path.to_path_buf(),
            })?;
        if parsed.streams.is_empty() {
            return Err(TranscodeError::InvalidMedia {
                path: path.to_path_buf(),
            });
        }
        let video = parsed
            .streams
            .iter()
            .find(|stream| stream.codec_type.as_deref() == Some("video"));
        let has_audio = parsed
            .streams
            .iter()
            .any(|stream| stream.codec_type.as_deref() == Some("audio"));
        let fps = video.and_then(|stream| {
            parse_rate(stream.avg_frame_rate.as_deref())
                .or_else(|| parse_rate(stream.r_frame_rate.as_deref()))
        });
        Ok(MediaProbe {
            width: video.and_then(|stream| stream.width),
            height: video.and_then(|stream| stream.height),
            fps,
            duration_seconds: parsed
                .format
                .and_then(|format| format.duration)
                .and_then(|raw| raw.parse::<f64>().ok()),
            has_audio,
        })
    }

    async fn run_ffmpeg(&self, args: &[OsString]) -> TranscodeResult<()> {
        let outcome = self.run_tool(&self.ffmpeg, args).await?;
        if !outcome.status.success() {
            return Err(TranscodeError::Process {
                tool: tool_name(&self.ffmpeg),
                status: outcome.status.code(),
                stderr: String::from_utf8_lossy(&outcome.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    async fn run_tool(
        &self,
        tool: &Path,
        args: &[OsString],
    ) -> TranscodeResult<std::process::Output> {
        let mut command = Command::new(tool);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        match timeout(self.process_timeout, command.output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(err)) => Err(TranscodeError::Launch {
                tool: tool_name(tool),
                message: err.to_string(),
            }),
            Err(_) => Err(TranscodeError::Timeout {
                tool: tool_name(tool),
                timeout: self.process_timeout,
            }),
        }
    }
}

fn tool_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

fn parse_rate(raw: Option<&str>) -> Option<f64> {
    let raw = raw?;
    let (numerator, denominator) = raw.split_once('/')?;
    let numerator = numerator.parse::<f64>().ok()?;
    let denominator = denominator.parse::<f64>().ok()?;
    if denominator == 0.0 || numerator == 0.0 {
        return None;
    }
    Some(numerator / denominator)
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fractional_rates() {
        assert_eq!(parse_rate(Some("15/1")), Some(15.0));
        let ntsc = parse_rate(Some("30000/1001")).unwrap();
        assert!((ntsc - 29.97).abs() < 0.01);
        assert_eq!(parse_rate(Some("0/0")), None);
        assert_eq!(parse_rate(Some("nonsense")), None);
        assert_eq!(parse_rate(None), None);
    }

    #[test]
    fn probe_output_reads_streams_and_format() {
        let raw = r#"{
            "streams": [
                {"codec_type": "video", "width": 640, "height": 360, "avg_frame_rate": "24/1", "r_frame_rate": "24/1"},
                {"codec_type": "audio"}
            ],
            "format": {"duration": "3.000000"}
        }"#;
        let parsed: FfprobeOutput = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.streams.len(), 2);
        assert_eq!(parsed.streams[0].width, Some(640));
        assert_eq!(
            parsed.format.and_then(|format| format.duration).as_deref(),
            Some("3.000000")
        );
    }
}
