mod error;
mod singleflight;
mod transport;
mod types;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use reqwest::Client;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, trace, warn};

use crate::config::{DownloadSection, MediagrabConfig};
use crate::fsutil::{fmt_size, remove_quietly};
use crate::transcode::{MediaPair, Transcoder};

pub use error::{DownloadError, DownloadResult};
pub use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
pub use singleflight::SingleFlight;
pub use transport::{BrowserAgent, ImpersonatingClient};
pub use types::{derive_file_name, FetchRequest};

/// Fetches remote media into a flat cache directory, deduplicating
/// concurrent requests per target path and handing merge work to the
/// transcoder. Construct one per process and share it by reference.
pub struct Downloader {
    cache_dir: PathBuf,
    limits: DownloadSection,
    client: Client,
    fallback: Option<Arc<dyn ImpersonatingClient>>,
    inflight: SingleFlight<PathBuf>,
    transcoder: Transcoder,
}

impl Downloader {
    pub fn new(config: &MediagrabConfig) -> DownloadResult<Self> {
        let cache_dir = PathBuf::from(&config.paths.cache_dir);
        std::fs::create_dir_all(&cache_dir).map_err(|err| DownloadError::io(&cache_dir, err))?;
        let client = Client::builder()
            .user_agent(&config.download.user_agent)
            .timeout(Duration::from_secs(config.download.timeout_seconds))
            .build()
            .map_err(|err| DownloadError::Client(err.to_string()))?;
        let fallback: Option<Arc<dyn ImpersonatingClient>> =
            if config.download.impersonate_hosts.is_empty() {
                None
            } else {
                Some(Arc::new(BrowserAgent::new(Duration::from_secs(
                    config.download.timeout_seconds,
                ))))
            };
        Ok(Self {
            cache_dir,
            limits: config.download.clone(),
            client,
            fallback,
            inflight: SingleFlight::new(),
            transcoder: Transcoder::new(&config.transcode),
        })
    }

    pub fn with_impersonating_client(mut self, client: Arc<dyn ImpersonatingClient>) -> Self {
        self.fallback = Some(client);
        self
    }

    pub fn transcoder(&self) -> &Transcoder {
        &self.transcoder
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Pre-flight duration gate: callers that already know a clip's length
    /// from out-of-band metadata reject it here before any transfer starts.
    pub fn check_duration(&self, seconds: f64) -> DownloadResult<()> {
        let limit = self.limits.max_duration_seconds;
        if limit > 0 && seconds > limit as f64 {
            return Err(DownloadError::DurationLimit {
                seconds,
                limit_seconds: limit,
            });
        }
        Ok(())
    }

    pub async fn fetch(&self, request: FetchRequest) -> DownloadResult<PathBuf> {
        self.fetch_with_default(request, "").await
    }

    pub async fn download_image(&self, request: FetchRequest) -> DownloadResult<PathBuf> {
        self.fetch_with_default(request, ".jpg").await
    }

    pub async fn download_video(&self, request: FetchRequest) -> DownloadResult<PathBuf> {
        self.fetch_with_default(request, ".mp4").await
    }

    pub async fn download_audio(&self, request: FetchRequest) -> DownloadResult<PathBuf> {
        self.fetch_with_default(request, ".mp3").await
    }

    /// Gallery helper: fan the urls out concurrently and keep whatever
    /// succeeds. One broken link never aborts the batch.
    pub async fn download_images_tolerant(
        &self,
        urls: &[String],
        headers: HeaderMap,
    ) -> Vec<PathBuf> {
        let tasks = urls
            .iter()
            .map(|url| self.download_image(FetchRequest::new(url).with_headers(headers.clone())));
        let outcomes = futures::future::join_all(tasks).await;
        outcomes
            .into_iter()
            .zip(urls)
            .filter_map(|(outcome, url)| match outcome {
                Ok(path) => Some(path),
                Err(err) => {
                    warn!(url = %url, error = %err, "dropping failed gallery image");
                    None
                }
            })
            .collect()
    }

    /// Fetches separately encoded video and audio streams concurrently and
    /// muxes them into `output`. Both intermediates are gone afterwards.
    pub async fn download_av_and_merge(
        &self,
        video_url: &str,
        audio_url: &str,
        output: &Path,
        headers: HeaderMap,
    ) -> DownloadResult<PathBuf> {
        let (video, audio) = tokio::join!(
            self.download_video(FetchRequest::new(video_url).with_headers(headers.clone())),
            self.download_audio(FetchRequest::new(audio_url).with_headers(headers)),
        );
        let pair = MediaPair {
            video: video?,
            audio: audio?,
        };
        let merged = self.transcoder.merge(pair, output).await?;
        Ok(merged)
    }

    async fn fetch_with_default(
        &self,
        request: FetchRequest,
        default_ext: &str,
    ) -> DownloadResult<PathBuf> {
        let file_name = match &request.file_name {
            Some(name) => name.clone(),
            None => derive_file_name(&request.url, default_ext),
        };
        let target = self.cache_dir.join(&file_name);
        let key = target.to_string_lossy().into_owned();
        let job = FetchJob {
            client: self.client.clone(),
            fallback: self.fallback.clone(),
            limits: self.limits.clone(),
            url: request.url,
            headers: request.headers,
            target,
        };
        self.inflight.run(&key, move || job.run()).await
    }
}

struct FetchJob {
    client: Client,
    fallback: Option<Arc<dyn ImpersonatingClient>>,
    limits: DownloadSection,
    url: String,
    headers: HeaderMap,
    target: PathBuf,
}

impl FetchJob {
    async fn run(self) -> DownloadResult<PathBuf> {
        if let Ok(meta) = fs::metadata(&self.target).await {
            if meta.len() > 0 {
                debug!(path = %self.target.display(), "cache hit");
                return Ok(self.target);
            }
            warn!(path = %self.target.display(), "removing empty cached file");
            remove_quietly(&self.target).await;
        }

        if let Some(client) = self.matching_fallback() {
            match self.fetch_impersonating(client).await {
                Ok(written) if written > 0 => {
                    info!(
                        url = %self.url,
                        path = %self.target.display(),
                        size = %fmt_size(written),
                        "download complete (impersonating)"
                    );
                    return Ok(self.target);
                }
                Ok(_) => {
                    remove_quietly(&self.target).await;
                    warn!(url = %self.url, "impersonating transport returned no data, falling back");
                }
                Err(err @ DownloadError::SizeLimit { .. }) => {
                    // Policy rejection, not a transport fault: do not retry
                    // over the default client.
                    remove_quietly(&self.target).await;
                    return Err(err);
                }
                Err(err) => {
                    remove_quietly(&self.target).await;
                    warn!(url = %self.url, error = %err, "impersonating transport failed, falling back");
                }
            }
        }

        match self.stream_to_disk().await {
            Ok(0) => {
                remove_quietly(&self.target).await;
                warn!(url = %self.url, "server sent an empty body, retrying once");
                match self.stream_to_disk().await {
                    Ok(0) => {
                        remove_quietly(&self.target).await;
                        Err(DownloadError::ZeroByte {
                            path: self.target.clone(),
                        })
                    }
                    Ok(written) => {
                        self.log_complete(written);
                        Ok(self.target)
                    }
                    Err(err) => {
                        remove_quietly(&self.target).await;
                        Err(err)
                    }
                }
            }
            Ok(written) => {
                self.log_complete(written);
                Ok(self.target)
            }
            Err(err) => {
                remove_quietly(&self.target).await;
                Err(err)
            }
        }
    }

    fn matching_fallback(&self) -> Option<Arc<dyn ImpersonatingClient>> {
        self.fallback
            .as_ref()
            .filter(|_| transport::host_matches(&self.url, &self.limits.impersonate_hosts))
            .map(Arc::clone)
    }

    async fn fetch_impersonating(
        &self,
        client: Arc<dyn ImpersonatingClient>,
    ) -> DownloadResult<u64> {
        debug!(url = %self.url, "using impersonating transport");
        let url = self.url.clone();
        let target = self.target.clone();
        let limit = self.limits.max_size_mb;
        tokio::task::spawn_blocking(move || client.fetch_blocking(&url, &target, limit))
            .await
            .map_err(|err| DownloadError::transport(&self.url, err))?
    }

    async fn stream_to_disk(&self) -> DownloadResult<u64> {
        let response = self
            .client
            .get(&self.url)
            .headers(self.headers.clone())
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|err| DownloadError::transport(&self.url, err))?;

        let limit_bytes = self.limits.max_size_mb * 1024 * 1024;
        if let Some(declared) = response.content_length() {
            if declared > limit_bytes {
                return Err(DownloadError::SizeLimit {
                    url: self.url.clone(),
                    size_mb: declared as f64 / 1024.0 / 1024.0,
                    limit_mb: self.limits.max_size_mb,
                });
            }
        }

        let mut stream = response.bytes_stream();
        let mut file = fs::File::create(&self.target)
            .await
            .map_err(|err| DownloadError::io(&self.target, err))?;
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let data = chunk.map_err(|err| DownloadError::transport(&self.url, err))?;
            file.write_all(&data)
                .await
                .map_err(|err| DownloadError::io(&self.target, err))?;
            written += data.len() as u64;
            trace!(url = %self.url, bytes = written, "download progress");
            if self.limits.enforce_stream_size && written > limit_bytes {
                return Err(DownloadError::SizeLimit {
                    url: self.url.clone(),
                    size_mb: written as f64 / 1024.0 / 1024.0,
                    limit_mb: self.limits.max_size_mb,
                });
            }
        }
        file.flush()
            .await
            .map_err(|err| DownloadError::io(&self.target, err))?;
        Ok(written)
    }

    fn log_complete(&self, written: u64) {
        info!(
            url = %self.url,
            path = %self.target.display(),
            size = %fmt_size(written),
            "download complete"
        );
    }
}
