use std::io::Read;
use std::path::Path;
use std::time::Duration;

use url::Url;

use super::error::{DownloadError, DownloadResult};

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

const COPY_BUFFER: usize = 1024 * 1024;

/// Alternate transport for hosts that reject the standard client. Fetches
/// synchronously; callers dispatch it to a blocking worker.
pub trait ImpersonatingClient: Send + Sync {
    fn fetch_blocking(&self, url: &str, target: &Path, max_size_mb: u64) -> DownloadResult<u64>;
}

/// Browser-profile agent for hosts with fingerprint-based blocking.
pub struct BrowserAgent {
    agent: ureq::Agent,
}

impl BrowserAgent {
    pub fn new(timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(10))
            .timeout(timeout)
            .redirects(8)
            .build();
        Self { agent }
    }
}

impl ImpersonatingClient for BrowserAgent {
    fn fetch_blocking(&self, url: &str, target: &Path, max_size_mb: u64) -> DownloadResult<u64> {
        let response = self
            .agent
            .get(url)
            .set("User-Agent", BROWSER_USER_AGENT)
            .set("Accept", "*/*")
            .call()
            .map_err(|err| DownloadError::transport(url, err))?;

        if let Some(declared) = response
            .header("Content-Length")
            .and_then(|raw| raw.parse::<u64>().ok())
        {
            if declared > max_size_mb * 1024 * 1024 {
                return Err(DownloadError::SizeLimit {
                    url: url.to_string(),
                    size_mb: declared as f64 / 1024.0 / 1024.0,
                    limit_mb: max_size_mb,
                });
            }
        }

        let mut reader = response.into_reader();
        let mut file =
            std::fs::File::create(target).map_err(|err| DownloadError::io(target, err))?;
        let mut buffer = vec![0u8; COPY_BUFFER];
        let mut written = 0u64;
        loop {
            let read = reader
                .read(&mut buffer)
                .map_err(|err| DownloadError::transport(url, err))?;
            if read == 0 {
                break;
            }
            std::io::Write::write_all(&mut file, &buffer[..read])
                .map_err(|err| DownloadError::io(target, err))?;
            written += read as u64;
        }
        Ok(written)
    }
}

/// Suffix match of the url host against the configured bypass rules.
pub(crate) fn host_matches(url: &str, rules: &[String]) -> bool {
    let Some(host) = Url::parse(url)
        .ok()
        .and_then(|parsed| parsed.host_str().map(str::to_owned))
    else {
        return false;
    };
    rules
        .iter()
        .any(|rule| host == *rule || host.ends_with(&format!(".{rule}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_rules_match_exact_and_subdomains() {
        let rules = vec!["nga.178.com".to_string()];
        assert!(host_matches("https://nga.178.com/a.jpg", &rules));
        assert!(host_matches("https://img.nga.178.com/a.jpg", &rules));
        assert!(!host_matches("https://example.com/nga.178.com", &rules));
        assert!(!host_matches("https://evil-nga.178.com.example.com/x", &rules));
    }

    #[test]
    fn unparseable_urls_never_match() {
        let rules = vec!["nga.178.com".to_string()];
        assert!(!host_matches("not a url", &rules));
    }
}
