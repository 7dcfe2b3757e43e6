use std::path::Path;

use reqwest::header::HeaderMap;
use sha2::{Digest, Sha256};
use url::Url;

/// One remote asset to place in the local cache.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub file_name: Option<String>,
    pub headers: HeaderMap,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            file_name: None,
            headers: HeaderMap::new(),
        }
    }

    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }
}

/// Stable cache filename for a url: 16 hex chars of its sha256 digest plus
/// the extension carried by the url path, falling back to `default_ext`
/// (dot included, may be empty).
pub fn derive_file_name(url: &str, default_ext: &str) -> String {
    let ext = Url::parse(url)
        .ok()
        .and_then(|parsed| {
            Path::new(parsed.path())
                .extension()
                .map(|ext| format!(".{}", ext.to_string_lossy()))
        })
        .unwrap_or_else(|| default_ext.to_string());
    let digest = hex::encode(Sha256::digest(url.as_bytes()));
    format!("{}{}", &digest[..16], ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_url_derives_same_name() {
        let a = derive_file_name("https://example.com/a/b/photo.jpg", ".bin");
        let b = derive_file_name("https://example.com/a/b/photo.jpg", ".bin");
        assert_eq!(a, b);
        assert!(a.ends_with(".jpg"));
        assert_eq!(a.len(), 16 + ".jpg".len());
    }

    #[test]
    fn distinct_urls_derive_distinct_names() {
        let a = derive_file_name("https://example.com/one.png", "");
        let b = derive_file_name("https://example.com/two.png", "");
        assert_ne!(a, b);
    }

    #[test]
    fn query_string_does_not_leak_into_extension() {
        let name = derive_file_name("https://example.com/clip.mp4?sig=abc.def", ".bin");
        assert!(name.ends_with(".mp4"));
    }

    #[test]
    fn default_extension_used_when_path_has_none() {
        let name = derive_file_name("https://example.com/media/12345", ".mp3");
        assert!(name.ends_with(".mp3"));
    }
}
