// Content Downloader: fetches manifests and segments over HTTP, optionally through a
// local file cache.

use crate::config::DownloaderConfig;
use crate::error::{GlideError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::Client;
use std::collections::HashMap;
use std::ops::Range;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use tracing::{debug, instrument, trace, warn};
use url::Url;

/// How the caller wants the downloaded content delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Receive {
    /// Written to the cache directory, delivered as a file path.
    Cached,
    /// Delivered in memory.
    Online,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    Cached(PathBuf),
    Online(Bytes),
}

/// Downloader contract consumed by the playlist loaders and the segment scheduler.
///
/// Failures are reported as `None`; they never propagate into the caller's control flow.
#[async_trait]
pub trait ContentDownloader: Send + Sync {
    async fn request(
        &self,
        url: &Url,
        byte_range: Option<Range<u64>>,
        receive: Receive,
    ) -> Option<Content>;

    /// In-memory download of a (sub-range of a) resource.
    async fn fetch_bytes(&self, url: &Url, byte_range: Option<Range<u64>>) -> Option<Bytes> {
        match self.request(url, byte_range, Receive::Online).await? {
            Content::Online(bytes) => Some(bytes),
            Content::Cached(path) => read_cached(&path).await,
        }
    }

    /// Cached download of a text resource such as a manifest.
    async fn fetch_text(&self, url: &Url) -> Option<String> {
        let bytes = match self.request(url, None, Receive::Cached).await? {
            Content::Cached(path) => read_cached(&path).await?,
            Content::Online(bytes) => bytes,
        };

        match String::from_utf8(bytes.to_vec()) {
            Ok(text) => Some(text),
            Err(e) => {
                warn!(url = %url, error = %e, "Content is not valid UTF-8");
                None
            }
        }
    }
}

async fn read_cached(path: &std::path::Path) -> Option<Bytes> {
    match tokio::fs::read(path).await {
        Ok(data) => Some(Bytes::from(data)),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read cached content");
            None
        }
    }
}

/// Installs the process-wide rustls crypto provider once.
pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Another crate got there first.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Create a reqwest Client with the provided configuration
pub fn create_client(config: &DownloaderConfig) -> Result<Client> {
    install_rustls_provider();

    let mut client_builder = Client::builder()
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        .user_agent(&config.user_agent)
        .default_headers(config.headers.clone())
        .redirect(if config.follow_redirects {
            reqwest::redirect::Policy::limited(10)
        } else {
            reqwest::redirect::Policy::none()
        });

    if !config.timeout.is_zero() {
        client_builder = client_builder.timeout(config.timeout);
    }

    if !config.connect_timeout.is_zero() {
        client_builder = client_builder.connect_timeout(config.connect_timeout);
    }

    client_builder.build().map_err(GlideError::from)
}

/// `Range` header value for a half-open byte range, `None` for an empty range.
pub fn range_header(range: &Range<u64>) -> Option<String> {
    if range.end <= range.start {
        return None;
    }
    Some(format!("bytes={}-{}", range.start, range.end - 1))
}

pub struct HttpDownloader {
    http_client: Client,
    config: Arc<DownloaderConfig>,
    /// URL -> number of requests currently running for it
    active_requests: Mutex<HashMap<String, usize>>,
}

/// Keeps the active request count accurate on every exit path.
struct ActiveRequest<'a> {
    owner: &'a HttpDownloader,
    key: String,
}

impl Drop for ActiveRequest<'_> {
    fn drop(&mut self) {
        let mut active = self.owner.active_requests.lock();
        if let Some(count) = active.get_mut(&self.key) {
            *count -= 1;
            if *count == 0 {
                active.remove(&self.key);
            }
        }
    }
}

impl HttpDownloader {
    pub fn new(config: DownloaderConfig) -> Result<Self> {
        let http_client = create_client(&config)?;
        Ok(Self::with_client(http_client, config))
    }

    pub fn with_client(http_client: Client, config: DownloaderConfig) -> Self {
        Self {
            http_client,
            config: Arc::new(config),
            active_requests: Mutex::new(HashMap::new()),
        }
    }

    /// Number of requests currently in flight.
    pub fn active_requests(&self) -> usize {
        self.active_requests.lock().values().sum()
    }

    /// Cache file for a resource: URL path with `:/?=#` replaced, prefixed by the range.
    pub fn cache_path(&self, url: &Url, byte_range: Option<&Range<u64>>) -> PathBuf {
        let prefix = byte_range
            .map(|range| format!("{}_{}_", range.start, range.end))
            .unwrap_or_default();
        let source = format!("{}{}", url.host_str().unwrap_or_default(), url.path());
        let suffix: String = source
            .chars()
            .map(|c| if matches!(c, ':' | '/' | '?' | '=' | '#') { '_' } else { c })
            .collect();
        self.config.cache_dir.join(format!("{prefix}{suffix}"))
    }

    fn track(&self, url: &Url) -> ActiveRequest<'_> {
        let key = url.to_string();
        *self.active_requests.lock().entry(key.clone()).or_default() += 1;
        ActiveRequest { owner: self, key }
    }

    async fn fetch(&self, url: &Url, byte_range: Option<&Range<u64>>) -> Result<Bytes> {
        let _active = self.track(url);

        let mut request_builder = self.http_client.get(url.clone());
        if !self.config.params.is_empty() {
            request_builder = request_builder.query(&self.config.params);
        }
        if let Some(value) = byte_range.and_then(range_header) {
            request_builder = request_builder.header(reqwest::header::RANGE, value);
        }

        let response = request_builder.send().await?;
        if !response.status().is_success() {
            return Err(GlideError::http_status(response.status(), url.as_str()));
        }

        let bytes = response.bytes().await?;
        trace!(url = %url, size = bytes.len(), "Request completed");
        Ok(bytes)
    }

    async fn try_request(
        &self,
        url: &Url,
        byte_range: Option<&Range<u64>>,
        receive: Receive,
    ) -> Result<Content> {
        match receive {
            Receive::Online => Ok(Content::Online(self.fetch(url, byte_range).await?)),
            Receive::Cached => {
                let path = self.cache_path(url, byte_range);
                match self.fetch(url, byte_range).await {
                    Ok(bytes) => {
                        tokio::fs::create_dir_all(&self.config.cache_dir).await?;
                        tokio::fs::write(&path, &bytes).await?;
                        Ok(Content::Cached(path))
                    }
                    Err(e) => {
                        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                            return Err(e);
                        }
                        warn!(url = %url, error = %e, "Download failed, serving cached copy");
                        Ok(Content::Cached(path))
                    }
                }
            }
        }
    }
}

#[async_trait]
impl ContentDownloader for HttpDownloader {
    #[instrument(skip(self, url, byte_range), fields(url = %url))]
    async fn request(
        &self,
        url: &Url,
        byte_range: Option<Range<u64>>,
        receive: Receive,
    ) -> Option<Content> {
        debug!(range = ?byte_range, ?receive, "Download");
        match self.try_request(url, byte_range.as_ref(), receive).await {
            Ok(content) => Some(content),
            Err(e) => {
                warn!(error = %e, "Download failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockDownloader;

    fn downloader(cache_dir: PathBuf) -> HttpDownloader {
        let config = DownloaderConfig {
            cache_dir,
            ..Default::default()
        };
        HttpDownloader::new(config).unwrap()
    }

    #[test]
    fn range_header_is_inclusive() {
        assert_eq!(range_header(&(0..720)).as_deref(), Some("bytes=0-719"));
        assert_eq!(range_header(&(720..1720)).as_deref(), Some("bytes=720-1719"));
        assert_eq!(range_header(&(5..5)), None);
    }

    #[test]
    fn cache_path_sanitizes_url() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = downloader(dir.path().to_path_buf());
        let url = Url::parse("https://cdn.example.com/vod/hi/index.m3u8?token=1").unwrap();

        let plain = downloader.cache_path(&url, None);
        assert_eq!(plain, dir.path().join("cdn.example.com_vod_hi_index.m3u8"));

        let ranged = downloader.cache_path(&url, Some(&(0..720)));
        assert_eq!(
            ranged,
            dir.path().join("0_720_cdn.example.com_vod_hi_index.m3u8")
        );
    }

    #[tokio::test]
    async fn unreachable_host_yields_none() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = downloader(dir.path().to_path_buf());
        let url = Url::parse("http://127.0.0.1:9/missing.ts").unwrap();

        assert!(downloader.request(&url, None, Receive::Online).await.is_none());
        assert_eq!(downloader.active_requests(), 0);
    }

    #[tokio::test]
    async fn cached_copy_is_served_when_network_fails() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = downloader(dir.path().to_path_buf());
        let url = Url::parse("http://127.0.0.1:9/live/index.m3u8").unwrap();
        let path = downloader.cache_path(&url, None);
        std::fs::write(&path, b"#EXTM3U\n").unwrap();

        let content = downloader.request(&url, None, Receive::Cached).await;
        assert_eq!(content, Some(Content::Cached(path)));
        assert_eq!(downloader.fetch_text(&url).await.as_deref(), Some("#EXTM3U\n"));
    }

    #[tokio::test]
    async fn default_helpers_read_through_content() {
        let mock = MockDownloader::new();
        let url = Url::parse("https://a.example/x.m3u8").unwrap();
        mock.insert(&url, None, "#EXTM3U\n#EXTINF:1,\na.ts\n");

        assert_eq!(
            mock.fetch_text(&url).await.as_deref(),
            Some("#EXTM3U\n#EXTINF:1,\na.ts\n")
        );
        assert!(mock.fetch_bytes(&url, Some(0..4)).await.is_none());
    }
}
