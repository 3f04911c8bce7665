use std::path::PathBuf;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};

use crate::error::{GlideError, Result};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/142.0.0.0 Safari/537.36";

/// Configurable options for the content downloader
#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    /// Overall timeout for a single request, zero disables it
    pub timeout: Duration,

    /// Connection timeout (time to establish initial connection)
    pub connect_timeout: Duration,

    /// Whether to follow redirects
    pub follow_redirects: bool,

    /// User agent string
    pub user_agent: String,

    /// Custom HTTP headers for requests
    pub headers: HeaderMap,

    /// Custom query parameters appended to every request
    pub params: Vec<(String, String)>,

    /// Directory holding cached downloads (manifests)
    pub cache_dir: PathBuf,

    /// Maximum idle connections to keep per host
    pub pool_max_idle_per_host: usize,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(0),
            connect_timeout: Duration::from_secs(30),
            follow_redirects: true,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: DownloaderConfig::get_default_headers(),
            params: Vec::new(),
            cache_dir: std::env::temp_dir().join("remote_content"),
            pool_max_idle_per_host: 10,
        }
    }
}

impl DownloaderConfig {
    pub fn get_default_headers() -> HeaderMap {
        let mut default_headers = HeaderMap::new();

        default_headers.insert(
            reqwest::header::ACCEPT_ENCODING,
            HeaderValue::from_static("gzip, deflate"),
        );

        default_headers.insert(
            reqwest::header::CONNECTION,
            HeaderValue::from_static("keep-alive"),
        );

        default_headers.insert(
            reqwest::header::ACCEPT,
            HeaderValue::from_static("*/*"),
        );
        default_headers
    }
}

/// Segment scheduler tuning
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Length of the prefetch window ahead of the playback position
    pub warm_duration: Duration,
    /// Maximum number of simultaneous downloads
    pub download_concurrency: usize,
    /// Cached segments further than `factor * window` below a new window are evicted
    pub purge_distance_factor: usize,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            warm_duration: Duration::from_secs(10),
            download_concurrency: 3,
            purge_distance_factor: 2,
        }
    }
}

/// Presentation side tuning
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// Delivery tick period (200ms = 5Hz)
    pub tick_interval: Duration,
    /// Codec families a variant must carry to be selectable; empty accepts everything
    pub supported_codecs: Vec<String>,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(200),
            supported_codecs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GlideConfig {
    pub downloader: DownloaderConfig,
    pub provider: ProviderConfig,
    pub playback: PlaybackConfig,
}

impl GlideConfig {
    pub fn validate(&self) -> Result<()> {
        if self.provider.download_concurrency == 0 {
            return Err(GlideError::configuration(
                "download concurrency must be at least 1",
            ));
        }
        if self.provider.warm_duration.is_zero() {
            return Err(GlideError::configuration("warm duration must be positive"));
        }
        if self.playback.tick_interval.is_zero() {
            return Err(GlideError::configuration("tick interval must be positive"));
        }
        Ok(())
    }
}
