// Playlist loaders: download, parse and hold master/media manifests.

use crate::downloader::ContentDownloader;
use futures::future::join_all;
use hls::{MediaPlaylistInfo, Segment, Stream, is_media_playlist, parse_master, parse_media};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

/// One media playlist, resolved lazily.
pub struct MediaPlaylist {
    quality: u32,
    url: Url,
    downloader: Arc<dyn ContentDownloader>,
    info: RwLock<Option<Arc<MediaPlaylistInfo>>>,
}

impl MediaPlaylist {
    pub fn new(quality: u32, url: Url, downloader: Arc<dyn ContentDownloader>) -> Self {
        Self {
            quality,
            url,
            downloader,
            info: RwLock::new(None),
        }
    }

    pub fn quality(&self) -> u32 {
        self.quality
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Last successfully parsed info.
    pub fn info(&self) -> Option<Arc<MediaPlaylistInfo>> {
        self.info.read().clone()
    }

    /// Downloads and parses the playlist, replacing the stored info on success.
    ///
    /// A failed refresh keeps the previously parsed info.
    pub async fn prefetch_info(&self) -> Option<Arc<MediaPlaylistInfo>> {
        let Some(content) = self.downloader.fetch_text(&self.url).await else {
            warn!(url = %self.url, "Media playlist unavailable");
            return self.info();
        };

        let Some(parsed) = parse_media(self.quality, &content, &self.url) else {
            warn!(url = %self.url, "Content is not a media playlist");
            return self.info();
        };

        let parsed = Arc::new(parsed);
        *self.info.write() = Some(parsed.clone());
        Some(parsed)
    }

    /// Segments starting at or after `since`; empty until the info is resolved.
    pub fn request_segments(&self, since: f64) -> Vec<Segment> {
        self.info()
            .map(|info| info.segments_since(since))
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for MediaPlaylist {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaPlaylist")
            .field("quality", &self.quality)
            .field("url", &self.url.as_str())
            .field("resolved", &self.info.read().is_some())
            .finish()
    }
}

#[derive(Default)]
struct Variants {
    streams: Vec<Stream>,
    children: Vec<Arc<MediaPlaylist>>,
    active: Option<Arc<MediaPlaylist>>,
}

/// Entry manifest of a presentation.
///
/// Media-shaped content is wrapped as a single child at quality 0, otherwise every
/// declared stream becomes a child keyed by its pixel height.
pub struct MasterPlaylist {
    url: Url,
    supported_codecs: Vec<String>,
    downloader: Arc<dyn ContentDownloader>,
    variants: RwLock<Variants>,
}

impl MasterPlaylist {
    pub fn new(
        url: Url,
        supported_codecs: Vec<String>,
        downloader: Arc<dyn ContentDownloader>,
    ) -> Self {
        Self {
            url,
            supported_codecs,
            downloader,
            variants: RwLock::new(Variants::default()),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    fn is_supported(&self, stream: &Stream) -> bool {
        if self.supported_codecs.is_empty() || stream.codecs.is_empty() {
            return true;
        }
        let families = stream.codec_families();
        self.supported_codecs
            .iter()
            .all(|codec| families.contains(&codec.as_str()))
    }

    /// Existing child for `quality` at `url`, or a new unresolved one.
    fn child(
        &self,
        existing: &[Arc<MediaPlaylist>],
        quality: u32,
        url: &Url,
    ) -> Arc<MediaPlaylist> {
        existing
            .iter()
            .find(|child| child.quality() == quality && child.url() == url)
            .cloned()
            .unwrap_or_else(|| {
                Arc::new(MediaPlaylist::new(quality, url.clone(), self.downloader.clone()))
            })
    }

    fn children_of(
        &self,
        content: &str,
        existing: &[Arc<MediaPlaylist>],
    ) -> (Vec<Stream>, Vec<Arc<MediaPlaylist>>) {
        if is_media_playlist(content) {
            return (Vec::new(), vec![self.child(existing, 0, &self.url)]);
        }

        let master = parse_master(content, &self.url);
        let streams: Vec<Stream> = master
            .streams
            .into_iter()
            .filter(|stream| {
                let supported = self.is_supported(stream);
                if !supported {
                    debug!(codecs = %stream.codecs, url = %stream.url, "Skipping unsupported stream");
                }
                supported
            })
            .collect();

        let children = streams
            .iter()
            .map(|stream| self.child(existing, stream.quality(), &stream.url))
            .collect();
        (streams, children)
    }

    /// Child matching the active quality, or the first (lowest quality) one.
    fn pick_active(&self, children: &[Arc<MediaPlaylist>]) -> Option<Arc<MediaPlaylist>> {
        let previous = self.variants.read().active.as_ref().map(|active| active.quality());
        previous
            .and_then(|quality| children.iter().find(|child| child.quality() == quality))
            .or(children.first())
            .cloned()
    }

    /// Downloads the master and resolves its children: the active child first, then all
    /// others. Returns the active child's info.
    ///
    /// Children whose URL and quality are unchanged are kept, so a failed refresh of one
    /// keeps its previous info. The new set replaces the old one once resolved. The
    /// active child keeps its quality across refreshes when still declared, otherwise the
    /// first (lowest quality) child becomes active.
    pub async fn prefetch_info(&self) -> Option<Arc<MediaPlaylistInfo>> {
        let Some(content) = self.downloader.fetch_text(&self.url).await else {
            warn!(url = %self.url, "Master playlist unavailable");
            return self.info();
        };

        let existing = self.variants.read().children.clone();
        let (streams, children) = self.children_of(&content, &existing);
        let Some(active) = self.pick_active(&children) else {
            warn!(url = %self.url, "Master playlist declares no usable streams");
            return self.info();
        };

        info!(
            url = %self.url,
            children = children.len(),
            quality = active.quality(),
            "Resolving master playlist"
        );

        active.prefetch_info().await;
        join_all(
            children
                .iter()
                .filter(|child| !Arc::ptr_eq(child, &active))
                .map(|child| child.prefetch_info()),
        )
        .await;

        // Re-picked under the lock so a quality switch made meanwhile is kept.
        let mut variants = self.variants.write();
        let previous = variants.active.as_ref().map(|active| active.quality());
        let active = previous
            .and_then(|quality| children.iter().find(|child| child.quality() == quality))
            .unwrap_or(&active)
            .clone();
        variants.streams = streams;
        variants.children = children;
        variants.active = Some(active.clone());
        drop(variants);

        active.info()
    }

    /// Info of the active child.
    pub fn info(&self) -> Option<Arc<MediaPlaylistInfo>> {
        self.variants.read().active.as_ref().and_then(|active| active.info())
    }

    /// Infos of every child resolved so far, lowest quality first.
    pub fn available_media_playlists(&self) -> Vec<Arc<MediaPlaylistInfo>> {
        self.variants
            .read()
            .children
            .iter()
            .filter_map(|child| child.info())
            .collect()
    }

    /// Streams declared by the last parsed master, empty for a media-shaped manifest.
    pub fn streams(&self) -> Vec<Stream> {
        self.variants.read().streams.clone()
    }

    /// Makes the child with `quality` active so later refreshes follow it.
    pub fn set_active(&self, quality: u32) -> bool {
        let mut variants = self.variants.write();
        let Some(child) = variants
            .children
            .iter()
            .find(|child| child.quality() == quality)
            .cloned()
        else {
            return false;
        };
        variants.active = Some(child);
        true
    }

    pub fn request_segments(&self, since: f64) -> Vec<Segment> {
        self.variants
            .read()
            .active
            .as_ref()
            .map(|active| active.request_segments(since))
            .unwrap_or_default()
    }
}
