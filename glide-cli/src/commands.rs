use crate::error::{AppError, Result};
use glide_engine::{
    BatchId, ContentDownloader, GlideConfig, HttpDownloader, MasterPlaylist, MediaProvider,
    SegmentBatch,
};
use hls::MediaPlaylistInfo;
use std::sync::Arc;
use tracing::info;
use url::Url;

pub struct CommandExecutor {
    config: GlideConfig,
    downloader: Arc<dyn ContentDownloader>,
}

impl CommandExecutor {
    pub fn new(config: GlideConfig) -> Result<Self> {
        config.validate()?;
        let downloader: Arc<dyn ContentDownloader> =
            Arc::new(HttpDownloader::new(config.downloader.clone())?);
        Ok(Self { config, downloader })
    }

    async fn resolve(&self, url: &str) -> Result<(Arc<MasterPlaylist>, Arc<MediaPlaylistInfo>)> {
        let url = Url::parse(url).map_err(|e| AppError::InvalidInput(format!("{url}: {e}")))?;
        let master = Arc::new(MasterPlaylist::new(
            url.clone(),
            self.config.playback.supported_codecs.clone(),
            self.downloader.clone(),
        ));
        let info = master
            .prefetch_info()
            .await
            .ok_or_else(|| AppError::Unavailable(format!("no playable media playlist at {url}")))?;
        Ok((master, info))
    }

    pub async fn probe(&self, url: &str) -> Result<()> {
        let (master, active) = self.resolve(url).await?;

        let streams = master.streams();
        if streams.is_empty() {
            println!("Media playlist (no variants)");
        }
        for stream in &streams {
            println!(
                "stream {:>5}p  {:>9} bps  {}x{}  [{}]  {}",
                stream.quality(),
                stream.bandwidth,
                stream.pixel_width,
                stream.pixel_height,
                stream.codecs,
                stream.url
            );
        }

        let qualities: Vec<_> = master
            .available_media_playlists()
            .iter()
            .map(|info| info.quality)
            .collect();
        println!("Available qualities: {qualities:?}");
        print_timeline(&active);
        Ok(())
    }

    pub async fn prefetch(&self, url: &str, at: f64, quality: Option<u32>) -> Result<()> {
        let (master, active) = self.resolve(url).await?;
        let info = select_quality(&master.available_media_playlists(), quality.unwrap_or(0))
            .unwrap_or(active);
        print_timeline(&info);

        let mut provider = MediaProvider::new(self.config.provider.clone(), self.downloader.clone());
        let mut batches = provider.subscribe();
        provider.bind_playlist(info);

        let batch_id = BatchId::next();
        let until = provider.reset_to(at, batch_id);
        info!(at, until, batch_id = %batch_id, "Prefetching window");

        let batch = batches
            .recv()
            .await
            .ok_or_else(|| AppError::Unavailable("scheduler stopped before delivering".into()))?;
        print_batch(&batch);
        provider.discard_all();
        Ok(())
    }
}

/// Highest playlist not above `quality`, or the lowest one.
fn select_quality(
    playlists: &[Arc<MediaPlaylistInfo>],
    quality: u32,
) -> Option<Arc<MediaPlaylistInfo>> {
    playlists
        .iter()
        .filter(|info| info.quality <= quality)
        .max_by_key(|info| info.quality)
        .or_else(|| playlists.iter().min_by_key(|info| info.quality))
        .cloned()
}

fn print_timeline(info: &MediaPlaylistInfo) {
    println!(
        "Playlist {}p: {} segments, {:.3}s total",
        info.quality,
        info.segments.len(),
        info.total_duration()
    );
    match &info.initialization_segment {
        Some(init) => match &init.byte_range {
            Some(range) => println!("Init segment: {} [{}..{})", init.url, range.start, range.end),
            None => println!("Init segment: {}", init.url),
        },
        None => println!("Init segment: none"),
    }
}

fn print_batch(batch: &SegmentBatch) {
    println!(
        "Batch {} (fresh: {}): init {} bytes, {} segments",
        batch.batch_id,
        batch.fresh,
        batch.init.as_ref().map_or(0, |init| init.len()),
        batch.segments.len()
    );
    for payload in &batch.segments {
        println!(
            "  #{:<5} {:>9.3}s - {:>9.3}s  {:>9} bytes",
            payload.index,
            payload.segment.since,
            payload.segment.until,
            payload.data.len()
        );
    }
}
