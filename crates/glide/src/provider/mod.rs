// Segment Scheduler: turns timeline requests into bounded, cancellable batches of
// segment downloads over one media playlist.

mod fetch;
pub mod window;

use crate::codec::BatchId;
use crate::config::ProviderConfig;
use crate::downloader::ContentDownloader;
use bytes::Bytes;
use fetch::{FetchContext, InitFetch, no_init};
use futures::future::join_all;
use hls::{MediaPlaylistInfo, Segment};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};
use window::{WindowSearch, locate, purge_level};

/// Downloaded bytes of one segment of a batch.
#[derive(Debug, Clone)]
pub struct SegmentPayload {
    pub index: usize,
    pub segment: Segment,
    pub data: Bytes,
}

/// Everything one window produced, delivered once all of its downloads settled.
///
/// Segments whose download failed are omitted; the rest are in index order.
#[derive(Debug, Clone)]
pub struct SegmentBatch {
    pub batch_id: BatchId,
    /// Set for the first batch after a seek or a rebind.
    pub fresh: bool,
    pub init: Option<Bytes>,
    pub segments: Vec<SegmentPayload>,
}

/// Mutable state shared with the download tasks.
///
/// Cancellation of a window token happens under this lock, and completions check
/// their token under it, so a cancelled window never writes the cache.
#[derive(Default)]
pub(crate) struct State {
    cache: BTreeMap<usize, Bytes>,
    requesting: Option<Range<usize>>,
    window_token: Option<CancellationToken>,
    subscriber: Option<mpsc::UnboundedSender<SegmentBatch>>,
}

impl State {
    fn cancel_window(&mut self) {
        if let Some(token) = self.window_token.take() {
            token.cancel();
        }
        self.requesting = None;
    }
}

pub struct MediaProvider {
    config: ProviderConfig,
    ctx: FetchContext,
    playlist: Option<Arc<MediaPlaylistInfo>>,
    /// Parent of every window token; replaced on each bind.
    binding: CancellationToken,
    init: InitFetch,
    pending_fresh: bool,
}

impl MediaProvider {
    pub fn new(config: ProviderConfig, downloader: Arc<dyn ContentDownloader>) -> Self {
        let permits = Arc::new(Semaphore::new(config.download_concurrency.max(1)));
        Self {
            config,
            ctx: FetchContext {
                downloader,
                permits,
                shared: Arc::new(Mutex::new(State::default())),
            },
            playlist: None,
            binding: CancellationToken::new(),
            init: no_init(),
            pending_fresh: false,
        }
    }

    /// Registers the single batch consumer, replacing any previous one.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<SegmentBatch> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.ctx.shared.lock().subscriber = Some(tx);
        rx
    }

    pub fn playlist(&self) -> Option<&Arc<MediaPlaylistInfo>> {
        self.playlist.as_ref()
    }

    pub fn current_quality(&self) -> Option<u32> {
        self.playlist.as_ref().map(|info| info.quality)
    }

    /// Whether a window is waiting for its downloads.
    pub fn is_requesting(&self) -> bool {
        self.ctx.shared.lock().requesting.is_some()
    }

    pub fn cached_indices(&self) -> Vec<usize> {
        self.ctx.shared.lock().cache.keys().copied().collect()
    }

    fn warm(&self) -> f64 {
        self.config.warm_duration.as_secs_f64()
    }

    /// Cancels all work of the current binding and starts a new one.
    fn reset_binding(&mut self) {
        let mut state = self.ctx.shared.lock();
        self.binding.cancel();
        self.binding = CancellationToken::new();
        state.cancel_window();
        state.cache.clear();
    }

    /// Replaces the active playlist and restarts the initialization download.
    pub fn bind_playlist(&mut self, info: Arc<MediaPlaylistInfo>) {
        self.reset_binding();

        self.init = self
            .ctx
            .spawn_init(info.initialization_segment.clone(), self.binding.clone());
        self.pending_fresh = true;

        info!(
            quality = info.quality,
            segments = info.segments.len(),
            duration = info.total_duration(),
            "Bound media playlist"
        );
        self.playlist = Some(info);
    }

    /// Look-ahead prefetch of `[next, next + warm)`.
    ///
    /// Returns the end of the issued window, or `next` when it is too early, nothing
    /// is left, or a window is still in flight.
    pub fn preload_next(&mut self, current: f64, next: f64) -> f64 {
        let warm = self.warm();
        if current < next - warm {
            trace!(current, next, "Too early to preload");
            return next;
        }

        let Some(playlist) = self.playlist.clone() else {
            return next;
        };

        if let Some(in_flight) = self.ctx.shared.lock().requesting.clone() {
            trace!(?in_flight, next, "Window still in flight");
            return next;
        }

        let window = locate(&playlist.segments, WindowSearch::Starting(next), warm);
        if window.is_empty() {
            trace!(next, "Nothing left to preload");
            return next;
        }

        let distant = playlist.segments[window.end - 1].until;
        debug!(since = next, until = distant, ?window, "Preloading");
        self.issue(&playlist, window, BatchId::next(), false);
        distant
    }

    /// Seek prefetch: cancels in-flight work and loads the window around `timestamp`.
    ///
    /// A batch tagged `batch_id` is always emitted, init-only when no segment holds
    /// `timestamp`.
    pub fn reset_to(&mut self, timestamp: f64, batch_id: BatchId) -> f64 {
        self.ctx.shared.lock().cancel_window();

        let Some(playlist) = self.playlist.clone() else {
            return timestamp;
        };

        let window = locate(
            &playlist.segments,
            WindowSearch::Including(timestamp),
            self.warm(),
        );
        let distant = if window.is_empty() {
            timestamp
        } else {
            playlist.segments[window.end - 1].until
        };

        debug!(timestamp, until = distant, ?window, %batch_id, "Resetting window");
        self.issue(&playlist, window, batch_id, true);
        distant
    }

    /// Cancels all downloads, drops every cached payload and unbinds the playlist.
    pub fn discard_all(&mut self) {
        self.reset_binding();
        self.init = no_init();
        self.playlist = None;
        debug!("Discarded all media");
    }

    fn issue(
        &mut self,
        playlist: &Arc<MediaPlaylistInfo>,
        window: Range<usize>,
        batch_id: BatchId,
        fresh: bool,
    ) {
        let fresh = fresh || std::mem::take(&mut self.pending_fresh);
        let token = self.binding.child_token();

        let missing: Vec<usize> = {
            let mut state = self.ctx.shared.lock();
            state.requesting = Some(window.clone());
            state.window_token = Some(token.clone());

            let level = purge_level(&window, self.config.purge_distance_factor);
            let kept = state.cache.split_off(&level);
            if !state.cache.is_empty() {
                trace!(below = level, evicted = state.cache.len(), "Purging cache");
            }
            state.cache = kept;

            window
                .clone()
                .filter(|index| !state.cache.contains_key(index))
                .collect()
        };

        let downloads: Vec<_> = missing
            .into_iter()
            .map(|index| {
                let location = playlist.segments[index].location.clone();
                tokio::spawn(self.ctx.clone().fetch_segment(
                    index,
                    location,
                    self.init.clone(),
                    token.clone(),
                ))
            })
            .collect();

        let shared = self.ctx.shared.clone();
        let init = self.init.clone();
        let playlist = playlist.clone();
        tokio::spawn(async move {
            let init = tokio::select! {
                biased;
                _ = token.cancelled() => return,
                init = init => init,
            };
            join_all(downloads).await;

            let (batch, subscriber) = {
                let mut state = shared.lock();
                if token.is_cancelled() {
                    return;
                }
                state.requesting = None;
                state.window_token = None;

                let segments = window
                    .clone()
                    .filter_map(|index| {
                        state.cache.get(&index).map(|data| SegmentPayload {
                            index,
                            segment: playlist.segments[index].clone(),
                            data: data.clone(),
                        })
                    })
                    .collect();
                let batch = SegmentBatch {
                    batch_id,
                    fresh,
                    init,
                    segments,
                };
                (batch, state.subscriber.clone())
            };

            debug!(
                %batch_id,
                fresh,
                segments = batch.segments.len(),
                has_init = batch.init.is_some(),
                "Batch ready"
            );
            if let Some(subscriber) = subscriber {
                let _ = subscriber.send(batch);
            }
        });
    }
}

impl Drop for MediaProvider {
    fn drop(&mut self) {
        self.binding.cancel();
    }
}
