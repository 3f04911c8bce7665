//! Shared fixtures for unit tests: in-memory downloader, fake codecs and recording sinks.

use crate::codec::{
    BatchId, DecodedFrame, Decoder, DecoderEvent, DecoderEventSender, Demuxer, PresentationTime,
};
use crate::delivery::RenderSink;
use crate::downloader::{Content, ContentDownloader, Receive};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::watch;
use url::Url;

/// Initialize tracing for tests
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Lets spawned tasks on the current-thread test runtime run to quiescence.
pub async fn settle() {
    for _ in 0..256 {
        tokio::task::yield_now().await;
    }
}

pub fn url(input: &str) -> Url {
    Url::parse(input).unwrap()
}

type Key = (String, Option<Range<u64>>);

/// In-memory [`ContentDownloader`] keyed by URL and byte range.
///
/// Requests for a gated URL are held until [`MockDownloader::open`] is called.
#[derive(Default)]
pub struct MockDownloader {
    responses: Mutex<HashMap<Key, Bytes>>,
    gates: Mutex<HashMap<String, watch::Sender<bool>>>,
    log: Mutex<Vec<Key>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl MockDownloader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, url: &Url, range: Option<Range<u64>>, body: impl Into<Bytes>) {
        self.responses
            .lock()
            .insert((url.to_string(), range), body.into());
    }

    /// Later requests for the resource fail.
    pub fn remove(&self, url: &Url, range: Option<Range<u64>>) {
        self.responses.lock().remove(&(url.to_string(), range));
    }

    pub fn gate(&self, url: &Url) {
        let (tx, _) = watch::channel(false);
        self.gates.lock().insert(url.to_string(), tx);
    }

    pub fn open(&self, url: &Url) {
        if let Some(gate) = self.gates.lock().remove(url.as_str()) {
            gate.send_replace(true);
        }
    }

    /// Every request seen so far, in arrival order.
    pub fn requests(&self) -> Vec<(String, Option<Range<u64>>)> {
        self.log.lock().clone()
    }

    pub fn request_count(&self, url: &Url) -> usize {
        self.log
            .lock()
            .iter()
            .filter(|(logged, _)| logged == url.as_str())
            .count()
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentDownloader for MockDownloader {
    async fn request(
        &self,
        url: &Url,
        byte_range: Option<Range<u64>>,
        _receive: Receive,
    ) -> Option<Content> {
        let key = (url.to_string(), byte_range);
        self.log.lock().push(key.clone());

        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);

        let gate = self.gates.lock().get(url.as_str()).map(|tx| tx.subscribe());
        if let Some(mut gate) = gate {
            let _ = gate.wait_for(|open| *open).await;
        }
        tokio::task::yield_now().await;

        self.active.fetch_sub(1, Ordering::SeqCst);
        self.responses.lock().get(&key).cloned().map(Content::Online)
    }
}

/// Demuxer that hands segment bytes through unchanged.
pub struct PassthroughDemuxer;

impl Demuxer for PassthroughDemuxer {
    fn accepts(&self, _raw: &[u8]) -> bool {
        true
    }

    fn extract_payload(&self, raw: &[u8]) -> Bytes {
        Bytes::copy_from_slice(raw)
    }
}

/// Observations recorded by a [`ScriptedDecoder`].
#[derive(Default)]
pub struct DecoderLog {
    pub feeds: Mutex<Vec<(f64, BatchId)>>,
    pub resets: AtomicUsize,
}

/// Decoder producing one frame per `K` (keyframe) or `P` byte of each fed payload.
///
/// Every feed emits `StartBatch`, the frames and `EndBatch` synchronously.
pub struct ScriptedDecoder {
    frame_rate: u32,
    events: Option<DecoderEventSender>,
    log: Arc<DecoderLog>,
    silent: bool,
}

impl ScriptedDecoder {
    pub fn new(frame_rate: u32) -> (Self, Arc<DecoderLog>) {
        let log = Arc::new(DecoderLog::default());
        let decoder = Self {
            frame_rate,
            events: None,
            log: log.clone(),
            silent: false,
        };
        (decoder, log)
    }

    /// Decoder that never produces frames, for audio-less scenarios.
    pub fn silent(frame_rate: u32) -> Self {
        let (mut decoder, _) = Self::new(frame_rate);
        decoder.silent = true;
        decoder
    }
}

impl Decoder for ScriptedDecoder {
    fn register(&mut self, events: DecoderEventSender) {
        self.events = Some(events);
    }

    fn feed(&mut self, payload: Bytes, anchor_timestamp: f64, batch_id: BatchId) {
        self.log.feeds.lock().push((anchor_timestamp, batch_id));
        let Some(events) = &self.events else {
            return;
        };

        let _ = events.send(DecoderEvent::start(batch_id));
        if !self.silent {
            for (i, byte) in payload.iter().enumerate() {
                if !matches!(byte, b'K' | b'P') {
                    continue;
                }
                let frame = DecodedFrame::new(
                    payload.slice(i..i + 1),
                    *byte == b'K',
                    anchor_timestamp,
                );
                let _ = events.send(DecoderEvent::frame(batch_id, frame));
            }
        }
        let _ = events.send(DecoderEvent::end(batch_id));
    }

    fn reset(&mut self, _position: u64) {
        self.log.resets.fetch_add(1, Ordering::SeqCst);
    }

    fn frame_rate(&self) -> u32 {
        self.frame_rate
    }
}

/// Render sink recording everything it receives.
pub struct RecordingSink {
    pub frames: Mutex<Vec<DecodedFrame>>,
    pub flushes: AtomicUsize,
    pub restarts: Mutex<Vec<PresentationTime>>,
    pub rate: Mutex<Option<f64>>,
    pub volume: Mutex<Option<f32>>,
    /// Frames accepted before reporting not-ready.
    pub capacity: AtomicUsize,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Self::with_capacity(usize::MAX)
    }

    pub fn with_capacity(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            frames: Mutex::new(Vec::new()),
            flushes: AtomicUsize::new(0),
            restarts: Mutex::new(Vec::new()),
            rate: Mutex::new(None),
            volume: Mutex::new(None),
            capacity: AtomicUsize::new(capacity),
        })
    }

    pub fn received(&self) -> usize {
        self.frames.lock().len()
    }
}

impl RenderSink for RecordingSink {
    fn is_ready_for_more_media_data(&self) -> bool {
        self.received() < self.capacity.load(Ordering::SeqCst)
    }

    fn enqueue(&self, frame: DecodedFrame) {
        self.frames.lock().push(frame);
    }

    fn flush(&self) {
        self.flushes.fetch_add(1, Ordering::SeqCst);
    }

    fn restart_timebase(&self, at: PresentationTime) {
        self.restarts.lock().push(at);
    }

    fn set_rate(&self, rate: f64) {
        *self.rate.lock() = Some(rate);
    }

    fn set_volume(&self, level: f32) {
        *self.volume.lock() = Some(level);
    }
}
