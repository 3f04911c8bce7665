// Collaborator contracts: container demuxers, elementary-stream decoders and the frames
// they produce. Implementations live in the host application.

use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Identifies one scheduler batch and every decoder event it causes.
///
/// Ids are allocated monotonically, so a newer batch always compares greater.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BatchId(u64);

impl BatchId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "batch#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Video,
    Audio,
}

/// Rational presentation timestamp, `value / timescale` seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresentationTime {
    pub value: i64,
    pub timescale: u32,
}

impl PresentationTime {
    pub const ZERO: PresentationTime = PresentationTime {
        value: 0,
        timescale: 1,
    };

    pub fn new(value: i64, timescale: u32) -> Self {
        Self { value, timescale }
    }

    pub fn as_secs_f64(&self) -> f64 {
        if self.timescale == 0 {
            return 0.0;
        }
        self.value as f64 / self.timescale as f64
    }
}

/// A presentable unit produced by a decoder.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub is_keyframe: bool,
    /// Discontinuity marker: queued frames before this one must be dropped.
    pub should_flush: bool,
    /// Timeline anchor passed to [`Decoder::feed`] for the payload this frame came from.
    pub anchor_timestamp: f64,
    /// End of the segment this frame belongs to, filled in by the flight.
    pub segment_end_time: f64,
    /// Assigned by the flight when the frame is committed.
    pub absolute_timestamp: Option<PresentationTime>,
    /// Opaque decoded sample data.
    pub payload: Bytes,
}

impl DecodedFrame {
    pub fn new(payload: Bytes, is_keyframe: bool, anchor_timestamp: f64) -> Self {
        Self {
            is_keyframe,
            should_flush: false,
            anchor_timestamp,
            segment_end_time: 0.0,
            absolute_timestamp: None,
            payload,
        }
    }
}

#[derive(Debug, Clone)]
pub enum DecoderEventKind {
    StartBatch,
    Frame(DecodedFrame),
    EndBatch,
}

#[derive(Debug, Clone)]
pub struct DecoderEvent {
    pub batch_id: BatchId,
    pub kind: DecoderEventKind,
}

impl DecoderEvent {
    pub fn start(batch_id: BatchId) -> Self {
        Self {
            batch_id,
            kind: DecoderEventKind::StartBatch,
        }
    }

    pub fn frame(batch_id: BatchId, frame: DecodedFrame) -> Self {
        Self {
            batch_id,
            kind: DecoderEventKind::Frame(frame),
        }
    }

    pub fn end(batch_id: BatchId) -> Self {
        Self {
            batch_id,
            kind: DecoderEventKind::EndBatch,
        }
    }
}

pub type DecoderEventSender = mpsc::UnboundedSender<DecoderEvent>;

/// Elementary-stream decoder (H.264 video, AAC audio, ...).
///
/// Output is asynchronous: for every `feed` call the decoder emits `StartBatch`, zero or
/// more `Frame`s and `EndBatch`, all tagged with the fed batch id.
pub trait Decoder: Send {
    /// Registers the single consumer of this decoder's events, replacing any previous one.
    fn register(&mut self, events: DecoderEventSender);

    fn feed(&mut self, payload: Bytes, anchor_timestamp: f64, batch_id: BatchId);

    fn reset(&mut self, position: u64);

    /// Frames per second for video, packets per second for audio.
    fn frame_rate(&self) -> u32;
}

/// Container unpacker turning raw segment bytes into elementary-stream bytes.
///
/// Must accept initialization data fed on its own, separately from media data.
pub trait Demuxer: Send + Sync {
    fn accepts(&self, raw: &[u8]) -> bool;

    fn extract_payload(&self, raw: &[u8]) -> Bytes;
}

/// Dispatches each payload to the first variant that recognizes it.
#[derive(Default)]
pub struct DemuxerChain {
    variants: Vec<Box<dyn Demuxer>>,
}

impl DemuxerChain {
    pub fn new(variants: Vec<Box<dyn Demuxer>>) -> Self {
        Self { variants }
    }

    pub fn find_responsible(&self, raw: &[u8]) -> Option<&dyn Demuxer> {
        self.variants
            .iter()
            .find(|variant| variant.accepts(raw))
            .map(|variant| variant.as_ref())
    }
}

impl Demuxer for DemuxerChain {
    fn accepts(&self, raw: &[u8]) -> bool {
        self.find_responsible(raw).is_some()
    }

    fn extract_payload(&self, raw: &[u8]) -> Bytes {
        match self.find_responsible(raw) {
            Some(variant) => variant.extract_payload(raw),
            None => {
                tracing::debug!(len = raw.len(), "No demuxer recognizes payload");
                Bytes::new()
            }
        }
    }
}
