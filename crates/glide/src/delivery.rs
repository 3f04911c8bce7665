// Frame Delivery Buffer: per-channel queues between the flight and the render sinks.

use crate::codec::{DecodedFrame, MediaKind, PresentationTime};
use parking_lot::Mutex;
use std::collections::VecDeque;
use tracing::trace;

/// Presentation endpoint for one channel (a display layer, an audio renderer).
pub trait RenderSink: Send + Sync {
    /// Backpressure signal polled before every frame.
    fn is_ready_for_more_media_data(&self) -> bool;

    fn enqueue(&self, frame: DecodedFrame);

    /// Drops everything enqueued but not yet presented.
    fn flush(&self);

    fn restart_timebase(&self, _at: PresentationTime) {}

    fn set_rate(&self, _rate: f64) {}

    fn set_volume(&self, _level: f32) {}
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct PlaybackClock {
    /// Presentation time of the last delivered video frame, in seconds.
    timestamp: f64,
    /// End of the segment of the last delivered video frame.
    watermark: f64,
}

/// Frames handed to the sinks by one [`FrameDeliveryBuffer::drain`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Delivered {
    pub video: usize,
    pub audio: usize,
}

/// Two independent queues, written from the flight's event path and read on the tick.
#[derive(Default)]
pub struct FrameDeliveryBuffer {
    video: Mutex<VecDeque<DecodedFrame>>,
    audio: Mutex<VecDeque<DecodedFrame>>,
    clock: Mutex<PlaybackClock>,
}

impl FrameDeliveryBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn queue(&self, kind: MediaKind) -> &Mutex<VecDeque<DecodedFrame>> {
        match kind {
            MediaKind::Video => &self.video,
            MediaKind::Audio => &self.audio,
        }
    }

    /// Appends a frame; a discontinuity frame first discards the whole channel queue.
    pub fn enqueue(&self, kind: MediaKind, frame: DecodedFrame) {
        let mut queue = self.queue(kind).lock();
        if frame.should_flush && !queue.is_empty() {
            trace!(?kind, dropped = queue.len(), "Discontinuity, flushing queue");
            queue.clear();
        }
        queue.push_back(frame);
    }

    pub fn len(&self, kind: MediaKind) -> usize {
        self.queue(kind).lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.video.lock().is_empty() && self.audio.lock().is_empty()
    }

    /// Empties both queues and rewinds the clock.
    pub fn clear(&self) {
        self.video.lock().clear();
        self.audio.lock().clear();
        *self.clock.lock() = PlaybackClock::default();
    }

    /// Playback position in seconds, from the last delivered video frame.
    pub fn current_timestamp(&self) -> f64 {
        self.clock.lock().timestamp
    }

    /// Timeline position up to which media has been handed to the video sink.
    pub fn preload_watermark(&self) -> f64 {
        self.clock.lock().watermark
    }

    /// Moves frames into the sinks while they accept more, stopping a channel at its
    /// first not-ready sink. A missing sink leaves its queue untouched.
    pub fn drain(
        &self,
        video_sink: Option<&dyn RenderSink>,
        audio_sink: Option<&dyn RenderSink>,
    ) -> Delivered {
        let mut delivered = Delivered::default();

        if let Some(sink) = video_sink {
            let mut last = None;
            {
                let mut queue = self.video.lock();
                while !queue.is_empty() && sink.is_ready_for_more_media_data() {
                    let Some(frame) = queue.pop_front() else {
                        break;
                    };
                    last = Some((frame.absolute_timestamp, frame.segment_end_time));
                    sink.enqueue(frame);
                    delivered.video += 1;
                }
            }

            if let Some((pts, segment_end_time)) = last {
                let mut clock = self.clock.lock();
                if let Some(pts) = pts {
                    clock.timestamp = pts.as_secs_f64();
                }
                clock.watermark = segment_end_time;
            }
        }

        if let Some(sink) = audio_sink {
            let mut queue = self.audio.lock();
            while !queue.is_empty() && sink.is_ready_for_more_media_data() {
                let Some(frame) = queue.pop_front() else {
                    break;
                };
                sink.enqueue(frame);
                delivered.audio += 1;
            }
        }

        if delivered != Delivered::default() {
            trace!(video = delivered.video, audio = delivered.audio, "Delivered frames");
        }
        delivered
    }
}
