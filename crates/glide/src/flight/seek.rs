// Keyframe-aligned seek resolution.

use crate::codec::{BatchId, DecodedFrame};

/// A seek waiting for its decode batch.
#[derive(Debug)]
pub struct SeekRequest {
    pub id: BatchId,
    pub timestamp: f64,
    /// Position of `timestamp` inside its segment in `[0, 1)`, `-1` when outside the timeline.
    pub fraction: f64,
    pub frames: Vec<DecodedFrame>,
    /// Audio frames of this batch with their timeline position, held until resolution.
    pub audio: Vec<(f64, DecodedFrame)>,
    /// Video feeds of this batch whose `EndBatch` has not arrived yet.
    pub pending_feeds: usize,
    /// Whether the scheduler batch has been fed.
    pub fed: bool,
}

impl SeekRequest {
    pub fn new(id: BatchId, timestamp: f64, fraction: f64) -> Self {
        Self {
            id,
            timestamp,
            fraction,
            frames: Vec::new(),
            audio: Vec::new(),
            pending_feeds: 0,
            fed: false,
        }
    }

    /// Batch fed and every feed decoded.
    pub fn is_complete(&self) -> bool {
        self.fed && self.pending_feeds == 0
    }
}

/// Frame index matching a fractional segment position at `frame_rate`.
pub fn target_index(frame_rate: u32, fraction: f64) -> i64 {
    (f64::from(frame_rate) * fraction).round() as i64
}

/// Timeline position of the `offset`-th frame decoded from a payload anchored at `anchor`.
pub fn frame_position(anchor: f64, offset: usize, frame_rate: u32) -> f64 {
    if frame_rate == 0 {
        return anchor;
    }
    anchor + offset as f64 / f64::from(frame_rate)
}

/// Timeline position of `frames[index]`, counting the frames decoded before it from the
/// same payload.
pub fn keyframe_position(frames: &[DecodedFrame], index: usize, frame_rate: u32) -> Option<f64> {
    let anchor = frames.get(index)?.anchor_timestamp;
    let offset = frames[..index]
        .iter()
        .rev()
        .take_while(|frame| frame.anchor_timestamp == anchor)
        .count();
    Some(frame_position(anchor, offset, frame_rate))
}

/// Picks the keyframe nearest to `target`; a tie goes to the earlier one.
///
/// Without any keyframe the target itself is clamped into the frame list. Returns
/// `None` only for an empty list.
pub fn resolve_keyframe(frames: &[DecodedFrame], target: i64) -> Option<usize> {
    let last = frames.len().checked_sub(1)? as i64;
    let is_key = |i: i64| frames[i as usize].is_keyframe;

    let lower = (0..=target.min(last)).rev().find(|&i| is_key(i));
    let upper = (target.max(0)..=last).find(|&i| is_key(i));

    let index = match (lower, upper) {
        (Some(lower), Some(upper)) => {
            if target - lower <= upper - target {
                lower
            } else {
                upper
            }
        }
        (Some(lower), None) => lower,
        (None, Some(upper)) => upper,
        (None, None) => target.clamp(0, last),
    };
    Some(index as usize)
}
