// Prefetch window arithmetic over a media playlist's segment list.
//
// Windows are half-open index ranges; an empty range means "nothing to load".

use hls::Segment;
use std::ops::Range;

/// How a window's bounds are located on the timeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WindowSearch {
    /// Look-ahead: segments starting in `[from, from + warm)`.
    Starting(f64),
    /// Seek: from the segment containing `at` through the segment containing `at + warm`.
    Including(f64),
}

/// Resolves the segment index range for a search with the given warm duration.
///
/// A lower bound that matches no segment yields an empty window. An `Including`
/// window always contains the segment holding its lower bound.
pub fn locate(segments: &[Segment], search: WindowSearch, warm: f64) -> Range<usize> {
    let len = segments.len();
    match search {
        WindowSearch::Starting(from) => {
            let upper_bound = from + warm;
            let Some(lower) = segments.iter().position(|s| s.since >= from) else {
                return len..len;
            };
            let upper = segments
                .iter()
                .position(|s| s.since >= upper_bound)
                .unwrap_or(len);
            lower..upper.max(lower)
        }
        WindowSearch::Including(at) => {
            let upper_bound = at + warm;
            let Some(lower) = segments.iter().position(|s| s.contains(at)) else {
                return len..len;
            };
            let upper = segments
                .iter()
                .position(|s| s.contains(upper_bound))
                .unwrap_or(len);
            lower..upper.max(lower + 1)
        }
    }
}

#[inline]
pub fn overlaps(a: &Range<usize>, b: &Range<usize>) -> bool {
    a.start < b.end && b.start < a.end
}

/// Cached indices strictly below this level are evicted after issuing `window`.
#[inline]
pub fn purge_level(window: &Range<usize>, factor: usize) -> usize {
    window
        .start
        .saturating_sub(window.len().saturating_mul(factor))
}
