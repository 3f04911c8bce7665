// Media playlist parsing: segments, byte ranges and the initialization map.

use crate::scanner::{Line, Scanned, attributes, byte_range_spec, leading_float, tag_payload};
use std::ops::Range;
use tracing::{debug, trace, warn};
use url::Url;

const EXTINF: &str = "EXTINF";
const EXT_X_MAP: &str = "EXT-X-MAP";
const EXT_X_BYTERANGE: &str = "EXT-X-BYTERANGE";

/// Where an addressable entry (segment or map) lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntryLocation {
    pub url: Url,
    /// Half-open byte range inside `url`, when the entry is a sub-range.
    pub byte_range: Option<Range<u64>>,
}

impl EntryLocation {
    pub fn new(url: Url, byte_range: Option<Range<u64>>) -> Self {
        Self { url, byte_range }
    }
}

/// A media segment anchored on the playlist timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub location: EntryLocation,
    pub duration: f64,
    /// Cumulative start offset in seconds.
    pub since: f64,
    /// Cumulative end offset in seconds, `since + duration`.
    pub until: f64,
}

impl Segment {
    /// Whether `timestamp` falls inside `[since, until)`.
    #[inline]
    pub fn contains(&self, timestamp: f64) -> bool {
        self.since <= timestamp && timestamp < self.until
    }
}

/// Parsed media playlist.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaPlaylistInfo {
    pub quality: u32,
    pub source_url: Url,
    pub initialization_segment: Option<EntryLocation>,
    pub segments: Vec<Segment>,
}

impl MediaPlaylistInfo {
    /// End of the last segment, zero for an empty timeline.
    pub fn total_duration(&self) -> f64 {
        self.segments.last().map_or(0.0, |segment| segment.until)
    }

    /// Segments starting at or after `timestamp`.
    pub fn segments_since(&self, timestamp: f64) -> Vec<Segment> {
        self.segments
            .iter()
            .filter(|segment| segment.since >= timestamp)
            .cloned()
            .collect()
    }

    /// Index of the segment whose `[since, until)` contains `timestamp`.
    pub fn segment_index_containing(&self, timestamp: f64) -> Option<usize> {
        self.segments
            .iter()
            .position(|segment| segment.contains(timestamp))
    }

    /// Fractional position of `timestamp` inside its containing segment.
    pub fn position_within(&self, timestamp: f64) -> Option<f64> {
        let segment = &self.segments[self.segment_index_containing(timestamp)?];
        Some((timestamp - segment.since) / (segment.until - segment.since))
    }
}

/// Cheap probe used to tell media playlists from master playlists.
#[inline]
pub fn is_media_playlist(content: &str) -> bool {
    content.contains("#EXTINF:")
}

/// Running totals carried from one flushed segment to the next.
#[derive(Debug, Default)]
struct Cursor {
    offset: u64,
    duration: f64,
}

/// Parses media playlist text.
///
/// Returns `None` when the content carries no `#EXTINF` tag, meaning it is not a media
/// playlist. Malformed tags degrade to zero values; they never abort the parse.
pub fn parse_media(quality: u32, content: &str, base_url: &Url) -> Option<MediaPlaylistInfo> {
    if !is_media_playlist(content) {
        return None;
    }

    let mut info = MediaPlaylistInfo {
        quality,
        source_url: base_url.clone(),
        initialization_segment: None,
        segments: Vec::new(),
    };
    let mut cursor = Cursor::default();
    let mut scanned = Scanned::default();

    for raw in content.split('\n') {
        match Line::classify(raw) {
            Line::Tag(tag) => scanned.tags.push(tag),
            Line::Blank => flush(&mut scanned, base_url, &mut cursor, &mut info),
            Line::Comment => {}
            Line::Value(value) => {
                scanned.value = Some(value);
                flush(&mut scanned, base_url, &mut cursor, &mut info);
            }
        }
    }
    flush(&mut scanned, base_url, &mut cursor, &mut info);

    debug!(
        quality,
        segments = info.segments.len(),
        duration = info.total_duration(),
        has_map = info.initialization_segment.is_some(),
        "Parsed media playlist"
    );
    Some(info)
}

/// Emits one segment from the accumulated tags. Without a URI nothing is consumed, so
/// tags separated from their URI by blank lines still apply to it.
fn flush(
    scanned: &mut Scanned<'_>,
    base_url: &Url,
    cursor: &mut Cursor,
    info: &mut MediaPlaylistInfo,
) {
    let Some(uri) = scanned.value else {
        return;
    };

    let mut duration = 0.0;
    let mut explicit_range: Option<(u64, Option<u64>)> = None;

    for tag in &scanned.tags {
        if let Some(payload) = tag_payload(tag, EXT_X_MAP) {
            if let Some(map) = parse_map(payload, base_url) {
                if let Some(range) = &map.byte_range {
                    cursor.offset = range.end;
                }
                info.initialization_segment = Some(map);
            }
        } else if let Some(payload) = tag_payload(tag, EXTINF) {
            duration = leading_float(payload);
        } else if let Some(payload) = tag_payload(tag, EXT_X_BYTERANGE) {
            explicit_range = Some(byte_range_spec(payload));
        }
    }

    match base_url.join(uri) {
        Ok(url) => {
            let byte_range = explicit_range.map(|(length, offset)| {
                let start = offset.unwrap_or(cursor.offset);
                cursor.offset = start + length;
                start..start + length
            });

            let since = cursor.duration;
            let until = since + duration;
            cursor.duration = until;

            trace!(uri = %uri, since, until, range = ?byte_range, "Segment");
            info.segments.push(Segment {
                location: EntryLocation::new(url, byte_range),
                duration,
                since,
                until,
            });
        }
        Err(e) => warn!(uri = %uri, error = %e, "Failed to resolve segment URI, skipping"),
    }

    scanned.clear();
}

fn parse_map(payload: &str, base_url: &Url) -> Option<EntryLocation> {
    let mut uri = None;
    let mut byte_range = None;

    for (key, value) in attributes(payload) {
        match key {
            "URI" => uri = Some(value),
            "BYTERANGE" => {
                let (length, offset) = byte_range_spec(value);
                let start = offset.unwrap_or(0);
                byte_range = Some(start..start + length);
            }
            _ => {}
        }
    }

    let uri = uri.filter(|uri| !uri.is_empty())?;
    match base_url.join(uri) {
        Ok(url) => Some(EntryLocation::new(url, byte_range)),
        Err(e) => {
            warn!(uri = %uri, error = %e, "Failed to resolve map URI");
            None
        }
    }
}
