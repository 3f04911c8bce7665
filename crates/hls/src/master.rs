// Master playlist parsing: variant streams declared by `#EXT-X-STREAM-INF`.

use crate::scanner::{Line, Scanned, attributes, leading_int, tag_payload};
use tracing::{debug, warn};
use url::Url;

const STREAM_INF: &str = "EXT-X-STREAM-INF";

/// One variant stream of a master playlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stream {
    pub bandwidth: u64,
    pub codecs: String,
    pub pixel_width: u32,
    pub pixel_height: u32,
    pub url: Url,
}

impl Stream {
    /// Quality level used to rank variants: the pixel height.
    #[inline]
    pub fn quality(&self) -> u32 {
        self.pixel_height
    }

    /// Codec identifiers without profile suffixes, e.g. `avc1` for `avc1.4d401e`.
    pub fn codec_families(&self) -> Vec<&str> {
        self.codecs
            .split(',')
            .filter_map(|codec| codec.trim().split('.').next())
            .filter(|family| !family.is_empty())
            .collect()
    }
}

/// Parsed master playlist, streams ordered lowest quality first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MasterPlaylistInfo {
    pub streams: Vec<Stream>,
}

/// Parses master playlist text.
///
/// Callers are expected to probe for `#EXTINF` first (see [`crate::is_media_playlist`]);
/// media-shaped content parsed here simply yields no streams.
pub fn parse_master(content: &str, base_url: &Url) -> MasterPlaylistInfo {
    let mut streams = Vec::new();
    let mut scanned = Scanned::default();

    for raw in content.split('\n') {
        match Line::classify(raw) {
            Line::Tag(tag) => {
                flush(&mut scanned, base_url, &mut streams);
                scanned.tags.push(tag);
            }
            Line::Blank => flush(&mut scanned, base_url, &mut streams),
            Line::Comment => {}
            Line::Value(value) => scanned.value = Some(value),
        }
    }
    flush(&mut scanned, base_url, &mut streams);

    streams.sort_by_key(|stream| (stream.bandwidth, stream.pixel_height));

    debug!(streams = streams.len(), base_url = %base_url, "Parsed master playlist");
    MasterPlaylistInfo { streams }
}

fn flush(scanned: &mut Scanned<'_>, base_url: &Url, streams: &mut Vec<Stream>) {
    if scanned.is_empty() {
        return;
    }

    for tag in &scanned.tags {
        let Some(payload) = tag_payload(tag, STREAM_INF) else {
            continue;
        };

        let Some(uri) = scanned.value else {
            debug!(tag = %tag, "Stream declaration without URI, skipping");
            continue;
        };

        let url = match base_url.join(uri) {
            Ok(url) => url,
            Err(e) => {
                warn!(uri = %uri, error = %e, "Failed to resolve stream URI");
                continue;
            }
        };

        streams.push(stream_from_attributes(payload, url));
    }

    scanned.clear();
}

fn stream_from_attributes(payload: &str, url: Url) -> Stream {
    let mut stream = Stream {
        bandwidth: 0,
        codecs: String::new(),
        pixel_width: 0,
        pixel_height: 0,
        url,
    };

    for (key, value) in attributes(payload) {
        match key.to_ascii_lowercase().as_str() {
            "bandwidth" => stream.bandwidth = leading_int(value),
            "codecs" => stream.codecs = value.to_string(),
            "resolution" => {
                let mut dimensions = value.split('x');
                stream.pixel_width = dimensions.next().map(leading_int).unwrap_or_default();
                stream.pixel_height = dimensions.last().map(leading_int).unwrap_or_default();
            }
            _ => {}
        }
    }

    stream
}
