// Line-oriented scanning shared by the master and media parsers.

use regex::Regex;
use std::sync::LazyLock;

pub(crate) const TAG_PREFIX: &str = "#";
pub(crate) const EXT_PREFIX: &str = "#EXT";

/// Matches `KEY=value` and `KEY="quoted, value"` pairs in a tag attribute list.
static ATTRIBUTE_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"\b([A-Z0-9-]+)=("[^"]*"|[^",]*)"#).ok());

/// Classification of a single manifest line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Line<'a> {
    /// `#EXT...` tag, kept verbatim.
    Tag(&'a str),
    /// Empty line, acts as a flush trigger.
    Blank,
    /// Any other `#` line.
    Comment,
    /// URI value line.
    Value(&'a str),
}

impl<'a> Line<'a> {
    pub(crate) fn classify(raw: &'a str) -> Self {
        let line = raw.trim_end_matches('\r');
        if line.starts_with(EXT_PREFIX) {
            Line::Tag(line)
        } else if line.trim().is_empty() {
            Line::Blank
        } else if line.starts_with(TAG_PREFIX) {
            Line::Comment
        } else {
            Line::Value(line.trim())
        }
    }
}

/// Tags and the pending URI accumulated since the last flush.
#[derive(Debug, Default)]
pub(crate) struct Scanned<'a> {
    pub tags: Vec<&'a str>,
    pub value: Option<&'a str>,
}

impl<'a> Scanned<'a> {
    pub(crate) fn is_empty(&self) -> bool {
        self.tags.is_empty() && self.value.is_none()
    }

    pub(crate) fn clear(&mut self) {
        self.tags.clear();
        self.value = None;
    }
}

/// Returns the part of `tag` after `#NAME:`, if the tag has that name.
pub(crate) fn tag_payload<'a>(tag: &'a str, name: &str) -> Option<&'a str> {
    tag.strip_prefix(TAG_PREFIX)?
        .strip_prefix(name)?
        .strip_prefix(':')
}

/// Extracts `(KEY, value)` pairs with surrounding quotes removed.
///
/// A malformed attribute list yields whatever pairs could be matched.
pub(crate) fn attributes(payload: &str) -> Vec<(&str, &str)> {
    let Some(re) = ATTRIBUTE_RE.as_ref() else {
        return Vec::new();
    };

    re.captures_iter(payload)
        .filter_map(|caps| {
            let key = caps.get(1)?.as_str();
            let value = caps.get(2)?.as_str().trim_matches('"');
            Some((key, value))
        })
        .collect()
}

/// Leading floating point token, e.g. `9.009` in `9.009,title`.
pub(crate) fn leading_float(payload: &str) -> f64 {
    let end = payload
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(payload.len());
    payload[..end].parse().unwrap_or(0.0)
}

/// Leading integer token, zero when absent.
pub(crate) fn leading_int<T: std::str::FromStr + Default>(payload: &str) -> T {
    let payload = payload.trim();
    let end = payload
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(payload.len());
    payload[..end].parse().unwrap_or_default()
}

/// Parses `length[@offset]`.
pub(crate) fn byte_range_spec(payload: &str) -> (u64, Option<u64>) {
    match payload.split_once('@') {
        Some((length, offset)) => (leading_int(length), Some(leading_int(offset))),
        None => (leading_int(payload), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_lines() {
        assert_eq!(Line::classify("#EXTINF:4.0,"), Line::Tag("#EXTINF:4.0,"));
        assert_eq!(Line::classify(""), Line::Blank);
        assert_eq!(Line::classify("   \r"), Line::Blank);
        assert_eq!(Line::classify("# just a note"), Line::Comment);
        assert_eq!(Line::classify("seg0.ts\r"), Line::Value("seg0.ts"));
    }

    #[test]
    fn extracts_quoted_and_bare_attributes() {
        let attrs = attributes(r#"BANDWIDTH=800000,CODECS="avc1.4d401e,mp4a.40.2",RESOLUTION=640x360"#);
        assert_eq!(
            attrs,
            vec![
                ("BANDWIDTH", "800000"),
                ("CODECS", "avc1.4d401e,mp4a.40.2"),
                ("RESOLUTION", "640x360"),
            ]
        );
    }

    #[test]
    fn tag_payload_requires_exact_name() {
        assert_eq!(tag_payload("#EXTINF:2.5,", "EXTINF"), Some("2.5,"));
        assert_eq!(tag_payload("#EXT-X-MAP:URI=\"a\"", "EXTINF"), None);
        assert_eq!(tag_payload("#EXTINFO:1", "EXTINF"), None);
    }

    #[test]
    fn numeric_tokens_degrade_to_zero() {
        assert_eq!(leading_float("6.006,"), 6.006);
        assert_eq!(leading_float("abc"), 0.0);
        assert_eq!(leading_int::<u64>("x12"), 0);
        assert_eq!(byte_range_spec("1000@200"), (1000, Some(200)));
        assert_eq!(byte_range_spec("1000"), (1000, None));
        assert_eq!(byte_range_spec("oops@"), (0, Some(0)));
    }
}
