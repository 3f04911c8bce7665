// HLS (HTTP Live Streaming) manifest parsing
mod scanner;

pub mod master;
pub mod media;

// Export common types for ease of use
pub use master::{MasterPlaylistInfo, Stream, parse_master};
pub use media::{EntryLocation, MediaPlaylistInfo, Segment, is_media_playlist, parse_media};
