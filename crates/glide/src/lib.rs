// Glide: HLS playback engine
pub mod codec;
pub mod config;
pub mod delivery;
pub mod downloader;
pub mod error;
pub mod flight;
pub mod manager;
pub mod playlist;
pub mod provider;

#[cfg(test)]
mod test_utils;

// Export common types for ease of use
pub use codec::{
    BatchId, DecodedFrame, Decoder, DecoderEvent, DecoderEventKind, DecoderEventSender, Demuxer,
    DemuxerChain, MediaKind, PresentationTime,
};
pub use config::{DownloaderConfig, GlideConfig, PlaybackConfig, ProviderConfig};
pub use delivery::{Delivered, FrameDeliveryBuffer, RenderSink};
pub use downloader::{Content, ContentDownloader, HttpDownloader, Receive};
pub use error::{GlideError, Result};
pub use flight::{CodecSet, FlightEvent, FlightHandle, FlightState, PlaybackFlight};
pub use manager::PlaybackManager;
pub use playlist::{MasterPlaylist, MediaPlaylist};
pub use provider::{MediaProvider, SegmentBatch, SegmentPayload};

pub use hls;
