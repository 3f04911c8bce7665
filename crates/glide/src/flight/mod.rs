// Playback Flight: feeds scheduler batches to the decoders, resolves seeks on
// keyframes and assigns the presentation timeline of committed frames.

mod seek;

pub use seek::{SeekRequest, frame_position, keyframe_position, resolve_keyframe, target_index};

use crate::codec::{
    BatchId, DecodedFrame, Decoder, DecoderEvent, DecoderEventKind, Demuxer, PresentationTime,
};
use crate::config::ProviderConfig;
use crate::downloader::ContentDownloader;
use crate::playlist::MasterPlaylist;
use crate::provider::{MediaProvider, SegmentBatch};
use bytes::Bytes;
use hls::{MediaPlaylistInfo, Segment};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Segments remembered for resolving `segment_end_time` of decoded frames.
const DECODING_HISTORY: usize = 64;

/// Output of the flight, in presentation order per channel.
#[derive(Debug, Clone)]
pub enum FlightEvent {
    /// The presentation timeline restarts at the given time.
    PresentationRestart(PresentationTime),
    VideoFrame(DecodedFrame),
    AudioFrame(DecodedFrame),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightState {
    Idle,
    PrefetchingMaster,
    Streaming,
    Seeking,
}

#[derive(Debug)]
struct Status {
    state: FlightState,
    height: u32,
}

/// Demuxer and decoders driven by one flight.
pub struct CodecSet {
    pub demuxer: Arc<dyn Demuxer>,
    pub video: Box<dyn Decoder>,
    pub audio: Box<dyn Decoder>,
}

#[derive(Debug)]
enum Command {
    /// Bind the scheduler to a playlist; `restart` also preloads from time zero.
    Bind {
        info: Arc<MediaPlaylistInfo>,
        restart: bool,
    },
    Seek {
        timestamp: f64,
        info: Option<Arc<MediaPlaylistInfo>>,
    },
    PreloadMore {
        now: f64,
    },
}

/// Control surface of a running flight.
///
/// Master playlist resolution happens here, on the caller's task; the flight task only
/// ever sees resolved media playlists.
#[derive(Clone)]
pub struct FlightHandle {
    commands: mpsc::UnboundedSender<Command>,
    master: Arc<Mutex<Option<Arc<MasterPlaylist>>>>,
    status: Arc<Mutex<Status>>,
}

impl FlightHandle {
    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!("Playback flight is gone, dropping command");
        }
    }

    pub fn master(&self) -> Option<Arc<MasterPlaylist>> {
        self.master.lock().clone()
    }

    pub fn state(&self) -> FlightState {
        self.status.lock().state
    }

    /// Pixel height of the bound media playlist, 0 before binding.
    pub fn current_height(&self) -> u32 {
        self.status.lock().height
    }

    /// Resolves `master` and starts streaming its active media playlist from time zero.
    pub async fn start(&self, master: Arc<MasterPlaylist>) {
        *self.master.lock() = Some(master.clone());
        self.status.lock().state = FlightState::PrefetchingMaster;

        match master.prefetch_info().await {
            Some(info) => self.send(Command::Bind {
                info,
                restart: true,
            }),
            None => {
                warn!(url = %master.url(), "No playable media playlist");
                self.status.lock().state = FlightState::Idle;
            }
        }
    }

    /// Switches to the highest quality not above `quality`, or the lowest available.
    ///
    /// Returns the selected quality. The timeline position is not carried over.
    pub fn activate_stream(&self, quality: u32) -> Option<u32> {
        let master = self.master()?;
        let mut playlists = master.available_media_playlists();
        playlists.sort_by(|a, b| b.quality.cmp(&a.quality));

        let info = playlists
            .iter()
            .find(|playlist| playlist.quality <= quality)
            .or(playlists.last())?
            .clone();

        info!(requested = quality, selected = info.quality, "Activating stream");
        master.set_active(info.quality);
        let selected = info.quality;
        self.send(Command::Bind {
            info,
            restart: false,
        });
        Some(selected)
    }

    /// Refreshes the master and seeks to `timestamp` seconds.
    pub async fn seek_to(&self, timestamp: f64) {
        let info = match self.master() {
            Some(master) => master.prefetch_info().await,
            None => None,
        };
        self.send(Command::Seek { timestamp, info });
    }

    /// Lets the scheduler look ahead from the playback position `now`.
    pub fn preload_more(&self, now: f64) {
        self.send(Command::PreloadMore { now });
    }
}

struct Inbox {
    commands: mpsc::UnboundedReceiver<Command>,
    batches: mpsc::UnboundedReceiver<SegmentBatch>,
    video: mpsc::UnboundedReceiver<DecoderEvent>,
    audio: mpsc::UnboundedReceiver<DecoderEvent>,
}

pub struct PlaybackFlight {
    provider: MediaProvider,
    demuxer: Arc<dyn Demuxer>,
    video: Box<dyn Decoder>,
    audio: Box<dyn Decoder>,
    events: mpsc::UnboundedSender<FlightEvent>,
    status: Arc<Mutex<Status>>,
    preload_timestamp: f64,
    seek: Option<SeekRequest>,
    /// Decoder events and batches older than this belong to a superseded binding or seek.
    generation: Option<BatchId>,
    /// Last resolved seek and the timeline position its keyframe landed on. Audio of
    /// that batch before the position is not presented.
    seek_origin: Option<(BatchId, f64)>,
    video_index: i64,
    audio_index: i64,
    /// Audio frames decoded so far from the current feed.
    audio_offset: usize,
    decoding: VecDeque<(f64, f64)>,
}

impl PlaybackFlight {
    fn new(
        config: ProviderConfig,
        downloader: Arc<dyn ContentDownloader>,
        codecs: CodecSet,
        events: mpsc::UnboundedSender<FlightEvent>,
    ) -> (Self, FlightHandle, Inbox) {
        let CodecSet {
            demuxer,
            mut video,
            mut audio,
        } = codecs;

        let mut provider = MediaProvider::new(config, downloader);
        let batches = provider.subscribe();

        let (video_tx, video_rx) = mpsc::unbounded_channel();
        let (audio_tx, audio_rx) = mpsc::unbounded_channel();
        video.register(video_tx);
        audio.register(audio_tx);

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let status = Arc::new(Mutex::new(Status {
            state: FlightState::Idle,
            height: 0,
        }));

        let flight = Self {
            provider,
            demuxer,
            video,
            audio,
            events,
            status: status.clone(),
            preload_timestamp: 0.0,
            seek: None,
            generation: None,
            seek_origin: None,
            video_index: 0,
            audio_index: 0,
            audio_offset: 0,
            decoding: VecDeque::with_capacity(DECODING_HISTORY),
        };
        let handle = FlightHandle {
            commands: commands_tx,
            master: Arc::new(Mutex::new(None)),
            status,
        };
        let inbox = Inbox {
            commands: commands_rx,
            batches,
            video: video_rx,
            audio: audio_rx,
        };
        (flight, handle, inbox)
    }

    /// Spawns the flight task. It stops when `token` is cancelled or every handle is dropped.
    pub fn spawn(
        config: ProviderConfig,
        downloader: Arc<dyn ContentDownloader>,
        codecs: CodecSet,
        events: mpsc::UnboundedSender<FlightEvent>,
        token: CancellationToken,
    ) -> (FlightHandle, JoinHandle<()>) {
        let (flight, handle, inbox) = Self::new(config, downloader, codecs, events);
        let task = tokio::spawn(flight.run(inbox, token));
        (handle, task)
    }

    async fn run(mut self, mut inbox: Inbox, token: CancellationToken) {
        debug!("Playback flight started");
        loop {
            tokio::select! {
                biased;

                _ = token.cancelled() => break,

                command = inbox.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },

                Some(event) = inbox.video.recv() => self.on_video_event(event),

                Some(event) = inbox.audio.recv() => self.on_audio_event(event),

                Some(batch) = inbox.batches.recv() => self.on_batch(batch),
            }
        }

        self.provider.discard_all();
        self.status.lock().state = FlightState::Idle;
        debug!("Playback flight stopped");
    }

    fn set_state(&self, state: FlightState) {
        self.status.lock().state = state;
    }

    fn emit(&self, event: FlightEvent) {
        let _ = self.events.send(event);
    }

    fn is_stale(&self, batch_id: BatchId) -> bool {
        self.generation.is_some_and(|generation| batch_id < generation)
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Bind { info, restart } => {
                if let Some(seek) = self.seek.take() {
                    debug!(batch_id = %seek.id, "Rebinding abandons pending seek");
                }
                self.generation = Some(BatchId::next());
                self.seek_origin = None;
                self.status.lock().height = info.quality;
                self.provider.bind_playlist(info);
                self.set_state(FlightState::Streaming);

                if restart {
                    self.video_index = 0;
                    self.audio_index = 0;
                    self.preload_timestamp = self.provider.preload_next(0.0, 0.0);
                }
            }
            Command::Seek { timestamp, info } => self.seek_to(timestamp, info),
            Command::PreloadMore { now } => {
                if self.seek.is_none() {
                    self.preload_timestamp = self.provider.preload_next(now, self.preload_timestamp);
                }
            }
        }
    }

    fn seek_to(&mut self, timestamp: f64, refreshed: Option<Arc<MediaPlaylistInfo>>) {
        if let Some(info) = refreshed {
            let changed = self
                .provider
                .playlist()
                .is_none_or(|bound| bound.as_ref() != info.as_ref());
            if changed {
                debug!(quality = info.quality, "Playlist changed since binding, rebinding");
                self.status.lock().height = info.quality;
                self.provider.bind_playlist(info);
            }
        }

        let Some(bound) = self.provider.playlist().cloned() else {
            warn!(timestamp, "Seek requested before any playlist is bound");
            return;
        };

        let fraction = bound.position_within(timestamp).unwrap_or(-1.0);
        let request = SeekRequest::new(BatchId::next(), timestamp, fraction);
        info!(timestamp, fraction, batch_id = %request.id, "Seeking");

        self.generation = Some(request.id);
        self.seek_origin = None;
        let id = request.id;
        if let Some(previous) = self.seek.replace(request) {
            debug!(batch_id = %previous.id, "Seek superseded");
        }
        self.set_state(FlightState::Seeking);
        self.preload_timestamp = self.provider.reset_to(timestamp, id);
    }

    fn feed(&mut self, payload: Bytes, anchor_timestamp: f64, batch_id: BatchId) {
        self.video.feed(payload.clone(), anchor_timestamp, batch_id);
        self.audio.feed(payload, anchor_timestamp, batch_id);
    }

    fn remember_segment(&mut self, segment: &Segment) {
        if self.decoding.len() == DECODING_HISTORY {
            self.decoding.pop_front();
        }
        self.decoding.push_back((segment.since, segment.until));
    }

    /// End of the fed segment whose start matches the frame's anchor.
    fn segment_end_time(&self, anchor_timestamp: f64) -> f64 {
        self.decoding
            .iter()
            .rev()
            .find(|(since, _)| *since == anchor_timestamp)
            .or(self.decoding.back())
            .map_or(0.0, |(_, until)| *until)
    }

    fn on_batch(&mut self, batch: SegmentBatch) {
        if self.is_stale(batch.batch_id) {
            debug!(batch_id = %batch.batch_id, "Dropping superseded batch");
            return;
        }

        if batch.fresh {
            self.video_index = 0;
            self.audio_index = 0;
            self.video.reset(0);
            self.audio.reset(0);
            self.decoding.clear();
        }

        let seek_target = self.seek.as_ref().map(|seek| seek.timestamp);
        let mut feeds = 0;

        if let Some(init) = &batch.init {
            let payload = self.demuxer.extract_payload(init);
            if !payload.is_empty() {
                self.feed(payload, 0.0, batch.batch_id);
                feeds += 1;
            }
        }

        for item in &batch.segments {
            if seek_target.is_some_and(|target| !item.segment.contains(target)) {
                trace!(index = item.index, "Segment outside seek target, not decoding");
                continue;
            }

            let payload = self.demuxer.extract_payload(&item.data);
            if payload.is_empty() {
                debug!(index = item.index, "No payload extracted, skipping segment");
                continue;
            }

            self.remember_segment(&item.segment);
            self.feed(payload, item.segment.since, batch.batch_id);
            feeds += 1;
        }

        debug!(batch_id = %batch.batch_id, fresh = batch.fresh, feeds, "Batch fed");

        if let Some(seek) = self.seek.as_mut().filter(|seek| seek.id == batch.batch_id) {
            seek.fed = true;
            seek.pending_feeds += feeds;
        }
        self.try_resolve_seek();
    }

    fn on_video_event(&mut self, event: DecoderEvent) {
        if self.is_stale(event.batch_id) {
            trace!(batch_id = %event.batch_id, "Dropping superseded video event");
            return;
        }

        match event.kind {
            DecoderEventKind::StartBatch => trace!(batch_id = %event.batch_id, "Video batch started"),
            DecoderEventKind::Frame(mut frame) => {
                frame.segment_end_time = self.segment_end_time(frame.anchor_timestamp);
                match self.seek.as_mut() {
                    Some(seek) if seek.id == event.batch_id => seek.frames.push(frame),
                    _ => self.commit_video(frame, None),
                }
            }
            DecoderEventKind::EndBatch => {
                if let Some(seek) = self.seek.as_mut().filter(|seek| seek.id == event.batch_id) {
                    seek.pending_feeds = seek.pending_feeds.saturating_sub(1);
                }
                self.try_resolve_seek();
            }
        }
    }

    fn on_audio_event(&mut self, event: DecoderEvent) {
        if self.is_stale(event.batch_id) {
            return;
        }

        match event.kind {
            DecoderEventKind::StartBatch => self.audio_offset = 0,
            DecoderEventKind::Frame(mut frame) => {
                let position = frame_position(
                    frame.anchor_timestamp,
                    self.audio_offset,
                    self.audio.frame_rate(),
                );
                self.audio_offset += 1;
                frame.segment_end_time = self.segment_end_time(frame.anchor_timestamp);

                if let Some(seek) = self.seek.as_mut().filter(|seek| seek.id == event.batch_id) {
                    seek.audio.push((position, frame));
                    return;
                }
                let before_origin = self
                    .seek_origin
                    .is_some_and(|(id, origin)| id == event.batch_id && position < origin);
                if before_origin {
                    trace!(position, "Dropping audio ahead of the seek keyframe");
                    return;
                }
                self.commit_audio(frame);
            }
            DecoderEventKind::EndBatch => {}
        }
    }

    fn try_resolve_seek(&mut self) {
        if !self.seek.as_ref().is_some_and(SeekRequest::is_complete) {
            return;
        }
        let Some(seek) = self.seek.take() else {
            return;
        };
        self.set_state(FlightState::Streaming);

        let rate = self.video.frame_rate();
        let target = target_index(rate, seek.fraction);
        let keyframe = resolve_keyframe(&seek.frames, target);
        let origin = keyframe
            .and_then(|keyframe| keyframe_position(&seek.frames, keyframe, rate))
            .unwrap_or(seek.timestamp);
        self.seek_origin = Some((seek.id, origin));

        match keyframe {
            Some(keyframe) => {
                info!(
                    batch_id = %seek.id,
                    target,
                    keyframe,
                    origin,
                    frames = seek.frames.len(),
                    "Seek resolved"
                );
                for (i, frame) in seek.frames.into_iter().skip(keyframe).enumerate() {
                    self.commit_video(frame, (i == 0).then_some(0));
                }
            }
            None => info!(batch_id = %seek.id, "Seek decoded no frames"),
        }

        for (position, frame) in seek.audio {
            if position >= origin {
                self.commit_audio(frame);
            }
        }
    }

    /// Assigns the running index (or `forced`) as presentation time. Index zero marks a
    /// presentation restart and flushes queued frames.
    fn commit_video(&mut self, mut frame: DecodedFrame, forced: Option<i64>) {
        let index = forced.unwrap_or(self.video_index);
        if index == 0 {
            frame.should_flush = true;
            self.emit(FlightEvent::PresentationRestart(PresentationTime::ZERO));
        }

        frame.absolute_timestamp = Some(PresentationTime::new(index, self.video.frame_rate()));
        self.video_index = index + 1;
        self.emit(FlightEvent::VideoFrame(frame));
    }

    fn commit_audio(&mut self, mut frame: DecodedFrame) {
        let index = self.audio_index;
        if index == 0 {
            frame.should_flush = true;
        }
        frame.absolute_timestamp = Some(PresentationTime::new(index, self.audio.frame_rate()));
        self.audio_index = index + 1;
        self.emit(FlightEvent::AudioFrame(frame));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playlist::tests::MASTER;
    use crate::test_utils::{
        DecoderLog, MockDownloader, PassthroughDemuxer, ScriptedDecoder, init_tracing, settle, url,
    };
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    const LIVE_URL: &str = "https://cdn.example/live.m3u8";

    /// Media playlist with `count` one-second segments, served with payload `body`.
    fn serve_media(mock: &MockDownloader, address: &str, count: usize, body: &str) {
        let base = url(address);
        let mut content = String::from("#EXTM3U\n#EXT-X-MAP:URI=\"init.mp4\"\n");
        for i in 0..count {
            content.push_str(&format!("#EXTINF:1.0,\ns{i}.m4s\n"));
            mock.insert(&base.join(&format!("s{i}.m4s")).unwrap(), None, body.to_string());
        }
        mock.insert(&base.join("init.mp4").unwrap(), None, "INIT");
        mock.insert(&base, None, content);
    }

    struct Harness {
        handle: FlightHandle,
        events: mpsc::UnboundedReceiver<FlightEvent>,
        video_log: Arc<DecoderLog>,
        token: CancellationToken,
    }

    impl Harness {
        fn new(mock: Arc<MockDownloader>, frame_rate: u32) -> Self {
            Self::with_audio(mock, frame_rate, ScriptedDecoder::silent(44))
        }

        fn with_audio(mock: Arc<MockDownloader>, frame_rate: u32, audio: ScriptedDecoder) -> Self {
            let (video, video_log) = ScriptedDecoder::new(frame_rate);
            let codecs = CodecSet {
                demuxer: Arc::new(PassthroughDemuxer),
                video: Box::new(video),
                audio: Box::new(audio),
            };
            let config = ProviderConfig {
                warm_duration: Duration::from_secs(10),
                ..Default::default()
            };
            let (tx, events) = mpsc::unbounded_channel();
            let token = CancellationToken::new();
            let (handle, _task) = PlaybackFlight::spawn(config, mock, codecs, tx, token.clone());
            Self {
                handle,
                events,
                video_log,
                token,
            }
        }

        fn drain(&mut self) -> Vec<FlightEvent> {
            let mut events = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                events.push(event);
            }
            events
        }
    }

    fn video_frames(events: &[FlightEvent]) -> Vec<&DecodedFrame> {
        events
            .iter()
            .filter_map(|event| match event {
                FlightEvent::VideoFrame(frame) => Some(frame),
                _ => None,
            })
            .collect()
    }

    fn audio_frames(events: &[FlightEvent]) -> Vec<&DecodedFrame> {
        events
            .iter()
            .filter_map(|event| match event {
                FlightEvent::AudioFrame(frame) => Some(frame),
                _ => None,
            })
            .collect()
    }

    /// Three keyframes per second at 90 fps.
    fn keyed_body() -> String {
        let mut body = String::new();
        for _ in 0..3 {
            body.push('K');
            body.push_str(&"P".repeat(29));
        }
        body
    }

    fn restarts(events: &[FlightEvent]) -> usize {
        events
            .iter()
            .filter(|event| matches!(event, FlightEvent::PresentationRestart(_)))
            .count()
    }

    #[tokio::test]
    async fn start_commits_a_monotonic_timeline() {
        init_tracing();
        let mock = Arc::new(MockDownloader::new());
        serve_media(&mock, LIVE_URL, 3, "KPPP");
        let mut harness = Harness::new(mock.clone(), 4);

        let master = Arc::new(MasterPlaylist::new(url(LIVE_URL), Vec::new(), mock));
        harness.handle.start(master).await;
        settle().await;

        assert_eq!(harness.handle.state(), FlightState::Streaming);
        assert_eq!(harness.handle.current_height(), 0);

        let events = harness.drain();
        assert!(matches!(
            events.first(),
            Some(FlightEvent::PresentationRestart(PresentationTime::ZERO))
        ));
        assert_eq!(restarts(&events), 1);

        let frames = video_frames(&events);
        assert_eq!(frames.len(), 12);
        for (i, frame) in frames.iter().enumerate() {
            assert_eq!(frame.absolute_timestamp, Some(PresentationTime::new(i as i64, 4)));
        }
        assert!(frames[0].should_flush);
        assert!(!frames[1].should_flush);
        assert_eq!(frames[0].segment_end_time, 1.0);
        assert_eq!(frames[11].segment_end_time, 3.0);
        assert_eq!(harness.video_log.resets.load(Ordering::SeqCst), 1);
        harness.token.cancel();
    }

    #[tokio::test]
    async fn seek_lands_on_nearest_keyframe() {
        init_tracing();
        let mock = Arc::new(MockDownloader::new());
        serve_media(&mock, LIVE_URL, 6, &keyed_body());
        let mut harness = Harness::new(mock.clone(), 90);

        let master = Arc::new(MasterPlaylist::new(url(LIVE_URL), Vec::new(), mock));
        harness.handle.start(master).await;
        settle().await;
        harness.drain();

        harness.handle.seek_to(3.5).await;
        settle().await;

        let events = harness.drain();
        assert_eq!(restarts(&events), 1);
        assert!(matches!(events[0], FlightEvent::PresentationRestart(_)));

        let frames = video_frames(&events);
        assert_eq!(frames.len(), 60);
        assert!(frames[0].is_keyframe);
        assert!(frames[0].should_flush);
        assert_eq!(frames[0].absolute_timestamp, Some(PresentationTime::new(0, 90)));
        assert_eq!(frames[59].absolute_timestamp, Some(PresentationTime::new(59, 90)));
        assert!(frames.iter().all(|frame| frame.segment_end_time == 4.0));

        assert_eq!(harness.handle.state(), FlightState::Streaming);
        assert_eq!(harness.video_log.resets.load(Ordering::SeqCst), 2);

        // Only the init payload and the segment holding the target were decoded.
        let feeds = harness.video_log.feeds.lock().clone();
        let seek_feeds: Vec<_> = feeds.iter().rev().take(2).map(|(anchor, _)| *anchor).collect();
        assert_eq!(seek_feeds, vec![3.0, 0.0]);
        harness.token.cancel();
    }

    #[tokio::test]
    async fn audio_after_seek_starts_at_the_keyframe() {
        init_tracing();
        let mock = Arc::new(MockDownloader::new());
        serve_media(&mock, LIVE_URL, 6, &keyed_body());
        let (audio, _) = ScriptedDecoder::new(90);
        let mut harness = Harness::with_audio(mock.clone(), 90, audio);

        let master = Arc::new(MasterPlaylist::new(url(LIVE_URL), Vec::new(), mock));
        harness.handle.start(master).await;
        settle().await;
        assert_eq!(audio_frames(&harness.drain()).len(), 6 * 90);

        harness.handle.seek_to(3.5).await;
        settle().await;

        let events = harness.drain();
        assert_eq!(video_frames(&events).len(), 60);

        // The keyframe sits a third into segment 3, audio before it is not presented.
        let audio = audio_frames(&events);
        assert_eq!(audio.len(), 60);
        assert!(audio[0].should_flush);
        assert!(!audio[1].should_flush);
        assert_eq!(audio[0].absolute_timestamp, Some(PresentationTime::new(0, 90)));
        assert_eq!(audio[59].absolute_timestamp, Some(PresentationTime::new(59, 90)));
        assert!(audio.iter().all(|frame| frame.segment_end_time == 4.0));
        harness.token.cancel();
    }

    #[tokio::test]
    async fn newer_seek_supersedes_a_pending_one() {
        init_tracing();
        let mock = Arc::new(MockDownloader::new());
        serve_media(&mock, LIVE_URL, 20, "KPPP");
        let mut harness = Harness::new(mock.clone(), 4);

        let master = Arc::new(MasterPlaylist::new(url(LIVE_URL), Vec::new(), mock.clone()));
        harness.handle.start(master).await;
        settle().await;
        harness.drain();

        // Segment 15 lies beyond the start window and is held back.
        let held = url(LIVE_URL).join("s15.m4s").unwrap();
        mock.gate(&held);
        harness.handle.seek_to(15.5).await;
        settle().await;
        assert_eq!(harness.handle.state(), FlightState::Seeking);
        assert!(harness.drain().is_empty());

        harness.handle.seek_to(3.0).await;
        settle().await;
        mock.open(&held);
        settle().await;

        let events = harness.drain();
        assert_eq!(restarts(&events), 1);
        let frames = video_frames(&events);
        assert_eq!(frames.len(), 4);
        for (i, frame) in frames.iter().enumerate() {
            assert_eq!(frame.absolute_timestamp, Some(PresentationTime::new(i as i64, 4)));
            assert_eq!(frame.segment_end_time, 4.0);
        }
        assert_eq!(harness.handle.state(), FlightState::Streaming);

        let feeds = harness.video_log.feeds.lock().clone();
        assert!(feeds.iter().all(|(anchor, _)| *anchor != 15.0));
        harness.token.cancel();
    }

    #[tokio::test]
    async fn seek_outside_timeline_clears_request() {
        let mock = Arc::new(MockDownloader::new());
        serve_media(&mock, LIVE_URL, 2, "KPPP");
        let mut harness = Harness::new(mock.clone(), 4);

        let master = Arc::new(MasterPlaylist::new(url(LIVE_URL), Vec::new(), mock));
        harness.handle.start(master).await;
        settle().await;
        harness.drain();

        harness.handle.seek_to(50.0).await;
        settle().await;

        assert!(video_frames(&harness.drain()).is_empty());
        assert_eq!(harness.handle.state(), FlightState::Streaming);
        harness.token.cancel();
    }

    #[tokio::test]
    async fn activate_stream_picks_highest_quality_not_above_request() {
        let mock = Arc::new(MockDownloader::new());
        mock.insert(&url("https://cdn.example/master.m3u8"), None, MASTER);
        serve_media(&mock, "https://cdn.example/lo/index.m3u8", 2, "KP");
        serve_media(&mock, "https://cdn.example/hi/index.m3u8", 2, "KP");
        let harness = Harness::new(mock.clone(), 2);

        assert_eq!(harness.handle.activate_stream(720), None);

        let master = Arc::new(MasterPlaylist::new(
            url("https://cdn.example/master.m3u8"),
            Vec::new(),
            mock,
        ));
        harness.handle.start(master).await;
        settle().await;
        assert_eq!(harness.handle.current_height(), 360);

        assert_eq!(harness.handle.activate_stream(1000), Some(720));
        settle().await;
        assert_eq!(harness.handle.current_height(), 720);

        assert_eq!(harness.handle.activate_stream(500), Some(360));
        assert_eq!(harness.handle.activate_stream(0), Some(360));
        settle().await;
        assert_eq!(harness.handle.current_height(), 360);
        harness.token.cancel();
    }

    #[tokio::test]
    async fn superseded_events_are_ignored() {
        let mock = Arc::new(MockDownloader::new());
        let (video, _) = ScriptedDecoder::new(30);
        let codecs = CodecSet {
            demuxer: Arc::new(PassthroughDemuxer),
            video: Box::new(video),
            audio: Box::new(ScriptedDecoder::silent(44)),
        };
        let (tx, mut events) = mpsc::unbounded_channel();
        let (mut flight, _handle, _inbox) =
            PlaybackFlight::new(ProviderConfig::default(), mock, codecs, tx);

        let old = BatchId::next();
        flight.generation = Some(BatchId::next());
        let frame = DecodedFrame::new(Bytes::from_static(b"K"), true, 0.0);
        flight.on_video_event(DecoderEvent::frame(old, frame.clone()));
        flight.on_audio_event(DecoderEvent::frame(old, frame.clone()));
        assert!(events.try_recv().is_err());

        flight.on_video_event(DecoderEvent::frame(BatchId::next(), frame));
        assert!(matches!(
            events.try_recv(),
            Ok(FlightEvent::PresentationRestart(_))
        ));
        assert!(matches!(events.try_recv(), Ok(FlightEvent::VideoFrame(_))));
    }

    #[tokio::test]
    async fn preload_is_suspended_while_seeking() {
        let mock = Arc::new(MockDownloader::new());
        let (video, _) = ScriptedDecoder::new(30);
        let codecs = CodecSet {
            demuxer: Arc::new(PassthroughDemuxer),
            video: Box::new(video),
            audio: Box::new(ScriptedDecoder::silent(44)),
        };
        let (tx, _events) = mpsc::unbounded_channel();
        let (mut flight, _handle, _inbox) =
            PlaybackFlight::new(ProviderConfig::default(), mock.clone(), codecs, tx);

        let info = hls::parse_media(
            0,
            "#EXTINF:4,\na.ts\n#EXTINF:4,\nb.ts\n",
            &url(LIVE_URL),
        )
        .unwrap();
        flight.handle_command(Command::Bind {
            info: Arc::new(info),
            restart: false,
        });
        flight.seek = Some(SeekRequest::new(BatchId::next(), 1.0, 0.25));

        flight.handle_command(Command::PreloadMore { now: 0.0 });
        settle().await;
        assert!(mock.requests().is_empty());

        flight.seek = None;
        flight.handle_command(Command::PreloadMore { now: 0.0 });
        assert_eq!(flight.preload_timestamp, 8.0);
    }
}
