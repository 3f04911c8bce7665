// Playback Manager: host-facing API wiring the flight to the delivery buffer and sinks.

use crate::codec::{MediaKind, PresentationTime};
use crate::config::GlideConfig;
use crate::delivery::{FrameDeliveryBuffer, RenderSink};
use crate::downloader::ContentDownloader;
use crate::error::{GlideError, Result};
use crate::flight::{CodecSet, FlightEvent, FlightHandle, PlaybackFlight};
use crate::playlist::MasterPlaylist;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

#[derive(Default, Clone)]
struct Sinks {
    video: Option<Arc<dyn RenderSink>>,
    audio: Option<Arc<dyn RenderSink>>,
}

pub struct PlaybackManager {
    config: GlideConfig,
    downloader: Arc<dyn ContentDownloader>,
    flight: FlightHandle,
    buffer: Arc<FrameDeliveryBuffer>,
    sinks: Arc<RwLock<Sinks>>,
    token: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    tick: Mutex<Option<JoinHandle<()>>>,
}

impl PlaybackManager {
    /// Spawns the flight and its event pump; must be called inside a tokio runtime.
    pub fn new(
        config: GlideConfig,
        downloader: Arc<dyn ContentDownloader>,
        codecs: CodecSet,
    ) -> Result<Self> {
        config.validate()?;

        let token = CancellationToken::new();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (flight, flight_task) = PlaybackFlight::spawn(
            config.provider.clone(),
            downloader.clone(),
            codecs,
            events_tx,
            token.child_token(),
        );

        let buffer = Arc::new(FrameDeliveryBuffer::new());
        let sinks = Arc::new(RwLock::new(Sinks::default()));
        let pump = tokio::spawn(pump_events(
            events_rx,
            buffer.clone(),
            sinks.clone(),
            token.child_token(),
        ));

        Ok(Self {
            config,
            downloader,
            flight,
            buffer,
            sinks,
            token,
            tasks: Mutex::new(vec![flight_task, pump]),
            tick: Mutex::new(None),
        })
    }

    pub fn bind_sinks(&self, video: Arc<dyn RenderSink>, audio: Option<Arc<dyn RenderSink>>) {
        let mut sinks = self.sinks.write();
        sinks.video = Some(video);
        sinks.audio = audio;
    }

    /// Resolves the manifest at `url`, starts streaming and the delivery tick.
    pub async fn play(&self, url: &str) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(GlideError::Cancelled);
        }
        let url = Url::parse(url).map_err(|e| GlideError::invalid_url(url, e.to_string()))?;
        info!(url = %url, "Starting playback");

        let master = Arc::new(MasterPlaylist::new(
            url,
            self.config.playback.supported_codecs.clone(),
            self.downloader.clone(),
        ));
        self.buffer.clear();
        self.flight.start(master).await;
        self.ensure_tick();
        Ok(())
    }

    fn ensure_tick(&self) {
        let mut tick = self.tick.lock();
        if tick.is_some() {
            return;
        }

        let period = self.config.playback.tick_interval;
        let flight = self.flight.clone();
        let buffer = self.buffer.clone();
        let sinks = self.sinks.clone();
        let token = self.token.child_token();

        *tick = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        flight.preload_more(buffer.preload_watermark());
                        let sinks = sinks.read().clone();
                        buffer.drain(sinks.video.as_deref(), sinks.audio.as_deref());
                    }
                }
            }
            debug!("Delivery tick stopped");
        }));
    }

    pub async fn seek_to(&self, timestamp: f64) {
        self.flight.seek_to(timestamp).await;
    }

    /// Selects the highest quality not above `height`; `None` picks the lowest.
    pub fn set_quality(&self, height: Option<u32>) -> Option<u32> {
        self.flight.activate_stream(height.unwrap_or(0))
    }

    pub fn set_speed(&self, rate: f64) {
        let sinks = self.sinks.read();
        for sink in [&sinks.video, &sinks.audio].into_iter().flatten() {
            sink.set_rate(rate);
        }
    }

    pub fn set_volume(&self, level: f32) {
        if let Some(audio) = &self.sinks.read().audio {
            audio.set_volume(level);
        }
    }

    /// Qualities of the resolved media playlists, lowest first.
    pub fn available_qualities(&self) -> Vec<u32> {
        self.flight
            .master()
            .map(|master| {
                master
                    .available_media_playlists()
                    .iter()
                    .map(|info| info.quality)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn current_height(&self) -> u32 {
        self.flight.current_height()
    }

    /// Playback position in seconds.
    pub fn current_timestamp(&self) -> f64 {
        self.buffer.current_timestamp()
    }

    /// Stops the tick, the flight and all downloads.
    pub async fn stop(&self) {
        self.token.cancel();
        let tick = self.tick.lock().take();
        let tasks: Vec<_> = self.tasks.lock().drain(..).chain(tick).collect();
        futures::future::join_all(tasks).await;
        self.buffer.clear();
        info!("Playback stopped");
    }
}

impl Drop for PlaybackManager {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Routes flight output into the delivery buffer; restarts rebase the video sink.
async fn pump_events(
    mut events: mpsc::UnboundedReceiver<FlightEvent>,
    buffer: Arc<FrameDeliveryBuffer>,
    sinks: Arc<RwLock<Sinks>>,
    token: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        match event {
            FlightEvent::PresentationRestart(at) => restart_presentation(&sinks, at),
            FlightEvent::VideoFrame(frame) => buffer.enqueue(MediaKind::Video, frame),
            FlightEvent::AudioFrame(frame) => buffer.enqueue(MediaKind::Audio, frame),
        }
    }
}

fn restart_presentation(sinks: &RwLock<Sinks>, at: PresentationTime) {
    debug!(at = at.as_secs_f64(), "Presentation restart");
    if let Some(video) = &sinks.read().video {
        video.flush();
        video.restart_timebase(at);
    }
}
