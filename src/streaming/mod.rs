//! Bidirectional voice session with the live inference service.
//!
//! One session runs per activation: `Idle → Connecting → Open → Closed`.
//! While open, microphone audio and downsampled video frames flow up, and
//! spoken replies flow down into the playback scheduler.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::audio::{AudioBackend, AudioPlaybackScheduler, AudioSource, PlaybackSink};
use crate::capture::CaptureSourceManager;
use crate::controller::status::LiveStatusHandle;
use crate::inference::{LiveChannel, LiveEvent, LiveTransport, Upstream, VOICE_PROMPT};

pub const OPEN_STATUS: &str = "VOICE LINK OPEN // LISTENING";
pub const RESPONDING_STATUS: &str = "VOICE LINK OPEN // RESPONDING";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamingPhase {
    Idle,
    Connecting,
    Open,
    Closed,
}

impl StreamingPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }

    pub fn connect(self) -> Result<Self, StreamingError> {
        match self {
            Self::Idle => Ok(Self::Connecting),
            from => Err(StreamingError::InvalidTransition {
                from,
                event: "connect",
            }),
        }
    }

    pub fn open(self) -> Result<Self, StreamingError> {
        match self {
            Self::Connecting => Ok(Self::Open),
            from => Err(StreamingError::InvalidTransition {
                from,
                event: "open",
            }),
        }
    }

    pub fn close(self) -> Result<Self, StreamingError> {
        match self {
            Self::Connecting | Self::Open => Ok(Self::Closed),
            from => Err(StreamingError::InvalidTransition {
                from,
                event: "close",
            }),
        }
    }
}

impl fmt::Display for StreamingPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum StreamingError {
    #[error("voice mode needs a live camera, not the simulation feed")]
    SyntheticSource,
    #[error("no capture source is active")]
    NoSource,
    #[error("invalid streaming transition: {event} while {from}")]
    InvalidTransition {
        from: StreamingPhase,
        event: &'static str,
    },
    #[error("live session transport failure: {0}")]
    Transport(String),
    #[error("audio device failure: {0}")]
    Audio(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    pub video_fps: f64,
    pub video_max_width: u32,
    pub audio_chunk_samples: usize,
    pub input_sample_rate: u32,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            video_fps: 2.0,
            video_max_width: 480,
            audio_chunk_samples: 4096,
            input_sample_rate: 16_000,
        }
    }
}

impl StreamingConfig {
    fn video_period(&self) -> Duration {
        let fps = if self.video_fps > 0.0 { self.video_fps } else { 2.0 };
        Duration::from_secs_f64(1.0 / fps)
    }
}

/// Why a session ended.
#[derive(Debug)]
pub enum SessionEnd {
    /// Stopped locally.
    Deactivated,
    RemoteClosed(Option<String>),
    Failed(StreamingError),
}

/// Resources held by one session, released together on teardown.
struct StreamingSession {
    phase: StreamingPhase,
    channel: Option<LiveChannel>,
    input: Option<Box<dyn AudioSource>>,
    sink: Option<Arc<dyn PlaybackSink>>,
    scheduler: Option<AudioPlaybackScheduler>,
    forwarders: Vec<JoinHandle<()>>,
    forwarders_cancel: CancellationToken,
}

impl StreamingSession {
    fn new() -> Self {
        Self {
            phase: StreamingPhase::Idle,
            channel: None,
            input: None,
            sink: None,
            scheduler: None,
            forwarders: Vec::new(),
            forwarders_cancel: CancellationToken::new(),
        }
    }
}

pub struct StreamingSessionManager {
    config: StreamingConfig,
    transport: Arc<dyn LiveTransport>,
    audio: Arc<dyn AudioBackend>,
    capture: Arc<Mutex<CaptureSourceManager>>,
    status: LiveStatusHandle,
}

impl StreamingSessionManager {
    pub fn new(
        config: StreamingConfig,
        transport: Arc<dyn LiveTransport>,
        audio: Arc<dyn AudioBackend>,
        capture: Arc<Mutex<CaptureSourceManager>>,
        status: LiveStatusHandle,
    ) -> Self {
        Self {
            config,
            transport,
            audio,
            capture,
            status,
        }
    }

    /// Voice mode is only available on a physical camera.
    pub async fn check_activation(&self) -> Result<(), StreamingError> {
        let capture = self.capture.lock().await;
        match capture.source() {
            None => Err(StreamingError::NoSource),
            Some(source) if source.is_synthetic() => Err(StreamingError::SyntheticSource),
            Some(_) => Ok(()),
        }
    }

    /// Run one session until it is cancelled, closed remotely, or fails.
    /// Every resource the session acquired is released before returning.
    pub async fn run_session(&self, cancel: CancellationToken) -> SessionEnd {
        let mut session = StreamingSession::new();
        let end = self.drive(&mut session, &cancel).await;
        self.teardown(&mut session).await;

        match &end {
            SessionEnd::Deactivated => info!("Voice session closed locally"),
            SessionEnd::RemoteClosed(reason) => info!("Voice session closed remotely: {:?}", reason),
            SessionEnd::Failed(e) => error!("Voice session failed: {}", e),
        }
        end
    }

    async fn transition(
        &self,
        session: &mut StreamingSession,
        step: fn(StreamingPhase) -> Result<StreamingPhase, StreamingError>,
    ) -> Result<(), StreamingError> {
        session.phase = step(session.phase)?;
        debug!("Streaming phase: {}", session.phase);
        self.status.set_streaming_phase(session.phase).await;
        Ok(())
    }

    async fn drive(&self, session: &mut StreamingSession, cancel: &CancellationToken) -> SessionEnd {
        if let Err(e) = self.transition(session, StreamingPhase::connect).await {
            return SessionEnd::Failed(e);
        }

        let connected = tokio::select! {
            biased;
            _ = cancel.cancelled() => return SessionEnd::Deactivated,
            connected = self.transport.connect(VOICE_PROMPT) => connected,
        };
        let channel = match connected {
            Ok(channel) => session.channel.insert(channel),
            Err(e) => return SessionEnd::Failed(StreamingError::Transport(e.to_string())),
        };

        // Wait for the service to acknowledge setup.
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => return SessionEnd::Deactivated,
                event = channel.recv() => event,
            };
            match event {
                Some(LiveEvent::Opened) => break,
                Some(LiveEvent::Closed(reason)) => return SessionEnd::RemoteClosed(reason),
                Some(LiveEvent::Error(e)) => {
                    return SessionEnd::Failed(StreamingError::Transport(e))
                }
                None => return SessionEnd::RemoteClosed(None),
                Some(other) => debug!("Ignoring {:?} before setup completed", other),
            }
        }

        if let Err(e) = self.transition(session, StreamingPhase::open).await {
            return SessionEnd::Failed(e);
        }
        self.status.set_status_text(OPEN_STATUS).await;
        info!("Voice session open");

        if let Err(e) = self.start_media(session).await {
            return SessionEnd::Failed(e);
        }

        let (Some(channel), Some(scheduler)) = (session.channel.as_mut(), session.scheduler.as_mut())
        else {
            return SessionEnd::Failed(StreamingError::Transport(
                "session resources missing".to_string(),
            ));
        };

        let mut responding = false;
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => return SessionEnd::Deactivated,
                event = channel.recv() => event,
            };
            match event {
                Some(LiveEvent::Audio {
                    samples,
                    sample_rate,
                }) => {
                    if !responding {
                        responding = true;
                        self.status.set_status_text(RESPONDING_STATUS).await;
                    }
                    let segment = scheduler.segment(samples, sample_rate);
                    scheduler.enqueue(segment);
                }
                Some(LiveEvent::TurnComplete) => {
                    debug!("Model turn complete");
                    responding = false;
                    self.status.set_status_text(OPEN_STATUS).await;
                }
                Some(LiveEvent::Text(text)) => info!("Live session says: {}", text),
                Some(LiveEvent::Opened) => {}
                Some(LiveEvent::Closed(reason)) => return SessionEnd::RemoteClosed(reason),
                Some(LiveEvent::Error(e)) => {
                    return SessionEnd::Failed(StreamingError::Transport(e))
                }
                None => return SessionEnd::RemoteClosed(None),
            }
        }
    }

    /// Open speaker and microphone and start the upstream forwarders.
    /// Device calls run on the blocking pool.
    async fn start_media(&self, session: &mut StreamingSession) -> Result<(), StreamingError> {
        let Some(channel) = session.channel.as_ref() else {
            return Err(StreamingError::Transport("no live channel".to_string()));
        };
        let upstream = channel.sender();

        let audio = Arc::clone(&self.audio);
        let sink = tokio::task::spawn_blocking(move || audio.open_output())
            .await
            .map_err(|e| StreamingError::Audio(e.to_string()))?
            .map_err(|e| StreamingError::Audio(e.to_string()))?;
        session.scheduler = Some(AudioPlaybackScheduler::new(Arc::clone(&sink)));
        session.sink = Some(sink);

        let audio = Arc::clone(&self.audio);
        let (sample_rate, chunk_samples) =
            (self.config.input_sample_rate, self.config.audio_chunk_samples);
        let (chunk_tx, chunk_rx) = mpsc::channel(32);
        let input = tokio::task::spawn_blocking(move || -> anyhow::Result<Box<dyn AudioSource>> {
            let mut input = audio.open_input(sample_rate, chunk_samples)?;
            input.start(chunk_tx)?;
            Ok(input)
        })
        .await
        .map_err(|e| StreamingError::Audio(e.to_string()))?
        .map_err(|e| StreamingError::Audio(e.to_string()))?;
        let input_rate = input.sample_rate();
        session.input = Some(input);

        session.forwarders.push(tokio::spawn(forward_audio(
            chunk_rx,
            upstream.clone(),
            input_rate,
            session.forwarders_cancel.child_token(),
        )));
        session.forwarders.push(tokio::spawn(forward_video(
            Arc::clone(&self.capture),
            upstream,
            self.config.video_period(),
            self.config.video_max_width,
            session.forwarders_cancel.child_token(),
        )));

        Ok(())
    }

    async fn teardown(&self, session: &mut StreamingSession) {
        session.forwarders_cancel.cancel();
        for task in session.forwarders.drain(..) {
            if let Err(e) = task.await {
                if e.is_panic() {
                    warn!("Streaming forwarder panicked: {}", e);
                }
            }
        }

        if let Some(mut scheduler) = session.scheduler.take() {
            scheduler.halt();
        }
        let input = session.input.take();
        let sink = session.sink.take();
        if input.is_some() || sink.is_some() {
            let released = tokio::task::spawn_blocking(move || {
                if let Some(mut input) = input {
                    input.stop();
                }
                if let Some(sink) = sink {
                    sink.close();
                }
            })
            .await;
            if let Err(e) = released {
                warn!("Releasing audio devices failed: {}", e);
            }
        }
        if let Some(mut channel) = session.channel.take() {
            channel.shutdown().await;
        }

        session.phase = match session.phase.close() {
            Ok(phase) => phase,
            Err(e) => {
                debug!("{}", e);
                StreamingPhase::Closed
            }
        };
        self.status.set_streaming_phase(session.phase).await;
    }
}

async fn forward_audio(
    mut chunks: mpsc::Receiver<Vec<i16>>,
    upstream: mpsc::Sender<Upstream>,
    sample_rate: u32,
    cancel: CancellationToken,
) {
    loop {
        let chunk = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            chunk = chunks.recv() => chunk,
        };
        let Some(pcm16) = chunk else {
            break;
        };
        if !send_upstream(&upstream, Upstream::Audio { pcm16, sample_rate }, &cancel).await {
            break;
        }
    }
    debug!("Audio forwarder stopped");
}

async fn forward_video(
    capture: Arc<Mutex<CaptureSourceManager>>,
    upstream: mpsc::Sender<Upstream>,
    period: Duration,
    max_width: u32,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let frame = {
            let mut capture = capture.lock().await;
            capture.snapshot().await
        };
        let Some(frame) = frame else {
            continue;
        };
        let frame = match frame.downsample(max_width) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("Skipping video frame: {}", e);
                continue;
            }
        };
        if !send_upstream(&upstream, Upstream::Video(frame), &cancel).await {
            break;
        }
    }
    debug!("Video forwarder stopped");
}

/// Send unless cancelled first. `false` when the forwarder should stop.
async fn send_upstream(
    upstream: &mpsc::Sender<Upstream>,
    item: Upstream,
    cancel: &CancellationToken,
) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        sent = upstream.send(item) => sent.is_ok(),
    }
}
