//! Live status types and shared state handle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::capture::Facing;
use crate::streaming::StreamingPhase;

pub const INITIAL_STATUS: &str = "INITIALIZING LINK...";
pub const SIMULATION_STATUS: &str = "SIMULATION ACTIVE // SCANNING SYNTHETIC FEED";
pub const SIGNAL_LOST_STATUS: &str = "SIGNAL LOST";

/// What the operator is looking at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LiveMode {
    LiveFeed,
    Simulation,
    VoiceStreaming,
}

impl LiveMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LiveFeed => "live-feed",
            Self::Simulation => "simulation",
            Self::VoiceStreaming => "voice-streaming",
        }
    }
}

/// Everything the operator surface shows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveStatus {
    pub mode: LiveMode,
    pub is_busy: bool,
    pub is_danger: bool,
    pub status_text: String,
    pub facing: Option<Facing>,
    pub audio_enabled: bool,
    pub has_multiple_cameras: bool,
    pub poll_delay_ms: u64,
    pub streaming_phase: StreamingPhase,
    pub last_error: Option<String>,
    pub last_analysis_at: Option<DateTime<Utc>>,
}

impl Default for LiveStatus {
    fn default() -> Self {
        Self {
            mode: LiveMode::LiveFeed,
            is_busy: false,
            is_danger: false,
            status_text: INITIAL_STATUS.to_string(),
            facing: None,
            audio_enabled: true,
            has_multiple_cameras: false,
            poll_delay_ms: 6000,
            streaming_phase: StreamingPhase::Idle,
            last_error: None,
            last_analysis_at: None,
        }
    }
}

/// Thread-safe handle for sharing live status between the loop and API handlers.
#[derive(Clone, Default)]
pub struct LiveStatusHandle {
    inner: Arc<Mutex<LiveStatus>>,
}

impl LiveStatusHandle {
    pub fn new(initial: LiveStatus) -> Self {
        Self {
            inner: Arc::new(Mutex::new(initial)),
        }
    }

    pub async fn get(&self) -> LiveStatus {
        self.inner.lock().await.clone()
    }

    pub async fn set_mode(&self, mode: LiveMode) {
        self.inner.lock().await.mode = mode;
    }

    pub async fn set_busy(&self, busy: bool) {
        self.inner.lock().await.is_busy = busy;
    }

    /// Record an analysis verdict.
    pub async fn set_alert(&self, is_danger: bool, status_text: impl Into<String>) {
        let mut status = self.inner.lock().await;
        status.is_danger = is_danger;
        status.status_text = status_text.into();
        status.last_analysis_at = Some(Utc::now());
    }

    pub async fn set_status_text(&self, status_text: impl Into<String>) {
        self.inner.lock().await.status_text = status_text.into();
    }

    pub async fn set_facing(&self, facing: Option<Facing>) {
        self.inner.lock().await.facing = facing;
    }

    pub async fn audio_enabled(&self) -> bool {
        self.inner.lock().await.audio_enabled
    }

    /// Flip the mute flag and return the new value.
    pub async fn toggle_audio(&self) -> bool {
        let mut status = self.inner.lock().await;
        status.audio_enabled = !status.audio_enabled;
        status.audio_enabled
    }

    pub async fn set_has_multiple_cameras(&self, multiple: bool) {
        self.inner.lock().await.has_multiple_cameras = multiple;
    }

    pub async fn set_poll_delay(&self, delay_ms: u64) {
        self.inner.lock().await.poll_delay_ms = delay_ms;
    }

    pub async fn set_streaming_phase(&self, phase: StreamingPhase) {
        self.inner.lock().await.streaming_phase = phase;
    }

    /// Enter the recoverable signal-lost state.
    pub async fn set_error(&self, error: impl Into<String>) {
        let mut status = self.inner.lock().await;
        status.last_error = Some(error.into());
        status.status_text = SIGNAL_LOST_STATUS.to_string();
        status.is_busy = false;
        status.is_danger = false;
    }

    pub async fn clear_error(&self) {
        self.inner.lock().await.last_error = None;
    }
}
