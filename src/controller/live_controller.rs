use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, info, warn};

use super::status::{LiveMode, LiveStatusHandle, INITIAL_STATUS, SIMULATION_STATUS};
use crate::alerts::AlertDispatcher;
use crate::capture::{CaptureError, CaptureSourceManager, Facing};
use crate::inference::InferenceClient;
use crate::lease::{CaptureLease, LeaseHolder};
use crate::polling::{AdaptivePollingScheduler, PollingConfig};
use crate::streaming::{SessionEnd, StreamingError, StreamingSessionManager};

pub const VOICE_CLOSED_STATUS: &str = "VOICE LINK CLOSED // POLLING RESUMED";
pub const VOICE_FAILED_STATUS: &str = "VOICE LINK FAILED // POLLING RESUMED";

/// Operator actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveCommand {
    SwitchCamera,
    ToggleAudio,
    ToggleVoice,
    ForceSimulation,
    SimulateDisconnect,
    RetryLive,
}

impl LiveCommand {
    pub const ALL: [LiveCommand; 6] = [
        LiveCommand::SwitchCamera,
        LiveCommand::ToggleAudio,
        LiveCommand::ToggleVoice,
        LiveCommand::ForceSimulation,
        LiveCommand::SimulateDisconnect,
        LiveCommand::RetryLive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SwitchCamera => "switch-camera",
            Self::ToggleAudio => "toggle-audio",
            Self::ToggleVoice => "toggle-voice",
            Self::ForceSimulation => "force-simulation",
            Self::SimulateDisconnect => "simulate-disconnect",
            Self::RetryLive => "retry-live",
        }
    }
}

impl FromStr for LiveCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|command| command.as_str() == normalized)
            .ok_or_else(|| format!("Unknown command: {s}"))
    }
}

/// Everything the controller's event loop reacts to.
#[derive(Debug)]
pub enum ControllerEvent {
    Command {
        command: LiveCommand,
        reply: Option<oneshot::Sender<Result<(), String>>>,
    },
    /// A streaming session ended on its own.
    StreamingEnded { generation: u64, end: SessionEnd },
    Shutdown,
}

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("{0}")]
    Rejected(String),
    #[error("Camera Error: {0}")]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Streaming(#[from] StreamingError),
}

/// Sends commands to a running controller.
#[derive(Clone)]
pub struct ControllerHandle {
    events: mpsc::Sender<ControllerEvent>,
}

impl From<mpsc::Sender<ControllerEvent>> for ControllerHandle {
    fn from(events: mpsc::Sender<ControllerEvent>) -> Self {
        Self { events }
    }
}

impl ControllerHandle {
    pub async fn command(&self, command: LiveCommand) -> Result<(), String> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.events
            .send(ControllerEvent::Command {
                command,
                reply: Some(reply_tx),
            })
            .await
            .map_err(|_| "Live controller is not running".to_string())?;
        reply_rx
            .await
            .map_err(|_| "Live controller dropped the command".to_string())?
    }

    pub async fn shutdown(&self) {
        let _ = self.events.send(ControllerEvent::Shutdown).await;
    }
}

/// The collaborators a controller drives.
pub struct LiveComponents {
    pub capture: Arc<Mutex<CaptureSourceManager>>,
    pub inference: Arc<dyn InferenceClient>,
    pub alerts: Arc<AlertDispatcher>,
    pub streaming: Arc<StreamingSessionManager>,
    pub status: LiveStatusHandle,
}

#[derive(Debug, Clone, Default)]
pub struct ControllerOptions {
    pub preferred_facing: Option<Facing>,
    pub force_simulation: bool,
    pub polling: PollingConfig,
}

/// Owns the live state and decides which consumer holds the capture source.
pub struct LiveController {
    capture: Arc<Mutex<CaptureSourceManager>>,
    inference: Arc<dyn InferenceClient>,
    alerts: Arc<AlertDispatcher>,
    streaming: Arc<StreamingSessionManager>,
    status: LiveStatusHandle,
    lease: CaptureLease,
    options: ControllerOptions,
    events: mpsc::Sender<ControllerEvent>,
}

impl LiveController {
    pub fn new(
        components: LiveComponents,
        options: ControllerOptions,
    ) -> (Self, mpsc::Receiver<ControllerEvent>) {
        let (events, rx) = mpsc::channel(32);
        let controller = Self {
            capture: components.capture,
            inference: components.inference,
            alerts: components.alerts,
            streaming: components.streaming,
            status: components.status,
            lease: CaptureLease::new(),
            options,
            events,
        };
        (controller, rx)
    }

    pub fn handle(&self) -> ControllerHandle {
        ControllerHandle {
            events: self.events.clone(),
        }
    }

    pub fn status(&self) -> &LiveStatusHandle {
        &self.status
    }

    pub fn lease_holder(&self) -> Option<LeaseHolder> {
        self.lease.holder()
    }

    /// Bring up the initial source and start polling.
    pub async fn start(&mut self) -> Result<(), ControlError> {
        if self.options.force_simulation {
            info!("Simulation forced by configuration");
            self.force_simulation().await;
            return Ok(());
        }
        self.start_live(self.options.preferred_facing).await
    }

    /// Acquire a source (device first, simulation as fallback) and poll it.
    pub async fn start_live(&mut self, facing: Option<Facing>) -> Result<(), ControlError> {
        self.lease.revoke().await;
        self.status.set_status_text(INITIAL_STATUS).await;

        let acquired = {
            let mut capture = self.capture.lock().await;
            let result = capture.acquire(facing).await;
            if result.is_ok() {
                self.options.preferred_facing = capture.preferred_facing();
            }
            result
        };

        match acquired {
            Ok(_) => {
                self.status.clear_error().await;
                self.publish_source().await;
                self.start_polling().await;
                Ok(())
            }
            Err(e) => {
                let e = ControlError::from(e);
                error!("Live feed unavailable: {}", e);
                self.status.set_mode(LiveMode::LiveFeed).await;
                self.status.set_error(e.to_string()).await;
                Err(e)
            }
        }
    }

    pub async fn start_polling(&mut self) {
        let scheduler = AdaptivePollingScheduler::new(
            &self.options.polling,
            Arc::clone(&self.capture),
            Arc::clone(&self.inference),
            Arc::clone(&self.alerts),
            self.status.clone(),
        );
        self.lease
            .grant(LeaseHolder::Polling, move |token, _| {
                tokio::spawn(scheduler.run(token))
            })
            .await;
    }

    pub async fn force_simulation(&mut self) {
        self.lease.revoke().await;
        self.capture.lock().await.force_synthetic();
        self.status.clear_error().await;
        self.publish_source().await;
        self.start_polling().await;
    }

    pub async fn switch_camera(&mut self) -> Result<(), ControlError> {
        if self.lease.holder() == Some(LeaseHolder::Streaming) {
            return Err(ControlError::Rejected(
                "Cannot switch cameras during a voice session".to_string(),
            ));
        }

        let current = {
            let capture = self.capture.lock().await;
            if capture.is_synthetic() {
                return Err(ControlError::Rejected(
                    "Cannot switch cameras in simulation".to_string(),
                ));
            }
            if !capture.has_multiple_devices() {
                return Err(ControlError::Rejected(
                    "Only one camera is available".to_string(),
                ));
            }
            capture
                .source()
                .and_then(|source| source.facing())
                .or(capture.preferred_facing())
        };

        // Unknown facing counts as rear.
        let next = current.map_or(Facing::Front, Facing::toggled);
        info!("Switching camera to {}", next.as_str());
        self.start_live(Some(next)).await
    }

    pub async fn toggle_audio(&mut self) -> bool {
        let enabled = self.status.toggle_audio().await;
        info!("Spoken alerts {}", if enabled { "enabled" } else { "muted" });
        enabled
    }

    pub async fn toggle_voice_mode(&mut self) -> Result<(), ControlError> {
        if self.lease.holder() == Some(LeaseHolder::Streaming) {
            info!("Leaving voice mode");
            self.lease.revoke().await;
            self.resume_polling(VOICE_CLOSED_STATUS).await;
            return Ok(());
        }
        self.activate_streaming().await
    }

    async fn activate_streaming(&mut self) -> Result<(), ControlError> {
        self.streaming.check_activation().await?;
        info!("Entering voice mode");

        self.status.set_mode(LiveMode::VoiceStreaming).await;
        self.status.set_busy(false).await;

        let manager = Arc::clone(&self.streaming);
        let events = self.events.clone();
        self.lease
            .grant(LeaseHolder::Streaming, move |token, generation| {
                tokio::spawn(async move {
                    let end = manager.run_session(token.clone()).await;
                    // A revoked session is already accounted for by whoever revoked it.
                    if !token.is_cancelled() {
                        let _ = events
                            .send(ControllerEvent::StreamingEnded { generation, end })
                            .await;
                    }
                })
            })
            .await;
        Ok(())
    }

    /// React to a session that ended without being revoked.
    pub async fn handle_streaming_ended(&mut self, generation: u64, end: SessionEnd) {
        if self.lease.holder() != Some(LeaseHolder::Streaming)
            || self.lease.generation() != Some(generation)
        {
            debug!("Ignoring end of stale voice session {}", generation);
            return;
        }

        self.lease.revoke().await;
        let status_text = match &end {
            SessionEnd::Failed(e) => {
                warn!("Voice session failed, resuming polling: {}", e);
                VOICE_FAILED_STATUS
            }
            _ => VOICE_CLOSED_STATUS,
        };
        self.resume_polling(status_text).await;
    }

    async fn resume_polling(&mut self, status_text: &str) {
        self.publish_source().await;
        self.status.set_status_text(status_text).await;
        self.start_polling().await;
    }

    /// Drill: behave as if the camera link dropped.
    pub async fn simulate_disconnect(&mut self) {
        warn!("Simulating camera disconnect");
        self.lease.revoke().await;
        self.capture.lock().await.release();

        let failure = ControlError::from(CaptureError::Transport(
            "link dropped (simulated)".to_string(),
        ));
        self.status.set_mode(LiveMode::LiveFeed).await;
        self.status.set_error(failure.to_string()).await;
    }

    pub async fn retry_live(&mut self) -> Result<(), ControlError> {
        info!("Retrying live feed");
        self.start_live(self.options.preferred_facing).await
    }

    pub async fn handle_command(&mut self, command: LiveCommand) -> Result<(), ControlError> {
        debug!("Handling command {}", command.as_str());
        match command {
            LiveCommand::SwitchCamera => self.switch_camera().await,
            LiveCommand::ToggleAudio => {
                self.toggle_audio().await;
                Ok(())
            }
            LiveCommand::ToggleVoice => self.toggle_voice_mode().await,
            LiveCommand::ForceSimulation => {
                self.force_simulation().await;
                Ok(())
            }
            LiveCommand::SimulateDisconnect => {
                self.simulate_disconnect().await;
                Ok(())
            }
            LiveCommand::RetryLive => self.retry_live().await,
        }
    }

    /// Process one event. Returns `false` once the loop should stop.
    pub async fn handle_event(&mut self, event: ControllerEvent) -> bool {
        match event {
            ControllerEvent::Command { command, reply } => {
                let result = self.handle_command(command).await;
                if let Err(e) = &result {
                    warn!("Command {} failed: {}", command.as_str(), e);
                }
                if let Some(reply) = reply {
                    let _ = reply.send(result.map_err(|e| e.to_string()));
                }
                true
            }
            ControllerEvent::StreamingEnded { generation, end } => {
                self.handle_streaming_ended(generation, end).await;
                true
            }
            ControllerEvent::Shutdown => false,
        }
    }

    pub async fn run(mut self, mut events: mpsc::Receiver<ControllerEvent>) {
        while let Some(event) = events.recv().await {
            if !self.handle_event(event).await {
                break;
            }
        }
        self.shutdown().await;
    }

    pub async fn shutdown(&mut self) {
        info!("Shutting down live controller");
        self.lease.revoke().await;
        self.capture.lock().await.release();
    }

    /// Mirror the capture manager's state into the status.
    async fn publish_source(&self) {
        let (synthetic, facing, multiple) = {
            let capture = self.capture.lock().await;
            (
                capture.is_synthetic(),
                capture
                    .source()
                    .and_then(|source| source.facing())
                    .or(capture.preferred_facing()),
                capture.has_multiple_devices(),
            )
        };

        if synthetic {
            self.status.set_mode(LiveMode::Simulation).await;
            self.status.set_facing(None).await;
            self.status.set_has_multiple_cameras(false).await;
            self.status.set_status_text(SIMULATION_STATUS).await;
        } else {
            self.status.set_mode(LiveMode::LiveFeed).await;
            self.status.set_facing(facing).await;
            self.status.set_has_multiple_cameras(multiple).await;
        }
    }
}
