//! Turns analysis verdicts into status updates and spoken alerts.

pub mod speech;

use async_trait::async_trait;
use regex::Regex;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::controller::status::LiveStatusHandle;

pub use speech::{CommandSpeech, SilentSpeech};

pub const RATE_LIMIT_STATUS: &str = "SYSTEM COOLDOWN // RETRYING...";

/// Outcome of one analysis cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisResult {
    Text(String),
    RateLimited,
}

/// Last verdict shown and spoken.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlertState {
    pub is_danger: bool,
    pub status_text: String,
    pub last_spoken_text: Option<String>,
}

/// What a dispatch did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Cooldown,
    Safe,
    Danger { spoken: Option<String> },
}

/// Text-to-speech output.
#[async_trait]
pub trait SpeechOutput: Send + Sync {
    async fn speak(&self, text: &str) -> anyhow::Result<()>;

    fn is_speaking(&self) -> bool;
}

/// Case-insensitive "SAFE" anywhere in the text. Empty text counts as safe.
pub fn is_safe(text: &str) -> bool {
    let trimmed = text.trim();
    trimmed.is_empty() || trimmed.to_uppercase().contains("SAFE")
}

pub struct AlertDispatcher {
    speech: Arc<dyn SpeechOutput>,
    status: LiveStatusHandle,
    state: Mutex<AlertState>,
    prefix_regex: Regex,
}

impl AlertDispatcher {
    pub fn new(speech: Arc<dyn SpeechOutput>, status: LiveStatusHandle) -> anyhow::Result<Self> {
        // Matches a leading "ALERT:" in any case
        let prefix_regex = Regex::new(r"(?i)^\s*ALERT:")?;

        Ok(Self {
            speech,
            status,
            state: Mutex::new(AlertState::default()),
            prefix_regex,
        })
    }

    /// The words to speak for a danger verdict.
    pub fn spoken_text(&self, text: &str) -> String {
        self.prefix_regex.replace(text, "").trim().to_string()
    }

    pub async fn state(&self) -> AlertState {
        self.state.lock().await.clone()
    }

    pub async fn dispatch(&self, result: AnalysisResult) -> DispatchOutcome {
        let text = match result {
            AnalysisResult::RateLimited => {
                debug!("Inference cooling down");
                self.record(false, RATE_LIMIT_STATUS.to_string(), None).await;
                return DispatchOutcome::Cooldown;
            }
            AnalysisResult::Text(text) => text,
        };

        if is_safe(&text) {
            let shown = if text.trim().is_empty() {
                "SAFE".to_string()
            } else {
                text.trim().to_string()
            };
            self.record(false, shown, None).await;
            return DispatchOutcome::Safe;
        }

        let shown = text.trim().to_string();
        info!("Danger reported: {}", shown);

        // Mute is read now, not when the request went out.
        let spoken = if !self.status.audio_enabled().await {
            debug!("Audio muted, not speaking alert");
            None
        } else if self.speech.is_speaking() {
            debug!("Speech already in progress, skipping alert");
            None
        } else {
            let phrase = self.spoken_text(&shown);
            match self.speech.speak(&phrase).await {
                Ok(()) => Some(phrase),
                Err(e) => {
                    warn!("Failed to speak alert: {}", e);
                    None
                }
            }
        };

        self.record(true, shown, spoken.clone()).await;
        DispatchOutcome::Danger { spoken }
    }

    async fn record(&self, is_danger: bool, status_text: String, spoken: Option<String>) {
        self.status.set_alert(is_danger, status_text.clone()).await;

        let mut state = self.state.lock().await;
        state.is_danger = is_danger;
        state.status_text = status_text;
        if spoken.is_some() {
            state.last_spoken_text = spoken;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct RecordingSpeech {
        speaking: AtomicBool,
        spoken: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SpeechOutput for RecordingSpeech {
        async fn speak(&self, text: &str) -> anyhow::Result<()> {
            self.spoken.lock().unwrap().push(text.to_string());
            Ok(())
        }

        fn is_speaking(&self) -> bool {
            self.speaking.load(Ordering::SeqCst)
        }
    }

    fn dispatcher() -> (Arc<RecordingSpeech>, LiveStatusHandle, AlertDispatcher) {
        let speech = Arc::new(RecordingSpeech::default());
        let status = LiveStatusHandle::default();
        let dispatcher = AlertDispatcher::new(speech.clone(), status.clone()).unwrap();
        (speech, status, dispatcher)
    }

    #[test]
    fn test_is_safe() {
        assert!(is_safe("SAFE"));
        assert!(is_safe("area looks safe"));
        assert!(is_safe("UNSAFE STRUCTURE"));
        assert!(is_safe("   "));
        assert!(!is_safe("ALERT: FIRE DETECTED"));
    }

    #[test]
    fn test_spoken_text_strips_prefix() {
        let (_, _, dispatcher) = dispatcher();
        assert_eq!(dispatcher.spoken_text("ALERT: FIRE DETECTED"), "FIRE DETECTED");
        assert_eq!(dispatcher.spoken_text("  alert:   survivor seen "), "survivor seen");
        assert_eq!(dispatcher.spoken_text("WEAPON VISIBLE"), "WEAPON VISIBLE");
        assert_eq!(dispatcher.spoken_text("FIRE ALERT: NOW"), "FIRE ALERT: NOW");
    }

    #[tokio::test]
    async fn test_safe_verdict_is_silent() {
        let (speech, status, dispatcher) = dispatcher();
        assert_eq!(
            dispatcher.dispatch(AnalysisResult::Text("SAFE".into())).await,
            DispatchOutcome::Safe
        );
        assert!(speech.spoken.lock().unwrap().is_empty());
        let shown = status.get().await;
        assert!(!shown.is_danger);
        assert_eq!(shown.status_text, "SAFE");
    }

    #[tokio::test]
    async fn test_danger_is_spoken_without_prefix() {
        let (speech, status, dispatcher) = dispatcher();
        let outcome = dispatcher
            .dispatch(AnalysisResult::Text("ALERT: FIRE DETECTED".into()))
            .await;

        assert_eq!(
            outcome,
            DispatchOutcome::Danger {
                spoken: Some("FIRE DETECTED".into())
            }
        );
        assert_eq!(*speech.spoken.lock().unwrap(), vec!["FIRE DETECTED"]);
        let shown = status.get().await;
        assert!(shown.is_danger);
        assert_eq!(shown.status_text, "ALERT: FIRE DETECTED");
        assert_eq!(
            dispatcher.state().await.last_spoken_text.as_deref(),
            Some("FIRE DETECTED")
        );
    }

    #[tokio::test]
    async fn test_muted_danger_is_not_spoken() {
        let (speech, status, dispatcher) = dispatcher();
        status.toggle_audio().await;

        let outcome = dispatcher
            .dispatch(AnalysisResult::Text("ALERT: SURVIVOR SEEN".into()))
            .await;
        assert_eq!(outcome, DispatchOutcome::Danger { spoken: None });
        assert!(speech.spoken.lock().unwrap().is_empty());
        assert!(status.get().await.is_danger);
    }

    #[tokio::test]
    async fn test_no_overlapping_speech() {
        let (speech, _status, dispatcher) = dispatcher();
        speech.speaking.store(true, Ordering::SeqCst);

        let outcome = dispatcher
            .dispatch(AnalysisResult::Text("ALERT: COLLAPSE".into()))
            .await;
        assert_eq!(outcome, DispatchOutcome::Danger { spoken: None });
        assert!(speech.spoken.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rate_limit_shows_cooldown() {
        let (speech, status, dispatcher) = dispatcher();
        dispatcher
            .dispatch(AnalysisResult::Text("ALERT: FIRE".into()))
            .await;

        let outcome = dispatcher.dispatch(AnalysisResult::RateLimited).await;
        assert_eq!(outcome, DispatchOutcome::Cooldown);
        let shown = status.get().await;
        assert_eq!(shown.status_text, RATE_LIMIT_STATUS);
        assert!(!shown.is_danger);
        assert_eq!(speech.spoken.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_verdict_reads_as_safe() {
        let (_speech, status, dispatcher) = dispatcher();
        let outcome = dispatcher.dispatch(AnalysisResult::Text(String::new())).await;
        assert_eq!(outcome, DispatchOutcome::Safe);
        assert_eq!(status.get().await.status_text, "SAFE");
    }
}
