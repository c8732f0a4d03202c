//! Remote inference collaborators.
//!
//! Two shapes: request/response frame analysis ([`InferenceClient`]) and a
//! bidirectional realtime session ([`live::LiveTransport`]).

use async_trait::async_trait;
use thiserror::Error;

use crate::capture::FrameSnapshot;

pub mod gemini;
pub mod live;

pub use gemini::GeminiClient;
pub use live::{GeminiLiveTransport, LiveChannel, LiveEvent, LivePeer, LiveTransport, Upstream};

/// Instruction sent with every polled frame.
pub const LIVE_PROMPT: &str = "You are ResQ-Eye. Scan this frame for IMMEDIATE DANGER (Fire, Collapse, Weapons) or SURVIVORS. If Safe, output 'SAFE'. If Danger, output a 3-word alert like 'ALERT: FIRE DETECTED' or 'ALERT: SURVIVOR SEEN'.";

/// System instruction for the realtime voice session.
pub const VOICE_PROMPT: &str = "You are ResQ-Eye, a rescue operations assistant watching a live drone feed. Answer the operator briefly. Call out fire, structural collapse, weapons or survivors as soon as you see them.";

#[derive(Debug, Error)]
pub enum InferenceError {
    /// Quota exhausted or service overloaded. Not a failure; feeds the backoff.
    #[error("inference service is rate limiting requests")]
    RateLimited,
    #[error("inference transport failure: {0}")]
    Transport(String),
    #[error("inference service returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("failed to decode inference response: {0}")]
    Decode(String),
}

impl InferenceError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, InferenceError::RateLimited)
    }
}

/// Classify a failed HTTP exchange.
///
/// `api_status` is the symbolic status from the service's error body
/// (`RESOURCE_EXHAUSTED`, `UNAVAILABLE`, ...), when one was returned.
pub fn classify_failure(http_status: u16, api_status: Option<&str>, message: &str) -> InferenceError {
    let backpressure = matches!(http_status, 429 | 503)
        || matches!(api_status, Some("RESOURCE_EXHAUSTED") | Some("UNAVAILABLE"));

    if backpressure {
        InferenceError::RateLimited
    } else {
        InferenceError::Api {
            status: http_status,
            message: message.to_string(),
        }
    }
}

/// Frame-in, verdict-out analysis service.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    fn name(&self) -> &'static str;

    /// Analyse one frame. Returns the raw verdict text.
    async fn analyze_frame(&self, frame: FrameSnapshot) -> Result<String, InferenceError>;
}
