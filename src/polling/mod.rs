//! Periodic frame analysis with adaptive backoff.
//!
//! One cycle: take a frame, submit it, wait for the verdict, hand it to the
//! alert dispatcher, sleep. The sleep grows when the inference service pushes
//! back and shrinks again while it answers normally.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::alerts::{AlertDispatcher, AnalysisResult, DispatchOutcome};
use crate::capture::CaptureSourceManager;
use crate::controller::status::LiveStatusHandle;
use crate::inference::{InferenceClient, InferenceError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub warmup_ms: u64,
    pub initial_delay_ms: u64,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
    pub recovery_factor: f64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            warmup_ms: 1000,
            initial_delay_ms: 6000,
            min_delay_ms: 6000,
            max_delay_ms: 30000,
            backoff_factor: 1.5,
            recovery_factor: 0.8,
        }
    }
}

/// Current inter-request delay. Always within `[min, max]`.
#[derive(Debug, Clone, PartialEq)]
pub struct PollState {
    current_delay_ms: u64,
    min_delay_ms: u64,
    max_delay_ms: u64,
    backoff_factor: f64,
    recovery_factor: f64,
}

impl PollState {
    pub fn new(config: &PollingConfig) -> Self {
        let min = config.min_delay_ms.min(config.max_delay_ms);
        let max = config.max_delay_ms.max(min);
        Self {
            current_delay_ms: config.initial_delay_ms.clamp(min, max),
            min_delay_ms: min,
            max_delay_ms: max,
            backoff_factor: config.backoff_factor,
            recovery_factor: config.recovery_factor,
        }
    }

    pub fn current_delay_ms(&self) -> u64 {
        self.current_delay_ms
    }

    pub fn current_delay(&self) -> Duration {
        Duration::from_millis(self.current_delay_ms)
    }

    pub fn on_rate_limited(&mut self) -> u64 {
        let grown = (self.current_delay_ms as f64 * self.backoff_factor).round() as u64;
        self.current_delay_ms = grown.clamp(self.min_delay_ms, self.max_delay_ms);
        self.current_delay_ms
    }

    pub fn on_healthy(&mut self) -> u64 {
        if self.current_delay_ms > self.min_delay_ms {
            let shrunk = (self.current_delay_ms as f64 * self.recovery_factor).round() as u64;
            self.current_delay_ms = shrunk.clamp(self.min_delay_ms, self.max_delay_ms);
        }
        self.current_delay_ms
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Source had nothing to show; nothing was sent.
    NoFrame,
    Analyzed(DispatchOutcome),
    RateLimited,
    /// Non-rate-limit failure, reported as SAFE.
    Failed,
}

pub struct AdaptivePollingScheduler {
    capture: Arc<Mutex<CaptureSourceManager>>,
    inference: Arc<dyn InferenceClient>,
    alerts: Arc<AlertDispatcher>,
    status: LiveStatusHandle,
    state: PollState,
    warmup: Duration,
}

impl AdaptivePollingScheduler {
    pub fn new(
        config: &PollingConfig,
        capture: Arc<Mutex<CaptureSourceManager>>,
        inference: Arc<dyn InferenceClient>,
        alerts: Arc<AlertDispatcher>,
        status: LiveStatusHandle,
    ) -> Self {
        Self {
            capture,
            inference,
            alerts,
            status,
            state: PollState::new(config),
            warmup: Duration::from_millis(config.warmup_ms),
        }
    }

    pub fn state(&self) -> &PollState {
        &self.state
    }

    /// Poll until `cancel` fires. Pending sleeps and in-flight requests are
    /// abandoned on cancellation.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            "Polling started (delay {}ms, {})",
            self.state.current_delay_ms(),
            self.inference.name()
        );
        self.status.set_poll_delay(self.state.current_delay_ms()).await;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(self.warmup) => {}
        }

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                outcome = self.run_cycle() => debug!("Poll cycle finished: {:?}", outcome),
            }

            let delay = self.state.current_delay();
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.status.set_busy(false).await;
        info!("Polling stopped");
    }

    pub async fn run_cycle(&mut self) -> CycleOutcome {
        let frame = {
            let mut capture = self.capture.lock().await;
            capture.snapshot().await
        };
        let Some(frame) = frame else {
            debug!("No frame ready, skipping cycle");
            return CycleOutcome::NoFrame;
        };

        self.status.set_busy(true).await;
        let result = self.inference.analyze_frame(frame).await;
        self.status.set_busy(false).await;

        match result {
            Ok(text) => {
                let delay = self.state.on_healthy();
                self.status.set_poll_delay(delay).await;
                CycleOutcome::Analyzed(self.alerts.dispatch(AnalysisResult::Text(text)).await)
            }
            Err(InferenceError::RateLimited) => {
                let delay = self.state.on_rate_limited();
                warn!("Rate limited, next poll in {}ms", delay);
                self.status.set_poll_delay(delay).await;
                self.alerts.dispatch(AnalysisResult::RateLimited).await;
                CycleOutcome::RateLimited
            }
            Err(e) => {
                // Any other failure reads as SAFE.
                warn!("Frame analysis failed, reporting SAFE: {}", e);
                let delay = self.state.on_healthy();
                self.status.set_poll_delay(delay).await;
                self.alerts
                    .dispatch(AnalysisResult::Text(String::new()))
                    .await;
                CycleOutcome::Failed
            }
        }
    }
}
