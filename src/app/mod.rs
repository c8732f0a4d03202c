use crate::alerts::{AlertDispatcher, CommandSpeech, SilentSpeech, SpeechOutput};
use crate::api::ApiServer;
use crate::audio::CpalAudioBackend;
use crate::capture::{CaptureSourceManager, HttpCameraProvider};
use crate::config::Config;
use crate::controller::{
    ControllerOptions, LiveComponents, LiveController, LiveStatus, LiveStatusHandle,
};
use crate::inference::{GeminiClient, GeminiLiveTransport};
use crate::streaming::StreamingSessionManager;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Overrides taken from the command line.
#[derive(Debug, Clone, Default)]
pub struct ServiceOptions {
    pub simulate: bool,
    pub port: Option<u16>,
}

pub async fn run_service(options: ServiceOptions) -> Result<()> {
    info!("Starting ResQ-Eye service");

    let config = Config::load()?;
    let port = options.port.unwrap_or(config.api.port);

    let api_key = config.inference.resolve_api_key().context(
        "Gemini API key missing. Set inference.api_key in the config or GEMINI_API_KEY.",
    )?;
    let mut gemini = GeminiClient::new(
        api_key.clone(),
        config.inference.endpoint.clone(),
        config.inference.model.clone(),
        config.inference.temperature,
    )?;
    if let Some(secs) = config.inference.request_timeout_secs {
        gemini = gemini.with_request_timeout(Duration::from_secs(secs))?;
    }
    let inference = Arc::new(gemini);
    let transport = Arc::new(GeminiLiveTransport::new(
        api_key,
        config.inference.live_endpoint.clone(),
        config.inference.live_model.clone(),
    )?);

    let status = LiveStatusHandle::new(LiveStatus {
        audio_enabled: config.alerts.audio_enabled,
        poll_delay_ms: config.polling.initial_delay_ms,
        ..LiveStatus::default()
    });

    let alerts = Arc::new(AlertDispatcher::new(build_speech(&config), status.clone())?);

    let provider = Arc::new(HttpCameraProvider::new(config.capture.devices.clone()));
    let capture = Arc::new(Mutex::new(CaptureSourceManager::new(provider)));

    let streaming = Arc::new(StreamingSessionManager::new(
        config.streaming.clone(),
        transport,
        Arc::new(CpalAudioBackend),
        capture.clone(),
        status.clone(),
    ));

    let (mut controller, rx) = LiveController::new(
        LiveComponents {
            capture,
            inference,
            alerts,
            streaming,
            status: status.clone(),
        },
        ControllerOptions {
            preferred_facing: config.capture.preferred_facing,
            force_simulation: options.simulate || config.capture.force_simulation,
            polling: config.polling.clone(),
        },
    );
    let handle = controller.handle();

    let api_server = ApiServer::new(handle.clone(), status, port);
    tokio::spawn(async move {
        if let Err(e) = api_server.start().await {
            error!("API server failed: {}", e);
        }
    });

    let shutdown = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received");
            shutdown.shutdown().await;
        }
    });

    if let Err(e) = controller.start().await {
        warn!("Live feed did not start: {}", e);
        info!("Retry with: curl -X POST http://127.0.0.1:{}/command/retry-live", port);
    }

    info!("ResQ-Eye is ready!");
    info!("Status: curl http://127.0.0.1:{}/status", port);
    info!("Voice mode: curl -X POST http://127.0.0.1:{}/command/toggle-voice", port);

    controller.run(rx).await;
    info!("ResQ-Eye stopped");
    Ok(())
}

fn build_speech(config: &Config) -> Arc<dyn SpeechOutput> {
    match CommandSpeech::detect(
        config.alerts.speech_command.as_deref(),
        config.alerts.speech_rate,
    ) {
        Ok(speech) => Arc::new(speech),
        Err(e) => {
            warn!("Spoken alerts unavailable: {}", e);
            Arc::new(SilentSpeech)
        }
    }
}
