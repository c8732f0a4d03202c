//! Network snapshot cameras (ESP32-CAM, IP cameras exposing a JPEG endpoint).
//!
//! Each configured device is polled with a plain HTTP GET that must return a
//! single JPEG image.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{
    CaptureError, CaptureProvider, DeviceConstraints, DeviceInfo, Facing, FrameSnapshot,
    VideoStream,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// One `[[capture.devices]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraDeviceConfig {
    pub id: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facing: Option<Facing>,
}

impl CameraDeviceConfig {
    fn info(&self) -> DeviceInfo {
        DeviceInfo {
            id: self.id.clone(),
            label: self.label.clone().unwrap_or_else(|| self.id.clone()),
            facing: self.facing,
        }
    }
}

pub struct HttpCameraProvider {
    client: reqwest::Client,
    devices: Vec<CameraDeviceConfig>,
}

impl HttpCameraProvider {
    pub fn new(devices: Vec<CameraDeviceConfig>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();

        info!("Snapshot camera provider with {} device(s)", devices.len());

        Self { client, devices }
    }
}

#[async_trait]
impl CaptureProvider for HttpCameraProvider {
    fn is_supported(&self) -> bool {
        !self.devices.is_empty()
    }

    async fn enumerate(&self) -> Result<Vec<DeviceInfo>, CaptureError> {
        Ok(self.devices.iter().map(CameraDeviceConfig::info).collect())
    }

    async fn open(
        &self,
        constraints: &DeviceConstraints,
    ) -> Result<Box<dyn VideoStream>, CaptureError> {
        let candidates: Vec<&CameraDeviceConfig> = self
            .devices
            .iter()
            .filter(|device| match constraints.facing {
                Some(facing) => device.facing == Some(facing),
                None => true,
            })
            .collect();

        let mut last_error = CaptureError::DeviceUnavailable(match constraints.facing {
            Some(facing) => format!("no {} camera configured", facing.as_str()),
            None => "no camera configured".to_string(),
        });

        for device in candidates {
            debug!("Probing snapshot camera {} at {}", device.id, device.url);
            match fetch_frame(&self.client, &device.url).await {
                Ok(frame) => {
                    info!("Opened snapshot camera {}", device.id);
                    return Ok(Box::new(HttpCameraStream {
                        client: self.client.clone(),
                        url: device.url.clone(),
                        info: device.info(),
                        pending: Some(frame),
                        stopped: false,
                    }));
                }
                Err(CaptureError::DeviceUnavailable(reason)) => {
                    warn!("Camera {} unavailable: {}", device.id, reason);
                    last_error = CaptureError::DeviceUnavailable(reason);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error)
    }
}

struct HttpCameraStream {
    client: reqwest::Client,
    url: String,
    info: DeviceInfo,
    pending: Option<FrameSnapshot>,
    stopped: bool,
}

#[async_trait]
impl VideoStream for HttpCameraStream {
    fn device(&self) -> &DeviceInfo {
        &self.info
    }

    async fn snapshot(&mut self) -> Result<Option<FrameSnapshot>, CaptureError> {
        if self.stopped {
            return Ok(None);
        }
        if let Some(frame) = self.pending.take() {
            return Ok(Some(frame));
        }
        fetch_frame(&self.client, &self.url).await.map(Some)
    }

    fn stop(&mut self) {
        if !self.stopped {
            debug!("Releasing snapshot camera {}", self.info.id);
        }
        self.stopped = true;
        self.pending = None;
    }
}

/// Map an HTTP status to a capture error, `None` on success.
pub fn classify_status(status: StatusCode) -> Option<CaptureError> {
    if status.is_success() {
        return None;
    }

    Some(match status {
        StatusCode::NOT_FOUND => CaptureError::DeviceUnavailable("camera not found".to_string()),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            CaptureError::DeviceUnavailable(format!("permission denied ({status})"))
        }
        _ => CaptureError::Transport(format!("camera responded with {status}")),
    })
}

fn classify_request_error(error: reqwest::Error) -> CaptureError {
    if error.is_connect() {
        CaptureError::DeviceUnavailable(format!("camera not reachable: {error}"))
    } else {
        CaptureError::Transport(error.to_string())
    }
}

async fn fetch_frame(client: &reqwest::Client, url: &str) -> Result<FrameSnapshot, CaptureError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(classify_request_error)?;

    if let Some(error) = classify_status(response.status()) {
        return Err(error);
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| CaptureError::Transport(format!("failed to read frame: {e}")))?;

    let decoded = image::load_from_memory(&bytes)
        .map_err(|e| CaptureError::Transport(format!("undecodable frame: {e}")))?;

    Ok(FrameSnapshot::jpeg(
        bytes.to_vec(),
        decoded.width(),
        decoded.height(),
    ))
}
