//! Owns the active capture source and the device → any device → synthetic ladder.

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::{
    CaptureError, CaptureProvider, CaptureSource, DeviceConstraints, Facing, FrameSnapshot,
    SyntheticFrameGenerator, VideoStream,
};

enum ActiveSource {
    Inactive,
    Device(Box<dyn VideoStream>),
    Synthetic(SyntheticFrameGenerator),
}

pub struct CaptureSourceManager {
    provider: Arc<dyn CaptureProvider>,
    active: ActiveSource,
    preferred_facing: Option<Facing>,
    has_multiple_devices: bool,
}

impl CaptureSourceManager {
    pub fn new(provider: Arc<dyn CaptureProvider>) -> Self {
        Self {
            provider,
            active: ActiveSource::Inactive,
            preferred_facing: None,
            has_multiple_devices: false,
        }
    }

    /// The source currently held, if any.
    pub fn source(&self) -> Option<CaptureSource> {
        match &self.active {
            ActiveSource::Inactive => None,
            ActiveSource::Device(stream) => {
                let device = stream.device();
                Some(CaptureSource::PhysicalDevice {
                    device_id: Some(device.id.clone()),
                    facing: device.facing,
                })
            }
            ActiveSource::Synthetic(_) => Some(CaptureSource::Synthetic),
        }
    }

    pub fn is_synthetic(&self) -> bool {
        matches!(self.active, ActiveSource::Synthetic(_))
    }

    pub fn preferred_facing(&self) -> Option<Facing> {
        self.preferred_facing
    }

    pub fn has_multiple_devices(&self) -> bool {
        self.has_multiple_devices
    }

    /// Acquire a source, tearing down whatever is held first.
    ///
    /// Tries the preferred facing, then any device, then the synthetic
    /// generator. Only unexpected device failures are returned as errors; in
    /// that case no source is active.
    pub async fn acquire(
        &mut self,
        preferred_facing: Option<Facing>,
    ) -> Result<CaptureSource, CaptureError> {
        self.release();
        self.preferred_facing = preferred_facing;

        if !self.provider.is_supported() {
            warn!("Capture API not supported. Switching to simulation.");
            return Ok(self.start_synthetic());
        }

        self.refresh_device_list().await;

        let opened = match (
            self.provider
                .open(&DeviceConstraints {
                    facing: preferred_facing,
                })
                .await,
            preferred_facing,
        ) {
            (Ok(stream), _) => Ok(stream),
            (Err(first), Some(facing)) => {
                warn!(
                    "Camera start failed with facing {}, attempting fallback: {}",
                    facing.as_str(),
                    first
                );
                let fallback = self.provider.open(&DeviceConstraints::any()).await;
                if fallback.is_ok() {
                    self.preferred_facing = None;
                }
                fallback
            }
            (Err(first), None) => Err(first),
        };

        match opened {
            Ok(stream) => {
                let device = stream.device();
                let source = CaptureSource::PhysicalDevice {
                    device_id: Some(device.id.clone()),
                    facing: device.facing,
                };
                info!("Capture source acquired: {} ({:?})", device.label, device.facing);
                self.active = ActiveSource::Device(stream);
                Ok(source)
            }
            Err(CaptureError::DeviceUnavailable(reason)) => {
                warn!("Camera unavailable ({}). Defaulting to simulation.", reason);
                Ok(self.start_synthetic())
            }
            Err(e) => {
                error!("Error accessing camera: {}", e);
                Err(e)
            }
        }
    }

    /// Switch straight to the synthetic generator.
    pub fn force_synthetic(&mut self) -> CaptureSource {
        self.release();
        self.start_synthetic()
    }

    /// Stop and free whatever is held. Idempotent.
    pub fn release(&mut self) {
        match std::mem::replace(&mut self.active, ActiveSource::Inactive) {
            ActiveSource::Device(mut stream) => {
                info!("Releasing camera {}", stream.device().id);
                stream.stop();
            }
            ActiveSource::Synthetic(mut generator) => generator.stop(),
            ActiveSource::Inactive => {}
        }
    }

    /// Take a frame from the active source. `None` when nothing is ready.
    pub async fn snapshot(&mut self) -> Option<FrameSnapshot> {
        let result = match &mut self.active {
            ActiveSource::Inactive => return None,
            ActiveSource::Device(stream) => stream.snapshot().await,
            ActiveSource::Synthetic(generator) => generator.snapshot(),
        };

        match result {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Frame capture failed: {}", e);
                None
            }
        }
    }

    fn start_synthetic(&mut self) -> CaptureSource {
        let mut generator = SyntheticFrameGenerator::new();
        generator.start();
        self.active = ActiveSource::Synthetic(generator);
        CaptureSource::Synthetic
    }

    async fn refresh_device_list(&mut self) {
        match self.provider.enumerate().await {
            Ok(devices) => {
                debug!("Found {} capture device(s)", devices.len());
                self.has_multiple_devices = devices.len() > 1;
            }
            Err(e) => {
                warn!("Device enumeration failed: {}", e);
                self.has_multiple_devices = false;
            }
        }
    }
}

impl Drop for CaptureSourceManager {
    fn drop(&mut self) {
        self.release();
    }
}
