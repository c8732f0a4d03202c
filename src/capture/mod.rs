//! Frame capture sources.
//!
//! A capture source is either a physical device reached through a
//! [`CaptureProvider`] or the procedural [`SyntheticFrameGenerator`]. The
//! [`CaptureSourceManager`] owns whichever one is active and walks the
//! fallback ladder when acquiring.

pub mod http_camera;
pub mod manager;
pub mod synthetic;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use http_camera::{CameraDeviceConfig, HttpCameraProvider};
pub use manager::CaptureSourceManager;
pub use synthetic::SyntheticFrameGenerator;

/// JPEG quality used for every encoded snapshot.
pub const SNAPSHOT_JPEG_QUALITY: u8 = 80;

#[derive(Debug, Error)]
pub enum CaptureError {
    /// No hardware, device not found, or permission denied.
    #[error("capture device unavailable: {0}")]
    DeviceUnavailable(String),
    /// Unexpected device or network failure.
    #[error("capture transport failure: {0}")]
    Transport(String),
    #[error("frame encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

/// Which way a camera points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Facing {
    Front,
    Rear,
}

impl Facing {
    pub fn as_str(&self) -> &'static str {
        match self {
            Facing::Front => "front",
            Facing::Rear => "rear",
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            Facing::Front => Facing::Rear,
            Facing::Rear => Facing::Front,
        }
    }
}

/// The source currently producing frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureSource {
    PhysicalDevice {
        device_id: Option<String>,
        facing: Option<Facing>,
    },
    Synthetic,
}

impl CaptureSource {
    pub fn is_synthetic(&self) -> bool {
        matches!(self, CaptureSource::Synthetic)
    }

    pub fn facing(&self) -> Option<Facing> {
        match self {
            CaptureSource::PhysicalDevice { facing, .. } => *facing,
            CaptureSource::Synthetic => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
}

impl ImageFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
        }
    }
}

/// An encoded image taken from the active source at one point in time.
#[derive(Debug)]
pub struct FrameSnapshot {
    pub format: ImageFormat,
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl FrameSnapshot {
    pub fn jpeg(bytes: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            format: ImageFormat::Jpeg,
            bytes,
            width,
            height,
        }
    }

    /// Encode an RGB frame as JPEG.
    pub fn from_rgb(frame: &RgbImage, quality: u8) -> Result<Self, CaptureError> {
        let mut bytes = Vec::new();
        {
            let mut encoder = JpegEncoder::new_with_quality(&mut bytes, quality);
            encoder.encode_image(frame)?;
        }
        Ok(Self::jpeg(bytes, frame.width(), frame.height()))
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.bytes)
    }

    /// Re-encode at no more than `max_width` pixels wide, keeping the aspect ratio.
    pub fn downsample(self, max_width: u32) -> Result<Self, CaptureError> {
        if self.width <= max_width || max_width == 0 {
            return Ok(self);
        }

        let decoded = image::load_from_memory(&self.bytes)?;
        let height = ((self.height as u64 * max_width as u64) / self.width as u64).max(1) as u32;
        let resized = decoded
            .resize_exact(max_width, height, FilterType::Triangle)
            .to_rgb8();
        Self::from_rgb(&resized, SNAPSHOT_JPEG_QUALITY)
    }
}

/// A device advertised by a [`CaptureProvider`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: String,
    pub label: String,
    pub facing: Option<Facing>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceConstraints {
    pub facing: Option<Facing>,
}

impl DeviceConstraints {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn facing(facing: Facing) -> Self {
        Self {
            facing: Some(facing),
        }
    }
}

/// Host capture API: lists devices and opens frame streams.
#[async_trait]
pub trait CaptureProvider: Send + Sync {
    /// Whether the host has any capture API at all.
    fn is_supported(&self) -> bool;

    async fn enumerate(&self) -> Result<Vec<DeviceInfo>, CaptureError>;

    async fn open(
        &self,
        constraints: &DeviceConstraints,
    ) -> Result<Box<dyn VideoStream>, CaptureError>;
}

/// An open device stream.
#[async_trait]
pub trait VideoStream: Send {
    fn device(&self) -> &DeviceInfo;

    /// Latest frame, or `None` while the device has nothing to show yet.
    async fn snapshot(&mut self) -> Result<Option<FrameSnapshot>, CaptureError>;

    fn stop(&mut self);
}
