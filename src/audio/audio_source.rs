//! Audio source abstraction for live capture.

use anyhow::Result;
use tokio::sync::mpsc;

/// Trait for audio capture sources (microphone, test fixtures).
///
/// A started source pushes fixed-size mono PCM16 chunks at
/// [`AudioSource::sample_rate`] into the given channel until stopped.
pub trait AudioSource: Send {
    /// Start capturing into `chunks`.
    fn start(&mut self, chunks: mpsc::Sender<Vec<i16>>) -> Result<()>;

    /// Stop capturing and release the device. Safe to call when idle.
    fn stop(&mut self);

    /// Whether this source is currently capturing.
    fn is_active(&self) -> bool;

    /// The sample rate of delivered chunks.
    fn sample_rate(&self) -> u32;
}
