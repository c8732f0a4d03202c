pub mod audio_mixer;
pub mod audio_source;
pub mod mic_source;
pub mod playback;
pub mod speaker_sink;

use anyhow::Result;
use std::sync::Arc;

pub use audio_mixer::{AudioMixer, SegmentMixer};
pub use audio_source::AudioSource;
pub use mic_source::MicAudioSource;
pub use playback::{AudioPlaybackScheduler, AudioSegment, ScheduledSegment};
pub use speaker_sink::{CpalPlaybackSink, PlaybackSink};

/// Opens the audio devices a voice session needs.
pub trait AudioBackend: Send + Sync {
    /// An unstarted capture source delivering `chunk_samples`-sample chunks.
    fn open_input(&self, sample_rate: u32, chunk_samples: usize) -> Result<Box<dyn AudioSource>>;

    fn open_output(&self) -> Result<Arc<dyn PlaybackSink>>;
}

/// Default host devices through cpal.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalAudioBackend;

impl AudioBackend for CpalAudioBackend {
    fn open_input(&self, sample_rate: u32, chunk_samples: usize) -> Result<Box<dyn AudioSource>> {
        Ok(Box::new(MicAudioSource::new(sample_rate, chunk_samples)))
    }

    fn open_output(&self) -> Result<Arc<dyn PlaybackSink>> {
        Ok(Arc::new(CpalPlaybackSink::open()?))
    }
}
