//! Speaker output via cpal.
//!
//! Scheduled segments are mixed inside the output callback by a
//! [`SegmentMixer`], which also provides the playback clock.

use anyhow::{anyhow, bail, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::audio_mixer::SegmentMixer;

const STARTUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Audio output that plays segments at absolute times on its own clock.
pub trait PlaybackSink: Send + Sync {
    /// Current position of the output clock, in seconds.
    fn now(&self) -> f64;

    /// Play `samples` starting at `start_at` on the output clock.
    fn schedule(&self, start_at: f64, samples: &[f32], sample_rate: u32);

    /// Stop every scheduled segment immediately.
    fn halt(&self);

    /// Segments scheduled or playing.
    fn active_segments(&self) -> usize;

    /// Halt and release the output device.
    fn close(&self);
}

struct SpeakerWorker {
    stop_tx: std_mpsc::Sender<()>,
    thread: JoinHandle<()>,
}

pub struct CpalPlaybackSink {
    mixer: Arc<Mutex<SegmentMixer>>,
    worker: Mutex<Option<SpeakerWorker>>,
}

fn lock(mixer: &Mutex<SegmentMixer>) -> MutexGuard<'_, SegmentMixer> {
    mixer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Renders the mixer into interleaved device buffers.
struct OutputRenderer {
    mixer: Arc<Mutex<SegmentMixer>>,
    channels: usize,
    mono: Vec<f32>,
}

impl OutputRenderer {
    fn new(mixer: Arc<Mutex<SegmentMixer>>, channels: usize) -> Self {
        Self {
            mixer,
            channels: channels.max(1),
            mono: Vec::new(),
        }
    }

    fn fill<T: Copy>(&mut self, data: &mut [T], convert: impl Fn(f32) -> T) {
        self.mono.resize(data.len() / self.channels, 0.0);
        match self.mixer.lock() {
            Ok(mut mixer) => mixer.render(&mut self.mono),
            Err(_) => self.mono.fill(0.0),
        }
        for (frame, sample) in data.chunks_mut(self.channels).zip(&self.mono) {
            frame.fill(convert(*sample));
        }
    }
}

fn build_output_stream(
    device: &cpal::Device,
    supported: &cpal::SupportedStreamConfig,
    mixer: Arc<Mutex<SegmentMixer>>,
) -> Result<cpal::Stream> {
    let config: cpal::StreamConfig = supported.config();
    let channels = config.channels as usize;
    let err_fn = |err| error!("Speaker stream error: {}", err);
    let mut f32_renderer = OutputRenderer::new(Arc::clone(&mixer), channels);
    let mut i16_renderer = OutputRenderer::new(mixer, channels);

    let stream = match supported.sample_format() {
        cpal::SampleFormat::F32 => device.build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                f32_renderer.fill(data, |sample| sample)
            },
            err_fn,
            None,
        )?,
        cpal::SampleFormat::I16 => device.build_output_stream(
            &config,
            move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                i16_renderer.fill(data, |sample| (sample * i16::MAX as f32) as i16)
            },
            err_fn,
            None,
        )?,
        other => bail!("Unsupported speaker sample format: {:?}", other),
    };

    stream.play().context("Failed to start speaker stream")?;
    Ok(stream)
}

impl CpalPlaybackSink {
    /// Open the default output device.
    pub fn open() -> Result<Self> {
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<Arc<Mutex<SegmentMixer>>>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("resq-eye-speaker".to_string())
            .spawn(move || {
                let opened = (|| {
                    let host = cpal::default_host();
                    let device = host
                        .default_output_device()
                        .context("No output device available for live audio")?;
                    let supported = device
                        .default_output_config()
                        .context("Failed to query speaker configuration")?;
                    info!(
                        "Live speaker using device: {} ({}Hz)",
                        device.name().unwrap_or_else(|_| "unknown".to_string()),
                        supported.sample_rate().0
                    );
                    let mixer = Arc::new(Mutex::new(SegmentMixer::new(supported.sample_rate().0)));
                    let stream = build_output_stream(&device, &supported, Arc::clone(&mixer))?;
                    Ok::<_, anyhow::Error>((stream, mixer))
                })();

                match opened {
                    Ok((stream, mixer)) => {
                        let _ = ready_tx.send(Ok(mixer));
                        let _ = stop_rx.recv();
                        drop(stream);
                        debug!("Speaker stream dropped");
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            })
            .context("Failed to spawn speaker thread")?;

        match ready_rx.recv_timeout(STARTUP_TIMEOUT) {
            Ok(Ok(mixer)) => Ok(Self {
                mixer,
                worker: Mutex::new(Some(SpeakerWorker { stop_tx, thread })),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = stop_tx.send(());
                Err(anyhow!("Speaker did not start in time"))
            }
        }
    }
}

impl PlaybackSink for CpalPlaybackSink {
    fn now(&self) -> f64 {
        lock(&self.mixer).now()
    }

    fn schedule(&self, start_at: f64, samples: &[f32], sample_rate: u32) {
        lock(&self.mixer).schedule(start_at, samples, sample_rate);
    }

    fn halt(&self) {
        lock(&self.mixer).halt();
    }

    fn active_segments(&self) -> usize {
        lock(&self.mixer).active_segments()
    }

    fn close(&self) {
        self.halt();
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(worker) = worker {
            let _ = worker.stop_tx.send(());
            if worker.thread.join().is_err() {
                warn!("Speaker thread panicked");
            }
            info!("Live speaker released");
        }
    }
}

impl Drop for CpalPlaybackSink {
    fn drop(&mut self) {
        self.close();
    }
}
