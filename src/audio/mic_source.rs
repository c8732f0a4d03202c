//! Microphone audio capture via cpal.
//!
//! The cpal stream lives on its own thread for its whole life; the source
//! only keeps a stop handle, so it can be moved between tasks.

use anyhow::{anyhow, bail, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::audio_mixer::AudioMixer;
use super::audio_source::AudioSource;

const STARTUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Converts device callbacks into fixed-size mono PCM16 chunks.
pub struct InputChunker {
    channels: usize,
    device_rate: u32,
    target_rate: u32,
    chunk_samples: usize,
    pending: Vec<f32>,
}

impl InputChunker {
    pub fn new(channels: usize, device_rate: u32, target_rate: u32, chunk_samples: usize) -> Self {
        Self {
            channels: channels.max(1),
            device_rate,
            target_rate,
            chunk_samples: chunk_samples.max(1),
            pending: Vec::with_capacity(chunk_samples * 2),
        }
    }

    /// Feed interleaved device samples; returns every chunk completed by them.
    pub fn push(&mut self, interleaved: &[f32]) -> Vec<Vec<i16>> {
        let mono = AudioMixer::downmix(interleaved, self.channels);
        let resampled = AudioMixer::resample(&mono, self.device_rate, self.target_rate);
        self.pending.extend_from_slice(&resampled);

        let mut chunks = Vec::new();
        while self.pending.len() >= self.chunk_samples {
            let chunk: Vec<f32> = self.pending.drain(..self.chunk_samples).collect();
            chunks.push(AudioMixer::to_pcm16(&chunk));
        }
        chunks
    }
}

struct MicWorker {
    stop_tx: std_mpsc::Sender<()>,
    thread: JoinHandle<()>,
}

pub struct MicAudioSource {
    target_sample_rate: u32,
    chunk_samples: usize,
    worker: Option<MicWorker>,
}

impl MicAudioSource {
    /// # Arguments
    /// * `sample_rate` - Rate of delivered chunks (16000 for the live session)
    /// * `chunk_samples` - Samples per delivered chunk
    pub fn new(sample_rate: u32, chunk_samples: usize) -> Self {
        Self {
            target_sample_rate: sample_rate,
            chunk_samples,
            worker: None,
        }
    }
}

fn build_input_stream(
    target_rate: u32,
    chunk_samples: usize,
    chunks: mpsc::Sender<Vec<i16>>,
) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .context("No input device available for live audio")?;
    let supported = device
        .default_input_config()
        .context("Failed to query microphone configuration")?;

    info!(
        "Live mic using device: {} ({}Hz, {} ch)",
        device.name().unwrap_or_else(|_| "unknown".to_string()),
        supported.sample_rate().0,
        supported.channels()
    );

    let config: cpal::StreamConfig = supported.config();
    let mut chunker = InputChunker::new(
        config.channels as usize,
        config.sample_rate.0,
        target_rate,
        chunk_samples,
    );
    let err_fn = |err| error!("Live mic stream error: {}", err);

    let mut deliver = move |samples: &[f32]| {
        for chunk in chunker.push(samples) {
            if chunks.try_send(chunk).is_err() {
                // Never block the audio callback.
                debug!("Dropping mic chunk");
            }
        }
    };

    let stream = match supported.sample_format() {
        cpal::SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| deliver(data),
            err_fn,
            None,
        )?,
        cpal::SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                let converted: Vec<f32> = data.iter().map(|s| *s as f32 / 32768.0).collect();
                deliver(&converted)
            },
            err_fn,
            None,
        )?,
        other => bail!("Unsupported microphone sample format: {:?}", other),
    };

    stream.play().context("Failed to start microphone stream")?;
    Ok(stream)
}

impl AudioSource for MicAudioSource {
    fn start(&mut self, chunks: mpsc::Sender<Vec<i16>>) -> Result<()> {
        if self.worker.is_some() {
            return Err(anyhow!("Mic source already capturing"));
        }

        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<()>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let target_rate = self.target_sample_rate;
        let chunk_samples = self.chunk_samples;

        let thread = std::thread::Builder::new()
            .name("resq-eye-mic".to_string())
            .spawn(move || match build_input_stream(target_rate, chunk_samples, chunks) {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    // Hold the stream until told to stop (or the source is dropped).
                    let _ = stop_rx.recv();
                    drop(stream);
                    debug!("Live mic stream dropped");
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .context("Failed to spawn microphone thread")?;

        match ready_rx.recv_timeout(STARTUP_TIMEOUT) {
            Ok(Ok(())) => {
                self.worker = Some(MicWorker { stop_tx, thread });
                info!("Live mic capture started");
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = stop_tx.send(());
                warn!("Microphone did not start within {:?}", STARTUP_TIMEOUT);
                Err(anyhow!("Microphone did not start in time"))
            }
        }
    }

    fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };

        debug!("Stopping live mic stream");
        let _ = worker.stop_tx.send(());
        if worker.thread.join().is_err() {
            warn!("Microphone thread panicked");
        }
        info!("Live mic capture stopped");
    }

    fn is_active(&self) -> bool {
        self.worker.is_some()
    }

    fn sample_rate(&self) -> u32 {
        self.target_sample_rate
    }
}

impl Drop for MicAudioSource {
    fn drop(&mut self) {
        if self.worker.is_some() {
            debug!("Dropping active MicAudioSource, cleaning up");
            self.stop();
        }
    }
}
