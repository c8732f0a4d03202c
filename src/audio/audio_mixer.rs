//! Sample-level helpers and the mixer behind the speaker sink.

/// Stateless sample conversions.
pub struct AudioMixer;

impl AudioMixer {
    /// Average interleaved frames down to mono.
    pub fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
        if channels <= 1 {
            return interleaved.to_vec();
        }

        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    }

    /// Resample audio from one sample rate to another using linear interpolation.
    /// Suitable for speech audio where perfect quality isn't critical.
    pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
        if from_rate == to_rate || samples.is_empty() || from_rate == 0 || to_rate == 0 {
            return samples.to_vec();
        }

        let ratio = from_rate as f64 / to_rate as f64;
        let new_len = (samples.len() as f64 / ratio).ceil() as usize;
        let mut resampled = Vec::with_capacity(new_len);

        for i in 0..new_len {
            let src_pos = i as f64 * ratio;
            let src_idx = src_pos as usize;
            let frac = src_pos - src_idx as f64;

            let sample = if src_idx + 1 < samples.len() {
                samples[src_idx] as f64 * (1.0 - frac) + samples[src_idx + 1] as f64 * frac
            } else if src_idx < samples.len() {
                samples[src_idx] as f64
            } else {
                0.0
            };

            resampled.push(sample as f32);
        }

        resampled
    }

    pub fn to_pcm16(samples: &[f32]) -> Vec<i16> {
        samples
            .iter()
            .map(|s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
            .collect()
    }
}

struct QueuedSegment {
    start_frame: u64,
    samples: Vec<f32>,
}

impl QueuedSegment {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// Mixes time-stamped segments into a mono output stream.
///
/// The clock is the number of frames rendered so far, so a segment scheduled
/// at `t` starts on exactly frame `t * sample_rate`.
pub struct SegmentMixer {
    sample_rate: u32,
    frames_rendered: u64,
    segments: Vec<QueuedSegment>,
}

impl SegmentMixer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            frames_rendered: 0,
            segments: Vec::new(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Current playback position in seconds.
    pub fn now(&self) -> f64 {
        self.frames_rendered as f64 / self.sample_rate as f64
    }

    pub fn schedule(&mut self, start_at: f64, samples: &[f32], sample_rate: u32) {
        let samples = AudioMixer::resample(samples, sample_rate, self.sample_rate);
        if samples.is_empty() {
            return;
        }
        let start_frame = (start_at.max(0.0) * self.sample_rate as f64).round() as u64;
        // Rounding can leave the previous tail one frame past this start.
        for queued in &mut self.segments {
            if queued.start_frame < start_frame && queued.end_frame() > start_frame {
                queued
                    .samples
                    .truncate((start_frame - queued.start_frame) as usize);
            }
        }
        self.segments.push(QueuedSegment {
            start_frame,
            samples,
        });
    }

    /// Fill `out` with the next mono frames and advance the clock.
    pub fn render(&mut self, out: &mut [f32]) {
        out.fill(0.0);
        let window_start = self.frames_rendered;
        let window_end = window_start + out.len() as u64;

        for segment in &self.segments {
            let from = segment.start_frame.max(window_start);
            let to = segment.end_frame().min(window_end);
            for frame in from..to {
                out[(frame - window_start) as usize] +=
                    segment.samples[(frame - segment.start_frame) as usize];
            }
        }

        for sample in out.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }

        self.frames_rendered = window_end;
        // Finished segments are released right away.
        self.segments
            .retain(|segment| segment.end_frame() > window_end);
    }

    /// Drop every scheduled segment.
    pub fn halt(&mut self) {
        self.segments.clear();
    }

    pub fn active_segments(&self) -> usize {
        self.segments.len()
    }
}
