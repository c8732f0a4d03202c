//! Gap-free scheduling of received audio segments.

use std::sync::Arc;
use tracing::debug;

use super::speaker_sink::PlaybackSink;

/// A decoded PCM buffer in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSegment {
    pub sequence: u64,
    pub sample_rate: u32,
    pub samples: Vec<f32>,
}

impl AudioSegment {
    /// Duration in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Where a segment landed on the output clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledSegment {
    pub sequence: u64,
    pub start: f64,
    pub duration: f64,
}

/// Schedules segments back to back on the sink's clock.
///
/// One scheduler per streaming session. Segments play strictly in the order
/// they are enqueued; when the queue runs dry the next segment starts at the
/// current time instead of in the past.
pub struct AudioPlaybackScheduler {
    sink: Arc<dyn PlaybackSink>,
    next_playback_time: f64,
    next_sequence: u64,
}

impl AudioPlaybackScheduler {
    pub fn new(sink: Arc<dyn PlaybackSink>) -> Self {
        let now = sink.now();
        Self {
            sink,
            next_playback_time: now,
            next_sequence: 0,
        }
    }

    pub fn next_playback_time(&self) -> f64 {
        self.next_playback_time
    }

    /// Wrap raw samples in the next sequence number.
    pub fn segment(&mut self, samples: Vec<f32>, sample_rate: u32) -> AudioSegment {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        AudioSegment {
            sequence,
            sample_rate,
            samples,
        }
    }

    pub fn enqueue(&mut self, segment: AudioSegment) -> ScheduledSegment {
        let now = self.sink.now();
        if self.next_playback_time < now {
            self.next_playback_time = now;
        }

        let start = self.next_playback_time;
        let duration = segment.duration();
        self.sink
            .schedule(start, &segment.samples, segment.sample_rate);
        self.next_playback_time += duration;

        debug!(
            "Segment {} scheduled at {:.3}s for {:.3}s",
            segment.sequence, start, duration
        );

        ScheduledSegment {
            sequence: segment.sequence,
            start,
            duration,
        }
    }

    /// Stop everything scheduled so far.
    pub fn halt(&mut self) {
        self.sink.halt();
        self.next_playback_time = self.sink.now();
    }
}
