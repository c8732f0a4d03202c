//! Procedural frame source used when no physical camera is available.
//!
//! Renders a dark tactical grid with a rotating sweep and the occasional
//! random marker. The content means nothing; it only keeps the analysis
//! pipeline fed.

use image::{Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::TAU;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{CaptureError, FrameSnapshot, SNAPSHOT_JPEG_QUALITY};

pub const RENDER_WIDTH: u32 = 640;
pub const RENDER_HEIGHT: u32 = 360;
pub const FRAME_INTERVAL: Duration = Duration::from_millis(33);

const GRID_SIZE: u32 = 40;
const GRID_SCROLL_PX_PER_SEC: f64 = 20.0;
const SWEEP_RAD_PER_SEC: f64 = 2.0;
const SWEEP_WIDTH_RAD: f64 = 0.5;
const MARKER_PROBABILITY: f64 = 0.05;
const MARKER_RADIUS: i64 = 5;

const BACKGROUND: [u8; 3] = [2, 6, 23];
const GRID_COLOR: [u8; 3] = [30, 41, 59];
const SWEEP_COLOR: [u8; 3] = [249, 115, 22];
const MARKER_COLOR: [u8; 3] = [239, 68, 68];

type SharedFrame = Arc<Mutex<Option<RgbImage>>>;

pub struct SyntheticFrameGenerator {
    latest: SharedFrame,
    task: Option<(CancellationToken, JoinHandle<()>)>,
}

impl Default for SyntheticFrameGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntheticFrameGenerator {
    pub fn new() -> Self {
        Self {
            latest: Arc::new(Mutex::new(None)),
            task: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Start the redraw loop. Calling it while already running does nothing.
    pub fn start(&mut self) {
        if self.task.is_some() {
            return;
        }

        let token = CancellationToken::new();
        let cancel = token.clone();
        let latest = Arc::clone(&self.latest);

        let handle = tokio::spawn(async move {
            let mut rng = StdRng::from_entropy();
            let mut ticker = tokio::time::interval(FRAME_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let frame = render_frame(wall_clock_secs(), &mut rng);
                        if let Ok(mut slot) = latest.lock() {
                            *slot = Some(frame);
                        }
                    }
                }
            }
            debug!("Synthetic redraw loop exited");
        });

        self.task = Some((token, handle));
        info!(
            "Synthetic frame generator started ({}x{})",
            RENDER_WIDTH, RENDER_HEIGHT
        );
    }

    /// Stop the redraw loop and drop the last frame. Safe to call when never started.
    pub fn stop(&mut self) {
        if let Some((token, handle)) = self.task.take() {
            token.cancel();
            handle.abort();
            info!("Synthetic frame generator stopped");
        }

        if let Ok(mut slot) = self.latest.lock() {
            *slot = None;
        }
    }

    /// JPEG-encode the most recently rendered frame.
    pub fn snapshot(&self) -> Result<Option<FrameSnapshot>, CaptureError> {
        let frame = match self.latest.lock() {
            Ok(slot) => slot.clone(),
            Err(_) => None,
        };

        frame
            .map(|frame| FrameSnapshot::from_rgb(&frame, SNAPSHOT_JPEG_QUALITY))
            .transpose()
    }
}

impl Drop for SyntheticFrameGenerator {
    fn drop(&mut self) {
        self.stop();
    }
}

fn wall_clock_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Draw one frame for wall-clock time `time_secs`.
pub fn render_frame(time_secs: f64, rng: &mut impl Rng) -> RgbImage {
    let width = RENDER_WIDTH;
    let height = RENDER_HEIGHT;
    let mut frame = RgbImage::from_pixel(width, height, Rgb(BACKGROUND));

    // Horizontal lines scroll downward, vertical lines stay put.
    let offset = (time_secs * GRID_SCROLL_PX_PER_SEC).rem_euclid(GRID_SIZE as f64) as u32;
    for (x, y, pixel) in frame.enumerate_pixels_mut() {
        let on_vertical = x % GRID_SIZE == 0;
        let on_horizontal = (y + GRID_SIZE - offset) % GRID_SIZE == 0;
        if on_vertical || on_horizontal {
            *pixel = Rgb(GRID_COLOR);
        }
    }

    draw_sweep(&mut frame, time_secs);

    if rng.gen::<f64>() < MARKER_PROBABILITY {
        let cx = rng.gen_range(0..width) as i64;
        let cy = rng.gen_range(0..height) as i64;
        draw_marker(&mut frame, cx, cy);
    }

    frame
}

fn draw_sweep(frame: &mut RgbImage, time_secs: f64) {
    let cx = frame.width() as f64 / 2.0;
    let cy = frame.height() as f64 / 2.0;
    let reach = cx;
    let rotation = (time_secs * SWEEP_RAD_PER_SEC).rem_euclid(TAU);

    for (x, y, pixel) in frame.enumerate_pixels_mut() {
        let dx = x as f64 - cx;
        let dy = y as f64 - cy;
        let angle = dy.atan2(dx);
        let relative = (angle - rotation).rem_euclid(TAU);
        if relative > SWEEP_WIDTH_RAD {
            continue;
        }

        // Gradient runs from transparent at the centre to 0.2 at half width.
        let along = (dx * rotation.cos() + dy * rotation.sin()).max(0.0);
        let alpha = 0.2 * (along / reach).min(1.0);
        blend(pixel, SWEEP_COLOR, alpha as f32);
    }
}

fn draw_marker(frame: &mut RgbImage, cx: i64, cy: i64) {
    let (width, height) = (frame.width() as i64, frame.height() as i64);
    for dy in -MARKER_RADIUS..=MARKER_RADIUS {
        for dx in -MARKER_RADIUS..=MARKER_RADIUS {
            if dx * dx + dy * dy > MARKER_RADIUS * MARKER_RADIUS {
                continue;
            }
            let (x, y) = (cx + dx, cy + dy);
            if x < 0 || y < 0 || x >= width || y >= height {
                continue;
            }
            blend(frame.get_pixel_mut(x as u32, y as u32), MARKER_COLOR, 0.8);
        }
    }
}

fn blend(pixel: &mut Rgb<u8>, color: [u8; 3], alpha: f32) {
    for (channel, target) in pixel.0.iter_mut().zip(color) {
        let mixed = *channel as f32 * (1.0 - alpha) + target as f32 * alpha;
        *channel = mixed.round().clamp(0.0, 255.0) as u8;
    }
}
