//! Fakes shared by the integration tests.
#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{mpsc, Mutex};

use resq_eye::alerts::{AlertDispatcher, SpeechOutput};
use resq_eye::audio::{AudioBackend, AudioSource, PlaybackSink};
use resq_eye::capture::{
    CaptureError, CaptureProvider, CaptureSourceManager, DeviceConstraints, DeviceInfo, Facing,
    FrameSnapshot, VideoStream,
};
use resq_eye::controller::{
    ControllerEvent, ControllerOptions, LiveComponents, LiveController, LiveStatusHandle,
};
use resq_eye::inference::{
    InferenceClient, InferenceError, LiveChannel, LivePeer, LiveTransport,
};
use resq_eye::polling::PollingConfig;
use resq_eye::streaming::{StreamingConfig, StreamingSessionManager};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraMode {
    Working,
    Denied,
    Broken,
}

/// Cameras that behave however the test says.
pub struct FakeCameras {
    devices: Vec<DeviceInfo>,
    mode: StdMutex<CameraMode>,
    pub opens: AtomicUsize,
    pub stops: Arc<AtomicUsize>,
}

impl FakeCameras {
    pub fn new(facings: &[Option<Facing>]) -> Self {
        let devices = facings
            .iter()
            .enumerate()
            .map(|(i, facing)| DeviceInfo {
                id: format!("cam{i}"),
                label: format!("Camera {i}"),
                facing: *facing,
            })
            .collect();
        Self {
            devices,
            mode: StdMutex::new(CameraMode::Working),
            opens: AtomicUsize::new(0),
            stops: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn set_mode(&self, mode: CameraMode) {
        *self.mode.lock().unwrap() = mode;
    }
}

struct FakeStream {
    device: DeviceInfo,
    stops: Arc<AtomicUsize>,
}

#[async_trait]
impl VideoStream for FakeStream {
    fn device(&self) -> &DeviceInfo {
        &self.device
    }

    async fn snapshot(&mut self) -> Result<Option<FrameSnapshot>, CaptureError> {
        Ok(Some(FrameSnapshot::jpeg(vec![0xFF, 0xD8, 0xFF, 0xD9], 1, 1)))
    }

    fn stop(&mut self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl CaptureProvider for FakeCameras {
    fn is_supported(&self) -> bool {
        true
    }

    async fn enumerate(&self) -> Result<Vec<DeviceInfo>, CaptureError> {
        Ok(self.devices.clone())
    }

    async fn open(
        &self,
        constraints: &DeviceConstraints,
    ) -> Result<Box<dyn VideoStream>, CaptureError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let mode = *self.mode.lock().unwrap();
        match mode {
            CameraMode::Denied => Err(CaptureError::DeviceUnavailable(
                "permission denied".into(),
            )),
            CameraMode::Broken => Err(CaptureError::Transport("bus reset".into())),
            CameraMode::Working => {
                let device = match constraints.facing {
                    Some(facing) => self.devices.iter().find(|d| d.facing == Some(facing)),
                    None => self.devices.first(),
                };
                let device = device
                    .cloned()
                    .ok_or_else(|| CaptureError::DeviceUnavailable("no matching camera".into()))?;
                Ok(Box::new(FakeStream {
                    device,
                    stops: Arc::clone(&self.stops),
                }))
            }
        }
    }
}

/// Answers every frame with a fixed verdict and counts calls.
pub struct CountingInference {
    pub calls: AtomicUsize,
    verdict: String,
}

impl CountingInference {
    pub fn new(verdict: &str) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            verdict: verdict.to_string(),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InferenceClient for CountingInference {
    fn name(&self) -> &'static str {
        "counting"
    }

    async fn analyze_frame(&self, _frame: FrameSnapshot) -> Result<String, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.verdict.clone())
    }
}

#[derive(Default)]
pub struct RecordingSpeech {
    pub spoken: StdMutex<Vec<String>>,
}

#[async_trait]
impl SpeechOutput for RecordingSpeech {
    async fn speak(&self, text: &str) -> Result<()> {
        self.spoken.lock().unwrap().push(text.to_string());
        Ok(())
    }

    fn is_speaking(&self) -> bool {
        false
    }
}

/// Hands the remote end of each session to the test.
pub struct PairTransport {
    peers: mpsc::UnboundedSender<LivePeer>,
    fail: bool,
}

#[async_trait]
impl LiveTransport for PairTransport {
    async fn connect(&self, _system_instruction: &str) -> Result<LiveChannel, InferenceError> {
        if self.fail {
            return Err(InferenceError::Transport("handshake refused".into()));
        }
        let (channel, peer) = LiveChannel::pair();
        let _ = self.peers.send(peer);
        Ok(channel)
    }
}

struct QuietInput(bool);

impl AudioSource for QuietInput {
    fn start(&mut self, _chunks: mpsc::Sender<Vec<i16>>) -> Result<()> {
        self.0 = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.0 = false;
    }

    fn is_active(&self) -> bool {
        self.0
    }

    fn sample_rate(&self) -> u32 {
        16_000
    }
}

struct NullSink;

impl PlaybackSink for NullSink {
    fn now(&self) -> f64 {
        0.0
    }

    fn schedule(&self, _start_at: f64, _samples: &[f32], _sample_rate: u32) {}

    fn halt(&self) {}

    fn active_segments(&self) -> usize {
        0
    }

    fn close(&self) {}
}

pub struct QuietAudio;

impl AudioBackend for QuietAudio {
    fn open_input(&self, _sample_rate: u32, _chunk_samples: usize) -> Result<Box<dyn AudioSource>> {
        Ok(Box::new(QuietInput(false)))
    }

    fn open_output(&self) -> Result<Arc<dyn PlaybackSink>> {
        Ok(Arc::new(NullSink))
    }
}

pub struct Rig {
    pub controller: LiveController,
    pub events: mpsc::Receiver<ControllerEvent>,
    pub cameras: Arc<FakeCameras>,
    pub inference: Arc<CountingInference>,
    pub speech: Arc<RecordingSpeech>,
    pub peers: mpsc::UnboundedReceiver<LivePeer>,
    pub status: LiveStatusHandle,
}

pub struct RigOptions {
    pub facings: Vec<Option<Facing>>,
    pub verdict: &'static str,
    pub fail_connect: bool,
    pub force_simulation: bool,
}

impl Default for RigOptions {
    fn default() -> Self {
        Self {
            facings: vec![Some(Facing::Rear)],
            verdict: "SAFE",
            fail_connect: false,
            force_simulation: false,
        }
    }
}

pub fn rig(options: RigOptions) -> Rig {
    let cameras = Arc::new(FakeCameras::new(&options.facings));
    let inference = Arc::new(CountingInference::new(options.verdict));
    let speech = Arc::new(RecordingSpeech::default());
    let status = LiveStatusHandle::default();
    let (peer_tx, peers) = mpsc::unbounded_channel();

    let provider: Arc<dyn CaptureProvider> = cameras.clone();
    let capture = Arc::new(Mutex::new(CaptureSourceManager::new(provider)));
    let alerts = Arc::new(AlertDispatcher::new(speech.clone(), status.clone()).unwrap());
    let streaming = Arc::new(StreamingSessionManager::new(
        StreamingConfig::default(),
        Arc::new(PairTransport {
            peers: peer_tx,
            fail: options.fail_connect,
        }),
        Arc::new(QuietAudio),
        capture.clone(),
        status.clone(),
    ));

    let (controller, events) = LiveController::new(
        LiveComponents {
            capture,
            inference: inference.clone(),
            alerts,
            streaming,
            status: status.clone(),
        },
        ControllerOptions {
            preferred_facing: None,
            force_simulation: options.force_simulation,
            polling: PollingConfig::default(),
        },
    );

    Rig {
        controller,
        events,
        cameras,
        inference,
        speech,
        peers,
        status,
    }
}
