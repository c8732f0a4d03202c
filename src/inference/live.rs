//! Bidirectional realtime session over the Gemini Live websocket.

use anyhow::{bail, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::InferenceError;
use crate::capture::FrameSnapshot;

pub const DEFAULT_LIVE_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";
pub const DEFAULT_LIVE_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";

/// Sample rate the service speaks at when the mime type does not say.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

const CHANNEL_CAPACITY: usize = 64;

/// Media sent to the service.
#[derive(Debug)]
pub enum Upstream {
    Audio { pcm16: Vec<i16>, sample_rate: u32 },
    Video(FrameSnapshot),
}

/// Something the service (or the socket) did.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    /// Setup acknowledged; media may flow.
    Opened,
    Audio { samples: Vec<f32>, sample_rate: u32 },
    Text(String),
    TurnComplete,
    /// The remote side closed the session.
    Closed(Option<String>),
    /// The socket failed.
    Error(String),
}

/// Local end of a realtime session.
pub struct LiveChannel {
    outbound: mpsc::Sender<Upstream>,
    inbound: mpsc::Receiver<LiveEvent>,
    cancel: CancellationToken,
    io_task: Option<JoinHandle<()>>,
}

/// Remote end of a [`LiveChannel`], driven by a transport's I/O task.
pub struct LivePeer {
    pub outbound: mpsc::Receiver<Upstream>,
    pub inbound: mpsc::Sender<LiveEvent>,
    pub cancel: CancellationToken,
}

impl LiveChannel {
    /// Create a connected channel/peer pair.
    pub fn pair() -> (LiveChannel, LivePeer) {
        let (out_tx, out_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        (
            LiveChannel {
                outbound: out_tx,
                inbound: in_rx,
                cancel: cancel.clone(),
                io_task: None,
            },
            LivePeer {
                outbound: out_rx,
                inbound: in_tx,
                cancel,
            },
        )
    }

    fn with_io_task(mut self, task: JoinHandle<()>) -> Self {
        self.io_task = Some(task);
        self
    }

    pub fn sender(&self) -> mpsc::Sender<Upstream> {
        self.outbound.clone()
    }

    /// Next event, `None` once the peer is gone.
    pub async fn recv(&mut self) -> Option<LiveEvent> {
        self.inbound.recv().await
    }

    /// Close the session and wait for the I/O task to exit.
    pub async fn shutdown(&mut self) {
        self.cancel.cancel();
        self.inbound.close();
        if let Some(task) = self.io_task.take() {
            if let Err(e) = task.await {
                if e.is_panic() {
                    warn!("Live session I/O task panicked: {}", e);
                }
            }
        }
    }
}

impl Drop for LiveChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Opens realtime sessions.
#[async_trait]
pub trait LiveTransport: Send + Sync {
    async fn connect(&self, system_instruction: &str) -> Result<LiveChannel, InferenceError>;
}

// Wire format

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SetupMessage<'a> {
    setup: Setup<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Setup<'a> {
    model: String,
    generation_config: LiveGenerationConfig,
    system_instruction: SystemInstruction<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LiveGenerationConfig {
    response_modalities: Vec<&'static str>,
}

#[derive(Debug, Serialize)]
struct SystemInstruction<'a> {
    parts: Vec<TextPart<'a>>,
}

#[derive(Debug, Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeInputMessage {
    realtime_input: RealtimeInput,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeInput {
    media_chunks: Vec<MediaChunk>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MediaChunk {
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerMessage {
    setup_complete: Option<serde_json::Value>,
    server_content: Option<ServerContent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    model_turn: Option<ModelTurn>,
    #[serde(default)]
    turn_complete: bool,
}

#[derive(Debug, Deserialize)]
struct ModelTurn {
    #[serde(default)]
    parts: Vec<ServerPart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerPart {
    inline_data: Option<ServerInlineData>,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerInlineData {
    mime_type: String,
    data: String,
}

pub fn encode_setup(model: &str, system_instruction: &str) -> Result<String, InferenceError> {
    let model = if model.starts_with("models/") {
        model.to_string()
    } else {
        format!("models/{model}")
    };
    let message = SetupMessage {
        setup: Setup {
            model,
            generation_config: LiveGenerationConfig {
                response_modalities: vec!["AUDIO"],
            },
            system_instruction: SystemInstruction {
                parts: vec![TextPart {
                    text: system_instruction,
                }],
            },
        },
    };
    serde_json::to_string(&message).map_err(|e| InferenceError::Decode(e.to_string()))
}

pub fn encode_upstream(upstream: &Upstream) -> Result<String, InferenceError> {
    let chunk = match upstream {
        Upstream::Audio { pcm16, sample_rate } => {
            let mut bytes = Vec::with_capacity(pcm16.len() * 2);
            for sample in pcm16 {
                bytes.extend_from_slice(&sample.to_le_bytes());
            }
            MediaChunk {
                mime_type: format!("audio/pcm;rate={sample_rate}"),
                data: BASE64.encode(bytes),
            }
        }
        Upstream::Video(frame) => MediaChunk {
            mime_type: frame.format.mime_type().to_string(),
            data: frame.to_base64(),
        },
    };

    let message = RealtimeInputMessage {
        realtime_input: RealtimeInput {
            media_chunks: vec![chunk],
        },
    };
    serde_json::to_string(&message).map_err(|e| InferenceError::Decode(e.to_string()))
}

/// Turn one server message into zero or more events.
pub fn decode_server_message(raw: &str) -> Result<Vec<LiveEvent>, InferenceError> {
    let message: ServerMessage =
        serde_json::from_str(raw).map_err(|e| InferenceError::Decode(e.to_string()))?;
    let mut events = Vec::new();

    if message.setup_complete.is_some() {
        events.push(LiveEvent::Opened);
    }

    if let Some(content) = message.server_content {
        if let Some(turn) = content.model_turn {
            for part in turn.parts {
                if let Some(inline) = part.inline_data {
                    if !inline.mime_type.starts_with("audio/pcm") {
                        debug!("Ignoring inline {} payload", inline.mime_type);
                        continue;
                    }
                    let bytes = BASE64
                        .decode(inline.data.as_bytes())
                        .map_err(|e| InferenceError::Decode(e.to_string()))?;
                    events.push(LiveEvent::Audio {
                        samples: pcm16_le_to_f32(&bytes),
                        sample_rate: parse_rate(&inline.mime_type).unwrap_or(OUTPUT_SAMPLE_RATE),
                    });
                }
                if let Some(text) = part.text {
                    events.push(LiveEvent::Text(text));
                }
            }
        }
        if content.turn_complete {
            events.push(LiveEvent::TurnComplete);
        }
    }

    Ok(events)
}

/// `audio/pcm;rate=24000` → `24000`.
fn parse_rate(mime_type: &str) -> Option<u32> {
    mime_type
        .split(';')
        .filter_map(|param| param.trim().strip_prefix("rate="))
        .find_map(|rate| rate.parse().ok())
}

fn pcm16_le_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect()
}

pub struct GeminiLiveTransport {
    endpoint: String,
    model: String,
    api_key: String,
}

impl GeminiLiveTransport {
    pub fn new(api_key: String, endpoint: Option<String>, model: Option<String>) -> Result<Self> {
        if api_key.trim().is_empty() {
            bail!("Gemini API key missing. Set inference.api_key or GEMINI_API_KEY.");
        }
        Ok(Self {
            endpoint: endpoint.unwrap_or_else(|| DEFAULT_LIVE_ENDPOINT.to_string()),
            model: model.unwrap_or_else(|| DEFAULT_LIVE_MODEL.to_string()),
            api_key,
        })
    }
}

#[async_trait]
impl LiveTransport for GeminiLiveTransport {
    async fn connect(&self, system_instruction: &str) -> Result<LiveChannel, InferenceError> {
        info!("Connecting live session to {} ({})", self.endpoint, self.model);

        let url = format!("{}?key={}", self.endpoint, self.api_key);
        let (mut ws, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| InferenceError::Transport(format!("websocket connect failed: {e}")))?;

        let setup = encode_setup(&self.model, system_instruction)?;
        ws.send(WsMessage::Text(setup))
            .await
            .map_err(|e| InferenceError::Transport(format!("failed to send setup: {e}")))?;

        let (channel, peer) = LiveChannel::pair();
        let task = tokio::spawn(drive_socket(ws, peer));
        Ok(channel.with_io_task(task))
    }
}

async fn drive_socket<S>(ws: S, mut peer: LivePeer)
where
    S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + futures_util::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error>
        + Unpin,
{
    let (mut ws_write, mut ws_read) = ws.split();

    loop {
        tokio::select! {
            _ = peer.cancel.cancelled() => {
                debug!("Live session cancelled locally");
                let _ = ws_write.close().await;
                break;
            }
            upstream = peer.outbound.recv() => {
                let Some(upstream) = upstream else {
                    let _ = ws_write.close().await;
                    break;
                };
                let json = match encode_upstream(&upstream) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!("Dropping upstream chunk: {}", e);
                        continue;
                    }
                };
                if let Err(e) = ws_write.send(WsMessage::Text(json)).await {
                    error!("Live session send failed: {}", e);
                    let _ = peer.inbound.send(LiveEvent::Error(e.to_string())).await;
                    break;
                }
            }
            msg = ws_read.next() => {
                let text = match msg {
                    Some(Ok(WsMessage::Text(text))) => text,
                    Some(Ok(WsMessage::Binary(bytes))) => match String::from_utf8(bytes) {
                        Ok(text) => text,
                        Err(_) => {
                            warn!("Ignoring non-UTF-8 binary frame");
                            continue;
                        }
                    },
                    Some(Ok(WsMessage::Ping(data))) => {
                        let _ = ws_write.send(WsMessage::Pong(data)).await;
                        continue;
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        let reason = frame
                            .map(|f| f.reason.to_string())
                            .filter(|reason| !reason.is_empty());
                        info!("Live session closed by server: {:?}", reason);
                        let _ = peer.inbound.send(LiveEvent::Closed(reason)).await;
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        error!("Live session websocket error: {}", e);
                        let _ = peer.inbound.send(LiveEvent::Error(e.to_string())).await;
                        break;
                    }
                    None => {
                        let _ = peer.inbound.send(LiveEvent::Closed(None)).await;
                        break;
                    }
                };

                match decode_server_message(&text) {
                    Ok(events) => {
                        for event in events {
                            if peer.inbound.send(event).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => warn!("Unreadable live message: {}", e),
                }
            }
        }
    }
}
