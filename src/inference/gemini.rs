use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::{classify_failure, InferenceClient, InferenceError, LIVE_PROMPT};
use crate::capture::FrameSnapshot;

pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-3-pro-preview";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String, // base64
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

impl GenerateContentResponse {
    fn text(&self) -> String {
        self.candidates
            .iter()
            .filter_map(|candidate| candidate.content.as_ref())
            .flat_map(|content| content.parts.iter())
            .filter_map(|part| part.text.as_deref())
            .collect::<Vec<_>>()
            .join("")
    }
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
    status: Option<String>,
}

pub struct GeminiClient {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    temperature: f32,
}

impl GeminiClient {
    pub fn new(
        api_key: String,
        endpoint: Option<String>,
        model: Option<String>,
        temperature: f32,
    ) -> Result<Self> {
        if api_key.trim().is_empty() {
            bail!("Gemini API key missing. Set inference.api_key or GEMINI_API_KEY.");
        }

        // No overall timeout unless configured; the polling loop waits for
        // each verdict.
        let client = reqwest::Client::builder().build()?;
        let endpoint = endpoint.unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        let model = model.unwrap_or_else(|| DEFAULT_MODEL.to_string());

        info!(
            "Initialized Gemini client with endpoint: {} (model {})",
            endpoint, model
        );

        Ok(Self {
            client,
            endpoint,
            model,
            api_key,
            temperature,
        })
    }

    /// Give up on a request after `timeout`. The failure counts as SAFE.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.client = reqwest::Client::builder().timeout(timeout).build()?;
        debug!("Gemini request timeout set to {:?}", timeout);
        Ok(self)
    }

    fn url(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.endpoint.trim_end_matches('/'),
            self.model
        )
    }

    fn request_body(&self, frame: &FrameSnapshot) -> GenerateContentRequest {
        GenerateContentRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![
                    Part {
                        inline_data: Some(InlineData {
                            mime_type: frame.format.mime_type().to_string(),
                            data: frame.to_base64(),
                        }),
                        text: None,
                    },
                    Part {
                        inline_data: None,
                        text: Some(LIVE_PROMPT.to_string()),
                    },
                ],
            }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
            },
        }
    }
}

#[async_trait]
impl InferenceClient for GeminiClient {
    fn name(&self) -> &'static str {
        "Gemini API"
    }

    async fn analyze_frame(&self, frame: FrameSnapshot) -> Result<String, InferenceError> {
        debug!(
            "Submitting {}x{} frame ({} bytes) to {}",
            frame.width,
            frame.height,
            frame.bytes.len(),
            self.model
        );

        let body = self.request_body(&frame);
        let response = self
            .client
            .post(self.url())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| InferenceError::Transport(e.to_string()))?;

        let status = response.status();
        let response_text = response
            .text()
            .await
            .map_err(|e| InferenceError::Transport(format!("failed to read response body: {e}")))?;

        if !status.is_success() {
            let detail = serde_json::from_str::<ErrorResponse>(&response_text).ok();
            let (api_status, message) = match &detail {
                Some(detail) => (detail.error.status.as_deref(), detail.error.message.as_str()),
                None => (None, response_text.as_str()),
            };
            let failure = classify_failure(status.as_u16(), api_status, message);

            if failure.is_rate_limited() {
                warn!("Gemini rate limit hit ({}), skipping frame", status);
            } else {
                error!(
                    "Gemini request failed with status {}: {}",
                    status, response_text
                );
            }
            return Err(failure);
        }

        let parsed: GenerateContentResponse = serde_json::from_str(&response_text)
            .map_err(|e| InferenceError::Decode(e.to_string()))?;

        let text = parsed.text().trim().to_string();
        debug!("Frame verdict: {}", text);

        // An empty verdict is read as all-clear.
        if text.is_empty() {
            return Ok("SAFE".to_string());
        }
        Ok(text)
    }
}
