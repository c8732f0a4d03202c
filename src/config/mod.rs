use crate::alerts::speech::DEFAULT_SPEECH_RATE;
use crate::capture::{CameraDeviceConfig, Facing};
use crate::global;
use crate::polling::PollingConfig;
use crate::streaming::StreamingConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Environment variables consulted for the Gemini key, in order.
const API_KEY_VARS: &[&str] = &["GEMINI_API_KEY", "API_KEY"];

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub inference: InferenceConfig,
    pub polling: PollingConfig,
    pub streaming: StreamingConfig,
    pub capture: CaptureConfig,
    pub alerts: AlertsConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub api_key: Option<String>,
    pub endpoint: Option<String>,
    pub model: Option<String>,
    pub live_endpoint: Option<String>,
    pub live_model: Option<String>,
    pub temperature: f32,
    /// Per-request limit for frame analysis. Unset waits for the reply.
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Camera to try first. Unset means any.
    pub preferred_facing: Option<Facing>,
    /// Skip the cameras and start on the synthetic feed.
    pub force_simulation: bool,
    pub devices: Vec<CameraDeviceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    pub audio_enabled: bool,
    /// TTS program. Auto-detected when unset.
    pub speech_command: Option<String>,
    pub speech_rate: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub port: u16,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: None,
            model: None,
            live_endpoint: None,
            live_model: None,
            temperature: 0.7,
            request_timeout_secs: None,
        }
    }
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            audio_enabled: true,
            speech_command: None,
            speech_rate: DEFAULT_SPEECH_RATE,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { port: 3737 }
    }
}

impl InferenceConfig {
    /// Key from the environment, else from the config file.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.resolve_api_key_with(|var| std::env::var(var).ok())
    }

    fn resolve_api_key_with(&self, lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
        API_KEY_VARS
            .iter()
            .filter_map(|var| lookup(*var))
            .find(|key| !key.trim().is_empty())
            .or_else(|| self.api_key.clone().filter(|key| !key.trim().is_empty()))
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            info!(
                "Config file not found, creating default at {:?}",
                config_path
            );
            let config = Self::default();
            config.save_to(config_path)?;
            return Ok(config);
        }

        let content =
            std::fs::read_to_string(config_path).context("Failed to read config file")?;

        let config: Self = toml::from_str(&content).context("Failed to parse config file")?;

        info!("Loaded config from {:?}", config_path);
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(config_path, content).context("Failed to write config file")?;

        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        global::config_file()
    }
}
