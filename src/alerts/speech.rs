//! Spoken alerts through a local text-to-speech command.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};
use which::which;

use super::SpeechOutput;

/// Commands tried in order when none is configured.
const SPEECH_COMMANDS: &[&str] = &["espeak-ng", "espeak", "spd-say", "say"];

pub const DEFAULT_SPEECH_RATE: u32 = 190;

/// Speaks through `espeak-ng`, `espeak`, `spd-say` or macOS `say`.
///
/// Utterances run in the background; [`SpeechOutput::is_speaking`] reports
/// whether the last one is still going.
pub struct CommandSpeech {
    program: PathBuf,
    rate: u32,
    current: Mutex<Option<Child>>,
}

impl CommandSpeech {
    pub fn detect(preferred: Option<&str>, rate: u32) -> Result<Self> {
        if let Some(choice) = preferred {
            match which(choice) {
                Ok(program) => {
                    info!("Using {} for spoken alerts (per config)", choice);
                    return Ok(Self::with_program(program, rate));
                }
                Err(_) => warn!(
                    "Speech command '{}' not found, falling back to auto-detect",
                    choice
                ),
            }
        }

        for candidate in SPEECH_COMMANDS {
            if let Ok(program) = which(candidate) {
                info!("Using {} for spoken alerts (auto-detected)", candidate);
                return Ok(Self::with_program(program, rate));
            }
        }

        Err(anyhow!(
            "No text-to-speech command found (tried {})",
            SPEECH_COMMANDS.join(", ")
        ))
    }

    pub fn with_program(program: PathBuf, rate: u32) -> Self {
        Self {
            program,
            rate,
            current: Mutex::new(None),
        }
    }

    fn args(&self, text: &str) -> Vec<String> {
        let name = self
            .program
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();

        match name.as_str() {
            "spd-say" => {
                // spd-say takes a relative rate in [-100, 100]
                let relative = ((self.rate as i64 - 175) / 2).clamp(-100, 100);
                vec!["-r".into(), relative.to_string(), text.into()]
            }
            "say" => vec!["-r".into(), self.rate.to_string(), text.into()],
            _ => vec!["-s".into(), self.rate.to_string(), text.into()],
        }
    }
}

#[async_trait]
impl SpeechOutput for CommandSpeech {
    async fn speak(&self, text: &str) -> Result<()> {
        let child = Command::new(&self.program)
            .args(self.args(text))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to run {}", self.program.display()))?;

        debug!("Speaking: {}", text);
        let mut current = self
            .current
            .lock()
            .map_err(|_| anyhow!("speech state poisoned"))?;
        *current = Some(child);
        Ok(())
    }

    fn is_speaking(&self) -> bool {
        let Ok(mut current) = self.current.lock() else {
            return false;
        };
        let running = match current.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        };
        if !running {
            *current = None;
        }
        running
    }
}

/// Speech output for hosts without a TTS command.
#[derive(Debug, Default)]
pub struct SilentSpeech;

#[async_trait]
impl SpeechOutput for SilentSpeech {
    async fn speak(&self, text: &str) -> Result<()> {
        info!("(silent) {}", text);
        Ok(())
    }

    fn is_speaking(&self) -> bool {
        false
    }
}
