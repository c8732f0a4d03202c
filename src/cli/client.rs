//! HTTP client for a running service's local API.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use crate::controller::{LiveCommand, LiveStatus};

pub struct LiveApiClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

impl LiveApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn local(port: u16) -> Self {
        Self::new(&format!("http://127.0.0.1:{port}"))
    }

    pub async fn status(&self) -> Result<LiveStatus> {
        let response = self
            .client
            .get(format!("{}/status", self.base_url))
            .send()
            .await
            .context("Failed to reach ResQ-Eye. Is the service running?")?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        response
            .json::<LiveStatus>()
            .await
            .context("Failed to parse status response")
    }

    pub async fn command(&self, command: LiveCommand) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/command/{}", self.base_url, command.as_str()))
            .send()
            .await
            .context("Failed to reach ResQ-Eye. Is the service running?")?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }
        Ok(())
    }

    async fn error_from(response: reqwest::Response) -> anyhow::Error {
        let status = response.status();
        match response.json::<ErrorBody>().await {
            Ok(body) => anyhow!("{} ({})", body.message, status),
            Err(_) => anyhow!("Request failed with status {}", status),
        }
    }
}
