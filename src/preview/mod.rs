//! Probing the preview address from the terminal.

use std::time::Duration;

use tracing::debug;

use crate::config::types::PreviewConfig;
use crate::error::{Result, SandlotError};

/// Outcome of one preview fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewPage {
    pub url: String,
    pub status: u16,
    /// First non-empty line of the body, trimmed
    pub headline: Option<String>,
}

/// Fetches the page the sandboxed server is serving.
pub struct PreviewProbe {
    client: reqwest::Client,
}

impl PreviewProbe {
    pub fn new(config: &PreviewConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| SandlotError::Preview(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    pub async fn fetch(&self, url: &str) -> Result<PreviewPage> {
        debug!(url = %url, "Fetching preview");

        let response = self.client.get(url).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        Ok(PreviewPage {
            url: url.to_string(),
            status,
            headline: headline(&body),
        })
    }
}

fn headline(body: &str) -> Option<String> {
    const MAX_CHARS: usize = 120;

    body.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(|line| line.chars().take(MAX_CHARS).collect())
}
