//! Analysis service client.
//!
//! Sends sampled page text to `POST {base_url}/analyze` and maps the reply
//! into an `AnalysisResult`. There is no retry here: the next poll cycle is
//! the retry.

use crate::config::BackendConfig;
use crate::types::{AnalysisError, AnalysisResult, AnalyzeRequest, AnalyzeResponse};
use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

/// Turns a text sample into an analysis result
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, text: &str) -> Result<AnalysisResult, AnalysisError>;
}

pub struct AnalysisClient {
    base_url: String,
    client: Client,
}

impl AnalysisClient {
    pub fn new(config: &BackendConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(config.timeout()).build()?;

        Ok(Self {
            base_url: config.base_url.clone(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Join a path onto the base URL, dropping one trailing slash
    pub fn endpoint(&self, path: &str) -> String {
        let base = self.base_url.strip_suffix('/').unwrap_or(&self.base_url);
        format!("{}{}", base, path)
    }

    /// Check that the service answers `GET /health`
    pub async fn health(&self) -> Result<(), AnalysisError> {
        let url = self.endpoint("/health");
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| network_error(&url, e))?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(AnalysisError::Network(format!(
                "{} returned status {}",
                url,
                resp.status()
            )))
        }
    }
}

fn network_error(url: &str, e: reqwest::Error) -> AnalysisError {
    if e.is_connect() {
        warn!("Cannot connect to analysis service at {}", url);
    } else if e.is_timeout() {
        warn!("Analysis request to {} timed out", url);
    } else {
        warn!("Analysis request to {} failed: {}", url, e);
    }
    AnalysisError::Network(e.to_string())
}

#[async_trait]
impl Analyzer for AnalysisClient {
    async fn analyze(&self, text: &str) -> Result<AnalysisResult, AnalysisError> {
        let url = self.endpoint("/analyze");
        debug!("Sending {} chars to {}", text.chars().count(), url);

        let resp = self
            .client
            .post(&url)
            .json(&AnalyzeRequest { text })
            .send()
            .await
            .map_err(|e| network_error(&url, e))?;

        // Error bodies are still parsed: a JSON body without a dialogue is an
        // empty result, anything unreadable is a network error.
        if !resp.status().is_success() {
            warn!("Analysis service returned status {}", resp.status());
        }

        let payload = resp.json::<AnalyzeResponse>().await.map_err(|e| {
            warn!("Failed to parse analysis response: {}", e);
            AnalysisError::Network(e.to_string())
        })?;

        payload.into_result()
    }
}
