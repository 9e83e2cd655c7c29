//! Core types shared by the sampler, the analysis client and the controller.
//!
//! This module defines the page context, the analysis result model and the
//! outcome/error enums that reach the render surface.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Whether the assistant is actively scanning the current page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PollState {
    /// The page is not on the allowlist; no timers, no listeners
    Disabled,
    /// Periodic sampling and activity listeners are live
    Polling,
}

impl PollState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PollState::Disabled => "disabled",
            PollState::Polling => "polling",
        }
    }
}

/// The page the controller is attached to, resolved once per page-load
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageContext {
    /// Full page URL as the user sees it
    pub url: String,
    /// Hostname (no port)
    pub host: String,
    /// False only for plain `http` pages
    pub secure: bool,
}

impl PageContext {
    /// Build a context from a page URL.
    ///
    /// Returns `None` for URLs without a host (e.g. `about:blank`, `data:`).
    pub fn from_url(raw: &str) -> Option<Self> {
        let parsed = url::Url::parse(raw).ok()?;
        let host = parsed.host_str()?.to_string();

        Some(Self {
            url: raw.to_string(),
            host,
            secure: parsed.scheme() != "http",
        })
    }

    pub fn new(url: impl Into<String>, host: impl Into<String>, secure: bool) -> Self {
        Self {
            url: url.into(),
            host: host.into(),
            secure,
        }
    }
}

/// Activity signals that re-trigger sampling after a quiet period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivitySignal {
    /// The page was scrolled
    Scroll,
    /// The text selection changed
    SelectionChange,
}

/// Danger/noise breakdown returned alongside a dialogue
#[derive(Debug, Clone, PartialEq)]
pub struct Metrics {
    /// Share of threat signals, rounded and clamped to 0..=100
    pub threat_percent: u8,
    /// Share of noise signals, rounded and clamped to 0..=100
    pub noise_percent: u8,
    pub danger_count: Option<f64>,
    pub noise_count: Option<f64>,
    pub drama_units: Option<f64>,
}

impl Metrics {
    /// Normalize the raw wire metrics.
    ///
    /// An absent or zero noise share falls back to the complement of the
    /// threat share.
    pub fn from_raw(raw: &RawMetrics) -> Self {
        let threat_percent = clamp_percent(raw.threat_percent.unwrap_or(0.0));
        let noise_percent = match raw.noise_percent {
            Some(np) if np != 0.0 => clamp_percent(np),
            _ => 100 - threat_percent,
        };

        Self {
            threat_percent,
            noise_percent,
            danger_count: raw.danger_count,
            noise_count: raw.noise_count,
            drama_units: raw.drama_units,
        }
    }

    /// One-line meter text, e.g. `Threat 40% • Noise 60%`
    pub fn summary(&self) -> String {
        format!(
            "Threat {}% • Noise {}%",
            self.threat_percent, self.noise_percent
        )
    }

    /// Raw counters, only when all three are known
    pub fn breakdown(&self) -> Option<String> {
        match (self.danger_count, self.noise_count, self.drama_units) {
            (Some(danger), Some(noise), Some(drama)) => Some(format!(
                "danger={}, noise={}, drama={}",
                danger, noise, drama
            )),
            _ => None,
        }
    }
}

fn clamp_percent(value: f64) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.round().clamp(0.0, 100.0) as u8
}

/// A successful analysis of one sample
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisResult {
    pub dialogue: String,
    pub score: f64,
    /// Severity bucket reported by the service (`low`, `medium`, `high`)
    pub category: Option<String>,
    pub metrics: Option<Metrics>,
    /// Synthesized speech for the dialogue; `None` means nothing to play
    pub audio_url: Option<String>,
}

impl AnalysisResult {
    /// Text shown in the bubble: dialogue followed by the rounded score
    pub fn summary(&self) -> String {
        format!("{} ({})", self.dialogue, self.score.round() as i64)
    }

    pub fn has_audio(&self) -> bool {
        self.audio_url.as_deref().is_some_and(|u| !u.is_empty())
    }
}

/// Wire shape of `POST /analyze` responses
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalyzeResponse {
    #[serde(default)]
    pub dialogue: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub score: Option<f64>,
    #[serde(default)]
    pub category: Option<String>,
    /// Best-effort: a malformed `metrics` value is dropped, not an error
    #[serde(default, deserialize_with = "lenient_metrics")]
    pub metrics: Option<RawMetrics>,
    #[serde(default)]
    pub audio_url: Option<String>,
}

/// Wire shape of the `metrics` object; unknown keys are ignored and
/// non-numeric values read as absent
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawMetrics {
    #[serde(default, deserialize_with = "lenient_number")]
    pub threat_percent: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub noise_percent: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub danger_count: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub noise_count: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub drama_units: Option<f64>,
}

fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value.as_f64())
}

fn lenient_metrics<'de, D>(deserializer: D) -> Result<Option<RawMetrics>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::Object(_) => Ok(serde_json::from_value(value).ok()),
        _ => Ok(None),
    }
}

/// Request body of `POST /analyze`
#[derive(Debug, Clone, Serialize)]
pub struct AnalyzeRequest<'a> {
    pub text: &'a str,
}

impl AnalyzeResponse {
    /// Map the wire payload into a result.
    ///
    /// A missing or blank dialogue is an empty result, not a network failure.
    /// That holds even when an `audio_url` is present: with no dialogue to
    /// show there is nothing to play either.
    pub fn into_result(self) -> Result<AnalysisResult, AnalysisError> {
        let dialogue = match self.dialogue {
            Some(d) if !d.trim().is_empty() => d,
            _ => return Err(AnalysisError::EmptyResult),
        };

        Ok(AnalysisResult {
            dialogue,
            score: self.score.unwrap_or(0.0),
            category: self.category,
            metrics: self.metrics.as_ref().map(Metrics::from_raw),
            audio_url: self.audio_url.filter(|u| !u.is_empty()),
        })
    }
}

/// Errors from the analysis service
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AnalysisError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Analysis returned no usable result")]
    EmptyResult,
}

impl AnalysisError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AnalysisError::Network(_) => ErrorKind::Network,
            AnalysisError::EmptyResult => ErrorKind::EmptyResult,
        }
    }
}

/// Failure categories surfaced to the render surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Service unreachable or response unreadable
    Network,
    /// Service answered but had nothing to say
    EmptyResult,
}

/// Transient, non-blocking messages for the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Automatic playback was refused; the user has to start it
    AutoplayBlocked,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_context_from_url() {
        let ctx = PageContext::from_url("http://www.example.com:8080/a?q=1").unwrap();
        assert_eq!(ctx.host, "www.example.com");
        assert!(!ctx.secure);

        let ctx = PageContext::from_url("https://example.com/").unwrap();
        assert!(ctx.secure);

        assert!(PageContext::from_url("about:blank").is_none());
        assert!(PageContext::from_url("not a url").is_none());
    }

    #[test]
    fn test_summary_rounds_score() {
        let result = AnalysisResult {
            dialogue: "Careful!".to_string(),
            score: 72.0,
            category: None,
            metrics: None,
            audio_url: None,
        };
        assert_eq!(result.summary(), "Careful! (72)");
        assert!(!result.has_audio());

        let result = AnalysisResult {
            score: 44.5,
            ..result
        };
        assert_eq!(result.summary(), "Careful! (45)");
    }

    #[test]
    fn test_response_without_dialogue_is_empty() {
        let response: AnalyzeResponse = serde_json::from_str(r#"{"score": 10}"#).unwrap();
        assert_eq!(response.into_result(), Err(AnalysisError::EmptyResult));

        let response: AnalyzeResponse =
            serde_json::from_str(r#"{"dialogue": "  ", "audio_url": "http://a/x.mp3"}"#).unwrap();
        assert_eq!(response.into_result(), Err(AnalysisError::EmptyResult));
    }

    #[test]
    fn test_response_mapping() {
        let json = r#"{
            "dialogue": "Careful!",
            "score": 72,
            "category": "high",
            "matched_keywords": {"danger": ["bomb"]},
            "metrics": {"threat_percent": 66.6, "danger_count": 2, "noise_count": 1, "drama_units": 0},
            "audio_url": "http://localhost:8000/audio/abc.mp3"
        }"#;
        let result = serde_json::from_str::<AnalyzeResponse>(json)
            .unwrap()
            .into_result()
            .unwrap();

        assert_eq!(result.category.as_deref(), Some("high"));
        assert!(result.has_audio());

        let metrics = result.metrics.unwrap();
        assert_eq!(metrics.threat_percent, 67);
        assert_eq!(metrics.noise_percent, 33);
        assert_eq!(metrics.summary(), "Threat 67% • Noise 33%");
        assert_eq!(
            metrics.breakdown().as_deref(),
            Some("danger=2, noise=1, drama=0")
        );
    }

    #[test]
    fn test_metrics_accept_any_number() {
        let json = r#"{
            "dialogue": "Careful!",
            "score": 72,
            "metrics": {"threat_percent": 40, "danger_count": 2.0, "noise_count": -1, "drama_units": 1.5}
        }"#;
        let result = serde_json::from_str::<AnalyzeResponse>(json)
            .unwrap()
            .into_result()
            .unwrap();

        let metrics = result.metrics.unwrap();
        assert_eq!(metrics.noise_percent, 60);
        assert_eq!(
            metrics.breakdown().as_deref(),
            Some("danger=2, noise=-1, drama=1.5")
        );
    }

    #[test]
    fn test_malformed_metrics_keep_dialogue() {
        let json = r#"{"dialogue": "Careful!", "score": 72, "metrics": "n/a"}"#;
        let result = serde_json::from_str::<AnalyzeResponse>(json)
            .unwrap()
            .into_result()
            .unwrap();
        assert_eq!(result.summary(), "Careful! (72)");
        assert!(result.metrics.is_none());

        let json = r#"{"dialogue": "Careful!", "score": 72, "metrics": {"threat_percent": "high", "danger_count": null}}"#;
        let result = serde_json::from_str::<AnalyzeResponse>(json)
            .unwrap()
            .into_result()
            .unwrap();
        let metrics = result.metrics.unwrap();
        assert_eq!(metrics.threat_percent, 0);
        assert_eq!(metrics.noise_percent, 100);
        assert!(metrics.danger_count.is_none());
    }

    #[test]
    fn test_metrics_clamped() {
        let raw = RawMetrics {
            threat_percent: Some(140.0),
            noise_percent: Some(-3.0),
            ..Default::default()
        };
        let metrics = Metrics::from_raw(&raw);
        assert_eq!(metrics.threat_percent, 100);
        assert_eq!(metrics.noise_percent, 0);
        assert!(metrics.breakdown().is_none());
    }

    #[test]
    fn test_empty_audio_url_dropped() {
        let response: AnalyzeResponse =
            serde_json::from_str(r#"{"dialogue": "hi", "score": 1, "audio_url": ""}"#).unwrap();
        let result = response.into_result().unwrap();
        assert!(result.audio_url.is_none());
    }
}
