//! Render surface the controller reports to.
//!
//! The controller never draws anything itself; it emits state changes,
//! results and errors here and the embedder decides how to show them.

use crate::types::{AnalysisResult, ErrorKind, Notice, PollState};
use tracing::{info, warn};

pub trait Renderer: Send + Sync {
    fn on_state_change(&self, state: PollState);

    /// A request is in flight for freshly changed content
    fn on_scanning(&self);

    fn on_result(&self, result: &AnalysisResult);

    fn on_error(&self, kind: ErrorKind);

    /// Play/open affordances became usable (`true`) or unusable (`false`)
    fn on_playback_available(&self, available: bool);

    fn on_notice(&self, notice: Notice);
}

/// Message shown for each state
pub fn state_message(state: PollState) -> &'static str {
    match state {
        PollState::Disabled => "Disabled on this site. Use `enable` to turn it on.",
        PollState::Polling => "Scanning…",
    }
}

pub fn error_message(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Network => "Connection failed",
        ErrorKind::EmptyResult => "No result available",
    }
}

pub fn notice_message(notice: &Notice) -> &'static str {
    match notice {
        Notice::AutoplayBlocked => "🐶 Autoplay was blocked. Use `play` or `open` to listen.",
    }
}

/// Renders everything through `tracing`
#[derive(Debug, Default)]
pub struct LogRenderer;

impl Renderer for LogRenderer {
    fn on_state_change(&self, state: PollState) {
        info!("🐶 {}", state_message(state));
    }

    fn on_scanning(&self) {
        info!("🐶 {}", state_message(PollState::Polling));
    }

    fn on_result(&self, result: &AnalysisResult) {
        info!("🐶 {}", result.summary());
        if let Some(metrics) = &result.metrics {
            match metrics.breakdown() {
                Some(breakdown) => info!("   {} ({})", metrics.summary(), breakdown),
                None => info!("   {}", metrics.summary()),
            }
        }
    }

    fn on_error(&self, kind: ErrorKind) {
        warn!("🐶 {}", error_message(kind));
    }

    fn on_playback_available(&self, available: bool) {
        if available {
            info!("   ▶️  audio ready (`play` / `open`)");
        }
    }

    fn on_notice(&self, notice: Notice) {
        info!("{}", notice_message(&notice));
    }
}
