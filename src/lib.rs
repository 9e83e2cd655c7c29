//! KPK overlay - allowlist-gated page assistant
//!
//! Periodically samples the visible text of an allowed page, sends changed
//! samples to an analysis service and surfaces the reply (a short dialogue,
//! a score and optional audio).
//!
//! - **pattern / storage**: allowlist matching and persistence
//! - **sampler / page**: visible-text extraction, normalization, fingerprints
//! - **client**: the HTTP analysis service
//! - **controller**: the per-page poll state machine
//! - **render / playback / panel**: what the user sees, hears and types
//!
//! # Architecture
//!
//! One `PollController` runs per page as a tokio task. Timers, activity
//! signals, panel commands and analysis completions all funnel into its
//! event loop, so per-page state has a single owner.

pub mod client;
pub mod config;
pub mod controller;
pub mod page;
pub mod panel;
pub mod pattern;
pub mod playback;
pub mod render;
pub mod sampler;
pub mod storage;
pub mod types;

// Re-export commonly used types
pub use client::{AnalysisClient, Analyzer};
pub use config::Config;
pub use controller::{
    ControllerError, ControllerHandle, ControllerStatus, CycleOutcome, PollConfig,
    PollController, SiteEntry,
};
pub use page::{HtmlPage, PageError, PageSource, StaticPage};
pub use pattern::{matches, quick_enable_candidate, PatternKind};
pub use playback::{AudioPlayer, CommandPlayer, NullPlayer, PlaybackError};
pub use render::{LogRenderer, Renderer};
pub use sampler::{fingerprint, normalize_text, ContentSampler, Fingerprint};
pub use storage::{
    AllowlistStore, FileKeyValueStore, HostBridge, KeyValueBridge, KeyValueStore,
    MemoryKeyValueStore, StorageError,
};
pub use types::{
    ActivitySignal, AnalysisError, AnalysisResult, ErrorKind, Metrics, Notice, PageContext,
    PollState,
};
