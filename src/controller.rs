//! Poll controller: decides when and whether the current page is analyzed.
//!
//! One controller is created per page-load. It owns every timer and all
//! per-page state:
//! - `Disabled`: no timers, activity ignored
//! - `Polling`: a repeating sample timer plus a debounce timer re-armed by
//!   scroll/selection activity
//!
//! Each sample cycle is deduplicated against the fingerprint of the last
//! analyzed text. Analyze calls run as spawned tasks and report back through
//! a completion channel; every completion carries the generation it was
//! issued under, and completions from before the last disablement are
//! dropped.

use crate::client::Analyzer;
use crate::config::{Config, MIN_POLL_INTERVAL};
use crate::pattern::PatternKind;
use crate::playback::{AudioPlayer, NullPlayer, PlaybackError};
use crate::render::{LogRenderer, Renderer};
use crate::sampler::{fingerprint, ContentSampler, Fingerprint};
use crate::storage::AllowlistStore;
use crate::types::{
    ActivitySignal, AnalysisError, AnalysisResult, Notice, PageContext, PollState,
};
use chrono::{DateTime, Utc};
use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, Interval, MissedTickBehavior, Sleep};
use tracing::{debug, info, trace, warn};

/// Timer settings for one controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub poll_interval: Duration,
    pub debounce: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(5000),
            debounce: Duration::from_millis(800),
        }
    }
}

impl From<&Config> for PollConfig {
    fn from(config: &Config) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            debounce: config.debounce(),
        }
    }
}

/// What one sample cycle did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The controller is disabled
    Inactive,
    /// The page had no visible text
    SkippedEmpty,
    /// Same fingerprint as the last analyzed sample
    SkippedUnchanged,
    /// An analyze request was issued
    Dispatched,
}

/// Snapshot of controller state
#[derive(Debug, Clone)]
pub struct ControllerStatus {
    pub state: PollState,
    pub sites: usize,
    pub cycles_dispatched: u32,
    pub results_received: u32,
    pub last_result_at: Option<DateTime<Utc>>,
    pub audio_available: bool,
    pub autoplay_attempted: bool,
}

/// An allowlist entry as listed in the panel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteEntry {
    pub pattern: String,
    pub kind: PatternKind,
    /// Whether this entry matches the current page
    pub matches_here: bool,
}

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("Controller has stopped")]
    Stopped,
    #[error(transparent)]
    Playback(#[from] PlaybackError),
}

/// Messages accepted by a running controller
enum Command {
    Activity(ActivitySignal),
    Refresh,
    AddSite {
        pattern: String,
        reply: oneshot::Sender<bool>,
    },
    RemoveSiteAt {
        index: usize,
        reply: oneshot::Sender<Option<String>>,
    },
    EnableHere {
        reply: oneshot::Sender<Option<String>>,
    },
    Sites {
        reply: oneshot::Sender<Vec<SiteEntry>>,
    },
    Play {
        reply: oneshot::Sender<Result<(), PlaybackError>>,
    },
    OpenAudio {
        reply: oneshot::Sender<Option<String>>,
    },
    Status {
        reply: oneshot::Sender<ControllerStatus>,
    },
    Shutdown,
}

/// Resolution of one analyze request
struct Completion {
    generation: u64,
    outcome: Result<AnalysisResult, AnalysisError>,
}

/// Cloneable handle for talking to a running controller
#[derive(Clone)]
pub struct ControllerHandle {
    tx: mpsc::Sender<Command>,
}

impl ControllerHandle {
    async fn send(&self, command: Command) -> Result<(), ControllerError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| ControllerError::Stopped)
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, ControllerError> {
        let (reply, rx) = oneshot::channel();
        self.send(build(reply)).await?;
        rx.await.map_err(|_| ControllerError::Stopped)
    }

    /// Report a scroll or selection change on the page
    pub async fn activity(&self, signal: ActivitySignal) -> Result<(), ControllerError> {
        self.send(Command::Activity(signal)).await
    }

    /// Re-check the allowlist (e.g. after another tab changed it)
    pub async fn refresh(&self) -> Result<(), ControllerError> {
        self.send(Command::Refresh).await
    }

    pub async fn add_site(&self, pattern: impl Into<String>) -> Result<bool, ControllerError> {
        let pattern = pattern.into();
        self.request(|reply| Command::AddSite { pattern, reply }).await
    }

    pub async fn remove_site_at(&self, index: usize) -> Result<Option<String>, ControllerError> {
        self.request(|reply| Command::RemoveSiteAt { index, reply })
            .await
    }

    pub async fn enable_here(&self) -> Result<Option<String>, ControllerError> {
        self.request(|reply| Command::EnableHere { reply }).await
    }

    pub async fn sites(&self) -> Result<Vec<SiteEntry>, ControllerError> {
        self.request(|reply| Command::Sites { reply }).await
    }

    /// Play the latest audio on user request
    pub async fn play(&self) -> Result<(), ControllerError> {
        self.request(|reply| Command::Play { reply }).await??;
        Ok(())
    }

    /// URL of the latest audio, if any
    pub async fn open_audio(&self) -> Result<Option<String>, ControllerError> {
        self.request(|reply| Command::OpenAudio { reply }).await
    }

    pub async fn status(&self) -> Result<ControllerStatus, ControllerError> {
        self.request(|reply| Command::Status { reply }).await
    }

    pub async fn shutdown(&self) -> Result<(), ControllerError> {
        self.send(Command::Shutdown).await
    }
}

/// Per-page polling state machine
pub struct PollController {
    page: PageContext,
    config: PollConfig,
    store: AllowlistStore,
    sampler: ContentSampler,
    analyzer: Arc<dyn Analyzer>,
    renderer: Arc<dyn Renderer>,
    player: Arc<dyn AudioPlayer>,
    state: PollState,
    /// Whether the initial state has been announced
    announced: bool,
    /// Fingerprint of the last text sent for analysis
    last_fingerprint: Option<Fingerprint>,
    /// Bumped on every disablement; stale completions carry an older value
    generation: u64,
    ticker: Option<Interval>,
    debounce: Option<Pin<Box<Sleep>>>,
    listening: bool,
    autoplay_attempted: bool,
    audio_url: Option<String>,
    cycles_dispatched: u32,
    results_received: u32,
    last_result_at: Option<DateTime<Utc>>,
    commands_tx: mpsc::Sender<Command>,
    commands_rx: mpsc::Receiver<Command>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
}

impl PollController {
    pub fn new(
        page: PageContext,
        config: PollConfig,
        store: AllowlistStore,
        sampler: ContentSampler,
        analyzer: Arc<dyn Analyzer>,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::channel(64);
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();

        Self {
            page,
            config,
            store,
            sampler,
            analyzer,
            renderer: Arc::new(LogRenderer),
            player: Arc::new(NullPlayer),
            state: PollState::Disabled,
            announced: false,
            last_fingerprint: None,
            generation: 0,
            ticker: None,
            debounce: None,
            listening: false,
            autoplay_attempted: false,
            audio_url: None,
            cycles_dispatched: 0,
            results_received: 0,
            last_result_at: None,
            commands_tx,
            commands_rx,
            completions_tx,
            completions_rx,
        }
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_player(mut self, player: Arc<dyn AudioPlayer>) -> Self {
        self.player = player;
        self
    }

    /// Handle for sending commands once `run` is driving the controller
    pub fn handle(&self) -> ControllerHandle {
        ControllerHandle {
            tx: self.commands_tx.clone(),
        }
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    pub fn page(&self) -> &PageContext {
        &self.page
    }

    pub fn store(&self) -> &AllowlistStore {
        &self.store
    }

    pub fn has_timer(&self) -> bool {
        self.ticker.is_some()
    }

    pub fn has_pending_debounce(&self) -> bool {
        self.debounce.is_some()
    }

    fn is_allowed_here(&self) -> bool {
        self.store.is_allowed(&self.page.host, &self.page.url)
    }

    /// Reconcile the poll state with the allowlist
    pub async fn refresh_enabled_state(&mut self) {
        if self.is_allowed_here() {
            self.start_polling().await;
        } else {
            self.stop_polling();
        }
        self.announced = true;
    }

    async fn start_polling(&mut self) {
        if self.state == PollState::Polling {
            return;
        }

        info!("Polling enabled for {}", self.page.host);
        self.state = PollState::Polling;
        self.renderer.on_state_change(PollState::Polling);

        self.analyze_now().await;

        // The enabling cycle already ran, so the first tick is one period out
        let period = self.config.poll_interval.max(MIN_POLL_INTERVAL);
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.ticker = Some(ticker);
        self.listening = true;
    }

    fn stop_polling(&mut self) {
        let was_polling = self.state == PollState::Polling;

        self.ticker = None;
        self.debounce = None;
        self.listening = false;
        self.audio_url = None;

        if was_polling {
            self.generation += 1;
            info!("Polling disabled for {}", self.page.host);
        }
        self.state = PollState::Disabled;

        if was_polling || !self.announced {
            self.renderer.on_playback_available(false);
            self.renderer.on_state_change(PollState::Disabled);
        }
    }

    /// Arm (or re-arm) the debounce timer for an activity signal
    pub fn on_activity(&mut self, signal: ActivitySignal) {
        if !self.listening {
            trace!("Ignoring {:?} while disabled", signal);
            return;
        }

        trace!("{:?}, debounce re-armed", signal);
        self.debounce = Some(Box::pin(tokio::time::sleep(self.config.debounce)));
    }

    /// Run one sample cycle
    pub async fn analyze_now(&mut self) -> CycleOutcome {
        if self.state != PollState::Polling {
            return CycleOutcome::Inactive;
        }

        let text = self.sampler.sample().await;
        if text.is_empty() {
            trace!("Empty sample, skipping cycle");
            return CycleOutcome::SkippedEmpty;
        }

        let current = fingerprint(&text);
        if self.last_fingerprint == Some(current) {
            trace!("Content unchanged ({}), skipping", current);
            return CycleOutcome::SkippedUnchanged;
        }

        // Advanced before the request resolves: a failed request for this
        // content is not retried until the content changes.
        self.last_fingerprint = Some(current);
        self.audio_url = None;
        self.renderer.on_scanning();
        self.renderer.on_playback_available(false);
        self.cycles_dispatched += 1;

        debug!(
            "Content changed ({}), analyzing {} chars",
            current,
            text.chars().count()
        );

        let analyzer = self.analyzer.clone();
        let tx = self.completions_tx.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            let outcome = analyzer.analyze(&text).await;
            // The controller may be gone; nothing to report to then
            let _ = tx.send(Completion {
                generation,
                outcome,
            });
        });

        CycleOutcome::Dispatched
    }

    /// Wait for the next analyze request to resolve and apply it.
    ///
    /// Returns whether the result reached the render surface.
    pub async fn next_completion(&mut self) -> bool {
        match self.completions_rx.recv().await {
            Some(completion) => self.handle_completion(completion).await,
            None => false,
        }
    }

    async fn handle_completion(&mut self, completion: Completion) -> bool {
        if completion.generation != self.generation || self.state != PollState::Polling {
            debug!("Ignoring stale analysis response");
            return false;
        }

        match completion.outcome {
            Ok(result) => self.apply_result(result).await,
            Err(e) => {
                debug!("Analysis failed: {}", e);
                self.audio_url = None;
                self.renderer.on_error(e.kind());
                self.renderer.on_playback_available(false);
            }
        }
        true
    }

    async fn apply_result(&mut self, result: AnalysisResult) {
        self.results_received += 1;
        self.last_result_at = Some(Utc::now());
        self.renderer.on_result(&result);

        let audio_url = match result.audio_url.filter(|u| !u.is_empty()) {
            Some(url) => url,
            None => {
                self.audio_url = None;
                self.renderer.on_playback_available(false);
                return;
            }
        };

        self.audio_url = Some(audio_url.clone());
        self.renderer.on_playback_available(true);

        if self.page.secure || self.autoplay_attempted || !self.is_allowed_here() {
            return;
        }

        // One automatic attempt per session, whatever its outcome
        self.autoplay_attempted = true;
        if let Err(e) = self.player.play(&audio_url).await {
            warn!("Autoplay refused: {}", e);
            self.renderer.on_notice(Notice::AutoplayBlocked);
        }
    }

    /// Play the latest audio on user request
    pub async fn play(&self) -> Result<(), PlaybackError> {
        match &self.audio_url {
            Some(url) => self.player.play(url).await,
            None => Err(PlaybackError::NoAudio),
        }
    }

    pub fn audio_url(&self) -> Option<&str> {
        self.audio_url.as_deref()
    }

    /// Add an allowlist entry; the poll state follows if the list changed
    pub async fn add_site(&mut self, pattern: &str) -> bool {
        let changed = self.store.add(pattern);
        if changed {
            self.refresh_enabled_state().await;
        }
        changed
    }

    pub async fn remove_site_at(&mut self, index: usize) -> Option<String> {
        let removed = self.store.remove_at(index);
        self.refresh_enabled_state().await;
        removed
    }

    /// Allow the current host using the suggested pattern
    pub async fn enable_here(&mut self) -> Option<String> {
        let added = self.store.enable_site(&self.page.host);
        if added.is_some() {
            self.refresh_enabled_state().await;
        }
        added
    }

    pub fn sites(&self) -> Vec<SiteEntry> {
        self.store
            .load()
            .into_iter()
            .map(|pattern| SiteEntry {
                kind: PatternKind::classify(&pattern),
                matches_here: crate::pattern::matches(&self.page.host, &self.page.url, &pattern),
                pattern,
            })
            .collect()
    }

    pub fn status(&self) -> ControllerStatus {
        ControllerStatus {
            state: self.state,
            sites: self.store.load().len(),
            cycles_dispatched: self.cycles_dispatched,
            results_received: self.results_received,
            last_result_at: self.last_result_at,
            audio_available: self.audio_url.is_some(),
            autoplay_attempted: self.autoplay_attempted,
        }
    }

    /// Returns false when the controller should stop
    async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Activity(signal) => self.on_activity(signal),
            Command::Refresh => self.refresh_enabled_state().await,
            Command::AddSite { pattern, reply } => {
                let _ = reply.send(self.add_site(&pattern).await);
            }
            Command::RemoveSiteAt { index, reply } => {
                let _ = reply.send(self.remove_site_at(index).await);
            }
            Command::EnableHere { reply } => {
                let _ = reply.send(self.enable_here().await);
            }
            Command::Sites { reply } => {
                let _ = reply.send(self.sites());
            }
            Command::Play { reply } => {
                let _ = reply.send(self.play().await);
            }
            Command::OpenAudio { reply } => {
                let _ = reply.send(self.audio_url.clone());
            }
            Command::Status { reply } => {
                let _ = reply.send(self.status());
            }
            Command::Shutdown => return false,
        }
        true
    }

    /// Drive the controller until shutdown.
    ///
    /// Evaluates the allowlist once on entry, then multiplexes commands,
    /// analyze completions, the poll timer and the debounce timer.
    pub async fn run(mut self) {
        self.refresh_enabled_state().await;

        loop {
            tokio::select! {
                Some(command) = self.commands_rx.recv() => {
                    if !self.handle_command(command).await {
                        break;
                    }
                }
                Some(completion) = self.completions_rx.recv() => {
                    self.handle_completion(completion).await;
                }
                _ = next_tick(self.ticker.as_mut()) => {
                    trace!("Poll tick");
                    self.analyze_now().await;
                }
                _ = debounce_elapsed(self.debounce.as_mut()) => {
                    self.debounce = None;
                    trace!("Debounce elapsed");
                    self.analyze_now().await;
                }
                else => break,
            }
        }

        self.stop_polling();
        info!("Controller for {} stopped", self.page.host);
    }
}

async fn next_tick(ticker: Option<&mut Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => pending().await,
    }
}

async fn debounce_elapsed(sleep: Option<&mut Pin<Box<Sleep>>>) {
    match sleep {
        Some(sleep) => sleep.as_mut().await,
        None => pending().await,
    }
}
