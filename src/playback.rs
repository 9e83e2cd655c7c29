//! Audio playback of synthesized responses.
//!
//! Playback is a capability handed to the controller. `play` resolves once
//! playback has started or has been refused; it never waits for the audio
//! to finish.

use async_trait::async_trait;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum PlaybackError {
    #[error("No audio available")]
    NoAudio,
    #[error("Playback refused: {0}")]
    Rejected(String),
    #[error("Failed to start player: {0}")]
    Spawn(#[from] std::io::Error),
}

#[async_trait]
pub trait AudioPlayer: Send + Sync {
    async fn play(&self, url: &str) -> Result<(), PlaybackError>;
}

/// Refuses every request; used when no player is configured
#[derive(Debug, Default)]
pub struct NullPlayer;

#[async_trait]
impl AudioPlayer for NullPlayer {
    async fn play(&self, url: &str) -> Result<(), PlaybackError> {
        debug!("No player configured, refusing {}", url);
        Err(PlaybackError::Rejected("no audio player configured".to_string()))
    }
}

/// Plays audio by launching an external program with the URL as last argument.
///
/// Starting a new clip stops the previous one.
pub struct CommandPlayer {
    program: String,
    args: Vec<String>,
    current: Mutex<Option<Child>>,
}

impl CommandPlayer {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            current: Mutex::new(None),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

#[async_trait]
impl AudioPlayer for CommandPlayer {
    async fn play(&self, url: &str) -> Result<(), PlaybackError> {
        let mut current = self.current.lock().await;

        if let Some(mut previous) = current.take() {
            if let Ok(None) = previous.try_wait() {
                debug!("Stopping previous playback");
                previous.start_kill().ok();
            }
        }

        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        info!("🔊 Playing {} via {}", url, self.program);
        *current = Some(child);
        Ok(())
    }
}
