//! Line-oriented control panel.
//!
//! Each input line is parsed into a `PanelCommand` and executed against a
//! running controller. Output is returned as text for the caller to print.

use crate::controller::{ControllerError, ControllerHandle};
use crate::playback::PlaybackError;
use crate::render::state_message;
use crate::types::ActivitySignal;
use std::fmt::Write as _;
use thiserror::Error;

pub const HELP: &str = "\
Commands:
  scroll          simulate a scroll on the page
  select          simulate a selection change
  enable          allow the current site
  add <pattern>   add an allowlist entry (example.com, *.example.com, /path)
  remove <n>      remove allowlist entry number n
  sites           list allowlist entries
  play            play the latest audio
  open            print the latest audio URL
  status          show controller status
  help            show this message
  quit            exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PanelCommand {
    Activity(ActivitySignal),
    Enable,
    Add(String),
    /// One-based index as shown by `sites`
    Remove(usize),
    Sites,
    Play,
    Open,
    Status,
    Help,
    Quit,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    #[error("Unknown command: {0} (try `help`)")]
    Unknown(String),
    #[error("Usage: {0}")]
    Usage(&'static str),
}

impl PanelCommand {
    /// Parse one input line; blank lines yield `None`
    pub fn parse(line: &str) -> Result<Option<Self>, ParseError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }

        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        let command = match word.to_lowercase().as_str() {
            "scroll" => Self::Activity(ActivitySignal::Scroll),
            "select" | "selection" => Self::Activity(ActivitySignal::SelectionChange),
            "enable" => Self::Enable,
            "add" => {
                if rest.is_empty() {
                    return Err(ParseError::Usage("add <pattern>"));
                }
                Self::Add(rest.to_string())
            }
            "remove" | "rm" => match rest.parse::<usize>() {
                Ok(n) if n > 0 => Self::Remove(n),
                _ => return Err(ParseError::Usage("remove <n>")),
            },
            "sites" | "list" => Self::Sites,
            "play" => Self::Play,
            "open" => Self::Open,
            "status" => Self::Status,
            "help" | "?" => Self::Help,
            "quit" | "exit" => Self::Quit,
            other => return Err(ParseError::Unknown(other.to_string())),
        };

        Ok(Some(command))
    }
}

/// Run a command against the controller and describe the outcome
pub async fn execute(
    handle: &ControllerHandle,
    command: PanelCommand,
) -> Result<String, ControllerError> {
    let output = match command {
        PanelCommand::Activity(signal) => {
            handle.activity(signal).await?;
            String::new()
        }
        PanelCommand::Enable => match handle.enable_here().await? {
            Some(pattern) => format!("Added {}", pattern),
            None => "Already allowed".to_string(),
        },
        PanelCommand::Add(pattern) => {
            if handle.add_site(pattern.as_str()).await? {
                format!("Added {}", pattern.trim())
            } else {
                "Nothing added (empty or duplicate)".to_string()
            }
        }
        PanelCommand::Remove(n) => match handle.remove_site_at(n - 1).await? {
            Some(pattern) => format!("Removed {}", pattern),
            None => format!("No entry {}", n),
        },
        PanelCommand::Sites => {
            let sites = handle.sites().await?;
            if sites.is_empty() {
                "No allowed sites".to_string()
            } else {
                let mut out = String::new();
                for (i, site) in sites.iter().enumerate() {
                    let marker = if site.matches_here { " *" } else { "" };
                    let _ = writeln!(
                        out,
                        "{:>3}. {} [{}]{}",
                        i + 1,
                        site.pattern,
                        site.kind.as_str(),
                        marker
                    );
                }
                out.trim_end().to_string()
            }
        }
        PanelCommand::Play => match handle.play().await {
            Ok(()) => "Playing".to_string(),
            Err(ControllerError::Playback(PlaybackError::NoAudio)) => {
                "No audio available".to_string()
            }
            Err(ControllerError::Playback(e)) => e.to_string(),
            Err(e) => return Err(e),
        },
        PanelCommand::Open => match handle.open_audio().await? {
            Some(url) => url,
            None => "No audio available".to_string(),
        },
        PanelCommand::Status => {
            let status = handle.status().await?;
            let mut out = format!(
                "{} ({} sites)\n{}",
                status.state.as_str(),
                status.sites,
                state_message(status.state)
            );
            let _ = write!(
                out,
                "\ncycles: {}, results: {}",
                status.cycles_dispatched, status.results_received
            );
            if let Some(at) = status.last_result_at {
                let _ = write!(out, ", last result at {}", at.format("%H:%M:%S"));
            }
            if status.audio_available {
                out.push_str("\naudio ready");
            }
            out
        }
        PanelCommand::Help => HELP.to_string(),
        PanelCommand::Quit => {
            handle.shutdown().await?;
            String::new()
        }
    };

    Ok(output)
}
