//! Configuration management for the page assistant.
//!
//! Loads configuration from TOML files and provides runtime defaults.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// Shortest accepted poll interval
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Environment variable overriding `backend.base_url`
pub const BACKEND_URL_ENV: &str = "KPK_BACKEND_URL";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub timing: TimingConfig,

    #[serde(default)]
    pub sampling: SamplingConfig,

    #[serde(default)]
    pub allowlist: AllowlistConfig,

    #[serde(default)]
    pub playback: PlaybackConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Whether the assistant runs at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Analysis service root; `/analyze` and `/health` are appended
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_seconds: default_timeout(),
        }
    }
}

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Interval between regular sample cycles
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Quiet period after scroll/selection activity before an extra cycle
    #[serde(default = "default_debounce")]
    pub debounce_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            debounce_ms: default_debounce(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Maximum characters sent per analysis request
    #[serde(default = "default_max_sample_chars")]
    pub max_sample_chars: usize,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            max_sample_chars: default_max_sample_chars(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AllowlistConfig {
    /// Patterns used until the allowlist is first written
    #[serde(default)]
    pub initial_sites: Option<Vec<String>>,

    /// Local storage file (defaults to the platform data dir)
    #[serde(default)]
    pub storage_path: Option<PathBuf>,

    /// Host-bridge storage file; when set it is authoritative on read
    #[serde(default)]
    pub bridge_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// External audio player; the audio URL is appended as last argument.
    /// Empty disables playback.
    #[serde(default)]
    pub player_command: String,

    #[serde(default)]
    pub player_args: Vec<String>,
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_poll_interval() -> u64 {
    5000
}

fn default_debounce() -> u64 {
    800
}

fn default_max_sample_chars() -> usize {
    crate::sampler::DEFAULT_MAX_SAMPLE_CHARS
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Self {
        Self::load_from_path(Self::default_config_path())
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: PathBuf) -> Self {
        match std::fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    info!("Loaded configuration from {:?}", path);
                    config
                }
                Err(e) => {
                    warn!("Failed to parse config file: {}, using defaults", e);
                    Self::default()
                }
            },
            Err(_) => {
                info!("No config file found at {:?}, using defaults", path);
                Self::default()
            }
        }
    }

    /// Get the default configuration file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("kpk-overlay")
            .join("config.toml")
    }

    /// Apply overrides from the process environment
    pub fn apply_env(&mut self) {
        self.apply_backend_url(std::env::var(BACKEND_URL_ENV).ok());
    }

    fn apply_backend_url(&mut self, value: Option<String>) {
        if let Some(url) = value.filter(|u| !u.trim().is_empty()) {
            info!("Backend URL overridden by {}: {}", BACKEND_URL_ENV, url);
            self.backend.base_url = url.trim().to_string();
        }
    }

    /// Poll interval, raised to `MIN_POLL_INTERVAL` when configured lower
    pub fn poll_interval(&self) -> Duration {
        let configured = Duration::from_millis(self.timing.poll_interval_ms);
        if configured < MIN_POLL_INTERVAL {
            warn!(
                "poll_interval_ms = {} is too short, using {}ms",
                self.timing.poll_interval_ms,
                MIN_POLL_INTERVAL.as_millis()
            );
            return MIN_POLL_INTERVAL;
        }
        configured
    }

    /// Filter directive for the log subscriber: `RUST_LOG` when set,
    /// otherwise `general.log_level`
    pub fn log_directive(&self, rust_log: Option<String>) -> String {
        rust_log
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| self.general.log_level.clone())
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.timing.debounce_ms)
    }

    /// Save configuration to the default path
    pub fn save(&self) -> std::io::Result<()> {
        self.save_to_path(Self::default_config_path())
    }

    /// Save configuration to a specific path
    pub fn save_to_path(&self, path: PathBuf) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
        })?;

        std::fs::write(&path, contents)?;
        info!("Saved configuration to {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.general.enabled);
        assert_eq!(config.backend.base_url, "http://localhost:8000");
        assert_eq!(config.poll_interval(), Duration::from_millis(5000));
        assert_eq!(config.debounce(), Duration::from_millis(800));
        assert_eq!(config.sampling.max_sample_chars, 3000);
        assert!(config.allowlist.initial_sites.is_none());
        assert!(config.playback.player_command.is_empty());
    }

    #[test]
    fn test_parse_toml() {
        let toml_str = r#"
[general]
log_level = "debug"

[backend]
base_url = "http://analysis.local:9000/"

[timing]
poll_interval_ms = 10000

[allowlist]
initial_sites = ["example.com", "*.news.org"]

[playback]
player_command = "mpv"
player_args = ["--no-video"]
"#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.general.log_level, "debug");
        assert!(config.general.enabled);
        assert_eq!(config.backend.base_url, "http://analysis.local:9000/");
        assert_eq!(config.timing.poll_interval_ms, 10000);
        assert_eq!(config.timing.debounce_ms, 800);
        assert_eq!(
            config.allowlist.initial_sites,
            Some(vec!["example.com".to_string(), "*.news.org".to_string()])
        );
        assert_eq!(config.playback.player_args, vec!["--no-video".to_string()]);
    }

    #[test]
    fn test_backend_url_override() {
        let mut config = Config::default();

        config.apply_backend_url(Some("   ".to_string()));
        assert_eq!(config.backend.base_url, "http://localhost:8000");

        config.apply_backend_url(Some(" http://10.0.0.2:8000 ".to_string()));
        assert_eq!(config.backend.base_url, "http://10.0.0.2:8000");
    }

    #[test]
    fn test_zero_poll_interval_is_raised() {
        let mut config = Config::default();
        config.timing.poll_interval_ms = 0;
        assert_eq!(config.poll_interval(), MIN_POLL_INTERVAL);

        config.timing.poll_interval_ms = 250;
        assert_eq!(config.poll_interval(), Duration::from_millis(250));
    }

    #[test]
    fn test_log_directive() {
        let mut config = Config::default();
        config.general.log_level = "debug".to_string();

        assert_eq!(config.log_directive(None), "debug");
        assert_eq!(config.log_directive(Some(" ".to_string())), "debug");
        assert_eq!(
            config.log_directive(Some("kpk_overlay=trace".to_string())),
            "kpk_overlay=trace"
        );
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.timing.debounce_ms = 250;
        config.allowlist.initial_sites = Some(vec!["example.com".to_string()]);
        config.save_to_path(path.clone()).unwrap();

        let loaded = Config::load_from_path(path);
        assert_eq!(loaded.timing.debounce_ms, 250);
        assert_eq!(
            loaded.allowlist.initial_sites,
            Some(vec!["example.com".to_string()])
        );
    }

    #[test]
    fn test_unparseable_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[timing\npoll_interval_ms = ").unwrap();

        let config = Config::load_from_path(path);
        assert_eq!(config.timing.poll_interval_ms, 5000);
    }
}
