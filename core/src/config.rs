//! Configuration options.
//!
//! The daemon loads a single TOML file at startup that controls reaper
//! timing, dispatch timeouts, and the classifier's wire settings. See
//! [`load_config`] for the loading contract and [`RuntimeConfig::default`]
//! for the shipped defaults.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Loads a configuration file from `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<RuntimeConfig, ConfigError> {
    let config_str = fs::read_to_string(path)?;
    let config: RuntimeConfig = toml::from_str(&config_str)?;
    Ok(config)
}

/// Returns the default configuration, suitable for the demonstration
/// harness.
pub fn default_config() -> RuntimeConfig {
    RuntimeConfig::default()
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid configuration file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level runtime configuration.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct RuntimeConfig {
    /// Dispatch timing and ceiling settings.
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Reaper sweep interval and staleness thresholds.
    #[serde(default)]
    pub reaper: ReaperConfig,

    /// Back-pressure queue capacities toward the reports sink.
    #[serde(default)]
    pub eventqueue: EventQueueConfig,

    /// Path to the component→level log-config JSON file. Defaults to
    /// `None` (all components log at the process-wide default level).
    #[serde(default = "default_log_config_path")]
    pub log_config_path: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            dispatch: DispatchConfig::default(),
            reaper: ReaperConfig::default(),
            eventqueue: EventQueueConfig::default(),
            log_config_path: None,
        }
    }
}

fn default_log_config_path() -> Option<String> {
    None
}

/// Subscriber dispatch timing.
///
/// ## Example
/// ```toml
/// [dispatch]
///     nfqueue_handler_timeout_secs = 30
///     priority_ceiling = 100
/// ```
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct DispatchConfig {
    /// Per-handler deadline for the NFQueue pipeline. Defaults to `30`.
    #[serde(default = "default_nfqueue_handler_timeout_secs")]
    pub nfqueue_handler_timeout_secs: u64,

    /// The hard safety ceiling on subscriber priority. Defaults to `100`.
    #[serde(default = "default_priority_ceiling")]
    pub priority_ceiling: u8,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        DispatchConfig {
            nfqueue_handler_timeout_secs: default_nfqueue_handler_timeout_secs(),
            priority_ceiling: default_priority_ceiling(),
        }
    }
}

fn default_nfqueue_handler_timeout_secs() -> u64 {
    30
}

fn default_priority_ceiling() -> u8 {
    100
}

/// Stale-entry reaping.
///
/// ## Example
/// ```toml
/// [reaper]
///     interval_secs = 60
///     session_stale_after_secs = 10_000
///     conntrack_stale_after_secs = 1_800
/// ```
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ReaperConfig {
    #[serde(default = "default_reap_interval_secs")]
    pub interval_secs: u64,

    #[serde(default = "default_session_stale_after_secs")]
    pub session_stale_after_secs: u64,

    #[serde(default = "default_conntrack_stale_after_secs")]
    pub conntrack_stale_after_secs: u64,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        ReaperConfig {
            interval_secs: default_reap_interval_secs(),
            session_stale_after_secs: default_session_stale_after_secs(),
            conntrack_stale_after_secs: default_conntrack_stale_after_secs(),
        }
    }
}

fn default_reap_interval_secs() -> u64 {
    60
}

fn default_session_stale_after_secs() -> u64 {
    10_000
}

fn default_conntrack_stale_after_secs() -> u64 {
    1_800
}

/// Back-pressure queue capacities toward the reports sink.
///
/// ## Example
/// ```toml
/// [eventqueue]
///     session_event_capacity = 1000
///     session_stats_capacity = 5000
/// ```
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct EventQueueConfig {
    #[serde(default = "default_session_event_capacity")]
    pub session_event_capacity: usize,

    #[serde(default = "default_session_stats_capacity")]
    pub session_stats_capacity: usize,
}

impl Default for EventQueueConfig {
    fn default() -> Self {
        EventQueueConfig {
            session_event_capacity: default_session_event_capacity(),
            session_stats_capacity: default_session_stats_capacity(),
        }
    }
}

fn default_session_event_capacity() -> usize {
    1000
}

fn default_session_stats_capacity() -> usize {
    5000
}
