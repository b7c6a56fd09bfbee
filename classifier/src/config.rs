//! Classifier configuration: the DPI binary's launch flags, its socket
//! address, and the wire timeouts.

use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ClassifierConfig {
    /// Path to the external DPI binary.
    pub binary_path: String,

    /// Mode flag passed to the binary at launch (e.g. `--mode=inline`).
    #[serde(default = "default_mode_flag")]
    pub mode_flag: String,

    /// Whether to pass the local-log flag.
    #[serde(default = "default_true")]
    pub local_log: bool,

    /// Whether to pass the memory-watchdog flag.
    #[serde(default = "default_true")]
    pub memory_watchdog: bool,

    /// Whether to pass the optional debug flag.
    #[serde(default)]
    pub debug: bool,

    /// DPI socket address. Defaults to `127.0.0.1:8123`.
    #[serde(default = "default_socket_addr")]
    pub socket_addr: String,

    /// Socket connect timeout, in seconds. Defaults to `2`.
    #[serde(default = "default_socket_timeout_secs")]
    pub socket_connect_timeout_secs: u64,

    /// Socket read/write deadline, in seconds. Defaults to `2`.
    #[serde(default = "default_socket_timeout_secs")]
    pub socket_io_timeout_secs: u64,

    /// Delay before retrying a failed connect, in seconds. Defaults to `1`.
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    /// Path to the `protolist.csv` application signature table.
    pub protolist_csv_path: String,

    /// Whether the cloud reporter is enabled.
    #[serde(default)]
    pub cloud_reporting_enabled: bool,

    /// Per-sub-manager startup/shutdown join budget, in seconds. Defaults
    /// to `10`.
    #[serde(default = "default_join_budget_secs")]
    pub join_budget_secs: u64,
}

fn default_mode_flag() -> String {
    "--mode=inline".to_string()
}

fn default_true() -> bool {
    true
}

fn default_socket_addr() -> String {
    "127.0.0.1:8123".to_string()
}

fn default_socket_timeout_secs() -> u64 {
    2
}

fn default_retry_delay_secs() -> u64 {
    1
}

fn default_join_budget_secs() -> u64 {
    10
}

/// Session release thresholds applied after a terminal classification, per
/// the release policy.
pub const POST_CLASSIFICATION_PACKET_LIMIT: u32 = 4;
pub const PACKET_COUNT_RELEASE_CEILING: u64 = 64;
pub const BYTE_COUNT_RELEASE_CEILING: u64 = 65_536;
