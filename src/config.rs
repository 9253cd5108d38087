//! Configuration, paths and delivery tunables

use crate::delivery::{DeliveryTimeouts, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// All configurable paths and constants
#[derive(Debug, Clone)]
pub struct Config {
    pub settings_file: PathBuf,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub retry_initial_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub max_attempts: u32,
    pub probe_host: String,
    pub probe_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::with_home(&home.join(".sms-relay"))
    }
}

impl Config {
    /// Config rooted at an explicit state directory
    pub fn with_home(root: &Path) -> Self {
        Self {
            settings_file: root.join("state/settings.json"),
            connect_timeout_secs: 10,
            request_timeout_secs: 15,
            retry_initial_delay_ms: 1000,
            retry_max_delay_ms: 5000,
            max_attempts: 4,
            probe_host: "qyapi.weixin.qq.com".to_string(),
            probe_timeout_ms: 1500,
        }
    }

    /// Create config for testing with custom paths and near-zero backoff
    pub fn for_test(temp_dir: &Path) -> Self {
        Self {
            retry_initial_delay_ms: 1,
            retry_max_delay_ms: 5,
            probe_timeout_ms: 100,
            ..Self::with_home(temp_dir)
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            initial_delay: Duration::from_millis(self.retry_initial_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
        }
    }

    pub fn delivery_timeouts(&self) -> DeliveryTimeouts {
        DeliveryTimeouts {
            connect: Duration::from_secs(self.connect_timeout_secs),
            request: Duration::from_secs(self.request_timeout_secs),
        }
    }
}

/// Read-only snapshot of the user's forwarding settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardConfig {
    pub destination_url: String,
    pub enabled: bool,
    pub verification_only_mode: bool,
}

impl ForwardConfig {
    /// Delivery may proceed only when enabled with a non-empty destination
    pub fn is_complete(&self) -> bool {
        self.enabled && !self.destination_url.trim().is_empty()
    }
}

/// Canonical webhook endpoint prefixes (exact, case-sensitive)
pub const WEBHOOK_URL_PREFIXES: &[&str] = &[
    "https://qyapi.weixin.qq.com/cgi-bin/webhook/send",
    "https://work.weixin.qq.com/cgi-bin/webhook/send",
];

/// Timestamp layout used in forwarded notifications
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
