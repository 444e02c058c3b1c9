//! Gateway configuration.

use std::{collections::HashSet, path::Path, path::PathBuf, time::Duration};

use serde::Deserialize;
use snafu::prelude::*;

/// Error when load gateway options
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), module(error), context(suffix(false)))]
pub enum ConfigError {
    /// read config file failed
    #[snafu(display("read config file {} failed: {source}", path.display()))]
    ReadFile {
        /// file path
        path: PathBuf,
        /// source error
        source: std::io::Error,
    },

    /// config is not valid json for the options type
    #[snafu(display("parse config failed: {source}"))]
    Parse {
        /// source error
        source: serde_json::Error,
    },

    /// an account has an empty id
    #[snafu(display("account #{index} has an empty id"))]
    EmptyAccountId {
        /// position in the account list
        index: usize,
    },

    /// two accounts share one id
    #[snafu(display("account id {id} is configured more than once"))]
    DuplicateAccountId {
        /// duplicated id
        id: String,
    },

    /// a timing option that must be positive is zero
    #[snafu(display("{field} must be greater than zero"))]
    ZeroTiming {
        /// option name
        field: &'static str,
    },
}

/// Reconnect backoff options
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackoffOptions {
    /// first delay, in milliseconds
    pub initial_ms: u64,
    /// growth factor per attempt
    pub factor: f64,
    /// delay ceiling, in milliseconds
    pub cap_ms: u64,
}

impl Default for BackoffOptions {
    fn default() -> Self {
        Self {
            initial_ms: 1_000,
            factor: 2.0,
            cap_ms: 60_000,
        }
    }
}

impl BackoffOptions {
    /// first delay
    pub fn initial(&self) -> Duration {
        Duration::from_millis(self.initial_ms)
    }

    /// delay ceiling
    pub fn cap(&self) -> Duration {
        Duration::from_millis(self.cap_ms)
    }
}

/// One subscriber identity on the remote source
#[derive(Clone, Deserialize)]
pub struct AccountConfig {
    /// stable account id, also names the cursor directory
    pub id: String,
    /// user id the remote source uses for this subscriber, events from it are self-echo
    pub self_user_id: String,
    /// http api base url
    pub base_url: String,
    /// bot token
    pub token: String,
}

impl std::fmt::Debug for AccountConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountConfig")
            .field("id", &self.id)
            .field("self_user_id", &self.self_user_id)
            .field("base_url", &self.base_url)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Gateway options, every field has a default
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayOptions {
    /// directory for cursor files
    pub state_dir: PathBuf,
    /// websocket open timeout, in milliseconds
    pub connect_timeout_ms: u64,
    /// keepalive ping interval, in milliseconds
    pub ping_interval_ms: u64,
    /// keepalive acknowledgement timeout, in milliseconds
    pub pong_timeout_ms: u64,
    /// reconnect backoff
    pub backoff: BackoffOptions,
    /// interval between fallback polls, in milliseconds
    pub fallback_poll_interval_ms: u64,
    /// fallback polls before the push path is tried again
    pub fallback_poll_cycles: u32,
    /// interval between health summaries, in milliseconds
    pub health_summary_interval_ms: u64,
    /// configured accounts
    pub accounts: Vec<AccountConfig>,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("state"),
            connect_timeout_ms: 10_000,
            ping_interval_ms: 25_000,
            pong_timeout_ms: 10_000,
            backoff: BackoffOptions::default(),
            fallback_poll_interval_ms: 15_000,
            fallback_poll_cycles: 4,
            health_summary_interval_ms: 300_000,
            accounts: Vec::new(),
        }
    }
}

impl GatewayOptions {
    /// Parse and validate options from a json string.
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let options: Self = serde_json::from_str(s).context(error::Parse)?;
        options.validate()?;
        Ok(options)
    }

    /// Read, parse and validate options from a json file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).context(error::ReadFile { path })?;
        Self::from_json_str(&content)
    }

    /// Check timings are positive and account ids are non-empty and unique.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("ping_interval_ms", self.ping_interval_ms),
            ("pong_timeout_ms", self.pong_timeout_ms),
            ("backoff.initial_ms", self.backoff.initial_ms),
        ] {
            ensure!(value > 0, error::ZeroTiming { field });
        }

        let mut seen = HashSet::new();

        for (index, account) in self.accounts.iter().enumerate() {
            ensure!(!account.id.trim().is_empty(), error::EmptyAccountId { index });
            ensure!(
                seen.insert(account.id.as_str()),
                error::DuplicateAccountId { id: &account.id }
            );
        }

        Ok(())
    }

    /// websocket open timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// keepalive ping interval
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    /// keepalive acknowledgement timeout
    pub fn pong_timeout(&self) -> Duration {
        Duration::from_millis(self.pong_timeout_ms)
    }

    /// interval between fallback polls
    pub fn fallback_poll_interval(&self) -> Duration {
        Duration::from_millis(self.fallback_poll_interval_ms)
    }

    /// interval between health summaries
    pub fn health_summary_interval(&self) -> Duration {
        Duration::from_millis(self.health_summary_interval_ms)
    }
}
