//! Quickstart settings and their layered loading.
//!
//! Sources, later ones winning:
//!  1. built-in defaults (every field carries a serde default)
//!  2. an optional file given with `--config` (format picked by extension)
//!  3. environment variables prefixed `QUICKSTART__`,
//!     e.g. `QUICKSTART__QUEUE_PREFIX=demo` sets `queue_prefix`
//!  4. command-line flags, including `storageconnectionstring` via clap's env binding

use crate::{Cli, QuickstartError};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::Path;
use storage_queue_runtime::message::{DEFAULT_MESSAGE_TTL_SECS, INFINITE_TTL_SECS};
use storage_queue_runtime::{MessageEncoding, QueueName};

#[cfg(test)]
#[path = "settings_tests.rs"]
mod tests;

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "QUICKSTART";

/// Queue names are `<prefix>-<uuid>`; a UUID takes 36 characters
const MAX_QUEUE_PREFIX_LEN: usize = 63 - 37;

/// Everything the quickstart driver needs, resolved before it starts
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuickstartSettings {
    /// Raw storage connection string; parsed by the driver
    pub connection_string: Option<String>,
    pub queue_prefix: String,
    pub message: String,
    /// Message time-to-live in seconds, `-1` for no expiry
    pub message_ttl_secs: i64,
    /// Wait for the operator before teardown and exit
    pub pause: bool,
    pub encoding: MessageEncoding,
    pub request_timeout_secs: u64,
}

impl Default for QuickstartSettings {
    fn default() -> Self {
        Self {
            connection_string: None,
            queue_prefix: "quickstartqueues".to_string(),
            message: "Hello, World".to_string(),
            message_ttl_secs: DEFAULT_MESSAGE_TTL_SECS,
            pause: true,
            encoding: MessageEncoding::default(),
            request_timeout_secs: 30,
        }
    }
}

impl std::fmt::Debug for QuickstartSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuickstartSettings")
            .field(
                "connection_string",
                &self.connection_string.as_ref().map(|_| "<redacted>"),
            )
            .field("queue_prefix", &self.queue_prefix)
            .field("message", &self.message)
            .field("message_ttl_secs", &self.message_ttl_secs)
            .field("pause", &self.pause)
            .field("encoding", &self.encoding)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl QuickstartSettings {
    /// Load defaults, the optional file and `QUICKSTART__*` variables
    ///
    /// `environment` is normally `config::Environment::default()`; tests
    /// inject a fixed map through `Environment::source`.
    pub fn load(
        config_file: Option<&Path>,
        environment: config::Environment,
    ) -> Result<Self, QuickstartError> {
        let mut builder = config::Config::builder();

        if let Some(path) = config_file {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let settings: Self = builder
            .add_source(
                environment
                    .prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        Ok(settings)
    }

    /// Apply flags given on the command line
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(connection_string) = &cli.connection_string {
            self.connection_string = Some(connection_string.clone());
        }
        if let Some(prefix) = &cli.queue_prefix {
            self.queue_prefix = prefix.clone();
        }
        if let Some(message) = &cli.message {
            self.message = message.clone();
        }
        if cli.no_pause {
            self.pause = false;
        }
        if let Some(encoding) = cli.encoding {
            self.encoding = encoding;
        }
        if let Some(timeout) = cli.request_timeout_secs {
            self.request_timeout_secs = timeout;
        }
    }

    /// Check values the driver cannot recover from mid-run
    ///
    /// The connection string is deliberately not checked here: a missing one
    /// is a normal outcome the driver reports.
    pub fn validate(&self) -> Result<(), QuickstartError> {
        if self.queue_prefix.len() > MAX_QUEUE_PREFIX_LEN {
            return Err(QuickstartError::InvalidSetting {
                key: "queue_prefix".to_string(),
                message: format!("must be at most {} characters", MAX_QUEUE_PREFIX_LEN),
            });
        }
        QueueName::with_unique_suffix(&self.queue_prefix).map_err(|e| {
            QuickstartError::InvalidSetting {
                key: "queue_prefix".to_string(),
                message: e.to_string(),
            }
        })?;

        if self.message_ttl_secs != INFINITE_TTL_SECS && self.message_ttl_secs < 1 {
            return Err(QuickstartError::InvalidSetting {
                key: "message_ttl_secs".to_string(),
                message: "must be at least 1, or -1 for no expiry".to_string(),
            });
        }

        if self.request_timeout_secs == 0 {
            return Err(QuickstartError::InvalidSetting {
                key: "request_timeout_secs".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        self.message_ttl()?;
        self.request_timeout()?;

        Ok(())
    }

    pub fn message_ttl(&self) -> Result<Duration, QuickstartError> {
        Duration::try_seconds(self.message_ttl_secs)
            .ok_or_else(|| out_of_range("message_ttl_secs"))
    }

    pub fn request_timeout(&self) -> Result<Duration, QuickstartError> {
        i64::try_from(self.request_timeout_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .ok_or_else(|| out_of_range("request_timeout_secs"))
    }
}

fn out_of_range(key: &str) -> QuickstartError {
    QuickstartError::InvalidSetting {
        key: key.to_string(),
        message: "too large to represent as a duration".to_string(),
    }
}
