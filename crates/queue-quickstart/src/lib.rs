//! # Queue Quickstart
//!
//! Command-line walkthrough of the Azure Queue Storage message lifecycle.
//!
//! The binary:
//! - Creates a uniquely named queue
//! - Adds, peeks, receives and deletes one message
//! - Deletes the queue again, even when an earlier step failed
//!
//! Configuration comes from defaults, an optional file, `QUICKSTART__*`
//! environment variables and command-line flags (see [`settings`]).

pub mod driver;
pub mod settings;

use clap::Parser;
use driver::{run_quickstart, NoPause, Pacer, RunOutcome, StdinPacer};
use settings::QuickstartSettings;
use std::io::Write;
use std::path::PathBuf;
use storage_queue_runtime::providers::AzureError;
use storage_queue_runtime::{
    AzureStorageConfig, AzureStorageProvider, MessageEncoding, QueueError, StorageConnectionString,
};
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub use driver::QueueLease;

/// First line printed by the binary
pub const BANNER: &str = "Azure Queues - Rust Quickstart sample";

pub const EXIT_PROMPT: &str = "Press any key to exit the sample application.";

// ============================================================================
// CLI Structure
// ============================================================================

/// Azure Queues quickstart - create a queue and walk one message through it
#[derive(Parser, Debug)]
#[command(name = "queue-quickstart")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Azure Queue Storage quickstart sample")]
#[command(
    long_about = "Creates a queue, adds, peeks, receives and deletes one message, then deletes the queue"
)]
pub struct Cli {
    /// Storage account connection string
    #[arg(long, env = "storageconnectionstring", hide_env_values = true)]
    pub connection_string: Option<String>,

    /// Prefix for the generated queue name
    #[arg(long)]
    pub queue_prefix: Option<String>,

    /// Body of the message sent through the queue
    #[arg(long)]
    pub message: Option<String>,

    /// Do not wait for a key press before teardown and exit
    #[arg(long)]
    pub no_pause: bool,

    /// Message text encoding on the wire (base64 or none)
    #[arg(long)]
    pub encoding: Option<MessageEncoding>,

    /// Per-request timeout in seconds
    #[arg(long)]
    pub request_timeout_secs: Option<u64>,

    /// Configuration file path (TOML, YAML or JSON)
    #[arg(short, long, env = "QUICKSTART_CONFIG")]
    pub config: Option<PathBuf>,

    /// Logging level, used when RUST_LOG is not set
    #[arg(short, long, default_value = "warn")]
    pub log_level: String,

    /// Enable JSON logging
    #[arg(long)]
    pub json_logs: bool,
}

// ============================================================================
// Error Types
// ============================================================================

/// Local failures of the quickstart
///
/// Service failures during the walkthrough are not errors; they end up in
/// [`RunOutcome::Failed`].
#[derive(Debug, thiserror::Error)]
pub enum QuickstartError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] config::ConfigError),

    #[error("Invalid setting '{key}': {message}")]
    InvalidSetting { key: String, message: String },

    #[error("Logging initialization failed: {message}")]
    Logging { message: String },

    #[error("Failed to delete queue '{queue_name}': {source}")]
    Teardown {
        queue_name: String,
        #[source]
        source: QueueError,
    },

    #[error("Console I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ============================================================================
// Main Entry Point
// ============================================================================

/// Run the quickstart for parsed command-line arguments
///
/// Logging is set up separately by [`initialize_logging`].
pub async fn run_cli<W: Write>(
    cli: &Cli,
    console: &mut W,
) -> Result<RunOutcome, QuickstartError> {
    writeln!(console, "{}", BANNER)?;
    writeln!(console)?;

    let mut settings =
        QuickstartSettings::load(cli.config.as_deref(), config::Environment::default())?;
    settings.apply_cli(cli);
    settings.validate()?;
    debug!(settings = ?settings, "Resolved quickstart settings");

    let request_timeout = settings.request_timeout()?;
    let connect = |connection_string: &StorageConnectionString| {
        let config = AzureStorageConfig {
            connection_string: connection_string.clone(),
            message_encoding: settings.encoding,
            request_timeout,
        };
        AzureStorageProvider::new(config).map_err(AzureError::to_queue_error)
    };

    let outcome = if settings.pause {
        let mut pacer = StdinPacer::new();
        let outcome = run_quickstart(&settings, connect, console, &mut pacer).await?;
        pacer.pause(console, EXIT_PROMPT)?;
        outcome
    } else {
        run_quickstart(&settings, connect, console, &mut NoPause).await?
    };

    info!(completed = outcome.is_completed(), "Quickstart finished");
    Ok(outcome)
}

/// Initialize logging based on CLI arguments
///
/// Logs go to stderr so stdout only carries the walkthrough narration.
pub fn initialize_logging(cli: &Cli) -> Result<(), QuickstartError> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&cli.log_level))
        .map_err(|e| QuickstartError::InvalidSetting {
            key: "log_level".to_string(),
            message: e.to_string(),
        })?;

    let registry = tracing_subscriber::registry().with(filter);
    let result = if cli.json_logs {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };

    result.map_err(|e| QuickstartError::Logging {
        message: e.to_string(),
    })
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
