//! The quickstart walkthrough: create a queue, push one message through its
//! lifecycle, then tear the queue down.
//!
//! Every remote call goes through [`QueueService`], so the same driver runs
//! against the Azure provider and the in-memory provider. Narration goes to
//! the supplied console writer; diagnostics go to `tracing`.

use crate::settings::QuickstartSettings;
use crate::QuickstartError;
use chrono::Duration;
use std::io::{self, BufRead, Write};
use storage_queue_runtime::{
    Message, QueueError, QueueName, QueueService, StorageConnectionString,
};
use tracing::{debug, error, info, warn};

#[cfg(test)]
#[path = "driver_tests.rs"]
mod tests;

/// Printed when no usable connection string was supplied
pub const CONFIGURATION_MISSING_MESSAGE: &str =
    "A connection string has not been defined in the system environment variables. \
     Add a environment variable named 'storageconnectionstring' with your storage \
     connection string as a value.";

pub const TEARDOWN_PROMPT: &str = "Press any key to delete the sample queue.";

// ============================================================================
// Outcomes
// ============================================================================

/// How a quickstart run ended, when it ended without a local error
#[derive(Debug)]
pub enum RunOutcome {
    /// No usable connection string; nothing was sent to the service
    ConfigurationMissing,

    /// All steps succeeded and the queue was deleted
    Completed { queue_name: QueueName },

    /// A service call failed; the remaining steps were skipped
    ///
    /// `queue_name` is `None` when the service could not be reached at all,
    /// in which case no teardown was attempted.
    Failed {
        queue_name: Option<QueueName>,
        error: QueueError,
    },
}

impl RunOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

// ============================================================================
// Pacing
// ============================================================================

/// Pauses between phases so an operator can follow along
pub trait Pacer {
    /// Show `prompt` and wait for the operator
    fn pause(&mut self, console: &mut dyn Write, prompt: &str) -> io::Result<()>;
}

/// Waits for a line on a reader, stdin by default
pub struct StdinPacer<R = io::StdinLock<'static>> {
    input: R,
}

impl StdinPacer {
    pub fn new() -> Self {
        Self {
            input: io::stdin().lock(),
        }
    }
}

impl Default for StdinPacer {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: BufRead> StdinPacer<R> {
    pub fn from_reader(input: R) -> Self {
        Self { input }
    }
}

impl<R: BufRead> Pacer for StdinPacer<R> {
    fn pause(&mut self, console: &mut dyn Write, prompt: &str) -> io::Result<()> {
        writeln!(console, "{}", prompt)?;
        console.flush()?;

        let mut line = String::new();
        // EOF counts as a key press
        self.input.read_line(&mut line)?;
        Ok(())
    }
}

/// Never waits
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPause;

impl Pacer for NoPause {
    fn pause(&mut self, _console: &mut dyn Write, _prompt: &str) -> io::Result<()> {
        Ok(())
    }
}

// ============================================================================
// Queue Lease
// ============================================================================

/// Ownership of the run's queue from just before creation until teardown
///
/// [`QueueLease::release`] consumes the lease, so teardown happens at most
/// once. Dropping an unreleased lease only logs: deletion is async and cannot
/// run from `Drop`.
pub struct QueueLease<'a, S: QueueService + ?Sized> {
    service: &'a S,
    name: QueueName,
    released: bool,
}

impl<'a, S: QueueService + ?Sized> QueueLease<'a, S> {
    pub fn new(service: &'a S, name: QueueName) -> Self {
        Self {
            service,
            name,
            released: false,
        }
    }

    pub fn name(&self) -> &QueueName {
        &self.name
    }

    pub fn service(&self) -> &'a S {
        self.service
    }

    /// Delete the queue if it exists
    ///
    /// Returns whether the queue was still there.
    pub async fn release(mut self) -> Result<bool, QueueError> {
        self.released = true;
        let existed = self.service.delete_queue_if_exists(&self.name).await?;
        debug!(queue = %self.name, existed = existed, "Queue lease released");
        Ok(existed)
    }
}

impl<S: QueueService + ?Sized> Drop for QueueLease<'_, S> {
    fn drop(&mut self) {
        if !self.released {
            warn!(queue = %self.name, "Queue lease dropped without teardown; the queue may be left behind");
        }
    }
}

// ============================================================================
// Driver
// ============================================================================

/// Failure inside the lifecycle steps
enum StepError {
    Service(QueueError),
    Console(io::Error),
}

impl From<QueueError> for StepError {
    fn from(e: QueueError) -> Self {
        Self::Service(e)
    }
}

impl From<io::Error> for StepError {
    fn from(e: io::Error) -> Self {
        Self::Console(e)
    }
}

/// Run the quickstart walkthrough
///
/// Service failures are reported on the console and returned as
/// [`RunOutcome::Failed`]; the queue is still torn down. Only local problems
/// (console I/O, a failed teardown, unusable settings) become errors.
pub async fn run_quickstart<S, F, W, P>(
    settings: &QuickstartSettings,
    connect: F,
    console: &mut W,
    pacer: &mut P,
) -> Result<RunOutcome, QuickstartError>
where
    S: QueueService,
    F: FnOnce(&StorageConnectionString) -> Result<S, QueueError>,
    W: Write,
    P: Pacer,
{
    let connection_string =
        match StorageConnectionString::parse(settings.connection_string.as_deref()) {
            Ok(connection_string) => connection_string,
            Err(e) => {
                info!(reason = %e, "No usable storage connection string");
                writeln!(console, "{}", CONFIGURATION_MISSING_MESSAGE)?;
                return Ok(RunOutcome::ConfigurationMissing);
            }
        };

    let service = match connect(&connection_string) {
        Ok(service) => service,
        Err(e) => {
            error!(
                error = %e,
                transient = e.is_transient(),
                "Could not create the queue service client"
            );
            writeln!(console, "Error returned from Azure Storage: {}", e)?;
            return Ok(RunOutcome::Failed {
                queue_name: None,
                error: e,
            });
        }
    };

    // Settings errors must surface before the queue exists
    let message_ttl = settings.message_ttl()?;
    let queue_name = QueueName::with_unique_suffix(&settings.queue_prefix).map_err(|e| {
        QuickstartError::InvalidSetting {
            key: "queue_prefix".to_string(),
            message: e.to_string(),
        }
    })?;
    let lease = QueueLease::new(&service, queue_name.clone());

    let mut console_failure: Option<io::Error> = None;
    let service_failure = match run_steps(&lease, settings, message_ttl, console).await {
        Ok(()) => None,
        Err(StepError::Service(e)) => {
            error!(
                queue = %queue_name,
                error = %e,
                transient = e.is_transient(),
                "Quickstart step failed"
            );
            if let Err(io) = writeln!(console, "Error returned from Azure Storage: {}", e) {
                console_failure = Some(io);
            }
            Some(e)
        }
        Err(StepError::Console(io)) => {
            console_failure = Some(io);
            None
        }
    };

    // Teardown runs however the steps ended
    let narration = announce_teardown(console, pacer);
    if let Err(e) = lease.release().await {
        error!(
            queue = %queue_name,
            error = %e,
            transient = e.is_transient(),
            "Queue teardown failed"
        );
        return Err(QuickstartError::Teardown {
            queue_name: queue_name.to_string(),
            source: e,
        });
    }
    info!(queue = %queue_name, "Queue deleted");

    if let Some(io) = console_failure {
        return Err(QuickstartError::Io(io));
    }
    narration?;

    Ok(match service_failure {
        Some(error) => RunOutcome::Failed {
            queue_name: Some(queue_name),
            error,
        },
        None => RunOutcome::Completed { queue_name },
    })
}

/// Create, enqueue, peek, receive and delete; stops at the first failure
async fn run_steps<S, W>(
    lease: &QueueLease<'_, S>,
    settings: &QuickstartSettings,
    message_ttl: Duration,
    console: &mut W,
) -> Result<(), StepError>
where
    S: QueueService + ?Sized,
    W: Write,
{
    let service = lease.service();
    let queue = lease.name();

    service.create_queue(queue).await?;
    info!(queue = %queue, "Queue created");
    writeln!(console, "Created queue '{}'", queue)?;
    writeln!(console)?;

    let message = Message::from_text(&settings.message).with_time_to_live(message_ttl);
    let sent = service.send_message(queue, &message).await?;
    info!(queue = %queue, message_id = %sent.message_id, "Message added");
    writeln!(console, "Added message '{}' to queue '{}'", sent.message_id, queue)?;
    writeln!(console, "Message insertion time: {}", sent.insertion_time)?;
    match &sent.expiration_time {
        Some(expiration) => writeln!(console, "Message expiration time: {}", expiration)?,
        None => writeln!(console, "Message expiration time: never")?,
    }
    writeln!(console)?;

    let peeked = service
        .peek_message(queue)
        .await?
        .ok_or_else(|| QueueError::MessageNotFound {
            message_id: sent.message_id.to_string(),
        })?;
    debug!(queue = %queue, message_id = %peeked.message_id, "Message peeked");
    writeln!(
        console,
        "Contents of peeked message '{}': {}",
        peeked.message_id,
        peeked.body_text().map_err(QueueError::from)?
    )?;
    writeln!(console)?;

    let received = service
        .receive_message(queue, None)
        .await?
        .ok_or_else(|| QueueError::MessageNotFound {
            message_id: sent.message_id.to_string(),
        })?;
    debug!(
        queue = %queue,
        message_id = %received.message_id,
        dequeue_count = received.dequeue_count,
        "Message received"
    );
    writeln!(
        console,
        "Message '{}' becomes visible again at {}",
        received.message_id, received.time_next_visible
    )?;
    writeln!(console)?;

    service
        .delete_message(queue, &received.message_id, &received.pop_receipt)
        .await?;
    info!(queue = %queue, message_id = %received.message_id, "Message deleted");
    writeln!(console, "Processed and deleted message '{}'", received.message_id)?;
    writeln!(console)?;

    Ok(())
}

fn announce_teardown<W: Write, P: Pacer>(console: &mut W, pacer: &mut P) -> io::Result<()> {
    pacer.pause(console, TEARDOWN_PROMPT)?;
    writeln!(console, "Deleting the queue and any messages it contains...")?;
    writeln!(console)?;
    Ok(())
}
