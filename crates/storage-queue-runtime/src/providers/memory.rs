//! In-memory queue provider implementation for testing and development.
//!
//! This module provides a queue service double that behaves like the storage
//! service for a single process:
//! - Peek never changes visibility, dequeue count or pop receipt
//! - Receive hides a message for its visibility timeout and issues a new pop receipt
//! - Delete requires the pop receipt from the latest receive
//! - Messages expire after their time-to-live
//!
//! Time is read from an injectable [`Clock`], and every operation is counted.
//! Tests can also queue an error for the next call of a given operation.

use crate::client::QueueService;
use crate::clock::{Clock, SystemClock};
use crate::error::{QueueError, ValidationError};
use crate::message::{
    validate_visibility_timeout, EnqueuedMessage, Message, MessageId, PeekedMessage, PopReceipt,
    QueueName, ReceivedMessage, Timestamp, INFINITE_TTL_SECS,
};
use crate::provider::{InMemoryConfig, ProviderType};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Duration;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use tracing::debug;

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

// ============================================================================
// Operation Tracking
// ============================================================================

/// Remote operations exposed by [`QueueService`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueOperation {
    CreateQueue,
    DeleteQueue,
    SendMessage,
    PeekMessage,
    ReceiveMessage,
    DeleteMessage,
}

impl fmt::Display for QueueOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CreateQueue => "create_queue",
            Self::DeleteQueue => "delete_queue",
            Self::SendMessage => "send_message",
            Self::PeekMessage => "peek_message",
            Self::ReceiveMessage => "receive_message",
            Self::DeleteMessage => "delete_message",
        };
        write!(f, "{}", name)
    }
}

/// Number of calls made per operation, including failed ones
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationCounts {
    pub create_queue: usize,
    pub delete_queue: usize,
    pub send_message: usize,
    pub peek_message: usize,
    pub receive_message: usize,
    pub delete_message: usize,
}

impl OperationCounts {
    fn record(&mut self, operation: QueueOperation) {
        match operation {
            QueueOperation::CreateQueue => self.create_queue += 1,
            QueueOperation::DeleteQueue => self.delete_queue += 1,
            QueueOperation::SendMessage => self.send_message += 1,
            QueueOperation::PeekMessage => self.peek_message += 1,
            QueueOperation::ReceiveMessage => self.receive_message += 1,
            QueueOperation::DeleteMessage => self.delete_message += 1,
        }
    }

    /// Total calls across all operations
    pub fn total(&self) -> usize {
        self.create_queue
            + self.delete_queue
            + self.send_message
            + self.peek_message
            + self.receive_message
            + self.delete_message
    }
}

// ============================================================================
// Internal Storage Structures
// ============================================================================

/// A message stored in the queue with service-assigned metadata
#[derive(Clone)]
struct StoredMessage {
    message_id: MessageId,
    body: Bytes,
    insertion_time: Timestamp,
    expiration_time: Option<Timestamp>,
    time_next_visible: Timestamp,
    pop_receipt: PopReceipt,
    dequeue_count: u32,
}

impl StoredMessage {
    fn is_expired(&self, now: &Timestamp) -> bool {
        match self.expiration_time {
            Some(ref expires_at) => now >= expires_at,
            None => false,
        }
    }

    fn is_visible(&self, now: &Timestamp) -> bool {
        now >= &self.time_next_visible
    }
}

/// Internal queue state, messages kept in insertion order
#[derive(Default)]
struct InMemoryQueue {
    messages: Vec<StoredMessage>,
}

impl InMemoryQueue {
    fn purge_expired(&mut self, now: &Timestamp) {
        self.messages.retain(|m| !m.is_expired(now));
    }

    fn first_visible_mut(&mut self, now: &Timestamp) -> Option<&mut StoredMessage> {
        self.messages.iter_mut().find(|m| m.is_visible(now))
    }
}

// ============================================================================
// In-Memory Provider
// ============================================================================

/// In-memory implementation of [`QueueService`]
///
/// Clones share the same storage, counters and injected faults, so a test can
/// hand one clone to the code under test and inspect another.
#[derive(Clone)]
pub struct InMemoryProvider {
    queues: Arc<RwLock<HashMap<QueueName, InMemoryQueue>>>,
    config: InMemoryConfig,
    clock: Arc<dyn Clock>,
    counts: Arc<Mutex<OperationCounts>>,
    faults: Arc<Mutex<HashMap<QueueOperation, QueueError>>>,
}

impl InMemoryProvider {
    /// Create new in-memory provider using the system clock
    pub fn new(config: InMemoryConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create new in-memory provider reading time from `clock`
    pub fn with_clock(config: InMemoryConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            queues: Arc::new(RwLock::new(HashMap::new())),
            config,
            clock,
            counts: Arc::new(Mutex::new(OperationCounts::default())),
            faults: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Make the next call of `operation` fail with `error`
    ///
    /// The call is still counted. The fault is consumed by that call.
    pub fn fail_next(&self, operation: QueueOperation, error: QueueError) {
        let mut faults = self.faults.lock().unwrap_or_else(|e| e.into_inner());
        faults.insert(operation, error);
    }

    /// Snapshot of the operation counters
    pub fn operation_counts(&self) -> OperationCounts {
        self.counts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Whether a queue with this name currently exists
    pub fn queue_exists(&self, queue: &QueueName) -> bool {
        self.read_queues().contains_key(queue)
    }

    /// Names of all existing queues
    pub fn queue_names(&self) -> Vec<QueueName> {
        self.read_queues().keys().cloned().collect()
    }

    /// Number of unexpired messages in a queue, visible or not
    pub fn message_count(&self, queue: &QueueName) -> Option<usize> {
        let now = self.clock.now();
        self.read_queues().get(queue).map(|q| {
            q.messages
                .iter()
                .filter(|m| !m.is_expired(&now))
                .count()
        })
    }

    /// Count the call and return any injected fault
    fn begin(&self, operation: QueueOperation) -> Result<(), QueueError> {
        self.counts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .record(operation);

        let fault = self
            .faults
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&operation);

        match fault {
            Some(error) => {
                debug!(operation = %operation, error = %error, "Injected fault triggered");
                Err(error)
            }
            None => Ok(()),
        }
    }

    fn read_queues(&self) -> std::sync::RwLockReadGuard<'_, HashMap<QueueName, InMemoryQueue>> {
        self.queues.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_queues(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<QueueName, InMemoryQueue>> {
        self.queues.write().unwrap_or_else(|e| e.into_inner())
    }

    fn queue_not_found(queue: &QueueName) -> QueueError {
        QueueError::QueueNotFound {
            queue_name: queue.as_str().to_string(),
        }
    }
}

impl Default for InMemoryProvider {
    fn default() -> Self {
        Self::new(InMemoryConfig::default())
    }
}

impl fmt::Debug for InMemoryProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryProvider")
            .field("config", &self.config)
            .field("queues", &self.read_queues().len())
            .finish()
    }
}

#[async_trait]
impl QueueService for InMemoryProvider {
    async fn create_queue(&self, queue: &QueueName) -> Result<(), QueueError> {
        self.begin(QueueOperation::CreateQueue)?;

        let mut queues = self.write_queues();
        queues.entry(queue.clone()).or_default();
        debug!(queue = %queue, "Queue created");
        Ok(())
    }

    async fn delete_queue_if_exists(&self, queue: &QueueName) -> Result<bool, QueueError> {
        self.begin(QueueOperation::DeleteQueue)?;

        let existed = self.write_queues().remove(queue).is_some();
        debug!(queue = %queue, existed = existed, "Queue delete requested");
        Ok(existed)
    }

    async fn send_message(
        &self,
        queue: &QueueName,
        message: &Message,
    ) -> Result<EnqueuedMessage, QueueError> {
        self.begin(QueueOperation::SendMessage)?;
        message.validate()?;

        if message.body.len() > self.config.max_message_size {
            return Err(QueueError::MessageTooLarge {
                size: message.body.len(),
                max_size: self.config.max_message_size,
            });
        }

        let now = self.clock.now();
        let ttl = message
            .time_to_live
            .unwrap_or(self.config.default_message_ttl);
        let expiration_time = if ttl.num_seconds() == INFINITE_TTL_SECS {
            None
        } else {
            let expiration = now.checked_plus(ttl).ok_or_else(|| ValidationError::OutOfRange {
                field: "time_to_live".to_string(),
                message: "expiration time is out of range".to_string(),
            })?;
            Some(expiration)
        };
        let time_next_visible = now.plus(message.visibility_timeout.unwrap_or_else(Duration::zero));

        let stored = StoredMessage {
            message_id: MessageId::new(),
            body: message.body.clone(),
            insertion_time: now.clone(),
            expiration_time,
            time_next_visible,
            pop_receipt: PopReceipt::generate(),
            dequeue_count: 0,
        };

        let mut queues = self.write_queues();
        let stored_queue = queues
            .get_mut(queue)
            .ok_or_else(|| Self::queue_not_found(queue))?;
        stored_queue.purge_expired(&now);
        stored_queue.messages.push(stored.clone());

        debug!(queue = %queue, message_id = %stored.message_id, "Message enqueued");

        Ok(EnqueuedMessage {
            message_id: stored.message_id,
            pop_receipt: stored.pop_receipt,
            insertion_time: stored.insertion_time,
            expiration_time: stored.expiration_time,
            time_next_visible: stored.time_next_visible,
        })
    }

    async fn peek_message(&self, queue: &QueueName) -> Result<Option<PeekedMessage>, QueueError> {
        self.begin(QueueOperation::PeekMessage)?;

        let now = self.clock.now();
        let mut queues = self.write_queues();
        let stored_queue = queues
            .get_mut(queue)
            .ok_or_else(|| Self::queue_not_found(queue))?;
        stored_queue.purge_expired(&now);

        Ok(stored_queue
            .messages
            .iter()
            .find(|m| m.is_visible(&now))
            .map(|m| PeekedMessage {
                message_id: m.message_id.clone(),
                body: m.body.clone(),
                insertion_time: m.insertion_time.clone(),
                expiration_time: m.expiration_time.clone(),
                dequeue_count: m.dequeue_count,
            }))
    }

    async fn receive_message(
        &self,
        queue: &QueueName,
        visibility_timeout: Option<Duration>,
    ) -> Result<Option<ReceivedMessage>, QueueError> {
        self.begin(QueueOperation::ReceiveMessage)?;

        let timeout = visibility_timeout.unwrap_or(self.config.default_visibility_timeout);
        validate_visibility_timeout(timeout)?;

        let now = self.clock.now();
        let mut queues = self.write_queues();
        let stored_queue = queues
            .get_mut(queue)
            .ok_or_else(|| Self::queue_not_found(queue))?;
        stored_queue.purge_expired(&now);

        let Some(stored) = stored_queue.first_visible_mut(&now) else {
            return Ok(None);
        };

        stored.time_next_visible = now.plus(timeout);
        stored.pop_receipt = PopReceipt::generate();
        stored.dequeue_count += 1;

        debug!(
            queue = %queue,
            message_id = %stored.message_id,
            dequeue_count = stored.dequeue_count,
            "Message received"
        );

        Ok(Some(ReceivedMessage {
            message_id: stored.message_id.clone(),
            body: stored.body.clone(),
            pop_receipt: stored.pop_receipt.clone(),
            insertion_time: stored.insertion_time.clone(),
            expiration_time: stored.expiration_time.clone(),
            time_next_visible: stored.time_next_visible.clone(),
            dequeue_count: stored.dequeue_count,
        }))
    }

    async fn delete_message(
        &self,
        queue: &QueueName,
        message_id: &MessageId,
        pop_receipt: &PopReceipt,
    ) -> Result<(), QueueError> {
        self.begin(QueueOperation::DeleteMessage)?;

        let now = self.clock.now();
        let mut queues = self.write_queues();
        let stored_queue = queues
            .get_mut(queue)
            .ok_or_else(|| Self::queue_not_found(queue))?;
        stored_queue.purge_expired(&now);

        let position = stored_queue
            .messages
            .iter()
            .position(|m| &m.message_id == message_id && &m.pop_receipt == pop_receipt)
            .ok_or_else(|| QueueError::MessageNotFound {
                message_id: message_id.as_str().to_string(),
            })?;

        stored_queue.messages.remove(position);
        debug!(queue = %queue, message_id = %message_id, "Message deleted");
        Ok(())
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::InMemory
    }
}
