//! Message types for queue operations including core domain identifiers.

use crate::error::{SerializationError, ValidationError};
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Default message time-to-live applied by the service (7 days)
pub const DEFAULT_MESSAGE_TTL_SECS: i64 = 7 * 24 * 60 * 60;

/// Upper bound for visibility timeouts accepted by the service (7 days)
pub const MAX_VISIBILITY_TIMEOUT_SECS: i64 = 7 * 24 * 60 * 60;

/// Time-to-live value the service interprets as "never expires"
pub const INFINITE_TTL_SECS: i64 = -1;

// ============================================================================
// Core Domain Identifiers
// ============================================================================

/// Validated queue name following the storage service naming rules
///
/// Names are 3-63 characters of lowercase ASCII letters, digits and hyphens.
/// They start with a letter or digit, do not end with a hyphen and never
/// contain two hyphens in a row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueName(String);

impl QueueName {
    /// Create new queue name with validation
    pub fn new(name: String) -> Result<Self, ValidationError> {
        if name.len() < 3 || name.len() > 63 {
            return Err(ValidationError::OutOfRange {
                field: "queue_name".to_string(),
                message: "must be 3-63 characters".to_string(),
            });
        }

        if !name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(ValidationError::InvalidFormat {
                field: "queue_name".to_string(),
                message: "only lowercase ASCII letters, digits and hyphens allowed".to_string(),
            });
        }

        if name.starts_with('-') || name.ends_with('-') || name.contains("--") {
            return Err(ValidationError::InvalidFormat {
                field: "queue_name".to_string(),
                message: "no leading/trailing hyphens or consecutive hyphens".to_string(),
            });
        }

        Ok(Self(name))
    }

    /// Create a queue name made of `prefix` and a fresh random UUID
    ///
    /// Uniqueness rests on the UUID v4 collision probability alone.
    pub fn with_unique_suffix(prefix: &str) -> Result<Self, ValidationError> {
        Self::new(format!("{}-{}", prefix, uuid::Uuid::new_v4()))
    }

    /// Get queue name as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueueName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

/// Service-assigned identifier of a queued message
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Generate new random message ID
    pub fn new() -> Self {
        let id = uuid::Uuid::new_v4();
        Self(id.to_string())
    }

    /// Get message ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ValidationError::Required {
                field: "message_id".to_string(),
            });
        }

        Ok(Self(s.to_string()))
    }
}

/// Opaque token proving the holder of the latest retrieval of a message
///
/// A new receipt is issued on every dequeue; deleting a message requires the
/// receipt from the most recent one.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PopReceipt(String);

impl PopReceipt {
    /// Create pop receipt from the service-provided token
    pub fn new(receipt: String) -> Result<Self, ValidationError> {
        if receipt.is_empty() {
            return Err(ValidationError::Required {
                field: "pop_receipt".to_string(),
            });
        }

        Ok(Self(receipt))
    }

    /// Generate a fresh random receipt
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Get receipt as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for PopReceipt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PopReceipt").field(&"<redacted>").finish()
    }
}

/// Timestamp wrapper for consistent time handling
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current time
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Create timestamp from DateTime
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Parse the RFC 1123 form used in storage service headers and bodies,
    /// e.g. `Fri, 09 Oct 2009 21:04:30 GMT`
    pub fn from_rfc1123(value: &str) -> Result<Self, chrono::ParseError> {
        let dt = DateTime::parse_from_rfc2822(value)?;
        Ok(Self(dt.with_timezone(&Utc)))
    }

    /// Format as RFC 1123 for the `x-ms-date` header
    pub fn to_rfc1123(&self) -> String {
        self.0.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
    }

    /// Timestamp shifted by `duration`
    pub fn plus(&self, duration: Duration) -> Self {
        Self(self.0 + duration)
    }

    /// Timestamp shifted by `duration`, or `None` past the representable range
    pub fn checked_plus(&self, duration: Duration) -> Option<Self> {
        self.0.checked_add_signed(duration).map(Self)
    }

    /// Get underlying DateTime
    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S UTC"))
    }
}

impl FromStr for Timestamp {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let dt = s.parse::<DateTime<Utc>>()?;
        Ok(Self::from_datetime(dt))
    }
}

// ============================================================================
// Message Types
// ============================================================================

/// A message to be placed on a queue
#[derive(Debug, Clone)]
pub struct Message {
    pub body: Bytes,
    /// Service default (7 days) when unset
    pub time_to_live: Option<Duration>,
    /// Delay before the message first becomes visible; zero when unset
    pub visibility_timeout: Option<Duration>,
}

impl Message {
    /// Create new message with body
    pub fn new(body: Bytes) -> Self {
        Self {
            body,
            time_to_live: None,
            visibility_timeout: None,
        }
    }

    /// Create new message from UTF-8 text
    pub fn from_text(text: &str) -> Self {
        Self::new(Bytes::from(text.to_string()))
    }

    /// Set time-to-live for message expiration
    pub fn with_time_to_live(mut self, ttl: Duration) -> Self {
        self.time_to_live = Some(ttl);
        self
    }

    /// Set the initial invisibility period
    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = Some(timeout);
        self
    }

    /// Check TTL and visibility values against the service limits
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(ttl) = self.time_to_live {
            let secs = ttl.num_seconds();
            if secs != INFINITE_TTL_SECS && secs < 1 {
                return Err(ValidationError::OutOfRange {
                    field: "time_to_live".to_string(),
                    message: "must be at least one second, or -1 for no expiry".to_string(),
                });
            }
        }

        if let Some(timeout) = self.visibility_timeout {
            validate_visibility_timeout(timeout)?;
            let secs = timeout.num_seconds();

            let ttl_secs = self
                .time_to_live
                .map(|ttl| ttl.num_seconds())
                .unwrap_or(DEFAULT_MESSAGE_TTL_SECS);
            if ttl_secs != INFINITE_TTL_SECS && secs >= ttl_secs {
                return Err(ValidationError::OutOfRange {
                    field: "visibility_timeout".to_string(),
                    message: "must be shorter than the time-to-live".to_string(),
                });
            }
        }

        Ok(())
    }
}

/// Check a visibility timeout against the 0 to 7 day service range
pub fn validate_visibility_timeout(timeout: Duration) -> Result<(), ValidationError> {
    if !(0..=MAX_VISIBILITY_TIMEOUT_SECS).contains(&timeout.num_seconds()) {
        return Err(ValidationError::OutOfRange {
            field: "visibility_timeout".to_string(),
            message: "must be between 0 seconds and 7 days".to_string(),
        });
    }

    Ok(())
}

/// Receipt returned by the service after a message was enqueued
#[derive(Debug, Clone)]
pub struct EnqueuedMessage {
    pub message_id: MessageId,
    pub pop_receipt: PopReceipt,
    pub insertion_time: Timestamp,
    /// `None` when the message never expires
    pub expiration_time: Option<Timestamp>,
    pub time_next_visible: Timestamp,
}

/// A message read from the queue head without changing its visibility
#[derive(Debug, Clone)]
pub struct PeekedMessage {
    pub message_id: MessageId,
    pub body: Bytes,
    pub insertion_time: Timestamp,
    pub expiration_time: Option<Timestamp>,
    pub dequeue_count: u32,
}

impl PeekedMessage {
    /// Body as UTF-8 text
    pub fn body_text(&self) -> Result<&str, SerializationError> {
        std::str::from_utf8(&self.body).map_err(|_| SerializationError::InvalidUtf8)
    }
}

/// A message retrieved from the queue and hidden from other consumers
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub message_id: MessageId,
    pub body: Bytes,
    pub pop_receipt: PopReceipt,
    pub insertion_time: Timestamp,
    pub expiration_time: Option<Timestamp>,
    pub time_next_visible: Timestamp,
    pub dequeue_count: u32,
}

impl ReceivedMessage {
    /// Body as UTF-8 text
    pub fn body_text(&self) -> Result<&str, SerializationError> {
        std::str::from_utf8(&self.body).map_err(|_| SerializationError::InvalidUtf8)
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
