//! # Storage Queue Runtime
//!
//! Thin client runtime for Azure Queue Storage with an in-memory provider for
//! tests and local development.
//!
//! This library provides:
//! - A provider-agnostic [`QueueService`] capability trait
//! - Storage connection string parsing and validation
//! - An Azure Storage provider speaking the Queue REST API with Shared Key or SAS auth
//! - An in-memory provider that honours visibility timeouts, TTLs and pop receipts
//!
//! ## Module Organization
//!
//! - [`error`] - Error types for all queue operations
//! - [`message`] - Queue names, message identifiers and message shapes
//! - [`connection_string`] - Storage connection string parsing
//! - [`provider`] - Provider types and configuration
//! - [`client`] - The capability trait and client factory
//! - [`clock`] - Time sources used by the in-memory provider
//! - [`providers`] - Concrete provider implementations

// Module declarations
pub mod client;
pub mod clock;
pub mod connection_string;
pub mod error;
pub mod message;
pub mod provider;
pub mod providers;

// Re-export commonly used types at crate root for convenience
pub use client::{QueueClientFactory, QueueService};
pub use clock::{Clock, ManualClock, SystemClock};
pub use connection_string::{StorageConnectionString, StorageCredentials};
pub use error::{ConfigurationError, QueueError, SerializationError, ValidationError};
pub use message::{
    EnqueuedMessage, Message, MessageId, PeekedMessage, PopReceipt, QueueName, ReceivedMessage,
    Timestamp,
};
pub use provider::{
    AzureStorageConfig, InMemoryConfig, MessageEncoding, ProviderConfig, ProviderType,
    QueueConfig,
};
pub use providers::{AzureStorageProvider, InMemoryProvider, OperationCounts, QueueOperation};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
