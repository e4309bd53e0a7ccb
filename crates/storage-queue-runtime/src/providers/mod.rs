//! Queue provider implementations.
//!
//! This module contains concrete implementations of the `QueueService` trait
//! for the Azure Queue Storage REST API and for an in-process queue store.

pub mod azure;
pub mod memory;

pub use azure::{AzureError, AzureStorageProvider};
pub use memory::{InMemoryProvider, OperationCounts, QueueOperation};
