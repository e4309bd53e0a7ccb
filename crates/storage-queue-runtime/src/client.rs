//! Capability trait and client factory for queue operations.

use crate::error::QueueError;
use crate::message::{
    EnqueuedMessage, Message, MessageId, PeekedMessage, PopReceipt, QueueName, ReceivedMessage,
};
use crate::provider::{InMemoryConfig, ProviderConfig, ProviderType, QueueConfig};
use crate::providers::{AzureStorageProvider, InMemoryProvider};
use async_trait::async_trait;
use chrono::Duration;
use std::sync::Arc;

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;

/// The operations a queue service offers, implemented per provider
///
/// Every call is a single remote round trip. Nothing here retries; a failure
/// is returned to the caller as-is.
#[async_trait]
pub trait QueueService: Send + Sync {
    /// Create the queue; succeeds if it already exists with identical metadata
    async fn create_queue(&self, queue: &QueueName) -> Result<(), QueueError>;

    /// Delete the queue and any messages in it
    ///
    /// Returns `true` when a queue was deleted and `false` when none existed.
    async fn delete_queue_if_exists(&self, queue: &QueueName) -> Result<bool, QueueError>;

    /// Add a message to the back of the queue
    async fn send_message(
        &self,
        queue: &QueueName,
        message: &Message,
    ) -> Result<EnqueuedMessage, QueueError>;

    /// Read the front message without changing its visibility
    async fn peek_message(&self, queue: &QueueName) -> Result<Option<PeekedMessage>, QueueError>;

    /// Retrieve the front message and hide it from other consumers
    ///
    /// `visibility_timeout` of `None` leaves the service default in effect.
    async fn receive_message(
        &self,
        queue: &QueueName,
        visibility_timeout: Option<Duration>,
    ) -> Result<Option<ReceivedMessage>, QueueError>;

    /// Permanently remove a retrieved message
    async fn delete_message(
        &self,
        queue: &QueueName,
        message_id: &MessageId,
        pop_receipt: &PopReceipt,
    ) -> Result<(), QueueError>;

    /// Get provider type
    fn provider_type(&self) -> ProviderType;
}

#[async_trait]
impl<T: QueueService + ?Sized> QueueService for Box<T> {
    async fn create_queue(&self, queue: &QueueName) -> Result<(), QueueError> {
        (**self).create_queue(queue).await
    }

    async fn delete_queue_if_exists(&self, queue: &QueueName) -> Result<bool, QueueError> {
        (**self).delete_queue_if_exists(queue).await
    }

    async fn send_message(
        &self,
        queue: &QueueName,
        message: &Message,
    ) -> Result<EnqueuedMessage, QueueError> {
        (**self).send_message(queue, message).await
    }

    async fn peek_message(&self, queue: &QueueName) -> Result<Option<PeekedMessage>, QueueError> {
        (**self).peek_message(queue).await
    }

    async fn receive_message(
        &self,
        queue: &QueueName,
        visibility_timeout: Option<Duration>,
    ) -> Result<Option<ReceivedMessage>, QueueError> {
        (**self).receive_message(queue, visibility_timeout).await
    }

    async fn delete_message(
        &self,
        queue: &QueueName,
        message_id: &MessageId,
        pop_receipt: &PopReceipt,
    ) -> Result<(), QueueError> {
        (**self).delete_message(queue, message_id, pop_receipt).await
    }

    fn provider_type(&self) -> ProviderType {
        (**self).provider_type()
    }
}

#[async_trait]
impl<T: QueueService + ?Sized> QueueService for Arc<T> {
    async fn create_queue(&self, queue: &QueueName) -> Result<(), QueueError> {
        (**self).create_queue(queue).await
    }

    async fn delete_queue_if_exists(&self, queue: &QueueName) -> Result<bool, QueueError> {
        (**self).delete_queue_if_exists(queue).await
    }

    async fn send_message(
        &self,
        queue: &QueueName,
        message: &Message,
    ) -> Result<EnqueuedMessage, QueueError> {
        (**self).send_message(queue, message).await
    }

    async fn peek_message(&self, queue: &QueueName) -> Result<Option<PeekedMessage>, QueueError> {
        (**self).peek_message(queue).await
    }

    async fn receive_message(
        &self,
        queue: &QueueName,
        visibility_timeout: Option<Duration>,
    ) -> Result<Option<ReceivedMessage>, QueueError> {
        (**self).receive_message(queue, visibility_timeout).await
    }

    async fn delete_message(
        &self,
        queue: &QueueName,
        message_id: &MessageId,
        pop_receipt: &PopReceipt,
    ) -> Result<(), QueueError> {
        (**self).delete_message(queue, message_id, pop_receipt).await
    }

    fn provider_type(&self) -> ProviderType {
        (**self).provider_type()
    }
}

/// Factory for creating queue services with the configured provider
pub struct QueueClientFactory;

impl QueueClientFactory {
    /// Create queue service from configuration
    pub async fn create_client(config: QueueConfig) -> Result<Box<dyn QueueService>, QueueError> {
        let service: Box<dyn QueueService> = match config.provider {
            ProviderConfig::InMemory(in_memory_config) => {
                Box::new(InMemoryProvider::new(in_memory_config))
            }
            ProviderConfig::AzureStorage(azure_config) => Box::new(
                AzureStorageProvider::new(azure_config).map_err(|e| e.to_queue_error())?,
            ),
        };

        Ok(service)
    }

    /// Create test service with in-memory provider
    pub fn create_test_client() -> Box<dyn QueueService> {
        Box::new(InMemoryProvider::new(InMemoryConfig::default()))
    }
}
