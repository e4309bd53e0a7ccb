//! Provider types and configuration.

use crate::connection_string::StorageConnectionString;
use crate::error::ValidationError;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Enumeration of supported queue providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderType {
    AzureStorage,
    InMemory,
}

impl ProviderType {
    /// Get maximum encoded message size for provider
    pub fn max_message_size(&self) -> usize {
        match self {
            Self::AzureStorage => 64 * 1024,
            Self::InMemory => 64 * 1024,
        }
    }
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AzureStorage => write!(f, "AzureStorage"),
            Self::InMemory => write!(f, "InMemory"),
        }
    }
}

/// How message text is carried inside the `MessageText` element
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageEncoding {
    /// Base64 of the raw body bytes, matching the storage SDK default
    #[default]
    Base64,
    /// The UTF-8 body, XML-escaped
    None,
}

impl FromStr for MessageEncoding {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "base64" => Ok(Self::Base64),
            "none" | "text" => Ok(Self::None),
            other => Err(ValidationError::InvalidFormat {
                field: "message_encoding".to_string(),
                message: format!("'{}' is not one of base64, none", other),
            }),
        }
    }
}

/// Configuration for queue client initialization
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub provider: ProviderConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::InMemory(InMemoryConfig::default()),
        }
    }
}

/// Provider-specific configuration
#[derive(Debug, Clone)]
pub enum ProviderConfig {
    AzureStorage(AzureStorageConfig),
    InMemory(InMemoryConfig),
}

/// Azure Queue Storage configuration
#[derive(Debug, Clone)]
pub struct AzureStorageConfig {
    pub connection_string: StorageConnectionString,
    pub message_encoding: MessageEncoding,
    /// Per-request timeout enforced by the HTTP client
    pub request_timeout: Duration,
}

impl AzureStorageConfig {
    /// Configuration with default encoding and timeout
    pub fn new(connection_string: StorageConnectionString) -> Self {
        Self {
            connection_string,
            message_encoding: MessageEncoding::default(),
            request_timeout: Duration::seconds(30),
        }
    }
}

/// In-memory provider configuration
#[derive(Debug, Clone)]
pub struct InMemoryConfig {
    /// Hide period applied by receive when the caller gives none
    pub default_visibility_timeout: Duration,
    /// TTL applied by send when the message gives none
    pub default_message_ttl: Duration,
    pub max_message_size: usize,
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            default_visibility_timeout: Duration::seconds(30),
            default_message_ttl: Duration::days(7),
            max_message_size: ProviderType::InMemory.max_message_size(),
        }
    }
}

#[cfg(test)]
#[path = "provider_tests.rs"]
mod tests;
