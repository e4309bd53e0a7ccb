//! Azure Queue Storage provider implementation using the HTTP REST API.
//!
//! This module talks to the Queue service directly over HTTP instead of going
//! through an SDK, which keeps the provider small and lets unit tests run
//! against a mocked HTTP endpoint.
//!
//! ## Authentication
//!
//! - **Shared Key**: every request is signed with HMAC-SHA256 over the
//!   canonical request, keyed with the decoded account key
//! - **Shared Access Signature**: the SAS token is appended to the query of
//!   every request; no `Authorization` header is sent
//!
//! ## Operations
//!
//! | Operation | Request |
//! |---|---|
//! | Create queue | `PUT /{queue}` |
//! | Delete queue | `DELETE /{queue}` |
//! | Put message | `POST /{queue}/messages?messagettl=..` |
//! | Peek message | `GET /{queue}/messages?peekonly=true` |
//! | Get message | `GET /{queue}/messages?numofmessages=1` |
//! | Delete message | `DELETE /{queue}/messages/{id}?popreceipt=..` |
//!
//! ## Example
//!
//! ```no_run
//! use storage_queue_runtime::{AzureStorageConfig, StorageConnectionString};
//! use storage_queue_runtime::providers::AzureStorageProvider;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let connection_string = StorageConnectionString::parse(Some("UseDevelopmentStorage=true"))?;
//! let provider = AzureStorageProvider::new(AzureStorageConfig::new(connection_string))?;
//! # Ok(())
//! # }
//! ```

use crate::client::QueueService;
use crate::connection_string::StorageCredentials;
use crate::error::{ConfigurationError, QueueError, SerializationError, ValidationError};
use crate::message::{
    validate_visibility_timeout, EnqueuedMessage, Message, MessageId, PeekedMessage, PopReceipt,
    QueueName, ReceivedMessage, Timestamp,
};
use crate::provider::{AzureStorageConfig, MessageEncoding, ProviderType};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use chrono::{Datelike, Duration};
use hmac::{Hmac, Mac};
use reqwest::{Client as HttpClient, Method, StatusCode};
use sha2::Sha256;
use std::collections::HashMap;
use tracing::{debug, warn};
use url::Url;
use zeroize::Zeroizing;

#[cfg(test)]
#[path = "azure_tests.rs"]
mod tests;

/// REST API version sent in `x-ms-version`
pub const STORAGE_API_VERSION: &str = "2021-12-02";

const PROVIDER_NAME: &str = "AzureStorage";
const XML_CONTENT_TYPE: &str = "application/xml; charset=utf-8";

// ============================================================================
// Error Types
// ============================================================================

/// Azure Queue Storage specific errors
#[derive(Debug, thiserror::Error)]
pub enum AzureError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    #[error("Message not found: {0}")]
    MessageNotFound(String),

    #[error("Conflict on queue '{queue}': {message}")]
    Conflict { queue: String, message: String },

    #[error("Message too large: {size} bytes (max: {max_size})")]
    MessageTooLarge { size: usize, max_size: usize },

    #[error("Storage service error {status} {code}: {message}")]
    ServiceError {
        status: u16,
        code: String,
        message: String,
    },

    #[error("Invalid configuration: {0}")]
    ConfigurationError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] SerializationError),

    #[error("Validation error: {0}")]
    ValidationError(#[from] ValidationError),
}

impl AzureError {
    /// Check if error is transient
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Authentication(_) => false,
            Self::NetworkError(_) => true,
            Self::Timeout(_) => true,
            Self::QueueNotFound(_) => false,
            Self::MessageNotFound(_) => false,
            Self::Conflict { .. } => true,
            Self::MessageTooLarge { .. } => false,
            Self::ServiceError { status, .. } => *status >= 500,
            Self::ConfigurationError(_) => false,
            Self::SerializationError(_) => false,
            Self::ValidationError(_) => false,
        }
    }

    /// Map Azure error to QueueError
    pub fn to_queue_error(self) -> QueueError {
        match self {
            Self::Authentication(msg) => QueueError::AuthenticationFailed { message: msg },
            Self::NetworkError(msg) => QueueError::ConnectionFailed { message: msg },
            Self::Timeout(duration) => QueueError::Timeout { duration },
            Self::QueueNotFound(queue) => QueueError::QueueNotFound { queue_name: queue },
            Self::MessageNotFound(message_id) => QueueError::MessageNotFound { message_id },
            Self::Conflict { queue, message } => QueueError::Conflict {
                queue_name: queue,
                message,
            },
            Self::MessageTooLarge { size, max_size } => {
                QueueError::MessageTooLarge { size, max_size }
            }
            Self::ServiceError { code, message, .. } => QueueError::ProviderError {
                provider: PROVIDER_NAME.to_string(),
                code,
                message,
            },
            Self::ConfigurationError(msg) => {
                QueueError::ConfigurationError(ConfigurationError::Invalid { message: msg })
            }
            Self::SerializationError(e) => QueueError::SerializationError(e),
            Self::ValidationError(e) => QueueError::ValidationError(e),
        }
    }
}

// ============================================================================
// Shared Key Signing
// ============================================================================

type HmacSha256 = Hmac<Sha256>;

/// The parts of a request that go into the Shared Key string-to-sign
struct CanonicalRequest<'a> {
    method: &'a str,
    /// Percent-encoded URL path, starting with `/`
    path: &'a str,
    /// Decoded query parameters
    query: &'a [(String, String)],
    /// `x-ms-*` headers
    ms_headers: &'a [(String, String)],
    content_length: usize,
    content_type: Option<&'a str>,
}

/// Shared Key signer for the Queue service
///
/// String-to-sign layout:
/// 1. Verb and the eleven standard header slots (Content-Length empty when zero)
/// 2. `x-ms-*` headers, lowercased and sorted, one `name:value` per line
/// 3. `/<account><path>` followed by `\nname:value` per query parameter,
///    sorted by lowercased name
#[derive(Clone)]
struct SharedKeySigner {
    account_name: String,
    account_key: Zeroizing<Vec<u8>>,
}

impl SharedKeySigner {
    fn new(account_name: String, account_key: Zeroizing<Vec<u8>>) -> Self {
        Self {
            account_name,
            account_key,
        }
    }

    fn string_to_sign(&self, request: &CanonicalRequest<'_>) -> String {
        let content_length = if request.content_length == 0 {
            String::new()
        } else {
            request.content_length.to_string()
        };

        let mut headers = request
            .ms_headers
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.trim().to_string()))
            .collect::<Vec<_>>();
        headers.sort();
        let canonical_headers = headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v))
            .collect::<String>();

        let mut params = request
            .query
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
            .collect::<Vec<_>>();
        params.sort();
        let mut canonical_resource = format!("/{}{}", self.account_name, request.path);
        for (key, value) in params {
            canonical_resource.push_str(&format!("\n{}:{}", key, value));
        }

        format!(
            "{}\n\n\n{}\n\n{}\n\n\n\n\n\n\n{}{}",
            request.method,
            content_length,
            request.content_type.unwrap_or(""),
            canonical_headers,
            canonical_resource
        )
    }

    /// Value for the `Authorization` header
    fn authorization(&self, request: &CanonicalRequest<'_>) -> String {
        let string_to_sign = self.string_to_sign(request);
        let mut mac =
            HmacSha256::new_from_slice(&self.account_key).expect("HMAC can take key of any size");
        mac.update(string_to_sign.as_bytes());
        let signature = STANDARD.encode(mac.finalize().into_bytes());

        format!("SharedKey {}:{}", self.account_name, signature)
    }
}

/// How outgoing requests are authorized
#[derive(Clone)]
enum RequestAuth {
    SharedKey(SharedKeySigner),
    SharedAccessSignature(String),
}

// ============================================================================
// Azure Storage Provider
// ============================================================================

/// Raw response of a storage request that the service accepted
struct StorageResponse {
    status: StatusCode,
    body: String,
}

/// Azure Queue Storage provider implementation
///
/// The provider is cheap to share across tasks; the underlying HTTP client
/// pools connections internally.
pub struct AzureStorageProvider {
    http_client: HttpClient,
    endpoint: Url,
    auth: RequestAuth,
    encoding: MessageEncoding,
    request_timeout: Duration,
}

impl AzureStorageProvider {
    /// Create new Azure Storage provider
    ///
    /// # Errors
    ///
    /// Returns error if the request timeout is negative or the HTTP client
    /// cannot be built.
    pub fn new(config: AzureStorageConfig) -> Result<Self, AzureError> {
        let timeout = config.request_timeout.to_std().map_err(|_| {
            AzureError::ConfigurationError("Request timeout cannot be negative".to_string())
        })?;

        let http_client = HttpClient::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AzureError::NetworkError(format!("Failed to create HTTP client: {}", e)))?;

        let auth = match config.connection_string.credentials() {
            StorageCredentials::SharedKey {
                account_name,
                account_key,
            } => RequestAuth::SharedKey(SharedKeySigner::new(
                account_name.clone(),
                account_key.clone(),
            )),
            StorageCredentials::SharedAccessSignature { token } => {
                RequestAuth::SharedAccessSignature(token.clone())
            }
        };

        debug!(
            endpoint = %config.connection_string.queue_endpoint(),
            encoding = ?config.message_encoding,
            "Created Azure Storage queue provider"
        );

        Ok(Self {
            http_client,
            endpoint: config.connection_string.queue_endpoint().clone(),
            auth,
            encoding: config.message_encoding,
            request_timeout: config.request_timeout,
        })
    }

    /// URL for `resource` below the queue endpoint, with query and SAS
    fn resource_url(&self, resource: &str, query: &[(String, String)]) -> Url {
        let mut url = self.endpoint.clone();
        let path = format!("{}/{}", self.endpoint.path().trim_end_matches('/'), resource);
        url.set_path(&path);

        let mut pairs = query
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>();
        if let RequestAuth::SharedAccessSignature(token) = &self.auth {
            pairs.push(token.clone());
        }

        if pairs.is_empty() {
            url.set_query(None);
        } else {
            url.set_query(Some(&pairs.join("&")));
        }

        url
    }

    /// Send a request to the queue service
    ///
    /// Non-success statuses are turned into [`AzureError`] using the error
    /// code from the response body or the `x-ms-error-code` header.
    async fn make_request(
        &self,
        method: Method,
        queue: &QueueName,
        resource: &str,
        query: Vec<(String, String)>,
        body: Option<String>,
    ) -> Result<StorageResponse, AzureError> {
        let url = self.resource_url(resource, &query);
        // PUT and POST must carry a Content-Length even when empty
        let body = match body {
            Some(body) => Some(body),
            None if method == Method::PUT || method == Method::POST => Some(String::new()),
            None => None,
        };
        let content_length = body.as_ref().map(String::len).unwrap_or(0);
        let content_type = body
            .as_ref()
            .filter(|b| !b.is_empty())
            .map(|_| XML_CONTENT_TYPE);

        let ms_headers = vec![
            ("x-ms-client-request-id".to_string(), uuid::Uuid::new_v4().to_string()),
            ("x-ms-date".to_string(), Timestamp::now().to_rfc1123()),
            ("x-ms-version".to_string(), STORAGE_API_VERSION.to_string()),
        ];

        let mut request = self.http_client.request(method.clone(), url.clone());
        for (name, value) in &ms_headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(content_type) = content_type {
            request = request.header("Content-Type", content_type);
        }

        if let RequestAuth::SharedKey(signer) = &self.auth {
            let canonical = CanonicalRequest {
                method: method.as_str(),
                path: url.path(),
                query: &query,
                ms_headers: &ms_headers,
                content_length,
                content_type,
            };
            request = request.header("Authorization", signer.authorization(&canonical));
        }

        if let Some(body) = body {
            request = request.body(body);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                AzureError::Timeout(self.request_timeout)
            } else if e.is_connect() {
                AzureError::NetworkError(format!("Connection failed: {}", e))
            } else {
                AzureError::NetworkError(format!("HTTP request failed: {}", e))
            }
        })?;

        let status = response.status();
        let header_code = response
            .headers()
            .get("x-ms-error-code")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let response_body = response
            .text()
            .await
            .map_err(|e| AzureError::NetworkError(format!("Failed to read response body: {}", e)))?;

        debug!(
            method = %method,
            queue = %queue,
            status = status.as_u16(),
            "Storage request completed"
        );

        if !status.is_success() {
            let error = parse_error_response(&response_body, header_code, status.as_u16(), queue);
            debug!(
                queue = %queue,
                error = %error,
                transient = error.is_transient(),
                "Storage request failed"
            );
            return Err(error);
        }

        Ok(StorageResponse {
            status,
            body: response_body,
        })
    }

    fn encode_body(&self, body: &Bytes) -> Result<String, AzureError> {
        let encoded = match self.encoding {
            MessageEncoding::Base64 => STANDARD.encode(body),
            MessageEncoding::None => {
                let text =
                    std::str::from_utf8(body).map_err(|_| SerializationError::InvalidUtf8)?;
                quick_xml::escape::escape(text).into_owned()
            }
        };

        let max_size = ProviderType::AzureStorage.max_message_size();
        if encoded.len() > max_size {
            return Err(AzureError::MessageTooLarge {
                size: encoded.len(),
                max_size,
            });
        }

        Ok(encoded)
    }

    fn decode_body(&self, text: &str) -> Result<Bytes, AzureError> {
        match self.encoding {
            MessageEncoding::Base64 => STANDARD
                .decode(text)
                .map(Bytes::from)
                .map_err(|e| {
                    AzureError::SerializationError(SerializationError::InvalidBase64 {
                        message: e.to_string(),
                    })
                }),
            MessageEncoding::None => Ok(Bytes::from(text.to_string())),
        }
    }

    async fn create_queue_inner(&self, queue: &QueueName) -> Result<(), AzureError> {
        let response = self
            .make_request(Method::PUT, queue, queue.as_str(), Vec::new(), None)
            .await?;

        if response.status == StatusCode::NO_CONTENT {
            debug!(queue = %queue, "Queue already existed with matching metadata");
        }
        Ok(())
    }

    async fn delete_queue_inner(&self, queue: &QueueName) -> Result<bool, AzureError> {
        match self
            .make_request(Method::DELETE, queue, queue.as_str(), Vec::new(), None)
            .await
        {
            Ok(_) => Ok(true),
            Err(AzureError::QueueNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn send_message_inner(
        &self,
        queue: &QueueName,
        message: &Message,
    ) -> Result<EnqueuedMessage, AzureError> {
        message.validate()?;

        let mut query = Vec::new();
        if let Some(ttl) = message.time_to_live {
            query.push(("messagettl".to_string(), ttl.num_seconds().to_string()));
        }
        if let Some(timeout) = message.visibility_timeout {
            query.push((
                "visibilitytimeout".to_string(),
                timeout.num_seconds().to_string(),
            ));
        }

        let body = format!(
            "<QueueMessage><MessageText>{}</MessageText></QueueMessage>",
            self.encode_body(&message.body)?
        );
        let resource = format!("{}/messages", queue.as_str());
        let response = self
            .make_request(Method::POST, queue, &resource, query, Some(body))
            .await?;

        let fields = parse_message_list(&response.body)?
            .into_iter()
            .next()
            .ok_or_else(|| SerializationError::MissingElement {
                element: "QueueMessage".to_string(),
            })?;

        Ok(EnqueuedMessage {
            message_id: parse_message_id(&fields)?,
            pop_receipt: parse_pop_receipt(&fields)?,
            insertion_time: parse_time(&fields, "InsertionTime")?,
            expiration_time: parse_expiration(&fields)?,
            time_next_visible: parse_time(&fields, "TimeNextVisible")?,
        })
    }

    async fn peek_message_inner(
        &self,
        queue: &QueueName,
    ) -> Result<Option<PeekedMessage>, AzureError> {
        let query = vec![
            ("peekonly".to_string(), "true".to_string()),
            ("numofmessages".to_string(), "1".to_string()),
        ];
        let resource = format!("{}/messages", queue.as_str());
        let response = self
            .make_request(Method::GET, queue, &resource, query, None)
            .await?;

        let Some(fields) = parse_message_list(&response.body)?.into_iter().next() else {
            return Ok(None);
        };

        Ok(Some(PeekedMessage {
            message_id: parse_message_id(&fields)?,
            body: self.decode_body(required(&fields, "MessageText")?)?,
            insertion_time: parse_time(&fields, "InsertionTime")?,
            expiration_time: parse_expiration(&fields)?,
            dequeue_count: parse_dequeue_count(&fields)?,
        }))
    }

    async fn receive_message_inner(
        &self,
        queue: &QueueName,
        visibility_timeout: Option<Duration>,
    ) -> Result<Option<ReceivedMessage>, AzureError> {
        let mut query = vec![("numofmessages".to_string(), "1".to_string())];
        if let Some(timeout) = visibility_timeout {
            validate_visibility_timeout(timeout)?;
            query.push((
                "visibilitytimeout".to_string(),
                timeout.num_seconds().to_string(),
            ));
        }

        let resource = format!("{}/messages", queue.as_str());
        let response = self
            .make_request(Method::GET, queue, &resource, query, None)
            .await?;

        let Some(fields) = parse_message_list(&response.body)?.into_iter().next() else {
            return Ok(None);
        };

        Ok(Some(ReceivedMessage {
            message_id: parse_message_id(&fields)?,
            body: self.decode_body(required(&fields, "MessageText")?)?,
            pop_receipt: parse_pop_receipt(&fields)?,
            insertion_time: parse_time(&fields, "InsertionTime")?,
            expiration_time: parse_expiration(&fields)?,
            time_next_visible: parse_time(&fields, "TimeNextVisible")?,
            dequeue_count: parse_dequeue_count(&fields)?,
        }))
    }

    async fn delete_message_inner(
        &self,
        queue: &QueueName,
        message_id: &MessageId,
        pop_receipt: &PopReceipt,
    ) -> Result<(), AzureError> {
        let query = vec![("popreceipt".to_string(), pop_receipt.as_str().to_string())];
        let resource = format!("{}/messages/{}", queue.as_str(), message_id.as_str());

        match self
            .make_request(Method::DELETE, queue, &resource, query, None)
            .await
        {
            Ok(_) => Ok(()),
            Err(AzureError::MessageNotFound(_)) => {
                Err(AzureError::MessageNotFound(message_id.as_str().to_string()))
            }
            Err(e) => Err(e),
        }
    }
}

impl std::fmt::Debug for AzureStorageProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let auth = match self.auth {
            RequestAuth::SharedKey(_) => "SharedKey",
            RequestAuth::SharedAccessSignature(_) => "SharedAccessSignature",
        };
        f.debug_struct("AzureStorageProvider")
            .field("endpoint", &self.endpoint.as_str())
            .field("auth", &auth)
            .field("encoding", &self.encoding)
            .finish()
    }
}

#[async_trait]
impl QueueService for AzureStorageProvider {
    async fn create_queue(&self, queue: &QueueName) -> Result<(), QueueError> {
        self.create_queue_inner(queue)
            .await
            .map_err(AzureError::to_queue_error)
    }

    async fn delete_queue_if_exists(&self, queue: &QueueName) -> Result<bool, QueueError> {
        self.delete_queue_inner(queue)
            .await
            .map_err(AzureError::to_queue_error)
    }

    async fn send_message(
        &self,
        queue: &QueueName,
        message: &Message,
    ) -> Result<EnqueuedMessage, QueueError> {
        self.send_message_inner(queue, message)
            .await
            .map_err(AzureError::to_queue_error)
    }

    async fn peek_message(&self, queue: &QueueName) -> Result<Option<PeekedMessage>, QueueError> {
        self.peek_message_inner(queue)
            .await
            .map_err(AzureError::to_queue_error)
    }

    async fn receive_message(
        &self,
        queue: &QueueName,
        visibility_timeout: Option<Duration>,
    ) -> Result<Option<ReceivedMessage>, QueueError> {
        self.receive_message_inner(queue, visibility_timeout)
            .await
            .map_err(AzureError::to_queue_error)
    }

    async fn delete_message(
        &self,
        queue: &QueueName,
        message_id: &MessageId,
        pop_receipt: &PopReceipt,
    ) -> Result<(), QueueError> {
        self.delete_message_inner(queue, message_id, pop_receipt)
            .await
            .map_err(AzureError::to_queue_error)
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::AzureStorage
    }
}

// ============================================================================
// Response Parsing
// ============================================================================

/// Parse a `QueueMessagesList` body into one field map per `QueueMessage`
fn parse_message_list(xml: &str) -> Result<Vec<HashMap<String, String>>, AzureError> {
    use quick_xml::events::Event;
    use quick_xml::Reader;

    // Message text may carry significant whitespace when not base64 encoded
    let mut reader = Reader::from_str(xml);
    reader.trim_text(false);

    let mut messages = Vec::new();
    let mut current: Option<HashMap<String, String>> = None;
    let mut field: Option<String> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if name == "QueueMessage" {
                    current = Some(HashMap::new());
                } else if let Some(fields) = current.as_mut() {
                    fields.insert(name.clone(), String::new());
                    field = Some(name);
                }
            }
            Ok(Event::Empty(ref e)) => {
                if let Some(fields) = current.as_mut() {
                    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    fields.insert(name, String::new());
                }
            }
            Ok(Event::Text(e)) => {
                if let (Some(fields), Some(name)) = (current.as_mut(), field.as_ref()) {
                    let text = e.unescape().map_err(|e| SerializationError::Xml {
                        message: e.to_string(),
                    })?;
                    fields
                        .entry(name.clone())
                        .or_default()
                        .push_str(&text);
                }
            }
            Ok(Event::End(ref e)) => {
                if e.name().as_ref() == b"QueueMessage" {
                    if let Some(fields) = current.take() {
                        messages.push(fields);
                    }
                }
                field = None;
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(AzureError::SerializationError(SerializationError::Xml {
                    message: e.to_string(),
                }))
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(messages)
}

/// Extract `(Code, Message)` from an `<Error>` body
fn parse_error_body(xml: &str) -> (Option<String>, Option<String>) {
    use quick_xml::events::Event;
    use quick_xml::Reader;

    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut error_code = None;
    let mut error_message = None;
    let mut in_error = false;
    let mut in_code = false;
    let mut in_message = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"Error" => in_error = true,
                b"Code" if in_error => in_code = true,
                b"Message" if in_error => in_message = true,
                _ => {}
            },
            Ok(Event::Text(e)) => {
                if in_code {
                    error_code = e.unescape().ok().map(|s| s.into_owned());
                    in_code = false;
                } else if in_message {
                    error_message = e.unescape().ok().map(|s| s.into_owned());
                    in_message = false;
                }
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"Error" => {
                in_error = false;
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    (error_code, error_message)
}

/// Map a failed response to an [`AzureError`]
fn parse_error_response(
    xml: &str,
    header_code: Option<String>,
    status_code: u16,
    queue: &QueueName,
) -> AzureError {
    let (body_code, body_message) = parse_error_body(xml);

    let code = body_code
        .or(header_code)
        .unwrap_or_else(|| "Unknown".to_string());
    // The service appends RequestId/Time lines to the message
    let message = body_message
        .and_then(|m| m.lines().next().map(str::to_string))
        .unwrap_or_else(|| format!("HTTP status {}", status_code));

    match code.as_str() {
        "QueueNotFound" => AzureError::QueueNotFound(queue.as_str().to_string()),
        "MessageNotFound" | "PopReceiptMismatch" => AzureError::MessageNotFound(message),
        "QueueAlreadyExists" | "QueueBeingDeleted" | "QueueDisabled" => AzureError::Conflict {
            queue: queue.as_str().to_string(),
            message: format!("{}: {}", code, message),
        },
        "AuthenticationFailed" | "AuthorizationFailure" | "InvalidAuthenticationInfo" => {
            AzureError::Authentication(format!("{}: {}", code, message))
        }
        _ if status_code == 401 || status_code == 403 => {
            AzureError::Authentication(format!("{}: {}", code, message))
        }
        _ => {
            if status_code >= 500 {
                warn!(status = status_code, code = %code, "Storage service reported a server error");
            }
            AzureError::ServiceError {
                status: status_code,
                code,
                message,
            }
        }
    }
}

fn required<'a>(fields: &'a HashMap<String, String>, element: &str) -> Result<&'a str, AzureError> {
    fields.get(element).map(String::as_str).ok_or_else(|| {
        AzureError::SerializationError(SerializationError::MissingElement {
            element: element.to_string(),
        })
    })
}

fn parse_time(fields: &HashMap<String, String>, element: &str) -> Result<Timestamp, AzureError> {
    let value = required(fields, element)?;
    Timestamp::from_rfc1123(value).map_err(|_| {
        AzureError::SerializationError(SerializationError::InvalidTimestamp {
            element: element.to_string(),
            value: value.to_string(),
        })
    })
}

/// Expiration time, `None` for messages stored with an infinite TTL
///
/// The service reports those with an expiration in year 9999.
fn parse_expiration(fields: &HashMap<String, String>) -> Result<Option<Timestamp>, AzureError> {
    let expiration = parse_time(fields, "ExpirationTime")?;
    if expiration.as_datetime().year() >= 9999 {
        Ok(None)
    } else {
        Ok(Some(expiration))
    }
}

fn parse_message_id(fields: &HashMap<String, String>) -> Result<MessageId, AzureError> {
    required(fields, "MessageId")?.parse().map_err(|_| {
        AzureError::SerializationError(SerializationError::MissingElement {
            element: "MessageId".to_string(),
        })
    })
}

fn parse_pop_receipt(fields: &HashMap<String, String>) -> Result<PopReceipt, AzureError> {
    PopReceipt::new(required(fields, "PopReceipt")?.to_string()).map_err(|_| {
        AzureError::SerializationError(SerializationError::MissingElement {
            element: "PopReceipt".to_string(),
        })
    })
}

fn parse_dequeue_count(fields: &HashMap<String, String>) -> Result<u32, AzureError> {
    let value = required(fields, "DequeueCount")?;
    value.trim().parse().map_err(|_| {
        AzureError::SerializationError(SerializationError::Xml {
            message: format!("DequeueCount '{}' is not a number", value),
        })
    })
}
