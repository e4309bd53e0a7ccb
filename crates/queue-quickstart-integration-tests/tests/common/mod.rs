//! Common test utilities for the quickstart integration tests
//!
//! This module provides:
//! - A wiremock-backed stand-in for the Queue Storage REST endpoint
//! - Settings and console helpers for driving a full walkthrough

use queue_quickstart::driver::{run_quickstart, NoPause, RunOutcome};
use queue_quickstart::settings::QuickstartSettings;
use queue_quickstart::QuickstartError;
use storage_queue_runtime::providers::AzureError;
use storage_queue_runtime::{
    AzureStorageConfig, AzureStorageProvider, QueueService, StorageConnectionString,
};
use wiremock::matchers::{method, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Base64 of `test-account-key-bytes`
#[allow(dead_code)]
pub const TEST_ACCOUNT_KEY: &str = "dGVzdC1hY2NvdW50LWtleS1ieXRlcw==";

#[allow(dead_code)]
pub const ACCOUNT: &str = "devstoreaccount1";

#[allow(dead_code)]
pub const MESSAGE_ID: &str = "5974b586-0df3-4e2d-ad0c-18e3892bfca2";

/// Receipt returned by the enqueue; must never be used to delete
#[allow(dead_code)]
pub const ENQUEUE_RECEIPT: &str = "AgAAAAMAAAAAAAAAEnqueued=";

/// Receipt returned by the dequeue
#[allow(dead_code)]
pub const DEQUEUE_RECEIPT: &str = "AgAAAAMAAAAAAAAA+wI=";

#[allow(dead_code)]
const QUEUE_PATTERN: &str = r"^/devstoreaccount1/quickstartqueues-[0-9a-f-]{36}$";
#[allow(dead_code)]
const MESSAGES_PATTERN: &str = r"^/devstoreaccount1/quickstartqueues-[0-9a-f-]{36}/messages$";
#[allow(dead_code)]
const MESSAGE_PATTERN: &str =
    r"^/devstoreaccount1/quickstartqueues-[0-9a-f-]{36}/messages/[0-9a-f-]{36}$";

// ============================================================================
// Storage Endpoint
// ============================================================================

/// Which request the mocked endpoint should fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(dead_code)]
pub enum FailAt {
    Nothing,
    CreateQueue,
    SendMessage,
    PeekMessage,
    ReceiveMessage,
    DeleteMessage,
    DeleteQueue,
}

/// Mocked Queue Storage endpoint for one walkthrough
#[allow(dead_code)]
pub struct StorageEndpoint {
    pub server: MockServer,
}

#[allow(dead_code)]
impl StorageEndpoint {
    /// Start a server answering every walkthrough request, failing at `fail_at`
    pub async fn start(fail_at: FailAt) -> Self {
        let server = MockServer::start().await;

        let respond = |step: FailAt, ok: ResponseTemplate| {
            if step == fail_at {
                failure_for(step)
            } else {
                ok
            }
        };

        Mock::given(method("PUT"))
            .and(path_regex(QUEUE_PATTERN))
            .respond_with(respond(FailAt::CreateQueue, ResponseTemplate::new(201)))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path_regex(MESSAGES_PATTERN))
            .and(query_param("messagettl", "604800"))
            .respond_with(respond(
                FailAt::SendMessage,
                ResponseTemplate::new(201).set_body_string(put_message_response()),
            ))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path_regex(MESSAGES_PATTERN))
            .and(query_param("peekonly", "true"))
            .respond_with(respond(
                FailAt::PeekMessage,
                ResponseTemplate::new(200).set_body_string(peek_response()),
            ))
            .with_priority(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path_regex(MESSAGES_PATTERN))
            .and(query_param("numofmessages", "1"))
            .respond_with(respond(
                FailAt::ReceiveMessage,
                ResponseTemplate::new(200).set_body_string(get_response()),
            ))
            .with_priority(2)
            .mount(&server)
            .await;

        Mock::given(method("DELETE"))
            .and(path_regex(MESSAGE_PATTERN))
            .and(query_param("popreceipt", DEQUEUE_RECEIPT))
            .respond_with(respond(FailAt::DeleteMessage, ResponseTemplate::new(204)))
            .mount(&server)
            .await;

        Mock::given(method("DELETE"))
            .and(path_regex(QUEUE_PATTERN))
            .respond_with(respond(FailAt::DeleteQueue, ResponseTemplate::new(204)))
            .mount(&server)
            .await;

        Self { server }
    }

    pub fn connection_string(&self) -> String {
        format!(
            "DefaultEndpointsProtocol=http;AccountName={};AccountKey={};QueueEndpoint={}/{}",
            ACCOUNT,
            TEST_ACCOUNT_KEY,
            self.server.uri(),
            ACCOUNT
        )
    }

    /// `METHOD /path` of every request received, in order
    pub async fn request_log(&self) -> Vec<String> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .map(|request| {
                let kind = if request.url.path().ends_with("/messages") {
                    "messages"
                } else if request.url.path().contains("/messages/") {
                    "message"
                } else {
                    "queue"
                };
                let peek = request
                    .url
                    .query_pairs()
                    .any(|(key, value)| key == "peekonly" && value == "true");
                format!(
                    "{} {}{}",
                    request.method,
                    kind,
                    if peek { " (peek)" } else { "" }
                )
            })
            .collect()
    }

    /// Number of `DELETE` requests against the queue itself
    pub async fn queue_deletions(&self) -> usize {
        self.request_log()
            .await
            .iter()
            .filter(|entry| entry.as_str() == "DELETE queue")
            .count()
    }
}

#[allow(dead_code)]
fn failure_for(step: FailAt) -> ResponseTemplate {
    let (status, code, message) = match step {
        FailAt::CreateQueue => (409, "QueueBeingDeleted", "The specified queue is being deleted."),
        FailAt::SendMessage => (
            403,
            "AuthenticationFailed",
            "Server failed to authenticate the request.",
        ),
        FailAt::PeekMessage | FailAt::ReceiveMessage => (
            503,
            "ServerBusy",
            "The server is currently unable to receive requests.",
        ),
        FailAt::DeleteMessage => (
            400,
            "PopReceiptMismatch",
            "The specified pop receipt did not match the pop receipt for a dequeued message.",
        ),
        FailAt::DeleteQueue => (500, "InternalError", "The server encountered an internal error."),
        FailAt::Nothing => (500, "InternalError", "unexpected"),
    };

    ResponseTemplate::new(status)
        .insert_header("x-ms-error-code", code)
        .set_body_string(format!(
            "<?xml version=\"1.0\" encoding=\"utf-8\"?><Error><Code>{}</Code><Message>{}\nRequestId:0a1b2c3d</Message></Error>",
            code, message
        ))
}

#[allow(dead_code)]
fn put_message_response() -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?><QueueMessagesList><QueueMessage>\
         <MessageId>{}</MessageId>\
         <InsertionTime>Fri, 09 Oct 2009 21:04:30 GMT</InsertionTime>\
         <ExpirationTime>Fri, 16 Oct 2009 21:04:30 GMT</ExpirationTime>\
         <PopReceipt>{}</PopReceipt>\
         <TimeNextVisible>Fri, 09 Oct 2009 21:04:30 GMT</TimeNextVisible>\
         </QueueMessage></QueueMessagesList>",
        MESSAGE_ID, ENQUEUE_RECEIPT
    )
}

#[allow(dead_code)]
fn peek_response() -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?><QueueMessagesList><QueueMessage>\
         <MessageId>{}</MessageId>\
         <InsertionTime>Fri, 09 Oct 2009 21:04:30 GMT</InsertionTime>\
         <ExpirationTime>Fri, 16 Oct 2009 21:04:30 GMT</ExpirationTime>\
         <DequeueCount>0</DequeueCount>\
         <MessageText>SGVsbG8sIFdvcmxk</MessageText>\
         </QueueMessage></QueueMessagesList>",
        MESSAGE_ID
    )
}

#[allow(dead_code)]
fn get_response() -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?><QueueMessagesList><QueueMessage>\
         <MessageId>{}</MessageId>\
         <InsertionTime>Fri, 09 Oct 2009 21:04:30 GMT</InsertionTime>\
         <ExpirationTime>Fri, 16 Oct 2009 21:04:30 GMT</ExpirationTime>\
         <PopReceipt>{}</PopReceipt>\
         <TimeNextVisible>Fri, 09 Oct 2009 21:05:00 GMT</TimeNextVisible>\
         <DequeueCount>1</DequeueCount>\
         <MessageText>SGVsbG8sIFdvcmxk</MessageText>\
         </QueueMessage></QueueMessagesList>",
        MESSAGE_ID, DEQUEUE_RECEIPT
    )
}

// ============================================================================
// Walkthrough Helpers
// ============================================================================

/// Settings for an unattended run against `connection_string`
pub fn settings_for(connection_string: Option<String>) -> QuickstartSettings {
    QuickstartSettings {
        connection_string,
        pause: false,
        ..QuickstartSettings::default()
    }
}

/// Run the walkthrough against the Azure provider and capture the console
#[allow(dead_code)]
pub async fn run_against_azure(
    settings: &QuickstartSettings,
) -> (Result<RunOutcome, QuickstartError>, String) {
    let connect = |connection_string: &StorageConnectionString| {
        let mut config = AzureStorageConfig::new(connection_string.clone());
        config.message_encoding = settings.encoding;
        config.request_timeout = settings
            .request_timeout()
            .expect("test settings carry a valid timeout");
        AzureStorageProvider::new(config).map_err(AzureError::to_queue_error)
    };

    let mut console = Vec::new();
    let result = run_quickstart(settings, connect, &mut console, &mut NoPause).await;
    (result, String::from_utf8_lossy(&console).into_owned())
}

/// Run the walkthrough against an already built service
#[allow(dead_code)]
pub async fn run_against<S: QueueService>(
    settings: &QuickstartSettings,
    service: S,
) -> (Result<RunOutcome, QuickstartError>, String) {
    let mut console = Vec::new();
    let result = run_quickstart(settings, move |_| Ok(service), &mut console, &mut NoPause).await;
    (result, String::from_utf8_lossy(&console).into_owned())
}
