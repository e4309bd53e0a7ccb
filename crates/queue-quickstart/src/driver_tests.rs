//! Tests for the quickstart driver.

use super::*;
use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use std::io::Cursor;
use std::sync::Arc;
use storage_queue_runtime::{
    EnqueuedMessage, InMemoryConfig, InMemoryProvider, ManualClock, MessageId, PeekedMessage,
    PopReceipt, ProviderType, QueueOperation, ReceivedMessage,
};

fn settings() -> QuickstartSettings {
    QuickstartSettings {
        connection_string: Some("UseDevelopmentStorage=true".to_string()),
        pause: false,
        ..QuickstartSettings::default()
    }
}

fn fixed_clock_provider() -> InMemoryProvider {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
    ));
    InMemoryProvider::with_clock(InMemoryConfig::default(), clock)
}

/// Run the driver against `service` without pauses and capture the console
async fn run_with<S: QueueService>(
    settings: &QuickstartSettings,
    service: S,
) -> (Result<RunOutcome, QuickstartError>, String) {
    let mut console = Vec::new();
    let result = run_quickstart(settings, move |_| Ok(service), &mut console, &mut NoPause).await;
    (result, String::from_utf8(console).unwrap())
}

fn outcome_queue_name(outcome: &RunOutcome) -> &QueueName {
    match outcome {
        RunOutcome::Completed { queue_name } => queue_name,
        RunOutcome::Failed {
            queue_name: Some(queue_name),
            ..
        } => queue_name,
        other => panic!("Expected a run with a queue, got {:?}", other),
    }
}

// ============================================================================
// Configuration Tests
// ============================================================================

mod configuration {
    use super::*;

    fn never_connect(_: &StorageConnectionString) -> Result<InMemoryProvider, QueueError> {
        panic!("connect must not be called without a connection string")
    }

    #[tokio::test]
    async fn test_missing_connection_string_makes_no_calls() {
        let settings = QuickstartSettings {
            connection_string: None,
            ..settings()
        };
        let mut console = Vec::new();

        let outcome = run_quickstart(&settings, never_connect, &mut console, &mut NoPause)
            .await
            .unwrap();

        assert!(matches!(outcome, RunOutcome::ConfigurationMissing));
        let output = String::from_utf8(console).unwrap();
        assert_eq!(output.trim_end(), CONFIGURATION_MISSING_MESSAGE);
    }

    #[tokio::test]
    async fn test_malformed_connection_string_makes_no_calls() {
        for raw in ["", "   ", "not a connection string", "AccountName=only"] {
            let settings = QuickstartSettings {
                connection_string: Some(raw.to_string()),
                ..settings()
            };
            let mut console = Vec::new();

            let outcome = run_quickstart(&settings, never_connect, &mut console, &mut NoPause)
                .await
                .unwrap();

            assert!(
                matches!(outcome, RunOutcome::ConfigurationMissing),
                "'{}' should be treated as missing",
                raw
            );
        }
    }

    #[tokio::test]
    async fn test_connect_failure_skips_teardown() {
        let mut console = Vec::new();

        let outcome = run_quickstart(
            &settings(),
            |_| -> Result<InMemoryProvider, QueueError> {
                Err(QueueError::ConnectionFailed {
                    message: "no route to host".to_string(),
                })
            },
            &mut console,
            &mut NoPause,
        )
        .await
        .unwrap();

        assert!(matches!(
            outcome,
            RunOutcome::Failed {
                queue_name: None,
                error: QueueError::ConnectionFailed { .. }
            }
        ));
        let output = String::from_utf8(console).unwrap();
        assert!(output.contains("Error returned from Azure Storage: "));
        assert!(!output.contains("Deleting the queue"));
    }
}

// ============================================================================
// Success Path Tests
// ============================================================================

mod success_path {
    use super::*;

    #[tokio::test]
    async fn test_full_run_completes_and_cleans_up() {
        let provider = InMemoryProvider::default();

        let (result, output) = run_with(&settings(), provider.clone()).await;
        let outcome = result.unwrap();

        assert!(outcome.is_completed());
        let queue_name = outcome_queue_name(&outcome);
        assert!(queue_name.as_str().starts_with("quickstartqueues-"));
        assert!(!provider.queue_exists(queue_name));

        let counts = provider.operation_counts();
        assert_eq!(counts.create_queue, 1);
        assert_eq!(counts.send_message, 1);
        assert_eq!(counts.peek_message, 1);
        assert_eq!(counts.receive_message, 1);
        assert_eq!(counts.delete_message, 1);
        assert_eq!(counts.delete_queue, 1);

        assert!(output.contains(&format!("Created queue '{}'", queue_name)));
        assert!(output.contains("Processed and deleted message '"));
        assert!(output.contains("Deleting the queue and any messages it contains..."));
    }

    #[tokio::test]
    async fn test_narration_follows_step_order() {
        let (result, output) = run_with(&settings(), InMemoryProvider::default()).await;
        result.unwrap();

        let markers = [
            "Created queue '",
            "Added message '",
            "Message insertion time: ",
            "Message expiration time: ",
            "Contents of peeked message '",
            "becomes visible again at ",
            "Processed and deleted message '",
            "Deleting the queue and any messages it contains...",
        ];
        let positions = markers
            .iter()
            .map(|marker| output.find(marker).unwrap_or_else(|| panic!("missing '{}'", marker)))
            .collect::<Vec<_>>();

        assert!(positions.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[tokio::test]
    async fn test_peek_reports_the_sent_body() {
        let (result, output) = run_with(&settings(), InMemoryProvider::default()).await;
        result.unwrap();

        let peek_line = output
            .lines()
            .find(|line| line.starts_with("Contents of peeked message"))
            .unwrap();
        assert!(peek_line.ends_with(": Hello, World"));
    }

    #[tokio::test]
    async fn test_custom_message_body_is_sent() {
        let settings = QuickstartSettings {
            message: "Custom body".to_string(),
            ..settings()
        };

        let (result, output) = run_with(&settings, InMemoryProvider::default()).await;
        result.unwrap();

        assert!(output.contains(": Custom body"));
    }

    #[tokio::test]
    async fn test_each_run_uses_a_new_queue_name() {
        let provider = InMemoryProvider::default();

        let (first, _) = run_with(&settings(), provider.clone()).await;
        let (second, _) = run_with(&settings(), provider.clone()).await;
        let first = first.unwrap();
        let second = second.unwrap();

        let first_name = outcome_queue_name(&first);
        let second_name = outcome_queue_name(&second);
        assert_ne!(first_name, second_name);
        assert!(first_name.as_str().starts_with("quickstartqueues-"));
        assert!(second_name.as_str().starts_with("quickstartqueues-"));
    }

    #[tokio::test]
    async fn test_fixed_clock_gives_seven_day_expiration() {
        let (result, output) = run_with(&settings(), fixed_clock_provider()).await;
        result.unwrap();

        assert!(output.contains("Message insertion time: 2024-01-01 00:00:00 UTC"));
        assert!(output.contains("Message expiration time: 2024-01-08 00:00:00 UTC"));
        assert!(output.contains("becomes visible again at 2024-01-01 00:00:30 UTC"));
    }

    #[tokio::test]
    async fn test_infinite_ttl_is_reported_as_never() {
        let settings = QuickstartSettings {
            message_ttl_secs: -1,
            ..settings()
        };

        let (result, output) = run_with(&settings, fixed_clock_provider()).await;
        result.unwrap();

        assert!(output.contains("Message expiration time: never"));
    }
}

// ============================================================================
// Failure Path Tests
// ============================================================================

mod failure_path {
    use super::*;

    fn injected() -> QueueError {
        QueueError::ProviderError {
            provider: "InMemory".to_string(),
            code: "InternalError".to_string(),
            message: "injected failure".to_string(),
        }
    }

    #[tokio::test]
    async fn test_teardown_runs_once_for_every_failing_step() {
        let steps = [
            QueueOperation::CreateQueue,
            QueueOperation::SendMessage,
            QueueOperation::PeekMessage,
            QueueOperation::ReceiveMessage,
            QueueOperation::DeleteMessage,
        ];

        for step in steps {
            let provider = InMemoryProvider::default();
            provider.fail_next(step, injected());

            let (result, output) = run_with(&settings(), provider.clone()).await;
            let outcome = result.unwrap();

            assert!(
                matches!(
                    outcome,
                    RunOutcome::Failed {
                        queue_name: Some(_),
                        error: QueueError::ProviderError { .. }
                    }
                ),
                "{} failure should end the run as failed",
                step
            );
            assert_eq!(
                provider.operation_counts().delete_queue,
                1,
                "{} failure should still tear down once",
                step
            );
            assert!(provider.queue_names().is_empty());
            assert!(output.contains("Error returned from Azure Storage: "));
            assert!(output.contains("Deleting the queue and any messages it contains..."));
        }
    }

    #[tokio::test]
    async fn test_failure_skips_remaining_steps() {
        let provider = InMemoryProvider::default();
        provider.fail_next(QueueOperation::SendMessage, injected());

        let (result, output) = run_with(&settings(), provider.clone()).await;
        result.unwrap();

        let counts = provider.operation_counts();
        assert_eq!(counts.create_queue, 1);
        assert_eq!(counts.send_message, 1);
        assert_eq!(counts.peek_message, 0);
        assert_eq!(counts.receive_message, 0);
        assert_eq!(counts.delete_message, 0);
        assert!(!output.contains("Contents of peeked message"));
    }

    /// Log sink shared between a test subscriber and the assertions
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<std::sync::Mutex<Vec<u8>>>);

    impl CapturedLogs {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CapturedLogs {
        type Writer = Self;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[tokio::test]
    async fn test_step_failure_logs_transience() {
        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let provider = InMemoryProvider::default();
        provider.fail_next(
            QueueOperation::SendMessage,
            QueueError::ConnectionFailed {
                message: "connection reset".to_string(),
            },
        );
        provider.fail_next(
            QueueOperation::DeleteQueue,
            QueueError::AuthenticationFailed {
                message: "key rotated".to_string(),
            },
        );

        let (result, _) = run_with(&settings(), provider).await;
        assert!(matches!(result, Err(QuickstartError::Teardown { .. })));

        let output = logs.contents();
        let step_line = output
            .lines()
            .find(|line| line.contains("Quickstart step failed"))
            .expect("step failure is logged");
        assert!(step_line.contains("transient=true"), "{}", step_line);
        let teardown_line = output
            .lines()
            .find(|line| line.contains("Queue teardown failed"))
            .expect("teardown failure is logged");
        assert!(teardown_line.contains("transient=false"), "{}", teardown_line);
    }

    #[tokio::test]
    async fn test_unrepresentable_ttl_fails_before_queue_creation() {
        let provider = InMemoryProvider::default();
        let settings = QuickstartSettings {
            message_ttl_secs: 100_000_000_000_000_000,
            ..settings()
        };

        let (result, _) = run_with(&settings, provider.clone()).await;

        match result {
            Err(QuickstartError::InvalidSetting { key, .. }) => {
                assert_eq!(key, "message_ttl_secs")
            }
            other => panic!("Expected InvalidSetting, got {:?}", other),
        }
        assert_eq!(provider.operation_counts().total(), 0);
        assert!(provider.queue_names().is_empty());
    }

    #[tokio::test]
    async fn test_ttl_past_the_calendar_still_tears_down() {
        let provider = InMemoryProvider::default();
        let settings = QuickstartSettings {
            message_ttl_secs: i64::MAX / 1000,
            ..settings()
        };

        let (result, _) = run_with(&settings, provider.clone()).await;

        assert!(matches!(
            result.unwrap(),
            RunOutcome::Failed {
                error: QueueError::ValidationError(_),
                ..
            }
        ));
        assert_eq!(provider.operation_counts().delete_queue, 1);
        assert!(provider.queue_names().is_empty());
    }

    #[tokio::test]
    async fn test_teardown_failure_is_a_local_error() {
        let provider = InMemoryProvider::default();
        provider.fail_next(QueueOperation::DeleteQueue, injected());

        let (result, output) = run_with(&settings(), provider.clone()).await;

        match result {
            Err(QuickstartError::Teardown { queue_name, .. }) => {
                assert!(queue_name.starts_with("quickstartqueues-"))
            }
            other => panic!("Expected Teardown error, got {:?}", other),
        }
        assert_eq!(provider.operation_counts().delete_queue, 1);
        assert!(output.contains("Processed and deleted message '"));
    }

    #[tokio::test]
    async fn test_empty_peek_is_reported_as_failure() {
        let provider = InMemoryProvider::default();

        let (result, output) = run_with(&settings(), EmptyPeek(provider.clone())).await;
        let outcome = result.unwrap();

        assert!(matches!(
            outcome,
            RunOutcome::Failed {
                error: QueueError::MessageNotFound { .. },
                ..
            }
        ));
        assert_eq!(provider.operation_counts().receive_message, 0);
        assert_eq!(provider.operation_counts().delete_queue, 1);
        assert!(output.contains("Error returned from Azure Storage: Message not found"));
    }

    #[tokio::test]
    async fn test_wrong_pop_receipt_is_rejected() {
        let provider = InMemoryProvider::default();

        let (result, output) = run_with(&settings(), StaleReceipts(provider.clone())).await;
        let outcome = result.unwrap();

        assert!(matches!(
            outcome,
            RunOutcome::Failed {
                error: QueueError::MessageNotFound { .. },
                ..
            }
        ));
        assert!(!output.contains("Processed and deleted message"));
        assert_eq!(provider.operation_counts().delete_queue, 1);
    }

    /// Service that always finds the queue empty on peek
    struct EmptyPeek(InMemoryProvider);

    /// Service that hands out receipts the store never issued
    struct StaleReceipts(InMemoryProvider);

    #[async_trait]
    impl QueueService for EmptyPeek {
        async fn create_queue(&self, queue: &QueueName) -> Result<(), QueueError> {
            self.0.create_queue(queue).await
        }

        async fn delete_queue_if_exists(&self, queue: &QueueName) -> Result<bool, QueueError> {
            self.0.delete_queue_if_exists(queue).await
        }

        async fn send_message(
            &self,
            queue: &QueueName,
            message: &Message,
        ) -> Result<EnqueuedMessage, QueueError> {
            self.0.send_message(queue, message).await
        }

        async fn peek_message(
            &self,
            _queue: &QueueName,
        ) -> Result<Option<PeekedMessage>, QueueError> {
            Ok(None)
        }

        async fn receive_message(
            &self,
            queue: &QueueName,
            visibility_timeout: Option<Duration>,
        ) -> Result<Option<ReceivedMessage>, QueueError> {
            self.0.receive_message(queue, visibility_timeout).await
        }

        async fn delete_message(
            &self,
            queue: &QueueName,
            message_id: &MessageId,
            pop_receipt: &PopReceipt,
        ) -> Result<(), QueueError> {
            self.0.delete_message(queue, message_id, pop_receipt).await
        }

        fn provider_type(&self) -> ProviderType {
            ProviderType::InMemory
        }
    }

    #[async_trait]
    impl QueueService for StaleReceipts {
        async fn create_queue(&self, queue: &QueueName) -> Result<(), QueueError> {
            self.0.create_queue(queue).await
        }

        async fn delete_queue_if_exists(&self, queue: &QueueName) -> Result<bool, QueueError> {
            self.0.delete_queue_if_exists(queue).await
        }

        async fn send_message(
            &self,
            queue: &QueueName,
            message: &Message,
        ) -> Result<EnqueuedMessage, QueueError> {
            self.0.send_message(queue, message).await
        }

        async fn peek_message(
            &self,
            queue: &QueueName,
        ) -> Result<Option<PeekedMessage>, QueueError> {
            self.0.peek_message(queue).await
        }

        async fn receive_message(
            &self,
            queue: &QueueName,
            visibility_timeout: Option<Duration>,
        ) -> Result<Option<ReceivedMessage>, QueueError> {
            let received = self.0.receive_message(queue, visibility_timeout).await?;
            Ok(received.map(|message| ReceivedMessage {
                pop_receipt: PopReceipt::generate(),
                ..message
            }))
        }

        async fn delete_message(
            &self,
            queue: &QueueName,
            message_id: &MessageId,
            pop_receipt: &PopReceipt,
        ) -> Result<(), QueueError> {
            self.0.delete_message(queue, message_id, pop_receipt).await
        }

        fn provider_type(&self) -> ProviderType {
            ProviderType::InMemory
        }
    }
}

// ============================================================================
// Pacing and Lease Tests
// ============================================================================

mod pacing {
    use super::*;

    #[test]
    fn test_stdin_pacer_prompts_and_waits_for_a_line() {
        let mut pacer = StdinPacer::from_reader(Cursor::new(b"\n".to_vec()));
        let mut console = Vec::new();

        pacer.pause(&mut console, TEARDOWN_PROMPT).unwrap();

        assert_eq!(
            String::from_utf8(console).unwrap(),
            format!("{}\n", TEARDOWN_PROMPT)
        );
    }

    #[test]
    fn test_stdin_pacer_accepts_end_of_input() {
        let mut pacer = StdinPacer::from_reader(Cursor::new(Vec::new()));
        let mut console = Vec::new();

        assert!(pacer.pause(&mut console, TEARDOWN_PROMPT).is_ok());
    }

    #[tokio::test]
    async fn test_teardown_prompt_precedes_deletion() {
        let provider = InMemoryProvider::default();
        let service = provider.clone();
        let mut pacer = StdinPacer::from_reader(Cursor::new(b"\n".to_vec()));
        let mut console = Vec::new();

        run_quickstart(&settings(), move |_| Ok(service), &mut console, &mut pacer)
            .await
            .unwrap();

        let output = String::from_utf8(console).unwrap();
        let prompt = output.find(TEARDOWN_PROMPT).unwrap();
        let deleting = output.find("Deleting the queue").unwrap();
        assert!(prompt < deleting);
    }
}

mod lease {
    use super::*;

    #[tokio::test]
    async fn test_release_reports_whether_queue_existed() {
        let provider = InMemoryProvider::default();
        let name = QueueName::with_unique_suffix("lease").unwrap();
        provider.create_queue(&name).await.unwrap();

        let lease = QueueLease::new(&provider, name.clone());
        assert_eq!(lease.name(), &name);
        assert!(lease.release().await.unwrap());

        let lease = QueueLease::new(&provider, name.clone());
        assert!(!lease.release().await.unwrap());
        assert_eq!(provider.operation_counts().delete_queue, 2);
    }

    #[tokio::test]
    async fn test_dropping_unreleased_lease_does_not_delete() {
        let provider = InMemoryProvider::default();
        let name = QueueName::with_unique_suffix("lease").unwrap();
        provider.create_queue(&name).await.unwrap();

        drop(QueueLease::new(&provider, name.clone()));

        assert!(provider.queue_exists(&name));
        assert_eq!(provider.operation_counts().delete_queue, 0);
    }
}
