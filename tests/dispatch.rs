use dispatchq::broker::{Broker, InMemoryBroker};
use dispatchq::config::{DecodePolicy, SchedulerConfig};
use dispatchq::core::SubscriberState;
use dispatchq::prelude::*;
use serde_json::json;
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(2);

struct Recorder {
    seen: mpsc::UnboundedSender<Envelope>,
}

#[async_trait]
impl TaskExecutor for Recorder {
    async fn execute(&self, envelope: &Envelope) -> DispatchResult<()> {
        let _ = self.seen.send(envelope.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recorder"
    }
}

struct Blocks;

#[async_trait]
impl TaskExecutor for Blocks {
    async fn execute(&self, _envelope: &Envelope) -> DispatchResult<()> {
        std::future::pending::<()>().await;
        Ok(())
    }
}

#[derive(Default)]
struct PeakTracker {
    running: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl TaskExecutor for PeakTracker {
    async fn execute(&self, _envelope: &Envelope) -> DispatchResult<()> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        self.running.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

fn recorder() -> (SharedExecutor, mpsc::UnboundedReceiver<Envelope>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(Recorder { seen: tx }), rx)
}

fn dispatcher(config: DispatchConfig) -> (Arc<InMemoryBroker>, Dispatcher) {
    let broker = Arc::new(InMemoryBroker::new());
    let dispatcher = Dispatcher::new(config, broker.clone()).unwrap();
    (broker, dispatcher)
}

/// Spawn the loop and wait until it has left `Initializing`.
async fn start(subscriber: Subscriber) -> JoinHandle<DispatchResult<()>> {
    let mut state = subscriber.state_watch();
    let running = tokio::spawn(subscriber.run());
    let _ = state
        .wait_for(|s| *s != SubscriberState::Initializing)
        .await;
    running
}

async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting")
        .expect("channel closed")
}

async fn assert_silent<T: std::fmt::Debug>(rx: &mut mpsc::UnboundedReceiver<T>) {
    let extra = timeout(Duration::from_millis(100), rx.recv()).await;
    assert!(extra.is_err(), "unexpected message: {extra:?}");
}

#[tokio::test]
async fn test_registered_executor_runs_exactly_once() {
    let (_broker, dispatcher) = dispatcher(DispatchConfig::testing());
    let (executor, mut seen) = recorder();

    let mut executors = ExecutorMap::new();
    executors.insert(TaskId::new(100), executor);
    let _running = start(dispatcher.subscriber(executors).unwrap()).await;

    let payload = json!({"A": 5, "B": "x", "list": [1, 2, 3]});
    dispatcher.enqueue(TaskId::new(100), &payload).await.unwrap();

    let envelope = next(&mut seen).await;
    assert_eq!(envelope.id, TaskId::new(100));
    assert_eq!(envelope.payload, payload);
    assert_silent(&mut seen).await;
}

#[tokio::test]
async fn test_unregistered_identity_is_ignored() {
    let (_broker, dispatcher) = dispatcher(DispatchConfig::testing());
    let (executor, mut seen) = recorder();
    let (outcomes_tx, mut outcomes) = mpsc::unbounded_channel();

    let mut executors = ExecutorMap::new();
    executors.insert(TaskId::new(100), executor);
    let subscriber = dispatcher
        .subscriber(executors)
        .unwrap()
        .with_outcome_reporter(outcomes_tx);
    let running = start(subscriber).await;

    dispatcher.enqueue(TaskId::new(999), &json!({})).await.unwrap();
    dispatcher.enqueue(TaskId::new(100), &json!({"n": 1})).await.unwrap();

    let outcome: TaskOutcome = next(&mut outcomes).await;
    assert_eq!(outcome.task_id, TaskId::new(100));
    assert!(outcome.is_success());
    assert_eq!(next(&mut seen).await.payload, json!({"n": 1}));
    assert_silent(&mut outcomes).await;
    assert!(!running.is_finished());
}

#[tokio::test]
async fn test_blocked_executor_does_not_stall_dispatch() {
    let (_broker, dispatcher) = dispatcher(DispatchConfig::testing());
    let (executor, mut seen) = recorder();

    let mut executors = ExecutorMap::new();
    executors.insert(TaskId::new(100), executor);
    executors.insert(TaskId::new(101), Arc::new(Blocks) as SharedExecutor);
    let _running = start(dispatcher.subscriber(executors).unwrap()).await;

    for _ in 0..3 {
        dispatcher.enqueue(TaskId::new(101), &json!({})).await.unwrap();
    }
    for n in 0..3 {
        dispatcher.enqueue(TaskId::new(100), &json!({"n": n})).await.unwrap();
    }

    for _ in 0..3 {
        next(&mut seen).await;
    }
}

#[tokio::test]
async fn test_builtin_email_wins_over_caller_executor() {
    let (_broker, dispatcher) = dispatcher(DispatchConfig::testing());
    let (impostor, mut seen) = recorder();
    let (outcomes_tx, mut outcomes) = mpsc::unbounded_channel();

    let mut executors = ExecutorMap::new();
    executors.insert(TaskId::SEND_EMAIL, impostor);
    let subscriber = dispatcher
        .subscriber(executors)
        .unwrap()
        .with_outcome_reporter(outcomes_tx);
    let _running = start(subscriber).await;

    dispatcher
        .enqueue(
            TaskId::SEND_EMAIL,
            &json!({"From": "app@example.com", "To": "user@example.com", "Subject": "Hi", "Body": "<p>Hi</p>"}),
        )
        .await
        .unwrap();

    let outcome = next(&mut outcomes).await;
    assert_eq!(outcome.task_id, TaskId::SEND_EMAIL);
    assert!(outcome.is_success());
    assert_silent(&mut seen).await;
}

#[tokio::test]
async fn test_executor_failure_is_reported_not_propagated() {
    let (_broker, dispatcher) = dispatcher(DispatchConfig::testing());
    let (outcomes_tx, mut outcomes) = mpsc::unbounded_channel();

    let subscriber = dispatcher
        .subscriber(ExecutorMap::new())
        .unwrap()
        .with_outcome_reporter(outcomes_tx);
    let running = start(subscriber).await;

    // A float where the billing record expects minor units.
    dispatcher
        .enqueue(TaskId::CREATE_INVOICE, &json!({"Amount": 12.5}))
        .await
        .unwrap();

    let outcome = next(&mut outcomes).await;
    assert!(outcome.result.unwrap_err().contains("Amount"));
    assert!(!running.is_finished());
}

#[tokio::test]
async fn test_undecodable_message_is_fatal_by_default() {
    let (broker, dispatcher) = dispatcher(DispatchConfig::testing());
    let running = start(dispatcher.subscriber(ExecutorMap::new()).unwrap()).await;

    broker.publish("q", b"{not json".to_vec()).await.unwrap();

    let result = timeout(WAIT, running).await.unwrap().unwrap();
    assert!(matches!(result, Err(DispatchError::Decode(_))));
}

#[tokio::test]
async fn test_undecodable_message_can_be_skipped() {
    let mut config = DispatchConfig::testing();
    config.dispatch.on_decode_error = DecodePolicy::Skip;
    let (broker, dispatcher) = dispatcher(config);
    let (executor, mut seen) = recorder();

    let mut executors = ExecutorMap::new();
    executors.insert(TaskId::new(100), executor);
    let running = start(dispatcher.subscriber(executors).unwrap()).await;

    broker.publish("q", b"{not json".to_vec()).await.unwrap();
    dispatcher.enqueue(TaskId::new(100), &json!(null)).await.unwrap();

    assert_eq!(next(&mut seen).await.id, TaskId::new(100));
    assert!(!running.is_finished());
}

#[tokio::test]
async fn test_closed_subscription_ends_the_loop() {
    let (broker, dispatcher) = dispatcher(DispatchConfig::testing());
    let running = start(dispatcher.subscriber(ExecutorMap::new()).unwrap()).await;

    broker.close().await;

    let result = timeout(WAIT, running).await.unwrap().unwrap();
    assert!(matches!(result, Err(DispatchError::SubscriptionClosed)));
}

#[tokio::test]
async fn test_task_timeout_is_reported() {
    let mut config = DispatchConfig::testing();
    config.dispatch.task_timeout_ms = Some(50);
    let (_broker, dispatcher) = dispatcher(config);
    let (outcomes_tx, mut outcomes) = mpsc::unbounded_channel();

    let mut executors = ExecutorMap::new();
    executors.insert(TaskId::new(101), Arc::new(Blocks) as SharedExecutor);
    let subscriber = dispatcher
        .subscriber(executors)
        .unwrap()
        .with_outcome_reporter(outcomes_tx);
    let _running = start(subscriber).await;

    dispatcher.enqueue(TaskId::new(101), &json!({})).await.unwrap();

    let outcome = next(&mut outcomes).await;
    assert!(outcome.result.unwrap_err().contains("timed out"));
    assert!(outcome.elapsed >= Duration::from_millis(50));
}

#[tokio::test]
async fn test_max_in_flight_bounds_concurrency() {
    let mut config = DispatchConfig::testing();
    config.dispatch.max_in_flight = Some(1);
    let (_broker, dispatcher) = dispatcher(config);
    let tracker = Arc::new(PeakTracker::default());
    let (outcomes_tx, mut outcomes) = mpsc::unbounded_channel();

    let mut executors = ExecutorMap::new();
    executors.insert(TaskId::new(100), tracker.clone() as SharedExecutor);
    let subscriber = dispatcher
        .subscriber(executors)
        .unwrap()
        .with_outcome_reporter(outcomes_tx);
    let _running = start(subscriber).await;

    for _ in 0..4 {
        dispatcher.enqueue(TaskId::new(100), &json!({})).await.unwrap();
    }
    for _ in 0..4 {
        assert!(next(&mut outcomes).await.is_success());
    }

    assert_eq!(tracker.peak.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_missing_cron_source_is_not_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = DispatchConfig {
        scheduler: SchedulerConfig::default().with_source(dir.path().join("tasks.cron")),
        ..DispatchConfig::testing()
    };
    let (_broker, dispatcher) = dispatcher(config);
    let (executor, mut seen) = recorder();

    let mut executors = ExecutorMap::new();
    executors.insert(TaskId::new(100), executor);
    let running = start(dispatcher.subscriber(executors).unwrap()).await;

    dispatcher.enqueue(TaskId::new(100), &json!({})).await.unwrap();
    next(&mut seen).await;
    assert!(!running.is_finished());
}

#[tokio::test]
async fn test_unreadable_cron_source_is_not_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = DispatchConfig {
        scheduler: SchedulerConfig::default().with_source(dir.path()),
        ..DispatchConfig::testing()
    };
    let (_broker, dispatcher) = dispatcher(config);
    let (executor, mut seen) = recorder();

    let mut executors = ExecutorMap::new();
    executors.insert(TaskId::new(100), executor);
    let running = start(dispatcher.subscriber(executors).unwrap()).await;

    dispatcher.enqueue(TaskId::new(100), &json!({})).await.unwrap();
    next(&mut seen).await;
    assert!(!running.is_finished());
}

#[tokio::test]
async fn test_malformed_cron_source_is_fatal() {
    let mut source = tempfile::NamedTempFile::new().unwrap();
    writeln!(source, "*/5 * * * * http://localhost/ok").unwrap();
    writeln!(source, "whenever http://localhost/bad").unwrap();

    let config = DispatchConfig {
        scheduler: SchedulerConfig::default().with_source(source.path()),
        ..DispatchConfig::testing()
    };
    let (_broker, dispatcher) = dispatcher(config);
    let running = start(dispatcher.subscriber(ExecutorMap::new()).unwrap()).await;

    let result = timeout(WAIT, running).await.unwrap().unwrap();
    assert!(matches!(result, Err(DispatchError::ScheduleParse { .. })));
}
