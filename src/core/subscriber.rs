//! The dispatch loop.
//!
//! A [`Subscriber`] probes the broker, subscribes to the dispatch channel,
//! starts the cron scheduler and then receives envelopes until the broker
//! closes the subscription. Every resolved envelope is executed on its own
//! tokio task, so a slow executor never holds up the receive loop or other
//! executions. Execution errors are logged and never reach the publisher.
//!
//! Conditions that make the subscriber useless (unreachable broker, malformed
//! cron source, closed subscription and, under [`DecodePolicy::Fatal`], an
//! undecodable message) end [`Subscriber::run`] with an error.

use super::registry::{ExecutorRegistry, SharedExecutor};
use crate::broker::SharedBroker;
use crate::config::{DecodePolicy, DispatchSettings, SchedulerConfig};
use crate::cron::{self as schedule, CronScheduler, SchedulerHandle};
use crate::error::{DispatchError, DispatchResult};
use crate::task::{Envelope, TaskId};
use futures::StreamExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc, watch};
use tokio::time::timeout;
use tracing::Instrument;
use uuid::Uuid;

/// Lifecycle of a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberState {
    /// Probing the broker and subscribing
    Initializing,
    /// Receiving and dispatching envelopes
    Subscribed,
    /// The loop has returned
    Terminated,
}

/// Result of one execution, for hosts that opted into outcome reporting.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    /// Identifier of this execution, also present in its log span
    pub run_id: Uuid,
    /// Identity of the executed envelope
    pub task_id: TaskId,
    /// `Err` carries the rendered executor error
    pub result: Result<(), String>,
    /// Wall time spent in the executor
    pub elapsed: Duration,
}

impl TaskOutcome {
    /// Whether the executor returned `Ok`.
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Long-lived receive loop bound to one channel.
pub struct Subscriber {
    broker: SharedBroker,
    channel: String,
    registry: Arc<ExecutorRegistry>,
    settings: DispatchSettings,
    scheduler: SchedulerConfig,
    outcomes: Option<mpsc::UnboundedSender<TaskOutcome>>,
    state: watch::Sender<SubscriberState>,
}

impl Subscriber {
    /// Subscriber on `channel`, dispatching to `registry`. Nothing happens
    /// until [`run`](Self::run).
    pub fn new(
        broker: SharedBroker,
        channel: impl Into<String>,
        registry: ExecutorRegistry,
        settings: DispatchSettings,
        scheduler: SchedulerConfig,
    ) -> Self {
        let (state, _) = watch::channel(SubscriberState::Initializing);
        Self {
            broker,
            channel: channel.into(),
            registry: Arc::new(registry),
            settings,
            scheduler,
            outcomes: None,
            state,
        }
    }

    /// Report every finished execution on `outcomes`. Publishers are not
    /// involved.
    pub fn with_outcome_reporter(mut self, outcomes: mpsc::UnboundedSender<TaskOutcome>) -> Self {
        self.outcomes = Some(outcomes);
        self
    }

    /// Watch the lifecycle state.
    pub fn state_watch(&self) -> watch::Receiver<SubscriberState> {
        self.state.subscribe()
    }

    /// Executors this subscriber dispatches to.
    pub fn registry(&self) -> &ExecutorRegistry {
        &self.registry
    }

    /// Run the dispatch loop. Only returns with an error: either startup
    /// failed or the loop hit a fatal condition.
    pub async fn run(self) -> DispatchResult<()> {
        let result = self.dispatch().await;

        if let Err(e) = &result {
            tracing::error!(error = %e, channel = %self.channel, "Subscriber terminated");
        }
        self.state.send_replace(SubscriberState::Terminated);
        result
    }

    async fn dispatch(&self) -> DispatchResult<()> {
        self.broker
            .ping()
            .await
            .map_err(|e| DispatchError::BrokerUnavailable {
                message: e.to_string(),
            })?;

        let mut messages = self.broker.subscribe(&self.channel).await?;
        self.state.send_replace(SubscriberState::Subscribed);
        tracing::info!(
            channel = %self.channel,
            executors = self.registry.len(),
            "Subscriber listening"
        );

        // Stops the timers when the loop returns.
        let _scheduler = self.start_scheduler().await?;

        let limiter = self
            .settings
            .max_in_flight
            .map(|limit| Arc::new(Semaphore::new(limit)));
        let deadline = self.settings.task_timeout();

        while let Some(message) = messages.next().await {
            let envelope = match Envelope::decode(&message) {
                Ok(envelope) => envelope,
                Err(e) => match self.settings.on_decode_error {
                    DecodePolicy::Fatal => return Err(e),
                    DecodePolicy::Skip => {
                        tracing::warn!(error = %e, bytes = message.len(), "Skipping undecodable message");
                        continue;
                    }
                },
            };

            let Some(executor) = self.registry.resolve(envelope.id) else {
                tracing::debug!(task_id = %envelope.id, "No executor registered, ignoring");
                continue;
            };

            let permit = match &limiter {
                Some(limiter) => limiter.clone().acquire_owned().await.ok(),
                None => None,
            };

            tokio::spawn(execute(
                executor,
                envelope,
                deadline,
                self.outcomes.clone(),
                permit,
            ));
        }

        Err(DispatchError::SubscriptionClosed)
    }

    async fn start_scheduler(&self) -> DispatchResult<Option<SchedulerHandle>> {
        if !self.scheduler.enabled {
            return Ok(None);
        }

        let Some(entries) = schedule::load(&self.scheduler.source_path).await? else {
            tracing::info!(
                path = %self.scheduler.source_path.display(),
                "No cron source, scheduler not started"
            );
            return Ok(None);
        };

        let scheduler = CronScheduler::new(entries, &self.scheduler)?;
        Ok(Some(scheduler.start()))
    }
}

async fn execute(
    executor: SharedExecutor,
    envelope: Envelope,
    deadline: Option<Duration>,
    outcomes: Option<mpsc::UnboundedSender<TaskOutcome>>,
    _permit: Option<OwnedSemaphorePermit>,
) {
    let run_id = Uuid::new_v4();
    let task_id = envelope.id;
    let span = tracing::info_span!(
        "task",
        %run_id,
        %task_id,
        executor = executor.name()
    );

    async move {
        let started = Instant::now();
        let result = run_executor(executor, envelope, deadline).await;
        let elapsed = started.elapsed();

        match &result {
            Ok(()) => tracing::debug!(?elapsed, "Task executed successfully"),
            Err(e) => tracing::error!(error = %e, ?elapsed, "Task failed"),
        }

        if let Some(outcomes) = outcomes {
            let _ = outcomes.send(TaskOutcome {
                run_id,
                task_id,
                result: result.map_err(|e| e.to_string()),
                elapsed,
            });
        }
    }
    .instrument(span)
    .await
}

async fn run_executor(
    executor: SharedExecutor,
    envelope: Envelope,
    deadline: Option<Duration>,
) -> DispatchResult<()> {
    let handle = tokio::spawn(async move { executor.execute(&envelope).await }.in_current_span());
    let abort = handle.abort_handle();

    let joined = match deadline {
        Some(limit) => match timeout(limit, handle).await {
            Ok(joined) => joined,
            Err(_) => {
                abort.abort();
                return Err(DispatchError::Timeout {
                    timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                });
            }
        },
        None => handle.await,
    };

    match joined {
        Ok(result) => result,
        Err(join_error) => Err(DispatchError::task_execution(
            "Executor panicked",
            join_error,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InMemoryBroker;
    use crate::core::registry::ExecutorMap;
    use crate::task::TaskExecutor;
    use async_trait::async_trait;
    use serde_json::json;

    struct Panics;

    #[async_trait]
    impl TaskExecutor for Panics {
        async fn execute(&self, _envelope: &Envelope) -> DispatchResult<()> {
            panic!("executor bug");
        }
    }

    struct Sleeps(Duration);

    #[async_trait]
    impl TaskExecutor for Sleeps {
        async fn execute(&self, _envelope: &Envelope) -> DispatchResult<()> {
            tokio::time::sleep(self.0).await;
            Ok(())
        }
    }

    fn envelope() -> Envelope {
        Envelope::new(TaskId::new(100), json!({}))
    }

    #[tokio::test]
    async fn test_panic_becomes_execution_error() {
        let result = run_executor(Arc::new(Panics), envelope(), None).await;
        assert!(matches!(result, Err(DispatchError::TaskExecutionFailed { .. })));
    }

    #[tokio::test]
    async fn test_deadline_produces_timeout() {
        let result = run_executor(
            Arc::new(Sleeps(Duration::from_secs(5))),
            envelope(),
            Some(Duration::from_millis(20)),
        )
        .await;
        assert!(matches!(result, Err(DispatchError::Timeout { timeout_ms: 20 })));

        let result = run_executor(
            Arc::new(Sleeps(Duration::from_millis(1))),
            envelope(),
            Some(Duration::from_secs(5)),
        )
        .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_outcome_is_reported() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        execute(Arc::new(Panics), envelope(), None, Some(tx), None).await;

        let outcome = rx.recv().await.unwrap();
        assert_eq!(outcome.task_id, TaskId::new(100));
        assert!(!outcome.is_success());
        assert!(outcome.result.unwrap_err().contains("panicked"));
    }

    #[tokio::test]
    async fn test_unreachable_broker_fails_startup() {
        let broker = Arc::new(InMemoryBroker::new());
        broker.close().await;

        let subscriber = Subscriber::new(
            broker,
            "q",
            ExecutorRegistry::builder().extend(ExecutorMap::new()).build(),
            DispatchSettings::default(),
            SchedulerConfig::disabled(),
        );
        let state = subscriber.state_watch();

        let err = subscriber.run().await.unwrap_err();
        assert!(matches!(err, DispatchError::BrokerUnavailable { .. }));
        assert_eq!(*state.borrow(), SubscriberState::Terminated);
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let broker = Arc::new(InMemoryBroker::new());
        let subscriber = Subscriber::new(
            broker.clone(),
            "q",
            ExecutorRegistry::default(),
            DispatchSettings::default(),
            SchedulerConfig::disabled(),
        );
        let mut state = subscriber.state_watch();
        assert_eq!(*state.borrow(), SubscriberState::Initializing);

        let running = tokio::spawn(subscriber.run());
        state
            .wait_for(|s| *s == SubscriberState::Subscribed)
            .await
            .unwrap();

        broker.close().await;
        let err = running.await.unwrap().unwrap_err();
        assert!(matches!(err, DispatchError::SubscriptionClosed));
        assert_eq!(*state.borrow(), SubscriberState::Terminated);
    }
}
