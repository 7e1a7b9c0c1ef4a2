//! The dispatcher: one explicit handle built at process startup.
//!
//! A [`Dispatcher`] owns the broker connection and the configuration. It
//! hands out [`Publisher`]s to the parts of the application that enqueue work
//! and builds the single [`Subscriber`] that executes it.

use crate::broker::{BrokerFactory, SharedBroker};
use crate::config::DispatchConfig;
use crate::error::{DispatchError, DispatchResult};
use crate::task::TaskId;
use serde::Serialize;

pub mod publisher;
pub mod registry;
pub mod subscriber;

pub use publisher::Publisher;
pub use registry::{ExecutorMap, ExecutorRegistry, RegistryBuilder, SharedExecutor};
pub use subscriber::{Subscriber, SubscriberState, TaskOutcome};

/// Process-wide dispatch handle.
///
/// # Examples
///
/// ```rust
/// use dispatchq::prelude::*;
///
/// #[tokio::main]
/// async fn main() -> DispatchResult<()> {
///     let dispatcher = Dispatcher::connect(DispatchConfig::testing()).await?;
///
///     let subscriber = dispatcher.subscriber(ExecutorMap::new())?;
///     let running = tokio::spawn(subscriber.run());
///
///     dispatcher
///         .enqueue(TaskId::SEND_EMAIL, &serde_json::json!({"To": "user@example.com"}))
///         .await?;
///
///     running.abort();
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Dispatcher {
    config: DispatchConfig,
    broker: SharedBroker,
    publisher: Publisher,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Create a dispatcher over an existing broker.
    pub fn new(config: DispatchConfig, broker: SharedBroker) -> DispatchResult<Self> {
        config
            .validate()
            .map_err(|errors| DispatchError::config(errors.join("; ")))?;

        let publisher = Publisher::new(broker.clone(), config.broker.channel.as_str());
        Ok(Self {
            config,
            broker,
            publisher,
        })
    }

    /// Create a dispatcher, connecting to the broker named in `config`.
    pub async fn connect(config: DispatchConfig) -> DispatchResult<Self> {
        let broker = BrokerFactory::from_config(&config.broker).await?;
        Self::new(config, broker)
    }

    /// Create a dispatcher with a Redis broker and default settings.
    #[cfg(feature = "redis-broker")]
    #[cfg_attr(docsrs, doc(cfg(feature = "redis-broker")))]
    pub async fn with_redis(connection_string: &str) -> DispatchResult<Self> {
        let config = DispatchConfig {
            broker: crate::config::BrokerConfig::redis(connection_string),
            ..DispatchConfig::default()
        };
        Self::connect(config).await
    }

    /// A publisher on the dispatch channel.
    pub fn publisher(&self) -> Publisher {
        self.publisher.clone()
    }

    /// Enqueue `data` for the executor registered under `id`.
    pub async fn enqueue<T>(&self, id: TaskId, data: &T) -> DispatchResult<()>
    where
        T: Serialize + ?Sized,
    {
        self.publisher.enqueue(id, data).await
    }

    /// Build the subscriber, merging `custom` executors with the built-ins.
    /// The email delivery mode is fixed here for the subscriber's lifetime.
    pub fn subscriber(&self, custom: ExecutorMap) -> DispatchResult<Subscriber> {
        let registry = ExecutorRegistry::from_config(&self.config.email, custom)?;
        Ok(self.subscriber_with_registry(registry))
    }

    /// Build the subscriber over a fully assembled registry.
    pub fn subscriber_with_registry(&self, registry: ExecutorRegistry) -> Subscriber {
        Subscriber::new(
            self.broker.clone(),
            self.config.broker.channel.clone(),
            registry,
            self.config.dispatch.clone(),
            self.config.scheduler.clone(),
        )
    }

    /// Probe the broker.
    pub async fn health_check(&self) -> DispatchResult<()> {
        self.broker.ping().await
    }

    /// Get the configuration used by this dispatcher.
    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Shared broker handle.
    pub fn broker(&self) -> SharedBroker {
        self.broker.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InMemoryBroker;
    use std::sync::Arc;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn test_dispatcher_creation() {
        let dispatcher = Dispatcher::connect(DispatchConfig::testing()).await.unwrap();
        assert_ok!(dispatcher.health_check().await);
        assert_eq!(dispatcher.publisher().channel(), "q");
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let mut config = DispatchConfig::testing();
        config.dispatch.max_in_flight = Some(0);

        let err = Dispatcher::new(config, Arc::new(InMemoryBroker::new())).unwrap_err();
        assert!(matches!(err, DispatchError::Config { .. }));
    }

    #[tokio::test]
    async fn test_subscriber_has_builtins() {
        let dispatcher = Dispatcher::connect(DispatchConfig::testing()).await.unwrap();
        let subscriber = dispatcher.subscriber(ExecutorMap::new()).unwrap();

        assert!(subscriber.registry().is_registered(TaskId::SEND_EMAIL));
        assert!(subscriber.registry().is_registered(TaskId::CREATE_INVOICE));
    }

    #[tokio::test]
    async fn test_enqueue_without_subscriber_succeeds() {
        let dispatcher = Dispatcher::connect(DispatchConfig::testing()).await.unwrap();
        dispatcher
            .enqueue(TaskId::new(100), &serde_json::json!({"n": 1}))
            .await
            .unwrap();
    }
}
