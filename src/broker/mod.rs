//! Publish/subscribe transports for dispatchq envelopes.
//!
//! A broker fans every published message out to the subscribers of a named
//! channel. dispatchq uses exactly one channel; there is no acknowledgment,
//! redelivery or consumer-group partitioning. Whether two live subscribers
//! both receive a message is decided by the broker (both backends here
//! broadcast), so deployments run a single subscriber.
//!
//! - **In-Memory**: tokio broadcast channels, for tests and single-process use
//! - **Redis**: `PUBLISH`/`SUBSCRIBE`, for multi-process deployments
//!
//! # Examples
//!
//! ```rust,no_run
//! use dispatchq::broker::{BrokerFactory, InMemoryBroker};
//!
//! // In-memory broker (default)
//! let broker = BrokerFactory::in_memory();
//!
//! // Redis broker (requires redis-broker feature)
//! # #[cfg(feature = "redis-broker")]
//! # async fn redis() -> dispatchq::DispatchResult<()> {
//! let broker = BrokerFactory::redis("redis://localhost:6379", std::time::Duration::from_secs(5)).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::{BrokerBackendConfig, BrokerConfig, DurationExt};
use crate::error::DispatchResult;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;

pub mod memory;
pub use memory::InMemoryBroker;

#[cfg(feature = "redis-broker")]
#[cfg_attr(docsrs, doc(cfg(feature = "redis-broker")))]
pub mod redis;

#[cfg(feature = "redis-broker")]
#[cfg_attr(docsrs, doc(cfg(feature = "redis-broker")))]
pub use redis::RedisBroker;

/// Stream of raw messages received on a channel. Ends when the broker closes
/// the subscription.
pub type Subscription = BoxStream<'static, Vec<u8>>;

/// Trait that all broker backends must implement.
///
/// Implementations must be safe to share between many concurrent publishers
/// and one subscriber.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Broadcast `message` on `channel`. Returns once the broker has accepted
    /// the message; delivery is not confirmed.
    async fn publish(&self, channel: &str, message: Vec<u8>) -> DispatchResult<()>;

    /// Subscribe to `channel`.
    async fn subscribe(&self, channel: &str) -> DispatchResult<Subscription>;

    /// Connectivity probe.
    async fn ping(&self) -> DispatchResult<()>;
}

/// Convenient type alias for a shared broker handle
pub type SharedBroker = Arc<dyn Broker>;

/// Factory methods for creating brokers
pub struct BrokerFactory;

impl BrokerFactory {
    /// Create an in-memory broker
    pub fn in_memory() -> SharedBroker {
        Arc::new(InMemoryBroker::new())
    }

    /// Create a Redis broker
    #[cfg(feature = "redis-broker")]
    #[cfg_attr(docsrs, doc(cfg(feature = "redis-broker")))]
    pub async fn redis(
        connection_string: &str,
        connect_timeout: std::time::Duration,
    ) -> DispatchResult<SharedBroker> {
        let broker = RedisBroker::new(connection_string, connect_timeout).await?;
        Ok(Arc::new(broker))
    }

    /// Create the broker described by `config`
    pub async fn from_config(config: &BrokerConfig) -> DispatchResult<SharedBroker> {
        match &config.backend {
            BrokerBackendConfig::InMemory => Ok(Self::in_memory()),
            #[cfg(feature = "redis-broker")]
            BrokerBackendConfig::Redis(redis) => {
                Self::redis(
                    &redis.connection_string,
                    config.connect_timeout_secs.secs(),
                )
                .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_factory_in_memory() {
        let broker = BrokerFactory::from_config(&BrokerConfig::in_memory())
            .await
            .unwrap();
        assert!(broker.ping().await.is_ok());

        let mut messages = broker.subscribe("q").await.unwrap();
        broker.publish("q", b"hello".to_vec()).await.unwrap();
        assert_eq!(messages.next().await.unwrap(), b"hello".to_vec());
    }
}
