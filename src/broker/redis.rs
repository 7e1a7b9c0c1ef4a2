//! Redis broker implementation for dispatchq.
//!
//! Publishing and liveness probes share one multiplexed `ConnectionManager`;
//! each subscription opens its own pub/sub connection, as Redis requires. A
//! dropped pub/sub connection ends the subscription stream.

use super::{Broker, Subscription};
use crate::error::{DispatchError, DispatchResult};
use async_trait::async_trait;
use futures::StreamExt;
use redis::{AsyncCommands, Client, aio::ConnectionManager};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info};

/// Redis broker backend implementation
pub struct RedisBroker {
    /// Client used to open pub/sub connections
    client: Client,
    /// Shared connection for PUBLISH and PING
    conn: ConnectionManager,
    /// Timeout applied when opening connections
    connect_timeout: Duration,
}

impl std::fmt::Debug for RedisBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBroker")
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

impl RedisBroker {
    /// Connect to the Redis server at `connection_string`
    pub async fn new(connection_string: &str, connect_timeout: Duration) -> DispatchResult<Self> {
        let client = Client::open(connection_string)
            .map_err(|e| DispatchError::broker("Failed to create Redis client", e))?;

        let conn = timeout(connect_timeout, client.get_connection_manager())
            .await
            .map_err(|e| DispatchError::broker("Timed out connecting to Redis", e))?
            .map_err(|e| DispatchError::broker("Failed to create Redis connection manager", e))?;

        info!("Connected to Redis broker");

        Ok(Self {
            client,
            conn,
            connect_timeout,
        })
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn publish(&self, channel: &str, message: Vec<u8>) -> DispatchResult<()> {
        let mut conn = self.conn.clone();

        let receivers: i64 = conn
            .publish(channel, message)
            .await
            .map_err(|e| DispatchError::broker(format!("Failed to publish on '{channel}'"), e))?;

        debug!(channel, receivers, "Published message");
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> DispatchResult<Subscription> {
        let mut pubsub = timeout(self.connect_timeout, self.client.get_async_pubsub())
            .await
            .map_err(|e| DispatchError::broker("Timed out opening pub/sub connection", e))?
            .map_err(|e| DispatchError::broker("Failed to open pub/sub connection", e))?;

        pubsub
            .subscribe(channel)
            .await
            .map_err(|e| DispatchError::broker(format!("Failed to subscribe to '{channel}'"), e))?;

        info!(channel, "Subscribed to Redis channel");

        let stream = pubsub
            .into_on_message()
            .map(|msg| msg.get_payload_bytes().to_vec());

        Ok(stream.boxed())
    }

    async fn ping(&self) -> DispatchResult<()> {
        let mut conn = self.conn.clone();

        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| DispatchError::broker("Redis health check failed", e))?;

        if pong != "PONG" {
            return Err(DispatchError::Broker {
                message: format!("Redis health check failed: unexpected response '{pong}'"),
                source: None,
            });
        }

        Ok(())
    }
}
