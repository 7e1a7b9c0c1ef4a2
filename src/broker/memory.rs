//! In-memory broker implementation for dispatchq.
//!
//! Channels are tokio broadcast channels created on first subscription.
//! Publishing to a channel nobody listens to drops the message, which is what
//! Redis does with a `PUBLISH` that has zero receivers.

use super::{Broker, Subscription};
use crate::error::{DispatchError, DispatchResult};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tokio::sync::broadcast::{self, error::RecvError};

const DEFAULT_CAPACITY: usize = 1024;

/// In-memory broker backend implementation
#[derive(Debug)]
pub struct InMemoryBroker {
    /// Broadcast senders by channel name
    channels: RwLock<HashMap<String, broadcast::Sender<Vec<u8>>>>,
    /// Per-channel buffer size; slow subscribers lag past this
    capacity: usize,
    /// Set once `close` has been called
    closed: AtomicBool,
}

impl InMemoryBroker {
    /// Create a new in-memory broker with the default buffer size
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a new in-memory broker buffering `capacity` messages per channel
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Number of live subscriptions on `channel`.
    pub async fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .read()
            .await
            .get(channel)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    /// Shut the broker down. Every subscription ends after draining what it
    /// already buffered; later calls fail.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.channels.write().await.clear();
        tracing::debug!("In-memory broker closed");
    }

    fn ensure_open(&self) -> DispatchResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DispatchError::Broker {
                message: "in-memory broker is closed".to_string(),
                source: None,
            });
        }
        Ok(())
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn publish(&self, channel: &str, message: Vec<u8>) -> DispatchResult<()> {
        self.ensure_open()?;

        let channels = self.channels.read().await;
        match channels.get(channel) {
            Some(tx) => {
                if tx.send(message).is_err() {
                    tracing::debug!(channel, "No subscribers, message dropped");
                }
            }
            None => tracing::debug!(channel, "Channel has never been subscribed, message dropped"),
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> DispatchResult<Subscription> {
        self.ensure_open()?;

        let rx = {
            let mut channels = self.channels.write().await;
            channels
                .entry(channel.to_string())
                .or_insert_with(|| broadcast::channel(self.capacity).0)
                .subscribe()
        };

        let channel = channel.to_string();
        let stream = futures::stream::unfold(rx, move |mut rx| {
            let channel = channel.clone();
            async move {
                loop {
                    match rx.recv().await {
                        Ok(message) => return Some((message, rx)),
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!(channel = %channel, skipped, "Subscriber lagged, messages lost");
                        }
                        Err(RecvError::Closed) => return None,
                    }
                }
            }
        });

        Ok(stream.boxed())
    }

    async fn ping(&self) -> DispatchResult<()> {
        self.ensure_open()
    }
}
