//! Enqueue side of dispatchq.

use crate::broker::SharedBroker;
use crate::error::{DispatchError, DispatchResult};
use crate::task::{Envelope, TaskId};
use serde::Serialize;
use std::sync::Arc;

/// Publishes task envelopes on the dispatch channel.
///
/// Cloning is cheap; clones share the broker handle. A publisher never learns
/// what happened to a task after the broker accepted it.
#[derive(Clone)]
pub struct Publisher {
    broker: SharedBroker,
    channel: Arc<str>,
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

impl Publisher {
    /// Publisher on `channel` of `broker`.
    pub fn new(broker: SharedBroker, channel: impl Into<Arc<str>>) -> Self {
        Self {
            broker,
            channel: channel.into(),
        }
    }

    /// Wrap `data` in an envelope for `id` and broadcast it.
    ///
    /// Serialization failures are returned as [`DispatchError::Encode`] and
    /// nothing is sent. Transport failures are returned as reported by the
    /// broker.
    ///
    /// ```rust
    /// # use dispatchq::prelude::*;
    /// # use dispatchq::broker::BrokerFactory;
    /// # use dispatchq::core::Publisher;
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() -> DispatchResult<()> {
    /// let publisher = Publisher::new(BrokerFactory::in_memory(), "q");
    /// publisher
    ///     .enqueue(
    ///         TaskId::SEND_EMAIL,
    ///         &serde_json::json!({"To": "user@example.com", "Subject": "Hi"}),
    ///     )
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn enqueue<T>(&self, id: TaskId, data: &T) -> DispatchResult<()>
    where
        T: Serialize + ?Sized,
    {
        let payload = serde_json::to_value(data).map_err(DispatchError::Encode)?;
        self.publish(&Envelope::new(id, payload)).await
    }

    /// Broadcast an already built envelope.
    pub async fn publish(&self, envelope: &Envelope) -> DispatchResult<()> {
        let message = envelope.encode()?;

        self.broker.publish(&self.channel, message).await?;

        tracing::debug!(task_id = %envelope.id, channel = %self.channel, "Task enqueued");
        Ok(())
    }

    /// Channel this publisher broadcasts on.
    pub fn channel(&self) -> &str {
        &self.channel
    }
}
