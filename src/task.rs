//! Task envelope and executor contract.

use crate::error::{DispatchError, DispatchResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a task kind; the dispatch key on the wire.
///
/// Values are never renumbered once in use. `0` and `1` belong to the
/// built-in executors; host applications conventionally allocate their own
/// identities from [`TaskId::FIRST_CUSTOM`] upward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u32);

impl TaskId {
    /// Send an email.
    pub const SEND_EMAIL: TaskId = TaskId(0);
    /// Create an invoice.
    pub const CREATE_INVOICE: TaskId = TaskId(1);
    /// First identity of the range reserved for host applications.
    pub const FIRST_CUSTOM: TaskId = TaskId(100);

    /// Build a caller-defined identity.
    pub const fn new(value: u32) -> Self {
        TaskId(value)
    }

    /// Whether this identity is owned by a built-in executor.
    pub fn is_builtin(self) -> bool {
        self == Self::SEND_EMAIL || self == Self::CREATE_INVOICE
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::SEND_EMAIL => write!(f, "send_email({})", self.0),
            Self::CREATE_INVOICE => write!(f, "create_invoice({})", self.0),
            TaskId(n) => write!(f, "task({n})"),
        }
    }
}

/// The unit placed on the broadcast channel.
///
/// `payload` is untyped at the transport boundary; its concrete shape is
/// decided solely by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Which executor handles this envelope
    pub id: TaskId,
    /// Identity-dependent parameters
    #[serde(alias = "data")]
    pub payload: serde_json::Value,
    /// When the envelope was built
    pub created: DateTime<Utc>,
}

impl Envelope {
    /// Build an envelope stamped with the current time. The payload is not
    /// validated.
    pub fn new(id: TaskId, payload: serde_json::Value) -> Self {
        Self {
            id,
            payload,
            created: Utc::now(),
        }
    }

    /// Serialize for the wire.
    pub fn encode(&self) -> DispatchResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(DispatchError::Encode)
    }

    /// Parse a wire message.
    pub fn decode(bytes: &[u8]) -> DispatchResult<Self> {
        serde_json::from_slice(bytes).map_err(DispatchError::Decode)
    }
}

/// Capability that performs the work for one task identity.
///
/// Implementations interpret `envelope.payload` themselves and must report a
/// payload that cannot be materialized as an error rather than panicking.
/// Side effects are not rolled back on failure.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Execute the task carried by `envelope`.
    async fn execute(&self, envelope: &Envelope) -> DispatchResult<()>;

    /// Short name used in logs.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}
