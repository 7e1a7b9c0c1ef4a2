//! Executor registry for dispatchq.
//!
//! The registry maps a [`TaskId`] to the executor that handles it. It holds
//! two tables: the built-in executors (email and billing) and the executors
//! supplied by the host application. Lookups consult the built-ins first, so
//! a caller cannot replace them. The registry is assembled once, before the
//! subscriber starts, and is read-only afterwards.
//!
//! # Examples
//!
//! ```rust
//! use dispatchq::prelude::*;
//! use dispatchq::core::ExecutorRegistry;
//!
//! struct Thumbnail;
//!
//! #[async_trait::async_trait]
//! impl TaskExecutor for Thumbnail {
//!     async fn execute(&self, envelope: &Envelope) -> DispatchResult<()> {
//!         tracing::info!(payload = %envelope.payload, "Rendering thumbnail");
//!         Ok(())
//!     }
//! }
//!
//! let registry = ExecutorRegistry::builder()
//!     .with_email(dispatchq::executors::EmailExecutor::development())
//!     .register(TaskId::new(100), Thumbnail)
//!     .build();
//!
//! assert!(registry.is_registered(TaskId::new(100)));
//! assert!(registry.is_registered(TaskId::SEND_EMAIL));
//! assert!(!registry.is_registered(TaskId::CREATE_INVOICE));
//! ```

use crate::config::EmailConfig;
use crate::error::DispatchResult;
use crate::executors::{BillingExecutor, EmailExecutor};
use crate::task::{TaskExecutor, TaskId};
use std::collections::HashMap;
use std::sync::Arc;

/// Shared handle to an executor.
pub type SharedExecutor = Arc<dyn TaskExecutor>;

/// Caller-supplied executors by task identity.
pub type ExecutorMap = HashMap<TaskId, SharedExecutor>;

/// Immutable identity → executor table.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    builtins: ExecutorMap,
    custom: ExecutorMap,
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("ids", &self.registered_ids())
            .finish()
    }
}

impl ExecutorRegistry {
    /// Start assembling a registry.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Registry with both built-ins configured from `email` plus the caller
    /// executors in `custom`.
    pub fn from_config(email: &EmailConfig, custom: ExecutorMap) -> DispatchResult<Self> {
        Ok(Self::builder()
            .with_email(EmailExecutor::from_config(email)?)
            .with_billing(BillingExecutor::default())
            .extend(custom)
            .build())
    }

    /// Executor for `id`. Built-ins take precedence over caller executors.
    pub fn resolve(&self, id: TaskId) -> Option<SharedExecutor> {
        self.builtins
            .get(&id)
            .or_else(|| self.custom.get(&id))
            .cloned()
    }

    /// Whether any executor handles `id`.
    pub fn is_registered(&self, id: TaskId) -> bool {
        self.builtins.contains_key(&id) || self.custom.contains_key(&id)
    }

    /// Every identity with an executor, ascending.
    pub fn registered_ids(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self
            .builtins
            .keys()
            .chain(self.custom.keys())
            .copied()
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Number of identities with an executor.
    pub fn len(&self) -> usize {
        self.registered_ids().len()
    }

    /// Whether no executor is registered.
    pub fn is_empty(&self) -> bool {
        self.builtins.is_empty() && self.custom.is_empty()
    }
}

/// Builder for [`ExecutorRegistry`].
#[derive(Default)]
pub struct RegistryBuilder {
    builtins: ExecutorMap,
    custom: ExecutorMap,
}

impl RegistryBuilder {
    /// Install the email executor under [`TaskId::SEND_EMAIL`].
    pub fn with_email(mut self, executor: EmailExecutor) -> Self {
        self.builtins.insert(TaskId::SEND_EMAIL, Arc::new(executor));
        self
    }

    /// Install the billing executor under [`TaskId::CREATE_INVOICE`].
    pub fn with_billing(mut self, executor: BillingExecutor) -> Self {
        self.builtins.insert(TaskId::CREATE_INVOICE, Arc::new(executor));
        self
    }

    /// Register a caller executor. A later registration for the same id
    /// replaces an earlier one.
    pub fn register<E>(self, id: TaskId, executor: E) -> Self
    where
        E: TaskExecutor + 'static,
    {
        self.register_shared(id, Arc::new(executor))
    }

    /// Register an already shared caller executor.
    pub fn register_shared(mut self, id: TaskId, executor: SharedExecutor) -> Self {
        self.custom.insert(id, executor);
        self
    }

    /// Register every executor in `executors`.
    pub fn extend(mut self, executors: ExecutorMap) -> Self {
        self.custom.extend(executors);
        self
    }

    /// Finish the registry. Caller executors shadowed by a built-in are
    /// dropped.
    pub fn build(self) -> ExecutorRegistry {
        let Self {
            builtins,
            mut custom,
        } = self;

        custom.retain(|id, executor| {
            let shadowed = builtins.contains_key(id);
            if shadowed {
                tracing::warn!(
                    task_id = %id,
                    executor = executor.name(),
                    "Caller executor ignored, identity is reserved for a built-in"
                );
            }
            !shadowed
        });

        tracing::debug!(
            builtins = builtins.len(),
            custom = custom.len(),
            "Executor registry built"
        );

        ExecutorRegistry { builtins, custom }
    }
}
