//! # dispatchq
//!
//! Fire-and-forget task dispatch over a pub/sub broker, plus a cron-driven
//! HTTP callback scheduler.
//!
//! ## Features
//!
//! - **Enqueue anywhere**: publishers only need a broker handle
//! - **Pluggable executors**: map a [`TaskId`] to any [`TaskExecutor`]
//! - **Concurrent dispatch**: each envelope runs on its own tokio task
//! - **Strict payloads**: [`materialize!`] turns a JSON mapping into a typed record
//! - **Cron callbacks**: POST to URLs on a schedule read from a flat file
//! - **Brokers**: in-memory, or Redis pub/sub behind the `redis-broker` feature
//!
//! ## Quick Start
//!
//! ```rust
//! use dispatchq::prelude::*;
//! use dispatchq::materialize::fill_struct;
//!
//! #[derive(Debug, Default)]
//! struct Resize {
//!     width: u32,
//!     path: String,
//! }
//!
//! dispatchq::materialize!(Resize { "Width" => width, "Path" => path });
//!
//! struct ResizeExecutor;
//!
//! #[async_trait]
//! impl TaskExecutor for ResizeExecutor {
//!     async fn execute(&self, envelope: &Envelope) -> DispatchResult<()> {
//!         let params: Resize = fill_struct(&envelope.payload)?;
//!         tracing::info!(width = params.width, path = %params.path, "Resizing");
//!         Ok(())
//!     }
//! }
//!
//! const RESIZE: TaskId = TaskId::new(100);
//!
//! #[tokio::main]
//! async fn main() -> DispatchResult<()> {
//!     let dispatcher = Dispatcher::connect(DispatchConfig::testing()).await?;
//!
//!     let mut executors = ExecutorMap::new();
//!     executors.insert(RESIZE, std::sync::Arc::new(ResizeExecutor) as SharedExecutor);
//!     let subscriber = dispatcher.subscriber(executors)?;
//!     let running = tokio::spawn(subscriber.run());
//!
//!     dispatcher
//!         .enqueue(RESIZE, &serde_json::json!({"Width": 640, "Path": "/tmp/a.png"}))
//!         .await?;
//!
//!     running.abort();
//!     Ok(())
//! }
//! ```

pub mod broker;
pub mod config;
pub mod core;
pub mod cron;
pub mod error;
pub mod executors;
pub mod logging;
pub mod materialize;
pub mod task;

pub mod prelude {
    pub use crate::broker::{Broker, SharedBroker};
    pub use crate::config::{DecodePolicy, DispatchConfig, DispatchSettings, SchedulerConfig};
    pub use crate::core::{
        Dispatcher, ExecutorMap, ExecutorRegistry, Publisher, SharedExecutor, Subscriber,
        TaskOutcome,
    };
    pub use crate::error::{DispatchError, DispatchResult};
    pub use crate::materialize;
    pub use crate::task::{Envelope, TaskExecutor, TaskId};
    pub use async_trait::async_trait;
}

pub use crate::config::DispatchConfig;
pub use crate::core::{Dispatcher, ExecutorMap, Publisher, Subscriber};
pub use crate::error::{DispatchError, DispatchResult};
pub use crate::task::{Envelope, TaskExecutor, TaskId};
pub use async_trait::async_trait;
