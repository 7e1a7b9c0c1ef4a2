//! Timer-driven HTTP callbacks.
//!
//! Every schedule entry gets its own timer task. When an entry fires, the
//! POST runs on a freshly spawned task, so a slow or hung endpoint delays
//! neither the next firing of that entry nor any other timer. Callback
//! failures are logged and otherwise ignored.

use super::schedule::ScheduleEntry;
use crate::config::{BasicAuth, DurationExt, SchedulerConfig};
use crate::error::{DispatchError, DispatchResult};
use chrono::Utc;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Fires the callbacks of a parsed cron source.
pub struct CronScheduler {
    entries: Vec<ScheduleEntry>,
    client: Client,
    credentials: BasicAuth,
}

impl CronScheduler {
    /// Scheduler for `entries` with the HTTP settings in `config`.
    pub fn new(entries: Vec<ScheduleEntry>, config: &SchedulerConfig) -> DispatchResult<Self> {
        let client = Client::builder()
            .timeout(config.callback_timeout_ms.millis())
            .build()
            .map_err(|e| DispatchError::config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self::with_client(entries, client, config.credentials.clone()))
    }

    /// Scheduler posting through an existing client.
    pub fn with_client(entries: Vec<ScheduleEntry>, client: Client, credentials: BasicAuth) -> Self {
        Self {
            entries,
            client,
            credentials,
        }
    }

    /// Parsed schedule lines, in source order.
    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.entries
    }

    /// Spawn one timer per entry.
    pub fn start(self) -> SchedulerHandle {
        let credentials = Arc::new(self.credentials);

        let timers: Vec<JoinHandle<()>> = self
            .entries
            .into_iter()
            .map(|entry| {
                tokio::spawn(run_timer(
                    Arc::new(entry),
                    self.client.clone(),
                    credentials.clone(),
                ))
            })
            .collect();

        tracing::info!(jobs = timers.len(), "Cron scheduler started");
        SchedulerHandle { timers }
    }
}

/// Running timers. Dropping the handle stops them.
#[derive(Debug)]
pub struct SchedulerHandle {
    timers: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Number of timers started.
    pub fn job_count(&self) -> usize {
        self.timers.len()
    }

    /// Stop every timer. Callbacks already in flight run to completion.
    pub fn stop(self) {
        tracing::info!(jobs = self.timers.len(), "Cron scheduler stopping");
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        for timer in &self.timers {
            timer.abort();
        }
    }
}

async fn run_timer(entry: Arc<ScheduleEntry>, client: Client, credentials: Arc<BasicAuth>) {
    let mut last = Utc::now();

    loop {
        let Some(next) = entry.next_after(&last) else {
            tracing::info!(expression = %entry.expression(), "Schedule has no further firings");
            return;
        };

        let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::time::sleep(wait).await;

        let (entry_ref, client_ref, credentials_ref) =
            (entry.clone(), client.clone(), credentials.clone());
        tokio::spawn(async move {
            if let Err(e) = deliver_callback(&client_ref, &entry_ref, &credentials_ref).await {
                tracing::warn!(error = %e, "Cron callback failed");
            }
        });

        // Missed slots are skipped rather than replayed.
        last = next.max(Utc::now());
    }
}

/// POST the schedule line to the entry's URL. A transport error or a status
/// of 400 and above is an error.
pub async fn deliver_callback(
    client: &Client,
    entry: &ScheduleEntry,
    credentials: &BasicAuth,
) -> DispatchResult<()> {
    let callback_error = |message: String| DispatchError::Callback {
        url: entry.url().to_string(),
        message,
    };

    let response = client
        .post(entry.url())
        .basic_auth(&credentials.username, credentials.password.as_ref())
        .header(CONTENT_TYPE, "text/plain")
        .body(entry.line())
        .send()
        .await
        .map_err(|e| callback_error(e.to_string()))?;

    let status = response.status();
    if status.as_u16() >= 400 {
        return Err(callback_error(format!("endpoint answered {status}")));
    }

    tracing::debug!(url = %entry.url(), %status, "Cron callback delivered");
    Ok(())
}
