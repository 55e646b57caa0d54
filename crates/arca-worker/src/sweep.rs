//! Periodic cleanup sweep: missing results, lapsed upload URLs, retention and
//! the upload queue.

use arca_core::models::{TaskFamily, TaskQuery, TaskStatus};
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};

use crate::completion::task_result;
use crate::engine::TaskEngine;

#[derive(Debug, Clone)]
pub struct SweepConfig {
    pub interval: Duration,
    /// How long terminal tasks stay queryable.
    pub retention: ChronoDuration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            retention: ChronoDuration::seconds(86_400),
        }
    }
}

/// Counts from one sweep pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub results_written: usize,
    pub url_uploads_archived: usize,
    pub url_uploads_expired: usize,
    pub tasks_deleted: u64,
    pub uploads_dispatched: usize,
}

pub struct SweepService {
    engine: Arc<TaskEngine>,
    config: SweepConfig,
}

impl SweepService {
    pub fn new(engine: Arc<TaskEngine>, config: SweepConfig) -> Self {
        Self { engine, config }
    }

    /// Runs the sweep every `interval` until a message arrives on `shutdown_rx`.
    pub fn start(self: Arc<Self>, mut shutdown_rx: mpsc::Receiver<()>) -> tokio::task::JoinHandle<()> {
        tracing::info!(
            interval_secs = self.config.interval.as_secs(),
            retention_secs = self.config.retention.num_seconds(),
            "Cleanup sweep started"
        );

        tokio::spawn(async move {
            let mut sweep_interval = interval(self.config.interval);
            sweep_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = sweep_interval.tick() => {
                        self.run_once().await;
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Cleanup sweep shutting down");
                        break;
                    }
                }
            }
        })
    }

    /// One pass. Every step logs its own failure and the pass carries on.
    #[tracing::instrument(skip(self))]
    pub async fn run_once(&self) -> SweepReport {
        let results_written = self.write_missing_results().await;

        let (url_uploads_archived, url_uploads_expired) =
            match self.engine.resolve_url_uploads().await {
                Ok(counts) => counts,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to resolve URL uploads");
                    (0, 0)
                }
            };

        let cutoff = Utc::now() - self.config.retention;
        let tasks_deleted = match self.engine.store().delete_terminal_older_than(cutoff).await {
            Ok(count) => count,
            Err(e) => {
                tracing::error!(error = %e, "Failed to delete expired tasks");
                0
            }
        };

        let uploads_dispatched = match self.engine.dispatch_upload_queue().await {
            Ok(count) => count,
            Err(e) => {
                tracing::error!(error = %e, "Failed to dispatch queued uploads");
                0
            }
        };

        let report = SweepReport {
            results_written,
            url_uploads_archived,
            url_uploads_expired,
            tasks_deleted,
            uploads_dispatched,
        };
        tracing::info!(
            results_written = report.results_written,
            url_uploads_archived = report.url_uploads_archived,
            url_uploads_expired = report.url_uploads_expired,
            tasks_deleted = report.tasks_deleted,
            uploads_dispatched = report.uploads_dispatched,
            "Cleanup sweep finished"
        );
        report
    }

    /// Results are written at the terminal transition. This catches the ones
    /// whose write failed there; the store keeps such tasks until it succeeds.
    async fn write_missing_results(&self) -> usize {
        let store = self.engine.store();
        let mut written = 0;
        for family in [TaskFamily::Download, TaskFamily::Migration] {
            for status in [TaskStatus::Completed, TaskStatus::Failed] {
                let query = TaskQuery {
                    family: Some(family),
                    status: Some(status),
                    ..TaskQuery::default()
                };
                let tasks = match store.list(&query).await {
                    Ok(tasks) => tasks,
                    Err(e) => {
                        tracing::error!(error = %e, family = %family, status = %status, "Failed to list finished tasks");
                        continue;
                    }
                };
                for task in tasks {
                    let Some(result) = task_result(&task) else {
                        continue;
                    };
                    match store.get_result(result.id).await {
                        Ok(Some(_)) => continue,
                        Ok(None) => {}
                        Err(e) => {
                            tracing::warn!(error = %e, task_id = %result.id, "Failed to look up result");
                            continue;
                        }
                    }
                    match store.upsert_result(&result).await {
                        Ok(()) => written += 1,
                        Err(e) => tracing::warn!(
                            error = %e,
                            task_id = %result.id,
                            "Failed to write missing result"
                        ),
                    }
                }
            }
        }
        written
    }
}
