//! Completion handling: turns a transfer outcome into a task status transition.

use arca_core::models::{
    ItemResult, ItemStatus, TaskFamily, TaskKind, TaskResult, TaskResultDetail, TaskStatus,
    TransferStatus, TransferTask,
};
use arca_core::ArcaResult;
use arca_db::TaskStore;
use arca_storage::{ProgressListener, TransferCompletion, TransferOutcome};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

/// Progress listener bound to one task.
///
/// Terminal notifications wait until the engine has persisted the dispatch
/// (see [`CompletionGate`]), so a fast transfer cannot be overwritten by the
/// engine's own bookkeeping.
pub struct TaskCompletionListener {
    store: Arc<dyn TaskStore>,
    task_id: Uuid,
    success: TaskStatus,
    ready: watch::Receiver<bool>,
}

/// Opens a listener's terminal notifications once dispatch is persisted.
/// Dropping the gate also opens it.
pub struct CompletionGate(watch::Sender<bool>);

impl CompletionGate {
    pub fn open(self) {
        let _ = self.0.send(true);
    }
}

impl TaskCompletionListener {
    pub fn new(
        store: Arc<dyn TaskStore>,
        task_id: Uuid,
        success: TaskStatus,
    ) -> (Arc<Self>, CompletionGate) {
        let (tx, rx) = watch::channel(false);
        (
            Arc::new(Self {
                store,
                task_id,
                success,
                ready: rx,
            }),
            CompletionGate(tx),
        )
    }

    async fn wait_until_ready(&self) {
        let mut ready = self.ready.clone();
        // A dropped gate means the engine is done with the task either way.
        let _ = ready.wait_for(|open| *open).await;
    }

    async fn finish(&self, outcome: TransferOutcome) {
        self.wait_until_ready().await;
        if let Err(e) = record_outcome(self.store.as_ref(), self.task_id, self.success, outcome).await
        {
            tracing::error!(
                error = %e,
                task_id = %self.task_id,
                "Failed to record transfer outcome"
            );
        }
    }
}

#[async_trait]
impl ProgressListener for TaskCompletionListener {
    async fn transfer_progressed(&self, bytes_transferred: u64) {
        if !*self.ready.borrow() {
            return;
        }
        if let Err(e) = self
            .store
            .set_bytes_transferred(self.task_id, bytes_transferred)
            .await
        {
            tracing::warn!(error = %e, task_id = %self.task_id, "Failed to record progress");
        }
    }

    async fn transfer_completed(&self, completion: TransferCompletion) {
        self.finish(TransferOutcome::Completed(completion)).await;
    }

    async fn transfer_failed(&self, reason: String) {
        self.finish(TransferOutcome::Failed(reason)).await;
    }
}

/// Moves a task to `success` or to FAILED and writes its result record.
/// Tasks already terminal are left alone. Returns whether the task changed.
///
/// The status change is claimed with a compare-and-set before the full task is
/// written back, so of two racing outcomes only the first is recorded.
pub(crate) async fn record_outcome(
    store: &dyn TaskStore,
    task_id: Uuid,
    success: TaskStatus,
    outcome: TransferOutcome,
) -> ArcaResult<bool> {
    let Some(mut task) = store.get(task_id).await? else {
        tracing::warn!(task_id = %task_id, "Outcome arrived for a task that no longer exists");
        return Ok(false);
    };
    if task.status.is_terminal() {
        tracing::debug!(task_id = %task_id, status = %task.status, "Task already terminal");
        return Ok(false);
    }

    let observed = task.status;
    apply_outcome(&mut task, success, &outcome);

    let claimed = store
        .update_status_if(
            task_id,
            &[observed],
            task.status,
            task.failure_reason.clone(),
        )
        .await?;
    if !claimed {
        tracing::debug!(task_id = %task_id, "Outcome already recorded by another writer");
        return Ok(false);
    }

    task.in_process = false;
    task.touch();
    store.upsert(&mut task).await?;
    write_result(store, &task).await?;

    match &task.failure_reason {
        Some(reason) => tracing::warn!(
            task_id = %task_id,
            family = %task.family(),
            reason = %reason,
            "Task failed"
        ),
        None => tracing::info!(
            task_id = %task_id,
            family = %task.family(),
            status = %task.status,
            bytes_transferred = task.bytes_transferred,
            "Task completed"
        ),
    }
    Ok(true)
}

fn apply_outcome(task: &mut TransferTask, success: TaskStatus, outcome: &TransferOutcome) {
    match outcome {
        TransferOutcome::Completed(completion) => {
            task.status = success;
            task.failure_reason = None;
            task.bytes_transferred = task.bytes_transferred.max(completion.bytes_transferred);
        }
        TransferOutcome::Failed(reason) => {
            task.status = TaskStatus::Failed;
            task.failure_reason = Some(reason.clone());
        }
    }

    match &mut task.kind {
        TaskKind::UploadQueue(entry) => {
            if let Some(response) = entry.response.as_mut() {
                match outcome {
                    TransferOutcome::Completed(completion) => {
                        if let Some(destination) = &entry.destination {
                            response.status = TransferStatus::archived_in(destination.archive_type);
                        }
                        if completion.checksum.is_some() {
                            response.checksum = completion.checksum.clone();
                        }
                        response.transfer_completed = Some(Utc::now());
                    }
                    TransferOutcome::Failed(_) => response.status = TransferStatus::Failed,
                }
            }
        }
        TaskKind::Migration(migration) => match outcome {
            TransferOutcome::Completed(completion) => {
                let item =
                    ItemResult::success(migration.target_path.clone(), completion.checksum.clone());
                match migration
                    .items
                    .iter_mut()
                    .find(|i| i.status == ItemStatus::Pending)
                {
                    Some(pending) => *pending = item,
                    None => migration.items.push(item),
                }
            }
            TransferOutcome::Failed(reason) => {
                if migration.items.is_empty() {
                    migration
                        .items
                        .push(ItemResult::pending(migration.target_path.clone()));
                }
                fail_pending(&mut migration.items, reason);
            }
        },
        TaskKind::BulkRegistration(bulk) => {
            if let TransferOutcome::Failed(reason) = outcome {
                fail_pending(&mut bulk.result.items, reason);
            }
        }
        TaskKind::Download(_) => {}
    }
}

fn fail_pending(items: &mut [ItemResult], reason: &str) {
    for item in items.iter_mut().filter(|i| i.status == ItemStatus::Pending) {
        *item = ItemResult::failed(item.path.clone(), reason);
    }
}

/// Writes the result record of a terminal task. A finished bulk registration
/// lives on only as its result, so its working task is deleted.
pub(crate) async fn write_result(store: &dyn TaskStore, task: &TransferTask) -> ArcaResult<()> {
    let Some(result) = task_result(task) else {
        return Ok(());
    };
    store.upsert_result(&result).await?;
    if task.family() == TaskFamily::BulkRegistration {
        store.delete(result.id).await?;
    }
    Ok(())
}

/// Historical record of a terminal task. Upload queue entries have none.
pub fn task_result(task: &TransferTask) -> Option<TaskResult> {
    let id = task.id?;
    let (result, detail) = match &task.kind {
        TaskKind::Download(download) => (
            task.status == TaskStatus::Completed,
            TaskResultDetail::Download {
                archive_location: download.archive_location.clone(),
                destination: download.destination.clone(),
                size_bytes: download.size_bytes,
            },
        ),
        TaskKind::Migration(migration) => (
            task.status == TaskStatus::Completed
                && migration
                    .items
                    .iter()
                    .all(|item| item.status == ItemStatus::Success),
            TaskResultDetail::Migration {
                source_location: migration.source_location.clone(),
                target_configuration_id: migration.target_configuration_id.clone(),
                items: migration.items.clone(),
            },
        ),
        TaskKind::BulkRegistration(bulk) => (
            task.status == TaskStatus::Completed && bulk.result.all_succeeded(),
            TaskResultDetail::BulkRegistration(bulk.result.clone()),
        ),
        TaskKind::UploadQueue(_) => return None,
    };

    Some(TaskResult {
        id,
        family: task.family(),
        owner: task.owner.clone(),
        data_transfer_type: task.data_transfer_type,
        result,
        message: task.failure_reason.clone(),
        created_at: task.created_at,
        completed_at: task.updated_at,
        detail,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use arca_core::models::{
        DataTransferType, DownloadDestination, DownloadTask, FileLocation, TaskOwner,
    };
    use arca_db::InMemoryTaskStore;

    async fn streaming_download(store: &Arc<dyn TaskStore>) -> Uuid {
        let mut task = TransferTask::new(
            TaskOwner::new("jdoe", "NCI"),
            DataTransferType::S3,
            TaskKind::Download(DownloadTask {
                archive_configuration_id: "archive-1".to_string(),
                archive_location: FileLocation::new("archive", "proj/a.bin"),
                destination: DownloadDestination::File {
                    path: "/tmp/a.bin".into(),
                },
                size_bytes: None,
            }),
        );
        task.status = TaskStatus::StreamingInProgress;
        task.in_process = true;
        store.upsert(&mut task).await.unwrap()
    }

    #[tokio::test]
    async fn completion_waits_for_the_gate() {
        let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
        let id = streaming_download(&store).await;
        let (listener, gate) =
            TaskCompletionListener::new(store.clone(), id, TaskStatus::Completed);

        let pending = tokio::spawn({
            let listener = listener.clone();
            async move {
                listener
                    .transfer_completed(TransferCompletion {
                        bytes_transferred: 42,
                        checksum: None,
                    })
                    .await
            }
        });
        tokio::task::yield_now().await;
        assert_eq!(
            store.get(id).await.unwrap().unwrap().status,
            TaskStatus::StreamingInProgress
        );

        gate.open();
        pending.await.unwrap();
        let task = store.get(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.bytes_transferred, 42);
        assert!(!task.in_process);
        assert!(store.get_result(id).await.unwrap().unwrap().result);
    }

    #[tokio::test]
    async fn terminal_tasks_ignore_late_outcomes() {
        let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
        let id = streaming_download(&store).await;

        assert!(record_outcome(
            store.as_ref(),
            id,
            TaskStatus::Completed,
            TransferOutcome::Failed("[aws] download failed: reset".to_string()),
        )
        .await
        .unwrap());
        assert!(!record_outcome(
            store.as_ref(),
            id,
            TaskStatus::Completed,
            TransferOutcome::Completed(TransferCompletion::default()),
        )
        .await
        .unwrap());

        let task = store.get(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(
            task.failure_reason.as_deref(),
            Some("[aws] download failed: reset")
        );
        let result = store.get_result(id).await.unwrap().unwrap();
        assert!(!result.result);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_outcomes_record_exactly_one() {
        let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
        let id = streaming_download(&store).await;

        let writers: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    let recorded = record_outcome(
                        store.as_ref(),
                        id,
                        TaskStatus::Completed,
                        TransferOutcome::Failed(format!("writer {}", i)),
                    )
                    .await
                    .unwrap();
                    (i, recorded)
                })
            })
            .collect();
        let mut winners = Vec::new();
        for writer in writers {
            let (i, recorded) = writer.await.unwrap();
            if recorded {
                winners.push(i);
            }
        }

        assert_eq!(winners.len(), 1);
        let task = store.get(id).await.unwrap().unwrap();
        assert_eq!(
            task.failure_reason,
            Some(format!("writer {}", winners[0]))
        );
    }

    #[tokio::test]
    async fn failed_bulk_registration_keeps_its_result() {
        use arca_core::models::{
            BulkRegistrationItem, BulkRegistrationResult, BulkRegistrationTask, UploadRequest,
            UploadSource,
        };

        let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
        let item = |path: &str| BulkRegistrationItem {
            request: UploadRequest {
                path: path.to_string(),
                caller_object_id: None,
                source: UploadSource::Url {
                    url: format!("https://example.org{}", path),
                },
                source_size: None,
            },
            metadata: vec![],
        };
        let mut task = TransferTask::new(
            TaskOwner::new("jdoe", "NCI"),
            DataTransferType::S3,
            TaskKind::BulkRegistration(BulkRegistrationTask {
                archive_configuration_id: "archive-1".to_string(),
                items: vec![item("/a.bin"), item("/b.bin")],
                result: BulkRegistrationResult {
                    items: vec![
                        ItemResult::success("/a.bin", Some("etag-a".to_string())),
                        ItemResult::pending("/b.bin"),
                    ],
                },
            }),
        );
        task.status = TaskStatus::InProgress;
        let id = store.upsert(&mut task).await.unwrap();

        assert!(record_outcome(
            store.as_ref(),
            id,
            TaskStatus::Completed,
            TransferOutcome::Failed("worker stopped".to_string()),
        )
        .await
        .unwrap());

        assert!(store.get(id).await.unwrap().is_none());
        let result = store.get_result(id).await.unwrap().unwrap();
        assert!(!result.result);
        assert_eq!(result.message.as_deref(), Some("worker stopped"));
        let TaskResultDetail::BulkRegistration(outcome) = result.detail else {
            panic!("bulk result expected");
        };
        assert_eq!(outcome.items[0].status, ItemStatus::Success);
        assert_eq!(outcome.items[1].status, ItemStatus::Failed);
        assert_eq!(outcome.items[1].error_message.as_deref(), Some("worker stopped"));
    }
}
