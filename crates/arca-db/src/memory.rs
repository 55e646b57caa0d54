//! Process-local task store.
//!
//! Holds tasks and results behind a `tokio::sync::RwLock`. Suitable for tests and
//! for single-process deployments that accept losing task state on restart.

use arca_core::models::{OwnerScope, TaskFamily, TaskQuery, TaskResult, TaskStatus, TransferTask};
use arca_core::{ArcaError, ArcaResult};
use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::store::TaskStore;

#[derive(Default)]
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<Uuid, TransferTask>>,
    results: RwLock<HashMap<Uuid, TaskResult>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn page<T>(items: Vec<T>, offset: i64, limit: i64) -> Vec<T> {
    items
        .into_iter()
        .skip(offset.max(0) as usize)
        .take(limit.max(0) as usize)
        .collect()
}

fn result_matches(
    result: &TaskResult,
    family: Option<TaskFamily>,
    scope: Option<&OwnerScope>,
) -> bool {
    family.map_or(true, |f| f == result.family) && scope.map_or(true, |s| s.matches(&result.owner))
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn upsert(&self, task: &mut TransferTask) -> ArcaResult<Uuid> {
        let id = *task.id.get_or_insert_with(Uuid::new_v4);
        self.tasks.write().await.insert(id, task.clone());
        Ok(id)
    }

    async fn get(&self, id: Uuid) -> ArcaResult<Option<TransferTask>> {
        Ok(self.tasks.read().await.get(&id).cloned())
    }

    async fn delete(&self, id: Uuid) -> ArcaResult<bool> {
        let mut tasks = self.tasks.write().await;
        match tasks.get(&id) {
            None => Ok(false),
            Some(task) if task.status == TaskStatus::StreamingInProgress => {
                Err(ArcaError::invalid_request(format!(
                    "task {} is still streaming and cannot be deleted",
                    id
                )))
            }
            Some(_) => Ok(tasks.remove(&id).is_some()),
        }
    }

    async fn list(&self, query: &TaskQuery) -> ArcaResult<Vec<TransferTask>> {
        let mut matching: Vec<TransferTask> = self
            .tasks
            .read()
            .await
            .values()
            .filter(|task| query.matches(task))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(page(matching, query.offset, query.limit))
    }

    async fn count(&self, query: &TaskQuery) -> ArcaResult<i64> {
        Ok(self
            .tasks
            .read()
            .await
            .values()
            .filter(|task| query.matches(task))
            .count() as i64)
    }

    async fn update_status_if(
        &self,
        id: Uuid,
        from: &[TaskStatus],
        to: TaskStatus,
        failure_reason: Option<String>,
    ) -> ArcaResult<bool> {
        let mut tasks = self.tasks.write().await;
        let Some(task) = tasks.get_mut(&id) else {
            return Ok(false);
        };
        if !from.contains(&task.status) {
            return Ok(false);
        }
        task.status = to;
        task.in_process = false;
        if failure_reason.is_some() {
            task.failure_reason = failure_reason;
        }
        task.touch();
        Ok(true)
    }

    async fn set_in_process(&self, id: Uuid, in_process: bool) -> ArcaResult<()> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(&id)
            .ok_or_else(|| ArcaError::NotFound(format!("task {}", id)))?;
        task.in_process = in_process;
        task.touch();
        Ok(())
    }

    async fn reset_in_process(&self) -> ArcaResult<u64> {
        let mut reset = 0;
        for task in self.tasks.write().await.values_mut() {
            if task.in_process {
                task.in_process = false;
                task.touch();
                reset += 1;
            }
        }
        Ok(reset)
    }

    async fn set_bytes_transferred(&self, id: Uuid, bytes: u64) -> ArcaResult<()> {
        if let Some(task) = self.tasks.write().await.get_mut(&id) {
            task.bytes_transferred = bytes;
        }
        Ok(())
    }

    async fn delete_terminal_older_than(&self, cutoff: DateTime<Utc>) -> ArcaResult<u64> {
        let results = self.results.read().await;
        let mut tasks = self.tasks.write().await;
        let before = tasks.len();
        tasks.retain(|id, task| {
            let recorded = task.family() == TaskFamily::UploadQueue || results.contains_key(id);
            !(task.status.is_sweepable() && task.updated_at < cutoff && recorded)
        });
        Ok((before - tasks.len()) as u64)
    }

    async fn upsert_result(&self, result: &TaskResult) -> ArcaResult<()> {
        let mut stored = result.clone();
        stored.created_at = stored.created_at.trunc_subsecs(6);
        stored.completed_at = stored.completed_at.trunc_subsecs(6);
        self.results.write().await.insert(result.id, stored);
        Ok(())
    }

    async fn get_result(&self, id: Uuid) -> ArcaResult<Option<TaskResult>> {
        Ok(self.results.read().await.get(&id).cloned())
    }

    async fn list_results(
        &self,
        family: Option<TaskFamily>,
        scope: Option<&OwnerScope>,
        offset: i64,
        limit: i64,
    ) -> ArcaResult<Vec<TaskResult>> {
        let mut matching: Vec<TaskResult> = self
            .results
            .read()
            .await
            .values()
            .filter(|result| result_matches(result, family, scope))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.completed_at.cmp(&a.completed_at).then(a.id.cmp(&b.id)));
        Ok(page(matching, offset, limit))
    }

    async fn count_results(
        &self,
        family: Option<TaskFamily>,
        scope: Option<&OwnerScope>,
    ) -> ArcaResult<i64> {
        Ok(self
            .results
            .read()
            .await
            .values()
            .filter(|result| result_matches(result, family, scope))
            .count() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arca_core::models::{
        ArchiveDestination, ArchiveType, BulkRegistrationItem, BulkRegistrationResult,
        BulkRegistrationTask, DataTransferType, DownloadDestination, DownloadTask, FileLocation,
        ItemResult, MigrationTask, MigrationType, TaskKind, TaskOwner, TaskResultDetail,
        UploadQueueEntry, UploadRequest, UploadSource,
    };
    use chrono::Duration;

    fn owner() -> TaskOwner {
        TaskOwner::new("jdoe", "NCI")
    }

    fn upload_request(path: &str) -> UploadRequest {
        UploadRequest {
            path: path.to_string(),
            caller_object_id: None,
            source: UploadSource::Url {
                url: format!("https://source.example.org{}", path),
            },
            source_size: Some(42),
        }
    }

    fn every_family() -> Vec<TransferTask> {
        let download = TaskKind::Download(DownloadTask {
            archive_configuration_id: "archive-1".to_string(),
            archive_location: FileLocation::new("archive", "proj/a.bin"),
            destination: DownloadDestination::File {
                path: "/tmp/a.bin".into(),
            },
            size_bytes: Some(42),
        });
        let bulk = TaskKind::BulkRegistration(BulkRegistrationTask {
            archive_configuration_id: "archive-1".to_string(),
            items: vec![BulkRegistrationItem {
                request: upload_request("/proj/b.bin"),
                metadata: vec![],
            }],
            result: BulkRegistrationResult {
                items: vec![ItemResult::pending("/proj/b.bin")],
            },
        });
        let migration = TaskKind::Migration(MigrationTask {
            source_configuration_id: "archive-1".to_string(),
            source_location: FileLocation::new("archive", "proj/c.bin"),
            target_configuration_id: "archive-2".to_string(),
            target_path: "/proj/c.bin".to_string(),
            migration_type: MigrationType::DataObject,
            items: vec![],
        });
        let queued = TaskKind::UploadQueue(UploadQueueEntry {
            archive_configuration_id: "archive-1".to_string(),
            request: upload_request("/proj/d.bin"),
            metadata: vec![],
            storage_class: None,
            destination: Some(ArchiveDestination {
                location: FileLocation::new("archive", "proj/d.bin"),
                archive_type: ArchiveType::Archive,
            }),
            response: None,
        });
        [download, bulk, migration, queued]
            .into_iter()
            .map(|kind| TransferTask::new(owner(), DataTransferType::S3, kind))
            .collect()
    }

    #[tokio::test]
    async fn upsert_round_trips_every_family_and_updates_in_place() {
        let store = InMemoryTaskStore::new();
        for mut task in every_family() {
            let id = store.upsert(&mut task).await.unwrap();
            assert_eq!(task.id, Some(id));

            let listed = store
                .get_by_status_and_type(TaskStatus::Received, DataTransferType::S3)
                .await
                .unwrap();
            assert!(listed.contains(&task));

            task.status = TaskStatus::InProgress;
            assert_eq!(store.upsert(&mut task).await.unwrap(), id);
            let owned = store
                .get_by_owner(task.family(), "jdoe", 0, 100)
                .await
                .unwrap();
            assert_eq!(owned, vec![task.clone()]);
        }
        assert_eq!(store.get_all().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn owner_and_org_unit_listings_paginate_with_counts() {
        let store = InMemoryTaskStore::new();
        for i in 0..5 {
            let mut task = every_family().remove(0);
            task.owner = TaskOwner::new(format!("user{}", i % 2), "NCI");
            store.upsert(&mut task).await.unwrap();
        }

        assert_eq!(
            store.count_by_org_unit(TaskFamily::Download, "NCI").await.unwrap(),
            5
        );
        assert_eq!(
            store.count_by_owner(TaskFamily::Download, "user0").await.unwrap(),
            3
        );
        let page = store
            .get_by_org_unit(TaskFamily::Download, "NCI", 2, 2)
            .await
            .unwrap();
        assert_eq!(page.len(), 2);
        let tail = store
            .get_by_org_unit(TaskFamily::Download, "NCI", 4, 10)
            .await
            .unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(
            store.count_by_owner(TaskFamily::Migration, "user0").await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn streaming_tasks_cannot_be_deleted() {
        let store = InMemoryTaskStore::new();
        let mut task = every_family().remove(0);
        task.status = TaskStatus::StreamingInProgress;
        let id = store.upsert(&mut task).await.unwrap();

        assert!(matches!(
            store.delete(id).await,
            Err(ArcaError::InvalidRequest(_))
        ));
        assert!(store
            .update_status_if(id, &[TaskStatus::StreamingInProgress], TaskStatus::Failed, None)
            .await
            .unwrap());
        assert!(store.delete(id).await.unwrap());
        assert!(!store.delete(id).await.unwrap());
    }

    #[tokio::test]
    async fn conditional_transition_fires_once() {
        let store = InMemoryTaskStore::new();
        let mut task = every_family().remove(0);
        task.status = TaskStatus::StreamingInProgress;
        task.in_process = true;
        let id = store.upsert(&mut task).await.unwrap();

        let from = [TaskStatus::StreamingInProgress];
        assert!(store
            .update_status_if(id, &from, TaskStatus::Failed, Some("boom".to_string()))
            .await
            .unwrap());
        assert!(!store
            .update_status_if(id, &from, TaskStatus::Completed, None)
            .await
            .unwrap());

        let stored = store.get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Failed);
        assert_eq!(stored.failure_reason.as_deref(), Some("boom"));
        assert!(!stored.in_process);
    }

    #[tokio::test]
    async fn retention_sweep_spares_streaming_and_temporary_archive() {
        let store = InMemoryTaskStore::new();
        let mut ids = HashMap::new();
        for status in [
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::StreamingInProgress,
            TaskStatus::InTemporaryArchive,
            TaskStatus::Received,
        ] {
            let mut task = every_family().remove(3);
            task.status = status;
            task.updated_at = Utc::now() - Duration::hours(2);
            ids.insert(status, store.upsert(&mut task).await.unwrap());
        }

        let deleted = store
            .delete_terminal_older_than(Utc::now() - Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(deleted, 2);
        assert!(store.get(ids[&TaskStatus::Completed]).await.unwrap().is_none());
        assert!(store
            .get(ids[&TaskStatus::StreamingInProgress])
            .await
            .unwrap()
            .is_some());
        assert!(store
            .get(ids[&TaskStatus::InTemporaryArchive])
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn retention_sweep_waits_for_the_result_record() {
        let store = InMemoryTaskStore::new();
        let mut task = every_family().remove(0);
        task.status = TaskStatus::Completed;
        task.updated_at = Utc::now() - Duration::hours(2);
        let id = store.upsert(&mut task).await.unwrap();

        let cutoff = Utc::now() - Duration::hours(1);
        assert_eq!(store.delete_terminal_older_than(cutoff).await.unwrap(), 0);
        assert!(store.get(id).await.unwrap().is_some());

        store
            .upsert_result(&TaskResult {
                id,
                family: TaskFamily::Download,
                owner: owner(),
                data_transfer_type: DataTransferType::S3,
                result: true,
                message: None,
                created_at: task.created_at,
                completed_at: Utc::now(),
                detail: TaskResultDetail::Download {
                    archive_location: FileLocation::new("archive", "proj/a.bin"),
                    destination: DownloadDestination::File {
                        path: "/tmp/a.bin".into(),
                    },
                    size_bytes: Some(42),
                },
            })
            .await
            .unwrap();
        assert_eq!(store.delete_terminal_older_than(cutoff).await.unwrap(), 1);
        assert!(store.get(id).await.unwrap().is_none());
        assert!(store.get_result(id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn results_outlive_tasks_and_are_scoped() {
        let store = InMemoryTaskStore::new();
        let mut task = every_family().remove(1);
        let id = store.upsert(&mut task).await.unwrap();

        let result = TaskResult {
            id,
            family: TaskFamily::BulkRegistration,
            owner: owner(),
            data_transfer_type: DataTransferType::S3,
            result: true,
            message: None,
            created_at: task.created_at,
            completed_at: Utc::now(),
            detail: TaskResultDetail::BulkRegistration(BulkRegistrationResult {
                items: vec![ItemResult::success("/proj/b.bin", Some("etag".to_string()))],
            }),
        };
        store.upsert_result(&result).await.unwrap();
        store
            .update_status_if(id, &[TaskStatus::Received], TaskStatus::Completed, None)
            .await
            .unwrap();
        store.delete(id).await.unwrap();

        assert!(store.get(id).await.unwrap().is_none());
        assert_eq!(store.get_result(id).await.unwrap().unwrap().id, id);
        let nci = OwnerScope::OrgUnit("NCI".to_string());
        assert_eq!(
            store
                .count_results(Some(TaskFamily::BulkRegistration), Some(&nci))
                .await
                .unwrap(),
            1
        );
        let other = OwnerScope::User("someone".to_string());
        assert!(store
            .list_results(None, Some(&other), 0, 10)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn startup_reset_clears_in_process_flags() {
        let store = InMemoryTaskStore::new();
        for mut task in every_family() {
            task.in_process = true;
            store.upsert(&mut task).await.unwrap();
        }
        assert_eq!(store.reset_in_process().await.unwrap(), 4);
        assert!(store
            .get_all()
            .await
            .unwrap()
            .iter()
            .all(|task| !task.in_process));
    }
}
