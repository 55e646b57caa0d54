use arca_core::models::{
    DataTransferType, OwnerScope, TaskFamily, TaskQuery, TaskResult, TaskStatus, TransferTask,
};
use arca_core::ArcaResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Persistence contract for working tasks and their result records.
///
/// Every failure of the underlying engine surfaces as `ArcaError::Persistence`.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Inserts or updates in place. Assigns `task.id` on first insert.
    async fn upsert(&self, task: &mut TransferTask) -> ArcaResult<Uuid>;

    async fn get(&self, id: Uuid) -> ArcaResult<Option<TransferTask>>;

    /// Removes a task. Refuses tasks that are still streaming.
    /// Returns false if there was nothing to delete.
    async fn delete(&self, id: Uuid) -> ArcaResult<bool>;

    /// Tasks matching `query`, newest first.
    async fn list(&self, query: &TaskQuery) -> ArcaResult<Vec<TransferTask>>;

    /// Number of tasks matching `query`, ignoring offset and limit.
    async fn count(&self, query: &TaskQuery) -> ArcaResult<i64>;

    /// Moves a task to `to` only if its current status is one of `from`.
    /// Clears `in_process`. Returns whether the transition happened.
    async fn update_status_if(
        &self,
        id: Uuid,
        from: &[TaskStatus],
        to: TaskStatus,
        failure_reason: Option<String>,
    ) -> ArcaResult<bool>;

    async fn set_in_process(&self, id: Uuid, in_process: bool) -> ArcaResult<()>;

    /// Clears every `in_process` flag. Used once at startup.
    async fn reset_in_process(&self) -> ArcaResult<u64>;

    async fn set_bytes_transferred(&self, id: Uuid, bytes: u64) -> ArcaResult<()>;

    /// Deletes sweepable tasks last updated before `cutoff`. Tasks that keep a
    /// result record are only deleted once that record exists.
    async fn delete_terminal_older_than(&self, cutoff: DateTime<Utc>) -> ArcaResult<u64>;

    async fn upsert_result(&self, result: &TaskResult) -> ArcaResult<()>;

    async fn get_result(&self, id: Uuid) -> ArcaResult<Option<TaskResult>>;

    /// Result records, newest completion first.
    async fn list_results(
        &self,
        family: Option<TaskFamily>,
        scope: Option<&OwnerScope>,
        offset: i64,
        limit: i64,
    ) -> ArcaResult<Vec<TaskResult>>;

    async fn count_results(
        &self,
        family: Option<TaskFamily>,
        scope: Option<&OwnerScope>,
    ) -> ArcaResult<i64>;

    async fn get_by_status_and_type(
        &self,
        status: TaskStatus,
        data_transfer_type: DataTransferType,
    ) -> ArcaResult<Vec<TransferTask>> {
        self.list(&TaskQuery {
            status: Some(status),
            data_transfer_type: Some(data_transfer_type),
            ..TaskQuery::default()
        })
        .await
    }

    async fn get_all(&self) -> ArcaResult<Vec<TransferTask>> {
        self.list(&TaskQuery::default()).await
    }

    async fn get_by_owner(
        &self,
        family: TaskFamily,
        user_id: &str,
        offset: i64,
        limit: i64,
    ) -> ArcaResult<Vec<TransferTask>> {
        self.list(&scoped(family, OwnerScope::User(user_id.to_string()), offset, limit))
            .await
    }

    async fn count_by_owner(&self, family: TaskFamily, user_id: &str) -> ArcaResult<i64> {
        self.count(&scoped(family, OwnerScope::User(user_id.to_string()), 0, i64::MAX))
            .await
    }

    async fn get_by_org_unit(
        &self,
        family: TaskFamily,
        doc: &str,
        offset: i64,
        limit: i64,
    ) -> ArcaResult<Vec<TransferTask>> {
        self.list(&scoped(family, OwnerScope::OrgUnit(doc.to_string()), offset, limit))
            .await
    }

    async fn count_by_org_unit(&self, family: TaskFamily, doc: &str) -> ArcaResult<i64> {
        self.count(&scoped(family, OwnerScope::OrgUnit(doc.to_string()), 0, i64::MAX))
            .await
    }
}

fn scoped(family: TaskFamily, scope: OwnerScope, offset: i64, limit: i64) -> TaskQuery {
    TaskQuery {
        family: Some(family),
        scope: Some(scope),
        offset,
        limit,
        ..TaskQuery::default()
    }
}
