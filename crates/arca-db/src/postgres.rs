//! Postgres task store.
//!
//! One row per working task in `transfer_tasks`, the family-specific part of the
//! task kept as JSONB in `payload`. Result records live in `task_results` and
//! are never touched by task deletion.

use anyhow::Context;
use arca_core::models::{
    OwnerScope, TaskFamily, TaskKind, TaskOwner, TaskQuery, TaskResult, TaskResultDetail,
    TaskStatus, TransferTask,
};
use arca_core::{ArcaError, ArcaResult};
use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::store::TaskStore;

const TASK_COLUMNS: &str = r#"
    id, family, status, data_transfer_type, request_id, owner_user_id, owner_doc,
    in_process, failure_reason, bytes_transferred, payload, created_at, updated_at
"#;

const RESULT_COLUMNS: &str = r#"
    id, family, owner_user_id, owner_doc, data_transfer_type, result, message,
    detail, created_at, completed_at
"#;

#[derive(FromRow)]
struct TaskRow {
    id: Uuid,
    status: String,
    data_transfer_type: String,
    request_id: Option<String>,
    owner_user_id: String,
    owner_doc: String,
    in_process: bool,
    failure_reason: Option<String>,
    bytes_transferred: i64,
    payload: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TaskRow {
    fn into_task(self) -> anyhow::Result<TransferTask> {
        let kind: TaskKind = serde_json::from_value(self.payload)
            .with_context(|| format!("Failed to decode payload of task {}", self.id))?;
        Ok(TransferTask {
            id: Some(self.id),
            created_at: self.created_at,
            updated_at: self.updated_at,
            status: self.status.parse()?,
            data_transfer_type: self.data_transfer_type.parse()?,
            request_id: self.request_id,
            owner: TaskOwner::new(self.owner_user_id, self.owner_doc),
            in_process: self.in_process,
            failure_reason: self.failure_reason,
            bytes_transferred: self.bytes_transferred.max(0) as u64,
            kind,
        })
    }
}

#[derive(FromRow)]
struct ResultRow {
    id: Uuid,
    family: String,
    owner_user_id: String,
    owner_doc: String,
    data_transfer_type: String,
    result: bool,
    message: Option<String>,
    detail: serde_json::Value,
    created_at: DateTime<Utc>,
    completed_at: DateTime<Utc>,
}

impl ResultRow {
    fn into_result(self) -> anyhow::Result<TaskResult> {
        let detail: TaskResultDetail = serde_json::from_value(self.detail)
            .with_context(|| format!("Failed to decode detail of result {}", self.id))?;
        Ok(TaskResult {
            id: self.id,
            family: self.family.parse()?,
            owner: TaskOwner::new(self.owner_user_id, self.owner_doc),
            data_transfer_type: self.data_transfer_type.parse()?,
            result: self.result,
            message: self.message,
            created_at: self.created_at,
            completed_at: self.completed_at,
            detail,
        })
    }
}

fn db_error(operation: &'static str) -> impl Fn(sqlx::Error) -> ArcaError {
    move |e| {
        tracing::error!(error = %e, operation, "Task store query failed");
        ArcaError::Persistence(format!("{}: {}", operation, e))
    }
}

fn decode_error(e: anyhow::Error) -> ArcaError {
    tracing::error!(error = %e, "Task store row could not be decoded");
    ArcaError::Persistence(format!("{:#}", e))
}

/// `WHERE` clause for the filters of a query, all bound as text from `$1`.
fn task_filters(query: &TaskQuery) -> (String, Vec<String>) {
    let mut conditions = Vec::new();
    let mut binds = Vec::new();

    if let Some(family) = query.family {
        binds.push(family.to_string());
        conditions.push(format!("family = ${}", binds.len()));
    }
    if let Some(status) = query.status {
        binds.push(status.to_string());
        conditions.push(format!("status = ${}", binds.len()));
    }
    if let Some(data_transfer_type) = query.data_transfer_type {
        binds.push(data_transfer_type.to_string());
        conditions.push(format!("data_transfer_type = ${}", binds.len()));
    }
    if let Some(scope) = &query.scope {
        push_scope(scope, &mut conditions, &mut binds);
    }

    (where_clause(conditions), binds)
}

fn result_filters(family: Option<TaskFamily>, scope: Option<&OwnerScope>) -> (String, Vec<String>) {
    let mut conditions = Vec::new();
    let mut binds = Vec::new();
    if let Some(family) = family {
        binds.push(family.to_string());
        conditions.push(format!("family = ${}", binds.len()));
    }
    if let Some(scope) = scope {
        push_scope(scope, &mut conditions, &mut binds);
    }
    (where_clause(conditions), binds)
}

fn push_scope(scope: &OwnerScope, conditions: &mut Vec<String>, binds: &mut Vec<String>) {
    match scope {
        OwnerScope::User(user_id) => {
            binds.push(user_id.clone());
            conditions.push(format!("owner_user_id = ${}", binds.len()));
        }
        OwnerScope::OrgUnit(doc) => {
            binds.push(doc.clone());
            conditions.push(format!("owner_doc = ${}", binds.len()));
        }
    }
}

fn where_clause(conditions: Vec<String>) -> String {
    if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    }
}

#[derive(Clone)]
pub struct PgTaskStore {
    pool: PgPool,
}

impl PgTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskStore for PgTaskStore {
    #[tracing::instrument(skip(self, task), fields(family = %task.family()))]
    async fn upsert(&self, task: &mut TransferTask) -> ArcaResult<Uuid> {
        let id = *task.id.get_or_insert_with(Uuid::new_v4);
        let payload = serde_json::to_value(&task.kind)?;

        sqlx::query(
            r#"
            INSERT INTO transfer_tasks (
                id, family, status, data_transfer_type, request_id, owner_user_id, owner_doc,
                in_process, failure_reason, bytes_transferred, payload, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (id) DO UPDATE SET
                family = EXCLUDED.family,
                status = EXCLUDED.status,
                data_transfer_type = EXCLUDED.data_transfer_type,
                request_id = EXCLUDED.request_id,
                owner_user_id = EXCLUDED.owner_user_id,
                owner_doc = EXCLUDED.owner_doc,
                in_process = EXCLUDED.in_process,
                failure_reason = EXCLUDED.failure_reason,
                bytes_transferred = EXCLUDED.bytes_transferred,
                payload = EXCLUDED.payload,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(id)
        .bind(task.family().to_string())
        .bind(task.status.to_string())
        .bind(task.data_transfer_type.to_string())
        .bind(&task.request_id)
        .bind(&task.owner.user_id)
        .bind(&task.owner.doc)
        .bind(task.in_process)
        .bind(&task.failure_reason)
        .bind(task.bytes_transferred as i64)
        .bind(payload)
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_error("upsert task"))?;

        tracing::debug!(task_id = %id, status = %task.status, "Task upserted");
        Ok(id)
    }

    async fn get(&self, id: Uuid) -> ArcaResult<Option<TransferTask>> {
        let sql = format!("SELECT {} FROM transfer_tasks WHERE id = $1", TASK_COLUMNS);
        let row = sqlx::query_as::<_, TaskRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("get task"))?;
        row.map(TaskRow::into_task).transpose().map_err(decode_error)
    }

    #[tracing::instrument(skip(self))]
    async fn delete(&self, id: Uuid) -> ArcaResult<bool> {
        let result = sqlx::query("DELETE FROM transfer_tasks WHERE id = $1 AND status <> $2")
            .bind(id)
            .bind(TaskStatus::StreamingInProgress.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_error("delete task"))?;
        if result.rows_affected() > 0 {
            tracing::debug!(task_id = %id, "Task deleted");
            return Ok(true);
        }

        let streaming: Option<(String,)> =
            sqlx::query_as("SELECT status FROM transfer_tasks WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error("delete task"))?;
        match streaming {
            Some(_) => Err(ArcaError::invalid_request(format!(
                "task {} is still streaming and cannot be deleted",
                id
            ))),
            None => Ok(false),
        }
    }

    async fn list(&self, query: &TaskQuery) -> ArcaResult<Vec<TransferTask>> {
        let (filter, binds) = task_filters(query);
        let bind_count = binds.len() + 1;
        let sql = format!(
            "SELECT {} FROM transfer_tasks {} ORDER BY created_at DESC, id ASC LIMIT ${} OFFSET ${}",
            TASK_COLUMNS,
            filter,
            bind_count,
            bind_count + 1
        );

        let mut query_builder = sqlx::query_as::<_, TaskRow>(&sql);
        for value in binds {
            query_builder = query_builder.bind(value);
        }
        let rows = query_builder
            .bind(query.limit.max(0))
            .bind(query.offset.max(0))
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("list tasks"))?;

        rows.into_iter()
            .map(TaskRow::into_task)
            .collect::<anyhow::Result<Vec<_>>>()
            .map_err(decode_error)
    }

    async fn count(&self, query: &TaskQuery) -> ArcaResult<i64> {
        let (filter, binds) = task_filters(query);
        let sql = format!("SELECT COUNT(*) FROM transfer_tasks {}", filter);
        let mut query_builder = sqlx::query_scalar::<_, i64>(&sql);
        for value in binds {
            query_builder = query_builder.bind(value);
        }
        query_builder
            .fetch_one(&self.pool)
            .await
            .map_err(db_error("count tasks"))
    }

    #[tracing::instrument(skip(self, from, failure_reason))]
    async fn update_status_if(
        &self,
        id: Uuid,
        from: &[TaskStatus],
        to: TaskStatus,
        failure_reason: Option<String>,
    ) -> ArcaResult<bool> {
        let from: Vec<String> = from.iter().map(ToString::to_string).collect();
        let result = sqlx::query(
            r#"
            UPDATE transfer_tasks
            SET status = $2,
                failure_reason = COALESCE($3, failure_reason),
                in_process = FALSE,
                updated_at = $4
            WHERE id = $1 AND status = ANY($5)
            "#,
        )
        .bind(id)
        .bind(to.to_string())
        .bind(failure_reason)
        .bind(Utc::now().trunc_subsecs(6))
        .bind(&from)
        .execute(&self.pool)
        .await
        .map_err(db_error("update task status"))?;

        Ok(result.rows_affected() == 1)
    }

    async fn set_in_process(&self, id: Uuid, in_process: bool) -> ArcaResult<()> {
        let result = sqlx::query(
            "UPDATE transfer_tasks SET in_process = $2, updated_at = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(in_process)
        .bind(Utc::now().trunc_subsecs(6))
        .execute(&self.pool)
        .await
        .map_err(db_error("set in_process"))?;
        if result.rows_affected() == 0 {
            return Err(ArcaError::NotFound(format!("task {}", id)));
        }
        Ok(())
    }

    async fn reset_in_process(&self) -> ArcaResult<u64> {
        let result = sqlx::query(
            "UPDATE transfer_tasks SET in_process = FALSE, updated_at = $1 WHERE in_process",
        )
        .bind(Utc::now().trunc_subsecs(6))
        .execute(&self.pool)
        .await
        .map_err(db_error("reset in_process"))?;
        Ok(result.rows_affected())
    }

    async fn set_bytes_transferred(&self, id: Uuid, bytes: u64) -> ArcaResult<()> {
        sqlx::query("UPDATE transfer_tasks SET bytes_transferred = $2 WHERE id = $1")
            .bind(id)
            .bind(bytes as i64)
            .execute(&self.pool)
            .await
            .map_err(db_error("record progress"))?;
        Ok(())
    }

    async fn delete_terminal_older_than(&self, cutoff: DateTime<Utc>) -> ArcaResult<u64> {
        let sweepable: Vec<String> = [TaskStatus::Archived, TaskStatus::Completed, TaskStatus::Failed]
            .iter()
            .map(ToString::to_string)
            .collect();
        let result = sqlx::query(
            r#"
            DELETE FROM transfer_tasks
            WHERE status = ANY($1) AND updated_at < $2
              AND (family = $3 OR EXISTS (
                  SELECT 1 FROM task_results r WHERE r.id = transfer_tasks.id
              ))
            "#,
        )
        .bind(&sweepable)
        .bind(cutoff)
        .bind(TaskFamily::UploadQueue.to_string())
        .execute(&self.pool)
        .await
        .map_err(db_error("delete expired tasks"))?;
        Ok(result.rows_affected())
    }

    #[tracing::instrument(skip(self, result), fields(result_id = %result.id))]
    async fn upsert_result(&self, result: &TaskResult) -> ArcaResult<()> {
        let detail = serde_json::to_value(&result.detail)?;
        sqlx::query(
            r#"
            INSERT INTO task_results (
                id, family, owner_user_id, owner_doc, data_transfer_type, result, message,
                detail, created_at, completed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                result = EXCLUDED.result,
                message = EXCLUDED.message,
                detail = EXCLUDED.detail,
                completed_at = EXCLUDED.completed_at
            "#,
        )
        .bind(result.id)
        .bind(result.family.to_string())
        .bind(&result.owner.user_id)
        .bind(&result.owner.doc)
        .bind(result.data_transfer_type.to_string())
        .bind(result.result)
        .bind(&result.message)
        .bind(detail)
        .bind(result.created_at)
        .bind(result.completed_at)
        .execute(&self.pool)
        .await
        .map_err(db_error("upsert task result"))?;
        Ok(())
    }

    async fn get_result(&self, id: Uuid) -> ArcaResult<Option<TaskResult>> {
        let sql = format!("SELECT {} FROM task_results WHERE id = $1", RESULT_COLUMNS);
        let row = sqlx::query_as::<_, ResultRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("get task result"))?;
        row.map(ResultRow::into_result)
            .transpose()
            .map_err(decode_error)
    }

    async fn list_results(
        &self,
        family: Option<TaskFamily>,
        scope: Option<&OwnerScope>,
        offset: i64,
        limit: i64,
    ) -> ArcaResult<Vec<TaskResult>> {
        let (filter, binds) = result_filters(family, scope);
        let bind_count = binds.len() + 1;
        let sql = format!(
            "SELECT {} FROM task_results {} ORDER BY completed_at DESC, id ASC LIMIT ${} OFFSET ${}",
            RESULT_COLUMNS,
            filter,
            bind_count,
            bind_count + 1
        );

        let mut query_builder = sqlx::query_as::<_, ResultRow>(&sql);
        for value in binds {
            query_builder = query_builder.bind(value);
        }
        let rows = query_builder
            .bind(limit.max(0))
            .bind(offset.max(0))
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("list task results"))?;

        rows.into_iter()
            .map(ResultRow::into_result)
            .collect::<anyhow::Result<Vec<_>>>()
            .map_err(decode_error)
    }

    async fn count_results(
        &self,
        family: Option<TaskFamily>,
        scope: Option<&OwnerScope>,
    ) -> ArcaResult<i64> {
        let (filter, binds) = result_filters(family, scope);
        let sql = format!("SELECT COUNT(*) FROM task_results {}", filter);
        let mut query_builder = sqlx::query_scalar::<_, i64>(&sql);
        for value in binds {
            query_builder = query_builder.bind(value);
        }
        query_builder
            .fetch_one(&self.pool)
            .await
            .map_err(db_error("count task results"))
    }
}
