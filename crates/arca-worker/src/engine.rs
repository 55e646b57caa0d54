//! Task engine
//!
//! Entry points for uploads, downloads, migrations and bulk registrations. Each
//! one persists a task and returns it right away. Transfers running on the
//! shared pool report back through a [`TaskCompletionListener`]; batch work
//! (bulk registration, collection migration) runs on a spawned tokio task and
//! aggregates per-item outcomes.

use arca_core::models::{
    ArchiveDestination, BulkRegistrationItem, BulkRegistrationResult, BulkRegistrationTask,
    DataTransferType, DownloadRequest, DownloadTask, FileLocation, ItemResult, ItemStatus,
    MetadataEntry, MigrationTask, MigrationType, OwnerScope, ProviderTag, TaskFamily, TaskKind,
    TaskOwner, TaskQuery, TaskResult, TaskStatus, TransferStatus, TransferTask,
    UploadPartETag, UploadQueueEntry, UploadRequest, UploadSource,
};
use arca_core::{ArcaError, ArcaResult, ErrorMetadata, LogLevel};
use arca_db::TaskStore;
use arca_storage::{
    completion_channel, ConnectionRegistry, ProgressListener, TransferCompletion,
    TransferOutcome, TransferProxy,
};
use chrono::{Duration as ChronoDuration, Utc};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use uuid::Uuid;

use crate::catalog::{
    join_key, ArchiveCatalog, ArchiveConfiguration, DefaultDestinationResolver,
    DestinationResolver,
};
use crate::completion::{record_outcome, write_result, TaskCompletionListener};

/// Failure reason given to transfers cut off by a process restart.
pub const INTERRUPTED_REASON: &str = "transfer interrupted by service restart";

/// Failure reason given to URL uploads nobody used before the URL lapsed.
pub const URL_EXPIRED_REASON: &str = "Presigned upload URL expired";

#[derive(Debug, Clone)]
pub struct UploadSubmission {
    pub archive_configuration_id: String,
    pub request: UploadRequest,
    pub metadata: Vec<MetadataEntry>,
    /// Queue the upload for the sweep instead of starting it now.
    pub defer: bool,
}

#[derive(Debug, Clone)]
pub struct MigrationSubmission {
    pub source_configuration_id: String,
    /// Object (or collection prefix) in the source archive.
    pub source_location: FileLocation,
    pub target_configuration_id: String,
    /// Catalog path in the target archive.
    pub target_path: String,
}

/// What a status poll found: the working task, or the result it left behind.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskView {
    Active(TransferTask),
    Finished(TaskResult),
}

impl TaskView {
    pub fn status(&self) -> TaskStatus {
        match self {
            TaskView::Active(task) => task.status,
            // Partial success of a batch is still a completed batch; only a
            // task that failed as a whole carries a message.
            TaskView::Finished(result) if result.result || result.message.is_none() => {
                TaskStatus::Completed
            }
            TaskView::Finished(_) => TaskStatus::Failed,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TaskPage {
    pub tasks: Vec<TransferTask>,
    pub total: i64,
}

#[derive(Debug, Clone)]
pub struct ResultPage {
    pub results: Vec<TaskResult>,
    pub total: i64,
}

pub struct TaskEngine {
    registry: Arc<ConnectionRegistry>,
    store: Arc<dyn TaskStore>,
    catalog: Arc<dyn ArchiveCatalog>,
    resolver: Arc<dyn DestinationResolver>,
}

impl TaskEngine {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        store: Arc<dyn TaskStore>,
        catalog: Arc<dyn ArchiveCatalog>,
    ) -> Self {
        Self {
            registry,
            store,
            catalog,
            resolver: Arc::new(DefaultDestinationResolver),
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn DestinationResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    /// Submits an upload. Streaming uploads return in STREAMING_IN_PROGRESS,
    /// URL uploads in URL_GENERATED, local files once archived. Deferred uploads,
    /// and streaming uploads arriving while the pool is saturated, stay RECEIVED
    /// until the sweep dispatches them.
    #[tracing::instrument(
        skip(self, owner, submission),
        fields(archive = %submission.archive_configuration_id, path = %submission.request.path)
    )]
    pub async fn upload_data_object(
        &self,
        owner: TaskOwner,
        submission: UploadSubmission,
    ) -> ArcaResult<TransferTask> {
        let archive = self
            .catalog
            .archive(&submission.archive_configuration_id)
            .await?;
        let destination = self.resolve(&archive, &submission.request)?;
        let queue = submission.defer
            || (submission.request.is_streaming() && self.registry.pool().is_saturated());

        let mut task = TransferTask::new(
            owner,
            submission.request.data_transfer_type(),
            TaskKind::UploadQueue(UploadQueueEntry {
                archive_configuration_id: archive.id.clone(),
                request: submission.request,
                metadata: submission.metadata,
                storage_class: archive.storage_class.clone(),
                destination: Some(destination),
                response: None,
            }),
        );
        let task_id = self.store.upsert(&mut task).await?;

        if queue {
            tracing::info!(
                task_id = %task_id,
                deferred = submission.defer,
                pool_in_flight = self.registry.pool().in_flight(),
                "Upload queued"
            );
            return Ok(task);
        }
        self.dispatch_upload(task).await
    }

    /// Starts a RECEIVED upload. On failure the task is marked FAILED and the
    /// error is returned.
    pub(crate) async fn dispatch_upload(&self, mut task: TransferTask) -> ArcaResult<TransferTask> {
        let task_id = id_of(&task)?;
        match self.try_dispatch_upload(&mut task, task_id).await {
            Ok(()) => Ok(task),
            Err(e) => {
                self.fail_task(task_id, &e).await;
                Err(e)
            }
        }
    }

    async fn try_dispatch_upload(&self, task: &mut TransferTask, task_id: Uuid) -> ArcaResult<()> {
        let TaskKind::UploadQueue(entry) = &task.kind else {
            return Err(ArcaError::Unexpected(format!(
                "task {} is not an upload",
                task_id
            )));
        };
        let entry = entry.clone();
        let archive = self.catalog.archive(&entry.archive_configuration_id).await?;
        let destination = match &entry.destination {
            Some(destination) => destination.clone(),
            None => self.resolve(&archive, &entry.request)?,
        };
        let proxy = self.registry.proxy_for(&archive.account).await?;

        let streaming = entry.request.is_streaming();
        let mut gate = None;
        let mut listener: Option<Arc<dyn ProgressListener>> = None;
        if streaming {
            task.status = TaskStatus::StreamingInProgress;
            task.in_process = true;
            task.touch();
            self.store.upsert(task).await?;

            let success = TaskStatus::from(TransferStatus::archived_in(destination.archive_type));
            let (task_listener, task_gate) =
                TaskCompletionListener::new(self.store.clone(), task_id, success);
            listener = Some(task_listener);
            gate = Some(task_gate);
        }

        let response = proxy
            .upload_data_object(
                &entry.request,
                &destination,
                &entry.metadata,
                entry.storage_class.as_deref(),
                listener,
            )
            .await?;

        task.status = TaskStatus::from(response.status);
        task.request_id = response.request_id.clone();
        task.in_process = streaming;
        if response.status != TransferStatus::StreamingInProgress
            && response.transfer_completed.is_some()
        {
            task.bytes_transferred = response.source_size.unwrap_or_default();
        }
        if let TaskKind::UploadQueue(stored) = &mut task.kind {
            stored.destination = Some(destination);
            stored.response = Some(response);
        }
        task.touch();
        self.store.upsert(task).await?;
        if let Some(gate) = gate {
            gate.open();
        }

        tracing::info!(
            task_id = %task_id,
            status = %task.status,
            method = ?entry.request.transfer_method(),
            "Upload dispatched"
        );
        Ok(())
    }

    /// Submits a download. The transfer always runs on the pool; its outcome
    /// moves the task to COMPLETED or FAILED and writes the result record.
    #[tracing::instrument(
        skip(self, owner, download),
        fields(archive = %download.archive_configuration_id, location = %download.archive_location)
    )]
    pub async fn download_data_object(
        &self,
        owner: TaskOwner,
        download: DownloadTask,
    ) -> ArcaResult<TransferTask> {
        let archive = self
            .catalog
            .archive(&download.archive_configuration_id)
            .await?;
        let proxy = self.registry.proxy_for(&archive.account).await?;

        let request = DownloadRequest {
            archive_location: download.archive_location.clone(),
            destination: download.destination.clone(),
            size: download.size_bytes,
            archive_url: None,
        };
        let mut task = TransferTask::new(
            owner,
            data_transfer_type(archive.account.provider),
            TaskKind::Download(download),
        );
        task.status = TaskStatus::StreamingInProgress;
        task.in_process = true;
        let task_id = self.store.upsert(&mut task).await?;

        let (listener, gate) =
            TaskCompletionListener::new(self.store.clone(), task_id, TaskStatus::Completed);
        match proxy.download_data_object(&request, Some(listener)).await {
            Ok(request_id) => {
                task.request_id = Some(request_id);
                task.touch();
                self.store.upsert(&mut task).await?;
                gate.open();
                tracing::info!(task_id = %task_id, "Download dispatched");
                Ok(task)
            }
            Err(e) => {
                drop(gate);
                self.fail_task(task_id, &e).await;
                Err(e)
            }
        }
    }

    /// Streams one archived object into another archive.
    #[tracing::instrument(
        skip(self, owner, submission),
        fields(source = %submission.source_location, target = %submission.target_configuration_id)
    )]
    pub async fn migrate_data_object(
        &self,
        owner: TaskOwner,
        submission: MigrationSubmission,
    ) -> ArcaResult<TransferTask> {
        let source = self
            .catalog
            .archive(&submission.source_configuration_id)
            .await?;
        let target = self
            .catalog
            .archive(&submission.target_configuration_id)
            .await?;
        let destination = self.resolver.resolve_destination(
            &target.base_location,
            &submission.target_path,
            None,
            target.archive_type,
        )?;

        let mut task = TransferTask::new(
            owner,
            DataTransferType::S3,
            TaskKind::Migration(MigrationTask {
                source_configuration_id: source.id.clone(),
                source_location: submission.source_location.clone(),
                target_configuration_id: target.id.clone(),
                target_path: submission.target_path.clone(),
                migration_type: MigrationType::DataObject,
                items: vec![ItemResult::pending(&submission.target_path)],
            }),
        );
        task.status = TaskStatus::StreamingInProgress;
        task.in_process = true;
        let task_id = self.store.upsert(&mut task).await?;

        let request = migration_request(&source, &submission.source_location, &submission.target_path, None);
        let (listener, gate) =
            TaskCompletionListener::new(self.store.clone(), task_id, TaskStatus::Completed);
        let started = async {
            let proxy = self.registry.proxy_for(&target.account).await?;
            proxy
                .upload_data_object(
                    &request,
                    &destination,
                    &[],
                    target.storage_class.as_deref(),
                    Some(listener),
                )
                .await
        }
        .await;

        match started {
            Ok(response) => {
                task.request_id = response.request_id;
                task.touch();
                self.store.upsert(&mut task).await?;
                gate.open();
                tracing::info!(task_id = %task_id, "Migration dispatched");
                Ok(task)
            }
            Err(e) => {
                drop(gate);
                self.fail_task(task_id, &e).await;
                Err(e)
            }
        }
    }

    /// Migrates every object under a collection prefix. Returns the task in
    /// IN_PROGRESS; the scan and the transfers run in the background.
    #[tracing::instrument(
        skip(self, owner, submission),
        fields(source = %submission.source_location, target = %submission.target_configuration_id)
    )]
    pub async fn migrate_collection(
        self: &Arc<Self>,
        owner: TaskOwner,
        submission: MigrationSubmission,
    ) -> ArcaResult<TransferTask> {
        let source = self
            .catalog
            .archive(&submission.source_configuration_id)
            .await?;
        let target = self
            .catalog
            .archive(&submission.target_configuration_id)
            .await?;

        let mut task = TransferTask::new(
            owner,
            DataTransferType::S3,
            TaskKind::Migration(MigrationTask {
                source_configuration_id: source.id.clone(),
                source_location: submission.source_location.clone(),
                target_configuration_id: target.id.clone(),
                target_path: submission.target_path.clone(),
                migration_type: MigrationType::Collection,
                items: Vec::new(),
            }),
        );
        task.status = TaskStatus::InProgress;
        task.in_process = true;
        let task_id = self.store.upsert(&mut task).await?;

        let engine = Arc::clone(self);
        let working = task.clone();
        tokio::spawn(async move {
            engine
                .run_collection_migration(working, source, target, submission)
                .await;
        });

        tracing::info!(task_id = %task_id, "Collection migration started");
        Ok(task)
    }

    async fn run_collection_migration(
        &self,
        mut task: TransferTask,
        source: ArchiveConfiguration,
        target: ArchiveConfiguration,
        submission: MigrationSubmission,
    ) {
        let Some(task_id) = task.id else { return };

        let objects = match self.scan_collection(&source, &submission.source_location).await {
            Ok(objects) => objects,
            Err(e) => {
                self.fail_task(task_id, &e).await;
                return;
            }
        };
        tracing::info!(task_id = %task_id, objects = objects.len(), "Collection scanned");

        let transfers = objects.iter().map(|(location, size)| {
            let relative = location
                .object_id
                .strip_prefix(submission.source_location.object_id.as_str())
                .unwrap_or(&location.object_id);
            let target_path = format!("/{}", join_key(&submission.target_path, relative));
            self.migrate_item(&source, &target, location, *size, target_path)
        }).collect::<Vec<_>>();
        let items: Vec<ItemResult> = stream::iter(transfers)
            .buffered(self.batch_concurrency())
            .collect()
            .await;

        let failed = items
            .iter()
            .filter(|item| item.status == ItemStatus::Failed)
            .count();
        let total = items.len();
        if let TaskKind::Migration(migration) = &mut task.kind {
            migration.items = items;
        }
        if total > 0 && failed == total {
            task.status = TaskStatus::Failed;
            task.failure_reason = Some(format!("none of the {} objects could be migrated", total));
        } else {
            task.status = TaskStatus::Completed;
        }
        task.in_process = false;
        task.touch();

        let stored = async {
            self.store.upsert(&mut task).await?;
            write_result(self.store.as_ref(), &task).await
        }
        .await;
        if let Err(e) = stored {
            tracing::error!(error = %e, task_id = %task_id, "Failed to store migration outcome");
            return;
        }
        tracing::info!(
            task_id = %task_id,
            status = %task.status,
            total,
            failed,
            "Collection migration finished"
        );
    }

    async fn scan_collection(
        &self,
        source: &ArchiveConfiguration,
        location: &FileLocation,
    ) -> ArcaResult<Vec<(FileLocation, u64)>> {
        let proxy = self.registry.proxy_for(&source.account).await?;
        let items = proxy.scan_directory(location).await?;
        Ok(items
            .into_iter()
            .map(|item| {
                (
                    FileLocation::new(&location.container_id, item.path),
                    item.size,
                )
            })
            .collect())
    }

    async fn migrate_item(
        &self,
        source: &ArchiveConfiguration,
        target: &ArchiveConfiguration,
        location: &FileLocation,
        size: u64,
        target_path: String,
    ) -> ItemResult {
        let request = migration_request(source, location, &target_path, Some(size));
        let outcome = async {
            let destination = self.resolver.resolve_destination(
                &target.base_location,
                &target_path,
                None,
                target.archive_type,
            )?;
            let proxy = self.registry.proxy_for(&target.account).await?;
            Ok::<_, ArcaError>((proxy, destination))
        }
        .await;

        let result = match outcome {
            Ok((proxy, destination)) => {
                upload_to_end(
                    proxy.as_ref(),
                    &request,
                    &destination,
                    &[],
                    target.storage_class.as_deref(),
                )
                .await
            }
            Err(e) => Err(e.to_string()),
        };
        item_result(target_path, result)
    }

    /// Registers a batch of objects into one archive. Returns the task in
    /// IN_PROGRESS; items run concurrently in the background. When every item
    /// has an outcome the result record is written and the working task deleted.
    #[tracing::instrument(skip(self, owner, items), fields(archive = %archive_configuration_id, items = items.len()))]
    pub async fn register_bulk_data_objects(
        self: &Arc<Self>,
        owner: TaskOwner,
        archive_configuration_id: &str,
        items: Vec<BulkRegistrationItem>,
    ) -> ArcaResult<TransferTask> {
        if items.is_empty() {
            return Err(ArcaError::invalid_request(
                "bulk registration needs at least one item",
            ));
        }
        let archive = self.catalog.archive(archive_configuration_id).await?;

        let result = BulkRegistrationResult {
            items: items
                .iter()
                .map(|item| ItemResult::pending(&item.request.path))
                .collect(),
        };
        let mut task = TransferTask::new(
            owner,
            data_transfer_type(archive.account.provider),
            TaskKind::BulkRegistration(BulkRegistrationTask {
                archive_configuration_id: archive.id.clone(),
                items,
                result,
            }),
        );
        task.status = TaskStatus::InProgress;
        task.in_process = true;
        let task_id = self.store.upsert(&mut task).await?;

        let engine = Arc::clone(self);
        let working = task.clone();
        tokio::spawn(async move {
            engine.run_bulk_registration(working, archive).await;
        });

        tracing::info!(task_id = %task_id, "Bulk registration started");
        Ok(task)
    }

    async fn run_bulk_registration(&self, mut task: TransferTask, archive: ArchiveConfiguration) {
        let Some(task_id) = task.id else { return };
        let TaskKind::BulkRegistration(bulk) = &task.kind else {
            return;
        };

        let outcomes: Vec<ItemResult> = stream::iter(
            bulk.items
                .iter()
                .map(|item| self.register_item(&archive, item))
                .collect::<Vec<_>>(),
        )
        .buffered(self.batch_concurrency())
        .collect()
        .await;

        let result = BulkRegistrationResult { items: outcomes };
        let (succeeded, failed) = (result.success_count(), result.failure_count());
        if let TaskKind::BulkRegistration(bulk) = &mut task.kind {
            bulk.result = result;
        }
        task.status = TaskStatus::Completed;
        task.in_process = false;
        task.touch();

        if let Err(e) = write_result(self.store.as_ref(), &task).await {
            tracing::error!(error = %e, task_id = %task_id, "Failed to store bulk registration result");
            return;
        }
        tracing::info!(
            task_id = %task_id,
            succeeded,
            failed,
            "Bulk registration finished"
        );
    }

    async fn register_item(
        &self,
        archive: &ArchiveConfiguration,
        item: &BulkRegistrationItem,
    ) -> ItemResult {
        let path = item.request.path.clone();
        if matches!(item.request.source, UploadSource::UploadUrl { .. }) {
            return item_result(
                path,
                Err("pre-signed URL uploads cannot be bulk registered".to_string()),
            );
        }

        let prepared = async {
            let destination = self.resolve(archive, &item.request)?;
            let proxy = self.registry.proxy_for(&archive.account).await?;
            Ok::<_, ArcaError>((proxy, destination))
        }
        .await;

        let result = match prepared {
            Ok((proxy, destination)) => {
                upload_to_end(
                    proxy.as_ref(),
                    &item.request,
                    &destination,
                    &item.metadata,
                    archive.storage_class.as_deref(),
                )
                .await
            }
            Err(e) => Err(e.to_string()),
        };
        item_result(path, result)
    }

    /// Finishes a single-part URL upload once the caller reports it done.
    #[tracing::instrument(skip(self))]
    pub async fn complete_url_upload(&self, task_id: Uuid) -> ArcaResult<TransferTask> {
        let (task, entry, destination) = self.url_generated_upload(task_id).await?;
        let archive = self.catalog.archive(&entry.archive_configuration_id).await?;
        let proxy = self.registry.proxy_for(&archive.account).await?;
        let metadata = proxy.get_data_object_metadata(&destination.location).await?;

        self.finish_url_upload(task, destination, metadata.checksum)
            .await
    }

    /// Completes a multipart URL upload with the part ETags the caller collected.
    #[tracing::instrument(skip(self, parts), fields(parts = parts.len()))]
    pub async fn complete_multipart_upload(
        &self,
        task_id: Uuid,
        parts: &[UploadPartETag],
    ) -> ArcaResult<TransferTask> {
        let (task, entry, destination) = self.url_generated_upload(task_id).await?;
        let multipart = entry
            .response
            .as_ref()
            .and_then(|response| response.multipart_upload.as_ref())
            .ok_or_else(|| {
                ArcaError::invalid_request(format!("upload {} is not a multipart upload", task_id))
            })?;
        let archive = self.catalog.archive(&entry.archive_configuration_id).await?;
        let proxy = self.registry.proxy_for(&archive.account).await?;
        let checksum = proxy
            .complete_multipart_upload(
                &destination.location,
                &multipart.id,
                multipart.parts.len() as u32,
                parts,
            )
            .await?;

        self.finish_url_upload(task, destination, checksum).await
    }

    async fn url_generated_upload(
        &self,
        task_id: Uuid,
    ) -> ArcaResult<(TransferTask, UploadQueueEntry, ArchiveDestination)> {
        let task = self.load(task_id, TaskFamily::UploadQueue).await?;
        if task.status != TaskStatus::UrlGenerated {
            return Err(ArcaError::invalid_request(format!(
                "upload {} is {}, not url_generated",
                task_id, task.status
            )));
        }
        let TaskKind::UploadQueue(entry) = &task.kind else {
            return Err(ArcaError::Unexpected(format!("task {} is not an upload", task_id)));
        };
        let entry = entry.clone();
        let destination = entry.destination.clone().ok_or_else(|| {
            ArcaError::Unexpected(format!("upload {} has no destination", task_id))
        })?;
        Ok((task, entry, destination))
    }

    async fn finish_url_upload(
        &self,
        task: TransferTask,
        destination: ArchiveDestination,
        checksum: String,
    ) -> ArcaResult<TransferTask> {
        let task_id = id_of(&task)?;
        let success = TaskStatus::from(TransferStatus::archived_in(destination.archive_type));
        let completion = TransferCompletion {
            bytes_transferred: task.bytes_transferred,
            checksum: Some(checksum),
        };
        record_outcome(
            self.store.as_ref(),
            task_id,
            success,
            TransferOutcome::Completed(completion),
        )
        .await?;
        self.load(task_id, TaskFamily::UploadQueue).await
    }

    /// Re-submits a FAILED task as a new task with the same source and destination.
    #[tracing::instrument(skip(self))]
    pub async fn retry_task(self: &Arc<Self>, task_id: Uuid) -> ArcaResult<TransferTask> {
        let failed = self
            .store
            .get(task_id)
            .await?
            .ok_or_else(|| ArcaError::NotFound(format!("task {}", task_id)))?;
        if failed.status != TaskStatus::Failed {
            return Err(ArcaError::invalid_request(format!(
                "only failed tasks can be retried, task {} is {}",
                task_id, failed.status
            )));
        }

        let owner = failed.owner.clone();
        let retried = match failed.kind {
            TaskKind::UploadQueue(entry) => {
                self.upload_data_object(
                    owner,
                    UploadSubmission {
                        archive_configuration_id: entry.archive_configuration_id,
                        request: entry.request,
                        metadata: entry.metadata,
                        defer: false,
                    },
                )
                .await?
            }
            TaskKind::Download(download) => self.download_data_object(owner, download).await?,
            TaskKind::Migration(migration) => {
                let submission = MigrationSubmission {
                    source_configuration_id: migration.source_configuration_id,
                    source_location: migration.source_location,
                    target_configuration_id: migration.target_configuration_id,
                    target_path: migration.target_path,
                };
                match migration.migration_type {
                    MigrationType::DataObject => self.migrate_data_object(owner, submission).await?,
                    MigrationType::Collection => self.migrate_collection(owner, submission).await?,
                }
            }
            TaskKind::BulkRegistration(bulk) => {
                self.register_bulk_data_objects(owner, &bulk.archive_configuration_id, bulk.items)
                    .await?
            }
        };

        tracing::info!(
            task_id = %task_id,
            retry_task_id = ?retried.id,
            "Task retried"
        );
        Ok(retried)
    }

    pub async fn get_task_status(&self, family: TaskFamily, task_id: Uuid) -> ArcaResult<TaskView> {
        if let Some(task) = self.store.get(task_id).await? {
            if task.family() == family {
                return Ok(TaskView::Active(task));
            }
        }
        match self.store.get_result(task_id).await? {
            Some(result) if result.family == family => Ok(TaskView::Finished(result)),
            _ => Err(ArcaError::NotFound(format!("{} task {}", family, task_id))),
        }
    }

    pub async fn get_upload_status(&self, task_id: Uuid) -> ArcaResult<TransferTask> {
        self.load(task_id, TaskFamily::UploadQueue).await
    }

    pub async fn get_download_status(&self, task_id: Uuid) -> ArcaResult<TaskView> {
        self.get_task_status(TaskFamily::Download, task_id).await
    }

    pub async fn get_migration_status(&self, task_id: Uuid) -> ArcaResult<TaskView> {
        self.get_task_status(TaskFamily::Migration, task_id).await
    }

    pub async fn get_bulk_registration_status(&self, task_id: Uuid) -> ArcaResult<TaskView> {
        self.get_task_status(TaskFamily::BulkRegistration, task_id)
            .await
    }

    pub async fn list_tasks(&self, query: &TaskQuery) -> ArcaResult<TaskPage> {
        Ok(TaskPage {
            tasks: self.store.list(query).await?,
            total: self.store.count(query).await?,
        })
    }

    pub async fn list_results(
        &self,
        family: Option<TaskFamily>,
        scope: Option<&OwnerScope>,
        offset: i64,
        limit: i64,
    ) -> ArcaResult<ResultPage> {
        Ok(ResultPage {
            results: self
                .store
                .list_results(family, scope, offset, limit)
                .await?,
            total: self.store.count_results(family, scope).await?,
        })
    }

    /// Fails tasks whose transfer died with the previous process and clears
    /// every `in_process` flag. Returns the number of tasks failed.
    #[tracing::instrument(skip(self))]
    pub async fn recover_on_startup(&self) -> ArcaResult<usize> {
        let mut interrupted = Vec::new();
        for status in [TaskStatus::StreamingInProgress, TaskStatus::InProgress] {
            interrupted.extend(
                self.store
                    .list(&TaskQuery {
                        status: Some(status),
                        ..TaskQuery::default()
                    })
                    .await?,
            );
        }

        let mut failed = 0;
        for task in interrupted {
            let Some(task_id) = task.id else { continue };
            match record_outcome(
                self.store.as_ref(),
                task_id,
                TaskStatus::Failed,
                TransferOutcome::Failed(INTERRUPTED_REASON.to_string()),
            )
            .await
            {
                Ok(true) => failed += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(error = %e, task_id = %task_id, "Failed to recover task")
                }
            }
        }

        let reset = self.store.reset_in_process().await?;
        tracing::info!(failed, reset, "Recovered tasks interrupted by restart");
        Ok(failed)
    }

    /// Starts queued uploads, oldest first, while the pool has room.
    pub async fn dispatch_upload_queue(&self) -> ArcaResult<usize> {
        let mut queued = self
            .store
            .list(&TaskQuery {
                family: Some(TaskFamily::UploadQueue),
                status: Some(TaskStatus::Received),
                ..TaskQuery::default()
            })
            .await?;
        queued.reverse();

        let mut dispatched = 0;
        for mut task in queued {
            let Some(task_id) = task.id else { continue };
            if task.in_process {
                continue;
            }
            if self.registry.pool().is_saturated() {
                tracing::debug!("Transfer pool saturated, leaving uploads queued");
                break;
            }
            // Claimed so an overlapping pass leaves it alone.
            self.store.set_in_process(task_id, true).await?;
            task.in_process = true;
            match self.dispatch_upload(task).await {
                Ok(_) => dispatched += 1,
                Err(e) => {
                    tracing::warn!(error = %e, task_id = %task_id, "Queued upload failed to start")
                }
            }
        }
        Ok(dispatched)
    }

    /// Settles URL uploads the caller never completed: archived once the object
    /// is in the archive, FAILED once the upload URL has lapsed.
    /// Returns the counts of (archived, expired) uploads.
    pub async fn resolve_url_uploads(&self) -> ArcaResult<(usize, usize)> {
        let pending = self
            .store
            .list(&TaskQuery {
                family: Some(TaskFamily::UploadQueue),
                status: Some(TaskStatus::UrlGenerated),
                ..TaskQuery::default()
            })
            .await?;

        let (mut archived, mut expired) = (0, 0);
        for task in pending {
            let task_id = task.id;
            match self.resolve_url_upload(task).await {
                Ok(UrlUploadState::Archived) => archived += 1,
                Ok(UrlUploadState::Expired) => expired += 1,
                Ok(UrlUploadState::Waiting) => {}
                Err(e) => {
                    tracing::warn!(error = %e, task_id = ?task_id, "Failed to check URL upload")
                }
            }
        }
        Ok((archived, expired))
    }

    async fn resolve_url_upload(&self, task: TransferTask) -> ArcaResult<UrlUploadState> {
        let task_id = id_of(&task)?;
        let TaskKind::UploadQueue(entry) = &task.kind else {
            return Ok(UrlUploadState::Waiting);
        };
        let Some(destination) = entry.destination.clone() else {
            return Ok(UrlUploadState::Waiting);
        };
        let archive_id = entry.archive_configuration_id.clone();
        let started = entry
            .response
            .as_ref()
            .map(|response| response.transfer_started)
            .unwrap_or(task.created_at);
        let hours = match &entry.request.source {
            UploadSource::UploadUrl {
                expiration_hours: Some(hours),
                ..
            } => *hours,
            _ => self.registry.config().upload_url_expiration_hours,
        };

        let archive = self.catalog.archive(&archive_id).await?;
        let proxy = self.registry.proxy_for(&archive.account).await?;
        let attributes = proxy
            .get_path_attributes(&destination.location, false)
            .await?;
        if attributes.exists && attributes.is_file {
            let metadata = proxy.get_data_object_metadata(&destination.location).await?;
            self.finish_url_upload(task, destination, metadata.checksum)
                .await?;
            return Ok(UrlUploadState::Archived);
        }

        if Utc::now() < started + ChronoDuration::hours(i64::from(hours)) {
            return Ok(UrlUploadState::Waiting);
        }
        let recorded = record_outcome(
            self.store.as_ref(),
            task_id,
            TaskStatus::Failed,
            TransferOutcome::Failed(URL_EXPIRED_REASON.to_string()),
        )
        .await?;
        Ok(if recorded {
            UrlUploadState::Expired
        } else {
            UrlUploadState::Waiting
        })
    }

    /// Items of one batch in flight at a time. Keeps open files and upload
    /// buffers within what the transfer pool is sized for.
    fn batch_concurrency(&self) -> usize {
        self.registry.pool().size().max(1)
    }

    async fn load(&self, task_id: Uuid, family: TaskFamily) -> ArcaResult<TransferTask> {
        match self.store.get(task_id).await? {
            Some(task) if task.family() == family => Ok(task),
            _ => Err(ArcaError::NotFound(format!("{} task {}", family, task_id))),
        }
    }

    fn resolve(
        &self,
        archive: &ArchiveConfiguration,
        request: &UploadRequest,
    ) -> ArcaResult<ArchiveDestination> {
        self.resolver.resolve_destination(
            &archive.base_location,
            &request.path,
            request.caller_object_id.as_deref(),
            archive.archive_type,
        )
    }

    async fn fail_task(&self, task_id: Uuid, error: &ArcaError) {
        log_task_error(task_id, error);
        if let Err(e) = record_outcome(
            self.store.as_ref(),
            task_id,
            TaskStatus::Failed,
            TransferOutcome::Failed(error.to_string()),
        )
        .await
        {
            tracing::error!(error = %e, task_id = %task_id, "Failed to mark task failed");
        }
    }
}

enum UrlUploadState {
    Waiting,
    Archived,
    Expired,
}

fn log_task_error(task_id: Uuid, error: &ArcaError) {
    let code = error.error_code();
    let recoverable = error.is_recoverable();
    match error.log_level() {
        LogLevel::Debug => {
            tracing::debug!(error = %error, code, recoverable, task_id = %task_id, "Task rejected")
        }
        LogLevel::Warn => {
            tracing::warn!(error = %error, code, recoverable, task_id = %task_id, "Task failed to start")
        }
        LogLevel::Error => {
            tracing::error!(error = %error, code, recoverable, task_id = %task_id, "Task failed to start")
        }
    }
}

fn id_of(task: &TransferTask) -> ArcaResult<Uuid> {
    task.id
        .ok_or_else(|| ArcaError::Unexpected("task has not been stored".to_string()))
}

fn data_transfer_type(provider: ProviderTag) -> DataTransferType {
    match provider {
        ProviderTag::GoogleDrive => DataTransferType::GoogleDrive,
        ProviderTag::GoogleCloudStorage => DataTransferType::GoogleCloudStorage,
        _ => DataTransferType::S3,
    }
}

fn migration_request(
    source: &ArchiveConfiguration,
    location: &FileLocation,
    target_path: &str,
    size: Option<u64>,
) -> UploadRequest {
    UploadRequest {
        path: target_path.to_string(),
        caller_object_id: None,
        source: UploadSource::Provider {
            account: source.account.clone(),
            location: location.clone(),
        },
        source_size: size,
    }
}

fn item_result(path: String, outcome: Result<Option<String>, String>) -> ItemResult {
    match outcome {
        Ok(checksum) => ItemResult::success(path, checksum),
        Err(reason) => {
            tracing::warn!(path = %path, reason = %reason, "Item failed");
            ItemResult::failed(path, reason)
        }
    }
}

/// Runs one upload to its end, waiting on a completion channel when it streams.
/// Returns the checksum, or the failure reason.
async fn upload_to_end(
    proxy: &dyn TransferProxy,
    request: &UploadRequest,
    destination: &ArchiveDestination,
    metadata: &[MetadataEntry],
    storage_class: Option<&str>,
) -> Result<Option<String>, String> {
    if !request.is_streaming() {
        return proxy
            .upload_data_object(request, destination, metadata, storage_class, None)
            .await
            .map(|response| response.checksum)
            .map_err(|e| e.to_string());
    }

    let (listener, receiver) = completion_channel();
    let listener: Arc<dyn ProgressListener> = listener;
    proxy
        .upload_data_object(request, destination, metadata, storage_class, Some(listener))
        .await
        .map_err(|e| e.to_string())?;
    match receiver.outcome().await {
        TransferOutcome::Completed(completion) => Ok(completion.checksum),
        TransferOutcome::Failed(reason) => Err(reason),
    }
}
