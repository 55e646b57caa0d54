//! Task engine scenarios against in-memory providers and an in-memory task store.

use std::sync::Arc;
use std::time::Duration;

use arca_core::models::{
    ArchiveType, BulkRegistrationItem, BulkRegistrationResult, BulkRegistrationTask,
    DataTransferType, DownloadDestination, DownloadTask, Endpoint, FileLocation, ItemResult,
    ItemStatus, MetadataEntry, MigrationTask, MigrationType, ProviderAccount, ProviderTag,
    TaskFamily, TaskKind, TaskOwner, TaskResult, TaskResultDetail, TaskStatus, TransferStatus,
    TransferTask, UploadPartETag, UploadRequest, UploadSource,
};
use arca_core::{ArcaError, TransferConfig};
use arca_db::{InMemoryTaskStore, TaskStore};
use arca_storage::memory::{content_etag, InMemoryObjectStore, MemoryClientFactory};
use arca_storage::ConnectionRegistry;
use arca_worker::{
    ArchiveConfiguration, MigrationSubmission, StaticArchiveCatalog, SweepConfig, SweepService,
    TaskEngine, TaskView, UploadSubmission, INTERRUPTED_REASON, URL_EXPIRED_REASON,
};
use uuid::Uuid;

struct Fixture {
    engine: Arc<TaskEngine>,
    store: Arc<dyn TaskStore>,
    archive: Arc<InMemoryObjectStore>,
    cold: Arc<InMemoryObjectStore>,
    source: Arc<InMemoryObjectStore>,
    source_account: ProviderAccount,
}

fn account(access_key: &str) -> ProviderAccount {
    ProviderAccount::with_keys(ProviderTag::Aws, access_key, "sk", Endpoint::Default)
}

fn owner() -> TaskOwner {
    TaskOwner::new("jdoe", "NCI")
}

fn fixture() -> Fixture {
    fixture_with(TransferConfig::default())
}

fn fixture_with(config: TransferConfig) -> Fixture {
    let factory = Arc::new(MemoryClientFactory::new());
    let archive_account = account("archive-ak");
    let cold_account = account("cold-ak");
    let source_account = account("source-ak");

    let archive = factory.store_for(&archive_account);
    archive.create_bucket("archive");
    let cold = factory.store_for(&cold_account);
    cold.create_bucket("cold");
    let source = factory.store_for(&source_account);
    source.create_bucket("source");

    let catalog = StaticArchiveCatalog::new([
        ArchiveConfiguration {
            id: "archive-1".to_string(),
            account: archive_account.clone(),
            base_location: FileLocation::new("archive", "nci/project"),
            archive_type: ArchiveType::Archive,
            storage_class: None,
        },
        ArchiveConfiguration {
            id: "staging".to_string(),
            account: archive_account,
            base_location: FileLocation::new("archive", "staging"),
            archive_type: ArchiveType::TemporaryArchive,
            storage_class: None,
        },
        ArchiveConfiguration {
            id: "archive-2".to_string(),
            account: cold_account,
            base_location: FileLocation::new("cold", ""),
            archive_type: ArchiveType::Archive,
            storage_class: Some("GLACIER".to_string()),
        },
        ArchiveConfiguration {
            id: "source".to_string(),
            account: source_account.clone(),
            base_location: FileLocation::new("source", ""),
            archive_type: ArchiveType::Archive,
            storage_class: None,
        },
    ]);

    let registry = Arc::new(ConnectionRegistry::new(config, factory).unwrap());
    let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
    let engine = Arc::new(TaskEngine::new(registry, store.clone(), Arc::new(catalog)));

    Fixture {
        engine,
        store,
        archive,
        cold,
        source,
        source_account,
    }
}

fn provider_request(f: &Fixture, path: &str, key: &str) -> UploadRequest {
    UploadRequest {
        path: path.to_string(),
        caller_object_id: None,
        source: UploadSource::Provider {
            account: f.source_account.clone(),
            location: FileLocation::new("source", key),
        },
        source_size: None,
    }
}

fn upload(archive: &str, request: UploadRequest) -> UploadSubmission {
    UploadSubmission {
        archive_configuration_id: archive.to_string(),
        request,
        metadata: vec![MetadataEntry::new("project", "nci")],
        defer: false,
    }
}

/// Polls until the task leaves its working statuses.
async fn settled(engine: &TaskEngine, family: TaskFamily, id: Uuid) -> TaskView {
    for _ in 0..500 {
        let view = engine.get_task_status(family, id).await.unwrap();
        let done = match &view {
            TaskView::Active(task) => task.status.is_terminal(),
            TaskView::Finished(_) => true,
        };
        if done {
            return view;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {} did not settle", id);
}

async fn settled_task(engine: &TaskEngine, family: TaskFamily, id: Uuid) -> TransferTask {
    match settled(engine, family, id).await {
        TaskView::Active(task) => task,
        TaskView::Finished(result) => panic!("task {} already swept into {:?}", id, result),
    }
}

/// Result records land just after the terminal status.
async fn recorded_result(store: &dyn TaskStore, id: Uuid) -> TaskResult {
    for _ in 0..500 {
        if let Some(result) = store.get_result(id).await.unwrap() {
            return result;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("no result recorded for task {}", id);
}

fn url_upload(path: &str, expiration_hours: u32) -> UploadSubmission {
    upload(
        "archive-1",
        UploadRequest {
            path: path.to_string(),
            caller_object_id: None,
            source: UploadSource::UploadUrl {
                parts: 1,
                checksum: None,
                expiration_hours: Some(expiration_hours),
                completion: false,
            },
            source_size: None,
        },
    )
}

#[tokio::test]
async fn bulk_registration_keeps_sibling_items_when_one_write_fails() {
    let f = fixture();
    for (key, body) in [("a.bin", "first"), ("b.bin", "second"), ("c.bin", "third")] {
        f.source.insert_object("source", key, body);
    }
    f.archive.fail_writes_to("nci/project/b.bin");

    let items = ["a.bin", "b.bin", "c.bin"]
        .iter()
        .map(|key| BulkRegistrationItem {
            request: provider_request(&f, &format!("/{}", key), key),
            metadata: vec![],
        })
        .collect();
    let task = f
        .engine
        .register_bulk_data_objects(owner(), "archive-1", items)
        .await
        .unwrap();
    let task_id = task.id.unwrap();
    assert_eq!(task.status, TaskStatus::InProgress);

    let TaskView::Finished(result) = settled(&f.engine, TaskFamily::BulkRegistration, task_id).await
    else {
        panic!("bulk registration should finish with a result record");
    };
    let TaskResultDetail::BulkRegistration(outcome) = &result.detail else {
        panic!("unexpected result detail {:?}", result.detail);
    };

    assert_eq!(outcome.items.len(), 3);
    assert_eq!(outcome.items[0].status, ItemStatus::Success);
    assert_eq!(outcome.items[0].checksum, Some(content_etag(b"first")));
    assert_eq!(outcome.items[1].status, ItemStatus::Failed);
    assert!(outcome.items[1]
        .error_message
        .as_deref()
        .unwrap()
        .contains("simulated write failure"));
    assert_eq!(outcome.items[2].status, ItemStatus::Success);
    assert_eq!(outcome.items[2].checksum, Some(content_etag(b"third")));
    assert!(!result.result);

    assert!(f.store.get(task_id).await.unwrap().is_none());
    assert!(f.store.get_result(task_id).await.unwrap().is_some());
    assert!(f.archive.object("archive", "nci/project/c.bin").is_some());
    assert!(f.archive.object("archive", "nci/project/b.bin").is_none());
}

#[tokio::test]
async fn streaming_upload_status_follows_archive_tier() {
    let f = fixture();
    f.source.insert_object("source", "raw/a.bin", "payload");

    let task = f
        .engine
        .upload_data_object(owner(), upload("archive-1", provider_request(&f, "/a.bin", "raw/a.bin")))
        .await
        .unwrap();
    assert!(matches!(
        task.status,
        TaskStatus::StreamingInProgress | TaskStatus::Archived
    ));
    let done = settled_task(&f.engine, TaskFamily::UploadQueue, task.id.unwrap()).await;
    assert_eq!(done.status, TaskStatus::Archived);
    assert!(!done.in_process);
    let TaskKind::UploadQueue(entry) = &done.kind else {
        panic!("upload task expected");
    };
    let response = entry.response.as_ref().unwrap();
    assert_eq!(response.status, TransferStatus::Archived);
    assert_eq!(response.checksum, Some(content_etag(b"payload")));
    assert!(response.transfer_completed.is_some());

    let staged = f
        .engine
        .upload_data_object(owner(), upload("staging", provider_request(&f, "/a.bin", "raw/a.bin")))
        .await
        .unwrap();
    let done = settled_task(&f.engine, TaskFamily::UploadQueue, staged.id.unwrap()).await;
    assert_eq!(done.status, TaskStatus::InTemporaryArchive);
    assert!(f.archive.object("archive", "staging/a.bin").is_some());
}

#[tokio::test]
async fn failed_streaming_upload_keeps_reason_and_can_be_retried() {
    let f = fixture();
    f.source.insert_object("source", "a.bin", "payload");
    f.archive.fail_writes_to("nci/project/a.bin");

    let task = f
        .engine
        .upload_data_object(owner(), upload("archive-1", provider_request(&f, "/a.bin", "a.bin")))
        .await
        .unwrap();
    let failed = settled_task(&f.engine, TaskFamily::UploadQueue, task.id.unwrap()).await;
    assert_eq!(failed.status, TaskStatus::Failed);
    assert!(failed
        .failure_reason
        .as_deref()
        .unwrap()
        .contains("[aws] streaming upload failed"));

    let retried = f.engine.retry_task(failed.id.unwrap()).await.unwrap();
    assert_ne!(retried.id, failed.id);
    let retried = settled_task(&f.engine, TaskFamily::UploadQueue, retried.id.unwrap()).await;
    assert_eq!(retried.status, TaskStatus::Failed);

    let err = f.engine.retry_task(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, ArcaError::NotFound(_)));
}

#[tokio::test]
async fn only_failed_tasks_can_be_retried() {
    let f = fixture();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("local.bin");
    std::fs::write(&path, b"local bytes").unwrap();

    let task = f
        .engine
        .upload_data_object(
            owner(),
            upload(
                "archive-1",
                UploadRequest {
                    path: "/local.bin".to_string(),
                    caller_object_id: None,
                    source: UploadSource::LocalFile { path },
                    source_size: None,
                },
            ),
        )
        .await
        .unwrap();
    assert_eq!(task.status, TaskStatus::Archived);
    assert_eq!(task.bytes_transferred, 11);

    let err = f.engine.retry_task(task.id.unwrap()).await.unwrap_err();
    assert!(matches!(err, ArcaError::InvalidRequest(_)));
}

#[tokio::test]
async fn deferred_upload_waits_for_the_sweep() {
    let f = fixture();
    f.source.insert_object("source", "a.bin", "queued payload");

    let mut submission = upload("archive-1", provider_request(&f, "/queued.bin", "a.bin"));
    submission.defer = true;
    let task = f.engine.upload_data_object(owner(), submission).await.unwrap();
    assert_eq!(task.status, TaskStatus::Received);
    assert!(f.archive.object("archive", "nci/project/queued.bin").is_none());

    let sweep = SweepService::new(f.engine.clone(), SweepConfig::default());
    let report = sweep.run_once().await;
    assert_eq!(report.uploads_dispatched, 1);

    let done = settled_task(&f.engine, TaskFamily::UploadQueue, task.id.unwrap()).await;
    assert_eq!(done.status, TaskStatus::Archived);
    assert!(f.archive.object("archive", "nci/project/queued.bin").is_some());
}

#[tokio::test]
async fn multipart_url_upload_completes_through_the_engine() {
    let f = fixture();
    let task = f
        .engine
        .upload_data_object(
            owner(),
            upload(
                "archive-1",
                UploadRequest {
                    path: "/big.bin".to_string(),
                    caller_object_id: Some("obj-42".to_string()),
                    source: UploadSource::UploadUrl {
                        parts: 2,
                        checksum: None,
                        expiration_hours: Some(2),
                        completion: false,
                    },
                    source_size: None,
                },
            ),
        )
        .await
        .unwrap();
    assert_eq!(task.status, TaskStatus::UrlGenerated);
    let task_id = task.id.unwrap();

    let TaskKind::UploadQueue(entry) = &task.kind else {
        panic!("upload task expected");
    };
    let multipart = entry
        .response
        .as_ref()
        .and_then(|r| r.multipart_upload.clone())
        .unwrap();
    let first = f.archive.upload_part(&multipart.id, 1, "hello ").unwrap();
    let second = f.archive.upload_part(&multipart.id, 2, "world").unwrap();

    let incomplete = f
        .engine
        .complete_multipart_upload(
            task_id,
            &[UploadPartETag {
                part_number: 1,
                etag: first.clone(),
            }],
        )
        .await;
    assert!(incomplete.is_err());
    assert_eq!(
        f.engine.get_upload_status(task_id).await.unwrap().status,
        TaskStatus::UrlGenerated
    );

    let done = f
        .engine
        .complete_multipart_upload(
            task_id,
            &[
                UploadPartETag {
                    part_number: 1,
                    etag: first,
                },
                UploadPartETag {
                    part_number: 2,
                    etag: second,
                },
            ],
        )
        .await
        .unwrap();
    assert_eq!(done.status, TaskStatus::Archived);
    let object = f.archive.object("archive", "nci/project/obj-42").unwrap();
    assert_eq!(&object.data[..], b"hello world");

    let again = f.engine.complete_multipart_upload(task_id, &[]).await;
    assert!(matches!(again, Err(ArcaError::InvalidRequest(_))));
}

#[tokio::test]
async fn download_to_file_writes_a_result_record() {
    let f = fixture();
    f.archive
        .insert_object("archive", "nci/project/a.bin", "archived bytes");
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.bin");

    let task = f
        .engine
        .download_data_object(
            owner(),
            DownloadTask {
                archive_configuration_id: "archive-1".to_string(),
                archive_location: FileLocation::new("archive", "nci/project/a.bin"),
                destination: DownloadDestination::File { path: path.clone() },
                size_bytes: None,
            },
        )
        .await
        .unwrap();
    let task_id = task.id.unwrap();

    let done = settled_task(&f.engine, TaskFamily::Download, task_id).await;
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(std::fs::read(&path).unwrap(), b"archived bytes");
    assert!(recorded_result(f.store.as_ref(), task_id).await.result);
}

#[tokio::test]
async fn download_to_unreachable_bucket_fails_synchronously() {
    let f = fixture();
    f.archive.insert_object("archive", "nci/project/a.bin", "bytes");

    let err = f
        .engine
        .download_data_object(
            owner(),
            DownloadTask {
                archive_configuration_id: "archive-1".to_string(),
                archive_location: FileLocation::new("archive", "nci/project/a.bin"),
                destination: DownloadDestination::Provider {
                    account: account("cold-ak"),
                    location: FileLocation::new("missing-bucket", "a.bin"),
                },
                size_bytes: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ArcaError::InvalidRequest(_)));

    let failed = f
        .engine
        .list_tasks(&arca_core::models::TaskQuery {
            family: Some(TaskFamily::Download),
            status: Some(TaskStatus::Failed),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(failed.total, 1);
}

#[tokio::test]
async fn collection_migration_aggregates_every_object() {
    let f = fixture();
    f.source.insert_object("source", "coll/a.bin", "alpha");
    f.source.insert_object("source", "coll/sub/b.bin", "beta");
    f.source.insert_object("source", "coll/", "");
    f.source.insert_object("source", "other/c.bin", "gamma");

    let task = f
        .engine
        .migrate_collection(
            owner(),
            MigrationSubmission {
                source_configuration_id: "source".to_string(),
                source_location: FileLocation::new("source", "coll"),
                target_configuration_id: "archive-2".to_string(),
                target_path: "/migrated".to_string(),
            },
        )
        .await
        .unwrap();
    let task_id = task.id.unwrap();

    let done = settled_task(&f.engine, TaskFamily::Migration, task_id).await;
    assert_eq!(done.status, TaskStatus::Completed);
    let TaskKind::Migration(migration) = &done.kind else {
        panic!("migration task expected");
    };
    assert_eq!(migration.migration_type, MigrationType::Collection);
    assert_eq!(migration.items.len(), 2);
    assert!(migration
        .items
        .iter()
        .all(|item| item.status == ItemStatus::Success));
    assert!(f.cold.object("cold", "migrated/a.bin").is_some());
    assert!(f.cold.object("cold", "migrated/sub/b.bin").is_some());
    assert!(f.cold.object("cold", "migrated/c.bin").is_none());

    let result = recorded_result(f.store.as_ref(), task_id).await;
    assert!(result.result);

    // Already recorded, so the sweep leaves it alone.
    let sweep = SweepService::new(f.engine.clone(), SweepConfig::default());
    assert_eq!(sweep.run_once().await.results_written, 0);
    assert!(f.store.get(task_id).await.unwrap().is_some());
}

#[tokio::test]
async fn data_object_migration_records_its_single_item() {
    let f = fixture();
    f.source.insert_object("source", "coll/a.bin", "alpha");

    let task = f
        .engine
        .migrate_data_object(
            owner(),
            MigrationSubmission {
                source_configuration_id: "source".to_string(),
                source_location: FileLocation::new("source", "coll/a.bin"),
                target_configuration_id: "archive-2".to_string(),
                target_path: "/moved/a.bin".to_string(),
            },
        )
        .await
        .unwrap();

    let task_id = task.id.unwrap();
    let done = settled_task(&f.engine, TaskFamily::Migration, task_id).await;
    assert_eq!(done.status, TaskStatus::Completed);
    let TaskKind::Migration(migration) = &done.kind else {
        panic!("migration task expected");
    };
    assert_eq!(migration.items.len(), 1);
    let result = recorded_result(f.store.as_ref(), task_id).await;
    assert!(result.result);
    assert_eq!(migration.items[0].checksum, Some(content_etag(b"alpha")));
    let object = f.cold.object("cold", "moved/a.bin").unwrap();
    assert_eq!(object.attributes.storage_class.as_deref(), Some("GLACIER"));
}

#[tokio::test]
async fn restart_recovery_fails_interrupted_transfers() {
    let f = fixture();
    let mut task = TransferTask::new(
        owner(),
        DataTransferType::S3,
        TaskKind::Download(DownloadTask {
            archive_configuration_id: "archive-1".to_string(),
            archive_location: FileLocation::new("archive", "nci/project/a.bin"),
            destination: DownloadDestination::File {
                path: "/tmp/never.bin".into(),
            },
            size_bytes: Some(10),
        }),
    );
    task.status = TaskStatus::StreamingInProgress;
    task.in_process = true;
    let task_id = f.store.upsert(&mut task).await.unwrap();

    assert_eq!(f.engine.recover_on_startup().await.unwrap(), 1);
    let recovered = f.store.get(task_id).await.unwrap().unwrap();
    assert_eq!(recovered.status, TaskStatus::Failed);
    assert_eq!(recovered.failure_reason.as_deref(), Some(INTERRUPTED_REASON));
    assert!(!recovered.in_process);

    assert_eq!(f.engine.recover_on_startup().await.unwrap(), 0);
}

#[tokio::test]
async fn sweep_removes_expired_terminal_tasks() {
    let f = fixture();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("local.bin");
    std::fs::write(&path, b"bytes").unwrap();

    let task = f
        .engine
        .upload_data_object(
            owner(),
            upload(
                "archive-1",
                UploadRequest {
                    path: "/local.bin".to_string(),
                    caller_object_id: None,
                    source: UploadSource::LocalFile { path },
                    source_size: None,
                },
            ),
        )
        .await
        .unwrap();
    assert_eq!(task.status, TaskStatus::Archived);

    let sweep = SweepService::new(
        f.engine.clone(),
        SweepConfig {
            interval: Duration::from_secs(60),
            retention: chrono::Duration::zero(),
        },
    );
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(sweep.run_once().await.tasks_deleted, 1);
    assert!(f.engine.get_upload_status(task.id.unwrap()).await.is_err());
}

#[tokio::test]
async fn restart_recovery_keeps_interrupted_bulk_results() {
    let f = fixture();
    let items = ["a.bin", "b.bin"]
        .iter()
        .map(|key| BulkRegistrationItem {
            request: provider_request(&f, &format!("/{}", key), key),
            metadata: vec![],
        })
        .collect();
    let mut task = TransferTask::new(
        owner(),
        DataTransferType::S3,
        TaskKind::BulkRegistration(BulkRegistrationTask {
            archive_configuration_id: "archive-1".to_string(),
            items,
            result: BulkRegistrationResult {
                items: vec![
                    ItemResult::success("/a.bin", Some("etag-a".to_string())),
                    ItemResult::pending("/b.bin"),
                ],
            },
        }),
    );
    task.status = TaskStatus::InProgress;
    task.in_process = true;
    let task_id = f.store.upsert(&mut task).await.unwrap();

    assert_eq!(f.engine.recover_on_startup().await.unwrap(), 1);
    assert!(f.store.get(task_id).await.unwrap().is_none());

    let view = f.engine.get_bulk_registration_status(task_id).await.unwrap();
    assert_eq!(view.status(), TaskStatus::Failed);
    let TaskView::Finished(result) = view else {
        panic!("interrupted bulk registration should leave a result record");
    };
    assert!(!result.result);
    assert_eq!(result.message.as_deref(), Some(INTERRUPTED_REASON));
    let TaskResultDetail::BulkRegistration(outcome) = &result.detail else {
        panic!("unexpected result detail {:?}", result.detail);
    };
    assert_eq!(outcome.items[0].status, ItemStatus::Success);
    assert_eq!(outcome.items[1].status, ItemStatus::Failed);
    assert_eq!(
        outcome.items[1].error_message.as_deref(),
        Some(INTERRUPTED_REASON)
    );

    let sweep = SweepService::new(
        f.engine.clone(),
        SweepConfig {
            interval: Duration::from_secs(60),
            retention: chrono::Duration::zero(),
        },
    );
    sweep.run_once().await;
    assert!(f.store.get_result(task_id).await.unwrap().is_some());
}

#[tokio::test]
async fn bulk_registration_beyond_pool_size_keeps_item_order() {
    let f = fixture_with(TransferConfig {
        pool_size: 2,
        ..TransferConfig::default()
    });
    let keys: Vec<String> = (0..7).map(|i| format!("item-{}.bin", i)).collect();
    for key in &keys {
        f.source.insert_object("source", key, key.clone());
    }

    let items = keys
        .iter()
        .map(|key| BulkRegistrationItem {
            request: provider_request(&f, &format!("/{}", key), key),
            metadata: vec![],
        })
        .collect();
    let task = f
        .engine
        .register_bulk_data_objects(owner(), "archive-1", items)
        .await
        .unwrap();

    let result = recorded_result(f.store.as_ref(), task.id.unwrap()).await;
    assert!(result.result);
    let TaskResultDetail::BulkRegistration(outcome) = &result.detail else {
        panic!("unexpected result detail {:?}", result.detail);
    };
    let paths: Vec<String> = outcome.items.iter().map(|item| item.path.clone()).collect();
    let expected: Vec<String> = keys.iter().map(|key| format!("/{}", key)).collect();
    assert_eq!(paths, expected);
    for (item, key) in outcome.items.iter().zip(&keys) {
        assert_eq!(item.checksum, Some(content_etag(key.as_bytes())));
    }
}

#[tokio::test]
async fn sweep_archives_url_uploads_once_the_object_lands() {
    let f = fixture();
    let task = f
        .engine
        .upload_data_object(owner(), url_upload("/direct.bin", 2))
        .await
        .unwrap();
    assert_eq!(task.status, TaskStatus::UrlGenerated);
    let task_id = task.id.unwrap();

    let sweep = SweepService::new(f.engine.clone(), SweepConfig::default());
    let report = sweep.run_once().await;
    assert_eq!(report.url_uploads_archived, 0);
    assert_eq!(report.url_uploads_expired, 0);
    assert_eq!(
        f.engine.get_upload_status(task_id).await.unwrap().status,
        TaskStatus::UrlGenerated
    );

    let etag = f
        .archive
        .insert_object("archive", "nci/project/direct.bin", "uploaded by caller");
    assert_eq!(sweep.run_once().await.url_uploads_archived, 1);

    let done = f.engine.get_upload_status(task_id).await.unwrap();
    assert_eq!(done.status, TaskStatus::Archived);
    let TaskKind::UploadQueue(entry) = &done.kind else {
        panic!("upload task expected");
    };
    let response = entry.response.as_ref().unwrap();
    assert_eq!(response.status, TransferStatus::Archived);
    assert_eq!(response.checksum, Some(etag));
}

#[tokio::test]
async fn sweep_fails_url_uploads_after_the_url_lapses() {
    let f = fixture();
    let task = f
        .engine
        .upload_data_object(owner(), url_upload("/late.bin", 1))
        .await
        .unwrap();
    let task_id = task.id.unwrap();

    let mut stored = f.store.get(task_id).await.unwrap().unwrap();
    if let TaskKind::UploadQueue(entry) = &mut stored.kind {
        if let Some(response) = entry.response.as_mut() {
            response.transfer_started = chrono::Utc::now() - chrono::Duration::hours(2);
        }
    }
    f.store.upsert(&mut stored).await.unwrap();

    let sweep = SweepService::new(f.engine.clone(), SweepConfig::default());
    assert_eq!(sweep.run_once().await.url_uploads_expired, 1);

    let failed = f.engine.get_upload_status(task_id).await.unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);
    assert_eq!(failed.failure_reason.as_deref(), Some(URL_EXPIRED_REASON));
    assert_eq!(sweep.run_once().await.url_uploads_expired, 0);
}

#[tokio::test]
async fn sweep_writes_only_missing_results() {
    let f = fixture();
    let mut task = TransferTask::new(
        owner(),
        DataTransferType::S3,
        TaskKind::Migration(MigrationTask {
            source_configuration_id: "source".to_string(),
            source_location: FileLocation::new("source", "coll/a.bin"),
            target_configuration_id: "archive-2".to_string(),
            target_path: "/moved/a.bin".to_string(),
            migration_type: MigrationType::DataObject,
            items: vec![ItemResult::success("/moved/a.bin", None)],
        }),
    );
    task.status = TaskStatus::Completed;
    let task_id = f.store.upsert(&mut task).await.unwrap();

    let expiring = SweepService::new(
        f.engine.clone(),
        SweepConfig {
            interval: Duration::from_secs(60),
            retention: chrono::Duration::zero(),
        },
    );
    let sweep = SweepService::new(f.engine.clone(), SweepConfig::default());
    assert_eq!(sweep.run_once().await.results_written, 1);
    assert!(f.store.get_result(task_id).await.unwrap().unwrap().result);
    assert_eq!(sweep.run_once().await.results_written, 0);

    tokio::time::sleep(Duration::from_millis(5)).await;
    let report = expiring.run_once().await;
    assert_eq!(report.results_written, 0);
    assert_eq!(report.tasks_deleted, 1);
    assert!(f.store.get(task_id).await.unwrap().is_none());
}
