//! Transfer proxy
//!
//! One operation surface per provider family. [`S3TransferProxy`] serves the
//! native-cloud and S3-compatible families, [`DriveTransferProxy`] the read-only
//! drive sources. Provider failures leave this module as
//! [`ArcaError::DataTransfer`] tagged with the provider and the operation.

mod drive;
mod s3;

pub use drive::DriveTransferProxy;
pub use s3::S3TransferProxy;

use arca_core::models::{
    ArchiveDestination, ArchiveObjectMetadata, DirectoryScanItem, DownloadDestination,
    DownloadRequest, FileLocation, MetadataEntry, MultipartUpload, PathAttributes, ProviderTag,
    SetMetadataResponse, UploadPartETag, UploadRequest, UploadResponse,
};
use arca_core::{ArcaError, ArcaResult};
use async_trait::async_trait;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::connection::{ConnectionHandle, ConnectionRegistry};
use crate::lifecycle::TieringEndpoint;
use crate::progress::{
    OnceListener, ProgressListener, ProgressTracker, TransferCompletion, TransferOutcome,
};
use crate::source::StreamOrigin;
use crate::streaming::{pump, stream_to_file};
use crate::traits::{HeadOutcome, ObjectAttributes, ObjectStoreClient, StorageError};

#[async_trait]
pub trait TransferProxy: Send + Sync {
    fn provider(&self) -> ProviderTag;

    /// Uploads into `destination`. Streaming sources return `StreamingInProgress`
    /// at once and report the outcome through `listener`.
    async fn upload_data_object(
        &self,
        _request: &UploadRequest,
        _destination: &ArchiveDestination,
        _metadata: &[MetadataEntry],
        _storage_class: Option<&str>,
        _listener: Option<Arc<dyn ProgressListener>>,
    ) -> ArcaResult<UploadResponse> {
        Err(unsupported(self.provider(), "upload"))
    }

    /// Downloads an archived object. Returns the request id. With a listener the
    /// transfer runs on the pool and the outcome arrives through it.
    async fn download_data_object(
        &self,
        request: &DownloadRequest,
        listener: Option<Arc<dyn ProgressListener>>,
    ) -> ArcaResult<String>;

    async fn generate_upload_request_url(
        &self,
        _location: &FileLocation,
        _expiration_hours: Option<u32>,
        _checksum: Option<&str>,
    ) -> ArcaResult<String> {
        Err(unsupported(self.provider(), "generate upload URL"))
    }

    /// Opens a multipart session and presigns parts `1..=parts`.
    async fn generate_multipart_upload_request_urls(
        &self,
        _location: &FileLocation,
        _parts: u32,
        _expiration_hours: Option<u32>,
        _metadata: &[MetadataEntry],
        _storage_class: Option<&str>,
    ) -> ArcaResult<MultipartUpload> {
        Err(unsupported(self.provider(), "generate multipart upload URLs"))
    }

    /// Completes a multipart session with ETags for exactly parts `1..=expected_parts`.
    async fn complete_multipart_upload(
        &self,
        _location: &FileLocation,
        _multipart_id: &str,
        _expected_parts: u32,
        _parts: &[UploadPartETag],
    ) -> ArcaResult<String> {
        Err(unsupported(self.provider(), "complete multipart upload"))
    }

    async fn generate_download_request_url(
        &self,
        _location: &FileLocation,
        _expiration_hours: Option<u32>,
    ) -> ArcaResult<String> {
        Err(unsupported(self.provider(), "generate download URL"))
    }

    async fn delete_data_object(&self, _location: &FileLocation) -> ArcaResult<()> {
        Err(unsupported(self.provider(), "delete"))
    }

    async fn get_path_attributes(
        &self,
        location: &FileLocation,
        compute_size: bool,
    ) -> ArcaResult<PathAttributes>;

    async fn scan_directory(&self, _location: &FileLocation) -> ArcaResult<Vec<DirectoryScanItem>> {
        Err(unsupported(self.provider(), "scan directory"))
    }

    async fn get_data_object_metadata(
        &self,
        location: &FileLocation,
    ) -> ArcaResult<ArchiveObjectMetadata>;

    /// Adds metadata with a copy-to-self, skipped when everything is already present.
    async fn set_data_object_metadata(
        &self,
        _location: &FileLocation,
        _metadata: &[MetadataEntry],
        _storage_class: Option<&str>,
    ) -> ArcaResult<SetMetadataResponse> {
        Err(unsupported(self.provider(), "set metadata"))
    }

    async fn restore_data_object(&self, _location: &FileLocation) -> ArcaResult<()> {
        Err(unsupported(self.provider(), "restore"))
    }

    async fn set_tiering_policy(
        &self,
        _location: &FileLocation,
        _prefix: &str,
        _tier_target: Option<&str>,
        _endpoint: Option<&TieringEndpoint>,
    ) -> ArcaResult<()> {
        Err(unsupported(self.provider(), "set tiering policy"))
    }

    async fn exists_tiering_policy(&self, _location: &FileLocation) -> ArcaResult<bool> {
        Err(unsupported(self.provider(), "read tiering policy"))
    }

    /// Whether the object can be read before a streaming copy starts.
    async fn check_source_reachable(&self, location: &FileLocation) -> ArcaResult<bool>;
}

pub(crate) fn unsupported(provider: ProviderTag, operation: &str) -> ArcaError {
    ArcaError::invalid_request(format!(
        "{} is not supported by {} sources",
        operation, provider
    ))
}

/// Wraps a client error at the point of catch.
pub(crate) fn transfer_error(provider: ProviderTag, operation: &str, err: StorageError) -> ArcaError {
    ArcaError::data_transfer(provider, operation, err.to_string())
}

pub(crate) fn object_attributes(
    metadata: &[MetadataEntry],
    storage_class: Option<&str>,
) -> ObjectAttributes {
    ObjectAttributes {
        metadata: metadata
            .iter()
            .map(|entry| (entry.attribute.clone(), entry.value.clone()))
            .collect(),
        storage_class: storage_class.map(str::to_string),
    }
}

pub(crate) fn require_listener(
    listener: Option<Arc<dyn ProgressListener>>,
) -> ArcaResult<Arc<OnceListener>> {
    listener
        .map(|inner| Arc::new(OnceListener::new(inner)))
        .ok_or_else(|| {
            ArcaError::invalid_request("streaming transfers need a progress listener")
        })
}

/// Known size, or the origin's own report of it.
pub(crate) async fn resolve_size(
    provider: ProviderTag,
    origin: &StreamOrigin,
    known: Option<u64>,
) -> ArcaResult<u64> {
    if let Some(size) = known {
        return Ok(size);
    }
    origin
        .size()
        .await
        .map_err(|e| transfer_error(provider, "stat source", e))?
        .ok_or_else(|| {
            ArcaError::invalid_request(format!(
                "size of {} is unknown and could not be obtained",
                origin.describe()
            ))
        })
}

pub(crate) fn new_request_id() -> String {
    Uuid::new_v4().to_string()
}

/// One streaming job: origin into a destination, on the shared pool.
pub(crate) struct StreamJob {
    pub provider: ProviderTag,
    pub origin: StreamOrigin,
    pub size: u64,
    pub buffer_bytes: usize,
    pub report_every: u64,
    pub listener: Arc<OnceListener>,
}

impl StreamJob {
    /// Streams into an object store. Returns immediately; the outcome goes to the listener.
    pub fn into_store(
        self,
        registry: &ConnectionRegistry,
        store: Arc<dyn ObjectStoreClient>,
        target: FileLocation,
        attributes: ObjectAttributes,
    ) -> ArcaResult<()> {
        let listener = self.listener.clone();
        let provider = self.provider;
        let description = format!("{} -> {}", self.origin.describe(), target);
        let job = async move {
            let start = Instant::now();
            let source = self
                .origin
                .open()
                .await
                .map_err(|e| transfer_error(provider, "open source", e))?;
            let tracker = ProgressTracker::new(Some(self.listener.clone()), self.report_every);
            let size = self.size;
            let etag = pump(source.reader, self.buffer_bytes, &tracker, |reader| {
                store.put_stream(
                    &target.container_id,
                    &target.object_id,
                    size,
                    reader,
                    &attributes,
                )
            })
            .await
            .map_err(|e| transfer_error(provider, "streaming upload", e))?;

            tracing::info!(
                provider = %provider,
                bucket = %target.container_id,
                key = %target.object_id,
                size_bytes = tracker.transferred(),
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "Streaming transfer completed"
            );
            Ok(TransferCompletion {
                bytes_transferred: tracker.transferred(),
                checksum: Some(etag),
            })
        };
        submit(registry, provider, description, listener, job)
    }

    /// Streams into a local file. Returns immediately; the outcome goes to the listener.
    pub fn into_file(self, registry: &ConnectionRegistry, path: PathBuf) -> ArcaResult<()> {
        let listener = self.listener.clone();
        let provider = self.provider;
        let description = format!("{} -> {}", self.origin.describe(), path.display());
        let job = async move {
            let start = Instant::now();
            let source = self
                .origin
                .open()
                .await
                .map_err(|e| transfer_error(provider, "open source", e))?;
            let tracker = ProgressTracker::new(Some(self.listener.clone()), self.report_every);
            let written = stream_to_file(source.reader, &path, &tracker)
                .await
                .map_err(|e| transfer_error(provider, "download", e))?;

            tracing::info!(
                provider = %provider,
                path = %path.display(),
                size_bytes = written,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "Download to file completed"
            );
            Ok(TransferCompletion {
                bytes_transferred: written,
                checksum: None,
            })
        };
        submit(registry, provider, description, listener, job)
    }
}

fn submit<F>(
    registry: &ConnectionRegistry,
    provider: ProviderTag,
    description: String,
    listener: Arc<OnceListener>,
    job: F,
) -> ArcaResult<()>
where
    F: Future<Output = ArcaResult<TransferCompletion>> + Send + 'static,
{
    tracing::debug!(provider = %provider, transfer = %description, "Submitting streaming transfer");
    registry.pool().submit(async move {
        let outcome = match AssertUnwindSafe(job).catch_unwind().await {
            Ok(Ok(completion)) => TransferOutcome::Completed(completion),
            Ok(Err(e)) => {
                tracing::error!(
                    error = %e,
                    provider = %provider,
                    transfer = %description,
                    "Streaming transfer failed"
                );
                TransferOutcome::Failed(e.to_string())
            }
            Err(_) => {
                tracing::error!(
                    provider = %provider,
                    transfer = %description,
                    "Streaming transfer panicked"
                );
                TransferOutcome::Failed(
                    ArcaError::Unexpected(format!("transfer {} panicked", description))
                        .to_string(),
                )
            }
        };
        listener.finish(outcome).await;
    })
}

/// Download path shared by every family: `origin` is the archived object.
pub(crate) async fn download_from(
    registry: &ConnectionRegistry,
    provider: ProviderTag,
    origin: StreamOrigin,
    request: &DownloadRequest,
    listener: Option<Arc<dyn ProgressListener>>,
) -> ArcaResult<String> {
    let config = registry.config();
    let request_id = new_request_id();

    match &request.destination {
        DownloadDestination::File { path } => match listener {
            Some(listener) => {
                StreamJob {
                    provider,
                    origin,
                    size: request.size.unwrap_or(0),
                    buffer_bytes: config.stream_buffer_bytes,
                    report_every: config.progress_report_bytes,
                    listener: Arc::new(OnceListener::new(listener)),
                }
                .into_file(registry, path.clone())?;
            }
            None => {
                let source = origin
                    .open()
                    .await
                    .map_err(|e| transfer_error(provider, "download", e))?;
                let tracker = ProgressTracker::new(None, config.progress_report_bytes);
                stream_to_file(source.reader, path, &tracker)
                    .await
                    .map_err(|e| transfer_error(provider, "download", e))?;
            }
        },
        DownloadDestination::Provider { account, location } => {
            let listener = require_listener(listener)?;
            let target = registry.authenticate(account).await?;
            let store = target.store()?;

            // Fail before any bytes move.
            let reachable = store
                .head_bucket(&location.container_id)
                .await
                .map_err(|e| transfer_error(target.provider(), "check destination", e))?;
            if !reachable {
                return Err(ArcaError::invalid_request(format!(
                    "destination bucket {} is not reachable",
                    location.container_id
                )));
            }

            let size = resolve_size(provider, &origin, request.size).await?;
            StreamJob {
                provider,
                origin,
                size,
                buffer_bytes: config.stream_buffer_bytes,
                report_every: config.progress_report_bytes,
                listener,
            }
            .into_store(registry, store, location.clone(), ObjectAttributes::default())?;
        }
    }

    Ok(request_id)
}

/// Head-based attributes for the exact key. `None` means nothing is there.
pub(crate) fn file_attributes(outcome: &HeadOutcome, compute_size: bool) -> Option<PathAttributes> {
    match outcome {
        HeadOutcome::Found(head) => Some(PathAttributes {
            exists: true,
            is_file: true,
            is_directory: false,
            is_accessible: true,
            size: compute_size.then_some(head.size),
        }),
        HeadOutcome::AccessDenied => Some(PathAttributes {
            exists: true,
            is_accessible: false,
            ..PathAttributes::default()
        }),
        HeadOutcome::NotFound => None,
    }
}

/// Origin for the archived object of a download request.
pub(crate) fn archive_origin(
    registry: &ConnectionRegistry,
    handle: &ConnectionHandle,
    request: &DownloadRequest,
) -> StreamOrigin {
    match &request.archive_url {
        Some(url) => StreamOrigin::Url {
            http: registry.http().clone(),
            url: url.clone(),
        },
        None => StreamOrigin::Object {
            source: handle.source(),
            location: request.archive_location.clone(),
        },
    }
}
