use arca_core::models::{
    ArchiveDestination, ArchiveObjectMetadata, DirectoryScanItem, DownloadDestination,
    DownloadRequest, FileLocation, MetadataEntry, MultipartUpload, PathAttributes, ProviderFamily,
    ProviderTag, RestorationStatus, SetMetadataResponse, TierStatus, TransferStatus,
    UploadPartETag, UploadPartUrl, UploadRequest, UploadResponse, UploadSource,
};
use arca_core::{ArcaError, ArcaResult};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{
    archive_origin, download_from, file_attributes, new_request_id, object_attributes,
    require_listener, resolve_size, transfer_error, StreamJob, TransferProxy,
};
use crate::connection::{ConnectionHandle, ConnectionRegistry};
use crate::lifecycle::{
    merge_rule, policy_applies, TieringEndpoint, TieringRule, DEFAULT_TIER_TARGET,
    TIERING_INFO_HEADER,
};
use crate::progress::ProgressListener;
use crate::source::StreamOrigin;
use crate::traits::{normalize_etag, HeadOutcome, ObjectHead, ObjectStoreClient};

fn hours(hours: u32) -> Duration {
    Duration::from_secs(u64::from(hours) * 3600)
}

/// Proxy for native-cloud and S3-compatible providers.
pub struct S3TransferProxy {
    registry: Arc<ConnectionRegistry>,
    handle: ConnectionHandle,
}

impl S3TransferProxy {
    pub fn new(registry: Arc<ConnectionRegistry>, handle: ConnectionHandle) -> Self {
        Self { registry, handle }
    }

    fn store(&self) -> ArcaResult<Arc<dyn ObjectStoreClient>> {
        self.handle.store()
    }

    fn fail(&self, operation: &str) -> impl Fn(crate::traits::StorageError) -> ArcaError + '_ {
        let provider = self.handle.provider();
        let operation = operation.to_string();
        move |e| transfer_error(provider, &operation, e)
    }

    async fn head_existing(&self, location: &FileLocation, operation: &str) -> ArcaResult<ObjectHead> {
        let outcome = self
            .store()?
            .head_object(&location.container_id, &location.object_id)
            .await
            .map_err(self.fail(operation))?;
        match outcome {
            HeadOutcome::Found(head) => Ok(head),
            HeadOutcome::NotFound => Err(ArcaError::data_transfer(
                self.handle.provider(),
                operation,
                format!("object {} not found", location),
            )),
            HeadOutcome::AccessDenied => Err(ArcaError::data_transfer(
                self.handle.provider(),
                operation,
                format!("access denied to {}", location),
            )),
        }
    }

    fn response(
        &self,
        request: &UploadRequest,
        destination: &ArchiveDestination,
        status: TransferStatus,
    ) -> UploadResponse {
        UploadResponse {
            archive_location: destination.location.clone(),
            data_transfer_type: request.data_transfer_type(),
            method: request.transfer_method(),
            status,
            request_id: None,
            upload_request_url: None,
            multipart_upload: None,
            checksum: None,
            source_size: request.source_size,
            transfer_started: Utc::now(),
            transfer_completed: None,
        }
    }

    /// Origin of a streaming upload, authenticating source accounts as needed.
    async fn upload_origin(&self, source: &UploadSource) -> ArcaResult<(StreamOrigin, ProviderTag)> {
        match source {
            UploadSource::Provider { account, location }
            | UploadSource::DriveSource { account, location } => {
                let handle = self.registry.authenticate(account).await?;
                Ok((
                    StreamOrigin::Object {
                        source: handle.source(),
                        location: location.clone(),
                    },
                    handle.provider(),
                ))
            }
            UploadSource::Url { url } => Ok((
                StreamOrigin::Url {
                    http: self.registry.http().clone(),
                    url: url.clone(),
                },
                self.handle.provider(),
            )),
            UploadSource::UploadUrl { .. } | UploadSource::LocalFile { .. } => {
                Err(ArcaError::Unexpected(
                    "streaming upload requested for a non-streaming source".to_string(),
                ))
            }
        }
    }

    fn tiering_endpoint(&self, bucket: &str) -> Option<TieringEndpoint> {
        let config = self.registry.config();
        match (&config.tiering_protocol, &config.tiering_endpoint) {
            (Some(protocol), Some(endpoint)) => Some(TieringEndpoint {
                protocol: protocol.clone(),
                endpoint: endpoint.clone(),
                bucket: bucket.to_string(),
            }),
            _ => None,
        }
    }
}

#[async_trait]
impl TransferProxy for S3TransferProxy {
    fn provider(&self) -> ProviderTag {
        self.handle.provider()
    }

    #[tracing::instrument(
        skip(self, request, destination, metadata, listener),
        fields(provider = %self.handle.provider(), location = %destination.location)
    )]
    async fn upload_data_object(
        &self,
        request: &UploadRequest,
        destination: &ArchiveDestination,
        metadata: &[MetadataEntry],
        storage_class: Option<&str>,
        listener: Option<Arc<dyn ProgressListener>>,
    ) -> ArcaResult<UploadResponse> {
        let location = &destination.location;
        if location.is_empty() {
            return Err(ArcaError::invalid_request(
                "destination bucket and key are required",
            ));
        }

        match &request.source {
            UploadSource::UploadUrl {
                parts,
                checksum,
                expiration_hours,
                ..
            } => {
                let mut response = self.response(request, destination, TransferStatus::UrlGenerated);
                match *parts {
                    0 => {
                        return Err(ArcaError::invalid_request(
                            "part count must be at least 1",
                        ))
                    }
                    1 => {
                        response.upload_request_url = Some(
                            self.generate_upload_request_url(
                                location,
                                *expiration_hours,
                                checksum.as_deref(),
                            )
                            .await?,
                        );
                    }
                    n => {
                        response.multipart_upload = Some(
                            self.generate_multipart_upload_request_urls(
                                location,
                                n,
                                *expiration_hours,
                                metadata,
                                storage_class,
                            )
                            .await?,
                        );
                    }
                }
                Ok(response)
            }
            UploadSource::LocalFile { path } => {
                let start = Instant::now();
                let size = tokio::fs::metadata(path)
                    .await
                    .map_err(|e| {
                        ArcaError::invalid_request(format!(
                            "local source {} is not readable: {}",
                            path.display(),
                            e
                        ))
                    })?
                    .len();
                let etag = self
                    .store()?
                    .put_file(
                        &location.container_id,
                        &location.object_id,
                        path,
                        &object_attributes(metadata, storage_class),
                    )
                    .await
                    .map_err(self.fail("upload"))?;

                tracing::info!(
                    size_bytes = size,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "Local file archived"
                );

                let mut response = self.response(
                    request,
                    destination,
                    TransferStatus::archived_in(destination.archive_type),
                );
                response.checksum = Some(etag);
                response.source_size = Some(size);
                response.transfer_completed = Some(Utc::now());
                Ok(response)
            }
            source => {
                let listener = require_listener(listener)?;
                let store = self.store()?;
                let (origin, source_provider) = self.upload_origin(source).await?;
                let size = resolve_size(source_provider, &origin, request.source_size).await?;
                let config = self.registry.config();

                StreamJob {
                    provider: self.handle.provider(),
                    origin,
                    size,
                    buffer_bytes: config.stream_buffer_bytes,
                    report_every: config.progress_report_bytes,
                    listener,
                }
                .into_store(
                    &self.registry,
                    store,
                    location.clone(),
                    object_attributes(metadata, storage_class),
                )?;

                let mut response =
                    self.response(request, destination, TransferStatus::StreamingInProgress);
                response.request_id = Some(new_request_id());
                response.source_size = Some(size);
                Ok(response)
            }
        }
    }

    #[tracing::instrument(
        skip(self, request, listener),
        fields(provider = %self.handle.provider(), location = %request.archive_location)
    )]
    async fn download_data_object(
        &self,
        request: &DownloadRequest,
        listener: Option<Arc<dyn ProgressListener>>,
    ) -> ArcaResult<String> {
        if let (DownloadDestination::File { path }, None, None) =
            (&request.destination, &listener, &request.archive_url)
        {
            let start = Instant::now();
            let location = &request.archive_location;
            let written = self
                .store()?
                .get_to_file(&location.container_id, &location.object_id, path)
                .await
                .map_err(self.fail("download"))?;
            tracing::info!(
                size_bytes = written,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "Archived object downloaded"
            );
            return Ok(new_request_id());
        }

        let origin = archive_origin(&self.registry, &self.handle, request);
        download_from(
            &self.registry,
            self.handle.provider(),
            origin,
            request,
            listener,
        )
        .await
    }

    async fn generate_upload_request_url(
        &self,
        location: &FileLocation,
        expiration_hours: Option<u32>,
        checksum: Option<&str>,
    ) -> ArcaResult<String> {
        let expiration =
            expiration_hours.unwrap_or(self.registry.config().upload_url_expiration_hours);
        self.handle
            .presigner()?
            .presign_put(
                &location.container_id,
                &location.object_id,
                hours(expiration),
                checksum,
            )
            .await
            .map_err(self.fail("generate upload URL"))
    }

    #[tracing::instrument(skip(self, metadata), fields(provider = %self.handle.provider()))]
    async fn generate_multipart_upload_request_urls(
        &self,
        location: &FileLocation,
        parts: u32,
        expiration_hours: Option<u32>,
        metadata: &[MetadataEntry],
        storage_class: Option<&str>,
    ) -> ArcaResult<MultipartUpload> {
        if parts == 0 {
            return Err(ArcaError::invalid_request("part count must be at least 1"));
        }
        let expiration = hours(
            expiration_hours.unwrap_or(self.registry.config().upload_url_expiration_hours),
        );

        let id = self
            .store()?
            .create_multipart_upload(
                &location.container_id,
                &location.object_id,
                &object_attributes(metadata, storage_class),
            )
            .await
            .map_err(self.fail("create multipart upload"))?;
        if id.is_empty() {
            return Err(ArcaError::data_transfer(
                self.handle.provider(),
                "create multipart upload",
                "provider returned an empty multipart upload id",
            ));
        }

        let presigner = self.handle.presigner()?;
        let mut urls = Vec::with_capacity(parts as usize);
        for part_number in 1..=parts {
            let upload_url = presigner
                .presign_upload_part(
                    &location.container_id,
                    &location.object_id,
                    &id,
                    part_number,
                    expiration,
                )
                .await
                .map_err(self.fail("generate part upload URL"))?;
            urls.push(UploadPartUrl {
                part_number,
                upload_url,
                etag: None,
            });
        }

        tracing::debug!(multipart_id = %id, parts, "Multipart upload URLs generated");
        Ok(MultipartUpload { id, parts: urls })
    }

    #[tracing::instrument(skip(self, parts), fields(provider = %self.handle.provider()))]
    async fn complete_multipart_upload(
        &self,
        location: &FileLocation,
        multipart_id: &str,
        expected_parts: u32,
        parts: &[UploadPartETag],
    ) -> ArcaResult<String> {
        let numbered_in_order = parts
            .iter()
            .enumerate()
            .all(|(i, part)| part.part_number as usize == i + 1);
        if parts.len() != expected_parts as usize || !numbered_in_order {
            return Err(ArcaError::data_transfer(
                self.handle.provider(),
                "complete multipart upload",
                format!(
                    "multipart upload {} expected {} parts numbered 1..{}, received {}",
                    multipart_id,
                    expected_parts,
                    expected_parts,
                    parts.len()
                ),
            ));
        }

        self.store()?
            .complete_multipart_upload(
                &location.container_id,
                &location.object_id,
                multipart_id,
                parts,
            )
            .await
            .map(|etag| normalize_etag(&etag))
            .map_err(self.fail("complete multipart upload"))
    }

    async fn generate_download_request_url(
        &self,
        location: &FileLocation,
        expiration_hours: Option<u32>,
    ) -> ArcaResult<String> {
        let expiration =
            expiration_hours.unwrap_or(self.registry.config().source_url_expiration_hours);
        self.handle
            .presigner()?
            .presign_get(&location.container_id, &location.object_id, hours(expiration))
            .await
            .map_err(self.fail("generate download URL"))
    }

    async fn delete_data_object(&self, location: &FileLocation) -> ArcaResult<()> {
        self.store()?
            .delete_object(&location.container_id, &location.object_id)
            .await
            .map_err(self.fail("delete"))
    }

    #[tracing::instrument(skip(self), fields(provider = %self.handle.provider()))]
    async fn get_path_attributes(
        &self,
        location: &FileLocation,
        compute_size: bool,
    ) -> ArcaResult<PathAttributes> {
        let store = self.store()?;
        let outcome = store
            .head_object(&location.container_id, &location.object_id)
            .await
            .map_err(self.fail("get path attributes"))?;
        if let Some(attributes) = file_attributes(&outcome, compute_size) {
            return Ok(attributes);
        }

        let children = store
            .list_objects(
                &location.container_id,
                &location.as_directory_prefix(),
                None,
                Some(1),
            )
            .await
            .map_err(self.fail("get path attributes"))?;

        let is_directory = !children.objects.is_empty();
        Ok(PathAttributes {
            exists: is_directory,
            is_file: false,
            is_directory,
            is_accessible: true,
            size: None,
        })
    }

    #[tracing::instrument(skip(self), fields(provider = %self.handle.provider()))]
    async fn scan_directory(&self, location: &FileLocation) -> ArcaResult<Vec<DirectoryScanItem>> {
        let store = self.store()?;
        let prefix = if location.object_id.is_empty() {
            String::new()
        } else {
            location.as_directory_prefix()
        };

        let mut items = Vec::new();
        let mut token: Option<String> = None;
        let mut pages = 0usize;
        loop {
            let page = store
                .list_objects(&location.container_id, &prefix, token.as_deref(), None)
                .await
                .map_err(self.fail("scan directory"))?;
            pages += 1;

            items.extend(
                page.objects
                    .into_iter()
                    .filter(|object| object.size > 0)
                    .map(|object| DirectoryScanItem {
                        path: object.key,
                        size: object.size,
                        last_modified: object.last_modified,
                    }),
            );

            if !page.is_truncated {
                break;
            }
            match page.next_continuation_token {
                None => break,
                Some(next) if token.as_deref() == Some(next.as_str()) => {
                    tracing::warn!(
                        bucket = %location.container_id,
                        prefix = %prefix,
                        pages,
                        "Continuation token did not advance, stopping scan"
                    );
                    break;
                }
                Some(next) => token = Some(next),
            }
        }

        tracing::debug!(items = items.len(), pages, "Directory scanned");
        Ok(items)
    }

    async fn get_data_object_metadata(
        &self,
        location: &FileLocation,
    ) -> ArcaResult<ArchiveObjectMetadata> {
        let head = self.head_existing(location, "get metadata").await?;
        Ok(ArchiveObjectMetadata {
            checksum: head.etag.as_deref().map(normalize_etag).unwrap_or_default(),
            tier_status: TierStatus::from_storage_class(head.storage_class.as_deref()),
            restoration_status: RestorationStatus::from_restore_header(head.restore.as_deref()),
        })
    }

    #[tracing::instrument(skip(self, metadata), fields(provider = %self.handle.provider()))]
    async fn set_data_object_metadata(
        &self,
        location: &FileLocation,
        metadata: &[MetadataEntry],
        storage_class: Option<&str>,
    ) -> ArcaResult<SetMetadataResponse> {
        let head = self.head_existing(location, "set metadata").await?;

        let all_present = metadata.iter().all(|entry| {
            head.metadata
                .keys()
                .any(|k| k.eq_ignore_ascii_case(&entry.attribute))
        });
        if all_present {
            tracing::debug!("Metadata already present, skipping copy");
            return Ok(SetMetadataResponse {
                metadata_added: false,
                checksum: head.etag.as_deref().map(normalize_etag).unwrap_or_default(),
            });
        }

        let mut merged = head.metadata.clone();
        for entry in metadata {
            merged.retain(|k, _| !k.eq_ignore_ascii_case(&entry.attribute));
            merged.insert(entry.attribute.to_ascii_lowercase(), entry.value.clone());
        }
        let attributes = crate::traits::ObjectAttributes {
            metadata: merged,
            storage_class: storage_class
                .map(str::to_string)
                .or(head.storage_class.clone()),
        };

        let checksum = self
            .store()?
            .copy_in_place(&location.container_id, &location.object_id, &attributes)
            .await
            .map_err(self.fail("set metadata"))?;
        Ok(SetMetadataResponse {
            metadata_added: true,
            checksum: normalize_etag(&checksum),
        })
    }

    async fn restore_data_object(&self, location: &FileLocation) -> ArcaResult<()> {
        let days = self.registry.config().restore_days;
        self.store()?
            .restore_object(&location.container_id, &location.object_id, days)
            .await
            .map_err(self.fail("restore"))?;
        tracing::info!(
            provider = %self.handle.provider(),
            location = %location,
            days,
            "Restore requested"
        );
        Ok(())
    }

    #[tracing::instrument(skip(self, endpoint), fields(provider = %self.handle.provider()))]
    async fn set_tiering_policy(
        &self,
        location: &FileLocation,
        prefix: &str,
        tier_target: Option<&str>,
        endpoint: Option<&TieringEndpoint>,
    ) -> ArcaResult<()> {
        let store = self.store()?;
        let bucket = &location.container_id;

        let existing = store
            .get_lifecycle_rules(bucket)
            .await
            .map_err(self.fail("read tiering policy"))?;
        let rule =
            TieringRule::immediate_transition(prefix, tier_target.unwrap_or(DEFAULT_TIER_TARGET));
        let rules = merge_rule(existing, rule);

        let header_value = match self.handle.family() {
            ProviderFamily::S3Compatible => endpoint
                .cloned()
                .or_else(|| self.tiering_endpoint(bucket))
                .map(|e| e.header_value()),
            _ => None,
        };

        store
            .put_lifecycle_rules(
                bucket,
                &rules,
                header_value
                    .as_deref()
                    .map(|value| (TIERING_INFO_HEADER, value)),
            )
            .await
            .map_err(self.fail("set tiering policy"))?;

        tracing::info!(bucket = %bucket, prefix = %prefix, rules = rules.len(), "Tiering policy written");
        Ok(())
    }

    async fn exists_tiering_policy(&self, location: &FileLocation) -> ArcaResult<bool> {
        let rules = self
            .store()?
            .get_lifecycle_rules(&location.container_id)
            .await
            .map_err(self.fail("read tiering policy"))?;
        Ok(policy_applies(&rules, &location.object_id))
    }

    async fn check_source_reachable(&self, location: &FileLocation) -> ArcaResult<bool> {
        let outcome = self
            .handle
            .source()
            .head_object(&location.container_id, &location.object_id)
            .await
            .map_err(self.fail("check source"))?;
        Ok(matches!(outcome, HeadOutcome::Found(_)))
    }
}
