use crate::connection::ClientSettings;
use crate::lifecycle::TieringRule;
use crate::traits::{
    normalize_etag, BoxedReader, HeadOutcome, ListPage, ObjectAttributes, ObjectHead,
    ObjectSource, ObjectStoreClient, ObjectStream, ObjectSummary, Presigner, StorageError,
    StorageResult,
};
use arca_core::models::UploadPartETag;
use async_trait::async_trait;
use aws_sdk_s3::config::retry::{RetryConfig, RetryMode};
use aws_sdk_s3::config::timeout::TimeoutConfig;
use aws_sdk_s3::config::{
    BehaviorVersion, Credentials, Region, RequestChecksumCalculation, ResponseChecksumValidation,
};
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    BucketLifecycleConfiguration, CompletedMultipartUpload, CompletedPart, ExpirationStatus,
    GlacierJobParameters, LifecycleRule, LifecycleRuleFilter, MetadataDirective, RestoreRequest,
    StorageClass, Tier, Transition, TransitionStorageClass,
};
use aws_sdk_s3::Client;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;

/// S3 rejects multipart uploads with more parts than this.
const MAX_PARTS: u64 = 10_000;

/// Largest object a single CopyObject request accepts.
const MAX_COPY_OBJECT_BYTES: u64 = 5 * 1024 * 1024 * 1024;

/// Bucket/key client for AWS and S3-compatible providers
#[derive(Clone)]
pub struct S3ObjectClient {
    client: Client,
    multipart_threshold: u64,
    part_size: u64,
}

impl S3ObjectClient {
    /// Builds a client from static keys.
    ///
    /// Custom endpoints are used for S3-compatible providers. Path-style addressing
    /// and checksum validation come from the settings, which the registry derives
    /// from the provider family.
    pub fn new(access_key: &str, secret_key: &str, settings: &ClientSettings) -> Self {
        let retry_config = RetryConfig::standard()
            .with_max_attempts(5)
            .with_retry_mode(RetryMode::Adaptive);

        let timeout_config = TimeoutConfig::builder()
            .connect_timeout(settings.connect_timeout)
            .read_timeout(settings.read_timeout)
            .build();

        let mut builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .credentials_provider(Credentials::new(
                access_key,
                secret_key,
                None,
                None,
                "arca",
            ))
            .region(Region::new(settings.region.clone()))
            .retry_config(retry_config)
            .timeout_config(timeout_config)
            .force_path_style(settings.force_path_style);

        if let Some(ref endpoint) = settings.endpoint_url {
            builder = builder.endpoint_url(endpoint);
        }

        // Third-party providers reject the SDK's default CRC checksums.
        if !settings.checksum_validation {
            builder = builder
                .request_checksum_calculation(RequestChecksumCalculation::WhenRequired)
                .response_checksum_validation(ResponseChecksumValidation::WhenRequired);
        }

        Self {
            client: Client::from_conf(builder.build()),
            multipart_threshold: settings.multipart_threshold,
            part_size: settings.part_size,
        }
    }

    fn part_size_for(&self, size: u64) -> u64 {
        self.part_size.max(size.div_ceil(MAX_PARTS))
    }

    async fn put_multipart(
        &self,
        bucket: &str,
        key: &str,
        size: u64,
        mut reader: BoxedReader,
        attributes: &ObjectAttributes,
    ) -> StorageResult<String> {
        let start = Instant::now();
        let upload_id = self.create_multipart_upload(bucket, key, attributes).await?;
        let part_size = self.part_size_for(size) as usize;

        let mut part_number = 1u32;
        let mut parts = Vec::new();
        let mut part_buffer = vec![0u8; part_size];
        let mut total_size = 0u64;

        let outcome: StorageResult<()> = async {
            loop {
                let mut bytes_in_part = 0usize;
                while bytes_in_part < part_size {
                    let bytes_read = reader.read(&mut part_buffer[bytes_in_part..]).await?;
                    if bytes_read == 0 {
                        break;
                    }
                    bytes_in_part += bytes_read;
                }

                if bytes_in_part == 0 {
                    break;
                }
                total_size += bytes_in_part as u64;

                let part_body =
                    ByteStream::from(Bytes::copy_from_slice(&part_buffer[..bytes_in_part]));
                let upload_part_result = self
                    .client
                    .upload_part()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .part_number(part_number as i32)
                    .body(part_body)
                    .send()
                    .await
                    .map_err(|e| {
                        tracing::error!(
                            error = %e,
                            bucket = %bucket,
                            key = %key,
                            part_number = part_number,
                            "Failed to upload part"
                        );
                        StorageError::Backend(e.to_string())
                    })?;

                let etag = upload_part_result
                    .e_tag()
                    .ok_or_else(|| {
                        StorageError::Backend(format!("No ETag returned for part {}", part_number))
                    })?
                    .to_string();
                parts.push(UploadPartETag { part_number, etag });
                part_number += 1;

                if bytes_in_part < part_size {
                    break;
                }
            }

            if total_size != size {
                return Err(StorageError::Backend(format!(
                    "source delivered {} bytes, expected {}",
                    total_size, size
                )));
            }
            Ok(())
        }
        .await;

        if let Err(e) = outcome {
            if let Err(abort_err) = self
                .client
                .abort_multipart_upload()
                .bucket(bucket)
                .key(key)
                .upload_id(&upload_id)
                .send()
                .await
            {
                tracing::warn!(
                    error = %abort_err,
                    bucket = %bucket,
                    key = %key,
                    "Failed to abort multipart upload"
                );
            }
            return Err(e);
        }

        let etag = self
            .complete_multipart_upload(bucket, key, &upload_id, &parts)
            .await?;

        tracing::info!(
            bucket = %bucket,
            key = %key,
            size_bytes = total_size,
            parts = parts.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 multipart stream upload successful"
        );

        Ok(etag)
    }

    async fn copy_in_place_multipart(
        &self,
        bucket: &str,
        key: &str,
        size: u64,
        attributes: &ObjectAttributes,
    ) -> StorageResult<String> {
        let start = Instant::now();
        let copy_source = format!("{}/{}", bucket, urlencoding::encode(key));
        let upload_id = self.create_multipart_upload(bucket, key, attributes).await?;
        let ranges = copy_part_ranges(size, self.part_size_for(size));

        let outcome: StorageResult<Vec<UploadPartETag>> = async {
            let mut parts = Vec::with_capacity(ranges.len());
            for (part_number, range) in &ranges {
                let output = self
                    .client
                    .upload_part_copy()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .part_number(*part_number)
                    .copy_source(&copy_source)
                    .copy_source_range(range)
                    .send()
                    .await
                    .map_err(|e| {
                        tracing::error!(
                            error = %e,
                            bucket = %bucket,
                            key = %key,
                            part_number = *part_number,
                            "Failed to copy part"
                        );
                        StorageError::Backend(e.to_string())
                    })?;
                let etag = output
                    .copy_part_result()
                    .and_then(|r| r.e_tag())
                    .ok_or_else(|| {
                        StorageError::Backend(format!("No ETag returned for part {}", part_number))
                    })?
                    .to_string();
                parts.push(UploadPartETag {
                    part_number: *part_number as u32,
                    etag,
                });
            }
            Ok(parts)
        }
        .await;

        let parts = match outcome {
            Ok(parts) => parts,
            Err(e) => {
                if let Err(abort_err) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    tracing::warn!(
                        error = %abort_err,
                        bucket = %bucket,
                        key = %key,
                        "Failed to abort multipart copy"
                    );
                }
                return Err(e);
            }
        };

        let etag = self
            .complete_multipart_upload(bucket, key, &upload_id, &parts)
            .await?;

        tracing::info!(
            bucket = %bucket,
            key = %key,
            size_bytes = size,
            parts = parts.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 multipart metadata copy successful"
        );

        Ok(etag)
    }
}

/// Inclusive byte ranges covering `size`, numbered from 1.
fn copy_part_ranges(size: u64, part_size: u64) -> Vec<(i32, String)> {
    let part_size = part_size.max(1);
    (0..size.div_ceil(part_size))
        .map(|index| {
            let first = index * part_size;
            let last = (first + part_size).min(size) - 1;
            (index as i32 + 1, format!("bytes={}-{}", first, last))
        })
        .collect()
}

fn service_status<E>(err: &SdkError<E, aws_sdk_s3::config::http::HttpResponse>) -> Option<u16> {
    match err {
        SdkError::ServiceError(service_err) => Some(service_err.raw().status().as_u16()),
        _ => None,
    }
}

fn to_chrono(value: &aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(value.secs(), value.subsec_nanos())
}

fn lifecycle_rule_from_sdk(rule: &LifecycleRule) -> TieringRule {
    #[allow(deprecated)]
    let prefix = rule
        .prefix()
        .or_else(|| rule.filter().and_then(|f| f.prefix()))
        .map(str::to_string);
    let transition = rule.transitions().first();
    TieringRule {
        id: rule.id().unwrap_or_default().to_string(),
        prefix,
        transition_storage_class: transition
            .and_then(|t| t.storage_class())
            .map(|c| c.as_str().to_string()),
        transition_days: transition.and_then(|t| t.days()),
        enabled: *rule.status() == ExpirationStatus::Enabled,
    }
}

fn lifecycle_rule_to_sdk(rule: &TieringRule) -> StorageResult<LifecycleRule> {
    let mut builder = LifecycleRule::builder()
        .id(&rule.id)
        .status(if rule.enabled {
            ExpirationStatus::Enabled
        } else {
            ExpirationStatus::Disabled
        })
        .filter(
            LifecycleRuleFilter::builder()
                .prefix(rule.prefix.clone().unwrap_or_default())
                .build(),
        );
    if let Some(ref storage_class) = rule.transition_storage_class {
        builder = builder.transitions(
            Transition::builder()
                .days(rule.transition_days.unwrap_or(0))
                .storage_class(TransitionStorageClass::from(storage_class.as_str()))
                .build(),
        );
    }
    builder
        .build()
        .map_err(|e| StorageError::InvalidArgument(e.to_string()))
}

#[async_trait]
impl ObjectSource for S3ObjectClient {
    async fn head_object(&self, bucket: &str, key: &str) -> StorageResult<HeadOutcome> {
        match self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => Ok(HeadOutcome::Found(ObjectHead {
                size: output.content_length().unwrap_or(0).max(0) as u64,
                etag: output.e_tag().map(str::to_string),
                metadata: output.metadata().cloned().unwrap_or_default(),
                storage_class: output.storage_class().map(|c| c.as_str().to_string()),
                restore: output.restore().map(str::to_string),
            })),
            Err(e) => match service_status(&e) {
                Some(403) => Ok(HeadOutcome::AccessDenied),
                Some(404) => Ok(HeadOutcome::NotFound),
                _ => {
                    tracing::error!(
                        error = %e,
                        bucket = %bucket,
                        key = %key,
                        "S3 head failed"
                    );
                    Err(StorageError::Backend(e.to_string()))
                }
            },
        }
    }

    async fn get_stream(&self, bucket: &str, key: &str) -> StorageResult<ObjectStream> {
        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| match service_status(&e) {
                Some(404) => StorageError::NotFound(format!("{}/{}", bucket, key)),
                Some(403) => StorageError::AccessDenied(format!("{}/{}", bucket, key)),
                _ => {
                    tracing::error!(
                        error = %e,
                        bucket = %bucket,
                        key = %key,
                        "S3 download failed"
                    );
                    StorageError::Backend(e.to_string())
                }
            })?;

        let size = response.content_length().map(|len| len.max(0) as u64);
        Ok(ObjectStream {
            reader: Box::pin(response.body.into_async_read()),
            size,
        })
    }
}

#[async_trait]
impl ObjectStoreClient for S3ObjectClient {
    async fn head_bucket(&self, bucket: &str) -> StorageResult<bool> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(e) => match service_status(&e) {
                Some(403) | Some(404) => Ok(false),
                _ => Err(StorageError::Backend(e.to_string())),
            },
        }
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        continuation_token: Option<&str>,
        max_keys: Option<i32>,
    ) -> StorageResult<ListPage> {
        let output = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .set_continuation_token(continuation_token.map(str::to_string))
            .set_max_keys(max_keys)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    bucket = %bucket,
                    prefix = %prefix,
                    "S3 list failed"
                );
                StorageError::Backend(e.to_string())
            })?;

        let objects = output
            .contents()
            .iter()
            .filter_map(|object| {
                Some(ObjectSummary {
                    key: object.key()?.to_string(),
                    size: object.size().unwrap_or(0).max(0) as u64,
                    last_modified: object.last_modified().and_then(to_chrono),
                    etag: object.e_tag().map(normalize_etag),
                })
            })
            .collect();

        Ok(ListPage {
            objects,
            next_continuation_token: output.next_continuation_token().map(str::to_string),
            is_truncated: output.is_truncated().unwrap_or(false),
        })
    }

    async fn put_file(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        attributes: &ObjectAttributes,
    ) -> StorageResult<String> {
        let file = tokio::fs::File::open(path).await?;
        let size = file.metadata().await?.len();
        self.put_stream(bucket, key, size, Box::pin(file), attributes)
            .await
    }

    async fn put_stream(
        &self,
        bucket: &str,
        key: &str,
        size: u64,
        mut body: BoxedReader,
        attributes: &ObjectAttributes,
    ) -> StorageResult<String> {
        if size > self.multipart_threshold {
            return self.put_multipart(bucket, key, size, body, attributes).await;
        }

        let start = Instant::now();
        let mut buffer = Vec::with_capacity(size as usize);
        body.read_to_end(&mut buffer).await?;
        if buffer.len() as u64 != size {
            return Err(StorageError::Backend(format!(
                "source delivered {} bytes, expected {}",
                buffer.len(),
                size
            )));
        }

        let output = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(Bytes::from(buffer)))
            .set_metadata(Some(attributes.metadata.clone()))
            .set_storage_class(attributes.storage_class.as_deref().map(StorageClass::from))
            .send()
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    bucket = %bucket,
                    key = %key,
                    size_bytes = size,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "S3 stream upload failed"
                );
                StorageError::Backend(e.to_string())
            })?;

        tracing::info!(
            bucket = %bucket,
            key = %key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 stream upload successful"
        );

        Ok(output.e_tag().map(normalize_etag).unwrap_or_default())
    }

    async fn get_to_file(&self, bucket: &str, key: &str, path: &Path) -> StorageResult<u64> {
        let start = Instant::now();
        let mut stream = self.get_stream(bucket, key).await?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(path).await?;
        let written = tokio::io::copy(&mut stream.reader, &mut file).await?;

        tracing::info!(
            bucket = %bucket,
            key = %key,
            size_bytes = written,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 download successful"
        );

        Ok(written)
    }

    async fn copy_in_place(
        &self,
        bucket: &str,
        key: &str,
        attributes: &ObjectAttributes,
    ) -> StorageResult<String> {
        let size = match self.head_object(bucket, key).await? {
            HeadOutcome::Found(head) => head.size,
            HeadOutcome::NotFound => {
                return Err(StorageError::NotFound(format!("{}/{}", bucket, key)))
            }
            HeadOutcome::AccessDenied => {
                return Err(StorageError::AccessDenied(format!("{}/{}", bucket, key)))
            }
        };
        if size > MAX_COPY_OBJECT_BYTES {
            return self
                .copy_in_place_multipart(bucket, key, size, attributes)
                .await;
        }

        let start = Instant::now();

        // URL-encode the copy source per AWS S3 API requirements
        let copy_source = format!("{}/{}", bucket, urlencoding::encode(key));

        let output = self
            .client
            .copy_object()
            .bucket(bucket)
            .key(key)
            .copy_source(&copy_source)
            .metadata_directive(MetadataDirective::Replace)
            .set_metadata(Some(attributes.metadata.clone()))
            .set_storage_class(attributes.storage_class.as_deref().map(StorageClass::from))
            .send()
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    bucket = %bucket,
                    key = %key,
                    "S3 metadata copy failed"
                );
                StorageError::Backend(e.to_string())
            })?;

        tracing::info!(
            bucket = %bucket,
            key = %key,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 metadata copy successful"
        );

        Ok(output
            .copy_object_result()
            .and_then(|r| r.e_tag())
            .map(normalize_etag)
            .unwrap_or_default())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()> {
        let start = Instant::now();

        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    bucket = %bucket,
                    key = %key,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "S3 delete failed"
                );
                StorageError::Backend(e.to_string())
            })?;

        tracing::info!(
            bucket = %bucket,
            key = %key,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 delete successful"
        );

        Ok(())
    }

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        attributes: &ObjectAttributes,
    ) -> StorageResult<String> {
        let create_result = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .set_metadata(Some(attributes.metadata.clone()))
            .set_storage_class(attributes.storage_class.as_deref().map(StorageClass::from))
            .send()
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    bucket = %bucket,
                    key = %key,
                    "Failed to create multipart upload"
                );
                StorageError::Backend(e.to_string())
            })?;

        create_result
            .upload_id()
            .map(str::to_string)
            .ok_or_else(|| StorageError::Backend("No upload ID returned from S3".to_string()))
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[UploadPartETag],
    ) -> StorageResult<String> {
        let completed_parts = CompletedMultipartUpload::builder()
            .set_parts(Some(
                parts
                    .iter()
                    .map(|part| {
                        CompletedPart::builder()
                            .part_number(part.part_number as i32)
                            .e_tag(&part.etag)
                            .build()
                    })
                    .collect(),
            ))
            .build();

        let output = self
            .client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed_parts)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    bucket = %bucket,
                    key = %key,
                    upload_id = %upload_id,
                    "Failed to complete multipart upload"
                );
                StorageError::Backend(e.to_string())
            })?;

        Ok(output.e_tag().map(normalize_etag).unwrap_or_default())
    }

    async fn restore_object(&self, bucket: &str, key: &str, days: i32) -> StorageResult<()> {
        let job_parameters = GlacierJobParameters::builder()
            .tier(Tier::Standard)
            .build()
            .map_err(|e| StorageError::InvalidArgument(e.to_string()))?;

        self.client
            .restore_object()
            .bucket(bucket)
            .key(key)
            .restore_request(
                RestoreRequest::builder()
                    .days(days)
                    .glacier_job_parameters(job_parameters)
                    .build(),
            )
            .send()
            .await
            .map_err(|e| match service_status(&e) {
                Some(404) => StorageError::NotFound(format!("{}/{}", bucket, key)),
                _ => {
                    tracing::error!(
                        error = %e,
                        bucket = %bucket,
                        key = %key,
                        "S3 restore failed"
                    );
                    StorageError::Backend(e.to_string())
                }
            })?;

        Ok(())
    }

    async fn get_lifecycle_rules(&self, bucket: &str) -> StorageResult<Vec<TieringRule>> {
        match self
            .client
            .get_bucket_lifecycle_configuration()
            .bucket(bucket)
            .send()
            .await
        {
            Ok(output) => Ok(output.rules().iter().map(lifecycle_rule_from_sdk).collect()),
            Err(e)
                if e.as_service_error().and_then(|se| se.code())
                    == Some("NoSuchLifecycleConfiguration") =>
            {
                Ok(Vec::new())
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    bucket = %bucket,
                    "Failed to read bucket lifecycle configuration"
                );
                Err(StorageError::Backend(e.to_string()))
            }
        }
    }

    async fn put_lifecycle_rules(
        &self,
        bucket: &str,
        rules: &[TieringRule],
        extra_header: Option<(&str, &str)>,
    ) -> StorageResult<()> {
        let sdk_rules = rules
            .iter()
            .map(lifecycle_rule_to_sdk)
            .collect::<StorageResult<Vec<_>>>()?;
        let configuration = BucketLifecycleConfiguration::builder()
            .set_rules(Some(sdk_rules))
            .build()
            .map_err(|e| StorageError::InvalidArgument(e.to_string()))?;

        let request = self
            .client
            .put_bucket_lifecycle_configuration()
            .bucket(bucket)
            .lifecycle_configuration(configuration);

        let result = match extra_header {
            Some((name, value)) => {
                let (name, value) = (name.to_string(), value.to_string());
                request
                    .customize()
                    .mutate_request(move |req| {
                        req.headers_mut().insert(name.clone(), value.clone());
                    })
                    .send()
                    .await
            }
            None => request.send().await,
        };

        result.map_err(|e| {
            tracing::error!(
                error = %e,
                bucket = %bucket,
                rules = rules.len(),
                "Failed to write bucket lifecycle configuration"
            );
            StorageError::Backend(e.to_string())
        })?;

        Ok(())
    }
}

#[async_trait]
impl Presigner for S3ObjectClient {
    async fn presign_put(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
        checksum: Option<&str>,
    ) -> StorageResult<String> {
        let presigning_config = PresigningConfig::builder()
            .expires_in(expires_in)
            .build()
            .map_err(|e| StorageError::InvalidArgument(e.to_string()))?;

        let presigned_request = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .set_content_md5(checksum.map(str::to_string))
            .presigned(presigning_config)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok(presigned_request.uri().to_string())
    }

    async fn presign_upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        expires_in: Duration,
    ) -> StorageResult<String> {
        let presigning_config = PresigningConfig::builder()
            .expires_in(expires_in)
            .build()
            .map_err(|e| StorageError::InvalidArgument(e.to_string()))?;

        let presigned_request = self
            .client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number as i32)
            .presigned(presigning_config)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok(presigned_request.uri().to_string())
    }

    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> StorageResult<String> {
        let presigning_config = PresigningConfig::builder()
            .expires_in(expires_in)
            .build()
            .map_err(|e| StorageError::InvalidArgument(e.to_string()))?;

        let presigned_request = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .presigned(presigning_config)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok(presigned_request.uri().to_string())
    }
}
