//! In-memory object store used by tests.
//!
//! Implements the full client surface plus knobs to simulate access denied keys,
//! failing writes and a provider whose continuation token never advances.

use arca_core::models::{ProviderAccount, UploadPartETag};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::AsyncReadExt;

use crate::connection::{ClientFactory, ClientSettings, ConnectedClient};
use crate::lifecycle::TieringRule;
use crate::traits::{
    BoxedReader, HeadOutcome, ListPage, ObjectAttributes, ObjectHead, ObjectSource,
    ObjectStoreClient, ObjectStream, ObjectSummary, Presigner, StorageError, StorageResult,
};

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub data: Bytes,
    pub etag: String,
    pub attributes: ObjectAttributes,
    pub last_modified: DateTime<Utc>,
    pub restore: Option<String>,
}

#[derive(Debug)]
struct MultipartSession {
    bucket: String,
    key: String,
    attributes: ObjectAttributes,
    parts: BTreeMap<u32, (String, Bytes)>,
}

#[derive(Debug, Default)]
struct State {
    buckets: HashSet<String>,
    objects: BTreeMap<(String, String), StoredObject>,
    sessions: HashMap<String, MultipartSession>,
    lifecycle: HashMap<String, Vec<TieringRule>>,
    lifecycle_headers: Vec<(String, String)>,
    denied_keys: HashSet<String>,
    failing_keys: HashSet<String>,
    stuck_pagination: bool,
    page_size: usize,
}

#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    state: Mutex<State>,
    copy_count: AtomicUsize,
    list_calls: AtomicUsize,
    session_counter: AtomicUsize,
}

pub fn content_etag(data: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    data.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        let store = Self::default();
        store.state().page_size = 1000;
        store
    }

    pub fn with_bucket(bucket: &str) -> Self {
        let store = Self::new();
        store.create_bucket(bucket);
        store
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn create_bucket(&self, bucket: &str) {
        self.state().buckets.insert(bucket.to_string());
    }

    pub fn insert_object(&self, bucket: &str, key: &str, data: impl Into<Bytes>) -> String {
        let data = data.into();
        let etag = content_etag(&data);
        let mut state = self.state();
        state.buckets.insert(bucket.to_string());
        state.objects.insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                data,
                etag: etag.clone(),
                attributes: ObjectAttributes::default(),
                last_modified: Utc::now(),
                restore: None,
            },
        );
        etag
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.state()
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub fn deny_access(&self, key: &str) {
        self.state().denied_keys.insert(key.to_string());
    }

    pub fn fail_writes_to(&self, key: &str) {
        self.state().failing_keys.insert(key.to_string());
    }

    /// Makes every listing page claim truncation with the same continuation token.
    pub fn set_stuck_pagination(&self, stuck: bool) {
        self.state().stuck_pagination = stuck;
    }

    pub fn set_page_size(&self, page_size: usize) {
        self.state().page_size = page_size.max(1);
    }

    pub fn copy_count(&self) -> usize {
        self.copy_count.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn lifecycle_rules(&self, bucket: &str) -> Vec<TieringRule> {
        self.state()
            .lifecycle
            .get(bucket)
            .cloned()
            .unwrap_or_default()
    }

    pub fn lifecycle_headers(&self) -> Vec<(String, String)> {
        self.state().lifecycle_headers.clone()
    }

    /// What a caller's own client does with a pre-signed part URL.
    pub fn upload_part(
        &self,
        upload_id: &str,
        part_number: u32,
        data: impl Into<Bytes>,
    ) -> StorageResult<String> {
        let data = data.into();
        let etag = content_etag(&data);
        let mut state = self.state();
        let session = state
            .sessions
            .get_mut(upload_id)
            .ok_or_else(|| StorageError::NotFound(format!("multipart upload {}", upload_id)))?;
        session.parts.insert(part_number, (etag.clone(), data));
        Ok(etag)
    }

    pub fn set_restore_marker(&self, bucket: &str, key: &str, marker: &str) {
        if let Some(object) = self
            .state()
            .objects
            .get_mut(&(bucket.to_string(), key.to_string()))
        {
            object.restore = Some(marker.to_string());
        }
    }

    fn check_write(state: &State, bucket: &str, key: &str) -> StorageResult<()> {
        if !state.buckets.contains(bucket) {
            return Err(StorageError::NotFound(format!("bucket {}", bucket)));
        }
        if state.denied_keys.contains(key) {
            return Err(StorageError::AccessDenied(key.to_string()));
        }
        if state.failing_keys.contains(key) {
            return Err(StorageError::Backend(format!(
                "simulated write failure for {}",
                key
            )));
        }
        Ok(())
    }

    fn store(&self, bucket: &str, key: &str, data: Bytes, attributes: &ObjectAttributes) -> StorageResult<String> {
        let mut state = self.state();
        Self::check_write(&state, bucket, key)?;
        let etag = content_etag(&data);
        state.objects.insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                data,
                etag: etag.clone(),
                attributes: attributes.clone(),
                last_modified: Utc::now(),
                restore: None,
            },
        );
        Ok(etag)
    }
}

#[async_trait]
impl ObjectSource for InMemoryObjectStore {
    async fn head_object(&self, bucket: &str, key: &str) -> StorageResult<HeadOutcome> {
        let state = self.state();
        if state.denied_keys.contains(key) {
            return Ok(HeadOutcome::AccessDenied);
        }
        Ok(
            match state.objects.get(&(bucket.to_string(), key.to_string())) {
                Some(object) => HeadOutcome::Found(ObjectHead {
                    size: object.data.len() as u64,
                    etag: Some(format!("\"{}\"", object.etag)),
                    metadata: object.attributes.metadata.clone(),
                    storage_class: object.attributes.storage_class.clone(),
                    restore: object.restore.clone(),
                }),
                None => HeadOutcome::NotFound,
            },
        )
    }

    async fn get_stream(&self, bucket: &str, key: &str) -> StorageResult<ObjectStream> {
        let object = self
            .object(bucket, key)
            .ok_or_else(|| StorageError::NotFound(format!("{}/{}", bucket, key)))?;
        let size = object.data.len() as u64;
        Ok(ObjectStream {
            reader: Box::pin(std::io::Cursor::new(object.data)),
            size: Some(size),
        })
    }
}

#[async_trait]
impl ObjectStoreClient for InMemoryObjectStore {
    async fn head_bucket(&self, bucket: &str) -> StorageResult<bool> {
        Ok(self.state().buckets.contains(bucket))
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        continuation_token: Option<&str>,
        max_keys: Option<i32>,
    ) -> StorageResult<ListPage> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state();
        if !state.buckets.contains(bucket) {
            return Err(StorageError::NotFound(format!("bucket {}", bucket)));
        }

        let page_size = max_keys
            .map(|m| m.max(1) as usize)
            .unwrap_or(state.page_size)
            .min(state.page_size);

        let matching: Vec<ObjectSummary> = state
            .objects
            .iter()
            .filter(|((b, k), _)| b == bucket && k.starts_with(prefix))
            .filter(|((_, k), _)| continuation_token.map_or(true, |t| k.as_str() > t))
            .map(|((_, k), object)| ObjectSummary {
                key: k.clone(),
                size: object.data.len() as u64,
                last_modified: Some(object.last_modified),
                etag: Some(object.etag.clone()),
            })
            .collect();

        if state.stuck_pagination {
            return Ok(ListPage {
                objects: matching.into_iter().take(page_size).collect(),
                next_continuation_token: Some("stuck-token".to_string()),
                is_truncated: true,
            });
        }

        let is_truncated = matching.len() > page_size;
        let objects: Vec<ObjectSummary> = matching.into_iter().take(page_size).collect();
        let next_continuation_token = if is_truncated {
            objects.last().map(|o| o.key.clone())
        } else {
            None
        };
        Ok(ListPage {
            objects,
            next_continuation_token,
            is_truncated,
        })
    }

    async fn put_file(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        attributes: &ObjectAttributes,
    ) -> StorageResult<String> {
        let data = tokio::fs::read(path).await?;
        self.store(bucket, key, Bytes::from(data), attributes)
    }

    async fn put_stream(
        &self,
        bucket: &str,
        key: &str,
        size: u64,
        mut body: BoxedReader,
        attributes: &ObjectAttributes,
    ) -> StorageResult<String> {
        {
            let state = self.state();
            Self::check_write(&state, bucket, key)?;
        }
        let mut data = Vec::new();
        body.read_to_end(&mut data).await?;
        if data.len() as u64 != size {
            return Err(StorageError::Backend(format!(
                "expected {} bytes, received {}",
                size,
                data.len()
            )));
        }
        self.store(bucket, key, Bytes::from(data), attributes)
    }

    async fn get_to_file(&self, bucket: &str, key: &str, path: &Path) -> StorageResult<u64> {
        let object = self
            .object(bucket, key)
            .ok_or_else(|| StorageError::NotFound(format!("{}/{}", bucket, key)))?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, &object.data).await?;
        Ok(object.data.len() as u64)
    }

    async fn copy_in_place(
        &self,
        bucket: &str,
        key: &str,
        attributes: &ObjectAttributes,
    ) -> StorageResult<String> {
        self.copy_count.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state();
        Self::check_write(&state, bucket, key)?;
        let object = state
            .objects
            .get_mut(&(bucket.to_string(), key.to_string()))
            .ok_or_else(|| StorageError::NotFound(format!("{}/{}", bucket, key)))?;
        object.attributes = attributes.clone();
        object.last_modified = Utc::now();
        let mut hasher = DefaultHasher::new();
        object.data.hash(&mut hasher);
        let mut sorted: Vec<_> = attributes.metadata.iter().collect();
        sorted.sort();
        sorted.hash(&mut hasher);
        attributes.storage_class.hash(&mut hasher);
        object.etag = format!("{:016x}", hasher.finish());
        Ok(object.etag.clone())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()> {
        self.state()
            .objects
            .remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        attributes: &ObjectAttributes,
    ) -> StorageResult<String> {
        let mut state = self.state();
        Self::check_write(&state, bucket, key)?;
        let upload_id = format!(
            "mpu-{}",
            self.session_counter.fetch_add(1, Ordering::SeqCst) + 1
        );
        state.sessions.insert(
            upload_id.clone(),
            MultipartSession {
                bucket: bucket.to_string(),
                key: key.to_string(),
                attributes: attributes.clone(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[UploadPartETag],
    ) -> StorageResult<String> {
        let session = {
            let mut state = self.state();
            state
                .sessions
                .remove(upload_id)
                .ok_or_else(|| StorageError::NotFound(format!("multipart upload {}", upload_id)))?
        };
        if session.bucket != bucket || session.key != key {
            return Err(StorageError::InvalidArgument(format!(
                "multipart upload {} belongs to {}/{}",
                upload_id, session.bucket, session.key
            )));
        }

        let mut data = Vec::new();
        for part in parts {
            let (etag, bytes) = session.parts.get(&part.part_number).ok_or_else(|| {
                StorageError::InvalidArgument(format!("part {} was never uploaded", part.part_number))
            })?;
            if *etag != part.etag.trim_matches('"') {
                return Err(StorageError::InvalidArgument(format!(
                    "ETag mismatch for part {}",
                    part.part_number
                )));
            }
            data.extend_from_slice(bytes);
        }
        self.store(bucket, key, Bytes::from(data), &session.attributes)
    }

    async fn restore_object(&self, bucket: &str, key: &str, _days: i32) -> StorageResult<()> {
        let mut state = self.state();
        let object = state
            .objects
            .get_mut(&(bucket.to_string(), key.to_string()))
            .ok_or_else(|| StorageError::NotFound(format!("{}/{}", bucket, key)))?;
        object.restore = Some("ongoing-request=\"true\"".to_string());
        Ok(())
    }

    async fn get_lifecycle_rules(&self, bucket: &str) -> StorageResult<Vec<TieringRule>> {
        Ok(self.lifecycle_rules(bucket))
    }

    async fn put_lifecycle_rules(
        &self,
        bucket: &str,
        rules: &[TieringRule],
        extra_header: Option<(&str, &str)>,
    ) -> StorageResult<()> {
        let mut state = self.state();
        if !state.buckets.contains(bucket) {
            return Err(StorageError::NotFound(format!("bucket {}", bucket)));
        }
        state.lifecycle.insert(bucket.to_string(), rules.to_vec());
        if let Some((name, value)) = extra_header {
            state
                .lifecycle_headers
                .push((name.to_string(), value.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Presigner for InMemoryObjectStore {
    async fn presign_put(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
        checksum: Option<&str>,
    ) -> StorageResult<String> {
        let mut url = format!(
            "memory://{}/{}?op=put&expires={}",
            bucket,
            urlencoding::encode(key),
            expires_in.as_secs()
        );
        if let Some(checksum) = checksum {
            url.push_str(&format!("&content-md5={}", urlencoding::encode(checksum)));
        }
        Ok(url)
    }

    async fn presign_upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        expires_in: Duration,
    ) -> StorageResult<String> {
        Ok(format!(
            "memory://{}/{}?uploadId={}&partNumber={}&expires={}",
            bucket,
            urlencoding::encode(key),
            upload_id,
            part_number,
            expires_in.as_secs()
        ))
    }

    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> StorageResult<String> {
        Ok(format!(
            "memory://{}/{}?op=get&expires={}",
            bucket,
            urlencoding::encode(key),
            expires_in.as_secs()
        ))
    }
}

/// Hands out one [`InMemoryObjectStore`] per provider account.
#[derive(Default)]
pub struct MemoryClientFactory {
    stores: Mutex<HashMap<ProviderAccount, Arc<InMemoryObjectStore>>>,
}

impl MemoryClientFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, account: &ProviderAccount, store: Arc<InMemoryObjectStore>) {
        self.stores
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(account.clone(), store);
    }

    /// The store behind an account, created empty on first use.
    pub fn store_for(&self, account: &ProviderAccount) -> Arc<InMemoryObjectStore> {
        self.stores
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(account.clone())
            .or_insert_with(|| Arc::new(InMemoryObjectStore::new()))
            .clone()
    }
}

#[async_trait]
impl ClientFactory for MemoryClientFactory {
    async fn connect(
        &self,
        account: &ProviderAccount,
        _settings: &ClientSettings,
    ) -> StorageResult<ConnectedClient> {
        let store = self.store_for(account);
        Ok(ConnectedClient {
            store: store.clone(),
            source: store.clone(),
            presigner: store,
        })
    }

    async fn connect_drive(
        &self,
        account: &ProviderAccount,
        _access_token: &str,
        _http: &reqwest::Client,
    ) -> StorageResult<Arc<dyn ObjectSource>> {
        Ok(self.store_for(account))
    }
}
