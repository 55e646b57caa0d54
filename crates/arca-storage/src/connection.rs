//! Provider connection registry
//!
//! `authenticate` turns a provider account into a [`ConnectionHandle`]. The
//! registry caches one handle per account and owns the single transfer pool
//! every streaming job runs on, however many handles exist.

use arca_core::models::{Credentials, Endpoint, ProviderAccount, ProviderFamily, ProviderTag};
use arca_core::{ArcaError, ArcaResult, TransferConfig};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::drive::DriveClient;
use crate::pool::TransferPool;
use crate::proxy::{DriveTransferProxy, S3TransferProxy, TransferProxy};
use crate::traits::{ObjectSource, ObjectStoreClient, Presigner, StorageError, StorageResult};

const DEFAULT_REGION: &str = "us-east-1";

/// Client construction settings derived from the account and the provider family.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub provider: ProviderTag,
    pub region: String,
    pub endpoint_url: Option<String>,
    pub force_path_style: bool,
    pub checksum_validation: bool,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub multipart_threshold: u64,
    pub part_size: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self::native(ProviderTag::Aws, DEFAULT_REGION, &TransferConfig::default())
    }
}

impl ClientSettings {
    fn native(provider: ProviderTag, region: &str, config: &TransferConfig) -> Self {
        Self {
            provider,
            region: region.to_string(),
            endpoint_url: None,
            force_path_style: false,
            checksum_validation: true,
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            read_timeout: Duration::from_secs(config.read_timeout_secs),
            multipart_threshold: config.multipart_threshold_bytes,
            part_size: config.minimum_part_size_bytes,
        }
    }

    /// Settings for an object-store account. Drive sources have none.
    pub fn for_account(account: &ProviderAccount, config: &TransferConfig) -> ArcaResult<Self> {
        let provider = account.provider;
        let fail = |message: String| ArcaError::data_transfer(provider, "authenticate", message);

        match provider.family() {
            ProviderFamily::NativeCloud => match &account.endpoint {
                Endpoint::Region(region) if region.trim().is_empty() => {
                    Err(fail("region must not be empty".to_string()))
                }
                Endpoint::Region(region) => Ok(Self::native(provider, region.trim(), config)),
                Endpoint::Default => Ok(Self::native(provider, DEFAULT_REGION, config)),
                Endpoint::Url(_) => Err(fail(
                    "native cloud accounts take a region, not an endpoint URL".to_string(),
                )),
            },
            ProviderFamily::S3Compatible => {
                let Endpoint::Url(url) = &account.endpoint else {
                    return Err(fail("an endpoint URL is required".to_string()));
                };
                validate_endpoint(url).map_err(fail)?;
                Ok(Self {
                    endpoint_url: Some(url.trim_end_matches('/').to_string()),
                    force_path_style: config.path_style_providers.contains(&provider),
                    checksum_validation: false,
                    ..Self::native(provider, DEFAULT_REGION, config)
                })
            }
            ProviderFamily::DriveSource => Err(fail(
                "drive sources do not use object-store clients".to_string(),
            )),
        }
    }
}

fn validate_endpoint(url: &str) -> Result<(), String> {
    let uri: http::Uri = url
        .parse()
        .map_err(|e| format!("malformed endpoint URL {}: {}", url, e))?;
    match uri.scheme_str() {
        Some("http") | Some("https") => {}
        _ => return Err(format!("endpoint URL {} must use http or https", url)),
    }
    if uri.host().map_or(true, str::is_empty) {
        return Err(format!("endpoint URL {} has no host", url));
    }
    Ok(())
}

/// The three views of one authenticated object-store client.
#[derive(Clone)]
pub struct ConnectedClient {
    pub store: Arc<dyn ObjectStoreClient>,
    pub source: Arc<dyn ObjectSource>,
    pub presigner: Arc<dyn Presigner>,
}

/// Builds provider clients. Swapped out in tests for in-memory stores.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn connect(
        &self,
        account: &ProviderAccount,
        settings: &ClientSettings,
    ) -> StorageResult<ConnectedClient>;

    async fn connect_drive(
        &self,
        account: &ProviderAccount,
        access_token: &str,
        http: &reqwest::Client,
    ) -> StorageResult<Arc<dyn ObjectSource>> {
        Ok(Arc::new(DriveClient::new(
            http.clone(),
            account.provider,
            access_token.to_string(),
        )))
    }
}

#[cfg(feature = "storage-s3")]
pub struct S3ClientFactory;

#[cfg(feature = "storage-s3")]
#[async_trait]
impl ClientFactory for S3ClientFactory {
    async fn connect(
        &self,
        account: &ProviderAccount,
        settings: &ClientSettings,
    ) -> StorageResult<ConnectedClient> {
        let Credentials::Keys {
            access_key,
            secret_key,
        } = &account.credentials
        else {
            return Err(StorageError::Config(
                "object-store accounts need an access key and secret key".to_string(),
            ));
        };
        let client = Arc::new(crate::s3::S3ObjectClient::new(
            access_key, secret_key, settings,
        ));
        Ok(ConnectedClient {
            store: client.clone(),
            source: client.clone(),
            presigner: client,
        })
    }
}

/// An authenticated session with one provider account.
#[derive(Clone)]
pub struct ConnectionHandle {
    provider: ProviderTag,
    source: Arc<dyn ObjectSource>,
    store: Option<Arc<dyn ObjectStoreClient>>,
    presigner: Option<Arc<dyn Presigner>>,
}

impl ConnectionHandle {
    pub fn provider(&self) -> ProviderTag {
        self.provider
    }

    pub fn family(&self) -> ProviderFamily {
        self.provider.family()
    }

    pub fn source(&self) -> Arc<dyn ObjectSource> {
        self.source.clone()
    }

    pub fn store(&self) -> ArcaResult<Arc<dyn ObjectStoreClient>> {
        self.store.clone().ok_or_else(|| {
            ArcaError::invalid_request(format!(
                "{} is a read-only source without bucket operations",
                self.provider
            ))
        })
    }

    pub fn presigner(&self) -> ArcaResult<Arc<dyn Presigner>> {
        self.presigner.clone().ok_or_else(|| {
            ArcaError::invalid_request(format!("{} cannot presign URLs", self.provider))
        })
    }
}

pub struct ConnectionRegistry {
    config: TransferConfig,
    factory: Arc<dyn ClientFactory>,
    http: reqwest::Client,
    pool: TransferPool,
    handles: RwLock<HashMap<ProviderAccount, ConnectionHandle>>,
}

impl ConnectionRegistry {
    pub fn new(config: TransferConfig, factory: Arc<dyn ClientFactory>) -> ArcaResult<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .read_timeout(Duration::from_secs(config.read_timeout_secs))
            .build()
            .map_err(|e| ArcaError::Unexpected(format!("HTTP client setup failed: {}", e)))?;
        let pool = TransferPool::new(config.pool_size);

        tracing::info!(
            pool_size = pool.size(),
            stream_buffer_bytes = config.stream_buffer_bytes,
            "Connection registry initialized"
        );

        Ok(Self {
            config,
            factory,
            http,
            pool,
            handles: RwLock::new(HashMap::new()),
        })
    }

    #[cfg(feature = "storage-s3")]
    pub fn with_s3(config: TransferConfig) -> ArcaResult<Self> {
        Self::new(config, Arc::new(S3ClientFactory))
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    pub fn pool(&self) -> &TransferPool {
        &self.pool
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Authenticates an account, reusing a cached handle for the same account.
    #[tracing::instrument(skip(self, account), fields(provider = %account.provider))]
    pub async fn authenticate(&self, account: &ProviderAccount) -> ArcaResult<ConnectionHandle> {
        if let Some(handle) = self.handles.read().await.get(account) {
            return Ok(handle.clone());
        }

        let handle = self.connect(account).await.map_err(|e| {
            tracing::warn!(error = %e, "Authentication failed");
            e
        })?;

        self.handles
            .write()
            .await
            .entry(account.clone())
            .or_insert_with(|| handle.clone());
        tracing::debug!("Provider connection established");
        Ok(handle)
    }

    async fn connect(&self, account: &ProviderAccount) -> ArcaResult<ConnectionHandle> {
        let provider = account.provider;
        let wrap = |e: StorageError| ArcaError::data_transfer(provider, "authenticate", e.to_string());

        if provider.family() == ProviderFamily::DriveSource {
            let Credentials::Token { access_token } = &account.credentials else {
                return Err(ArcaError::data_transfer(
                    provider,
                    "authenticate",
                    "drive sources need an access token",
                ));
            };
            if access_token.trim().is_empty() {
                return Err(ArcaError::data_transfer(
                    provider,
                    "authenticate",
                    "access token must not be empty",
                ));
            }
            let source = self
                .factory
                .connect_drive(account, access_token, &self.http)
                .await
                .map_err(wrap)?;
            return Ok(ConnectionHandle {
                provider,
                source,
                store: None,
                presigner: None,
            });
        }

        match &account.credentials {
            Credentials::Keys {
                access_key,
                secret_key,
            } if !access_key.trim().is_empty() && !secret_key.trim().is_empty() => {}
            _ => {
                return Err(ArcaError::data_transfer(
                    provider,
                    "authenticate",
                    "an access key and secret key are required",
                ))
            }
        }

        let settings = ClientSettings::for_account(account, &self.config)?;
        let client = self.factory.connect(account, &settings).await.map_err(wrap)?;
        Ok(ConnectionHandle {
            provider,
            source: client.source,
            store: Some(client.store),
            presigner: Some(client.presigner),
        })
    }

    /// The transfer proxy implementation for the handle's provider family.
    pub fn transfer_proxy(self: &Arc<Self>, handle: ConnectionHandle) -> Arc<dyn TransferProxy> {
        match handle.family() {
            ProviderFamily::DriveSource => Arc::new(DriveTransferProxy::new(self.clone(), handle)),
            ProviderFamily::NativeCloud | ProviderFamily::S3Compatible => {
                Arc::new(S3TransferProxy::new(self.clone(), handle))
            }
        }
    }

    /// Authenticates and returns the proxy in one step.
    pub async fn proxy_for(
        self: &Arc<Self>,
        account: &ProviderAccount,
    ) -> ArcaResult<Arc<dyn TransferProxy>> {
        let handle = self.authenticate(account).await?;
        Ok(self.transfer_proxy(handle))
    }

    /// Stops the transfer pool and drops cached clients.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        let drained = self.pool.shutdown(grace).await;
        self.handles.write().await.clear();
        drained
    }
}
