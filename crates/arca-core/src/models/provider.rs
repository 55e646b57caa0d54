use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug, Display, Formatter, Result as FmtResult};
use std::str::FromStr;

/// Identity of a storage provider. Carried by every connection handle and
/// attached to every transfer error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderTag {
    Aws,
    Cloudian,
    Cleversafe,
    Vast,
    UserS3,
    GoogleDrive,
    GoogleCloudStorage,
}

/// Provider families differ in how a connection is authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderFamily {
    /// Credentials + region, checksum validation on.
    NativeCloud,
    /// Credentials + endpoint URL, path-style per allow-list, checksum validation off.
    S3Compatible,
    /// Bearer token against a drive / cloud-storage HTTP API. Source only.
    DriveSource,
}

impl ProviderTag {
    pub fn family(&self) -> ProviderFamily {
        match self {
            ProviderTag::Aws => ProviderFamily::NativeCloud,
            ProviderTag::Cloudian
            | ProviderTag::Cleversafe
            | ProviderTag::Vast
            | ProviderTag::UserS3 => ProviderFamily::S3Compatible,
            ProviderTag::GoogleDrive | ProviderTag::GoogleCloudStorage => {
                ProviderFamily::DriveSource
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderTag::Aws => "aws",
            ProviderTag::Cloudian => "cloudian",
            ProviderTag::Cleversafe => "cleversafe",
            ProviderTag::Vast => "vast",
            ProviderTag::UserS3 => "user_s3",
            ProviderTag::GoogleDrive => "google_drive",
            ProviderTag::GoogleCloudStorage => "google_cloud_storage",
        }
    }
}

impl Display for ProviderTag {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderTag {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aws" => Ok(ProviderTag::Aws),
            "cloudian" => Ok(ProviderTag::Cloudian),
            "cleversafe" => Ok(ProviderTag::Cleversafe),
            "vast" => Ok(ProviderTag::Vast),
            "user_s3" => Ok(ProviderTag::UserS3),
            "google_drive" => Ok(ProviderTag::GoogleDrive),
            "google_cloud_storage" => Ok(ProviderTag::GoogleCloudStorage),
            other => Err(anyhow::anyhow!("Invalid provider: {}", other)),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Credentials {
    Keys {
        access_key: String,
        secret_key: String,
    },
    Token {
        access_token: String,
    },
}

impl Debug for Credentials {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Keys { access_key, .. } => f
                .debug_struct("Keys")
                .field("access_key", access_key)
                .field("secret_key", &"<redacted>")
                .finish(),
            Credentials::Token { .. } => f
                .debug_struct("Token")
                .field("access_token", &"<redacted>")
                .finish(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "value")]
pub enum Endpoint {
    Region(String),
    Url(String),
    /// The provider's well-known public service endpoint.
    Default,
}

/// Everything needed to authenticate against one provider account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderAccount {
    pub provider: ProviderTag,
    pub credentials: Credentials,
    pub endpoint: Endpoint,
}

impl ProviderAccount {
    pub fn with_keys(
        provider: ProviderTag,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
        endpoint: Endpoint,
    ) -> Self {
        Self {
            provider,
            credentials: Credentials::Keys {
                access_key: access_key.into(),
                secret_key: secret_key.into(),
            },
            endpoint,
        }
    }
}
