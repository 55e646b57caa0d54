//! Archive catalog seam.
//!
//! The engine never decides on its own where an object lands: archive
//! configurations come from an [`ArchiveCatalog`] and object keys from a
//! [`DestinationResolver`].

use arca_core::models::{ArchiveDestination, ArchiveType, FileLocation, ProviderAccount};
use arca_core::{ArcaError, ArcaResult, ArchiveSettings};
use async_trait::async_trait;
use std::collections::HashMap;

/// One archive a task can read from or write to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveConfiguration {
    pub id: String,
    pub account: ProviderAccount,
    /// Bucket plus the key prefix every object of this archive lives under.
    pub base_location: FileLocation,
    pub archive_type: ArchiveType,
    pub storage_class: Option<String>,
}

impl From<&ArchiveSettings> for ArchiveConfiguration {
    fn from(settings: &ArchiveSettings) -> Self {
        Self {
            id: settings.id.clone(),
            account: settings.account.clone(),
            base_location: FileLocation::new(&settings.bucket, &settings.base_path),
            archive_type: settings.archive_type,
            storage_class: settings.storage_class.clone(),
        }
    }
}

#[async_trait]
pub trait ArchiveCatalog: Send + Sync {
    async fn archive(&self, configuration_id: &str) -> ArcaResult<ArchiveConfiguration>;
}

/// Catalog over a fixed set of configurations.
#[derive(Debug, Default)]
pub struct StaticArchiveCatalog {
    archives: HashMap<String, ArchiveConfiguration>,
}

impl StaticArchiveCatalog {
    pub fn new(archives: impl IntoIterator<Item = ArchiveConfiguration>) -> Self {
        Self {
            archives: archives
                .into_iter()
                .map(|archive| (archive.id.clone(), archive))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.archives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.archives.is_empty()
    }
}

#[async_trait]
impl ArchiveCatalog for StaticArchiveCatalog {
    async fn archive(&self, configuration_id: &str) -> ArcaResult<ArchiveConfiguration> {
        self.archives.get(configuration_id).cloned().ok_or_else(|| {
            ArcaError::NotFound(format!("archive configuration {}", configuration_id))
        })
    }
}

/// Where an object lands inside an archive.
pub trait DestinationResolver: Send + Sync {
    fn resolve_destination(
        &self,
        base: &FileLocation,
        requested_path: &str,
        caller_object_id: Option<&str>,
        archive_type: ArchiveType,
    ) -> ArcaResult<ArchiveDestination>;
}

/// Joins the archive base key with the caller's object id, or with the
/// requested catalog path when no object id is given.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultDestinationResolver;

impl DestinationResolver for DefaultDestinationResolver {
    fn resolve_destination(
        &self,
        base: &FileLocation,
        requested_path: &str,
        caller_object_id: Option<&str>,
        archive_type: ArchiveType,
    ) -> ArcaResult<ArchiveDestination> {
        let relative = caller_object_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or(requested_path);
        let key = join_key(&base.object_id, relative);
        if base.container_id.is_empty() || key.is_empty() {
            return Err(ArcaError::invalid_request(format!(
                "cannot resolve a destination for {} in {}",
                requested_path, base
            )));
        }
        Ok(ArchiveDestination {
            location: FileLocation::new(&base.container_id, key),
            archive_type,
        })
    }
}

/// Joins key segments with exactly one slash, without a leading slash.
pub fn join_key(base: &str, relative: &str) -> String {
    let base = base.trim_matches('/');
    let relative = relative.trim_start_matches('/');
    match (base.is_empty(), relative.is_empty()) {
        (true, _) => relative.to_string(),
        (false, true) => base.to_string(),
        (false, false) => format!("{}/{}", base, relative),
    }
}
