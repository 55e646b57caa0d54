use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};

/// An object within a provider: bucket (container) plus key (object id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileLocation {
    pub container_id: String,
    pub object_id: String,
}

impl FileLocation {
    pub fn new(container_id: impl Into<String>, object_id: impl Into<String>) -> Self {
        Self {
            container_id: container_id.into(),
            object_id: object_id.into(),
        }
    }

    /// Same container, key with a trailing slash. Used to look up directory children.
    pub fn as_directory_prefix(&self) -> String {
        if self.object_id.ends_with('/') {
            self.object_id.clone()
        } else {
            format!("{}/", self.object_id)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.container_id.is_empty() || self.object_id.is_empty()
    }
}

impl Display for FileLocation {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}/{}", self.container_id, self.object_id)
    }
}

/// Archive tier of a destination. Decides the terminal status of an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveType {
    Archive,
    TemporaryArchive,
}

/// Resolved landing place of an upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveDestination {
    pub location: FileLocation,
    pub archive_type: ArchiveType,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_prefix_appends_single_slash() {
        assert_eq!(
            FileLocation::new("bucket", "a/b").as_directory_prefix(),
            "a/b/"
        );
        assert_eq!(
            FileLocation::new("bucket", "a/b/").as_directory_prefix(),
            "a/b/"
        );
    }

    #[test]
    fn locations_compare_by_value() {
        assert_eq!(FileLocation::new("b", "k"), FileLocation::new("b", "k"));
        assert_ne!(FileLocation::new("b", "k"), FileLocation::new("b", "k2"));
    }
}
