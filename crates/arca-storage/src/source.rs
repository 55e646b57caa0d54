//! Readable transfer sources that are not buckets: `file://` archive paths and
//! plain HTTP(S) URLs.

use arca_core::models::FileLocation;
use futures::TryStreamExt;
use reqwest::{StatusCode, Url};
use std::io;
use std::sync::Arc;
use tokio_util::io::StreamReader;

use crate::traits::{HeadOutcome, ObjectSource, ObjectStream, StorageError, StorageResult};

fn parse(url: &str) -> StorageResult<Url> {
    Url::parse(url).map_err(|e| StorageError::InvalidArgument(format!("{}: {}", url, e)))
}

fn file_path(url: &Url) -> StorageResult<std::path::PathBuf> {
    url.to_file_path()
        .map_err(|_| StorageError::InvalidArgument(format!("not a local path: {}", url)))
}

fn status_error(status: StatusCode, url: &Url) -> StorageError {
    match status {
        StatusCode::NOT_FOUND => StorageError::NotFound(url.to_string()),
        StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => {
            StorageError::AccessDenied(url.to_string())
        }
        other => StorageError::Backend(format!("GET {} returned {}", url, other)),
    }
}

/// Opens a URL for reading. `file://` is read from the filesystem.
pub async fn open_url(http: &reqwest::Client, url: &str) -> StorageResult<ObjectStream> {
    let parsed = parse(url)?;
    match parsed.scheme() {
        "file" => {
            let path = file_path(&parsed)?;
            let file = tokio::fs::File::open(&path).await.map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => StorageError::NotFound(path.display().to_string()),
                _ => StorageError::Io(e),
            })?;
            let size = file.metadata().await?.len();
            Ok(ObjectStream {
                reader: Box::pin(file),
                size: Some(size),
            })
        }
        "http" | "https" => {
            let response = http
                .get(parsed.clone())
                .send()
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            if !response.status().is_success() {
                return Err(status_error(response.status(), &parsed));
            }
            let size = response.content_length();
            let body = response.bytes_stream().map_err(io::Error::other);
            Ok(ObjectStream {
                reader: Box::pin(StreamReader::new(body)),
                size,
            })
        }
        other => Err(StorageError::InvalidArgument(format!(
            "unsupported source scheme: {}",
            other
        ))),
    }
}

/// Size of the resource behind a URL, from filesystem stat or a HEAD request.
pub async fn url_size(http: &reqwest::Client, url: &str) -> StorageResult<Option<u64>> {
    let parsed = parse(url)?;
    match parsed.scheme() {
        "file" => {
            let path = file_path(&parsed)?;
            Ok(Some(tokio::fs::metadata(&path).await?.len()))
        }
        "http" | "https" => {
            let response = http
                .head(parsed.clone())
                .send()
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            if !response.status().is_success() {
                return Err(status_error(response.status(), &parsed));
            }
            Ok(response.content_length())
        }
        other => Err(StorageError::InvalidArgument(format!(
            "unsupported source scheme: {}",
            other
        ))),
    }
}

/// Where a streaming transfer reads from.
#[derive(Clone)]
pub enum StreamOrigin {
    /// An object read through an authenticated client.
    Object {
        source: Arc<dyn ObjectSource>,
        location: FileLocation,
    },
    Url { http: reqwest::Client, url: String },
}

impl StreamOrigin {
    pub fn describe(&self) -> String {
        match self {
            StreamOrigin::Object { location, .. } => location.to_string(),
            StreamOrigin::Url { url, .. } => url.clone(),
        }
    }

    pub async fn open(&self) -> StorageResult<ObjectStream> {
        match self {
            StreamOrigin::Object { source, location } => {
                source
                    .get_stream(&location.container_id, &location.object_id)
                    .await
            }
            StreamOrigin::Url { http, url } => open_url(http, url).await,
        }
    }

    /// Size up front. `None` when the origin cannot tell.
    pub async fn size(&self) -> StorageResult<Option<u64>> {
        match self {
            StreamOrigin::Object { source, location } => {
                match source
                    .head_object(&location.container_id, &location.object_id)
                    .await?
                {
                    HeadOutcome::Found(head) => Ok(Some(head.size)),
                    HeadOutcome::NotFound => Err(StorageError::NotFound(location.to_string())),
                    HeadOutcome::AccessDenied => {
                        Err(StorageError::AccessDenied(location.to_string()))
                    }
                }
            }
            StreamOrigin::Url { http, url } => url_size(http, url).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn file_urls_are_read_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archive.bin");
        tokio::fs::write(&path, b"archived bytes").await.unwrap();
        let url = Url::from_file_path(&path).unwrap().to_string();
        let http = reqwest::Client::new();

        assert_eq!(url_size(&http, &url).await.unwrap(), Some(14));

        let mut stream = open_url(&http, &url).await.unwrap();
        let mut body = Vec::new();
        stream.reader.read_to_end(&mut body).await.unwrap();
        assert_eq!(body, b"archived bytes");
        assert_eq!(stream.size, Some(14));
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let url = Url::from_file_path(dir.path().join("missing.bin"))
            .unwrap()
            .to_string();
        let result = open_url(&reqwest::Client::new(), &url).await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn unknown_schemes_are_rejected() {
        let result = open_url(&reqwest::Client::new(), "ftp://host/file").await;
        assert!(matches!(result, Err(StorageError::InvalidArgument(_))));
    }
}
