//! Bounded-buffer pump between a source reader and a destination writer.
//!
//! Chunks flow through a bounded channel: the reading side waits when the buffer
//! is full, the writing side waits when it is empty. A source read error is
//! forwarded to the writing side as an I/O error instead of a silent EOF, so a
//! failed source never produces a truncated destination object.

use bytes::Bytes;
use futures::StreamExt;
use std::future::Future;
use std::io;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::io::{ReaderStream, StreamReader};

use crate::progress::ProgressTracker;
use crate::traits::{BoxedReader, StorageError, StorageResult};

/// Size of one chunk moved through the pump.
pub const PUMP_CHUNK_BYTES: usize = 64 * 1024;

pub fn buffer_capacity_chunks(buffer_bytes: usize) -> usize {
    (buffer_bytes / PUMP_CHUNK_BYTES).max(1)
}

/// Feeds `source` into the reader handed to `sink`, through a buffer of `buffer_bytes`.
pub async fn pump<T, F, Fut>(
    source: BoxedReader,
    buffer_bytes: usize,
    tracker: &ProgressTracker,
    sink: F,
) -> StorageResult<T>
where
    F: FnOnce(BoxedReader) -> Fut,
    Fut: Future<Output = StorageResult<T>>,
{
    let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(buffer_capacity_chunks(buffer_bytes));

    let producer = async move {
        let mut chunks = ReaderStream::with_capacity(source, PUMP_CHUNK_BYTES);
        while let Some(chunk) = chunks.next().await {
            let failed = chunk.is_err();
            if let Ok(bytes) = &chunk {
                tracker.record(bytes.len() as u64).await;
            }
            if tx.send(chunk).await.is_err() || failed {
                break;
            }
        }
    };

    let received = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    });
    let reader: BoxedReader = Box::pin(StreamReader::new(received));

    let ((), result) = tokio::join!(producer, sink(reader));
    result
}

/// Writes a source stream to a local file. Returns bytes written.
pub async fn stream_to_file(
    mut source: BoxedReader,
    path: &Path,
    tracker: &ProgressTracker,
) -> StorageResult<u64> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::File::create(path).await?;
    let mut chunks = ReaderStream::with_capacity(&mut source, PUMP_CHUNK_BYTES);
    let mut written = 0u64;
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk.map_err(StorageError::Io)?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
        tracker.record(chunk.len() as u64).await;
    }
    file.flush().await?;
    Ok(written)
}
