//! Progress and completion bridge for asynchronous transfers.
//!
//! A transfer started on the shared pool reports through a [`ProgressListener`].
//! The proxy wraps every listener in a [`OnceListener`], so exactly one of
//! `transfer_completed` / `transfer_failed` reaches it, exactly once.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{oneshot, watch};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferCompletion {
    pub bytes_transferred: u64,
    pub checksum: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Completed(TransferCompletion),
    Failed(String),
}

#[async_trait]
pub trait ProgressListener: Send + Sync {
    async fn transfer_progressed(&self, _bytes_transferred: u64) {}

    async fn transfer_completed(&self, completion: TransferCompletion);

    async fn transfer_failed(&self, reason: String);
}

/// Guards a listener against duplicate terminal notifications.
pub struct OnceListener {
    inner: Arc<dyn ProgressListener>,
    fired: AtomicBool,
}

impl OnceListener {
    pub fn new(inner: Arc<dyn ProgressListener>) -> Self {
        Self {
            inner,
            fired: AtomicBool::new(false),
        }
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    pub async fn progressed(&self, bytes_transferred: u64) {
        if !self.has_fired() {
            self.inner.transfer_progressed(bytes_transferred).await;
        }
    }

    /// Returns false if an outcome was already delivered.
    pub async fn complete(&self, completion: TransferCompletion) -> bool {
        if self.fired.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.inner.transfer_completed(completion).await;
        true
    }

    /// Returns false if an outcome was already delivered.
    pub async fn fail(&self, reason: String) -> bool {
        if self.fired.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.inner.transfer_failed(reason).await;
        true
    }

    pub async fn finish(&self, outcome: TransferOutcome) -> bool {
        match outcome {
            TransferOutcome::Completed(completion) => self.complete(completion).await,
            TransferOutcome::Failed(reason) => self.fail(reason).await,
        }
    }
}

/// Counts bytes and forwards progress every `report_every` bytes.
pub struct ProgressTracker {
    listener: Option<Arc<OnceListener>>,
    report_every: u64,
    transferred: AtomicU64,
    reported: AtomicU64,
}

impl ProgressTracker {
    pub fn new(listener: Option<Arc<OnceListener>>, report_every: u64) -> Self {
        Self {
            listener,
            report_every: report_every.max(1),
            transferred: AtomicU64::new(0),
            reported: AtomicU64::new(0),
        }
    }

    pub fn transferred(&self) -> u64 {
        self.transferred.load(Ordering::Acquire)
    }

    pub async fn record(&self, bytes: u64) {
        let total = self.transferred.fetch_add(bytes, Ordering::AcqRel) + bytes;
        let reported = self.reported.load(Ordering::Acquire);
        if total - reported < self.report_every {
            return;
        }
        self.reported.store(total, Ordering::Release);
        tracing::debug!(bytes_transferred = total, "Transfer progressed");
        if let Some(listener) = &self.listener {
            listener.progressed(total).await;
        }
    }
}

/// Listener end of a completion channel.
pub struct ChannelListener {
    outcome_tx: Mutex<Option<oneshot::Sender<TransferOutcome>>>,
    progress_tx: watch::Sender<u64>,
}

/// Receiving end of a completion channel.
pub struct CompletionReceiver {
    outcome_rx: oneshot::Receiver<TransferOutcome>,
    progress_rx: watch::Receiver<u64>,
}

/// Two-case result channel: the receiver resolves once with the transfer outcome.
pub fn completion_channel() -> (Arc<ChannelListener>, CompletionReceiver) {
    let (outcome_tx, outcome_rx) = oneshot::channel();
    let (progress_tx, progress_rx) = watch::channel(0);
    (
        Arc::new(ChannelListener {
            outcome_tx: Mutex::new(Some(outcome_tx)),
            progress_tx,
        }),
        CompletionReceiver {
            outcome_rx,
            progress_rx,
        },
    )
}

impl ChannelListener {
    fn send(&self, outcome: TransferOutcome) {
        let sender = self.outcome_tx.lock().ok().and_then(|mut tx| tx.take());
        if let Some(tx) = sender {
            let _ = tx.send(outcome);
        }
    }
}

#[async_trait]
impl ProgressListener for ChannelListener {
    async fn transfer_progressed(&self, bytes_transferred: u64) {
        let _ = self.progress_tx.send(bytes_transferred);
    }

    async fn transfer_completed(&self, completion: TransferCompletion) {
        self.send(TransferOutcome::Completed(completion));
    }

    async fn transfer_failed(&self, reason: String) {
        self.send(TransferOutcome::Failed(reason));
    }
}

impl CompletionReceiver {
    pub fn bytes_transferred(&self) -> u64 {
        *self.progress_rx.borrow()
    }

    /// Waits for the outcome. A listener dropped without reporting counts as a failure.
    pub async fn outcome(self) -> TransferOutcome {
        self.outcome_rx.await.unwrap_or_else(|_| {
            TransferOutcome::Failed("transfer ended without reporting completion".to_string())
        })
    }
}
