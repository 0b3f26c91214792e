//! Attempt audit queue
//!
//! Every strategy execution yields a [`HealingAttempt`]. Records are pushed
//! onto a bounded channel and written by one background worker, so healing
//! never waits on the sink. A full queue drops the record.

use async_trait::async_trait;
use parking_lot::Mutex;
use selfheal_common::{HealingAttempt, Result};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Destination for audit records
#[async_trait]
pub trait AuditSink: Send + 'static {
    async fn write(&mut self, attempt: &HealingAttempt) -> Result<()>;

    async fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Emits each attempt as a structured `debug` event
#[derive(Debug, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn write(&mut self, attempt: &HealingAttempt) -> Result<()> {
        debug!(
            request_id = %attempt.request_id,
            attempt = attempt.attempt,
            strategy = %attempt.strategy,
            success = attempt.success,
            duration_ms = attempt.duration.as_millis() as u64,
            error = attempt.error.as_deref().unwrap_or(""),
            "healing attempt"
        );
        Ok(())
    }
}

/// Appends one JSON object per line to a file
pub struct JsonlAuditSink {
    writer: BufWriter<tokio::fs::File>,
}

impl JsonlAuditSink {
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }
}

#[async_trait]
impl AuditSink for JsonlAuditSink {
    async fn write(&mut self, attempt: &HealingAttempt) -> Result<()> {
        let mut line = serde_json::to_vec(attempt)?;
        line.push(b'\n');
        self.writer.write_all(&line).await?;
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        self.writer.flush().await?;
        Ok(())
    }
}

/// Bounded queue in front of an [`AuditSink`]
pub struct AuditQueue {
    tx: Mutex<Option<mpsc::Sender<HealingAttempt>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    dropped: Arc<AtomicU64>,
}

impl AuditQueue {
    /// Start the worker. Must be called inside a tokio runtime.
    pub fn start<S: AuditSink>(sink: S, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let worker = tokio::spawn(drain(sink, rx));
        Self {
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Enqueue without waiting
    pub fn record(&self, attempt: HealingAttempt) {
        let guard = self.tx.lock();
        let Some(tx) = guard.as_ref() else {
            debug!("Audit queue closed, discarding attempt {}", attempt.id);
            return;
        };
        match tx.try_send(attempt) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(attempt)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Audit queue full, dropping attempt {}", attempt.id);
            }
            Err(mpsc::error::TrySendError::Closed(attempt)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Audit worker gone, dropping attempt {}", attempt.id);
            }
        }
    }

    /// Records discarded because the queue was full or closed
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Close the queue and wait for queued records to be written
    pub async fn shutdown(&self) {
        drop(self.tx.lock().take());
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!("Audit worker ended abnormally: {}", e);
            }
        }
    }
}

async fn drain<S: AuditSink>(mut sink: S, mut rx: mpsc::Receiver<HealingAttempt>) {
    let mut written = 0u64;
    while let Some(attempt) = rx.recv().await {
        match sink.write(&attempt).await {
            Ok(()) => written += 1,
            Err(e) => warn!("Failed to write audit record {}: {}", attempt.id, e),
        }
        // Queue momentarily empty: push buffered records to the sink
        if rx.is_empty() {
            if let Err(e) = sink.flush().await {
                warn!("Failed to flush audit sink: {}", e);
            }
        }
    }
    if let Err(e) = sink.flush().await {
        warn!("Failed to flush audit sink: {}", e);
    }
    info!("Audit queue drained ({} records written)", written);
}
