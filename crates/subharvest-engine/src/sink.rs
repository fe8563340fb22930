//! Event sinks.
//!
//! [`EventSink`] is the downstream seam: accept (topic, key, bytes) with
//! at-least-once delivery. The Kafka implementation lives in
//! [`crate::kafka`]; this module carries the trait, the JSONL file sink
//! (local record dumps), and the no-op sink used by tests and dry runs.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Errors from sink operations.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// The broker or file system rejected the write.
    #[error("delivery failed: {0}")]
    Delivery(String),

    /// File-system failure for the JSONL sink.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Cancellation fired while a delivery was in flight.
    #[error("publish cancelled")]
    Cancelled,
}

/// Publishes extracted records downstream, at-least-once.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Deliver one payload under `topic`, keyed for partitioning.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] when delivery fails or is cancelled.
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
        cancel: &CancellationToken,
    ) -> Result<(), SinkError>;

    /// Flush and release resources.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] when outstanding deliveries cannot be flushed.
    async fn close(&self) -> Result<(), SinkError>;
}

/// Discards every payload. Useful for tests and dry runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

#[async_trait]
impl EventSink for NoopSink {
    async fn publish(
        &self,
        _topic: &str,
        _key: &str,
        _payload: &[u8],
        _cancel: &CancellationToken,
    ) -> Result<(), SinkError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Appends one JSON line per record to `<dir>/<topic>.jsonl`.
pub struct FileSink {
    dir: PathBuf,
    files: Mutex<HashMap<String, File>>,
}

impl FileSink {
    /// Open a sink writing under `dir`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Io`] when the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            files: Mutex::new(HashMap::new()),
        })
    }
}

#[async_trait]
impl EventSink for FileSink {
    async fn publish(
        &self,
        topic: &str,
        _key: &str,
        payload: &[u8],
        _cancel: &CancellationToken,
    ) -> Result<(), SinkError> {
        let mut files = self.files.lock().expect("file sink lock poisoned");
        let file = match files.entry(topic.to_owned()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let path = self.dir.join(format!("{topic}.jsonl"));
                entry.insert(OpenOptions::new().create(true).append(true).open(path)?)
            }
        };
        file.write_all(payload)?;
        file.write_all(b"\n")?;
        Ok(())
    }

    async fn close(&self) -> Result<(), SinkError> {
        let mut files = self.files.lock().expect("file sink lock poisoned");
        for file in files.values_mut() {
            file.flush()?;
        }
        files.clear();
        Ok(())
    }
}
