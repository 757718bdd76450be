//! Write sinks returned by `StorageEngine::store`.
//!
//! [`StatusWriter`] wraps a [`ByteSink`] and turns the outcome of closing it
//! into a status transition (`activated` or `failed`). The status update is
//! best-effort and runs on a detached thread; failures are logged and never
//! reach the uploader. A writer dropped without `close` or `abort` leaves its
//! entry `waiting`.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::sync::Arc;
use std::thread;

use tracing::{debug, warn};

use crate::entry::EntryId;
use crate::error::{StorageError, StorageResult};
use crate::status::EntryStatus;

/// Streaming write handle for one entry's bytes.
pub trait EntryWriter: Write + Send {
    /// Finish the upload. The entry becomes `activated` on success and
    /// `failed` otherwise.
    fn close(self: Box<Self>) -> StorageResult<()>;

    /// Give up on the upload and mark the entry `failed`.
    fn abort(self: Box<Self>) -> StorageResult<()>;
}

/// Destination for an entry's bytes.
pub trait ByteSink: Write + Send + 'static {
    /// Flush and durably close the sink.
    fn finish(self) -> io::Result<()>;
}

impl ByteSink for File {
    fn finish(mut self) -> io::Result<()> {
        self.flush()?;
        self.sync_all()
    }
}

impl ByteSink for BufWriter<File> {
    fn finish(self) -> io::Result<()> {
        self.into_inner().map_err(|e| e.into_error())?.finish()
    }
}

/// Receives status transitions from closing writers.
pub trait StatusRecorder: Send + Sync + 'static {
    fn record_status(&self, id: &EntryId, status: EntryStatus) -> StorageResult<()>;
}

/// [`EntryWriter`] that records the entry's status when it is closed.
pub struct StatusWriter<S: ByteSink> {
    sink: Option<S>,
    id: EntryId,
    recorder: Arc<dyn StatusRecorder>,
    poisoned: bool,
}

impl<S: ByteSink> StatusWriter<S> {
    pub fn new(sink: S, id: EntryId, recorder: Arc<dyn StatusRecorder>) -> Self {
        Self {
            sink: Some(sink),
            id,
            recorder,
            poisoned: false,
        }
    }

    pub fn id(&self) -> &EntryId {
        &self.id
    }

    fn sink(&mut self) -> io::Result<&mut S> {
        self.sink
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "writer already closed"))
    }

    fn track<T>(&mut self, result: io::Result<T>) -> io::Result<T> {
        if result.is_err() {
            self.poisoned = true;
        }
        result
    }
}

impl<S: ByteSink> Write for StatusWriter<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let result = self.sink().and_then(|sink| sink.write(buf));
        self.track(result)
    }

    fn flush(&mut self) -> io::Result<()> {
        let result = self.sink().and_then(|sink| sink.flush());
        self.track(result)
    }
}

impl<S: ByteSink> EntryWriter for StatusWriter<S> {
    fn close(mut self: Box<Self>) -> StorageResult<()> {
        let outcome = match self.sink.take() {
            Some(sink) => sink.finish(),
            None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "writer already closed")),
        };
        let outcome = match outcome {
            Ok(()) if self.poisoned => Err(io::Error::new(
                io::ErrorKind::Other,
                "an earlier write to this entry failed",
            )),
            other => other,
        };
        let status = if outcome.is_ok() {
            EntryStatus::Activated
        } else {
            EntryStatus::Failed
        };
        spawn_status_update(Arc::clone(&self.recorder), self.id.clone(), status);
        outcome.map_err(StorageError::Write)
    }

    fn abort(mut self: Box<Self>) -> StorageResult<()> {
        if let Some(sink) = self.sink.take() {
            if let Err(err) = sink.finish() {
                debug!(id = %self.id, error = %err, "finishing aborted upload failed");
            }
        }
        spawn_status_update(Arc::clone(&self.recorder), self.id.clone(), EntryStatus::Failed);
        Ok(())
    }
}

impl<S: ByteSink> Drop for StatusWriter<S> {
    fn drop(&mut self) {
        if self.sink.is_some() {
            debug!(id = %self.id, "writer dropped without close, entry stays waiting");
        }
    }
}

/// Fire-and-forget status update.
pub(crate) fn spawn_status_update(
    recorder: Arc<dyn StatusRecorder>,
    id: EntryId,
    status: EntryStatus,
) {
    let task_id = id.clone();
    let spawned = thread::Builder::new()
        .name("entry-status".into())
        .spawn(move || match recorder.record_status(&task_id, status) {
            Ok(()) => debug!(id = %task_id, %status, "entry status updated"),
            Err(err) => warn!(id = %task_id, %status, error = %err, "failed to update entry status"),
        });
    if let Err(err) = spawned {
        warn!(id = %id, %status, error = %err, "could not schedule entry status update");
    }
}
