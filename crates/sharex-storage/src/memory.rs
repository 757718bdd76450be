use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::DEFAULT_MAX_INSERT_ATTEMPTS;
use crate::entry::{Author, Entry, EntryId};
use crate::error::{StorageError, StorageResult};
use crate::reader::MemoryReader;
use crate::status::EntryStatus;
use crate::token::{CallReference, TokenGenerator};
use crate::traits::StorageEngine;
use crate::writer::{ByteSink, EntryWriter, StatusRecorder, StatusWriter};

struct StoredEntry {
    call_reference: CallReference,
    author: Author,
    filename: String,
    content_type: String,
    upload_date: DateTime<Utc>,
    status: EntryStatus,
    data: Bytes,
}

#[derive(Default)]
struct State {
    entries: HashMap<EntryId, StoredEntry>,
    by_reference: HashMap<String, EntryId>,
}

#[derive(Default)]
struct Shared {
    state: RwLock<State>,
}

impl Shared {
    fn read(&self) -> StorageResult<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|e| StorageError::Connection(format!("lock poisoned: {e}")))
    }

    fn write(&self) -> StorageResult<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|e| StorageError::Connection(format!("lock poisoned: {e}")))
    }
}

impl StatusRecorder for Shared {
    fn record_status(&self, id: &EntryId, status: EntryStatus) -> StorageResult<()> {
        let mut state = self.write()?;
        let entry = state
            .entries
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(id.to_hex()))?;
        if entry.status == EntryStatus::Waiting {
            entry.status = status;
        }
        Ok(())
    }
}

/// Buffers an upload and publishes it when finished.
struct MemorySink {
    buffer: Vec<u8>,
    id: EntryId,
    shared: Arc<Shared>,
}

impl Write for MemorySink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ByteSink for MemorySink {
    fn finish(self) -> io::Result<()> {
        let mut state = self
            .shared
            .write()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        let entry = state
            .entries
            .get_mut(&self.id)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "entry vanished"))?;
        entry.data = Bytes::from(self.buffer);
        Ok(())
    }
}

/// Storage engine holding everything in process memory.
///
/// Nothing survives a restart. Ids are UUIDv7, so they sort by creation
/// time. Bytes become visible to `request` once the writer is closed.
pub struct MemoryStorage {
    shared: Arc<Shared>,
    tokens: TokenGenerator,
    max_insert_attempts: usize,
    initialized: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::with_max_insert_attempts(DEFAULT_MAX_INSERT_ATTEMPTS)
    }

    pub fn with_max_insert_attempts(max_insert_attempts: usize) -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            tokens: TokenGenerator::new(),
            max_insert_attempts,
            initialized: AtomicBool::new(false),
        }
    }

    /// Number of registered entries, in any status.
    pub fn len(&self) -> usize {
        self.shared.read().map(|s| s.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn status_of(&self, id: &EntryId) -> Option<EntryStatus> {
        self.shared.read().ok()?.entries.get(id).map(|e| e.status)
    }

    fn ensure_initialized(&self) -> StorageResult<()> {
        if self.initialized.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(StorageError::NotInitialized)
        }
    }

    fn register(&self, entry: &Entry) -> StorageResult<(EntryId, CallReference)> {
        for attempt in 1..=self.max_insert_attempts {
            let token = self.tokens.generate();
            let mut state = self.shared.write()?;
            if state.by_reference.contains_key(token.as_str()) {
                debug!(attempt, call_reference = %token, "call reference taken, retrying");
                continue;
            }
            let id = EntryId::from_bytes(Uuid::now_v7().into_bytes());
            state.by_reference.insert(token.as_str().to_owned(), id.clone());
            state.entries.insert(
                id.clone(),
                StoredEntry {
                    call_reference: token.clone(),
                    author: entry.author.clone(),
                    filename: entry.filename.clone(),
                    content_type: entry.content_type.clone(),
                    upload_date: entry.upload_date,
                    status: EntryStatus::Waiting,
                    data: Bytes::new(),
                },
            );
            return Ok((id, token));
        }
        Err(StorageError::Exhausted {
            attempts: self.max_insert_attempts,
        })
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageEngine for MemoryStorage {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn initialize(&mut self) -> StorageResult<()> {
        self.initialized.store(true, Ordering::Release);
        info!("memory storage initialized");
        Ok(())
    }

    fn store(&self, entry: &mut Entry) -> StorageResult<Box<dyn EntryWriter>> {
        self.ensure_initialized()?;
        let (id, token) = self.register(entry)?;
        debug!(id = %id, call_reference = %token, filename = %entry.filename, "entry registered");
        entry.id = Some(id.clone());
        entry.call_reference = Some(token);

        let sink = MemorySink {
            buffer: Vec::new(),
            id: id.clone(),
            shared: Arc::clone(&self.shared),
        };
        let recorder: Arc<dyn StatusRecorder> = self.shared.clone();
        Ok(Box::new(StatusWriter::new(sink, id, recorder)))
    }

    fn request(&self, call_reference: &str) -> StorageResult<Entry> {
        self.ensure_initialized()?;
        let state = self.shared.read()?;
        let stored = state
            .by_reference
            .get(call_reference)
            .and_then(|id| state.entries.get(id).map(|e| (id, e)));
        let Some((id, stored)) = stored else {
            return Err(StorageError::NotFound(call_reference.to_owned()));
        };
        Ok(Entry {
            id: Some(id.clone()),
            call_reference: Some(stored.call_reference.clone()),
            author: stored.author.clone(),
            filename: stored.filename.clone(),
            content_type: stored.content_type.clone(),
            upload_date: stored.upload_date,
            reader: Some(Box::new(MemoryReader::new(stored.data.clone()))),
        })
    }

    fn close(&self) -> StorageResult<()> {
        self.initialized.store(false, Ordering::Release);
        Ok(())
    }
}

impl std::fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("entry_count", &self.len())
            .field("initialized", &self.initialized.load(Ordering::Relaxed))
            .finish()
    }
}
