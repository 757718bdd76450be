//! In-memory metadata store for tests and embedding.
//!
//! [`InMemoryMetadataStore`] keeps documents in a `Vec` behind a `RwLock`
//! and mirrors the server-side rules the engine depends on: `_id` is always
//! unique, and the call reference becomes unique once its index exists. A
//! few hooks let tests inject conflicts, malformed documents, and failing
//! status updates.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use mongodb::bson::{Bson, Document};

use crate::entry::EntryId;
use crate::error::{StorageError, StorageResult};
use crate::metadata::{InsertOutcome, MetadataStore, CALL_REFERENCE_INDEX};
use crate::record::{object_id, CALL_REFERENCE_FIELD, ID_FIELD, STATUS_FIELD};
use crate::status::EntryStatus;

#[derive(Default)]
struct Collection {
    documents: Vec<Document>,
    indexes: BTreeSet<String>,
}

impl Collection {
    fn conflicts(&self, doc: &Document) -> bool {
        let unique_reference = self.indexes.contains(CALL_REFERENCE_INDEX);
        self.documents.iter().any(|existing| {
            existing.get(ID_FIELD) == doc.get(ID_FIELD)
                || (unique_reference
                    && doc.get(CALL_REFERENCE_FIELD).is_some()
                    && existing.get(CALL_REFERENCE_FIELD) == doc.get(CALL_REFERENCE_FIELD))
        })
    }

    fn by_id_mut(&mut self, id: &Bson) -> Option<&mut Document> {
        self.documents
            .iter_mut()
            .find(|doc| doc.get(ID_FIELD) == Some(id))
    }
}

/// An in-memory implementation of [`MetadataStore`].
#[derive(Default)]
pub struct InMemoryMetadataStore {
    collection: RwLock<Collection>,
    connected: AtomicBool,
    pending_conflicts: AtomicUsize,
    insert_attempts: AtomicUsize,
    fail_status_updates: AtomicBool,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StorageResult<RwLockReadGuard<'_, Collection>> {
        self.collection
            .read()
            .map_err(|e| StorageError::Connection(format!("lock poisoned: {e}")))
    }

    fn write(&self) -> StorageResult<RwLockWriteGuard<'_, Collection>> {
        self.collection
            .write()
            .map_err(|e| StorageError::Connection(format!("lock poisoned: {e}")))
    }

    fn ensure_connected(&self) -> StorageResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::Connection("metadata store is not connected".into()))
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Make the next `count` inserts report a conflict.
    pub fn inject_conflicts(&self, count: usize) {
        self.pending_conflicts.store(count, Ordering::SeqCst);
    }

    /// Number of insert calls observed so far.
    pub fn insert_attempts(&self) -> usize {
        self.insert_attempts.load(Ordering::SeqCst)
    }

    /// Make every subsequent `set_status` fail.
    pub fn fail_status_updates(&self, fail: bool) {
        self.fail_status_updates.store(fail, Ordering::SeqCst);
    }

    /// Store a document verbatim, bypassing every check.
    pub fn insert_raw(&self, doc: Document) -> StorageResult<()> {
        self.write()?.documents.push(doc);
        Ok(())
    }

    /// Current status of an entry, if it exists and is well formed.
    pub fn status_of(&self, id: &EntryId) -> Option<EntryStatus> {
        let oid = Bson::ObjectId(object_id(id).ok()?);
        let collection = self.read().ok()?;
        let doc = collection
            .documents
            .iter()
            .find(|doc| doc.get(ID_FIELD) == Some(&oid))?;
        EntryStatus::try_from(doc.get_i32(STATUS_FIELD).ok()?).ok()
    }

    /// Ids of every stored document that carries an ObjectId.
    pub fn entry_ids(&self) -> Vec<EntryId> {
        self.read()
            .map(|c| {
                c.documents
                    .iter()
                    .filter_map(|doc| doc.get_object_id(ID_FIELD).ok())
                    .map(|oid| EntryId::from_bytes(oid.bytes()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn index_names(&self) -> Vec<String> {
        self.read()
            .map(|c| c.indexes.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.read().map(|c| c.documents.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn take_injected_conflict(&self) -> bool {
        self.pending_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl MetadataStore for InMemoryMetadataStore {
    fn connect(&self) -> StorageResult<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn ensure_call_reference_index(&self) -> StorageResult<bool> {
        self.ensure_connected()?;
        Ok(self.write()?.indexes.insert(CALL_REFERENCE_INDEX.to_owned()))
    }

    fn insert(&self, doc: Document) -> StorageResult<InsertOutcome> {
        self.ensure_connected()?;
        self.insert_attempts.fetch_add(1, Ordering::SeqCst);
        if self.take_injected_conflict() {
            return Ok(InsertOutcome::Conflict);
        }
        let mut collection = self.write()?;
        if collection.conflicts(&doc) {
            return Ok(InsertOutcome::Conflict);
        }
        collection.documents.push(doc);
        Ok(InsertOutcome::Inserted)
    }

    fn find_by_call_reference(&self, call_reference: &str) -> StorageResult<Option<Document>> {
        self.ensure_connected()?;
        let collection = self.read()?;
        Ok(collection
            .documents
            .iter()
            .find(|doc| doc.get_str(CALL_REFERENCE_FIELD).ok() == Some(call_reference))
            .cloned())
    }

    fn set_status(&self, id: &EntryId, status: EntryStatus) -> StorageResult<()> {
        self.ensure_connected()?;
        if self.fail_status_updates.load(Ordering::SeqCst) {
            return Err(StorageError::Connection("status update rejected".into()));
        }
        let oid = Bson::ObjectId(object_id(id)?);
        let mut collection = self.write()?;
        let doc = collection
            .by_id_mut(&oid)
            .ok_or_else(|| StorageError::NotFound(id.to_hex()))?;
        if doc.get_i32(STATUS_FIELD).ok() == Some(EntryStatus::Waiting.as_i32()) {
            doc.insert(STATUS_FIELD, status.as_i32());
        }
        Ok(())
    }

    fn disconnect(&self) -> StorageResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

impl std::fmt::Debug for InMemoryMetadataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryMetadataStore")
            .field("document_count", &self.len())
            .field("connected", &self.is_connected())
            .finish()
    }
}
