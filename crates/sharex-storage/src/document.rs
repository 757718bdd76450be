//! The document-backed storage engine.
//!
//! Metadata lives in a [`MetadataStore`] (MongoDB in production), bytes live
//! in `<root>/<entry id hex>`. The two are tied together by the persisted
//! status: an entry is inserted as `waiting` before its file is created and
//! moves to `activated` or `failed` when its writer is closed.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use mongodb::bson::oid::ObjectId;
use tracing::{debug, info, warn};

use crate::config::{DocumentStorageConfig, MongoStorageConfig};
use crate::entry::{Entry, EntryId};
use crate::error::{StorageError, StorageResult};
use crate::metadata::{InsertOutcome, MetadataStore, MongoMetadataStore};
use crate::reader::FileReader;
use crate::record::EntryRecord;
use crate::status::EntryStatus;
use crate::token::{CallReference, TokenGenerator};
use crate::traits::StorageEngine;
use crate::writer::{spawn_status_update, EntryWriter, StatusRecorder, StatusWriter};

/// Routes writer status transitions to the metadata store.
struct MetadataStatus(Arc<dyn MetadataStore>);

impl StatusRecorder for MetadataStatus {
    fn record_status(&self, id: &EntryId, status: EntryStatus) -> StorageResult<()> {
        self.0.set_status(id, status)
    }
}

/// Storage engine persisting metadata in a document store and bytes as files.
pub struct DocumentStorage {
    config: DocumentStorageConfig,
    metadata: Arc<dyn MetadataStore>,
    recorder: Arc<dyn StatusRecorder>,
    tokens: TokenGenerator,
    initialized: AtomicBool,
}

impl DocumentStorage {
    pub fn new(metadata: Arc<dyn MetadataStore>, config: DocumentStorageConfig) -> Self {
        let recorder: Arc<dyn StatusRecorder> = Arc::new(MetadataStatus(Arc::clone(&metadata)));
        Self {
            config,
            metadata,
            recorder,
            tokens: TokenGenerator::new(),
            initialized: AtomicBool::new(false),
        }
    }

    /// The `MongoDB+file` engine.
    pub fn mongo(config: MongoStorageConfig) -> Self {
        let storage = config.storage_config();
        Self::new(Arc::new(MongoMetadataStore::new(config)), storage)
    }

    pub fn config(&self) -> &DocumentStorageConfig {
        &self.config
    }

    /// Path of the byte-stream file for an entry.
    pub fn entry_path(&self, id: &EntryId) -> PathBuf {
        self.config.root.join(id.to_hex())
    }

    fn ensure_initialized(&self) -> StorageResult<()> {
        if self.initialized.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(StorageError::NotInitialized)
        }
    }

    /// Insert a `waiting` record, regenerating id and token on conflicts.
    fn insert_record(&self, entry: &Entry) -> StorageResult<(EntryRecord, CallReference)> {
        let max_attempts = self.config.max_insert_attempts;
        for attempt in 1..=max_attempts {
            let token = self.tokens.generate();
            let record = EntryRecord::waiting(ObjectId::new(), &token, entry);
            match self.metadata.insert(record.to_document()?)? {
                InsertOutcome::Inserted => return Ok((record, token)),
                InsertOutcome::Conflict => {
                    debug!(attempt, call_reference = %token, "call reference taken, retrying");
                }
            }
        }
        warn!(attempts = max_attempts, "no free call reference found");
        Err(StorageError::Exhausted {
            attempts: max_attempts,
        })
    }
}

impl StorageEngine for DocumentStorage {
    fn name(&self) -> &'static str {
        "MongoDB+file"
    }

    fn initialize(&mut self) -> StorageResult<()> {
        fs::create_dir_all(&self.config.root).map_err(|e| {
            StorageError::Connection(format!(
                "cannot create storage folder {}: {e}",
                self.config.root.display()
            ))
        })?;
        self.metadata.connect()?;
        let created = self.metadata.ensure_call_reference_index()?;
        self.initialized.store(true, Ordering::Release);
        info!(
            root = %self.config.root.display(),
            index_created = created,
            "document storage initialized"
        );
        Ok(())
    }

    fn store(&self, entry: &mut Entry) -> StorageResult<Box<dyn EntryWriter>> {
        self.ensure_initialized()?;
        let (record, token) = self.insert_record(entry)?;
        let id = record.entry_id();
        let path = self.entry_path(&id);
        let file = match File::create(&path) {
            Ok(file) => file,
            Err(err) => {
                warn!(id = %id, path = %path.display(), error = %err, "cannot create entry file");
                spawn_status_update(Arc::clone(&self.recorder), id, EntryStatus::Failed);
                return Err(StorageError::Write(err));
            }
        };
        debug!(id = %id, call_reference = %token, filename = %entry.filename, "entry registered");
        entry.id = Some(id.clone());
        entry.call_reference = Some(token);
        Ok(Box::new(StatusWriter::new(
            BufWriter::new(file),
            id,
            Arc::clone(&self.recorder),
        )))
    }

    fn request(&self, call_reference: &str) -> StorageResult<Entry> {
        self.ensure_initialized()?;
        let doc = self
            .metadata
            .find_by_call_reference(call_reference)?
            .ok_or_else(|| StorageError::NotFound(call_reference.to_owned()))?;
        let record = EntryRecord::from_document(doc)?;
        let path = self.entry_path(&record.entry_id());
        let mut entry = record.into_entry()?;
        entry.reader = Some(Box::new(FileReader::new(path)));
        Ok(entry)
    }

    fn close(&self) -> StorageResult<()> {
        self.initialized.store(false, Ordering::Release);
        self.metadata.disconnect()
    }
}

impl std::fmt::Debug for DocumentStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStorage")
            .field("root", &self.config.root)
            .field("initialized", &self.initialized.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Author;
    use crate::metadata::{InMemoryMetadataStore, CALL_REFERENCE_INDEX};
    use crate::record::{CALL_REFERENCE_FIELD, FILENAME_FIELD, ID_FIELD};
    use crate::testing::{self, PAYLOAD};
    use crate::writer::tests::eventually;
    use mongodb::bson::doc;
    use std::collections::HashSet;
    use std::io::Write;
    use std::thread;
    use std::time::Duration;

    struct Fixture {
        _dir: tempfile::TempDir,
        root: PathBuf,
        metadata: Arc<InMemoryMetadataStore>,
        engine: DocumentStorage,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("nested").join("files");
        let metadata = Arc::new(InMemoryMetadataStore::new());
        let engine = DocumentStorage::new(metadata.clone(), DocumentStorageConfig::new(&root));
        Fixture {
            _dir: dir,
            root,
            metadata,
            engine,
        }
    }

    fn initialized() -> Fixture {
        let mut f = fixture();
        f.engine.initialize().unwrap();
        f
    }

    fn new_entry() -> Entry {
        Entry::new(Author::new("a testing person"), "testfile.png", "my/mime/type")
    }

    fn status_eventually(f: &Fixture, id: &EntryId, expected: EntryStatus) {
        let status = eventually(|| f.metadata.status_of(id).filter(|s| s.is_terminal()));
        assert_eq!(status, expected);
    }

    // -----------------------------------------------------------------------
    // Initialize
    // -----------------------------------------------------------------------

    #[test]
    fn initialize_creates_root_and_index() {
        let f = initialized();
        assert!(f.root.is_dir());
        assert!(f.metadata.is_connected());
        assert_eq!(f.metadata.index_names(), vec![CALL_REFERENCE_INDEX.to_owned()]);
    }

    #[test]
    fn initialize_twice_keeps_single_index() {
        let mut f = initialized();
        f.engine.initialize().unwrap();
        assert_eq!(f.metadata.index_names().len(), 1);
    }

    #[test]
    fn initialize_fails_when_root_cannot_be_created() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("occupied");
        File::create(&blocker).unwrap();
        let mut engine = DocumentStorage::new(
            Arc::new(InMemoryMetadataStore::new()),
            DocumentStorageConfig::new(blocker.join("files")),
        );
        assert!(matches!(engine.initialize(), Err(StorageError::Connection(_))));
    }

    #[test]
    fn operations_before_initialize_fail() {
        let f = fixture();
        assert!(matches!(f.engine.store(&mut new_entry()), Err(StorageError::NotInitialized)));
        assert!(matches!(f.engine.request("abcdef"), Err(StorageError::NotInitialized)));
    }

    // -----------------------------------------------------------------------
    // Store / Request
    // -----------------------------------------------------------------------

    #[test]
    fn contract_round_trip() {
        let f = initialized();
        testing::round_trip(&f.engine);
    }

    #[test]
    fn contract_round_trip_without_newline() {
        let f = initialized();
        testing::round_trip_with(&f.engine, testing::BARE_PAYLOAD);
    }

    #[test]
    fn contract_not_found() {
        let f = initialized();
        testing::unknown_reference_is_not_found(&f.engine);
    }

    #[test]
    fn contract_unique_references() {
        let f = initialized();
        testing::references_are_unique(&f.engine, 200);
    }

    #[test]
    fn bytes_live_in_file_named_by_id() {
        let f = initialized();
        let mut entry = new_entry();
        let mut writer = f.engine.store(&mut entry).unwrap();
        writer.write_all(PAYLOAD).unwrap();
        writer.close().unwrap();

        let id = entry.id.unwrap();
        assert_eq!(id.as_bytes().len(), 12);
        let path = f.root.join(id.to_hex());
        assert_eq!(std::fs::read(path).unwrap(), PAYLOAD);
        assert_eq!(std::fs::read_dir(&f.root).unwrap().count(), 1);
    }

    #[test]
    fn request_returns_metadata_and_unopened_reader() {
        let f = initialized();
        let mut entry = new_entry();
        f.engine.store(&mut entry).unwrap().close().unwrap();

        let reference = entry.call_reference.clone().unwrap();
        let found = f.engine.request(reference.as_str()).unwrap();
        assert_eq!(found.id, entry.id);
        assert_eq!(found.call_reference, Some(reference));
        assert_eq!(found.author.as_str(), "a testing person");
        assert_eq!(found.filename, "testfile.png");
        assert_eq!(found.content_type, "my/mime/type");
        assert_eq!(
            found.upload_date.timestamp_millis(),
            entry.upload_date.timestamp_millis()
        );
        assert!(!found.reader.as_ref().unwrap().is_open());
    }

    #[test]
    fn conflicts_are_retried_transparently() {
        let f = initialized();
        f.metadata.inject_conflicts(3);
        let mut entry = new_entry();
        f.engine.store(&mut entry).unwrap().close().unwrap();
        assert!(entry.call_reference.is_some());
        assert_eq!(f.metadata.insert_attempts(), 4);
        assert_eq!(f.metadata.len(), 1);
    }

    #[test]
    fn real_reference_collision_is_retried() {
        let f = initialized();
        // Occupy a reference, then force the first candidate to collide.
        let mut first = new_entry();
        f.engine.store(&mut first).unwrap().close().unwrap();
        f.metadata.inject_conflicts(1);
        let mut second = new_entry();
        f.engine.store(&mut second).unwrap().close().unwrap();
        assert_ne!(first.call_reference, second.call_reference);
    }

    #[test]
    fn retry_budget_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let metadata = Arc::new(InMemoryMetadataStore::new());
        let config = DocumentStorageConfig {
            root: dir.path().to_path_buf(),
            max_insert_attempts: 3,
        };
        let mut engine = DocumentStorage::new(metadata.clone(), config);
        engine.initialize().unwrap();
        metadata.inject_conflicts(10);

        let mut entry = new_entry();
        let err = engine.store(&mut entry).err().unwrap();
        assert!(matches!(err, StorageError::Exhausted { attempts: 3 }));
        assert!(entry.call_reference.is_none());
        assert!(metadata.is_empty());
    }

    #[test]
    fn malformed_record_is_decode_error() {
        let f = initialized();
        f.metadata
            .insert_raw(doc! {
                ID_FIELD: ObjectId::new(),
                CALL_REFERENCE_FIELD: "broken",
                FILENAME_FIELD: 12,
            })
            .unwrap();
        assert!(matches!(f.engine.request("broken"), Err(StorageError::Decode(_))));
    }

    // -----------------------------------------------------------------------
    // Status lifecycle
    // -----------------------------------------------------------------------

    #[test]
    fn status_is_waiting_until_close() {
        let f = initialized();
        let mut entry = new_entry();
        let mut writer = f.engine.store(&mut entry).unwrap();
        let id = entry.id.clone().unwrap();
        assert_eq!(f.metadata.status_of(&id), Some(EntryStatus::Waiting));

        writer.write_all(PAYLOAD).unwrap();
        writer.close().unwrap();
        status_eventually(&f, &id, EntryStatus::Activated);
    }

    #[test]
    fn aborted_upload_is_failed() {
        let f = initialized();
        let mut entry = new_entry();
        let mut writer = f.engine.store(&mut entry).unwrap();
        writer.write_all(b"partial").unwrap();
        writer.abort().unwrap();
        status_eventually(&f, entry.id.as_ref().unwrap(), EntryStatus::Failed);
    }

    #[test]
    fn unclosed_writer_stays_waiting() {
        let f = initialized();
        let mut entry = new_entry();
        let mut writer = f.engine.store(&mut entry).unwrap();
        writer.write_all(PAYLOAD).unwrap();
        drop(writer);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(
            f.metadata.status_of(entry.id.as_ref().unwrap()),
            Some(EntryStatus::Waiting)
        );
    }

    #[test]
    fn missing_root_fails_store_and_marks_failed() {
        let f = initialized();
        std::fs::remove_dir_all(&f.root).unwrap();
        let err = f.engine.store(&mut new_entry()).err().unwrap();
        assert!(matches!(err, StorageError::Write(_)));
        assert_eq!(f.metadata.len(), 1);
        let id = f.metadata.entry_ids().pop().unwrap();
        status_eventually(&f, &id, EntryStatus::Failed);
    }

    #[test]
    fn status_update_failures_are_swallowed() {
        let f = initialized();
        f.metadata.fail_status_updates(true);
        let mut entry = new_entry();
        let mut writer = f.engine.store(&mut entry).unwrap();
        writer.write_all(PAYLOAD).unwrap();
        writer.close().unwrap();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(
            f.metadata.status_of(entry.id.as_ref().unwrap()),
            Some(EntryStatus::Waiting)
        );
    }

    #[test]
    fn waiting_entries_can_be_requested() {
        let f = initialized();
        let mut entry = new_entry();
        let _writer = f.engine.store(&mut entry).unwrap();
        let found = f.engine.request(entry.call_reference.as_ref().unwrap().as_str());
        assert!(found.is_ok());
    }

    // -----------------------------------------------------------------------
    // Concurrency / shutdown
    // -----------------------------------------------------------------------

    #[test]
    fn concurrent_stores_get_distinct_references() {
        let f = initialized();
        let engine = Arc::new(f.engine);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let engine = Arc::clone(&engine);
                thread::spawn(move || {
                    (0..25)
                        .map(|_| {
                            let mut entry = new_entry();
                            engine.store(&mut entry).unwrap().close().unwrap();
                            entry.call_reference.unwrap()
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let mut seen = HashSet::new();
        for h in handles {
            for reference in h.join().expect("thread should not panic") {
                assert!(seen.insert(reference));
            }
        }
        assert_eq!(seen.len(), 200);
    }

    #[test]
    fn close_disconnects() {
        let f = initialized();
        f.engine.close().unwrap();
        assert!(!f.metadata.is_connected());
        assert!(matches!(f.engine.request("abcdef"), Err(StorageError::NotInitialized)));
    }
}
