//! MongoDB implementation of [`MetadataStore`].

use std::sync::{RwLock, RwLockReadGuard};

use mongodb::bson::{doc, Document};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{ClientOptions, Credential, IndexOptions, ServerAddress};
use mongodb::sync::{Client, Collection};
use mongodb::IndexModel;
use tracing::{debug, info};

use crate::config::MongoStorageConfig;
use crate::entry::EntryId;
use crate::error::{StorageError, StorageResult};
use crate::metadata::{InsertOutcome, MetadataStore, CALL_REFERENCE_INDEX};
use crate::record::{object_id, CALL_REFERENCE_FIELD, ID_FIELD, STATUS_FIELD};
use crate::status::EntryStatus;

/// Server error code for a unique index violation.
const DUPLICATE_KEY_CODE: i32 = 11000;

struct Session {
    client: Client,
    collection: Collection<Document>,
}

/// Metadata store backed by a MongoDB collection.
pub struct MongoMetadataStore {
    config: MongoStorageConfig,
    session: RwLock<Option<Session>>,
}

impl MongoMetadataStore {
    pub fn new(config: MongoStorageConfig) -> Self {
        Self {
            config,
            session: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &MongoStorageConfig {
        &self.config
    }

    fn client_options(&self) -> StorageResult<ClientOptions> {
        let address = ServerAddress::parse(&self.config.address)?;
        let timeout = self.config.connect_timeout();

        let mut options = ClientOptions::default();
        options.hosts = vec![address];
        options.app_name = Some("sharexserver".into());
        options.connect_timeout = Some(timeout);
        options.server_selection_timeout = Some(timeout);
        if !self.config.auth_user.is_empty() {
            let mut credential = Credential::default();
            credential.username = Some(self.config.auth_user.clone());
            credential.password = Some(self.config.auth_passwd.clone());
            if !self.config.auth_db.is_empty() {
                credential.source = Some(self.config.auth_db.clone());
            }
            options.credential = Some(credential);
        }
        Ok(options)
    }

    fn session(&self) -> StorageResult<RwLockReadGuard<'_, Option<Session>>> {
        let guard = self
            .session
            .read()
            .map_err(|e| StorageError::Connection(format!("lock poisoned: {e}")))?;
        if guard.is_none() {
            return Err(StorageError::Connection("not connected to MongoDB".into()));
        }
        Ok(guard)
    }

    fn with_collection<T>(
        &self,
        op: impl FnOnce(&Collection<Document>) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let guard = self.session()?;
        match guard.as_ref() {
            Some(session) => op(&session.collection),
            None => Err(StorageError::Connection("not connected to MongoDB".into())),
        }
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write_error)) if write_error.code == DUPLICATE_KEY_CODE
    )
}

impl MetadataStore for MongoMetadataStore {
    fn connect(&self) -> StorageResult<()> {
        let client = Client::with_options(self.client_options()?)?;
        // The driver connects lazily; ping so an unreachable server fails here.
        client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)?;
        let collection = client
            .database(&self.config.storage_db)
            .collection::<Document>(&self.config.storage_file_col);
        info!(
            address = %self.config.address,
            database = %self.config.storage_db,
            collection = %self.config.storage_file_col,
            "connected to MongoDB"
        );
        let mut session = self
            .session
            .write()
            .map_err(|e| StorageError::Connection(format!("lock poisoned: {e}")))?;
        *session = Some(Session { client, collection });
        Ok(())
    }

    fn ensure_call_reference_index(&self) -> StorageResult<bool> {
        let guard = self.session()?;
        let Some(session) = guard.as_ref() else {
            return Err(StorageError::Connection("not connected to MongoDB".into()));
        };
        let existing = session
            .client
            .database(&self.config.storage_db)
            .list_collection_names(None)?;
        if existing.contains(&self.config.storage_file_col) {
            let indexes = session.collection.list_index_names()?;
            if indexes.iter().any(|name| name == CALL_REFERENCE_INDEX) {
                debug!(index = CALL_REFERENCE_INDEX, "call reference index already present");
                return Ok(false);
            }
        }
        let options = IndexOptions::builder()
            .name(CALL_REFERENCE_INDEX.to_string())
            .unique(true)
            .build();
        let model = IndexModel::builder()
            .keys(doc! { CALL_REFERENCE_FIELD: 1 })
            .options(options)
            .build();
        session.collection.create_index(model, None)?;
        info!(index = CALL_REFERENCE_INDEX, "created call reference index");
        Ok(true)
    }

    fn insert(&self, doc: Document) -> StorageResult<InsertOutcome> {
        self.with_collection(|collection| match collection.insert_one(doc, None) {
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(err) if is_duplicate_key(&err) => Ok(InsertOutcome::Conflict),
            Err(err) => Err(err.into()),
        })
    }

    fn find_by_call_reference(&self, call_reference: &str) -> StorageResult<Option<Document>> {
        self.with_collection(|collection| {
            Ok(collection.find_one(doc! { CALL_REFERENCE_FIELD: call_reference }, None)?)
        })
    }

    fn set_status(&self, id: &EntryId, status: EntryStatus) -> StorageResult<()> {
        let oid = object_id(id)?;
        self.with_collection(|collection| {
            collection.update_one(
                doc! { ID_FIELD: oid, STATUS_FIELD: EntryStatus::Waiting.as_i32() },
                doc! { "$set": { STATUS_FIELD: status.as_i32() } },
                None,
            )?;
            Ok(())
        })
    }

    fn disconnect(&self) -> StorageResult<()> {
        let session = self
            .session
            .write()
            .map_err(|e| StorageError::Connection(format!("lock poisoned: {e}")))?
            .take();
        if let Some(Session { client, collection }) = session {
            drop(collection);
            // Ends the server sessions before the connection pools close.
            client.shutdown();
            info!("disconnected from MongoDB");
        }
        Ok(())
    }
}

impl std::fmt::Debug for MongoMetadataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MongoMetadataStore")
            .field("address", &self.config.address)
            .field("database", &self.config.storage_db)
            .field("collection", &self.config.storage_file_col)
            .finish()
    }
}
