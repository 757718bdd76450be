//! The document store boundary used by [`DocumentStorage`](crate::DocumentStorage).
//!
//! A [`MetadataStore`] persists one document per entry and provides the two
//! primitives the engine relies on: an atomic insert that reports uniqueness
//! conflicts, and lookup by call reference.

pub mod memory;
pub mod mongo;

use mongodb::bson::Document;

use crate::entry::EntryId;
use crate::error::StorageResult;
use crate::status::EntryStatus;

pub use memory::InMemoryMetadataStore;
pub use mongo::MongoMetadataStore;

/// Name of the unique index on the call reference field.
pub const CALL_REFERENCE_INDEX: &str = "call_reference_unique";

/// Result of an insert attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// Another document already holds the `_id` or call reference.
    Conflict,
}

/// Persistence for entry metadata documents.
///
/// Implementations must be thread-safe: `insert`, `find_by_call_reference`
/// and `set_status` are called concurrently from request handlers and from
/// background status updates.
pub trait MetadataStore: Send + Sync + 'static {
    /// Establish the connection. Fails with `Connection` if unreachable.
    fn connect(&self) -> StorageResult<()>;

    /// Create the unique call reference index unless it already exists.
    ///
    /// Returns `true` if the index was created by this call.
    fn ensure_call_reference_index(&self) -> StorageResult<bool>;

    /// Insert a document, reporting uniqueness violations as
    /// [`InsertOutcome::Conflict`] rather than as an error.
    fn insert(&self, doc: Document) -> StorageResult<InsertOutcome>;

    /// Find the single document carrying `call_reference`.
    fn find_by_call_reference(&self, call_reference: &str) -> StorageResult<Option<Document>>;

    /// Move the document with the given id out of `waiting`.
    ///
    /// Only a `waiting` document is updated; a terminal status is never
    /// overwritten and the call is then a no-op.
    fn set_status(&self, id: &EntryId, status: EntryStatus) -> StorageResult<()>;

    /// End the session.
    fn disconnect(&self) -> StorageResult<()>;
}
