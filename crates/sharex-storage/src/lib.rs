//! Storage engine for the ShareX upload server.
//!
//! An upload is an [`Entry`]: metadata (author, filename, content type,
//! upload date) plus a byte stream. Storing an entry assigns it an opaque
//! [`EntryId`] and a short public [`CallReference`] that clients use to
//! fetch it back.
//!
//! # Storage Backends
//!
//! All backends implement the [`StorageEngine`] trait:
//!
//! - [`DocumentStorage`] -- metadata in a document store, bytes in one file
//!   per entry. Backed by MongoDB via [`MongoMetadataStore`].
//! - [`MemoryStorage`] -- everything in process memory, for tests and
//!   embedding.
//!
//! # Entry Lifecycle
//!
//! 1. `store` registers the metadata with status `waiting` and returns an
//!    [`EntryWriter`].
//! 2. Bytes are streamed into the writer.
//! 3. Closing the writer moves the entry to `activated`, or to `failed` if
//!    the bytes could not be persisted. The status update is best-effort.
//! 4. `request` returns the entry with an unopened [`LazyReader`].

pub mod config;
pub mod document;
pub mod entry;
pub mod error;
pub mod memory;
pub mod metadata;
pub mod reader;
pub mod record;
pub mod status;
pub mod token;
pub mod traits;
pub mod writer;

#[cfg(test)]
mod testing;

// Re-export primary types at crate root for ergonomic imports.
pub use config::{DocumentStorageConfig, MongoStorageConfig, DEFAULT_MAX_INSERT_ATTEMPTS};
pub use document::DocumentStorage;
pub use entry::{Author, Entry, EntryId};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryStorage;
pub use metadata::{InMemoryMetadataStore, InsertOutcome, MetadataStore, MongoMetadataStore};
pub use reader::{FileReader, LazyReader, MemoryReader};
pub use record::EntryRecord;
pub use status::EntryStatus;
pub use token::{CallReference, TokenGenerator, CALL_REFERENCE_ALPHABET, CALL_REFERENCE_LENGTH};
pub use traits::StorageEngine;
pub use writer::{ByteSink, EntryWriter, StatusRecorder, StatusWriter};
