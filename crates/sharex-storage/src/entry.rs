use std::fmt;

use chrono::{DateTime, Utc};

use crate::error::{StorageError, StorageResult};
use crate::reader::LazyReader;
use crate::token::CallReference;

/// Opaque identifier assigned by the backing store when an entry is created.
///
/// The bytes are engine-specific (a 12-byte ObjectId for the document
/// engine, a 16-byte UUID for the in-memory engine). The hex form names the
/// entry's byte-stream file.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(Vec<u8>);

impl EntryId {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Hex-encoded string representation.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    /// Short hex representation (first 8 characters).
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..self.0.len().min(4)])
    }

    /// Parse from a hex string.
    pub fn from_hex(s: &str) -> StorageResult<Self> {
        if s.is_empty() {
            return Err(StorageError::Decode("empty entry id".into()));
        }
        hex::decode(s)
            .map(Self)
            .map_err(|e| StorageError::Decode(format!("invalid entry id {s:?}: {e}")))
    }
}

impl fmt::Debug for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntryId({})", self.short_hex())
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Identifies the uploader of an entry.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Author(String);

impl Author {
    /// Placeholder used for anonymous uploads.
    pub const ANONYMOUS: &'static str = "default user";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn anonymous() -> Self {
        Self(Self::ANONYMOUS.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Author {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Metadata for one uploaded file.
///
/// Callers populate `author`, `filename`, `content_type` and `upload_date`
/// and hand the entry to `StorageEngine::store`, which assigns `id` and
/// `call_reference`. Entries returned by `StorageEngine::request` carry an
/// unopened `reader` over the stored bytes.
pub struct Entry {
    pub id: Option<EntryId>,
    pub call_reference: Option<CallReference>,
    pub author: Author,
    pub filename: String,
    pub content_type: String,
    pub upload_date: DateTime<Utc>,
    pub reader: Option<Box<dyn LazyReader>>,
}

impl Entry {
    /// A new entry stamped with the current time.
    pub fn new(author: Author, filename: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            id: None,
            call_reference: None,
            author,
            filename: filename.into(),
            content_type: content_type.into(),
            upload_date: Utc::now(),
            reader: None,
        }
    }

    /// Take the reader out of a requested entry.
    pub fn take_reader(&mut self) -> StorageResult<Box<dyn LazyReader>> {
        self.reader.take().ok_or(StorageError::MissingReader)
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("id", &self.id)
            .field("call_reference", &self.call_reference)
            .field("author", &self.author)
            .field("filename", &self.filename)
            .field("content_type", &self.content_type)
            .field("upload_date", &self.upload_date)
            .field("reader", &self.reader.as_ref().map(|r| r.is_open()))
            .finish()
    }
}
