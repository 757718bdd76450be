//! The persisted shape of an entry in the document store.
//!
//! Field names and status integers are shared with existing deployments and
//! must stay exactly as they are.

use chrono::{DateTime, Utc};
use mongodb::bson::{self, oid::ObjectId, DateTime as BsonDateTime, Document};
use serde::{Deserialize, Serialize};

use crate::entry::{Author, Entry, EntryId};
use crate::error::{StorageError, StorageResult};
use crate::status::EntryStatus;
use crate::token::CallReference;

pub const ID_FIELD: &str = "_id";
pub const STATUS_FIELD: &str = "status";
pub const CALL_REFERENCE_FIELD: &str = "call_reference";
pub const AUTHOR_FIELD: &str = "author";
pub const FILENAME_FIELD: &str = "filename";
pub const CONTENT_TYPE_FIELD: &str = "content_type";
pub const UPLOAD_DATE_FIELD: &str = "upload_date";

/// One entry as stored in the document store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntryRecord {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub status: i32,
    pub call_reference: String,
    pub author: String,
    pub filename: String,
    pub content_type: String,
    pub upload_date: BsonDateTime,
}

impl EntryRecord {
    /// A freshly inserted record: status `waiting`, no bytes written yet.
    pub fn waiting(id: ObjectId, call_reference: &CallReference, entry: &Entry) -> Self {
        Self {
            id,
            status: EntryStatus::Waiting.as_i32(),
            call_reference: call_reference.as_str().to_owned(),
            author: entry.author.as_str().to_owned(),
            filename: entry.filename.clone(),
            content_type: entry.content_type.clone(),
            upload_date: BsonDateTime::from_millis(entry.upload_date.timestamp_millis()),
        }
    }

    pub fn to_document(&self) -> StorageResult<Document> {
        bson::to_document(self)
            .map_err(|e| StorageError::Decode(format!("cannot encode entry record: {e}")))
    }

    /// Decode and validate a stored document.
    pub fn from_document(doc: Document) -> StorageResult<Self> {
        let record: Self = bson::from_document(doc)?;
        record.status()?;
        record.call_reference()?;
        Ok(record)
    }

    pub fn status(&self) -> StorageResult<EntryStatus> {
        EntryStatus::try_from(self.status)
    }

    pub fn call_reference(&self) -> StorageResult<CallReference> {
        CallReference::parse(&self.call_reference)
    }

    pub fn entry_id(&self) -> EntryId {
        EntryId::from_bytes(self.id.bytes())
    }

    /// Convert into an [`Entry`] without a reader.
    pub fn into_entry(self) -> StorageResult<Entry> {
        let call_reference = self.call_reference()?;
        let millis = self.upload_date.timestamp_millis();
        let upload_date = DateTime::<Utc>::from_timestamp_millis(millis)
            .ok_or_else(|| StorageError::Decode(format!("upload date {millis} out of range")))?;
        Ok(Entry {
            id: Some(self.entry_id()),
            call_reference: Some(call_reference),
            author: Author::new(self.author),
            filename: self.filename,
            content_type: self.content_type,
            upload_date,
            reader: None,
        })
    }
}

/// Convert an [`EntryId`] back into the 12-byte ObjectId it came from.
pub fn object_id(id: &EntryId) -> StorageResult<ObjectId> {
    let bytes: [u8; 12] = id.as_bytes().try_into().map_err(|_| {
        StorageError::Decode(format!(
            "entry id {id} is {} bytes, expected 12",
            id.as_bytes().len()
        ))
    })?;
    Ok(ObjectId::from_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::doc;

    fn sample_record() -> EntryRecord {
        let entry = Entry::new(Author::new("a testing person"), "testfile.png", "my/mime/type");
        let token = CallReference::parse("aB3dE9").unwrap();
        EntryRecord::waiting(ObjectId::new(), &token, &entry)
    }

    #[test]
    fn document_uses_persisted_field_names() {
        let doc = sample_record().to_document().unwrap();
        for field in [
            ID_FIELD,
            STATUS_FIELD,
            CALL_REFERENCE_FIELD,
            AUTHOR_FIELD,
            FILENAME_FIELD,
            CONTENT_TYPE_FIELD,
            UPLOAD_DATE_FIELD,
        ] {
            assert!(doc.contains_key(field), "missing {field}");
        }
        assert_eq!(doc.get_i32(STATUS_FIELD).unwrap(), 0);
        assert!(doc.get_object_id(ID_FIELD).is_ok());
        assert!(doc.get_datetime(UPLOAD_DATE_FIELD).is_ok());
    }

    #[test]
    fn decode_valid_document() {
        let record = sample_record();
        let decoded = EntryRecord::from_document(record.to_document().unwrap()).unwrap();
        assert_eq!(decoded, record);
        let entry = decoded.into_entry().unwrap();
        assert_eq!(entry.filename, "testfile.png");
        assert_eq!(entry.call_reference.unwrap().as_str(), "aB3dE9");
        assert_eq!(entry.id.unwrap().as_bytes().len(), 12);
    }

    #[test]
    fn decode_rejects_wrong_field_type() {
        let mut doc = sample_record().to_document().unwrap();
        doc.insert(FILENAME_FIELD, 42);
        assert!(matches!(EntryRecord::from_document(doc), Err(StorageError::Decode(_))));
    }

    #[test]
    fn decode_rejects_missing_field() {
        let mut doc = sample_record().to_document().unwrap();
        doc.remove(AUTHOR_FIELD);
        assert!(matches!(EntryRecord::from_document(doc), Err(StorageError::Decode(_))));
    }

    #[test]
    fn decode_rejects_unknown_status() {
        let mut doc = sample_record().to_document().unwrap();
        doc.insert(STATUS_FIELD, 9);
        assert!(matches!(EntryRecord::from_document(doc), Err(StorageError::Decode(_))));
    }

    #[test]
    fn decode_rejects_malformed_call_reference() {
        let doc = doc! {
            ID_FIELD: ObjectId::new(),
            STATUS_FIELD: 1,
            CALL_REFERENCE_FIELD: "no!",
            AUTHOR_FIELD: "x",
            FILENAME_FIELD: "y",
            CONTENT_TYPE_FIELD: "text/plain",
            UPLOAD_DATE_FIELD: BsonDateTime::now(),
        };
        assert!(matches!(EntryRecord::from_document(doc), Err(StorageError::Decode(_))));
    }

    #[test]
    fn upload_date_keeps_millisecond_precision() {
        let record = sample_record();
        let original = record.upload_date.timestamp_millis();
        let entry = record.into_entry().unwrap();
        assert_eq!(entry.upload_date.timestamp_millis(), original);
    }

    #[test]
    fn object_id_roundtrip() {
        let oid = ObjectId::new();
        let id = EntryId::from_bytes(oid.bytes());
        assert_eq!(object_id(&id).unwrap(), oid);
        assert!(matches!(
            object_id(&EntryId::from_bytes([0u8; 16])),
            Err(StorageError::Decode(_))
        ));
    }
}
