//! Behaviour every [`StorageEngine`] must show, run against each engine.

use std::collections::HashSet;
use std::io::{SeekFrom, Write};

use crate::entry::{Author, Entry};
use crate::error::StorageError;
use crate::token::CallReference;
use crate::traits::StorageEngine;

pub(crate) const PAYLOAD: &[u8] = b"Hello, this is a test!\n";

/// The greeting without a line terminator, as a client would usually send it.
pub(crate) const BARE_PAYLOAD: &[u8] = b"Hello, this is a test!";

pub(crate) fn round_trip(engine: &dyn StorageEngine) {
    round_trip_with(engine, PAYLOAD);
}

pub(crate) fn round_trip_with(engine: &dyn StorageEngine, payload: &[u8]) {
    let mut entry = Entry::new(Author::new("a testing person"), "testfile.png", "my/mime/type");
    let mut writer = engine.store(&mut entry).unwrap();
    writer.write_all(payload).unwrap();
    writer.close().unwrap();

    let reference = entry.call_reference.clone().unwrap();
    assert!(CallReference::parse(reference.as_str()).is_ok());

    let mut found = engine.request(reference.as_str()).unwrap();
    assert_eq!(found.id, entry.id);
    assert_eq!(found.filename, "testfile.png");
    assert_eq!(found.content_type, "my/mime/type");

    let mut reader = found.take_reader().unwrap();
    assert!(matches!(reader.read(&mut [0u8; 4]), Err(StorageError::NotOpened)));
    reader.open().unwrap();
    assert_eq!(reader.len().unwrap(), payload.len() as u64);

    let mut out = Vec::new();
    assert_eq!(reader.read_to_end(&mut out).unwrap(), payload.len());
    assert_eq!(out, payload);

    reader.seek(SeekFrom::Start(7)).unwrap();
    let mut tail = Vec::new();
    reader.read_to_end(&mut tail).unwrap();
    assert_eq!(tail, &payload[7..]);
    reader.close().unwrap();
}

pub(crate) fn unknown_reference_is_not_found(engine: &dyn StorageEngine) {
    let err = engine.request("zzzzzz").unwrap_err();
    assert!(err.is_not_found(), "unexpected error: {err}");
}

pub(crate) fn references_are_unique(engine: &dyn StorageEngine, count: usize) {
    let mut seen = HashSet::new();
    for i in 0..count {
        let mut entry = Entry::new(Author::anonymous(), format!("file-{i}"), "text/plain");
        engine.store(&mut entry).unwrap().close().unwrap();
        assert!(seen.insert(entry.call_reference.unwrap()));
    }
}
