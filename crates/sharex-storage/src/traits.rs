use crate::entry::Entry;
use crate::error::StorageResult;
use crate::writer::EntryWriter;

/// A storage engine for uploaded files.
///
/// All implementations must satisfy these invariants:
/// - Call references are unique across all entries at all times.
/// - Each entry's bytes live in their own stream, addressed by the entry id.
/// - Metadata is registered before any byte is written; the bytes of an
///   entry may be missing or incomplete while its status is `waiting`.
/// - `store` and `request` are safe to call concurrently once the engine
///   has been initialized.
pub trait StorageEngine: Send + Sync {
    /// Short name of the engine, as used in configuration.
    fn name(&self) -> &'static str;

    /// Prepare persistent resources. Must succeed before any other call;
    /// running it again re-checks the resources without duplicating them.
    fn initialize(&mut self) -> StorageResult<()>;

    /// Register `entry` and return the sink for its bytes.
    ///
    /// `entry.id` and `entry.call_reference` are ignored on input and set
    /// on success.
    fn store(&self, entry: &mut Entry) -> StorageResult<Box<dyn EntryWriter>>;

    /// Look up an entry by call reference.
    ///
    /// The returned entry carries an unopened reader. Fails with `NotFound`
    /// if no entry has this call reference.
    fn request(&self, call_reference: &str) -> StorageResult<Entry>;

    /// Release held resources. Errors are reported, not retried.
    fn close(&self) -> StorageResult<()>;
}
