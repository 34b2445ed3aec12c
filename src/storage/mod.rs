//! Attachment blob storage.
//!
//! Attachments are stored as opaque blobs named by a generated storage
//! name; the chat log keeps the mapping to the original filename.

mod error;
mod local;
mod traits;

pub use error::{StorageError, StorageResult};
pub use local::{LocalStorage, storage_name_for};
pub use traits::{BlobReader, BlobStore};
