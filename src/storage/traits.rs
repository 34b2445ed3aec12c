//! Blob storage trait definitions.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncRead;

use super::StorageResult;

/// Readable handle to a stored blob.
pub struct BlobReader {
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    /// Size in bytes.
    pub size: u64,
}

impl std::fmt::Debug for BlobReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobReader").field("size", &self.size).finish()
    }
}

/// Storage for attachment bytes, addressed by generated storage name.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Pick a fresh storage name for an upload called `original_name`.
    fn generate_name(&self, original_name: &str) -> String;

    /// Write a blob, replacing any existing one with the same name.
    async fn write(&self, name: &str, data: Bytes) -> StorageResult<()>;

    /// Open a blob for streaming.
    async fn open(&self, name: &str) -> StorageResult<BlobReader>;

    /// Delete a blob.
    async fn delete(&self, name: &str) -> StorageResult<()>;
}
