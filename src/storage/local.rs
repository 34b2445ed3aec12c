//! Local filesystem blob storage.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use log::debug;
use std::path::{Path, PathBuf};
use tokio::fs;

use super::{BlobReader, BlobStore, StorageError, StorageResult};

/// Blobs stored as flat files in one directory.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Create the storage directory if needed.
    pub async fn ensure_dir(&self) -> StorageResult<()> {
        fs::create_dir_all(&self.base_path).await?;
        Ok(())
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn full_path(&self, name: &str) -> StorageResult<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(StorageError::InvalidName(name.to_string()));
        }
        Ok(self.base_path.join(name))
    }
}

/// `<unix nanos><.ext>`, keeping the extension of the original filename.
pub fn storage_name_for(original_name: &str, nanos: i64) -> String {
    let ext = Path::new(original_name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && !e.contains(['/', '\\']))
        .map(|e| format!(".{e}"))
        .unwrap_or_default();
    format!("{nanos}{ext}")
}

fn not_found_or_io(name: &str, err: std::io::Error) -> StorageError {
    if err.kind() == std::io::ErrorKind::NotFound {
        StorageError::NotFound(name.to_string())
    } else {
        StorageError::Io(err)
    }
}

#[async_trait]
impl BlobStore for LocalStorage {
    fn generate_name(&self, original_name: &str) -> String {
        let now = Utc::now();
        let nanos = now
            .timestamp_nanos_opt()
            .unwrap_or_else(|| now.timestamp_micros().saturating_mul(1000));
        storage_name_for(original_name, nanos)
    }

    async fn write(&self, name: &str, data: Bytes) -> StorageResult<()> {
        let path = self.full_path(name)?;
        self.ensure_dir().await?;
        fs::write(&path, &data).await?;
        debug!("Wrote {} bytes to {}", data.len(), path.display());
        Ok(())
    }

    async fn open(&self, name: &str) -> StorageResult<BlobReader> {
        let path = self.full_path(name)?;
        let file = fs::File::open(&path)
            .await
            .map_err(|e| not_found_or_io(name, e))?;
        let size = file.metadata().await?.len();
        Ok(BlobReader {
            reader: Box::new(file),
            size,
        })
    }

    async fn delete(&self, name: &str) -> StorageResult<()> {
        let path = self.full_path(name)?;
        fs::remove_file(&path)
            .await
            .map_err(|e| not_found_or_io(name, e))?;
        debug!("Deleted blob {}", path.display());
        Ok(())
    }
}
