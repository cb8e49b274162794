//! On-disk content-addressed blob storage under `<data-dir>/store/`.
//!
//! Record values live in memory in the [`super::ContentStore`] for fast
//! lookup; large file-piece payloads are additionally persisted here so
//! they survive a daemon restart without being kept resident.

use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::{Error, Result};
use crate::identity::ContentKey;

pub struct BlobStore {
    root: std::path::PathBuf,
}

impl BlobStore {
    pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
        BlobStore { root: root.into() }
    }

    fn path_for(&self, key: &ContentKey) -> std::path::PathBuf {
        let hex = key.to_hex();
        self.root.join(&hex[..2]).join(&hex[2..])
    }

    pub async fn put(&self, key: &ContentKey, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = fs::File::create(&path).await?;
        file.write_all(bytes).await?;
        Ok(())
    }

    pub async fn get(&self, key: &ContentKey) -> Result<Vec<u8>> {
        let path = self.path_for(key);
        fs::read(&path)
            .await
            .map_err(|_| Error::NotFound(format!("blob {key} not on disk")))
    }

    pub async fn remove(&self, key: &ContentKey) -> Result<()> {
        let path = self.path_for(key);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e.to_string())),
        }
    }

    pub async fn contains(&self, key: &ContentKey) -> bool {
        fs::metadata(self.path_for(key)).await.is_ok()
    }

    /// Enumerates every key currently persisted on disk, for restoring the
    /// in-memory store at daemon startup.
    pub async fn list_keys(&self) -> Result<Vec<ContentKey>> {
        let mut keys = Vec::new();
        let mut top = match fs::read_dir(&self.root).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(keys),
            Err(e) => return Err(Error::Io(e.to_string())),
        };
        while let Some(entry) = top.next_entry().await.map_err(|e| Error::Io(e.to_string()))? {
            if !entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let prefix = entry.file_name().to_string_lossy().to_string();
            let mut inner = fs::read_dir(entry.path()).await.map_err(|e| Error::Io(e.to_string()))?;
            while let Some(file) = inner.next_entry().await.map_err(|e| Error::Io(e.to_string()))? {
                let suffix = file.file_name().to_string_lossy().to_string();
                if let Some(key) = ContentKey::from_hex(&format!("{prefix}{suffix}")) {
                    keys.push(key);
                }
            }
        }
        Ok(keys)
    }
}
