//! OS-appropriate data directory layout.
//!
//! Per-OS directory resolution via `dirs`, reduced to the single data
//! directory the daemon needs for its sqlite index, blob store, and bridge
//! socket.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Resolved layout of the daemon's on-disk state under one data directory.
#[derive(Debug, Clone)]
pub struct DataPaths {
    root: PathBuf,
}

impl DataPaths {
    /// Uses the explicit override if given, else the OS data directory
    /// (`~/.local/share/neromon` on Linux, `~/Library/Application
    /// Support/neromon` on macOS, `%APPDATA%\neromon` on Windows).
    pub fn resolve(override_dir: Option<&Path>) -> Result<Self> {
        let root = match override_dir {
            Some(p) => p.to_path_buf(),
            None => dirs::data_dir()
                .ok_or_else(|| Error::Configuration("could not resolve OS data directory".to_string()))?
                .join("neromon"),
        };
        Ok(DataPaths { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sqlite_path(&self) -> PathBuf {
        self.root.join("data.sqlite3")
    }

    pub fn blob_store_dir(&self) -> PathBuf {
        self.root.join("store")
    }

    /// Read-only accessor for the key material directory; the daemon never
    /// writes here itself (key management is an external collaborator).
    pub fn keys_dir(&self) -> PathBuf {
        self.root.join("keys")
    }

    pub fn bridge_socket_path(&self) -> PathBuf {
        self.root.join("bridge.sock")
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join("daemon.toml")
    }

    /// Creates the data, store, and keys directories if absent.
    pub fn ensure_exists(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.blob_store_dir())?;
        std::fs::create_dir_all(self.keys_dir())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_override_dir_is_used_verbatim() {
        let paths = DataPaths::resolve(Some(Path::new("/tmp/neromon-test"))).unwrap();
        assert_eq!(paths.root(), Path::new("/tmp/neromon-test"));
        assert_eq!(paths.sqlite_path(), Path::new("/tmp/neromon-test/data.sqlite3"));
    }

    #[test]
    fn test_default_dir_nests_under_neromon() {
        let paths = DataPaths::resolve(None).unwrap();
        assert_eq!(paths.root().file_name().unwrap(), "neromon");
    }

    #[test]
    fn test_ensure_exists_creates_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DataPaths::resolve(Some(&dir.path().join("state"))).unwrap();
        paths.ensure_exists().unwrap();
        assert!(paths.blob_store_dir().is_dir());
        assert!(paths.keys_dir().is_dir());
    }
}
