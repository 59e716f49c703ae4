//! Local filesystem blob store.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::store::{validate_name, BlobStore};
use sealvault_common::{Error, Result};

/// Suffix of in-flight temporary files.
const TEMP_SUFFIX: &str = ".tmp";

/// Local filesystem blob store.
///
/// Objects are plain files in a single directory.
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Create a new local store rooted at `root`.
    ///
    /// # Postconditions
    /// - Root directory is created if it doesn't exist
    ///
    /// # Errors
    /// - Permission denied
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        if !root.exists() {
            std::fs::create_dir_all(&root)?;
        }

        Ok(Self { root })
    }

    /// Platform data directory for SealVault, if the OS defines one.
    pub fn default_location() -> Option<PathBuf> {
        dirs::data_dir().map(|dir| dir.join("sealvault"))
    }

    /// Root directory of this store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.root.join(name))
    }

    async fn write_temp(&self, temp: &Path, data: &[u8]) -> Result<()> {
        let mut file = fs::File::create(temp).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        Ok(())
    }

    #[cfg(unix)]
    async fn sync_root(&self) {
        match fs::File::open(&self.root).await {
            Ok(dir) => {
                if let Err(e) = dir.sync_all().await {
                    warn!(error = %e, "Directory sync failed");
                }
            }
            Err(e) => warn!(error = %e, "Could not open store directory for sync"),
        }
    }

    #[cfg(not(unix))]
    async fn sync_root(&self) {}
}

#[async_trait]
impl BlobStore for LocalStore {
    fn name(&self) -> &str {
        "local"
    }

    async fn read(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.path_for(name)?;
        match fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("Object not found: {}", name)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn write_atomic(&self, name: &str, data: &[u8]) -> Result<()> {
        let target = self.path_for(name)?;
        let temp = self
            .root
            .join(format!(".{}.{}{}", name, Uuid::new_v4().simple(), TEMP_SUFFIX));

        if let Err(e) = self.write_temp(&temp, data).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e);
        }

        if let Err(e) = fs::rename(&temp, &target).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }
        self.sync_root().await;

        debug!(object = name, size = data.len(), "Object written");
        Ok(())
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        let path = self.path_for(name)?;
        Ok(fs::try_exists(&path).await?)
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let path = self.path_for(name)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("Object not found: {}", name)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name.starts_with('.') || name.ends_with(TEMP_SUFFIX) {
                continue;
            }
            if name.starts_with(prefix) {
                names.push(name);
            }
        }

        names.sort();
        Ok(names)
    }
}
