use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

use crate::{BlobLocator, BlobStore, BlobStoreError, BlobStoreResult};

/// Blobs as files under a root directory, sharded by the first two
/// characters of the locator: `root/ab/abcdef…`.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Opens a store rooted at `root`, creating the directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> BlobStoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, locator: &BlobLocator) -> PathBuf {
        let id = locator.as_str();
        self.root.join(&id[..2]).join(id)
    }
}

impl BlobStore for FsBlobStore {
    fn put(&self, data: &[u8]) -> BlobStoreResult<BlobLocator> {
        let locator = BlobLocator::generate();
        let path = self.path_for(&locator);
        let shard = path
            .parent()
            .ok_or_else(|| BlobStoreError::Storage("blob path has no parent".into()))?;
        fs::create_dir_all(shard)?;

        // Write beside the target and rename so readers never see a partial blob.
        let mut tmp = NamedTempFile::new_in(shard)?;
        tmp.write_all(data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| BlobStoreError::Io(e.error))?;

        debug!(locator = %locator, size = data.len(), "stored blob");
        Ok(locator)
    }

    fn get(&self, locator: &BlobLocator) -> BlobStoreResult<Vec<u8>> {
        match fs::read(self.path_for(locator)) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(BlobStoreError::NotFound(locator.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, locator: &BlobLocator) -> BlobStoreResult<()> {
        match fs::remove_file(self.path_for(locator)) {
            Ok(()) => {
                debug!(locator = %locator, "deleted blob");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(BlobStoreError::NotFound(locator.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self, locator: &BlobLocator) -> BlobStoreResult<bool> {
        Ok(self.path_for(locator).is_file())
    }
}
