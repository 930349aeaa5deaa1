//! Filesystem blob store
//!
//! Originals live at `<root>/<account>/<image>/original`. Writes go to a
//! uniquely named temp file in the same directory and are renamed into place,
//! so readers never observe a partial original.

use std::io::ErrorKind;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use log::debug;
use tokio::fs;

use super::BlobStore;

const ORIGINAL: &str = "original";

#[derive(Debug, Clone)]
pub struct FilesystemBlobStore {
    root: PathBuf,
}

impl FilesystemBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn image_dir(&self, account_id: &str, image_id: &str) -> Result<PathBuf> {
        if !is_safe_segment(account_id) || !is_safe_segment(image_id) {
            bail!("invalid blob key {}/{}", account_id, image_id);
        }
        Ok(self.root.join(account_id).join(image_id))
    }
}

/// Rejects ids that would escape the storage root.
fn is_safe_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && !segment.contains(['/', '\\', '\0'])
}

#[async_trait]
impl BlobStore for FilesystemBlobStore {
    async fn store(&self, account_id: &str, image_id: &str, data: &[u8]) -> Result<u64> {
        let dir = self.image_dir(account_id, image_id)?;
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating {}", dir.display()))?;

        let tmp = dir.join(format!(".upload-{}", uuid::Uuid::new_v4()));
        if let Err(e) = fs::write(&tmp, data).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e).with_context(|| format!("writing {}", tmp.display()));
        }

        let target = dir.join(ORIGINAL);
        if let Err(e) = fs::rename(&tmp, &target).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e).with_context(|| format!("renaming into {}", target.display()));
        }

        debug!("Stored {} bytes at {}", data.len(), target.display());
        Ok(data.len() as u64)
    }

    async fn retrieve(&self, account_id: &str, image_id: &str) -> Result<Option<Vec<u8>>> {
        let path = match self.image_dir(account_id, image_id) {
            Ok(dir) => dir.join(ORIGINAL),
            Err(_) => return Ok(None),
        };
        match fs::read(&path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
        }
    }

    async fn delete(&self, account_id: &str, image_id: &str) -> Result<()> {
        let dir = match self.image_dir(account_id, image_id) {
            Ok(dir) => dir,
            Err(_) => return Ok(()),
        };
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("removing {}", dir.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_store_and_retrieve() {
        let temp = TempDir::new().unwrap();
        let blobs = FilesystemBlobStore::new(temp.path());

        let written = blobs.store("acct", "img", b"original bytes").await.unwrap();
        assert_eq!(written, 14);
        assert!(temp.path().join("acct/img/original").exists());

        let data = blobs.retrieve("acct", "img").await.unwrap();
        assert_eq!(data.as_deref(), Some(&b"original bytes"[..]));
    }

    #[tokio::test]
    async fn test_store_replaces_and_leaves_no_temp_files() {
        let temp = TempDir::new().unwrap();
        let blobs = FilesystemBlobStore::new(temp.path());

        blobs.store("acct", "img", b"first").await.unwrap();
        blobs.store("acct", "img", b"second").await.unwrap();

        let entries: Vec<_> = std::fs::read_dir(temp.path().join("acct/img"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("original")]);
        assert_eq!(
            blobs.retrieve("acct", "img").await.unwrap().unwrap(),
            b"second".to_vec()
        );
    }

    #[tokio::test]
    async fn test_missing_original_is_none() {
        let temp = TempDir::new().unwrap();
        let blobs = FilesystemBlobStore::new(temp.path());
        assert!(blobs.retrieve("acct", "nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let blobs = FilesystemBlobStore::new(temp.path());

        blobs.store("acct", "img", b"x").await.unwrap();
        blobs.delete("acct", "img").await.unwrap();
        blobs.delete("acct", "img").await.unwrap();
        assert!(blobs.retrieve("acct", "img").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rejects_path_traversal() {
        let temp = TempDir::new().unwrap();
        let blobs = FilesystemBlobStore::new(temp.path());

        assert!(blobs.store("..", "img", b"x").await.is_err());
        assert!(blobs.store("acct", "a/b", b"x").await.is_err());
        assert!(blobs.retrieve("..", "img").await.unwrap().is_none());
    }
}
