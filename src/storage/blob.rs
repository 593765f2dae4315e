use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::storage::StorageError;

/// Object storage for batch input and output files. Path references are
/// opaque strings understood only by the implementation that issued them.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store a file for a job. Returns the path reference.
    async fn upload(
        &self,
        job_id: &str,
        bytes: &[u8],
        filename: &str,
        is_output: bool,
    ) -> Result<String, StorageError>;

    /// Fetch a file by path reference. `None` when it does not exist.
    async fn download(&self, path_ref: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// A URL under which the file can be fetched for a limited time.
    async fn signed_url(
        &self,
        path_ref: &str,
        ttl_seconds: u64,
    ) -> Result<Option<String>, StorageError>;
}

/// Filesystem-backed blob store rooted at a configured directory, with one
/// subdirectory per job.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path_ref: &str) -> PathBuf {
        self.root.join(path_ref)
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn upload(
        &self,
        job_id: &str,
        bytes: &[u8],
        filename: &str,
        is_output: bool,
    ) -> Result<String, StorageError> {
        let prefix = if is_output { "output" } else { "input" };
        // Drop any client-supplied directory components.
        let safe_name = Path::new(filename)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload.csv");
        let path_ref = format!("{}/{}_{}", job_id, prefix, safe_name);

        let full_path = self.resolve(&path_ref);
        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full_path, bytes).await?;

        debug!("Stored {} byte(s) at {}", bytes.len(), full_path.display());
        Ok(path_ref)
    }

    async fn download(&self, path_ref: &str) -> Result<Option<Vec<u8>>, StorageError> {
        match tokio::fs::read(self.resolve(path_ref)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn signed_url(
        &self,
        path_ref: &str,
        _ttl_seconds: u64,
    ) -> Result<Option<String>, StorageError> {
        // Local files need no expiring signature; the TTL is meaningful for
        // remote object stores implementing this trait.
        let full_path = self.resolve(path_ref);
        if tokio::fs::try_exists(&full_path).await? {
            Ok(Some(format!("file://{}", full_path.display())))
        } else {
            Ok(None)
        }
    }
}
