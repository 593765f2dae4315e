pub mod blob;
pub mod cache;
pub mod jobs;

// Re-export common types
pub use blob::{BlobStore, FsBlobStore};
pub use cache::{ContactCache, MemoryCache, RedisCache};
pub use jobs::{JobPatch, JobRecord, JobStatus, JobStore, MemoryJobStore, RedisJobStore};

use thiserror::Error;

/// Errors from the storage collaborators (cache, job store, blob store).
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("job not found: {0}")]
    JobNotFound(String),
}
