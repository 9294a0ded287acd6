use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;

use crate::error::StorageError;

/// An object key together with its modification time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectVersion {
    pub key: String,
    pub last_modified: DateTime<Utc>,
}

/// Server-side encryption settings applied to uploads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadOptions {
    pub sse_algorithm: Option<String>,
    pub sse_kms_key_id: Option<String>,
}

/// Object-store capability used by the legacy regime.
#[async_trait]
pub trait Storage: Send + Sync + 'static {
    /// Fetch an object. A missing object is [`StorageError::NotFound`].
    async fn download(&self, key: &str) -> Result<(Vec<u8>, ObjectVersion), StorageError>;

    async fn upload(&self, key: &str, body: Vec<u8>, options: &UploadOptions) -> Result<(), StorageError>;

    /// Idempotent: deleting a missing object succeeds.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// `None` when the object does not exist.
    async fn stat(&self, key: &str) -> Result<Option<ObjectVersion>, StorageError>;

    /// Objects under `prefix` whose key matches `pattern`, oldest first.
    async fn list(&self, prefix: &str, pattern: &Regex) -> Result<Vec<ObjectVersion>, StorageError>;
}

/// Ascending by modification time, ties broken by key.
pub fn sort_versions(versions: &mut [ObjectVersion]) {
    versions.sort_by(|a, b| {
        a.last_modified
            .cmp(&b.last_modified)
            .then_with(|| a.key.cmp(&b.key))
    });
}
