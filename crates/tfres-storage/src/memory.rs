use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use tokio::sync::RwLock;

use crate::error::StorageError;
use crate::storage::{sort_versions, ObjectVersion, Storage, UploadOptions};

#[derive(Debug, Clone)]
struct Object {
    body: Vec<u8>,
    last_modified: DateTime<Utc>,
    options: UploadOptions,
}

#[derive(Debug, Default)]
struct Inner {
    objects: BTreeMap<String, Object>,
    /// Last timestamp handed out; uploads are stamped strictly after it.
    clock: Option<DateTime<Utc>>,
    /// Number of upcoming `stat` calls that report "absent" for fresh uploads.
    hidden_stats: u32,
    /// When set, every upload hides its key from the first `stat` after it.
    lag_uploads: bool,
    lagging: BTreeSet<String>,
}

/// In-memory implementation of [`Storage`].
///
/// All data is lost on drop. Timestamps are strictly increasing across uploads
/// so ordering-sensitive callers behave as they would against a real bucket.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStorage {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object with an explicit modification time.
    pub async fn put_at(&self, key: &str, body: impl Into<Vec<u8>>, last_modified: DateTime<Utc>) {
        let mut guard = self.inner.write().await;
        guard.objects.insert(
            key.to_string(),
            Object { body: body.into(), last_modified, options: UploadOptions::default() },
        );
    }

    /// Make the next `n` stats of any key report absent, mimicking the
    /// read-after-write window of an eventually-consistent store.
    pub async fn hide_next_stats(&self, n: u32) {
        self.inner.write().await.hidden_stats = n;
    }

    /// Hide each freshly uploaded key from its first `stat`.
    pub async fn lag_uploads(&self) {
        self.inner.write().await.lag_uploads = true;
    }

    pub async fn keys(&self) -> Vec<String> {
        self.inner.read().await.objects.keys().cloned().collect()
    }

    pub async fn contents(&self, key: &str) -> Option<Vec<u8>> {
        self.inner.read().await.objects.get(key).map(|o| o.body.clone())
    }

    pub async fn upload_options(&self, key: &str) -> Option<UploadOptions> {
        self.inner.read().await.objects.get(key).map(|o| o.options.clone())
    }
}

fn tick(inner: &mut Inner) -> DateTime<Utc> {
    let now = Utc::now();
    let next = match inner.clock {
        Some(last) if now <= last => last + Duration::seconds(1),
        _ => now,
    };
    inner.clock = Some(next);
    next
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn download(&self, key: &str) -> Result<(Vec<u8>, ObjectVersion), StorageError> {
        let guard = self.inner.read().await;
        let obj = guard
            .objects
            .get(key)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        Ok((
            obj.body.clone(),
            ObjectVersion { key: key.to_string(), last_modified: obj.last_modified },
        ))
    }

    async fn upload(&self, key: &str, body: Vec<u8>, options: &UploadOptions) -> Result<(), StorageError> {
        let mut guard = self.inner.write().await;
        let last_modified = tick(&mut guard);
        if guard.lag_uploads {
            guard.lagging.insert(key.to_string());
        }
        guard.objects.insert(
            key.to_string(),
            Object { body, last_modified, options: options.clone() },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let mut guard = self.inner.write().await;
        guard.objects.remove(key);
        Ok(())
    }

    async fn stat(&self, key: &str) -> Result<Option<ObjectVersion>, StorageError> {
        let mut guard = self.inner.write().await;
        if guard.hidden_stats > 0 {
            guard.hidden_stats -= 1;
            return Ok(None);
        }
        if guard.lagging.remove(key) {
            return Ok(None);
        }
        Ok(guard.objects.get(key).map(|o| ObjectVersion {
            key: key.to_string(),
            last_modified: o.last_modified,
        }))
    }

    async fn list(&self, prefix: &str, pattern: &Regex) -> Result<Vec<ObjectVersion>, StorageError> {
        let guard = self.inner.read().await;
        let mut versions: Vec<ObjectVersion> = guard
            .objects
            .iter()
            .filter(|(k, _)| k.starts_with(prefix) && pattern.is_match(k))
            .map(|(k, o)| ObjectVersion { key: k.clone(), last_modified: o.last_modified })
            .collect();
        sort_versions(&mut versions);
        Ok(versions)
    }
}
