use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use regex::Regex;
use tfres_domain::StorageConfig;
use tracing::{debug, info};

use crate::error::StorageError;
use crate::storage::{ObjectVersion, Storage, UploadOptions};

pub const TAINTED_SUFFIX: &str = ".tainted";
pub const MIGRATED_SUFFIX: &str = ".migrated";

const VISIBILITY_ATTEMPTS: u32 = 5;
const VISIBILITY_DELAY: Duration = Duration::from_secs(1);

/// The two artifact kinds kept in the legacy layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    State,
    Plan,
}

impl ArtifactKind {
    pub fn extension(self) -> &'static str {
        match self {
            ArtifactKind::State => "tfstate",
            ArtifactKind::Plan  => "plan",
        }
    }

    /// Matches canonical keys of this kind (tainted and migrated siblings excluded).
    pub fn pattern(self) -> Result<Regex, StorageError> {
        compile(&format!(r".*\.{}$", self.extension()))
    }

    /// Matches the canonical key of one environment under `prefix`.
    pub fn env_pattern(self, prefix: &str, env_name: &str) -> Result<Regex, StorageError> {
        let key = object_key(prefix, &format!("{}.{}", env_name, self.extension()));
        compile(&format!("^{}$", regex::escape(&key)))
    }
}

fn compile(pattern: &str) -> Result<Regex, StorageError> {
    Regex::new(pattern).map_err(|e| StorageError::Config(format!("invalid pattern {}: {}", pattern, e)))
}

/// Join a bucket prefix and an object name with exactly one `/`.
pub fn object_key(prefix: &str, name: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", prefix, name)
    }
}

/// The environment name encoded in a canonical key, e.g. `envs/a.tfstate` → `a`.
pub fn env_name_from_key(key: &str, kind: ArtifactKind) -> Option<&str> {
    let file = key.rsplit('/').next()?;
    file.strip_suffix(kind.extension())?.strip_suffix('.')
}

// ── Store ─────────────────────────────────────────────────────────────────────

/// State and plan artifacts of the legacy layout, rooted at one bucket prefix.
#[derive(Clone)]
pub struct ArtifactStore {
    storage:        Arc<dyn Storage>,
    prefix:         String,
    upload_options: UploadOptions,
    attempts:       u32,
    delay:          Duration,
}

impl ArtifactStore {
    pub fn new(storage: Arc<dyn Storage>, prefix: impl Into<String>, upload_options: UploadOptions) -> Self {
        Self {
            storage,
            prefix: prefix.into(),
            upload_options,
            attempts: VISIBILITY_ATTEMPTS,
            delay: VISIBILITY_DELAY,
        }
    }

    /// Store rooted at `bucket_path` with the block's encryption settings.
    pub fn from_config(storage: Arc<dyn Storage>, config: &StorageConfig) -> Self {
        let options = UploadOptions {
            sse_algorithm:  config.server_side_encryption.clone().filter(|s| !s.is_empty()),
            sse_kms_key_id: config.sse_kms_key_id.clone().filter(|s| !s.is_empty()),
        };
        Self::new(storage, config.bucket_path.clone(), options)
    }

    /// Override the post-upload visibility polling.
    pub fn with_consistency(mut self, attempts: u32, delay: Duration) -> Self {
        self.attempts = attempts.max(1);
        self.delay = delay;
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn state_file(&self, env_name: &str, local: impl Into<PathBuf>) -> Artifact {
        self.artifact(ArtifactKind::State, env_name, local.into())
    }

    pub fn plan_file(&self, env_name: &str, local: impl Into<PathBuf>) -> Artifact {
        self.artifact(ArtifactKind::Plan, env_name, local.into())
    }

    fn artifact(&self, kind: ArtifactKind, env_name: &str, local: PathBuf) -> Artifact {
        Artifact {
            store: self.clone(),
            kind,
            env_name: env_name.to_string(),
            remote: object_key(&self.prefix, &format!("{}.{}", env_name, kind.extension())),
            local,
        }
    }

    /// Most recently modified object under the prefix matching `pattern`.
    pub async fn latest_version(&self, pattern: &Regex) -> Result<Option<ObjectVersion>, StorageError> {
        let listing_prefix = object_key(&self.prefix, "");
        let versions = self.storage.list(&listing_prefix, pattern).await?;
        Ok(versions.into_iter().last())
    }
}

// ── Artifact ──────────────────────────────────────────────────────────────────

/// One remote object paired with its local working copy.
#[derive(Clone)]
pub struct Artifact {
    store:    ArtifactStore,
    kind:     ArtifactKind,
    env_name: String,
    remote:   String,
    local:    PathBuf,
}

impl std::fmt::Debug for Artifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Artifact")
            .field("kind", &self.kind)
            .field("remote", &self.remote)
            .field("local", &self.local)
            .finish()
    }
}

impl Artifact {
    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    pub fn env_name(&self) -> &str {
        &self.env_name
    }

    pub fn remote_path(&self) -> &str {
        &self.remote
    }

    pub fn local_path(&self) -> &Path {
        &self.local
    }

    pub fn is_tainted(&self) -> bool {
        self.remote.ends_with(TAINTED_SUFFIX)
    }

    fn with_remote(&self, remote: String) -> Artifact {
        Artifact { remote, ..self.clone() }
    }

    fn canonical_remote(&self) -> &str {
        self.remote
            .strip_suffix(TAINTED_SUFFIX)
            .or_else(|| self.remote.strip_suffix(MIGRATED_SUFFIX))
            .unwrap_or(&self.remote)
    }

    pub fn convert_to_tainted(&self) -> Artifact {
        if self.is_tainted() {
            return self.clone();
        }
        self.with_remote(format!("{}{}", self.canonical_remote(), TAINTED_SUFFIX))
    }

    pub fn convert_from_tainted(&self) -> Artifact {
        self.with_remote(self.canonical_remote().to_string())
    }

    pub fn convert_to_migrated(&self) -> Artifact {
        if self.remote.ends_with(MIGRATED_SUFFIX) {
            return self.clone();
        }
        self.with_remote(format!("{}{}", self.canonical_remote(), MIGRATED_SUFFIX))
    }

    pub async fn version(&self) -> Result<Option<ObjectVersion>, StorageError> {
        self.store.storage.stat(&self.remote).await
    }

    pub async fn exists(&self) -> Result<bool, StorageError> {
        Ok(self.version().await?.is_some())
    }

    pub async fn exists_as_tainted(&self) -> Result<bool, StorageError> {
        self.convert_to_tainted().exists().await
    }

    pub fn local_exists(&self) -> bool {
        self.local.is_file()
    }

    /// Fetch the remote object into the local path.
    pub async fn download(&self) -> Result<ObjectVersion, StorageError> {
        let (body, version) = self.store.storage.download(&self.remote).await?;
        if let Some(parent) = self.local.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| io_error(parent, e))?;
        }
        tokio::fs::write(&self.local, body)
            .await
            .map_err(|e| io_error(&self.local, e))?;
        debug!(remote = %self.remote, local = %self.local.display(), "downloaded artifact");
        Ok(version)
    }

    /// Push the local file and wait until the object is visible.
    pub async fn upload(&self) -> Result<ObjectVersion, StorageError> {
        let body = tokio::fs::read(&self.local)
            .await
            .map_err(|e| io_error(&self.local, e))?;
        self.put(body).await
    }

    async fn put(&self, body: Vec<u8>) -> Result<ObjectVersion, StorageError> {
        self.store
            .storage
            .upload(&self.remote, body, &self.store.upload_options)
            .await?;

        for attempt in 1..=self.store.attempts {
            if let Some(version) = self.version().await? {
                debug!(remote = %self.remote, attempt, "uploaded artifact");
                return Ok(version);
            }
            if attempt < self.store.attempts {
                tokio::time::sleep(self.store.delay).await;
            }
        }
        Err(StorageError::NotVisible { key: self.remote.clone(), attempts: self.store.attempts })
    }

    /// Upload the local file to the tainted sibling. No-op without a local file.
    pub async fn upload_tainted(&self) -> Result<Option<ObjectVersion>, StorageError> {
        if !self.local_exists() {
            info!(local = %self.local.display(), "no local state to upload as tainted");
            return Ok(None);
        }
        self.convert_to_tainted().upload().await.map(Some)
    }

    /// Idempotent delete. The returned version is stamped with the current time.
    pub async fn delete(&self) -> Result<ObjectVersion, StorageError> {
        self.store.storage.delete(&self.remote).await?;
        Ok(ObjectVersion { key: self.remote.clone(), last_modified: Utc::now() })
    }

    /// Server-side copy expressed as download plus upload of the bytes.
    pub async fn copy_to(&self, target: &Artifact) -> Result<ObjectVersion, StorageError> {
        let (body, _) = self.store.storage.download(&self.remote).await?;
        target.put(body).await
    }
}

fn io_error(path: &Path, source: std::io::Error) -> StorageError {
    StorageError::Io { path: path.display().to_string(), source }
}
