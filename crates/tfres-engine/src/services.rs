use std::sync::Arc;

use tfres_domain::StorageConfig;
use tfres_storage::{ArtifactStore, S3Storage, Storage};
use tfres_terraform::{Client, Model, Provisioner};

use crate::error::EngineError;
use crate::namer::{NameGenerator, RandomNames};

/// The outside world as seen by the runners: object storage, the
/// provisioner CLI, name generation and the host environment.
pub trait Services: Send + Sync {
    fn storage(&self, config: &StorageConfig) -> Result<Arc<dyn Storage>, EngineError>;

    fn provisioner(&self, model: Model) -> Arc<dyn Provisioner>;

    fn names(&self) -> &dyn NameGenerator;

    /// Variables set by the pipeline host, e.g. `BUILD_ID`.
    fn host_var(&self, key: &str) -> Option<String>;

    fn artifact_store(&self, config: &StorageConfig) -> Result<ArtifactStore, EngineError> {
        Ok(ArtifactStore::from_config(self.storage(config)?, config))
    }
}

/// S3, the terraform CLI and the process environment.
#[derive(Debug, Default)]
pub struct LiveServices {
    names: RandomNames,
}

impl LiveServices {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Services for LiveServices {
    fn storage(&self, config: &StorageConfig) -> Result<Arc<dyn Storage>, EngineError> {
        Ok(Arc::new(S3Storage::new(config)?))
    }

    fn provisioner(&self, model: Model) -> Arc<dyn Provisioner> {
        Arc::new(Client::new(model))
    }

    fn names(&self) -> &dyn NameGenerator {
        &self.names
    }

    fn host_var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|v| !v.is_empty())
    }
}
