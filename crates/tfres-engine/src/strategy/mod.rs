//! Storage strategies and the apply / destroy / plan state machine.
//!
//! A request runs under exactly one [`Strategy`], chosen from the validated
//! [`StorageMode`]. Every action ends in an [`Outcome`] carrying the version
//! to emit; failures of the apply step go through the recovery path of the
//! strategy (tainted upload, `delete_on_failure` destroy).

pub mod backend;
pub mod legacy;
pub mod migrating;

use std::sync::Arc;

use async_trait::async_trait;
use tfres_domain::{MetadataField, StorageMode, Version};
use tfres_terraform::{Outputs, Provisioner, TerraformError};

use crate::error::EngineError;
use crate::logger::Logger;
use crate::namer::EnvRegistry;
use crate::services::Services;

pub use backend::BackendStrategy;
pub use legacy::LegacyStrategy;
pub use migrating::MigratingStrategy;

/// Metadata entry carrying the provisioner version.
pub const TERRAFORM_VERSION_FIELD: &str = "terraform_version";

// ── Outcome ───────────────────────────────────────────────────────────────────

/// What an action produced: the version to emit and the env's outputs.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub version: Version,
    pub outputs: Outputs,
    pub terraform_version: String,
}

impl Outcome {
    pub(crate) async fn collect(
        provisioner: &dyn Provisioner,
        version: Version,
        outputs: Outputs,
    ) -> Result<Outcome, EngineError> {
        Ok(Outcome { version, outputs, terraform_version: provisioner.version().await? })
    }

    /// Sanitized outputs plus `terraform_version`.
    pub fn metadata(&self) -> Vec<MetadataField> {
        metadata(&self.outputs, &self.terraform_version)
    }
}

pub fn metadata(outputs: &Outputs, terraform_version: &str) -> Vec<MetadataField> {
    let mut fields: Vec<MetadataField> = outputs
        .sanitized()
        .into_iter()
        .map(|(name, value)| MetadataField { name, value })
        .collect();
    fields.push(MetadataField {
        name: TERRAFORM_VERSION_FIELD.to_string(),
        value: terraform_version.to_string(),
    });
    fields
}

// ── Strategy ──────────────────────────────────────────────────────────────────

pub enum Strategy {
    Backend(BackendStrategy),
    Legacy(LegacyStrategy),
    Migrating(MigratingStrategy),
}

impl Strategy {
    pub fn new(
        mode: &StorageMode,
        provisioner: Arc<dyn Provisioner>,
        services: &dyn Services,
    ) -> Result<Strategy, EngineError> {
        Ok(match mode {
            StorageMode::Backend(_) => Strategy::Backend(BackendStrategy::new(provisioner)),
            StorageMode::Legacy(config) => {
                Strategy::Legacy(LegacyStrategy::new(provisioner, services.artifact_store(config)?))
            }
            StorageMode::Migrating { legacy, .. } => Strategy::Migrating(MigratingStrategy::new(
                BackendStrategy::new(provisioner),
                services.artifact_store(legacy)?,
            )),
        })
    }

    /// Work needed before names can be checked or actions run.
    pub async fn setup(&self) -> Result<(), EngineError> {
        match self {
            Strategy::Backend(s) => s.setup().await,
            Strategy::Migrating(s) => s.setup().await,
            Strategy::Legacy(_) => Ok(()),
        }
    }

    pub async fn apply(&self, env_name: &str) -> Result<Outcome, EngineError> {
        match self {
            Strategy::Backend(s) => s.apply(env_name).await,
            Strategy::Legacy(s) => s.apply(env_name).await,
            Strategy::Migrating(s) => s.apply(env_name).await,
        }
    }

    pub async fn destroy(&self, env_name: &str) -> Result<Outcome, EngineError> {
        match self {
            Strategy::Backend(s) => s.destroy(env_name).await,
            Strategy::Legacy(s) => s.destroy(env_name).await,
            Strategy::Migrating(s) => s.destroy(env_name).await,
        }
    }

    pub async fn plan(&self, env_name: &str) -> Result<Outcome, EngineError> {
        match self {
            Strategy::Backend(s) => s.plan(env_name).await,
            Strategy::Legacy(s) => s.plan(env_name).await,
            Strategy::Migrating(s) => s.plan(env_name).await,
        }
    }
}

#[async_trait]
impl EnvRegistry for Strategy {
    async fn env_exists(&self, env_name: &str) -> Result<bool, EngineError> {
        match self {
            Strategy::Backend(s) => s.env_exists(env_name).await,
            Strategy::Legacy(s) => s.env_exists(env_name).await,
            Strategy::Migrating(s) => s.env_exists(env_name).await,
        }
    }
}

// ── Shared steps ──────────────────────────────────────────────────────────────

/// The step whose failure triggers recovery.
pub(crate) async fn execute_apply(provisioner: &dyn Provisioner) -> Result<(), TerraformError> {
    provisioner.import().await?;
    provisioner.apply().await
}

/// `delete_on_failure` destroy after a failed apply. `Ok` means the env was
/// torn down; the caller still surfaces the apply error.
pub(crate) async fn destroy_after_failure(
    provisioner: &dyn Provisioner,
    logger: &Logger,
    apply_err: &TerraformError,
) -> Result<(), EngineError> {
    logger.warn("apply failed and delete_on_failure is set, running destroy");
    match provisioner.destroy().await {
        Ok(()) => {
            logger.info("destroy after failed apply succeeded");
            Ok(())
        }
        Err(destroy_err) => {
            logger.error("destroy after failed apply failed");
            Err(EngineError::RecoveryFailed {
                apply: apply_err.to_string(),
                destroy: destroy_err.to_string(),
            })
        }
    }
}
