use std::path::Path;

use tfres_storage::ArtifactStore;
use tfres_terraform::StateVersion;

use super::{BackendStrategy, Outcome};
use crate::error::EngineError;
use crate::logger::Logger;

const MIGRATED_LOCAL_STATE: &str = "migrated.tfstate";

/// Lineage of a downloaded state file; empty when it has none.
async fn lineage_of(path: &Path) -> Result<String, EngineError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| EngineError::io(path, e))?;
    Ok(serde_json::from_slice::<StateVersion>(&bytes)
        .map(|v| v.lineage)
        .unwrap_or_default())
}

/// Backend regime that first moves an env's legacy state object into a
/// workspace. The legacy object is kept as a `.migrated` sibling.
pub struct MigratingStrategy {
    backend: BackendStrategy,
    legacy: ArtifactStore,
    logger: Logger,
}

impl MigratingStrategy {
    pub fn new(backend: BackendStrategy, legacy: ArtifactStore) -> Self {
        Self { backend, legacy, logger: Logger }
    }

    pub async fn setup(&self) -> Result<(), EngineError> {
        self.backend.setup().await
    }

    pub async fn env_exists(&self, env_name: &str) -> Result<bool, EngineError> {
        if self.backend.env_exists(env_name).await? {
            return Ok(true);
        }
        let state = self.legacy.state_file(env_name, MIGRATED_LOCAL_STATE);
        Ok(state.exists().await? || state.exists_as_tainted().await?)
    }

    pub async fn apply(&self, env_name: &str) -> Result<Outcome, EngineError> {
        self.migrate(env_name).await?;
        self.backend.apply(env_name).await
    }

    pub async fn destroy(&self, env_name: &str) -> Result<Outcome, EngineError> {
        self.migrate(env_name).await?;
        self.backend.destroy(env_name).await
    }

    pub async fn plan(&self, env_name: &str) -> Result<Outcome, EngineError> {
        self.migrate(env_name).await?;
        self.backend.plan(env_name).await
    }

    /// Move the legacy state of `env_name` (canonical or tainted) into a new
    /// backend workspace. Returns whether anything was migrated.
    ///
    /// A workspace already holding the legacy lineage is an interrupted
    /// migration: the `.migrated` copy and the delete are finished. Any other
    /// existing workspace is a conflict.
    pub async fn migrate(&self, env_name: &str) -> Result<bool, EngineError> {
        let p = self.backend.provisioner();
        let local = p.model().scratch.join(MIGRATED_LOCAL_STATE);
        let mut state = self.legacy.state_file(env_name, local);
        if !state.exists().await? {
            if !state.exists_as_tainted().await? {
                return Ok(false);
            }
            state = state.convert_to_tainted();
        }

        let _section = self.logger.section(format!("migrate {}", env_name));
        state.download().await?;
        if p.workspace_exists(env_name).await? {
            let legacy_lineage = lineage_of(state.local_path()).await?;
            let current = p.current_state_version(env_name).await?;
            if legacy_lineage.is_empty() || legacy_lineage != current.lineage {
                return Err(EngineError::MigrationConflict { env_name: env_name.to_string() });
            }
            self.logger.warn(&format!(
                "workspace {} already holds {}, resuming interrupted migration",
                env_name,
                state.remote_path()
            ));
        } else {
            p.workspace_new_from_existing_state_file(env_name, state.local_path()).await?;
        }

        let migrated = state.convert_to_migrated();
        state.copy_to(&migrated).await?;
        state.delete().await?;
        self.logger.success(&format!(
            "migrated {} into workspace {}, legacy copy kept at {}",
            state.remote_path(),
            env_name,
            migrated.remote_path()
        ));
        Ok(true)
    }
}
