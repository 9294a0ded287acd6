use std::sync::Arc;

use tfres_domain::Version;
use tfres_storage::{Artifact, ArtifactStore};
use tfres_terraform::{Outputs, Provisioner, TerraformError};
use tracing::debug;

use super::{destroy_after_failure, execute_apply, Outcome};
use crate::error::EngineError;
use crate::logger::Logger;

/// One object per env under `bucket_path`: `<env>.tfstate`, its
/// `.tainted` sibling after a failed apply, and `<env>.plan`.
pub struct LegacyStrategy {
    provisioner: Arc<dyn Provisioner>,
    store: ArtifactStore,
    logger: Logger,
}

impl LegacyStrategy {
    pub fn new(provisioner: Arc<dyn Provisioner>, store: ArtifactStore) -> Self {
        Self { provisioner, store, logger: Logger }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    fn state_file(&self, env_name: &str) -> Artifact {
        self.store.state_file(env_name, &self.provisioner.model().state_path)
    }

    fn plan_file(&self, env_name: &str) -> Artifact {
        self.store.plan_file(env_name, &self.provisioner.model().plan_path)
    }

    /// The canonical state, or its tainted sibling when only that exists.
    async fn current_state(&self, env_name: &str) -> Result<Artifact, EngineError> {
        let state = self.state_file(env_name);
        if !state.exists().await? && state.exists_as_tainted().await? {
            let tainted = state.convert_to_tainted();
            self.logger.warn(&format!(
                "found tainted state {} from a failed apply, using it",
                tainted.remote_path()
            ));
            return Ok(tainted);
        }
        Ok(state)
    }

    pub async fn env_exists(&self, env_name: &str) -> Result<bool, EngineError> {
        let state = self.state_file(env_name);
        Ok(state.exists().await? || state.exists_as_tainted().await?)
    }

    pub async fn apply(&self, env_name: &str) -> Result<Outcome, EngineError> {
        let p = self.provisioner.as_ref();
        let _section = self.logger.section(format!("apply {}", env_name));

        let mut state = self.current_state(env_name).await?;
        if state.exists().await? {
            state.download().await?;
        }
        let plan = self.plan_file(env_name);
        if p.model().plan_run {
            if !plan.exists().await? {
                return Err(EngineError::NotFound { what: "plan", env_name: env_name.to_string() });
            }
            plan.download().await?;
        }

        p.init_without_backend().await?;
        if let Err(err) = execute_apply(p).await {
            return Err(self.recover(&state, &plan, err).await);
        }

        if state.is_tainted() {
            state.delete().await?;
            state = state.convert_from_tainted();
        }
        let uploaded = state.upload().await?;
        plan.delete().await?;
        let outputs = p.outputs(p.model().output_module.as_deref()).await?;
        self.logger.success(&format!("applied env {}, state at {}", env_name, state.remote_path()));

        Outcome::collect(p, Version::legacy(env_name, uploaded.last_modified), outputs).await
    }

    pub async fn destroy(&self, env_name: &str) -> Result<Outcome, EngineError> {
        let p = self.provisioner.as_ref();
        let _section = self.logger.section(format!("destroy {}", env_name));

        self.plan_file(env_name).delete().await?;
        let state = self.current_state(env_name).await?;
        let found = state.exists().await?;

        if found || !p.model().imports.is_empty() {
            if found {
                state.download().await?;
            }
            p.init_without_backend().await?;
            p.import().await?;
            if let Err(err) = p.destroy().await {
                if state.local_exists() {
                    state.upload().await?;
                }
                return Err(err.into());
            }
        } else {
            self.logger.info(&format!("no state for env {}, nothing to destroy", env_name));
        }

        state.convert_from_tainted().delete().await?;
        let deleted = state.convert_to_tainted().delete().await?;
        self.logger.success(&format!("destroyed env {}", env_name));

        Outcome::collect(p, Version::legacy(env_name, deleted.last_modified), Outputs::default()).await
    }

    pub async fn plan(&self, env_name: &str) -> Result<Outcome, EngineError> {
        let p = self.provisioner.as_ref();
        let _section = self.logger.section(format!("plan {}", env_name));

        let state = self.current_state(env_name).await?;
        if state.exists().await? {
            state.download().await?;
        }
        p.init_without_backend().await?;
        let checksum = p.plan().await?;
        let uploaded = self.plan_file(env_name).upload().await?;
        debug!(checksum = %checksum, key = %uploaded.key, "uploaded plan");
        self.logger.success(&format!("planned env {}", env_name));

        Outcome::collect(p, Version::legacy_plan(env_name, uploaded.last_modified), Outputs::default()).await
    }

    async fn recover(&self, state: &Artifact, plan: &Artifact, err: TerraformError) -> EngineError {
        let p = self.provisioner.as_ref();
        if p.model().delete_on_failure {
            match destroy_after_failure(p, &self.logger, &err).await {
                Ok(()) => {
                    for artifact in [state.convert_from_tainted(), state.convert_to_tainted(), plan.clone()] {
                        if let Err(e) = artifact.delete().await {
                            return e.into();
                        }
                    }
                    return err.into();
                }
                Err(recovery) => {
                    self.taint(state).await;
                    return recovery;
                }
            }
        }
        self.taint(state).await;
        err.into()
    }

    /// Move the env's state to the tainted sibling. Failures are logged so
    /// the apply error stays the one surfaced.
    async fn taint(&self, state: &Artifact) {
        let canonical = state.convert_from_tainted();
        let result = async {
            canonical.delete().await?;
            canonical.upload_tainted().await
        }
        .await;
        match result {
            Ok(Some(_)) => self.logger.warn(&format!(
                "apply failed, state uploaded to {}",
                canonical.convert_to_tainted().remote_path()
            )),
            Ok(None) => self.logger.warn("apply failed, no local state to upload"),
            Err(e) => self.logger.error(&format!("failed to upload tainted state: {}", e)),
        }
    }
}
