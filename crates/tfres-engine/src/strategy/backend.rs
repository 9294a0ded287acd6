use std::sync::Arc;

use tfres_domain::Version;
use tfres_terraform::{plan_workspace_name, Outputs, Provisioner, TerraformError};
use tracing::debug;

use super::{destroy_after_failure, execute_apply, Outcome};
use crate::error::EngineError;
use crate::logger::Logger;

/// State in provisioner workspaces, one per env plus `<env>-plan`.
pub struct BackendStrategy {
    provisioner: Arc<dyn Provisioner>,
    logger: Logger,
}

impl BackendStrategy {
    pub fn new(provisioner: Arc<dyn Provisioner>) -> Self {
        Self { provisioner, logger: Logger }
    }

    pub fn provisioner(&self) -> &dyn Provisioner {
        self.provisioner.as_ref()
    }

    pub async fn setup(&self) -> Result<(), EngineError> {
        self.provisioner.init_with_backend().await?;
        Ok(())
    }

    pub async fn env_exists(&self, env_name: &str) -> Result<bool, EngineError> {
        Ok(self.provisioner.workspace_exists(env_name).await?)
    }

    pub async fn apply(&self, env_name: &str) -> Result<Outcome, EngineError> {
        let p = self.provisioner();
        let _section = self.logger.section(format!("apply {}", env_name));

        p.workspace_new_if_not_exists(env_name).await?;
        if p.model().plan_run {
            let plan_workspace = plan_workspace_name(env_name);
            if !p.workspace_exists(&plan_workspace).await? {
                return Err(EngineError::NotFound { what: "plan", env_name: env_name.to_string() });
            }
            p.get_plan_from_backend(&plan_workspace).await?;
            p.workspace_select(env_name).await?;
        }

        if let Err(err) = execute_apply(p).await {
            return Err(self.recover(env_name, err).await);
        }

        let state = p.current_state_version(env_name).await?;
        let outputs = p.outputs(p.model().output_module.as_deref()).await?;
        self.delete_plan_workspace(env_name).await?;
        self.logger.success(&format!("applied env {} (serial {})", env_name, state.serial));

        Outcome::collect(p, Version::backend(env_name, state.serial, state.lineage), outputs).await
    }

    pub async fn destroy(&self, env_name: &str) -> Result<Outcome, EngineError> {
        let p = self.provisioner();
        let _section = self.logger.section(format!("destroy {}", env_name));

        if p.workspace_exists(env_name).await? {
            p.workspace_select(env_name).await?;
            p.import().await?;
            p.destroy().await?;
            p.workspace_delete(env_name).await?;
            self.logger.success(&format!("destroyed env {}", env_name));
        } else {
            self.logger.info(&format!("workspace {} does not exist, nothing to destroy", env_name));
        }
        self.delete_plan_workspace(env_name).await?;

        Outcome::collect(p, Version::bare(env_name), Outputs::default()).await
    }

    pub async fn plan(&self, env_name: &str) -> Result<Outcome, EngineError> {
        let p = self.provisioner();
        let _section = self.logger.section(format!("plan {}", env_name));

        p.workspace_new_if_not_exists(env_name).await?;
        let checksum = p.plan().await?;
        p.save_plan_to_backend(&plan_workspace_name(env_name)).await?;
        self.logger.success(&format!("planned env {}", env_name));

        Outcome::collect(p, Version::plan(env_name, checksum), Outputs::default()).await
    }

    async fn delete_plan_workspace(&self, env_name: &str) -> Result<(), EngineError> {
        let plan_workspace = plan_workspace_name(env_name);
        if self.provisioner.workspace_exists(&plan_workspace).await? {
            self.provisioner.workspace_delete_with_force(&plan_workspace).await?;
            debug!(workspace = %plan_workspace, "deleted plan workspace");
        }
        Ok(())
    }

    async fn recover(&self, env_name: &str, err: TerraformError) -> EngineError {
        let p = self.provisioner();
        if !p.model().delete_on_failure {
            return err.into();
        }
        if let Err(recovery) = destroy_after_failure(p, &self.logger, &err).await {
            return recovery;
        }
        if let Err(e) = p.workspace_delete(env_name).await {
            self.logger.warn(&format!("failed to delete workspace {}: {}", env_name, e));
        }
        err.into()
    }
}
