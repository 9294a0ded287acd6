use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::TerraformError;
use crate::model::Model;
use crate::outputs::Outputs;

/// `serial` and `lineage` of a workspace's state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateVersion {
    #[serde(default)]
    pub serial: u64,
    #[serde(default)]
    pub lineage: String,
}

/// Name of the workspace that carries the plan of `env_name`.
pub fn plan_workspace_name(env_name: &str) -> String {
    format!("{}-plan", env_name)
}

/// Operations the lifecycle engine drives on the provisioner CLI.
///
/// Commands run against [`Provisioner::model`]; in the legacy regime they
/// target the local state file, otherwise the currently selected workspace.
#[async_trait]
pub trait Provisioner: Send + Sync {
    fn model(&self) -> &Model;

    async fn init_with_backend(&self) -> Result<(), TerraformError>;
    async fn init_without_backend(&self) -> Result<(), TerraformError>;

    async fn apply(&self) -> Result<(), TerraformError>;
    async fn destroy(&self) -> Result<(), TerraformError>;
    /// Write the plan file and return its checksum.
    async fn plan(&self) -> Result<String, TerraformError>;
    /// Import every configured `tf_id → iaas_id` pair not already in state.
    async fn import(&self) -> Result<(), TerraformError>;

    async fn outputs(&self, module: Option<&str>) -> Result<Outputs, TerraformError>;
    /// First line of `terraform -v`, e.g. `Terraform v1.5.7`.
    async fn version(&self) -> Result<String, TerraformError>;

    async fn workspace_list(&self) -> Result<Vec<String>, TerraformError>;
    async fn workspace_select(&self, name: &str) -> Result<(), TerraformError>;
    async fn workspace_new(&self, name: &str) -> Result<(), TerraformError>;
    async fn workspace_new_from_existing_state_file(&self, name: &str, state: &Path) -> Result<(), TerraformError>;
    async fn workspace_delete(&self, name: &str) -> Result<(), TerraformError>;
    async fn workspace_delete_with_force(&self, name: &str) -> Result<(), TerraformError>;

    async fn workspace_exists(&self, name: &str) -> Result<bool, TerraformError> {
        Ok(self.workspace_list().await?.iter().any(|w| w == name))
    }

    async fn workspace_new_if_not_exists(&self, name: &str) -> Result<(), TerraformError> {
        if self.workspace_exists(name).await? {
            self.workspace_select(name).await
        } else {
            self.workspace_new(name).await
        }
    }

    /// Raw state of the selected workspace (or local state file).
    async fn state_pull(&self) -> Result<Vec<u8>, TerraformError>;

    /// Select `workspace` and read its state version. Empty state is serial 0.
    async fn current_state_version(&self, workspace: &str) -> Result<StateVersion, TerraformError> {
        self.workspace_select(workspace).await?;
        let raw = self.state_pull().await?;
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(StateVersion::default());
        }
        serde_json::from_slice(&raw).map_err(|e| TerraformError::parse("state", e))
    }

    async fn current_serial(&self, workspace: &str) -> Result<u64, TerraformError> {
        Ok(self.current_state_version(workspace).await?.serial)
    }

    /// Replace the `plan_workspace` with one whose state carries the local plan file.
    async fn save_plan_to_backend(&self, plan_workspace: &str) -> Result<(), TerraformError>;
    /// Restore the local plan file from `plan_workspace`.
    async fn get_plan_from_backend(&self, plan_workspace: &str) -> Result<(), TerraformError>;
    /// `terraform show -json` of the local plan file.
    async fn json_plan(&self) -> Result<Vec<u8>, TerraformError>;
}
