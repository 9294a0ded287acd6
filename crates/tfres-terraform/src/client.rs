use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::Engine as _;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::TerraformError;
use crate::files;
use crate::model::Model;
use crate::outputs::Outputs;
use crate::process::{self, Captured, Echo};
use crate::provisioner::Provisioner;
use crate::vars::{render_backend_value, var_flags};

/// Overrides the provisioner binary looked up on `PATH`.
pub const BIN_ENV: &str = "TFRES_TERRAFORM_BIN";

const NO_OUTPUTS: &str = "no outputs defined";
const ENCODED_PLAN: &str = "encoded_plan";
const PLAN_STATE_FILE: &str = "plan-workspace.tfstate";

/// [`Provisioner`] backed by the terraform CLI.
#[derive(Debug, Clone)]
pub struct Client {
    model: Model,
    program: PathBuf,
    leading_args: Vec<String>,
}

impl Client {
    pub fn new(model: Model) -> Self {
        let program = std::env::var(BIN_ENV)
            .ok()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| "terraform".to_string());
        Self { model, program: PathBuf::from(program), leading_args: Vec::new() }
    }

    /// Run `program leading_args… <subcommand>` instead of `terraform`.
    pub fn with_program(mut self, program: impl Into<PathBuf>, leading_args: Vec<String>) -> Self {
        self.program = program.into();
        self.leading_args = leading_args;
        self
    }

    async fn run(&self, args: Vec<String>, echo: Echo) -> Result<Captured, TerraformError> {
        let mut cmd = process::command(&self.program, &self.model.source, &self.model.env);
        cmd.args(&self.leading_args).args(&args);
        process::run(cmd, &label(&args), echo).await
    }

    /// Run and turn a non-zero exit into [`TerraformError::CommandFailed`].
    async fn exec(&self, args: Vec<String>, echo: Echo) -> Result<Captured, TerraformError> {
        let captured = self.run(args.clone(), echo).await?;
        if !captured.success() {
            return Err(TerraformError::CommandFailed {
                command: label(&args),
                code: captured.code,
                output: captured.combined,
            });
        }
        Ok(captured)
    }

    /// `-state=<path>` in the legacy regime, nothing under a backend.
    fn state_flag(&self) -> Vec<String> {
        if self.model.uses_backend() {
            Vec::new()
        } else {
            vec![format!("-state={}", self.model.state_path.display())]
        }
    }

    fn vars(&self) -> Vec<String> {
        var_flags(&self.model.vars)
    }

    /// Plugins, module sources and override files, in that order.
    async fn prepare_source(&self) -> Result<(), TerraformError> {
        if let Some(ref plugin_dir) = self.model.plugin_dir {
            files::link_plugin_dir(&self.model.source, plugin_dir)?;
        }
        self.exec(args(&["get", "-update"]), Echo::Log).await?;
        files::copy_override_files(&self.model.source, &self.model.override_files)?;
        files::copy_module_override_files(&self.model.source, &self.model.module_override_files)?;
        Ok(())
    }

    async fn state_list(&self) -> Result<BTreeSet<String>, TerraformError> {
        if !self.model.uses_backend() && !self.model.state_path.exists() {
            return Ok(BTreeSet::new());
        }
        let mut cmd = args(&["state", "list"]);
        cmd.extend(self.state_flag());
        let captured = self.exec(cmd, Echo::Quiet).await?;
        Ok(captured
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn read_plan(&self) -> Result<Vec<u8>, TerraformError> {
        tokio::fs::read(&self.model.plan_path)
            .await
            .map_err(|e| TerraformError::io(&self.model.plan_path, e))
    }
}

fn args(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// `workspace select`, `state pull`, `apply`…
fn label(args: &[String]) -> String {
    match args.first().map(String::as_str) {
        Some(group @ ("workspace" | "state")) => match args.get(1) {
            Some(sub) => format!("{} {}", group, sub),
            None => group.to_string(),
        },
        Some(cmd) => cmd.to_string(),
        None => String::new(),
    }
}

/// `* current` / `  other` lines of `workspace list`.
pub fn parse_workspace_list(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(|l| l.trim().trim_start_matches('*').trim())
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl Provisioner for Client {
    fn model(&self) -> &Model {
        &self.model
    }

    async fn init_with_backend(&self) -> Result<(), TerraformError> {
        let backend = self.model.backend.as_ref().ok_or_else(|| {
            TerraformError::Config("init with backend requires `terraform.backend_type`".into())
        })?;
        self.prepare_source().await?;
        files::write_backend_override(&self.model.source, &backend.backend_type)?;

        let mut cmd = args(&["init", "-input=false", "-backend=true"]);
        for (k, v) in &backend.backend_config {
            cmd.push(format!("-backend-config={}={}", k, render_backend_value(v)));
        }
        self.exec(cmd, Echo::Log).await?;
        Ok(())
    }

    async fn init_without_backend(&self) -> Result<(), TerraformError> {
        self.prepare_source().await?;
        self.exec(args(&["init", "-input=false", "-backend=false"]), Echo::Log).await?;
        Ok(())
    }

    async fn apply(&self) -> Result<(), TerraformError> {
        let mut cmd = args(&["apply", "-auto-approve", "-input=false"]);
        cmd.extend(self.state_flag());
        if self.model.plan_run {
            cmd.push(self.model.plan_path.display().to_string());
        } else {
            cmd.extend(self.vars());
        }
        self.exec(cmd, Echo::Log).await?;
        Ok(())
    }

    async fn destroy(&self) -> Result<(), TerraformError> {
        let mut cmd = args(&["destroy", "-auto-approve", "-input=false"]);
        cmd.extend(self.state_flag());
        cmd.extend(self.vars());
        self.exec(cmd, Echo::Log).await?;
        Ok(())
    }

    async fn plan(&self) -> Result<String, TerraformError> {
        let mut cmd = args(&["plan", "-input=false"]);
        cmd.push(format!("-out={}", self.model.plan_path.display()));
        cmd.extend(self.state_flag());
        cmd.extend(self.vars());
        self.exec(cmd, Echo::Log).await?;

        let checksum = format!("{:x}", Sha256::digest(self.read_plan().await?));
        debug!(checksum = %checksum, "plan written");
        Ok(checksum)
    }

    async fn import(&self) -> Result<(), TerraformError> {
        if self.model.imports.is_empty() {
            return Ok(());
        }
        let existing = self.state_list().await?;
        for (tf_id, iaas_id) in &self.model.imports {
            if existing.contains(tf_id) {
                info!(tf_id = %tf_id, "resource already exists in state, skipping import");
                continue;
            }
            let mut cmd = args(&["import", "-input=false"]);
            cmd.extend(self.state_flag());
            cmd.extend(self.vars());
            cmd.push(tf_id.clone());
            cmd.push(iaas_id.clone());
            self.exec(cmd, Echo::Log).await?;
        }
        Ok(())
    }

    async fn outputs(&self, module: Option<&str>) -> Result<Outputs, TerraformError> {
        let mut cmd = args(&["output", "-json"]);
        cmd.extend(self.state_flag());
        if let Some(module) = module.filter(|m| !m.is_empty()) {
            cmd.push(format!("-module={}", module));
        }
        let captured = self.run(cmd.clone(), Echo::Quiet).await?;
        if captured.combined.contains(NO_OUTPUTS) {
            return Ok(Outputs::default());
        }
        if !captured.success() {
            return Err(TerraformError::CommandFailed {
                command: label(&cmd),
                code: captured.code,
                output: captured.combined,
            });
        }
        Outputs::parse(&captured.stdout, &captured.stderr)
    }

    async fn version(&self) -> Result<String, TerraformError> {
        let captured = self.exec(args(&["-v"]), Echo::Quiet).await?;
        Ok(captured.stdout.lines().next().unwrap_or_default().trim().to_string())
    }

    async fn workspace_list(&self) -> Result<Vec<String>, TerraformError> {
        let captured = self.exec(args(&["workspace", "list"]), Echo::Quiet).await?;
        Ok(parse_workspace_list(&captured.stdout))
    }

    async fn workspace_select(&self, name: &str) -> Result<(), TerraformError> {
        self.exec(args(&["workspace", "select", name]), Echo::Log).await?;
        Ok(())
    }

    async fn workspace_new(&self, name: &str) -> Result<(), TerraformError> {
        self.exec(args(&["workspace", "new", name]), Echo::Log).await?;
        Ok(())
    }

    async fn workspace_new_from_existing_state_file(&self, name: &str, state: &Path) -> Result<(), TerraformError> {
        let flag = format!("-state={}", state.display());
        self.exec(args(&["workspace", "new", &flag, name]), Echo::Log).await?;
        Ok(())
    }

    async fn workspace_delete(&self, name: &str) -> Result<(), TerraformError> {
        self.workspace_select("default").await?;
        self.exec(args(&["workspace", "delete", name]), Echo::Log).await?;
        Ok(())
    }

    async fn workspace_delete_with_force(&self, name: &str) -> Result<(), TerraformError> {
        self.workspace_select("default").await?;
        self.exec(args(&["workspace", "delete", "-force", name]), Echo::Log).await?;
        Ok(())
    }

    async fn state_pull(&self) -> Result<Vec<u8>, TerraformError> {
        if !self.model.uses_backend() {
            return match tokio::fs::read(&self.model.state_path).await {
                Ok(bytes) => Ok(bytes),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
                Err(e) => Err(TerraformError::io(&self.model.state_path, e)),
            };
        }
        let captured = self.exec(args(&["state", "pull"]), Echo::Quiet).await?;
        Ok(captured.stdout.into_bytes())
    }

    async fn save_plan_to_backend(&self, plan_workspace: &str) -> Result<(), TerraformError> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(self.read_plan().await?);
        let version = self.version().await?;
        let tf_version = version.trim_start_matches("Terraform").trim().trim_start_matches('v');

        let state = json!({
            "version": 4,
            "terraform_version": tf_version,
            "serial": 0,
            "lineage": uuid::Uuid::new_v4().to_string(),
            "outputs": {
                ENCODED_PLAN: { "value": encoded, "type": "string" }
            },
            "resources": []
        });
        let path = self.model.scratch.join(PLAN_STATE_FILE);
        let body = serde_json::to_vec(&state).map_err(|e| TerraformError::parse("plan state", e))?;
        tokio::fs::write(&path, body)
            .await
            .map_err(|e| TerraformError::io(&path, e))?;

        if self.workspace_exists(plan_workspace).await? {
            self.workspace_delete_with_force(plan_workspace).await?;
        }
        self.workspace_new_from_existing_state_file(plan_workspace, &path).await?;
        info!(workspace = plan_workspace, "saved plan to backend");
        Ok(())
    }

    async fn get_plan_from_backend(&self, plan_workspace: &str) -> Result<(), TerraformError> {
        self.workspace_select(plan_workspace).await?;
        let raw = self.state_pull().await?;
        let state: Value = serde_json::from_slice(&raw).map_err(|e| TerraformError::parse("plan state", e))?;
        let encoded = state["outputs"][ENCODED_PLAN]["value"].as_str().ok_or_else(|| {
            TerraformError::parse(
                "plan state",
                format!("workspace {} has no {} output", plan_workspace, ENCODED_PLAN),
            )
        })?;
        let plan = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| TerraformError::parse("encoded plan", e))?;
        tokio::fs::write(&self.model.plan_path, plan)
            .await
            .map_err(|e| TerraformError::io(&self.model.plan_path, e))?;
        info!(workspace = plan_workspace, "restored plan from backend");
        Ok(())
    }

    async fn json_plan(&self) -> Result<Vec<u8>, TerraformError> {
        let plan = self.model.plan_path.display().to_string();
        let captured = self.exec(args(&["show", "-json", &plan]), Echo::Quiet).await?;
        Ok(captured.stdout.into_bytes())
    }
}
