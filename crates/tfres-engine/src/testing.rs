//! In-process fakes for the provisioner and the outside world.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tfres_domain::{Source, StorageConfig, TerraformConfig};
use tfres_storage::{InMemoryStorage, Storage};
use tfres_terraform::{Model, OutputValue, Outputs, Provisioner, TerraformError};

use crate::error::EngineError;
use crate::namer::{NameGenerator, RandomNames};
use crate::services::Services;

pub const FAKE_TERRAFORM_VERSION: &str = "Terraform v1.5.7";
pub const APPLY_ERROR: &str = "Error: invalid value for variable \"region\"";
pub const DESTROY_ERROR: &str = "Error: deleting bucket: BucketNotEmpty";

// ── Fake cloud ────────────────────────────────────────────────────────────────

/// State of one workspace, or of a legacy state file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FakeState {
    #[serde(default)]
    pub serial: u64,
    #[serde(default)]
    pub lineage: String,
    #[serde(default)]
    pub outputs: BTreeMap<String, OutputValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoded_plan: Option<String>,
}

impl FakeState {
    pub fn new(serial: u64, lineage: &str) -> Self {
        Self { serial, lineage: lineage.to_string(), ..Self::default() }
    }

    pub fn with_output(mut self, name: &str, value: serde_json::Value, sensitive: bool) -> Self {
        self.outputs.insert(
            name.to_string(),
            OutputValue { value, sensitive, kind: json!("string") },
        );
        self
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }
}

#[derive(Debug, Default)]
pub struct Cloud {
    pub workspaces: BTreeMap<String, FakeState>,
    pub current: String,
    pub fail_apply: bool,
    pub fail_destroy: bool,
    pub calls: Vec<String>,
    /// The vars each apply consumed; empty for applies of a saved plan.
    pub applied_vars: Vec<BTreeMap<String, serde_json::Value>>,
}

#[derive(Debug, Clone, Default)]
pub struct FakeCloud(Arc<Mutex<Cloud>>);

impl FakeCloud {
    pub fn lock(&self) -> MutexGuard<'_, Cloud> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn seed(&self, workspace: &str, state: FakeState) {
        self.lock().workspaces.insert(workspace.to_string(), state);
    }

    pub fn workspace(&self, name: &str) -> Option<FakeState> {
        self.lock().workspaces.get(name).cloned()
    }

    pub fn workspace_names(&self) -> Vec<String> {
        self.lock().workspaces.keys().cloned().collect()
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn fail_apply(&self, fail: bool) {
        self.lock().fail_apply = fail;
    }

    pub fn fail_destroy(&self, fail: bool) {
        self.lock().fail_destroy = fail;
    }
}

// ── Fake provisioner ──────────────────────────────────────────────────────────

/// Keeps backend workspaces in a [`FakeCloud`] and legacy state in the
/// model's local state file, both as JSON [`FakeState`].
pub struct FakeProvisioner {
    model: Model,
    cloud: FakeCloud,
}

fn failed(command: &str, output: &str) -> TerraformError {
    TerraformError::CommandFailed { command: command.to_string(), code: 1, output: output.to_string() }
}

fn io(path: &Path, source: std::io::Error) -> TerraformError {
    TerraformError::Io { path: path.display().to_string(), source }
}

impl FakeProvisioner {
    pub fn new(model: Model, cloud: FakeCloud) -> Self {
        Self { model, cloud }
    }

    fn load(&self, cloud: &Cloud) -> Result<FakeState, TerraformError> {
        if self.model.uses_backend() {
            return Ok(cloud.workspaces.get(&cloud.current).cloned().unwrap_or_default());
        }
        match std::fs::read(&self.model.state_path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| TerraformError::Parse {
                what: "state".into(),
                message: e.to_string(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FakeState::default()),
            Err(e) => Err(io(&self.model.state_path, e)),
        }
    }

    fn save(&self, cloud: &mut Cloud, state: FakeState) -> Result<(), TerraformError> {
        if self.model.uses_backend() {
            let current = cloud.current.clone();
            cloud.workspaces.insert(current, state);
            return Ok(());
        }
        std::fs::write(&self.model.state_path, state.to_bytes()).map_err(|e| io(&self.model.state_path, e))
    }

    fn select(cloud: &mut Cloud, name: &str) -> Result<(), TerraformError> {
        if name != "default" && !cloud.workspaces.contains_key(name) {
            return Err(failed("workspace select", &format!("Workspace \"{}\" doesn't exist.", name)));
        }
        cloud.current = name.to_string();
        Ok(())
    }

    fn remove(cloud: &mut Cloud, name: &str) -> Result<(), TerraformError> {
        cloud.current = "default".to_string();
        cloud
            .workspaces
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| failed("workspace delete", &format!("Workspace \"{}\" doesn't exist.", name)))
    }
}

#[async_trait]
impl Provisioner for FakeProvisioner {
    fn model(&self) -> &Model {
        &self.model
    }

    async fn init_with_backend(&self) -> Result<(), TerraformError> {
        self.cloud.lock().calls.push("init backend".into());
        Ok(())
    }

    async fn init_without_backend(&self) -> Result<(), TerraformError> {
        self.cloud.lock().calls.push("init".into());
        Ok(())
    }

    async fn apply(&self) -> Result<(), TerraformError> {
        let mut cloud = self.cloud.lock();
        let plan_run = self.model.plan_run;
        cloud.calls.push(if plan_run { "apply plan".into() } else { "apply".into() });
        if plan_run && !self.model.plan_path.is_file() {
            return Err(failed("apply", "Error: Failed to load plan file"));
        }

        let mut state = self.load(&cloud)?;
        state.serial += 1;
        if state.lineage.is_empty() {
            state.lineage = "fake-lineage".into();
        }
        if cloud.fail_apply {
            self.save(&mut cloud, state)?;
            return Err(failed("apply", APPLY_ERROR));
        }

        state.outputs.clear();
        if plan_run {
            cloud.applied_vars.push(BTreeMap::new());
            state = state.with_output("planned", json!(true), false);
        } else {
            cloud.applied_vars.push(self.model.vars.clone());
            for (name, value) in &self.model.vars {
                state = state.with_output(name, value.clone(), false);
            }
        }
        state = state.with_output("password", json!("hunter2"), true);
        self.save(&mut cloud, state)
    }

    async fn destroy(&self) -> Result<(), TerraformError> {
        let mut cloud = self.cloud.lock();
        cloud.calls.push("destroy".into());
        if cloud.fail_destroy {
            return Err(failed("destroy", DESTROY_ERROR));
        }
        let mut state = self.load(&cloud)?;
        state.serial += 1;
        state.outputs.clear();
        self.save(&mut cloud, state)
    }

    async fn plan(&self) -> Result<String, TerraformError> {
        self.cloud.lock().calls.push("plan".into());
        let body = format!("plan:{}", serde_json::to_string(&self.model.vars).unwrap_or_default());
        std::fs::write(&self.model.plan_path, body).map_err(|e| io(&self.model.plan_path, e))?;
        Ok("fake-checksum".into())
    }

    async fn import(&self) -> Result<(), TerraformError> {
        if !self.model.imports.is_empty() {
            self.cloud.lock().calls.push("import".into());
        }
        Ok(())
    }

    async fn outputs(&self, module: Option<&str>) -> Result<Outputs, TerraformError> {
        let mut cloud = self.cloud.lock();
        cloud.calls.push(match module {
            Some(m) => format!("output -module={}", m),
            None => "output".into(),
        });
        Ok(Outputs(self.load(&cloud)?.outputs))
    }

    async fn version(&self) -> Result<String, TerraformError> {
        Ok(FAKE_TERRAFORM_VERSION.into())
    }

    async fn workspace_list(&self) -> Result<Vec<String>, TerraformError> {
        let cloud = self.cloud.lock();
        let mut names = vec!["default".to_string()];
        names.extend(cloud.workspaces.keys().filter(|k| *k != "default").cloned());
        Ok(names)
    }

    async fn workspace_select(&self, name: &str) -> Result<(), TerraformError> {
        Self::select(&mut self.cloud.lock(), name)
    }

    async fn workspace_new(&self, name: &str) -> Result<(), TerraformError> {
        let mut cloud = self.cloud.lock();
        if cloud.workspaces.contains_key(name) {
            return Err(failed("workspace new", &format!("Workspace \"{}\" already exists", name)));
        }
        cloud.workspaces.insert(name.to_string(), FakeState::default());
        cloud.current = name.to_string();
        Ok(())
    }

    async fn workspace_new_from_existing_state_file(&self, name: &str, state: &Path) -> Result<(), TerraformError> {
        let bytes = std::fs::read(state).map_err(|e| io(state, e))?;
        let parsed: FakeState = serde_json::from_slice(&bytes).map_err(|e| TerraformError::Parse {
            what: "state".into(),
            message: e.to_string(),
        })?;
        let mut cloud = self.cloud.lock();
        if cloud.workspaces.contains_key(name) {
            return Err(failed("workspace new", &format!("Workspace \"{}\" already exists", name)));
        }
        cloud.workspaces.insert(name.to_string(), parsed);
        cloud.current = name.to_string();
        Ok(())
    }

    async fn workspace_delete(&self, name: &str) -> Result<(), TerraformError> {
        Self::remove(&mut self.cloud.lock(), name)
    }

    async fn workspace_delete_with_force(&self, name: &str) -> Result<(), TerraformError> {
        Self::remove(&mut self.cloud.lock(), name)
    }

    async fn state_pull(&self) -> Result<Vec<u8>, TerraformError> {
        let cloud = self.cloud.lock();
        if self.model.uses_backend() {
            return Ok(cloud.workspaces.get(&cloud.current).map(FakeState::to_bytes).unwrap_or_default());
        }
        match std::fs::read(&self.model.state_path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(io(&self.model.state_path, e)),
        }
    }

    async fn save_plan_to_backend(&self, plan_workspace: &str) -> Result<(), TerraformError> {
        let plan = std::fs::read(&self.model.plan_path).map_err(|e| io(&self.model.plan_path, e))?;
        let mut cloud = self.cloud.lock();
        cloud.calls.push(format!("save plan {}", plan_workspace));
        let state = FakeState {
            encoded_plan: Some(String::from_utf8_lossy(&plan).into_owned()),
            ..FakeState::default()
        };
        cloud.workspaces.insert(plan_workspace.to_string(), state);
        cloud.current = plan_workspace.to_string();
        Ok(())
    }

    async fn get_plan_from_backend(&self, plan_workspace: &str) -> Result<(), TerraformError> {
        let mut cloud = self.cloud.lock();
        Self::select(&mut cloud, plan_workspace)?;
        let plan = cloud
            .workspaces
            .get(plan_workspace)
            .and_then(|s| s.encoded_plan.clone())
            .ok_or_else(|| failed("state pull", "no encoded_plan output"))?;
        std::fs::write(&self.model.plan_path, plan).map_err(|e| io(&self.model.plan_path, e))
    }

    async fn json_plan(&self) -> Result<Vec<u8>, TerraformError> {
        if !self.model.plan_path.is_file() {
            return Err(failed("show", "Error: Failed to read the given file as a state or plan file"));
        }
        Ok(br#"{"format_version":"1.2"}"#.to_vec())
    }
}

// ── Fake services ─────────────────────────────────────────────────────────────

pub struct FakeServices {
    pub storage: InMemoryStorage,
    pub cloud: FakeCloud,
    pub names: Box<dyn NameGenerator>,
    pub host: BTreeMap<String, String>,
    pub models: Mutex<Vec<Model>>,
}

impl FakeServices {
    pub fn new() -> Self {
        Self {
            storage: InMemoryStorage::new(),
            cloud: FakeCloud::default(),
            names: Box::new(RandomNames),
            host: BTreeMap::new(),
            models: Mutex::new(Vec::new()),
        }
    }

    /// Models handed to provisioners so far.
    pub fn models(&self) -> Vec<Model> {
        self.models.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Services for FakeServices {
    fn storage(&self, _config: &StorageConfig) -> Result<Arc<dyn Storage>, EngineError> {
        Ok(Arc::new(self.storage.clone()))
    }

    fn provisioner(&self, model: Model) -> Arc<dyn Provisioner> {
        self.models.lock().unwrap_or_else(|e| e.into_inner()).push(model.clone());
        Arc::new(FakeProvisioner::new(model, self.cloud.clone()))
    }

    fn names(&self) -> &dyn NameGenerator {
        self.names.as_ref()
    }

    fn host_var(&self, key: &str) -> Option<String> {
        self.host.get(key).cloned()
    }
}

// ── Request fixtures ──────────────────────────────────────────────────────────

pub const BUCKET_PATH: &str = "envs";
pub const LINEAGE: &str = "f62eee11-6a4e-4d39-b5c7-15d3dad8e5f7";

pub fn storage_config() -> StorageConfig {
    StorageConfig {
        driver: "s3".into(),
        bucket: "bucket".into(),
        bucket_path: BUCKET_PATH.into(),
        access_key_id: "AKID".into(),
        secret_access_key: "secret".into(),
        ..StorageConfig::default()
    }
}

fn terraform(backend: bool) -> TerraformConfig {
    TerraformConfig {
        source: Some("fixtures/aws".into()),
        backend_type: backend.then(|| "s3".to_string()),
        ..TerraformConfig::default()
    }
}

pub fn legacy_source() -> Source {
    Source { terraform: terraform(false), storage: Some(storage_config()), ..Source::default() }
}

pub fn backend_source() -> Source {
    Source { terraform: terraform(true), ..Source::default() }
}

pub fn migrating_source() -> Source {
    Source {
        terraform: terraform(true),
        migrated_from_storage: Some(storage_config()),
        ..Source::default()
    }
}

pub fn state_key(env_name: &str) -> String {
    format!("{}/{}.tfstate", BUCKET_PATH, env_name)
}
