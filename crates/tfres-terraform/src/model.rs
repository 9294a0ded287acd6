use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tfres_domain::{BackendSettings, TerraformConfig};

use crate::error::TerraformError;

/// Pipeline host variables exposed to modules as `TF_VAR_<name>`.
pub const PIPELINE_VARS: [(&str, &str); 6] = [
    ("BUILD_ID", "build_id"),
    ("BUILD_NAME", "build_name"),
    ("BUILD_JOB_NAME", "build_job_name"),
    ("BUILD_PIPELINE_NAME", "build_pipeline_name"),
    ("BUILD_TEAM_NAME", "build_team_name"),
    ("ATC_EXTERNAL_URL", "atc_external_url"),
];

/// Written into the module directory when a backend is configured.
pub const BACKEND_OVERRIDE_FILE: &str = "resource_backend_override.tf";

/// A merged `terraform` block resolved for one invocation: var and import
/// files read, local artifact paths fixed inside a scratch directory.
#[derive(Debug, Clone, Default)]
pub struct Model {
    /// Module directory; every command runs with this as its working dir.
    pub source: PathBuf,
    pub backend: Option<BackendSettings>,
    pub vars: BTreeMap<String, Value>,
    pub env: BTreeMap<String, String>,
    /// `tf_id → iaas_id`.
    pub imports: BTreeMap<String, String>,
    pub override_files: Vec<PathBuf>,
    pub module_override_files: Vec<BTreeMap<String, Value>>,
    pub plugin_dir: Option<PathBuf>,
    pub private_key: Option<String>,
    pub output_module: Option<String>,
    pub delete_on_failure: bool,
    pub plan_only: bool,
    pub plan_run: bool,
    /// Local state file used by the legacy regime (`-state=`).
    pub state_path: PathBuf,
    pub plan_path: PathBuf,
    /// Scratch directory for generated files.
    pub scratch: PathBuf,
}

impl Model {
    /// Resolve `config` against `scratch`. `var_files` are merged under the
    /// explicit `vars` (later files win); `import_files` under `imports`.
    pub fn from_config(config: &TerraformConfig, scratch: &Path) -> Result<Model, TerraformError> {
        let source = config
            .source
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| TerraformError::Config("missing required field `terraform.source`".into()))?;

        let mut vars = BTreeMap::new();
        for file in config.var_files.iter().flatten() {
            vars.extend(read_yaml_map::<Value>(Path::new(file), "var file")?);
        }
        vars.extend(config.vars.clone());

        let mut imports = BTreeMap::new();
        for file in config.import_files.iter().flatten() {
            imports.extend(read_yaml_map::<String>(Path::new(file), "import file")?);
        }
        imports.extend(config.imports.clone());

        let backend = config.backend_type().map(|t| BackendSettings {
            backend_type: t.to_string(),
            backend_config: config.backend_config.clone(),
        });

        Ok(Model {
            source: PathBuf::from(source),
            backend,
            vars,
            env: config.env.clone(),
            imports,
            override_files: config.override_files.iter().flatten().map(PathBuf::from).collect(),
            module_override_files: config.module_override_files.clone().unwrap_or_default(),
            plugin_dir: config.plugin_dir.as_deref().filter(|p| !p.is_empty()).map(PathBuf::from),
            private_key: config.private_key.clone().filter(|k| !k.trim().is_empty()),
            output_module: config.output_module.clone().filter(|m| !m.is_empty()),
            delete_on_failure: config.delete_on_failure(),
            plan_only: config.plan_only(),
            plan_run: config.plan_run(),
            state_path: scratch.join("terraform.tfstate"),
            plan_path: scratch.join("plan"),
            scratch: scratch.to_path_buf(),
        })
    }

    pub fn uses_backend(&self) -> bool {
        self.backend.is_some()
    }

    /// Add the pipeline host variables found by `lookup` to `env` as
    /// `TF_VAR_*`, unless `vars` already sets the same key.
    pub fn with_pipeline_vars(mut self, lookup: impl Fn(&str) -> Option<String>) -> Model {
        for (env_key, var) in PIPELINE_VARS {
            if self.vars.contains_key(var) {
                continue;
            }
            if let Some(value) = lookup(env_key) {
                self.env.insert(format!("TF_VAR_{}", var), value);
            }
        }
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Model {
        self.env.insert(key.into(), value.into());
        self
    }
}

fn read_yaml_map<V: serde::de::DeserializeOwned>(
    path: &Path,
    what: &str,
) -> Result<BTreeMap<String, V>, TerraformError> {
    let content = std::fs::read_to_string(path).map_err(|e| TerraformError::io(path, e))?;
    if content.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    serde_yaml::from_str(&content)
        .map_err(|e| TerraformError::parse(format!("{} {}", what, path.display()), e))
}
