use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The `terraform` block of `source` or `params`.
///
/// Every field is optional so that `params.terraform` can be laid over
/// `source.terraform` with [`TerraformConfig::merge`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TerraformConfig {
    /// Module directory, relative to the sources directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_type: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub backend_config: BTreeMap<String, Value>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub vars: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub var_files: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_on_failure: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_only: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_run: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_module: Option<String>,

    /// `tf_id → iaas_id`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub imports: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub import_files: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_files: Option<Vec<String>>,
    /// Entries of the form `{src: <file>, dst: <dir>}`; checked by the driver.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_override_files: Option<Vec<BTreeMap<String, Value>>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
}

fn pick<T: Clone>(over: &Option<T>, base: &Option<T>) -> Option<T> {
    over.clone().or_else(|| base.clone())
}

fn merge_map<V: Clone>(base: &BTreeMap<String, V>, over: &BTreeMap<String, V>) -> BTreeMap<String, V> {
    let mut merged = base.clone();
    merged.extend(over.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

impl TerraformConfig {
    /// Lay `over` on top of `self`. Scalars from `over` win when present, maps
    /// merge key-wise, lists are replaced wholesale.
    pub fn merge(&self, over: &TerraformConfig) -> TerraformConfig {
        TerraformConfig {
            source: pick(&over.source, &self.source),
            backend_type: pick(&over.backend_type, &self.backend_type),
            backend_config: merge_map(&self.backend_config, &over.backend_config),
            vars: merge_map(&self.vars, &over.vars),
            var_files: pick(&over.var_files, &self.var_files),
            env: merge_map(&self.env, &over.env),
            delete_on_failure: pick(&over.delete_on_failure, &self.delete_on_failure),
            plan_only: pick(&over.plan_only, &self.plan_only),
            plan_run: pick(&over.plan_run, &self.plan_run),
            output_module: pick(&over.output_module, &self.output_module),
            imports: merge_map(&self.imports, &over.imports),
            import_files: pick(&over.import_files, &self.import_files),
            override_files: pick(&over.override_files, &self.override_files),
            module_override_files: pick(&over.module_override_files, &self.module_override_files),
            plugin_dir: pick(&over.plugin_dir, &self.plugin_dir),
            private_key: pick(&over.private_key, &self.private_key),
        }
    }

    pub fn delete_on_failure(&self) -> bool {
        self.delete_on_failure.unwrap_or(false)
    }

    pub fn plan_only(&self) -> bool {
        self.plan_only.unwrap_or(false)
    }

    pub fn plan_run(&self) -> bool {
        self.plan_run.unwrap_or(false)
    }

    pub fn backend_type(&self) -> Option<&str> {
        self.backend_type.as_deref().filter(|t| !t.trim().is_empty())
    }
}
