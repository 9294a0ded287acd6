use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::source::Source;
use crate::terraform::TerraformConfig;
use crate::version::Version;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Destroy,
}

// ── check ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckRequest {
    #[serde(default)]
    pub source: Source,
    #[serde(default)]
    pub version: Option<Version>,
}

impl CheckRequest {
    /// The prior version, ignoring the empty object some hosts send.
    pub fn prior_version(&self) -> Option<&Version> {
        self.version.as_ref().filter(|v| !v.env_name.is_empty())
    }
}

// ── in ────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InParams {
    #[serde(default)]
    pub action: Option<Action>,
    #[serde(default)]
    pub output_statefile: bool,
    #[serde(default)]
    pub output_module: Option<String>,
    #[serde(default)]
    pub output_json_planfile: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InRequest {
    #[serde(default)]
    pub source: Source,
    #[serde(default)]
    pub version: Option<Version>,
    #[serde(default)]
    pub params: InParams,
}

impl InRequest {
    pub fn version(&self) -> Result<&Version, DomainError> {
        let version = self
            .version
            .as_ref()
            .ok_or_else(|| DomainError::MissingField("version".into()))?;
        version.validate()?;
        Ok(version)
    }
}

// ── out ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutParams {
    #[serde(default)]
    pub env_name: Option<String>,
    #[serde(default)]
    pub env_name_file: Option<String>,
    #[serde(default)]
    pub generate_random_name: bool,
    #[serde(default)]
    pub action: Option<Action>,
    #[serde(default)]
    pub terraform: TerraformConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutRequest {
    #[serde(default)]
    pub source: Source,
    #[serde(default)]
    pub params: OutParams,
}

impl OutRequest {
    /// `source.terraform` with `params.terraform` laid over it.
    pub fn merged_terraform(&self) -> TerraformConfig {
        self.source.terraform.merge(&self.params.terraform)
    }
}

// ── responses ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataField {
    pub name: String,
    pub value: String,
}

/// Response body of `in` and `out`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub version: Version,
    pub metadata: Vec<MetadataField>,
}
