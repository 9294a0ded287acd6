use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TerraformError;

pub const SENSITIVE_PLACEHOLDER: &str = "<sensitive>";
const NO_OUTPUTS: &str = "no outputs defined";

/// One entry of `terraform output -json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputValue {
    pub value: Value,
    #[serde(default)]
    pub sensitive: bool,
    #[serde(rename = "type", default)]
    pub kind: Value,
}

/// Outputs of a state, keyed by output name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outputs(pub BTreeMap<String, OutputValue>);

impl Outputs {
    /// Parse `output -json`. Empty stdout, or the "no outputs defined"
    /// warning on stderr, means no outputs.
    pub fn parse(stdout: &str, stderr: &str) -> Result<Outputs, TerraformError> {
        let trimmed = stdout.trim();
        if trimmed.is_empty() || stderr.contains(NO_OUTPUTS) || stdout.contains(NO_OUTPUTS) {
            return Ok(Outputs::default());
        }
        serde_json::from_str(trimmed)
            .map(Outputs)
            .map_err(|e| TerraformError::parse("terraform outputs", e))
    }

    /// `{name → value}`, structure preserved.
    pub fn raw(&self) -> BTreeMap<String, Value> {
        self.0.iter().map(|(k, o)| (k.clone(), o.value.clone())).collect()
    }

    /// `{name → string}` with sensitive values masked and scalars unquoted.
    pub fn sanitized(&self) -> BTreeMap<String, String> {
        self.0
            .iter()
            .map(|(k, o)| {
                let rendered = if o.sensitive {
                    SENSITIVE_PLACEHOLDER.to_string()
                } else {
                    match &o.value {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    }
                };
                (k.clone(), rendered)
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
