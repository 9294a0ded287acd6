use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DomainError;
use crate::terraform::TerraformConfig;

// ── Source ────────────────────────────────────────────────────────────────────

/// The `source` block shared by every request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Source {
    #[serde(default)]
    pub terraform: TerraformConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub migrated_from_storage: Option<StorageConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_name: Option<String>,
}

impl Source {
    /// Validate the source and pick the storage regime it describes.
    pub fn validate(&self) -> Result<StorageMode, DomainError> {
        self.storage_mode(&self.terraform)
    }

    /// Like [`Source::validate`], but against an already-merged `terraform`
    /// block (Out merges `params.terraform` first).
    pub fn storage_mode(&self, terraform: &TerraformConfig) -> Result<StorageMode, DomainError> {
        StorageMode::resolve(
            terraform,
            self.storage.as_ref(),
            self.migrated_from_storage.as_ref(),
        )
    }

    pub fn env_name(&self) -> Option<&str> {
        self.env_name.as_deref().filter(|n| !n.trim().is_empty())
    }
}

// ── Storage config ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageDriver {
    S3,
}

/// Object-store settings for the legacy (path-per-env) regime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub driver: String,
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub bucket_path: String,
    #[serde(default)]
    pub access_key_id: String,
    #[serde(default)]
    pub secret_access_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub use_signing_v2: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_side_encryption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sse_kms_key_id: Option<String>,
}

impl StorageConfig {
    pub fn driver(&self) -> Result<StorageDriver, DomainError> {
        match self.driver.trim() {
            "" | "s3" => Ok(StorageDriver::S3),
            other => Err(DomainError::UnknownStorageDriver(other.to_string())),
        }
    }

    /// `field` is the key the block was supplied under, used in error messages.
    pub fn validate(&self, field: &str) -> Result<(), DomainError> {
        self.driver()?;
        let required = [
            ("bucket", &self.bucket),
            ("bucket_path", &self.bucket_path),
            ("access_key_id", &self.access_key_id),
            ("secret_access_key", &self.secret_access_key),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(DomainError::MissingField(format!("{}.{}", field, name)));
            }
        }
        Ok(())
    }

    pub fn region(&self) -> &str {
        self.region_name
            .as_deref()
            .filter(|r| !r.is_empty())
            .unwrap_or("us-east-1")
    }

    /// SigV2 is used against S3-compatible endpoints or when asked for.
    pub fn uses_signing_v2(&self) -> bool {
        self.use_signing_v2 || self.endpoint.as_deref().is_some_and(|e| !e.trim().is_empty())
    }
}

// ── Storage mode ──────────────────────────────────────────────────────────────

/// Settings for the workspace-native regime.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendSettings {
    pub backend_type: String,
    pub backend_config: BTreeMap<String, Value>,
}

/// The storage regime a request runs under, decided once during validation.
#[derive(Debug, Clone, PartialEq)]
pub enum StorageMode {
    Backend(BackendSettings),
    Legacy(StorageConfig),
    Migrating {
        backend: BackendSettings,
        legacy: StorageConfig,
    },
}

impl StorageMode {
    pub fn resolve(
        terraform: &TerraformConfig,
        storage: Option<&StorageConfig>,
        migrated_from: Option<&StorageConfig>,
    ) -> Result<StorageMode, DomainError> {
        let backend = terraform.backend_type().map(|t| BackendSettings {
            backend_type: t.to_string(),
            backend_config: terraform.backend_config.clone(),
        });

        match (backend, storage, migrated_from) {
            (Some(_), Some(_), _) => Err(DomainError::InvalidConfig(
                "cannot specify both `terraform.backend_type` and `storage`".into(),
            )),
            (None, Some(_), Some(_)) => Err(DomainError::InvalidConfig(
                "cannot specify both `storage` and `migrated_from_storage`".into(),
            )),
            (None, None, Some(_)) => Err(DomainError::InvalidConfig(
                "must specify `terraform.backend_type` when `migrated_from_storage` is set".into(),
            )),
            (None, None, None) => Err(DomainError::InvalidConfig(
                "must specify either `terraform.backend_type` or `storage`".into(),
            )),
            (Some(backend), None, Some(legacy)) => {
                legacy.validate("migrated_from_storage")?;
                Ok(StorageMode::Migrating { backend, legacy: legacy.clone() })
            }
            (Some(backend), None, None) => Ok(StorageMode::Backend(backend)),
            (None, Some(legacy), None) => {
                legacy.validate("storage")?;
                Ok(StorageMode::Legacy(legacy.clone()))
            }
        }
    }

    pub fn backend(&self) -> Option<&BackendSettings> {
        match self {
            StorageMode::Backend(b) | StorageMode::Migrating { backend: b, .. } => Some(b),
            StorageMode::Legacy(_) => None,
        }
    }

    pub fn legacy(&self) -> Option<&StorageConfig> {
        match self {
            StorageMode::Legacy(s) | StorageMode::Migrating { legacy: s, .. } => Some(s),
            StorageMode::Backend(_) => None,
        }
    }
}
