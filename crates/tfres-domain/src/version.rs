use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

// ── Version record ────────────────────────────────────────────────────────────

/// A version as exchanged with the pipeline host.
///
/// On the wire this is a flat object of optional string fields. Internally the
/// record is one of the shapes in [`VersionKind`]; the constructors below are
/// the only way the engine builds versions, so `serial` and `last_modified`
/// are never populated together.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    #[serde(default)]
    pub env_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lineage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_only: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_checksum: Option<String>,
}

/// Decoded shape of a [`Version`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionKind {
    /// Workspace-native state, ordered by serial within a lineage.
    Backend { serial: u64, lineage: String },
    /// Object-per-env state, ordered by object modification time.
    Legacy { last_modified: DateTime<Utc> },
    /// Output of a `plan_only` put.
    Plan {
        checksum: Option<String>,
        last_modified: Option<DateTime<Utc>>,
    },
    /// Env name only, e.g. the result of a backend destroy.
    Bare,
}

/// Which storage regime produced a version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Regime {
    Backend,
    Legacy,
}

/// RFC-3339, UTC, second precision: `2024-01-02T03:04:05Z`.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, DomainError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| DomainError::InvalidVersion(format!("last_modified '{}': {}", s, e)))
}

impl Version {
    pub fn backend(env_name: impl Into<String>, serial: u64, lineage: impl Into<String>) -> Self {
        Self {
            env_name: env_name.into(),
            serial: Some(serial.to_string()),
            lineage: Some(lineage.into()),
            ..Self::default()
        }
    }

    pub fn legacy(env_name: impl Into<String>, last_modified: DateTime<Utc>) -> Self {
        Self {
            env_name: env_name.into(),
            last_modified: Some(format_timestamp(last_modified)),
            ..Self::default()
        }
    }

    pub fn plan(env_name: impl Into<String>, plan_checksum: impl Into<String>) -> Self {
        Self {
            env_name: env_name.into(),
            plan_only: Some("true".into()),
            plan_checksum: Some(plan_checksum.into()),
            ..Self::default()
        }
    }

    pub fn legacy_plan(env_name: impl Into<String>, last_modified: DateTime<Utc>) -> Self {
        Self {
            plan_only: Some("true".into()),
            ..Self::legacy(env_name, last_modified)
        }
    }

    pub fn bare(env_name: impl Into<String>) -> Self {
        Self {
            env_name: env_name.into(),
            ..Self::default()
        }
    }

    pub fn is_plan(&self) -> bool {
        self.plan_only.as_deref() == Some("true")
    }

    /// The regime that produced this version, judged by which ordering field
    /// is present. `None` for plan and bare versions.
    pub fn regime(&self) -> Option<Regime> {
        if self.is_plan() {
            return None;
        }
        match (&self.serial, &self.last_modified) {
            (Some(_), _) => Some(Regime::Backend),
            (None, Some(_)) => Some(Regime::Legacy),
            (None, None) => None,
        }
    }

    pub fn kind(&self) -> Result<VersionKind, DomainError> {
        if self.serial.is_some() && self.last_modified.is_some() {
            return Err(DomainError::InvalidVersion(
                "`serial` and `last_modified` are mutually exclusive".into(),
            ));
        }

        if self.is_plan() {
            let last_modified = self.last_modified.as_deref().map(parse_timestamp).transpose()?;
            return Ok(VersionKind::Plan {
                checksum: self.plan_checksum.clone(),
                last_modified,
            });
        }

        if let Some(serial) = &self.serial {
            let serial = serial.trim().parse::<u64>().map_err(|_| {
                DomainError::InvalidVersion(format!("serial '{}' is not an integer", serial))
            })?;
            return Ok(VersionKind::Backend {
                serial,
                lineage: self.lineage.clone().unwrap_or_default(),
            });
        }

        if let Some(ts) = &self.last_modified {
            return Ok(VersionKind::Legacy { last_modified: parse_timestamp(ts)? });
        }

        Ok(VersionKind::Bare)
    }

    /// Check the host contract: an env name plus one well-formed shape.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.env_name.trim().is_empty() {
            return Err(DomainError::MissingField("version.env_name".into()));
        }
        self.kind().map(|_| ())
    }

    /// Whether `self` should be reported as a new version relative to `prior`.
    ///
    /// Backend versions are newer when the serial is numerically greater or the
    /// lineage differs; legacy versions when the timestamp is later. A change of
    /// shape (e.g. legacy → backend after migration) always counts as new.
    pub fn is_newer_than(&self, prior: &Version) -> bool {
        if self.env_name != prior.env_name {
            return true;
        }
        match (self.kind(), prior.kind()) {
            (
                Ok(VersionKind::Backend { serial, lineage }),
                Ok(VersionKind::Backend { serial: prior_serial, lineage: prior_lineage }),
            ) => lineage != prior_lineage || serial > prior_serial,
            (
                Ok(VersionKind::Legacy { last_modified }),
                Ok(VersionKind::Legacy { last_modified: prior_ts }),
            ) => last_modified > prior_ts,
            (Ok(a), Ok(b)) => std::mem::discriminant(&a) != std::mem::discriminant(&b),
            _ => true,
        }
    }
}
