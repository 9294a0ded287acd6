use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Domain(#[from] tfres_domain::DomainError),

    #[error("storage error: {0}")]
    Storage(#[from] tfres_storage::StorageError),

    /// Provisioner failures are surfaced with their output untouched.
    #[error(transparent)]
    Terraform(#[from] tfres_terraform::TerraformError),

    /// `delete_on_failure` destroy failed after a failed apply.
    #[error("apply failed: {apply}\ndestroy after failed apply also failed: {destroy}")]
    RecoveryFailed { apply: String, destroy: String },

    #[error(
        "no env name given: set `put.params.env_name`, `put.params.env_name_file`, \
         `put.params.generate_random_name` or `source.env_name`"
    )]
    MissingEnvName,

    #[error("failed to generate a unique random env name after {attempts} attempts")]
    NameExhausted { attempts: u32 },

    #[error(
        "{what} for env '{env_name}' not found. If this env was destroyed, \
         set `put.get_params.action: destroy` to skip fetching it"
    )]
    NotFound { what: &'static str, env_name: String },

    #[error("cannot migrate env '{env_name}': backend workspace already exists")]
    MigrationConflict { env_name: String },

    #[error("invalid request: {0}")]
    Request(String),

    #[error("ssh agent: {0}")]
    Agent(String),

    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl EngineError {
    pub(crate) fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        EngineError::Io { path: path.as_ref().display().to_string(), source }
    }
}
