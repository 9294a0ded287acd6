use thiserror::Error;

#[derive(Debug, Error)]
pub enum TerraformError {
    /// Non-zero exit. `output` is stdout and stderr interleaved as produced.
    #[error("terraform {command} failed with exit code {code}\n{output}")]
    CommandFailed {
        command: String,
        code: i32,
        output: String,
    },

    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Misconfigured `override_files` / `module_override_files`.
    #[error("{0}")]
    Override(String),

    #[error("failed to parse {what}: {message}")]
    Parse { what: String, message: String },

    #[error("invalid terraform configuration: {0}")]
    Config(String),
}

impl TerraformError {
    pub(crate) fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        TerraformError::Io { path: path.as_ref().display().to_string(), source }
    }

    pub(crate) fn parse(what: impl Into<String>, message: impl ToString) -> Self {
        TerraformError::Parse { what: what.into(), message: message.to_string() }
    }
}
