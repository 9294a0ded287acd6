use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("missing required field `{0}`")]
    MissingField(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid version: {0}")]
    InvalidVersion(String),

    #[error("unknown storage driver '{0}', supported drivers: s3")]
    UnknownStorageDriver(String),
}
