use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("{operation} {key}: HTTP {status} {code}: {message}")]
    Http {
        operation: &'static str,
        key: String,
        status: u16,
        code: String,
        message: String,
    },

    #[error("{operation} {key}: {message}")]
    Transport {
        operation: &'static str,
        key: String,
        message: String,
    },

    #[error("uploaded object {key} is still not visible after {attempts} attempts")]
    NotVisible { key: String, attempts: u32 },

    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid storage configuration: {0}")]
    Config(String),
}
