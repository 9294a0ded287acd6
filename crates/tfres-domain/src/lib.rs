pub mod error;
pub mod request;
pub mod source;
pub mod terraform;
pub mod version;


pub use error::DomainError;
pub use request::{
    Action, CheckRequest, InParams, InRequest, MetadataField, OutParams, OutRequest, Response,
};
pub use source::{BackendSettings, Source, StorageConfig, StorageDriver, StorageMode};
pub use terraform::TerraformConfig;
pub use version::{format_timestamp, Regime, Version, VersionKind};
