pub mod artifact;
pub mod error;
pub mod memory;
pub mod s3;
mod sign;
pub mod storage;

pub use artifact::{env_name_from_key, object_key, Artifact, ArtifactKind, ArtifactStore, MIGRATED_SUFFIX, TAINTED_SUFFIX};
pub use error::StorageError;
pub use memory::InMemoryStorage;
pub use s3::S3Storage;
pub use storage::{sort_versions, ObjectVersion, Storage, UploadOptions};
