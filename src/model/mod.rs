//! Core data model: backup metadata, storage locations, jobs and requests

pub mod job;
pub mod location;
pub mod metadata;
pub mod request;

pub use job::{BackupJob, JobKind, JobProgress, JobStage};
pub use location::StorageLocation;
pub use metadata::{BackupMetadata, BackupStatus, BackupType, RetentionClass};
pub use request::{BackupRequest, RestoreRequest, RestoreResult, RestoreStatus};
