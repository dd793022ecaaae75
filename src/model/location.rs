// Storage locations - one variant per backing store, each with only its own fields

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Where an artifact lives (or should be written to)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StorageLocation {
    /// Local or mounted filesystem path
    Local { path: PathBuf },
    /// S3-compatible object store
    S3 {
        bucket: String,
        key: String,
        region: String,
    },
    /// Google Cloud Storage object
    Gcs { bucket: String, object: String },
}

impl StorageLocation {
    pub fn local(path: impl Into<PathBuf>) -> Self {
        StorageLocation::Local { path: path.into() }
    }

    pub fn s3(bucket: impl Into<String>, key: impl Into<String>, region: impl Into<String>) -> Self {
        StorageLocation::S3 {
            bucket: bucket.into(),
            key: key.into(),
            region: region.into(),
        }
    }

    pub fn gcs(bucket: impl Into<String>, object: impl Into<String>) -> Self {
        StorageLocation::Gcs {
            bucket: bucket.into(),
            object: object.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StorageLocation::Local { .. } => "local",
            StorageLocation::S3 { .. } => "s3",
            StorageLocation::Gcs { .. } => "gcs",
        }
    }

    /// Derive the location of a named object underneath this one
    pub fn child(&self, name: &str) -> Self {
        match self {
            StorageLocation::Local { path } => StorageLocation::Local {
                path: path.join(name),
            },
            StorageLocation::S3 { bucket, key, region } => StorageLocation::S3 {
                bucket: bucket.clone(),
                key: join_key(key, name),
                region: region.clone(),
            },
            StorageLocation::Gcs { bucket, object } => StorageLocation::Gcs {
                bucket: bucket.clone(),
                object: join_key(object, name),
            },
        }
    }
}

fn join_key(prefix: &str, name: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", prefix, name)
    }
}

impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageLocation::Local { path } => write!(f, "file://{}", path.display()),
            StorageLocation::S3 { bucket, key, .. } => write!(f, "s3://{}/{}", bucket, key),
            StorageLocation::Gcs { bucket, object } => write!(f, "gs://{}/{}", bucket, object),
        }
    }
}
