// Storage Backend Abstraction
//
// Byte-level contract shared by the local filesystem and object stores.
// The log and the file writer only ever talk to a `StorageBackend`, so the
// engine behaves identically whichever backend a table was opened with.

pub mod local;
pub mod object;
pub mod options;

use std::sync::Arc;

pub use local::LocalBackend;
pub use object::ObjectStoreBackend;
pub use options::StorageOptions;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error at `{path}`: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("not found: {0}")]
    NotFound(String),

    /// Conditional create lost against an existing object.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("object store error: {0}")]
    ObjectStore(#[source] object_store::Error),

    #[error("invalid path `{0}`")]
    InvalidPath(String),

    #[error("storage configuration error: {0}")]
    Config(String),
}

impl StorageError {
    pub(crate) fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        match source.kind() {
            std::io::ErrorKind::NotFound => StorageError::NotFound(path.into()),
            std::io::ErrorKind::AlreadyExists => StorageError::AlreadyExists(path.into()),
            _ => StorageError::Io {
                path: path.into(),
                source,
            },
        }
    }
}

/// Byte storage for one table root.
///
/// Paths are relative to the table root and `/` separated.
///
/// Properties required from implementations:
/// - `atomic_rename` is atomic and never replaces an existing target
/// - `list` is recursive and returns paths sorted
/// - a missing prefix lists as empty
pub trait StorageBackend: Send + Sync {
    /// Human readable location, used in logs.
    fn describe(&self) -> String;

    fn read(&self, path: &str) -> Result<Vec<u8>, StorageError>;

    /// Write `data` to `path`.
    ///
    /// With `overwrite == false` an existing object yields `AlreadyExists`.
    fn write(&self, path: &str, data: &[u8], overwrite: bool) -> Result<(), StorageError>;

    fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Delete `path`. Deleting a missing path succeeds.
    fn delete(&self, path: &str) -> Result<(), StorageError>;

    /// Publish `tmp_path` under `final_path`.
    ///
    /// Fails with `AlreadyExists` (leaving `tmp_path` in place) if
    /// `final_path` exists. On success `tmp_path` no longer exists.
    fn atomic_rename(&self, tmp_path: &str, final_path: &str) -> Result<(), StorageError>;
}

/// Reject paths that could escape the table root.
pub(crate) fn validate_path(path: &str) -> Result<(), StorageError> {
    let escapes = path
        .split('/')
        .any(|segment| segment == ".." || segment == ".");

    if path.is_empty() || path.starts_with('/') || path.contains('\\') || escapes {
        return Err(StorageError::InvalidPath(path.to_string()));
    }
    Ok(())
}

/// Resolve the backend for a table once, at open time.
///
/// Credentials select the object store: the table path is either an
/// `s3://bucket/prefix` URI or a prefix inside the configured bucket.
/// Without credentials the table path is a local directory.
pub fn open_backend(
    table_path: &str,
    options: &StorageOptions,
) -> Result<Arc<dyn StorageBackend>, StorageError> {
    if options.has_credentials() {
        let (bucket, prefix) = if table_path.starts_with("s3://") {
            object::parse_s3_uri(table_path)?
        } else {
            let bucket = options.bucket.clone().ok_or_else(|| {
                StorageError::Config(format!(
                    "table path `{table_path}` is not an s3:// URI and no bucket is configured"
                ))
            })?;
            (bucket, table_path.trim_matches('/').to_string())
        };

        let backend = ObjectStoreBackend::s3(&bucket, &prefix, options)?;
        return Ok(Arc::new(backend));
    }

    if table_path.contains("://") && !table_path.starts_with("file://") {
        return Err(StorageError::Config(format!(
            "table path `{table_path}` needs object store credentials"
        )));
    }

    let local = table_path.trim_start_matches("file://");
    Ok(Arc::new(LocalBackend::new(local)))
}
