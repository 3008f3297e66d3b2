// Object Store Backend
//
// Adapts an `object_store::ObjectStore` to the synchronous backend
// contract. Object stores have no atomic rename, so publishing a temporary
// object is a conditional create-if-absent put of its bytes.

use std::sync::Arc;

use futures::TryStreamExt;
use object_store::aws::{AmazonS3Builder, S3ConditionalPut};
use object_store::path::Path;
use object_store::{ObjectStore, PutMode, PutOptions, PutPayload};
use tokio::runtime::{Builder, Handle, Runtime};
use tracing::debug;
use url::Url;

use super::{validate_path, StorageBackend, StorageError, StorageOptions};

/// Split `s3://bucket/prefix` into bucket and prefix.
pub fn parse_s3_uri(uri: &str) -> Result<(String, String), StorageError> {
    let url = Url::parse(uri).map_err(|e| StorageError::Config(format!("invalid URI `{uri}`: {e}")))?;

    if url.scheme() != "s3" {
        return Err(StorageError::Config(format!(
            "unsupported scheme `{}` in `{uri}`",
            url.scheme()
        )));
    }

    let bucket = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| StorageError::Config(format!("`{uri}` has no bucket")))?
        .to_string();

    let prefix = url.path().trim_matches('/').to_string();
    Ok((bucket, prefix))
}

pub struct ObjectStoreBackend {
    store: Arc<dyn ObjectStore>,
    prefix: String,
    runtime: Runtime,
    description: String,
}

impl ObjectStoreBackend {
    /// Wrap `store`, rooting every path under `prefix`.
    ///
    /// Calls block on an internal runtime, so construction is refused from
    /// inside another Tokio runtime: blocking there, or dropping the owned
    /// runtime there, panics.
    pub fn new(store: Arc<dyn ObjectStore>, prefix: &str) -> Result<Self, StorageError> {
        if Handle::try_current().is_ok() {
            return Err(StorageError::Config(
                "object store backend cannot be created inside an async runtime".to_string(),
            ));
        }

        let runtime = Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("strata-object-io")
            .enable_all()
            .build()
            .map_err(|e| StorageError::io("<runtime>", e))?;

        let prefix = prefix.trim_matches('/').to_string();
        let description = format!("{store}/{prefix}");

        Ok(Self {
            store,
            prefix,
            runtime,
            description,
        })
    }

    /// S3 (or S3 compatible) store built from explicit options.
    pub fn s3(bucket: &str, prefix: &str, options: &StorageOptions) -> Result<Self, StorageError> {
        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(bucket)
            .with_region(options.region_or_default())
            .with_allow_http(options.allow_http)
            .with_virtual_hosted_style_request(options.virtual_hosted_style)
            .with_conditional_put(S3ConditionalPut::ETagMatch);

        if let Some(key) = &options.access_key_id {
            builder = builder.with_access_key_id(key);
        }
        if let Some(secret) = &options.secret_access_key {
            builder = builder.with_secret_access_key(secret);
        }
        if let Some(endpoint) = &options.endpoint {
            builder = builder.with_endpoint(endpoint);
        }

        let store = builder.build().map_err(StorageError::ObjectStore)?;
        let backend = Self::new(Arc::new(store), prefix)?;
        debug!(bucket, prefix, "opened s3 backend");
        Ok(backend)
    }

    fn location(&self, path: &str) -> Result<Path, StorageError> {
        validate_path(path)?;
        if self.prefix.is_empty() {
            Ok(Path::from(path))
        } else {
            Ok(Path::from(format!("{}/{path}", self.prefix)))
        }
    }

    fn relative(&self, location: &Path) -> String {
        let full = location.as_ref();
        if self.prefix.is_empty() {
            return full.to_string();
        }
        full.strip_prefix(self.prefix.as_str())
            .map(|rest| rest.trim_start_matches('/'))
            .unwrap_or(full)
            .to_string()
    }

    fn put(&self, location: &Path, data: Vec<u8>, mode: PutMode) -> Result<(), object_store::Error> {
        let payload = PutPayload::from(data);
        self.runtime.block_on(async {
            self.store
                .put_opts(location, payload, PutOptions::from(mode))
                .await
        })?;
        Ok(())
    }

    fn get(&self, location: &Path) -> Result<Vec<u8>, object_store::Error> {
        let bytes = self
            .runtime
            .block_on(async { self.store.get(location).await?.bytes().await })?;
        Ok(bytes.to_vec())
    }
}

fn map_error(path: &str, err: object_store::Error) -> StorageError {
    match err {
        object_store::Error::NotFound { .. } => StorageError::NotFound(path.to_string()),
        object_store::Error::AlreadyExists { .. } => StorageError::AlreadyExists(path.to_string()),
        other => StorageError::ObjectStore(other),
    }
}

impl StorageBackend for ObjectStoreBackend {
    fn describe(&self) -> String {
        self.description.clone()
    }

    fn read(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let location = self.location(path)?;
        self.get(&location).map_err(|e| map_error(path, e))
    }

    fn write(&self, path: &str, data: &[u8], overwrite: bool) -> Result<(), StorageError> {
        let location = self.location(path)?;
        let mode = if overwrite {
            PutMode::Overwrite
        } else {
            PutMode::Create
        };

        self.put(&location, data.to_vec(), mode)
            .map_err(|e| map_error(path, e))?;
        debug!(path, bytes = data.len(), overwrite, "object write");
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let root = if prefix.is_empty() {
            if self.prefix.is_empty() {
                None
            } else {
                Some(Path::from(self.prefix.as_str()))
            }
        } else {
            Some(self.location(prefix.trim_end_matches('/'))?)
        };

        let metas = self
            .runtime
            .block_on(async {
                self.store
                    .list(root.as_ref())
                    .try_collect::<Vec<_>>()
                    .await
            })
            .map_err(|e| map_error(prefix, e))?;

        let mut paths: Vec<String> = metas.iter().map(|m| self.relative(&m.location)).collect();
        paths.sort();
        Ok(paths)
    }

    fn delete(&self, path: &str) -> Result<(), StorageError> {
        let location = self.location(path)?;
        match self
            .runtime
            .block_on(async { self.store.delete(&location).await })
        {
            Ok(()) => Ok(()),
            Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(map_error(path, e)),
        }
    }

    fn atomic_rename(&self, tmp_path: &str, final_path: &str) -> Result<(), StorageError> {
        let tmp = self.location(tmp_path)?;
        let target = self.location(final_path)?;

        let data = self.get(&tmp).map_err(|e| map_error(tmp_path, e))?;
        self.put(&target, data, PutMode::Create)
            .map_err(|e| map_error(final_path, e))?;

        if let Err(e) = self
            .runtime
            .block_on(async { self.store.delete(&tmp).await })
        {
            debug!(tmp_path, error = %e, "failed to delete temporary object");
        }

        debug!(tmp_path, final_path, "object conditional create");
        Ok(())
    }
}
