#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;
use strata_kernel::storage::{LocalBackend, StorageBackend, StorageError};
use strata_kernel::{DataType, Field, RowBatch, Schema, Table, TableConfig, Value};

pub fn schema() -> Schema {
    Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("user", DataType::Utf8, true),
        Field::new("value", DataType::Float64, true),
    ])
    .unwrap()
}

/// Rows with ids `ids`, user `even_user` / `odd_user` by parity.
pub fn batch(ids: impl IntoIterator<Item = i64>) -> RowBatch {
    let rows = ids
        .into_iter()
        .map(|i| {
            let user = if i % 2 == 0 { "even_user" } else { "odd_user" };
            vec![
                Value::Int64(i),
                Value::Utf8(user.into()),
                Value::Float64(i as f64 * 1.5),
            ]
        })
        .collect();
    RowBatch::try_new(schema(), rows).unwrap()
}

/// Rows for a single user.
pub fn user_batch(user: &str, ids: impl IntoIterator<Item = i64>) -> RowBatch {
    let rows = ids
        .into_iter()
        .map(|i| vec![Value::Int64(i), Value::Utf8(user.into()), Value::Null])
        .collect();
    RowBatch::try_new(schema(), rows).unwrap()
}

pub fn by_user() -> Vec<String> {
    vec!["user".to_string()]
}

pub fn local_table(dir: &tempfile::TempDir, config: TableConfig) -> Table {
    let backend: Arc<dyn StorageBackend> = Arc::new(LocalBackend::new(dir.path()));
    Table::with_backend(backend, config).unwrap()
}

type Hook = Box<dyn FnOnce() + Send>;

/// Backend that runs a hook right before the first log commit it
/// publishes, letting a competing writer win that version.
pub struct RaceOnce {
    inner: Arc<dyn StorageBackend>,
    hook: Mutex<Option<Hook>>,
}

impl RaceOnce {
    pub fn new(inner: Arc<dyn StorageBackend>) -> Self {
        Self {
            inner,
            hook: Mutex::new(None),
        }
    }

    pub fn arm(&self, hook: impl FnOnce() + Send + 'static) {
        *self.hook.lock() = Some(Box::new(hook));
    }

    pub fn fired(&self) -> bool {
        self.hook.lock().is_none()
    }
}

impl StorageBackend for RaceOnce {
    fn describe(&self) -> String {
        format!("race-once:{}", self.inner.describe())
    }

    fn read(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        self.inner.read(path)
    }

    fn write(&self, path: &str, data: &[u8], overwrite: bool) -> Result<(), StorageError> {
        self.inner.write(path, data, overwrite)
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        self.inner.list(prefix)
    }

    fn delete(&self, path: &str) -> Result<(), StorageError> {
        self.inner.delete(path)
    }

    fn atomic_rename(&self, tmp_path: &str, final_path: &str) -> Result<(), StorageError> {
        let is_commit = final_path.starts_with("_log/") && !final_path.ends_with(".checkpoint.json");
        if is_commit {
            let hook = self.hook.lock().take();
            if let Some(hook) = hook {
                hook();
            }
        }
        self.inner.atomic_rename(tmp_path, final_path)
    }
}
