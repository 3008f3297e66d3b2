// Local Filesystem Backend
//
// Atomic create is a hard link of the fully written temporary file onto
// the final name: `link(2)` fails if the target exists, which `rename(2)`
// would silently replace.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use super::{validate_path, StorageBackend, StorageError};

#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn full_path(&self, path: &str) -> Result<PathBuf, StorageError> {
        validate_path(path)?;
        Ok(self.root.join(path))
    }

    fn ensure_parent(&self, full: &Path, path: &str) -> Result<(), StorageError> {
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).map_err(|e| StorageError::io(path, e))?;
        }
        Ok(())
    }
}

impl StorageBackend for LocalBackend {
    fn describe(&self) -> String {
        format!("file://{}", self.root.display())
    }

    fn read(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let full = self.full_path(path)?;
        fs::read(&full).map_err(|e| StorageError::io(path, e))
    }

    fn write(&self, path: &str, data: &[u8], overwrite: bool) -> Result<(), StorageError> {
        let full = self.full_path(path)?;
        self.ensure_parent(&full, path)?;

        let mut options = OpenOptions::new();
        options.write(true);
        if overwrite {
            options.create(true).truncate(true);
        } else {
            options.create_new(true);
        }

        let mut file = options.open(&full).map_err(|e| StorageError::io(path, e))?;
        file.write_all(data).map_err(|e| StorageError::io(path, e))?;
        file.sync_all().map_err(|e| StorageError::io(path, e))?;

        debug!(path, bytes = data.len(), overwrite, "local write");
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let base = if prefix.is_empty() {
            self.root.clone()
        } else {
            self.full_path(prefix.trim_end_matches('/'))?
        };

        if !base.exists() {
            return Ok(Vec::new());
        }

        let mut paths = Vec::new();
        for entry in WalkDir::new(&base) {
            let entry = match entry {
                Ok(entry) => entry,
                // Entries can vanish between readdir and stat (temp cleanup).
                Err(e) if e.io_error().map(|io| io.kind()) == Some(std::io::ErrorKind::NotFound) => {
                    continue
                }
                Err(e) => return Err(StorageError::io(prefix, e.into())),
            };

            if !entry.file_type().is_file() {
                continue;
            }

            let relative = entry
                .path()
                .strip_prefix(&self.root)
                .map_err(|_| StorageError::InvalidPath(entry.path().display().to_string()))?;

            let joined = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            paths.push(joined);
        }

        paths.sort();
        Ok(paths)
    }

    fn delete(&self, path: &str) -> Result<(), StorageError> {
        let full = self.full_path(path)?;
        match fs::remove_file(&full) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io(path, e)),
        }
    }

    fn atomic_rename(&self, tmp_path: &str, final_path: &str) -> Result<(), StorageError> {
        let tmp = self.full_path(tmp_path)?;
        let target = self.full_path(final_path)?;
        self.ensure_parent(&target, final_path)?;

        fs::hard_link(&tmp, &target).map_err(|e| match e.kind() {
            std::io::ErrorKind::AlreadyExists => StorageError::AlreadyExists(final_path.to_string()),
            _ => StorageError::io(tmp_path, e),
        })?;

        // The target is published; a stale temp name is only garbage.
        if let Err(e) = fs::remove_file(&tmp) {
            debug!(tmp_path, error = %e, "failed to unlink temporary file");
        }

        debug!(tmp_path, final_path, "local atomic rename");
        Ok(())
    }
}
