use std::{
    fs::{self, OpenOptions},
    io::{ErrorKind, Read},
    path::{Path, PathBuf},
};

use backup_core::{BackupName, Series};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use super::{BackupStore, CleanupMode, StoreError, copy_chunked};

/// The local store's config.
#[derive(Default, Debug, Clone, Deserialize, Serialize)]
pub struct LocalConfig {
    /// The directory holding the backups.
    pub directory: PathBuf,

    /// What cleanup does in this directory.
    #[serde(default)]
    pub cleanup: CleanupMode,
}

/// Backups stored as files in a directory.
#[derive(Debug, Clone)]
pub struct LocalStore {
    directory: PathBuf,
}

impl LocalStore {
    /// A store for `directory`. The directory is created on the first write.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    /// The directory holding the backups.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Where `name` is written before it is complete. Never decodes as a backup name.
    fn partial_path(&self, name: &BackupName) -> PathBuf {
        self.directory.join(format!(".{name}.partial"))
    }
}

impl BackupStore for LocalStore {
    fn location(&self) -> String {
        self.directory.display().to_string()
    }

    fn list(&self, series: &Series) -> Result<Vec<BackupName>, StoreError> {
        let directory = match fs::read_dir(&self.directory) {
            Ok(directory) => directory,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                warn!("Backup directory not found: {:?}", self.directory);
                return Ok(Vec::new());
            }
            Err(error) => return Err(StoreError::Io(error, "read backup directory")),
        };

        let mut names = Vec::new();
        for entry in directory {
            let entry = entry.map_err(|e| StoreError::Io(e, "read directory entry"))?;

            let file_type = entry
                .file_type()
                .map_err(|e| StoreError::Io(e, "get entry file type"))?;
            if !file_type.is_file() {
                continue;
            }

            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };

            match file_name.parse::<BackupName>() {
                Ok(name) if name.belongs_to(series) => names.push(name),
                Ok(_) => {}
                Err(mismatch) => trace!("Skipping {file_name:?}: {mismatch}"),
            }
        }

        Ok(names)
    }

    fn put(&self, name: &BackupName, reader: &mut dyn Read) -> Result<usize, StoreError> {
        fs::create_dir_all(&self.directory)
            .map_err(|e| StoreError::Io(e, "create backup directory"))?;

        let path = self.directory.join(name.encode());
        if fs::symlink_metadata(&path).is_ok() {
            return Err(StoreError::AlreadyExists(name.encode()));
        }

        let partial_path = self.partial_path(name);
        let result = write_then_rename(reader, &partial_path, &path);

        if result.is_err() {
            if let Err(error) = fs::remove_file(&partial_path) {
                if error.kind() != ErrorKind::NotFound {
                    warn!("Could not remove partial backup {partial_path:?}: {error}");
                }
            }
        }

        if let Ok(bytes_written) = &result {
            debug!("Wrote {bytes_written} bytes to {path:?}");
        }

        result
    }

    fn delete(&self, name: &BackupName) -> Result<(), StoreError> {
        match fs::remove_file(self.directory.join(name.encode())) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
            Err(error) => Err(StoreError::Io(error, "remove backup file")),
        }
    }
}

/// Write the whole stream to `partial_path`, then move it to `path`.
fn write_then_rename(
    reader: &mut dyn Read,
    partial_path: &Path,
    path: &Path,
) -> Result<usize, StoreError> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(partial_path)
        .map_err(|e| StoreError::Io(e, "create backup file"))?;

    let bytes_written = copy_chunked(reader, &mut file)?;
    file.sync_all()
        .map_err(|e| StoreError::Io(e, "sync backup file"))?;
    drop(file);

    fs::rename(partial_path, path).map_err(|e| StoreError::Io(e, "rename backup file"))?;

    Ok(bytes_written)
}
