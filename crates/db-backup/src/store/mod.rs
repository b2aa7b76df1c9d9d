//! Stores that hold backups.
//!
//! A store owns its entries; callers only ever hand it names to write or
//! delete. Backup metadata lives entirely in the encoded [`BackupName`].
//!

use core::fmt;
use std::io::{self, ErrorKind, Read, Write};

use backup_core::{BackupName, Series};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::trace;

mod local;
mod s3;

pub use local::{LocalConfig, LocalStore};
pub use s3::{RemoteConfig, S3Store};

/// Dumps are read and forwarded in chunks of this size.
pub const CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// A medium that backups are written to.
pub trait BackupStore {
    /// Human readable location, for logs.
    fn location(&self) -> String;

    /// Every backup of `series` in the store. Entries whose names do not
    /// decode are skipped.
    fn list(&self, series: &Series) -> Result<Vec<BackupName>, StoreError>;

    /// Write `reader` to the store under `name`, returning the bytes written.
    ///
    /// Either the whole stream is stored or nothing becomes listable.
    fn put(&self, name: &BackupName, reader: &mut dyn Read) -> Result<usize, StoreError>;

    /// Remove `name`. Removing an absent backup is not an error.
    fn delete(&self, name: &BackupName) -> Result<(), StoreError>;
}

/// Which of the configured stores.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKind {
    Remote,
    Local,
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote => f.write_str("remote"),
            Self::Local => f.write_str("local"),
        }
    }
}

/// What a cleanup pass does with a store's backups.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CleanupMode {
    /// Thin backups out with the retention policy.
    #[default]
    Retain,

    /// Delete every backup of the series. For directories that only stage
    /// dumps on their way to the remote store.
    Purge,
}

/// Copy `reader` into `writer` in [`CHUNK_SIZE`] chunks.
pub fn copy_chunked(reader: &mut dyn Read, writer: &mut dyn Write) -> Result<usize, StoreError> {
    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut total_bytes = 0usize;

    loop {
        let bytes_read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(bytes_read) => bytes_read,
            Err(error) if error.kind() == ErrorKind::Interrupted => continue,
            Err(error) => return Err(StoreError::ReadDump(error)),
        };

        let chunk = buffer.get(..bytes_read).unwrap_or_default();
        writer
            .write_all(chunk)
            .map_err(|e| StoreError::Io(e, "write chunk"))?;

        total_bytes = total_bytes.saturating_add(bytes_read);
        trace!("Written {total_bytes} bytes");
    }

    writer.flush().map_err(|e| StoreError::Io(e, "flush"))?;

    Ok(total_bytes)
}

#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to {1}: {0}")]
    Io(#[source] io::Error, &'static str),

    #[error("Failed to {1}: {0}")]
    Remote(String, &'static str),

    #[error("Failed to read the dump: {0}")]
    ReadDump(#[source] io::Error),

    #[error("Backup '{0}' already exists")]
    AlreadyExists(String),

    #[error("Dump exceeds the largest upload of {0} bytes")]
    TooLarge(usize),

    #[error("Failed to start the object store client: {0}")]
    Runtime(#[source] io::Error),
}
