//! Dump sources that produce the content of a backup.
//!

use core::{fmt::Debug, time::Duration};
use std::{
    io::{self, Read},
    path::PathBuf,
    process::ExitStatus,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod file_snapshot;
mod process;
mod relational;

pub use file_snapshot::FileSnapshot;
pub use process::{DumpProcess, ProcessStream};
pub use relational::{Flavor, Relational};

/// A source to make a dump of.
pub trait DumpSource: Debug {
    /// Start producing a dump.
    ///
    /// The returned reader yields the dump content. Failures that only show
    /// once the content has been read, like the dump process exiting with an
    /// error, surface as an [`io::Error`] wrapping a [`DumpError`] from the
    /// reader. See [`DumpError::from_stream`].
    fn produce(&self) -> Result<Box<dyn Read>, DumpError>;

    /// The prefix used for this source's backups unless configured otherwise.
    fn default_prefix(&self) -> String;

    /// The extension used for this source's backups unless configured otherwise.
    fn default_extension(&self) -> String;
}

/// The configured source, selected by its `engine`.
#[allow(missing_docs)]
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "engine", rename_all = "kebab-case")]
pub enum Source {
    #[serde(alias = "mysql")]
    Relational(Relational),

    #[serde(alias = "sqlite")]
    FileSnapshot(FileSnapshot),
}

impl Source {
    /// Engine names accepted in the configuration.
    pub const ENGINES: [&'static str; 4] = ["relational", "file-snapshot", "mysql", "sqlite"];

    fn inner(&self) -> &dyn DumpSource {
        match self {
            Self::Relational(relational) => relational,
            Self::FileSnapshot(file_snapshot) => file_snapshot,
        }
    }
}

impl DumpSource for Source {
    fn produce(&self) -> Result<Box<dyn Read>, DumpError> {
        self.inner().produce()
    }

    fn default_prefix(&self) -> String {
        self.inner().default_prefix()
    }

    fn default_extension(&self) -> String {
        self.inner().default_extension()
    }
}

/// Producing a dump failed.
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum DumpError {
    #[error("Dump process failed: {0}")]
    Process(#[from] DumpProcessError),

    #[error("Source file {0:?} is unavailable: {1}")]
    SourceUnavailable(PathBuf, #[source] io::Error),

    #[error("Source {0:?} is not a file")]
    NotAFile(PathBuf),

    #[error("Failed to read the dump: {0}")]
    Read(#[source] io::Error),
}

impl DumpError {
    /// Recover the dump error from an error returned by a dump reader.
    pub fn from_stream(error: io::Error) -> Self {
        let is_dump_error = error
            .get_ref()
            .is_some_and(|inner| inner.is::<Self>());

        if !is_dump_error {
            return Self::Read(error);
        }

        match error.into_inner().map(|inner| inner.downcast::<Self>()) {
            Some(Ok(dump_error)) => *dump_error,
            Some(Err(inner)) => Self::Read(io::Error::other(inner)),
            None => Self::Read(io::Error::other("dump stream failed")),
        }
    }
}

/// The external dump process failed.
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum DumpProcessError {
    #[error("Failed to start '{0}': {1}")]
    Spawn(String, #[source] io::Error),

    #[error("'{program}' exited with {status}:\n{stderr}")]
    Exited {
        program: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("'{program}' was killed after running for {timeout:?}")]
    TimedOut { program: String, timeout: Duration },

    #[error("'{0}' was stopped before it finished")]
    Cancelled(String),

    #[error("Failed to watch '{0}': {1}")]
    Watch(String, #[source] io::Error),
}
