use std::{
    fs::{self, File},
    io::Read,
    path::PathBuf,
};

use serde::{Deserialize, Serialize};
use tracing::info;

use super::{DumpError, DumpSource};

/// Copy a database file as it is at the moment of the dump.
///
/// The copy is not coordinated with writers of the file. If the file is
/// modified while it is being read the backup can contain a torn write, so the
/// database should be idle or able to recover from a crash-consistent copy.
#[derive(Default, Debug, Clone, Deserialize, Serialize)]
pub struct FileSnapshot {
    /// The file to copy.
    #[serde(alias = "NAME")]
    pub path: PathBuf,
}

impl DumpSource for FileSnapshot {
    fn produce(&self) -> Result<Box<dyn Read>, DumpError> {
        info!("Copying {:?}", self.path);

        let metadata = fs::metadata(&self.path)
            .map_err(|e| DumpError::SourceUnavailable(self.path.clone(), e))?;
        if !metadata.is_file() {
            return Err(DumpError::NotAFile(self.path.clone()));
        }

        let file =
            File::open(&self.path).map_err(|e| DumpError::SourceUnavailable(self.path.clone(), e))?;

        Ok(Box::new(file))
    }

    fn default_prefix(&self) -> String {
        "sqlite_backup".into()
    }

    fn default_extension(&self) -> String {
        self.path
            .extension()
            .and_then(|extension| extension.to_str())
            .unwrap_or("sqlite")
            .to_string()
    }
}
