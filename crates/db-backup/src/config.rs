//! db-backup config
//!
//! Loading is staged so that a missing file, an unparseable document and an
//! unknown engine can be told apart before the typed deserialization runs.
//!

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use backup_core::{NamePartError, RetentionPolicy, Series};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{
    source::{DumpSource, Relational, Source},
    store::{LocalConfig, RemoteConfig},
};

/// The tool's config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// The database to dump.
    pub database: Source,

    /// Overrides for the backup file names.
    #[serde(default)]
    pub series: SeriesOverrides,

    /// The object store.
    #[serde(default, alias = "aws")]
    pub remote: Option<RemoteConfig>,

    /// The local backup directory.
    #[serde(default)]
    pub local: Option<LocalConfig>,

    /// How backups are thinned out as they age.
    #[serde(default)]
    pub retention: RetentionPolicy,

    /// What a run does.
    #[serde(default)]
    pub actions: Actions,
}

/// Overrides for the prefix and extension derived from the database.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeriesOverrides {
    /// The file name prefix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,

    /// The file extension, without the dot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
}

/// The steps a run performs.
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Actions {
    /// Dump the database into every configured store.
    pub create_dump: bool,

    /// Apply retention to the remote store.
    pub clean_remote: bool,

    /// Clean up the local directory.
    pub clean_local: bool,

    /// Report deletions instead of performing them.
    pub simulate: bool,

    /// Log at debug level.
    pub verbose: bool,
}

impl Actions {
    /// Enable every action enabled in either.
    pub fn merge(self, other: Self) -> Self {
        Self {
            create_dump: self.create_dump || other.create_dump,
            clean_remote: self.clean_remote || other.clean_remote,
            clean_local: self.clean_local || other.clean_local,
            simulate: self.simulate || other.simulate,
            verbose: self.verbose || other.verbose,
        }
    }
}

impl Config {
    /// Tries to load a config from a JSON file, or TOML if the extension is `.toml`.
    pub fn load(file_path: &Path) -> Result<Self, LoadConfigError> {
        if !file_path.exists() {
            return Err(LoadConfigError::NoFile(file_path.to_path_buf()));
        }

        let contents = fs::read_to_string(file_path).map_err(LoadConfigError::Read)?;

        let is_toml = file_path
            .extension()
            .is_some_and(|extension| extension.eq_ignore_ascii_case("toml"));

        if is_toml {
            Self::from_toml_str(&contents)
        } else {
            Self::from_json_str(&contents)
        }
    }

    /// Parse a JSON document.
    pub fn from_json_str(contents: &str) -> Result<Self, LoadConfigError> {
        let document: Value = serde_json::from_str(contents)?;
        Self::from_document(document)
    }

    /// Parse a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self, LoadConfigError> {
        let document: toml::Value = toml::from_str(contents)?;
        let document = serde_json::to_value(document).map_err(LoadConfigError::Invalid)?;
        Self::from_document(document)
    }

    fn from_document(mut document: Value) -> Result<Self, LoadConfigError> {
        check_engine(&mut document)?;
        serde_json::from_value(document).map_err(LoadConfigError::Invalid)
    }

    /// The series backups are written to and cleaned up in.
    pub fn series(&self) -> Result<Series, ConfigError> {
        let prefix = self
            .series
            .prefix
            .clone()
            .unwrap_or_else(|| self.database.default_prefix());
        let extension = self
            .series
            .extension
            .clone()
            .unwrap_or_else(|| self.database.default_extension());

        Series::new(&prefix, &extension).map_err(ConfigError::Series)
    }

    /// Check that the config can carry out its actions.
    pub fn validate(&self) -> Result<Series, ConfigError> {
        let series = self.series()?;

        if self.actions.create_dump && self.remote.is_none() && self.local.is_none() {
            return Err(ConfigError::NoStore);
        }
        if self.actions.clean_remote && self.remote.is_none() {
            return Err(ConfigError::MissingStore("remote", "clean_remote"));
        }
        if self.actions.clean_local && self.local.is_none() {
            return Err(ConfigError::MissingStore("local", "clean_local"));
        }

        Ok(series)
    }
}

/// Ensure the document names a known engine under `database.engine`.
///
/// Older configs spell the key `ENGINE`; it is renamed in place.
fn check_engine(document: &mut Value) -> Result<(), LoadConfigError> {
    let database = document
        .get_mut("database")
        .and_then(Value::as_object_mut)
        .ok_or(LoadConfigError::NoEngine)?;

    if !database.contains_key("engine") {
        if let Some(engine) = database.remove("ENGINE") {
            database.insert("engine".into(), engine);
        }
    }

    let engine = database
        .get("engine")
        .and_then(Value::as_str)
        .ok_or(LoadConfigError::NoEngine)?;

    if !Source::ENGINES.contains(&engine) {
        return Err(LoadConfigError::UnknownEngine(engine.to_string()));
    }

    Ok(())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: Source::Relational(Relational::default()),
            series: SeriesOverrides::default(),
            remote: Some(RemoteConfig::default()),
            local: Some(LocalConfig::default()),
            retention: RetentionPolicy::default(),
            actions: Actions::default(),
        }
    }
}

#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum LoadConfigError {
    #[error("The file {0:?} does not exist.")]
    NoFile(PathBuf),

    #[error("Failed to read the file:\n{0}")]
    Read(#[source] io::Error),

    #[error("Failed to parse the file:\n{0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Failed to parse the file:\n{0}")]
    ParseToml(#[from] toml::de::Error),

    #[error("The config does not select a database engine.")]
    NoEngine,

    #[error("Unknown database engine '{0}', expected 'relational' or 'file-snapshot'")]
    UnknownEngine(String),

    #[error("The config is invalid:\n{0}")]
    Invalid(#[source] serde_json::Error),
}

impl LoadConfigError {
    /// The process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::NoFile(_) | Self::Read(_) => 1,
            Self::ParseJson(_) | Self::ParseToml(_) => 2,
            Self::NoEngine | Self::UnknownEngine(_) => 3,
            Self::Invalid(_) => 4,
        }
    }
}

#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid backup name part: {0}")]
    Series(#[source] NamePartError),

    #[error("Creating a dump needs a remote or local store")]
    NoStore,

    #[error("'{1}' needs a '{0}' store")]
    MissingStore(&'static str, &'static str),
}

impl ConfigError {
    /// The process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        4
    }
}
