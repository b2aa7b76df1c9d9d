//! # backup-core
//! The naming and retention rules shared by every backup store.
//!
//! Backups carry no metadata besides their name: the series prefix, the
//! creation time, a random disambiguator and the dump format are all encoded in
//! the file or object name. [`BackupName`] is that codec and
//! [`RetentionPolicy::decide`] thins a series out as it ages.
//!

#![warn(missing_docs)]

mod backup_name;
mod logger;
mod name_part;
mod retention;
#[cfg(feature = "test")]
pub mod test;

pub use backup_name::{BackupName, CodecMismatch};
pub use logger::{LoggerError, init_logger};
pub use name_part::{NamePart, NamePartError, Series};
pub use retention::{
    BackupRecord, Decision, PolicyError, RetentionPolicy, RetentionTier, SPACING_TOLERANCE,
};
