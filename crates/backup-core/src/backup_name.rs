use core::{fmt, str::FromStr, time::Duration};

use chrono::{NaiveDate, NaiveDateTime, SubsecRound};
use thiserror::Error;

use crate::{NamePart, Series};

/// Number of underscore separated fields after the prefix.
const TRAILING_FIELDS: usize = 7;

/// The identity of a single backup.
///
/// Encoded as `{prefix}_{YYYY}_{MM}_{DD}_{hh}_{mm}_{ss}_{disambiguator}.{extension}`.
/// This is the only persisted schema: a store holds nothing else about its
/// backups, so the format must stay stable for older backups to keep being
/// recognised by cleanup passes.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BackupName {
    prefix: NamePart,
    created_at: NaiveDateTime,
    disambiguator: NamePart,
    extension: NamePart,
}

impl BackupName {
    /// Create a name for a backup of `series` taken at `created_at`.
    ///
    /// `created_at` is naive local time and is truncated to whole seconds.
    pub fn new(series: &Series, created_at: NaiveDateTime, disambiguator: NamePart) -> Self {
        Self {
            prefix: series.prefix.clone(),
            created_at: created_at.trunc_subsecs(0),
            disambiguator,
            extension: series.extension.clone(),
        }
    }

    /// Try to decode a file or object name. Names that do not follow the
    /// grammar, or describe an impossible date, yield `None`.
    pub fn decode(name: &str) -> Option<Self> {
        name.parse().ok()
    }

    /// Encode the name. Date fields are zero padded so lexical and
    /// chronological order agree.
    pub fn encode(&self) -> String {
        format!(
            "{}_{}_{}.{}",
            self.prefix,
            self.created_at.format("%Y_%m_%d_%H_%M_%S"),
            self.disambiguator,
            self.extension
        )
    }

    /// The series prefix.
    pub fn prefix(&self) -> &NamePart {
        &self.prefix
    }

    /// When the backup was taken.
    pub fn created_at(&self) -> NaiveDateTime {
        self.created_at
    }

    /// The random collision avoiding suffix.
    pub fn disambiguator(&self) -> &NamePart {
        &self.disambiguator
    }

    /// The dump format.
    pub fn extension(&self) -> &NamePart {
        &self.extension
    }

    /// If this backup belongs to `series`.
    pub fn belongs_to(&self, series: &Series) -> bool {
        self.prefix == series.prefix && self.extension == series.extension
    }

    /// Age of the backup relative to `now`. Backups from the future are age zero.
    pub fn age(&self, now: NaiveDateTime) -> Duration {
        now.signed_duration_since(self.created_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

impl fmt::Display for BackupName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for BackupName {
    type Err = CodecMismatch;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let (stem, extension) = name.rsplit_once('.').ok_or(CodecMismatch::NoExtension)?;
        let extension = NamePart::token(extension).map_err(|_| CodecMismatch::Grammar)?;

        // Split from the right so prefixes may contain underscores.
        let mut fields = stem.rsplitn(TRAILING_FIELDS + 1, '_');

        let disambiguator = fields
            .next()
            .and_then(|field| NamePart::token(field).ok())
            .ok_or(CodecMismatch::Grammar)?;

        // Fields arrive seconds first.
        let mut numbers = [0u32; 6];
        for slot in numbers.iter_mut().rev() {
            let field = fields.next().ok_or(CodecMismatch::Grammar)?;
            *slot = parse_number(field)?;
        }

        let prefix = fields
            .next()
            .and_then(|field| NamePart::prefix(field).ok())
            .ok_or(CodecMismatch::Grammar)?;

        let [year, month, day, hour, minute, second] = numbers;
        let year = i32::try_from(year).map_err(|_| CodecMismatch::InvalidTimestamp)?;
        let created_at = NaiveDate::from_ymd_opt(year, month, day)
            .and_then(|date| date.and_hms_opt(hour, minute, second))
            .ok_or(CodecMismatch::InvalidTimestamp)?;

        Ok(Self {
            prefix,
            created_at,
            disambiguator,
            extension,
        })
    }
}

fn parse_number(field: &str) -> Result<u32, CodecMismatch> {
    if field.is_empty() || !field.bytes().all(|byte| byte.is_ascii_digit()) {
        return Err(CodecMismatch::Grammar);
    }

    // Too many digits still matches the grammar, it just cannot be a date.
    field
        .parse()
        .map_err(|_| CodecMismatch::InvalidTimestamp)
}

/// Why a name is not a backup name. Stores may hold unrelated entries, so this
/// is never escalated; callers skip the entry.
#[allow(missing_docs)]
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CodecMismatch {
    #[error("Name has no extension")]
    NoExtension,

    #[error("Name does not match the backup name grammar")]
    Grammar,

    #[error("Name matches the grammar but describes an invalid timestamp")]
    InvalidTimestamp,
}
