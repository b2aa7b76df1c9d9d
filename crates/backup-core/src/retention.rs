//! Tiered retention.
//!
//! Each backup is compared only against the nearest younger backup that was
//! kept. Gaps between survivors therefore grow with age, tier by tier, and a
//! second pass over the survivors deletes nothing.
//!

use core::time::Duration;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_with::{DurationSeconds, serde_as};
use thiserror::Error;

use crate::BackupName;

/// Backups closer than `min_spacing * SPACING_TOLERANCE` to the last kept
/// backup are deleted. Invocations are scheduled externally and drift, so a
/// backup slightly under the nominal spacing still counts.
pub const SPACING_TOLERANCE: f64 = 0.8;

const HOUR: u64 = 60 * 60;
const DAY: u64 = HOUR * 24;

/// One entry of a retention policy.
#[serde_as]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionTier {
    /// Backups younger than this use this tier. `None` applies to every age.
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    pub valid_for: Option<Duration>,

    /// The desired gap between kept backups in this tier.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub min_spacing: Duration,
}

impl RetentionTier {
    /// A tier for backups younger than `valid_for`.
    pub const fn bounded(valid_for: Duration, min_spacing: Duration) -> Self {
        Self {
            valid_for: Some(valid_for),
            min_spacing,
        }
    }

    /// A tier for backups of any age.
    pub const fn unbounded(min_spacing: Duration) -> Self {
        Self {
            valid_for: None,
            min_spacing,
        }
    }

    /// If this tier covers a backup of `age`.
    pub fn applies_to(&self, age: Duration) -> bool {
        self.valid_for.is_none_or(|valid_for| valid_for > age)
    }

    /// The smallest gap to the last kept backup that keeps a candidate.
    pub fn threshold(&self) -> Duration {
        self.min_spacing.mul_f64(SPACING_TOLERANCE)
    }
}

/// A backup paired with its age for one cleanup pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackupRecord {
    /// The backup.
    pub name: BackupName,

    /// How long ago the backup was taken.
    pub age: Duration,
}

impl BackupRecord {
    /// Create a record aged relative to `now`.
    pub fn new(name: BackupName, now: NaiveDateTime) -> Self {
        let age = name.age(now);
        Self { name, age }
    }
}

/// The outcome of [`RetentionPolicy::decide`]. Both lists are youngest first.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Decision {
    /// Backups to keep.
    pub keep: Vec<BackupRecord>,

    /// Backups to delete.
    pub delete: Vec<BackupRecord>,
}

/// An ordered, validated list of retention tiers.
///
/// The first tier that applies to a backup's age decides its spacing. When no
/// tier applies the last tier is used.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<RetentionTier>", into = "Vec<RetentionTier>")]
pub struct RetentionPolicy {
    tiers: Vec<RetentionTier>,
}

impl RetentionPolicy {
    /// Validate a list of tiers.
    ///
    /// The list must not be empty, bounded tiers must be strictly ascending and
    /// only the last tier may be unbounded.
    pub fn new(tiers: Vec<RetentionTier>) -> Result<Self, PolicyError> {
        if tiers.is_empty() {
            return Err(PolicyError::Empty);
        }

        let last_index = tiers.len() - 1;
        let mut previous: Option<Duration> = None;

        for (index, tier) in tiers.iter().enumerate() {
            match tier.valid_for {
                None if index != last_index => return Err(PolicyError::UnboundedNotLast(index)),
                None => {}
                Some(valid_for) => {
                    if previous.is_some_and(|previous| previous >= valid_for) {
                        return Err(PolicyError::NotAscending(index));
                    }
                    previous = Some(valid_for);
                }
            }
        }

        Ok(Self { tiers })
    }

    /// The tiers in evaluation order.
    pub fn tiers(&self) -> &[RetentionTier] {
        &self.tiers
    }

    /// The tier deciding the spacing of a backup of `age`.
    pub fn tier_for(&self, age: Duration) -> Option<&RetentionTier> {
        self.tiers
            .iter()
            .find(|tier| tier.applies_to(age))
            .or_else(|| self.tiers.last())
    }

    /// Split `records` into the backups to keep and the backups to delete.
    ///
    /// The youngest record is always kept. Every other record is kept only if
    /// it is further than its tier's threshold from the last kept record.
    /// Records of equal age are visited in an unspecified order.
    pub fn decide(&self, mut records: Vec<BackupRecord>) -> Decision {
        records.sort_by_key(|record| record.age);

        let mut decision = Decision::default();
        let mut last_kept: Option<Duration> = None;

        for record in records {
            let keep = match last_kept {
                None => true,
                Some(last_kept) => self
                    .tier_for(record.age)
                    .is_none_or(|tier| record.age.saturating_sub(last_kept) > tier.threshold()),
            };

            if keep {
                last_kept = Some(record.age);
                decision.keep.push(record);
            } else {
                decision.delete.push(record);
            }
        }

        decision
    }
}

impl Default for RetentionPolicy {
    /// Hourly for two days, daily for a week, every three days for a month,
    /// weekly for three months, then monthly forever.
    fn default() -> Self {
        Self {
            tiers: vec![
                RetentionTier::bounded(Duration::from_secs(2 * DAY), Duration::from_secs(HOUR)),
                RetentionTier::bounded(Duration::from_secs(7 * DAY), Duration::from_secs(DAY)),
                RetentionTier::bounded(Duration::from_secs(30 * DAY), Duration::from_secs(3 * DAY)),
                RetentionTier::bounded(Duration::from_secs(90 * DAY), Duration::from_secs(7 * DAY)),
                RetentionTier::unbounded(Duration::from_secs(30 * DAY)),
            ],
        }
    }
}

impl TryFrom<Vec<RetentionTier>> for RetentionPolicy {
    type Error = PolicyError;

    fn try_from(tiers: Vec<RetentionTier>) -> Result<Self, Self::Error> {
        Self::new(tiers)
    }
}

impl From<RetentionPolicy> for Vec<RetentionTier> {
    fn from(policy: RetentionPolicy) -> Self {
        policy.tiers
    }
}

#[allow(missing_docs)]
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PolicyError {
    #[error("Retention policy has no tiers")]
    Empty,

    #[error("Tier {0} is unbounded but is not the last tier")]
    UnboundedNotLast(usize),

    #[error("Tier {0} is not valid for longer than the tier before it")]
    NotAscending(usize),
}
