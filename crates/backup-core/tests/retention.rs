#![allow(missing_docs)]

use core::time::Duration;

use backup_core::{
    BackupName, BackupRecord, NamePart, PolicyError, RetentionPolicy, RetentionTier, Series,
};
use chrono::{NaiveDate, NaiveDateTime};

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;

fn now() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 6, 1)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap()
}

/// A record `age_seconds` old; the disambiguator keeps records of equal age apart.
fn record(age_seconds: u64, index: usize) -> BackupRecord {
    let series = Series::new("mysqldump_shop", "sql").unwrap();
    let created_at = now() - chrono::Duration::seconds(i64::try_from(age_seconds).unwrap());
    let name = BackupName::new(
        &series,
        created_at,
        NamePart::token(&format!("r{index:04}")).unwrap(),
    );

    BackupRecord::new(name, now())
}

fn records(ages: &[u64]) -> Vec<BackupRecord> {
    ages.iter()
        .enumerate()
        .map(|(index, age)| record(*age, index))
        .collect()
}

fn ages(records: &[BackupRecord]) -> Vec<u64> {
    records.iter().map(|record| record.age.as_secs()).collect()
}

fn scenario_policy() -> RetentionPolicy {
    RetentionPolicy::new(vec![
        RetentionTier::bounded(Duration::from_secs(2 * DAY), Duration::from_secs(HOUR)),
        RetentionTier::bounded(Duration::from_secs(7 * DAY), Duration::from_secs(DAY)),
        RetentionTier::unbounded(Duration::from_secs(30 * DAY)),
    ])
    .unwrap()
}

#[test]
fn tiered_scenario() {
    let input = records(&[35 * DAY, 3 * DAY, 0, HOUR / 2, HOUR + HOUR / 2]);

    let decision = scenario_policy().decide(input);

    assert_eq!(ages(&decision.keep), vec![0, HOUR + HOUR / 2, 3 * DAY, 35 * DAY]);
    assert_eq!(ages(&decision.delete), vec![HOUR / 2]);
}

#[test]
fn empty_input() {
    let decision = scenario_policy().decide(Vec::new());

    assert!(decision.keep.is_empty());
    assert!(decision.delete.is_empty());
}

#[test]
fn youngest_is_always_kept() {
    // Every record is within the tolerance of the one before it.
    let input = records(&[5 * MINUTE, 10 * MINUTE, 15 * MINUTE, 20 * MINUTE]);

    let decision = scenario_policy().decide(input);

    assert_eq!(ages(&decision.keep), vec![5 * MINUTE]);
    assert_eq!(decision.delete.len(), 3);
}

#[test]
fn tolerance_keeps_slightly_early_backups() {
    // 50 minutes is under the hourly spacing but over 80% of it.
    let input = records(&[0, 50 * MINUTE, 95 * MINUTE]);

    let decision = scenario_policy().decide(input);

    assert_eq!(ages(&decision.keep), vec![0, 50 * MINUTE]);
    assert_eq!(ages(&decision.delete), vec![95 * MINUTE]);
}

#[test]
fn gap_equal_to_threshold_is_deleted() {
    // 48 minutes is exactly 80% of an hour.
    let input = records(&[0, 48 * MINUTE]);

    let decision = scenario_policy().decide(input);

    assert_eq!(ages(&decision.delete), vec![48 * MINUTE]);
}

#[test]
fn single_unbounded_tier() {
    let policy =
        RetentionPolicy::new(vec![RetentionTier::unbounded(Duration::from_secs(DAY))]).unwrap();
    let input = records(&[0, 12 * HOUR, 20 * HOUR, 40 * HOUR, 400 * DAY]);

    let decision = policy.decide(input);

    assert_eq!(ages(&decision.keep), vec![0, 20 * HOUR, 40 * HOUR, 400 * DAY]);
    assert_eq!(ages(&decision.delete), vec![12 * HOUR]);
}

#[test]
fn ages_past_every_tier_use_the_last_tier() {
    let policy = RetentionPolicy::new(vec![
        RetentionTier::bounded(Duration::from_secs(DAY), Duration::from_secs(HOUR)),
        RetentionTier::bounded(Duration::from_secs(7 * DAY), Duration::from_secs(DAY)),
    ])
    .unwrap();

    let tier = policy.tier_for(Duration::from_secs(30 * DAY)).unwrap();
    assert_eq!(tier.min_spacing, Duration::from_secs(DAY));

    let tier = policy.tier_for(Duration::from_secs(HOUR)).unwrap();
    assert_eq!(tier.min_spacing, Duration::from_secs(HOUR));
}

/// A year of hourly backups with some jitter in the invocation time.
fn hourly_history() -> Vec<BackupRecord> {
    let ages: Vec<u64> = (0..24 * 365)
        .map(|hour| hour * HOUR + (hour * 7919) % (10 * MINUTE))
        .collect();

    records(&ages)
}

#[test]
fn second_pass_deletes_nothing() {
    let policy = RetentionPolicy::default();

    let first = policy.decide(hourly_history());
    assert!(!first.delete.is_empty());

    let second = policy.decide(first.keep.clone());
    assert!(second.delete.is_empty());
    assert_eq!(second.keep, first.keep);
}

#[test]
fn kept_backups_respect_their_tier_spacing() {
    let policy = RetentionPolicy::default();

    let decision = policy.decide(hourly_history());

    for pair in decision.keep.windows(2) {
        let [younger, older] = pair else {
            unreachable!()
        };
        let tier = policy.tier_for(older.age).unwrap();
        assert!(
            older.age - younger.age > tier.threshold(),
            "{:?} -> {:?} closer than {:?}",
            younger.age,
            older.age,
            tier.threshold()
        );
    }

    // Dense recent history, sparse long term history.
    let recent = decision
        .keep
        .iter()
        .filter(|record| record.age < Duration::from_secs(2 * DAY))
        .count();
    let old = decision
        .keep
        .iter()
        .filter(|record| record.age > Duration::from_secs(90 * DAY))
        .count();
    assert!(recent >= 40, "{recent}");
    assert!(old <= 12, "{old}");
}

#[test]
fn default_policy_matches_documented_table() {
    let tiers = RetentionPolicy::default().tiers().to_vec();

    assert_eq!(tiers.len(), 5);
    assert_eq!(tiers.first().unwrap().min_spacing, Duration::from_secs(HOUR));
    assert_eq!(tiers.last().unwrap().valid_for, None);
    assert_eq!(tiers.last().unwrap().min_spacing, Duration::from_secs(30 * DAY));
}

#[test]
fn invalid_policies() {
    assert_eq!(RetentionPolicy::new(Vec::new()), Err(PolicyError::Empty));

    let result = RetentionPolicy::new(vec![
        RetentionTier::unbounded(Duration::from_secs(DAY)),
        RetentionTier::unbounded(Duration::from_secs(DAY)),
    ]);
    assert_eq!(result, Err(PolicyError::UnboundedNotLast(0)));

    let result = RetentionPolicy::new(vec![
        RetentionTier::bounded(Duration::from_secs(7 * DAY), Duration::from_secs(DAY)),
        RetentionTier::bounded(Duration::from_secs(2 * DAY), Duration::from_secs(HOUR)),
    ]);
    assert_eq!(result, Err(PolicyError::NotAscending(1)));
}

#[test]
fn policy_from_json() {
    let json = r#"[
        { "valid_for": 172800, "min_spacing": 3600 },
        { "valid_for": null, "min_spacing": 86400 }
    ]"#;

    let policy: RetentionPolicy = serde_json::from_str(json).unwrap();
    assert_eq!(
        policy.tiers(),
        &[
            RetentionTier::bounded(Duration::from_secs(2 * DAY), Duration::from_secs(HOUR)),
            RetentionTier::unbounded(Duration::from_secs(DAY)),
        ]
    );

    let json = r#"[{ "valid_for": null, "min_spacing": 1 }, { "valid_for": 10, "min_spacing": 1 }]"#;
    assert!(serde_json::from_str::<RetentionPolicy>(json).is_err());
}
