//! Sequences one run: dump, upload, clean up.
//!
//! Steps are independent. A failed step is reported and the remaining steps
//! still run, except that a failed dump is never uploaded.
//!

use core::fmt;
use std::{
    fs::File,
    io::{self, Seek, SeekFrom},
};

use backup_core::{
    BackupName, BackupRecord, Decision, NamePart, NamePartError, RetentionPolicy, Series,
};
use chrono::NaiveDateTime;
use rand::{Rng, distributions::Alphanumeric};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
    config::Actions,
    context::Context,
    source::{DumpError, DumpSource},
    store::{BackupStore, CleanupMode, StoreError, StoreKind, copy_chunked},
};

/// Length of the random part of a backup name.
pub const DISAMBIGUATOR_LENGTH: usize = 5;

/// A fresh random disambiguator.
pub fn generate_disambiguator(rng: &mut impl Rng) -> Result<NamePart, NamePartError> {
    let disambiguator: String = rng
        .sample_iter(&Alphanumeric)
        .take(DISAMBIGUATOR_LENGTH)
        .map(char::from)
        .collect();

    NamePart::token(&disambiguator)
}

/// The stores and policy of one run.
pub struct Orchestrator<'a> {
    source: &'a dyn DumpSource,
    series: Series,
    policy: &'a RetentionPolicy,
    remote: Option<&'a dyn BackupStore>,
    local: Option<(&'a dyn BackupStore, CleanupMode)>,
}

impl<'a> Orchestrator<'a> {
    /// An orchestrator without stores.
    pub fn new(source: &'a dyn DumpSource, series: Series, policy: &'a RetentionPolicy) -> Self {
        Self {
            source,
            series,
            policy,
            remote: None,
            local: None,
        }
    }

    /// Use `store` as the remote store.
    #[must_use]
    pub fn with_remote(mut self, store: &'a dyn BackupStore) -> Self {
        self.remote = Some(store);
        self
    }

    /// Use `store` as the local store, cleaned up according to `cleanup`.
    #[must_use]
    pub fn with_local(mut self, store: &'a dyn BackupStore, cleanup: CleanupMode) -> Self {
        self.local = Some((store, cleanup));
        self
    }

    /// The series this run works on.
    pub fn series(&self) -> &Series {
        &self.series
    }

    fn store(&self, kind: StoreKind) -> Option<&'a dyn BackupStore> {
        match kind {
            StoreKind::Remote => self.remote,
            StoreKind::Local => self.local.map(|(store, _)| store),
        }
    }

    fn cleanup_mode(&self, kind: StoreKind) -> CleanupMode {
        match kind {
            StoreKind::Remote => CleanupMode::Retain,
            StoreKind::Local => self
                .local
                .map_or(CleanupMode::Retain, |(_, cleanup)| cleanup),
        }
    }

    /// Every configured store, local first.
    fn stores(&self) -> Vec<(StoreKind, &'a dyn BackupStore)> {
        [StoreKind::Local, StoreKind::Remote]
            .into_iter()
            .filter_map(|kind| self.store(kind).map(|store| (kind, store)))
            .collect()
    }

    /// Run every enabled action. Backups created by this run are named for `now`.
    pub fn run(&self, actions: &Actions, now: NaiveDateTime) -> RunReport {
        let mut report = RunReport::default();

        if actions.create_dump {
            match generate_disambiguator(&mut rand::thread_rng()) {
                Ok(disambiguator) => {
                    let name = BackupName::new(&self.series, now, disambiguator);
                    report.outcomes.extend(self.create_dump(&name));
                }
                Err(e) => report.push(Step::Dump, Err(RunError::Name(e))),
            }
        }

        if actions.clean_remote {
            let result = self
                .cleanup(StoreKind::Remote, now, actions.simulate)
                .map(|_| ());
            report.push(Step::Cleanup(StoreKind::Remote), result);
        }

        if actions.clean_local {
            let result = self
                .cleanup(StoreKind::Local, now, actions.simulate)
                .map(|_| ());
            report.push(Step::Cleanup(StoreKind::Local), result);
        }

        report
    }

    /// Dump the source into every configured store under `name`.
    ///
    /// With a single store the dump streams straight into it. With more, the
    /// dump is spooled to a temporary file once and replayed into each store.
    pub fn create_dump(&self, name: &BackupName) -> Vec<(Step, Result<(), RunError>)> {
        let stores = self.stores();

        match stores.as_slice() {
            [] => vec![(Step::Dump, Err(RunError::NoStore))],
            [(kind, store)] => self.stream_dump(name, *kind, *store),
            _ => self.spool_dump(name, &stores),
        }
    }

    fn stream_dump(
        &self,
        name: &BackupName,
        kind: StoreKind,
        store: &dyn BackupStore,
    ) -> Vec<(Step, Result<(), RunError>)> {
        let context = Context::new(kind, "Upload");

        let mut dump = match self.source.produce() {
            Ok(dump) => dump,
            Err(e) => {
                error!("{context}Could not start dump: {e}");
                return vec![(Step::Dump, Err(RunError::Dump(e)))];
            }
        };

        match store.put(name, &mut dump) {
            Ok(bytes) => {
                info!("{context}Stored {name} ({bytes} bytes) in {}", store.location());
                vec![(Step::Dump, Ok(())), (Step::Upload(kind), Ok(()))]
            }
            Err(StoreError::ReadDump(e)) => {
                let e = DumpError::from_stream(e);
                error!("{context}Dump failed: {e}");
                vec![(Step::Dump, Err(RunError::Dump(e)))]
            }
            Err(e) => {
                error!("{context}Could not store {name}: {e}");
                vec![
                    (Step::Dump, Ok(())),
                    (Step::Upload(kind), Err(RunError::Store(kind, e))),
                ]
            }
        }
    }

    fn spool_dump(
        &self,
        name: &BackupName,
        stores: &[(StoreKind, &dyn BackupStore)],
    ) -> Vec<(Step, Result<(), RunError>)> {
        let context = Context {
            store: None,
            current_context: "Dump",
        };

        let mut spool = match self.spool() {
            Ok(spool) => spool,
            Err(e) => {
                error!("{context}Dump failed: {e}");
                return vec![(Step::Dump, Err(e))];
            }
        };

        let mut outcomes = vec![(Step::Dump, Ok(()))];

        for (kind, store) in stores {
            let context = Context::new(*kind, "Upload");

            let result = spool
                .seek(SeekFrom::Start(0))
                .map_err(|e| StoreError::Io(e, "rewind spool"))
                .and_then(|_| store.put(name, &mut spool));

            match result {
                Ok(bytes) => {
                    info!("{context}Stored {name} ({bytes} bytes) in {}", store.location());
                    outcomes.push((Step::Upload(*kind), Ok(())));
                }
                Err(e) => {
                    error!("{context}Could not store {name}: {e}");
                    outcomes.push((Step::Upload(*kind), Err(RunError::Store(*kind, e))));
                }
            }
        }

        outcomes
    }

    /// Run the dump to completion into an anonymous temporary file.
    fn spool(&self) -> Result<File, RunError> {
        let mut dump = self.source.produce().map_err(RunError::Dump)?;

        let mut spool = tempfile::tempfile().map_err(RunError::Spool)?;
        match copy_chunked(&mut dump, &mut spool) {
            Ok(bytes) => debug!("Spooled {bytes} bytes"),
            Err(StoreError::ReadDump(e)) => return Err(RunError::Dump(DumpError::from_stream(e))),
            Err(StoreError::Io(e, _)) => return Err(RunError::Spool(e)),
            Err(e) => return Err(RunError::Store(StoreKind::Local, e)),
        }

        Ok(spool)
    }

    /// Delete the backups of the series in the `kind` store that retention
    /// no longer wants. With `simulate` the deletions are only reported.
    ///
    /// Every deletion is attempted; the first failure is returned.
    pub fn cleanup(
        &self,
        kind: StoreKind,
        now: NaiveDateTime,
        simulate: bool,
    ) -> Result<Decision, RunError> {
        let context = Context::new(kind, "Cleanup");

        let store = self.store(kind).ok_or(RunError::StoreUnavailable(kind))?;

        let names = store.list(&self.series).map_err(|e| {
            error!("{context}Could not list {}: {e}", store.location());
            RunError::Store(kind, e)
        })?;
        info!("{context}Found {} backups of {}", names.len(), self.series);

        let records = names
            .into_iter()
            .map(|name| BackupRecord::new(name, now))
            .collect();

        let decision = match self.cleanup_mode(kind) {
            CleanupMode::Retain => self.policy.decide(records),
            CleanupMode::Purge => purge(records),
        };

        for record in &decision.keep {
            debug!("{context}+ Keep {}", record.name);
        }

        let mut first_error = None;
        for record in &decision.delete {
            if simulate {
                debug!("{context}- Would delete {}", record.name);
                continue;
            }

            debug!("{context}- Delete {}", record.name);
            if let Err(e) = store.delete(&record.name) {
                warn!("{context}Could not delete {}: {e}", record.name);
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        if let Some(e) = first_error {
            return Err(RunError::Store(kind, e));
        }

        info!(
            "{context}Kept {}, {} {}",
            decision.keep.len(),
            if simulate { "would delete" } else { "deleted" },
            decision.delete.len()
        );

        Ok(decision)
    }
}

/// Mark every record for deletion, youngest first.
fn purge(mut records: Vec<BackupRecord>) -> Decision {
    records.sort_by_key(|record| record.age);

    Decision {
        keep: Vec::new(),
        delete: records,
    }
}

/// A step of a run.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Dump,
    Upload(StoreKind),
    Cleanup(StoreKind),
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dump => f.write_str("dump"),
            Self::Upload(kind) => write!(f, "{kind} upload"),
            Self::Cleanup(kind) => write!(f, "{kind} cleanup"),
        }
    }
}

/// The outcome of every step a run attempted, in order.
#[derive(Debug, Default)]
pub struct RunReport {
    /// Each attempted step and its result.
    pub outcomes: Vec<(Step, Result<(), RunError>)>,
}

impl RunReport {
    fn push(&mut self, step: Step, result: Result<(), RunError>) {
        self.outcomes.push((step, result));
    }

    /// If every attempted step succeeded.
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|(_, result)| result.is_ok())
    }

    /// The steps that failed.
    pub fn failures(&self) -> impl Iterator<Item = (Step, &RunError)> {
        self.outcomes
            .iter()
            .filter_map(|(step, result)| result.as_ref().err().map(|e| (*step, e)))
    }

    /// The result of `step`, if it was attempted.
    pub fn outcome(&self, step: Step) -> Option<&Result<(), RunError>> {
        self.outcomes
            .iter()
            .find(|(attempted, _)| *attempted == step)
            .map(|(_, result)| result)
    }
}

#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Dump failed: {0}")]
    Dump(#[source] DumpError),

    #[error("Failed to spool the dump: {0}")]
    Spool(#[source] io::Error),

    #[error("The {0} store failed: {1}")]
    Store(StoreKind, #[source] StoreError),

    #[error("No {0} store is available")]
    StoreUnavailable(StoreKind),

    #[error("No store is configured to receive the dump")]
    NoStore,

    #[error("Failed to name the backup: {0}")]
    Name(#[source] NamePartError),
}
