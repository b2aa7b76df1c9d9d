//! # common
//!

#![allow(dead_code)]

use core::cell::{Cell, RefCell};
use std::{
    collections::{BTreeMap, BTreeSet},
    io::{self, Cursor, Read},
};

use backup_core::{BackupName, NamePart, Series};
use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use db_backup::{
    source::{DumpError, DumpProcessError, DumpSource},
    store::{BackupStore, StoreError, copy_chunked},
};

pub fn series() -> Series {
    Series::new("mysqldump_shop", "sql").unwrap()
}

pub fn now() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 6, 1)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap()
}

/// A backup of `series` taken `age` before [`now`].
pub fn backup_aged(series: &Series, age: TimeDelta, disambiguator: &str) -> BackupName {
    BackupName::new(series, now() - age, NamePart::token(disambiguator).unwrap())
}

/// A store holding its backups in memory.
#[derive(Default)]
pub struct MemoryStore {
    pub entries: RefCell<BTreeMap<String, Vec<u8>>>,
    pub fail_put: bool,
    pub fail_delete: RefCell<BTreeSet<String>>,
}

impl MemoryStore {
    pub fn failing_put() -> Self {
        Self {
            fail_put: true,
            ..Self::default()
        }
    }

    pub fn insert(&self, name: &BackupName, contents: &[u8]) {
        self.entries
            .borrow_mut()
            .insert(name.encode(), contents.to_vec());
    }

    pub fn insert_raw(&self, name: &str) {
        self.entries
            .borrow_mut()
            .insert(name.to_string(), Vec::new());
    }

    pub fn contains(&self, name: &BackupName) -> bool {
        self.entries.borrow().contains_key(&name.encode())
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.borrow().keys().cloned().collect()
    }

    pub fn get(&self, name: &str) -> Option<Vec<u8>> {
        self.entries.borrow().get(name).cloned()
    }
}

impl BackupStore for MemoryStore {
    fn location(&self) -> String {
        "memory".into()
    }

    fn list(&self, series: &Series) -> Result<Vec<BackupName>, StoreError> {
        Ok(self
            .entries
            .borrow()
            .keys()
            .filter_map(|key| BackupName::decode(key))
            .filter(|name| name.belongs_to(series))
            .collect())
    }

    fn put(&self, name: &BackupName, reader: &mut dyn Read) -> Result<usize, StoreError> {
        if self.fail_put {
            return Err(StoreError::Remote("store is down".into(), "upload object"));
        }

        let mut contents = Vec::new();
        let bytes = copy_chunked(reader, &mut contents)?;
        self.entries.borrow_mut().insert(name.encode(), contents);

        Ok(bytes)
    }

    fn delete(&self, name: &BackupName) -> Result<(), StoreError> {
        if self.fail_delete.borrow().contains(&name.encode()) {
            return Err(StoreError::Remote("access denied".into(), "delete object"));
        }

        self.entries.borrow_mut().remove(&name.encode());
        Ok(())
    }
}

/// How a [`ScriptedSource`] behaves.
#[derive(Debug, Clone)]
pub enum Script {
    /// Produce these bytes.
    Dump(Vec<u8>),

    /// Fail before producing anything.
    FailToStart,

    /// Produce these bytes, then fail like a dump process exiting with an error.
    FailMidway(Vec<u8>),
}

/// A dump source that follows a script.
#[derive(Debug)]
pub struct ScriptedSource {
    pub script: Script,
    pub produced: Cell<usize>,
}

impl ScriptedSource {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            produced: Cell::new(0),
        }
    }
}

impl DumpSource for ScriptedSource {
    fn produce(&self) -> Result<Box<dyn Read>, DumpError> {
        self.produced.set(self.produced.get() + 1);

        match &self.script {
            Script::Dump(contents) => Ok(Box::new(Cursor::new(contents.clone()))),
            Script::FailToStart => Err(DumpError::Process(DumpProcessError::Spawn(
                "mysqldump".into(),
                io::Error::new(io::ErrorKind::NotFound, "not found"),
            ))),
            Script::FailMidway(contents) => Ok(Box::new(FailingReader {
                contents: Cursor::new(contents.clone()),
            })),
        }
    }

    fn default_prefix(&self) -> String {
        "mysqldump_shop".into()
    }

    fn default_extension(&self) -> String {
        "sql".into()
    }
}

struct FailingReader {
    contents: Cursor<Vec<u8>>,
}

impl Read for FailingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let bytes_read = self.contents.read(buf)?;
        if bytes_read == 0 && !buf.is_empty() {
            return Err(io::Error::other(DumpError::Process(
                DumpProcessError::Cancelled("mysqldump".into()),
            )));
        }

        Ok(bytes_read)
    }
}
