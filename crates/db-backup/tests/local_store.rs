//! Tests for the local store
//!

use std::{
    fs,
    io::{self, Cursor, Read},
};

use backup_core::{Series, test::init_test_logger};
use chrono::TimeDelta;
use common::{backup_aged, series};
use db_backup::store::{BackupStore, LocalStore, StoreError};

mod common;

#[test]
fn put_then_list() {
    let _logger = init_test_logger();

    let directory = tempfile::tempdir().unwrap();
    let store = LocalStore::new(directory.path().join("backups"));
    let series = series();
    let name = backup_aged(&series, TimeDelta::hours(2), "abcde");

    let bytes = store
        .put(&name, &mut Cursor::new(b"CREATE TABLE t;".to_vec()))
        .unwrap();
    assert_eq!(bytes, 15);

    let contents = fs::read(store.directory().join(name.encode())).unwrap();
    assert_eq!(contents, b"CREATE TABLE t;");
    assert_eq!(store.list(&series).unwrap(), vec![name]);
}

#[test]
fn list_skips_unrelated_entries() {
    let _logger = init_test_logger();

    let directory = tempfile::tempdir().unwrap();
    let store = LocalStore::new(directory.path());
    let series = series();

    let name = backup_aged(&series, TimeDelta::zero(), "abcde");
    fs::write(directory.path().join(name.encode()), "dump").unwrap();

    let other = backup_aged(
        &Series::new("mysqldump_shop", "gz").unwrap(),
        TimeDelta::zero(),
        "abcde",
    );
    fs::write(directory.path().join(other.encode()), "dump").unwrap();
    fs::write(directory.path().join("README.md"), "notes").unwrap();
    fs::write(
        directory.path().join(format!(".{}.partial", name.encode())),
        "half a dump",
    )
    .unwrap();
    fs::create_dir(directory.path().join("mysqldump_shop_2024_01_01_00_00_00_dir01.sql")).unwrap();

    assert_eq!(store.list(&series).unwrap(), vec![name]);
}

#[test]
fn missing_directory_lists_empty() {
    let directory = tempfile::tempdir().unwrap();
    let store = LocalStore::new(directory.path().join("missing"));

    assert!(store.list(&series()).unwrap().is_empty());
}

#[test]
fn put_refuses_to_overwrite() {
    let directory = tempfile::tempdir().unwrap();
    let store = LocalStore::new(directory.path());
    let name = backup_aged(&series(), TimeDelta::zero(), "abcde");

    store.put(&name, &mut Cursor::new(b"first".to_vec())).unwrap();
    let result = store.put(&name, &mut Cursor::new(b"second".to_vec()));

    assert!(matches!(result, Err(StoreError::AlreadyExists(_))));
    assert_eq!(
        fs::read(directory.path().join(name.encode())).unwrap(),
        b"first"
    );
}

struct BrokenReader {
    remaining: usize,
}

impl Read for BrokenReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 {
            return Err(io::Error::other("connection reset"));
        }

        let bytes = self.remaining.min(buf.len());
        buf.iter_mut().take(bytes).for_each(|byte| *byte = b'x');
        self.remaining -= bytes;

        Ok(bytes)
    }
}

#[test]
fn failed_put_leaves_nothing_behind() {
    let _logger = init_test_logger();

    let directory = tempfile::tempdir().unwrap();
    let store = LocalStore::new(directory.path());
    let series = series();
    let name = backup_aged(&series, TimeDelta::zero(), "abcde");

    let result = store.put(&name, &mut BrokenReader { remaining: 1024 });

    assert!(matches!(result, Err(StoreError::ReadDump(_))));
    assert!(store.list(&series).unwrap().is_empty());
    assert_eq!(fs::read_dir(directory.path()).unwrap().count(), 0);
}

#[test]
fn delete_is_idempotent() {
    let directory = tempfile::tempdir().unwrap();
    let store = LocalStore::new(directory.path());
    let series = series();
    let name = backup_aged(&series, TimeDelta::zero(), "abcde");

    store.put(&name, &mut Cursor::new(b"dump".to_vec())).unwrap();
    store.delete(&name).unwrap();
    store.delete(&name).unwrap();

    assert!(store.list(&series).unwrap().is_empty());
}
