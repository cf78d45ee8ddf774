mod common;

use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use common::active_commitment_script;
use predicates::prelude::*;
use std::process::Command;

#[cfg(not(feature = "storage-rocksdb"))]
#[test]
fn test_rocksdb_fallback_warning() {
    let script = active_commitment_script(1);

    let mut cmd = Command::new(cargo_bin!("engagement-engine"));
    cmd.arg("replay")
        .arg(script.path())
        .arg("--db-path")
        .arg("some_db");

    cmd.assert()
        .success()
        .stderr(predicate::str::contains("WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."));
}

#[cfg(feature = "storage-rocksdb")]
#[test]
fn test_rocksdb_no_fallback_warning() {
    let script = active_commitment_script(1);

    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("test_db");

    let mut cmd = Command::new(cargo_bin!("engagement-engine"));
    cmd.arg("replay")
        .arg(script.path())
        .arg("--db-path")
        .arg(&db_path);

    cmd.assert()
        .success()
        .stderr(predicate::str::contains("WARNING").not());
}
