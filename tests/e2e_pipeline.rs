//! E2E tests for the ingestion pipeline CLI: register a manifest, run
//! ingest offline (hash embedder, no vision), inspect status, recover
//! via reingest.

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::json;

fn write_manifest(dir: &Path, records: serde_json::Value) -> PathBuf {
    let path = dir.join("assets.json");
    fs::write(&path, serde_json::to_string_pretty(&records).unwrap()).unwrap();
    path
}

fn sample_manifest(dir: &Path) -> PathBuf {
    write_manifest(
        dir,
        json!([
            {
                "source_id": "gp-001",
                "filename": "LaunchFE_Logo_2024_Black.png",
                "content_type": "image/png",
                "album_name": "Brand Kit"
            },
            {
                "source_id": "gp-002",
                "filename": "Summer_Party-Flyer.png",
                "content_type": "image/png",
                "album_name": "Social Media",
                "caption": "bright summer promo",
                "tags": ["summer", "promo"]
            },
            {
                "source_id": "gp-003",
                "filename": "NYC_Office_Opening_2023-06-12.jpg",
                "content_type": "image/jpeg",
                "album_name": "Events"
            }
        ]),
    )
}

fn dams(db: &Path) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("dams");
    cmd.arg("--db")
        .arg(db)
        .env_remove("DAMS_API_KEY")
        .env_remove("DAMS_API_BASE_URL");
    cmd
}

#[test]
fn register_then_ingest_reaches_indexed() {
    let tmp = tempfile::TempDir::new().unwrap();
    let db = tmp.path().join("dams.db");
    let manifest = sample_manifest(tmp.path());

    dams(&db)
        .args(["register", "--file"])
        .arg(&manifest)
        .assert()
        .success()
        .stdout(predicate::str::contains("registered 3 assets"));

    dams(&db)
        .args(["ingest", "--workers", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("3 indexed"));

    let output = dams(&db)
        .args(["status", "--json"])
        .output()
        .expect("status command");
    assert!(output.status.success());

    let stats: serde_json::Value = serde_json::from_slice(&output.stdout).expect("valid JSON");
    assert_eq!(stats["total"], 3);
    assert_eq!(stats["by_state"]["indexed"], 3);
    // deterministic rules without vision: the Brand Kit logo and the
    // flyer are templates, the date-stamped event photo is inspiration
    assert_eq!(stats["by_category"]["template"], 2);
    assert_eq!(stats["by_category"]["inspiration"], 1);
    assert!(stats["failed"].as_array().unwrap().is_empty());
}

#[test]
fn register_is_idempotent_by_source_id() {
    let tmp = tempfile::TempDir::new().unwrap();
    let db = tmp.path().join("dams.db");
    let manifest = sample_manifest(tmp.path());

    for _ in 0..2 {
        dams(&db)
            .args(["register", "--file"])
            .arg(&manifest)
            .assert()
            .success();
    }

    let output = dams(&db)
        .args(["status", "--json"])
        .output()
        .expect("status command");
    let stats: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(stats["total"], 3, "re-registration must not duplicate");
}

#[test]
fn re_registration_marks_indexed_asset_pending_again() {
    let tmp = tempfile::TempDir::new().unwrap();
    let db = tmp.path().join("dams.db");
    let manifest = sample_manifest(tmp.path());

    dams(&db)
        .args(["register", "--file"])
        .arg(&manifest)
        .assert()
        .success();
    dams(&db).arg("ingest").assert().success();

    // Same source id, changed caption: back to pending
    let updated = write_manifest(
        tmp.path(),
        json!([{
            "source_id": "gp-002",
            "filename": "Summer_Party-Flyer.png",
            "content_type": "image/png",
            "album_name": "Social Media",
            "caption": "reworked copy for fall"
        }]),
    );
    dams(&db)
        .args(["register", "--file"])
        .arg(&updated)
        .assert()
        .success();

    let output = dams(&db)
        .args(["status", "--json"])
        .output()
        .expect("status command");
    let stats: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(stats["by_state"]["pending"], 1);
    assert_eq!(stats["by_state"]["indexed"], 2);

    // Second ingest picks the stale asset back up
    dams(&db).arg("ingest").assert().success();
    let output = dams(&db)
        .args(["status", "--json"])
        .output()
        .expect("status command");
    let stats: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(stats["by_state"]["indexed"], 3);
}

#[test]
fn reingest_unknown_source_id_fails() {
    let tmp = tempfile::TempDir::new().unwrap();
    let db = tmp.path().join("dams.db");

    dams(&db)
        .args(["reingest", "--source-id", "nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no asset with source id"));
}

#[test]
fn reingest_by_source_id_requeues_the_asset() {
    let tmp = tempfile::TempDir::new().unwrap();
    let db = tmp.path().join("dams.db");
    let manifest = sample_manifest(tmp.path());

    dams(&db)
        .args(["register", "--file"])
        .arg(&manifest)
        .assert()
        .success();
    dams(&db).arg("ingest").assert().success();

    dams(&db)
        .args(["reingest", "--source-id", "gp-001"])
        .assert()
        .success()
        .stdout(predicate::str::contains("queued gp-001"));

    let output = dams(&db)
        .args(["status", "--json"])
        .output()
        .expect("status command");
    let stats: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(stats["by_state"]["pending"], 1);
}

#[test]
fn malformed_manifest_is_rejected() {
    let tmp = tempfile::TempDir::new().unwrap();
    let db = tmp.path().join("dams.db");
    let path = tmp.path().join("assets.json");
    fs::write(&path, "{\"not\": \"an array\"}").unwrap();

    dams(&db)
        .args(["register", "--file"])
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("JSON array"));
}

#[test]
fn manifest_record_without_source_id_is_rejected() {
    let tmp = tempfile::TempDir::new().unwrap();
    let db = tmp.path().join("dams.db");
    let path = write_manifest(
        tmp.path(),
        json!([{ "source_id": "", "filename": "x.png" }]),
    );

    dams(&db)
        .args(["register", "--file"])
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("missing source_id"));
}
