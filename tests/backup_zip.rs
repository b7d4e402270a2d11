#[path = "../src/backup.rs"]
mod backup;

use std::fs::File;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

#[test]
fn zip_export_and_import_roundtrip() {
    let workspace = temp_dir("feedbackd-backup-src");
    let workspace2 = temp_dir("feedbackd-backup-dst");
    let out_dir = temp_dir("feedbackd-backup-out");

    let db_src = workspace.join("feedback.sqlite3");
    let bytes = b"sqlite-test-payload";
    std::fs::write(&db_src, bytes).expect("write source db");

    let bundle_path = out_dir.join("workspace.fbbackup.zip");
    let export = backup::export_workspace_bundle(&workspace, &bundle_path).expect("export bundle");
    assert_eq!(export.bundle_format, backup::BUNDLE_FORMAT_V1);
    assert_eq!(export.entry_count, 3);
    assert_eq!(export.db_sha256.len(), 64);

    let f = File::open(&bundle_path).expect("open bundle");
    let mut archive = zip::ZipArchive::new(f).expect("open zip archive");
    let mut manifest = String::new();
    archive
        .by_name("manifest.json")
        .expect("manifest entry")
        .read_to_string(&mut manifest)
        .expect("read manifest");
    assert!(manifest.contains(backup::BUNDLE_FORMAT_V1));
    assert!(manifest.contains(&export.db_sha256));
    archive
        .by_name("db/feedback.sqlite3")
        .expect("database entry in bundle");

    let import = backup::import_workspace_bundle(&bundle_path, &workspace2).expect("import bundle");
    assert_eq!(import.bundle_format_detected, backup::BUNDLE_FORMAT_V1);

    let db_dst = workspace2.join("feedback.sqlite3");
    let restored = std::fs::read(&db_dst).expect("read restored db");
    assert_eq!(restored, bytes);

    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(workspace2);
    let _ = std::fs::remove_dir_all(out_dir);
}

#[test]
fn import_rejects_tampered_database_entry() {
    let workspace = temp_dir("feedbackd-tamper-src");
    let workspace2 = temp_dir("feedbackd-tamper-dst");
    let out_dir = temp_dir("feedbackd-tamper-out");

    let db_src = workspace.join("feedback.sqlite3");
    std::fs::write(&db_src, b"original-payload").expect("write source db");
    let bundle_path = out_dir.join("workspace.fbbackup.zip");
    let _ = backup::export_workspace_bundle(&workspace, &bundle_path).expect("export bundle");

    // Rebuild the bundle with the original manifest but altered db bytes.
    let mut manifest = String::new();
    {
        let f = File::open(&bundle_path).expect("open bundle");
        let mut archive = zip::ZipArchive::new(f).expect("open zip archive");
        archive
            .by_name("manifest.json")
            .expect("manifest entry")
            .read_to_string(&mut manifest)
            .expect("read manifest");
    }
    let tampered_path = out_dir.join("tampered.fbbackup.zip");
    {
        let out = File::create(&tampered_path).expect("create tampered bundle");
        let mut zip = zip::ZipWriter::new(out);
        let opts = zip::write::FileOptions::default();
        zip.start_file("manifest.json", opts).expect("manifest");
        zip.write_all(manifest.as_bytes()).expect("write manifest");
        zip.start_file("db/feedback.sqlite3", opts).expect("db entry");
        zip.write_all(b"not-the-original-payload").expect("write db");
        zip.finish().expect("finish zip");
    }

    let result = backup::import_workspace_bundle(&tampered_path, &workspace2);
    let err = result.expect_err("tampered bundle must be rejected");
    assert!(err.to_string().contains("digest mismatch"));

    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(workspace2);
    let _ = std::fs::remove_dir_all(out_dir);
}

#[test]
fn import_accepts_legacy_bare_sqlite_file() {
    let workspace = temp_dir("feedbackd-legacy-src");
    let workspace2 = temp_dir("feedbackd-legacy-dst");

    let legacy = workspace.join("old-backup.sqlite3");
    std::fs::write(&legacy, b"legacy-db-bytes").expect("write legacy file");

    let import = backup::import_workspace_bundle(&legacy, &workspace2).expect("import legacy");
    assert_eq!(import.bundle_format_detected, "legacy-sqlite3");
    let restored = std::fs::read(workspace2.join("feedback.sqlite3")).expect("read restored");
    assert_eq!(restored, b"legacy-db-bytes");

    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(workspace2);
}
