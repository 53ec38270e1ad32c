//! End-to-end tests against real directories and real SQLite databases.
//!
//! These drive the public `run_extraction` entry point exactly the way the
//! CLI does and assert on what an independent reader of the destination
//! database sees afterwards.

use std::path::Path;

use plist::{Dictionary, Uid, Value};
use plistmill::extract::{run_extraction, ExtractConfig, SqliteStore, Step};
use plistmill::FlatRow;
use rusqlite::Connection;
use tempfile::TempDir;

const XML_PLIST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>Name</key>
    <string>Alice</string>
</dict>
</plist>
"#;

fn count(conn: &Connection, sql: &str) -> i64 {
    conn.query_row(sql, [], |row| row.get(0)).unwrap()
}

#[test]
fn test_mixed_directory_scenario() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("plists");
    std::fs::create_dir(&input).unwrap();
    std::fs::write(input.join("valid.plist"), XML_PLIST).unwrap();
    std::fs::write(input.join("broken.bin"), b"\x00\x01garbage, not a plist").unwrap();
    let db = dir.path().join("out.db");

    let summary = run_extraction(&input, &db, &ExtractConfig::default()).unwrap();
    assert_eq!(summary.files, 2);

    let conn = Connection::open(&db).unwrap();
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM PROCESSED_FILES"), 2);

    // exactly one data row, from the valid file
    let (key_path, key, value): (String, String, String) = conn
        .query_row("SELECT key_path, key, value FROM PLIST_DATA", [], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })
        .unwrap();
    assert_eq!((key_path.as_str(), key.as_str(), value.as_str()), ("", "Name", "Alice"));

    // broken.bin: one error per attempted decoder plus the terminal record
    let broken_errors: Vec<String> = {
        let mut stmt = conn
            .prepare(
                "SELECT processing_step FROM ERRORS_VIEW
                 WHERE file LIKE '%broken.bin' ORDER BY processing_step",
            )
            .unwrap();
        let rows = stmt.query_map([], |row| row.get(0)).unwrap();
        rows.map(|r| r.unwrap()).collect()
    };
    assert_eq!(
        broken_errors,
        vec![
            Step::BinaryPlist.as_str(),
            Step::LenientBplist.as_str(),
            Step::Load.as_str(),
            Step::XmlPlist.as_str(),
        ]
    );

    // the valid file decoded on the first attempt: nothing attributable to
    // the other decoders, no errors at all
    assert_eq!(
        count(
            &conn,
            "SELECT COUNT(*) FROM ERRORS_VIEW WHERE file LIKE '%valid.plist'"
        ),
        0
    );
}

#[test]
fn test_binary_plist_file() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("settings.plist");

    let mut nested = Dictionary::new();
    nested.insert("Enabled".to_string(), Value::Boolean(true));
    nested.insert("Retries".to_string(), Value::Integer(3.into()));
    let mut root = Dictionary::new();
    root.insert("Config".to_string(), Value::Dictionary(nested));
    Value::Dictionary(root).to_file_binary(&input).unwrap();

    let db = dir.path().join("out.db");
    let summary = run_extraction(&input, &db, &ExtractConfig::default()).unwrap();

    assert_eq!(summary.data_rows, 2);
    // the XML decoder was attempted first and its failure recorded
    assert_eq!(summary.error_rows, 1);

    let conn = Connection::open(&db).unwrap();
    let rows: Vec<FlatRow> = {
        let mut stmt = conn
            .prepare("SELECT key_path, key, value FROM PLIST_DATA ORDER BY id")
            .unwrap();
        let rows = stmt
            .query_map([], |row| {
                Ok(FlatRow {
                    key_path: row.get(0)?,
                    key: row.get(1)?,
                    value: row.get(2)?,
                })
            })
            .unwrap();
        rows.map(|r| r.unwrap()).collect()
    };
    assert_eq!(
        rows,
        vec![
            FlatRow::new("Config", "Enabled", "True"),
            FlatRow::new("Config", "Retries", "3"),
        ]
    );
}

#[test]
fn test_keyed_archive_file() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("archived.plist");

    // {"Name": "Alice"} encoded the NSKeyedArchiver way
    let mut instance = Dictionary::new();
    instance.insert(
        "NS.keys".to_string(),
        Value::Array(vec![Value::Uid(Uid::new(2))]),
    );
    instance.insert(
        "NS.objects".to_string(),
        Value::Array(vec![Value::Uid(Uid::new(3))]),
    );
    instance.insert("$class".to_string(), Value::Uid(Uid::new(4)));
    let mut class = Dictionary::new();
    class.insert(
        "$classname".to_string(),
        Value::String("NSDictionary".to_string()),
    );
    let mut top = Dictionary::new();
    top.insert("root".to_string(), Value::Uid(Uid::new(1)));
    let mut archive = Dictionary::new();
    archive.insert(
        "$archiver".to_string(),
        Value::String("NSKeyedArchiver".to_string()),
    );
    archive.insert("$version".to_string(), Value::Integer(100000.into()));
    archive.insert(
        "$objects".to_string(),
        Value::Array(vec![
            Value::String("$null".to_string()),
            Value::Dictionary(instance),
            Value::String("Name".to_string()),
            Value::String("Alice".to_string()),
            Value::Dictionary(class),
        ]),
    );
    archive.insert("$top".to_string(), Value::Dictionary(top));
    Value::Dictionary(archive).to_file_binary(&input).unwrap();

    let db = dir.path().join("out.db");
    let summary = run_extraction(&input, &db, &ExtractConfig::default()).unwrap();

    assert!(!summary.archiver_anomaly);

    let conn = Connection::open(&db).unwrap();
    // the raw archive container is never flattened
    assert_eq!(
        count(
            &conn,
            "SELECT COUNT(*) FROM PLIST_DATA WHERE key LIKE '$%'"
        ),
        0
    );
    let (key, value): (String, String) = conn
        .query_row("SELECT key, value FROM PLIST_DATA", [], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })
        .unwrap();
    assert_eq!((key.as_str(), value.as_str()), ("Name", "Alice"));
}

#[test]
fn test_interrupted_run_leaves_no_rows() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("out.db");

    let mut store = SqliteStore::create(&db).unwrap();
    let pf_id = store.insert_file("a.plist").unwrap();
    store
        .insert_data(pf_id, &FlatRow::new("", "Name", "Alice"))
        .unwrap();
    store.insert_error(pf_id, Step::XmlPlist, "boom").unwrap();

    // an independent reader mid-run sees schema only
    {
        let conn = Connection::open(&db).unwrap();
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM PROCESSED_FILES"), 0);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM PLIST_DATA"), 0);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM ERRORS"), 0);
    }

    // simulated termination forfeits everything
    drop(store);
    let conn = Connection::open(&db).unwrap();
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM PROCESSED_FILES"), 0);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM PLIST_DATA"), 0);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM ERRORS"), 0);
}

#[test]
fn test_existing_destination_is_replaced() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("valid.plist");
    std::fs::write(&input, XML_PLIST).unwrap();
    let db = dir.path().join("out.db");

    run_extraction(&input, &db, &ExtractConfig::default()).unwrap();
    run_extraction(&input, &db, &ExtractConfig::default()).unwrap();

    // the second run started from a fresh database, not an appended one
    let conn = Connection::open(&db).unwrap();
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM PROCESSED_FILES"), 1);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM PLIST_DATA"), 1);
}

#[test]
fn test_nested_directories_are_walked() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("plists");
    std::fs::create_dir_all(input.join("a/b")).unwrap();
    std::fs::write(input.join("top.plist"), XML_PLIST).unwrap();
    std::fs::write(input.join("a/b/deep.plist"), XML_PLIST).unwrap();
    let db = dir.path().join("out.db");

    let summary = run_extraction(&input, &db, &ExtractConfig::default()).unwrap();
    assert_eq!(summary.files, 2);
    assert_eq!(summary.data_rows, 2);
}

#[test]
fn test_missing_source_aborts_before_processing() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("out.db");

    let missing: &Path = &dir.path().join("does-not-exist");
    assert!(run_extraction(missing, &db, &ExtractConfig::default()).is_err());
}
