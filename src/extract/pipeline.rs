//! Per-file processing steps and the batch run driver.
//!
//! Every per-file failure is recorded against that file and the batch
//! moves on; only startup failures (missing source, destination that
//! cannot be initialized) abort a run.

use std::path::Path;

use anyhow::{bail, Result};
use plist::Value;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::extract::archiver;
use crate::extract::decode;
use crate::extract::flatten::flatten_value;
use crate::extract::sink::SqliteStore;
use crate::extract::types::{ExtractConfig, RunSummary, Step};

/// Terminal error text for a file no decoder could load.
pub const LOAD_ERROR_MSG: &str = "LOAD ERROR: Unable to load plist data";

/// Advisory error text for an archive that resolved to a bare sequence.
pub const INCOMPLETE_DESERIALIZE_MSG: &str =
    "DESERIALIZE ERROR: May not have deserialized completely";

/// Run one file through load -> archiver resolution -> flatten -> store.
///
/// Returns `Err` only for store failures; decode problems all land in the
/// `ERRORS` table.
pub fn process_file(
    store: &mut SqliteStore,
    config: &ExtractConfig,
    path: &Path,
) -> Result<()> {
    let pf_id = store.insert_file(&path.display().to_string())?;

    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) => {
            store.insert_error(pf_id, Step::Load, &format!("i/o error: {err}"))?;
            store.insert_error(pf_id, Step::Load, LOAD_ERROR_MSG)?;
            return Ok(());
        }
    };

    let chain = decode::load_chain(&bytes);
    for failure in &chain.failures {
        store.insert_error(pf_id, failure.step, &failure.error.to_string())?;
    }

    let mut value = match chain.value {
        Some(value) => value,
        None => {
            debug!(file = %path.display(), "no decoder accepted the file");
            store.insert_error(pf_id, Step::Load, LOAD_ERROR_MSG)?;
            return Ok(());
        }
    };

    if archiver::is_keyed_archive(&value) {
        // the loaded tree is a raw archive container; discard it and
        // re-decode the same bytes with the archiver-aware decoder
        match archiver::deserialize(&bytes) {
            Ok(resolved @ Value::Dictionary(_)) => value = resolved,
            Ok(resolved @ Value::Array(_)) => {
                // a bare sequence at the top level means object
                // back-references were not fully resolved
                store.insert_error(pf_id, Step::Archiver, INCOMPLETE_DESERIALIZE_MSG)?;
                store.note_archiver_anomaly();
                value = resolved;
            }
            Ok(other) => {
                store.insert_error(
                    pf_id,
                    Step::Archiver,
                    &format!("unexpected top-level {} from archive", kind_of(&other)),
                )?;
                store.insert_error(pf_id, Step::Load, LOAD_ERROR_MSG)?;
                store.note_archiver_anomaly();
                return Ok(());
            }
            Err(err) => {
                store.insert_error(pf_id, Step::Archiver, &err.to_string())?;
                store.insert_error(pf_id, Step::Load, LOAD_ERROR_MSG)?;
                store.note_archiver_anomaly();
                return Ok(());
            }
        }
    }

    let rows = flatten_value(&value, config);
    debug!(file = %path.display(), rows = rows.len(), "flattened");
    for row in &rows {
        store.insert_data(pf_id, row)?;
    }
    Ok(())
}

/// Process a source file or directory tree into a fresh destination store.
pub fn run_extraction(
    source: &Path,
    destination: &Path,
    config: &ExtractConfig,
) -> Result<RunSummary> {
    if !source.is_file() && !source.is_dir() {
        bail!("input file/folder could not be found: {}", source.display());
    }

    let mut store = SqliteStore::create(destination)?;
    let mut files = 0u64;

    if source.is_file() {
        process_file(&mut store, config, source)?;
        files = 1;
    } else {
        for entry in WalkDir::new(source).sort_by_file_name() {
            match entry {
                Ok(entry) if entry.file_type().is_file() => {
                    process_file(&mut store, config, entry.path())?;
                    files += 1;
                }
                Ok(_) => {}
                Err(err) => warn!(%err, "skipping unreadable directory entry"),
            }
        }
    }

    let summary = RunSummary {
        files,
        data_rows: store.data_rows(),
        error_rows: store.error_rows(),
        archiver_anomaly: store.archiver_anomaly(),
    };
    store.commit()?;
    info!(
        files = summary.files,
        data_rows = summary.data_rows,
        error_rows = summary.error_rows,
        "run complete"
    );
    Ok(summary)
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Dictionary(_) => "dictionary",
        Value::Array(_) => "array",
        Value::Boolean(_) => "boolean",
        Value::Integer(_) => "integer",
        Value::Real(_) => "real",
        Value::String(_) => "string",
        Value::Date(_) => "date",
        Value::Data(_) => "data",
        Value::Uid(_) => "uid",
        _ => "value",
    }
}
