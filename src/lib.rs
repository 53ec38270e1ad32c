//! # Plistmill - Plist Extraction Toolkit
//!
//! Reads Apple property-list files - XML, binary, and NSKeyedArchiver
//! object graphs - and flattens every leaf value into queryable
//! `(file, key_path, key, value)` rows in a SQLite database, tolerating
//! per-file and per-decoder failures without aborting the batch.
//!
//! ## Modules
//!
//! - **extract**: the loader chain, archiver resolver, flattener, SQLite
//!   store, and batch driver
//!
//! ## Quick Start
//!
//! ### Flattening a value tree
//!
//! ```rust
//! use plistmill::extract::{flatten_value, ExtractConfig};
//! use plist::Value;
//!
//! let mut dict = plist::Dictionary::new();
//! dict.insert("Name".to_string(), Value::String("Alice".to_string()));
//! dict.insert(
//!     "Tags".to_string(),
//!     Value::Array(vec![Value::Boolean(true), Value::Boolean(false)]),
//! );
//!
//! let rows = flatten_value(&Value::Dictionary(dict), &ExtractConfig::default());
//!
//! // rows[0] = (key_path: "", key: "Name", value: "Alice")
//! // rows[1] = (key_path: "Tags", key: "Tags", value: "True")
//! assert_eq!(rows.len(), 3);
//! assert_eq!(rows[1].value, "True");
//! ```
//!
//! ### Running a full extraction
//!
//! ```rust,no_run
//! use plistmill::extract::{run_extraction, ExtractConfig};
//! use std::path::Path;
//!
//! # fn main() -> anyhow::Result<()> {
//! let summary = run_extraction(
//!     Path::new("./plists"),
//!     Path::new("./out.db"),
//!     &ExtractConfig::default(),
//! )?;
//! println!("{} files, {} rows", summary.files, summary.data_rows);
//! # Ok(())
//! # }
//! ```

pub mod extract;

// Re-export commonly used types for convenience
pub use extract::{
    flatten_value, run_extraction, ExtractConfig, FlatRow, RunSummary, SqliteStore, Step,
};
