//! Plist extraction - load heterogeneous plist files and flatten every
//! leaf value into path-keyed rows.
//!
//! The pipeline for one file: loader chain (XML, strict binary, lenient
//! binary) -> archiver resolution when the loaded tree is a keyed-archive
//! container -> flattening -> the SQLite store. Decode failures are
//! recorded per file and never stop a batch.

pub mod archiver;
pub mod decode;
pub mod flatten;
pub mod lenient;
pub mod pipeline;
pub mod sink;
pub mod types;

pub use decode::{load_chain, ChainFailure, ChainResult, DecodeError};
pub use flatten::{flatten_value, render_scalar};
pub use pipeline::{process_file, run_extraction};
pub use sink::SqliteStore;
pub use types::{ExtractConfig, FlatRow, RunSummary, Step};
