//! Loader chain: multi-format plist decoding with per-decoder failure capture.
//!
//! Three decoders are tried strictly in order against the raw file bytes:
//! the XML reader, the strict binary reader, and the lenient binary reader
//! in `lenient`. The first success wins; every intermediate failure is
//! returned to the caller so it can be recorded against the file.

use std::io::Cursor;

use plist::Value;
use thiserror::Error;

use crate::extract::lenient;
use crate::extract::types::Step;

/// Magic prefix shared by every binary plist variant.
pub(crate) const BPLIST_MAGIC: &[u8] = b"bplist";

/// Failure of a single decode attempt.
///
/// Decoders return these as values rather than propagating them, so the
/// chain can inspect and record each one uniformly.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Plist(#[from] plist::Error),

    #[error("invalid binary plist: {0}")]
    InvalidFormat(String),

    #[error("truncated binary plist: need {needed} bytes at offset {offset}")]
    Truncated { offset: usize, needed: usize },

    #[error("object reference {0} out of range")]
    BadObjectRef(u64),

    #[error("keyed archive missing required key {0:?}")]
    MissingArchiveKey(&'static str),
}

/// One recorded decoder failure from a chain run.
#[derive(Debug)]
pub struct ChainFailure {
    pub step: Step,
    pub error: DecodeError,
}

/// Outcome of running the full decoder chain against one file's bytes.
#[derive(Debug)]
pub struct ChainResult {
    /// Value from the first decoder that succeeded, if any
    pub value: Option<Value>,

    /// Failures from the decoders attempted before (or without) success,
    /// in attempt order
    pub failures: Vec<ChainFailure>,
}

/// D1: XML plist reader.
pub fn decode_xml(bytes: &[u8]) -> Result<Value, DecodeError> {
    Ok(Value::from_reader_xml(Cursor::new(bytes))?)
}

/// D2: strict binary plist reader.
///
/// Gated on the `bplist` magic so the step only ever reports binary-format
/// failures, the same way the chain's XML step only reports XML ones.
pub fn decode_binary(bytes: &[u8]) -> Result<Value, DecodeError> {
    if !bytes.starts_with(BPLIST_MAGIC) {
        return Err(DecodeError::InvalidFormat(
            "missing bplist magic".to_string(),
        ));
    }
    Ok(Value::from_reader(Cursor::new(bytes))?)
}

const DECODERS: &[(Step, fn(&[u8]) -> Result<Value, DecodeError>)] = &[
    (Step::XmlPlist, decode_xml),
    (Step::BinaryPlist, decode_binary),
    (Step::LenientBplist, lenient::decode),
];

/// Try every decoder in priority order, stopping at the first success.
pub fn load_chain(bytes: &[u8]) -> ChainResult {
    let mut failures = Vec::new();

    for (step, decoder) in DECODERS {
        match decoder(bytes) {
            Ok(value) => {
                return ChainResult {
                    value: Some(value),
                    failures,
                };
            }
            Err(error) => failures.push(ChainFailure { step: *step, error }),
        }
    }

    ChainResult {
        value: None,
        failures,
    }
}
