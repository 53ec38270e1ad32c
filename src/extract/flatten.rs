//! Flattening: turn one decoded value tree into flat path-keyed rows.
//!
//! Traversal is depth-first over an explicit work stack, so pathological
//! nesting in a corrupt input cannot overflow the call stack. The walk
//! never fails and consumes the whole tree exactly once: anything it does
//! not recognize is stringified and emitted as an opaque leaf.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use plist::Value;
use std::time::SystemTime;

use crate::extract::types::{ExtractConfig, FlatRow};

struct Frame<'a> {
    node: &'a Value,
    /// Mapping keys from the root down to this node (inclusive for mapping
    /// values, ending at the owning key for sequence elements)
    segments: Vec<String>,
    from_sequence: bool,
}

/// Flatten a value tree into rows, in document order.
pub fn flatten_value(root: &Value, config: &ExtractConfig) -> Vec<FlatRow> {
    let mut rows = Vec::new();
    let mut stack = vec![Frame {
        node: root,
        segments: Vec::new(),
        from_sequence: false,
    }];

    while let Some(frame) = stack.pop() {
        match frame.node {
            Value::Dictionary(dict) if !dict.is_empty() => {
                let pairs: Vec<_> = dict.iter().collect();
                // LIFO stack: push in reverse to emit in document order
                for (key, child) in pairs.into_iter().rev() {
                    let mut segments = frame.segments.clone();
                    segments.push(key.to_string());
                    stack.push(Frame {
                        node: child,
                        segments,
                        from_sequence: false,
                    });
                }
            }
            Value::Array(items) if !items.is_empty() => {
                // elements of a sequence share the owning key's path
                for child in items.iter().rev() {
                    stack.push(Frame {
                        node: child,
                        segments: frame.segments.clone(),
                        from_sequence: true,
                    });
                }
            }
            leaf => rows.push(leaf_row(leaf, &frame, config)),
        }
    }

    rows
}

fn leaf_row(leaf: &Value, frame: &Frame<'_>, config: &ExtractConfig) -> FlatRow {
    let value = match leaf {
        // empty containers leave an empty-valued row as evidence the key
        // existed with no content
        Value::Dictionary(_) | Value::Array(_) => String::new(),
        scalar => render_scalar(scalar),
    };

    let (key_path, key) = match frame.segments.split_last() {
        None => (String::new(), config.root_label.clone()),
        Some((own_key, ancestors)) => {
            let key_path = if frame.from_sequence {
                frame.segments.join(config.separator.as_str())
            } else {
                ancestors.join(config.separator.as_str())
            };
            (key_path, own_key.clone())
        }
    };

    FlatRow {
        key_path,
        key,
        value,
    }
}

/// Canonical text form for a scalar, stable across a run.
pub fn render_scalar(value: &Value) -> String {
    match value {
        Value::Boolean(true) => "True".to_string(),
        Value::Boolean(false) => "False".to_string(),
        Value::Integer(n) => match n.as_signed() {
            Some(i) => i.to_string(),
            None => n.as_unsigned().map(|u| u.to_string()).unwrap_or_default(),
        },
        Value::Real(r) => r.to_string(),
        Value::String(s) => s.clone(),
        Value::Date(date) => {
            DateTime::<Utc>::from(SystemTime::from(date.clone())).to_rfc3339()
        }
        Value::Data(bytes) => BASE64.encode(bytes),
        Value::Uid(uid) => format!("CF$UID({})", uid.get()),
        // plist::Value is non-exhaustive; stringify anything unknown
        other => format!("{other:?}"),
    }
}
