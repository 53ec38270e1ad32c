//! NSKeyedArchiver payload resolution.
//!
//! A keyed archive stores a flat `$objects` table plus a `$top` entry map;
//! nesting is expressed through `Uid` back-references instead of direct
//! containment. This module re-decodes the original file bytes and rebuilds
//! the logical key/value structure by chasing those references, so the
//! flattener downstream only ever sees plain dictionaries and arrays.

use std::io::Cursor;

use plist::{Dictionary, Value};

use crate::extract::decode::DecodeError;
use crate::extract::flatten::render_scalar;
use crate::extract::lenient;

/// Sentinel key marking a loaded mapping as a keyed-archiver container.
pub const ARCHIVER_KEY: &str = "$archiver";

const MAX_DEPTH: usize = 512;

/// Whether a successfully loaded tree is a keyed-archiver payload that
/// must be discarded and re-decoded.
pub fn is_keyed_archive(value: &Value) -> bool {
    value
        .as_dictionary()
        .is_some_and(|dict| dict.contains_key(ARCHIVER_KEY))
}

/// Re-decode raw file bytes as a keyed archive and resolve the object graph.
///
/// The caller classifies the returned shape: a dictionary is a clean
/// result, an array is evidence of incomplete resolution, anything else is
/// a terminal load failure.
pub fn deserialize(bytes: &[u8]) -> Result<Value, DecodeError> {
    let raw = Value::from_reader(Cursor::new(bytes))
        .map_err(DecodeError::from)
        .or_else(|_| lenient::decode(bytes))?;
    resolve_archive(&raw)
}

/// Resolve an already-loaded archive container.
pub fn resolve_archive(raw: &Value) -> Result<Value, DecodeError> {
    let dict = raw
        .as_dictionary()
        .ok_or(DecodeError::MissingArchiveKey(ARCHIVER_KEY))?;
    let objects = dict
        .get("$objects")
        .and_then(Value::as_array)
        .ok_or(DecodeError::MissingArchiveKey("$objects"))?;
    let top = dict
        .get("$top")
        .and_then(Value::as_dictionary)
        .ok_or(DecodeError::MissingArchiveKey("$top"))?;

    let mut path = Vec::new();
    let mut entries: Vec<(String, Value)> = top
        .iter()
        .map(|(name, v)| (name.to_string(), resolve(objects, v, &mut path, 0)))
        .collect();

    // archives almost always carry a single "root" entry; unwrap it so the
    // flattened paths start at the archived object itself
    if entries.len() == 1 {
        return Ok(entries.remove(0).1);
    }
    let mut out = Dictionary::new();
    for (name, value) in entries {
        out.insert(name, value);
    }
    Ok(Value::Dictionary(out))
}

fn resolve(objects: &[Value], value: &Value, path: &mut Vec<u64>, depth: usize) -> Value {
    if depth > MAX_DEPTH {
        return Value::String("<nesting too deep>".to_string());
    }
    match value {
        Value::Uid(uid) => {
            let idx = uid.get();
            if path.contains(&idx) {
                return Value::String(format!("<cycle ref {idx}>"));
            }
            match objects.get(idx as usize) {
                None => Value::String(format!("<missing object {idx}>")),
                Some(target) => {
                    path.push(idx);
                    let resolved = resolve(objects, target, path, depth + 1);
                    path.pop();
                    resolved
                }
            }
        }
        Value::Dictionary(dict) => resolve_instance(objects, dict, path, depth),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| resolve(objects, item, path, depth + 1))
                .collect(),
        ),
        Value::String(s) if s == "$null" => Value::String(String::new()),
        other => other.clone(),
    }
}

/// Rebuild one archived object. Known container/wrapper encodings get their
/// logical shape back; anything else keeps its fields with `$class` dropped.
fn resolve_instance(
    objects: &[Value],
    dict: &Dictionary,
    path: &mut Vec<u64>,
    depth: usize,
) -> Value {
    if dict.contains_key("$class") {
        // NSDictionary / NSMutableDictionary
        if let (Some(keys), Some(values)) = (
            dict.get("NS.keys").and_then(Value::as_array),
            dict.get("NS.objects").and_then(Value::as_array),
        ) {
            let mut out = Dictionary::new();
            for (key, value) in keys.iter().zip(values.iter()) {
                let key = key_text(resolve(objects, key, path, depth + 1));
                out.insert(key, resolve(objects, value, path, depth + 1));
            }
            return Value::Dictionary(out);
        }
        // NSArray / NSSet / NSOrderedSet
        if let Some(items) = dict.get("NS.objects").and_then(Value::as_array) {
            return Value::Array(
                items
                    .iter()
                    .map(|item| resolve(objects, item, path, depth + 1))
                    .collect(),
            );
        }
        // NSMutableString / NSAttributedString carrier
        if let Some(s) = dict.get("NS.string") {
            return resolve(objects, s, path, depth + 1);
        }
        // NSMutableData
        if let Some(data) = dict.get("NS.data") {
            return resolve(objects, data, path, depth + 1);
        }
        // NSDate
        if let Some(time) = dict.get("NS.time") {
            let resolved = resolve(objects, time, path, depth + 1);
            if let Some(secs) = resolved.as_real() {
                if let Ok(date) = lenient::apple_date(secs) {
                    return Value::Date(date);
                }
            }
            return resolved;
        }
        // NSURL
        if let Some(relative) = dict.get("NS.relative") {
            let relative = text_of(resolve(objects, relative, path, depth + 1));
            let base = dict
                .get("NS.base")
                .map(|b| text_of(resolve(objects, b, path, depth + 1)))
                .unwrap_or_default();
            return Value::String(format!("{base}{relative}"));
        }
    }

    let mut out = Dictionary::new();
    for (key, value) in dict.iter() {
        let key = key.to_string();
        if key == "$class" {
            continue;
        }
        out.insert(key, resolve(objects, value, path, depth + 1));
    }
    Value::Dictionary(out)
}

fn key_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => render_scalar(&other),
    }
}

fn text_of(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => render_scalar(&other),
    }
}
