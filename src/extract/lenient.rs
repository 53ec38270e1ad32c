//! Lenient binary plist reader (D3).
//!
//! A last-resort decoder for binary plists the strict reader rejects.
//! Differences from the strict reader:
//!
//! - any `bplist` version digits are accepted
//! - set objects (marker 0xC) decode as arrays
//! - 16-byte integers are accepted (low 8 bytes kept)
//! - ASCII/UTF-16 payloads decode lossily instead of failing
//! - bytes after the offset table are ignored
//!
//! Structural corruption (bad offsets, out-of-range references, unknown
//! markers, reference cycles) is still an error: the chain records it and
//! the file falls through to the terminal load failure.

use std::time::{Duration, UNIX_EPOCH};

use byteorder::{BigEndian, ByteOrder};
use plist::{Dictionary, Uid, Value};

use crate::extract::decode::{DecodeError, BPLIST_MAGIC};

/// Seconds between the Unix epoch and the Apple epoch (2001-01-01T00:00:00Z).
pub(crate) const APPLE_EPOCH_UNIX_OFFSET: f64 = 978_307_200.0;

const TRAILER_LEN: usize = 32;
const MAX_DEPTH: usize = 512;

/// Decode a binary plist, tolerating the quirks listed in the module doc.
pub fn decode(bytes: &[u8]) -> Result<Value, DecodeError> {
    if !bytes.starts_with(BPLIST_MAGIC) {
        return Err(DecodeError::InvalidFormat(
            "missing bplist magic".to_string(),
        ));
    }
    if bytes.len() < BPLIST_MAGIC.len() + 2 + TRAILER_LEN {
        return Err(DecodeError::Truncated {
            offset: bytes.len(),
            needed: BPLIST_MAGIC.len() + 2 + TRAILER_LEN,
        });
    }

    let trailer = &bytes[bytes.len() - TRAILER_LEN..];
    let offset_size = trailer[6] as usize;
    let ref_size = trailer[7] as usize;
    let num_objects = BigEndian::read_u64(&trailer[8..16]);
    let top_object = BigEndian::read_u64(&trailer[16..24]);
    let table_offset = BigEndian::read_u64(&trailer[24..32]) as usize;

    if !(1..=8).contains(&offset_size) || !(1..=8).contains(&ref_size) {
        return Err(DecodeError::InvalidFormat(format!(
            "bad trailer sizes: offset {offset_size}, ref {ref_size}"
        )));
    }
    if num_objects == 0 {
        return Err(DecodeError::InvalidFormat("zero objects".to_string()));
    }
    // every object needs at least a marker byte
    if num_objects > bytes.len() as u64 {
        return Err(DecodeError::InvalidFormat(format!(
            "object count {num_objects} exceeds file size"
        )));
    }

    let mut offsets = Vec::with_capacity(num_objects as usize);
    for i in 0..num_objects as usize {
        let entry = table_offset + i * offset_size;
        let raw = read_slice(bytes, entry, offset_size)?;
        offsets.push(read_be_uint(raw) as usize);
    }

    let reader = Reader {
        bytes,
        offsets,
        ref_size,
    };
    let mut path = Vec::new();
    reader.parse_ref(top_object, &mut path, 0)
}

struct Reader<'a> {
    bytes: &'a [u8],
    offsets: Vec<usize>,
    ref_size: usize,
}

impl Reader<'_> {
    fn parse_ref(
        &self,
        idx: u64,
        path: &mut Vec<u64>,
        depth: usize,
    ) -> Result<Value, DecodeError> {
        if depth > MAX_DEPTH {
            return Err(DecodeError::InvalidFormat(
                "object nesting too deep".to_string(),
            ));
        }
        if path.contains(&idx) {
            return Err(DecodeError::InvalidFormat(format!(
                "cyclic reference to object {idx}"
            )));
        }
        let offset = *self
            .offsets
            .get(idx as usize)
            .ok_or(DecodeError::BadObjectRef(idx))?;

        path.push(idx);
        let value = self.parse_at(offset, path, depth);
        path.pop();
        value
    }

    fn parse_at(
        &self,
        offset: usize,
        path: &mut Vec<u64>,
        depth: usize,
    ) -> Result<Value, DecodeError> {
        let marker = read_slice(self.bytes, offset, 1)?[0];
        let low = marker & 0x0F;
        let body = offset + 1;

        match marker >> 4 {
            0x0 => match marker {
                // null and fill both stand for "no value"
                0x00 | 0x0F => Ok(Value::String(String::new())),
                0x08 => Ok(Value::Boolean(false)),
                0x09 => Ok(Value::Boolean(true)),
                _ => Err(DecodeError::InvalidFormat(format!(
                    "unknown singleton marker 0x{marker:02x}"
                ))),
            },
            0x1 => self.parse_int(body, 1usize << low),
            0x2 => self.parse_real(body, 1usize << low),
            0x3 => {
                if marker != 0x33 {
                    return Err(DecodeError::InvalidFormat(format!(
                        "unknown date marker 0x{marker:02x}"
                    )));
                }
                let raw = read_slice(self.bytes, body, 8)?;
                Ok(Value::Date(apple_date(BigEndian::read_f64(raw))?))
            }
            0x4 => {
                let (count, start) = self.count_at(low, body)?;
                let raw = read_slice(self.bytes, start, count)?;
                Ok(Value::Data(raw.to_vec()))
            }
            0x5 => {
                let (count, start) = self.count_at(low, body)?;
                let raw = read_slice(self.bytes, start, count)?;
                Ok(Value::String(String::from_utf8_lossy(raw).into_owned()))
            }
            0x6 => {
                let (count, start) = self.count_at(low, body)?;
                self.check_count(count)?;
                let raw = read_slice(self.bytes, start, count * 2)?;
                let units: Vec<u16> =
                    raw.chunks_exact(2).map(BigEndian::read_u16).collect();
                Ok(Value::String(String::from_utf16_lossy(&units)))
            }
            // 0x7 is unassigned in the format but some third-party writers
            // emit it as UTF-8
            0x7 => {
                let (count, start) = self.count_at(low, body)?;
                let raw = read_slice(self.bytes, start, count)?;
                Ok(Value::String(String::from_utf8_lossy(raw).into_owned()))
            }
            0x8 => {
                let raw = read_slice(self.bytes, body, low as usize + 1)?;
                Ok(Value::Uid(Uid::new(read_be_uint(raw))))
            }
            // arrays, and sets decoded as arrays
            0xA | 0xC => {
                let (count, start) = self.count_at(low, body)?;
                self.check_count(count)?;
                let mut items = Vec::with_capacity(count);
                for i in 0..count {
                    let r = self.object_ref(start + i * self.ref_size)?;
                    items.push(self.parse_ref(r, path, depth + 1)?);
                }
                Ok(Value::Array(items))
            }
            0xD => {
                let (count, start) = self.count_at(low, body)?;
                self.check_count(count)?;
                let values_start = start + count * self.ref_size;
                let mut dict = Dictionary::new();
                for i in 0..count {
                    let key_ref = self.object_ref(start + i * self.ref_size)?;
                    let value_ref =
                        self.object_ref(values_start + i * self.ref_size)?;
                    let key = key_text(self.parse_ref(key_ref, path, depth + 1)?);
                    let value = self.parse_ref(value_ref, path, depth + 1)?;
                    dict.insert(key, value);
                }
                Ok(Value::Dictionary(dict))
            }
            _ => Err(DecodeError::InvalidFormat(format!(
                "unknown object marker 0x{marker:02x}"
            ))),
        }
    }

    fn parse_int(&self, pos: usize, size: usize) -> Result<Value, DecodeError> {
        let raw = read_slice(self.bytes, pos, size)?;
        match size {
            1 | 2 | 4 => Ok(Value::Integer(read_be_uint(raw).into())),
            // 8-byte integers are two's-complement signed
            8 => Ok(Value::Integer(BigEndian::read_i64(raw).into())),
            // 16-byte integers: keep the low 8 bytes
            16 => Ok(Value::Integer(BigEndian::read_i64(&raw[8..16]).into())),
            _ => Err(DecodeError::InvalidFormat(format!(
                "unsupported integer width {size}"
            ))),
        }
    }

    fn parse_real(&self, pos: usize, size: usize) -> Result<Value, DecodeError> {
        let raw = read_slice(self.bytes, pos, size)?;
        match size {
            4 => Ok(Value::Real(BigEndian::read_f32(raw) as f64)),
            8 => Ok(Value::Real(BigEndian::read_f64(raw))),
            _ => Err(DecodeError::InvalidFormat(format!(
                "unsupported real width {size}"
            ))),
        }
    }

    /// Resolve a marker's count nibble, following the 0xF escape to a
    /// trailing integer. Returns the count and the payload start offset.
    fn count_at(&self, low: u8, pos: usize) -> Result<(usize, usize), DecodeError> {
        if low != 0x0F {
            return Ok((low as usize, pos));
        }
        let marker = read_slice(self.bytes, pos, 1)?[0];
        if marker >> 4 != 0x1 {
            return Err(DecodeError::InvalidFormat(
                "expected integer count after extended marker".to_string(),
            ));
        }
        let size = 1usize << (marker & 0x0F);
        if size > 8 {
            return Err(DecodeError::InvalidFormat(format!(
                "unsupported count width {size}"
            )));
        }
        let raw = read_slice(self.bytes, pos + 1, size)?;
        Ok((read_be_uint(raw) as usize, pos + 1 + size))
    }

    /// A declared element count can never exceed the file size; reject it
    /// before it feeds a length computation.
    fn check_count(&self, count: usize) -> Result<(), DecodeError> {
        if count > self.bytes.len() {
            return Err(DecodeError::InvalidFormat(format!(
                "element count {count} exceeds file size"
            )));
        }
        Ok(())
    }

    fn object_ref(&self, pos: usize) -> Result<u64, DecodeError> {
        let raw = read_slice(self.bytes, pos, self.ref_size)?;
        Ok(read_be_uint(raw))
    }
}

/// Convert an Apple-epoch timestamp to a plist date.
pub(crate) fn apple_date(secs: f64) -> Result<plist::Date, DecodeError> {
    let unix = secs + APPLE_EPOCH_UNIX_OFFSET;
    if !unix.is_finite() {
        return Err(DecodeError::InvalidFormat(format!(
            "non-finite timestamp {secs}"
        )));
    }
    let magnitude = Duration::try_from_secs_f64(unix.abs())
        .map_err(|e| DecodeError::InvalidFormat(format!("bad timestamp: {e}")))?;
    let time = if unix >= 0.0 {
        UNIX_EPOCH.checked_add(magnitude)
    } else {
        UNIX_EPOCH.checked_sub(magnitude)
    }
    .ok_or_else(|| {
        DecodeError::InvalidFormat(format!("timestamp out of range: {secs}"))
    })?;
    Ok(plist::Date::from(time))
}

/// Dictionary keys are nearly always strings; render anything else as text
/// so a malformed dictionary still decodes.
fn key_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Boolean(true) => "True".to_string(),
        Value::Boolean(false) => "False".to_string(),
        Value::Integer(n) => match n.as_signed() {
            Some(i) => i.to_string(),
            None => n.as_unsigned().map(|u| u.to_string()).unwrap_or_default(),
        },
        Value::Real(r) => r.to_string(),
        other => format!("{other:?}"),
    }
}

fn read_slice(bytes: &[u8], offset: usize, len: usize) -> Result<&[u8], DecodeError> {
    let end = offset.checked_add(len).ok_or(DecodeError::Truncated {
        offset,
        needed: len,
    })?;
    if end > bytes.len() {
        return Err(DecodeError::Truncated {
            offset,
            needed: len,
        });
    }
    Ok(&bytes[offset..end])
}

fn read_be_uint(raw: &[u8]) -> u64 {
    raw.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
}
