//! Pure register-block decoder
//!
//! Turns one raw block of big-endian 16-bit holding registers into a
//! [`Snapshot`] of engineering-unit measurements, following the register
//! map of the selected device family. Decoding has no side effects and
//! performs no I/O: the same words and family always produce the same
//! snapshot.

use crate::error::DecodeError;
use crate::registers::{DecodeOp, DeviceFamily, RegisterMap, SCALE_SLOTS, Scale};
use serde::Serialize;
use std::collections::BTreeMap;

/// A decoded measurement value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    /// Scaled physical quantity (A, V, W, Hz, kWh, degrees C)
    Float(f64),
    /// Raw integer, used for status codes
    Int(i64),
}

impl Value {
    /// The value as a float, if it is a scaled quantity
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(_) => None,
        }
    }

    /// The value as an integer, if it is a status code
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Float(_) => None,
            Value::Int(v) => Some(*v),
        }
    }
}

/// The complete, internally consistent set of measurements decoded from
/// one poll cycle.
///
/// Keys are exactly the keys of the active family's register map; a
/// snapshot is never partial.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Snapshot {
    values: BTreeMap<&'static str, Value>,
}

impl Snapshot {
    /// Look up a measurement by key
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Number of measurements in the snapshot
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the snapshot holds no measurements yet
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate over all key/value pairs
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &Value)> {
        self.values.iter().map(|(k, v)| (*k, v))
    }
}

/// Explicit read position over the raw word block.
///
/// Bounds are guaranteed by the up-front span check in
/// [`decode_with_map`]; the cursor itself never rechecks.
struct Cursor<'a> {
    words: &'a [u16],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(words: &'a [u16]) -> Self {
        Self { words, pos: 0 }
    }

    fn u16(&mut self) -> u16 {
        let word = self.words[self.pos];
        self.pos += 1;
        word
    }

    fn i16(&mut self) -> i16 {
        self.u16() as i16
    }

    fn u32(&mut self) -> u32 {
        let hi = self.u16() as u32;
        let lo = self.u16() as u32;
        (hi << 16) | lo
    }

    fn skip(&mut self, count: u16) {
        self.pos += count as usize;
    }
}

/// Round to `decimals` decimal places, the way the device's fixed-point
/// encoding expects
fn round_dp(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

/// Apply a SunSpec scale factor: `raw * 10^sf`, rounded to `abs(sf)`
/// decimal places
fn apply_scale_factor(raw: i64, sf: i16) -> f64 {
    round_dp(raw as f64 * 10f64.powi(sf as i32), sf.unsigned_abs() as u32)
}

/// Wh to kWh conversion used for the lifetime energy accumulator
fn energy_kwh(raw: i64) -> f64 {
    round_dp(raw as f64 * 0.001, 3)
}

/// Decode a raw register block for the given device family.
///
/// Returns [`DecodeError::TruncatedInput`] when the block is shorter
/// than the family's span; no partial snapshot is ever produced.
pub fn decode(words: &[u16], family: DeviceFamily) -> Result<Snapshot, DecodeError> {
    decode_with_map(words, family.register_map())
}

pub(crate) fn decode_with_map(
    words: &[u16],
    map: &RegisterMap,
) -> Result<Snapshot, DecodeError> {
    let required = map.required_registers();
    if words.len() < required {
        return Err(DecodeError::TruncatedInput {
            required,
            received: words.len(),
        });
    }

    let mut cursor = Cursor::new(words);
    let mut slots = [0i16; SCALE_SLOTS];
    // Fields of the current group, waiting for their trailing scale factor
    let mut pending: Vec<(&'static str, i64)> = Vec::new();
    let mut values: BTreeMap<&'static str, Value> = BTreeMap::new();

    fn place(
        values: &mut BTreeMap<&'static str, Value>,
        pending: &mut Vec<(&'static str, i64)>,
        slots: &[i16; SCALE_SLOTS],
        key: &'static str,
        raw: i64,
        scale: Scale,
    ) {
        match scale {
            Scale::Group => pending.push((key, raw)),
            Scale::Slot(slot) => {
                values.insert(key, Value::Float(apply_scale_factor(raw, slots[slot])));
            }
            Scale::EnergyKwh => {
                values.insert(key, Value::Float(energy_kwh(raw)));
            }
            Scale::None => {
                values.insert(key, Value::Int(raw));
            }
        }
    }

    for op in map.ops {
        match *op {
            DecodeOp::U16 { key, scale } => {
                let raw = cursor.u16() as i64;
                place(&mut values, &mut pending, &slots, key, raw, scale);
            }
            DecodeOp::I16 { key, scale } => {
                let raw = cursor.i16() as i64;
                place(&mut values, &mut pending, &slots, key, raw, scale);
            }
            DecodeOp::U32 { key, scale } => {
                let raw = cursor.u32() as i64;
                place(&mut values, &mut pending, &slots, key, raw, scale);
            }
            DecodeOp::ScaleFactor => {
                let sf = cursor.i16();
                for (key, raw) in pending.drain(..) {
                    values.insert(key, Value::Float(apply_scale_factor(raw, sf)));
                }
            }
            DecodeOp::CaptureScale(slot) => {
                slots[slot] = cursor.i16();
            }
            DecodeOp::Skip(count) => cursor.skip(count),
        }
    }

    Ok(Snapshot { values })
}
