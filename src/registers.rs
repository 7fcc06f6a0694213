//! Static SunSpec register maps for the supported inverter families
//!
//! Each family is described as an ordered list of [`DecodeOp`] entries
//! consumed strictly left-to-right by the decoder. Adding a new family
//! means adding a new table here; the decode loop itself never changes.

use crate::error::DecodeError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Supported inverter families, selected by configuration.
///
/// The selector determines which register map is applied; it is normally
/// obtained during the host's device-identity bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceFamily {
    /// Three-phase inverter with dual MPPT trackers (ABB/FIMER PVI style)
    ThreePhase,
    /// Single-string inverter with apparent/reactive power and power factor
    SingleString,
}

impl DeviceFamily {
    /// The compiled-in register map for this family
    pub fn register_map(self) -> &'static RegisterMap {
        match self {
            DeviceFamily::ThreePhase => &THREE_PHASE,
            DeviceFamily::SingleString => &SINGLE_STRING,
        }
    }

    /// Stable identifier used in configuration files and logs
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceFamily::ThreePhase => "three_phase",
            DeviceFamily::SingleString => "single_string",
        }
    }
}

impl FromStr for DeviceFamily {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "three_phase" => Ok(DeviceFamily::ThreePhase),
            "single_string" => Ok(DeviceFamily::SingleString),
            other => Err(DecodeError::UnsupportedFamily {
                name: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for DeviceFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a decoded raw field is rescaled into engineering units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scale {
    /// Raw integer published as-is (status codes)
    None,
    /// Scaled by the trailing scale-factor register of the current group
    Group,
    /// Scaled by a scale factor captured earlier via [`DecodeOp::CaptureScale`]
    Slot(usize),
    /// Energy accumulator: fixed Wh to kWh conversion, 3 decimal places
    EnergyKwh,
}

/// One step of the left-to-right register walk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeOp {
    /// 16-bit unsigned value (1 register)
    U16 { key: &'static str, scale: Scale },
    /// 16-bit signed value (1 register), two's complement
    I16 { key: &'static str, scale: Scale },
    /// 32-bit unsigned value (2 registers), high word first
    U32 { key: &'static str, scale: Scale },
    /// Trailing 16-bit signed scale factor; applies to every pending
    /// `Scale::Group` field decoded since the previous flush
    ScaleFactor,
    /// 16-bit signed scale factor stored into a slot for later
    /// `Scale::Slot(..)` fields
    CaptureScale(usize),
    /// Discard registers with no defined field (reserved/vendor ranges)
    Skip(u16),
}

/// Number of scale-factor slots a map may capture
pub const SCALE_SLOTS: usize = 3;

/// Ordered register layout of one device family
#[derive(Debug)]
pub struct RegisterMap {
    /// First holding register of the block read each cycle
    pub base_address: u16,
    /// Registers requested per read; equals the span of `ops`
    pub register_count: u16,
    /// Decode steps, consumed strictly in order
    pub ops: &'static [DecodeOp],
}

impl RegisterMap {
    /// Registers consumed by the full op sequence
    pub fn required_registers(&self) -> usize {
        self.ops
            .iter()
            .map(|op| match op {
                DecodeOp::U16 { .. } | DecodeOp::I16 { .. } => 1,
                DecodeOp::U32 { .. } => 2,
                DecodeOp::ScaleFactor | DecodeOp::CaptureScale(_) => 1,
                DecodeOp::Skip(n) => *n as usize,
            })
            .sum()
    }

    /// Measurement keys published by this map, in decode order
    pub fn keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.ops.iter().filter_map(|op| match op {
            DecodeOp::U16 { key, .. }
            | DecodeOp::I16 { key, .. }
            | DecodeOp::U32 { key, .. } => Some(*key),
            _ => None,
        })
    }
}

use DecodeOp::{CaptureScale, I16, ScaleFactor, Skip, U16, U32};
use Scale::{EnergyKwh, Group, Slot};

/// Three-phase dual-MPPT layout (registers 72..=255).
///
/// Mirrors the SunSpec inverter model as exposed by ABB/FIMER PVI
/// three-phase units: AC current and voltage groups with trailing scale
/// factors, power/frequency/energy, cabinet temperature, status pair,
/// then the per-tracker DC groups whose scale factors sit in a block of
/// their own before the tracker values.
static THREE_PHASE: RegisterMap = RegisterMap {
    base_address: 72,
    register_count: 184,
    ops: &[
        // 72..=76: total and per-phase AC current
        U16 { key: "ac_current", scale: Group },
        U16 { key: "ac_current_a", scale: Group },
        U16 { key: "ac_current_b", scale: Group },
        U16 { key: "ac_current_c", scale: Group },
        ScaleFactor,
        // 77..=83: line-to-line and line-to-neutral AC voltage
        U16 { key: "ac_voltage_ab", scale: Group },
        U16 { key: "ac_voltage_bc", scale: Group },
        U16 { key: "ac_voltage_ca", scale: Group },
        U16 { key: "ac_voltage_an", scale: Group },
        U16 { key: "ac_voltage_bn", scale: Group },
        U16 { key: "ac_voltage_cn", scale: Group },
        ScaleFactor,
        // 84..=85
        I16 { key: "ac_power", scale: Group },
        ScaleFactor,
        // 86..=87
        U16 { key: "ac_frequency", scale: Group },
        ScaleFactor,
        // 88..=93: apparent/reactive power block, not exposed by this family
        Skip(6),
        // 94..=96: lifetime energy in Wh; the trailing Wh scale factor is
        // ignored, energy is always published in kWh
        U32 { key: "ac_energy", scale: EnergyKwh },
        Skip(1),
        // 97..=100: DC current/voltage slots unused on this family
        Skip(4),
        // 101..=102
        I16 { key: "dc_power", scale: Group },
        ScaleFactor,
        // 103..=107: cabinet temperature; its scale factor trails at 107
        I16 { key: "temp_cab", scale: Group },
        Skip(3),
        ScaleFactor,
        // 108..=109
        I16 { key: "status", scale: Scale::None },
        I16 { key: "status_vendor", scale: Scale::None },
        // 110..=124: vendor event bitfields
        Skip(15),
        // 125..=127: DC scale factors shared by both MPPT trackers
        CaptureScale(0),
        CaptureScale(1),
        CaptureScale(2),
        // 128..=140
        Skip(13),
        // 141..=143: MPPT tracker 1
        U16 { key: "dc1_current", scale: Slot(0) },
        U16 { key: "dc1_voltage", scale: Slot(1) },
        U16 { key: "dc1_power", scale: Slot(2) },
        // 144..=160
        Skip(17),
        // 161..=163: MPPT tracker 2
        U16 { key: "dc2_current", scale: Slot(0) },
        U16 { key: "dc2_voltage", scale: Slot(1) },
        U16 { key: "dc2_power", scale: Slot(2) },
        // 164..=255: remainder of the model block
        Skip(92),
    ],
};

/// Single-string layout (registers 72..=109).
///
/// Adds the apparent power, reactive power and power factor groups and
/// has a single DC input instead of per-tracker groups.
static SINGLE_STRING: RegisterMap = RegisterMap {
    base_address: 72,
    register_count: 38,
    ops: &[
        // 72..=76
        U16 { key: "ac_current", scale: Group },
        U16 { key: "ac_current_a", scale: Group },
        U16 { key: "ac_current_b", scale: Group },
        U16 { key: "ac_current_c", scale: Group },
        ScaleFactor,
        // 77..=83
        U16 { key: "ac_voltage_ab", scale: Group },
        U16 { key: "ac_voltage_bc", scale: Group },
        U16 { key: "ac_voltage_ca", scale: Group },
        U16 { key: "ac_voltage_an", scale: Group },
        U16 { key: "ac_voltage_bn", scale: Group },
        U16 { key: "ac_voltage_cn", scale: Group },
        ScaleFactor,
        // 84..=85
        I16 { key: "ac_power", scale: Group },
        ScaleFactor,
        // 86..=87
        U16 { key: "ac_frequency", scale: Group },
        ScaleFactor,
        // 88..=89
        I16 { key: "ac_apparent_power", scale: Group },
        ScaleFactor,
        // 90..=91
        I16 { key: "ac_reactive_power", scale: Group },
        ScaleFactor,
        // 92..=93
        I16 { key: "ac_power_factor", scale: Group },
        ScaleFactor,
        // 94..=96: lifetime energy in Wh, published in kWh
        U32 { key: "ac_energy", scale: EnergyKwh },
        Skip(1),
        // 97..=98
        U16 { key: "dc_current", scale: Group },
        ScaleFactor,
        // 99..=100
        U16 { key: "dc_voltage", scale: Group },
        ScaleFactor,
        // 101..=102
        I16 { key: "dc_power", scale: Group },
        ScaleFactor,
        // 103: cabinet temperature, not exposed on this family
        Skip(1),
        // 104..=107: heat sink temperature; scale factor trails at 107
        I16 { key: "temp_sink", scale: Group },
        Skip(2),
        ScaleFactor,
        // 108..=109
        I16 { key: "status", scale: Scale::None },
        I16 { key: "status_vendor", scale: Scale::None },
    ],
};

/// Human-readable description for a SunSpec operating status code
pub fn status_description(code: i64) -> Option<&'static str> {
    match code {
        1 => Some("Off"),
        2 => Some("Sleeping (auto-shutdown) - Night mode"),
        3 => Some("Grid Monitoring/wake-up"),
        4 => Some("Inverter is ON and producing power"),
        5 => Some("Production (curtailed)"),
        6 => Some("Shutting down"),
        7 => Some("Fault"),
        8 => Some("Maintenance/setup"),
        _ => None,
    }
}
