//! `svi2`: the command word of the AMD SVI2 voltage regulator bus.
//!
//! An SVI2 command is a single bus write: a 7-bit address followed by two
//! payload bytes. The address selects which rails (core, SoC or both) the
//! command applies to; the payload carries the VID code (the requested
//! voltage) and a handful of trim and power-state fields.
//!
//! This crate converts between the logical [`Command`] and its [`Frame`] on
//! the wire. Both directions are total: every `Command` encodes, every frame
//! decodes, and `Command::decode(c.encode()) == c`.

#![no_std]

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use static_assertions::const_assert;
use zerocopy::{byteorder::BigEndian, AsBytes, U16};

/// Fixed bits 2-6 of every SVI2 address.
pub const CONSTANT: u8 = 0b11000;

const SOC_BIT: u8 = 0;
const CORE_BIT: u8 = 1;
const CONSTANT_SHIFT: u8 = 2;
const CONSTANT_MASK: u8 = 0b1_1111;

const OFFSET_SHIFT: u16 = 0;
const OFFSET_MASK: u16 = 0b11;
const LOAD_LINE_SHIFT: u16 = 2;
const LOAD_LINE_MASK: u16 = 0b111;
const TELEMETRY_BIT: u16 = 5;
const POWER_LO_BIT: u16 = 6;
const VID_SHIFT: u16 = 7;
const VID_MASK: u16 = 0xff;
const POWER_HI_BIT: u16 = 15;

// The payload fields tile the 16-bit word without gaps.
const_assert!(OFFSET_SHIFT + 2 == LOAD_LINE_SHIFT);
const_assert!(LOAD_LINE_SHIFT + 3 == TELEMETRY_BIT);
const_assert!(TELEMETRY_BIT + 1 == POWER_LO_BIT);
const_assert!(POWER_LO_BIT + 1 == VID_SHIFT);
const_assert!(VID_SHIFT + 8 == POWER_HI_BIT);
const_assert!(CONSTANT_SHIFT as u32 + 5 == 7);

/// VID codes at or above this value switch the rail off.
pub const VID_OFF: u8 = 0xf9;

/// Offset trim applied on top of the VID voltage.
#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
#[repr(u8)]
pub enum OffsetTrim {
    Off = 0,
    Minus25mV = 1,
    NoChange = 2,
    Plus25mV = 3,
}

impl OffsetTrim {
    pub const ALL: [Self; 4] =
        [Self::Off, Self::Minus25mV, Self::NoChange, Self::Plus25mV];

    pub fn name(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Minus25mV => "-25mV",
            Self::NoChange => "no_change",
            Self::Plus25mV => "+25mV",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.name() == name)
    }
}

/// Load line slope trim.
#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
#[repr(u8)]
pub enum LoadLineSlopeTrim {
    Off = 0,
    Minus40 = 1,
    Minus20 = 2,
    NoChange = 3,
    Plus20 = 4,
    Plus40 = 5,
    Plus60 = 6,
    Plus80 = 7,
}

impl LoadLineSlopeTrim {
    pub const ALL: [Self; 8] = [
        Self::Off,
        Self::Minus40,
        Self::Minus20,
        Self::NoChange,
        Self::Plus20,
        Self::Plus40,
        Self::Plus60,
        Self::Plus80,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Minus40 => "-40%",
            Self::Minus20 => "-20%",
            Self::NoChange => "no_change",
            Self::Plus20 => "+20%",
            Self::Plus40 => "+40%",
            Self::Plus60 => "+60%",
            Self::Plus80 => "+80%",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.name() == name)
    }
}

/// Power state requested from the regulator. On the wire the two bits are
/// split: bit 0 is payload bit 6 and bit 1 is payload bit 15.
#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
#[repr(u8)]
pub enum PowerLevel {
    Low = 0,
    Mid = 1,
    FullAlt = 2,
    Full = 3,
}

impl PowerLevel {
    pub const ALL: [Self; 4] = [Self::Low, Self::Mid, Self::FullAlt, Self::Full];

    pub fn name(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Mid => "mid",
            Self::FullAlt => "full_alt",
            Self::Full => "full",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.name() == name)
    }
}

/// One SVI2 bus write as it appears on the wire.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Frame {
    /// 7-bit bus address; bit 7 is never set by `encode`.
    pub address: u8,
    pub payload: u16,
}

impl Frame {
    pub const fn new(address: u8, payload: u16) -> Self {
        Self { address, payload }
    }

    /// The payload bytes in transmission order (high byte first).
    pub fn wire_payload(&self) -> [u8; 2] {
        let word = U16::<BigEndian>::new(self.payload);
        let mut out = [0; 2];
        out.copy_from_slice(word.as_bytes());
        out
    }

    /// Rebuilds a frame from bytes captured on the bus. `raw_address` is the
    /// first byte of the transfer, still carrying the direction bit in its
    /// LSB.
    pub fn from_wire(raw_address: u8, payload: [u8; 2]) -> Self {
        let mut word = U16::<BigEndian>::new(0);
        word.as_bytes_mut().copy_from_slice(&payload);
        Self {
            address: raw_address >> 1,
            payload: word.get(),
        }
    }
}

/// A logical SVI2 command.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Command {
    pub offset_trim: OffsetTrim,
    pub load_line_slope_trim: LoadLineSlopeTrim,
    pub telemetry_enable: bool,
    pub power_level: PowerLevel,
    /// 0 is the highest voltage; larger codes step down by 6.25 mV.
    pub vid_code: u8,
    pub soc_enable: bool,
    pub core_enable: bool,
}

impl Command {
    /// A command that addresses no rail and changes nothing but the VID,
    /// which is set to "off". Real commands are built from this.
    pub const BASE: Self = Self {
        offset_trim: OffsetTrim::NoChange,
        load_line_slope_trim: LoadLineSlopeTrim::NoChange,
        telemetry_enable: false,
        power_level: PowerLevel::Full,
        vid_code: 0xff,
        soc_enable: false,
        core_enable: false,
    };

    pub const fn with_core(self, on: bool) -> Self {
        Self { core_enable: on, ..self }
    }

    pub const fn with_soc(self, on: bool) -> Self {
        Self { soc_enable: on, ..self }
    }

    pub const fn with_vid(self, vid_code: u8) -> Self {
        Self { vid_code, ..self }
    }

    pub const fn with_telemetry(self, on: bool) -> Self {
        Self { telemetry_enable: on, ..self }
    }

    pub const fn with_power_level(self, level: PowerLevel) -> Self {
        Self { power_level: level, ..self }
    }

    pub const fn with_load_line(self, trim: LoadLineSlopeTrim) -> Self {
        Self { load_line_slope_trim: trim, ..self }
    }

    pub const fn with_offset(self, trim: OffsetTrim) -> Self {
        Self { offset_trim: trim, ..self }
    }

    /// Packs the command into a frame. The constant address bits are always
    /// written, whatever the command was decoded from.
    pub fn encode(&self) -> Frame {
        let address = (CONSTANT << CONSTANT_SHIFT)
            | (u8::from(self.core_enable) << CORE_BIT)
            | (u8::from(self.soc_enable) << SOC_BIT);

        let power = self.power_level as u16;
        let payload = ((self.offset_trim as u16) << OFFSET_SHIFT)
            | ((self.load_line_slope_trim as u16) << LOAD_LINE_SHIFT)
            | (u16::from(self.telemetry_enable) << TELEMETRY_BIT)
            | ((power & 1) << POWER_LO_BIT)
            | (u16::from(self.vid_code) << VID_SHIFT)
            | ((power >> 1) << POWER_HI_BIT);

        Frame::new(address, payload)
    }

    /// Unpacks a frame. The constant address bits are not checked.
    pub fn decode(frame: Frame) -> Self {
        let p = frame.payload;
        let power = ((p >> POWER_LO_BIT) & 1) | (((p >> POWER_HI_BIT) & 1) << 1);

        // Every field is masked to its width, so the lookups below cannot
        // miss; the fallbacks only keep this total.
        Self {
            offset_trim: OffsetTrim::from_u16((p >> OFFSET_SHIFT) & OFFSET_MASK)
                .unwrap_or(OffsetTrim::NoChange),
            load_line_slope_trim: LoadLineSlopeTrim::from_u16(
                (p >> LOAD_LINE_SHIFT) & LOAD_LINE_MASK,
            )
            .unwrap_or(LoadLineSlopeTrim::NoChange),
            telemetry_enable: (p >> TELEMETRY_BIT) & 1 != 0,
            power_level: PowerLevel::from_u16(power).unwrap_or(PowerLevel::Full),
            vid_code: ((p >> VID_SHIFT) & VID_MASK) as u8,
            soc_enable: (frame.address >> SOC_BIT) & 1 != 0,
            core_enable: (frame.address >> CORE_BIT) & 1 != 0,
        }
    }

    /// Whether the frame's address carries the fixed SVI2 pattern.
    pub fn has_constant(frame: Frame) -> bool {
        (frame.address >> CONSTANT_SHIFT) & CONSTANT_MASK == CONSTANT
    }

    /// Requested voltage in microvolts, or `None` if the VID code turns the
    /// rail off.
    pub fn microvolts(&self) -> Option<u32> {
        if self.vid_code >= VID_OFF {
            None
        } else {
            Some(1_550_000 - 6_250 * u32::from(self.vid_code))
        }
    }
}

impl Default for Command {
    fn default() -> Self {
        Self::BASE
    }
}
