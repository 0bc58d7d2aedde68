// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Types and hooks for implementing Board Support Packages (BSPs).
//!
//! The engines never touch registers. Everything they need from the hardware
//! is described by the traits in this module and in [`crate::timing`] and
//! [`crate::bus`]:
//!
//! - [`Timing`]: sampling the input lines and the calibrated busy loops,
//! - [`Svi2Bus`]: master writes and slave reads of SVI2 frames,
//! - [`Bsp`]: the trigger and reset outputs and the pin assignment,
//! - [`Console`]: the byte stream the operator types into.
//!
//! To implement a BSP:
//!
//! 1. Create a module within `bsp` named after your board, gated on its
//!    feature.
//! 2. Define a type in the module called `Board` and implement the traits
//!    above for it.
//! 3. Add a `target-board-*` feature to `Cargo.toml`.
//! 4. Add a branch to the `cfg_if` in `src/bin/svi2-glitcher.rs` to select
//!    the right `Board` type.

#[cfg(feature = "target-board-lpc55xpresso")]
pub mod lpc55xpresso;

use crate::bus::Svi2Bus;
use crate::config::{PinConfig, TriggerClass, TriggerConfig, MARKER_PULSE};
use crate::timing::{Level, Timing};

/// Requirements placed upon a BSP type.
pub trait Bsp: Timing + Svi2Bus {
    /// Routes the trigger, reset, chip-select and bus lines to the pins of
    /// `pins`, releasing whatever the previous assignment used.
    fn configure(&mut self, pins: PinConfig);

    /// One-line description of a pin assignment, for the console.
    fn describe(&self, _pins: PinConfig) -> &'static str {
        ""
    }

    /// Drives the trigger output, the side channel for a scope.
    fn set_trigger(&mut self, level: Level);

    /// Drives the target's reset line. High is released.
    fn set_reset(&mut self, level: Level);

    /// Drives the trigger output if `class` is enabled in `triggers`.
    fn trigger(&mut self, triggers: &TriggerConfig, class: TriggerClass, level: Level) {
        if triggers.enabled(class) {
            self.set_trigger(level);
        }
    }

    /// Emits a short pulse on the trigger output if `class` is enabled.
    fn marker(&mut self, triggers: &TriggerConfig, class: TriggerClass) {
        if triggers.enabled(class) {
            self.set_trigger(Level::High);
            self.spin(MARKER_PULSE);
            self.set_trigger(Level::Low);
        }
    }
}

/// The operator's serial line.
pub trait Console {
    /// Returns the next received byte, if one is waiting.
    fn read_byte(&mut self) -> Option<u8>;

    /// Blocks until `bytes` are queued for transmission.
    fn write_bytes(&mut self, bytes: &[u8]);
}

/// Adapts a [`Console`] to `core::fmt::Write`, translating `\n` into `\r\n`
/// for the terminal.
pub struct ConsoleWriter<'a, C: Console + ?Sized>(pub &'a mut C);

impl<C: Console + ?Sized> core::fmt::Write for ConsoleWriter<'_, C> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let mut rest = s;
        while let Some(i) = rest.find('\n') {
            self.0.write_bytes(rest[..i].as_bytes());
            self.0.write_bytes(b"\r\n");
            rest = &rest[i + 1..];
        }
        self.0.write_bytes(rest.as_bytes());
        Ok(())
    }
}
