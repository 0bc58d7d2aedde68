// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The glitch itself: drop the rail for `duration`, put it back, then watch
//! chip-select to find out what the target made of it.
//!
//! After the last repeat the target is expected to either be dead (no
//! chip-select activity within `ping_wait`), keep booting (one handshake
//! pulse, then quiet), or have taken the faulted path (a second pulse within
//! `success_wait`).

use crate::bsp::Bsp;
use crate::bus::BusError;
use crate::config::{Config, TriggerClass};
use crate::ringbuf::Ringbuf;
use crate::ringbuf_entry;
use crate::timing::{Level, Line};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum GlitchResult {
    /// A glitch or restore write failed. The restore was still attempted.
    Error,
    /// No sign of life on chip-select.
    TargetBroken,
    /// One handshake pulse and nothing after it.
    TargetRunning,
    /// A second pulse followed the handshake.
    Success,
}

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    Armed,
    Triggered,
    TriggerTooLong,
    Start { repeats: u32 },
    GlitchSendFailed(u32, BusError),
    RestoreFailed(BusError),
    Result(GlitchResult),
}

pub struct GlitchEngine {
    armed: bool,
    cs_was_low: bool,
    trace: Ringbuf<Trace, 32>,
}

impl GlitchEngine {
    pub const fn new() -> Self {
        Self {
            armed: false,
            cs_was_low: false,
            trace: Ringbuf::new(Trace::None),
        }
    }

    /// Glitches on the next chip-select pulse (see [`Self::poll`]).
    pub fn arm(&mut self) {
        ringbuf_entry!(self.trace, Trace::Armed);
        self.armed = true;
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Whether chip-select was low right after the rail was restored, on the
    /// last repeat of the most recent glitch.
    pub fn cs_was_low_at_glitch(&self) -> bool {
        self.cs_was_low
    }

    /// Runs a self-armed glitch if chip-select has just pulsed low.
    ///
    /// The pulse has to end within `cs_timeout`; a longer low is not a
    /// handshake, so the engine stays armed and waits for the next one.
    pub fn poll<B: Bsp + ?Sized>(
        &mut self,
        board: &mut B,
        config: &Config,
    ) -> Option<GlitchResult> {
        if !self.armed || !board.is_asserted(Line::ChipSelect) {
            return None;
        }

        let left =
            board.spin_while(Line::ChipSelect, Level::Low, config.glitch.cs_timeout);
        if left == 0 {
            ringbuf_entry!(self.trace, Trace::TriggerTooLong);
            return None;
        }

        ringbuf_entry!(self.trace, Trace::Triggered);
        self.armed = false;
        Some(self.trigger(board, config))
    }

    /// Glitches now and classifies the outcome.
    pub fn trigger<B: Bsp + ?Sized>(
        &mut self,
        board: &mut B,
        config: &Config,
    ) -> GlitchResult {
        self.cs_was_low = false;
        ringbuf_entry!(
            self.trace,
            Trace::Start {
                repeats: config.glitch.repeats
            }
        );
        let result = match self.inject(board, config) {
            Ok(()) => self.classify(board, config),
            Err(_) => GlitchResult::Error,
        };
        ringbuf_entry!(self.trace, Trace::Result(result));
        result
    }

    fn inject<B: Bsp + ?Sized>(
        &mut self,
        board: &mut B,
        config: &Config,
    ) -> Result<(), BusError> {
        let triggers = &config.trigger;

        board.trigger(triggers, TriggerClass::Glitch, Level::High);
        if let Some(pre) = config.glitch.delay.checked_sub(config.glitch.duration) {
            board.spin(pre);
        }
        board.trigger(triggers, TriggerClass::Glitch, Level::Low);

        for i in 0..config.glitch.repeats {
            let g = config.glitch.cmd;

            board.trigger(triggers, TriggerClass::Glitch, Level::High);
            if let Err(e) = board.send(g.encode(), config.bus_timeout) {
                ringbuf_entry!(self.trace, Trace::GlitchSendFailed(i, e));
                // The glitch write may have landed anyway; put both rails
                // it could have touched back, ignoring further failures.
                if g.core_enable {
                    let _ = board.send(config.core_cmd.encode(), config.bus_timeout);
                }
                if g.soc_enable {
                    let _ = board.send(config.soc_cmd.encode(), config.bus_timeout);
                }
                board.trigger(triggers, TriggerClass::Glitch, Level::Low);
                return Err(e);
            }

            board.spin(config.glitch.duration);

            if g.soc_enable {
                if let Err(e) = board.send(config.soc_cmd.encode(), config.bus_timeout) {
                    ringbuf_entry!(self.trace, Trace::RestoreFailed(e));
                    if g.core_enable {
                        let _ = board.send(config.core_cmd.encode(), config.bus_timeout);
                    }
                    board.trigger(triggers, TriggerClass::Glitch, Level::Low);
                    return Err(e);
                }
            }
            if g.core_enable {
                if let Err(e) = board.send(config.core_cmd.encode(), config.bus_timeout) {
                    ringbuf_entry!(self.trace, Trace::RestoreFailed(e));
                    board.trigger(triggers, TriggerClass::Glitch, Level::Low);
                    return Err(e);
                }
            }

            self.cs_was_low = board.sample(Line::ChipSelect).is_low();
            board.trigger(triggers, TriggerClass::Glitch, Level::Low);

            board.spin(config.glitch.cooldown);
        }

        Ok(())
    }

    fn classify<B: Bsp + ?Sized>(&mut self, board: &mut B, config: &Config) -> GlitchResult {
        let triggers = &config.trigger;

        if board.spin_while(Line::ChipSelect, Level::High, config.glitch.ping_wait) == 0 {
            board.marker(triggers, TriggerClass::GlitchBroken);
            return GlitchResult::TargetBroken;
        }

        // A low that outlasts cs_timeout was not a handshake.
        if board.spin_while(Line::ChipSelect, Level::Low, config.glitch.cs_timeout) == 0 {
            board.marker(triggers, TriggerClass::GlitchBroken);
            return GlitchResult::TargetBroken;
        }

        if board.spin_while(Line::ChipSelect, Level::High, config.glitch.success_wait) == 0 {
            board.marker(triggers, TriggerClass::GlitchRunning);
            return GlitchResult::TargetRunning;
        }

        board.marker(triggers, TriggerClass::GlitchSuccess);
        GlitchResult::Success
    }
}

impl Default for GlitchEngine {
    fn default() -> Self {
        Self::new()
    }
}
