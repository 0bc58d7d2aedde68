// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Glitching at a fixed point in the target's boot.
//!
//! Once armed, the sequencer waits for the target to power off, then for the
//! first chip-select pulse of the next boot. From there it counts `waits`
//! low/high pulse pairs, each bounded so a stalled boot aborts rather than
//! glitching at the wrong moment, and glitches right after the last one.

use crate::bsp::Bsp;
use crate::config::{Config, TriggerClass};
use crate::glitch::{GlitchEngine, GlitchResult};
use crate::restart::RestartMonitor;
use crate::ringbuf::Ringbuf;
use crate::ringbuf_entry;
use crate::timing::{Level, Line};

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum AttackState {
    #[default]
    Disarmed,
    /// Armed; the target has not been seen off yet.
    WaitingOff,
    /// The target was off; waiting for chip-select.
    WaitingTrigger,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AttackOutcome {
    /// Chip-select stayed low past `cs_low_max` on pulse `pulse`.
    CsLowTooLong { pulse: u32 },
    /// Chip-select stayed high past `cs_high_max` after pulse `pulse`.
    CsHighTooLong { pulse: u32 },
    Glitched {
        result: GlitchResult,
        cs_was_low: bool,
    },
}

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    Armed,
    SawTargetOff,
    Triggered,
    Outcome(AttackOutcome),
}

pub struct AttackSequencer {
    state: AttackState,
    trace: Ringbuf<Trace, 16>,
}

impl AttackSequencer {
    pub const fn new() -> Self {
        Self {
            state: AttackState::Disarmed,
            trace: Ringbuf::new(Trace::None),
        }
    }

    pub fn state(&self) -> AttackState {
        self.state
    }

    pub fn arm(&mut self) {
        ringbuf_entry!(self.trace, Trace::Armed);
        self.state = AttackState::WaitingOff;
    }

    pub fn poll<B: Bsp + ?Sized>(
        &mut self,
        board: &mut B,
        config: &Config,
        restart: &RestartMonitor,
        glitch: &mut GlitchEngine,
    ) -> Option<AttackOutcome> {
        match self.state {
            AttackState::Disarmed => None,
            AttackState::WaitingOff => {
                if restart.is_off() {
                    ringbuf_entry!(self.trace, Trace::SawTargetOff);
                    self.state = AttackState::WaitingTrigger;
                }
                None
            }
            AttackState::WaitingTrigger => {
                if !board.is_asserted(Line::ChipSelect) {
                    return None;
                }
                ringbuf_entry!(self.trace, Trace::Triggered);
                let outcome = self.run(board, config, glitch);
                ringbuf_entry!(self.trace, Trace::Outcome(outcome));
                Some(outcome)
            }
        }
    }

    fn run<B: Bsp + ?Sized>(
        &mut self,
        board: &mut B,
        config: &Config,
        glitch: &mut GlitchEngine,
    ) -> AttackOutcome {
        let triggers = &config.trigger;
        // One shot, whatever the outcome.
        self.state = AttackState::Disarmed;
        board.trigger(triggers, TriggerClass::Attack, Level::High);

        for pulse in 0..config.attack.waits {
            let left =
                board.spin_while(Line::ChipSelect, Level::Low, config.attack.cs_low_max);
            board.trigger(triggers, TriggerClass::Attack, Level::Low);
            if left == 0 {
                return AttackOutcome::CsLowTooLong { pulse };
            }

            let left =
                board.spin_while(Line::ChipSelect, Level::High, config.attack.cs_high_max);
            board.trigger(triggers, TriggerClass::Attack, Level::High);
            if left == 0 {
                board.trigger(triggers, TriggerClass::Attack, Level::Low);
                return AttackOutcome::CsHighTooLong { pulse };
            }
        }
        board.trigger(triggers, TriggerClass::Attack, Level::Low);

        let result = glitch.trigger(board, config);
        AttackOutcome::Glitched {
            result,
            cs_was_low: glitch.cs_was_low_at_glitch(),
        }
    }
}

impl Default for AttackSequencer {
    fn default() -> Self {
        Self::new()
    }
}
