// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cycle-counted waiting.
//!
//! Every deadline in the tool is a number of busy-loop iterations, not a wall
//! clock time. The board calibrates one iteration to roughly 1/60 µs; the
//! conversion helpers below turn human units into iteration counts using that
//! figure.

/// Logic level of a pin.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Level {
    Low,
    High,
}

impl Level {
    pub fn from_bit(high: bool) -> Self {
        if high {
            Self::High
        } else {
            Self::Low
        }
    }

    pub fn is_low(self) -> bool {
        self == Self::Low
    }
}

impl core::ops::Not for Level {
    type Output = Self;

    fn not(self) -> Self {
        match self {
            Self::Low => Self::High,
            Self::High => Self::Low,
        }
    }
}

/// Input lines the engines watch.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Line {
    /// Chip-select of the target's boot flash, carrying its reset and
    /// handshake pulses.
    ChipSelect,
    /// SVI2 clock, sampled through a plain GPIO.
    SviClock,
    /// SVI2 data, sampled through a plain GPIO.
    SviData,
}

/// Busy-loop iterations per microsecond.
pub const ITERATIONS_PER_US: u32 = 60;

pub const fn busy_wait_us(us: u32) -> u32 {
    us * ITERATIONS_PER_US
}

pub const fn busy_wait_ns(ns: u32) -> u32 {
    ns * ITERATIONS_PER_US / 1000
}

pub const fn busy_wait_ms(ms: u32) -> u32 {
    ms * 1000 * ITERATIONS_PER_US
}

/// The busy-waiting primitives the engines are written against.
///
/// Only `sample` is required. The provided loops are correct but their
/// iteration time is whatever the compiler makes of them; boards that care
/// about calibration override `spin` and `spin_while`.
pub trait Timing {
    /// Reads the current level of `line`.
    fn sample(&self, line: Line) -> Level;

    /// One idle iteration.
    fn tick(&mut self) {
        core::hint::spin_loop();
    }

    /// Burns `cycles` iterations.
    fn spin(&mut self, cycles: u32) {
        for _ in 0..cycles {
            self.tick();
        }
    }

    /// Waits while `line` reads `level`, for at most `deadline` iterations.
    ///
    /// Returns the iterations left when the line changed, which is never 0,
    /// or 0 if the deadline ran out first. The line only counts as changed
    /// once two back-to-back reads disagree with `level`, so a single noisy
    /// sample does not end the wait.
    fn spin_while(&mut self, line: Line, level: Level, deadline: u32) -> u32 {
        let mut remaining = deadline;
        while remaining != 0 {
            if self.sample(line) != level && self.sample(line) != level {
                return remaining;
            }
            remaining -= 1;
            self.tick();
        }
        0
    }

    /// Reads `line` twice and reports low only if both reads agree.
    fn is_asserted(&self, line: Line) -> bool {
        self.sample(line).is_low() && self.sample(line).is_low()
    }
}
