// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A board that exists only in tests.
//!
//! Time is a virtual iteration counter. Input lines are scripted as an
//! initial level plus the absolute times at which they toggle, and every bus
//! write and output edge is logged with its timestamp.

use std::collections::VecDeque;

use svi2::Frame;

use crate::bsp::Bsp;
use crate::bus::{BusError, Svi2Bus};
use crate::config::PinConfig;
use crate::timing::{Level, Line, Timing};

/// Iterations one bus write takes.
pub const SEND_COST: u64 = 1;

#[derive(Clone, Debug)]
pub struct Waveform {
    initial: Level,
    edges: Vec<u64>,
}

impl Waveform {
    pub fn steady(level: Level) -> Self {
        Self::new(level, &[])
    }

    /// `edges` must be strictly increasing.
    pub fn new(initial: Level, edges: &[u64]) -> Self {
        assert!(edges.windows(2).all(|w| w[0] < w[1]));
        Self {
            initial,
            edges: edges.to_vec(),
        }
    }

    pub fn level_at(&self, t: u64) -> Level {
        let toggles = self.edges.iter().take_while(|&&e| e <= t).count();
        if toggles % 2 == 0 {
            self.initial
        } else {
            !self.initial
        }
    }

    fn next_edge_after(&self, t: u64) -> Option<u64> {
        self.edges.iter().copied().find(|&e| e > t)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Sent {
    pub at: u64,
    pub frame: Frame,
    pub ok: bool,
}

pub struct Sim {
    pub now: u64,
    pub cs: Waveform,
    pub clock: Waveform,
    pub data: Waveform,
    /// Every attempted write, failed ones included.
    pub sent: Vec<Sent>,
    /// Indices (into `sent`) of writes that should fail.
    pub fail_sends: Vec<usize>,
    pub rx: VecDeque<Result<Frame, BusError>>,
    pub trigger: Vec<(u64, Level)>,
    pub reset: Vec<(u64, Level)>,
    pub pins: Option<PinConfig>,
}

impl Sim {
    /// Chip-select idle high, bus idle high.
    pub fn new() -> Self {
        Self {
            now: 0,
            cs: Waveform::steady(Level::High),
            clock: Waveform::steady(Level::High),
            data: Waveform::steady(Level::High),
            sent: Vec::new(),
            fail_sends: Vec::new(),
            rx: VecDeque::new(),
            trigger: Vec::new(),
            reset: Vec::new(),
            pins: None,
        }
    }

    pub fn with_cs(mut self, cs: Waveform) -> Self {
        self.cs = cs;
        self
    }

    pub fn with_clock(mut self, clock: Waveform) -> Self {
        self.clock = clock;
        self
    }

    /// Frames that made it onto the bus, in order.
    pub fn frames(&self) -> Vec<Frame> {
        self.sent.iter().filter(|s| s.ok).map(|s| s.frame).collect()
    }

    /// Frames that were attempted, in order.
    pub fn attempts(&self) -> Vec<Frame> {
        self.sent.iter().map(|s| s.frame).collect()
    }

    fn wave(&self, line: Line) -> &Waveform {
        match line {
            Line::ChipSelect => &self.cs,
            Line::SviClock => &self.clock,
            Line::SviData => &self.data,
        }
    }
}

impl Timing for Sim {
    fn sample(&self, line: Line) -> Level {
        self.wave(line).level_at(self.now)
    }

    fn tick(&mut self) {
        self.now += 1;
    }

    fn spin(&mut self, cycles: u32) {
        self.now += u64::from(cycles);
    }

    // Jumps straight to the next edge instead of iterating, so second-long
    // deadlines cost nothing in tests.
    fn spin_while(&mut self, line: Line, level: Level, deadline: u32) -> u32 {
        if deadline == 0 {
            return 0;
        }
        let start = self.now;
        let wave = self.wave(line);
        let change = if wave.level_at(start) != level {
            Some(start)
        } else {
            wave.next_edge_after(start)
        };

        match change {
            Some(t) if t - start < u64::from(deadline) => {
                let k = t - start;
                self.now = t + 1;
                deadline - k as u32
            }
            _ => {
                self.now = start + u64::from(deadline);
                0
            }
        }
    }
}

impl Svi2Bus for Sim {
    fn send(&mut self, frame: Frame, _deadline: u32) -> Result<u32, BusError> {
        let ok = !self.fail_sends.contains(&self.sent.len());
        self.now += SEND_COST;
        self.sent.push(Sent {
            at: self.now,
            frame,
            ok,
        });
        if ok {
            Ok(0)
        } else {
            Err(BusError::ByteTimeout)
        }
    }

    fn receive(&mut self, _deadline: u32) -> Result<Frame, BusError> {
        self.rx.pop_front().unwrap_or(Err(BusError::ReceiveEmpty))
    }
}

impl Bsp for Sim {
    fn configure(&mut self, pins: PinConfig) {
        self.pins = Some(pins);
    }

    fn describe(&self, pins: PinConfig) -> &'static str {
        match pins {
            PinConfig::One => "sim pins 1",
            PinConfig::Two => "sim pins 2",
        }
    }

    fn set_trigger(&mut self, level: Level) {
        self.trigger.push((self.now, level));
    }

    fn set_reset(&mut self, level: Level) {
        self.reset.push((self.now, level));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use Level::{High, Low};

    #[test]
    fn waveform_levels() {
        let w = Waveform::new(High, &[10, 20]);
        assert_eq!(w.level_at(0), High);
        assert_eq!(w.level_at(9), High);
        assert_eq!(w.level_at(10), Low);
        assert_eq!(w.level_at(19), Low);
        assert_eq!(w.level_at(20), High);
    }

    #[test]
    fn spin_while_jumps_to_edge() {
        let mut sim = Sim::new().with_cs(Waveform::new(High, &[10]));
        assert_eq!(sim.spin_while(Line::ChipSelect, High, 100), 90);
        assert_eq!(sim.now, 11);
        assert_eq!(sim.spin_while(Line::ChipSelect, Low, 50), 0);
        assert_eq!(sim.now, 61);
    }
}
