// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Target power-state tracking and the regulator boot sequence.
//!
//! While the target is powered its regulator bus is busy and the watched
//! line idles high; when it is off the line sits low. The monitor turns those
//! levels into `DutRunning`/`DutOff` with hysteresis (`wait_off`, `wait_on`)
//! and, every time the target comes back, replays the SoC and core boot
//! commands so the regulator starts from a known state.

use crate::bsp::Bsp;
use crate::bus::{wait_for_free_bus, BusError};
use crate::config::{Config, TriggerClass};
use crate::ringbuf::Ringbuf;
use crate::ringbuf_entry;
use crate::timing::Level;

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum RestartState {
    DetectionOff = 0,
    DutRunning = 1,
    #[default]
    DutOff = 2,
}

/// Something worth telling the operator about.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RestartEvent {
    /// The target's line stayed low for `wait_off`.
    TargetOff,
    /// The target came back and the boot commands were sent.
    Restarted(RestartReport),
}

/// Outcome of one boot command sequence.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RestartReport {
    pub soc: Result<u32, BusError>,
    pub core: Result<u32, BusError>,
    /// Whether the core command carried the telemetry bit.
    pub telemetry_disabled: bool,
}

impl RestartReport {
    pub fn is_ok(&self) -> bool {
        self.soc.is_ok() && self.core.is_ok()
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    TargetOff,
    RestartDetected,
    SocSent(Result<u32, BusError>),
    CoreSent(Result<u32, BusError>),
    DetectionChanged(bool),
    Reset(u32),
}

pub struct RestartMonitor {
    state: RestartState,
    trace: Ringbuf<Trace, 16>,
}

impl RestartMonitor {
    pub const fn new() -> Self {
        Self {
            state: RestartState::DutOff,
            trace: Ringbuf::new(Trace::None),
        }
    }

    pub fn state(&self) -> RestartState {
        self.state
    }

    pub fn is_off(&self) -> bool {
        self.state == RestartState::DutOff
    }

    /// Turns detection on or off. Turning it on from off always lands in
    /// `DutOff`; turning it on while already detecting changes nothing.
    pub fn set_detection(&mut self, on: bool) {
        ringbuf_entry!(self.trace, Trace::DetectionChanged(on));
        if !on {
            self.state = RestartState::DetectionOff;
        } else if self.state == RestartState::DetectionOff {
            self.state = RestartState::DutOff;
        }
    }

    /// Returns to the power-on state.
    pub fn reset_detection(&mut self) {
        self.state = RestartState::default();
    }

    /// Watches the target for one window and acts on a transition.
    pub fn poll<B: Bsp + ?Sized>(
        &mut self,
        board: &mut B,
        config: &Config,
    ) -> Option<RestartEvent> {
        let line = config.restart.line;
        match self.state {
            RestartState::DetectionOff => None,
            RestartState::DutRunning => {
                if board.spin_while(line, Level::Low, config.restart.wait_off) != 0 {
                    // Only a short low; still running.
                    return None;
                }
                ringbuf_entry!(self.trace, Trace::TargetOff);
                self.state = RestartState::DutOff;
                Some(RestartEvent::TargetOff)
            }
            RestartState::DutOff => {
                if board.spin_while(line, Level::High, config.restart.wait_on) != 0 {
                    return None;
                }
                ringbuf_entry!(self.trace, Trace::RestartDetected);
                self.state = RestartState::DutRunning;

                board.trigger(&config.trigger, TriggerClass::Restart, Level::High);
                board.spin(config.restart.delay);
                board.trigger(&config.trigger, TriggerClass::Restart, Level::Low);

                Some(RestartEvent::Restarted(self.restart(board, config)))
            }
        }
    }

    /// Sends the SoC and then the core boot command. Both are always
    /// attempted.
    pub fn restart<B: Bsp + ?Sized>(
        &mut self,
        board: &mut B,
        config: &Config,
    ) -> RestartReport {
        board.trigger(&config.trigger, TriggerClass::Restart, Level::High);

        wait_for_free_bus(board);
        let soc = board.send(config.soc_cmd.encode(), config.bus_timeout);
        ringbuf_entry!(self.trace, Trace::SocSent(soc));

        let telemetry_disabled = config.restart.disable_telemetry;
        let mut core_cmd = config.core_cmd;
        if telemetry_disabled {
            core_cmd.telemetry_enable = true;
        }

        wait_for_free_bus(board);
        let core = board.send(core_cmd.encode(), config.bus_timeout);
        ringbuf_entry!(self.trace, Trace::CoreSent(core));

        board.trigger(&config.trigger, TriggerClass::Restart, Level::Low);

        RestartReport {
            soc,
            core,
            telemetry_disabled,
        }
    }

    /// Holds the target in reset for `reset_len`.
    pub fn reset_target<B: Bsp + ?Sized>(&mut self, board: &mut B, config: &Config) {
        ringbuf_entry!(self.trace, Trace::Reset(config.restart.reset_len));
        board.set_reset(Level::Low);
        board.spin(config.restart.reset_len);
        board.set_reset(Level::High);
    }
}

impl Default for RestartMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{Sim, Waveform};
    use svi2::Command;
    use Level::{High, Low};

    fn config() -> Config {
        let mut c = Config::new();
        c.restart.wait_on = 100;
        c.restart.wait_off = 200;
        c.restart.delay = 50;
        c
    }

    fn running(sim: &mut Sim, config: &Config) -> RestartMonitor {
        let mut m = RestartMonitor::new();
        assert!(matches!(m.poll(sim, config), Some(RestartEvent::Restarted(_))));
        assert_eq!(m.state(), RestartState::DutRunning);
        sim.sent.clear();
        m
    }

    #[test]
    fn starts_off() {
        let m = RestartMonitor::new();
        assert_eq!(m.state(), RestartState::DutOff);
        assert!(m.is_off());
    }

    #[test]
    fn detection_off_is_inert() {
        let config = config();
        let mut sim = Sim::new();
        let mut m = RestartMonitor::new();
        m.set_detection(false);

        assert_eq!(m.poll(&mut sim, &config), None);
        assert_eq!(sim.now, 0);
        assert!(sim.sent.is_empty());
    }

    #[test]
    fn restart_sends_soc_then_core() {
        let config = config();
        let mut sim = Sim::new();
        let mut m = RestartMonitor::new();

        let Some(RestartEvent::Restarted(report)) = m.poll(&mut sim, &config) else {
            panic!("no restart");
        };
        assert!(report.is_ok());
        assert!(report.telemetry_disabled);
        assert_eq!(m.state(), RestartState::DutRunning);

        let frames = sim.frames();
        assert_eq!(frames.len(), 2);
        assert_eq!(Command::decode(frames[0]), config.soc_cmd);
        let core = Command::decode(frames[1]);
        assert_eq!(core, config.core_cmd.with_telemetry(true));

        // The delay elapsed before the first write.
        assert!(sim.sent[0].at >= u64::from(config.restart.wait_on + config.restart.delay));
    }

    #[test]
    fn telemetry_left_alone_when_not_disabled() {
        let mut config = config();
        config.restart.disable_telemetry = false;
        let mut sim = Sim::new();
        let mut m = RestartMonitor::new();

        m.poll(&mut sim, &config);
        assert_eq!(Command::decode(sim.frames()[1]), config.core_cmd);
    }

    #[test]
    fn both_sends_attempted_after_a_failure() {
        let config = config();
        let mut sim = Sim::new();
        sim.fail_sends = vec![0];
        let mut m = RestartMonitor::new();

        let report = m.restart(&mut sim, &config);
        assert!(report.soc.is_err());
        assert!(report.core.is_ok());
        assert!(!report.is_ok());
        assert_eq!(sim.attempts().len(), 2);
    }

    #[test]
    fn short_high_keeps_target_off() {
        let config = config();
        // High for 40 iterations, then low again.
        let mut sim = Sim::new().with_clock(Waveform::new(High, &[40]));
        let mut m = RestartMonitor::new();

        assert_eq!(m.poll(&mut sim, &config), None);
        assert_eq!(m.state(), RestartState::DutOff);
        assert!(sim.sent.is_empty());
    }

    #[test]
    fn long_low_marks_target_off_without_sending() {
        let config = config();
        let mut sim = Sim::new();
        let mut m = running(&mut sim, &config);

        // The line drops now and stays down.
        let now = sim.now;
        sim.clock = Waveform::new(High, &[now]);

        assert_eq!(m.poll(&mut sim, &config), Some(RestartEvent::TargetOff));
        assert_eq!(m.state(), RestartState::DutOff);
        assert!(m.is_off());
        assert!(sim.sent.is_empty());
    }

    #[test]
    fn short_low_keeps_target_running() {
        let config = config();
        let mut sim = Sim::new();
        let mut m = running(&mut sim, &config);

        let now = sim.now;
        sim.clock = Waveform::new(High, &[now, now + 20]);

        assert_eq!(m.poll(&mut sim, &config), None);
        assert_eq!(m.state(), RestartState::DutRunning);
        assert!(sim.sent.is_empty());
    }

    #[test]
    fn enabling_detection_never_skips_to_running() {
        let config = config();
        let mut sim = Sim::new();
        let mut m = running(&mut sim, &config);

        m.set_detection(true);
        assert_eq!(m.state(), RestartState::DutRunning);

        m.set_detection(false);
        assert_eq!(m.state(), RestartState::DetectionOff);
        m.set_detection(true);
        assert_eq!(m.state(), RestartState::DutOff);
    }

    #[test]
    fn reset_pulses_the_reset_line() {
        let config = config();
        let mut sim = Sim::new();
        let mut m = RestartMonitor::new();

        m.reset_target(&mut sim, &config);
        let len = u64::from(config.restart.reset_len);
        assert_eq!(sim.reset, [(0, Low), (len, High)]);
    }

    #[test]
    fn restart_trigger_brackets_the_delay() {
        let config = config();
        let mut sim = Sim::new();
        let mut m = RestartMonitor::new();
        m.poll(&mut sim, &config);

        let wait_on = u64::from(config.restart.wait_on);
        let delay = u64::from(config.restart.delay);
        assert_eq!(sim.trigger[0], (wait_on, High));
        assert_eq!(sim.trigger[1], (wait_on + delay, Low));
        assert_eq!(sim.trigger.len(), 4);
    }
}
