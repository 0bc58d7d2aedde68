// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! One superloop iteration, and the console input that runs between them.

use core::fmt::{self, Write};

use crate::attack::AttackSequencer;
use crate::bsp::Bsp;
use crate::config::{Config, TriggerClass};
use crate::console::{self, Edit, LineBuffer};
use crate::glitch::GlitchEngine;
use crate::restart::{RestartMonitor, RestartState};
use crate::timing::Level;

const PROMPT: &str = "> ";

/// All mutable state of the tool.
pub struct App {
    pub config: Config,
    pub restart: RestartMonitor,
    pub attack: AttackSequencer,
    pub glitch: GlitchEngine,
    line: LineBuffer,
}

impl App {
    pub const fn new() -> Self {
        Self {
            config: Config::new(),
            restart: RestartMonitor::new(),
            attack: AttackSequencer::new(),
            glitch: GlitchEngine::new(),
            line: LineBuffer::new(),
        }
    }

    /// Brings the outputs to their idle levels and greets the operator.
    pub fn start<B: Bsp + ?Sized, W: Write>(&mut self, board: &mut B, out: &mut W) -> fmt::Result {
        board.configure(self.config.pins);
        board.set_reset(Level::High);
        board.trigger(&self.config.trigger, TriggerClass::Cli, Level::High);

        writeln!(out)?;
        writeln!(out, "svi2-glitcher {}", env!("CARGO_PKG_VERSION"))?;
        writeln!(out, "Type \"help\" for the list of modules and commands.")?;
        out.write_str(PROMPT)
    }

    /// Polls the engines once, then prints whatever they reported.
    pub fn step<B: Bsp + ?Sized, W: Write>(&mut self, board: &mut B, out: &mut W) -> fmt::Result {
        let triggers = self.config.trigger;
        board.trigger(&triggers, TriggerClass::Cli, Level::Low);

        let restarted = self.restart.poll(board, &self.config);
        let glitched = if self.restart.state() == RestartState::DutRunning {
            self.glitch.poll(board, &self.config)
        } else {
            None
        };
        let attacked =
            self.attack
                .poll(board, &self.config, &self.restart, &mut self.glitch);

        board.trigger(&triggers, TriggerClass::Cli, Level::High);

        if restarted.is_none() && glitched.is_none() && attacked.is_none() {
            return Ok(());
        }

        // Clear the half-typed line, report, then put it back.
        out.write_str("\r\x1b[K")?;
        if let Some(event) = &restarted {
            console::report_restart_event(out, event)?;
        }
        if let Some(result) = glitched {
            writeln!(out, "Glitch triggered!")?;
            console::report_glitch(out, &self.config, result)?;
        }
        if let Some(outcome) = &attacked {
            console::report_attack(out, &self.config, outcome)?;
        }
        write!(out, "{PROMPT}{}", self.line.as_str())
    }

    /// Feeds one byte of operator input.
    pub fn input<B: Bsp + ?Sized, W: Write>(
        &mut self,
        byte: u8,
        board: &mut B,
        out: &mut W,
    ) -> fmt::Result {
        match self.line.push(byte) {
            Edit::Ignored => Ok(()),
            Edit::Inserted(b) => out.write_char(char::from(b)),
            Edit::Erased => out.write_str("\x08 \x08"),
            Edit::Submit => {
                writeln!(out)?;
                let line = self.line.take();
                match console::execute(self, board, line.as_str(), out) {
                    // Anything else was already explained on the console.
                    Err(console::ConsoleError::Output) => return Err(fmt::Error),
                    Ok(()) | Err(_) => {}
                }
                out.write_str(PROMPT)
            }
        }
    }
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PinConfig;
    use crate::sim::{Sim, Waveform};

    fn typed(app: &mut App, sim: &mut Sim, text: &str) -> String {
        let mut out = String::new();
        for b in text.bytes() {
            app.input(b, sim, &mut out).unwrap();
        }
        out
    }

    #[test]
    fn start_sets_idle_outputs() {
        let mut app = App::new();
        let mut sim = Sim::new();
        let mut out = String::new();
        app.start(&mut sim, &mut out).unwrap();

        assert_eq!(sim.pins, Some(PinConfig::One));
        assert_eq!(sim.reset, [(0, Level::High)]);
        assert!(out.ends_with(PROMPT));
    }

    #[test]
    fn typed_line_executes_on_enter() {
        let mut app = App::new();
        let mut sim = Sim::new();

        let out = typed(&mut app, &mut sim, "set ping repeats 1\r");
        assert_eq!(out, "set ping repeats 1\n> ");
        assert_eq!(app.config.ping_repeats, 1);

        let out = typed(&mut app, &mut sim, "pinf\x7fg\n");
        assert_eq!(out, "pinf\x08 \x08g\nPong!\n> ");
    }

    #[test]
    fn quiet_step_prints_nothing() {
        let mut app = App::new();
        app.restart.set_detection(false);
        let mut sim = Sim::new();
        let mut out = String::new();

        app.step(&mut sim, &mut out).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn restart_is_reported_after_the_sends() {
        let mut app = App::new();
        app.config.restart.wait_on = 10;
        app.config.restart.delay = 5;
        let mut sim = Sim::new();
        let mut out = String::new();

        typed(&mut app, &mut sim, "pi");
        app.step(&mut sim, &mut out).unwrap();

        assert_eq!(app.restart.state(), RestartState::DutRunning);
        assert_eq!(sim.frames().len(), 2);
        assert_eq!(
            out,
            "\r\x1b[KRestart detected!\nSetting VSoc!\n\
             Setting VCore and disabling telemetry!\n> pi"
        );
    }

    #[test]
    fn self_armed_glitch_only_while_running() {
        let mut app = App::new();
        app.config.restart.wait_on = 10;
        app.config.restart.delay = 5;
        app.config.glitch.ping_wait = 100;
        app.glitch.arm();

        // Chip-select low from the start, released just after both boot
        // commands went out (each waits ~4300 iterations for a free bus).
        let mut sim = Sim::new().with_cs(Waveform::new(Level::Low, &[10_000]));
        let mut out = String::new();

        // First step: the target comes up. The glitch engine is polled in the
        // same iteration, once the monitor says the target is running.
        app.step(&mut sim, &mut out).unwrap();
        assert!(out.contains("Restart detected!"));
        assert!(!app.glitch.is_armed());
        assert!(out.contains("Glitch triggered!\nTarget is broken!\n"));
        let g = app.config.glitch.cmd.encode();
        assert_eq!(sim.frames().iter().filter(|f| **f == g).count(), 1);
    }

    #[test]
    fn armed_glitch_waits_while_detection_is_off() {
        let mut app = App::new();
        app.restart.set_detection(false);
        app.glitch.arm();
        let mut sim = Sim::new().with_cs(Waveform::new(Level::Low, &[20]));
        let mut out = String::new();

        app.step(&mut sim, &mut out).unwrap();
        assert!(app.glitch.is_armed());
        assert!(sim.sent.is_empty());
    }

    #[test]
    fn cli_trigger_brackets_the_poll() {
        let mut app = App::new();
        app.config.trigger.cli = true;
        app.restart.set_detection(false);
        let mut sim = Sim::new();
        let mut out = String::new();

        app.step(&mut sim, &mut out).unwrap();
        assert_eq!(sim.trigger, [(0, Level::Low), (0, Level::High)]);
    }
}
