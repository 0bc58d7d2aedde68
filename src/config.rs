// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Tunables.
//!
//! All timing values are busy-loop iteration counts (see [`crate::timing`]).
//! Defaults are plain constants so they can be checked at compile time and
//! restored one by one from the console.

use num_derive::FromPrimitive;
use static_assertions::const_assert;
use svi2::Command;

use crate::timing::{busy_wait_ms, busy_wait_ns, busy_wait_us, Line};

/// VID codes below this are refused by the console. 0x50 is 1.05 V.
pub const SAFE_VID_MAX: u8 = 0x50;

pub const CORE_BOOT_VID: u8 = 0x59;
pub const SOC_BOOT_VID: u8 = 0x60;
pub const GLITCH_VID: u8 = 0x9e;

pub const DEFAULT_CMD: Command = Command::BASE;
pub const DEFAULT_CORE_CMD: Command = Command::BASE.with_core(true).with_vid(CORE_BOOT_VID);
pub const DEFAULT_SOC_CMD: Command = Command::BASE.with_soc(true).with_vid(SOC_BOOT_VID);
pub const DEFAULT_GLITCH_CMD: Command = DEFAULT_SOC_CMD.with_vid(GLITCH_VID);

const_assert!(CORE_BOOT_VID >= SAFE_VID_MAX);
const_assert!(SOC_BOOT_VID >= SAFE_VID_MAX);
const_assert!(GLITCH_VID >= SAFE_VID_MAX);

/// Deadline for a single bus transfer.
pub const BUS_TIMEOUT: u32 = busy_wait_ms(1000);

pub const RESTART_WAIT_OFF: u32 = busy_wait_ms(10);
pub const RESTART_WAIT_ON: u32 = busy_wait_ms(1);
pub const RESTART_DELAY: u32 = busy_wait_ms(2);
pub const RESTART_RESET_LEN: u32 = busy_wait_ms(80);
pub const RESTART_DISABLE_TELEMETRY: bool = true;

pub const GLITCH_DELAY: u32 = busy_wait_us(200);
pub const GLITCH_DURATION: u32 = busy_wait_ns(20_500);
pub const GLITCH_COOLDOWN: u32 = busy_wait_us(80);
pub const GLITCH_REPEATS: u32 = 1;
pub const GLITCH_CS_TIMEOUT: u32 = busy_wait_us(100);
pub const GLITCH_PING_WAIT: u32 = busy_wait_ms(500);
pub const GLITCH_SUCCESS_WAIT: u32 = busy_wait_us(10);

const_assert!(GLITCH_DELAY >= GLITCH_DURATION);

pub const ATTACK_WAITS: u32 = 20;
/// Longest chip-select low phase seen between pulses was ~33 µs.
pub const ATTACK_CS_LOW_MAX: u32 = busy_wait_us(100);
/// Longest high phase seen was ~15 µs.
pub const ATTACK_CS_HIGH_MAX: u32 = busy_wait_us(50);

pub const PING_REPEATS: u32 = 5;
pub const PING_REPEATS_MIN: u32 = 1;
pub const PING_REPEATS_MAX: u32 = 10;

/// Length of the result marker pulses on the trigger output.
pub const MARKER_PULSE: u32 = 10;

/// Which of the board's two pin assignments is in use.
#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
pub enum PinConfig {
    One = 1,
    Two = 2,
}

/// Reasons the trigger output gets driven. Each can be enabled on its own.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TriggerClass {
    /// Low while the engines are polled, high while the console runs.
    Cli,
    Attack,
    Glitch,
    GlitchRunning,
    GlitchSuccess,
    GlitchBroken,
    Restart,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TriggerConfig {
    pub cli: bool,
    pub attack: bool,
    pub glitch: bool,
    pub glitch_running: bool,
    pub glitch_success: bool,
    pub glitch_broken: bool,
    pub restart: bool,
}

impl TriggerConfig {
    pub const fn new() -> Self {
        Self {
            cli: false,
            attack: true,
            glitch: true,
            glitch_running: false,
            glitch_success: false,
            glitch_broken: false,
            restart: true,
        }
    }

    pub fn enabled(&self, class: TriggerClass) -> bool {
        match class {
            TriggerClass::Cli => self.cli,
            TriggerClass::Attack => self.attack,
            TriggerClass::Glitch => self.glitch,
            TriggerClass::GlitchRunning => self.glitch_running,
            TriggerClass::GlitchSuccess => self.glitch_success,
            TriggerClass::GlitchBroken => self.glitch_broken,
            TriggerClass::Restart => self.restart,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RestartConfig {
    /// Line whose level tells whether the target is powered.
    pub line: Line,
    /// Low time on `line` after which the target counts as off.
    pub wait_off: u32,
    /// High time on `line` after which the target counts as back on.
    pub wait_on: u32,
    /// Pause between detecting a restart and sending the boot commands.
    pub delay: u32,
    /// How long `restart reset` holds the reset line low.
    pub reset_len: u32,
    /// Set the telemetry bit on the core boot command.
    pub disable_telemetry: bool,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct GlitchConfig {
    pub cmd: Command,
    pub delay: u32,
    pub duration: u32,
    pub cooldown: u32,
    pub repeats: u32,
    pub cs_timeout: u32,
    pub ping_wait: u32,
    pub success_wait: u32,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct AttackConfig {
    /// Chip-select pulses to count before glitching.
    pub waits: u32,
    pub cs_low_max: u32,
    pub cs_high_max: u32,
}

/// Everything the console can change.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Config {
    /// General purpose command, sent by `cmd`.
    pub cmd: Command,
    pub core_cmd: Command,
    pub soc_cmd: Command,
    pub bus_timeout: u32,
    pub restart: RestartConfig,
    pub glitch: GlitchConfig,
    pub attack: AttackConfig,
    pub trigger: TriggerConfig,
    pub ping_repeats: u32,
    pub pins: PinConfig,
}

impl Config {
    pub const fn new() -> Self {
        Self {
            cmd: DEFAULT_CMD,
            core_cmd: DEFAULT_CORE_CMD,
            soc_cmd: DEFAULT_SOC_CMD,
            bus_timeout: BUS_TIMEOUT,
            restart: RestartConfig {
                line: Line::SviClock,
                wait_off: RESTART_WAIT_OFF,
                wait_on: RESTART_WAIT_ON,
                delay: RESTART_DELAY,
                reset_len: RESTART_RESET_LEN,
                disable_telemetry: RESTART_DISABLE_TELEMETRY,
            },
            glitch: GlitchConfig {
                cmd: DEFAULT_GLITCH_CMD,
                delay: GLITCH_DELAY,
                duration: GLITCH_DURATION,
                cooldown: GLITCH_COOLDOWN,
                repeats: GLITCH_REPEATS,
                cs_timeout: GLITCH_CS_TIMEOUT,
                ping_wait: GLITCH_PING_WAIT,
                success_wait: GLITCH_SUCCESS_WAIT,
            },
            attack: AttackConfig {
                waits: ATTACK_WAITS,
                cs_low_max: ATTACK_CS_LOW_MAX,
                cs_high_max: ATTACK_CS_HIGH_MAX,
            },
            trigger: TriggerConfig::new(),
            ping_repeats: PING_REPEATS,
            pins: PinConfig::One,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_bench_setup() {
        let c = Config::new();
        assert_eq!(c.restart.wait_off, 600_000);
        assert_eq!(c.restart.wait_on, 60_000);
        assert_eq!(c.restart.delay, 120_000);
        assert_eq!(c.restart.reset_len, 4_800_000);
        assert_eq!(c.glitch.delay, 12_000);
        assert_eq!(c.glitch.duration, 1230);
        assert_eq!(c.glitch.cooldown, 4800);
        assert_eq!(c.glitch.cs_timeout, 6000);
        assert_eq!(c.glitch.ping_wait, 30_000_000);
        assert_eq!(c.glitch.success_wait, 600);
        assert_eq!(c.bus_timeout, 60_000_000);
    }

    #[test]
    fn default_commands() {
        assert!(DEFAULT_CORE_CMD.core_enable && !DEFAULT_CORE_CMD.soc_enable);
        assert!(DEFAULT_SOC_CMD.soc_enable && !DEFAULT_SOC_CMD.core_enable);
        assert!(DEFAULT_GLITCH_CMD.soc_enable && !DEFAULT_GLITCH_CMD.core_enable);
        assert_eq!(DEFAULT_GLITCH_CMD.vid_code, 0x9e);
        assert!(!DEFAULT_CMD.soc_enable && !DEFAULT_CMD.core_enable);
    }

    #[test]
    fn trigger_classes() {
        let t = TriggerConfig::new();
        assert!(!t.enabled(TriggerClass::Cli));
        assert!(t.enabled(TriggerClass::Attack));
        assert!(t.enabled(TriggerClass::Glitch));
        assert!(!t.enabled(TriggerClass::GlitchBroken));
        assert!(t.enabled(TriggerClass::Restart));
    }
}
