// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The operator's command language.
//!
//! ```text
//! help [<module> [<param|command>]]
//! set <module> <param> <value>
//! reset [<module> [<param>]]
//! print [<module> [<param>]]
//! <module> [<command>]
//! ```
//!
//! Modules, their parameters and their commands live in one static table.
//! Parameters are typed accessors into [`Config`] (or, for `restart detect`
//! and `hw config`, into the restart monitor and the board); resetting a
//! parameter copies its value out of [`Config::new`].
//!
//! Nothing here runs while the engines are waiting on the target: lines are
//! executed between superloop iterations, and engine reports are printed
//! after the timed section they describe.

use core::fmt::{self, Write};

use num_traits::FromPrimitive;
use svi2::{Command, LoadLineSlopeTrim, OffsetTrim, PowerLevel};

use crate::app::App;
use crate::attack::AttackOutcome;
use crate::bsp::Bsp;
use crate::config::{Config, PinConfig, PING_REPEATS_MAX, PING_REPEATS_MIN, SAFE_VID_MAX};
use crate::glitch::GlitchResult;
use crate::restart::{RestartEvent, RestartReport, RestartState};
use crate::timing::Line;

const DEFAULTS: Config = Config::new();

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ParamError {
    BadNumber,
    BadBool,
    /// Not one of the names the parameter accepts.
    BadName,
    OutOfRange { min: u32, max: u32 },
    VidTooLow,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ConsoleError {
    UnknownModule,
    UnknownCommand,
    UnknownParam,
    MissingModule,
    MissingParam,
    MissingValue,
    Param(ParamError),
    /// The command ran but did not succeed.
    Failed,
    Output,
}

impl From<fmt::Error> for ConsoleError {
    fn from(_: fmt::Error) -> Self {
        Self::Output
    }
}

impl From<ParamError> for ConsoleError {
    fn from(e: ParamError) -> Self {
        Self::Param(e)
    }
}

/// Which of the four commands a field parameter edits.
#[derive(Copy, Clone, Debug)]
enum Slot {
    Cmd,
    Soc,
    Core,
    Glitch,
}

impl Slot {
    fn get(self, c: &Config) -> &Command {
        match self {
            Self::Cmd => &c.cmd,
            Self::Soc => &c.soc_cmd,
            Self::Core => &c.core_cmd,
            Self::Glitch => &c.glitch.cmd,
        }
    }

    fn get_mut(self, c: &mut Config) -> &mut Command {
        match self {
            Self::Cmd => &mut c.cmd,
            Self::Soc => &mut c.soc_cmd,
            Self::Core => &mut c.core_cmd,
            Self::Glitch => &mut c.glitch.cmd,
        }
    }
}

#[derive(Copy, Clone, Debug)]
enum Field {
    Core,
    Soc,
    Telemetry,
    Vid,
    Power,
    Offset,
    LoadLine,
}

impl Field {
    fn set(self, cmd: &mut Command, value: &str) -> Result<(), ParamError> {
        match self {
            Self::Core => cmd.core_enable = parse_bool(value)?,
            Self::Soc => cmd.soc_enable = parse_bool(value)?,
            Self::Telemetry => cmd.telemetry_enable = parse_bool(value)?,
            Self::Vid => {
                let vid = parse_number(value)?;
                let vid = u8::try_from(vid).map_err(|_| ParamError::VidTooLow)?;
                if vid < SAFE_VID_MAX {
                    return Err(ParamError::VidTooLow);
                }
                cmd.vid_code = vid;
            }
            Self::Power => {
                cmd.power_level =
                    PowerLevel::from_name(value).ok_or(ParamError::BadName)?;
            }
            Self::Offset => {
                cmd.offset_trim =
                    OffsetTrim::from_name(value).ok_or(ParamError::BadName)?;
            }
            Self::LoadLine => {
                cmd.load_line_slope_trim =
                    LoadLineSlopeTrim::from_name(value).ok_or(ParamError::BadName)?;
            }
        }
        Ok(())
    }

    fn copy(self, to: &mut Command, from: &Command) {
        match self {
            Self::Core => to.core_enable = from.core_enable,
            Self::Soc => to.soc_enable = from.soc_enable,
            Self::Telemetry => to.telemetry_enable = from.telemetry_enable,
            Self::Vid => to.vid_code = from.vid_code,
            Self::Power => to.power_level = from.power_level,
            Self::Offset => to.offset_trim = from.offset_trim,
            Self::LoadLine => to.load_line_slope_trim = from.load_line_slope_trim,
        }
    }

    fn print<W: Write>(self, cmd: &Command, out: &mut W) -> fmt::Result {
        match self {
            Self::Core => print_bool(out, cmd.core_enable),
            Self::Soc => print_bool(out, cmd.soc_enable),
            Self::Telemetry => print_bool(out, cmd.telemetry_enable),
            Self::Vid => print_vid(out, cmd),
            Self::Power => out.write_str(cmd.power_level.name()),
            Self::Offset => out.write_str(cmd.offset_trim.name()),
            Self::LoadLine => out.write_str(cmd.load_line_slope_trim.name()),
        }
    }

    fn options(self) -> &'static [&'static str] {
        match self {
            Self::Power => &["low", "mid", "full_alt", "full"],
            Self::Offset => &["off", "-25mV", "no_change", "+25mV"],
            Self::LoadLine => &[
                "off",
                "-40%",
                "-20%",
                "no_change",
                "+20%",
                "+40%",
                "+60%",
                "+80%",
            ],
            _ => &[],
        }
    }
}

enum Kind {
    Number {
        get: fn(&Config) -> u32,
        set: fn(&mut Config, u32),
        min: u32,
        max: u32,
    },
    Flag {
        get: fn(&Config) -> bool,
        set: fn(&mut Config, bool),
    },
    Field(Slot, Field),
    /// Restart detection on/off, held by the restart monitor.
    Detect,
    /// Which line the restart monitor watches.
    DetectLine,
    /// Board pin assignment.
    Pins,
}

struct Param {
    name: &'static str,
    description: &'static str,
    kind: Kind,
}

impl Param {
    fn set<B: Bsp + ?Sized>(
        &self,
        app: &mut App,
        board: &mut B,
        value: &str,
    ) -> Result<(), ParamError> {
        match &self.kind {
            Kind::Number { set, min, max, .. } => {
                let v = parse_number(value)?;
                if v < *min || v > *max {
                    return Err(ParamError::OutOfRange {
                        min: *min,
                        max: *max,
                    });
                }
                set(&mut app.config, v);
            }
            Kind::Flag { set, .. } => set(&mut app.config, parse_bool(value)?),
            Kind::Field(slot, field) => field.set(slot.get_mut(&mut app.config), value)?,
            Kind::Detect => app.restart.set_detection(parse_bool(value)?),
            Kind::DetectLine => {
                app.config.restart.line = match value {
                    "clock" => Line::SviClock,
                    "data" => Line::SviData,
                    _ => return Err(ParamError::BadName),
                };
            }
            Kind::Pins => {
                let pins = PinConfig::from_u32(parse_number(value)?)
                    .ok_or(ParamError::OutOfRange { min: 1, max: 2 })?;
                if pins != app.config.pins {
                    board.configure(pins);
                    app.config.pins = pins;
                }
            }
        }
        Ok(())
    }

    fn reset<B: Bsp + ?Sized>(&self, app: &mut App, board: &mut B) {
        match &self.kind {
            Kind::Number { get, set, .. } => set(&mut app.config, get(&DEFAULTS)),
            Kind::Flag { get, set } => set(&mut app.config, get(&DEFAULTS)),
            Kind::Field(slot, field) => {
                field.copy(slot.get_mut(&mut app.config), slot.get(&DEFAULTS));
            }
            Kind::Detect => app.restart.reset_detection(),
            Kind::DetectLine => app.config.restart.line = DEFAULTS.restart.line,
            Kind::Pins => {
                board.configure(DEFAULTS.pins);
                app.config.pins = DEFAULTS.pins;
            }
        }
    }

    fn print<B: Bsp + ?Sized, W: Write>(
        &self,
        app: &App,
        board: &B,
        out: &mut W,
    ) -> fmt::Result {
        match &self.kind {
            Kind::Number { get, .. } => {
                let v = get(&app.config);
                write!(out, "{v} (0x{v:x})")
            }
            Kind::Flag { get, .. } => print_bool(out, get(&app.config)),
            Kind::Field(slot, field) => field.print(slot.get(&app.config), out),
            Kind::Detect => out.write_str(match app.restart.state() {
                RestartState::DetectionOff => "off",
                RestartState::DutRunning => "on (target is running)",
                RestartState::DutOff => "on (target is off)",
            }),
            Kind::DetectLine => out.write_str(match app.config.restart.line {
                Line::SviData => "data",
                _ => "clock",
            }),
            Kind::Pins => {
                let pins = app.config.pins;
                write!(out, "{}", pins as u32)?;
                let desc = board.describe(pins);
                if !desc.is_empty() {
                    write!(out, " ({desc})")?;
                }
                Ok(())
            }
        }
    }

    fn explain<W: Write>(&self, e: ParamError, out: &mut W) -> fmt::Result {
        match e {
            ParamError::BadNumber => {
                writeln!(out, "Error: Couldn't parse numeric value!")
            }
            ParamError::BadBool => writeln!(
                out,
                "Error: Couldn't parse value, use yes/no, true/false, on/off or 1/0!"
            ),
            ParamError::OutOfRange { min, max } => {
                writeln!(out, "Error: Value must be between {min} and {max}!")
            }
            ParamError::VidTooLow => writeln!(
                out,
                "Error: Can't set vid below 0x{SAFE_VID_MAX:02x} or above 0xff!"
            ),
            ParamError::BadName => {
                writeln!(out, "Error: Couldn't parse value, possibilities are:")?;
                let options: &[&str] = match &self.kind {
                    Kind::Field(_, field) => field.options(),
                    Kind::DetectLine => &["clock", "data"],
                    _ => &[],
                };
                for o in options {
                    writeln!(out, "  {o}")?;
                }
                Ok(())
            }
        }
    }
}

#[derive(Copy, Clone, Debug)]
enum Op {
    ArmAttack,
    Glitch,
    ArmGlitch,
    Restart,
    ResetTarget,
    Inject,
    Sniff,
    Ping,
}

struct Action {
    /// Empty for the module's default command.
    name: &'static str,
    description: &'static str,
    op: Op,
}

struct Module {
    name: &'static str,
    description: &'static str,
    params: &'static [Param],
    actions: &'static [Action],
}

macro_rules! number {
    ($name:literal, $desc:expr, $($field:ident).+) => {
        number!($name, $desc, $($field).+, 0, u32::MAX)
    };
    ($name:literal, $desc:expr, $($field:ident).+, $min:expr, $max:expr) => {
        Param {
            name: $name,
            description: $desc,
            kind: Kind::Number {
                get: |c| c.$($field).+,
                set: |c, v| c.$($field).+ = v,
                min: $min,
                max: $max,
            },
        }
    };
}

macro_rules! flag {
    ($name:literal, $desc:expr, $($field:ident).+) => {
        Param {
            name: $name,
            description: $desc,
            kind: Kind::Flag {
                get: |c| c.$($field).+,
                set: |c, v| c.$($field).+ = v,
            },
        }
    };
}

macro_rules! field {
    ($name:literal, $desc:expr, $slot:ident, $field:ident) => {
        Param {
            name: $name,
            description: $desc,
            kind: Kind::Field(Slot::$slot, Field::$field),
        }
    };
}

const VID_DESC: &str = "VID code of the command. Lower is higher voltage:\n\
    1.55 V - vid * 6.25 mV. Values below 0x50 are refused.";
const POWER_DESC: &str = "Power state: low, mid, full_alt or full.";
const OFFSET_DESC: &str = "Offset trim: off, -25mV, no_change or +25mV.";
const LOAD_LINE_DESC: &str = "Load line slope trim: off, -40%, -20%, no_change,\n\
    +20%, +40%, +60% or +80%.";

static MODULES: &[Module] = &[
    Module {
        name: "attack",
        description: "Glitches a fixed number of chip-select pulses into the\n\
            target's boot. Arming waits for the target to go off first.",
        params: &[
            number!("waits", "Chip-select pulses to count before glitching.", attack.waits),
            number!(
                "cs_low_max",
                "Longest chip-select low phase tolerated while counting.",
                attack.cs_low_max
            ),
            number!(
                "cs_high_max",
                "Longest chip-select high phase tolerated while counting.",
                attack.cs_high_max
            ),
        ],
        actions: &[Action {
            name: "",
            description: "Arms the attack.",
            op: Op::ArmAttack,
        }],
    },
    Module {
        name: "glitch",
        description: "Sends the glitch command, restores the rails after\n\
            \"duration\" and reports what the target did.",
        params: &[
            field!("vid", VID_DESC, Glitch, Vid),
            field!("set_soc", "Whether the glitch hits the SoC rail.", Glitch, Soc),
            field!("set_core", "Whether the glitch hits the core rail.", Glitch, Core),
            number!("delay", "Cycles from trigger to the end of the glitch.", glitch.delay),
            number!("duration", "Cycles the rail is held at the glitch vid.", glitch.duration),
            number!("cooldown", "Cycles between repeats.", glitch.cooldown),
            number!("repeats", "How many times to glitch.", glitch.repeats),
            number!(
                "cs_timeout",
                "Longest chip-select low phase that still counts as a pulse.",
                glitch.cs_timeout
            ),
            number!(
                "ping_wait",
                "How long to wait for the target's first pulse.",
                glitch.ping_wait
            ),
            number!(
                "success_wait",
                "How long to wait for the second pulse that marks success.",
                glitch.success_wait
            ),
        ],
        actions: &[
            Action {
                name: "",
                description: "Glitches now.",
                op: Op::Glitch,
            },
            Action {
                name: "arm",
                description: "Glitches on the next chip-select pulse while the\n\
                    target is running.",
                op: Op::ArmGlitch,
            },
        ],
    },
    Module {
        name: "restart",
        description: "Detects target restarts and sends the boot commands\n\
            (soc_cmd, then core_cmd) when one happens.",
        params: &[
            Param {
                name: "detect",
                description: "Whether restart detection runs.",
                kind: Kind::Detect,
            },
            Param {
                name: "line",
                description: "Line watched for power state: clock or data.",
                kind: Kind::DetectLine,
            },
            flag!(
                "disable_telemetry",
                "Set the telemetry bit in the core boot command.",
                restart.disable_telemetry
            ),
            number!("wait_on", "High time after which the target is on.", restart.wait_on),
            number!("wait_off", "Low time after which the target is off.", restart.wait_off),
            number!("delay", "Cycles between detection and the boot commands.", restart.delay),
            number!("reset_len", "Cycles the reset line is held low.", restart.reset_len),
        ],
        actions: &[
            Action {
                name: "",
                description: "Sends the boot commands now.",
                op: Op::Restart,
            },
            Action {
                name: "reset",
                description: "Pulls the target's reset line for reset_len.",
                op: Op::ResetTarget,
            },
        ],
    },
    Module {
        name: "cmd",
        description: "A free-form SVI2 command for injection.",
        params: &[
            field!("set_core", "Address the core rail.", Cmd, Core),
            field!("set_soc", "Address the SoC rail.", Cmd, Soc),
            field!("vid", VID_DESC, Cmd, Vid),
            field!("power", POWER_DESC, Cmd, Power),
            field!("offset", OFFSET_DESC, Cmd, Offset),
            field!("telemetry", "Telemetry enable bit.", Cmd, Telemetry),
            field!("load_line", LOAD_LINE_DESC, Cmd, LoadLine),
        ],
        actions: &[
            Action {
                name: "",
                description: "Sends the command once.",
                op: Op::Inject,
            },
            Action {
                name: "sniff",
                description: "Receives one command from the bus and prints it.",
                op: Op::Sniff,
            },
        ],
    },
    Module {
        name: "soc_cmd",
        description: "The normal VSoc command. Sent on restart and to end\n\
            a glitch.",
        params: &[
            field!("vid", VID_DESC, Soc, Vid),
            field!("power", POWER_DESC, Soc, Power),
            field!("offset", OFFSET_DESC, Soc, Offset),
            field!("load_line", LOAD_LINE_DESC, Soc, LoadLine),
        ],
        actions: &[],
    },
    Module {
        name: "core_cmd",
        description: "The normal VCore command. Sent on restart and to end\n\
            a glitch.",
        params: &[
            field!("vid", VID_DESC, Core, Vid),
            field!("power", POWER_DESC, Core, Power),
            field!("offset", OFFSET_DESC, Core, Offset),
            field!("load_line", LOAD_LINE_DESC, Core, LoadLine),
        ],
        actions: &[],
    },
    Module {
        name: "hw",
        description: "Pin assignment and trigger output.",
        params: &[
            Param {
                name: "config",
                description: "Pin assignment, 1 or 2.",
                kind: Kind::Pins,
            },
            number!("bus_timeout", "Deadline for one bus transfer.", bus_timeout),
            flag!("trigger_restart", "Trigger during restarts.", trigger.restart),
            flag!(
                "trigger_glitch_broken",
                "Marker pulse when the target broke.",
                trigger.glitch_broken
            ),
            flag!(
                "trigger_glitch_success",
                "Marker pulse on success.",
                trigger.glitch_success
            ),
            flag!(
                "trigger_glitch_running",
                "Marker pulse when the target kept running.",
                trigger.glitch_running
            ),
            flag!("trigger_glitch", "Trigger during the glitch.", trigger.glitch),
            flag!("trigger_attack", "Trigger while counting pulses.", trigger.attack),
            flag!("trigger_cli", "Trigger high while the console runs.", trigger.cli),
        ],
        actions: &[],
    },
    Module {
        name: "ping",
        description: "Checks that the tool still responds.",
        params: &[number!("repeats", "How often to pong back.", ping_repeats, PING_REPEATS_MIN, PING_REPEATS_MAX)],
        actions: &[Action {
            name: "",
            description: "Pongs back!",
            op: Op::Ping,
        }],
    },
];

fn find_module(name: &str) -> Option<&'static Module> {
    MODULES.iter().find(|m| m.name == name)
}

fn find_param(module: &Module, name: &str) -> Option<&'static Param> {
    module.params.iter().find(|p| p.name == name)
}

fn find_action(module: &Module, name: &str) -> Option<&'static Action> {
    module.actions.iter().find(|a| a.name == name)
}

pub fn parse_number(s: &str) -> Result<u32, ParamError> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|_| ParamError::BadNumber)
}

pub fn parse_bool(s: &str) -> Result<bool, ParamError> {
    match s {
        "yes" | "true" | "on" | "1" => Ok(true),
        "no" | "false" | "off" | "0" => Ok(false),
        _ => Err(ParamError::BadBool),
    }
}

fn print_bool<W: Write>(out: &mut W, v: bool) -> fmt::Result {
    out.write_str(if v { "yes" } else { "no" })
}

fn print_vid<W: Write>(out: &mut W, cmd: &Command) -> fmt::Result {
    write!(out, "0x{:02x}", cmd.vid_code)?;
    match cmd.microvolts() {
        Some(uv) => write!(out, " ({}.{:06} V)", uv / 1_000_000, uv % 1_000_000),
        None => out.write_str(" (off)"),
    }
}

/// Prints a command the way `print` shows its fields.
pub fn print_command<W: Write>(out: &mut W, cmd: &Command) -> fmt::Result {
    write!(out, "core ")?;
    print_bool(out, cmd.core_enable)?;
    write!(out, ", soc ")?;
    print_bool(out, cmd.soc_enable)?;
    write!(out, ", vid ")?;
    print_vid(out, cmd)?;
    write!(
        out,
        ", power {}, offset {}, load_line {}, telemetry ",
        cmd.power_level.name(),
        cmd.offset_trim.name(),
        cmd.load_line_slope_trim.name()
    )?;
    print_bool(out, cmd.telemetry_enable)
}

/// Runs one console line.
///
/// Errors are explained on `out` before they are returned.
pub fn execute<B: Bsp + ?Sized, W: Write>(
    app: &mut App,
    board: &mut B,
    line: &str,
    out: &mut W,
) -> Result<(), ConsoleError> {
    let mut words = line.split_ascii_whitespace();
    let Some(first) = words.next() else {
        return Ok(());
    };

    match first {
        "help" => help(words.next(), words.next(), out),
        "set" => set(app, board, words.next(), words.next(), words.next(), out),
        "reset" => reset(app, board, words.next(), words.next(), out),
        "print" => print(app, board, words.next(), words.next(), out),
        name => match find_module(name) {
            Some(module) => run(app, board, module, words.next().unwrap_or(""), out),
            None => {
                writeln!(out, "Error: unknown module/command!")?;
                write!(out, "Options are: help, set, reset, print, ")?;
                list_modules(out)?;
                Err(ConsoleError::UnknownModule)
            }
        },
    }
}

fn list_modules<W: Write>(out: &mut W) -> fmt::Result {
    let mut first = true;
    for m in MODULES {
        if !first {
            out.write_str(", ")?;
        }
        out.write_str(m.name)?;
        first = false;
    }
    writeln!(out)
}

fn list_params<W: Write>(module: &Module, out: &mut W) -> fmt::Result {
    let mut first = true;
    for p in module.params {
        if !first {
            out.write_str(", ")?;
        }
        out.write_str(p.name)?;
        first = false;
    }
    writeln!(out)
}

fn list_actions<W: Write>(module: &Module, out: &mut W) -> fmt::Result {
    let mut first = true;
    for a in module.actions {
        if !first {
            out.write_str(", ")?;
        }
        out.write_str(if a.name.is_empty() { "<empty>" } else { a.name })?;
        first = false;
    }
    writeln!(out)
}

fn module_arg<W: Write>(
    name: Option<&str>,
    out: &mut W,
) -> Result<&'static Module, ConsoleError> {
    let Some(name) = name else {
        writeln!(out, "Error: You need to specify a module!")?;
        write!(out, "Options are: ")?;
        list_modules(out)?;
        return Err(ConsoleError::MissingModule);
    };
    match find_module(name) {
        Some(m) => Ok(m),
        None => {
            writeln!(out, "Error: unknown module!")?;
            write!(out, "Options are: <none>, ")?;
            list_modules(out)?;
            Err(ConsoleError::UnknownModule)
        }
    }
}

fn param_arg<W: Write>(
    module: &Module,
    name: &str,
    out: &mut W,
) -> Result<&'static Param, ConsoleError> {
    match find_param(module, name) {
        Some(p) => Ok(p),
        None => {
            writeln!(out, "Error: unknown parameter!")?;
            write!(out, "Options are: ")?;
            list_params(module, out)?;
            Err(ConsoleError::UnknownParam)
        }
    }
}

fn set<B: Bsp + ?Sized, W: Write>(
    app: &mut App,
    board: &mut B,
    module: Option<&str>,
    param: Option<&str>,
    value: Option<&str>,
    out: &mut W,
) -> Result<(), ConsoleError> {
    let module = module_arg(module, out)?;
    let Some(param) = param else {
        writeln!(out, "Error: You need to specify a parameter to set!")?;
        write!(out, "Options are: ")?;
        list_params(module, out)?;
        return Err(ConsoleError::MissingParam);
    };
    let param = param_arg(module, param, out)?;
    let Some(value) = value else {
        writeln!(out, "Error: You need to specify a value!")?;
        return Err(ConsoleError::MissingValue);
    };

    if let Err(e) = param.set(app, board, value) {
        param.explain(e, out)?;
        writeln!(
            out,
            "Error: There was a problem setting {} {}!",
            module.name, param.name
        )?;
        return Err(e.into());
    }
    Ok(())
}

fn print_param<B: Bsp + ?Sized, W: Write>(
    app: &App,
    board: &B,
    module: &Module,
    param: &Param,
    out: &mut W,
) -> fmt::Result {
    write!(out, "{} {} ", module.name, param.name)?;
    param.print(app, board, out)?;
    writeln!(out)
}

fn print_module<B: Bsp + ?Sized, W: Write>(
    app: &App,
    board: &B,
    module: &Module,
    out: &mut W,
) -> fmt::Result {
    for p in module.params {
        print_param(app, board, module, p, out)?;
    }
    Ok(())
}

fn reset_module<B: Bsp + ?Sized, W: Write>(
    app: &mut App,
    board: &mut B,
    module: &Module,
    out: &mut W,
) -> fmt::Result {
    for p in module.params {
        p.reset(app, board);
        print_param(app, board, module, p, out)?;
    }
    Ok(())
}

fn reset<B: Bsp + ?Sized, W: Write>(
    app: &mut App,
    board: &mut B,
    module: Option<&str>,
    param: Option<&str>,
    out: &mut W,
) -> Result<(), ConsoleError> {
    if module.is_none() {
        for m in MODULES {
            reset_module(app, board, m, out)?;
        }
        return Ok(());
    }
    let module = module_arg(module, out)?;
    match param {
        None => reset_module(app, board, module, out)?,
        Some(name) => {
            let param = param_arg(module, name, out)?;
            param.reset(app, board);
            print_param(app, board, module, param, out)?;
        }
    }
    Ok(())
}

fn print<B: Bsp + ?Sized, W: Write>(
    app: &App,
    board: &B,
    module: Option<&str>,
    param: Option<&str>,
    out: &mut W,
) -> Result<(), ConsoleError> {
    if module.is_none() {
        for m in MODULES {
            print_module(app, board, m, out)?;
        }
        return Ok(());
    }
    let module = module_arg(module, out)?;
    match param {
        None => print_module(app, board, module, out)?,
        Some(name) => {
            let param = param_arg(module, name, out)?;
            print_param(app, board, module, param, out)?;
        }
    }
    Ok(())
}

/// Writes `text` with every line after the first indented to `indent`.
fn write_indented<W: Write>(out: &mut W, indent: usize, text: &str) -> fmt::Result {
    for (i, line) in text.lines().enumerate() {
        if i != 0 {
            write!(out, "\n{:indent$}", "")?;
        }
        out.write_str(line.trim_start())?;
    }
    writeln!(out)
}

fn help_entry<W: Write>(out: &mut W, name: &str, description: &str) -> fmt::Result {
    let name = if name.is_empty() { "<empty str>" } else { name };
    if name.len() > 16 {
        write!(out, "\n  {name}\n{:20}", "")?;
    } else {
        write!(out, "\n  {name:<18}")?;
    }
    write_indented(out, 20, description)
}

fn help_module<W: Write>(module: &Module, item: Option<&str>, out: &mut W) -> Result<(), ConsoleError> {
    let pad = 57usize.saturating_sub(module.name.len());
    writeln!(out, "## Module: {} #{:#<pad$}", module.name, "")?;

    if let Some(item) = item {
        let param = find_param(module, item);
        let action = find_action(module, item);
        if let Some(p) = param {
            write!(out, "\n## {} (parameter)\n  ", p.name)?;
            write_indented(out, 2, p.description)?;
        }
        if let Some(a) = action {
            write!(out, "\n## {} (command)\n  ", a.name)?;
            write_indented(out, 2, a.description)?;
        }
        if param.is_none() && action.is_none() {
            writeln!(out, "Error: no parameter or command!")?;
            write!(out, "Options are: ")?;
            list_params(module, out)?;
            write!(out, "or commands: ")?;
            list_actions(module, out)?;
            return Err(ConsoleError::UnknownParam);
        }
        writeln!(out)?;
        return Ok(());
    }

    writeln!(out)?;
    write_indented(out, 0, module.description)?;

    if !module.actions.is_empty() {
        writeln!(out, "\n## Commands")?;
        for a in module.actions {
            help_entry(out, a.name, a.description)?;
        }
    }
    if !module.params.is_empty() {
        writeln!(out, "\n## Parameters")?;
        for p in module.params {
            help_entry(out, p.name, p.description)?;
        }
    }
    writeln!(out)?;
    Ok(())
}

const GRAMMAR: &str = "
## set/reset/print ###################################################

Commands for the control of parameters.

## Commands

  set <module> <param> <value>
                    Sets a parameter to a value. Numbers are decimal
                    or 0x hex; flags take yes/no, true/false, on/off
                    or 1/0.

  reset [<module> [<param>]]
                    Resets one parameter, a module's parameters or
                    everything to the initial values.

  print [<module> [<param>]]
                    Prints one parameter, a module's parameters or
                    everything.

  <module> [<command>]
                    Runs a module command.
";

fn help<W: Write>(
    module: Option<&str>,
    item: Option<&str>,
    out: &mut W,
) -> Result<(), ConsoleError> {
    match module {
        None => {
            writeln!(out, "{GRAMMAR}")?;
            for m in MODULES {
                help_module(m, None, out)?;
            }
            Ok(())
        }
        Some("set" | "reset" | "print") => {
            writeln!(out, "{GRAMMAR}")?;
            Ok(())
        }
        Some(name) => {
            let module = module_arg(Some(name), out)?;
            help_module(module, item, out)
        }
    }
}

fn run<B: Bsp + ?Sized, W: Write>(
    app: &mut App,
    board: &mut B,
    module: &Module,
    name: &str,
    out: &mut W,
) -> Result<(), ConsoleError> {
    let Some(action) = find_action(module, name) else {
        writeln!(out, "Error: unknown command for module!")?;
        write!(out, "Options are: ")?;
        list_actions(module, out)?;
        return Err(ConsoleError::UnknownCommand);
    };

    let ok = match action.op {
        Op::ArmAttack => {
            app.attack.arm();
            writeln!(out, "Attack armed!")?;
            true
        }
        Op::Glitch => {
            let result = app.glitch.trigger(board, &app.config);
            writeln!(out, "Glitch manually triggered!")?;
            report_glitch(out, &app.config, result)?
        }
        Op::ArmGlitch => {
            app.glitch.arm();
            writeln!(out, "Glitch armed!")?;
            true
        }
        Op::Restart => {
            writeln!(out, "Manual restart!")?;
            let report = app.restart.restart(board, &app.config);
            report_restart(out, &report)?;
            report.is_ok()
        }
        Op::ResetTarget => {
            writeln!(out, "Resetting target!")?;
            app.restart.reset_target(board, &app.config);
            true
        }
        Op::Inject => match board.send(app.config.cmd.encode(), app.config.bus_timeout) {
            Ok(status) => {
                writeln!(out, "Injected! (status 0x{status:x})")?;
                true
            }
            Err(e) => {
                writeln!(out, "Error: Injection failed ({})!", e.code())?;
                false
            }
        },
        Op::Sniff => match board.receive(app.config.bus_timeout) {
            Ok(frame) => {
                write!(
                    out,
                    "Received 0x{:02x} 0x{:04x}: ",
                    frame.address, frame.payload
                )?;
                print_command(out, &Command::decode(frame))?;
                writeln!(out)?;
                if !Command::has_constant(frame) {
                    writeln!(out, "Warning: address is not an SVI2 address!")?;
                }
                true
            }
            Err(e) => {
                writeln!(out, "Error: Receiving failed ({})!", e.code())?;
                false
            }
        },
        Op::Ping => {
            for _ in 0..app.config.ping_repeats {
                writeln!(out, "Pong!")?;
            }
            true
        }
    };

    if ok {
        Ok(())
    } else {
        Err(ConsoleError::Failed)
    }
}

/// Prints a glitch classification. Returns whether the glitch itself
/// worked (any classification but `Error`).
pub fn report_glitch<W: Write>(
    out: &mut W,
    config: &Config,
    result: GlitchResult,
) -> Result<bool, fmt::Error> {
    if config.glitch.delay < config.glitch.duration {
        writeln!(out, "Warning: duration is larger than delay!")?;
    }
    match result {
        GlitchResult::TargetRunning => writeln!(out, "Target continues running!")?,
        GlitchResult::TargetBroken => writeln!(out, "Target is broken!")?,
        GlitchResult::Success => writeln!(out, "Target glitched successfully!")?,
        GlitchResult::Error => {
            writeln!(
                out,
                "Error: The injection of one of the commands/packets failed!"
            )?;
            return Ok(false);
        }
    }
    Ok(true)
}

pub fn report_restart<W: Write>(out: &mut W, report: &RestartReport) -> fmt::Result {
    writeln!(out, "Setting VSoc!")?;
    if let Err(e) = report.soc {
        writeln!(out, "Error: Problem while sending soc_cmd ({})!", e.code())?;
    }
    if report.telemetry_disabled {
        writeln!(out, "Setting VCore and disabling telemetry!")?;
    } else {
        writeln!(out, "Setting VCore!")?;
    }
    if let Err(e) = report.core {
        writeln!(out, "Error: Problem while sending core_cmd ({})!", e.code())?;
    }
    Ok(())
}

pub fn report_restart_event<W: Write>(out: &mut W, event: &RestartEvent) -> fmt::Result {
    match event {
        RestartEvent::TargetOff => writeln!(out, "Target is now offline!"),
        RestartEvent::Restarted(report) => {
            writeln!(out, "Restart detected!")?;
            report_restart(out, report)
        }
    }
}

pub fn report_attack<W: Write>(
    out: &mut W,
    config: &Config,
    outcome: &AttackOutcome,
) -> fmt::Result {
    match outcome {
        AttackOutcome::CsLowTooLong { .. } => {
            writeln!(out, "Attack failed!")?;
            writeln!(out, "Error: CS was low for too long!")
        }
        AttackOutcome::CsHighTooLong { .. } => {
            writeln!(out, "Attack failed!")?;
            writeln!(out, "Error: CS was high for too long!")
        }
        AttackOutcome::Glitched { result, cs_was_low } => {
            writeln!(out, "Attack triggered!")?;
            if *cs_was_low {
                writeln!(out, "Chip-Select was low at glitch time!")?;
            }
            report_glitch(out, config, *result).map(|_| ())
        }
    }
}

/// Printable bytes are collected; backspace/delete erase; CR or LF submits.
pub const LINE_SIZE: usize = 128;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Edit {
    /// Nothing to show.
    Ignored,
    /// Echo this byte.
    Inserted(u8),
    /// Erase one character on screen.
    Erased,
    /// The line is complete.
    Submit,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
enum Escape {
    #[default]
    None,
    Started,
    Csi,
}

#[derive(Copy, Clone)]
pub struct LineBuffer {
    buf: [u8; LINE_SIZE],
    len: usize,
    escape: Escape,
}

impl LineBuffer {
    pub const fn new() -> Self {
        Self {
            buf: [0; LINE_SIZE],
            len: 0,
            escape: Escape::None,
        }
    }

    pub fn push(&mut self, byte: u8) -> Edit {
        // Terminal escape sequences (arrow keys and friends) are swallowed.
        match self.escape {
            Escape::Started => {
                self.escape = if byte == b'[' {
                    Escape::Csi
                } else {
                    Escape::None
                };
                return Edit::Ignored;
            }
            Escape::Csi => {
                if (0x40..=0x7e).contains(&byte) {
                    self.escape = Escape::None;
                }
                return Edit::Ignored;
            }
            Escape::None => {}
        }

        match byte {
            b'\r' | b'\n' => Edit::Submit,
            0x08 | 0x7f => {
                if self.len == 0 {
                    Edit::Ignored
                } else {
                    self.len -= 1;
                    Edit::Erased
                }
            }
            0x1b => {
                self.escape = Escape::Started;
                Edit::Ignored
            }
            0x20..=0x7e if self.len < LINE_SIZE => {
                self.buf[self.len] = byte;
                self.len += 1;
                Edit::Inserted(byte)
            }
            _ => Edit::Ignored,
        }
    }

    pub fn as_str(&self) -> &str {
        // Only printable ASCII is ever stored.
        core::str::from_utf8(&self.buf[..self.len]).unwrap_or("")
    }

    /// Hands back the current line and starts a new one.
    pub fn take(&mut self) -> Self {
        let line = *self;
        self.len = 0;
        self.escape = Escape::None;
        line
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::Sim;

    fn run_line(app: &mut App, sim: &mut Sim, line: &str) -> (Result<(), ConsoleError>, String) {
        let mut out = String::new();
        let r = execute(app, sim, line, &mut out);
        (r, out)
    }

    #[test]
    fn numbers_and_flags() {
        assert_eq!(parse_number("42"), Ok(42));
        assert_eq!(parse_number("0x2a"), Ok(42));
        assert_eq!(parse_number("0X2A"), Ok(42));
        assert_eq!(parse_number("4x"), Err(ParamError::BadNumber));
        assert_eq!(parse_number("0x"), Err(ParamError::BadNumber));
        assert_eq!(parse_bool("on"), Ok(true));
        assert_eq!(parse_bool("0"), Ok(false));
        assert_eq!(parse_bool("maybe"), Err(ParamError::BadBool));
    }

    #[test]
    fn set_print_and_reset_a_number() {
        let mut app = App::new();
        let mut sim = Sim::new();

        let (r, _) = run_line(&mut app, &mut sim, "set glitch delay 0x100");
        assert_eq!(r, Ok(()));
        assert_eq!(app.config.glitch.delay, 256);

        let (_, out) = run_line(&mut app, &mut sim, "print glitch delay");
        assert_eq!(out, "glitch delay 256 (0x100)\n");

        let (r, out) = run_line(&mut app, &mut sim, "reset glitch delay");
        assert_eq!(r, Ok(()));
        assert_eq!(app.config.glitch.delay, DEFAULTS.glitch.delay);
        assert_eq!(out, "glitch delay 12000 (0x2ee0)\n");
    }

    #[test]
    fn vid_floor_is_enforced() {
        let mut app = App::new();
        let mut sim = Sim::new();

        let (r, out) = run_line(&mut app, &mut sim, "set glitch vid 0x4f");
        assert_eq!(r, Err(ConsoleError::Param(ParamError::VidTooLow)));
        assert!(out.contains("Can't set vid below 0x50"));
        assert_eq!(app.config.glitch.cmd.vid_code, 0x9e);

        let (r, _) = run_line(&mut app, &mut sim, "set glitch vid 0x100");
        assert!(r.is_err());

        let (r, _) = run_line(&mut app, &mut sim, "set core_cmd vid 0x50");
        assert_eq!(r, Ok(()));
        assert_eq!(app.config.core_cmd.vid_code, 0x50);

        let (_, out) = run_line(&mut app, &mut sim, "print core_cmd vid");
        assert_eq!(out, "core_cmd vid 0x50 (1.050000 V)\n");
    }

    #[test]
    fn enum_fields_by_name() {
        let mut app = App::new();
        let mut sim = Sim::new();

        assert_eq!(run_line(&mut app, &mut sim, "set cmd power mid").0, Ok(()));
        assert_eq!(app.config.cmd.power_level, PowerLevel::Mid);
        assert_eq!(run_line(&mut app, &mut sim, "set cmd load_line +40%").0, Ok(()));
        assert_eq!(app.config.cmd.load_line_slope_trim, LoadLineSlopeTrim::Plus40);
        assert_eq!(run_line(&mut app, &mut sim, "set soc_cmd offset -25mV").0, Ok(()));
        assert_eq!(app.config.soc_cmd.offset_trim, OffsetTrim::Minus25mV);

        let (r, out) = run_line(&mut app, &mut sim, "set cmd power max");
        assert_eq!(r, Err(ConsoleError::Param(ParamError::BadName)));
        assert!(out.contains("full_alt"));
    }

    #[test]
    fn reset_module_restores_every_field() {
        let mut app = App::new();
        let mut sim = Sim::new();
        run_line(&mut app, &mut sim, "set cmd set_core yes");
        run_line(&mut app, &mut sim, "set cmd vid 0x70");

        let (r, out) = run_line(&mut app, &mut sim, "reset cmd");
        assert_eq!(r, Ok(()));
        assert_eq!(app.config.cmd, DEFAULTS.cmd);
        assert_eq!(out.lines().count(), 7);
    }

    #[test]
    fn ping_range() {
        let mut app = App::new();
        let mut sim = Sim::new();

        let (r, _) = run_line(&mut app, &mut sim, "set ping repeats 11");
        assert_eq!(
            r,
            Err(ConsoleError::Param(ParamError::OutOfRange { min: 1, max: 10 }))
        );
        run_line(&mut app, &mut sim, "set ping repeats 2");
        let (_, out) = run_line(&mut app, &mut sim, "ping");
        assert_eq!(out, "Pong!\nPong!\n");
    }

    #[test]
    fn detect_goes_through_the_monitor() {
        let mut app = App::new();
        let mut sim = Sim::new();

        run_line(&mut app, &mut sim, "set restart detect off");
        assert_eq!(app.restart.state(), RestartState::DetectionOff);
        let (_, out) = run_line(&mut app, &mut sim, "print restart detect");
        assert_eq!(out, "restart detect off\n");

        run_line(&mut app, &mut sim, "set restart detect yes");
        assert_eq!(app.restart.state(), RestartState::DutOff);
        let (_, out) = run_line(&mut app, &mut sim, "print restart detect");
        assert_eq!(out, "restart detect on (target is off)\n");
    }

    #[test]
    fn pin_config_reconfigures_the_board() {
        let mut app = App::new();
        let mut sim = Sim::new();

        run_line(&mut app, &mut sim, "set hw config 2");
        assert_eq!(app.config.pins, PinConfig::Two);
        assert_eq!(sim.pins, Some(PinConfig::Two));

        let (r, _) = run_line(&mut app, &mut sim, "set hw config 3");
        assert!(r.is_err());
        assert_eq!(app.config.pins, PinConfig::Two);

        let (_, out) = run_line(&mut app, &mut sim, "print hw config");
        assert_eq!(out, "hw config 2 (sim pins 2)\n");
    }

    #[test]
    fn module_options_are_listed_cleanly() {
        let mut app = App::new();
        let mut sim = Sim::new();

        let (r, out) = run_line(&mut app, &mut sim, "set");
        assert_eq!(r, Err(ConsoleError::MissingModule));
        assert_eq!(
            out,
            "Error: You need to specify a module!\n\
             Options are: attack, glitch, restart, cmd, soc_cmd, core_cmd, hw, ping\n"
        );

        let (_, out) = run_line(&mut app, &mut sim, "print bogus");
        assert!(out.ends_with("Options are: <none>, attack, glitch, restart, cmd, soc_cmd, core_cmd, hw, ping\n"));

        let (_, out) = run_line(&mut app, &mut sim, "bogus");
        assert!(out.contains("help, set, reset, print, attack, glitch"));
    }

    #[test]
    fn unknown_words_are_reported() {
        let mut app = App::new();
        let mut sim = Sim::new();

        let (r, out) = run_line(&mut app, &mut sim, "frobnicate");
        assert_eq!(r, Err(ConsoleError::UnknownModule));
        assert!(out.starts_with("Error: unknown module/command!"));
        assert!(out.contains("attack, glitch, restart"));

        let (r, _) = run_line(&mut app, &mut sim, "set glitch nope 1");
        assert_eq!(r, Err(ConsoleError::UnknownParam));
        let (r, _) = run_line(&mut app, &mut sim, "glitch nope");
        assert_eq!(r, Err(ConsoleError::UnknownCommand));
        let (r, _) = run_line(&mut app, &mut sim, "set glitch delay");
        assert_eq!(r, Err(ConsoleError::MissingValue));
        let (r, _) = run_line(&mut app, &mut sim, "set");
        assert_eq!(r, Err(ConsoleError::MissingModule));
        assert_eq!(run_line(&mut app, &mut sim, "   ").0, Ok(()));
    }

    #[test]
    fn manual_glitch_reports_result() {
        let mut app = App::new();
        app.config.glitch.ping_wait = 100;
        let mut sim = Sim::new();

        let (r, out) = run_line(&mut app, &mut sim, "glitch");
        assert_eq!(r, Ok(()));
        assert_eq!(out, "Glitch manually triggered!\nTarget is broken!\n");
    }

    #[test]
    fn glitch_error_fails_the_command() {
        let mut app = App::new();
        app.config.glitch.duration = app.config.glitch.delay + 1;
        let mut sim = Sim::new();
        sim.fail_sends = vec![0];

        let (r, out) = run_line(&mut app, &mut sim, "glitch");
        assert_eq!(r, Err(ConsoleError::Failed));
        assert!(out.contains("Warning: duration is larger than delay!"));
        assert!(out.contains("injection of one of the commands/packets failed"));
    }

    #[test]
    fn manual_restart_and_reset() {
        let mut app = App::new();
        let mut sim = Sim::new();

        let (r, out) = run_line(&mut app, &mut sim, "restart");
        assert_eq!(r, Ok(()));
        assert_eq!(
            out,
            "Manual restart!\nSetting VSoc!\nSetting VCore and disabling telemetry!\n"
        );
        assert_eq!(sim.frames().len(), 2);

        let (_, out) = run_line(&mut app, &mut sim, "restart reset");
        assert_eq!(out, "Resetting target!\n");
        assert_eq!(sim.reset.len(), 2);
    }

    #[test]
    fn inject_and_sniff() {
        let mut app = App::new();
        let mut sim = Sim::new();

        run_line(&mut app, &mut sim, "set cmd set_soc 1");
        run_line(&mut app, &mut sim, "set cmd vid 0x80");
        assert_eq!(run_line(&mut app, &mut sim, "cmd").0, Ok(()));
        assert_eq!(sim.frames(), [app.config.cmd.encode()]);

        sim.rx.push_back(Ok(app.config.core_cmd.encode()));
        let (r, out) = run_line(&mut app, &mut sim, "cmd sniff");
        assert_eq!(r, Ok(()));
        assert!(out.starts_with("Received 0x62 0xacce: core yes, soc no, vid 0x59"));

        let (r, out) = run_line(&mut app, &mut sim, "cmd sniff");
        assert_eq!(r, Err(ConsoleError::Failed));
        assert_eq!(out, "Error: Receiving failed (-5)!\n");
    }

    #[test]
    fn arming_commands() {
        let mut app = App::new();
        let mut sim = Sim::new();

        assert_eq!(run_line(&mut app, &mut sim, "attack").1, "Attack armed!\n");
        assert_eq!(app.attack.state(), crate::attack::AttackState::WaitingOff);
        assert_eq!(run_line(&mut app, &mut sim, "glitch arm").1, "Glitch armed!\n");
        assert!(app.glitch.is_armed());
    }

    #[test]
    fn help_covers_modules_and_items() {
        let mut app = App::new();
        let mut sim = Sim::new();

        let (r, out) = run_line(&mut app, &mut sim, "help");
        assert_eq!(r, Ok(()));
        for m in MODULES {
            assert!(out.contains(&format!("## Module: {} #", m.name)));
        }

        let (r, out) = run_line(&mut app, &mut sim, "help glitch arm");
        assert_eq!(r, Ok(()));
        assert!(out.contains("## arm (command)"));

        let (r, _) = run_line(&mut app, &mut sim, "help glitch bogus");
        assert_eq!(r, Err(ConsoleError::UnknownParam));
    }

    #[test]
    fn print_everything_lists_every_param() {
        let mut app = App::new();
        let mut sim = Sim::new();
        let (_, out) = run_line(&mut app, &mut sim, "print");
        let total: usize = MODULES.iter().map(|m| m.params.len()).sum();
        assert_eq!(out.lines().count(), total);
    }

    #[test]
    fn line_editing() {
        let mut line = LineBuffer::new();
        for &b in b"pinx" {
            assert_eq!(line.push(b), Edit::Inserted(b));
        }
        assert_eq!(line.push(0x7f), Edit::Erased);
        assert_eq!(line.push(b'g'), Edit::Inserted(b'g'));
        // Left arrow is swallowed.
        for &b in b"\x1b[D" {
            assert_eq!(line.push(b), Edit::Ignored);
        }
        assert_eq!(line.push(0x01), Edit::Ignored);
        assert_eq!(line.push(b'\r'), Edit::Submit);

        let taken = line.take();
        assert_eq!(taken.as_str(), "ping");
        assert_eq!(line.as_str(), "");
        assert_eq!(line.push(0x08), Edit::Ignored);
    }

    #[test]
    fn line_stops_at_capacity() {
        let mut line = LineBuffer::new();
        for _ in 0..LINE_SIZE {
            line.push(b'a');
        }
        assert_eq!(line.push(b'a'), Edit::Ignored);
        assert_eq!(line.as_str().len(), LINE_SIZE);
    }
}
