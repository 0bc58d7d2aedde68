// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! LPCXpresso55S69 evaluation board.
//!
//! | signal      | config 1           | config 2           |
//! |-------------|--------------------|--------------------|
//! | SVI2 clock  | P1_20 (FC4 SCL)    | P0_14 (FC1 SCL)    |
//! | SVI2 data   | P1_21 (FC4 SDA)    | P0_13 (FC1 SDA)    |
//! | chip-select | P1_1               | P0_16              |
//! | trigger     | P1_2               | P0_17              |
//! | reset       | P1_3 (open drain)  | P0_18 (open drain) |
//!
//! The console is USART0 on P0_29/P0_30, which the on-board debug probe
//! exposes as a USB serial port, at 115200 8N1.
//!
//! The core runs from the 96 MHz FRO. Busy-wait iterations are converted to
//! core cycles and timed with the DWT cycle counter.

use cortex_m::peripheral::DWT;
use lpc55_pac as device;
use svi2::Frame;

use crate::bsp::{Bsp, Console};
use crate::bus::{BusError, Svi2Bus};
use crate::config::PinConfig;
use crate::timing::{Level, Line, Timing, ITERATIONS_PER_US};

const CPU_MHZ: u32 = 96;

// SYSCON clock and reset bits.
const AHB0_IOCON: u32 = 1 << 13;
const AHB0_GPIO0: u32 = 1 << 14;
const AHB0_GPIO1: u32 = 1 << 15;
const AHB1_FC0: u32 = 1 << 11;
const AHB1_FC1: u32 = 1 << 12;
const AHB1_FC4: u32 = 1 << 15;

const FLASHTIM_SHIFT: u32 = 12;
const FLASHTIM_MASK: u32 = 0xf << FLASHTIM_SHIFT;
/// Flash access time for a core clock up to 100 MHz.
const FLASHTIM_96MHZ: u32 = 8 << FLASHTIM_SHIFT;

// IOCON pin register fields.
const IOCON_DIGIMODE: u32 = 1 << 8;
const IOCON_OD: u32 = 1 << 9;
const IOCON_PULLUP: u32 = 2 << 4;

// I2C register fields.
const CFG_MSTEN: u32 = 1 << 0;
const CFG_SLVEN: u32 = 1 << 1;
const STAT_MSTPENDING: u32 = 1 << 0;
const STAT_MSTSTATE_SHIFT: u32 = 1;
const STAT_MSTARBLOSS: u32 = 1 << 4;
const STAT_MSTSTSTPERR: u32 = 1 << 6;
const STAT_SLVPENDING: u32 = 1 << 8;
const STAT_SLVSTATE_SHIFT: u32 = 9;
const STAT_SLVDESEL: u32 = 1 << 15;
const MSTCTL_CONTINUE: u32 = 1 << 0;
const MSTCTL_START: u32 = 1 << 1;
const MSTCTL_STOP: u32 = 1 << 2;
const SLVCTL_CONTINUE: u32 = 1 << 0;

const MST_IDLE: u32 = 0;
const MST_TRANSMIT_READY: u32 = 2;
const MST_NACK_ADDRESS: u32 = 3;
const MST_NACK_DATA: u32 = 4;

const SLV_ADDRESS: u32 = 0;
const SLV_RECEIVE: u32 = 1;

/// SVI2 addresses are 0b11000xx; the slave answers all four.
const SVI2_BASE_ADDRESS: u8 = svi2::CONSTANT << 2;
const SVI2_ADDRESS_MASK: u8 = 0b111_1100;

#[derive(Copy, Clone)]
struct Pin {
    port: usize,
    pin: usize,
}

impl Pin {
    const fn new(port: usize, pin: usize) -> Self {
        Self { port, pin }
    }

    fn mask(self) -> u32 {
        1 << self.pin
    }
}

#[derive(Copy, Clone)]
enum Flexcomm {
    Fc1,
    Fc4,
}

struct PinMap {
    flexcomm: Flexcomm,
    i2c_func: u32,
    scl: Pin,
    sda: Pin,
    cs: Pin,
    trigger: Pin,
    reset: Pin,
    description: &'static str,
}

static PINS_ONE: PinMap = PinMap {
    flexcomm: Flexcomm::Fc4,
    i2c_func: 5,
    scl: Pin::new(1, 20),
    sda: Pin::new(1, 21),
    cs: Pin::new(1, 1),
    trigger: Pin::new(1, 2),
    reset: Pin::new(1, 3),
    description: "FC4 SCL P1_20 SDA P1_21, CS P1_1, trigger P1_2, reset P1_3",
};

static PINS_TWO: PinMap = PinMap {
    flexcomm: Flexcomm::Fc1,
    i2c_func: 1,
    scl: Pin::new(0, 14),
    sda: Pin::new(0, 13),
    cs: Pin::new(0, 16),
    trigger: Pin::new(0, 17),
    reset: Pin::new(0, 18),
    description: "FC1 SCL P0_14 SDA P0_13, CS P0_16, trigger P0_17, reset P0_18",
};

fn pin_map(pins: PinConfig) -> &'static PinMap {
    match pins {
        PinConfig::One => &PINS_ONE,
        PinConfig::Two => &PINS_TWO,
    }
}

/// Converts busy-wait iterations into core cycles, saturating.
fn cpu_cycles(iterations: u32) -> u32 {
    let cycles = u64::from(iterations) * u64::from(CPU_MHZ) / u64::from(ITERATIONS_PER_US);
    u32::try_from(cycles).unwrap_or(u32::MAX)
}

fn iterations(cycles: u32) -> u32 {
    let its = u64::from(cycles) * u64::from(ITERATIONS_PER_US) / u64::from(CPU_MHZ);
    u32::try_from(its).unwrap_or(u32::MAX)
}

pub struct Board {
    gpio: device::GPIO,
    i2c1: device::I2C1,
    i2c4: device::I2C4,
    map: &'static PinMap,
}

/// The USART0 console, split from [`Board`] so reports can be written while
/// the engines hold the board.
pub struct Serial {
    usart: device::USART0,
}

impl Board {
    /// Clocks the chip up and brings up the console. Pins are left alone until
    /// [`Bsp::configure`].
    pub fn new(p: device::Peripherals, mut cp: cortex_m::Peripherals) -> (Self, Serial) {
        let syscon = p.SYSCON;

        // 96 MHz from the FRO, with the flash slowed down to match first.
        p.ANACTRL
            .fro192m_ctrl
            .modify(|_, w| w.ena_96mhzclk().enable().ena_12mhzclk().enable());
        syscon.fmccr.modify(|r, w| unsafe {
            w.bits((r.bits() & !FLASHTIM_MASK) | FLASHTIM_96MHZ)
        });
        syscon.mainclksela.modify(|_, w| w.sel().enum_0x3());
        syscon.mainclkselb.modify(|_, w| w.sel().enum_0x0());

        cp.DCB.enable_trace();
        cp.DWT.enable_cycle_counter();

        syscon.ahbclkctrl0.modify(|r, w| unsafe {
            w.bits(r.bits() | AHB0_IOCON | AHB0_GPIO0 | AHB0_GPIO1)
        });
        let fcs = AHB1_FC0 | AHB1_FC1 | AHB1_FC4;
        syscon.ahbclkctrl1.modify(|r, w| unsafe { w.bits(r.bits() | fcs) });
        syscon.presetctrl1.modify(|r, w| unsafe { w.bits(r.bits() & !fcs) });

        // All flexcomms run from the 12 MHz FRO.
        syscon.fcclksel0().modify(|_, w| w.sel().enum_0x2());
        syscon.fcclksel1().modify(|_, w| w.sel().enum_0x2());
        syscon.fcclksel4().modify(|_, w| w.sel().enum_0x2());

        // Console pins P0_29/P0_30 to FC0 (alt 1).
        set_iocon(Pin::new(0, 29), 1 | IOCON_DIGIMODE);
        set_iocon(Pin::new(0, 30), 1 | IOCON_DIGIMODE);

        p.FLEXCOMM0.pselid.write(|w| w.persel().usart());
        let usart = p.USART0;
        usart
            .fifocfg
            .modify(|_, w| w.enabletx().enabled().enablerx().enabled());
        // 12 MHz / 13 / 8 = 115385 baud.
        usart.brg.write(|w| unsafe { w.brgval().bits(7) });
        usart.osr.write(|w| unsafe { w.osrval().bits(12) });
        // 8N1 configuration
        usart.cfg.write(|w| unsafe {
            w.paritysel()
                .bits(0)
                .stoplen()
                .bit(false)
                .datalen()
                .bits(1)
                .loop_()
                .normal()
                .syncen()
                .asynchronous_mode()
                .clkpol()
                .falling_edge()
                .enable()
                .enabled()
        });

        p.FLEXCOMM1.pselid.write(|w| w.persel().i2c());
        p.FLEXCOMM4.pselid.write(|w| w.persel().i2c());

        let board = Self {
            gpio: p.GPIO,
            i2c1: p.I2C1,
            i2c4: p.I2C4,
            map: &PINS_ONE,
        };
        (board, Serial { usart })
    }

    /// Lights the red LED on PIO1_6 from a fault handler.
    pub fn indicate_fault(gpio: &device::gpio::RegisterBlock) {
        // The LED is active low and pins default to low, so making the pin an
        // output is enough.
        gpio.dir[1].modify(|_, w| unsafe { w.bits(1 << 6) });
    }

    fn i2c(&self) -> &device::i2c0::RegisterBlock {
        match self.map.flexcomm {
            Flexcomm::Fc1 => &*self.i2c1,
            Flexcomm::Fc4 => &*self.i2c4,
        }
    }

    fn line_pin(&self, line: Line) -> Pin {
        match line {
            Line::ChipSelect => self.map.cs,
            Line::SviClock => self.map.scl,
            Line::SviData => self.map.sda,
        }
    }

    fn write_pin(&self, pin: Pin, level: Level) {
        match level {
            Level::High => self.gpio.set[pin.port].write(|w| unsafe { w.setp().bits(pin.mask()) }),
            Level::Low => self.gpio.clr[pin.port].write(|w| unsafe { w.clrp().bits(pin.mask()) }),
        }
    }

    fn make_output(&self, pin: Pin, level: Level) {
        self.write_pin(pin, level);
        self.gpio.dirset[pin.port].write(|w| unsafe { w.dirsetp().bits(pin.mask()) });
    }

    fn release(&self, pin: Pin) {
        self.gpio.dirclr[pin.port].write(|w| unsafe { w.dirclrp().bits(pin.mask()) });
        set_iocon(pin, 0);
    }

    /// Waits for `bits` in the I2C status to become set. Returns the status,
    /// or `None` when `deadline` iterations ran out.
    fn wait_status(&self, bits: u32, deadline: u32) -> Option<u32> {
        let total = cpu_cycles(deadline);
        let start = DWT::cycle_count();
        loop {
            let stat = self.i2c().stat.read().bits();
            if stat & bits != 0 {
                return Some(stat);
            }
            if DWT::cycle_count().wrapping_sub(start) >= total {
                return None;
            }
        }
    }

    fn master_state(stat: u32) -> u32 {
        (stat >> STAT_MSTSTATE_SHIFT) & 0b111
    }

    fn slave_state(stat: u32) -> u32 {
        (stat >> STAT_SLVSTATE_SHIFT) & 0b11
    }

    /// Checks a master status after a byte went out.
    fn check_transmit(stat: u32) -> Result<(), BusError> {
        if stat & (STAT_MSTARBLOSS | STAT_MSTSTSTPERR) != 0 {
            return Err(BusError::Status(stat));
        }
        match Self::master_state(stat) {
            MST_TRANSMIT_READY => Ok(()),
            MST_NACK_ADDRESS => Err(BusError::BadAddress),
            MST_NACK_DATA => Err(BusError::Status(stat)),
            _ => Err(BusError::Status(stat)),
        }
    }

    /// Clocks out the payload after the address byte, returning the final
    /// status word.
    fn transmit(&self, frame: Frame, deadline: u32) -> Result<u32, BusError> {
        let i2c = self.i2c();
        for byte in frame.wire_payload() {
            let stat = self
                .wait_status(STAT_MSTPENDING, deadline)
                .ok_or(BusError::ByteTimeout)?;
            Self::check_transmit(stat)?;
            i2c.mstdat.write(|w| unsafe { w.bits(u32::from(byte)) });
            i2c.mstctl.write(|w| unsafe { w.bits(MSTCTL_CONTINUE) });
        }

        let stat = self
            .wait_status(STAT_MSTPENDING, deadline)
            .ok_or(BusError::ByteTimeout)?;
        Self::check_transmit(stat)?;
        Ok(stat)
    }

    fn stop(&self, deadline: u32) {
        self.i2c().mstctl.write(|w| unsafe { w.bits(MSTCTL_STOP) });
        let _ = self.wait_status(STAT_MSTPENDING, deadline);
    }

    fn slave_off(&self) {
        let i2c = self.i2c();
        i2c.cfg.modify(|r, w| unsafe { w.bits(r.bits() & !CFG_SLVEN) });
        i2c.stat.write(|w| unsafe { w.bits(STAT_SLVDESEL) });
    }

    fn receive_frame(&self, deadline: u32) -> Result<Frame, BusError> {
        let i2c = self.i2c();

        let stat = self
            .wait_status(STAT_SLVPENDING, deadline)
            .ok_or(BusError::ReceiveEmpty)?;
        if Self::slave_state(stat) != SLV_ADDRESS {
            return Err(BusError::UnexpectedStart);
        }
        let raw_address = (i2c.slvdat.read().bits() & 0xff) as u8;
        if raw_address & 1 != 0 {
            return Err(BusError::WrongDirection);
        }
        if (raw_address >> 1) & SVI2_ADDRESS_MASK != SVI2_BASE_ADDRESS {
            return Err(BusError::AddressNotValid);
        }
        i2c.slvctl.write(|w| unsafe { w.bits(SLVCTL_CONTINUE) });

        let mut payload = [0u8; 2];
        for byte in &mut payload {
            let stat = self
                .wait_status(STAT_SLVPENDING, deadline)
                .ok_or(BusError::ByteTimeout)?;
            if stat & STAT_SLVDESEL != 0 {
                return Err(BusError::ReceiveEmpty);
            }
            if Self::slave_state(stat) != SLV_RECEIVE {
                return Err(BusError::UnexpectedStart);
            }
            *byte = (i2c.slvdat.read().bits() & 0xff) as u8;
            i2c.slvctl.write(|w| unsafe { w.bits(SLVCTL_CONTINUE) });
        }

        // A third byte would mean this was not an SVI2 command.
        if let Some(stat) = self.wait_status(STAT_SLVPENDING, 1) {
            if Self::slave_state(stat) == SLV_RECEIVE && stat & STAT_SLVDESEL == 0 {
                return Err(BusError::Overrun);
            }
        }

        Ok(Frame::from_wire(raw_address, payload))
    }
}

/// Writes a pin's IOCON word.
fn set_iocon(pin: Pin, value: u32) {
    // The IOCON pin registers are one word per pin, port 0 then port 1, at
    // the start of the block. The PAC names each of them separately, which
    // makes choosing a pin at runtime impossible through it.
    //
    // Safety: the index is within the 64 pin registers, and IOCON is only
    // written from the superloop.
    unsafe {
        let base = device::IOCON::ptr() as *mut u32;
        base.add(pin.port * 32 + pin.pin).write_volatile(value);
    }
}

impl Timing for Board {
    fn sample(&self, line: Line) -> Level {
        let pin = self.line_pin(line);
        Level::from_bit(self.gpio.b[pin.port].b_[pin.pin].read().bits() != 0)
    }

    fn tick(&mut self) {
        cortex_m::asm::nop();
    }

    fn spin(&mut self, cycles: u32) {
        cortex_m::asm::delay(cpu_cycles(cycles));
    }

    fn spin_while(&mut self, line: Line, level: Level, deadline: u32) -> u32 {
        let total = cpu_cycles(deadline);
        let start = DWT::cycle_count();
        loop {
            let elapsed = DWT::cycle_count().wrapping_sub(start);
            if elapsed >= total {
                return 0;
            }
            if self.sample(line) != level && self.sample(line) != level {
                return iterations(total - elapsed).max(1);
            }
        }
    }
}

impl Svi2Bus for Board {
    fn send(&mut self, frame: Frame, deadline: u32) -> Result<u32, BusError> {
        let i2c = self.i2c();

        let stat = self
            .wait_status(STAT_MSTPENDING, deadline)
            .ok_or(BusError::BusyTimeout)?;
        if Self::master_state(stat) != MST_IDLE {
            return Err(BusError::Status(stat));
        }

        i2c.mstdat
            .write(|w| unsafe { w.bits(u32::from(frame.address) << 1) });
        i2c.mstctl.write(|w| unsafe { w.bits(MSTCTL_START) });

        // Once START is out the bus is ours until we STOP, whatever happens
        // to the rest of the transfer.
        let sent = self.transmit(frame, deadline);
        self.stop(deadline);
        sent
    }

    fn receive(&mut self, deadline: u32) -> Result<Frame, BusError> {
        let i2c = self.i2c();
        i2c.slvadr[0].write(|w| unsafe { w.bits(u32::from(SVI2_BASE_ADDRESS) << 1) });
        i2c.slvqual0
            .write(|w| unsafe { w.bits(u32::from(SVI2_ADDRESS_MASK) << 1) });
        i2c.cfg.modify(|r, w| unsafe { w.bits(r.bits() | CFG_SLVEN) });

        let frame = self.receive_frame(deadline);
        self.slave_off();
        frame
    }
}

impl Bsp for Board {
    fn configure(&mut self, pins: PinConfig) {
        let old = self.map;
        for pin in [old.scl, old.sda, old.cs, old.trigger, old.reset] {
            self.release(pin);
        }
        self.i2c().cfg.write(|w| unsafe { w.bits(0) });

        let map = pin_map(pins);
        self.map = map;

        let i2c_pad = map.i2c_func | IOCON_DIGIMODE | IOCON_OD;
        set_iocon(map.scl, i2c_pad);
        set_iocon(map.sda, i2c_pad);
        set_iocon(map.cs, IOCON_DIGIMODE | IOCON_PULLUP);
        set_iocon(map.trigger, IOCON_DIGIMODE);
        set_iocon(map.reset, IOCON_DIGIMODE | IOCON_OD);
        self.make_output(map.trigger, Level::Low);
        self.make_output(map.reset, Level::High);

        // Fast mode plus from the 12 MHz flexcomm clock: 6 clocks low, 6
        // high.
        let i2c = self.i2c();
        i2c.clkdiv.write(|w| unsafe { w.bits(0) });
        i2c.msttime.write(|w| unsafe { w.bits(4 | (4 << 4)) });
        i2c.cfg.write(|w| unsafe { w.bits(CFG_MSTEN) });
    }

    fn describe(&self, pins: PinConfig) -> &'static str {
        pin_map(pins).description
    }

    fn set_trigger(&mut self, level: Level) {
        self.write_pin(self.map.trigger, level);
    }

    fn set_reset(&mut self, level: Level) {
        self.write_pin(self.map.reset, level);
    }
}

impl Console for Serial {
    fn read_byte(&mut self) -> Option<u8> {
        if self.usart.fifostat.read().rxnotempty().bit_is_set() {
            Some((self.usart.fiford.read().bits() & 0xff) as u8)
        } else {
            None
        }
    }

    fn write_bytes(&mut self, bytes: &[u8]) {
        for &b in bytes {
            while self.usart.fifostat.read().txnotfull().bit_is_clear() {}
            self.usart.fifowr.write(|w| unsafe { w.bits(u32::from(b)) });
        }
    }
}
