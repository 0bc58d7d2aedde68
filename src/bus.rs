// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The SVI2 bus as the engines see it.

use svi2::Frame;

use crate::timing::{busy_wait_ns, busy_wait_us, Level, Line, Timing};

/// Reasons a bus transfer can fail. None of them are fatal; the caller
/// decides whether to retry, restore or report.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BusError {
    /// The controller did not become idle within the deadline.
    BusyTimeout,
    /// A byte was not clocked out (or in) within the deadline.
    ByteTimeout,
    /// The frame's address does not fit in 7 bits.
    BadAddress,
    /// The transmit FIFO still held data when it should have drained.
    FifoMismatch(u32),
    /// The controller reported error flags; raw status attached.
    Status(u32),
    /// Slave receive: the transfer was a read, not a write.
    WrongDirection,
    /// Slave receive: the address byte did not match.
    AddressNotValid,
    /// Slave receive: no data arrived after the address.
    ReceiveEmpty,
    /// Slave receive: a new transfer started mid-frame.
    UnexpectedStart,
    /// Slave receive: more than a frame's worth of data arrived.
    Overrun,
}

impl BusError {
    /// Negative code printed on the console. The tagged variants keep their
    /// low bits so the raw register value can still be read off.
    pub fn code(self) -> i32 {
        match self {
            Self::BusyTimeout => -1,
            Self::BadAddress => -2,
            Self::AddressNotValid => -3,
            Self::WrongDirection => -4,
            Self::ReceiveEmpty => -5,
            Self::UnexpectedStart => -6,
            Self::Overrun => -7,
            Self::ByteTimeout => -8,
            Self::Status(s) => (0x8000_0000 | (s & 0x0fff_ffff)) as i32,
            Self::FifoMismatch(f) => (0xc000_0000 | (f & 0x0fff_ffff)) as i32,
        }
    }
}

/// Raw transport for SVI2 frames.
pub trait Svi2Bus {
    /// Writes `frame` as bus master. On success returns the controller's
    /// final status word.
    fn send(&mut self, frame: Frame, deadline: u32) -> Result<u32, BusError>;

    /// Waits, as a slave, for one frame written by another master.
    fn receive(&mut self, deadline: u32) -> Result<Frame, BusError>;
}

/// Waits until no telemetry burst is in flight and the clock has been idle
/// (high) for about a microsecond.
///
/// Telemetry bursts show up as 0.1-0.2 µs clock low pulses, separated by
/// tens of microseconds of idle. Both phases give up after ~70 µs of tries,
/// so a stuck or absent clock costs a bounded delay and nothing more.
pub fn wait_for_free_bus<T: Timing + ?Sized>(t: &mut T) {
    let mut tries = busy_wait_us(70);
    loop {
        let left = t.spin_while(Line::SviClock, Level::Low, busy_wait_ns(100));
        if left == 0 || tries == 0 {
            break;
        }
        tries -= 1;
    }

    let mut tries = busy_wait_us(70);
    loop {
        let left = t.spin_while(Line::SviClock, Level::High, busy_wait_us(1));
        if left == 0 || tries == 0 {
            break;
        }
        tries -= 1;
    }
}
