// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The glitcher firmware.
//!
//! Everything interesting lives in the lib crate; this sets up the board and
//! runs the superloop: poll the engines, then drain console input.

#![no_std]
#![no_main]

use core::sync::atomic::{compiler_fence, Ordering};

use svi2_glitcher::app::App;
use svi2_glitcher::bsp::{Console, ConsoleWriter};

// Select the appropriate BSP type as `Board`
cfg_if::cfg_if! {
    if #[cfg(feature = "target-board-lpc55xpresso")] {
        use svi2_glitcher::bsp::lpc55xpresso::Board;
    }
}

use cortex_m_rt::{entry, exception, ExceptionFrame};

#[entry]
fn main() -> ! {
    // Safety: this is the only place peripherals are taken, and `entry` makes
    // it hard to reenter. `steal` rather than `take` avoids an unwrap for a
    // condition that cannot fail here.
    let p = unsafe { lpc55_pac::Peripherals::steal() };
    let cp = unsafe { cortex_m::Peripherals::steal() };

    let (mut board, mut serial) = Board::new(p, cp);
    let mut app = App::new();

    // The console cannot fail to write; there is nobody to report to anyway.
    let _ = app.start(&mut board, &mut ConsoleWriter(&mut serial));

    loop {
        let _ = app.step(&mut board, &mut ConsoleWriter(&mut serial));

        while let Some(byte) = serial.read_byte() {
            let _ = app.input(byte, &mut board, &mut ConsoleWriter(&mut serial));
        }
    }
}

#[panic_handler]
fn panic_handler(_: &core::panic::PanicInfo) -> ! {
    // We use a BKPT instruction to wake any attached debugger. If no debugger
    // is attached, BKPT escalates into a HardFault, falling to the handler
    // below. This way we can reuse its fault indication code.
    loop {
        cortex_m::asm::bkpt();
    }
}

#[exception]
unsafe fn HardFault(_ef: &ExceptionFrame) -> ! {
    // Safety: the GPIO peripheral is static, and we're not racing anyone by
    // definition since we're handling a HardFault.
    let gpio = unsafe { &*lpc55_pac::GPIO::ptr() };

    Board::indicate_fault(gpio);

    // Spin -- don't use BKPT here because if no debugger is attached it'll
    // escalate to another HardFault and lock the processor.
    loop {
        compiler_fence(Ordering::SeqCst);
    }
}
