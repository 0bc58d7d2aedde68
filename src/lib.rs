#![cfg_attr(not(test), no_std)]

//! SVI2 voltage glitcher for AMD targets.
//!
//! The firmware sits between a target's SoC and its voltage regulator on the
//! SVI2 bus. It watches the target power up, replays the regulator boot
//! commands, and on request drops a rail for a cycle-counted window while
//! timing everything against the target's boot flash chip-select.
//!
//! The engines ([`restart`], [`glitch`], [`attack`]) are written against the
//! traits in [`bsp`], so they build and test on the host; the board code is
//! only compiled when a `target-board-*` feature is selected.

pub mod app;
pub mod attack;
pub mod bsp;
pub mod bus;
pub mod config;
pub mod console;
pub mod glitch;
pub mod restart;
pub mod ringbuf;
pub mod timing;

#[cfg(test)]
mod sim;

pub use svi2;
