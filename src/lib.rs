//! TWI bootloader for ATtiny25/45/85, built on the USI peripheral
//!
//! The device answers as a TWI slave without interrupts: the main loop polls
//! the USI flags, runs a byte-level slave state machine, and hands complete
//! commands to the protocol layer. Flash is only erased or written in the
//! window after the master has finished reading a reply.
//!
//! Everything except the register implementations in [`hal`] builds on the
//! host, where `testing` provides a simulated USI, flash and bus master.

#![cfg_attr(not(test), no_std)]
#![cfg_attr(target_arch = "avr", feature(asm_experimental_arch))]

pub mod bootloader;
pub mod config;
pub mod drivers;
pub mod hal;
pub mod logger;
pub mod protocol;

#[cfg(test)]
pub mod testing;
