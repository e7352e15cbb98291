//! ATtiny85 watchdog, used to restart into the bootloader after an erase
#![cfg(all(feature = "attiny85", target_arch = "avr"))]

use avr_device::attiny85::{CPU, WDT};
use embedded_hal::watchdog::{Watchdog as _, WatchdogDisable, WatchdogEnable};

#[derive(Clone, Copy)]
#[repr(u8)]
pub enum WatchdogTimeout {
    Ms16 = 0,
    Ms32 = 1,
    Ms64 = 2,
    Ms125 = 3,
    Ms250 = 4,
    Ms500 = 5,
    Ms1000 = 6,
    Ms2000 = 7,
}

// WDTCR bits
const WDCE: u8 = 1 << 4;
const WDE: u8 = 1 << 3;

pub struct Watchdog {
    _private: (),
}

impl Watchdog {
    #[inline]
    pub fn new(_wdt: WDT) -> Self {
        Self { _private: () }
    }

    /// Clear a pending watchdog reset and stop the timer, leaving the
    /// longest prescaler selected.
    pub fn setup(&mut self) {
        unsafe {
            (*CPU::ptr()).mcusr.write(|w| w.bits(0));
        }
        self.disable();
    }

    /// Arm the shortest timeout and wait for the reset.
    pub fn reset(&mut self) -> ! {
        self.start(WatchdogTimeout::Ms16);
        loop {}
    }
}

impl embedded_hal::watchdog::Watchdog for Watchdog {
    #[inline]
    fn feed(&mut self) {
        avr_device::asm::wdr();
    }
}

impl WatchdogEnable for Watchdog {
    type Time = WatchdogTimeout;

    fn start<T: Into<WatchdogTimeout>>(&mut self, period: T) {
        let period = period.into() as u8;
        self.feed();
        unsafe {
            let p = WDT::ptr();
            // Enable change bit and system reset mode
            (*p).wdtcr.write(|w| w.bits(WDCE | WDE));
            // Set timeout and enable watchdog
            (*p).wdtcr.write(|w| w.bits(WDE | (period & 0x07)));
        }
    }
}

impl WatchdogDisable for Watchdog {
    fn disable(&mut self) {
        unsafe {
            let p = WDT::ptr();
            // Timed sequence to disable watchdog
            (*p).wdtcr.write(|w| w.bits(WDCE | WDE));
            (*p).wdtcr.write(|w| w.bits(0x07));
        }
    }
}
