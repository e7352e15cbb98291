#![no_std]
#![no_main]
#![feature(asm_experimental_arch)]

use avr_device::attiny85::Peripherals;
use core::arch::asm;
use panic_halt as _;

use usi_twi_boot::bootloader::{Bootloader, Handoff, RestartMode};
use usi_twi_boot::config::{Config, Features};
use usi_twi_boot::hal::clock::Clock;
use usi_twi_boot::hal::flash::Spm;
use usi_twi_boot::hal::gpio::{board::LedUi, Input, Pin};
use usi_twi_boot::hal::usi::Attiny85Usi;
use usi_twi_boot::hal::watchdog::Watchdog;

#[avr_device::entry]
fn main() -> ! {
    let Some(dp) = Peripherals::take() else {
        panic!("peripherals already taken");
    };

    // A watchdog restart after an erase leaves the timer running
    let mut watchdog = Watchdog::new(dp.WDT);
    watchdog.setup();

    let config = Config::default();
    let led: Option<LedUi> = config
        .has(Features::LED_UI)
        .then(|| Pin::<1, Input>::new(&dp.PORTB).into_output());
    let usi = Attiny85Usi::new(dp.USI, dp.PORTB);
    let flash = Spm::new(config.boot_start);
    let clock = Clock::new(&dp.CPU);

    let Ok(mut boot) = Bootloader::new(config, usi, flash, clock, led) else {
        panic!("invalid bootloader configuration");
    };

    match boot.run() {
        Handoff::RunApplication { entry }
        | Handoff::Restart {
            mode: RestartMode::Jump { entry },
        } => unsafe { jump(entry) },
        Handoff::Restart {
            mode: RestartMode::Watchdog,
        } => watchdog.reset(),
    }
}

/// Transfer control to the word address `entry`, never to return.
unsafe fn jump(entry: u16) -> ! {
    asm!("ijmp", in("Z") entry, options(noreturn));
}
