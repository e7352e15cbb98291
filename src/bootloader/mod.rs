//! Bootloader main loop
//!
//! [`Bootloader::poll`] is one pass of the super-loop: it runs the bus
//! handlers when their flags are up, and performs the slow operations (page
//! commit, erase, exit) only in the window right after the master NACKed a
//! reply, when the bus is idle.

pub mod clock;
pub mod page;


use bitflags::bitflags;
use embedded_hal::digital::v2::OutputPin;

use crate::config::{Config, ConfigError, ExtFeatures, Features, RESET_PAGE};
use crate::drivers::{StatusLed, UsiTwi};
use crate::hal::{ClockControl, FlashError, SelfProgramming, UsiRegisters};
use crate::logger::{Event, Logger};
use crate::protocol::CommandContext;

pub use self::clock::ClockTweak;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Flags: u8 {
        /// GETTMNLV received
        const INIT_1 = 1 << 0;
        /// INITSOFT received
        const INIT_2 = 1 << 1;
        /// Erase the application at the next slow-operation window
        const DEL_FLASH = 1 << 2;
        /// Run the application at the next slow-operation window
        const EXIT = 1 << 3;
    }
}

/// State shared by the command handlers and the main loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryPack {
    /// Base of the page being assembled, always page aligned
    pub page_addr: u16,
    /// Bytes already in the page buffer
    pub page_ix: u16,
    pub flags: Flags,
    /// The application's own reset vector, captured from the first word of
    /// page 0
    pub app_reset_lsb: u8,
    pub app_reset_msb: u8,
}

impl MemoryPack {
    pub const fn new() -> Self {
        Self {
            page_addr: RESET_PAGE,
            page_ix: 0,
            flags: Flags::empty(),
            app_reset_lsb: 0,
            app_reset_msb: 0,
        }
    }

    pub fn app_reset_word(&self) -> u16 {
        u16::from_le_bytes([self.app_reset_lsb, self.app_reset_msb])
    }

    /// Initialization handshake complete, slow operations are allowed
    pub fn is_initialized(&self, two_step: bool) -> bool {
        let required = if two_step {
            Flags::INIT_1 | Flags::INIT_2
        } else {
            Flags::INIT_1
        };
        self.flags.contains(required)
    }
}

impl Default for MemoryPack {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartMode {
    /// Let the watchdog reset the device
    Watchdog,
    /// Jump to the first bootloader word
    Jump { entry: u16 },
}

/// Where control goes once the bootloader is done. Addresses are in words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handoff {
    /// Jump to the trampoline, which continues into the application
    RunApplication { entry: u16 },
    /// Start the bootloader over, after the application was erased
    Restart { mode: RestartMode },
}

pub struct Bootloader<U, F, C, P> {
    config: Config,
    twi: UsiTwi<U>,
    flash: F,
    clock: C,
    led: StatusLed<P>,
    tweak: ClockTweak,
    mem: MemoryPack,
    log: Logger,
    slow_ops: bool,
    led_delay: u16,
    exit_delay: u8,
    rx_dropped: u16,
    handed_off: bool,
}

impl<U, F, C, P> Bootloader<U, F, C, P>
where
    U: UsiRegisters,
    F: SelfProgramming,
    C: ClockControl,
    P: OutputPin,
{
    /// Validate `config`, tune the clock for the bus, and start listening.
    pub fn new(
        config: Config,
        usi: U,
        mut flash: F,
        mut clock: C,
        led: Option<P>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut log = Logger::new();
        log.log_system(Event::Boot {
            features: config.features_byte(),
            ext_features: config.ext_features_byte(),
        });

        let tweak = ClockTweak::apply(&mut clock, &config);
        log.log_system(Event::ClockTweak {
            osccal: clock.osccal(),
            prescaler_reset: tweak.prescaler_reset(),
        });

        let led = if config.has(Features::LED_UI) {
            StatusLed::new(led)
        } else {
            StatusLed::disabled()
        };

        let mut twi = UsiTwi::new(usi, config.twi_address, config.rx_overrun);
        twi.init();
        flash.clear_page_buffer();

        Ok(Self {
            led_delay: config.led_delay,
            exit_delay: config.exit_cycles,
            config,
            twi,
            flash,
            clock,
            led,
            tweak,
            mem: MemoryPack::new(),
            log,
            slow_ops: false,
            rx_dropped: 0,
            handed_off: false,
        })
    }

    /// Poll until the bootloader decides where control goes next.
    pub fn run(&mut self) -> Handoff {
        loop {
            if let Some(handoff) = self.poll() {
                return handoff;
            }
        }
    }

    /// One main loop pass. Returns the handoff the caller must carry out;
    /// after that every further call is a no-op.
    pub fn poll(&mut self) -> Option<Handoff> {
        if self.handed_off {
            return None;
        }
        self.log.tick();

        if self.twi.start_pending() {
            self.twi.start_handler();
        }
        if self.twi.overflow_pending() {
            let mut ctx = CommandContext {
                config: &self.config,
                mem: &mut self.mem,
                flash: &mut self.flash,
                clock: &mut self.clock,
                led: &mut self.led,
                log: &mut self.log,
            };
            self.slow_ops = self.twi.overflow_handler(&mut ctx);
        }
        self.check_overrun();

        let handoff = if self.mem.is_initialized(self.config.has(Features::TWO_STEP_INIT)) {
            if self.slow_ops {
                self.slow_ops = false;
                self.slow_operations()
            } else {
                None
            }
        } else {
            self.idle()
        };

        self.handed_off = handoff.is_some();
        handoff
    }

    /// At most one of exit, erase or page commit, in that order of priority.
    fn slow_operations(&mut self) -> Option<Handoff> {
        if self.mem.flags.contains(Flags::EXIT) {
            self.log.log_system(Event::Exit);
            self.tweak.restore(&mut self.clock);
            return Some(self.run_application());
        }
        if self.mem.flags.contains(Flags::DEL_FLASH) {
            return Some(self.delete_application());
        }
        let page_full = self.mem.page_ix == self.config.page_size;
        if page_full && self.mem.page_addr < self.config.page_limit() {
            self.commit_page();
        }
        None
    }

    fn run_application(&self) -> Handoff {
        Handoff::RunApplication {
            entry: self.config.trampoline_addr() / 2,
        }
    }

    fn delete_application(&mut self) -> Handoff {
        self.led.on().ok();
        match page::delete_application(&mut self.flash, &self.config) {
            Ok(()) => self.log.log_flash(Event::Delete),
            Err(error) => self.log.log_error(Event::FlashFault {
                addr: self.config.boot_start,
                error,
            }),
        }
        self.tweak.restore_osccal(&mut self.clock);

        let mode = if self.config.has(Features::USE_WDT_RESET) {
            RestartMode::Watchdog
        } else {
            RestartMode::Jump {
                entry: self.config.boot_start / 2,
            }
        };
        Handoff::Restart { mode }
    }

    fn commit_page(&mut self) {
        let addr = self.mem.page_addr;
        let force_erase = self.config.has_ext(ExtFeatures::FORCE_ERASE_PG);
        self.led.toggle().ok();

        match page::commit_page(&mut self.flash, addr, force_erase) {
            Ok(()) => self.log.log_flash(Event::PageCommit { addr }),
            Err(error) => self.flash_fault(addr, error),
        }

        if self.config.has(Features::AUTO_PAGE_ADDR) {
            let tpl = page::trampoline(self.config.boot_start, self.mem.app_reset_word());
            if addr == RESET_PAGE {
                let written =
                    page::write_trampoline_page(&mut self.flash, &self.config, tpl, force_erase);
                match written {
                    Ok(()) => self.log.log_flash(Event::Trampoline { word: tpl }),
                    Err(error) => self.flash_fault(self.config.trampoline_page(), error),
                }
            }
            if self.config.has(Features::APP_USE_TPL_PG) && addr == self.config.trampoline_page() {
                let found = self.flash.read_word(self.config.trampoline_addr());
                if found != tpl {
                    self.log.log_error(Event::TrampolineConflict { found });
                    self.mem.flags.insert(Flags::DEL_FLASH);
                }
            }
            self.mem.page_addr += self.config.page_size;
        }
        self.mem.page_ix = 0;
    }

    fn flash_fault(&mut self, addr: u16, error: FlashError) {
        self.log.log_error(Event::FlashFault { addr, error });
        self.mem.flags.insert(Flags::DEL_FLASH);
    }

    /// Nobody initialized the bootloader yet: blink, and give up on the
    /// master after enough blinks when the timeout exit is enabled.
    fn idle(&mut self) -> Option<Handoff> {
        if self.led_delay > 0 {
            self.led_delay -= 1;
            return None;
        }
        self.led_delay = self.config.led_delay;
        self.led.toggle().ok();

        if self.config.has(Features::TIMEOUT_EXIT) {
            if self.exit_delay == 0 {
                self.log.log_system(Event::Timeout);
                self.tweak.restore(&mut self.clock);
                return Some(self.run_application());
            }
            self.exit_delay -= 1;
        }
        None
    }

    fn check_overrun(&mut self) {
        let dropped = self.twi.rx_dropped();
        if dropped != self.rx_dropped {
            self.rx_dropped = dropped;
            self.log.log_error(Event::RxOverrun { dropped });
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn mem_pack(&self) -> &MemoryPack {
        &self.mem
    }

    pub fn flash(&self) -> &F {
        &self.flash
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn twi(&self) -> &UsiTwi<U> {
        &self.twi
    }

    pub fn led(&self) -> &StatusLed<P> {
        &self.led
    }

    pub fn log(&self) -> &Logger {
        &self.log
    }

    pub fn is_handed_off(&self) -> bool {
        self.handed_off
    }
}
