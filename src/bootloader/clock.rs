use crate::config::{Config, ExtFeatures};
use crate::hal::{ClockControl, ClockDivision};

/// Low fuse CKSEL bits
const CLK_SRC_MASK: u8 = 0x0F;
/// Internal 8 MHz RC oscillator
const RCOSC_CLK_SRC: u8 = 0x02;
/// 16 MHz high-frequency PLL
const HFPLL_CLK_SRC: u8 = 0x01;
/// CKDIV8, programmed (0) divides the clock by 8
const LFUSE_PRESC_BIT: u8 = 1 << 7;
/// Added to the factory OSCCAL so the RC oscillator keeps up with the bus
const OSC_FAST: u8 = 0x4C;

/// Clock adjustments made at boot, kept so they can be undone before the
/// application runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockTweak {
    low_fuse: u8,
    factory_osccal: Option<u8>,
}

impl ClockTweak {
    pub fn apply<C: ClockControl>(clock: &mut C, config: &Config) -> Self {
        let low_fuse = if config.has_ext(ExtFeatures::AUTO_CLK_TWEAK) {
            clock.low_fuse()
        } else {
            config.low_fuse
        };

        let mut factory_osccal = None;
        match low_fuse & CLK_SRC_MASK {
            RCOSC_CLK_SRC => {
                let osccal = clock.osccal();
                factory_osccal = Some(osccal);
                clock.set_osccal(osccal.wrapping_add(OSC_FAST));
            }
            HFPLL_CLK_SRC => {}
            // Unknown source, run the external clock undivided
            _ => clock.set_prescaler(ClockDivision::Div1),
        }
        if low_fuse & LFUSE_PRESC_BIT == 0 {
            clock.set_prescaler(ClockDivision::Div1);
        }

        Self {
            low_fuse,
            factory_osccal,
        }
    }

    pub fn low_fuse(&self) -> u8 {
        self.low_fuse
    }

    /// The fuse asks for a divided clock, which the bootloader overrode
    pub fn prescaler_reset(&self) -> bool {
        self.low_fuse & LFUSE_PRESC_BIT == 0
    }

    pub fn restore_osccal<C: ClockControl>(&self, clock: &mut C) {
        if let Some(osccal) = self.factory_osccal {
            clock.set_osccal(osccal);
        }
    }

    /// Put the clock back the way the fuses configure it.
    pub fn restore<C: ClockControl>(&self, clock: &mut C) {
        self.restore_osccal(clock);
        if self.prescaler_reset() {
            clock.set_prescaler(ClockDivision::Div8);
        }
    }
}
