//! System clock: fuse query, oscillator calibration, CPU prescaler

/// CPU clock division factor, as CLKPS bits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ClockDivision {
    Div1 = 0b0000,
    Div8 = 0b0011,
}

pub trait ClockControl {
    /// Low fuse byte
    fn low_fuse(&mut self) -> u8;
    fn osccal(&self) -> u8;
    fn set_osccal(&mut self, value: u8);
    fn set_prescaler(&mut self, division: ClockDivision);
}

#[cfg(all(feature = "attiny85", target_arch = "avr"))]
pub use self::attiny85::Clock;

#[cfg(all(feature = "attiny85", target_arch = "avr"))]
mod attiny85 {
    use super::{ClockControl, ClockDivision};
    use avr_device::attiny85::CPU;
    use core::arch::asm;

    const CLKPCE: u8 = 1 << 7;

    // SPMCSR bits for fuse reads
    const SPMEN: u8 = 1 << 0;
    const RFLB: u8 = 1 << 3;

    pub struct Clock {
        _private: (),
    }

    impl Clock {
        pub fn new(_cpu: &CPU) -> Self {
            Self { _private: () }
        }
    }

    impl ClockControl for Clock {
        fn low_fuse(&mut self) -> u8 {
            let value: u8;
            unsafe {
                asm!(
                    "out 0x37, {op}",
                    "lpm {value}, Z",
                    op = in(reg) RFLB | SPMEN,
                    value = out(reg) value,
                    in("Z") 0u16,
                );
            }
            value
        }

        #[inline]
        fn osccal(&self) -> u8 {
            unsafe { (*CPU::ptr()).osccal.read().bits() }
        }

        #[inline]
        fn set_osccal(&mut self, value: u8) {
            unsafe { (*CPU::ptr()).osccal.write(|w| w.bits(value)) }
        }

        #[inline]
        fn set_prescaler(&mut self, division: ClockDivision) {
            unsafe {
                let p = CPU::ptr();
                // Timed sequence: enable the change, then set the factor
                (*p).clkpr.write(|w| w.bits(CLKPCE));
                (*p).clkpr.write(|w| w.bits(division as u8));
            }
        }
    }
}
