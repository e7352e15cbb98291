//! USI (Universal Serial Interface) register access

/// USICR bits
pub mod usicr {
    /// Start condition interrupt enable
    pub const USISIE: u8 = 1 << 7;
    /// Counter overflow interrupt enable
    pub const USIOIE: u8 = 1 << 6;
    /// Wire mode, `USIWM1` alone selects two-wire mode
    pub const USIWM1: u8 = 1 << 5;
    /// Two-wire mode with SCL held low on counter overflow
    pub const USIWM0: u8 = 1 << 4;
    pub const USICS1: u8 = 1 << 3;
    pub const USICS0: u8 = 1 << 2;
    pub const USICLK: u8 = 1 << 1;
    pub const USITC: u8 = 1 << 0;
}

/// USISR bits, flags are cleared by writing one to them
pub mod usisr {
    /// Start condition detected
    pub const USISIF: u8 = 1 << 7;
    /// 4-bit counter overflow
    pub const USIOIF: u8 = 1 << 6;
    /// Stop condition detected
    pub const USIPF: u8 = 1 << 5;
    /// Data output collision
    pub const USIDC: u8 = 1 << 4;
    pub const USICNT_MASK: u8 = 0x0F;
}

/// USI pins on port B
pub const PORT_USI_SDA: u8 = 0;
pub const PORT_USI_SCL: u8 = 2;

/// Register block the bus driver works against.
///
/// Writes to USISR must behave like the hardware: every flag bit written as
/// one is cleared, flag bits written as zero are left alone and the low nibble
/// loads the 4-bit counter.
pub trait UsiRegisters {
    fn usicr(&self) -> u8;
    fn set_usicr(&mut self, value: u8);
    fn usisr(&self) -> u8;
    fn set_usisr(&mut self, value: u8);
    fn usidr(&self) -> u8;
    fn set_usidr(&mut self, value: u8);

    /// Port B data direction
    fn ddr(&self) -> u8;
    fn set_ddr(&mut self, value: u8);
    /// Port B output latch
    fn port(&self) -> u8;
    fn set_port(&mut self, value: u8);
    /// Port B input pins
    fn pin(&self) -> u8;

    #[inline]
    fn modify_ddr(&mut self, f: impl FnOnce(u8) -> u8) {
        let value = f(self.ddr());
        self.set_ddr(value);
    }

    #[inline]
    fn modify_port(&mut self, f: impl FnOnce(u8) -> u8) {
        let value = f(self.port());
        self.set_port(value);
    }
}

#[cfg(all(feature = "attiny85", target_arch = "avr"))]
pub use self::attiny85::Attiny85Usi;

#[cfg(all(feature = "attiny85", target_arch = "avr"))]
mod attiny85 {
    use super::UsiRegisters;
    use avr_device::attiny85::{PORTB, USI};
    use core::marker::PhantomData;

    /// The ATtiny25/45/85 USI peripheral on port B
    pub struct Attiny85Usi {
        _usi: PhantomData<USI>,
    }

    impl Attiny85Usi {
        /// Takes the USI and port B register blocks by value so nothing else
        /// can reconfigure them behind the driver's back.
        pub fn new(_usi: USI, _portb: PORTB) -> Self {
            Self { _usi: PhantomData }
        }
    }

    impl UsiRegisters for Attiny85Usi {
        #[inline]
        fn usicr(&self) -> u8 {
            unsafe { (*USI::ptr()).usicr.read().bits() }
        }

        #[inline]
        fn set_usicr(&mut self, value: u8) {
            unsafe { (*USI::ptr()).usicr.write(|w| w.bits(value)) }
        }

        #[inline]
        fn usisr(&self) -> u8 {
            unsafe { (*USI::ptr()).usisr.read().bits() }
        }

        #[inline]
        fn set_usisr(&mut self, value: u8) {
            unsafe { (*USI::ptr()).usisr.write(|w| w.bits(value)) }
        }

        #[inline]
        fn usidr(&self) -> u8 {
            unsafe { (*USI::ptr()).usidr.read().bits() }
        }

        #[inline]
        fn set_usidr(&mut self, value: u8) {
            unsafe { (*USI::ptr()).usidr.write(|w| w.bits(value)) }
        }

        #[inline]
        fn ddr(&self) -> u8 {
            unsafe { (*PORTB::ptr()).ddrb.read().bits() }
        }

        #[inline]
        fn set_ddr(&mut self, value: u8) {
            unsafe { (*PORTB::ptr()).ddrb.write(|w| w.bits(value)) }
        }

        #[inline]
        fn port(&self) -> u8 {
            unsafe { (*PORTB::ptr()).portb.read().bits() }
        }

        #[inline]
        fn set_port(&mut self, value: u8) {
            unsafe { (*PORTB::ptr()).portb.write(|w| w.bits(value)) }
        }

        #[inline]
        fn pin(&self) -> u8 {
            unsafe { (*PORTB::ptr()).pinb.read().bits() }
        }
    }
}
