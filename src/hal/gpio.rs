#![cfg(all(feature = "attiny85", target_arch = "avr"))]

use avr_device::attiny85::PORTB;
use core::convert::Infallible;
use core::marker::PhantomData;
use embedded_hal::digital::v2::OutputPin;

pub trait PinMode {}
pub struct Input;
pub struct Output;
impl PinMode for Input {}
impl PinMode for Output {}

/// Port B pin `P`
#[derive(Debug)]
pub struct Pin<const P: u8, MODE> {
    _mode: PhantomData<MODE>,
}

impl<const P: u8> Pin<P, Input> {
    /// Port B resets with every pin as a floating input, so the caller only
    /// has to promise it owns pin `P`.
    pub fn new(_portb: &PORTB) -> Self {
        Pin { _mode: PhantomData }
    }
}

impl<const P: u8, MODE: PinMode> Pin<P, MODE> {
    pub fn into_output(self) -> Pin<P, Output> {
        // Set DDRB bit
        unsafe {
            (*PORTB::ptr()).ddrb.modify(|r, w| w.bits(r.bits() | (1 << P)));
        }
        Pin { _mode: PhantomData }
    }
}

impl<const P: u8> OutputPin for Pin<P, Output> {
    type Error = Infallible;

    #[inline]
    fn set_high(&mut self) -> Result<(), Infallible> {
        unsafe {
            (*PORTB::ptr()).portb.modify(|r, w| w.bits(r.bits() | (1 << P)));
        }
        Ok(())
    }

    #[inline]
    fn set_low(&mut self) -> Result<(), Infallible> {
        unsafe {
            (*PORTB::ptr()).portb.modify(|r, w| w.bits(r.bits() & !(1 << P)));
        }
        Ok(())
    }
}

// Pins left free by the USI (PB0 = SDA, PB2 = SCL)
pub mod board {
    use super::*;

    /// Activity LED, never enable it on boards where PB1 switches a load
    pub type LedUi = Pin<1, Output>;
}
