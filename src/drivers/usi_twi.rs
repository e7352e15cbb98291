//! USI TWI slave driver
//!
//! Register sequencing for start detection, address/data shifting and the
//! acknowledge handshake, plus the byte queues the protocol layer talks to.
//! Nothing here runs from an interrupt: the main loop polls the flags with
//! [`UsiTwi::start_pending`] and [`UsiTwi::overflow_pending`] and calls the
//! matching handler.

use core::convert::Infallible;

use super::ring_buffer::RingBuffer;
use super::twi_state::BusState;
use crate::config::{OverrunPolicy, TWI_RX_BUFFER_SIZE, TWI_TX_BUFFER_SIZE};
use crate::hal::usi::{usicr::*, usisr::*, PORT_USI_SCL, PORT_USI_SDA};
use crate::hal::UsiRegisters;

const SDA: u8 = 1 << PORT_USI_SDA;
const SCL: u8 = 1 << PORT_USI_SCL;

pub type RxQueue = RingBuffer<TWI_RX_BUFFER_SIZE>;
pub type TxQueue = RingBuffer<TWI_TX_BUFFER_SIZE>;

pub struct UsiTwi<U> {
    pub(super) usi: U,
    pub(super) state: BusState,
    pub(super) rx: RxQueue,
    pub(super) tx: TxQueue,
    pub(super) own_address: u8,
    rx_overrun: OverrunPolicy,
    rx_dropped: u16,
}

impl<U: UsiRegisters> UsiTwi<U> {
    /// `own_address` is the 7-bit slave address; general calls are answered too.
    pub fn new(usi: U, own_address: u8, rx_overrun: OverrunPolicy) -> Self {
        Self {
            usi,
            state: BusState::CheckAddress,
            rx: RxQueue::new(),
            tx: TxQueue::new(),
            own_address,
            rx_overrun,
            rx_dropped: 0,
        }
    }

    /// Flush the queues, release both lines and start listening for an address.
    pub fn init(&mut self) {
        self.tx.flush();
        self.rx.flush();
        self.usi.modify_ddr(|ddr| ddr | SDA | SCL);
        self.usi.modify_port(|port| port | SDA);
        self.usi.modify_port(|port| port | SCL);
        self.sda_as_input();
        self.wait_for_twi_address();
    }

    /// A start condition was detected and the start handler is armed
    pub fn start_pending(&self) -> bool {
        self.usi.usisr() & USISIF != 0 && self.usi.usicr() & USISIE != 0
    }

    /// The 4-bit counter overflowed and the overflow handler is armed
    pub fn overflow_pending(&self) -> bool {
        self.usi.usisr() & USIOIF != 0 && self.usi.usicr() & USIOIE != 0
    }

    /// Start condition handler.
    ///
    /// Waits for SCL to fall so the start condition is complete. If SDA went
    /// back high first, a stop raced the start and only start detection is
    /// re-armed; otherwise SCL is held on counter overflow so the address
    /// byte reaches the overflow handler.
    pub fn start_handler(&mut self) {
        self.sda_as_input();
        self.state = BusState::CheckAddress;
        while self.usi.pin() & SCL != 0 && self.usi.pin() & SDA == 0 {}
        if self.usi.pin() & SDA == 0 {
            self.detect_restart();
        } else {
            self.detect_start();
        }
        self.shift_8_address_bits();
    }

    /// Queue a reply byte, spinning until the queue has room.
    pub fn transmit_byte(&mut self, byte: u8) {
        nb::block!(self.try_transmit_byte(byte)).unwrap_or_else(|e: Infallible| match e {})
    }

    pub fn try_transmit_byte(&mut self, byte: u8) -> nb::Result<(), Infallible> {
        self.tx.push(byte)
    }

    /// Take the oldest received byte, spinning until one arrives.
    pub fn receive_byte(&mut self) -> u8 {
        nb::block!(self.try_receive_byte()).unwrap_or_else(|e: Infallible| match e {})
    }

    pub fn try_receive_byte(&mut self) -> nb::Result<u8, Infallible> {
        self.rx.pop()
    }

    pub fn rx_len(&self) -> usize {
        self.rx.len()
    }

    pub fn tx_len(&self) -> usize {
        self.tx.len()
    }

    pub fn state(&self) -> BusState {
        self.state
    }

    /// Bytes lost to a full receive queue since boot
    pub fn rx_dropped(&self) -> u16 {
        self.rx_dropped
    }

    pub fn usi(&self) -> &U {
        &self.usi
    }

    /// Store a received byte following the configured overrun policy.
    pub(super) fn store_received(&mut self, byte: u8) {
        match self.rx_overrun {
            OverrunPolicy::DropNewest => {
                if self.rx.push(byte).is_err() {
                    self.rx_dropped = self.rx_dropped.wrapping_add(1);
                }
            }
            OverrunPolicy::DropOldest => {
                if self.rx.is_full() {
                    self.rx_dropped = self.rx_dropped.wrapping_add(1);
                }
                self.rx.push_overwrite(byte);
            }
        }
    }

    // Line direction

    fn sda_as_input(&mut self) {
        self.usi.modify_ddr(|ddr| ddr & !SDA);
    }

    fn sda_as_output(&mut self) {
        self.usi.modify_ddr(|ddr| ddr | SDA);
    }

    // USI configurations

    /// Detect a start condition, then shift the address byte in.
    pub(super) fn wait_for_twi_address(&mut self) {
        self.detect_start();
        self.shift_8_data_bits();
    }

    fn detect_start(&mut self) {
        self.usi.set_usicr(USISIE | USIWM1 | USICS1);
    }

    fn detect_restart(&mut self) {
        self.usi.set_usicr(USISIE | USIOIE | USIWM1 | USIWM0 | USICS1);
    }

    /// Clears the start flag as well, releasing SCL.
    fn shift_8_address_bits(&mut self) {
        self.usi.set_usisr(USISIF | USIOIF | USIPF | USIDC);
    }

    fn shift_8_data_bits(&mut self) {
        self.usi.set_usisr(USIOIF | USIPF | USIDC);
    }

    fn shift_1_ack_bit(&mut self) {
        self.usi.set_usisr(USIOIF | USIPF | USIDC | 0x0E);
    }

    pub(super) fn send_byte(&mut self) {
        self.sda_as_output();
        self.shift_8_data_bits();
    }

    pub(super) fn read_byte(&mut self) {
        self.sda_as_input();
        self.shift_8_data_bits();
    }

    pub(super) fn send_ack(&mut self) {
        self.usi.set_usidr(0);
        self.sda_as_output();
        self.shift_1_ack_bit();
    }

    pub(super) fn read_ack(&mut self) {
        self.usi.set_usidr(0);
        self.sda_as_input();
        self.shift_1_ack_bit();
    }
}
