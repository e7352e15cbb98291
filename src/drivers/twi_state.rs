//! Byte-level TWI slave state machine, stepped once per USI counter overflow

use core::convert::Infallible;

use super::usi_twi::{TxQueue, UsiTwi};
use crate::config::TWI_RX_BUFFER_SIZE;
use crate::hal::UsiRegisters;

/// Where the slave is within the current transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusState {
    /// Address byte shifted in, decide whether to answer
    CheckAddress,
    /// Load the next reply byte, or end the transfer when none is left
    SendData,
    /// Byte sent, shift the master's acknowledge in
    WaitAckAfterSend,
    /// Master acknowledge received, NACK ends the read
    CheckAck,
    /// Shift a byte in from the master
    ReceiveData,
    /// Byte received, queue it and acknowledge
    ReceiveAndAck,
}

/// Receiver of complete commands, called when the master turns the bus around
/// to read the answer.
pub trait ReceiveEvent {
    fn receive_event(&mut self, command: &[u8], reply: &mut Reply<'_>);
}

/// Reply side of the transmit queue handed to a command handler
pub struct Reply<'a> {
    tx: &'a mut TxQueue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyTooLong {
    pub len: usize,
    pub free: usize,
}

impl<'a> Reply<'a> {
    pub fn new(tx: &'a mut TxQueue) -> Self {
        Self { tx }
    }

    /// Room left in the transmit queue
    pub fn free(&self) -> usize {
        self.tx.free()
    }

    /// Queue a whole reply or nothing.
    ///
    /// Nobody drains the queue while a handler runs, so waiting for room
    /// would never end: the length is checked up front instead.
    pub fn send(&mut self, bytes: &[u8]) -> Result<(), ReplyTooLong> {
        let free = self.free();
        if bytes.len() > free {
            return Err(ReplyTooLong { len: bytes.len(), free });
        }
        for &byte in bytes {
            nb::block!(self.tx.push(byte)).unwrap_or_else(|e: Infallible| match e {});
        }
        Ok(())
    }
}

impl<U: UsiRegisters> UsiTwi<U> {
    /// Counter overflow handler.
    ///
    /// Runs one state transition and reprograms the USI for the next phase,
    /// which also clears the overflow flag. Returns `true` once per read
    /// transaction, when the master NACKs the last reply byte: the bus is idle
    /// and slow operations may run.
    pub fn overflow_handler<E: ReceiveEvent>(&mut self, events: &mut E) -> bool {
        match self.state {
            BusState::CheckAddress => {
                self.check_address(events);
                false
            }
            BusState::CheckAck => {
                if self.usi.usidr() != 0 {
                    self.wait_for_twi_address();
                    return true;
                }
                self.send_data()
            }
            BusState::SendData => self.send_data(),
            BusState::WaitAckAfterSend => {
                self.state = BusState::CheckAck;
                self.read_ack();
                false
            }
            BusState::ReceiveData => {
                self.state = BusState::ReceiveAndAck;
                self.read_byte();
                false
            }
            BusState::ReceiveAndAck => {
                let byte = self.usi.usidr();
                self.store_received(byte);
                self.state = BusState::ReceiveData;
                self.send_ack();
                false
            }
        }
    }

    fn check_address<E: ReceiveEvent>(&mut self, events: &mut E) {
        let address = self.usi.usidr();
        if address != 0 && address >> 1 != self.own_address {
            self.wait_for_twi_address();
            return;
        }
        if address & 0x01 != 0 {
            // Master wants the answer: whatever arrived since the last read
            // is the command.
            if !self.rx.is_empty() {
                // A new command drops whatever is left of the previous reply
                self.tx.flush();
                let mut command = [0u8; TWI_RX_BUFFER_SIZE];
                let mut len = 0;
                while let Ok(byte) = self.rx.pop() {
                    command[len] = byte;
                    len += 1;
                }
                events.receive_event(&command[..len], &mut Reply::new(&mut self.tx));
            }
            self.state = BusState::SendData;
        } else {
            // Every write starts a new command, bytes from an aborted one are
            // never dispatched.
            self.rx.flush();
            self.state = BusState::ReceiveData;
        }
        self.send_ack();
    }

    fn send_data(&mut self) -> bool {
        match self.tx.pop() {
            Ok(byte) => {
                self.usi.set_usidr(byte);
                self.state = BusState::WaitAckAfterSend;
                self.send_byte();
            }
            Err(_) => {
                self.read_ack();
                self.wait_for_twi_address();
            }
        }
        false
    }
}
