//! Host models of the ATtiny85 peripherals, and a scripted TWI master
//!
//! The USI model works at bit level: every master clock pulse shifts the line
//! into USIDR and advances the 4-bit counter by two edges. SCL stays low while
//! the start flag is set, or while the overflow flag is set in the
//! hold-on-overflow wire mode, exactly when the real peripheral stretches the
//! clock. A master operation never starts while SCL is held, so the
//! bootloader has to be polled until it releases the line.

use core::convert::Infallible;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

use embedded_hal::digital::v2::OutputPin;

use crate::bootloader::{Bootloader, Handoff};
use crate::config::Config;
use crate::hal::flash::{FlashError, SelfProgramming};
use crate::hal::usi::{usicr, usisr, PORT_USI_SCL, PORT_USI_SDA};
use crate::hal::{ClockControl, ClockDivision, UsiRegisters};

const SDA: u8 = 1 << PORT_USI_SDA;
const SCL: u8 = 1 << PORT_USI_SCL;

pub const FLASH_SIZE: usize = 8 * 1024;

struct UsiState {
    usicr: u8,
    usidr: u8,
    ddr: u8,
    port: u8,
    start_flag: bool,
    overflow_flag: bool,
    stop_flag: bool,
    collision_flag: bool,
    counter: u8,
    master_sda: bool,
    master_scl: bool,
}

impl UsiState {
    fn slave_sda(&self) -> bool {
        if self.ddr & SDA != 0 {
            self.port & SDA != 0 && self.usidr & 0x80 != 0
        } else {
            true
        }
    }

    fn scl_held(&self) -> bool {
        self.start_flag || (self.overflow_flag && self.usicr & usicr::USIWM0 != 0)
    }

    fn count_edge(&mut self) {
        self.counter = (self.counter + 1) & usisr::USICNT_MASK;
        if self.counter == 0 {
            self.overflow_flag = true;
        }
    }
}

/// The bus wires plus the master's view of the USI
#[derive(Clone)]
pub struct SimBus {
    state: Rc<RefCell<UsiState>>,
    mid_transaction: Rc<Cell<bool>>,
}

impl SimBus {
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(UsiState {
                usicr: 0,
                usidr: 0,
                ddr: 0,
                port: 0,
                start_flag: false,
                overflow_flag: false,
                stop_flag: false,
                collision_flag: false,
                counter: 0,
                master_sda: true,
                master_scl: true,
            })),
            mid_transaction: Rc::new(Cell::new(false)),
        }
    }

    /// Register view handed to the device
    pub fn usi(&self) -> SimUsi {
        SimUsi {
            state: self.state.clone(),
        }
    }

    pub fn scl_held(&self) -> bool {
        self.state.borrow().scl_held()
    }

    /// Between a start condition and the end of the transaction
    pub fn mid_transaction(&self) -> bool {
        self.mid_transaction.get()
    }

    pub fn start(&self) {
        let mut s = self.state.borrow_mut();
        assert!(!s.scl_held(), "start while the slave holds SCL");
        s.master_sda = false;
        if s.usicr & usicr::USIWM1 != 0 {
            s.start_flag = true;
        }
        s.master_scl = false;
        self.mid_transaction.set(true);
    }

    pub fn stop(&self) {
        let mut s = self.state.borrow_mut();
        assert!(!s.scl_held(), "stop while the slave holds SCL");
        s.master_sda = false;
        s.master_scl = true;
        s.master_sda = true;
        s.stop_flag = true;
        self.mid_transaction.set(false);
    }

    /// Let SDA go back high with SCL low, as when a stop races a start
    pub fn release_sda(&self) {
        self.state.borrow_mut().master_sda = true;
    }

    /// One SCL pulse with the master driving `bit`, returns the line level
    pub fn clock_bit(&self, bit: bool) -> bool {
        let mut s = self.state.borrow_mut();
        assert!(!s.scl_held(), "clock pulse while the slave holds SCL");
        s.master_sda = bit;
        let line = bit && s.slave_sda();
        if s.usicr & usicr::USICS1 != 0 {
            s.usidr = s.usidr << 1 | line as u8;
            s.count_edge();
            s.count_edge();
        }
        line
    }

    /// Clock the last acknowledge of a read as NACK, ending the handshake
    pub fn nack(&self) {
        self.clock_bit(true);
        self.mid_transaction.set(false);
    }

    pub fn write_bits(&self, byte: u8) {
        self.write_partial(byte, 8);
    }

    /// Only the `bits` most significant bits of `byte`
    pub fn write_partial(&self, byte: u8, bits: u8) {
        for i in (8 - bits..8).rev() {
            self.clock_bit(byte >> i & 1 != 0);
        }
    }

    pub fn read_bits(&self) -> u8 {
        (0..8).fold(0, |byte, _| byte << 1 | self.clock_bit(true) as u8)
    }
}

impl Default for SimBus {
    fn default() -> Self {
        Self::new()
    }
}

pub struct SimUsi {
    state: Rc<RefCell<UsiState>>,
}

impl UsiRegisters for SimUsi {
    fn usicr(&self) -> u8 {
        self.state.borrow().usicr
    }

    fn set_usicr(&mut self, value: u8) {
        self.state.borrow_mut().usicr = value;
    }

    fn usisr(&self) -> u8 {
        let s = self.state.borrow();
        (s.start_flag as u8) << 7
            | (s.overflow_flag as u8) << 6
            | (s.stop_flag as u8) << 5
            | (s.collision_flag as u8) << 4
            | s.counter
    }

    fn set_usisr(&mut self, value: u8) {
        let mut s = self.state.borrow_mut();
        if value & usisr::USISIF != 0 {
            s.start_flag = false;
        }
        if value & usisr::USIOIF != 0 {
            s.overflow_flag = false;
        }
        if value & usisr::USIPF != 0 {
            s.stop_flag = false;
        }
        if value & usisr::USIDC != 0 {
            s.collision_flag = false;
        }
        s.counter = value & usisr::USICNT_MASK;
    }

    fn usidr(&self) -> u8 {
        self.state.borrow().usidr
    }

    fn set_usidr(&mut self, value: u8) {
        self.state.borrow_mut().usidr = value;
    }

    fn ddr(&self) -> u8 {
        self.state.borrow().ddr
    }

    fn set_ddr(&mut self, value: u8) {
        self.state.borrow_mut().ddr = value;
    }

    fn port(&self) -> u8 {
        self.state.borrow().port
    }

    fn set_port(&mut self, value: u8) {
        self.state.borrow_mut().port = value;
    }

    fn pin(&self) -> u8 {
        let s = self.state.borrow();
        let mut pins = 0;
        if s.master_sda && s.slave_sda() {
            pins |= SDA;
        }
        if s.master_scl && !s.scl_held() {
            pins |= SCL;
        }
        pins
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashOp {
    pub addr: u16,
    pub erase: bool,
    pub mid_transaction: bool,
}

struct FlashState {
    memory: Vec<u8>,
    buffer: Vec<Option<u16>>,
    ops: Vec<FlashOp>,
}

/// Program memory with SPM semantics: programming only clears bits, and the
/// temporary page buffer empties after every page write.
#[derive(Clone)]
pub struct SimFlash {
    boot_start: u16,
    page_size: u16,
    state: Rc<RefCell<FlashState>>,
    bus: Option<Rc<Cell<bool>>>,
}

impl SimFlash {
    pub fn new(boot_start: u16, page_size: u16) -> Self {
        Self {
            boot_start,
            page_size,
            state: Rc::new(RefCell::new(FlashState {
                memory: vec![0xFF; FLASH_SIZE],
                buffer: vec![None; page_size as usize / 2],
                ops: Vec::new(),
            })),
            bus: None,
        }
    }

    /// Record whether each erase or write happens while `bus` is mid-transaction
    pub fn watching(mut self, bus: &SimBus) -> Self {
        self.bus = Some(bus.mid_transaction.clone());
        self
    }

    /// Put bytes straight into memory, bootloader region included
    pub fn load(&mut self, addr: u16, bytes: &[u8]) {
        let start = addr as usize;
        self.state.borrow_mut().memory[start..start + bytes.len()].copy_from_slice(bytes);
    }

    pub fn bytes(&self, addr: u16, len: usize) -> Vec<u8> {
        let start = addr as usize;
        self.state.borrow().memory[start..start + len].to_vec()
    }

    /// Every byte in `from..to` holds the erase pattern
    pub fn is_erased(&self, from: u16, to: u16) -> bool {
        self.state.borrow().memory[from as usize..to as usize]
            .iter()
            .all(|&b| b == 0xFF)
    }

    /// Word waiting in the temporary page buffer for the slot of `addr`
    pub fn buffered_word(&self, addr: u16) -> Option<u16> {
        self.state.borrow().buffer[self.slot(addr)]
    }

    pub fn ops(&self) -> Vec<FlashOp> {
        self.state.borrow().ops.clone()
    }

    pub fn erase_log(&self) -> Vec<u16> {
        self.ops().iter().filter(|op| op.erase).map(|op| op.addr).collect()
    }

    pub fn write_log(&self) -> Vec<u16> {
        self.ops().iter().filter(|op| !op.erase).map(|op| op.addr).collect()
    }

    pub fn mid_transaction_ops(&self) -> usize {
        self.ops().iter().filter(|op| op.mid_transaction).count()
    }

    fn slot(&self, addr: u16) -> usize {
        (addr % self.page_size) as usize / 2
    }

    fn page(&self, addr: u16) -> Result<usize, FlashError> {
        if addr as usize >= FLASH_SIZE {
            Err(FlashError::OutOfRange)
        } else if addr >= self.boot_start {
            Err(FlashError::BootSection)
        } else {
            Ok((addr & !(self.page_size - 1)) as usize)
        }
    }

    fn record(&self, addr: usize, erase: bool) {
        let mid_transaction = self.bus.as_ref().map_or(false, |flag| flag.get());
        self.state.borrow_mut().ops.push(FlashOp {
            addr: addr as u16,
            erase,
            mid_transaction,
        });
    }
}

impl SelfProgramming for SimFlash {
    fn clear_page_buffer(&mut self) {
        self.state.borrow_mut().buffer.fill(None);
    }

    fn page_fill(&mut self, addr: u16, word: u16) {
        let slot = self.slot(addr);
        self.state.borrow_mut().buffer[slot] = Some(word);
    }

    fn page_erase(&mut self, addr: u16) -> Result<(), FlashError> {
        let page = self.page(addr)?;
        let size = self.page_size as usize;
        self.state.borrow_mut().memory[page..page + size].fill(0xFF);
        self.record(page, true);
        Ok(())
    }

    fn page_write(&mut self, addr: u16) -> Result<(), FlashError> {
        let page = self.page(addr)?;
        {
            let mut s = self.state.borrow_mut();
            let FlashState { memory, buffer, .. } = &mut *s;
            for (i, word) in buffer.iter_mut().enumerate() {
                if let Some(word) = word.take() {
                    let [lo, hi] = word.to_le_bytes();
                    memory[page + 2 * i] &= lo;
                    memory[page + 2 * i + 1] &= hi;
                }
            }
        }
        self.record(page, false);
        Ok(())
    }

    fn read_byte(&self, addr: u16) -> u8 {
        self.state
            .borrow()
            .memory
            .get(addr as usize)
            .copied()
            .unwrap_or(0xFF)
    }
}

pub struct SimClock {
    low_fuse: u8,
    osccal: u8,
    prescaler: ClockDivision,
    prescaler_writes: usize,
}

impl SimClock {
    /// Out of reset the prescaler follows the CKDIV8 fuse bit
    pub fn new(low_fuse: u8, osccal: u8) -> Self {
        let prescaler = if low_fuse & 0x80 == 0 {
            ClockDivision::Div8
        } else {
            ClockDivision::Div1
        };
        Self {
            low_fuse,
            osccal,
            prescaler,
            prescaler_writes: 0,
        }
    }

    pub fn prescaler(&self) -> ClockDivision {
        self.prescaler
    }

    pub fn prescaler_writes(&self) -> usize {
        self.prescaler_writes
    }
}

impl ClockControl for SimClock {
    fn low_fuse(&mut self) -> u8 {
        self.low_fuse
    }

    fn osccal(&self) -> u8 {
        self.osccal
    }

    fn set_osccal(&mut self, value: u8) {
        self.osccal = value;
    }

    fn set_prescaler(&mut self, division: ClockDivision) {
        self.prescaler = division;
        self.prescaler_writes += 1;
    }
}

/// LED pin remembering every level it was driven to
#[derive(Clone, Default)]
pub struct SimLed {
    history: Rc<RefCell<Vec<bool>>>,
}

impl SimLed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self) -> Vec<bool> {
        self.history.borrow().clone()
    }

    pub fn is_high(&self) -> bool {
        self.history.borrow().last().copied().unwrap_or(false)
    }
}

impl OutputPin for SimLed {
    type Error = Infallible;

    fn set_high(&mut self) -> Result<(), Infallible> {
        self.history.borrow_mut().push(true);
        Ok(())
    }

    fn set_low(&mut self) -> Result<(), Infallible> {
        self.history.borrow_mut().push(false);
        Ok(())
    }
}

pub type SimBootloader = Bootloader<SimUsi, SimFlash, SimClock, SimLed>;

/// Main loop passes a master waits for SCL before giving up on the device
const STALL_LIMIT: usize = 1000;

/// TWI master driving a simulated device, polling its main loop whenever the
/// device stretches the clock
pub struct Master {
    pub bus: SimBus,
    pub flash: SimFlash,
    pub led: SimLed,
    pub boot: SimBootloader,
    pub handoffs: Vec<Handoff>,
    config: Config,
}

impl Master {
    pub fn new(config: Config) -> Self {
        let flash = SimFlash::new(config.boot_start, config.page_size);
        Self::with_flash(config, flash)
    }

    /// Boot a device whose flash already holds an image
    pub fn with_flash(config: Config, flash: SimFlash) -> Self {
        let bus = SimBus::new();
        let flash = flash.watching(&bus);
        let led = SimLed::new();
        let boot = Self::power_on(config, &bus, &flash, &led);
        Self {
            bus,
            flash,
            led,
            boot,
            handoffs: Vec::new(),
            config,
        }
    }

    fn power_on(config: Config, bus: &SimBus, flash: &SimFlash, led: &SimLed) -> SimBootloader {
        let clock = SimClock::new(config.low_fuse, 0x80);
        Bootloader::new(config, bus.usi(), flash.clone(), clock, Some(led.clone()))
            .expect("valid configuration")
    }

    /// Reset the device, keeping flash contents
    pub fn restart(&mut self) {
        self.boot = Self::power_on(self.config, &self.bus, &self.flash, &self.led);
    }

    pub fn address(&self) -> u8 {
        self.config.twi_address
    }

    /// One main loop pass
    pub fn step(&mut self) {
        if let Some(handoff) = self.boot.poll() {
            self.handoffs.push(handoff);
        }
    }

    pub fn idle(&mut self, passes: usize) {
        for _ in 0..passes {
            self.step();
        }
    }

    fn wait_for_scl(&mut self) -> bool {
        for _ in 0..STALL_LIMIT {
            if !self.bus.scl_held() {
                return true;
            }
            self.step();
        }
        false
    }

    fn send(&mut self, byte: u8) -> bool {
        if !self.wait_for_scl() {
            return false;
        }
        self.bus.write_bits(byte);
        self.wait_for_scl() && !self.bus.clock_bit(true)
    }

    fn end(&mut self) {
        if self.wait_for_scl() {
            self.bus.stop();
        }
    }

    /// Write transaction, returns whether every byte was acknowledged
    pub fn write(&mut self, address: u8, bytes: &[u8]) -> bool {
        if !self.wait_for_scl() {
            return false;
        }
        self.bus.start();
        let mut acked = self.send(address << 1);
        for &byte in bytes {
            if !acked {
                break;
            }
            acked = self.send(byte);
        }
        self.end();
        acked
    }

    /// Read transaction of `len` bytes, NACKing the last one
    pub fn read(&mut self, address: u8, len: usize) -> Option<Vec<u8>> {
        if !self.wait_for_scl() {
            return None;
        }
        self.bus.start();
        if !self.send(address << 1 | 1) {
            self.end();
            return None;
        }
        let mut bytes = Vec::with_capacity(len);
        for i in 0..len {
            if !self.wait_for_scl() {
                return None;
            }
            bytes.push(self.bus.read_bits());
            if !self.wait_for_scl() {
                return None;
            }
            if i + 1 == len {
                self.bus.nack();
            } else {
                self.bus.clock_bit(false);
            }
        }
        self.end();
        Some(bytes)
    }

    /// Write `command` to the bootloader and read `reply_len` bytes back
    pub fn command(&mut self, command: &[u8], reply_len: usize) -> Option<Vec<u8>> {
        let address = self.address();
        if !self.write(address, command) {
            return None;
        }
        self.read(address, reply_len)
    }
}
