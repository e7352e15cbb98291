//! In-RAM trace of bootloader events
//!
//! There is no console on the target, so entries stay in a fixed ring that a
//! debugger can read, or that host tests can dump through `ufmt`.

use ufmt::derive::uDebug;
use ufmt::{uWrite, uwriteln};

use crate::hal::FlashError;

pub const LOG_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, uDebug)]
pub enum LogType {
    System = 0,
    Bus = 1,
    Flash = 2,
    Error = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, uDebug)]
pub enum Event {
    Boot { features: u8, ext_features: u8 },
    ClockTweak { osccal: u8, prescaler_reset: bool },
    Command { opcode: u8 },
    UnknownCommand { opcode: u8 },
    BadLength { opcode: u8, len: u8 },
    ReplyTooLong { opcode: u8, len: u8 },
    RxOverrun { dropped: u16 },
    ChecksumMismatch { computed: u8, received: u8 },
    PageOverrun { page_ix: u16 },
    ResetVector { word: u16 },
    PageCommit { addr: u16 },
    Trampoline { word: u16 },
    TrampolineConflict { found: u16 },
    FlashFault { addr: u16, error: FlashError },
    Delete,
    Exit,
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, uDebug)]
pub struct LogEntry {
    pub tick: u32,
    pub kind: LogType,
    pub event: Event,
    /// Times the event repeated back to back
    pub count: u16,
}

pub struct Logger {
    buffer: [LogEntry; LOG_CAPACITY],
    buffer_index: usize,
    len: usize,
    tick: u32,
}

impl Logger {
    pub const fn new() -> Self {
        Self {
            buffer: [LogEntry {
                tick: 0,
                kind: LogType::System,
                event: Event::Delete,
                count: 0,
            }; LOG_CAPACITY],
            buffer_index: 0,
            len: 0,
            tick: 0,
        }
    }

    /// Advance the timestamp given to new entries, once per main loop pass
    #[inline]
    pub fn tick(&mut self) {
        self.tick = self.tick.wrapping_add(1);
    }

    pub fn log_system(&mut self, event: Event) {
        self.log_entry(LogType::System, event)
    }

    pub fn log_bus(&mut self, event: Event) {
        self.log_entry(LogType::Bus, event)
    }

    pub fn log_flash(&mut self, event: Event) {
        self.log_entry(LogType::Flash, event)
    }

    pub fn log_error(&mut self, event: Event) {
        self.log_entry(LogType::Error, event)
    }

    fn log_entry(&mut self, kind: LogType, event: Event) {
        if self.len > 0 {
            let last = &mut self.buffer[(self.buffer_index + LOG_CAPACITY - 1) % LOG_CAPACITY];
            if last.kind == kind && last.event == event {
                last.count = last.count.saturating_add(1);
                return;
            }
        }

        self.buffer[self.buffer_index] = LogEntry {
            tick: self.tick,
            kind,
            event,
            count: 1,
        };
        self.buffer_index = (self.buffer_index + 1) % LOG_CAPACITY;
        if self.len < LOG_CAPACITY {
            self.len += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.buffer_index = 0;
        self.len = 0;
    }

    /// Entries from oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> + '_ {
        let first = (self.buffer_index + LOG_CAPACITY - self.len) % LOG_CAPACITY;
        (0..self.len).map(move |i| &self.buffer[(first + i) % LOG_CAPACITY])
    }

    pub fn last(&self) -> Option<&LogEntry> {
        self.iter().last()
    }

    /// Number of logged occurrences of `event`, repeats included
    pub fn occurrences(&self, event: Event) -> u32 {
        self.iter()
            .filter(|entry| entry.event == event)
            .map(|entry| entry.count as u32)
            .sum()
    }

    pub fn dump<W: uWrite>(&self, w: &mut W) -> Result<(), W::Error> {
        for entry in self.iter() {
            uwriteln!(w, "{} {:?} {:?} x{}", entry.tick, entry.kind, entry.event, entry.count)?;
        }
        Ok(())
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new()
    }
}
