//! Bootloader command protocol
//!
//! A command is an opcode byte followed by its payload, written by the master
//! in one or more write transactions. The reply is read back starting with
//! the acknowledge byte, the bitwise complement of the opcode.

pub mod commands;

pub use commands::CommandContext;

use crate::drivers::ReplyTooLong;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    /// Opcode not in the command set
    UnknownCommand,
    /// Opcode known but not enabled in this build
    CommandDisabled,
    /// Payload length doesn't match the command
    BadLength,
    /// Reply bigger than the free transmit queue
    ReplyTooLong,
}

impl From<ReplyTooLong> for ProtocolError {
    fn from(_: ReplyTooLong) -> Self {
        ProtocolError::ReplyTooLong
    }
}

pub type Result<T> = core::result::Result<T, ProtocolError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// INITSOFT, second initialization step
    SoftwareInit = 0x81,
    /// GETTMNLV
    GetVersion = 0x82,
    /// DELFLASH
    DeleteApplication = 0x83,
    /// STPGADDR
    SetPageAddress = 0x84,
    /// WRITPAGE
    WritePage = 0x85,
    /// EXITTMNL
    ExitToApp = 0x86,
    /// READFLSH
    ReadFlash = 0x87,
}

impl Command {
    pub const fn opcode(self) -> u8 {
        self as u8
    }

    pub const fn ack(self) -> u8 {
        !(self as u8)
    }
}

impl TryFrom<u8> for Command {
    type Error = ProtocolError;

    fn try_from(opcode: u8) -> Result<Self> {
        match opcode {
            0x81 => Ok(Command::SoftwareInit),
            0x82 => Ok(Command::GetVersion),
            0x83 => Ok(Command::DeleteApplication),
            0x84 => Ok(Command::SetPageAddress),
            0x85 => Ok(Command::WritePage),
            0x86 => Ok(Command::ExitToApp),
            0x87 => Ok(Command::ReadFlash),
            _ => Err(ProtocolError::UnknownCommand),
        }
    }
}

// Reply lengths, acknowledge byte included
pub const GETTMNLV_RPLYLN: usize = 12;
pub const STPGADDR_RPLYLN: usize = 2;
pub const WRITPAGE_RPLYLN: usize = 2;

/// Sum of `bytes`, modulo 256
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |sum, &byte| sum.wrapping_add(byte))
}
