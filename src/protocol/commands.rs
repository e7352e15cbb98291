//! Command handlers
//!
//! Handlers run inside the bus state machine, between the master's read
//! address and the first reply byte, so they only touch RAM and the SPM page
//! buffer. Erasing and page writes are left to the main loop.

use embedded_hal::digital::v2::OutputPin;

use super::{
    checksum, Command, ProtocolError, Result, GETTMNLV_RPLYLN, STPGADDR_RPLYLN, WRITPAGE_RPLYLN,
};
use crate::bootloader::page;
use crate::bootloader::{Flags, MemoryPack};
use crate::config::{
    Config, Features, RESET_PAGE, SIGNATURE, TWI_TX_BUFFER_SIZE, VERSION_MAJOR, VERSION_MINOR,
};
use crate::drivers::{ReceiveEvent, Reply, StatusLed};
use crate::hal::flash::ERASED_WORD;
use crate::hal::{ClockControl, SelfProgramming};
use crate::logger::{Event, Logger};

/// Everything a handler may read or change, borrowed from the bootloader for
/// the duration of one dispatch
pub struct CommandContext<'a, F, C, P> {
    pub config: &'a Config,
    pub mem: &'a mut MemoryPack,
    pub flash: &'a mut F,
    pub clock: &'a mut C,
    pub led: &'a mut StatusLed<P>,
    pub log: &'a mut Logger,
}

impl<F, C, P> ReceiveEvent for CommandContext<'_, F, C, P>
where
    F: SelfProgramming,
    C: ClockControl,
    P: OutputPin,
{
    fn receive_event(&mut self, command: &[u8], reply: &mut Reply<'_>) {
        let Some(&opcode) = command.first() else {
            return;
        };
        match self.dispatch(opcode, command, reply) {
            Ok(()) => self.log.log_bus(Event::Command { opcode }),
            Err(ProtocolError::UnknownCommand | ProtocolError::CommandDisabled) => {
                self.log.log_error(Event::UnknownCommand { opcode })
            }
            Err(ProtocolError::BadLength) => self.log.log_error(Event::BadLength {
                opcode,
                len: command.len() as u8,
            }),
            Err(ProtocolError::ReplyTooLong) => self.log.log_error(Event::ReplyTooLong {
                opcode,
                len: command.len() as u8,
            }),
        }
    }
}

impl<F, C, P> CommandContext<'_, F, C, P>
where
    F: SelfProgramming,
    C: ClockControl,
    P: OutputPin,
{
    fn dispatch(&mut self, opcode: u8, command: &[u8], reply: &mut Reply<'_>) -> Result<()> {
        let cmd = Command::try_from(opcode)?;
        if !self.enabled(cmd) {
            return Err(ProtocolError::CommandDisabled);
        }
        match cmd {
            Command::GetVersion => self.get_version(command, reply),
            Command::ExitToApp => self.flag(cmd, command, reply, Flags::EXIT),
            Command::DeleteApplication => self.flag(cmd, command, reply, Flags::DEL_FLASH),
            Command::SoftwareInit => self.flag(cmd, command, reply, Flags::INIT_2),
            Command::SetPageAddress => self.set_page_address(command, reply),
            Command::WritePage => self.write_page(command, reply),
            Command::ReadFlash => self.read_flash(command, reply),
        }
    }

    fn enabled(&self, cmd: Command) -> bool {
        match cmd {
            Command::SetPageAddress => self.config.accepts_set_page_address(),
            Command::ReadFlash => self.config.has(Features::CMD_READFLASH),
            Command::SoftwareInit => self.config.has(Features::TWO_STEP_INIT),
            _ => true,
        }
    }

    /// GETTMNLV: identify the bootloader and complete the first init step
    fn get_version(&mut self, command: &[u8], reply: &mut Reply<'_>) -> Result<()> {
        if command.len() != 1 {
            return Err(ProtocolError::BadLength);
        }
        let boot_start = self.config.boot_start.to_be_bytes();
        let version: [u8; GETTMNLV_RPLYLN] = [
            Command::GetVersion.ack(),
            SIGNATURE,
            VERSION_MAJOR,
            VERSION_MINOR,
            self.config.features_byte(),
            self.config.ext_features_byte(),
            boot_start[0],
            boot_start[1],
            self.flash.read_byte(self.config.trampoline_addr() + 1),
            self.flash.read_byte(self.config.trampoline_addr()),
            self.clock.low_fuse(),
            self.clock.osccal(),
        ];
        reply.send(&version)?;
        self.mem.flags.insert(Flags::INIT_1);
        self.led.off().ok();
        Ok(())
    }

    /// Commands that only acknowledge and raise a flag
    fn flag(
        &mut self,
        cmd: Command,
        command: &[u8],
        reply: &mut Reply<'_>,
        flag: Flags,
    ) -> Result<()> {
        if command.len() != 1 {
            return Err(ProtocolError::BadLength);
        }
        reply.send(&[cmd.ack()])?;
        self.mem.flags.insert(flag);
        Ok(())
    }

    /// STPGADDR: select the page the next WRITPAGE data goes to
    fn set_page_address(&mut self, command: &[u8], reply: &mut Reply<'_>) -> Result<()> {
        let &[_, msb, lsb] = command else {
            return Err(ProtocolError::BadLength);
        };
        if reply.free() < STPGADDR_RPLYLN {
            return Err(ProtocolError::ReplyTooLong);
        }
        self.mem.page_addr = u16::from_be_bytes([msb, lsb]) & !(self.config.page_size - 1);
        reply.send(&[Command::SetPageAddress.ack(), checksum(&[msb, lsb])])?;
        Ok(())
    }

    /// WRITPAGE: move one data packet into the page buffer.
    ///
    /// Any inconsistency answers a zero checksum and schedules an erase of
    /// the whole application, so a broken image can never be started.
    fn write_page(&mut self, command: &[u8], reply: &mut Reply<'_>) -> Result<()> {
        if reply.free() < WRITPAGE_RPLYLN {
            return Err(ProtocolError::ReplyTooLong);
        }
        let size = self.config.mst_packet_size as usize;

        let verified = if command.len() != size + 2 {
            self.log.log_error(Event::BadLength {
                opcode: command[0],
                len: command.len() as u8,
            });
            None
        } else if self.mem.page_ix + size as u16 > self.config.page_size {
            self.log.log_error(Event::PageOverrun {
                page_ix: self.mem.page_ix,
            });
            None
        } else {
            let computed = self.fill_page_buffer(&command[1..=size]);
            let received = command[size + 1];
            if computed == received {
                Some(computed)
            } else {
                self.log.log_error(Event::ChecksumMismatch { computed, received });
                None
            }
        };

        let sum = verified.unwrap_or_else(|| {
            self.mem.flags.insert(Flags::DEL_FLASH);
            0
        });
        reply.send(&[Command::WritePage.ack(), sum])?;
        Ok(())
    }

    /// Fill `data` word by word at the current page position, returning its
    /// checksum.
    fn fill_page_buffer(&mut self, data: &[u8]) -> u8 {
        let auto_page_addr = self.config.has(Features::AUTO_PAGE_ADDR);
        let guard_trampoline = auto_page_addr && self.config.has(Features::APP_USE_TPL_PG);

        for pair in data.chunks_exact(2) {
            let addr = self.mem.page_addr + self.mem.page_ix;
            let mut word = u16::from_le_bytes([pair[0], pair[1]]);

            if addr == RESET_PAGE {
                // The reset vector always points at the bootloader, the
                // application's own entry is reached through the trampoline.
                if auto_page_addr {
                    self.mem.app_reset_lsb = pair[0];
                    self.mem.app_reset_msb = pair[1];
                    self.log.log_flash(Event::ResetVector { word });
                }
                word = page::boot_jump(self.config.boot_start);
            } else if guard_trampoline && addr == self.config.trampoline_addr() {
                if word == ERASED_WORD {
                    word = page::trampoline(self.config.boot_start, self.mem.app_reset_word());
                } else {
                    self.log.log_error(Event::TrampolineConflict { found: word });
                    self.mem.flags.insert(Flags::DEL_FLASH);
                }
            }

            self.flash.page_fill(addr, word);
            self.mem.page_ix += 2;
        }
        checksum(data)
    }

    /// READFLSH: stream program memory back with a trailing checksum that
    /// covers the address bytes too
    fn read_flash(&mut self, command: &[u8], reply: &mut Reply<'_>) -> Result<()> {
        let &[_, msb, lsb, len] = command else {
            return Err(ProtocolError::BadLength);
        };
        let len = len as usize;
        if len > self.config.slv_packet_size as usize || len + 2 > reply.free() {
            return Err(ProtocolError::ReplyTooLong);
        }

        let addr = u16::from_be_bytes([msb, lsb]);
        let mut data = [0u8; TWI_TX_BUFFER_SIZE];
        data[0] = Command::ReadFlash.ack();
        let mut sum = checksum(&[msb, lsb]);
        for i in 0..len {
            let byte = self.flash.read_byte(addr.wrapping_add(i as u16));
            data[1 + i] = byte;
            sum = sum.wrapping_add(byte);
        }
        data[1 + len] = sum;
        reply.send(&data[..len + 2])?;
        self.led.toggle().ok();
        Ok(())
    }
}
