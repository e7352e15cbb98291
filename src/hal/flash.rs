//! Program memory self-programming (SPM)

use ufmt::derive::uDebug;

/// Word written to a page buffer slot that should stay erased
pub const ERASED_WORD: u16 = 0xFFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, uDebug)]
pub enum FlashError {
    /// Address beyond the end of program memory
    OutOfRange,
    /// Page overlaps the bootloader itself
    BootSection,
}

/// Self-programming primitives.
///
/// Fills go to the temporary page buffer, one word at a time, and land in
/// flash on `page_write`. Programming can only clear bits, so a page that
/// wasn't erased ends up holding the AND of old and new content. The
/// temporary buffer is left erased after each page write.
pub trait SelfProgramming {
    fn clear_page_buffer(&mut self);
    fn page_fill(&mut self, addr: u16, word: u16);
    fn page_erase(&mut self, addr: u16) -> Result<(), FlashError>;
    fn page_write(&mut self, addr: u16) -> Result<(), FlashError>;
    fn read_byte(&self, addr: u16) -> u8;

    /// Little-endian word at `addr`
    fn read_word(&self, addr: u16) -> u16 {
        u16::from_le_bytes([self.read_byte(addr), self.read_byte(addr.wrapping_add(1))])
    }
}

#[cfg(all(feature = "attiny85", target_arch = "avr"))]
pub use self::attiny85::Spm;

#[cfg(all(feature = "attiny85", target_arch = "avr"))]
mod attiny85 {
    use super::{FlashError, SelfProgramming};
    use core::arch::asm;

    const FLASH_SIZE: u32 = 8 * 1024;

    // SPMCSR bits
    const SPMEN: u8 = 1 << 0;
    const PGERS: u8 = 1 << 1;
    const PGWRT: u8 = 1 << 2;
    const CTPB: u8 = 1 << 4;

    /// SPM access guarded against touching the bootloader's own pages
    pub struct Spm {
        boot_start: u16,
    }

    impl Spm {
        pub fn new(boot_start: u16) -> Self {
            Self { boot_start }
        }

        fn check(&self, addr: u16) -> Result<(), FlashError> {
            if addr as u32 >= FLASH_SIZE {
                Err(FlashError::OutOfRange)
            } else if addr >= self.boot_start {
                Err(FlashError::BootSection)
            } else {
                Ok(())
            }
        }
    }

    /// Issue one SPM operation and spin until the CPU reports it done.
    #[inline(always)]
    unsafe fn spm(addr: u16, op: u8, word: u16) {
        asm!(
            "movw r0, {word}",
            "out 0x37, {op}",
            "spm",
            "clr r1",
            "1:",
            "in {op}, 0x37",
            "sbrc {op}, 0",
            "rjmp 1b",
            word = in(reg_iw) word,
            op = inout(reg) op => _,
            in("Z") addr,
        );
    }

    impl SelfProgramming for Spm {
        fn clear_page_buffer(&mut self) {
            unsafe { spm(0, CTPB | SPMEN, 0) }
        }

        fn page_fill(&mut self, addr: u16, word: u16) {
            unsafe { spm(addr, SPMEN, word) }
        }

        fn page_erase(&mut self, addr: u16) -> Result<(), FlashError> {
            self.check(addr)?;
            unsafe { spm(addr, PGERS | SPMEN, 0) };
            Ok(())
        }

        fn page_write(&mut self, addr: u16) -> Result<(), FlashError> {
            self.check(addr)?;
            unsafe { spm(addr, PGWRT | SPMEN, 0) };
            Ok(())
        }

        fn read_byte(&self, addr: u16) -> u8 {
            let value: u8;
            unsafe {
                asm!(
                    "lpm {value}, Z",
                    value = out(reg) value,
                    in("Z") addr,
                );
            }
            value
        }
    }
}
