//! Flash page engine: page commits, the application erase and the jump
//! instructions that keep the reset vector pointing at the bootloader

use crate::config::{Config, RESET_PAGE};
use crate::hal::flash::{FlashError, SelfProgramming, ERASED_WORD};

const RJMP: u16 = 0xC000;
const RJMP_OFFSET_MASK: u16 = 0x0FFF;

/// `rjmp` placed in the reset vector, landing on the first bootloader word
pub fn boot_jump(boot_start: u16) -> u16 {
    RJMP + (boot_start / 2 - 1)
}

/// `rjmp` for the last word before the bootloader that lands where the
/// application's own reset vector `app_reset` (an `rjmp` at word 0) led.
pub fn trampoline(boot_start: u16, app_reset: u16) -> u16 {
    let target = app_reset.wrapping_add(1) & RJMP_OFFSET_MASK;
    ((!((boot_start >> 1).wrapping_sub(target))).wrapping_add(1) & RJMP_OFFSET_MASK) | RJMP
}

/// Word address an `rjmp` located at word `at` transfers control to
pub fn rjmp_target(word: u16, at: u16) -> u16 {
    at.wrapping_add(1).wrapping_add(word & RJMP_OFFSET_MASK) & RJMP_OFFSET_MASK
}

/// Program the filled page buffer at `addr`, erasing first when asked to.
pub fn commit_page<F: SelfProgramming>(
    flash: &mut F,
    addr: u16,
    force_erase: bool,
) -> Result<(), FlashError> {
    if force_erase {
        flash.page_erase(addr)?;
    }
    flash.page_write(addr)
}

/// Program the page right below the bootloader: erased words, then `tpl` in
/// the last slot.
pub fn write_trampoline_page<F: SelfProgramming>(
    flash: &mut F,
    config: &Config,
    tpl: u16,
    force_erase: bool,
) -> Result<(), FlashError> {
    let page = config.trampoline_page();
    for addr in (page..config.trampoline_addr()).step_by(2) {
        flash.page_fill(addr, ERASED_WORD);
    }
    flash.page_fill(config.trampoline_addr(), tpl);
    commit_page(flash, page, force_erase)
}

/// Erase every page from the bootloader start down to the reset page.
pub fn delete_application<F: SelfProgramming>(
    flash: &mut F,
    config: &Config,
) -> Result<(), FlashError> {
    let mut page = config.boot_start;
    while page != RESET_PAGE {
        page -= config.page_size;
        flash.page_erase(page)?;
    }
    Ok(())
}
