//! Configuration for the ATtiny85 USI TWI bootloader

use bitflags::bitflags;

/// Default bootloader TWI address
pub const TWI_ADDR: u8 = 11;

/// Lowest TWI address a bootloader may answer on
pub const TWI_ADDR_MIN: u8 = 8;
/// Highest bootloader address, applications take the range above
pub const TWI_ADDR_MAX: u8 = 35;

/// Offset between a bootloader address and its application address
pub const APP_ADDR_OFFSET: u8 = 28;

/// Bootloader start address in flash (bytes)
pub const BOOT_START: u16 = 0x1A40;

/// SPM flash page size (bytes)
pub const PAGE_SIZE: u16 = 64;

/// Address of the interrupt vector table, holding the reset vector
pub const RESET_PAGE: u16 = 0x0000;

/// Data bytes in one WRITPAGE packet
pub const MST_PACKET_SIZE: u8 = 8;
/// Most data bytes one READFLSH reply may carry
pub const SLV_PACKET_SIZE: u8 = 8;

/// Receive queue size, a power of two
pub const TWI_RX_BUFFER_SIZE: usize = 16;
/// Transmit queue size, a power of two
pub const TWI_TX_BUFFER_SIZE: usize = 16;

/// Bootloader signature reported by GETTMNLV
pub const SIGNATURE: u8 = b'T';
/// Version reported by GETTMNLV, major part
pub const VERSION_MAJOR: u8 = 1;
/// Version reported by GETTMNLV, minor part
pub const VERSION_MINOR: u8 = 4;

/// Factory low fuse: internal 8 MHz RC oscillator, clock divided by 8
pub const LOW_FUSE: u8 = 0x62;

/// Uninitialized-loop iterations between LED toggles
pub const LED_DELAY: u16 = 0xFFFF;

/// LED toggles before the bootloader gives up and runs the application
pub const CYCLES_TO_EXIT: u8 = 40;

bitflags! {
    /// Optional features, reported as-is in the GETTMNLV features byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Features: u8 {
        /// Drive a status LED
        const LED_UI = 1 << 0;
        /// Advance the page address after each page and compute the trampoline
        const AUTO_PAGE_ADDR = 1 << 1;
        /// Let the application use the page that holds the trampoline
        const APP_USE_TPL_PG = 1 << 2;
        /// Accept STPGADDR
        const CMD_SETPGADDR = 1 << 3;
        /// Require INITSOFT after GETTMNLV before running slow operations
        const TWO_STEP_INIT = 1 << 4;
        /// Restart through the watchdog instead of jumping to the bootloader start
        const USE_WDT_RESET = 1 << 5;
        /// Run the application when no master initializes the bootloader
        const TIMEOUT_EXIT = 1 << 6;
        /// Accept READFLSH
        const CMD_READFLASH = 1 << 7;
    }
}

bitflags! {
    /// Extended features, reported in the GETTMNLV ext-features byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ExtFeatures: u8 {
        /// Pick the clock tweak from the fuse at run time
        const AUTO_CLK_TWEAK = 1 << 0;
        /// Erase each page before writing it
        const FORCE_ERASE_PG = 1 << 1;
        /// Reject WRITPAGE data that overruns the page (always enforced)
        const CHECK_PAGE_IX = 1 << 2;
    }
}

/// What the bus driver does with a byte that arrives while the RX queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrunPolicy {
    /// Keep the queue, lose the new byte
    DropNewest,
    /// Overwrite the oldest queued byte
    DropOldest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    TwiAddress,
    PageSize,
    BootStartAlignment,
    PacketSize,
    PageAddressing,
    BufferSize,
}

#[derive(Debug, Clone, Copy)]
pub struct Config {
    pub twi_address: u8,
    pub boot_start: u16,
    pub page_size: u16,
    pub mst_packet_size: u8,
    pub slv_packet_size: u8,
    pub features: Features,
    pub ext_features: ExtFeatures,
    /// Fuse value the clock tweak follows when `AUTO_CLK_TWEAK` is off
    pub low_fuse: u8,
    pub led_delay: u16,
    pub exit_cycles: u8,
    pub rx_overrun: OverrunPolicy,
}

impl Config {
    pub const fn new() -> Self {
        Self {
            twi_address: TWI_ADDR,
            boot_start: BOOT_START,
            page_size: PAGE_SIZE,
            mst_packet_size: MST_PACKET_SIZE,
            slv_packet_size: SLV_PACKET_SIZE,
            features: Features::AUTO_PAGE_ADDR
                .union(Features::USE_WDT_RESET)
                .union(Features::TIMEOUT_EXIT),
            ext_features: ExtFeatures::CHECK_PAGE_IX,
            low_fuse: LOW_FUSE,
            led_delay: LED_DELAY,
            exit_cycles: CYCLES_TO_EXIT,
            rx_overrun: OverrunPolicy::DropNewest,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(TWI_ADDR_MIN..=TWI_ADDR_MAX).contains(&self.twi_address) {
            return Err(ConfigError::TwiAddress);
        }
        if !self.page_size.is_power_of_two() || self.page_size < 4 || self.page_size > 64 {
            return Err(ConfigError::PageSize);
        }
        if self.boot_start == 0 || self.boot_start % self.page_size != 0 {
            return Err(ConfigError::BootStartAlignment);
        }
        for size in [self.mst_packet_size, self.slv_packet_size] {
            if size < 2 || size > 8 || size % 2 != 0 {
                return Err(ConfigError::PacketSize);
            }
        }
        if self.page_size % self.mst_packet_size as u16 != 0 {
            return Err(ConfigError::PacketSize);
        }
        if !self.features.contains(Features::AUTO_PAGE_ADDR)
            && !self.features.contains(Features::CMD_SETPGADDR)
        {
            return Err(ConfigError::PageAddressing);
        }
        // Opcode + data + checksum must fit in RX, ack + data + checksum in TX
        if self.mst_packet_size as usize + 2 > TWI_RX_BUFFER_SIZE
            || self.slv_packet_size as usize + 2 > TWI_TX_BUFFER_SIZE
        {
            return Err(ConfigError::BufferSize);
        }
        Ok(())
    }

    /// Address the application answers on once it runs
    pub fn application_address(&self) -> u8 {
        self.twi_address + APP_ADDR_OFFSET
    }

    pub fn has(&self, feature: Features) -> bool {
        self.features.contains(feature)
    }

    pub fn has_ext(&self, feature: ExtFeatures) -> bool {
        self.ext_features.contains(feature)
    }

    /// Features byte as reported to the master
    pub fn features_byte(&self) -> u8 {
        self.features.bits()
    }

    pub fn ext_features_byte(&self) -> u8 {
        (self.ext_features | ExtFeatures::CHECK_PAGE_IX).bits()
    }

    /// Page right below the bootloader, carrying the trampoline in its last word
    pub fn trampoline_page(&self) -> u16 {
        self.boot_start - self.page_size
    }

    /// Byte address of the trampoline word
    pub fn trampoline_addr(&self) -> u16 {
        self.boot_start - 2
    }

    /// Pages at or above this address are never committed
    pub fn page_limit(&self) -> u16 {
        if self.has(Features::APP_USE_TPL_PG) || !self.has(Features::AUTO_PAGE_ADDR) {
            self.boot_start
        } else {
            self.trampoline_page()
        }
    }

    /// STPGADDR is recognized when enabled, or whenever pages aren't auto-addressed
    pub fn accepts_set_page_address(&self) -> bool {
        self.has(Features::CMD_SETPGADDR) || !self.has(Features::AUTO_PAGE_ADDR)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
