pub mod clock;
pub mod flash;
pub mod gpio;
pub mod usi;
pub mod watchdog;

// Re-export commonly used types
pub use clock::{ClockControl, ClockDivision};
pub use flash::{FlashError, SelfProgramming};
pub use usi::UsiRegisters;
