pub mod ring_buffer;
pub mod status_led;
pub mod twi_state;
pub mod usi_twi;

pub use ring_buffer::RingBuffer;
pub use status_led::StatusLed;
pub use twi_state::{BusState, ReceiveEvent, Reply, ReplyTooLong};
pub use usi_twi::UsiTwi;
