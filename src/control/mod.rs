//! Client side of the control channel.

mod device;
mod socket;

pub use device::{DeviceChannel, DEFAULT_DEVICE_PATH};
pub use socket::SocketChannel;

use crate::codec::Record;
use crate::error::Result;
use crate::models::rule::Rule;

/// Acknowledgement bytes sent by the engine on the socket channel.
pub const STATUS_OK: u8 = 0;
pub const STATUS_MALFORMED: u8 = 1;
pub const STATUS_FULL: u8 = 2;
pub const STATUS_UNSUPPORTED: u8 = 3;

/// A request/response path to the classification engine. Each call is one
/// self-contained exchange; no state survives between calls.
pub trait ControlChannel {
    /// Delivers one Add or Remove record.
    fn submit(&mut self, record: &Record) -> Result<()>;

    /// Reads back every stored rule in enumeration order.
    fn rules(&mut self) -> Result<Vec<Rule>>;
}
