//! # Firmata Transport Layer
//!
//! Boards speak Firmata over a serial line or a TCP socket. Decoding the byte
//! protocol itself is the job of a transport library; this module defines the
//! seam such a library plugs into and the adapter that turns its callbacks into
//! the five signals the rest of the crate consumes.
//!
//! ```text
//! serial path / TcpStream
//!          │  FirmataDriver::open_serial / attach_socket
//!          ▼
//!       Link { io: FirmataIo, events: RawEvent stream }
//!          │  Transport::new
//!          ▼
//!   Transport ── broadcast ──▶ FirmwareIdentified | Ready | Error | PinUpdate | Disconnect
//! ```
//!
//! - [`transport`] - the Transport Adapter
//! - [`identity`] - `<Type>_<uniqueId>.ino` firmware naming convention
//! - [`mock`] - scriptable in-process board

pub mod identity;
pub mod mock;
pub mod transport;

use std::io;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::mpsc;

pub use identity::Identity;
pub use transport::{Transport, TransportEvent};

/// Pin modes advertised by a board's capability response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinMode {
    Input,
    Output,
    Analog,
    Pwm,
}

/// Static pin capabilities reported once by the transport library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinInfo {
    pub index: u8,
    /// Analog channel number when the pin can be read as analog.
    pub analog_channel: Option<u8>,
    pub modes: Vec<PinMode>,
}

impl PinInfo {
    pub fn is_analog(&self) -> bool {
        self.analog_channel.is_some()
    }
}

/// Last known value of one pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct PinState {
    pub index: u8,
    pub analog: bool,
    pub value: u16,
}

/// UART-style channel addressed by Firmata serial messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SerialChannel {
    /// Hardware UART 0-3.
    Hardware(u8),
    /// Software serial 0-7.
    Software(u8),
}

impl SerialChannel {
    /// Port id as encoded in Firmata serial messages.
    pub fn port_id(self) -> u8 {
        match self {
            SerialChannel::Hardware(n) => n & 0x03,
            SerialChannel::Software(n) => 0x08 | (n & 0x07),
        }
    }
}

/// Events as delivered by the transport library before normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawEvent {
    /// Response to a firmware query: the sketch file name.
    Firmware { name: String },
    /// Capability and analog-mapping queries completed.
    Ready,
    Error(String),
    Digital { pin: u8, value: u8 },
    Analog { channel: u8, value: u16 },
    /// The underlying stream closed.
    Closed,
}

/// Write side of a decoded Firmata connection.
pub trait FirmataIo: Send + Sync {
    fn pins(&self) -> Vec<PinInfo>;

    /// Ask the board for its firmware name; the answer arrives as [`RawEvent::Firmware`].
    fn query_firmware(&self) -> io::Result<()>;

    fn set_pin_mode(&self, pin: u8, mode: PinMode) -> io::Result<()>;

    fn digital_write(&self, pin: u8, value: u8) -> io::Result<()>;

    fn analog_write(&self, pin: u8, value: u16) -> io::Result<()>;

    fn serial_config(&self, channel: SerialChannel, baud: u32, rx: u8, tx: u8) -> io::Result<()>;

    fn serial_write(&self, channel: SerialChannel, bytes: &[u8]) -> io::Result<()>;

    /// Reporting period for analog/digital pin sampling.
    fn set_sampling_interval(&self, interval: Duration) -> io::Result<()>;

    /// Shut the underlying stream. Must be idempotent.
    fn close(&self);
}

/// One decoded connection: the write half and its event stream.
pub struct Link {
    pub io: Box<dyn FirmataIo>,
    pub events: mpsc::UnboundedReceiver<RawEvent>,
}

/// Factory for links, implemented by the transport library.
pub trait FirmataDriver: Send + Sync {
    fn open_serial(&self, path: &str, baud_rate: u32) -> io::Result<Link>;

    fn attach_socket(&self, stream: TcpStream) -> io::Result<Link>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_port_ids_follow_firmata_numbering() {
        assert_eq!(SerialChannel::Hardware(1).port_id(), 0x01);
        assert_eq!(SerialChannel::Software(0).port_id(), 0x08);
        assert_eq!(SerialChannel::Software(7).port_id(), 0x0F);
    }
}
