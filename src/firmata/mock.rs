//! In-process Firmata board.
//!
//! Behaves like a board behind a transport library: on [`MockBoard::link`] it
//! reports its firmware name and readiness, answers firmware queries while
//! responsive, and records every write so tests can assert on the traffic.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::mpsc;

use super::{FirmataDriver, FirmataIo, Link, PinInfo, PinMode, RawEvent, SerialChannel};

/// One recorded write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockWrite {
    QueryFirmware,
    PinMode { pin: u8, mode: PinMode },
    Digital { pin: u8, value: u8 },
    Analog { pin: u8, value: u16 },
    SerialConfig { channel: SerialChannel, baud: u32, rx: u8, tx: u8 },
    Serial { channel: SerialChannel, bytes: Vec<u8> },
    Sampling(Duration),
}

struct MockInner {
    firmware: String,
    pins: Vec<PinInfo>,
    handshake: bool,
    responsive: AtomicBool,
    closed: AtomicBool,
    links: AtomicUsize,
    writes: Mutex<Vec<MockWrite>>,
    events: Mutex<Option<mpsc::UnboundedSender<RawEvent>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Scriptable board shared between a test and the link it hands out.
#[derive(Clone)]
pub struct MockBoard {
    inner: Arc<MockInner>,
}

/// Pin layout of an Uno-class board: D0-D13 digital, D14-D19 analog A0-A5.
pub fn uno_pins() -> Vec<PinInfo> {
    (0u8..20)
        .map(|index| {
            if index >= 14 {
                PinInfo {
                    index,
                    analog_channel: Some(index - 14),
                    modes: vec![PinMode::Input, PinMode::Output, PinMode::Analog],
                }
            } else if matches!(index, 3 | 5 | 6 | 9 | 10 | 11) {
                PinInfo {
                    index,
                    analog_channel: None,
                    modes: vec![PinMode::Input, PinMode::Output, PinMode::Pwm],
                }
            } else {
                PinInfo {
                    index,
                    analog_channel: None,
                    modes: vec![PinMode::Input, PinMode::Output],
                }
            }
        })
        .collect()
}

impl MockBoard {
    /// Responsive Uno-class board reporting `firmware` on connect.
    pub fn new(firmware: &str) -> Self {
        Self::build(firmware, uno_pins(), true)
    }

    pub fn with_pins(firmware: &str, pins: Vec<PinInfo>) -> Self {
        Self::build(firmware, pins, true)
    }

    /// Board that never identifies itself on connect.
    pub fn silent() -> Self {
        Self::build("", uno_pins(), false)
    }

    fn build(firmware: &str, pins: Vec<PinInfo>, handshake: bool) -> Self {
        Self {
            inner: Arc::new(MockInner {
                firmware: firmware.to_string(),
                pins,
                handshake,
                responsive: AtomicBool::new(handshake),
                closed: AtomicBool::new(false),
                links: AtomicUsize::new(0),
                writes: Mutex::new(Vec::new()),
                events: Mutex::new(None),
            }),
        }
    }

    /// Open a new link to this board. Earlier links stop receiving events.
    pub fn link(&self) -> Link {
        self.link_holding(None)
    }

    fn link_holding(&self, stream: Option<TcpStream>) -> Link {
        let (tx, rx) = mpsc::unbounded_channel();
        if self.inner.handshake {
            let _ = tx.send(RawEvent::Firmware {
                name: self.inner.firmware.clone(),
            });
            let _ = tx.send(RawEvent::Ready);
        }
        *lock(&self.inner.events) = Some(tx);
        self.inner.closed.store(false, Ordering::SeqCst);
        self.inner.links.fetch_add(1, Ordering::SeqCst);
        Link {
            io: Box::new(MockIo {
                board: self.clone(),
                stream: Mutex::new(stream),
            }),
            events: rx,
        }
    }

    /// Whether firmware queries are answered (heartbeat acknowledgements).
    pub fn set_responsive(&self, responsive: bool) {
        self.inner.responsive.store(responsive, Ordering::SeqCst);
    }

    pub fn emit(&self, event: RawEvent) {
        if let Some(tx) = lock(&self.inner.events).as_ref() {
            let _ = tx.send(event);
        }
    }

    pub fn digital(&self, pin: u8, value: u8) {
        self.emit(RawEvent::Digital { pin, value });
    }

    pub fn analog(&self, channel: u8, value: u16) {
        self.emit(RawEvent::Analog { channel, value });
    }

    /// Simulate the cable being pulled.
    pub fn drop_connection(&self) {
        self.emit(RawEvent::Closed);
    }

    pub fn writes(&self) -> Vec<MockWrite> {
        lock(&self.inner.writes).clone()
    }

    pub fn clear_writes(&self) {
        lock(&self.inner.writes).clear();
    }

    /// Payloads written to any serial channel, in order.
    pub fn serial_payloads(&self) -> Vec<Vec<u8>> {
        lock(&self.inner.writes)
            .iter()
            .filter_map(|w| match w {
                MockWrite::Serial { bytes, .. } => Some(bytes.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn firmware_queries(&self) -> usize {
        lock(&self.inner.writes)
            .iter()
            .filter(|w| matches!(w, MockWrite::QueryFirmware))
            .count()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Number of links opened so far.
    pub fn link_count(&self) -> usize {
        self.inner.links.load(Ordering::SeqCst)
    }

    fn record(&self, write: MockWrite) -> io::Result<()> {
        if self.is_closed() {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "mock link closed"));
        }
        lock(&self.inner.writes).push(write);
        Ok(())
    }
}

struct MockIo {
    board: MockBoard,
    stream: Mutex<Option<TcpStream>>,
}

impl FirmataIo for MockIo {
    fn pins(&self) -> Vec<PinInfo> {
        self.board.inner.pins.clone()
    }

    fn query_firmware(&self) -> io::Result<()> {
        self.board.record(MockWrite::QueryFirmware)?;
        if self.board.inner.responsive.load(Ordering::SeqCst) {
            self.board.emit(RawEvent::Firmware {
                name: self.board.inner.firmware.clone(),
            });
        }
        Ok(())
    }

    fn set_pin_mode(&self, pin: u8, mode: PinMode) -> io::Result<()> {
        self.board.record(MockWrite::PinMode { pin, mode })
    }

    fn digital_write(&self, pin: u8, value: u8) -> io::Result<()> {
        self.board.record(MockWrite::Digital { pin, value })
    }

    fn analog_write(&self, pin: u8, value: u16) -> io::Result<()> {
        self.board.record(MockWrite::Analog { pin, value })
    }

    fn serial_config(&self, channel: SerialChannel, baud: u32, rx: u8, tx: u8) -> io::Result<()> {
        self.board.record(MockWrite::SerialConfig {
            channel,
            baud,
            rx,
            tx,
        })
    }

    fn serial_write(&self, channel: SerialChannel, bytes: &[u8]) -> io::Result<()> {
        self.board.record(MockWrite::Serial {
            channel,
            bytes: bytes.to_vec(),
        })
    }

    fn set_sampling_interval(&self, interval: Duration) -> io::Result<()> {
        self.board.record(MockWrite::Sampling(interval))
    }

    fn close(&self) {
        self.board.inner.closed.store(true, Ordering::SeqCst);
        lock(&self.stream).take();
    }
}

/// Driver handing out mock links: serial paths map to registered boards and
/// accepted sockets take the next queued board.
#[derive(Default)]
pub struct MockDriver {
    serial: Mutex<HashMap<String, MockBoard>>,
    sockets: Mutex<VecDeque<MockBoard>>,
    opened: Mutex<Vec<String>>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_serial(&self, path: &str, board: MockBoard) {
        lock(&self.serial).insert(path.to_string(), board);
    }

    pub fn queue_socket(&self, board: MockBoard) {
        lock(&self.sockets).push_back(board);
    }

    /// Serial paths opened so far, in order.
    pub fn opened(&self) -> Vec<String> {
        lock(&self.opened).clone()
    }
}

impl FirmataDriver for MockDriver {
    fn open_serial(&self, path: &str, _baud_rate: u32) -> io::Result<Link> {
        lock(&self.opened).push(path.to_string());
        let board = lock(&self.serial).get(path).cloned().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no mock board on {}", path))
        })?;
        Ok(board.link())
    }

    fn attach_socket(&self, stream: TcpStream) -> io::Result<Link> {
        let board = lock(&self.sockets)
            .pop_front()
            .unwrap_or_else(MockBoard::silent);
        Ok(board.link_holding(Some(stream)))
    }
}
