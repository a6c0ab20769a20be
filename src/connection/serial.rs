//! Serial port scanner.
//!
//! Every scan lists host ports, drops those in use or recently found
//! unsupported, and tries the single best remaining candidate. A port whose
//! device never identifies is set aside for `unsupported_retry` before it is
//! tried again; `None` keeps it aside for the rest of the run.

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::{Connector, DEFAULT_SAMPLING_INTERVAL};
use crate::board::Board;
use crate::firmata::FirmataDriver;

/// USB vendor ids of common microcontroller boards and USB-serial bridges.
pub const KNOWN_VIDS: &[(u16, &str)] = &[
    (0x2341, "Arduino"),
    (0x2a03, "Arduino.org"),
    (0x1a86, "WCH CH340"),
    (0x0403, "FTDI"),
    (0x10c4, "Silicon Labs CP210x"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortKind {
    Usb { vid: u16, pid: u16 },
    Pci,
    Bluetooth,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortCandidate {
    pub path: String,
    pub kind: PortKind,
}

impl PortCandidate {
    pub fn new(path: impl Into<String>, kind: PortKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }

    /// Lower is better. `None` means never try.
    pub fn rank(&self) -> Option<u8> {
        match &self.kind {
            PortKind::Usb { vid, .. } if KNOWN_VIDS.iter().any(|(v, _)| v == vid) => Some(0),
            PortKind::Usb { .. } => Some(1),
            PortKind::Pci | PortKind::Unknown => Some(2),
            PortKind::Bluetooth => None,
        }
    }
}

/// Source of host serial ports.
pub trait PortEnumerator: Send + Sync {
    fn available_ports(&self) -> io::Result<Vec<PortCandidate>>;
}

/// Ports as reported by the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPorts;

#[cfg(feature = "serial")]
impl PortEnumerator for SystemPorts {
    fn available_ports(&self) -> io::Result<Vec<PortCandidate>> {
        use serialport::SerialPortType;

        let ports = serialport::available_ports().map_err(io::Error::other)?;
        Ok(ports
            .into_iter()
            .map(|p| {
                let kind = match p.port_type {
                    SerialPortType::UsbPort(usb) => PortKind::Usb {
                        vid: usb.vid,
                        pid: usb.pid,
                    },
                    SerialPortType::PciPort => PortKind::Pci,
                    SerialPortType::BluetoothPort => PortKind::Bluetooth,
                    SerialPortType::Unknown => PortKind::Unknown,
                };
                PortCandidate::new(p.port_name, kind)
            })
            .collect())
    }
}

#[cfg(not(feature = "serial"))]
impl PortEnumerator for SystemPorts {
    fn available_ports(&self) -> io::Result<Vec<PortCandidate>> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Clone)]
pub struct SerialScanConfig {
    pub scan_interval: Duration,
    pub baud_rate: u32,
    /// Sampling period applied once a board is connected.
    pub sampling_interval: Duration,
    pub unsupported_retry: Option<Duration>,
}

impl Default for SerialScanConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(10),
            baud_rate: 57600,
            sampling_interval: Duration::from_millis(200),
            unsupported_retry: Some(Duration::from_secs(300)),
        }
    }
}

#[derive(Debug, Default)]
struct PortBook {
    used: HashSet<String>,
    unsupported: HashMap<String, Instant>,
}

impl PortBook {
    fn expire(&mut self, retry: Option<Duration>) {
        if let Some(retry) = retry {
            self.unsupported.retain(|path, since| {
                let keep = since.elapsed() < retry;
                if !keep {
                    debug!("Serial port {} eligible for retry", path);
                }
                keep
            });
        }
    }

    fn available(&self, candidate: &PortCandidate) -> bool {
        !self.used.contains(&candidate.path) && !self.unsupported.contains_key(&candidate.path)
    }
}

pub struct SerialScanner {
    connector: Connector,
    driver: Arc<dyn FirmataDriver>,
    ports: Box<dyn PortEnumerator>,
    config: SerialScanConfig,
    book: Arc<Mutex<PortBook>>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

fn lock(book: &Mutex<PortBook>) -> MutexGuard<'_, PortBook> {
    book.lock().unwrap_or_else(|e| e.into_inner())
}

impl SerialScanner {
    pub fn new(
        connector: Connector,
        driver: Arc<dyn FirmataDriver>,
        ports: Box<dyn PortEnumerator>,
        config: SerialScanConfig,
    ) -> Self {
        Self {
            connector,
            driver,
            ports,
            config,
            book: Arc::new(Mutex::new(PortBook::default())),
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Spawn port release watchers on `tracker` so an owner can wait for them.
    pub fn tracked(mut self, tracker: TaskTracker) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn is_in_use(&self, path: &str) -> bool {
        lock(&self.book).used.contains(path)
    }

    pub fn is_unsupported(&self, path: &str) -> bool {
        lock(&self.book).unsupported.contains_key(path)
    }

    /// Scan every `scan_interval` until `shutdown` fires. A scan in progress
    /// at shutdown is abandoned.
    pub async fn run(mut self, shutdown: CancellationToken) {
        self.shutdown = shutdown.clone();
        let mut ticker = tokio::time::interval(self.config.scan_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = self.scan_once() => {}
                    }
                }
            }
        }
        debug!("Serial scanner stopped");
    }

    /// Try the best eligible port once. Returns the board if one connected.
    pub async fn scan_once(&self) -> Option<Arc<Board>> {
        let candidates = match self.ports.available_ports() {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!("Serial port enumeration failed: {}", e);
                return None;
            }
        };

        let best = {
            let mut book = lock(&self.book);
            book.expire(self.config.unsupported_retry);
            candidates
                .into_iter()
                .filter(|c| book.available(c))
                .filter_map(|c| c.rank().map(|rank| (rank, c)))
                .min_by(|(ra, a), (rb, b)| ra.cmp(rb).then_with(|| a.path.cmp(&b.path)))
                .map(|(_, c)| c)
        }?;
        let path = best.path;
        debug!("Trying serial port {} ({:?})", path, best.kind);

        let link = match self.driver.open_serial(&path, self.config.baud_rate) {
            Ok(link) => link,
            Err(e) => {
                debug!("Could not open {}: {}", path, e);
                self.mark_unsupported(&path);
                return None;
            }
        };

        match self
            .connector
            .connect_to_board(link, DEFAULT_SAMPLING_INTERVAL)
            .await
        {
            Ok(conn) => {
                if let Err(e) = conn.transport.set_sampling_interval(self.config.sampling_interval) {
                    warn!("{}: could not raise sampling rate: {}", path, e);
                }
                lock(&self.book).used.insert(path.clone());
                info!("Board {} connected on {}", conn.board.id(), path);

                let book = self.book.clone();
                let transport = conn.transport;
                let shutdown = self.shutdown.clone();
                self.tracker.spawn(async move {
                    tokio::select! {
                        _ = shutdown.cancelled() => {}
                        _ = transport.disconnected() => {
                            lock(&book).used.remove(&path);
                            info!("Serial port {} released", path);
                        }
                    }
                });
                Some(conn.board)
            }
            Err(e) => {
                debug!("No board on {}: {}", path, e);
                if !e.identified() {
                    self.mark_unsupported(&path);
                }
                None
            }
        }
    }

    fn mark_unsupported(&self, path: &str) {
        lock(&self.book)
            .unsupported
            .insert(path.to_string(), Instant::now());
        debug!("Serial port {} marked unsupported", path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vendors_rank_first_and_bluetooth_never() {
        let arduino = PortCandidate::new("/dev/ttyACM0", PortKind::Usb { vid: 0x2341, pid: 0x0043 });
        let other = PortCandidate::new("/dev/ttyUSB1", PortKind::Usb { vid: 0x1234, pid: 1 });
        let pci = PortCandidate::new("/dev/ttyS0", PortKind::Pci);
        let bt = PortCandidate::new("/dev/rfcomm0", PortKind::Bluetooth);
        assert_eq!(arduino.rank(), Some(0));
        assert_eq!(other.rank(), Some(1));
        assert_eq!(pci.rank(), Some(2));
        assert_eq!(bt.rank(), None);
    }

    #[test]
    fn unsupported_entries_expire_after_retry_window() {
        let mut book = PortBook::default();
        book.unsupported
            .insert("/dev/a".into(), Instant::now() - Duration::from_secs(10));
        book.unsupported.insert("/dev/b".into(), Instant::now());
        book.expire(Some(Duration::from_secs(5)));
        assert!(!book.unsupported.contains_key("/dev/a"));
        assert!(book.unsupported.contains_key("/dev/b"));
        book.expire(None);
        assert!(book.unsupported.contains_key("/dev/b"));
    }
}
