//! Transport Adapter.
//!
//! Wraps one [`Link`] and republishes its raw events as [`TransportEvent`]s on a
//! broadcast channel so several listeners (connection race, board listener,
//! heartbeat, port bookkeeping) can observe the same connection. The adapter keeps
//! the latest identity, readiness and pin snapshot so a late subscriber can catch
//! up: subscribe first, then read state.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, trace, warn};
use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use uuid::Uuid;

use super::identity::{parse_firmware_name, Identity};
use super::{FirmataIo, Link, PinInfo, PinMode, PinState, RawEvent, SerialChannel};
use crate::logutil::{escape_log, hex_snippet};

const EVENT_CAPACITY: usize = 64;

/// Normalized connection signals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    FirmwareIdentified(Identity),
    Ready,
    Error(String),
    /// Full pin snapshot after any pin changed.
    PinUpdate(Vec<PinState>),
    Disconnect,
}

/// Why a link never became ready.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LinkError {
    #[error("transport error: {0}")]
    Failed(String),
    #[error("link closed before the board was ready")]
    Closed,
}

#[derive(Debug, Default)]
struct LinkState {
    identity: Option<Identity>,
    ready: bool,
    pins: Vec<PinState>,
    closed: bool,
}

struct Shared {
    state: Mutex<LinkState>,
    events: broadcast::Sender<TransportEvent>,
    pin_info: Vec<PinInfo>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, LinkState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, event: TransportEvent) {
        // No receivers is normal between connection phases.
        let _ = self.events.send(event);
    }

    /// Mark closed and announce it once.
    fn announce_disconnect(&self) -> bool {
        {
            let mut state = self.lock();
            if state.closed {
                return false;
            }
            state.closed = true;
        }
        self.publish(TransportEvent::Disconnect);
        true
    }
}

struct Inner {
    id: Uuid,
    io: Box<dyn FirmataIo>,
    shared: Arc<Shared>,
    pump: AbortHandle,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.pump.abort();
        self.io.close();
    }
}

/// Cheaply clonable handle to one live connection.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("id", &self.inner.id)
            .field("identity", &self.identity())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Transport {
    /// Attach to a link and start forwarding its events. Must be called inside a
    /// Tokio runtime. Pin reporting starts at `sampling_interval`.
    pub fn new(link: Link, sampling_interval: Duration) -> Self {
        let Link { io, events } = link;
        let pin_info = io.pins();
        let pins = pin_info
            .iter()
            .map(|p| PinState {
                index: p.index,
                analog: p.is_analog(),
                value: 0,
            })
            .collect();
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        let shared = Arc::new(Shared {
            state: Mutex::new(LinkState {
                pins,
                ..LinkState::default()
            }),
            events: tx,
            pin_info,
        });

        if let Err(e) = io.set_sampling_interval(sampling_interval) {
            warn!("Failed to set sampling interval: {}", e);
        }

        let pump = tokio::spawn(pump_events(shared.clone(), events)).abort_handle();
        let id = Uuid::new_v4();
        debug!("Transport {} attached", id);
        Self {
            inner: Arc::new(Inner {
                id,
                io,
                shared,
                pump,
            }),
        }
    }

    /// Unique session id of this connection.
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.inner.shared.events.subscribe()
    }

    pub fn identity(&self) -> Option<Identity> {
        self.inner.shared.lock().identity.clone()
    }

    /// Firmware identified and ready signalled.
    pub fn is_ready(&self) -> bool {
        let state = self.inner.shared.lock();
        state.identity.is_some() && state.ready
    }

    pub fn is_closed(&self) -> bool {
        self.inner.shared.lock().closed
    }

    pub fn pin_info(&self) -> &[PinInfo] {
        &self.inner.shared.pin_info
    }

    pub fn pins(&self) -> Vec<PinState> {
        self.inner.shared.lock().pins.clone()
    }

    /// Wait until the board has identified itself and signalled ready.
    /// Callers race this against a timeout.
    pub async fn ready(&self) -> Result<Identity, LinkError> {
        let mut rx = self.subscribe();
        loop {
            {
                let state = self.inner.shared.lock();
                if state.closed {
                    return Err(LinkError::Closed);
                }
                if let (Some(identity), true) = (&state.identity, state.ready) {
                    return Ok(identity.clone());
                }
            }
            match rx.recv().await {
                Ok(TransportEvent::Error(e)) => return Err(LinkError::Failed(e)),
                Ok(TransportEvent::Disconnect) | Err(RecvError::Closed) => {
                    return Err(LinkError::Closed)
                }
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
            }
        }
    }

    /// Resolve once the connection has gone away.
    pub async fn disconnected(&self) {
        let mut rx = self.subscribe();
        if self.is_closed() {
            return;
        }
        loop {
            match rx.recv().await {
                Ok(TransportEvent::Disconnect) | Err(RecvError::Closed) => return,
                _ => {}
            }
        }
    }

    pub fn query_firmware(&self) -> std::io::Result<()> {
        trace!("Transport {}: firmware query", self.inner.id);
        self.inner.io.query_firmware()
    }

    pub fn set_pin_mode(&self, pin: u8, mode: PinMode) -> std::io::Result<()> {
        self.inner.io.set_pin_mode(pin, mode)
    }

    pub fn digital_write(&self, pin: u8, value: u8) -> std::io::Result<()> {
        self.inner.io.digital_write(pin, value)?;
        self.record_pin(pin, u16::from(value));
        Ok(())
    }

    pub fn analog_write(&self, pin: u8, value: u16) -> std::io::Result<()> {
        self.inner.io.analog_write(pin, value)?;
        self.record_pin(pin, value);
        Ok(())
    }

    pub fn serial_config(
        &self,
        channel: SerialChannel,
        baud: u32,
        rx: u8,
        tx: u8,
    ) -> std::io::Result<()> {
        self.inner.io.serial_config(channel, baud, rx, tx)
    }

    pub fn serial_write(&self, channel: SerialChannel, bytes: &[u8]) -> std::io::Result<()> {
        debug!(
            "Transport {}: serial 0x{:02x} <- {}",
            self.inner.id,
            channel.port_id(),
            hex_snippet(bytes, 32)
        );
        self.inner.io.serial_write(channel, bytes)
    }

    pub fn set_sampling_interval(&self, interval: Duration) -> std::io::Result<()> {
        self.inner.io.set_sampling_interval(interval)
    }

    /// Force a disconnect signal, as if the link had dropped.
    pub fn emit_disconnect(&self) {
        if self.inner.shared.announce_disconnect() {
            debug!("Transport {}: disconnect forced", self.inner.id);
        }
    }

    /// Stop forwarding events and shut the underlying stream.
    pub fn close(&self) {
        self.emit_disconnect();
        self.inner.pump.abort();
        self.inner.io.close();
    }

    fn record_pin(&self, pin: u8, value: u16) {
        let mut state = self.inner.shared.lock();
        if let Some(p) = state.pins.iter_mut().find(|p| p.index == pin) {
            p.value = value;
        }
    }
}

async fn pump_events(shared: Arc<Shared>, mut events: mpsc::UnboundedReceiver<RawEvent>) {
    while let Some(raw) = events.recv().await {
        match raw {
            RawEvent::Firmware { name } => match parse_firmware_name(&name) {
                Some(identity) => {
                    trace!("Firmware report '{}'", escape_log(&name));
                    shared.lock().identity = Some(identity.clone());
                    shared.publish(TransportEvent::FirmwareIdentified(identity));
                }
                None => shared.publish(TransportEvent::Error(format!(
                    "unrecognized firmware name '{}'",
                    escape_log(&name)
                ))),
            },
            RawEvent::Ready => {
                shared.lock().ready = true;
                shared.publish(TransportEvent::Ready);
            }
            RawEvent::Error(e) => shared.publish(TransportEvent::Error(e)),
            RawEvent::Digital { pin, value } => {
                let snapshot = {
                    let mut state = shared.lock();
                    match state.pins.iter_mut().find(|p| p.index == pin && !p.analog) {
                        Some(p) => p.value = u16::from(value),
                        None => continue,
                    }
                    state.pins.clone()
                };
                shared.publish(TransportEvent::PinUpdate(snapshot));
            }
            RawEvent::Analog { channel, value } => {
                let Some(index) = shared
                    .pin_info
                    .iter()
                    .find(|p| p.analog_channel == Some(channel))
                    .map(|p| p.index)
                else {
                    continue;
                };
                let snapshot = {
                    let mut state = shared.lock();
                    if let Some(p) = state.pins.iter_mut().find(|p| p.index == index) {
                        p.value = value;
                    }
                    state.pins.clone()
                };
                shared.publish(TransportEvent::PinUpdate(snapshot));
            }
            RawEvent::Closed => break,
        }
    }
    shared.announce_disconnect();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firmata::mock::MockBoard;

    #[tokio::test]
    async fn handshake_makes_transport_ready() {
        let mock = MockBoard::new("LedController_abc123.ino");
        let transport = Transport::new(mock.link(), Duration::from_millis(1000));
        let ident = tokio::time::timeout(Duration::from_millis(500), transport.ready())
            .await
            .expect("timeout")
            .expect("ready");
        assert_eq!(ident.id, "abc123");
        assert!(transport.is_ready());
    }

    #[tokio::test]
    async fn analog_reports_map_to_pin_index() {
        let mock = MockBoard::new("Board_a1.ino");
        let transport = Transport::new(mock.link(), Duration::from_millis(1000));
        let mut rx = transport.subscribe();
        mock.analog(0, 512);
        let snapshot = loop {
            match rx.recv().await.expect("event") {
                TransportEvent::PinUpdate(pins) => break pins,
                _ => continue,
            }
        };
        let a0 = snapshot.iter().find(|p| p.index == 14).expect("A0");
        assert!(a0.analog);
        assert_eq!(a0.value, 512);
    }

    #[tokio::test]
    async fn close_announces_disconnect_once() {
        let mock = MockBoard::new("Board_a1.ino");
        let transport = Transport::new(mock.link(), Duration::from_millis(1000));
        transport.ready().await.expect("ready");
        let mut rx = transport.subscribe();
        transport.close();
        transport.emit_disconnect();
        assert_eq!(rx.recv().await.expect("event"), TransportEvent::Disconnect);
        assert!(rx.try_recv().is_err());
        assert!(mock.is_closed());
    }
}
