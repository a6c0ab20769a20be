//! # Devices
//!
//! A [`Board`] is one physical microcontroller as the registry sees it. It owns
//! the live [`Transport`] while connected and everything the connection needs:
//! the transport listener, the heartbeat, LED blink and engine timers.
//!
//! ```text
//!            attach                  firmware + ready
//! Offline ──────────▶ Connecting ───────────────────────▶ Online
//!    ▲                    │                                  │
//!    └────────────────────┴──── disconnect / heartbeat miss ─┘
//! ```
//!
//! Every task a board starts lives in one of its two [`TimerSet`]s. Leaving
//! Online or Connecting goes through a single teardown that aborts both sets,
//! cancels a running program and drops the transport, so an offline board never
//! holds a handle.
//!
//! Variants are a closed set ([`BoardKind`]): the generic board, the LED strip
//! controller and the MajorTom engine emulator. They share the base actions
//! and each adds its own; dispatch is a `match` over [`Action`].

pub mod action;
pub mod architecture;
pub mod led;
pub mod major_tom;
pub mod timers;

use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, trace, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use self::action::{
    expect_params, parse_ranged, Action, ActionDescriptor, BASE_ACTIONS, LED_ACTIONS,
    MAJOR_TOM_ACTIONS,
};
use self::architecture::{Architecture, PinMap};
use self::major_tom::{EngineState, OBD_BAUD, OBD_SERIAL};
use self::timers::TimerSet;
use crate::error::{BoardError, Result};
use crate::firmata::{PinMode, PinState, Transport, TransportEvent};
use crate::storage::{BoardRecord, BOARD_SCHEMA_VERSION};

/// `current_program` while no program runs.
pub const IDLE: &str = "IDLE";

pub const BLINK_PERIOD: Duration = Duration::from_millis(500);
/// Exclusive upper bound for analog pin values.
pub const ANALOG_LIMIT: i64 = 1024;

const TIMER_BLINK: &str = "blink";
const TIMER_HEARTBEAT: &str = "heartbeat";
const TIMER_RAMP: &str = "ramp";
const TIMER_FAN: &str = "fan";
const LISTENER_TRANSPORT: &str = "transport";

/// Variant tag persisted with every board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BoardKind {
    Board,
    LedController,
    MajorTom,
}

impl BoardKind {
    pub const ALL: [BoardKind; 3] = [BoardKind::Board, BoardKind::LedController, BoardKind::MajorTom];

    pub fn tag(self) -> &'static str {
        match self {
            BoardKind::Board => "Board",
            BoardKind::LedController => "LedController",
            BoardKind::MajorTom => "MajorTom",
        }
    }

    /// Base actions followed by the variant's own.
    pub fn actions(self) -> impl Iterator<Item = Action> {
        let extra: &'static [Action] = match self {
            BoardKind::Board => &[],
            BoardKind::LedController => LED_ACTIONS,
            BoardKind::MajorTom => MAJOR_TOM_ACTIONS,
        };
        BASE_ACTIONS.iter().chain(extra.iter()).copied()
    }

    pub fn supports(self, action: Action) -> bool {
        self.actions().any(|a| a == action)
    }
}

impl FromStr for BoardKind {
    type Err = BoardError;

    fn from_str(s: &str) -> Result<Self> {
        let tag = s.trim();
        BoardKind::ALL
            .into_iter()
            .find(|k| k.tag().eq_ignore_ascii_case(tag))
            .ok_or_else(|| BoardError::TypeNotFound(s.to_string()))
    }
}

impl std::fmt::Display for BoardKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    Offline,
    Connecting,
    Online,
}

/// Heartbeat and engine timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoardTiming {
    pub heartbeat_interval: Duration,
    pub disconnect_timeout: Duration,
    /// Half period of the MajorTom fan duty cycle.
    pub fan_toggle: Duration,
}

impl Default for BoardTiming {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(10),
            disconnect_timeout: Duration::from_secs(10),
            fan_toggle: major_tom::FAN_TOGGLE,
        }
    }
}

/// Board to registry notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoardSignal {
    /// Observable state changed.
    Updated { id: String },
    /// The transport of `session` went away on its own.
    Disconnected { id: String, session: Uuid },
}

/// What a board needs from its owner.
#[derive(Debug, Clone)]
pub struct BoardContext {
    pub signals: mpsc::UnboundedSender<BoardSignal>,
    pub timing: BoardTiming,
}

/// Serializable view of a board, carried by every registry event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardSnapshot {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub board_type: BoardKind,
    pub online: bool,
    pub architecture: &'static str,
    pub current_program: String,
    pub last_update: DateTime<Utc>,
    pub actions: Vec<ActionDescriptor>,
    pub pins: Vec<PinState>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Variant {
    Generic,
    LedController,
    MajorTom(EngineState),
}

impl Variant {
    fn for_kind(kind: BoardKind) -> Self {
        match kind {
            BoardKind::Board => Variant::Generic,
            BoardKind::LedController => Variant::LedController,
            BoardKind::MajorTom => Variant::MajorTom(EngineState::default()),
        }
    }

    fn kind(self) -> BoardKind {
        match self {
            Variant::Generic => BoardKind::Board,
            Variant::LedController => BoardKind::LedController,
            Variant::MajorTom(_) => BoardKind::MajorTom,
        }
    }
}

struct BoardState {
    name: String,
    architecture: Architecture,
    variant: Variant,
    phase: Phase,
    /// Present iff Online.
    transport: Option<Transport>,
    /// Attached but not yet ready.
    pending: Option<Transport>,
    /// Session id of the most recently attached transport.
    session: Option<Uuid>,
    pins: Vec<PinState>,
    current_program: String,
    program: Option<(u64, CancellationToken)>,
    program_runs: u64,
    last_update: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

/// Handle for one program run, returned by [`Board::start_program`].
#[derive(Debug, Clone)]
pub struct ProgramRun {
    run: u64,
    token: CancellationToken,
}

impl ProgramRun {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

pub struct Board {
    id: String,
    state: Mutex<BoardState>,
    timers: TimerSet,
    listeners: TimerSet,
    ctx: BoardContext,
}

impl std::fmt::Debug for Board {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.lock();
        f.debug_struct("Board")
            .field("id", &self.id)
            .field("type", &st.variant.kind())
            .field("phase", &st.phase)
            .finish()
    }
}

/// Variant factory keyed by the record's type tag. The new board starts Offline.
pub fn instantiate(record: &BoardRecord, ctx: BoardContext) -> Result<Arc<Board>> {
    let kind: BoardKind = record.board_type.parse()?;
    let architecture = architecture::lookup(&record.architecture)?;
    Ok(Arc::new(Board {
        id: record.id.clone(),
        state: Mutex::new(BoardState {
            name: record.name.clone(),
            architecture,
            variant: Variant::for_kind(kind),
            phase: Phase::Offline,
            transport: None,
            pending: None,
            session: None,
            pins: Vec::new(),
            current_program: IDLE.to_string(),
            program: None,
            program_runs: 0,
            last_update: record.last_update,
            created_at: record.created_at,
        }),
        timers: TimerSet::new(),
        listeners: TimerSet::new(),
        ctx,
    }))
}

impl Board {
    fn lock(&self) -> MutexGuard<'_, BoardState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> BoardKind {
        self.lock().variant.kind()
    }

    pub fn name(&self) -> String {
        self.lock().name.clone()
    }

    pub fn architecture(&self) -> Architecture {
        self.lock().architecture
    }

    pub fn phase(&self) -> Phase {
        self.lock().phase
    }

    pub fn is_online(&self) -> bool {
        self.lock().phase == Phase::Online
    }

    pub fn has_transport(&self) -> bool {
        self.lock().transport.is_some()
    }

    /// Session id of the transport attached last, if any.
    pub fn session(&self) -> Option<Uuid> {
        self.lock().session
    }

    pub fn current_program(&self) -> String {
        self.lock().current_program.clone()
    }

    pub fn last_update(&self) -> DateTime<Utc> {
        self.lock().last_update
    }

    pub fn pins(&self) -> Vec<PinState> {
        self.lock().pins.clone()
    }

    pub fn engine_running(&self) -> bool {
        matches!(self.lock().variant, Variant::MajorTom(EngineState { running: true }))
    }

    /// Timers and listeners still alive.
    pub fn timer_count(&self) -> usize {
        self.timers.len() + self.listeners.len()
    }

    pub fn supports(&self, action: &str) -> bool {
        Action::from_name(action).is_some_and(|a| self.kind().supports(a))
    }

    pub fn snapshot(&self) -> BoardSnapshot {
        let st = self.lock();
        let kind = st.variant.kind();
        BoardSnapshot {
            id: self.id.clone(),
            name: st.name.clone(),
            board_type: kind,
            online: st.phase == Phase::Online,
            architecture: st.architecture.name,
            current_program: st.current_program.clone(),
            last_update: st.last_update,
            actions: kind.actions().map(Action::descriptor).collect(),
            pins: st.pins.clone(),
        }
    }

    /// Persisted form of the current state.
    pub fn record(&self) -> BoardRecord {
        let st = self.lock();
        BoardRecord {
            schema_version: BOARD_SCHEMA_VERSION,
            id: self.id.clone(),
            name: st.name.clone(),
            board_type: st.variant.kind().tag().to_string(),
            architecture: st.architecture.name.to_string(),
            online: st.phase == Phase::Online,
            last_update: st.last_update,
            created_at: st.created_at,
        }
    }

    /// Merge name, type and architecture from `record` in place. Type and
    /// architecture can only change while no transport is attached.
    pub(crate) fn apply_record(&self, record: &BoardRecord) -> Result<()> {
        let kind: BoardKind = record.board_type.parse()?;
        let architecture = architecture::lookup(&record.architecture)?;
        let mut st = self.lock();
        let reshaped = st.variant.kind() != kind || st.architecture != architecture;
        if reshaped && st.phase != Phase::Offline {
            return Err(BoardError::Conflict(format!(
                "board {} must be offline to change type or architecture in place",
                self.id
            )));
        }
        if st.variant.kind() != kind {
            st.variant = Variant::for_kind(kind);
        }
        st.architecture = architecture;
        st.name = record.name.clone();
        st.last_update = Utc::now();
        Ok(())
    }

    fn signal_updated(&self) {
        let _ = self.ctx.signals.send(BoardSignal::Updated {
            id: self.id.clone(),
        });
    }

    fn touch(&self) {
        self.lock().last_update = Utc::now();
    }

    // ---- lifecycle ----

    /// Attach `transport` and start listening to it. A previously attached
    /// transport is torn down first. Goes Online right away when the transport
    /// has already completed its handshake.
    pub fn attach(self: &Arc<Self>, transport: Transport) {
        let session = transport.id();
        let events = transport.subscribe();
        let previous = {
            let mut st = self.lock();
            let previous = self.teardown_locked(&mut st);
            st.session = Some(session);
            st.phase = Phase::Connecting;
            st.pending = Some(transport.clone());
            self.listeners.spawn(
                Some(LISTENER_TRANSPORT),
                listen(Arc::downgrade(self), session, events),
            );
            previous
        };
        if let Some(old) = previous {
            if old.id() != session {
                old.close();
            }
        }
        debug!("Board {} attached to transport {}", self.id, session);

        if transport.is_closed() {
            self.on_transport_lost(session);
        } else if transport.is_ready() {
            self.on_ready(session);
        }
    }

    /// Force the board offline and close its transport. Returns whether a
    /// transport was attached. Safe to call repeatedly.
    pub fn disconnect(&self) -> bool {
        let transport = {
            let mut st = self.lock();
            self.teardown_locked(&mut st)
        };
        match transport {
            Some(t) => {
                t.close();
                info!("Board {} offline", self.id);
                true
            }
            None => false,
        }
    }

    /// Like [`disconnect`](Self::disconnect) but hands the transport back open,
    /// for re-attaching it to a replacement board.
    pub fn detach(&self) -> Option<Transport> {
        let mut st = self.lock();
        self.teardown_locked(&mut st)
    }

    fn teardown_locked(&self, st: &mut BoardState) -> Option<Transport> {
        self.timers.clear();
        self.listeners.clear();
        let transport = match st.transport.take() {
            Some(t) => Some(t),
            None => st.pending.take(),
        };
        st.pending = None;
        st.phase = Phase::Offline;
        if let Some((_, token)) = st.program.take() {
            token.cancel();
        }
        st.current_program = IDLE.to_string();
        if let Variant::MajorTom(engine) = &mut st.variant {
            engine.running = false;
        }
        if transport.is_some() {
            st.last_update = Utc::now();
        }
        transport
    }

    fn on_ready(&self, session: Uuid) {
        let transport = {
            let mut st = self.lock();
            if st.phase != Phase::Connecting || st.session != Some(session) {
                return;
            }
            let Some(transport) = st.pending.take() else {
                return;
            };
            if !transport.is_ready() {
                st.pending = Some(transport);
                return;
            }
            st.pins = transport.pins();
            st.phase = Phase::Online;
            st.transport = Some(transport.clone());
            st.last_update = Utc::now();
            self.start_heartbeat(&transport);
            transport
        };

        let (variant, pins) = {
            let st = self.lock();
            (st.variant, st.architecture.pins)
        };
        if let Err(e) = configure_pins(&transport, variant, pins) {
            warn!("Board {}: pin setup failed: {}", self.id, e);
        }
        info!("Board {} ({}) online", self.id, variant.kind());
        self.signal_updated();
    }

    fn on_transport_lost(&self, session: Uuid) {
        let transport = {
            let mut st = self.lock();
            if st.session != Some(session) {
                return;
            }
            self.teardown_locked(&mut st)
        };
        if let Some(t) = transport {
            t.close();
            warn!("Board {} lost its connection", self.id);
            let _ = self.ctx.signals.send(BoardSignal::Disconnected {
                id: self.id.clone(),
                session,
            });
        }
    }

    fn on_pins(&self, pins: Vec<PinState>) {
        let changed = {
            let mut st = self.lock();
            if st.phase != Phase::Online || st.pins == pins {
                false
            } else {
                st.pins = pins;
                st.last_update = Utc::now();
                true
            }
        };
        if changed {
            self.signal_updated();
        }
    }

    fn start_heartbeat(&self, transport: &Transport) {
        let timing = self.ctx.timing;
        let transport = transport.clone();
        let id = self.id.clone();
        self.timers.spawn(Some(TIMER_HEARTBEAT), async move {
            loop {
                tokio::time::sleep(timing.heartbeat_interval).await;
                let mut events = transport.subscribe();
                if let Err(e) = transport.query_firmware() {
                    warn!("Board {}: heartbeat query failed: {}", id, e);
                    transport.emit_disconnect();
                    return;
                }
                let ack = tokio::time::timeout(timing.disconnect_timeout, async {
                    loop {
                        match events.recv().await {
                            Ok(TransportEvent::FirmwareIdentified(_)) => return true,
                            Ok(TransportEvent::Disconnect) | Err(RecvError::Closed) => return false,
                            _ => continue,
                        }
                    }
                })
                .await;
                match ack {
                    Ok(true) => trace!("Board {}: heartbeat acknowledged", id),
                    Ok(false) => return,
                    Err(_) => {
                        warn!(
                            "Board {}: no heartbeat reply within {:?}, disconnecting",
                            id, timing.disconnect_timeout
                        );
                        transport.emit_disconnect();
                        return;
                    }
                }
            }
        });
    }

    // ---- actions ----

    fn live_transport(&self) -> Result<Transport> {
        self.lock()
            .transport
            .clone()
            .ok_or_else(|| BoardError::Unavailable(self.id.clone()))
    }

    /// Run one action by wire name, then announce the update.
    pub fn execute_action(&self, name: &str, params: &[String]) -> Result<()> {
        let transport = self.live_transport()?;
        let kind = self.kind();
        let action = Action::from_name(name)
            .filter(|a| kind.supports(*a))
            .ok_or_else(|| {
                BoardError::Incompatible(format!(
                    "{} does not support action '{}'",
                    kind,
                    crate::logutil::escape_log(name)
                ))
            })?;
        if action.requires_params() && params.is_empty() {
            return Err(BoardError::InvalidArgument(format!(
                "{} requires parameters",
                action
            )));
        }
        debug!("Board {}: {} {:?}", self.id, action, params);

        match action {
            Action::BlinkLed => self.blink_led(&transport)?,
            Action::ToggleLed => self.toggle_led(&transport)?,
            Action::SetPinValue => {
                let [pin, value] = expect_params::<2>(action, params, "pin, value")?;
                let pin = parse_ranged(action, "pin", pin, 0, 255)?;
                let value = parse_ranged(action, "value", value, i64::MIN, i64::MAX)?;
                self.write_pin(&transport, pin as u8, value)?;
            }
            Action::Rainbow | Action::Kitt | Action::SetColor | Action::PulseColor => {
                let frame = led::encode(action, params)?;
                transport.serial_write(led::LED_SERIAL, &frame)?;
            }
            Action::EngineOn => self.engine_on(&transport)?,
            Action::EngineOff => self.engine_off(&transport)?,
            Action::SetSpeed
            | Action::SetRpm
            | Action::SetVin
            | Action::SetDtc
            | Action::ClearDtcs => {
                let command = major_tom::at_command(action, params)?;
                transport.serial_write(OBD_SERIAL, command.as_bytes())?;
            }
        }

        self.touch();
        self.signal_updated();
        Ok(())
    }

    /// Write one pin. Analog pins take `0..1024`, digital pins `0` or `1`.
    pub fn set_pin_value(&self, pin: u8, value: i64) -> Result<()> {
        let transport = self.live_transport()?;
        self.write_pin(&transport, pin, value)?;
        self.touch();
        self.signal_updated();
        Ok(())
    }

    fn write_pin(&self, transport: &Transport, pin: u8, value: i64) -> Result<()> {
        let info = transport
            .pin_info()
            .iter()
            .find(|p| p.index == pin)
            .cloned()
            .ok_or_else(|| BoardError::PinNotFound {
                board: self.id.clone(),
                pin,
            })?;

        let written = if info.is_analog() {
            let level = u16::try_from(value)
                .ok()
                .filter(|v| i64::from(*v) < ANALOG_LIMIT)
                .ok_or_else(|| {
                    BoardError::InvalidArgument(format!(
                        "analog pin {} takes 0-{}, got {}",
                        pin,
                        ANALOG_LIMIT - 1,
                        value
                    ))
                })?;
            transport.analog_write(pin, level)?;
            level
        } else {
            let level: u8 = match value {
                0 => 0,
                1 => 1,
                _ => {
                    return Err(BoardError::InvalidArgument(format!(
                        "digital pin {} takes 0 or 1, got {}",
                        pin, value
                    )))
                }
            };
            transport.set_pin_mode(pin, PinMode::Output)?;
            transport.digital_write(pin, level)?;
            u16::from(level)
        };

        if let Some(p) = self.lock().pins.iter_mut().find(|p| p.index == pin) {
            p.value = written;
        }
        Ok(())
    }

    fn blink_led(&self, transport: &Transport) -> Result<()> {
        let led = self.lock().architecture.pins.led;
        let mut on = led_level(transport, led);
        transport.set_pin_mode(led, PinMode::Output)?;
        let blink = transport.clone();
        self.timers.every(Some(TIMER_BLINK), BLINK_PERIOD, move || {
            on = !on;
            blink.digital_write(led, u8::from(on)).is_ok()
        });
        Ok(())
    }

    fn toggle_led(&self, transport: &Transport) -> Result<()> {
        self.timers.cancel(TIMER_BLINK);
        let led = self.lock().architecture.pins.led;
        let on = !led_level(transport, led);
        transport.digital_write(led, u8::from(on))?;
        Ok(())
    }

    fn set_engine(&self, running: bool) -> Result<PinMap> {
        let mut st = self.lock();
        let pins = st.architecture.pins;
        let Variant::MajorTom(engine) = &mut st.variant else {
            return Err(BoardError::Incompatible(format!(
                "board {} has no engine",
                self.id
            )));
        };
        if engine.running == running {
            let state = if running { "already running" } else { "not running" };
            return Err(BoardError::Conflict(format!(
                "engine on board {} is {}",
                self.id, state
            )));
        }
        engine.running = running;
        Ok(pins)
    }

    fn engine_on(&self, transport: &Transport) -> Result<()> {
        let pins = self.set_engine(true)?;
        let command = major_tom::at_command(Action::EngineOn, &[])?;
        if let Err(e) = transport.serial_write(OBD_SERIAL, command.as_bytes()) {
            let _ = self.set_engine(false);
            return Err(e.into());
        }

        let ramp = transport.clone();
        let id = self.id.clone();
        self.timers.spawn(Some(TIMER_RAMP), async move {
            for step in 1..=major_tom::RAMP_STEPS {
                tokio::time::sleep(major_tom::RAMP_STEP).await;
                if let Err(e) = ramp.analog_write(pins.supply, major_tom::ramp_value(step)) {
                    debug!("Board {}: supply ramp stopped: {}", id, e);
                    return;
                }
            }
        });

        let fan = transport.clone();
        let mut fan_on = false;
        self.timers.every(Some(TIMER_FAN), self.ctx.timing.fan_toggle, move || {
            fan_on = !fan_on;
            fan.digital_write(pins.fan, u8::from(fan_on)).is_ok()
        });
        info!("Board {}: engine started", self.id);
        Ok(())
    }

    fn engine_off(&self, transport: &Transport) -> Result<()> {
        let pins = self.set_engine(false)?;
        self.timers.cancel(TIMER_RAMP);
        self.timers.cancel(TIMER_FAN);
        transport.digital_write(pins.fan, 0)?;
        transport.analog_write(pins.supply, 0)?;
        let command = major_tom::at_command(Action::EngineOff, &[])?;
        transport.serial_write(OBD_SERIAL, command.as_bytes())?;
        info!("Board {}: engine stopped", self.id);
        Ok(())
    }

    // ---- programs ----

    /// Claim the board for program `name`. Fails with `Conflict` while another
    /// program runs.
    pub fn start_program(&self, name: &str) -> Result<ProgramRun> {
        let run = {
            let mut st = self.lock();
            if st.current_program != IDLE {
                return Err(BoardError::Conflict(format!(
                    "board {} is already running program '{}'",
                    self.id, st.current_program
                )));
            }
            st.program_runs += 1;
            let run = ProgramRun {
                run: st.program_runs,
                token: CancellationToken::new(),
            };
            st.current_program = name.to_string();
            st.program = Some((run.run, run.token.clone()));
            run
        };
        self.signal_updated();
        Ok(run)
    }

    /// Release the board after `run` ends. No effect if the run was already
    /// stopped or superseded.
    pub fn finish_program(&self, run: &ProgramRun) -> bool {
        let finished = {
            let mut st = self.lock();
            match &st.program {
                Some((current, _)) if *current == run.run => {
                    st.program = None;
                    st.current_program = IDLE.to_string();
                    true
                }
                _ => false,
            }
        };
        if finished {
            self.signal_updated();
        }
        finished
    }

    /// Cancel the running program, if any, and return to `IDLE`.
    pub fn stop_program(&self) -> bool {
        let stopped = {
            let mut st = self.lock();
            let token = st.program.take();
            st.current_program = IDLE.to_string();
            token.map(|(_, token)| token.cancel()).is_some()
        };
        if stopped {
            self.signal_updated();
        }
        stopped
    }
}

/// Last level written to or reported for the LED pin.
fn led_level(transport: &Transport, led: u8) -> bool {
    transport
        .pins()
        .iter()
        .find(|p| p.index == led)
        .is_some_and(|p| p.value != 0)
}

fn configure_pins(transport: &Transport, variant: Variant, pins: PinMap) -> std::io::Result<()> {
    transport.set_pin_mode(pins.led, PinMode::Output)?;
    match variant {
        Variant::Generic => {}
        Variant::LedController => {
            transport.serial_config(led::LED_SERIAL, led::LED_BAUD, pins.rx, pins.tx)?;
        }
        Variant::MajorTom(_) => {
            transport.serial_config(OBD_SERIAL, OBD_BAUD, pins.rx, pins.tx)?;
            transport.set_pin_mode(pins.supply, PinMode::Pwm)?;
            transport.set_pin_mode(pins.fan, PinMode::Output)?;
        }
    }
    Ok(())
}

async fn listen(board: Weak<Board>, session: Uuid, mut events: broadcast::Receiver<TransportEvent>) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(n)) => {
                debug!("Transport {}: listener skipped {} events", session, n);
                continue;
            }
            Err(RecvError::Closed) => TransportEvent::Disconnect,
        };
        let Some(board) = board.upgrade() else {
            return;
        };
        match event {
            TransportEvent::FirmwareIdentified(_) | TransportEvent::Ready => board.on_ready(session),
            TransportEvent::PinUpdate(pins) => board.on_pins(pins),
            TransportEvent::Error(e) => warn!("Board {}: transport error: {}", board.id, e),
            TransportEvent::Disconnect => {
                board.on_transport_lost(session);
                return;
            }
        }
    }
}
