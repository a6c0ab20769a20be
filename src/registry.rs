//! # Board Registry
//!
//! The single authoritative set of known boards. Orchestrators hand it newly
//! identified transports, remote clients query and command boards through it,
//! and every change is announced on a broadcast stream of [`RegistryEvent`]s.
//!
//! All cache mutations run under one async mutex, so add, update, disconnect
//! and delete are atomic with respect to each other. Boards report their own
//! state changes over an unbounded channel that a forwarder task drains and
//! turns into outward events.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use chrono::Utc;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, Mutex};

use crate::board::{self, architecture, Board, BoardContext, BoardKind, BoardSignal, BoardSnapshot, BoardTiming};
use crate::error::{BoardError, Result};
use crate::firmata::{Identity, Transport};
use crate::storage::{BoardDao, BoardRecord};

const EVENT_CAPACITY: usize = 256;

/// Outward notifications for the control channel.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum RegistryEvent {
    #[serde(rename_all = "camelCase")]
    Connected {
        board: BoardSnapshot,
        is_new_record: bool,
    },
    Updated {
        board: BoardSnapshot,
    },
    Disconnected {
        board: BoardSnapshot,
    },
}

impl RegistryEvent {
    pub fn board(&self) -> &BoardSnapshot {
        match self {
            RegistryEvent::Connected { board, .. }
            | RegistryEvent::Updated { board }
            | RegistryEvent::Disconnected { board } => board,
        }
    }
}

/// Partial update from a remote client. Absent fields stay unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct BoardPatch {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub board_type: Option<String>,
    #[serde(default)]
    pub architecture: Option<String>,
}

impl BoardPatch {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn with_type(mut self, board_type: impl Into<String>) -> Self {
        self.board_type = Some(board_type.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_architecture(mut self, architecture: impl Into<String>) -> Self {
        self.architecture = Some(architecture.into());
        self
    }
}

pub struct BoardRegistry {
    boards: Mutex<HashMap<String, Arc<Board>>>,
    dao: Arc<dyn BoardDao>,
    events: broadcast::Sender<RegistryEvent>,
    ctx: BoardContext,
}

impl BoardRegistry {
    /// Build a registry and start its signal forwarder. Must be called inside a
    /// Tokio runtime.
    pub fn new(dao: Arc<dyn BoardDao>, timing: BoardTiming) -> Arc<Self> {
        let (signals, signal_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let registry = Arc::new(Self {
            boards: Mutex::new(HashMap::new()),
            dao,
            events,
            ctx: BoardContext { signals, timing },
        });
        tokio::spawn(forward_signals(Arc::downgrade(&registry), signal_rx));
        registry
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: RegistryEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Variant factory: build an offline board of the record's type.
    pub fn create_board_instance(&self, record: &BoardRecord) -> Result<Arc<Board>> {
        board::instantiate(record, self.ctx.clone())
    }

    /// Load every persisted board as offline. Returns how many were loaded.
    pub async fn hydrate(&self) -> Result<usize> {
        let records = self.dao.get_all()?;
        let mut boards = self.boards.lock().await;
        let mut loaded = 0;
        for mut record in records {
            if boards.contains_key(&record.id) {
                continue;
            }
            let board = match self.create_board_instance(&record) {
                Ok(board) => board,
                Err(e) => {
                    warn!("Skipping stored board {}: {}", record.id, e);
                    continue;
                }
            };
            if record.online {
                record.online = false;
                if let Err(e) = self.dao.persist(&record) {
                    warn!("Could not mark board {} offline: {}", record.id, e);
                }
            }
            boards.insert(record.id.clone(), board);
            loaded += 1;
        }
        info!("Loaded {} stored board(s)", loaded);
        Ok(loaded)
    }

    /// Register an identified transport. A cached board is re-attached; an
    /// unknown id is rehydrated from storage or created fresh.
    pub async fn add_board(&self, identity: Identity, transport: Transport) -> Result<Arc<Board>> {
        let mut boards = self.boards.lock().await;

        if let Some(board) = boards.get(&identity.id).cloned() {
            board.attach(transport);
            if let Err(e) = self.dao.persist(&board.record()) {
                warn!("Board {}: failed to persist reconnect: {}", board.id(), e);
            }
            info!("Board {} reconnected", board.id());
            self.emit(RegistryEvent::Connected {
                board: board.snapshot(),
                is_new_record: false,
            });
            return Ok(board);
        }

        let (record, is_new_record) = if self.dao.exists(&identity.id)? {
            (self.dao.get(&identity.id)?, false)
        } else {
            let record = BoardRecord::new(identity.id.clone(), identity.board_type.tag());
            (self.dao.create(record)?, true)
        };
        if record.board_type != identity.board_type.tag() {
            debug!(
                "Board {} reports {} but is stored as {}",
                record.id, identity.board_type, record.board_type
            );
        }

        let board = self.create_board_instance(&record)?;
        board.attach(transport);
        boards.insert(record.id.clone(), board.clone());
        if let Err(e) = self.dao.persist(&board.record()) {
            warn!("Board {}: failed to persist connect: {}", board.id(), e);
        }
        info!(
            "Board {} ({}) connected{}",
            board.id(),
            board.kind(),
            if is_new_record { ", new record" } else { "" }
        );
        self.emit(RegistryEvent::Connected {
            board: board.snapshot(),
            is_new_record,
        });
        Ok(board)
    }

    /// Apply `patch`. An online board whose type or architecture changes is
    /// replaced by a fresh instance that takes over the same transport.
    pub async fn update_board(&self, patch: BoardPatch) -> Result<Arc<Board>> {
        let mut boards = self.boards.lock().await;
        let current = boards
            .get(&patch.id)
            .cloned()
            .ok_or_else(|| BoardError::NotFound(patch.id.clone()))?;

        let kind = patch
            .board_type
            .as_deref()
            .map(str::parse::<BoardKind>)
            .transpose()?;
        let arch = patch
            .architecture
            .as_deref()
            .map(architecture::lookup)
            .transpose()?;

        let mut record = current.record();
        if let Some(name) = patch.name {
            let name = name.trim();
            if name.is_empty() {
                return Err(BoardError::InvalidArgument("board name must not be empty".into()));
            }
            record.name = name.to_string();
        }
        if let Some(kind) = kind {
            record.board_type = kind.tag().to_string();
        }
        if let Some(arch) = arch {
            record.architecture = arch.name.to_string();
        }
        let reshaped = kind.is_some_and(|k| k != current.kind())
            || arch.is_some_and(|a| a != current.architecture());

        let board = if reshaped && current.is_online() {
            let replacement = self.create_board_instance(&record)?;
            match current.detach() {
                Some(transport) => {
                    replacement.attach(transport);
                    boards.insert(record.id.clone(), replacement.clone());
                    info!(
                        "Board {} swapped from {} to {}",
                        record.id,
                        current.kind(),
                        replacement.kind()
                    );
                    replacement
                }
                None => {
                    current.apply_record(&record)?;
                    current
                }
            }
        } else {
            current.apply_record(&record)?;
            current
        };

        let mut stored = board.record();
        stored.last_update = Utc::now();
        self.dao.persist(&stored)?;
        self.emit(RegistryEvent::Updated {
            board: board.snapshot(),
        });
        Ok(board)
    }

    /// Force a board offline, persist that and announce it.
    pub async fn disconnect_board(&self, id: &str) -> Result<Arc<Board>> {
        let boards = self.boards.lock().await;
        let board = boards
            .get(id)
            .cloned()
            .ok_or_else(|| BoardError::NotFound(id.to_string()))?;
        self.take_offline(&board)?;
        Ok(board)
    }

    fn take_offline(&self, board: &Arc<Board>) -> Result<()> {
        board.disconnect();
        self.dao.persist(&board.record())?;
        self.emit(RegistryEvent::Disconnected {
            board: board.snapshot(),
        });
        Ok(())
    }

    /// Disconnect, remove the stored record and drop the board from the cache.
    pub async fn delete_board(&self, id: &str) -> Result<()> {
        let mut boards = self.boards.lock().await;
        let board = boards
            .get(id)
            .cloned()
            .ok_or_else(|| BoardError::NotFound(id.to_string()))?;
        if board.disconnect() {
            self.emit(RegistryEvent::Disconnected {
                board: board.snapshot(),
            });
        }
        match self.dao.destroy(id) {
            Ok(()) | Err(crate::storage::StorageError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
        boards.remove(id);
        info!("Board {} deleted", id);
        Ok(())
    }

    pub async fn get_board_by_id(&self, id: &str) -> Result<Arc<Board>> {
        self.boards
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| BoardError::NotFound(id.to_string()))
    }

    /// All known boards, ordered by id.
    pub async fn get_all_boards(&self) -> Vec<Arc<Board>> {
        let mut boards: Vec<Arc<Board>> = self.boards.lock().await.values().cloned().collect();
        boards.sort_by(|a, b| a.id().cmp(b.id()));
        boards
    }

    pub async fn execute_action_on_board(&self, id: &str, action: &str, params: &[String]) -> Result<()> {
        let board = self.get_board_by_id(id).await?;
        board.execute_action(action, params)
    }

    /// Take every online board offline. Used on shutdown.
    pub async fn disconnect_all(&self) {
        let boards = self.boards.lock().await;
        for board in boards.values().filter(|b| b.has_transport() || b.is_online()) {
            if let Err(e) = self.take_offline(board) {
                error!("Board {}: failed to persist shutdown state: {}", board.id(), e);
            }
        }
    }

    async fn handle_signal(&self, signal: BoardSignal) {
        match signal {
            BoardSignal::Updated { id } => {
                let board = self.boards.lock().await.get(&id).cloned();
                if let Some(board) = board {
                    self.emit(RegistryEvent::Updated {
                        board: board.snapshot(),
                    });
                }
            }
            BoardSignal::Disconnected { id, session } => {
                let boards = self.boards.lock().await;
                let Some(board) = boards.get(&id) else {
                    return;
                };
                // A newer transport may already be attached.
                if board.is_online() || board.session() != Some(session) {
                    debug!("Board {}: ignoring stale disconnect", id);
                    return;
                }
                if let Err(e) = self.dao.persist(&board.record()) {
                    error!("Board {}: failed to persist offline state: {}", id, e);
                }
                info!("Board {} disconnected", id);
                self.emit(RegistryEvent::Disconnected {
                    board: board.snapshot(),
                });
            }
        }
    }
}

async fn forward_signals(registry: Weak<BoardRegistry>, mut signals: mpsc::UnboundedReceiver<BoardSignal>) {
    while let Some(signal) = signals.recv().await {
        let Some(registry) = registry.upgrade() else {
            break;
        };
        registry.handle_signal(signal).await;
    }
    debug!("Registry signal forwarder stopped");
}
