//! # Connection Orchestrators
//!
//! Turn raw links into identified boards. [`Connector::connect_to_board`] is
//! the shared step: wrap the link in a [`Transport`], race the handshake
//! against a timeout, then hand the result to the registry. The Ethernet
//! listener and the serial scanner are the two sources of links.
//!
//! A failed attempt closes its transport and leaves the registry untouched.

pub mod ethernet;
pub mod serial;

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use thiserror::Error;

use crate::board::Board;
use crate::error::BoardError;
use crate::firmata::transport::LinkError;
use crate::firmata::{Identity, Link, Transport};
use crate::registry::BoardRegistry;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Pin sampling period for socket links.
pub const DEFAULT_SAMPLING_INTERVAL: Duration = Duration::from_millis(1000);

#[derive(Debug, Error)]
pub enum ConnectError {
    /// Handshake not completed in time. `identity` is set when the firmware
    /// name arrived but ready never did.
    #[error("board did not become ready within {after:?}")]
    Timeout {
        after: Duration,
        identity: Option<Identity>,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("link closed during handshake")]
    Closed,

    #[error("registry rejected board: {0}")]
    Registry(#[from] BoardError),
}

impl ConnectError {
    /// Whether a device on the link identified itself before the attempt failed.
    pub fn identified(&self) -> bool {
        match self {
            ConnectError::Timeout { identity, .. } => identity.is_some(),
            ConnectError::Registry(_) => true,
            ConnectError::Transport(_) | ConnectError::Closed => false,
        }
    }
}

impl From<LinkError> for ConnectError {
    fn from(err: LinkError) -> Self {
        match err {
            LinkError::Failed(e) => ConnectError::Transport(e),
            LinkError::Closed => ConnectError::Closed,
        }
    }
}

/// A successful connection.
#[derive(Debug, Clone)]
pub struct Connection {
    pub board: Arc<Board>,
    pub transport: Transport,
}

#[derive(Clone)]
pub struct Connector {
    registry: Arc<BoardRegistry>,
    connect_timeout: Duration,
}

impl Connector {
    pub fn new(registry: Arc<BoardRegistry>, connect_timeout: Duration) -> Self {
        Self {
            registry,
            connect_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<BoardRegistry> {
        &self.registry
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Identify the board on `link` and register it.
    pub async fn connect_to_board(
        &self,
        link: Link,
        sampling_interval: Duration,
    ) -> Result<Connection, ConnectError> {
        let transport = Transport::new(link, sampling_interval);
        let identity = match tokio::time::timeout(self.connect_timeout, transport.ready()).await {
            Ok(Ok(identity)) => identity,
            Ok(Err(e)) => {
                debug!("Transport {}: handshake failed: {}", transport.id(), e);
                transport.close();
                return Err(e.into());
            }
            Err(_) => {
                let identity = transport.identity();
                debug!(
                    "Transport {}: no handshake within {:?}",
                    transport.id(),
                    self.connect_timeout
                );
                transport.close();
                return Err(ConnectError::Timeout {
                    after: self.connect_timeout,
                    identity,
                });
            }
        };

        info!(
            "Identified {} board {} on transport {}",
            identity.board_type,
            identity.id,
            transport.id()
        );
        match self.registry.add_board(identity, transport.clone()).await {
            Ok(board) => Ok(Connection { board, transport }),
            Err(e) => {
                transport.close();
                Err(e.into())
            }
        }
    }
}
