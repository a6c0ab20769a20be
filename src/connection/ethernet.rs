//! TCP listener for network-attached boards.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::Connector;
use crate::firmata::FirmataDriver;

pub struct EthernetListener {
    listener: TcpListener,
    connector: Connector,
    driver: Arc<dyn FirmataDriver>,
    sampling_interval: Duration,
    tracker: TaskTracker,
}

impl EthernetListener {
    pub async fn bind(
        addr: &str,
        connector: Connector,
        driver: Arc<dyn FirmataDriver>,
        sampling_interval: Duration,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("Listening for boards on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            connector,
            driver,
            sampling_interval,
            tracker: TaskTracker::new(),
        })
    }

    /// Spawn connection tasks on `tracker` so an owner can wait for them.
    pub fn tracked(mut self, tracker: TaskTracker) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` fires. Each connection is handled
    /// on its own tracked task; a handshake still running at shutdown is
    /// abandoned and its socket closed.
    pub async fn run(self, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.spawn_connection(stream, peer, &shutdown),
                    Err(e) => {
                        warn!("Accept failed: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
            }
        }
        debug!("Ethernet listener stopped");
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr, shutdown: &CancellationToken) {
        debug!("Inbound board connection from {}", peer);
        let link = match self.driver.attach_socket(stream) {
            Ok(link) => link,
            Err(e) => {
                warn!("Could not attach socket from {}: {}", peer, e);
                return;
            }
        };
        let connector = self.connector.clone();
        let sampling = self.sampling_interval;
        let shutdown = shutdown.clone();
        self.tracker.spawn(async move {
            // Dropping the attempt drops its transport, which closes the socket.
            tokio::select! {
                _ = shutdown.cancelled() => debug!("Abandoned handshake from {} on shutdown", peer),
                result = connector.connect_to_board(link, sampling) => match result {
                    Ok(conn) => info!("Board {} connected from {}", conn.board.id(), peer),
                    Err(e) => debug!("Dropped connection from {}: {}", peer, e),
                },
            }
        });
    }
}
