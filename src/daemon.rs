//! Daemon lifecycle: opens the board store, hydrates the registry, runs the
//! connection orchestrators and shuts everything down on request.

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};

use anyhow::{anyhow, Result};
use log::{error, info, warn};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::config::Config;
use crate::connection::ethernet::EthernetListener;
use crate::connection::serial::{SerialScanner, SystemPorts};
use crate::connection::Connector;
use crate::firmata::FirmataDriver;
use crate::program::ProgramRunner;
use crate::registry::BoardRegistry;
use crate::storage::BoardStore;

pub struct Daemon {
    config: Config,
    driver: Option<Arc<dyn FirmataDriver>>,
    registry: Arc<BoardRegistry>,
    connector: Connector,
    runner: ProgramRunner,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    ethernet_addr: OnceLock<SocketAddr>,
}

impl Daemon {
    /// Open storage and load known boards. Orchestrators need a driver; without
    /// one the daemon only serves stored state.
    pub async fn new(config: Config, driver: Option<Arc<dyn FirmataDriver>>) -> Result<Self> {
        let store_path = config.storage.boards_path();
        let store = BoardStore::open(&store_path)
            .map_err(|e| anyhow!("Failed to open board store {}: {}", store_path.display(), e))?;
        let registry = BoardRegistry::new(Arc::new(store), config.timing.board_timing());
        registry.hydrate().await?;

        let connector = Connector::new(registry.clone(), config.timing.connect_timeout());
        let runner = ProgramRunner::new(registry.clone());
        Ok(Self {
            config,
            driver,
            registry,
            connector,
            runner,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
            ethernet_addr: OnceLock::new(),
        })
    }

    pub fn registry(&self) -> Arc<BoardRegistry> {
        self.registry.clone()
    }

    pub fn connector(&self) -> &Connector {
        &self.connector
    }

    pub fn runner(&self) -> &ProgramRunner {
        &self.runner
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Bound address of the Ethernet listener once started.
    pub fn ethernet_addr(&self) -> Option<SocketAddr> {
        self.ethernet_addr.get().copied()
    }

    /// Start the Ethernet listener and serial scanner as configured.
    pub async fn start(&self) -> Result<()> {
        let Some(driver) = self.driver.clone() else {
            warn!("No Firmata driver linked; ethernet and serial discovery disabled");
            return Ok(());
        };

        if self.config.ethernet.enabled {
            let listener = EthernetListener::bind(
                &self.config.ethernet.listen_addr,
                self.connector.clone(),
                driver.clone(),
                self.config.ethernet.sampling_interval(),
            )
            .await
            .map_err(|e| anyhow!("Failed to bind {}: {}", self.config.ethernet.listen_addr, e))?
            .tracked(self.tracker.clone());
            if let Ok(addr) = listener.local_addr() {
                let _ = self.ethernet_addr.set(addr);
            }
            self.tracker.spawn(listener.run(self.shutdown.clone()));
        } else {
            info!("Ethernet listener disabled");
        }

        if self.config.serial.enabled {
            let scanner = SerialScanner::new(
                self.connector.clone(),
                driver,
                Box::new(SystemPorts),
                self.config.serial.scan_config(),
            )
            .tracked(self.tracker.clone());
            self.tracker.spawn(scanner.run(self.shutdown.clone()));
        } else {
            info!("Serial scanning disabled");
        }
        Ok(())
    }

    /// Stop the orchestrators, wait for their connection tasks and take every
    /// board offline.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        self.registry.disconnect_all().await;
        info!("Daemon stopped");
    }

    /// Run until Ctrl-C or the shutdown token fires.
    pub async fn run(self) -> Result<()> {
        self.start().await?;
        info!("Board hub running");
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("Failed to listen for Ctrl-C: {}", e);
                }
                info!("Shutdown requested");
            }
            _ = self.shutdown.cancelled() => {}
        }
        self.shutdown().await;
        Ok(())
    }
}
