//! Shared fixtures for integration tests: a temp-dir board store, a registry
//! with test timings, and helpers for connecting mock boards.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use boardhub::board::BoardTiming;
use boardhub::connection::{Connection, Connector, DEFAULT_SAMPLING_INTERVAL};
use boardhub::firmata::mock::MockBoard;
use boardhub::registry::{BoardRegistry, RegistryEvent};
use boardhub::storage::{BoardDao, BoardStore};
use tokio::sync::broadcast;

/// Heartbeats slow enough to never fire during a test.
pub fn quiet_timing() -> BoardTiming {
    BoardTiming {
        heartbeat_interval: Duration::from_secs(60),
        disconnect_timeout: Duration::from_secs(60),
        ..BoardTiming::default()
    }
}

/// Heartbeats that notice a silent board within ~100ms.
pub fn fast_timing() -> BoardTiming {
    BoardTiming {
        heartbeat_interval: Duration::from_millis(40),
        disconnect_timeout: Duration::from_millis(40),
        ..BoardTiming::default()
    }
}

pub struct Harness {
    pub dir: tempfile::TempDir,
    pub store: Arc<BoardStore>,
    pub registry: Arc<BoardRegistry>,
    pub connector: Connector,
}

impl Harness {
    pub fn new(timing: BoardTiming) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(BoardStore::open(dir.path().join("boards")).expect("store"));
        Self::with_store(dir, store, timing)
    }

    pub fn with_store(dir: tempfile::TempDir, store: Arc<BoardStore>, timing: BoardTiming) -> Self {
        let dao: Arc<dyn BoardDao> = store.clone();
        let registry = BoardRegistry::new(dao, timing);
        let connector = Connector::new(registry.clone(), Duration::from_secs(2));
        Self {
            dir,
            store,
            registry,
            connector,
        }
    }

    /// Connect a responsive mock board reporting `firmware`.
    pub async fn connect(&self, firmware: &str) -> (Connection, MockBoard) {
        let mock = MockBoard::new(firmware);
        let conn = self
            .connector
            .connect_to_board(mock.link(), DEFAULT_SAMPLING_INTERVAL)
            .await
            .expect("connect");
        (conn, mock)
    }
}

pub fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

/// Wait for the next event matching `pred`, skipping the rest.
pub async fn wait_for<F>(rx: &mut broadcast::Receiver<RegistryEvent>, pred: F) -> RegistryEvent
where
    F: Fn(&RegistryEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event stream closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for registry event")
}

/// Poll `cond` until it holds or two seconds pass.
pub async fn eventually<F: Fn() -> bool>(cond: F) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
