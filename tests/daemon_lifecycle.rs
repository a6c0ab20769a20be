use std::sync::Arc;
use std::time::Duration;

use boardhub::config::Config;
use boardhub::connection::DEFAULT_SAMPLING_INTERVAL;
use boardhub::daemon::Daemon;
use boardhub::firmata::mock::{MockBoard, MockDriver};
use boardhub::firmata::{FirmataDriver, RawEvent};
use boardhub::BoardError;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

fn test_config(dir: &tempfile::TempDir) -> Config {
    let mut config = Config::default();
    config.storage.data_dir = dir.path().to_string_lossy().to_string();
    config.ethernet.listen_addr = "127.0.0.1:0".to_string();
    config.serial.enabled = false;
    config
}

#[tokio::test]
async fn boards_survive_a_restart_offline() {
    let dir = tempfile::tempdir().expect("tempdir");
    {
        let mut config = test_config(&dir);
        config.ethernet.enabled = false;
        let daemon = Daemon::new(config, None).await.expect("daemon");
        let mock = MockBoard::new("LedController_keep1.ino");
        let conn = daemon
            .connector()
            .connect_to_board(mock.link(), DEFAULT_SAMPLING_INTERVAL)
            .await
            .expect("connect");
        assert!(conn.board.is_online());
        daemon.shutdown().await;
        assert!(!conn.board.is_online());
        assert!(mock.is_closed());
    }

    let mut config = test_config(&dir);
    config.ethernet.enabled = false;
    let daemon = Daemon::new(config, None).await.expect("restart");
    let board = daemon
        .registry()
        .get_board_by_id("keep1")
        .await
        .expect("hydrated");
    assert!(!board.is_online());
    assert_eq!(board.kind().tag(), "LedController");
}

#[tokio::test]
async fn start_and_shutdown_with_driver() {
    let dir = tempfile::tempdir().expect("tempdir");
    let driver: Arc<dyn FirmataDriver> = Arc::new(MockDriver::new());
    let daemon = Daemon::new(test_config(&dir), Some(driver))
        .await
        .expect("daemon");
    daemon.start().await.expect("start");
    tokio::time::timeout(Duration::from_secs(2), daemon.shutdown())
        .await
        .expect("shutdown completes");
    assert!(daemon.shutdown_token().is_cancelled());
}

#[tokio::test]
async fn run_returns_when_token_is_cancelled() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = test_config(&dir);
    config.ethernet.enabled = false;
    let daemon = Daemon::new(config, None).await.expect("daemon");
    let token = daemon.shutdown_token();
    let run = tokio::spawn(daemon.run());
    token.cancel();
    tokio::time::timeout(Duration::from_secs(2), run)
        .await
        .expect("run returns")
        .expect("join")
        .expect("clean exit");
}

#[tokio::test]
async fn shutdown_abandons_a_pending_ethernet_handshake() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mock = Arc::new(MockDriver::new());
    let board = MockBoard::silent();
    mock.queue_socket(board.clone());
    let driver: Arc<dyn FirmataDriver> = mock.clone();
    let daemon = Daemon::new(test_config(&dir), Some(driver))
        .await
        .expect("daemon");
    daemon.start().await.expect("start");
    let addr = daemon.ethernet_addr().expect("listener bound");

    let mut client = TcpStream::connect(addr).await.expect("connect");
    tokio::time::timeout(Duration::from_secs(2), async {
        while board.link_count() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("socket attached");

    tokio::time::timeout(Duration::from_secs(2), daemon.shutdown())
        .await
        .expect("shutdown completes");
    assert!(board.is_closed());

    // A handshake finishing after shutdown must not register anything.
    board.emit(RawEvent::Firmware {
        name: "Board_late.ino".to_string(),
    });
    board.emit(RawEvent::Ready);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(matches!(
        daemon.registry().get_board_by_id("late").await,
        Err(BoardError::NotFound(_))
    ));

    let mut buf = [0u8; 8];
    let read = tokio::time::timeout(Duration::from_secs(1), client.read(&mut buf))
        .await
        .expect("socket closed");
    assert!(matches!(read, Ok(0)));
}
