mod common;

use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use boardhub::board::BoardKind;
use boardhub::connection::ethernet::EthernetListener;
use boardhub::connection::serial::{
    PortCandidate, PortEnumerator, PortKind, SerialScanConfig, SerialScanner,
};
use boardhub::connection::{Connector, DEFAULT_SAMPLING_INTERVAL};
use boardhub::firmata::mock::{MockBoard, MockDriver, MockWrite};
use boardhub::firmata::FirmataDriver;
use boardhub::registry::RegistryEvent;
use common::{eventually, quiet_timing, wait_for, Harness};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn ethernet_listener_registers_inbound_boards() {
    let h = Harness::new(quiet_timing());
    let driver = Arc::new(MockDriver::new());
    driver.queue_socket(MockBoard::new("LedController_eth1.ino"));
    let mut events = h.registry.subscribe();

    let listener = EthernetListener::bind(
        "127.0.0.1:0",
        h.connector.clone(),
        driver.clone() as Arc<dyn FirmataDriver>,
        DEFAULT_SAMPLING_INTERVAL,
    )
    .await
    .expect("bind");
    let addr = listener.local_addr().expect("addr");
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(listener.run(shutdown.clone()));

    let _client = TcpStream::connect(addr).await.expect("connect");
    let event = wait_for(&mut events, |e| matches!(e, RegistryEvent::Connected { .. })).await;
    assert_eq!(event.board().id, "eth1");
    let board = h.registry.get_board_by_id("eth1").await.expect("registered");
    assert_eq!(board.kind(), BoardKind::LedController);
    assert!(board.is_online());

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("listener stops")
        .expect("join");
}

#[tokio::test]
async fn ethernet_connection_without_handshake_is_dropped() {
    let h = Harness::new(quiet_timing());
    let connector = Connector::new(h.registry.clone(), Duration::from_millis(50));
    let driver: Arc<dyn FirmataDriver> = Arc::new(MockDriver::new());
    let listener = EthernetListener::bind("127.0.0.1:0", connector, driver, DEFAULT_SAMPLING_INTERVAL)
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    let shutdown = CancellationToken::new();
    tokio::spawn(listener.run(shutdown.clone()));

    let mut client = TcpStream::connect(addr).await.expect("connect");
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(h.registry.get_all_boards().await.is_empty());

    let mut buf = [0u8; 8];
    let read = tokio::time::timeout(Duration::from_secs(1), client.read(&mut buf))
        .await
        .expect("server closed the socket");
    assert!(matches!(read, Ok(0)));
    shutdown.cancel();
}

/// Port list a test can change between scans.
#[derive(Clone, Default)]
struct FakePorts(Arc<Mutex<Vec<PortCandidate>>>);

impl FakePorts {
    fn set(&self, ports: Vec<PortCandidate>) {
        *self.0.lock().expect("ports") = ports;
    }
}

impl PortEnumerator for FakePorts {
    fn available_ports(&self) -> io::Result<Vec<PortCandidate>> {
        Ok(self.0.lock().expect("ports").clone())
    }
}

fn arduino(path: &str) -> PortCandidate {
    PortCandidate::new(path, PortKind::Usb { vid: 0x2341, pid: 0x0043 })
}

fn scan_config() -> SerialScanConfig {
    SerialScanConfig {
        scan_interval: Duration::from_millis(20),
        sampling_interval: Duration::from_millis(200),
        unsupported_retry: None,
        ..SerialScanConfig::default()
    }
}

fn scanner(h: &Harness, driver: &Arc<MockDriver>, ports: &FakePorts, timeout: Duration) -> SerialScanner {
    SerialScanner::new(
        Connector::new(h.registry.clone(), timeout),
        driver.clone(),
        Box::new(ports.clone()),
        scan_config(),
    )
}

#[tokio::test]
async fn scanner_prefers_known_vendors_and_tracks_ports() {
    let h = Harness::new(quiet_timing());
    let driver = Arc::new(MockDriver::new());
    let mock = MockBoard::new("MajorTom_car1.ino");
    driver.add_serial("/dev/ttyACM0", mock.clone());
    let ports = FakePorts::default();
    ports.set(vec![
        PortCandidate::new("/dev/ttyS0", PortKind::Pci),
        PortCandidate::new("/dev/rfcomm0", PortKind::Bluetooth),
        arduino("/dev/ttyACM0"),
    ]);
    let scanner = scanner(&h, &driver, &ports, Duration::from_millis(500));

    let board = scanner.scan_once().await.expect("board on ACM0");
    assert_eq!(board.id(), "car1");
    assert!(scanner.is_in_use("/dev/ttyACM0"));
    assert!(mock
        .writes()
        .contains(&MockWrite::Sampling(Duration::from_millis(200))));

    // Nothing answers on the PCI port: it is set aside.
    assert!(scanner.scan_once().await.is_none());
    assert!(scanner.is_unsupported("/dev/ttyS0"));
    assert!(scanner.scan_once().await.is_none());
    assert_eq!(driver.opened(), vec!["/dev/ttyACM0".to_string(), "/dev/ttyS0".to_string()]);

    mock.drop_connection();
    assert!(eventually(|| !scanner.is_in_use("/dev/ttyACM0")).await);
    assert!(eventually(|| !board.is_online()).await);

    let again = scanner.scan_once().await.expect("reconnect");
    assert!(Arc::ptr_eq(&board, &again));
    assert!(again.is_online());
}

#[tokio::test]
async fn silent_serial_device_is_marked_unsupported() {
    let h = Harness::new(quiet_timing());
    let driver = Arc::new(MockDriver::new());
    driver.add_serial("/dev/ttyUSB0", MockBoard::silent());
    let ports = FakePorts::default();
    ports.set(vec![PortCandidate::new(
        "/dev/ttyUSB0",
        PortKind::Usb { vid: 0x1a86, pid: 0x7523 },
    )]);
    let scanner = scanner(&h, &driver, &ports, Duration::from_millis(50));

    assert!(scanner.scan_once().await.is_none());
    assert!(scanner.is_unsupported("/dev/ttyUSB0"));
    assert!(!scanner.is_in_use("/dev/ttyUSB0"));
    assert!(h.registry.get_all_boards().await.is_empty());
}

#[tokio::test]
async fn scanner_loop_connects_until_shutdown() {
    let h = Harness::new(quiet_timing());
    let driver = Arc::new(MockDriver::new());
    driver.add_serial("/dev/ttyACM1", MockBoard::new("Board_loop9.ino"));
    let ports = FakePorts::default();
    ports.set(vec![arduino("/dev/ttyACM1")]);
    let scanner = scanner(&h, &driver, &ports, Duration::from_millis(500));

    let mut events = h.registry.subscribe();
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(scanner.run(shutdown.clone()));
    let event = wait_for(&mut events, |e| matches!(e, RegistryEvent::Connected { .. })).await;
    assert_eq!(event.board().id, "loop9");

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("scanner stops")
        .expect("join");
    assert_eq!(driver.opened().len(), 1, "in-use port is not reopened");
}
