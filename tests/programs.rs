mod common;

use std::time::Duration;

use boardhub::board::IDLE;
use boardhub::error::BoardError;
use boardhub::firmata::mock::MockWrite;
use boardhub::program::{Command, Program, ProgramOutcome, ProgramRunner, ALL_DEVICES, REPEAT_FOREVER};
use common::{eventually, quiet_timing, Harness};

fn led_show() -> Program {
    Program::new(
        "show",
        "LedController",
        vec![
            Command::new("SETCOLOR").with_params(["10", "20", "30"]).with_duration(5),
            Command::new("RAINBOW").with_duration(5),
        ],
    )
}

fn toggler(millis: u64) -> Program {
    Program::new(
        "toggler",
        ALL_DEVICES,
        vec![Command::new("TOGGLELED").with_duration(millis)],
    )
}

#[tokio::test]
async fn repeat_runs_every_command_each_time() {
    let h = Harness::new(quiet_timing());
    let (_conn, mock) = h.connect("LedController_abc123.ino").await;
    let runner = ProgramRunner::new(h.registry.clone());
    mock.clear_writes();

    let outcome = runner
        .execute_program_on_board("abc123", &led_show(), 3)
        .await
        .expect("run");
    assert_eq!(outcome, ProgramOutcome::Completed { iterations: 3 });

    let frames = mock.serial_payloads();
    assert_eq!(frames.len(), 6);
    assert_eq!(frames[0], b"[C\x0a\x14\x1e]".to_vec());
    assert_eq!(frames[1], b"[R]".to_vec());
    let board = h.registry.get_board_by_id("abc123").await.expect("board");
    assert_eq!(board.current_program(), IDLE);
}

#[tokio::test]
async fn stop_aborts_a_forever_program() {
    let h = Harness::new(quiet_timing());
    let (conn, mock) = h.connect("Board_loop1.ino").await;
    let runner = ProgramRunner::new(h.registry.clone());

    let handle = runner
        .spawn_program_on_board("loop1", toggler(10), REPEAT_FOREVER)
        .await
        .expect("spawn");
    assert!(eventually(|| conn.board.current_program() == "toggler").await);
    tokio::time::sleep(Duration::from_millis(50)).await;

    runner.stop_program("loop1").await.expect("stop");
    assert_eq!(conn.board.current_program(), IDLE);
    let outcome = tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("run ends")
        .expect("join")
        .expect("outcome");
    assert!(matches!(outcome, ProgramOutcome::Stopped { .. }));
    assert_eq!(conn.board.current_program(), IDLE);

    let toggles = |m: &boardhub::firmata::mock::MockBoard| {
        m.writes()
            .iter()
            .filter(|w| matches!(w, MockWrite::Digital { pin: 13, .. }))
            .count()
    };
    let before = toggles(&mock);
    assert!(before >= 2);
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(toggles(&mock), before, "no commands after stop");

    runner.stop_program("loop1").await.expect("stopping an idle board is fine");
}

#[tokio::test]
async fn second_program_conflicts_before_type_check() {
    let h = Harness::new(quiet_timing());
    let (_conn, _mock) = h.connect("Board_busy1.ino").await;
    let runner = ProgramRunner::new(h.registry.clone());
    let _handle = runner
        .spawn_program_on_board("busy1", toggler(20), REPEAT_FOREVER)
        .await
        .expect("spawn");

    let err = runner
        .execute_program_on_board("busy1", &toggler(5), 1)
        .await
        .expect_err("busy");
    assert!(matches!(err, BoardError::Conflict(_)));
    let err = runner
        .execute_program_on_board("busy1", &led_show(), 1)
        .await
        .expect_err("busy and mistyped");
    assert!(matches!(err, BoardError::Conflict(_)));

    runner.stop_program("busy1").await.expect("stop");
}

#[tokio::test]
async fn program_for_other_type_is_incompatible() {
    let h = Harness::new(quiet_timing());
    let (conn, mock) = h.connect("MajorTom_mt7.ino").await;
    let runner = ProgramRunner::new(h.registry.clone());
    mock.clear_writes();

    let err = runner
        .execute_program_on_board("mt7", &led_show(), 1)
        .await
        .expect_err("wrong type");
    assert!(matches!(err, BoardError::Incompatible(_)));
    assert!(mock.writes().is_empty());
    assert_eq!(conn.board.current_program(), IDLE);
}

#[tokio::test]
async fn invalid_arguments_are_rejected() {
    let h = Harness::new(quiet_timing());
    let (_conn, _mock) = h.connect("Board_arg1.ino").await;
    let runner = ProgramRunner::new(h.registry.clone());

    for repeat in [0, -2] {
        let err = runner
            .execute_program_on_board("arg1", &toggler(1), repeat)
            .await
            .expect_err("repeat");
        assert!(matches!(err, BoardError::InvalidArgument(_)));
    }
    let err = runner
        .execute_program_on_board("ghost", &toggler(1), 1)
        .await
        .expect_err("missing");
    assert!(matches!(err, BoardError::NotFound(_)));
}

#[tokio::test]
async fn failing_command_aborts_and_releases_the_board() {
    let h = Harness::new(quiet_timing());
    let (conn, mock) = h.connect("LedController_bad7.ino").await;
    let runner = ProgramRunner::new(h.registry.clone());
    mock.clear_writes();

    let program = Program::new(
        "broken",
        "LedController",
        vec![
            Command::new("RAINBOW").with_duration(1),
            Command::new("SETCOLOR").with_params(["300", "0", "0"]),
        ],
    );
    let err = runner
        .execute_program_on_board("bad7", &program, 2)
        .await
        .expect_err("bad color");
    assert!(matches!(err, BoardError::InvalidArgument(_)));
    assert_eq!(mock.serial_payloads(), vec![b"[R]".to_vec()]);
    assert_eq!(conn.board.current_program(), IDLE);
}

#[tokio::test]
async fn disconnect_cancels_a_running_program() {
    let h = Harness::new(quiet_timing());
    let (conn, _mock) = h.connect("Board_dc1.ino").await;
    let runner = ProgramRunner::new(h.registry.clone());
    let handle = runner
        .spawn_program_on_board("dc1", toggler(10), REPEAT_FOREVER)
        .await
        .expect("spawn");
    assert!(eventually(|| conn.board.current_program() == "toggler").await);

    h.registry.disconnect_board("dc1").await.expect("disconnect");
    let outcome = tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("run ends")
        .expect("join")
        .expect("outcome");
    assert!(matches!(outcome, ProgramOutcome::Stopped { .. }));
    assert_eq!(conn.board.current_program(), IDLE);
}
