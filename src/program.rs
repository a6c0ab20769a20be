//! # Programs
//!
//! A program is a named, timed sequence of board actions. Only one program
//! runs per board at a time: starting claims the board's `current_program`
//! slot and hands back a cancellation token that [`ProgramRunner::stop_program`]
//! fires. The runner checks the token before each command and selects on it
//! while waiting out a command's duration.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::board::{Board, BoardKind, IDLE};
use crate::error::{BoardError, Result};
use crate::registry::BoardRegistry;

pub const DEFAULT_COMMAND_DURATION_MS: u64 = 100;
/// `device_type` matching every board.
pub const ALL_DEVICES: &str = "all";
/// `repeat` value that runs until stopped.
pub const REPEAT_FOREVER: i64 = -1;

fn default_duration() -> u64 {
    DEFAULT_COMMAND_DURATION_MS
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub action: String,
    #[serde(default, alias = "params")]
    pub parameters: Vec<String>,
    /// Wait after the command, in milliseconds.
    #[serde(default = "default_duration")]
    pub duration: u64,
}

impl Command {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            parameters: Vec::new(),
            duration: DEFAULT_COMMAND_DURATION_MS,
        }
    }

    pub fn with_params<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.parameters = params.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_duration(mut self, millis: u64) -> Self {
        self.duration = millis;
        self
    }

    pub fn wait(&self) -> Duration {
        Duration::from_millis(self.duration)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Program {
    pub name: String,
    #[serde(default = "all_devices", alias = "device_type")]
    pub device_type: String,
    pub commands: Vec<Command>,
}

fn all_devices() -> String {
    ALL_DEVICES.to_string()
}

impl Program {
    pub fn new(name: impl Into<String>, device_type: impl Into<String>, commands: Vec<Command>) -> Self {
        Self {
            name: name.into(),
            device_type: device_type.into(),
            commands,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let name = self.name.trim();
        if name.is_empty() || name == IDLE {
            return Err(BoardError::InvalidArgument(format!(
                "invalid program name '{}'",
                self.name
            )));
        }
        if self.commands.is_empty() {
            return Err(BoardError::InvalidArgument(format!(
                "program '{}' has no commands",
                self.name
            )));
        }
        if !self.device_type.eq_ignore_ascii_case(ALL_DEVICES) {
            self.device_type.parse::<BoardKind>()?;
        }
        Ok(())
    }

    pub fn applies_to(&self, kind: BoardKind) -> bool {
        self.device_type.eq_ignore_ascii_case(ALL_DEVICES)
            || self
                .device_type
                .parse::<BoardKind>()
                .is_ok_and(|k| k == kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repeat {
    Times(u32),
    Forever,
}

impl Repeat {
    /// `-1` runs forever, `n >= 1` runs `n` times.
    pub fn from_count(count: i64) -> Result<Self> {
        match count {
            REPEAT_FOREVER => Ok(Repeat::Forever),
            n if n >= 1 => u32::try_from(n)
                .map(Repeat::Times)
                .map_err(|_| BoardError::InvalidArgument(format!("repeat {} too large", n))),
            n => Err(BoardError::InvalidArgument(format!(
                "repeat must be -1 or at least 1, got {}",
                n
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramOutcome {
    Completed { iterations: u32 },
    Stopped { iterations: u32 },
}

/// Run `program` on `board`. Returns once every repetition finished or the run
/// was stopped; a failing command aborts the run with its error.
pub async fn run_program(board: &Board, program: &Program, repeat: Repeat) -> Result<ProgramOutcome> {
    let current = board.current_program();
    if current != IDLE {
        return Err(BoardError::Conflict(format!(
            "board {} is already running program '{}'",
            board.id(),
            current
        )));
    }
    let kind = board.kind();
    if !program.applies_to(kind) {
        return Err(BoardError::Incompatible(format!(
            "program '{}' targets {} boards, {} is {}",
            program.name,
            program.device_type,
            board.id(),
            kind
        )));
    }
    program.validate()?;

    let run = board.start_program(&program.name)?;
    info!("Board {}: program '{}' started ({:?})", board.id(), program.name, repeat);

    let mut iterations = 0u32;
    let result = 'runs: loop {
        if let Repeat::Times(n) = repeat {
            if iterations >= n {
                break Ok(ProgramOutcome::Completed { iterations });
            }
        }
        for command in &program.commands {
            if run.is_cancelled() {
                break 'runs Ok(ProgramOutcome::Stopped { iterations });
            }
            if let Err(e) = board.execute_action(&command.action, &command.parameters) {
                break 'runs Err(e);
            }
            tokio::select! {
                _ = run.token().cancelled() => break 'runs Ok(ProgramOutcome::Stopped { iterations }),
                _ = tokio::time::sleep(command.wait()) => {}
            }
        }
        iterations = iterations.saturating_add(1);
    };

    board.finish_program(&run);
    match &result {
        Ok(outcome) => info!("Board {}: program '{}' ended: {:?}", board.id(), program.name, outcome),
        Err(e) => warn!("Board {}: program '{}' aborted: {}", board.id(), program.name, e),
    }
    result
}

/// Registry-facing program operations.
#[derive(Clone)]
pub struct ProgramRunner {
    registry: Arc<BoardRegistry>,
}

impl ProgramRunner {
    pub fn new(registry: Arc<BoardRegistry>) -> Self {
        Self { registry }
    }

    /// Run `program` on board `id` `repeat` times (`-1` until stopped).
    pub async fn execute_program_on_board(
        &self,
        id: &str,
        program: &Program,
        repeat: i64,
    ) -> Result<ProgramOutcome> {
        let board = self.registry.get_board_by_id(id).await?;
        let repeat = Repeat::from_count(repeat)?;
        run_program(&board, program, repeat).await
    }

    /// Start a run in the background. Rejections surface immediately; errors
    /// after the start are only logged.
    pub async fn spawn_program_on_board(
        &self,
        id: &str,
        program: Program,
        repeat: i64,
    ) -> Result<tokio::task::JoinHandle<Result<ProgramOutcome>>> {
        let board = self.registry.get_board_by_id(id).await?;
        let repeat = Repeat::from_count(repeat)?;
        if board.current_program() != IDLE {
            return Err(BoardError::Conflict(format!(
                "board {} is already running program '{}'",
                id,
                board.current_program()
            )));
        }
        if !program.applies_to(board.kind()) {
            return Err(BoardError::Incompatible(format!(
                "program '{}' does not apply to {}",
                program.name,
                board.kind()
            )));
        }
        program.validate()?;
        Ok(tokio::spawn(async move { run_program(&board, &program, repeat).await }))
    }

    pub async fn stop_program(&self, id: &str) -> Result<()> {
        let board = self.registry.get_board_by_id(id).await?;
        if board.stop_program() {
            info!("Board {}: program stopped", id);
        } else {
            debug!("Board {}: no program to stop", id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_default_their_duration() {
        let program: Program = serde_json::from_str(
            r#"{"name":"wave","deviceType":"LedController","commands":[
                {"action":"SETCOLOR","parameters":["1","2","3"]},
                {"action":"RAINBOW","duration":250}
            ]}"#,
        )
        .expect("json");
        assert_eq!(program.commands[0].duration, DEFAULT_COMMAND_DURATION_MS);
        assert_eq!(program.commands[1].wait(), Duration::from_millis(250));
        assert!(program.applies_to(BoardKind::LedController));
        assert!(!program.applies_to(BoardKind::MajorTom));
        program.validate().expect("valid");
    }

    #[test]
    fn empty_or_mistyped_programs_are_rejected() {
        assert!(Program::new("p", ALL_DEVICES, vec![]).validate().is_err());
        assert!(Program::new("p", "Toaster", vec![Command::new("BLINKLED")])
            .validate()
            .is_err());
        assert!(Program::new(IDLE, ALL_DEVICES, vec![Command::new("BLINKLED")])
            .validate()
            .is_err());
    }

    #[test]
    fn repeat_accepts_positive_or_forever() {
        assert_eq!(Repeat::from_count(3).expect("3"), Repeat::Times(3));
        assert_eq!(Repeat::from_count(-1).expect("forever"), Repeat::Forever);
        assert!(Repeat::from_count(0).is_err());
        assert!(Repeat::from_count(-2).is_err());
    }
}
