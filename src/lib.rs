//! # Boardhub - Firmata Device Fleet Manager
//!
//! Boardhub keeps track of a fleet of microcontrollers running Firmata
//! firmware, whether they hang off a USB serial port or connect in over TCP.
//!
//! ## Features
//!
//! - **Discovery**: A TCP listener and a serial port scanner hand new links to the registry.
//! - **Identification**: Board id and type come from the firmware name (`<Type>_<id>.ino`).
//! - **Liveness**: A firmware-query heartbeat takes silent boards offline.
//! - **Variants**: Generic boards, LED strip controllers and MajorTom engine emulators.
//! - **Programs**: Timed command sequences with one-at-a-time enforcement and cancellation.
//! - **Persistence**: Board records survive restarts in a sled store.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use boardhub::config::Config;
//! use boardhub::daemon::Daemon;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     // Pass the Firmata driver of your transport library here.
//!     let daemon = Daemon::new(config, None).await?;
//!     daemon.run().await
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`firmata`] - transport seam, Transport Adapter, firmware naming, mock board
//! - [`board`] - device state machine, variants and actions
//! - [`registry`] - authoritative board set and outward events
//! - [`connection`] - connect step, Ethernet listener, serial scanner
//! - [`program`] - programs and the program runner
//! - [`storage`] - board record persistence
//! - [`daemon`] - process wiring and shutdown
//! - [`config`] - configuration management
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────┐
//! │ Ethernet │ Serial scanner │ ← Connection orchestrators
//! └──────────────────────────┘
//!          │ identified transports
//! ┌─────────────────┐      ┌─────────────┐
//! │ Board Registry  │ ───▶ │ Board store │
//! └─────────────────┘      └─────────────┘
//!          │ owns
//! ┌─────────────────┐
//! │ Boards          │ ← heartbeat, actions, programs
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │ Transport       │ ← Firmata driver
//! └─────────────────┘
//! ```

pub mod board;
pub mod config;
pub mod connection;
pub mod daemon;
pub mod error;
pub mod firmata;
pub mod logutil;
pub mod program;
pub mod registry;
pub mod storage;

pub use error::{BoardError, Result};
