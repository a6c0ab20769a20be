//! Binary entrypoint for the boardhub CLI.
//!
//! Commands:
//! - `start [--demo <firmware>]...` - run the daemon, optionally with in-process demo boards
//! - `init` - create a starter `config.toml`
//! - `boards` - list boards stored in the data directory
//!
//! See the library crate docs for module-level details: `boardhub::`.
use anyhow::Result;
use clap::{Parser, Subcommand};
use log::{info, warn};

use boardhub::config::Config;
use boardhub::connection::DEFAULT_SAMPLING_INTERVAL;
use boardhub::daemon::Daemon;
use boardhub::firmata::mock::MockBoard;
use boardhub::storage::{BoardDao, BoardStore};

#[derive(Parser)]
#[command(name = "boardhub")]
#[command(about = "Connection manager for a fleet of Firmata boards")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the board hub
    Start {
        /// Connect an in-process demo board reporting this firmware name
        /// (e.g. LedController_demo1.ino); may be repeated
        #[arg(long)]
        demo: Vec<String>,
    },
    /// Write a default configuration file
    Init,
    /// List stored boards
    Boards,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match cli.command {
        Commands::Init => None,
        _ => match Config::load(&cli.config).await {
            Ok(config) => Some(config),
            Err(e) => {
                eprintln!("{} (using defaults)", e);
                None
            }
        },
    };
    init_logging(&config, cli.verbose);

    match cli.command {
        Commands::Init => {
            Config::create_default(&cli.config).await?;
            println!("Wrote default configuration to {}", cli.config);
        }
        Commands::Boards => {
            let config = config.unwrap_or_default();
            let store = BoardStore::open(config.storage.boards_path())?;
            let mut records = store.get_all()?;
            records.sort_by(|a, b| a.id.cmp(&b.id));
            if records.is_empty() {
                println!("No boards stored in {}", store.path().display());
            }
            for r in records {
                println!(
                    "{:<16} {:<14} {:<8} {:<8} {}",
                    r.id,
                    r.board_type,
                    r.architecture,
                    if r.online { "online" } else { "offline" },
                    r.last_update.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }
        Commands::Start { demo } => {
            let config = config.unwrap_or_default();
            info!("Starting boardhub v{}", env!("CARGO_PKG_VERSION"));
            let daemon = Daemon::new(config, None).await?;

            // Keep demo boards alive for the lifetime of the daemon.
            let mut demo_boards = Vec::new();
            for firmware in demo {
                let mock = MockBoard::new(&firmware);
                match daemon
                    .connector()
                    .connect_to_board(mock.link(), DEFAULT_SAMPLING_INTERVAL)
                    .await
                {
                    Ok(conn) => info!("Demo board {} connected", conn.board.id()),
                    Err(e) => warn!("Demo board '{}' failed to connect: {}", firmware, e),
                }
                demo_boards.push(mock);
            }

            daemon.run().await?;
            drop(demo_boards);
        }
    }
    Ok(())
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the configured level
    let base_level = match verbosity {
        0 => config
            .as_ref()
            .and_then(|c| c.logging.level.parse().ok())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    let log_file = config
        .as_ref()
        .and_then(|c| c.logging.file.as_ref())
        .and_then(|path| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()
        });

    match log_file {
        Some(f) => {
            let file = std::sync::Mutex::new(f);
            // Only echo to the console when attached to a terminal
            let is_tty = atty::is(atty::Stream::Stdout);
            builder.format(move |fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                let line = format!("{} [{}] {}", ts, record.level(), record.args());
                if let Ok(mut guard) = file.lock() {
                    let _ = writeln!(guard, "{}", line);
                }
                if is_tty {
                    writeln!(fmt, "{}", line)
                } else {
                    Ok(())
                }
            });
        }
        None => {
            builder.format(|fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
            });
        }
    }
    let _ = builder.try_init();
}
