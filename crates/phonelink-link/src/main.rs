//! `phonelink`: run the host side of the accessory link over TCP.
//!
//! Telemetry is fed from stdin, one command per line:
//!
//! ```text
//! missed 3
//! unread 5
//! battery 87 [full]
//! intensity 12
//! status
//! quit
//! ```

use std::io::BufRead;
use std::path::PathBuf;
use std::str::SplitWhitespace;
use std::sync::Arc;
use std::thread;

use clap::Parser;
use crossbeam_channel::select;
use phonelink_link::{
    describe_metrics, ConnectionManager, ConnectionState, LinkConfig, ManualTelemetrySource, Presenter, StatusArea,
    TcpTransport,
};
use phonelink_protocol::{AccessoryDescriptor, TelemetrySnapshot};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "phonelink", about = "Keep a PhoneLink accessory informed over TCP")]
struct Args {
    /// Address to listen on (overrides the config file).
    #[arg(short, long)]
    listen: Option<String>,

    /// YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level used when RUST_LOG is not set.
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Presenter that writes everything to the log.
struct LogPresenter;

impl Presenter for LogPresenter {
    fn on_state_changed(&self, state: ConnectionState) {
        info!(%state, code = state.code(), "state");
    }

    fn on_descriptor_received(&self, descriptor: &AccessoryDescriptor) {
        info!(%descriptor, "accessory descriptor");
    }

    fn on_device_identified(&self, name: &str) {
        info!(device = name, "accessory identified");
    }

    fn on_user_message(&self, text: &str) {
        warn!("{}", text);
    }

    fn on_telemetry(&self, snapshot: &TelemetrySnapshot) {
        info!(%snapshot, "telemetry");
    }
}

impl StatusArea for LogPresenter {
    fn show_status(&self, text: &str) {
        info!(status = text, "status");
    }
}

enum Command {
    Missed(u32),
    Unread(u32),
    Battery { percent: u8, full: bool },
    Intensity(i64),
    Status,
    Quit,
}

fn value(parts: &mut SplitWhitespace<'_>, what: &str) -> Result<i64, String> {
    parts
        .next()
        .ok_or_else(|| format!("{} needs a value", what))?
        .parse::<i64>()
        .map_err(|e| format!("bad {} value: {}", what, e))
}

fn parse_command(line: &str) -> Result<Command, String> {
    let mut parts = line.split_whitespace();
    let verb = parts.next().unwrap_or_default();
    match verb {
        "missed" => Ok(Command::Missed(value(&mut parts, verb)?.clamp(0, u32::MAX as i64) as u32)),
        "unread" => Ok(Command::Unread(value(&mut parts, verb)?.clamp(0, u32::MAX as i64) as u32)),
        "battery" => {
            let percent = value(&mut parts, verb)?.clamp(0, 100) as u8;
            let full = matches!(parts.next(), Some("full"));
            Ok(Command::Battery { percent, full })
        }
        "intensity" => Ok(Command::Intensity(value(&mut parts, verb)?)),
        "status" => Ok(Command::Status),
        "quit" | "exit" => Ok(Command::Quit),
        other => Err(format!("unknown command '{}'", other)),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)))
        .init();

    let mut config = match &args.config {
        Some(path) => LinkConfig::load(path)?,
        None => LinkConfig::default(),
    };
    if let Some(listen) = args.listen {
        config.listen_addr = listen;
    }
    info!(listen = %config.listen_addr, service = %config.service_name, "starting phonelink");

    describe_metrics();

    let source = Arc::new(ManualTelemetrySource::default());
    let presenter = Arc::new(LogPresenter);
    let manager = ConnectionManager::new(
        Arc::new(TcpTransport::new(config.listen_addr.clone())),
        source.clone(),
        presenter.clone(),
        presenter,
        config,
    )?;

    let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
    ctrlc::set_handler(move || {
        let _ = stop_tx.try_send(());
    })?;

    let (line_tx, line_rx) = crossbeam_channel::unbounded();
    thread::Builder::new().name("stdin".to_string()).spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if line_tx.send(line).is_err() {
                break;
            }
        }
    })?;

    manager.start();

    loop {
        select! {
            recv(stop_rx) -> _ => {
                info!("interrupted");
                break;
            }
            recv(line_rx) -> line => {
                let Ok(line) = line else {
                    info!("stdin closed");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match parse_command(&line) {
                    Ok(Command::Missed(n)) => source.set_missed_calls(n),
                    Ok(Command::Unread(n)) => source.set_unread_messages(n),
                    Ok(Command::Battery { percent, full }) => source.set_battery(percent, full),
                    Ok(Command::Intensity(value)) => {
                        if let Err(e) = manager.set_display_intensity(value) {
                            error!(error = %e, "intensity not sent");
                        }
                    }
                    Ok(Command::Status) => info!(
                        state = %manager.state(),
                        session = ?manager.session_id(),
                        descriptor = ?manager.descriptor(),
                        telemetry = %manager.telemetry(),
                        "status"
                    ),
                    Ok(Command::Quit) => break,
                    Err(e) => warn!("{}", e),
                }
            }
        }
    }

    manager.shutdown();
    Ok(())
}
