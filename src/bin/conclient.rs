use clap::{Parser, Subcommand};
use std::error::Error;
use std::num::NonZeroU32;
use std::path::PathBuf;

use connector_client::config::ClientConfig;
use connector_client::session::{ControlSession, LogReader};
use connector_client::wire::constants::BROADCAST_TARGET;
use connector_client::wire::payload::{build_bitcoin_frame, build_ping_payload};
use connector_client::wire::{Endpoint, LogMask, LogRecord, TargetByteOrder};

use tracing::{Level, debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "conclient", about = "Drive a bitcoin connector over its control socket")]
struct Cli {
    /// TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Control socket, overriding the configuration.
    #[arg(long)]
    control_socket: Option<PathBuf>,

    /// How command targets are packed.
    #[arg(long, value_parser = parse_order)]
    target_order: Option<TargetByteOrder>,

    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Re-register, discarding previously relayed messages.
    Register,
    /// Open a connection to a bitcoin node.
    Connect {
        addr: String,
        #[arg(default_value_t = 8333)]
        port: u16,
    },
    /// List active connections.
    GetCxn,
    /// Drop connections by handle.
    Disconnect {
        #[arg(required_unless_present = "all")]
        handles: Vec<u32>,
        #[arg(long, conflicts_with = "handles")]
        all: bool,
    },
    /// Relay a `getaddr` and send it to the given handles (all by default).
    Getaddr { handles: Vec<u32> },
    /// Relay a `ping` with a random nonce and send it to the given handles.
    Ping { handles: Vec<u32> },
    /// Relay a hex-encoded bitcoin frame and send it to the given handles.
    Relay {
        frame: String,
        handles: Vec<u32>,
    },
    /// Print connector events (or message traces) as they arrive.
    Watch {
        /// Comma-separated log types, e.g. `bitcoin,error`, or `!bitcoin_msg`.
        #[arg(long, default_value = "all")]
        mask: LogMask,
        /// Follow the message trace stream instead of the event stream.
        #[arg(long)]
        messages: bool,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
        EnvFilter::new(format!("connector_client={level},conclient={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &cli.config {
        Some(path) => ClientConfig::load(path)?,
        None => ClientConfig::default(),
    };
    if let Some(socket) = cli.control_socket {
        config.control_socket = socket;
    }
    if let Some(order) = cli.target_order {
        config.target_byte_order = order;
    }

    if let Commands::Watch { mask, messages } = cli.command {
        return watch(&config, mask, messages);
    }

    let mut session = ControlSession::connect(&config)?;
    debug!(order = ?session.order(), "packing command targets");

    match cli.command {
        Commands::Register => session.register()?,
        Commands::Connect { addr, port } => {
            let remote = Endpoint::parse(&addr, port)?;
            info!(%remote, "requesting connection");
            session.connect_to(remote, Endpoint::UNSPECIFIED)?;
        }
        Commands::GetCxn => {
            for cxn in session.get_connections()? {
                println!("{:>6}  {:<21}  {}", cxn.handle_id, cxn.remote.to_string(), cxn.local);
            }
        }
        Commands::Disconnect { handles, all } => {
            let targets = if all { vec![BROADCAST_TARGET] } else { handles };
            session.disconnect(targets)?;
        }
        Commands::Getaddr { handles } => {
            let frame = build_bitcoin_frame("getaddr", &[])?;
            relay_and_send(&mut session, &frame, handles)?;
        }
        Commands::Ping { handles } => {
            let (nonce, payload) = build_ping_payload();
            let frame = build_bitcoin_frame("ping", &payload)?;
            info!(nonce, "sending ping");
            relay_and_send(&mut session, &frame, handles)?;
        }
        Commands::Relay { frame, handles } => {
            let frame = hex::decode(frame.trim())?;
            relay_and_send(&mut session, &frame, handles)?;
        }
        Commands::Watch { .. } => {}
    }

    Ok(())
}

fn relay_and_send(
    session: &mut ControlSession,
    frame: &[u8],
    handles: Vec<u32>,
) -> Result<(), Box<dyn Error>> {
    let id: NonZeroU32 = session
        .relay(frame)?
        .ok_or("connector rejected the message")?;

    let targets = if handles.is_empty() {
        vec![BROADCAST_TARGET]
    } else {
        handles
    };

    info!(message_id = id.get(), targets = ?targets, "sending relayed message");
    session.send_message(id, targets)?;

    Ok(())
}

fn watch(config: &ClientConfig, mask: LogMask, messages: bool) -> Result<(), Box<dyn Error>> {
    let socket = if messages {
        &config.message_log_socket
    } else {
        &config.event_log_socket
    };

    info!(socket = %socket.display(), ?mask, "watching log stream");

    for entry in LogReader::connect(socket)?.with_mask(mask).lenient(true) {
        match entry {
            Ok(entry) => {
                if let LogRecord::ConnectorEvent(event) = &entry.record {
                    if event.update.is_disconnect() {
                        let handle = event.handle_id;
                        info!(handle, update = ?event.update, "connection closed");
                    }
                }
                println!("{entry}");
            }
            Err(e) if e.is_fatal() => {
                warn!(socket = %socket.display(), error = %e, "log stream ended");
                return Err(e.into());
            }
            Err(e) => warn!(error = %e, "skipping malformed record"),
        }
    }

    Ok(())
}

fn parse_order(s: &str) -> Result<TargetByteOrder, String> {
    match s {
        "network" => Ok(TargetByteOrder::Network),
        "host_swapped" | "host-swapped" => Ok(TargetByteOrder::HostSwapped),
        other => Err(format!("unknown target order {other:?}, expected network or host_swapped")),
    }
}
