use clap::Parser;
use std::error::Error;
use std::path::PathBuf;

use connector_client::session::LogReader;
use connector_client::wire::LogMask;
use connector_client::wire::log::LogRecord;
use connector_client::wire::payload::parse_frame;

use tracing::{Level, debug, warn};
use tracing_subscriber::EnvFilter;

/// Replays log files written by the logging service.
#[derive(Parser)]
#[command(name = "logreader")]
struct Cli {
    /// Log files, read in order.
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Comma-separated log types to print, e.g. `debug,error` or `!bitcoin_msg`.
    #[arg(long, default_value = "all")]
    mask: LogMask,

    /// Also dump traced bitcoin payloads as hex.
    #[arg(long)]
    hex: bool,

    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if cli.verbose { Level::DEBUG } else { Level::WARN };
        EnvFilter::new(format!("connector_client={level},logreader={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    for path in &cli.files {
        debug!(path = %path.display(), mask = ?cli.mask, "replaying");

        let mut printed = 0usize;
        for entry in LogReader::open(path)?.with_mask(cli.mask).lenient(true) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.is_fatal() => {
                    warn!(path = %path.display(), error = %e, "log ends with a partial record");
                    break;
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping malformed record");
                    continue;
                }
            };

            println!("{entry}");
            printed += 1;

            if cli.hex {
                if let LogRecord::MessageTrace(trace) = &entry.record {
                    match parse_frame(&trace.raw) {
                        Ok((_, payload)) => println!("    {}", hex::encode(payload)),
                        Err(_) => println!("    {}", hex::encode(&trace.raw)),
                    }
                }
            }
        }

        debug!(path = %path.display(), printed, "done");
    }

    Ok(())
}
