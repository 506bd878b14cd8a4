//! Command-line entry point: argument parsing, logging setup, and the
//! call into [`c4::Server::run`].
//!
//! Argument parsing is hand-rolled rather than built on a framework,
//! mirroring the original `InputShell`'s deliberately small surface:
//! at most the two `-p <port>` / `-c <max_clients>` flags, each
//! requiring a digit-only value, anything else prints help and exits
//! non-zero.

use std::env;
use std::fs;
use std::process::ExitCode;

use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

use c4::{Server, ServerConfig};

const PORT_ARG: &str = "-p";
const MAX_CLIENTS_ARG: &str = "-c";

/// Parsed command-line arguments, or a reason parsing failed.
struct CliArgs {
    port: u16,
    max_clients: usize,
}

enum ParseError {
    /// Malformed flag, value, or argument count — help text follows.
    Usage,
}

/// Parses `argv[1..]` into a [`CliArgs`], applying the original
/// `InputShell` constraints: zero or two `-flag value` pairs, in any
/// order, each value digit-only.
fn parse_args(argv: &[String]) -> Result<CliArgs, ParseError> {
    let mut port: u16 = ServerConfig::default().port;
    let mut max_clients: usize = ServerConfig::default().max_clients;

    if argv.len() > 4 || argv.len() % 2 != 0 {
        return Err(ParseError::Usage);
    }

    let mut i = 0;
    while i < argv.len() {
        let flag = argv[i].as_str();
        let Some(value) = argv.get(i + 1) else {
            return Err(ParseError::Usage);
        };
        match flag {
            PORT_ARG => {
                let parsed = parse_digits(value).ok_or(ParseError::Usage)?;
                if parsed > u16::MAX as u32 {
                    return Err(ParseError::Usage);
                }
                port = parsed as u16;
            }
            MAX_CLIENTS_ARG => {
                max_clients = parse_digits(value).ok_or(ParseError::Usage)? as usize;
            }
            _ => return Err(ParseError::Usage),
        }
        i += 2;
    }

    Ok(CliArgs { port, max_clients })
}

/// Parses a digit-only decimal string, rejecting anything with a sign,
/// whitespace, or non-digit character (the original's `getNum`).
fn parse_digits(value: &str) -> Option<u32> {
    if value.is_empty() || !value.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}

fn print_usage() {
    let defaults = ServerConfig::default();
    println!("{PORT_ARG} <port>          Port on which the server will be running.");
    println!("   Default value is {}.", defaults.port);
    println!("{MAX_CLIENTS_ARG} <max_clients>  Maximum number of clients connected at a time.");
    println!("   Default value is {}.", defaults.max_clients);
}

/// Sets up dual logging (stdout plus a timestamped file under `./log/`),
/// matching the original `Logger`'s two destinations minus the
/// terminal color codes, which `tracing-subscriber`'s ANSI formatting
/// already covers.
fn init_logging() -> tracing_appender::non_blocking::WorkerGuard {
    fs::create_dir_all("log").expect("failed to create log directory");
    let now = chrono::Local::now().format("%d-%m-%Y_%H-%M-%S");
    let file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(format!("log/{now}.txt"))
        .expect("failed to open log file");
    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stdout.and(non_blocking))
        .init();

    guard
}

#[tokio::main]
async fn main() -> ExitCode {
    let argv: Vec<String> = env::args().skip(1).collect();
    let args = match parse_args(&argv) {
        Ok(args) => args,
        Err(ParseError::Usage) => {
            print_usage();
            return ExitCode::FAILURE;
        }
    };

    let _log_guard = init_logging();

    let config = ServerConfig { port: args.port, max_clients: args.max_clients };
    let server = Server::new(config);
    if let Err(err) = server.run().await {
        tracing::error!(error = %err, "server exited with an error");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
