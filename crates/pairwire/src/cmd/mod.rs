use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Subcommand};
use pairwire_peer::{Listener, ListenerConfig};
use pairwire_transport::Endpoint;

use crate::exit::{peer_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod echo;
pub mod listen;
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start an echo server.
    Echo(EchoArgs),
    /// Send a single message.
    Send(SendArgs),
    /// Listen and print received messages.
    Listen(ListenArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Echo(args) => echo::run(args, format),
        Command::Send(args) => send::run(args, format),
        Command::Listen(args) => listen::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct EchoArgs {
    /// Endpoint to bind (tcp://host:port, host:port or unix:/path).
    pub endpoint: Endpoint,
    /// Only echo routed messages with these labels (comma-separated).
    /// Default: echo every message.
    #[arg(long = "label", value_delimiter = ',')]
    pub labels: Option<Vec<String>>,
    /// Close sessions idle for this long (e.g. 30s, 500ms).
    #[arg(long, default_value = "30s")]
    pub session_timeout: String,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Endpoint to connect to.
    pub endpoint: Endpoint,
    /// Route label. Without one, the payload is sent as a plain value.
    #[arg(long, short = 'l')]
    pub label: Option<String>,
    /// JSON payload.
    #[arg(long, conflicts_with_all = ["data", "file"])]
    pub json: Option<String>,
    /// String payload.
    #[arg(long, conflicts_with_all = ["json", "file"])]
    pub data: Option<String>,
    /// Read a JSON payload from file.
    #[arg(long, conflicts_with_all = ["json", "data"])]
    pub file: Option<PathBuf>,
    /// Wait for one reply and print it.
    #[arg(long)]
    pub wait: bool,
    /// Maximum time to wait for the reply when --wait is set (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub wait_timeout: String,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Endpoint to bind.
    pub endpoint: Endpoint,
    /// Exit after receiving N messages.
    #[arg(long)]
    pub count: Option<usize>,
    /// Close sessions idle for this long (e.g. 30s, 500ms).
    #[arg(long, default_value = "30s")]
    pub session_timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

/// Bind a listener and stop it on Ctrl-C.
pub(crate) fn bind_listener(endpoint: &Endpoint, session_timeout: &str) -> CliResult<Arc<Listener>> {
    let config = ListenerConfig::default()
        .with_session_read_timeout(Some(parse_duration(session_timeout)?));
    let listener = Arc::new(
        Listener::bind_with_config(endpoint, config)
            .map_err(|err| peer_error("bind failed", err))?,
    );

    let on_signal = Arc::clone(&listener);
    ctrlc::set_handler(move || on_signal.stop()).map_err(|err| {
        CliError::new(
            crate::exit::INTERNAL,
            format!("signal handler setup failed: {err}"),
        )
    })?;
    Ok(listener)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
        assert!(parse_duration("").is_err());
    }
}
