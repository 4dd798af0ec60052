use std::fs;
use std::time::{Duration, Instant};

use pairwire_frame::Message;
use pairwire_peer::{connect, Connection, PeerError};
use serde_json::Value;

use crate::cmd::{parse_duration, SendArgs};
use crate::exit::{peer_error, CliError, CliResult, DATA_INVALID, SUCCESS, USAGE};
use crate::output::{print_message, OutputFormat};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let wait_timeout = parse_duration(&args.wait_timeout)?;
    let payload = resolve_payload(&args)?;
    let message = match &args.label {
        Some(label) => Message::routed(label.clone(), payload),
        None => Message::value(payload),
    };

    let conn = connect(&args.endpoint).map_err(|err| peer_error("connect failed", err))?;
    conn.send(message)
        .map_err(|err| peer_error("send failed", err))?;

    let reply = if args.wait {
        conn.take_timeout(wait_timeout).map(Some)
    } else {
        Ok(None)
    };
    close(&conn, wait_timeout);

    if let Some(reply) = reply.map_err(|err| peer_error("receive failed", err))? {
        print_message(&reply, None, conn.peer(), format);
    }
    Ok(SUCCESS)
}

fn resolve_payload(args: &SendArgs) -> CliResult<Value> {
    if let Some(json) = &args.json {
        return serde_json::from_str(json)
            .map_err(|err| CliError::new(USAGE, format!("--json is not valid JSON: {err}")));
    }
    if let Some(data) = &args.data {
        return Ok(Value::String(data.clone()));
    }
    if let Some(path) = &args.file {
        let text = fs::read_to_string(path).map_err(|err| {
            crate::exit::io_error(&format!("failed reading {}", path.display()), err)
        })?;
        return serde_json::from_str(&text).map_err(|err| {
            CliError::new(
                DATA_INVALID,
                format!("{} is not valid JSON: {err}", path.display()),
            )
        });
    }
    Ok(Value::Null)
}

/// Send the disconnect notice and wait (bounded) for the peer's
/// acknowledgement. Late messages are discarded.
fn close(conn: &Connection, timeout: Duration) {
    if let Err(err) = conn.disconnect() {
        tracing::debug!(error = %err, "disconnect notice not sent");
        conn.interrupt();
        conn.wait();
        return;
    }

    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match conn.take_timeout(remaining) {
            Ok(message) => tracing::debug!(kind = message.kind(), "discarding late message"),
            Err(PeerError::Cancelled) => break,
            Err(err) => {
                tracing::warn!(error = %err, "peer did not acknowledge disconnect");
                conn.interrupt();
                break;
            }
        }
    }
    conn.wait();
}
