use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use pairwire_frame::Message;
use serde::Serialize;
use serde_json::Value;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct MessageOutput<'a> {
    session: Option<u64>,
    peer: &'a str,
    kind: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    label: Option<&'a str>,
    body: &'a Value,
    timestamp: String,
}

/// Print one received message. `session` is `None` on the connecting side.
pub fn print_message(message: &Message, session: Option<u64>, peer: &str, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = MessageOutput {
                session,
                peer,
                kind: message.kind(),
                label: message.label(),
                body: message.body(),
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["SESSION", "PEER", "KIND", "LABEL", "BODY"])
                .add_row(vec![
                    session.map_or_else(|| "-".to_string(), |id| id.to_string()),
                    peer.to_string(),
                    message.kind().to_string(),
                    message.label().unwrap_or("-").to_string(),
                    message.body().to_string(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let session = session.map_or_else(|| "-".to_string(), |id| id.to_string());
            match message.label() {
                Some(label) => println!(
                    "session={session} peer={peer} label={label} body={}",
                    message.body()
                ),
                None => println!("session={session} peer={peer} value={}", message.body()),
            }
        }
        OutputFormat::Raw => {
            let mut out = std::io::stdout();
            let _ = writeln!(out, "{}", message.body());
            let _ = out.flush();
        }
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
