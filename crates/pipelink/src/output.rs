use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

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

/// A message received by a CLI command, ready for printing.
pub struct Received<'a> {
    /// Channel name the message arrived on.
    pub channel: &'a str,
    /// Which side received it: `server` or `client`.
    pub role: &'a str,
    /// 1-based client session number on a server; 1 for a client.
    pub session: u64,
    pub payload: &'a [u8],
}

#[derive(Serialize)]
struct MessageOutput<'a> {
    channel: &'a str,
    role: &'a str,
    session: u64,
    payload_size: usize,
    payload: String,
    timestamp: String,
}

pub fn print_message(message: &Received<'_>, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = MessageOutput {
                channel: message.channel,
                role: message.role,
                session: message.session,
                payload_size: message.payload.len(),
                payload: payload_preview(message.payload),
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
                .set_header(vec!["CHANNEL", "ROLE", "SESSION", "SIZE", "PAYLOAD"])
                .add_row(vec![
                    message.channel.to_string(),
                    message.role.to_string(),
                    message.session.to_string(),
                    message.payload.len().to_string(),
                    payload_preview(message.payload),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "channel={} role={} session={} size={} payload={}",
                message.channel,
                message.role,
                message.session,
                message.payload.len(),
                payload_preview(message.payload)
            );
        }
        OutputFormat::Raw => {
            print_raw(message.payload);
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_shows_text_or_binary_size() {
        assert_eq!(payload_preview(b"hello"), "hello");
        assert_eq!(payload_preview(&[0xff, 0xfe]), "<binary 2 bytes>");
    }

    #[test]
    fn json_output_shape() {
        let out = MessageOutput {
            channel: "alpha",
            role: "server",
            session: 2,
            payload_size: 2,
            payload: "hi".to_string(),
            timestamp: "0".to_string(),
        };
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["channel"], "alpha");
        assert_eq!(json["session"], 2);
        assert_eq!(json["payload_size"], 2);
    }
}
