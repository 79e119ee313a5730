//! Line-oriented console for the `arduino-relay` binary.
//!
//! Relay events are printed on stdout as one JSON object per line, stamped
//! with the local receive time. Input lines starting with `/` drive the
//! relay; everything else is sent to the device as a command.

use crate::error::RelayResult;
use crate::events::RelayEvent;
use crate::service::RelayHandle;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::io::BufRead;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub const HELP: &str = "\
/mode <serial|websocket|none>  switch connection mode
/connect | /disconnect         (re)open or close the device link
/interface <name>              select the serial interface
/url <ws://host:port>          set the device URL
/server on|off                 enable or disable the relay server
/port <n>                      set the relay server port
/ports                         list attached Arduino boards
/status                        print the relay state
/quit                          exit
anything else                  sent to the device";

/// One parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Mode(String),
    Connect,
    Disconnect,
    Interface(String),
    Url(String),
    Server(bool),
    Port(u16),
    Ports,
    Status,
    Help,
    Quit,
    Send(String),
    /// A known command with unusable arguments
    Invalid(String),
}

impl ConsoleCommand {
    /// Parse a line. Blank lines yield `None`.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return None;
        }

        let Some(rest) = line.trim_start().strip_prefix('/') else {
            return Some(Self::Send(line.to_string()));
        };
        let (word, arg) = match rest.split_once(char::is_whitespace) {
            Some((word, arg)) => (word, arg.trim()),
            None => (rest, ""),
        };

        let command = match (word, arg) {
            ("mode", mode) => Self::Mode(mode.to_string()),
            ("connect", _) => Self::Connect,
            ("disconnect", _) => Self::Disconnect,
            ("interface", "") => Self::Invalid("usage: /interface <name>".into()),
            ("interface", name) => Self::Interface(name.to_string()),
            ("url", "") => Self::Invalid("usage: /url <ws://host:port>".into()),
            ("url", url) => Self::Url(url.to_string()),
            ("server", "on") => Self::Server(true),
            ("server", "off") => Self::Server(false),
            ("server", _) => Self::Invalid("usage: /server on|off".into()),
            ("port", port) => match port.parse() {
                Ok(port) => Self::Port(port),
                Err(_) => Self::Invalid(format!("invalid port '{port}'")),
            },
            ("ports", _) => Self::Ports,
            ("status", _) => Self::Status,
            ("help", _) => Self::Help,
            ("quit" | "exit", _) => Self::Quit,
            _ => Self::Send(line.to_string()),
        };
        Some(command)
    }
}

/// Apply a command. Returns text to show the user, if any.
pub async fn execute(handle: &RelayHandle, command: ConsoleCommand) -> RelayResult<Option<String>> {
    match command {
        ConsoleCommand::Mode(mode) => handle.set_connection_mode(mode).await?,
        ConsoleCommand::Connect => handle.connect().await?,
        ConsoleCommand::Disconnect => handle.disconnect().await?,
        ConsoleCommand::Interface(name) => handle.set_serial_interface(name).await?,
        ConsoleCommand::Url(url) => handle.set_remote_url(url).await?,
        ConsoleCommand::Server(enabled) => handle.set_server_enabled(enabled).await?,
        ConsoleCommand::Port(port) => handle.set_server_port(port).await?,
        ConsoleCommand::Send(text) => handle.send(text).await?,
        ConsoleCommand::Ports => {
            let ports = handle.serial_interfaces().await?;
            return Ok(Some(json!({ "ports": ports }).to_string()));
        }
        ConsoleCommand::Status => {
            let snapshot = handle.snapshot().await?;
            return Ok(Some(
                serde_json::to_string(&snapshot).unwrap_or_else(|e| e.to_string()),
            ));
        }
        ConsoleCommand::Help => return Ok(Some(HELP.to_string())),
        ConsoleCommand::Invalid(message) => return Ok(Some(message)),
        ConsoleCommand::Quit => {}
    }
    Ok(None)
}

/// Feed console lines to the relay until `/quit`, end of input, or the
/// service stops.
pub async fn run_console(handle: RelayHandle, mut lines: mpsc::Receiver<String>) {
    while let Some(line) = lines.recv().await {
        let Some(command) = ConsoleCommand::parse(&line) else {
            continue;
        };
        if command == ConsoleCommand::Quit {
            break;
        }
        match execute(&handle, command).await {
            Ok(Some(output)) => println!("{output}"),
            Ok(None) => {}
            Err(e) => {
                warn!("Console stopped: {}", e);
                break;
            }
        }
    }
    debug!("Console input closed");
}

/// Read stdin on a dedicated thread. The channel closes at end of input.
pub fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(32);
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else {
                break;
            };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// Render an event as a JSON line with a `timestamp` field.
pub fn event_line(event: &RelayEvent, at: DateTime<Utc>) -> String {
    let mut value = serde_json::to_value(event).unwrap_or(Value::Null);
    if let Value::Object(ref mut map) = value {
        map.insert("timestamp".into(), Value::String(at.to_rfc3339()));
    }
    value.to_string()
}

/// Print every relay event until the channel closes.
pub fn spawn_event_printer(mut events: broadcast::Receiver<RelayEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => println!("{}", event_line(&event, Utc::now())),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Event printer fell behind; {} event(s) skipped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
