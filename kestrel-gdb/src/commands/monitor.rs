//! `qRcmd,<hex>`: `monitor` commands typed at the client prompt.
//!
//! Replies are hex-encoded text that the client prints verbatim.

use super::{CommandPacket, Outcome, ParsedCommand};
use crate::packet::{PacketError, ResponsePacket};
use crate::session::DebugSession;
use kestrel_core::controller::ConsoleError;
use kestrel_core::TargetControllerConsole;
use log::{debug, info};
use serde_json::json;

const VERSION: &str = env!("CARGO_PKG_VERSION");

const HELP: &str = "\
Supported monitor commands:

  help                 Show this help text
  version              Show the Kestrel version
  version machine      Show the Kestrel version as JSON
  reset                Reset the target
";

#[derive(Debug, Clone, PartialEq, Eq)]
enum MonitorCommand {
    Help,
    Version,
    VersionMachine,
    Reset,
    Unknown(String),
}

impl MonitorCommand {
    fn from_text(text: &str) -> Self {
        match text.split_whitespace().collect::<Vec<_>>().as_slice() {
            ["help"] => Self::Help,
            ["version"] => Self::Version,
            ["version", "machine"] => Self::VersionMachine,
            ["reset"] => Self::Reset,
            _ => Self::Unknown(text.to_string()),
        }
    }
}

#[derive(Debug)]
pub struct Monitor {
    command: MonitorCommand,
}

pub fn parse(data: &[u8]) -> Result<ParsedCommand, PacketError> {
    let encoded = data
        .iter()
        .position(|byte| *byte == b',')
        .map(|start| &data[start + 1..])
        .ok_or_else(|| PacketError::malformed("monitor command"))?;
    let decoded = hex::decode(encoded).map_err(|_| PacketError::malformed("monitor command"))?;
    let text = String::from_utf8(decoded).map_err(|_| PacketError::malformed("monitor command"))?;

    Ok(Box::new(Monitor {
        command: MonitorCommand::from_text(&text),
    }))
}

fn version_machine() -> String {
    let component = |value: &str| value.parse::<u64>().unwrap_or_default();
    json!({
        "version": VERSION,
        "components": {
            "major": component(env!("CARGO_PKG_VERSION_MAJOR")),
            "minor": component(env!("CARGO_PKG_VERSION_MINOR")),
            "patch": component(env!("CARGO_PKG_VERSION_PATCH")),
        }
    })
    .to_string()
}

impl CommandPacket for Monitor {
    fn handle(&self, _: &DebugSession, console: &TargetControllerConsole) -> Result<Outcome, ConsoleError> {
        let output = match &self.command {
            MonitorCommand::Help => HELP.to_string(),
            MonitorCommand::Version => format!("Kestrel v{VERSION}\n"),
            MonitorCommand::VersionMachine => version_machine(),
            MonitorCommand::Reset => {
                info!("Resetting target on client request");
                console.reset_target()?;
                "Target reset complete\n".to_string()
            }
            MonitorCommand::Unknown(text) => {
                debug!("Unknown monitor command: {text}");
                return Ok(Outcome::Reply(ResponsePacket::empty()));
            }
        };
        Ok(Outcome::Reply(ResponsePacket::hex(output.as_bytes())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monitor_commands() {
        assert_eq!(MonitorCommand::from_text("help"), MonitorCommand::Help);
        assert_eq!(MonitorCommand::from_text(" version  machine "), MonitorCommand::VersionMachine);
        assert_eq!(
            MonitorCommand::from_text("erase"),
            MonitorCommand::Unknown("erase".to_string())
        );
    }

    #[test]
    fn test_version_machine_is_json() {
        let value: serde_json::Value = serde_json::from_str(&version_machine()).unwrap();
        assert_eq!(value["version"], VERSION);
        assert!(value["components"]["major"].is_u64());
    }

    #[test]
    fn test_hex_payload_required() {
        assert!(parse(b"qRcmd,7265736574").is_ok());
        assert!(parse(b"qRcmd,72657").is_err());
        assert!(parse(b"qRcmd").is_err());
    }
}
