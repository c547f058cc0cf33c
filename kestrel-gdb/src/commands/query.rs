//! Queries that never touch the target.

use super::{CommandPacket, Outcome, ParsedCommand};
use crate::features::supported_features_reply;
use crate::packet::{PacketError, ResponsePacket};
use crate::session::DebugSession;
use kestrel_core::controller::ConsoleError;
use kestrel_core::TargetControllerConsole;
use log::debug;

/// `?`: why the target last stopped. We only ever report SIGTRAP.
#[derive(Debug)]
pub struct StopReason;

pub fn parse_stop_reason(_data: &[u8]) -> Result<ParsedCommand, PacketError> {
    Ok(Box::new(StopReason))
}

impl CommandPacket for StopReason {
    fn handle(&self, _: &DebugSession, _: &TargetControllerConsole) -> Result<Outcome, ConsoleError> {
        Ok(Outcome::Reply(ResponsePacket::text("S05")))
    }
}

#[derive(Debug)]
pub struct Supported {
    client_features: Vec<String>,
}

pub fn parse_supported(data: &[u8]) -> Result<ParsedCommand, PacketError> {
    let client_features = data
        .iter()
        .position(|byte| *byte == b':')
        .map(|start| {
            String::from_utf8_lossy(&data[start + 1..])
                .split(';')
                .filter(|feature| !feature.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    Ok(Box::new(Supported { client_features }))
}

impl CommandPacket for Supported {
    fn handle(&self, _: &DebugSession, _: &TargetControllerConsole) -> Result<Outcome, ConsoleError> {
        debug!("Client features: {}", self.client_features.join(", "));
        Ok(Outcome::Reply(ResponsePacket::text(&supported_features_reply())))
    }
}

/// `qAttached`: we always attach to an existing process.
#[derive(Debug)]
pub struct Attached;

pub fn parse_attached(_data: &[u8]) -> Result<ParsedCommand, PacketError> {
    Ok(Box::new(Attached))
}

impl CommandPacket for Attached {
    fn handle(&self, _: &DebugSession, _: &TargetControllerConsole) -> Result<Outcome, ConsoleError> {
        Ok(Outcome::Reply(ResponsePacket::text("1")))
    }
}

#[derive(Debug)]
pub struct CurrentThread;

pub fn parse_current_thread(_data: &[u8]) -> Result<ParsedCommand, PacketError> {
    Ok(Box::new(CurrentThread))
}

impl CommandPacket for CurrentThread {
    fn handle(&self, _: &DebugSession, _: &TargetControllerConsole) -> Result<Outcome, ConsoleError> {
        Ok(Outcome::Reply(ResponsePacket::text("QC1")))
    }
}

/// `H`: there is a single thread, so any selection is accepted.
#[derive(Debug)]
pub struct SetThread;

pub fn parse_set_thread(_data: &[u8]) -> Result<ParsedCommand, PacketError> {
    Ok(Box::new(SetThread))
}

impl CommandPacket for SetThread {
    fn handle(&self, _: &DebugSession, _: &TargetControllerConsole) -> Result<Outcome, ConsoleError> {
        Ok(Outcome::Reply(ResponsePacket::ok()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_features_parsed() {
        let command = parse_supported(b"qSupported:multiprocess+;swbreak+;;xmlRegisters=i386").unwrap();
        let debug = format!("{command:?}");
        assert!(debug.contains("multiprocess+"));
        assert!(debug.contains("xmlRegisters=i386"));
    }
}
