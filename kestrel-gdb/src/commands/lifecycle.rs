use super::{CommandPacket, Outcome, ParsedCommand};
use crate::packet::PacketError;
use crate::session::DebugSession;
use kestrel_core::controller::ConsoleError;
use kestrel_core::TargetControllerConsole;

/// `D`
#[derive(Debug)]
pub struct Detach;

pub fn parse_detach(_data: &[u8]) -> Result<ParsedCommand, PacketError> {
    Ok(Box::new(Detach))
}

impl CommandPacket for Detach {
    fn handle(&self, _: &DebugSession, _: &TargetControllerConsole) -> Result<Outcome, ConsoleError> {
        Ok(Outcome::Detach)
    }
}

/// `k`
#[derive(Debug)]
pub struct Kill;

pub fn parse_kill(_data: &[u8]) -> Result<ParsedCommand, PacketError> {
    Ok(Box::new(Kill))
}

impl CommandPacket for Kill {
    fn handle(&self, _: &DebugSession, _: &TargetControllerConsole) -> Result<Outcome, ConsoleError> {
        Ok(Outcome::Kill)
    }
}
