use super::{parse_hex_u32, CommandPacket, Outcome, ParsedCommand};
use crate::packet::{PacketError, ResponsePacket};
use crate::session::DebugSession;
use kestrel_core::controller::ConsoleError;
use kestrel_core::target::{BreakpointKind, TargetBreakpoint};
use kestrel_core::TargetControllerConsole;

/// `Z<type>,<addr>,<kind>` and `z<type>,<addr>,<kind>`. Only types 0 and 1
/// (software and hardware breakpoints) are supported; watchpoints get the
/// empty reply.
#[derive(Debug)]
pub struct Breakpoint {
    insert: bool,
    kind: Option<BreakpointKind>,
    address: u32,
}

fn parse(data: &[u8], insert: bool) -> Result<ParsedCommand, PacketError> {
    let mut fields = data[1..].split(|byte| *byte == b',');
    let (Some(kind), Some(address)) = (fields.next(), fields.next()) else {
        return Err(PacketError::malformed("breakpoint"));
    };

    let kind = match kind {
        b"0" => Some(BreakpointKind::Software),
        b"1" => Some(BreakpointKind::Hardware),
        _ => None,
    };
    Ok(Box::new(Breakpoint {
        insert,
        kind,
        address: parse_hex_u32(address, "breakpoint address")?,
    }))
}

pub fn parse_insert(data: &[u8]) -> Result<ParsedCommand, PacketError> {
    parse(data, true)
}

pub fn parse_remove(data: &[u8]) -> Result<ParsedCommand, PacketError> {
    parse(data, false)
}

impl CommandPacket for Breakpoint {
    fn handle(&self, _: &DebugSession, console: &TargetControllerConsole) -> Result<Outcome, ConsoleError> {
        let Some(kind) = self.kind else {
            return Ok(Outcome::Reply(ResponsePacket::empty()));
        };

        let breakpoint = TargetBreakpoint {
            address: self.address,
            kind,
        };
        if self.insert {
            console.set_breakpoint(breakpoint)?;
        } else {
            console.remove_breakpoint(breakpoint)?;
        }
        Ok(Outcome::Reply(ResponsePacket::ok()))
    }
}
