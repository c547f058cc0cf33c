//! `c[addr]` and `s[addr]`. Both leave the server waiting for a stop.

use super::{parse_hex_u32, CommandPacket, Outcome, ParsedCommand};
use crate::packet::PacketError;
use crate::session::DebugSession;
use kestrel_core::controller::ConsoleError;
use kestrel_core::TargetControllerConsole;

fn parse_optional_address(data: &[u8]) -> Result<Option<u32>, PacketError> {
    let field = &data[1..];
    if field.is_empty() {
        return Ok(None);
    }
    parse_hex_u32(field, "resume address").map(Some)
}

#[derive(Debug)]
pub struct ContinueExecution {
    from_address: Option<u32>,
}

pub fn parse_continue(data: &[u8]) -> Result<ParsedCommand, PacketError> {
    Ok(Box::new(ContinueExecution {
        from_address: parse_optional_address(data)?,
    }))
}

impl CommandPacket for ContinueExecution {
    fn handle(&self, _: &DebugSession, console: &TargetControllerConsole) -> Result<Outcome, ConsoleError> {
        console.continue_target_execution(self.from_address)?;
        Ok(Outcome::AwaitStop)
    }
}

#[derive(Debug)]
pub struct StepExecution {
    from_address: Option<u32>,
}

pub fn parse_step(data: &[u8]) -> Result<ParsedCommand, PacketError> {
    Ok(Box::new(StepExecution {
        from_address: parse_optional_address(data)?,
    }))
}

impl CommandPacket for StepExecution {
    fn handle(&self, _: &DebugSession, console: &TargetControllerConsole) -> Result<Outcome, ConsoleError> {
        console.step_target_execution(self.from_address)?;
        Ok(Outcome::AwaitStop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resume_address() {
        assert_eq!(parse_optional_address(b"c").unwrap(), None);
        assert_eq!(parse_optional_address(b"c1a0").unwrap(), Some(0x1a0));
        assert!(parse_optional_address(b"sxyz").is_err());
    }
}
