use super::{parse_address_and_length, split_at_byte, CommandPacket, Outcome, ParsedCommand};
use crate::avr::translate_address;
use crate::packet::{PacketError, ResponsePacket};
use crate::session::DebugSession;
use kestrel_core::controller::ConsoleError;
use kestrel_core::TargetControllerConsole;
use log::debug;

/// `m<addr>,<len>`
#[derive(Debug)]
pub struct ReadMemory {
    address: u32,
    length: u32,
}

pub fn parse_read(data: &[u8]) -> Result<ParsedCommand, PacketError> {
    let (address, length) = parse_address_and_length(&data[1..])?;
    Ok(Box::new(ReadMemory { address, length }))
}

impl CommandPacket for ReadMemory {
    fn handle(&self, _: &DebugSession, console: &TargetControllerConsole) -> Result<Outcome, ConsoleError> {
        if self.length == 0 {
            return Ok(Outcome::Reply(ResponsePacket::hex(&[])));
        }

        let (memory_type, start_address) = translate_address(self.address);
        let bytes = console.read_memory(memory_type, start_address, self.length, Vec::new())?;
        Ok(Outcome::Reply(ResponsePacket::hex(&bytes)))
    }
}

/// `M<addr>,<len>:<hex>` and `X<addr>,<len>:<binary>`
#[derive(Debug)]
pub struct WriteMemory {
    address: u32,
    buffer: Vec<u8>,
}

fn parse_write(
    data: &[u8],
    decode: impl Fn(&[u8]) -> Result<Vec<u8>, PacketError>,
) -> Result<ParsedCommand, PacketError> {
    let (header, payload) =
        split_at_byte(&data[1..], b':').ok_or_else(|| PacketError::malformed("memory write"))?;
    let (address, length) = parse_address_and_length(header)?;
    let buffer = decode(payload)?;

    if buffer.len() != length as usize {
        return Err(PacketError::malformed("memory write length"));
    }
    Ok(Box::new(WriteMemory { address, buffer }))
}

pub fn parse_write_hex(data: &[u8]) -> Result<ParsedCommand, PacketError> {
    parse_write(data, |payload| {
        hex::decode(payload).map_err(|_| PacketError::malformed("memory write data"))
    })
}

/// The connection has already removed `}` escapes from the payload.
pub fn parse_write_binary(data: &[u8]) -> Result<ParsedCommand, PacketError> {
    parse_write(data, |payload| Ok(payload.to_vec()))
}

impl CommandPacket for WriteMemory {
    fn handle(&self, _: &DebugSession, console: &TargetControllerConsole) -> Result<Outcome, ConsoleError> {
        if self.buffer.is_empty() {
            // A zero length X packet probes for binary write support.
            return Ok(Outcome::Reply(ResponsePacket::ok()));
        }

        let (memory_type, start_address) = translate_address(self.address);
        debug!(
            "Writing {} bytes of {memory_type:?} at 0x{start_address:x}",
            self.buffer.len()
        );
        console.write_memory(memory_type, start_address, self.buffer.clone())?;
        Ok(Outcome::Reply(ResponsePacket::ok()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_length_must_match() {
        assert!(parse_write_hex(b"M1000,4:AABBCCDD").is_ok());
        assert!(parse_write_hex(b"M1000,4:AABBCC").is_err());
        assert!(parse_write_hex(b"M1000,4:GGBBCCDD").is_err());
        assert!(parse_write_hex(b"M1000,4").is_err());
    }

    #[test]
    fn test_binary_write_keeps_raw_bytes() {
        let command = parse_write_binary(b"X800100,3:\x00#}").unwrap();
        assert!(format!("{command:?}").contains("[0, 35, 125]"));
        assert!(parse_write_binary(b"X800100,0:").is_ok());
    }
}
