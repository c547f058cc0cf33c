use super::{parse_hex_u32, split_at_byte, CommandPacket, Outcome, ParsedCommand};
use crate::avr::{register_size, RegisterMap, REGISTER_COUNT};
use crate::packet::{PacketError, ResponsePacket};
use crate::session::DebugSession;
use kestrel_core::controller::ConsoleError;
use kestrel_core::target::TargetRegister;
use kestrel_core::TargetControllerConsole;

fn parse_register_number(field: &[u8]) -> Result<usize, PacketError> {
    let number = parse_hex_u32(field, "register number")? as usize;
    if number >= REGISTER_COUNT {
        return Err(PacketError::malformed("register number"));
    }
    Ok(number)
}

fn decode_hex(field: &[u8], name: &'static str) -> Result<Vec<u8>, PacketError> {
    hex::decode(field).map_err(|_| PacketError::malformed(name))
}

/// `g`
#[derive(Debug)]
pub struct ReadRegisters;

pub fn parse_read_all(_data: &[u8]) -> Result<ParsedCommand, PacketError> {
    Ok(Box::new(ReadRegisters))
}

impl CommandPacket for ReadRegisters {
    fn handle(
        &self,
        session: &DebugSession,
        console: &TargetControllerConsole,
    ) -> Result<Outcome, ConsoleError> {
        let registers = console.read_registers(session.registers.descriptors().to_vec())?;
        let bytes: Vec<u8> = registers
            .iter()
            .enumerate()
            .flat_map(|(number, register)| RegisterMap::encode(number, register))
            .collect();
        Ok(Outcome::Reply(ResponsePacket::hex(&bytes)))
    }
}

/// `G<hex>`: every register, in client order.
#[derive(Debug)]
pub struct WriteRegisters {
    values: Vec<Vec<u8>>,
}

pub fn parse_write_all(data: &[u8]) -> Result<ParsedCommand, PacketError> {
    let bytes = decode_hex(&data[1..], "register values")?;

    let mut values = Vec::with_capacity(REGISTER_COUNT);
    let mut remaining = bytes.as_slice();
    for number in 0..REGISTER_COUNT {
        let size = register_size(number);
        if remaining.len() < size {
            return Err(PacketError::malformed("register values"));
        }
        let (value, rest) = remaining.split_at(size);
        values.push(value.to_vec());
        remaining = rest;
    }
    if !remaining.is_empty() {
        return Err(PacketError::malformed("register values"));
    }

    Ok(Box::new(WriteRegisters { values }))
}

impl CommandPacket for WriteRegisters {
    fn handle(
        &self,
        session: &DebugSession,
        console: &TargetControllerConsole,
    ) -> Result<Outcome, ConsoleError> {
        let registers = self
            .values
            .iter()
            .enumerate()
            .map(|(number, value)| session.registers.decode(number, value))
            .collect::<Result<Vec<TargetRegister>, PacketError>>();

        match registers {
            Ok(registers) => {
                console.write_registers(registers)?;
                Ok(Outcome::Reply(ResponsePacket::ok()))
            }
            Err(_) => Ok(Outcome::Reply(ResponsePacket::error())),
        }
    }
}

/// `p<n>`
#[derive(Debug)]
pub struct ReadRegister {
    number: usize,
}

pub fn parse_read(data: &[u8]) -> Result<ParsedCommand, PacketError> {
    Ok(Box::new(ReadRegister {
        number: parse_register_number(&data[1..])?,
    }))
}

impl CommandPacket for ReadRegister {
    fn handle(
        &self,
        session: &DebugSession,
        console: &TargetControllerConsole,
    ) -> Result<Outcome, ConsoleError> {
        let Some(descriptor) = session.registers.descriptor(self.number) else {
            return Ok(Outcome::Reply(ResponsePacket::error()));
        };

        let registers = console.read_registers(vec![descriptor.clone()])?;
        let Some(register) = registers.first() else {
            return Ok(Outcome::Reply(ResponsePacket::error()));
        };
        Ok(Outcome::Reply(ResponsePacket::hex(&RegisterMap::encode(
            self.number,
            register,
        ))))
    }
}

/// `P<n>=<hex>`
#[derive(Debug)]
pub struct WriteRegister {
    number: usize,
    value: Vec<u8>,
}

pub fn parse_write(data: &[u8]) -> Result<ParsedCommand, PacketError> {
    let (number, value) =
        split_at_byte(&data[1..], b'=').ok_or_else(|| PacketError::malformed("register write"))?;
    let number = parse_register_number(number)?;
    let value = decode_hex(value, "register value")?;
    if value.len() != register_size(number) {
        return Err(PacketError::malformed("register value"));
    }
    Ok(Box::new(WriteRegister { number, value }))
}

impl CommandPacket for WriteRegister {
    fn handle(
        &self,
        session: &DebugSession,
        console: &TargetControllerConsole,
    ) -> Result<Outcome, ConsoleError> {
        let Ok(register) = session.registers.decode(self.number, &self.value) else {
            return Ok(Outcome::Reply(ResponsePacket::error()));
        };
        console.write_registers(vec![register])?;
        Ok(Outcome::Reply(ResponsePacket::ok()))
    }
}
