//! Command packets.
//!
//! Each packet type lives in its own module with a parser and a handler. The
//! server looks the packet name up in [`COMMANDS`], parses the packet into a
//! [`CommandPacket`] and hands it the session and the controller console.

mod breakpoints;
mod execution;
mod lifecycle;
mod memory;
mod monitor;
mod query;
mod registers;

use crate::packet::{PacketError, ResponsePacket};
use crate::session::DebugSession;
use kestrel_core::controller::ConsoleError;
use kestrel_core::TargetControllerConsole;
use std::fmt;

/// What the server does once a command has been handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Reply(ResponsePacket),
    /// The target is running; reply once it stops.
    AwaitStop,
    /// Acknowledge, then end the session.
    Detach,
    /// End the session without a reply.
    Kill,
}

pub trait CommandPacket: fmt::Debug {
    fn handle(
        &self,
        session: &DebugSession,
        console: &TargetControllerConsole,
    ) -> Result<Outcome, ConsoleError>;
}

pub type ParsedCommand = Box<dyn CommandPacket>;

type Parser = fn(&[u8]) -> Result<ParsedCommand, PacketError>;

/// Packet name to parser.
const COMMANDS: &[(&str, Parser)] = &[
    ("?", query::parse_stop_reason),
    ("qSupported", query::parse_supported),
    ("qAttached", query::parse_attached),
    ("qC", query::parse_current_thread),
    ("H", query::parse_set_thread),
    ("qRcmd", monitor::parse),
    ("g", registers::parse_read_all),
    ("G", registers::parse_write_all),
    ("p", registers::parse_read),
    ("P", registers::parse_write),
    ("m", memory::parse_read),
    ("M", memory::parse_write_hex),
    ("X", memory::parse_write_binary),
    ("c", execution::parse_continue),
    ("s", execution::parse_step),
    ("Z", breakpoints::parse_insert),
    ("z", breakpoints::parse_remove),
    ("D", lifecycle::parse_detach),
    ("k", lifecycle::parse_kill),
];

/// Name of a packet: everything up to `:` or `,` for queries, else the first byte.
fn packet_name(data: &[u8]) -> &[u8] {
    match data.first() {
        Some(b'q' | b'Q') => {
            let end = data
                .iter()
                .position(|byte| matches!(byte, b':' | b','))
                .unwrap_or(data.len());
            &data[..end]
        }
        Some(_) => &data[..1],
        None => data,
    }
}

/// Parse a packet. `Ok(None)` means the packet is not supported.
pub fn parse(data: &[u8]) -> Result<Option<ParsedCommand>, PacketError> {
    let name = packet_name(data);
    COMMANDS
        .iter()
        .find(|(command, _)| command.as_bytes() == name)
        .map(|(_, parser)| parser(data))
        .transpose()
}

pub(crate) fn parse_hex_u32(field: &[u8], name: &'static str) -> Result<u32, PacketError> {
    std::str::from_utf8(field)
        .ok()
        .and_then(|text| u32::from_str_radix(text, 16).ok())
        .ok_or_else(|| PacketError::malformed(name))
}

pub(crate) fn split_at_byte(data: &[u8], separator: u8) -> Option<(&[u8], &[u8])> {
    let position = data.iter().position(|byte| *byte == separator)?;
    Some((&data[..position], &data[position + 1..]))
}

/// `addr,len` as used by the memory packets.
pub(crate) fn parse_address_and_length(data: &[u8]) -> Result<(u32, u32), PacketError> {
    let (address, length) =
        split_at_byte(data, b',').ok_or_else(|| PacketError::malformed("address and length"))?;
    Ok((
        parse_hex_u32(address, "address")?,
        parse_hex_u32(length, "length")?,
    ))
}
