//! Remote Serial Protocol framing.
//!
//! Packets travel as `$<payload>#<checksum>`, where the checksum is the sum of
//! the (escaped) payload bytes modulo 256 written as two lowercase hex digits.
//! Within a payload, `}` escapes the following byte, which is then XORed with
//! 0x20.

use thiserror::Error;

/// Largest payload we accept from, and advertise to, the client.
pub const MAX_PACKET_SIZE: usize = 0x1000;

pub const PACKET_START: u8 = b'$';
pub const PACKET_END: u8 = b'#';
pub const ESCAPE: u8 = b'}';
pub const INTERRUPT: u8 = 0x03;
pub const ACK: u8 = b'+';
pub const NAK: u8 = b'-';

const ESCAPE_XOR: u8 = 0x20;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    #[error("packet framing error: {0}")]
    Framing(String),

    #[error("checksum mismatch: expected {expected:02x}, computed {computed:02x}")]
    Checksum { expected: u8, computed: u8 },

    #[error("malformed {field} in packet")]
    Malformed { field: &'static str },
}

impl PacketError {
    pub const fn malformed(field: &'static str) -> Self {
        Self::Malformed { field }
    }
}

pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |sum, byte| sum.wrapping_add(*byte))
}

const fn needs_escape(byte: u8) -> bool {
    matches!(byte, b'$' | b'#' | b'}' | b'*')
}

/// Frame a payload for the wire, escaping reserved bytes.
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let mut escaped = Vec::with_capacity(payload.len());
    for &byte in payload {
        if needs_escape(byte) {
            escaped.push(ESCAPE);
            escaped.push(byte ^ ESCAPE_XOR);
        } else {
            escaped.push(byte);
        }
    }

    let mut frame = Vec::with_capacity(escaped.len() + 4);
    frame.push(PACKET_START);
    frame.extend_from_slice(&escaped);
    frame.push(PACKET_END);
    frame.extend_from_slice(format!("{:02x}", checksum(&escaped)).as_bytes());
    frame
}

pub fn unescape(data: &[u8]) -> Result<Vec<u8>, PacketError> {
    let mut output = Vec::with_capacity(data.len());
    let mut bytes = data.iter();
    while let Some(&byte) = bytes.next() {
        if byte == ESCAPE {
            let escaped = bytes
                .next()
                .ok_or_else(|| PacketError::Framing("escape at end of packet".to_string()))?;
            output.push(escaped ^ ESCAPE_XOR);
        } else {
            output.push(byte);
        }
    }
    Ok(output)
}

/// One unit read off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Ack,
    Nak,
    Interrupt,
    /// A packet whose checksum verified. The payload is unescaped.
    Packet(Vec<u8>),
    /// A packet that must be negatively acknowledged.
    Rejected(PacketError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecoderState {
    AwaitingPacket,
    Payload,
    Checksum,
}

/// Incremental decoder fed one byte at a time from the socket.
#[derive(Debug)]
pub struct PacketDecoder {
    state: DecoderState,
    payload: Vec<u8>,
    checksum_digits: Vec<u8>,
}

impl Default for PacketDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketDecoder {
    pub const fn new() -> Self {
        Self {
            state: DecoderState::AwaitingPacket,
            payload: Vec::new(),
            checksum_digits: Vec::new(),
        }
    }

    pub fn push(&mut self, byte: u8) -> Option<Frame> {
        match self.state {
            DecoderState::AwaitingPacket => match byte {
                PACKET_START => {
                    self.payload.clear();
                    self.state = DecoderState::Payload;
                    None
                }
                ACK => Some(Frame::Ack),
                NAK => Some(Frame::Nak),
                INTERRUPT => Some(Frame::Interrupt),
                // Line noise between packets.
                _ => None,
            },
            DecoderState::Payload => match byte {
                PACKET_END => {
                    self.checksum_digits.clear();
                    self.state = DecoderState::Checksum;
                    None
                }
                PACKET_START => {
                    // The client gave up on the previous packet and started over.
                    self.payload.clear();
                    None
                }
                _ if self.payload.len() >= MAX_PACKET_SIZE => {
                    self.state = DecoderState::AwaitingPacket;
                    self.payload.clear();
                    Some(Frame::Rejected(PacketError::Framing(format!(
                        "packet exceeds {MAX_PACKET_SIZE} bytes"
                    ))))
                }
                _ => {
                    self.payload.push(byte);
                    None
                }
            },
            DecoderState::Checksum => {
                self.checksum_digits.push(byte);
                if self.checksum_digits.len() < 2 {
                    return None;
                }
                self.state = DecoderState::AwaitingPacket;
                Some(self.finish())
            }
        }
    }

    fn finish(&mut self) -> Frame {
        let payload = std::mem::take(&mut self.payload);
        let expected = std::str::from_utf8(&self.checksum_digits)
            .ok()
            .and_then(|digits| u8::from_str_radix(digits, 16).ok());
        let computed = checksum(&payload);

        match expected {
            None => Frame::Rejected(PacketError::Framing("invalid checksum digits".to_string())),
            Some(expected) if expected != computed => {
                Frame::Rejected(PacketError::Checksum { expected, computed })
            }
            Some(_) => match unescape(&payload) {
                Ok(payload) => Frame::Packet(payload),
                Err(e) => Frame::Rejected(e),
            },
        }
    }
}

/// Decoded reply payload, framed by the connection when sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponsePacket(Vec<u8>);

impl ResponsePacket {
    pub fn ok() -> Self {
        Self::text("OK")
    }

    /// `E01`, the only error code the client gets from us.
    pub fn error() -> Self {
        Self::text("E01")
    }

    /// The empty reply, meaning "not supported".
    pub const fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn text(text: &str) -> Self {
        Self(text.as_bytes().to_vec())
    }

    pub fn hex(bytes: &[u8]) -> Self {
        Self(hex::encode(bytes).into_bytes())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}
