//! EDBG vendor sub-protocol.
//!
//! EDBG based tools tunnel AVR protocol frames through three vendor specific
//! CMSIS-DAP commands: `AVR_CMD` carries command frame fragments, `AVR_RSP`
//! polls for response fragments and `AVR_EVT` polls for asynchronous events.

pub mod avr8;
pub mod discovery;
pub mod housekeeping;
pub mod interface;

use crate::error::DeviceFailure;

pub use avr8::EdbgAvr8Interface;
pub use interface::EdbgInterface;

/// CMSIS-DAP vendor command carrying an AVR command frame fragment.
pub const AVR_CMD: u8 = 0x80;
/// CMSIS-DAP vendor command polling for AVR response fragments.
pub const AVR_RSP: u8 = 0x81;
/// CMSIS-DAP vendor command polling for AVR events.
pub const AVR_EVT: u8 = 0x82;

/// Start of frame marker.
pub const SOF: u8 = 0x0E;
pub const PROTOCOL_VERSION: u8 = 0x00;

/// Generic failure response id, shared by every handler.
pub const RESPONSE_FAILED: u8 = 0xA0;

/// Sub-protocol a frame is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ProtocolHandler {
    Discovery = 0x00,
    Housekeeping = 0x01,
    AvrIsp = 0x11,
    Avr8Generic = 0x12,
    Avr32Generic = 0x13,
    EdbgControl = 0x20,
}

impl ProtocolHandler {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Discovery => "Discovery",
            Self::Housekeeping => "Housekeeping",
            Self::AvrIsp => "AVRISP",
            Self::Avr8Generic => "AVR8 Generic",
            Self::Avr32Generic => "AVR32 Generic",
            Self::EdbgControl => "EDBG Control",
        }
    }
}

/// AVR command frame: `SOF, version, sequence id (LE), handler id, payload`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvrCommandFrame {
    pub sequence_id: u16,
    pub handler: ProtocolHandler,
    pub payload: Vec<u8>,
}

impl AvrCommandFrame {
    pub const fn new(handler: ProtocolHandler, sequence_id: u16, payload: Vec<u8>) -> Self {
        Self {
            sequence_id,
            handler,
            payload,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let [seq_lo, seq_hi] = self.sequence_id.to_le_bytes();
        let mut bytes = Vec::with_capacity(5 + self.payload.len());
        bytes.extend_from_slice(&[SOF, PROTOCOL_VERSION, seq_lo, seq_hi, self.handler as u8]);
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    /// Split the encoded frame into `AVR_CMD` payloads no larger than `max_fragment_size` bytes of frame data.
    ///
    /// Each payload is `fragment info, size (BE u16), data`, where the info
    /// byte holds the 1-based fragment number in the high nibble and the
    /// fragment count in the low nibble.
    pub fn to_fragments(&self, max_fragment_size: usize) -> Result<Vec<Vec<u8>>, DeviceFailure> {
        let bytes = self.to_bytes();
        let chunk_size = max_fragment_size.max(1);
        let total = bytes.len().div_ceil(chunk_size);
        if total > 0x0F {
            return Err(DeviceFailure::Transport(format!(
                "command frame of {} bytes needs {total} fragments",
                bytes.len()
            )));
        }

        Ok(bytes
            .chunks(chunk_size)
            .enumerate()
            .map(|(index, chunk)| {
                // Both values are bounded by the checks above.
                let info = (((index + 1) as u8) << 4) | total as u8;
                let [size_hi, size_lo] = (chunk.len() as u16).to_be_bytes();
                let mut fragment = Vec::with_capacity(chunk.len() + 3);
                fragment.extend_from_slice(&[info, size_hi, size_lo]);
                fragment.extend_from_slice(chunk);
                fragment
            })
            .collect())
    }
}

/// AVR response frame: `SOF, sequence id (LE), handler id, payload`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvrResponseFrame {
    pub sequence_id: u16,
    pub handler_id: u8,
    pub payload: Vec<u8>,
}

impl AvrResponseFrame {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DeviceFailure> {
        if bytes.len() < 5 {
            return Err(DeviceFailure::MalformedResponse(format!(
                "AVR response frame too short ({} bytes)",
                bytes.len()
            )));
        }

        if bytes[0] != SOF {
            return Err(DeviceFailure::MalformedResponse(format!(
                "invalid start of frame 0x{:02x}",
                bytes[0]
            )));
        }

        Ok(Self {
            sequence_id: u16::from_le_bytes([bytes[1], bytes[2]]),
            handler_id: bytes[3],
            payload: bytes[4..].to_vec(),
        })
    }

    /// First payload byte, identifying the kind of response.
    pub fn response_id(&self) -> u8 {
        self.payload.first().copied().unwrap_or(RESPONSE_FAILED)
    }

    pub fn is_failure(&self) -> bool {
        self.response_id() == RESPONSE_FAILED
    }

    /// Error code carried by a `FAILED` response.
    pub fn error_code(&self) -> u8 {
        self.payload.get(2).or_else(|| self.payload.get(1)).copied().unwrap_or(0)
    }
}

/// Known AVR event ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvrEventKind {
    Break,
    Other(u8),
}

impl From<u8> for AvrEventKind {
    fn from(id: u8) -> Self {
        match id {
            0x40 => Self::Break,
            other => Self::Other(other),
        }
    }
}

/// Asynchronous event pushed by the tool through `AVR_EVT`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvrEvent {
    data: Vec<u8>,
}

impl AvrEvent {
    /// Decode from the data of an `AVR_EVT` response (identifier byte excluded).
    ///
    /// Layout: size (BE u16), five ignored bytes (SOF, version, sequence id,
    /// handler id), then `size` bytes of event data.
    pub fn from_response_data(data: &[u8]) -> Result<Self, DeviceFailure> {
        if data.len() < 2 {
            return Err(DeviceFailure::MalformedResponse(
                "AVR_EVT response carried no size".to_string(),
            ));
        }

        let size = usize::from(u16::from_be_bytes([data[0], data[1]]));
        if size == 0 {
            return Ok(Self { data: Vec::new() });
        }

        let event_data = data.get(7..7 + size).ok_or_else(|| {
            DeviceFailure::MalformedResponse(format!(
                "AVR_EVT response declares {size} bytes of event data but carries {}",
                data.len().saturating_sub(7)
            ))
        })?;

        Ok(Self {
            data: event_data.to_vec(),
        })
    }

    /// Encode as `AVR_EVT` response data. Used by tests and the simulator.
    pub fn to_response_data(&self, handler: ProtocolHandler) -> Vec<u8> {
        let [size_hi, size_lo] = u16::try_from(self.data.len()).unwrap_or(u16::MAX).to_be_bytes();
        let mut bytes = vec![size_hi, size_lo, SOF, PROTOCOL_VERSION, 0x00, 0x00, handler as u8];
        bytes.extend_from_slice(&self.data);
        bytes
    }

    pub const fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn kind(&self) -> Option<AvrEventKind> {
        self.data.first().map(|id| AvrEventKind::from(*id))
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_frame_layout() {
        let frame = AvrCommandFrame::new(ProtocolHandler::Housekeeping, 0x0102, vec![0x10, 0x00]);

        assert_eq!(frame.to_bytes(), vec![0x0E, 0x00, 0x02, 0x01, 0x01, 0x10, 0x00]);
    }

    #[test]
    fn test_frame_fragmentation() {
        let frame = AvrCommandFrame::new(ProtocolHandler::Avr8Generic, 1, vec![0xAA; 10]);
        let fragments = frame.to_fragments(8).unwrap();

        assert_eq!(fragments.len(), 2);
        assert_eq!(&fragments[0][..3], &[0x12, 0x00, 0x08]);
        assert_eq!(&fragments[1][..3], &[0x22, 0x00, 0x07]);
        assert_eq!(fragments[0].len() + fragments[1].len() - 6, 15);
    }

    #[test]
    fn test_response_frame_decoding() {
        let frame = AvrResponseFrame::from_bytes(&[0x0E, 0x05, 0x00, 0x12, 0xA0, 0x00, 0x32]).unwrap();

        assert_eq!(frame.sequence_id, 5);
        assert_eq!(frame.handler_id, 0x12);
        assert!(frame.is_failure());
        assert_eq!(frame.error_code(), 0x32);

        assert!(AvrResponseFrame::from_bytes(&[0x0F, 0x00, 0x00, 0x12, 0x80]).is_err());
    }

    #[test]
    fn test_event_decoding() {
        let data = [0x00, 0x06, 0x0E, 0x00, 0x00, 0x00, 0x12, 0x40, 0x10, 0x00, 0x00, 0x00, 0x01];
        let event = AvrEvent::from_response_data(&data).unwrap();

        assert_eq!(event.kind(), Some(AvrEventKind::Break));
        assert_eq!(event.data(), &[0x40, 0x10, 0x00, 0x00, 0x00, 0x01]);
    }

    #[test]
    fn test_empty_and_truncated_events() {
        assert!(AvrEvent::from_response_data(&[0x00, 0x00]).unwrap().is_empty());
        assert!(AvrEvent::from_response_data(&[0x00, 0x09, 0x0E, 0x00]).is_err());
        assert!(AvrEvent::from_response_data(&[0x00]).is_err());
    }
}
