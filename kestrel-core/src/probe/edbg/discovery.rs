//! Discovery protocol: tool identity queries.

use super::{EdbgInterface, ProtocolHandler, RESPONSE_FAILED};
use crate::error::DeviceFailure;

const QUERY: u8 = 0x00;

/// Response id of a successful query.
pub const RESPONSE_LIST: u8 = 0x81;

/// What a discovery query asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum QueryContext {
    CommandHandlers = 0x00,
    ToolName = 0x80,
    SerialNumber = 0x81,
    ManufactureDate = 0x82,
}

/// Run a discovery query and return the raw answer.
pub fn query(edbg: &mut EdbgInterface, context: QueryContext) -> Result<Vec<u8>, DeviceFailure> {
    let response = edbg.send_frame(ProtocolHandler::Discovery, vec![QUERY, 0x00, context as u8])?;

    match response.response_id() {
        // Payload is `response id, version, data`.
        RESPONSE_LIST => Ok(response.payload.get(2..).unwrap_or_default().to_vec()),
        RESPONSE_FAILED => Err(DeviceFailure::CommandFailed {
            handler: ProtocolHandler::Discovery.name(),
            command: QUERY,
            code: response.error_code(),
        }),
        other => Err(DeviceFailure::MalformedResponse(format!(
            "unexpected discovery response 0x{other:02x}"
        ))),
    }
}

pub fn serial_number(edbg: &mut EdbgInterface) -> Result<String, DeviceFailure> {
    let data = query(edbg, QueryContext::SerialNumber)?;
    Ok(String::from_utf8_lossy(&data).trim_end_matches('\0').to_string())
}

pub fn tool_name(edbg: &mut EdbgInterface) -> Result<String, DeviceFailure> {
    let data = query(edbg, QueryContext::ToolName)?;
    Ok(String::from_utf8_lossy(&data).trim_end_matches('\0').to_string())
}
