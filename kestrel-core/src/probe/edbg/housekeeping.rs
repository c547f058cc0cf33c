//! Housekeeping protocol: session management.

use super::{EdbgInterface, ProtocolHandler, RESPONSE_FAILED};
use crate::error::DeviceFailure;

const START_SESSION: u8 = 0x10;
const END_SESSION: u8 = 0x11;

pub const RESPONSE_OK: u8 = 0x80;
pub const RESPONSE_LIST: u8 = 0x81;
pub const RESPONSE_DATA: u8 = 0x84;

pub fn start_session(edbg: &mut EdbgInterface) -> Result<(), DeviceFailure> {
    expect_ok(edbg, vec![START_SESSION, 0x00])
}

pub fn end_session(edbg: &mut EdbgInterface) -> Result<(), DeviceFailure> {
    // Trailing byte: do not reset the tool.
    expect_ok(edbg, vec![END_SESSION, 0x00, 0x00])
}

fn expect_ok(edbg: &mut EdbgInterface, payload: Vec<u8>) -> Result<(), DeviceFailure> {
    let command = payload[0];
    let response = edbg.send_frame(ProtocolHandler::Housekeeping, payload)?;

    match response.response_id() {
        RESPONSE_OK => Ok(()),
        RESPONSE_FAILED => Err(DeviceFailure::CommandFailed {
            handler: ProtocolHandler::Housekeeping.name(),
            command,
            code: response.error_code(),
        }),
        other => Err(DeviceFailure::MalformedResponse(format!(
            "unexpected housekeeping response 0x{other:02x}"
        ))),
    }
}
