//! CMSIS-DAP command/response framing.

use super::transport::HidTransport;
use crate::error::DeviceFailure;
use log::trace;
use std::thread;
use std::time::{Duration, Instant};

/// Default time to wait for a single response report.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(1000);

/// A CMSIS-DAP command: one identifier byte followed by the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    id: u8,
    data: Vec<u8>,
}

impl Command {
    pub const fn new(id: u8, data: Vec<u8>) -> Self {
        Self { id, data }
    }

    pub const fn id(&self) -> u8 {
        self.id
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Encoded size: identifier plus payload.
    pub fn size(&self) -> usize {
        1 + self.data.len()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.size());
        bytes.push(self.id);
        bytes.extend_from_slice(&self.data);
        bytes
    }
}

/// A CMSIS-DAP response: one identifier byte followed by the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    id: u8,
    data: Vec<u8>,
}

impl Response {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DeviceFailure> {
        let (&id, data) = bytes
            .split_first()
            .ok_or_else(|| DeviceFailure::MalformedResponse("empty CMSIS-DAP response".to_string()))?;

        Ok(Self {
            id,
            data: data.to_vec(),
        })
    }

    pub const fn id(&self) -> u8 {
        self.id
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// Command/response exchange over a HID transport.
pub struct CmsisDapInterface {
    transport: Box<dyn HidTransport>,
    min_command_gap: Duration,
    response_timeout: Duration,
    last_command_at: Option<Instant>,
}

impl CmsisDapInterface {
    pub fn new(transport: Box<dyn HidTransport>) -> Self {
        Self {
            transport,
            min_command_gap: Duration::ZERO,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            last_command_at: None,
        }
    }

    /// Some tools misbehave when commands arrive back to back.
    pub fn set_min_command_gap(&mut self, gap: Duration) {
        self.min_command_gap = gap;
    }

    pub fn set_response_timeout(&mut self, timeout: Duration) {
        self.response_timeout = timeout;
    }

    pub fn report_size(&self) -> usize {
        self.transport.report_size()
    }

    pub fn send_command(&mut self, command: &Command) -> Result<(), DeviceFailure> {
        if command.size() > self.transport.report_size() {
            return Err(DeviceFailure::Transport(format!(
                "command of {} bytes does not fit in a {} byte report",
                command.size(),
                self.transport.report_size()
            )));
        }

        if let Some(last) = self.last_command_at {
            let elapsed = last.elapsed();
            if elapsed < self.min_command_gap {
                thread::sleep(self.min_command_gap - elapsed);
            }
        }

        trace!("CMSIS-DAP >> {:02x?}", command.to_bytes());
        self.transport.write(&command.to_bytes())?;
        self.last_command_at = Some(Instant::now());
        Ok(())
    }

    pub fn get_response(&mut self) -> Result<Response, DeviceFailure> {
        let bytes = self.transport.read(self.response_timeout)?;
        if bytes.is_empty() {
            return Err(DeviceFailure::Timeout);
        }

        trace!("CMSIS-DAP << {:02x?}", &bytes[..bytes.len().min(16)]);
        Response::from_bytes(&bytes)
    }

    pub fn send_command_and_wait_for_response(&mut self, command: &Command) -> Result<Response, DeviceFailure> {
        self.send_command(command)?;
        self.get_response()
    }
}
