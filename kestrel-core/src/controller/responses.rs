//! Responses produced by the target controller.

use super::TargetControllerState;
use crate::error::CommandError;
use crate::target::{TargetDescriptor, TargetPinState, TargetRegister, TargetState};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Ok,
    TargetControllerState(TargetControllerState),
    TargetDescriptor(Box<TargetDescriptor>),
    TargetState(TargetState),
    Registers(Vec<TargetRegister>),
    Memory(Vec<u8>),
    ProgramCounter(u32),
    StackPointer(u32),
    PinStates(BTreeMap<u16, TargetPinState>),
}

/// Outcome of one command, delivered to its issuer.
pub type CommandResult = Result<Response, CommandError>;
