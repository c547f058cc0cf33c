//! Per-connection debug session state.

use crate::avr::{MissingRegister, RegisterMap};
use kestrel_core::TargetDescriptor;

/// State held for the lifetime of one client connection.
#[derive(Debug, Clone)]
pub struct DebugSession {
    pub target: TargetDescriptor,
    pub registers: RegisterMap,
}

impl DebugSession {
    pub fn new(target: TargetDescriptor) -> Result<Self, MissingRegister> {
        let registers = RegisterMap::new(&target)?;
        Ok(Self { target, registers })
    }
}
