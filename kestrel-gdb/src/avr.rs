//! How avr-gdb sees an AVR8 target: register numbers and a flat address space.

use crate::packet::PacketError;
use kestrel_core::target::{TargetRegister, TargetRegisterDescriptor, TargetRegisterKind};
use kestrel_core::{TargetDescriptor, TargetMemoryType};
use thiserror::Error;

pub const GENERAL_PURPOSE_REGISTER_COUNT: usize = 32;
pub const SREG_NUMBER: usize = 32;
pub const SP_NUMBER: usize = 33;
pub const PC_NUMBER: usize = 34;
pub const REGISTER_COUNT: usize = 35;

const SRAM_OFFSET: u32 = 0x0080_0000;
const EEPROM_OFFSET: u32 = 0x0081_0000;

#[derive(Debug, Error)]
#[error("target descriptor lacks the {0} register")]
pub struct MissingRegister(&'static str);

/// Translate a client address into a memory type and an address within it.
pub const fn translate_address(address: u32) -> (TargetMemoryType, u32) {
    if address < SRAM_OFFSET {
        (TargetMemoryType::Flash, address)
    } else if address < EEPROM_OFFSET {
        (TargetMemoryType::Ram, address - SRAM_OFFSET)
    } else {
        (TargetMemoryType::Eeprom, address - EEPROM_OFFSET)
    }
}

/// Size of a register as the client transfers it.
pub const fn register_size(number: usize) -> usize {
    match number {
        SP_NUMBER => 2,
        PC_NUMBER => 4,
        _ => 1,
    }
}

/// Total size of a `g` reply payload, before hex encoding.
pub const fn register_block_size() -> usize {
    GENERAL_PURPOSE_REGISTER_COUNT + 1 + register_size(SP_NUMBER) + register_size(PC_NUMBER)
}

/// Client register numbers mapped onto target register descriptors.
#[derive(Debug, Clone)]
pub struct RegisterMap {
    descriptors: Vec<TargetRegisterDescriptor>,
}

impl RegisterMap {
    pub fn new(target: &TargetDescriptor) -> Result<Self, MissingRegister> {
        let mut descriptors: Vec<TargetRegisterDescriptor> = target
            .registers_of_kind(TargetRegisterKind::GeneralPurpose)
            .into_iter()
            .take(GENERAL_PURPOSE_REGISTER_COUNT)
            .cloned()
            .collect();
        if descriptors.len() != GENERAL_PURPOSE_REGISTER_COUNT {
            return Err(MissingRegister("general purpose"));
        }

        for (kind, name) in [
            (TargetRegisterKind::StatusRegister, "status"),
            (TargetRegisterKind::StackPointer, "stack pointer"),
            (TargetRegisterKind::ProgramCounter, "program counter"),
        ] {
            let descriptor = target
                .registers_of_kind(kind)
                .first()
                .copied()
                .cloned()
                .ok_or(MissingRegister(name))?;
            descriptors.push(descriptor);
        }

        Ok(Self { descriptors })
    }

    pub fn descriptor(&self, number: usize) -> Option<&TargetRegisterDescriptor> {
        self.descriptors.get(number)
    }

    /// All descriptors, in client register order.
    pub fn descriptors(&self) -> &[TargetRegisterDescriptor] {
        &self.descriptors
    }

    /// Client encoding of a register: little endian, padded to the client's size.
    pub fn encode(number: usize, register: &TargetRegister) -> Vec<u8> {
        let mut bytes: Vec<u8> = register.value.iter().rev().copied().collect();
        bytes.resize(register_size(number), 0);
        bytes
    }

    /// Build a register from the client's little-endian bytes.
    pub fn decode(&self, number: usize, bytes: &[u8]) -> Result<TargetRegister, PacketError> {
        let descriptor = self
            .descriptor(number)
            .ok_or_else(|| PacketError::malformed("register number"))?;
        if bytes.len() != register_size(number) {
            return Err(PacketError::malformed("register value"));
        }

        let size = descriptor.size as usize;
        let mut value: Vec<u8> = bytes.iter().take(size).copied().collect();
        value.resize(size, 0);
        value.reverse();
        Ok(TargetRegister::new(descriptor.clone(), value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_core::target::avr8::{find_part, Avr8Target};

    fn atmega328p() -> TargetDescriptor {
        let part = find_part("atmega328p").unwrap();
        Avr8Target::new(part, part.default_interface()).descriptor().clone()
    }

    #[test]
    fn test_address_translation() {
        assert_eq!(translate_address(0x1000), (TargetMemoryType::Flash, 0x1000));
        assert_eq!(translate_address(0x80_0100), (TargetMemoryType::Ram, 0x100));
        assert_eq!(translate_address(0x81_0010), (TargetMemoryType::Eeprom, 0x10));
    }

    #[test]
    fn test_register_order() {
        let map = RegisterMap::new(&atmega328p()).unwrap();
        let descriptors = map.descriptors();
        assert_eq!(descriptors.len(), REGISTER_COUNT);
        assert_eq!(descriptors[0].name, "r0");
        assert_eq!(descriptors[31].name, "r31");
        assert_eq!(descriptors[SREG_NUMBER].kind, TargetRegisterKind::StatusRegister);
        assert_eq!(descriptors[SP_NUMBER].kind, TargetRegisterKind::StackPointer);
        assert_eq!(descriptors[PC_NUMBER].kind, TargetRegisterKind::ProgramCounter);
        assert_eq!(register_block_size(), 39);
    }

    #[test]
    fn test_stack_pointer_is_little_endian() {
        let map = RegisterMap::new(&atmega328p()).unwrap();
        let sp = map.descriptor(SP_NUMBER).unwrap().clone();

        let register = TargetRegister::new(sp, vec![0x08, 0xFF]);
        assert_eq!(RegisterMap::encode(SP_NUMBER, &register), vec![0xFF, 0x08]);
        assert_eq!(map.decode(SP_NUMBER, &[0xFF, 0x08]).unwrap(), register);
        assert!(map.decode(SP_NUMBER, &[0xFF]).is_err());
        assert!(map.decode(REGISTER_COUNT, &[0x00]).is_err());
    }
}
