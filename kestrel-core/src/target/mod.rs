//! Target model.
//!
//! Describes the microcontroller under debug: its memories, registers, pins
//! and execution state. Descriptors are plain data and are cloned freely
//! across threads.

pub mod avr8;

use serde::{Deserialize, Serialize};

pub use avr8::{Avr8Family, Avr8Part, Avr8Target, PhysicalInterface, TargetSelector};

/// Execution state of the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetState {
    Unknown,
    Running,
    Stopped,
}

/// Memory spaces exposed by a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TargetMemoryType {
    Flash,
    Ram,
    Eeprom,
    Other,
}

/// Inclusive address range within one memory space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetMemoryAddressRange {
    pub start: u32,
    pub end: u32,
}

impl TargetMemoryAddressRange {
    pub const fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    /// Range covering `size` bytes from `start`. `size` must be non-zero.
    pub const fn from_start_and_size(start: u32, size: u32) -> Self {
        Self {
            start,
            end: start.saturating_add(size.saturating_sub(1)),
        }
    }

    pub const fn intersects(&self, other: &Self) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    pub const fn contains_address(&self, address: u32) -> bool {
        address >= self.start && address <= self.end
    }

    pub const fn contains(&self, other: &Self) -> bool {
        other.start >= self.start && other.end <= self.end
    }

    pub const fn size(&self) -> u32 {
        self.end - self.start + 1
    }
}

/// A memory space and where it lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetMemoryDescriptor {
    pub memory_type: TargetMemoryType,
    pub address_range: TargetMemoryAddressRange,
    pub page_size: Option<u32>,
}

/// Role of a register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TargetRegisterKind {
    GeneralPurpose,
    StatusRegister,
    StackPointer,
    ProgramCounter,
    Other,
}

/// Describes one register. `start_address` is set only for memory-mapped registers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetRegisterDescriptor {
    pub id: u16,
    pub name: String,
    pub kind: TargetRegisterKind,
    pub start_address: Option<u32>,
    pub size: u32,
    pub memory_type: TargetMemoryType,
}

impl TargetRegisterDescriptor {
    /// Address range occupied by a memory-mapped register.
    pub fn address_range(&self) -> Option<TargetMemoryAddressRange> {
        self.start_address
            .map(|start| TargetMemoryAddressRange::from_start_and_size(start, self.size))
    }
}

/// A register and its value, most significant byte first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRegister {
    pub descriptor: TargetRegisterDescriptor,
    pub value: Vec<u8>,
}

impl TargetRegister {
    pub const fn new(descriptor: TargetRegisterDescriptor, value: Vec<u8>) -> Self {
        Self { descriptor, value }
    }

    /// The value as an unsigned integer.
    pub fn as_u32(&self) -> u32 {
        self.value
            .iter()
            .fold(0u32, |acc, byte| (acc << 8) | u32::from(*byte))
    }
}

/// Breakpoint flavour requested by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BreakpointKind {
    Software,
    Hardware,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetBreakpoint {
    pub address: u32,
    pub kind: BreakpointKind,
}

impl TargetBreakpoint {
    pub const fn software(address: u32) -> Self {
        Self {
            address,
            kind: BreakpointKind::Software,
        }
    }
}

/// Why the target stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetBreakCause {
    Breakpoint,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PinDirection {
    Input,
    Output,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PinLevel {
    Low,
    High,
}

/// Sampled state of a GPIO pin. Fields left as `None` are unknown or not to be changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetPinState {
    pub direction: Option<PinDirection>,
    pub level: Option<PinLevel>,
}

/// Data-space addresses of the port registers controlling a pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpioPort {
    pub direction_address: u32,
    pub output_address: u32,
    pub input_address: u32,
    pub bit: u8,
}

/// A physical package pin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetPinDescriptor {
    pub number: u16,
    pub name: String,
    pub gpio: Option<GpioPort>,
}

/// Everything a client needs to know about the connected target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetDescriptor {
    pub name: String,
    pub signature: String,
    pub family: Avr8Family,
    pub program_memory_type: TargetMemoryType,
    pub memory_descriptors: Vec<TargetMemoryDescriptor>,
    pub register_descriptors: Vec<TargetRegisterDescriptor>,
    pub pins: Vec<TargetPinDescriptor>,
}

impl TargetDescriptor {
    pub fn memory_descriptor(&self, memory_type: TargetMemoryType) -> Option<&TargetMemoryDescriptor> {
        self.memory_descriptors
            .iter()
            .find(|descriptor| descriptor.memory_type == memory_type)
    }

    /// Register descriptors of one kind, in id order.
    pub fn registers_of_kind(&self, kind: TargetRegisterKind) -> Vec<&TargetRegisterDescriptor> {
        let mut registers: Vec<_> = self
            .register_descriptors
            .iter()
            .filter(|descriptor| descriptor.kind == kind)
            .collect();
        registers.sort_by_key(|descriptor| descriptor.id);
        registers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_range_intersection() {
        let range = TargetMemoryAddressRange::new(0x20, 0x2F);

        assert!(range.intersects(&TargetMemoryAddressRange::new(0x2F, 0x40)));
        assert!(range.intersects(&TargetMemoryAddressRange::new(0x00, 0x20)));
        assert!(!range.intersects(&TargetMemoryAddressRange::new(0x30, 0x40)));
        assert!(range.contains(&TargetMemoryAddressRange::new(0x22, 0x23)));
        assert!(!range.contains(&TargetMemoryAddressRange::new(0x1F, 0x23)));
        assert_eq!(range.size(), 16);
    }

    #[test]
    fn test_register_value_is_msb_first() {
        let descriptor = TargetRegisterDescriptor {
            id: 33,
            name: "sp".to_string(),
            kind: TargetRegisterKind::StackPointer,
            start_address: Some(0x5D),
            size: 2,
            memory_type: TargetMemoryType::Ram,
        };
        let register = TargetRegister::new(descriptor, vec![0x08, 0xFF]);

        assert_eq!(register.as_u32(), 0x08FF);
        assert_eq!(
            register.descriptor.address_range(),
            Some(TargetMemoryAddressRange::new(0x5D, 0x5E))
        );
    }
}
