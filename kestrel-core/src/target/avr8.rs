//! AVR8 targets.
//!
//! Parts are described by a built-in table. A configured target name is
//! turned into a [`TargetSelector`], which is resolved exactly once against
//! the signature read from the connected device.

use super::{
    GpioPort, PinDirection, PinLevel, TargetDescriptor, TargetMemoryAddressRange,
    TargetMemoryDescriptor, TargetMemoryType, TargetPinDescriptor, TargetPinState,
    TargetRegister, TargetRegisterDescriptor, TargetRegisterKind,
};
use crate::error::{ConfigError, TargetError};
use crate::tools::Avr8DebugInterface;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Name selecting "whatever AVR8 part is connected".
pub const GENERIC_TARGET_NAME: &str = "avr8";

/// Number of general purpose registers on every AVR8 core.
pub const GENERAL_PURPOSE_REGISTER_COUNT: u16 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Avr8Family {
    Mega,
    Xmega,
    Tiny,
}

/// Physical debug interface between tool and target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PhysicalInterface {
    DebugWire,
    Jtag,
    Pdi,
    Updi,
}

impl PhysicalInterface {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "debug-wire" | "debugwire" => Some(Self::DebugWire),
            "jtag" => Some(Self::Jtag),
            "pdi" => Some(Self::Pdi),
            "updi" => Some(Self::Updi),
            _ => None,
        }
    }
}

/// I/O addresses of the EEPROM control registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EepromRegisters {
    pub eearh: u8,
    pub eearl: u8,
    pub eecr: u8,
    pub eedr: u8,
}

#[derive(Debug, Clone, Copy)]
struct PinSpec {
    number: u16,
    name: &'static str,
    port: Option<(u16, u16, u16)>,
    bit: u8,
}

const fn pin(number: u16, name: &'static str, port: (u16, u16, u16), bit: u8) -> PinSpec {
    PinSpec {
        number,
        name,
        port: Some(port),
        bit,
    }
}

const fn power_pin(number: u16, name: &'static str) -> PinSpec {
    PinSpec {
        number,
        name,
        port: None,
        bit: 0,
    }
}

/// Static parameters of one AVR8 part.
#[derive(Debug)]
pub struct Avr8Part {
    pub name: &'static str,
    pub signature: [u8; 3],
    pub family: Avr8Family,
    /// Supported physical interfaces, default first.
    pub interfaces: &'static [PhysicalInterface],
    pub flash_size: u32,
    pub flash_page_size: u16,
    pub boot_start: u32,
    pub ram_start: u16,
    pub ram_size: u16,
    pub eeprom_size: u16,
    pub eeprom_page_size: u8,
    /// GP registers occupy data-space addresses 0x00..0x20.
    pub memory_mapped_registers: bool,
    pub sreg_address: u16,
    pub sp_address: u16,
    pub ocd_revision: u8,
    pub ocd_data_register: u8,
    pub eeprom_registers: EepromRegisters,
    pub spmcr_address: u8,
    pub osccal_address: u8,
    pins: &'static [PinSpec],
}

impl Avr8Part {
    pub fn signature_hex(&self) -> String {
        format_signature(self.signature)
    }

    pub fn default_interface(&self) -> PhysicalInterface {
        self.interfaces
            .first()
            .copied()
            .unwrap_or(PhysicalInterface::DebugWire)
    }
}

// (PINx, DDRx, PORTx) data-space addresses.
const MEGA_PORTB: (u16, u16, u16) = (0x23, 0x24, 0x25);
const MEGA_PORTD: (u16, u16, u16) = (0x29, 0x2A, 0x2B);
const TINY_PORTB: (u16, u16, u16) = (0x36, 0x37, 0x38);
// VPORTA IN, DIR, OUT.
const VPORTA: (u16, u16, u16) = (0x02, 0x00, 0x01);

static ATMEGA328P_PINS: [PinSpec; 16] = [
    pin(2, "PD0", MEGA_PORTD, 0),
    pin(3, "PD1", MEGA_PORTD, 1),
    pin(4, "PD2", MEGA_PORTD, 2),
    pin(5, "PD3", MEGA_PORTD, 3),
    pin(6, "PD4", MEGA_PORTD, 4),
    power_pin(7, "VCC"),
    power_pin(8, "GND"),
    pin(11, "PD5", MEGA_PORTD, 5),
    pin(12, "PD6", MEGA_PORTD, 6),
    pin(13, "PD7", MEGA_PORTD, 7),
    pin(14, "PB0", MEGA_PORTB, 0),
    pin(15, "PB1", MEGA_PORTB, 1),
    pin(16, "PB2", MEGA_PORTB, 2),
    pin(17, "PB3", MEGA_PORTB, 3),
    pin(18, "PB4", MEGA_PORTB, 4),
    pin(19, "PB5", MEGA_PORTB, 5),
];

static ATTINY85_PINS: [PinSpec; 8] = [
    pin(1, "PB5", TINY_PORTB, 5),
    pin(2, "PB3", TINY_PORTB, 3),
    pin(3, "PB4", TINY_PORTB, 4),
    power_pin(4, "GND"),
    pin(5, "PB0", TINY_PORTB, 0),
    pin(6, "PB1", TINY_PORTB, 1),
    pin(7, "PB2", TINY_PORTB, 2),
    power_pin(8, "VCC"),
];

static ATMEGA2560_PINS: [PinSpec; 8] = [
    pin(19, "PB0", MEGA_PORTB, 0),
    pin(20, "PB1", MEGA_PORTB, 1),
    pin(21, "PB2", MEGA_PORTB, 2),
    pin(22, "PB3", MEGA_PORTB, 3),
    pin(23, "PB4", MEGA_PORTB, 4),
    pin(24, "PB5", MEGA_PORTB, 5),
    pin(25, "PB6", MEGA_PORTB, 6),
    pin(26, "PB7", MEGA_PORTB, 7),
];

static ATMEGA4809_PINS: [PinSpec; 8] = [
    pin(44, "PA0", VPORTA, 0),
    pin(45, "PA1", VPORTA, 1),
    pin(46, "PA2", VPORTA, 2),
    pin(47, "PA3", VPORTA, 3),
    pin(48, "PA4", VPORTA, 4),
    pin(1, "PA5", VPORTA, 5),
    pin(2, "PA6", VPORTA, 6),
    pin(3, "PA7", VPORTA, 7),
];

const CLASSIC_EEPROM_REGISTERS: EepromRegisters = EepromRegisters {
    eearh: 0x22,
    eearl: 0x21,
    eecr: 0x1F,
    eedr: 0x20,
};

static PARTS: [Avr8Part; 4] = [
    Avr8Part {
        name: "atmega328p",
        signature: [0x1E, 0x95, 0x0F],
        family: Avr8Family::Mega,
        interfaces: &[PhysicalInterface::DebugWire],
        flash_size: 0x8000,
        flash_page_size: 128,
        boot_start: 0x7000,
        ram_start: 0x0100,
        ram_size: 0x0800,
        eeprom_size: 0x0400,
        eeprom_page_size: 4,
        memory_mapped_registers: true,
        sreg_address: 0x5F,
        sp_address: 0x5D,
        ocd_revision: 1,
        ocd_data_register: 0x31,
        eeprom_registers: CLASSIC_EEPROM_REGISTERS,
        spmcr_address: 0x37,
        osccal_address: 0x66,
        pins: &ATMEGA328P_PINS,
    },
    Avr8Part {
        name: "attiny85",
        signature: [0x1E, 0x93, 0x0B],
        family: Avr8Family::Tiny,
        interfaces: &[PhysicalInterface::DebugWire],
        flash_size: 0x2000,
        flash_page_size: 64,
        boot_start: 0,
        ram_start: 0x0060,
        ram_size: 0x0200,
        eeprom_size: 0x0200,
        eeprom_page_size: 4,
        memory_mapped_registers: true,
        sreg_address: 0x5F,
        sp_address: 0x5D,
        ocd_revision: 1,
        ocd_data_register: 0x22,
        eeprom_registers: EepromRegisters {
            eearh: 0x1F,
            eearl: 0x1E,
            eecr: 0x1C,
            eedr: 0x1D,
        },
        spmcr_address: 0x37,
        osccal_address: 0x51,
        pins: &ATTINY85_PINS,
    },
    Avr8Part {
        name: "atmega2560",
        signature: [0x1E, 0x98, 0x01],
        family: Avr8Family::Mega,
        interfaces: &[PhysicalInterface::Jtag],
        flash_size: 0x40000,
        flash_page_size: 256,
        boot_start: 0x3E000,
        ram_start: 0x0200,
        ram_size: 0x2000,
        eeprom_size: 0x1000,
        eeprom_page_size: 8,
        memory_mapped_registers: true,
        sreg_address: 0x5F,
        sp_address: 0x5D,
        ocd_revision: 3,
        ocd_data_register: 0x31,
        eeprom_registers: CLASSIC_EEPROM_REGISTERS,
        spmcr_address: 0x37,
        osccal_address: 0x66,
        pins: &ATMEGA2560_PINS,
    },
    Avr8Part {
        name: "atmega4809",
        signature: [0x1E, 0x96, 0x51],
        family: Avr8Family::Mega,
        interfaces: &[PhysicalInterface::Updi],
        flash_size: 0xC000,
        flash_page_size: 128,
        boot_start: 0,
        ram_start: 0x2800,
        ram_size: 0x1800,
        eeprom_size: 0x0100,
        eeprom_page_size: 64,
        memory_mapped_registers: false,
        sreg_address: 0x3F,
        sp_address: 0x3D,
        ocd_revision: 0,
        ocd_data_register: 0,
        eeprom_registers: EepromRegisters {
            eearh: 0,
            eearl: 0,
            eecr: 0,
            eedr: 0,
        },
        spmcr_address: 0,
        osccal_address: 0,
        pins: &ATMEGA4809_PINS,
    },
];

/// All parts known to the built-in table.
pub fn supported_parts() -> &'static [Avr8Part] {
    &PARTS
}

pub fn find_part(name: &str) -> Option<&'static Avr8Part> {
    PARTS.iter().find(|part| part.name.eq_ignore_ascii_case(name))
}

pub fn find_part_by_signature(signature: [u8; 3]) -> Option<&'static Avr8Part> {
    PARTS.iter().find(|part| part.signature == signature)
}

pub fn format_signature(signature: [u8; 3]) -> String {
    format!("{:02X}{:02X}{:02X}", signature[0], signature[1], signature[2])
}

/// Target requested by configuration, prior to reading the device identity.
#[derive(Debug, Clone, Copy)]
pub enum TargetSelector {
    Generic,
    Named(&'static Avr8Part),
}

impl TargetSelector {
    pub fn from_name(name: &str) -> Result<Self, ConfigError> {
        if name.eq_ignore_ascii_case(GENERIC_TARGET_NAME) {
            return Ok(Self::Generic);
        }

        find_part(name)
            .map(Self::Named)
            .ok_or_else(|| ConfigError::UnknownTarget(name.to_string()))
    }

    /// Interface to activate with when configuration does not name one.
    pub fn default_interface(&self) -> PhysicalInterface {
        match self {
            Self::Generic => PhysicalInterface::DebugWire,
            Self::Named(part) => part.default_interface(),
        }
    }

    /// Resolve to a concrete part from the signature read off the device.
    pub fn resolve(&self, signature: [u8; 3]) -> Result<&'static Avr8Part, ConfigError> {
        match self {
            Self::Generic => find_part_by_signature(signature)
                .ok_or_else(|| ConfigError::UnknownTarget(format_signature(signature))),
            Self::Named(part) if part.signature == signature => Ok(part),
            Self::Named(part) => Err(ConfigError::SignatureMismatch {
                expected: part.signature_hex(),
                found: format_signature(signature),
            }),
        }
    }
}

/// A resolved AVR8 target.
#[derive(Debug)]
pub struct Avr8Target {
    part: &'static Avr8Part,
    interface: PhysicalInterface,
    descriptor: TargetDescriptor,
    programming_mode: bool,
}

impl Avr8Target {
    pub fn new(part: &'static Avr8Part, interface: PhysicalInterface) -> Self {
        Self {
            part,
            interface,
            descriptor: build_descriptor(part),
            programming_mode: false,
        }
    }

    pub const fn part(&self) -> &'static Avr8Part {
        self.part
    }

    pub const fn physical_interface(&self) -> PhysicalInterface {
        self.interface
    }

    pub const fn descriptor(&self) -> &TargetDescriptor {
        &self.descriptor
    }

    pub const fn programming_mode_enabled(&self) -> bool {
        self.programming_mode
    }

    pub fn enable_programming_mode(
        &mut self,
        interface: &mut dyn Avr8DebugInterface,
    ) -> Result<(), TargetError> {
        if !self.programming_mode {
            interface.enable_programming_mode()?;
            self.programming_mode = true;
        }
        Ok(())
    }

    pub fn disable_programming_mode(
        &mut self,
        interface: &mut dyn Avr8DebugInterface,
    ) -> Result<(), TargetError> {
        if self.programming_mode {
            interface.disable_programming_mode()?;
            self.programming_mode = false;
        }
        Ok(())
    }

    pub fn read_registers(
        &self,
        interface: &mut dyn Avr8DebugInterface,
        descriptors: &[TargetRegisterDescriptor],
    ) -> Result<Vec<TargetRegister>, TargetError> {
        let mut general_purpose: Option<Vec<u8>> = None;
        let mut registers = Vec::with_capacity(descriptors.len());

        for descriptor in descriptors {
            let value = match descriptor.kind {
                TargetRegisterKind::GeneralPurpose => {
                    if general_purpose.is_none() {
                        general_purpose = Some(interface.read_general_purpose_registers()?);
                    }
                    let file = general_purpose.as_deref().unwrap_or_default();
                    let byte = file.get(usize::from(descriptor.id)).copied().ok_or_else(|| {
                        TargetError::operation(format!("invalid register {}", descriptor.name))
                    })?;
                    vec![byte]
                }
                TargetRegisterKind::ProgramCounter => {
                    interface.program_counter()?.to_be_bytes().to_vec()
                }
                _ => {
                    let address = descriptor.start_address.ok_or_else(|| {
                        TargetError::operation(format!("register {} is not addressable", descriptor.name))
                    })?;
                    let mut value =
                        interface.read_memory(descriptor.memory_type, address, descriptor.size)?;
                    // Memory is little-endian; register values are MSB first.
                    value.reverse();
                    value
                }
            };

            registers.push(TargetRegister::new(descriptor.clone(), value));
        }

        Ok(registers)
    }

    pub fn write_registers(
        &self,
        interface: &mut dyn Avr8DebugInterface,
        registers: &[TargetRegister],
    ) -> Result<(), TargetError> {
        for register in registers {
            let descriptor = &register.descriptor;
            if register.value.is_empty() || register.value.len() > descriptor.size as usize {
                return Err(TargetError::operation(format!(
                    "invalid value size for register {}",
                    descriptor.name
                )));
            }

            match descriptor.kind {
                TargetRegisterKind::GeneralPurpose => {
                    let index = u8::try_from(descriptor.id)
                        .map_err(|_| TargetError::operation("invalid register index"))?;
                    interface.write_general_purpose_register(index, register.value[register.value.len() - 1])?;
                }
                TargetRegisterKind::ProgramCounter => {
                    interface.set_program_counter(register.as_u32())?;
                }
                _ => {
                    let address = descriptor.start_address.ok_or_else(|| {
                        TargetError::operation(format!("register {} is not addressable", descriptor.name))
                    })?;
                    let mut bytes = vec![0u8; descriptor.size as usize];
                    let offset = bytes.len() - register.value.len();
                    bytes[offset..].copy_from_slice(&register.value);
                    bytes.reverse();
                    interface.write_memory(descriptor.memory_type, address, &bytes)?;
                }
            }
        }

        Ok(())
    }

    pub fn stack_pointer(&self, interface: &mut dyn Avr8DebugInterface) -> Result<u32, TargetError> {
        let bytes = interface.read_memory(TargetMemoryType::Ram, u32::from(self.part.sp_address), 2)?;
        if bytes.len() != 2 {
            return Err(TargetError::operation("short stack pointer read"));
        }
        Ok(u32::from(u16::from_le_bytes([bytes[0], bytes[1]])))
    }

    /// Sample every GPIO pin, keyed by pin number.
    pub fn pin_states(
        &self,
        interface: &mut dyn Avr8DebugInterface,
    ) -> Result<BTreeMap<u16, TargetPinState>, TargetError> {
        let mut port_values: BTreeMap<u32, u8> = BTreeMap::new();
        let mut states = BTreeMap::new();

        for pin in &self.descriptor.pins {
            let Some(gpio) = pin.gpio else {
                continue;
            };

            let mut read = |address: u32| -> Result<u8, TargetError> {
                if let Some(value) = port_values.get(&address) {
                    return Ok(*value);
                }
                let value = read_byte(interface, address)?;
                port_values.insert(address, value);
                Ok(value)
            };

            let mask = 1u8 << gpio.bit;
            let direction = if read(gpio.direction_address)? & mask == 0 {
                PinDirection::Input
            } else {
                PinDirection::Output
            };
            let level_address = match direction {
                PinDirection::Output => gpio.output_address,
                PinDirection::Input => gpio.input_address,
            };
            let level = if read(level_address)? & mask == 0 {
                PinLevel::Low
            } else {
                PinLevel::High
            };

            states.insert(
                pin.number,
                TargetPinState {
                    direction: Some(direction),
                    level: Some(level),
                },
            );
        }

        Ok(states)
    }

    pub fn set_pin_state(
        &self,
        interface: &mut dyn Avr8DebugInterface,
        pin_number: u16,
        state: TargetPinState,
    ) -> Result<(), TargetError> {
        let gpio = self
            .descriptor
            .pins
            .iter()
            .find(|pin| pin.number == pin_number)
            .and_then(|pin| pin.gpio)
            .ok_or_else(|| TargetError::operation(format!("pin {pin_number} is not a GPIO pin")))?;
        let mask = 1u8 << gpio.bit;

        if let Some(direction) = state.direction {
            let current = read_byte(interface, gpio.direction_address)?;
            let value = match direction {
                PinDirection::Output => current | mask,
                PinDirection::Input => current & !mask,
            };
            interface.write_memory(TargetMemoryType::Ram, gpio.direction_address, &[value])?;
        }

        if let Some(level) = state.level {
            let current = read_byte(interface, gpio.output_address)?;
            let value = match level {
                PinLevel::High => current | mask,
                PinLevel::Low => current & !mask,
            };
            interface.write_memory(TargetMemoryType::Ram, gpio.output_address, &[value])?;
        }

        Ok(())
    }
}

fn read_byte(interface: &mut dyn Avr8DebugInterface, address: u32) -> Result<u8, TargetError> {
    interface
        .read_memory(TargetMemoryType::Ram, address, 1)?
        .first()
        .copied()
        .ok_or_else(|| TargetError::operation("empty memory read"))
}

fn build_descriptor(part: &Avr8Part) -> TargetDescriptor {
    let gp_memory_type = if part.memory_mapped_registers {
        TargetMemoryType::Ram
    } else {
        TargetMemoryType::Other
    };

    let mut register_descriptors: Vec<TargetRegisterDescriptor> = (0..GENERAL_PURPOSE_REGISTER_COUNT)
        .map(|index| TargetRegisterDescriptor {
            id: index,
            name: format!("r{index}"),
            kind: TargetRegisterKind::GeneralPurpose,
            start_address: part.memory_mapped_registers.then_some(u32::from(index)),
            size: 1,
            memory_type: gp_memory_type,
        })
        .collect();

    register_descriptors.push(TargetRegisterDescriptor {
        id: GENERAL_PURPOSE_REGISTER_COUNT,
        name: "sreg".to_string(),
        kind: TargetRegisterKind::StatusRegister,
        start_address: Some(u32::from(part.sreg_address)),
        size: 1,
        memory_type: TargetMemoryType::Ram,
    });
    register_descriptors.push(TargetRegisterDescriptor {
        id: GENERAL_PURPOSE_REGISTER_COUNT + 1,
        name: "sp".to_string(),
        kind: TargetRegisterKind::StackPointer,
        start_address: Some(u32::from(part.sp_address)),
        size: 2,
        memory_type: TargetMemoryType::Ram,
    });
    register_descriptors.push(TargetRegisterDescriptor {
        id: GENERAL_PURPOSE_REGISTER_COUNT + 2,
        name: "pc".to_string(),
        kind: TargetRegisterKind::ProgramCounter,
        start_address: None,
        size: 4,
        memory_type: TargetMemoryType::Other,
    });

    let memory_descriptors = vec![
        TargetMemoryDescriptor {
            memory_type: TargetMemoryType::Flash,
            address_range: TargetMemoryAddressRange::from_start_and_size(0, part.flash_size),
            page_size: Some(u32::from(part.flash_page_size)),
        },
        TargetMemoryDescriptor {
            memory_type: TargetMemoryType::Ram,
            address_range: TargetMemoryAddressRange::from_start_and_size(
                u32::from(part.ram_start),
                u32::from(part.ram_size),
            ),
            page_size: None,
        },
        TargetMemoryDescriptor {
            memory_type: TargetMemoryType::Eeprom,
            address_range: TargetMemoryAddressRange::from_start_and_size(0, u32::from(part.eeprom_size)),
            page_size: Some(u32::from(part.eeprom_page_size)),
        },
    ];

    let pins = part
        .pins
        .iter()
        .map(|pin| TargetPinDescriptor {
            number: pin.number,
            name: pin.name.to_string(),
            gpio: pin.port.map(|(input, direction, output)| GpioPort {
                direction_address: u32::from(direction),
                output_address: u32::from(output),
                input_address: u32::from(input),
                bit: pin.bit,
            }),
        })
        .collect();

    TargetDescriptor {
        name: part.name.to_string(),
        signature: part.signature_hex(),
        family: part.family,
        program_memory_type: TargetMemoryType::Flash,
        memory_descriptors,
        register_descriptors,
        pins,
    }
}
