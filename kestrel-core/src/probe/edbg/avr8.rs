//! AVR8 Generic protocol over EDBG.

use super::{AvrEventKind, AvrResponseFrame, EdbgInterface, ProtocolHandler, RESPONSE_FAILED};
use crate::error::{DeviceFailure, TargetError};
use crate::target::{Avr8Part, PhysicalInterface, TargetBreakCause, TargetMemoryType, TargetState};
use crate::tools::Avr8DebugInterface;
use log::{debug, trace};
use std::collections::BTreeMap;

mod command {
    pub const SET: u8 = 0x01;
    pub const GET: u8 = 0x02;
    pub const ACTIVATE_PHYSICAL: u8 = 0x10;
    pub const DEACTIVATE_PHYSICAL: u8 = 0x11;
    pub const ATTACH: u8 = 0x13;
    pub const DETACH: u8 = 0x14;
    pub const PROG_MODE_ENTER: u8 = 0x15;
    pub const PROG_MODE_LEAVE: u8 = 0x16;
    pub const MEMORY_READ: u8 = 0x21;
    pub const MEMORY_WRITE: u8 = 0x23;
    pub const RESET: u8 = 0x30;
    pub const STOP: u8 = 0x31;
    pub const RUN: u8 = 0x32;
    pub const STEP: u8 = 0x34;
    pub const PC_READ: u8 = 0x35;
    pub const PC_WRITE: u8 = 0x36;
    pub const HW_BREAK_SET: u8 = 0x40;
    pub const HW_BREAK_CLEAR: u8 = 0x41;
    pub const SW_BREAK_SET: u8 = 0x43;
    pub const SW_BREAK_CLEAR: u8 = 0x44;
    pub const SW_BREAK_CLEAR_ALL: u8 = 0x45;
}

pub const RESPONSE_OK: u8 = 0x80;
pub const RESPONSE_LIST: u8 = 0x81;
pub const RESPONSE_PC: u8 = 0x83;
pub const RESPONSE_DATA: u8 = 0x84;

/// Hardware breakpoint slots offered by the OCD, numbered from 1.
const HARDWARE_BREAKPOINT_SLOTS: u8 = 3;

/// Largest memory access issued in one frame.
const MAX_MEMORY_ACCESS_SIZE: u32 = 256;

/// EDBG memory type selectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Avr8MemoryType {
    Sram = 0x20,
    Eeprom = 0x22,
    Spm = 0xA0,
    FlashPage = 0xB0,
    EepromPage = 0xB1,
    Fuses = 0xB2,
    LockBits = 0xB3,
    Signature = 0xB4,
    Osccal = 0xB5,
    RegisterFile = 0xB8,
    ApplicationFlash = 0xC0,
    BootFlash = 0xC1,
}

/// Parameter contexts and ids for `SET`/`GET`.
mod parameter {
    pub const CONFIG_VARIANT: (u8, u8) = (0x00, 0x00);
    pub const CONFIG_FUNCTION: (u8, u8) = (0x00, 0x01);
    pub const PHYSICAL_INTERFACE: (u8, u8) = (0x01, 0x00);

    pub const DEVICE_CONTEXT: u8 = 0x02;
    pub const FLASH_PAGE_SIZE: u8 = 0x00;
    pub const FLASH_SIZE: u8 = 0x02;
    pub const FLASH_BASE: u8 = 0x06;
    pub const BOOT_START: u8 = 0x0A;
    pub const SRAM_START: u8 = 0x0E;
    pub const EEPROM_SIZE: u8 = 0x10;
    pub const EEPROM_PAGE_SIZE: u8 = 0x12;
    pub const OCD_REVISION: u8 = 0x13;
    pub const OCD_DATA_REGISTER: u8 = 0x18;
    pub const EEARH: u8 = 0x19;
    pub const EEARL: u8 = 0x1A;
    pub const EECR: u8 = 0x1B;
    pub const EEDR: u8 = 0x1C;
    pub const SPMCR: u8 = 0x1D;
    pub const OSCCAL: u8 = 0x1E;

    pub const FUNCTION_DEBUGGING: u8 = 0x02;
}

const fn config_variant(interface: PhysicalInterface) -> u8 {
    match interface {
        PhysicalInterface::DebugWire => 0x01,
        PhysicalInterface::Jtag => 0x02,
        PhysicalInterface::Pdi => 0x03,
        PhysicalInterface::Updi => 0x05,
    }
}

const fn physical_interface_id(interface: PhysicalInterface) -> u8 {
    match interface {
        PhysicalInterface::Jtag => 0x04,
        PhysicalInterface::DebugWire => 0x05,
        PhysicalInterface::Pdi => 0x06,
        PhysicalInterface::Updi => 0x08,
    }
}

/// AVR8 debug interface of an EDBG tool.
pub struct EdbgAvr8Interface {
    edbg: EdbgInterface,
    physical_interface: PhysicalInterface,
    target_state: TargetState,
    break_cause: TargetBreakCause,
    programming_mode: bool,
    flash_page_size: u32,
    eeprom_page_size: u32,
    /// Byte address held by each occupied hardware breakpoint slot.
    hardware_breakpoints: BTreeMap<u8, u32>,
}

impl EdbgAvr8Interface {
    pub const fn new(edbg: EdbgInterface) -> Self {
        Self {
            edbg,
            physical_interface: PhysicalInterface::DebugWire,
            target_state: TargetState::Unknown,
            break_cause: TargetBreakCause::Unknown,
            programming_mode: false,
            flash_page_size: 0,
            eeprom_page_size: 0,
            hardware_breakpoints: BTreeMap::new(),
        }
    }

    pub fn edbg(&mut self) -> &mut EdbgInterface {
        &mut self.edbg
    }

    fn send(&mut self, payload: Vec<u8>) -> Result<AvrResponseFrame, TargetError> {
        let command = payload[0];
        trace!("AVR8 command 0x{command:02x}");
        let response = self.edbg.send_frame(ProtocolHandler::Avr8Generic, payload)?;

        if response.response_id() == RESPONSE_FAILED {
            return Err(DeviceFailure::CommandFailed {
                handler: ProtocolHandler::Avr8Generic.name(),
                command,
                code: response.error_code(),
            }
            .into());
        }
        Ok(response)
    }

    fn expect_ok(&mut self, payload: Vec<u8>) -> Result<(), TargetError> {
        let response = self.send(payload)?;
        match response.response_id() {
            RESPONSE_OK => Ok(()),
            other => Err(unexpected_response(other)),
        }
    }

    fn set_parameter(&mut self, (context, id): (u8, u8), value: &[u8]) -> Result<(), TargetError> {
        let mut payload = vec![command::SET, 0x00, context, id, u8::try_from(value.len()).unwrap_or(u8::MAX)];
        payload.extend_from_slice(value);
        self.expect_ok(payload)
    }

    fn set_device_parameter(&mut self, id: u8, value: &[u8]) -> Result<(), TargetError> {
        self.set_parameter((parameter::DEVICE_CONTEXT, id), value)
    }

    fn memory_type_for(&self, memory_type: TargetMemoryType) -> Result<Avr8MemoryType, TargetError> {
        match (memory_type, self.programming_mode) {
            (TargetMemoryType::Flash, true) => Ok(Avr8MemoryType::FlashPage),
            (TargetMemoryType::Flash, false) => Ok(Avr8MemoryType::Spm),
            (TargetMemoryType::Ram, _) => Ok(Avr8MemoryType::Sram),
            (TargetMemoryType::Eeprom, true) => Ok(Avr8MemoryType::EepromPage),
            (TargetMemoryType::Eeprom, false) => Ok(Avr8MemoryType::Eeprom),
            (TargetMemoryType::Other, _) => Err(TargetError::operation("unsupported memory type")),
        }
    }

    /// Page size the tool expects for aligned accesses, if any.
    const fn page_size_for(&self, memory_type: Avr8MemoryType) -> Option<u32> {
        match memory_type {
            Avr8MemoryType::FlashPage if self.flash_page_size > 0 => Some(self.flash_page_size),
            Avr8MemoryType::EepromPage if self.eeprom_page_size > 0 => Some(self.eeprom_page_size),
            _ => None,
        }
    }

    pub fn read_avr8_memory(
        &mut self,
        memory_type: Avr8MemoryType,
        address: u32,
        length: u32,
    ) -> Result<Vec<u8>, TargetError> {
        let mut data = Vec::with_capacity(length as usize);
        let mut offset = 0;

        while offset < length {
            let chunk = (length - offset).min(MAX_MEMORY_ACCESS_SIZE);
            let mut payload = vec![command::MEMORY_READ, 0x00, memory_type as u8];
            payload.extend_from_slice(&(address + offset).to_le_bytes());
            payload.extend_from_slice(&chunk.to_le_bytes());

            let response = self.send(payload)?;
            if response.response_id() != RESPONSE_DATA {
                return Err(unexpected_response(response.response_id()));
            }

            // `DATA, version, bytes..., status`.
            let bytes = response
                .payload
                .get(2..2 + chunk as usize)
                .ok_or_else(|| DeviceFailure::MalformedResponse(format!("short memory read of {chunk} bytes")))?;
            data.extend_from_slice(bytes);
            offset += chunk;
        }

        Ok(data)
    }

    pub fn write_avr8_memory(
        &mut self,
        memory_type: Avr8MemoryType,
        address: u32,
        data: &[u8],
    ) -> Result<(), TargetError> {
        if let Some(page_size) = self.page_size_for(memory_type) {
            return self.write_pages(memory_type, page_size, address, data);
        }

        for (index, chunk) in data.chunks(MAX_MEMORY_ACCESS_SIZE as usize).enumerate() {
            let chunk_address = address + (index as u32) * MAX_MEMORY_ACCESS_SIZE;
            self.write_chunk(memory_type, chunk_address, chunk)?;
        }
        Ok(())
    }

    /// Page-based memories only accept whole, aligned pages.
    fn write_pages(
        &mut self,
        memory_type: Avr8MemoryType,
        page_size: u32,
        address: u32,
        data: &[u8],
    ) -> Result<(), TargetError> {
        let end = address + data.len() as u32;
        let aligned_start = address - (address % page_size);
        let aligned_end = end.div_ceil(page_size) * page_size;

        let mut buffer = if aligned_start == address && aligned_end == end {
            Vec::new()
        } else {
            self.read_avr8_memory(memory_type, aligned_start, aligned_end - aligned_start)?
        };
        buffer.resize((aligned_end - aligned_start) as usize, 0xFF);
        let offset = (address - aligned_start) as usize;
        buffer[offset..offset + data.len()].copy_from_slice(data);

        for (index, page) in buffer.chunks(page_size as usize).enumerate() {
            self.write_chunk(memory_type, aligned_start + index as u32 * page_size, page)?;
        }
        Ok(())
    }

    fn write_chunk(&mut self, memory_type: Avr8MemoryType, address: u32, data: &[u8]) -> Result<(), TargetError> {
        let mut payload = vec![command::MEMORY_WRITE, 0x00, memory_type as u8];
        payload.extend_from_slice(&address.to_le_bytes());
        payload.extend_from_slice(&(data.len() as u32).to_le_bytes());
        // Synchronous write.
        payload.push(0x00);
        payload.extend_from_slice(data);
        self.expect_ok(payload)
    }

    fn hardware_breakpoint_slot(&self, address: u32) -> Option<u8> {
        self.hardware_breakpoints
            .iter()
            .find_map(|(&slot, &held)| (held == address).then_some(slot))
    }

    fn clear_hardware_breakpoint_slot(&mut self, slot: u8) -> Result<(), TargetError> {
        self.expect_ok(vec![command::HW_BREAK_CLEAR, 0x00, slot])?;
        self.hardware_breakpoints.remove(&slot);
        Ok(())
    }

    fn handle_events(&mut self) -> Result<(), TargetError> {
        while let Some(event) = self.edbg.poll_event()? {
            if event.kind() != Some(AvrEventKind::Break) {
                debug!("Ignoring AVR event {:?}", event.kind());
                continue;
            }

            // `0x40, PC (LE u32 word address), cause`.
            self.target_state = TargetState::Stopped;
            self.break_cause = match event.data().get(5) {
                Some(0x01) => TargetBreakCause::Breakpoint,
                _ => TargetBreakCause::Unknown,
            };
        }
        Ok(())
    }
}

fn unexpected_response(id: u8) -> TargetError {
    DeviceFailure::MalformedResponse(format!("unexpected AVR8 response 0x{id:02x}")).into()
}

impl Avr8DebugInterface for EdbgAvr8Interface {
    fn configure(&mut self, interface: PhysicalInterface) -> Result<(), TargetError> {
        self.physical_interface = interface;
        self.set_parameter(parameter::CONFIG_VARIANT, &[config_variant(interface)])?;
        self.set_parameter(parameter::CONFIG_FUNCTION, &[parameter::FUNCTION_DEBUGGING])?;
        self.set_parameter(parameter::PHYSICAL_INTERFACE, &[physical_interface_id(interface)])
    }

    fn set_target_parameters(&mut self, part: &Avr8Part) -> Result<(), TargetError> {
        self.flash_page_size = u32::from(part.flash_page_size);
        self.eeprom_page_size = u32::from(part.eeprom_page_size);

        self.set_device_parameter(parameter::FLASH_PAGE_SIZE, &part.flash_page_size.to_le_bytes())?;
        self.set_device_parameter(parameter::FLASH_SIZE, &part.flash_size.to_le_bytes())?;
        self.set_device_parameter(parameter::FLASH_BASE, &0u32.to_le_bytes())?;
        self.set_device_parameter(parameter::SRAM_START, &part.ram_start.to_le_bytes())?;
        self.set_device_parameter(parameter::EEPROM_SIZE, &part.eeprom_size.to_le_bytes())?;
        self.set_device_parameter(parameter::EEPROM_PAGE_SIZE, &[part.eeprom_page_size])?;

        if self.physical_interface == PhysicalInterface::Updi {
            return Ok(());
        }

        let registers = part.eeprom_registers;
        self.set_device_parameter(parameter::BOOT_START, &part.boot_start.to_le_bytes())?;
        self.set_device_parameter(parameter::OCD_REVISION, &[part.ocd_revision])?;
        self.set_device_parameter(parameter::OCD_DATA_REGISTER, &[part.ocd_data_register])?;
        self.set_device_parameter(parameter::EEARH, &[registers.eearh])?;
        self.set_device_parameter(parameter::EEARL, &[registers.eearl])?;
        self.set_device_parameter(parameter::EECR, &[registers.eecr])?;
        self.set_device_parameter(parameter::EEDR, &[registers.eedr])?;
        self.set_device_parameter(parameter::SPMCR, &[part.spmcr_address])?;
        self.set_device_parameter(parameter::OSCCAL, &[part.osccal_address])
    }

    fn activate(&mut self) -> Result<(), TargetError> {
        self.expect_ok(vec![command::ACTIVATE_PHYSICAL, 0x00, 0x00])?;
        self.expect_ok(vec![command::ATTACH, 0x00, 0x01])?;
        self.target_state = TargetState::Stopped;
        Ok(())
    }

    fn deactivate(&mut self) -> Result<(), TargetError> {
        if self.programming_mode {
            self.disable_programming_mode()?;
        }
        self.expect_ok(vec![command::DETACH, 0x00])?;
        self.expect_ok(vec![command::DEACTIVATE_PHYSICAL, 0x00])?;
        self.target_state = TargetState::Unknown;
        self.hardware_breakpoints.clear();
        Ok(())
    }

    fn device_signature(&mut self) -> Result<[u8; 3], TargetError> {
        let bytes = self.read_avr8_memory(Avr8MemoryType::Signature, 0, 3)?;
        Ok([bytes[0], bytes[1], bytes[2]])
    }

    fn stop(&mut self) -> Result<(), TargetError> {
        self.expect_ok(vec![command::STOP, 0x00, 0x01])?;
        self.target_state = TargetState::Stopped;
        self.break_cause = TargetBreakCause::Unknown;
        Ok(())
    }

    fn run(&mut self) -> Result<(), TargetError> {
        self.expect_ok(vec![command::RUN, 0x00])?;
        self.target_state = TargetState::Running;
        Ok(())
    }

    fn step(&mut self) -> Result<(), TargetError> {
        // Instruction level, step into.
        self.expect_ok(vec![command::STEP, 0x00, 0x01, 0x01])?;
        self.target_state = TargetState::Running;
        Ok(())
    }

    fn reset(&mut self) -> Result<(), TargetError> {
        self.expect_ok(vec![command::RESET, 0x00, 0x01])?;
        self.target_state = TargetState::Stopped;
        self.break_cause = TargetBreakCause::Unknown;
        Ok(())
    }

    fn state(&mut self) -> Result<TargetState, TargetError> {
        if self.target_state == TargetState::Running || self.edbg.pending_event_count() > 0 {
            self.handle_events()?;
        }
        Ok(self.target_state)
    }

    fn break_cause(&self) -> TargetBreakCause {
        self.break_cause
    }

    fn program_counter(&mut self) -> Result<u32, TargetError> {
        let response = self.send(vec![command::PC_READ, 0x00])?;
        if response.response_id() != RESPONSE_PC {
            return Err(unexpected_response(response.response_id()));
        }

        let bytes = response
            .payload
            .get(2..6)
            .ok_or_else(|| DeviceFailure::MalformedResponse("short program counter response".to_string()))?;
        let word_address = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        Ok(word_address * 2)
    }

    fn set_program_counter(&mut self, address: u32) -> Result<(), TargetError> {
        let mut payload = vec![command::PC_WRITE, 0x00];
        payload.extend_from_slice(&(address / 2).to_le_bytes());
        self.expect_ok(payload)
    }

    fn read_general_purpose_registers(&mut self) -> Result<Vec<u8>, TargetError> {
        // debugWIRE has no register file access; registers are mapped into SRAM.
        let memory_type = if self.physical_interface == PhysicalInterface::DebugWire {
            Avr8MemoryType::Sram
        } else {
            Avr8MemoryType::RegisterFile
        };
        self.read_avr8_memory(memory_type, 0, 32)
    }

    fn write_general_purpose_register(&mut self, index: u8, value: u8) -> Result<(), TargetError> {
        let memory_type = if self.physical_interface == PhysicalInterface::DebugWire {
            Avr8MemoryType::Sram
        } else {
            Avr8MemoryType::RegisterFile
        };
        self.write_avr8_memory(memory_type, u32::from(index), &[value])
    }

    fn read_memory(
        &mut self,
        memory_type: TargetMemoryType,
        address: u32,
        length: u32,
    ) -> Result<Vec<u8>, TargetError> {
        let memory_type = self.memory_type_for(memory_type)?;
        self.read_avr8_memory(memory_type, address, length)
    }

    fn write_memory(
        &mut self,
        memory_type: TargetMemoryType,
        address: u32,
        data: &[u8],
    ) -> Result<(), TargetError> {
        let memory_type = self.memory_type_for(memory_type)?;
        self.write_avr8_memory(memory_type, address, data)
    }

    fn set_software_breakpoint(&mut self, address: u32) -> Result<(), TargetError> {
        let mut payload = vec![command::SW_BREAK_SET, 0x00];
        payload.extend_from_slice(&address.to_le_bytes());
        self.expect_ok(payload)
    }

    fn clear_software_breakpoint(&mut self, address: u32) -> Result<(), TargetError> {
        let mut payload = vec![command::SW_BREAK_CLEAR, 0x00];
        payload.extend_from_slice(&address.to_le_bytes());
        self.expect_ok(payload)
    }

    fn set_hardware_breakpoint(&mut self, address: u32) -> Result<(), TargetError> {
        if self.hardware_breakpoint_slot(address).is_some() {
            return Ok(());
        }
        let slot = (1..=HARDWARE_BREAKPOINT_SLOTS)
            .find(|slot| !self.hardware_breakpoints.contains_key(slot))
            .ok_or_else(|| TargetError::operation("no free hardware breakpoint slot"))?;

        // Program break on execution, word address.
        let mut payload = vec![command::HW_BREAK_SET, 0x00, 0x01, slot];
        payload.extend_from_slice(&(address / 2).to_le_bytes());
        payload.push(0x03);
        self.expect_ok(payload)?;
        self.hardware_breakpoints.insert(slot, address);
        Ok(())
    }

    fn clear_hardware_breakpoint(&mut self, address: u32) -> Result<(), TargetError> {
        match self.hardware_breakpoint_slot(address) {
            Some(slot) => self.clear_hardware_breakpoint_slot(slot),
            None => Ok(()),
        }
    }

    fn clear_all_breakpoints(&mut self) -> Result<(), TargetError> {
        self.expect_ok(vec![command::SW_BREAK_CLEAR_ALL, 0x00])?;
        let slots: Vec<u8> = self.hardware_breakpoints.keys().copied().collect();
        for slot in slots {
            self.clear_hardware_breakpoint_slot(slot)?;
        }
        Ok(())
    }

    fn enable_programming_mode(&mut self) -> Result<(), TargetError> {
        self.expect_ok(vec![command::PROG_MODE_ENTER, 0x00])?;
        self.programming_mode = true;
        Ok(())
    }

    fn disable_programming_mode(&mut self) -> Result<(), TargetError> {
        self.expect_ok(vec![command::PROG_MODE_LEAVE, 0x00])?;
        self.programming_mode = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::cmsis_dap::CmsisDapInterface;
    use crate::probe::edbg::{AvrEvent, AVR_CMD, AVR_EVT, AVR_RSP};
    use crate::probe::transport::MockHidTransport;

    struct Script {
        transport: MockHidTransport,
        sequence_id: u16,
    }

    impl Script {
        fn new() -> Self {
            Self {
                transport: MockHidTransport::new(512),
                sequence_id: 0,
            }
        }

        /// Queue the tool's side of one AVR8 frame exchange.
        fn reply(&mut self, payload: &[u8]) {
            let [lo, hi] = self.sequence_id.to_le_bytes();
            self.sequence_id += 1;
            let mut frame = vec![0x0E, lo, hi, 0x12];
            frame.extend_from_slice(payload);
            let [size_hi, size_lo] = (frame.len() as u16).to_be_bytes();
            let mut report = vec![AVR_RSP, 0x11, size_hi, size_lo];
            report.extend_from_slice(&frame);

            self.transport.push_reply(&[AVR_CMD, 0x01]);
            self.transport.push_reply(&report);
        }

        fn interface(&self) -> EdbgAvr8Interface {
            let cmsis_dap = CmsisDapInterface::new(Box::new(self.transport.clone()));
            EdbgAvr8Interface::new(EdbgInterface::new(cmsis_dap))
        }

        /// Frame payloads sent by the host, in order.
        fn sent_payloads(&self) -> Vec<Vec<u8>> {
            self.transport
                .written()
                .into_iter()
                .filter(|report| report[0] == AVR_CMD)
                .map(|report| report[9..].to_vec())
                .collect()
        }
    }

    #[test]
    fn test_program_counter_is_converted_to_byte_address() {
        let mut script = Script::new();
        script.reply(&[RESPONSE_PC, 0x00, 0x34, 0x12, 0x00, 0x00]);

        let mut avr8 = script.interface();
        assert_eq!(avr8.program_counter().unwrap(), 0x2468);
    }

    #[test]
    fn test_memory_read_strips_status_byte() {
        let mut script = Script::new();
        script.reply(&[RESPONSE_DATA, 0x00, 0xDE, 0xAD, 0x00]);

        let mut avr8 = script.interface();
        let data = avr8.read_memory(TargetMemoryType::Ram, 0x100, 2).unwrap();

        assert_eq!(data, vec![0xDE, 0xAD]);
        assert_eq!(
            script.sent_payloads()[0],
            vec![0x21, 0x00, 0x20, 0x00, 0x01, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn test_failed_response_becomes_device_failure() {
        let mut script = Script::new();
        script.reply(&[RESPONSE_FAILED, 0x00, 0x10]);

        let mut avr8 = script.interface();
        let result = avr8.run();

        assert!(matches!(
            result,
            Err(TargetError::Device(DeviceFailure::CommandFailed { command: 0x32, code: 0x10, .. }))
        ));
    }

    #[test]
    fn test_break_event_stops_running_target() {
        let mut script = Script::new();
        script.reply(&[RESPONSE_OK, 0x00]);
        let event = AvrEvent::new(vec![0x40, 0x10, 0x00, 0x00, 0x00, 0x01]);
        let mut report = vec![AVR_EVT];
        report.extend(event.to_response_data(ProtocolHandler::Avr8Generic));
        script.transport.push_reply(&report);
        script.transport.push_reply(&[AVR_EVT, 0x00, 0x00]);

        let mut avr8 = script.interface();
        avr8.run().unwrap();
        assert_eq!(avr8.state().unwrap(), TargetState::Stopped);
        assert_eq!(avr8.break_cause(), TargetBreakCause::Breakpoint);
    }

    #[test]
    fn test_flash_page_write_is_aligned() {
        let mut script = Script::new();
        // Programming mode entry, page read-back, page write.
        script.reply(&[RESPONSE_OK, 0x00]);
        let mut page = vec![RESPONSE_DATA, 0x00];
        page.extend(vec![0xFF; 128]);
        page.push(0x00);
        script.reply(&page);
        script.reply(&[RESPONSE_OK, 0x00]);

        let mut avr8 = script.interface();
        avr8.flash_page_size = 128;
        avr8.enable_programming_mode().unwrap();
        avr8.write_memory(TargetMemoryType::Flash, 0x1002, &[0xAA, 0xBB]).unwrap();

        let payloads = script.sent_payloads();
        let write = &payloads[2];
        assert_eq!(write[0], 0x23);
        assert_eq!(write[2], Avr8MemoryType::FlashPage as u8);
        assert_eq!(&write[3..7], &0x1000u32.to_le_bytes());
        assert_eq!(&write[7..11], &128u32.to_le_bytes());
        assert_eq!(&write[12..16], &[0xFF, 0xFF, 0xAA, 0xBB]);
    }

    #[test]
    fn test_hardware_breakpoints_use_separate_slots() {
        let mut script = Script::new();
        for _ in 0..4 {
            script.reply(&[RESPONSE_OK, 0x00]);
        }

        let mut avr8 = script.interface();
        avr8.set_hardware_breakpoint(0x100).unwrap();
        avr8.set_hardware_breakpoint(0x200).unwrap();
        avr8.clear_hardware_breakpoint(0x100).unwrap();
        // Unknown address, nothing sent.
        avr8.clear_hardware_breakpoint(0x300).unwrap();
        // The freed slot is reused.
        avr8.set_hardware_breakpoint(0x400).unwrap();

        assert_eq!(
            script.sent_payloads(),
            vec![
                vec![0x40, 0x00, 0x01, 0x01, 0x80, 0x00, 0x00, 0x00, 0x03],
                vec![0x40, 0x00, 0x01, 0x02, 0x00, 0x01, 0x00, 0x00, 0x03],
                vec![0x41, 0x00, 0x01],
                vec![0x40, 0x00, 0x01, 0x01, 0x00, 0x02, 0x00, 0x00, 0x03],
            ]
        );
    }

    #[test]
    fn test_hardware_breakpoint_slots_run_out() {
        let mut script = Script::new();
        for _ in 0..3 {
            script.reply(&[RESPONSE_OK, 0x00]);
        }

        let mut avr8 = script.interface();
        for address in [0x100, 0x200, 0x300] {
            avr8.set_hardware_breakpoint(address).unwrap();
        }
        let result = avr8.set_hardware_breakpoint(0x400);

        assert!(matches!(result, Err(TargetError::Operation(_))));
        assert_eq!(script.sent_payloads().len(), 3);
    }

    #[test]
    fn test_clear_all_breakpoints_clears_hardware_slots() {
        let mut script = Script::new();
        for _ in 0..5 {
            script.reply(&[RESPONSE_OK, 0x00]);
        }

        let mut avr8 = script.interface();
        avr8.set_hardware_breakpoint(0x100).unwrap();
        avr8.set_hardware_breakpoint(0x200).unwrap();
        avr8.clear_all_breakpoints().unwrap();

        let payloads = script.sent_payloads();
        assert_eq!(
            &payloads[2..],
            &[vec![0x45, 0x00], vec![0x41, 0x00, 0x01], vec![0x41, 0x00, 0x02]]
        );
        assert!(avr8.hardware_breakpoints.is_empty());
    }
}
