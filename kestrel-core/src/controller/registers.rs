//! Lookup of memory-mapped registers by address.

use crate::target::{TargetMemoryAddressRange, TargetMemoryType, TargetRegister, TargetRegisterDescriptor};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Default)]
struct MemoryRegisters {
    /// Smallest range spanning every register in this memory.
    span: Option<TargetMemoryAddressRange>,
    by_start_address: BTreeMap<u32, Vec<TargetRegisterDescriptor>>,
}

/// Register descriptors indexed per memory type and start address.
#[derive(Debug, Default)]
pub struct RegisterIndex {
    memories: HashMap<TargetMemoryType, MemoryRegisters>,
}

impl RegisterIndex {
    pub fn new(descriptors: &[TargetRegisterDescriptor]) -> Self {
        let mut memories: HashMap<TargetMemoryType, MemoryRegisters> = HashMap::new();

        for descriptor in descriptors {
            let (Some(start), Some(range)) = (descriptor.start_address, descriptor.address_range()) else {
                continue;
            };

            let memory = memories.entry(descriptor.memory_type).or_default();
            memory.span = Some(match memory.span {
                Some(span) => TargetMemoryAddressRange::new(span.start.min(range.start), span.end.max(range.end)),
                None => range,
            });
            memory
                .by_start_address
                .entry(start)
                .or_default()
                .push(descriptor.clone());
        }

        Self { memories }
    }

    pub fn span(&self, memory_type: TargetMemoryType) -> Option<TargetMemoryAddressRange> {
        self.memories.get(&memory_type).and_then(|memory| memory.span)
    }

    /// Descriptors of registers intersecting `range`.
    pub fn intersecting(
        &self,
        memory_type: TargetMemoryType,
        range: TargetMemoryAddressRange,
    ) -> Vec<&TargetRegisterDescriptor> {
        let Some(memory) = self.memories.get(&memory_type) else {
            return Vec::new();
        };
        if !memory.span.is_some_and(|span| span.intersects(&range)) {
            return Vec::new();
        }

        memory
            .by_start_address
            .range(..=range.end)
            .flat_map(|(_, descriptors)| descriptors)
            .filter(|descriptor| {
                descriptor
                    .address_range()
                    .is_some_and(|register| register.intersects(&range))
            })
            .collect()
    }

    /// Registers whose whole value lies within a buffer written at `start_address`.
    pub fn registers_in_buffer(
        &self,
        memory_type: TargetMemoryType,
        start_address: u32,
        buffer: &[u8],
    ) -> Vec<TargetRegister> {
        if buffer.is_empty() {
            return Vec::new();
        }
        let written = TargetMemoryAddressRange::from_start_and_size(start_address, buffer.len() as u32);

        self.intersecting(memory_type, written)
            .into_iter()
            .filter_map(|descriptor| {
                let range = descriptor.address_range()?;
                if !written.contains(&range) {
                    return None;
                }
                let offset = (range.start - start_address) as usize;
                let mut value = buffer[offset..offset + range.size() as usize].to_vec();
                // Little-endian in memory, MSB first in a register value.
                value.reverse();
                Some(TargetRegister::new(descriptor.clone(), value))
            })
            .collect()
    }
}
