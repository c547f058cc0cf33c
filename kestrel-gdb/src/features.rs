//! Features advertised in reply to `qSupported`.

use crate::packet::MAX_PACKET_SIZE;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    PacketSize,
    SoftwareBreakpoints,
    HardwareBreakpoints,
}

impl Feature {
    pub const fn name(self) -> &'static str {
        match self {
            Self::PacketSize => "PacketSize",
            Self::SoftwareBreakpoints => "swbreak",
            Self::HardwareBreakpoints => "hwbreak",
        }
    }

    fn parameter(self) -> Option<String> {
        match self {
            Self::PacketSize => Some(format!("{MAX_PACKET_SIZE:x}")),
            Self::SoftwareBreakpoints | Self::HardwareBreakpoints => None,
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.parameter() {
            Some(value) => write!(f, "{}={value}", self.name()),
            None => write!(f, "{}+", self.name()),
        }
    }
}

/// Everything this server supports, fixed at build time.
pub const SUPPORTED_FEATURES: [Feature; 3] = [
    Feature::PacketSize,
    Feature::SoftwareBreakpoints,
    Feature::HardwareBreakpoints,
];

pub fn supported_features_reply() -> String {
    SUPPORTED_FEATURES
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(";")
}
