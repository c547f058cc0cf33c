//! Debug probe wire protocol.
//!
//! Layered bottom-up: a raw HID [`transport`], generic CMSIS-DAP
//! command/response framing in [`cmsis_dap`], and the EDBG vendor
//! sub-protocol in [`edbg`].

pub mod cmsis_dap;
pub mod edbg;
pub mod transport;

pub use cmsis_dap::{CmsisDapInterface, Command, Response};
#[cfg(feature = "hardware")]
pub use transport::HidApiTransport;
pub use transport::{HidTransport, MockHidTransport};
