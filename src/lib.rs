//! Debug monitor library for LEON3/LEON4 (GR712RC-class) SPARC-V8 targets.
//!
//! The monitor talks to the on-chip debug link of a GR712 through an FTDI
//! FT2232H in MPSSE mode. It is built from four layers, each strictly on
//! top of the one below:
//!
//! * [`probe`] owns the FTDI handle and the MPSSE configuration,
//! * [`tap`] encodes JTAG TAP state walks and register shifts as MPSSE
//!   byte streams,
//! * [`bridge`] implements the GR712 AHB debug protocol (35-bit
//!   command/address and 33-bit data scans, single and SEQ burst
//!   transfers),
//! * [`dsu`] maps the Debug Support Unit register file of each core
//!   into typed operations and drives the CPU run state machine.
//!
//! [`Monitor`] ties the layers into one session per probe and is what the
//! interactive console drives.

pub mod bridge;
pub mod disasm;
pub mod dsu;
mod error;
pub mod map;
pub mod monitor;
pub mod probe;
pub mod regs;
pub mod tap;
pub mod trap;

pub use crate::error::{ChainError, Error, TransportError};
pub use crate::map::{AddressMap, Family};
pub use crate::monitor::{ChainInfo, Monitor};
pub use crate::trap::TrapCode;
