//! Per-family address maps of the supported LEON SoCs.

use std::fmt;
use std::str::FromStr;

/// The processor family a probe session is attached to.
///
/// Chosen at open time (or auto-detected from the AHB plug&play area)
/// and fixed for the lifetime of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Leon3,
    Leon4,
}

impl Family {
    /// Number of processor cores in this family's reference SoC.
    pub fn core_count(self) -> u32 {
        match self {
            Family::Leon3 => 2,
            Family::Leon4 => 4,
        }
    }

    pub fn map(self) -> &'static AddressMap {
        match self {
            Family::Leon3 => &LEON3,
            Family::Leon4 => &LEON4,
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Family::Leon3 => f.write_str("LEON3"),
            Family::Leon4 => f.write_str("LEON4"),
        }
    }
}

impl FromStr for Family {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "leon3" | "3" => Ok(Family::Leon3),
            "leon4" | "4" => Ok(Family::Leon4),
            other => Err(format!("unknown processor family '{other}'")),
        }
    }
}

/// Fixed physical addresses of the peripherals the monitor touches.
#[derive(Debug)]
pub struct AddressMap {
    pub sdram_start: u32,
    pub uart0_start: u32,
    pub dsu_start: u32,
    pub wake_state: u32,
}

static LEON3: AddressMap = AddressMap {
    sdram_start: 0x4000_0000,
    uart0_start: 0x8000_0100,
    dsu_start: 0x9000_0000,
    wake_state: 0x8000_0210,
};

static LEON4: AddressMap = AddressMap {
    sdram_start: 0x4000_0000,
    uart0_start: 0xFF90_0000,
    dsu_start: 0xE000_0000,
    wake_state: 0xFF90_4010,
};

/// UART0 register offsets, relative to [`AddressMap::uart0_start`].
pub const UART_STATUS: u32 = 0x4;
pub const UART_CTRL: u32 = 0x8;
pub const UART_FIFO: u32 = 0x10;

/// Base of the AHB plug&play configuration records.
pub const AHB_PNP: u32 = 0xFFFF_F000;

/// GRLIB device ids of the processors (and their DSUs) we can identify
/// in the plug&play area.
pub const DEV_GAISLER_LEON3: u32 = 0x003;
pub const DEV_GAISLER_LEON3DSU: u32 = 0x004;
pub const DEV_GAISLER_LEON4: u32 = 0x048;
pub const DEV_GAISLER_LEON4DSU: u32 = 0x049;
pub const DEV_GAISLER_LEON3FT: u32 = 0x053;

/// Extracts the device field from an AMBA plug&play identification word.
pub fn amba_pnp_device(id: u32) -> u32 {
    (id >> 12) & 0xFFF
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_maps() {
        assert_eq!(Family::Leon3.map().dsu_start, 0x9000_0000);
        assert_eq!(Family::Leon4.map().dsu_start, 0xE000_0000);
        assert_eq!(Family::Leon3.map().wake_state, 0x8000_0210);
        assert_eq!(Family::Leon4.map().uart0_start, 0xFF90_0000);
        assert_eq!(Family::Leon3.core_count(), 2);
        assert_eq!(Family::Leon4.core_count(), 4);
    }

    #[test]
    fn pnp_device_field() {
        // GAISLER LEON3FT identification word: vendor 0x01, device 0x053.
        assert_eq!(amba_pnp_device(0x0105_3000), DEV_GAISLER_LEON3FT);
    }
}
