//! Binding to the vendor D2XX driver.
//!
//! The monitor only ever talks to the FTDI chip through the
//! [`FtdiDriver`] trait, which mirrors the blocking byte-stream contract
//! of the vendor library. Production code uses [`D2xxDriver`]; the test
//! suite substitutes a scripted GR712 emulation.

use std::time::Duration;

use libftd2xx::{Ftdi, FtdiCommon};

use crate::error::TransportError;

pub use libftd2xx::BitMode;

pub type Result<T, E = TransportError> = std::result::Result<T, E>;

/// The blocking byte-stream contract of the vendor USB driver.
pub trait FtdiDriver: Send {
    fn reset(&mut self) -> Result<()>;
    fn purge_all(&mut self) -> Result<()>;
    fn set_usb_parameters(&mut self, transfer_size: u32) -> Result<()>;
    fn set_timeouts(&mut self, read: Duration, write: Duration) -> Result<()>;
    fn set_bit_mode(&mut self, mask: u8, mode: BitMode) -> Result<()>;
    fn queue_status(&mut self) -> Result<usize>;
    fn write(&mut self, buf: &[u8]) -> Result<usize>;
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;
    fn driver_version(&mut self) -> Result<String>;
    fn close(&mut self) -> Result<()>;

    /// Blocks while the chip settles after a bit-mode change.
    ///
    /// Removing this wait has been observed to cause sporadic run
    /// failures on real hardware.
    fn settle(&mut self, delay: Duration) {
        std::thread::sleep(delay);
    }
}

/// One entry of [`list_probes`].
#[derive(Debug, Clone)]
pub struct ProbeInfo {
    pub index: usize,
    pub description: String,
    pub serial: String,
    pub id: u32,
}

/// Enumerates all FTDI devices the driver can see.
pub fn list_probes() -> Result<Vec<ProbeInfo>> {
    let devices = libftd2xx::list_devices().map_err(TransportError::Driver)?;

    Ok(devices
        .into_iter()
        .enumerate()
        .map(|(index, dev)| ProbeInfo {
            index,
            description: dev.description,
            serial: dev.serial_number,
            id: (dev.vendor_id as u32) << 16 | dev.product_id as u32,
        })
        .collect())
}

/// Version of the D2XX library itself, for `--info`.
pub fn library_version() -> Result<String> {
    let v = libftd2xx::library_version().map_err(TransportError::Driver)?;
    Ok(format!("{}.{}.{}", v.major, v.minor, v.build))
}

/// [`FtdiDriver`] implemented on the vendor D2XX library.
pub struct D2xxDriver {
    ft: Ftdi,
}

impl D2xxDriver {
    pub fn open(index: usize) -> Result<Self> {
        let ft = Ftdi::with_index(index as i32).map_err(TransportError::Driver)?;
        Ok(Self { ft })
    }
}

impl FtdiDriver for D2xxDriver {
    fn reset(&mut self) -> Result<()> {
        self.ft.reset().map_err(TransportError::Driver)
    }

    fn purge_all(&mut self) -> Result<()> {
        self.ft.purge_all().map_err(TransportError::Driver)
    }

    fn set_usb_parameters(&mut self, transfer_size: u32) -> Result<()> {
        self.ft
            .set_usb_parameters(transfer_size)
            .map_err(TransportError::Driver)
    }

    fn set_timeouts(&mut self, read: Duration, write: Duration) -> Result<()> {
        self.ft
            .set_timeouts(read, write)
            .map_err(TransportError::Driver)
    }

    fn set_bit_mode(&mut self, mask: u8, mode: BitMode) -> Result<()> {
        self.ft
            .set_bit_mode(mask, mode)
            .map_err(TransportError::Driver)
    }

    fn queue_status(&mut self) -> Result<usize> {
        self.ft.queue_status().map_err(TransportError::Driver)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.ft.write(buf).map_err(TransportError::Driver)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.ft.read(buf).map_err(TransportError::Driver)
    }

    fn driver_version(&mut self) -> Result<String> {
        let v = self.ft.driver_version().map_err(TransportError::Driver)?;
        Ok(format!("{}.{}.{}", v.major, v.minor, v.build))
    }

    fn close(&mut self) -> Result<()> {
        self.ft.close().map_err(TransportError::Driver)
    }
}
