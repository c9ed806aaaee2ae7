//! FT2232H probe handling: device bring-up and the MPSSE byte transport.

pub mod driver;
#[cfg(test)]
pub(crate) mod mock;

use std::time::{Duration, Instant};

use crate::error::{Error, TransportError};

pub use driver::{list_probes, library_version, D2xxDriver, FtdiDriver, ProbeInfo};

/// MPSSE configuration opcodes used during bring-up.
///
/// See FTDI AN-108, "Command Processor for MPSSE and MCU Host Bus
/// Emulation Modes".
pub(crate) mod mpsse {
    pub const SET_BITS_LOW: u8 = 0x80;
    pub const SET_BITS_HIGH: u8 = 0x82;
    pub const ENABLE_LOOPBACK: u8 = 0x84;
    pub const DISABLE_LOOPBACK: u8 = 0x85;
    pub const SET_TCK_DIVISOR: u8 = 0x86;
    pub const DISABLE_DIVIDE_BY_5: u8 = 0x8A;
    pub const DISABLE_THREE_PHASE: u8 = 0x8D;
    pub const DISABLE_ADAPTIVE_CLOCK: u8 = 0x97;

    /// Any unassigned opcode makes the MPSSE respond `FA <opcode>`; this
    /// one is used to synchronise the command stream at bring-up.
    pub const BOGUS: u8 = 0xAB;
    pub const BAD_COMMAND: u8 = 0xFA;
}

/// TCK = 60 MHz / ((1 + divisor) * 2) = ~6 MHz.
const TCK_DIVISOR: u16 = 0x0004;

/// Low-byte pin setup: TCK/TDI/TMS outputs, TDO input, TMS initially high.
const PIN_STATE: u8 = 0b0000_1000;
const PIN_DIRECTION: u8 = 0b0000_1011;

const USB_TRANSFER_SIZE: u32 = 16 * 1024;
const USB_TIMEOUT: Duration = Duration::from_millis(10);

/// An FT2232H channel configured for MPSSE, owning the driver handle.
///
/// All target I/O of a session funnels through one `Probe`; the `&mut`
/// receiver on every method is what serialises it.
pub struct Probe {
    driver: Box<dyn FtdiDriver>,
    closed: bool,
}

impl Probe {
    /// Opens the device at `index` through the D2XX driver and brings it
    /// into MPSSE mode.
    pub fn open(index: usize) -> Result<Self, Error> {
        let driver = D2xxDriver::open(index).map_err(|source| Error::Open {
            stage: "device open",
            source,
        })?;
        Self::attach(Box::new(driver))
    }

    /// Runs the MPSSE bring-up sequence on an already opened driver.
    pub fn attach(driver: Box<dyn FtdiDriver>) -> Result<Self, Error> {
        let mut probe = Probe {
            driver,
            closed: false,
        };

        if let Err(source) = probe.init_mpsse() {
            let stage = source.1;
            let _ = probe.driver.set_bit_mode(0, driver::BitMode::Reset);
            let _ = probe.driver.close();
            probe.closed = true;
            return Err(Error::Open {
                stage,
                source: source.0,
            });
        }

        Ok(probe)
    }

    fn init_mpsse(&mut self) -> Result<(), (TransportError, &'static str)> {
        let stage = |s: &'static str| move |e: TransportError| (e, s);

        tracing::debug!("configuring FTDI port for MPSSE");
        self.driver.reset().map_err(stage("device reset"))?;
        self.driver
            .set_usb_parameters(USB_TRANSFER_SIZE)
            .map_err(stage("USB transfer size"))?;
        self.driver.purge_all().map_err(stage("buffer purge"))?;
        self.driver
            .set_timeouts(USB_TIMEOUT, USB_TIMEOUT)
            .map_err(stage("timeout setup"))?;
        self.driver
            .set_bit_mode(0, driver::BitMode::Reset)
            .map_err(stage("bit-mode reset"))?;
        self.driver
            .set_bit_mode(0, driver::BitMode::Mpsse)
            .map_err(stage("MPSSE enable"))?;

        // The chip needs this long after the bit-mode switch before the
        // command processor behaves. Do not shorten it.
        self.driver.settle(Duration::from_secs(1));

        self.synchronize().map_err(stage("MPSSE synchronisation"))?;

        // High-speed setup: 60 MHz master clock, no adaptive clocking,
        // no three-phase clocking.
        self.send(&[
            mpsse::DISABLE_DIVIDE_BY_5,
            mpsse::DISABLE_ADAPTIVE_CLOCK,
            mpsse::DISABLE_THREE_PHASE,
        ])
        .map_err(stage("clock mode setup"))?;

        let [div_lo, div_hi] = TCK_DIVISOR.to_le_bytes();
        self.send(&[mpsse::SET_TCK_DIVISOR, div_lo, div_hi])
            .map_err(stage("TCK divisor"))?;

        self.send(&[mpsse::SET_BITS_LOW, PIN_STATE, PIN_DIRECTION])
            .map_err(stage("pin directions"))?;
        self.send(&[mpsse::SET_BITS_HIGH, 0x00, 0x00])
            .map_err(stage("pin directions"))?;

        tracing::debug!("MPSSE configured, TCK divisor {TCK_DIVISOR:#06x}");
        Ok(())
    }

    /// Loopback self-test: a bogus opcode must echo back `FA AB`, and the
    /// receive queue must be empty on either side of it.
    fn synchronize(&mut self) -> Result<(), TransportError> {
        self.send(&[mpsse::ENABLE_LOOPBACK])?;
        if self.driver.queue_status()? != 0 {
            return Err(TransportError::QueueNotEmpty("after enabling loopback"));
        }

        self.send(&[mpsse::BOGUS])?;
        let reply = self.drain()?;
        let echoed = reply
            .windows(2)
            .any(|w| w == [mpsse::BAD_COMMAND, mpsse::BOGUS]);
        if !echoed {
            tracing::warn!("unexpected sync reply: {reply:02X?}");
            return Err(TransportError::SyncFailed);
        }

        self.send(&[mpsse::DISABLE_LOOPBACK])?;
        if self.driver.queue_status()? != 0 {
            return Err(TransportError::QueueNotEmpty("after disabling loopback"));
        }

        Ok(())
    }

    /// Writes one MPSSE command buffer, whole or not at all.
    pub fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        tracing::trace!("MPSSE out: {bytes:02X?}");
        let sent = self.driver.write(bytes)?;
        if sent != bytes.len() {
            return Err(TransportError::ShortWrite {
                expected: bytes.len(),
                sent,
            });
        }
        Ok(())
    }

    /// Reads exactly `n` bytes from the receive queue, polling until they
    /// arrive or the USB timeout expires with no progress.
    pub fn recv_exactly(&mut self, n: usize) -> Result<Vec<u8>, TransportError> {
        let mut buf = vec![0u8; n];
        let mut filled = 0;
        let mut t0 = Instant::now();

        while filled < n {
            if self.driver.queue_status()? == 0 {
                if t0.elapsed() > USB_TIMEOUT {
                    tracing::warn!("read {filled} of {n} expected bytes");
                    return Err(TransportError::Timeout);
                }
                continue;
            }

            let read = self.driver.read(&mut buf[filled..])?;
            if read > 0 {
                t0 = Instant::now();
            }
            filled += read;
        }

        tracing::trace!("MPSSE in: {buf:02X?}");
        Ok(buf)
    }

    /// Reads whatever the receive queue holds, waiting for at least one
    /// byte. Used to flush scan responses whose content is irrelevant.
    pub fn drain(&mut self) -> Result<Vec<u8>, TransportError> {
        let t0 = Instant::now();

        loop {
            let available = self.driver.queue_status()?;
            if available > 0 {
                let mut buf = vec![0u8; available];
                let read = self.driver.read(&mut buf)?;
                if read != available {
                    return Err(TransportError::ShortRead {
                        expected: available,
                        received: read,
                    });
                }
                return Ok(buf);
            }
            if t0.elapsed() > USB_TIMEOUT {
                return Err(TransportError::Timeout);
            }
        }
    }

    pub fn driver_version(&mut self) -> Result<String, TransportError> {
        self.driver.driver_version()
    }

    /// Puts the chip back into its reset state and closes the handle.
    /// Safe to call more than once.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self.driver.set_bit_mode(0, driver::BitMode::Reset);
        let _ = self.driver.reset();
        let _ = self.driver.close();
    }
}

impl Drop for Probe {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Probe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Probe")
            .field("closed", &self.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::mock::MockFtdi;

    #[test]
    fn bring_up_configures_mpsse() {
        let mock = MockFtdi::new();
        let handle = mock.target();
        let _probe = Probe::attach(Box::new(mock)).unwrap();

        let target = handle.lock().unwrap();
        assert!(!target.loopback, "loopback must be off after bring-up");
        assert_eq!(target.tck_divisor, Some(0x0004));
        assert_eq!(target.low_pins, Some((0b0000_1000, 0b0000_1011)));
    }

    #[test]
    fn short_write_is_an_error() {
        let mut mock = MockFtdi::new();
        mock.clamp_writes_to(2);
        let mut probe = Probe {
            driver: Box::new(mock),
            closed: false,
        };

        match probe.send(&[0x19, 0x00, 0x00, 0xAA]) {
            Err(TransportError::ShortWrite { expected: 4, sent: 2 }) => {}
            other => panic!("expected short write, got {other:?}"),
        }
    }
}
