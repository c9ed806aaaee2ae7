//! JTAG TAP driving: encodes state-machine walks and register shifts as
//! MPSSE command bytes, and implements the chain scans used at startup.
//!
//! All TMS walk patterns are shifted LSB first, with the TDI level for
//! the walk held in bit 7 of the data byte.

use crate::error::TransportError;
use crate::probe::Probe;

const CLOCK_TMS_OUT: u8 = 0x4B;
const CLOCK_BITS_OUT: u8 = 0x1B;
const CLOCK_BITS_OUT_READ: u8 = 0x3B;
const CLOCK_BITS_IN: u8 = 0x2A;
const CLOCK_BYTES_OUT: u8 = 0x19;
const CLOCK_BYTES_IN: u8 = 0x28;
const CLOCK_ONLY: u8 = 0x8E;

/// Longest chain walk any scan attempts before giving up.
const SCAN_LIMIT: usize = 100;

/// Resets the TAP to Test-Logic-Reset with five TMS-high clocks.
///
/// Issued on its own so it can bracket every bridge operation without
/// touching a partially built command buffer.
pub fn reset(probe: &mut Probe) -> Result<(), TransportError> {
    probe.send(&[CLOCK_TMS_OUT, 0x04, 0b0011_1111])
}

/// An MPSSE command buffer under construction, tracking how many reply
/// bytes the queued commands will produce.
///
/// The caller flushes it with [`Probe::send`] and collects replies with
/// [`Probe::recv_exactly`].
#[derive(Debug, Default)]
pub(crate) struct TapCommands {
    buf: Vec<u8>,
    expect: usize,
}

impl TapCommands {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Reply bytes the queued commands will generate.
    pub fn reply_len(&self) -> usize {
        self.expect
    }

    /// Five TMS-high clocks into Test-Logic-Reset.
    pub fn reset_to_tlr(&mut self) {
        self.buf
            .extend_from_slice(&[CLOCK_TMS_OUT, 0x04, 0b0011_1111]);
    }

    /// TLR → Run-Test/Idle → Select-DR → Select-IR → Capture-IR →
    /// Shift-IR (TMS pattern `011 00`, six clocks).
    pub fn tlr_to_shift_ir(&mut self) {
        self.buf
            .extend_from_slice(&[CLOCK_TMS_OUT, 0x05, 0b0000_1101]);
    }

    /// TLR → Run-Test/Idle → Select-DR → Capture-DR → Shift-DR
    /// (five clocks; TLR tolerates the leading TMS-high one).
    pub fn tlr_to_shift_dr(&mut self) {
        self.buf
            .extend_from_slice(&[CLOCK_TMS_OUT, 0x04, 0b0000_0101]);
    }

    /// Exit1 → Update → Select-DR → Capture-DR → Shift-DR (TMS `1100`).
    /// Valid after leaving either Shift-IR or Shift-DR; also the loop
    /// edge between burst-write words.
    pub fn exit1_to_shift_dr(&mut self) {
        self.buf
            .extend_from_slice(&[CLOCK_TMS_OUT, 0x03, 0b0000_0011]);
    }

    /// Exit1-DR → Update-DR → Select-DR → Select-IR → Capture-IR →
    /// Shift-IR (TMS `11100`).
    pub fn exit1_dr_to_shift_ir(&mut self) {
        self.buf
            .extend_from_slice(&[CLOCK_TMS_OUT, 0x04, 0b0000_0111]);
    }

    /// Burst-read loop edge: leaves Shift-DR with TDI high (setting the
    /// SEQ bit as the 33rd shifted bit), runs through Update-DR to latch
    /// it, and re-enters Shift-DR.
    pub fn continue_burst_read(&mut self) {
        self.buf
            .extend_from_slice(&[CLOCK_TMS_OUT, 0x04, 0b1000_0111]);
    }

    /// Shifts a 6-bit IR opcode: five data bits first, then the sixth
    /// clocked together with the TMS edge into Exit1-IR (the opcode's
    /// top bit rides in bit 7 as the held TDI level).
    pub fn shift_ir_opcode(&mut self, opcode: u8) {
        self.buf.extend_from_slice(&[CLOCK_BITS_OUT, 0x04, opcode]);
        self.buf
            .extend_from_slice(&[CLOCK_TMS_OUT, 0x00, (opcode << 2) | 1]);
    }

    /// Shifts whole bytes out on TDI, LSB first, without readback.
    pub fn shift_bytes(&mut self, data: &[u8]) {
        debug_assert!(!data.is_empty() && data.len() <= 0x1_0000);
        let [lo, hi] = (data.len() as u16 - 1).to_le_bytes();
        self.buf.extend_from_slice(&[CLOCK_BYTES_OUT, lo, hi]);
        self.buf.extend_from_slice(data);
    }

    pub fn shift_zero_bytes(&mut self, n: usize) {
        let zeros = [0u8; 16];
        self.shift_bytes(&zeros[..n]);
    }

    /// Shifts up to 8 bits out on TDI, LSB first, without readback.
    pub fn shift_bits(&mut self, count: u8, bits: u8) {
        debug_assert!((1..=8).contains(&count));
        self.buf
            .extend_from_slice(&[CLOCK_BITS_OUT, count - 1, bits]);
    }

    /// Shifts up to 8 bits out while capturing TDO. One reply byte.
    pub fn shift_bits_read(&mut self, count: u8, bits: u8) {
        debug_assert!((1..=8).contains(&count));
        self.buf
            .extend_from_slice(&[CLOCK_BITS_OUT_READ, count - 1, bits]);
        self.expect += 1;
    }

    /// Clocks `count` bits in from TDO without driving TDI. One reply byte.
    pub fn read_bits(&mut self, count: u8) {
        debug_assert!((1..=8).contains(&count));
        self.buf.extend_from_slice(&[CLOCK_BITS_IN, count - 1]);
        self.expect += 1;
    }

    /// Clocks `n` whole bytes in from TDO. `n` reply bytes.
    pub fn read_bytes(&mut self, n: usize) {
        debug_assert!(n >= 1);
        let [lo, hi] = (n as u16 - 1).to_le_bytes();
        self.buf.extend_from_slice(&[CLOCK_BYTES_IN, lo, hi]);
        self.expect += n;
    }

    /// Clocks the final payload bit together with a TMS-high edge,
    /// leaving Shift-IR/DR into Exit1 in the same cycle. `tdi` is the
    /// bit value (the R/W or SEQ flag of the GR712 scans).
    pub fn exit_shift(&mut self, tdi: bool) {
        let data = if tdi { 0b1000_0001 } else { 0b0000_0001 };
        self.buf.extend_from_slice(&[CLOCK_TMS_OUT, 0x00, data]);
    }

    /// Eight idle TCK cycles. Required between blanking the command
    /// register and loading it; omitting them produces sporadic garbage
    /// reads.
    pub fn settle_clocks(&mut self) {
        self.buf.extend_from_slice(&[CLOCK_ONLY, 0x07]);
    }
}

/// Walks ones through the bypass chain and counts the devices on it.
///
/// Every TAP is first put into BYPASS by filling the IR with ones; each
/// device then contributes one flip-flop to the chain, so the position
/// at which the first injected one re-appears is the device count.
/// Returns 0 when nothing comes back within the scan limit.
pub fn device_count(probe: &mut Probe) -> Result<u8, TransportError> {
    reset(probe)?;

    let mut cmd = TapCommands::new();
    cmd.tlr_to_shift_ir();
    cmd.shift_bits(7, 0xFF);
    cmd.exit_shift(true);
    cmd.exit1_to_shift_dr();
    for _ in 0..10 {
        cmd.shift_bits(8, 0x00);
    }
    cmd.read_bits(8);
    probe.send(cmd.bytes())?;
    probe.drain()?;

    let count = walk_ones_until_echo(probe)?;
    reset(probe)?;
    Ok(count)
}

/// Measures the IR length by flushing it with zeros and walking ones
/// through until the first one falls out.
pub fn scan_ir_length(probe: &mut Probe) -> Result<u8, TransportError> {
    reset(probe)?;

    let mut cmd = TapCommands::new();
    cmd.tlr_to_shift_ir();
    cmd.shift_bits(8, 0x00);
    cmd.read_bits(8);
    probe.send(cmd.bytes())?;
    probe.drain()?;

    let length = walk_ones_until_echo(probe)?;
    reset(probe)?;
    Ok(length)
}

/// Measures the data register length behind `opcode` the same way.
pub fn scan_dr_length(probe: &mut Probe, opcode: u8) -> Result<u8, TransportError> {
    reset(probe)?;

    let mut cmd = TapCommands::new();
    cmd.tlr_to_shift_ir();
    cmd.shift_ir_opcode(opcode);
    cmd.exit1_to_shift_dr();
    cmd.shift_zero_bytes(10);
    cmd.read_bits(8);
    probe.send(cmd.bytes())?;
    probe.drain()?;

    let length = walk_ones_until_echo(probe)?;
    reset(probe)?;
    Ok(length)
}

/// Reads the 32-bit IDCODE selected by Test-Logic-Reset.
pub fn read_idcode(probe: &mut Probe) -> Result<u32, TransportError> {
    reset(probe)?;

    let mut cmd = TapCommands::new();
    cmd.tlr_to_shift_dr();
    cmd.read_bytes(4);
    probe.send(cmd.bytes())?;

    let reply = probe.recv_exactly(cmd.reply_len())?;
    let id = u32::from_le_bytes([reply[0], reply[1], reply[2], reply[3]]);

    reset(probe)?;
    Ok(id)
}

/// Sweeps the whole IR opcode space and reports every opcode whose data
/// register scans with a non-zero length.
pub fn scan_opcodes(probe: &mut Probe, ir_length: u8) -> Result<Vec<(u8, u8)>, TransportError> {
    let max_opcode = (1u16 << ir_length) - 1;

    let mut found = Vec::new();
    for opcode in 0..=max_opcode as u8 {
        let length = scan_dr_length(probe, opcode)?;
        if length != 0 {
            found.push((opcode, length));
        }
    }
    Ok(found)
}

/// Shifts single ones with readback until one comes back out, returning
/// how many clocks that took. 0 means the scan limit was hit.
fn walk_ones_until_echo(probe: &mut Probe) -> Result<u8, TransportError> {
    for i in 0..SCAN_LIMIT {
        probe.send(&[CLOCK_BITS_OUT_READ, 0x00, 0xFF])?;
        let reply = probe.drain()?;
        if reply.first().is_some_and(|b| *b != 0) {
            return Ok(i as u8);
        }
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::mock::MockFtdi;

    fn probe() -> Probe {
        Probe::attach(Box::new(MockFtdi::new())).unwrap()
    }

    #[test]
    fn command_buffer_encoding() {
        let mut cmd = TapCommands::new();
        cmd.reset_to_tlr();
        cmd.tlr_to_shift_ir();
        cmd.shift_ir_opcode(0x02);
        assert_eq!(
            cmd.bytes(),
            [0x4B, 0x04, 0x3F, 0x4B, 0x05, 0x0D, 0x1B, 0x04, 0x02, 0x4B, 0x00, 0x09]
        );
        assert_eq!(cmd.reply_len(), 0);

        let mut cmd = TapCommands::new();
        cmd.read_bytes(4);
        cmd.read_bits(8);
        assert_eq!(cmd.bytes(), [0x28, 0x03, 0x00, 0x2A, 0x07]);
        assert_eq!(cmd.reply_len(), 5);
    }

    #[test]
    fn chain_has_one_device() {
        let mut probe = probe();
        assert_eq!(device_count(&mut probe).unwrap(), 1);
    }

    #[test]
    fn ir_is_six_bits() {
        let mut probe = probe();
        assert_eq!(scan_ir_length(&mut probe).unwrap(), 6);
    }

    #[test]
    fn gr712_register_lengths() {
        let mut probe = probe();
        assert_eq!(scan_dr_length(&mut probe, 0x02).unwrap(), 35);
        assert_eq!(scan_dr_length(&mut probe, 0x03).unwrap(), 33);
        // Anything else sits behind a 1-bit bypass register.
        assert_eq!(scan_dr_length(&mut probe, 0x3F).unwrap(), 1);
    }

    #[test]
    fn idcode_reads_nonzero() {
        let mut probe = probe();
        assert_eq!(read_idcode(&mut probe).unwrap(), crate::probe::mock::IDCODE);
    }
}
