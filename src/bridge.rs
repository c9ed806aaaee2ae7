//! The GR712 AHB debug bridge: arbitrary-width bus access layered over
//! two JTAG data registers.
//!
//! The 35-bit command/address register (`addr[31:0] || size[1:0] || rw`)
//! selects what happens; the 33-bit data register (`data[31:0] || seq`)
//! carries the payload. With the SEQ bit set the bridge auto-increments
//! the address between data scans, which is what burst transfers build
//! on. The bridge itself never retries; transport failures propagate and
//! the TAP is reset on every exit path.

use crate::error::TransportError;
use crate::probe::Probe;
use crate::tap::{self, TapCommands};

/// IR opcode selecting the 35-bit command/address register.
pub const IR_COMMAND: u8 = 0x02;
/// IR opcode selecting the 33-bit data register.
pub const IR_DATA: u8 = 0x03;

const SIZE_BYTE: u8 = 0b00;
const SIZE_HALF: u8 = 0b01;
const SIZE_WORD: u8 = 0b10;

/// A SEQ burst must not cross a 1 KiB boundary (GR712RC-UM), so chunked
/// transfers are capped at 256 words per raw burst.
pub const BURST_WORDS: usize = 256;

/// Per-chunk progress callback: (words done, words total).
pub type Progress<'a> = &'a mut dyn FnMut(usize, usize);

pub struct AhbBridge {
    probe: Probe,
}

impl AhbBridge {
    pub fn new(probe: Probe) -> Self {
        Self { probe }
    }

    /// Direct probe access for the startup chain scans.
    pub fn probe_mut(&mut self) -> &mut Probe {
        &mut self.probe
    }

    /// Runs `op` between two TAP resets, so the state machine is back in
    /// Test-Logic-Reset no matter how `op` leaves.
    fn scanned<T>(
        &mut self,
        op: impl FnOnce(&mut Self) -> Result<T, TransportError>,
    ) -> Result<T, TransportError> {
        tap::reset(&mut self.probe)?;
        let result = op(self);
        match tap::reset(&mut self.probe) {
            Ok(()) => result,
            Err(reset_err) => result.and(Err(reset_err)),
        }
    }

    /// Queues the IR/DR walk that loads the command/address register.
    ///
    /// On reads the register is first blanked with zero bytes and given
    /// eight idle clocks to settle; skipping that produces sporadic
    /// garbage data.
    fn load_command(cmd: &mut TapCommands, addr: u32, size: u8, write: bool) {
        cmd.tlr_to_shift_ir();
        cmd.shift_ir_opcode(IR_COMMAND);
        cmd.exit1_to_shift_dr();
        if !write {
            cmd.shift_zero_bytes(6);
            cmd.settle_clocks();
        }
        cmd.shift_bytes(&addr.to_le_bytes());
        cmd.shift_bits(2, size);
        cmd.exit_shift(write);
    }

    /// Queues the walk from Exit1-DR into the data register's Shift-DR.
    fn select_data_register(cmd: &mut TapCommands) {
        cmd.exit1_dr_to_shift_ir();
        cmd.shift_ir_opcode(IR_DATA);
        cmd.exit1_to_shift_dr();
    }

    /// Reads the 32-bit word containing `addr`.
    pub fn read32(&mut self, addr: u32) -> Result<u32, TransportError> {
        self.scanned(|bridge| {
            let mut cmd = TapCommands::new();
            Self::load_command(&mut cmd, addr, SIZE_WORD, false);
            Self::select_data_register(&mut cmd);
            // 32 payload bits only; the SEQ bit stays in the register.
            cmd.read_bytes(4);

            bridge.probe.send(cmd.bytes())?;
            let reply = bridge.probe.recv_exactly(cmd.reply_len())?;
            Ok(u32::from_le_bytes([reply[0], reply[1], reply[2], reply[3]]))
        })
    }

    /// Reads the halfword at `addr`. Bus lanes are big-endian: the lower
    /// address holds the upper halfword.
    pub fn read16(&mut self, addr: u32) -> Result<u16, TransportError> {
        let word = self.read32(addr)?;
        Ok((word >> half_lane_shift(addr)) as u16)
    }

    /// Reads the byte at `addr` (big-endian lane selection).
    pub fn read8(&mut self, addr: u32) -> Result<u8, TransportError> {
        let word = self.read32(addr)?;
        Ok((word >> byte_lane_shift(addr)) as u8)
    }

    fn write(&mut self, addr: u32, size: u8, word: u32) -> Result<(), TransportError> {
        self.scanned(|bridge| {
            let mut cmd = TapCommands::new();
            Self::load_command(&mut cmd, addr, size, true);
            Self::select_data_register(&mut cmd);
            cmd.shift_bytes(&word.to_le_bytes());
            // SEQ = 0: a single transfer.
            cmd.exit_shift(false);

            bridge.probe.send(cmd.bytes())
        })
    }

    pub fn write32(&mut self, addr: u32, value: u32) -> Result<(), TransportError> {
        self.write(addr, SIZE_WORD, value)
    }

    /// Writes a halfword; the value travels in the bus lane selected by
    /// the low address bits, other lanes zero-filled.
    pub fn write16(&mut self, addr: u32, value: u16) -> Result<(), TransportError> {
        self.write(addr, SIZE_HALF, (value as u32) << half_lane_shift(addr))
    }

    pub fn write8(&mut self, addr: u32, value: u8) -> Result<(), TransportError> {
        self.write(addr, SIZE_BYTE, (value as u32) << byte_lane_shift(addr))
    }

    /// One raw SEQ write burst, at most [`BURST_WORDS`] words.
    ///
    /// The command register is loaded once; every data scan then exits
    /// Shift-DR with SEQ high and loops straight back through Update-DR,
    /// letting the bridge advance the address itself. Resetting the TAP
    /// between words would clock out a spurious extra data point, so the
    /// loop edge is the short `1100` walk.
    fn write_burst(&mut self, addr: u32, words: &[u32]) -> Result<(), TransportError> {
        debug_assert!(!words.is_empty() && words.len() <= BURST_WORDS);

        self.scanned(|bridge| {
            let mut cmd = TapCommands::new();
            Self::load_command(&mut cmd, addr, SIZE_WORD, true);
            Self::select_data_register(&mut cmd);
            for (i, word) in words.iter().enumerate() {
                cmd.shift_bytes(&word.to_le_bytes());
                cmd.exit_shift(true);
                if i + 1 < words.len() {
                    cmd.exit1_to_shift_dr();
                }
            }

            bridge.probe.send(cmd.bytes())
        })
    }

    /// One raw SEQ read burst, at most [`BURST_WORDS`] words.
    fn read_burst(&mut self, addr: u32, out: &mut [u32]) -> Result<(), TransportError> {
        debug_assert!(!out.is_empty() && out.len() <= BURST_WORDS);

        self.scanned(|bridge| {
            let mut cmd = TapCommands::new();
            Self::load_command(&mut cmd, addr, SIZE_WORD, false);
            Self::select_data_register(&mut cmd);
            bridge.probe.send(cmd.bytes())?;

            let last = out.len() - 1;
            for (i, slot) in out.iter_mut().enumerate() {
                let mut word = TapCommands::new();
                word.read_bytes(4);
                if i < last {
                    word.continue_burst_read();
                }
                bridge.probe.send(word.bytes())?;
                let reply = bridge.probe.recv_exactly(word.reply_len())?;
                *slot = u32::from_le_bytes([reply[0], reply[1], reply[2], reply[3]]);
            }
            Ok(())
        })
    }

    /// Reads `count` words starting at `addr`, splitting into 1 KiB
    /// bursts. `progress` is invoked after each chunk.
    pub fn read_many_with_progress(
        &mut self,
        addr: u32,
        count: usize,
        progress: Progress<'_>,
    ) -> Result<Vec<u32>, TransportError> {
        let mut data = vec![0u32; count];
        let mut done = 0;

        while done < count {
            let chunk = (count - done).min(BURST_WORDS);
            self.read_burst(addr + (done * 4) as u32, &mut data[done..done + chunk])?;
            done += chunk;
            progress(done, count);
        }

        Ok(data)
    }

    pub fn read_many(&mut self, addr: u32, count: usize) -> Result<Vec<u32>, TransportError> {
        self.read_many_with_progress(addr, count, &mut |_, _| {})
    }

    /// Writes `words` starting at `addr`, splitting into 1 KiB bursts.
    pub fn write_many_with_progress(
        &mut self,
        addr: u32,
        words: &[u32],
        progress: Progress<'_>,
    ) -> Result<(), TransportError> {
        let mut done = 0;

        while done < words.len() {
            let chunk = (words.len() - done).min(BURST_WORDS);
            self.write_burst(addr + (done * 4) as u32, &words[done..done + chunk])?;
            done += chunk;
            progress(done, words.len());
        }

        Ok(())
    }

    pub fn write_many(&mut self, addr: u32, words: &[u32]) -> Result<(), TransportError> {
        self.write_many_with_progress(addr, words, &mut |_, _| {})
    }
}

/// Shift amount that moves the addressed byte into (or out of) its bus
/// lane: offset 0 is the most significant byte.
fn byte_lane_shift(addr: u32) -> u32 {
    8 * (3 - (addr & 3))
}

/// Shift amount for the halfword lane: offsets 0 and 1 address the upper
/// half of the word.
fn half_lane_shift(addr: u32) -> u32 {
    if addr & 3 < 2 { 16 } else { 0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::mock::{Gr712Target, MockFtdi, IDCODE};
    use crate::probe::Probe;
    use crate::tap;
    use std::sync::{Arc, Mutex};

    fn bridge() -> (AhbBridge, Arc<Mutex<Gr712Target>>) {
        let mock = MockFtdi::new();
        let target = mock.target();
        let probe = Probe::attach(Box::new(mock)).unwrap();
        (AhbBridge::new(probe), target)
    }

    #[test]
    fn word_round_trip() {
        let (mut bridge, _) = bridge();
        for value in [0u32, !0, 0x5555_5555, 0xAAAA_AAAA, 0xDEAD_BEEF] {
            bridge.write32(0x4000_0000, value).unwrap();
            assert_eq!(bridge.read32(0x4000_0000).unwrap(), value);
        }
    }

    #[test]
    fn byte_lanes_are_big_endian() {
        let (mut bridge, target) = bridge();
        bridge.write32(0x4000_0000, 0x1122_3344).unwrap();

        assert_eq!(bridge.read8(0x4000_0000).unwrap(), 0x11);
        assert_eq!(bridge.read8(0x4000_0001).unwrap(), 0x22);
        assert_eq!(bridge.read8(0x4000_0002).unwrap(), 0x33);
        assert_eq!(bridge.read8(0x4000_0003).unwrap(), 0x44);

        bridge.write8(0x4000_0001, 0x42).unwrap();
        assert_eq!(bridge.read8(0x4000_0001).unwrap(), 0x42);
        assert_eq!(
            target.lock().unwrap().word(0x4000_0000),
            0x1142_3344,
            "byte write must only touch its own lane"
        );
    }

    #[test]
    fn byte_round_trip_every_lane() {
        let (mut bridge, _) = bridge();
        for offset in 0..4 {
            let addr = 0x4000_0010 + offset;
            bridge.write8(addr, 0xA0 | offset as u8).unwrap();
            assert_eq!(bridge.read8(addr).unwrap(), 0xA0 | offset as u8);
        }
    }

    #[test]
    fn halfword_round_trip_both_lanes() {
        let (mut bridge, target) = bridge();
        bridge.write16(0x4000_0020, 0xBEEF).unwrap();
        bridge.write16(0x4000_0022, 0xCAFE).unwrap();

        assert_eq!(bridge.read16(0x4000_0020).unwrap(), 0xBEEF);
        assert_eq!(bridge.read16(0x4000_0022).unwrap(), 0xCAFE);
        assert_eq!(target.lock().unwrap().word(0x4000_0020), 0xBEEF_CAFE);
    }

    #[test]
    fn seq_burst_round_trip() {
        let (mut bridge, _) = bridge();
        let words: Vec<u32> = (0..256u32).map(|i| 0x1000_0000 | i).collect();

        bridge.write_many(0x4000_0000, &words).unwrap();
        let back = bridge.read_many(0x4000_0000, words.len()).unwrap();
        assert_eq!(back, words);
    }

    #[test]
    fn chunked_write_splits_at_1k_boundaries() {
        let (mut bridge, target) = bridge();
        let words: Vec<u32> = (0..300u32).map(|i| i * 3).collect();

        target.lock().unwrap().command_loads.clear();
        bridge.write_many(0x4000_0000, &words).unwrap();

        {
            let target = target.lock().unwrap();
            let loads: Vec<(u32, bool)> = target
                .command_loads
                .iter()
                .copied()
                .filter(|(_, write)| *write)
                .collect();
            assert_eq!(loads, [(0x4000_0000, true), (0x4000_0400, true)]);
            assert_eq!(target.word(0x4000_0000 + 299 * 4), 299 * 3);
        }

        let back = bridge.read_many(0x4000_0000, 300).unwrap();
        assert_eq!(back, words);
    }

    #[test]
    fn chunked_read_splits_at_1k_boundaries() {
        let (mut bridge, target) = bridge();
        {
            let mut target = target.lock().unwrap();
            for i in 0..520u32 {
                target.set_word(0x4000_0000 + i * 4, !i);
            }
            target.command_loads.clear();
        }

        let mut calls = Vec::new();
        let data = bridge
            .read_many_with_progress(0x4000_0000, 520, &mut |done, total| {
                calls.push((done, total))
            })
            .unwrap();

        assert_eq!(data.len(), 520);
        assert!(data.iter().enumerate().all(|(i, w)| *w == !(i as u32)));
        assert_eq!(calls, [(256, 520), (512, 520), (520, 520)]);

        let target = target.lock().unwrap();
        let bases: Vec<u32> = target.command_loads.iter().map(|(a, _)| *a).collect();
        assert_eq!(bases, [0x4000_0000, 0x4000_0400, 0x4000_0800]);
    }

    #[test]
    fn tap_returns_to_tlr_after_operations() {
        let (mut bridge, _) = bridge();
        bridge.write32(0x4000_0000, 1).unwrap();
        bridge.read32(0x4000_0000).unwrap();
        bridge.write_many(0x4000_0000, &[1, 2, 3]).unwrap();

        // A fresh IDCODE read only works if the TAP really is back in
        // Test-Logic-Reset.
        assert_eq!(tap::read_idcode(bridge.probe_mut()).unwrap(), IDCODE);
    }
}
