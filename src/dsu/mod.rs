//! Debug Support Unit access: the address-mapped view of each core's
//! register files, the debug control latches, and the run state machine.
//!
//! Everything here is address arithmetic over the AHB bridge; see the
//! GR712RC user manual chapter 9 for the register map.

pub mod trace;

use bitfield::bitfield;

use crate::bridge::AhbBridge;
use crate::error::Error;
use crate::map::{AddressMap, Family, UART_CTRL, UART_FIFO, UART_STATUS};

/// Register windows implemented by the GR712 cores.
pub const NWINDOWS: u32 = 8;

/// Byte distance between the DSU areas of adjacent cores.
const CPU_STRIDE: u32 = 0x10_0000;

/// Offsets within a core's DSU area.
const IU_REG_FILE: u32 = 0x30_0000;
const FPU_REG_FILE: u32 = 0x30_1000;
const SPECIAL_REGS: u32 = 0x40_0000;
const REG_TRAP: u32 = 0x40_0020;
const REG_ASI: u32 = 0x40_0024;
const ASI_DIAG: u32 = 0x70_0000;

/// Global DSU halfword fields, relative to the DSU base. The bus is
/// big-endian, so the word at 0x20 holds single-step in bits 31:16 and
/// break-now in bits 15:0; the word at 0x24 pairs the debug-mode mask
/// with the enter-debug mask the same way.
const STEP_BREAK_NOW: u32 = 0x22;
const MASK_DEBUG_MODE: u32 = 0x24;

/// DSU control register bits.
pub mod ctrl {
    pub const TE: u32 = 1 << 0;
    pub const BE: u32 = 1 << 1;
    pub const BW: u32 = 1 << 2;
    pub const BS: u32 = 1 << 3;
    pub const BX: u32 = 1 << 4;
    pub const BZ: u32 = 1 << 5;
    pub const DM: u32 = 1 << 6;
    pub const PE: u32 = 1 << 9;
    pub const HL: u32 = 1 << 10;
}

bitfield! {
    /// The per-core DSU control register.
    pub struct DsuCtrl(u32);
    impl Debug;
    pub trace_enable, _: 0;
    pub break_on_error, _: 1;
    pub break_on_iu_watchpoint, _: 2;
    pub break_on_breakpoint, _: 3;
    pub break_on_trap, _: 4;
    pub break_on_error_trap, _: 5;
    pub debug_mode, _: 6;
    pub error_mode, _: 9;
    pub halted, _: 10;
}

bitfield! {
    /// UART0 status register; TCNT is the number of frames waiting in
    /// the transmitter FIFO.
    struct UartStatus(u32);
    impl Debug;
    u32, tx_fifo_count, _: 25, 20;
}

/// PSR value the monitor programs before starting or parking a core:
/// CWP = 7, supervisor mode, traps enabled, FPU enabled.
const INITIAL_PSR: u32 = 0xF340_10E1;

/// Default window invalid mask.
const INITIAL_WIM: u32 = 0x2;

/// UART0 control: TX/RX enable, loopback and debug mode, nothing else.
const UART_RUN_CTRL: u32 = 0x0000_0883;

/// DSU control word that actually resumes the core: trace on, break on
/// error/watchpoint/breakpoint/error-trap, error latch cleared.
const GO_WORD: u32 = ctrl::TE | ctrl::BE | ctrl::BW | ctrl::BS | ctrl::BZ | ctrl::PE;

/// Initial stack grows down from 8 MiB into SDRAM.
const STACK_OFFSET: u32 = 8 * 1024 * 1024;

/// The special-purpose registers mapped at fixed offsets per core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialReg {
    Y,
    Psr,
    Wim,
    Tbr,
    Pc,
    Npc,
    Fsr,
    Cpsr,
}

impl SpecialReg {
    fn offset(self) -> u32 {
        let index = match self {
            SpecialReg::Y => 0,
            SpecialReg::Psr => 1,
            SpecialReg::Wim => 2,
            SpecialReg::Tbr => 3,
            SpecialReg::Pc => 4,
            SpecialReg::Npc => 5,
            SpecialReg::Fsr => 6,
            SpecialReg::Cpsr => 7,
        };
        SPECIAL_REGS + index * 4
    }
}

/// One window's worth of the IU register file, plus the globals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowRegs {
    pub ins: [u32; 8],
    pub locals: [u32; 8],
    pub outs: [u32; 8],
    pub globals: [u32; 8],
}

/// What a finished run left in the trap registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    /// TT field of the DSU trap register.
    pub tt: u8,
    /// TT field of the core's TBR.
    pub tbr_tt: u8,
}

/// Typed view of the Debug Support Unit, borrowed from a session.
pub struct Dsu<'probe> {
    bridge: &'probe mut AhbBridge,
    map: &'static AddressMap,
    cores: u32,
}

impl<'probe> Dsu<'probe> {
    pub fn new(bridge: &'probe mut AhbBridge, family: Family) -> Self {
        Self {
            bridge,
            map: family.map(),
            cores: family.core_count(),
        }
    }

    pub fn core_count(&self) -> u32 {
        self.cores
    }

    fn check_cpu(&self, cpu: u32) -> Result<(), Error> {
        if cpu >= self.cores {
            return Err(Error::CpuIndex {
                index: cpu,
                count: self.cores,
            });
        }
        Ok(())
    }

    fn check_window(&self, cwp: u32) -> Result<(), Error> {
        if cwp >= NWINDOWS {
            return Err(Error::WindowIndex(cwp));
        }
        Ok(())
    }

    fn base(&self, cpu: u32) -> u32 {
        self.map.dsu_start + cpu * CPU_STRIDE
    }

    // --- special-purpose registers -------------------------------------

    pub fn special(&mut self, cpu: u32, reg: SpecialReg) -> Result<u32, Error> {
        self.check_cpu(cpu)?;
        Ok(self.bridge.read32(self.base(cpu) + reg.offset())?)
    }

    pub fn set_special(&mut self, cpu: u32, reg: SpecialReg, value: u32) -> Result<(), Error> {
        self.check_cpu(cpu)?;
        self.bridge.write32(self.base(cpu) + reg.offset(), value)?;
        Ok(())
    }

    /// The window the core currently sits in (CWP field of the PSR).
    pub fn current_window(&mut self, cpu: u32) -> Result<u32, Error> {
        Ok(self.special(cpu, SpecialReg::Psr)? & 0x1F)
    }

    // --- windowed IU register file -------------------------------------
    //
    // Window n occupies 64 bytes; %o0..%o7 sit 32 bytes in, %l0..%l7 at
    // 64 and %i0..%i7 at 96, wrapping modulo the file size so window
    // NWINDOWS-1 shares its ins with window 0's outs. Globals follow the
    // windows.

    fn window_reg_addr(&self, cpu: u32, bank: u32, n: u32, cwp: u32) -> u32 {
        self.base(cpu) + IU_REG_FILE + ((cwp * 64 + bank + n * 4) % (NWINDOWS * 64))
    }

    fn global_reg_addr(&self, cpu: u32, n: u32) -> u32 {
        self.base(cpu) + IU_REG_FILE + NWINDOWS * 64 + n * 4
    }

    fn check_reg_num(n: u32) -> Result<(), Error> {
        if n > 7 {
            return Err(Error::RegisterIndex {
                bank: "window",
                index: n,
                max: 7,
            });
        }
        Ok(())
    }

    pub fn output_reg(&mut self, cpu: u32, cwp: u32, n: u32) -> Result<u32, Error> {
        self.check_cpu(cpu)?;
        self.check_window(cwp)?;
        Self::check_reg_num(n)?;
        Ok(self.bridge.read32(self.window_reg_addr(cpu, 32, n, cwp))?)
    }

    pub fn set_output_reg(&mut self, cpu: u32, cwp: u32, n: u32, value: u32) -> Result<(), Error> {
        self.check_cpu(cpu)?;
        self.check_window(cwp)?;
        Self::check_reg_num(n)?;
        self.bridge
            .write32(self.window_reg_addr(cpu, 32, n, cwp), value)?;
        Ok(())
    }

    pub fn local_reg(&mut self, cpu: u32, cwp: u32, n: u32) -> Result<u32, Error> {
        self.check_cpu(cpu)?;
        self.check_window(cwp)?;
        Self::check_reg_num(n)?;
        Ok(self.bridge.read32(self.window_reg_addr(cpu, 64, n, cwp))?)
    }

    pub fn set_local_reg(&mut self, cpu: u32, cwp: u32, n: u32, value: u32) -> Result<(), Error> {
        self.check_cpu(cpu)?;
        self.check_window(cwp)?;
        Self::check_reg_num(n)?;
        self.bridge
            .write32(self.window_reg_addr(cpu, 64, n, cwp), value)?;
        Ok(())
    }

    pub fn input_reg(&mut self, cpu: u32, cwp: u32, n: u32) -> Result<u32, Error> {
        self.check_cpu(cpu)?;
        self.check_window(cwp)?;
        Self::check_reg_num(n)?;
        Ok(self.bridge.read32(self.window_reg_addr(cpu, 96, n, cwp))?)
    }

    pub fn set_input_reg(&mut self, cpu: u32, cwp: u32, n: u32, value: u32) -> Result<(), Error> {
        self.check_cpu(cpu)?;
        self.check_window(cwp)?;
        Self::check_reg_num(n)?;
        self.bridge
            .write32(self.window_reg_addr(cpu, 96, n, cwp), value)?;
        Ok(())
    }

    pub fn global_reg(&mut self, cpu: u32, n: u32) -> Result<u32, Error> {
        self.check_cpu(cpu)?;
        Self::check_reg_num(n)?;
        Ok(self.bridge.read32(self.global_reg_addr(cpu, n))?)
    }

    pub fn set_global_reg(&mut self, cpu: u32, n: u32, value: u32) -> Result<(), Error> {
        self.check_cpu(cpu)?;
        Self::check_reg_num(n)?;
        self.bridge.write32(self.global_reg_addr(cpu, n), value)?;
        Ok(())
    }

    /// %o6 of the given window.
    pub fn stack_pointer(&mut self, cpu: u32, cwp: u32) -> Result<u32, Error> {
        self.output_reg(cpu, cwp, 6)
    }

    pub fn set_stack_pointer(&mut self, cpu: u32, cwp: u32, value: u32) -> Result<(), Error> {
        self.set_output_reg(cpu, cwp, 6, value)
    }

    /// %i6 of the given window.
    pub fn frame_pointer(&mut self, cpu: u32, cwp: u32) -> Result<u32, Error> {
        self.input_reg(cpu, cwp, 6)
    }

    pub fn set_frame_pointer(&mut self, cpu: u32, cwp: u32, value: u32) -> Result<(), Error> {
        self.set_input_reg(cpu, cwp, 6, value)
    }

    /// Reads one window (and the globals) in four 8-word bursts.
    pub fn window_regs(&mut self, cpu: u32, cwp: u32) -> Result<WindowRegs, Error> {
        self.check_cpu(cpu)?;
        self.check_window(cwp)?;

        let mut regs = WindowRegs {
            ins: [0; 8],
            locals: [0; 8],
            outs: [0; 8],
            globals: [0; 8],
        };
        let banks = [
            (96, &mut regs.ins),
            (64, &mut regs.locals),
            (32, &mut regs.outs),
        ];
        for (bank, slot) in banks {
            let addr = self.window_reg_addr(cpu, bank, 0, cwp);
            let words = self.bridge.read_many(addr, 8)?;
            slot.copy_from_slice(&words);
        }
        let words = self.bridge.read_many(self.global_reg_addr(cpu, 0), 8)?;
        regs.globals.copy_from_slice(&words);

        Ok(regs)
    }

    /// Zeroes the whole IU register file: all windows plus the globals.
    pub fn clear_iu_reg_file(&mut self, cpu: u32) -> Result<(), Error> {
        self.check_cpu(cpu)?;
        let words = (NWINDOWS * (8 + 8) + 8) as usize;
        self.bridge
            .write_many(self.base(cpu) + IU_REG_FILE, &vec![0u32; words])?;
        Ok(())
    }

    // --- FPU register file ---------------------------------------------

    pub fn float_reg(&mut self, cpu: u32, n: u32) -> Result<u32, Error> {
        self.check_cpu(cpu)?;
        Self::check_float_num(n)?;
        Ok(self.bridge.read32(self.base(cpu) + FPU_REG_FILE + n * 4)?)
    }

    pub fn set_float_reg(&mut self, cpu: u32, n: u32, bits: u32) -> Result<(), Error> {
        self.check_cpu(cpu)?;
        Self::check_float_num(n)?;
        self.bridge
            .write32(self.base(cpu) + FPU_REG_FILE + n * 4, bits)?;
        Ok(())
    }

    /// Doubles follow the singles, stored as two word halves with the
    /// upper half at the lower address.
    pub fn double_reg(&mut self, cpu: u32, n: u32) -> Result<u64, Error> {
        self.check_cpu(cpu)?;
        Self::check_double_num(n)?;
        let addr = self.base(cpu) + FPU_REG_FILE + 32 * 4 + n * 8;
        let hi = self.bridge.read32(addr)?;
        let lo = self.bridge.read32(addr + 4)?;
        Ok((hi as u64) << 32 | lo as u64)
    }

    pub fn set_double_reg(&mut self, cpu: u32, n: u32, bits: u64) -> Result<(), Error> {
        self.check_cpu(cpu)?;
        Self::check_double_num(n)?;
        let addr = self.base(cpu) + FPU_REG_FILE + 32 * 4 + n * 8;
        self.bridge.write32(addr, (bits >> 32) as u32)?;
        self.bridge.write32(addr + 4, bits as u32)?;
        Ok(())
    }

    fn check_float_num(n: u32) -> Result<(), Error> {
        if n > 31 {
            return Err(Error::RegisterIndex {
                bank: "f",
                index: n,
                max: 31,
            });
        }
        Ok(())
    }

    fn check_double_num(n: u32) -> Result<(), Error> {
        if n > 15 {
            return Err(Error::RegisterIndex {
                bank: "d",
                index: n,
                max: 15,
            });
        }
        Ok(())
    }

    // --- control latches -----------------------------------------------

    pub fn ctrl(&mut self, cpu: u32) -> Result<DsuCtrl, Error> {
        self.check_cpu(cpu)?;
        Ok(DsuCtrl(self.bridge.read32(self.base(cpu))?))
    }

    fn set_ctrl_bits(&mut self, cpu: u32, mask: u32) -> Result<(), Error> {
        let value = self.bridge.read32(self.base(cpu))?;
        self.bridge.write32(self.base(cpu), value | mask)?;
        Ok(())
    }

    fn clear_ctrl_bits(&mut self, cpu: u32, mask: u32) -> Result<(), Error> {
        let value = self.bridge.read32(self.base(cpu))?;
        self.bridge.write32(self.base(cpu), value & !mask)?;
        Ok(())
    }

    /// The PE latch is write-one-to-clear.
    fn clear_error_mode(&mut self, cpu: u32) -> Result<(), Error> {
        self.set_ctrl_bits(cpu, ctrl::PE)
    }

    /// Sets this core's bit in one of the global halfword mask registers.
    fn set_mask_bit(&mut self, offset: u32, cpu: u32) -> Result<(), Error> {
        let addr = self.map.dsu_start + offset;
        let mask = self.bridge.read16(addr)?;
        self.bridge.write16(addr, mask | 1 << cpu)?;
        Ok(())
    }

    fn clear_mask_bit(&mut self, offset: u32, cpu: u32) -> Result<(), Error> {
        let addr = self.map.dsu_start + offset;
        let mask = self.bridge.read16(addr)?;
        self.bridge.write16(addr, mask & !(1 << cpu))?;
        Ok(())
    }

    /// Keeps this core from dragging the others into debug mode.
    fn set_no_force_debug_mode(&mut self, cpu: u32) -> Result<(), Error> {
        self.set_mask_bit(MASK_DEBUG_MODE, cpu)
    }

    /// BN bit: with BW set in the control register this forces the core
    /// into debug mode; clearing it resumes execution.
    fn set_break_now(&mut self, cpu: u32) -> Result<(), Error> {
        self.set_mask_bit(STEP_BREAK_NOW, cpu)
    }

    fn clear_break_now(&mut self, cpu: u32) -> Result<(), Error> {
        self.clear_mask_bit(STEP_BREAK_NOW, cpu)
    }

    // --- wake-state multiplexor ----------------------------------------

    /// Wakes the core through the power-down state register.
    pub fn wake(&mut self, cpu: u32) -> Result<(), Error> {
        self.check_cpu(cpu)?;
        self.bridge.write32(self.map.wake_state, 1 << cpu)?;
        Ok(())
    }

    /// True when the core is powered down.
    pub fn powered_down(&mut self, cpu: u32) -> Result<bool, Error> {
        self.check_cpu(cpu)?;
        Ok(self.bridge.read32(self.map.wake_state)? >> cpu & 1 == 1)
    }

    // --- lifecycle -----------------------------------------------------

    /// Leaves a non-active core in a known debug-idle state: halted at
    /// core 0's trap base with a cleared register file.
    pub fn park(&mut self, cpu: u32) -> Result<(), Error> {
        self.check_cpu(cpu)?;

        let entry = self.special(0, SpecialReg::Tbr)? & !0xFFF;

        self.set_no_force_debug_mode(cpu)?;
        self.set_ctrl_bits(cpu, ctrl::BW)?;
        self.set_break_now(cpu)?;

        self.set_special(cpu, SpecialReg::Tbr, entry)?;
        self.set_special(cpu, SpecialReg::Pc, entry)?;
        self.set_special(cpu, SpecialReg::Npc, entry + 4)?;
        self.clear_iu_reg_file(cpu)?;
        self.set_special(cpu, SpecialReg::Wim, INITIAL_WIM)?;
        self.set_special(cpu, SpecialReg::Psr, INITIAL_PSR)?;

        self.clear_ctrl_bits(cpu, ctrl::BW)?;
        self.clear_break_now(cpu)?;
        self.clear_error_mode(cpu)?;

        Ok(())
    }

    /// Clears the DSU-local latches and the core's visible state, in
    /// case a previous execution crashed.
    pub fn reset(&mut self, cpu: u32) -> Result<(), Error> {
        self.check_cpu(cpu)?;

        self.bridge.write32(self.map.dsu_start + REG_ASI, 0x0000_0002)?;
        self.bridge
            .write32(self.map.dsu_start + ASI_DIAG, 0x00EB_800F)?;

        for reg in [
            SpecialReg::Y,
            SpecialReg::Psr,
            SpecialReg::Wim,
            SpecialReg::Tbr,
            SpecialReg::Pc,
            SpecialReg::Npc,
            SpecialReg::Fsr,
            SpecialReg::Cpsr,
        ] {
            self.set_special(cpu, reg, 0)?;
        }

        self.clear_iu_reg_file(cpu)?;
        self.clear_error_mode(cpu)?;

        Ok(())
    }

    /// Runs whatever is loaded at the SDRAM base on `cpu`, streaming
    /// UART0 output bytes into `console`, until the core drops into
    /// debug mode. Returns the raw trap fields; result selection and the
    /// first-run quirk live one layer up.
    pub fn run(
        &mut self,
        cpu: u32,
        console: &mut dyn FnMut(u8),
    ) -> Result<RunOutcome, Error> {
        self.check_cpu(cpu)?;
        self.reset(cpu)?;

        let entry = self.map.sdram_start;

        self.set_no_force_debug_mode(cpu)?;
        self.set_ctrl_bits(cpu, ctrl::BW)?;
        self.set_ctrl_bits(cpu, ctrl::HL)?;
        self.set_break_now(cpu)?;

        self.set_special(cpu, SpecialReg::Tbr, entry)?;
        self.set_special(cpu, SpecialReg::Pc, entry)?;
        self.set_special(cpu, SpecialReg::Npc, entry + 4)?;
        self.clear_iu_reg_file(cpu)?;
        self.set_special(cpu, SpecialReg::Wim, INITIAL_WIM)?;
        self.set_special(cpu, SpecialReg::Psr, INITIAL_PSR)?;

        let stack = entry + STACK_OFFSET;
        self.set_stack_pointer(cpu, 1, stack)?;
        self.set_frame_pointer(cpu, 1, stack)?;

        self.wake(cpu)?;
        self.clear_ctrl_bits(cpu, ctrl::BW)?;
        self.clear_break_now(cpu)?;
        self.clear_error_mode(cpu)?;

        self.bridge
            .write32(self.map.uart0_start + UART_CTRL, UART_RUN_CTRL)?;

        tracing::debug!("resuming cpu {cpu} at {entry:#010x}");
        self.bridge.write32(self.map.dsu_start, GO_WORD)?;

        loop {
            let status = UartStatus(self.bridge.read32(self.map.uart0_start + UART_STATUS)?);
            let pending = status.tx_fifo_count();
            if pending > 0 {
                for _ in 0..pending {
                    let byte = self.bridge.read32(self.map.uart0_start + UART_FIFO)? as u8;
                    console(byte);
                }
            } else if self.ctrl(cpu)?.debug_mode() {
                break;
            }
        }

        let tt = (self.bridge.read32(self.base(cpu) + REG_TRAP)? >> 4 & 0xFF) as u8;
        let tbr_tt = (self.special(cpu, SpecialReg::Tbr)? >> 4 & 0xFF) as u8;
        tracing::debug!("cpu {cpu} entered debug mode, tt {tt:#04x}, tbr tt {tbr_tt:#04x}");

        Ok(RunOutcome { tt, tbr_tt })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::mock::{Gr712Target, MockFtdi, ScriptedProgram};
    use crate::probe::Probe;
    use std::sync::{Arc, Mutex};

    fn bridge() -> (AhbBridge, Arc<Mutex<Gr712Target>>) {
        let mock = MockFtdi::new();
        let target = mock.target();
        let probe = Probe::attach(Box::new(mock)).unwrap();
        (AhbBridge::new(probe), target)
    }

    const PATTERNS: [u32; 4] = [0, !0, 0x5555_5555, 0xAAAA_AAAA];

    #[test]
    fn special_register_round_trip() {
        let (mut bridge, _) = bridge();
        let mut dsu = Dsu::new(&mut bridge, Family::Leon3);

        for cpu in 0..2 {
            for reg in [
                SpecialReg::Y,
                SpecialReg::Psr,
                SpecialReg::Wim,
                SpecialReg::Tbr,
                SpecialReg::Pc,
                SpecialReg::Npc,
                SpecialReg::Fsr,
            ] {
                for pattern in PATTERNS {
                    dsu.set_special(cpu, reg, pattern).unwrap();
                    assert_eq!(dsu.special(cpu, reg).unwrap(), pattern, "{reg:?}");
                }
            }
        }
    }

    #[test]
    fn window_register_round_trip() {
        let (mut bridge, _) = bridge();
        let mut dsu = Dsu::new(&mut bridge, Family::Leon3);

        for cwp in 0..NWINDOWS {
            for n in 0..8 {
                let v = cwp << 16 | n;
                dsu.set_local_reg(0, cwp, n, v).unwrap();
                assert_eq!(dsu.local_reg(0, cwp, n).unwrap(), v);
            }
        }
        for n in 0..8 {
            dsu.set_global_reg(0, n, !n).unwrap();
            assert_eq!(dsu.global_reg(0, n).unwrap(), !n);
        }
    }

    #[test]
    fn window_addressing_wraps_and_overlaps() {
        let (mut bridge, _) = bridge();
        let mut dsu = Dsu::new(&mut bridge, Family::Leon3);

        // SPARC window overlap: %o of window n are %i of window n+1.
        dsu.set_output_reg(0, 2, 3, 0xCAFE_F00D).unwrap();
        assert_eq!(dsu.input_reg(0, 1, 3).unwrap(), 0xCAFE_F00D);

        // The file wraps: the ins of the last window are the outs of
        // window 0.
        dsu.set_input_reg(0, NWINDOWS - 1, 0, 0x1234_5678).unwrap();
        assert_eq!(dsu.output_reg(0, 0, 0).unwrap(), 0x1234_5678);
    }

    #[test]
    fn float_registers_preserve_bit_patterns() {
        let (mut bridge, _) = bridge();
        let mut dsu = Dsu::new(&mut bridge, Family::Leon3);

        for n in [0, 15, 31] {
            for pattern in [0u32, !0] {
                dsu.set_float_reg(0, n, pattern).unwrap();
                assert_eq!(dsu.float_reg(0, n).unwrap(), pattern);
            }
        }

        for n in [0, 7, 15] {
            for pattern in [0u64, !0] {
                dsu.set_double_reg(0, n, pattern).unwrap();
                assert_eq!(dsu.double_reg(0, n).unwrap(), pattern);
            }
        }
    }

    #[test]
    fn double_registers_store_high_word_first() {
        let (mut bridge, target) = bridge();
        let mut dsu = Dsu::new(&mut bridge, Family::Leon3);

        dsu.set_double_reg(0, 0, 0x0123_4567_89AB_CDEF).unwrap();

        let target = target.lock().unwrap();
        let addr = 0x9000_0000 + 0x30_1000 + 128;
        assert_eq!(target.word(addr), 0x0123_4567);
        assert_eq!(target.word(addr + 4), 0x89AB_CDEF);
    }

    #[test]
    fn out_of_range_indices_are_rejected() {
        let (mut bridge, _) = bridge();
        let mut dsu = Dsu::new(&mut bridge, Family::Leon3);

        assert!(matches!(
            dsu.special(2, SpecialReg::Psr),
            Err(Error::CpuIndex { index: 2, count: 2 })
        ));
        assert!(matches!(
            dsu.local_reg(0, NWINDOWS, 0),
            Err(Error::WindowIndex(_))
        ));
        assert!(matches!(
            dsu.float_reg(0, 32),
            Err(Error::RegisterIndex { .. })
        ));
        assert!(matches!(
            dsu.double_reg(0, 16),
            Err(Error::RegisterIndex { .. })
        ));
    }

    #[test]
    fn run_streams_uart_and_reports_trap() {
        let (mut bridge, target) = bridge();
        target
            .lock()
            .unwrap()
            .programs
            .push_back(ScriptedProgram::new(b"ABC", 0x80, 0x80));

        let mut dsu = Dsu::new(&mut bridge, Family::Leon3);
        let mut console = Vec::new();
        let outcome = dsu.run(0, &mut |b| console.push(b)).unwrap();

        assert_eq!(console, b"ABC");
        assert_eq!(outcome, RunOutcome { tt: 0x80, tbr_tt: 0x80 });
    }

    #[test]
    fn run_prepares_entry_state() {
        let (mut bridge, target) = bridge();
        target
            .lock()
            .unwrap()
            .programs
            .push_back(ScriptedProgram::new(b"", 0x80, 0x80));

        let mut dsu = Dsu::new(&mut bridge, Family::Leon3);
        dsu.run(0, &mut |_| {}).unwrap();

        let target = target.lock().unwrap();
        // PC/NPC point at the SDRAM entry, the initial stack sits 8 MiB in.
        assert_eq!(target.word(0x9000_0000 + 0x40_0010), 0x4000_0000);
        assert_eq!(target.word(0x9000_0000 + 0x40_0014), 0x4000_0004);
        let sp_addr = 0x9000_0000 + 0x30_0000 + (64 + 32 + 6 * 4);
        assert_eq!(target.word(sp_addr), 0x4080_0000);
        // UART0 was switched on for the run.
        assert_eq!(target.word(0x8000_0100 + 0x8), 0x0000_0883);
    }

    #[test]
    fn software_trap_lands_in_tbr() {
        let (mut bridge, target) = bridge();
        target
            .lock()
            .unwrap()
            .programs
            .push_back(ScriptedProgram::new(b"", 0x80, 0x85));

        let mut dsu = Dsu::new(&mut bridge, Family::Leon3);
        let outcome = dsu.run(0, &mut |_| {}).unwrap();
        assert_eq!(outcome, RunOutcome { tt: 0x80, tbr_tt: 0x85 });
    }
}
