//! Scripted probe for the test suite.
//!
//! [`MockFtdi`] stands in for the vendor driver and interprets the MPSSE
//! command stream byte for byte, driving a behavioural model of the
//! GR712 debug link: the 16-state TAP, the 6-bit IR, the 35-bit
//! command/address and 33-bit data registers with SEQ auto-increment,
//! big-endian lane selection, and a sparse word memory. A scripted
//! "program" overlay emulates enough DSU/UART behaviour to run the CPU
//! state machine end to end.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::driver::{BitMode, FtdiDriver, Result};
use crate::map::{Family, UART_FIFO, UART_STATUS};

pub const IDCODE: u32 = 0x0972_4093;

/// DSU debug-mode bit, as seen in the control register.
const DSU_CTRL_DM: u32 = 1 << 6;

/// The "go" word the run sequence writes to the DSU control register.
const GO_WORD: u32 = 0x0000_022F;

const IR_COMMAND: u8 = 0x02;
const IR_DATA: u8 = 0x03;
/// Sentinel for the IDCODE instruction Test-Logic-Reset selects.
const IR_IDCODE: u8 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TapState {
    TestLogicReset,
    RunTestIdle,
    SelectDr,
    CaptureDr,
    ShiftDr,
    Exit1Dr,
    PauseDr,
    Exit2Dr,
    UpdateDr,
    SelectIr,
    CaptureIr,
    ShiftIr,
    Exit1Ir,
    PauseIr,
    Exit2Ir,
    UpdateIr,
}

impl TapState {
    fn next(self, tms: bool) -> TapState {
        use TapState::*;
        match (self, tms) {
            (TestLogicReset, false) => RunTestIdle,
            (TestLogicReset, true) => TestLogicReset,
            (RunTestIdle, false) => RunTestIdle,
            (RunTestIdle, true) => SelectDr,
            (SelectDr, false) => CaptureDr,
            (SelectDr, true) => SelectIr,
            (CaptureDr, false) => ShiftDr,
            (CaptureDr, true) => Exit1Dr,
            (ShiftDr, false) => ShiftDr,
            (ShiftDr, true) => Exit1Dr,
            (Exit1Dr, false) => PauseDr,
            (Exit1Dr, true) => UpdateDr,
            (PauseDr, false) => PauseDr,
            (PauseDr, true) => Exit2Dr,
            (Exit2Dr, false) => ShiftDr,
            (Exit2Dr, true) => UpdateDr,
            (UpdateDr, false) => RunTestIdle,
            (UpdateDr, true) => SelectDr,
            (SelectIr, false) => CaptureIr,
            (SelectIr, true) => TestLogicReset,
            (CaptureIr, false) => ShiftIr,
            (CaptureIr, true) => Exit1Ir,
            (ShiftIr, false) => ShiftIr,
            (ShiftIr, true) => Exit1Ir,
            (Exit1Ir, false) => PauseIr,
            (Exit1Ir, true) => UpdateIr,
            (PauseIr, false) => PauseIr,
            (PauseIr, true) => Exit2Ir,
            (Exit2Ir, false) => ShiftIr,
            (Exit2Ir, true) => UpdateIr,
            (UpdateIr, false) => RunTestIdle,
            (UpdateIr, true) => SelectDr,
        }
    }
}

/// A canned target program: bytes it "prints" over UART0 and the trap
/// state it leaves behind.
#[derive(Debug, Clone)]
pub struct ScriptedProgram {
    pub uart: VecDeque<u8>,
    pub tt: u8,
    pub tbr_tt: u8,
}

impl ScriptedProgram {
    pub fn new(output: &[u8], tt: u8, tbr_tt: u8) -> Self {
        Self {
            uart: output.iter().copied().collect(),
            tt,
            tbr_tt,
        }
    }
}

/// The emulated chip and target, shared between the driver half and the
/// test that wants to inspect or prearrange state.
pub struct Gr712Target {
    state: TapState,
    ir_shift: u8,
    ir: u8,
    dr_shift: u64,
    tdi_line: bool,

    command_addr: u32,
    command_size: u8,
    command_write: bool,
    pending_data: u32,

    pub memory: HashMap<u32, u32>,
    /// Every command-register load: (address, write-flag). Lets tests
    /// assert burst chunk decomposition.
    pub command_loads: Vec<(u32, bool)>,

    /// Programs armed to start on the next "go" write, in order. When
    /// the queue is empty, a "go" re-runs the most recent program; the
    /// image in SDRAM does not change just because it ran once.
    pub programs: VecDeque<ScriptedProgram>,
    running: Option<ScriptedProgram>,
    last_program: Option<ScriptedProgram>,

    pub loopback: bool,
    pub tck_divisor: Option<u16>,
    pub low_pins: Option<(u8, u8)>,
    pub high_pins: Option<(u8, u8)>,

    rx: VecDeque<u8>,
}

impl Gr712Target {
    fn new() -> Self {
        Self {
            state: TapState::TestLogicReset,
            ir_shift: 0,
            ir: IR_IDCODE,
            dr_shift: 0,
            tdi_line: false,
            command_addr: 0,
            command_size: 0,
            command_write: false,
            pending_data: 0,
            memory: HashMap::new(),
            command_loads: Vec::new(),
            programs: VecDeque::new(),
            running: None,
            last_program: None,
            loopback: false,
            tck_divisor: None,
            low_pins: None,
            high_pins: None,
            rx: VecDeque::new(),
        }
    }

    pub fn word(&self, addr: u32) -> u32 {
        self.memory.get(&(addr & !3)).copied().unwrap_or(0)
    }

    pub fn set_word(&mut self, addr: u32, value: u32) {
        self.memory.insert(addr & !3, value);
    }

    fn dr_width(&self) -> u32 {
        match self.ir {
            IR_COMMAND => 35,
            IR_DATA => 33,
            IR_IDCODE => 32,
            _ => 1,
        }
    }

    fn clock(&mut self, tms: bool, tdi: bool) -> bool {
        let tdo = match self.state {
            TapState::ShiftIr => self.ir_shift & 1 != 0,
            TapState::ShiftDr => self.dr_shift & 1 != 0,
            _ => false,
        };

        match self.state {
            TapState::ShiftIr => {
                self.ir_shift = (self.ir_shift >> 1) | ((tdi as u8) << 5);
            }
            TapState::ShiftDr => {
                let w = self.dr_width();
                self.dr_shift = (self.dr_shift >> 1) | ((tdi as u64) << (w - 1));
            }
            _ => {}
        }

        self.state = self.state.next(tms);
        match self.state {
            TapState::TestLogicReset => self.ir = IR_IDCODE,
            TapState::CaptureIr => self.ir_shift = 0b00_0001,
            TapState::UpdateIr => self.ir = self.ir_shift & 0x3F,
            TapState::CaptureDr => self.capture_dr(),
            TapState::UpdateDr => self.update_dr(),
            _ => {}
        }

        tdo
    }

    fn capture_dr(&mut self) {
        self.dr_shift = match self.ir {
            IR_IDCODE => IDCODE as u64,
            IR_DATA => self.pending_data as u64,
            _ => 0,
        };
    }

    fn update_dr(&mut self) {
        match self.ir {
            IR_COMMAND => {
                let v = self.dr_shift;
                self.command_addr = v as u32;
                self.command_size = ((v >> 32) & 0b11) as u8;
                self.command_write = (v >> 34) & 1 != 0;
                self.command_loads.push((self.command_addr, self.command_write));
                if !self.command_write {
                    self.pending_data = self.bus_read(self.command_addr);
                }
            }
            IR_DATA => {
                let data = self.dr_shift as u32;
                let seq = (self.dr_shift >> 32) & 1 != 0;
                if self.command_write {
                    self.bus_write(data);
                    if seq {
                        self.command_addr = self.command_addr.wrapping_add(4);
                    }
                } else if seq {
                    self.command_addr = self.command_addr.wrapping_add(4);
                    self.pending_data = self.bus_read(self.command_addr);
                }
            }
            _ => {}
        }
    }

    fn bus_read(&mut self, addr: u32) -> u32 {
        let map = Family::Leon3.map();

        if let Some(run) = &mut self.running {
            if addr == map.uart0_start + UART_STATUS {
                let tcnt = run.uart.len().min(63) as u32;
                return tcnt << 20;
            }
            if addr == map.uart0_start + UART_FIFO {
                return run.uart.pop_front().unwrap_or(0) as u32;
            }
            if run.uart.is_empty() {
                if addr == map.dsu_start {
                    return self.word(addr) | DSU_CTRL_DM;
                }
                if addr == map.dsu_start + 0x40_0020 {
                    return (run.tt as u32) << 4;
                }
                if addr == map.dsu_start + 0x40_000C {
                    return (run.tbr_tt as u32) << 4;
                }
            }
        }

        self.word(addr)
    }

    fn bus_write(&mut self, data: u32) {
        let addr = self.command_addr;
        let map = Family::Leon3.map();

        if addr == map.dsu_start && data == GO_WORD {
            let next = self.programs.pop_front().or_else(|| self.last_program.clone());
            if let Some(program) = next {
                self.last_program = Some(program.clone());
                self.running = Some(program);
            }
        }

        let word_addr = addr & !3;
        let old = self.word(word_addr);
        let new = match self.command_size {
            0b00 => {
                // Byte lanes are big-endian: offset 0 is bits 31:24. The
                // host already placed the byte in its lane.
                let mask = 0xFFu32 << (8 * (3 - (addr & 3)));
                (old & !mask) | (data & mask)
            }
            0b01 => {
                let mask = if addr & 3 < 2 { 0xFFFF_0000 } else { 0x0000_FFFF };
                (old & !mask) | (data & mask)
            }
            _ => data,
        };
        self.memory.insert(word_addr, new);
    }

    /// Interprets one MPSSE command buffer.
    fn process(&mut self, buf: &[u8]) {
        let mut i = 0;
        while i < buf.len() {
            let op = buf[i];
            match op {
                0x80 => {
                    self.low_pins = Some((buf[i + 1], buf[i + 2]));
                    i += 3;
                }
                0x82 => {
                    self.high_pins = Some((buf[i + 1], buf[i + 2]));
                    i += 3;
                }
                0x84 => {
                    self.loopback = true;
                    i += 1;
                }
                0x85 => {
                    self.loopback = false;
                    i += 1;
                }
                0x86 => {
                    self.tck_divisor = Some(u16::from_le_bytes([buf[i + 1], buf[i + 2]]));
                    i += 3;
                }
                0x8A | 0x8B | 0x8D | 0x97 | 0x87 => i += 1,
                0x8E => {
                    let clocks = buf[i + 1] as usize + 1;
                    for _ in 0..clocks {
                        self.clock(false, self.tdi_line);
                    }
                    i += 2;
                }
                0x4B | 0x6B => {
                    let clocks = buf[i + 1] as usize + 1;
                    let data = buf[i + 2];
                    let tdi = data & 0x80 != 0;
                    self.tdi_line = tdi;
                    let mut capture = 0u8;
                    for bit in 0..clocks {
                        let tms = data >> bit & 1 != 0;
                        let tdo = self.clock(tms, tdi);
                        capture = (capture >> 1) | ((tdo as u8) << 7);
                    }
                    if op == 0x6B {
                        self.rx.push_back(capture);
                    }
                    i += 3;
                }
                0x1B | 0x3B => {
                    let clocks = buf[i + 1] as usize + 1;
                    let data = buf[i + 2];
                    let mut capture = 0u8;
                    for bit in 0..clocks {
                        let tdi = data >> bit & 1 != 0;
                        self.tdi_line = tdi;
                        let tdo = self.clock(false, tdi);
                        capture = (capture >> 1) | ((tdo as u8) << 7);
                    }
                    if op == 0x3B {
                        self.rx.push_back(capture);
                    }
                    i += 3;
                }
                0x2A => {
                    let clocks = buf[i + 1] as usize + 1;
                    let mut capture = 0u8;
                    for _ in 0..clocks {
                        let tdo = self.clock(false, self.tdi_line);
                        capture = (capture >> 1) | ((tdo as u8) << 7);
                    }
                    self.rx.push_back(capture);
                    i += 2;
                }
                0x19 | 0x39 => {
                    let count = u16::from_le_bytes([buf[i + 1], buf[i + 2]]) as usize + 1;
                    for k in 0..count {
                        let byte = buf[i + 3 + k];
                        let mut capture = 0u8;
                        for bit in 0..8 {
                            let tdi = byte >> bit & 1 != 0;
                            self.tdi_line = tdi;
                            let tdo = self.clock(false, tdi);
                            capture = (capture >> 1) | ((tdo as u8) << 7);
                        }
                        if op == 0x39 {
                            self.rx.push_back(capture);
                        }
                    }
                    i += 3 + count;
                }
                0x28 => {
                    let count = u16::from_le_bytes([buf[i + 1], buf[i + 2]]) as usize + 1;
                    for _ in 0..count {
                        let mut capture = 0u8;
                        for _ in 0..8 {
                            let tdo = self.clock(false, self.tdi_line);
                            capture = (capture >> 1) | ((tdo as u8) << 7);
                        }
                        self.rx.push_back(capture);
                    }
                    i += 3;
                }
                unknown => {
                    // The MPSSE answers unassigned opcodes with FA <op>,
                    // which the bring-up synchronisation relies on.
                    self.rx.push_back(0xFA);
                    self.rx.push_back(unknown);
                    i += 1;
                }
            }
        }
    }
}

/// [`FtdiDriver`] front of [`Gr712Target`].
pub struct MockFtdi {
    target: Arc<Mutex<Gr712Target>>,
    write_clamp: Option<usize>,
}

impl MockFtdi {
    pub fn new() -> Self {
        Self {
            target: Arc::new(Mutex::new(Gr712Target::new())),
            write_clamp: None,
        }
    }

    /// Shared handle on the emulated target, for inspection and setup.
    pub fn target(&self) -> Arc<Mutex<Gr712Target>> {
        Arc::clone(&self.target)
    }

    /// Makes subsequent writes report at most `n` bytes accepted.
    pub fn clamp_writes_to(&mut self, n: usize) {
        self.write_clamp = Some(n);
    }
}

impl FtdiDriver for MockFtdi {
    fn reset(&mut self) -> Result<()> {
        self.target.lock().unwrap().rx.clear();
        Ok(())
    }

    fn purge_all(&mut self) -> Result<()> {
        self.target.lock().unwrap().rx.clear();
        Ok(())
    }

    fn set_usb_parameters(&mut self, _transfer_size: u32) -> Result<()> {
        Ok(())
    }

    fn set_timeouts(&mut self, _read: Duration, _write: Duration) -> Result<()> {
        Ok(())
    }

    fn set_bit_mode(&mut self, _mask: u8, _mode: BitMode) -> Result<()> {
        Ok(())
    }

    fn queue_status(&mut self) -> Result<usize> {
        Ok(self.target.lock().unwrap().rx.len())
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if let Some(clamp) = self.write_clamp {
            return Ok(clamp.min(buf.len()));
        }
        self.target.lock().unwrap().process(buf);
        Ok(buf.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut target = self.target.lock().unwrap();
        let mut n = 0;
        while n < buf.len() {
            match target.rx.pop_front() {
                Some(b) => {
                    buf[n] = b;
                    n += 1;
                }
                None => break,
            }
        }
        Ok(n)
    }

    fn driver_version(&mut self) -> Result<String> {
        Ok("0.0.0".into())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn settle(&mut self, _delay: Duration) {}
}
