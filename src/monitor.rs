//! The monitor session: chain verification, target bring-up, and the
//! operations the console drives.

use std::path::Path;

use crate::bridge::{AhbBridge, Progress, IR_COMMAND, IR_DATA};
use crate::dsu::{Dsu, RunOutcome};
use crate::error::{ChainError, Error};
use crate::map::{self, Family};
use crate::probe::Probe;
use crate::tap;
use crate::trap::TrapCode;

/// Images carry a fixed 64 KiB prefix (ELF header plus alignment
/// padding) that never reaches target memory.
pub const IMAGE_PREFIX: usize = 64 * 1024;

/// Memory-controller setup for the GR712RC eval board, written at open.
const MEMCFG_WORDS: [u32; 4] = [0x0003_C0FF, 0x9A20_546A, 0x0826_E028, 0x0000_0028];

/// Timer unit offsets to zero at open, stopping all four timers (the
/// fourth doubles as the watchdog).
const TIMER_OFFSETS: [u32; 4] = [0x318, 0x328, 0x338, 0x348];

/// What the startup chain scans found.
#[derive(Debug, Clone, Copy)]
pub struct ChainInfo {
    pub devices: u8,
    pub idcode: u32,
    pub ir_length: u8,
    pub command_dr_length: u8,
    pub data_dr_length: u8,
}

/// What [`Monitor::load`] streamed to the target.
#[derive(Debug, Clone, Copy)]
pub struct LoadInfo {
    pub file_size: u64,
    pub payload_words: usize,
}

/// One probe session with exclusive ownership of its target.
pub struct Monitor {
    bridge: AhbBridge,
    family: Family,
    chain: ChainInfo,
    active_cpu: u32,
    first_run: bool,
}

impl Monitor {
    /// Verifies the chain shape, detects the family when none is given,
    /// sets up the memory controller and parks all non-active cores.
    pub fn open(probe: Probe, family: Option<Family>) -> Result<Self, Error> {
        let mut bridge = AhbBridge::new(probe);

        let chain = Self::verify_chain(&mut bridge)?;

        let family = match family {
            Some(family) => family,
            None => Self::detect_family(&mut bridge)?,
        };
        tracing::info!("attached to {family} target, idcode {:#010x}", chain.idcode);

        let mut monitor = Monitor {
            bridge,
            family,
            chain,
            active_cpu: 0,
            first_run: true,
        };
        monitor.init_board()?;

        for cpu in 1..family.core_count() {
            tracing::debug!("parking cpu {cpu} in debug-idle");
            monitor.dsu().park(cpu)?;
        }

        Ok(monitor)
    }

    /// The register layouts below the bridge are hard-wired, so all four
    /// shape invariants are checked before anything touches the bus.
    fn verify_chain(bridge: &mut AhbBridge) -> Result<ChainInfo, Error> {
        let probe = bridge.probe_mut();

        let devices = tap::device_count(probe)?;
        if devices != 1 {
            return Err(ChainError::DeviceCount(devices).into());
        }

        let idcode = tap::read_idcode(probe)?;
        if idcode == 0 {
            return Err(ChainError::MissingIdcode.into());
        }

        let ir_length = tap::scan_ir_length(probe)?;
        if ir_length != 6 {
            return Err(ChainError::IrLength(ir_length).into());
        }

        let data_dr_length = tap::scan_dr_length(probe, IR_DATA)?;
        if data_dr_length != 33 {
            return Err(ChainError::DataRegisterLength(data_dr_length).into());
        }

        let command_dr_length = tap::scan_dr_length(probe, IR_COMMAND)?;
        if command_dr_length != 35 {
            return Err(ChainError::CommandRegisterLength(command_dr_length).into());
        }

        Ok(ChainInfo {
            devices,
            idcode,
            ir_length,
            command_dr_length,
            data_dr_length,
        })
    }

    /// Identifies the processor family from the AHB plug&play master
    /// records.
    fn detect_family(bridge: &mut AhbBridge) -> Result<Family, Error> {
        for master in 0..16 {
            let id = bridge.read32(map::AHB_PNP + master * 32)?;
            match map::amba_pnp_device(id) {
                map::DEV_GAISLER_LEON3 | map::DEV_GAISLER_LEON3FT | map::DEV_GAISLER_LEON3DSU => {
                    return Ok(Family::Leon3);
                }
                map::DEV_GAISLER_LEON4 | map::DEV_GAISLER_LEON4DSU => {
                    return Ok(Family::Leon4);
                }
                _ => {}
            }
        }
        Err(ChainError::UnknownProcessor.into())
    }

    /// Board setup values known to work on the GR712RC eval board:
    /// memory-controller configuration plus stopped timers.
    fn init_board(&mut self) -> Result<(), Error> {
        let base = self.family.map().uart0_start;

        for (i, word) in MEMCFG_WORDS.iter().enumerate() {
            self.bridge.write32(base + 4 * i as u32, *word)?;
        }
        for offset in TIMER_OFFSETS {
            self.bridge.write32(base + offset, 0)?;
        }
        Ok(())
    }

    pub fn family(&self) -> Family {
        self.family
    }

    pub fn chain(&self) -> ChainInfo {
        self.chain
    }

    pub fn active_cpu(&self) -> u32 {
        self.active_cpu
    }

    pub fn set_active_cpu(&mut self, cpu: u32) -> Result<(), Error> {
        let count = self.family.core_count();
        if cpu >= count {
            return Err(Error::CpuIndex { index: cpu, count });
        }
        self.active_cpu = cpu;
        Ok(())
    }

    /// Typed DSU view over this session's bridge.
    pub fn dsu(&mut self) -> Dsu<'_> {
        Dsu::new(&mut self.bridge, self.family)
    }

    pub fn driver_version(&mut self) -> Result<String, Error> {
        Ok(self.bridge.probe_mut().driver_version()?)
    }

    /// Sweeps the IR opcode space; used by the `scan` console command.
    pub fn scan_opcodes(&mut self) -> Result<Vec<(u8, u8)>, Error> {
        Ok(tap::scan_opcodes(self.bridge.probe_mut(), self.chain.ir_length)?)
    }

    // --- memory access ---------------------------------------------------

    pub fn read_word(&mut self, addr: u32) -> Result<u32, Error> {
        Ok(self.bridge.read32(addr)?)
    }

    pub fn read_half(&mut self, addr: u32) -> Result<u16, Error> {
        Ok(self.bridge.read16(addr)?)
    }

    pub fn read_byte(&mut self, addr: u32) -> Result<u8, Error> {
        Ok(self.bridge.read8(addr)?)
    }

    pub fn write_word(&mut self, addr: u32, value: u32) -> Result<(), Error> {
        Ok(self.bridge.write32(addr, value)?)
    }

    pub fn write_half(&mut self, addr: u32, value: u16) -> Result<(), Error> {
        Ok(self.bridge.write16(addr, value)?)
    }

    pub fn write_byte(&mut self, addr: u32, value: u8) -> Result<(), Error> {
        Ok(self.bridge.write8(addr, value)?)
    }

    pub fn read_words(&mut self, addr: u32, count: usize) -> Result<Vec<u32>, Error> {
        Ok(self.bridge.read_many(addr, count)?)
    }

    pub fn read_words_with_progress(
        &mut self,
        addr: u32,
        count: usize,
        progress: Progress<'_>,
    ) -> Result<Vec<u32>, Error> {
        Ok(self.bridge.read_many_with_progress(addr, count, progress)?)
    }

    // --- program lifecycle -----------------------------------------------

    /// Resets the active core's visible state and the DSU latches.
    pub fn reset(&mut self) -> Result<(), Error> {
        let cpu = self.active_cpu;
        self.dsu().reset(cpu)
    }

    /// Runs the loaded image on the active core, streaming UART output
    /// into `console`, and maps the trap registers into a single code.
    ///
    /// The first run of a session sometimes comes back with a bogus trap
    /// for no documented reason; it is silently retried once.
    pub fn run(&mut self, console: &mut dyn FnMut(u8)) -> Result<TrapCode, Error> {
        let cpu = self.active_cpu;
        let family = self.family;

        let mut outcome = Dsu::new(&mut self.bridge, family).run(cpu, console)?;

        if self.first_run && !outcome_ok(outcome) {
            tracing::debug!(
                "first run ended with tt {:#04x} / tbr tt {:#04x}, retrying once",
                outcome.tt,
                outcome.tbr_tt
            );
            self.first_run = false;
            outcome = Dsu::new(&mut self.bridge, family).run(cpu, console)?;
        }

        // A clean DSU trap paired with a different TBR code means the
        // program ended in a user `ta`; report that code.
        let code = if outcome.tt == 0x80 && outcome.tbr_tt != 0x80 {
            outcome.tbr_tt
        } else {
            outcome.tt
        };
        Ok(TrapCode(code))
    }

    // --- images ----------------------------------------------------------

    /// Streams `path` (past the 64 KiB prefix) into SDRAM.
    pub fn load(&mut self, path: &Path, progress: Progress<'_>) -> Result<LoadInfo, Error> {
        let data = read_image(path)?;
        let words = payload_words(&data);

        self.bridge
            .write_many_with_progress(self.family.map().sdram_start, &words, progress)?;

        Ok(LoadInfo {
            file_size: data.len() as u64,
            payload_words: words.len(),
        })
    }

    /// Re-reads what [`Monitor::load`] wrote and reports the first byte
    /// that differs.
    pub fn verify(&mut self, path: &Path, progress: Progress<'_>) -> Result<LoadInfo, Error> {
        let data = read_image(path)?;
        let words = payload_words(&data);

        let readback = self.bridge.read_many_with_progress(
            self.family.map().sdram_start,
            words.len(),
            progress,
        )?;

        for (i, (want, got)) in words.iter().zip(&readback).enumerate() {
            if want != got {
                let byte = (0..4)
                    .find(|k| want.to_be_bytes()[*k] != got.to_be_bytes()[*k])
                    .unwrap_or(0);
                return Err(Error::VerifyMismatch(
                    (IMAGE_PREFIX + i * 4 + byte) as u64,
                ));
            }
        }

        Ok(LoadInfo {
            file_size: data.len() as u64,
            payload_words: words.len(),
        })
    }

    /// Reads `len` bytes of target memory into `path`, MSB first.
    pub fn dump(
        &mut self,
        addr: u32,
        len: usize,
        path: &Path,
        progress: Progress<'_>,
    ) -> Result<(), Error> {
        let words = self
            .bridge
            .read_many_with_progress(addr, len.div_ceil(4), progress)?;

        let mut bytes = Vec::with_capacity(words.len() * 4);
        for word in words {
            bytes.extend_from_slice(&word.to_be_bytes());
        }
        bytes.truncate(len);

        std::fs::write(path, &bytes).map_err(|source| Error::File {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Fills `count` words at `addr` with `fill`.
    pub fn wash(
        &mut self,
        count: usize,
        addr: u32,
        fill: u32,
        progress: Progress<'_>,
    ) -> Result<(), Error> {
        let words = vec![fill; count];
        Ok(self
            .bridge
            .write_many_with_progress(addr, &words, progress)?)
    }

    /// The window the active core currently sits in.
    pub fn current_window(&mut self) -> Result<u32, Error> {
        let cpu = self.active_cpu;
        self.dsu().current_window(cpu)
    }

    /// Closes the probe. Also happens on drop.
    pub fn close(mut self) {
        self.bridge.probe_mut().close();
    }
}

fn outcome_ok(outcome: RunOutcome) -> bool {
    outcome.tt == 0x80 && outcome.tbr_tt == 0x80
}

fn read_image(path: &Path) -> Result<Vec<u8>, Error> {
    let data = std::fs::read(path).map_err(|source| Error::File {
        path: path.to_path_buf(),
        source,
    })?;

    if data.len() < IMAGE_PREFIX {
        return Err(Error::ImageTooSmall {
            path: path.to_path_buf(),
            size: data.len() as u64,
        });
    }
    Ok(data)
}

/// Repacks the image payload into big-endian words, zero-padding the
/// final partial word.
fn payload_words(data: &[u8]) -> Vec<u32> {
    data[IMAGE_PREFIX..]
        .chunks(4)
        .map(|chunk| {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            u32::from_be_bytes(word)
        })
        .collect()
}
