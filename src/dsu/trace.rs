//! The per-core instruction trace buffer.
//!
//! The DSU records executed instructions into a circular buffer of
//! 16-byte lines; the trace control register holds the line the hardware
//! will write *next*, so retrieval walks backwards from there with
//! wrap-around. An instruction that produced a load/store value takes a
//! second, continuation line carrying that value.

use bitfield::bitfield;

use super::Dsu;
use crate::error::Error;

/// Offsets within a core's DSU area.
const TRACE_BUFFER: u32 = 0x10_0000;
const TRACE_CTRL: u32 = 0x11_0000;

pub const LINE_SIZE: u32 = 16;
pub const BUFFER_SIZE: u32 = 0x1000;
pub const LINE_COUNT: u32 = BUFFER_SIZE / LINE_SIZE;

bitfield! {
    /// First word of a trace line.
    struct TimeTagWord(u32);
    impl Debug;
    u32, time_tag, _: 29, 0;
    continuation, _: 30;
}

/// One raw 4-word line of the instruction trace buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceLine {
    pub fields: [u32; 4],
}

impl TraceLine {
    pub fn time_tag(&self) -> u32 {
        TimeTagWord(self.fields[0]).time_tag()
    }

    /// Continuation lines carry the load/store value of the previous
    /// instruction instead of an instruction of their own.
    pub fn is_continuation(&self) -> bool {
        TimeTagWord(self.fields[0]).continuation()
    }

    pub fn pc(&self) -> u32 {
        self.fields[2] & !0x3
    }

    /// The instruction trapped.
    pub fn trapped(&self) -> bool {
        self.fields[2] & 0x2 != 0
    }

    /// Opcode on a primary line, load/store value on a continuation line.
    pub fn payload(&self) -> u32 {
        self.fields[3]
    }
}

/// A primary trace line with its continuation folded in: what the
/// display actually shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceInstruction {
    pub time_tag: u32,
    pub pc: u32,
    pub opcode: u32,
    pub trapped: bool,
    /// Load/store effect value, when the instruction had one.
    pub value: Option<u32>,
}

/// Walks the lines forward (oldest first) and merges continuation lines
/// into the instruction they belong to.
pub fn fold_lines(lines: &[TraceLine]) -> Vec<TraceInstruction> {
    let mut out: Vec<TraceInstruction> = Vec::with_capacity(lines.len());

    for line in lines {
        if line.is_continuation() {
            if let Some(last) = out.last_mut() {
                last.value = Some(line.payload());
            }
            continue;
        }
        out.push(TraceInstruction {
            time_tag: line.time_tag(),
            pc: line.pc(),
            opcode: line.payload(),
            trapped: line.trapped(),
            value: None,
        });
    }

    out
}

impl Dsu<'_> {
    /// Fetches `line_count` trace lines of `cpu`, skipping the most
    /// recent `line_start` lines, oldest first.
    ///
    /// When the span straddles the buffer's write pointer the read is
    /// split into a tail burst and a head burst, keeping temporal order.
    pub fn trace_lines(
        &mut self,
        cpu: u32,
        line_count: u32,
        line_start: u32,
    ) -> Result<Vec<TraceLine>, Error> {
        self.check_cpu(cpu)?;
        let line_count = line_count.min(LINE_COUNT);
        if line_count == 0 {
            return Ok(Vec::new());
        }

        let base = self.base(cpu);
        let ctrl = self.bridge.read32(base + TRACE_CTRL)?;
        let next_line = ctrl & 0xFF;

        let first_line = next_line.wrapping_sub(line_start + line_count) & (LINE_COUNT - 1);
        let offset = first_line * LINE_SIZE;

        let total = line_count * LINE_SIZE;
        let tail = if offset + total > BUFFER_SIZE {
            BUFFER_SIZE - offset
        } else {
            total
        };

        let mut words = self
            .bridge
            .read_many(base + TRACE_BUFFER + offset, (tail / 4) as usize)?;
        if tail < total {
            let head = total - tail;
            words.extend(self.bridge.read_many(base + TRACE_BUFFER, (head / 4) as usize)?);
        }

        Ok(words
            .chunks_exact(4)
            .map(|c| TraceLine {
                fields: [c[0], c[1], c[2], c[3]],
            })
            .collect())
    }
}
