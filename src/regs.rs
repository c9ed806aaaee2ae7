//! Register names as the operator types them (`psr`, `g3`, `f12`, `d4`,
//! `w5l2`, `sp`, ...), resolved into typed descriptors and dispatched by
//! kind.

use crate::dsu::{Dsu, SpecialReg, NWINDOWS};
use crate::error::Error;

/// A parsed register name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Register {
    Special(SpecialReg),
    /// %o6 of a window.
    StackPointer { window: u32 },
    /// %i6 of a window.
    FramePointer { window: u32 },
    Global(u32),
    Input { window: u32, num: u32 },
    Output { window: u32, num: u32 },
    Local { window: u32, num: u32 },
    Float(u32),
    Double(u32),
    /// `w<N>`: a whole-window summary rather than a single register.
    Window(u32),
}

/// A register's content, tagged with its width/kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterValue {
    Word(u32),
    /// Raw IEEE 754 single bits.
    Float(u32),
    /// Raw IEEE 754 double bits.
    Double(u64),
}

/// Parses an operator-typed register name. `cwp` is the core's current
/// window, which unqualified window registers and `sp`/`fp` refer to.
pub fn parse_register(name: &str, cwp: u32) -> Result<Register, Error> {
    let unknown = || Error::RegisterName(name.to_string());

    match name {
        "y" => return Ok(Register::Special(SpecialReg::Y)),
        "psr" => return Ok(Register::Special(SpecialReg::Psr)),
        "wim" => return Ok(Register::Special(SpecialReg::Wim)),
        "tbr" => return Ok(Register::Special(SpecialReg::Tbr)),
        "pc" => return Ok(Register::Special(SpecialReg::Pc)),
        "npc" => return Ok(Register::Special(SpecialReg::Npc)),
        "fsr" => return Ok(Register::Special(SpecialReg::Fsr)),
        "cpsr" => return Ok(Register::Special(SpecialReg::Cpsr)),
        "sp" => return Ok(Register::StackPointer { window: cwp }),
        "fp" => return Ok(Register::FramePointer { window: cwp }),
        _ => {}
    }

    let mut chars = name.chars();
    let kind = chars.next().ok_or_else(unknown)?;
    let rest = chars.as_str();

    match kind {
        'g' | 'i' | 'l' | 'o' => {
            let num = parse_window_reg_num(rest).ok_or_else(unknown)?;
            make_window_reg(kind, cwp, num).ok_or_else(unknown)
        }
        'f' => {
            let num: u32 = rest.parse().map_err(|_| unknown())?;
            if rest.len() > 2 || num > 31 {
                return Err(Error::RegisterIndex {
                    bank: "f",
                    index: num,
                    max: 31,
                });
            }
            Ok(Register::Float(num))
        }
        'd' => {
            let num: u32 = rest.parse().map_err(|_| unknown())?;
            if rest.len() > 2 || num > 15 {
                return Err(Error::RegisterIndex {
                    bank: "d",
                    index: num,
                    max: 15,
                });
            }
            Ok(Register::Double(num))
        }
        'w' => {
            let mut rest = rest.chars();
            let window = rest
                .next()
                .and_then(|c| c.to_digit(10))
                .filter(|w| *w < NWINDOWS)
                .ok_or_else(unknown)?;

            match (rest.next(), rest.next(), rest.next()) {
                (None, _, _) => Ok(Register::Window(window)),
                (Some(kind), Some(digit), None) => {
                    let num = digit
                        .to_digit(10)
                        .filter(|n| *n <= 7)
                        .ok_or_else(unknown)?;
                    make_window_reg(kind, window, num).ok_or_else(unknown)
                }
                _ => Err(unknown()),
            }
        }
        _ => Err(unknown()),
    }
}

fn parse_window_reg_num(s: &str) -> Option<u32> {
    let mut chars = s.chars();
    let digit = chars.next()?.to_digit(10)?;
    if chars.next().is_some() || digit > 7 {
        return None;
    }
    Some(digit)
}

fn make_window_reg(kind: char, window: u32, num: u32) -> Option<Register> {
    match kind {
        'g' => Some(Register::Global(num)),
        'i' => Some(Register::Input { window, num }),
        'o' => Some(Register::Output { window, num }),
        'l' => Some(Register::Local { window, num }),
        _ => None,
    }
}

/// Reads a register through the DSU.
pub fn read_register(dsu: &mut Dsu<'_>, cpu: u32, reg: Register) -> Result<RegisterValue, Error> {
    let value = match reg {
        Register::Special(r) => RegisterValue::Word(dsu.special(cpu, r)?),
        Register::StackPointer { window } => {
            RegisterValue::Word(dsu.stack_pointer(cpu, window)?)
        }
        Register::FramePointer { window } => {
            RegisterValue::Word(dsu.frame_pointer(cpu, window)?)
        }
        Register::Global(n) => RegisterValue::Word(dsu.global_reg(cpu, n)?),
        Register::Input { window, num } => RegisterValue::Word(dsu.input_reg(cpu, window, num)?),
        Register::Output { window, num } => {
            RegisterValue::Word(dsu.output_reg(cpu, window, num)?)
        }
        Register::Local { window, num } => RegisterValue::Word(dsu.local_reg(cpu, window, num)?),
        Register::Float(n) => RegisterValue::Float(dsu.float_reg(cpu, n)?),
        Register::Double(n) => RegisterValue::Double(dsu.double_reg(cpu, n)?),
        Register::Window(w) => return Err(Error::RegisterName(format!("w{w}"))),
    };
    Ok(value)
}

/// Writes a register through the DSU. `bits` is the raw bit pattern; it
/// is truncated to the register's width.
pub fn write_register(dsu: &mut Dsu<'_>, cpu: u32, reg: Register, bits: u64) -> Result<(), Error> {
    match reg {
        Register::Special(r) => dsu.set_special(cpu, r, bits as u32),
        Register::StackPointer { window } => dsu.set_stack_pointer(cpu, window, bits as u32),
        Register::FramePointer { window } => dsu.set_frame_pointer(cpu, window, bits as u32),
        Register::Global(n) => dsu.set_global_reg(cpu, n, bits as u32),
        Register::Input { window, num } => dsu.set_input_reg(cpu, window, num, bits as u32),
        Register::Output { window, num } => dsu.set_output_reg(cpu, window, num, bits as u32),
        Register::Local { window, num } => dsu.set_local_reg(cpu, window, num, bits as u32),
        Register::Float(n) => dsu.set_float_reg(cpu, n, bits as u32),
        Register::Double(n) => dsu.set_double_reg(cpu, n, bits),
        Register::Window(w) => Err(Error::RegisterName(format!("w{w}"))),
    }
}
