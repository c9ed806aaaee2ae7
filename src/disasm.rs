//! Minimal SPARC-V8 disassembler for instruction-trace display.
//!
//! Covers the format-1/2 instructions (CALL, SETHI, branches) and the
//! common format-3 opcodes; anything unrecognised prints as a raw word.
//! This is a display aid, not a full decoder.

const BICC_NAMES: [&str; 16] = [
    "bn", "be", "ble", "bl", "bleu", "bcs", "bneg", "bvs", "ba", "bne", "bg", "bge", "bgu", "bcc",
    "bpos", "bvc",
];

const FBFCC_NAMES: [&str; 16] = [
    "fbn", "fbne", "fblg", "fbul", "fbl", "fbug", "fbg", "fbu", "fba", "fbe", "fbue", "fbge",
    "fbuge", "fble", "fbule", "fbo",
];

const TICC_NAMES: [&str; 16] = [
    "tn", "te", "tle", "tl", "tleu", "tcs", "tneg", "tvs", "ta", "tne", "tg", "tge", "tgu", "tcc",
    "tpos", "tvc",
];

fn reg_name(r: u32) -> String {
    let bank = ["g", "o", "l", "i"][(r >> 3) as usize & 3];
    format!("%{bank}{}", r & 7)
}

fn sign_extend(value: u32, bits: u32) -> i32 {
    let shift = 32 - bits;
    ((value << shift) as i32) >> shift
}

/// Disassembles `opcode` as fetched from `pc` (branch and call targets
/// are pc-relative).
pub fn disassemble(pc: u32, opcode: u32) -> String {
    match opcode >> 30 {
        0b01 => {
            let disp = sign_extend(opcode & 0x3FFF_FFFF, 30);
            let target = pc.wrapping_add((disp as u32) << 2);
            format!("call  0x{target:08x}")
        }
        0b00 => disassemble_format2(pc, opcode),
        _ => disassemble_format3(opcode),
    }
}

fn disassemble_format2(pc: u32, opcode: u32) -> String {
    let op2 = opcode >> 22 & 0x7;
    let rd = opcode >> 25 & 0x1F;

    match op2 {
        0b100 => {
            let imm22 = opcode & 0x3F_FFFF;
            if rd == 0 && imm22 == 0 {
                "nop".into()
            } else {
                format!("sethi  %hi(0x{:x}), {}", imm22 << 10, reg_name(rd))
            }
        }
        0b010 | 0b110 => {
            let cond = (opcode >> 25 & 0xF) as usize;
            let name = if op2 == 0b010 {
                BICC_NAMES[cond]
            } else {
                FBFCC_NAMES[cond]
            };
            let annul = if opcode >> 29 & 1 != 0 { ",a" } else { "" };
            let disp = sign_extend(opcode & 0x3F_FFFF, 22);
            let target = pc.wrapping_add((disp as u32) << 2);
            format!("{name}{annul}  0x{target:08x}")
        }
        0b000 => format!("unimp  0x{:x}", opcode & 0x3F_FFFF),
        _ => format!(".word  0x{opcode:08x}"),
    }
}

/// Second operand of a format-3 instruction: register or signed
/// immediate.
fn operand2(opcode: u32) -> String {
    if opcode >> 13 & 1 != 0 {
        let simm = sign_extend(opcode & 0x1FFF, 13);
        format!("{simm}")
    } else {
        reg_name(opcode & 0x1F)
    }
}

/// `[%rs1 + operand2]`, folding zero offsets.
fn address_operand(opcode: u32) -> String {
    let rs1 = reg_name(opcode >> 14 & 0x1F);
    match operand2(opcode).as_str() {
        "0" | "%g0" => format!("[{rs1}]"),
        op2 => format!("[{rs1} + {op2}]"),
    }
}

fn disassemble_format3(opcode: u32) -> String {
    let op = opcode >> 30;
    let op3 = opcode >> 19 & 0x3F;
    let rd = reg_name(opcode >> 25 & 0x1F);
    let rs1 = reg_name(opcode >> 14 & 0x1F);
    let op2 = operand2(opcode);

    if op == 0b11 {
        // memory access
        let name = match op3 {
            0x00 => "ld",
            0x01 => "ldub",
            0x02 => "lduh",
            0x03 => "ldd",
            0x04 => "st",
            0x05 => "stb",
            0x06 => "sth",
            0x07 => "std",
            0x09 => "ldsb",
            0x0A => "ldsh",
            0x0D => "ldstub",
            0x0F => "swap",
            0x20 => "ldf",
            0x21 => "ldfsr",
            0x23 => "lddf",
            0x24 => "stf",
            0x25 => "stfsr",
            0x27 => "stdf",
            _ => return format!(".word  0x{opcode:08x}"),
        };
        return if name.starts_with("st") || name == "swap" {
            format!("{name}  {rd}, {}", address_operand(opcode))
        } else {
            format!("{name}  {}, {rd}", address_operand(opcode))
        };
    }

    let name = match op3 {
        0x00 => "add",
        0x01 => "and",
        0x02 => "or",
        0x03 => "xor",
        0x04 => "sub",
        0x05 => "andn",
        0x06 => "orn",
        0x07 => "xnor",
        0x08 => "addx",
        0x0A => "umul",
        0x0B => "smul",
        0x0C => "subx",
        0x0E => "udiv",
        0x0F => "sdiv",
        0x10 => "addcc",
        0x11 => "andcc",
        0x12 => "orcc",
        0x13 => "xorcc",
        0x14 => "subcc",
        0x15 => "andncc",
        0x16 => "orncc",
        0x17 => "xnorcc",
        0x18 => "addxcc",
        0x1A => "umulcc",
        0x1B => "smulcc",
        0x1C => "subxcc",
        0x1E => "udivcc",
        0x1F => "sdivcc",
        0x24 => "mulscc",
        0x25 => "sll",
        0x26 => "srl",
        0x27 => "sra",
        0x28 => return format!("rd  %y, {rd}"),
        0x29 => return format!("rd  %psr, {rd}"),
        0x2A => return format!("rd  %wim, {rd}"),
        0x2B => return format!("rd  %tbr, {rd}"),
        0x30 => return format!("wr  {rs1}, {op2}, %y"),
        0x31 => return format!("wr  {rs1}, {op2}, %psr"),
        0x32 => return format!("wr  {rs1}, {op2}, %wim"),
        0x33 => return format!("wr  {rs1}, {op2}, %tbr"),
        0x34 | 0x35 => return format!("fpop  0x{opcode:08x}"),
        0x38 => {
            // the return idioms are worth naming
            return match (rd.as_str(), rs1.as_str(), op2.as_str()) {
                ("%g0", "%i7", "8") => "ret".into(),
                ("%g0", "%o7", "8") => "retl".into(),
                _ => format!("jmpl  {rs1} + {op2}, {rd}"),
            };
        }
        0x39 => return format!("rett  {rs1} + {op2}"),
        0x3A => {
            let cond = (opcode >> 25 & 0xF) as usize;
            return format!("{}  {op2}", TICC_NAMES[cond]);
        }
        0x3B => return format!("flush  {}", address_operand(opcode)),
        0x3C => "save",
        0x3D => "restore",
        _ => return format!(".word  0x{opcode:08x}"),
    };

    format!("{name}  {rs1}, {op2}, {rd}")
}
