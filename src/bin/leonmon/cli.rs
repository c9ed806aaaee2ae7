//! The interactive console: line editing, command dispatch and output
//! formatting. All target work is delegated to the [`Monitor`].

use std::io::Write;
use std::path::Path;

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use leonmon::dsu::trace::{fold_lines, TraceInstruction};
use leonmon::regs::{self, Register, RegisterValue};
use leonmon::{disasm, Error, Monitor};

const HISTORY_FILE: &str = ".leonmon_history";

enum Outcome {
    Continue,
    Exit,
}

pub fn console(mut monitor: Monitor) -> anyhow::Result<()> {
    let mut editor = DefaultEditor::new()?;
    let _ = editor.load_history(HISTORY_FILE);

    loop {
        match editor.readline("leonmon> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(line);

                match dispatch(&mut monitor, line) {
                    Ok(Outcome::Continue) => {}
                    Ok(Outcome::Exit) => break,
                    Err(err) => println!("{}", err.to_string().red()),
                }
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(err) => return Err(err.into()),
        }
    }

    let _ = editor.save_history(HISTORY_FILE);
    monitor.close();
    println!("Goodbye");
    Ok(())
}

fn dispatch(monitor: &mut Monitor, line: &str) -> Result<Outcome, Error> {
    let mut parts = line.split_whitespace();
    let command = parts.next().unwrap_or_default();
    let params: Vec<&str> = parts.collect();

    match command {
        "help" => help(),
        "scan" => scan(monitor)?,
        "reset" => {
            print!("Resetting...");
            flush();
            monitor.reset()?;
            println!(" Done!");
        }
        "mem" => mem(monitor, &params)?,
        "memh" => memh(monitor, &params)?,
        "memb" => memb(monitor, &params)?,
        "wmem" => wmem(monitor, &params, Width::Word)?,
        "wmemh" => wmem(monitor, &params, Width::Half)?,
        "wmemb" => wmem(monitor, &params, Width::Byte)?,
        "bdump" => bdump(monitor, &params)?,
        "inst" => inst(monitor, &params)?,
        "reg" => reg(monitor, &params)?,
        "cpu" => cpu(monitor, &params)?,
        "wash" => wash(monitor, &params)?,
        "load" => load(monitor, &params)?,
        "verify" => verify(monitor, &params)?,
        "run" => run(monitor)?,
        "exit" => return Ok(Outcome::Exit),
        unknown => {
            println!("Command '{unknown}' not recognized. Type 'help' to get a list of commands.");
        }
    }

    Ok(Outcome::Continue)
}

fn help() {
    println!("Usage:");
    println!("  command <param#1> <param#2> ... <param#X>");
    println!();
    println!("List of commands:");
    println!("  help: \t This list of all available commands");
    println!("  scan: \t Scan for all IR opcodes with a non-empty data register");
    println!("  reset: \t Reset the active core (the one 'run' uses)");
    println!();
    println!("  mem: \t\t Read <length#2> 32-bit words starting at <address#1>");
    println!("  memh: \t Read <length#2> 16-bit halfwords starting at <address#1>");
    println!("  memb: \t Read <length#2> 8-bit bytes starting at <address#1>");
    println!("  wmem: \t Write a 32-bit word <data#2> to memory <address#1>");
    println!("  wmemh: \t Write a 16-bit halfword <data#2> to memory <address#1>");
    println!("  wmemb: \t Write an 8-bit byte <data#2> to memory <address#1>");
    println!();
    println!("  bdump: \t Save <length#2> bytes of memory from <address#1> to a file <path#3>");
    println!("  inst: \t Show the last <count#1> lines of the instruction trace buffer");
    println!("  reg: \t\t Show or set registers: reg [name [value]]");
    println!("  cpu: \t\t Core control: cpu [enable|disable|active <i>]");
    println!("  wash: \t Fill memory: wash [words [addr [value]]]");
    println!();
    println!("  load: \t Write a file <path#1> to the device memory");
    println!("  verify: \t Verify a file <path#1> against the device memory");
    println!("  run: \t\t Run the executable most recently loaded into memory");
    println!();
    println!("  exit: \t Exit leonmon");
}

// --- parameter parsing ---------------------------------------------------

fn parse_u64(param: &str) -> Result<u64, Error> {
    let digits = param.strip_prefix("0x").or_else(|| param.strip_prefix("0X"));
    let parsed = match digits {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => param.parse(),
    };
    parsed.map_err(|_| Error::Argument(format!("'{param}' is not a number")))
}

fn parse_u32(param: &str) -> Result<u32, Error> {
    let value = parse_u64(param)?;
    u32::try_from(value).map_err(|_| Error::Argument(format!("'{param}' does not fit in 32 bits")))
}

fn require<'a>(params: &[&'a str], index: usize, what: &str) -> Result<&'a str, Error> {
    params
        .get(index)
        .copied()
        .ok_or_else(|| Error::Argument(format!("missing parameter: {what}")))
}

fn progress_bar(label: &str, total: usize) -> ProgressBar {
    let bar = ProgressBar::new(total as u64);
    bar.set_style(
        ProgressStyle::with_template("{msg} [{bar:30}] {percent:>3}%")
            .expect("static template")
            .progress_chars("=> "),
    );
    bar.set_message(label.to_string());
    bar
}

fn flush() {
    let _ = std::io::stdout().flush();
}

// --- memory display ------------------------------------------------------

fn printable(byte: u8) -> char {
    if (32..=126).contains(&byte) {
        byte as char
    } else {
        '.'
    }
}

/// Hex rows with an ASCII sidebar, the classic monitor dump layout.
fn dump_rows<T: Copy>(
    start: u32,
    items: &[T],
    per_row: usize,
    item_width: usize,
    stride: u32,
    to_bytes: impl Fn(T) -> Vec<u8>,
) {
    for (row_index, row) in items.chunks(per_row).enumerate() {
        let addr = start + row_index as u32 * per_row as u32 * stride;
        print!("0x{addr:08x}  ");
        for item in row {
            let bytes = to_bytes(*item);
            let mut value = 0u64;
            for b in &bytes {
                value = value << 8 | *b as u64;
            }
            print!("{value:0item_width$x}  ");
        }
        // pad a short final row so the sidebar lines up
        for _ in row.len()..per_row {
            print!("{:width$}  ", "", width = item_width);
        }
        let ascii: String = row
            .iter()
            .flat_map(|item| to_bytes(*item))
            .map(printable)
            .collect();
        println!("{ascii}");
    }
}

fn mem(monitor: &mut Monitor, params: &[&str]) -> Result<(), Error> {
    let addr = parse_u32(require(params, 0, "address")?)?;
    let count = match params.get(1) {
        Some(p) => parse_u32(p)? as usize,
        None => 1,
    };

    let words = if count > 256 {
        let bar = progress_bar("Reading memory...", count);
        let words =
            monitor.read_words_with_progress(addr, count, &mut |done, _| {
                bar.set_position(done as u64)
            })?;
        bar.finish_and_clear();
        words
    } else {
        monitor.read_words(addr, count)?
    };

    dump_rows(addr, &words, 4, 8, 4, |w: u32| w.to_be_bytes().to_vec());
    Ok(())
}

fn memh(monitor: &mut Monitor, params: &[&str]) -> Result<(), Error> {
    let addr = parse_u32(require(params, 0, "address")?)?;
    let count = match params.get(1) {
        Some(p) => parse_u32(p)? as usize,
        None => 1,
    };

    let mut halves = Vec::with_capacity(count);
    for i in 0..count {
        halves.push(monitor.read_half(addr + 2 * i as u32)?);
    }

    dump_rows(addr, &halves, 8, 4, 2, |h: u16| h.to_be_bytes().to_vec());
    Ok(())
}

fn memb(monitor: &mut Monitor, params: &[&str]) -> Result<(), Error> {
    let addr = parse_u32(require(params, 0, "address")?)?;
    let count = match params.get(1) {
        Some(p) => parse_u32(p)? as usize,
        None => 1,
    };

    let mut bytes = Vec::with_capacity(count);
    for i in 0..count {
        bytes.push(monitor.read_byte(addr + i as u32)?);
    }

    dump_rows(addr, &bytes, 16, 2, 1, |b: u8| vec![b]);
    Ok(())
}

#[derive(Clone, Copy)]
enum Width {
    Word,
    Half,
    Byte,
}

fn wmem(monitor: &mut Monitor, params: &[&str], width: Width) -> Result<(), Error> {
    let addr = parse_u32(require(params, 0, "address")?)?;
    let value = parse_u32(require(params, 1, "value")?)?;

    print!("Writing to memory... ");
    flush();
    match width {
        Width::Word => monitor.write_word(addr, value)?,
        Width::Half => {
            let value = u16::try_from(value)
                .map_err(|_| Error::Argument(format!("{value:#x} does not fit in 16 bits")))?;
            monitor.write_half(addr, value)?;
        }
        Width::Byte => {
            let value = u8::try_from(value)
                .map_err(|_| Error::Argument(format!("{value:#x} does not fit in 8 bits")))?;
            monitor.write_byte(addr, value)?;
        }
    }
    println!("OK!");
    Ok(())
}

fn bdump(monitor: &mut Monitor, params: &[&str]) -> Result<(), Error> {
    let addr = parse_u32(require(params, 0, "address")?)?;
    let len = parse_u32(require(params, 1, "length")?)? as usize;
    let path = require(params, 2, "file path")?;

    let bar = progress_bar("Reading memory...", len.div_ceil(4));
    monitor.dump(addr, len, Path::new(path), &mut |done, _| {
        bar.set_position(done as u64)
    })?;
    bar.finish_and_clear();

    println!("Saved {len} bytes to '{path}'");
    Ok(())
}

// --- trace display -------------------------------------------------------

fn inst(monitor: &mut Monitor, params: &[&str]) -> Result<(), Error> {
    let count = match params.first() {
        Some(p) => parse_u32(p)?,
        None => 10,
    };

    let cpu = monitor.active_cpu();
    let lines = monitor.dsu().trace_lines(cpu, count, 0)?;
    let instructions = fold_lines(&lines);

    println!("      TIME  ADDRESS     INSTRUCTION                     RESULT");
    for inst in &instructions {
        print_trace_instruction(inst);
    }
    Ok(())
}

fn print_trace_instruction(inst: &TraceInstruction) {
    let disassembly = disasm::disassemble(inst.pc, inst.opcode);
    let result = match inst.value {
        Some(value) => format!("[{value:08x}]"),
        None => String::new(),
    };
    let trap = if inst.trapped { "  TRAP" } else { "" };
    println!(
        "{:>10}  0x{:08x}  {:<30}  {}{}",
        inst.time_tag, inst.pc, disassembly, result, trap
    );
}

// --- registers -----------------------------------------------------------

fn reg(monitor: &mut Monitor, params: &[&str]) -> Result<(), Error> {
    let cpu = monitor.active_cpu();
    let cwp = monitor.current_window()?;

    let Some(&name) = params.first() else {
        return print_register_summary(monitor, cpu, cwp);
    };

    let register = regs::parse_register(name, cwp)?;

    if let Register::Window(window) = register {
        return print_window(monitor, cpu, window);
    }

    match params.get(1) {
        Some(value) => {
            let bits = parse_u64(value)?;
            let mut dsu = monitor.dsu();
            regs::write_register(&mut dsu, cpu, register, bits)?;
        }
        None => {
            let mut dsu = monitor.dsu();
            let value = regs::read_register(&mut dsu, cpu, register)?;
            print_register(name, value);
        }
    }
    Ok(())
}

fn print_register(name: &str, value: RegisterValue) {
    match value {
        RegisterValue::Word(w) => println!("{name} = {w} (0x{w:08x})"),
        RegisterValue::Float(bits) => {
            println!("{name} = {} (0x{bits:08x})", f32::from_bits(bits));
        }
        RegisterValue::Double(bits) => {
            println!("{name} = {} (0x{bits:016x})", f64::from_bits(bits));
        }
    }
}

fn print_window(monitor: &mut Monitor, cpu: u32, window: u32) -> Result<(), Error> {
    let regs = monitor.dsu().window_regs(cpu, window)?;

    println!("         {:<8}  {:<8}  {:<8}  {:<8}", "INS", "LOCALS", "OUTS", "GLOBALS");
    for i in 0..8 {
        println!(
            "{i:>6}:  {:08X}  {:08X}  {:08X}  {:08X}",
            regs.ins[i], regs.locals[i], regs.outs[i], regs.globals[i]
        );
    }
    println!();
    Ok(())
}

fn print_register_summary(monitor: &mut Monitor, cpu: u32, cwp: u32) -> Result<(), Error> {
    print_window(monitor, cpu, cwp)?;

    let mut dsu = monitor.dsu();
    use leonmon::dsu::SpecialReg;
    let psr = dsu.special(cpu, SpecialReg::Psr)?;
    let wim = dsu.special(cpu, SpecialReg::Wim)?;
    let tbr = dsu.special(cpu, SpecialReg::Tbr)?;
    let y = dsu.special(cpu, SpecialReg::Y)?;
    let pc = dsu.special(cpu, SpecialReg::Pc)?;
    let npc = dsu.special(cpu, SpecialReg::Npc)?;

    println!("   psr: {psr:08X}   wim: {wim:08X}   tbr: {tbr:08X}   y: {y:08X}");
    println!();
    println!("   pc:  {pc:08X}");
    println!("   npc: {npc:08X}");
    println!();
    Ok(())
}

// --- core control --------------------------------------------------------

fn cpu(monitor: &mut Monitor, params: &[&str]) -> Result<(), Error> {
    let Some(&sub) = params.first() else {
        let active = monitor.active_cpu();
        let count = monitor.dsu().core_count();
        for cpu in 0..count {
            let down = monitor.dsu().powered_down(cpu)?;
            let state = if down { "power-down" } else { "running" };
            let marker = if cpu == active { " (active)" } else { "" };
            println!("  cpu {cpu}: {state}{marker}");
        }
        return Ok(());
    };

    let index = parse_u32(require(params, 1, "cpu index")?)?;
    match sub {
        "active" => {
            monitor.set_active_cpu(index)?;
            println!("Active CPU is now {index}");
        }
        "enable" => {
            monitor.dsu().wake(index)?;
            println!("CPU {index} woken");
        }
        "disable" => {
            monitor.dsu().park(index)?;
            println!("CPU {index} parked in debug-idle");
        }
        other => {
            return Err(Error::Argument(format!(
                "unknown cpu subcommand '{other}' (enable|disable|active)"
            )));
        }
    }
    Ok(())
}

// --- bulk memory ---------------------------------------------------------

fn wash(monitor: &mut Monitor, params: &[&str]) -> Result<(), Error> {
    let count = match params.first() {
        Some(p) => parse_u32(p)? as usize,
        None => 16,
    };
    let addr = match params.get(1) {
        Some(p) => parse_u32(p)?,
        None => monitor.family().map().sdram_start,
    };
    let fill = match params.get(2) {
        Some(p) => parse_u32(p)?,
        None => 0,
    };

    println!("Writing 0x{fill:x} to {count} word(s) in memory, starting at 0x{addr:08x}...");
    let bar = progress_bar("Washing memory...", count);
    monitor.wash(count, addr, fill, &mut |done, _| {
        bar.set_position(done as u64)
    })?;
    bar.finish_and_clear();
    println!("Wash of {count} word(s) complete!");
    Ok(())
}

fn load(monitor: &mut Monitor, params: &[&str]) -> Result<(), Error> {
    let path = require(params, 0, "file path")?;

    println!("Uploading file '{path}'...");
    let bar = progress_bar("Writing data to memory...", 1);
    let info = monitor.load(Path::new(path), &mut |done, total| {
        bar.set_length(total as u64);
        bar.set_position(done as u64);
    })?;
    bar.finish_and_clear();

    println!("File size: {} B", info.file_size);
    println!("Words written: {}", info.payload_words);
    println!("Loading file complete!");
    Ok(())
}

fn verify(monitor: &mut Monitor, params: &[&str]) -> Result<(), Error> {
    let path = require(params, 0, "file path")?;

    println!("Verifying file '{path}'...");
    let bar = progress_bar("Reading data from memory...", 1);
    let result = monitor.verify(Path::new(path), &mut |done, total| {
        bar.set_length(total as u64);
        bar.set_position(done as u64);
    });
    bar.finish_and_clear();

    match result {
        Ok(_) => {
            println!("Verifying file... OK!");
            Ok(())
        }
        Err(Error::VerifyMismatch(offset)) => {
            println!("Verifying file... ERROR! Byte {offset} incorrect.");
            Ok(())
        }
        Err(other) => Err(other),
    }
}

// --- run -----------------------------------------------------------------

fn run(monitor: &mut Monitor) -> Result<(), Error> {
    let trap = monitor.run(&mut |byte| {
        print!("{}", printable_console(byte));
        flush();
    })?;

    if trap.is_ok() {
        println!(" => OK!");
    } else if trap.is_hardware() {
        println!("{}", " => Error: Hardware trap!".red());
        println!();
        println!("{trap}");
    } else {
        println!("{}", " => Error: Software trap!".red());
        println!();
        println!("{trap}");
    }
    Ok(())
}

/// UART bytes go to the console as-is except for control characters
/// that would mangle the terminal.
fn printable_console(byte: u8) -> char {
    match byte {
        b'\n' | b'\r' | b'\t' => byte as char,
        0x20..=0x7E => byte as char,
        _ => '.',
    }
}

fn scan(monitor: &mut Monitor) -> Result<(), Error> {
    println!("Scanning for IR opcodes that return a non-zero DR length. This might take a while...");

    let found = monitor.scan_opcodes()?;
    for (opcode, length) in &found {
        println!("- DR length for opcode {opcode:#04x}: {length} bit");
    }
    println!("Scan complete! Found {} instructions.", found.len());
    Ok(())
}
