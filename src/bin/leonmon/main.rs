mod cli;

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;

use leonmon::probe::{self, Probe};
use leonmon::{Family, Monitor};

/// Interactive debug monitor for LEON3/LEON4 SPARC-V8 targets, speaking
/// JTAG through an FT2232H in MPSSE mode.
#[derive(Parser)]
#[clap(name = "leonmon", version)]
struct Cli {
    /// List all FTDI devices the driver can see, then exit.
    #[clap(long)]
    list: bool,

    /// Print version and driver information, then exit.
    #[clap(long)]
    info: bool,

    /// Index of the FTDI device to open.
    #[clap(long, default_value_t = 0)]
    jtag: usize,

    /// Processor family (leon3 or leon4). Auto-detected from the AHB
    /// plug&play records when omitted.
    #[clap(long, value_parser = parse_family)]
    family: Option<Family>,
}

fn parse_family(s: &str) -> Result<Family, String> {
    s.parse()
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    if cli.list {
        return list_devices();
    }
    if cli.info {
        return show_info();
    }

    println!();
    println!("  ** leonmon v{} **", env!("CARGO_PKG_VERSION"));
    println!();
    println!("  LEON SPARC V8 processor debug monitor using");
    println!("  the FTDI FT2232H chipset for communication.");
    println!();

    let probe = Probe::open(cli.jtag)
        .with_context(|| format!("unable to use device {}", cli.jtag))?;

    let mut monitor = Monitor::open(probe, cli.family).context("target bring-up failed")?;

    if let Ok(version) = monitor.driver_version() {
        println!("Device driver version: {version}");
    }

    let chain = monitor.chain();
    println!("Number of JTAG devices on chain: {}", chain.devices);
    println!("Device IDCODE: {:#010x}", chain.idcode);
    println!("IR length: {} bits", chain.ir_length);
    println!(
        "Data register: opcode {:#04x}, {} bits",
        leonmon::bridge::IR_DATA,
        chain.data_dr_length
    );
    println!(
        "Command/address register: opcode {:#04x}, {} bits",
        leonmon::bridge::IR_COMMAND,
        chain.command_dr_length
    );
    println!("Target family: {}", monitor.family());
    println!("OK. Ready!");
    println!();

    cli::console(monitor)
}

fn list_devices() -> anyhow::Result<()> {
    let devices = probe::list_probes().context("failed to enumerate FTDI devices")?;
    println!("Number of devices: {}\n", devices.len());

    for dev in &devices {
        if dev.description.is_empty() {
            println!("{}) -- unable to claim device --", dev.index);
        } else {
            println!(
                "{}) {} (S/N: {} | ID: {:#010x})",
                dev.index, dev.description, dev.serial, dev.id
            );
        }
    }

    println!("\nUse --jtag <num> to select a device");
    Ok(())
}

fn show_info() -> anyhow::Result<()> {
    println!("leonmon version: {}", env!("CARGO_PKG_VERSION"));
    match probe::library_version() {
        Ok(version) => println!("FTDI library version: {version}"),
        Err(err) => println!("Error reading FTDI library version ({err})"),
    }
    Ok(())
}
