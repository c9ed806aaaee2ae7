use std::path::PathBuf;

/// Errors on the USB/MPSSE transport between host and probe.
///
/// These are not recoverable mid-operation; the caller resets the TAP
/// before issuing anything else.
#[derive(Debug, thiserror::Error, docsplay::Display)]
pub enum TransportError {
    /// The FTDI driver reported {0}.
    Driver(libftd2xx::FtStatus),

    /// Short write: queued {expected} MPSSE bytes, the driver accepted {sent}.
    ShortWrite { expected: usize, sent: usize },

    /// Short read: expected {expected} bytes from the probe, received {received}.
    ShortRead { expected: usize, received: usize },

    /// Timed out waiting for data in the probe's receive queue.
    Timeout,

    /// MPSSE receive queue was not empty {0}.
    QueueNotEmpty(&'static str),

    /// MPSSE synchronisation failed: the bad-command echo `FA AB` never arrived.
    SyncFailed,
}

/// The JTAG chain does not look like a single GR712 debug link.
///
/// All of these are fatal at startup; the register layouts below the
/// bridge are hard-wired to the GR712 shapes.
#[derive(Debug, thiserror::Error, docsplay::Display)]
pub enum ChainError {
    /// Found {0} devices on the JTAG chain; exactly one is supported.
    DeviceCount(u8),

    /// IR scans as {0} bits; the GR712 debug link has a 6-bit IR.
    IrLength(u8),

    /// The command/address register scans as {0} bits instead of 35.
    CommandRegisterLength(u8),

    /// The data register scans as {0} bits instead of 33.
    DataRegisterLength(u8),

    /// The device returned an all-zero IDCODE.
    MissingIdcode,

    /// No LEON3 or LEON4 processor was found in the AHB plug&play area.
    UnknownProcessor,
}

/// Any error a monitor session can surface.
#[derive(Debug, thiserror::Error, docsplay::Display)]
pub enum Error {
    /// Probe transport failure.
    Transport(#[from] TransportError),

    /// JTAG chain check failed.
    Chain(#[from] ChainError),

    /// Probe initialisation failed at the {stage} stage.
    Open {
        stage: &'static str,
        #[source]
        source: TransportError,
    },

    /// CPU index {index} is out of range; this family has {count} cores.
    CpuIndex { index: u32, count: u32 },

    /// Register window {0} is out of range (0..8).
    #[ignore_extra_doc_attributes]
    ///
    /// The DSU window file wraps modulo the window count; indices past it
    /// are almost certainly operator typos, so they are rejected instead.
    WindowIndex(u32),

    /// Register index {index} is out of range for %{bank} registers (max {max}).
    RegisterIndex {
        bank: &'static str,
        index: u32,
        max: u32,
    },

    /// Unknown register name '{0}'.
    RegisterName(String),

    /// Invalid argument: {0}.
    Argument(String),

    /// Failed to access {path:?}.
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Image {path:?} is {size} bytes; at least 64 KiB (the ELF header prefix) is required.
    ImageTooSmall { path: PathBuf, size: u64 },

    /// Image and target memory differ at byte offset {0}.
    VerifyMismatch(u64),
}
