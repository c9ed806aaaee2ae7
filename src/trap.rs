//! SPARC-V8 trap codes as latched by the DSU, with operator-facing
//! descriptions.

use std::fmt;

/// An 8-bit trap type from the DSU trap register or the TBR.
///
/// `0x80` is the `ta 0` a well-behaved program ends with; codes below
/// are hardware traps, codes above are other software traps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrapCode(pub u8);

impl TrapCode {
    pub const OK: TrapCode = TrapCode(0x80);

    pub fn is_ok(self) -> bool {
        self.0 == 0x80
    }

    pub fn is_hardware(self) -> bool {
        self.0 < 0x80
    }

    pub fn is_software(self) -> bool {
        self.0 > 0x80
    }

    /// Looks the code up in the description table; first match wins.
    pub fn describe(self) -> &'static str {
        DESCRIPTIONS
            .iter()
            .find(|(code, _)| *code == self.0)
            .map(|(_, text)| *text)
            .unwrap_or(if self.is_software() {
                "[trap_instruction]: Software trap instruction (TA)"
            } else {
                "[unknown]: unknown trap!"
            })
    }
}

impl fmt::Display for TrapCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tt 0x{:02x}, {}", self.0, self.describe())
    }
}

/// The trap table as the GR712RC manual lists it. 0x2B is documented as
/// write_error even though some SPARC manuals assign it differently;
/// both it and 0x2A stay listed, and lookup takes the first match.
const DESCRIPTIONS: &[(u8, &str)] = &[
    (0x00, "[reset]: Power-on reset"),
    (0x2B, "[write_error]: write buffer error"),
    (0x01, "[instruction_access_error]: Error during instruction fetch"),
    (0x02, "[illegal_instruction]: UNIMP or other un-implemented instruction"),
    (0x03, "[privileged_instruction]: Execution of privileged instruction in user mode"),
    (0x04, "[fp_disabled]: FP instruction while FPU disabled"),
    (0x24, "[cp_disabled]: CP instruction while Co-processor disabled. The GR712RC does not implement a co-processor and CP instructions will trigger this trap"),
    (0x0B, "[watchpoint_detected]: Hardware breakpoint match"),
    (0x05, "[window_overflow]: SAVE into invalid window"),
    (0x06, "[window_underflow]: RESTORE into invalid window"),
    (0x20, "[register_hardware_error]: Uncorrectable register file EDAC error"),
    (0x07, "[mem_address_not_aligned]: Memory access to un-aligned address"),
    (0x08, "[fp_exception]: FPU exception"),
    (0x09, "[data_access_exception]: Access error during load or store instruction"),
    (0x0A, "[tag_overflow]: Tagged arithmetic overflow"),
    (0x2A, "[divide_exception]: Divide by zero"),
    (0x11, "[interrupt_level_1]: Asynchronous interrupt 1"),
    (0x12, "[interrupt_level_2]: Asynchronous interrupt 2"),
    (0x13, "[interrupt_level_3]: Asynchronous interrupt 3"),
    (0x14, "[interrupt_level_4]: Asynchronous interrupt 4"),
    (0x15, "[interrupt_level_5]: Asynchronous interrupt 5"),
    (0x16, "[interrupt_level_6]: Asynchronous interrupt 6"),
    (0x17, "[interrupt_level_7]: Asynchronous interrupt 7"),
    (0x18, "[interrupt_level_8]: Asynchronous interrupt 8"),
    (0x19, "[interrupt_level_9]: Asynchronous interrupt 9"),
    (0x1A, "[interrupt_level_10]: Asynchronous interrupt 10"),
    (0x1B, "[interrupt_level_11]: Asynchronous interrupt 11"),
    (0x1C, "[interrupt_level_12]: Asynchronous interrupt 12"),
    (0x1D, "[interrupt_level_13]: Asynchronous interrupt 13"),
    (0x1E, "[interrupt_level_14]: Asynchronous interrupt 14"),
    (0x1F, "[interrupt_level_15]: Asynchronous interrupt 15"),
    (0x80, "[trap_instruction]: OK"),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(TrapCode(0x80).is_ok());
        assert!(TrapCode(0x2A).is_hardware());
        assert!(TrapCode(0x85).is_software());
        assert!(!TrapCode(0x85).is_hardware());
    }

    #[test]
    fn descriptions() {
        assert_eq!(TrapCode(0x80).describe(), "[trap_instruction]: OK");
        assert_eq!(TrapCode(0x2A).describe(), "[divide_exception]: Divide by zero");
        assert_eq!(TrapCode(0x2B).describe(), "[write_error]: write buffer error");
        // undocumented software traps fall back to the generic text
        assert_eq!(
            TrapCode(0x99).describe(),
            "[trap_instruction]: Software trap instruction (TA)"
        );
        // undocumented hardware trap
        assert_eq!(TrapCode(0x30).describe(), "[unknown]: unknown trap!");
    }
}
