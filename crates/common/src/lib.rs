use std::collections::HashMap;

use num_derive::FromPrimitive;
use once_cell::sync::Lazy;
use strum::{Display, EnumIter, IntoEnumIterator};
use thiserror::Error;

mod cpu;
pub mod program;

pub use cpu::{AluOp, BufferSink, Cpu, CpuSnapshot, Flags, NullSink, OutputSink, StdoutSink};
pub use program::{parse_listing, LoadError, ProgramImage, ProgramImageHeader};

pub const MEMORY_SIZE: usize = 256;
pub const REGISTER_COUNT: usize = 8;

/// Register holding the stack pointer.
pub const SP: usize = 7;

/// Initial stack pointer. `0xF5..=0xFF` is reserved address space.
pub const STACK_TOP: u8 = 0xF4;

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error(
        "Invalid opcode: {opcode:#010b} at (@{pc:#04x}/@{pc}), known opcodes: {}",
        known_opcodes()
    )]
    InvalidOpcode { opcode: u8, pc: u8 },
    #[error("Invalid register: R{register} at (@{pc:#04x}/@{pc})")]
    InvalidRegister { register: u8, pc: u8 },
    #[error("Stack Overflow at (@{:#04x}/@{})", .0, .0)]
    StackOverflow(u8),
    #[error("Stack Underflow at (@{:#04x}/@{})", .0, .0)]
    StackUnderflow(u8),
    #[error("Program of {len} bytes does not fit in memory at (@{address:#04x}/@{address})")]
    ProgramTooLarge { address: u8, len: usize },
    #[error("Failed to write output: {0}")]
    Output(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuStats {
    pub instructions: usize,
    pub memory_reads: usize,
    pub memory_writes: usize,
}

#[derive(Debug)]
pub enum RunMode {
    Run,           // Run until halted
    RunFor(isize), // Run for a specific number of instructions
}

/// Opcodes are laid out as `AABCDDDD`: `AA` is the operand count, `B` marks
/// ALU instructions, `C` marks instructions that set the PC themselves.
#[derive(
    Debug,
    Display,
    PartialEq,
    PartialOrd,
    Copy,
    Clone,
    Hash,
    Eq,
    Ord,
    FromPrimitive,
    EnumIter,
)]
#[strum(serialize_all = "UPPERCASE")]
#[repr(u8)]
pub enum Opcode {
    Hlt = 0b0000_0001,
    Ret = 0b0001_0001,

    Push = 0b0100_0101,
    Pop = 0b0100_0110,
    Prn = 0b0100_0111,

    Call = 0b0101_0000,
    Jmp = 0b0101_0100,
    Jeq = 0b0101_0101,
    Jne = 0b0101_0110,

    Ldi = 0b1000_0010,

    Add = 0b1010_0000,
    Mul = 0b1010_0010,
    Cmp = 0b1010_0111,
}

impl Opcode {
    /// Number of operand bytes following the opcode.
    #[must_use]
    pub const fn operand_count(self) -> u8 {
        (self as u8) >> 6
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    Register,  // R0-R7
    Immediate, // 8-bit value or label address
}

#[derive(Debug, Clone)]
pub struct InstructionPattern {
    pub opcode: Opcode,
    pub operands: &'static [OperandKind],
    pub mnemonic: &'static str,
}

impl InstructionPattern {
    const fn new(opcode: Opcode, operands: &'static [OperandKind], mnemonic: &'static str) -> Self {
        Self {
            opcode,
            operands,
            mnemonic,
        }
    }
}

pub static INSTRUCTION_PATTERNS: Lazy<HashMap<Opcode, &'static InstructionPattern>> =
    Lazy::new(|| {
        use OperandKind::{Immediate, Register};

        static PATTERNS: &[InstructionPattern] = &[
            InstructionPattern::new(Opcode::Hlt, &[], "HLT"),
            InstructionPattern::new(Opcode::Ldi, &[Register, Immediate], "LDI"),
            InstructionPattern::new(Opcode::Prn, &[Register], "PRN"),
            // ALU
            InstructionPattern::new(Opcode::Add, &[Register, Register], "ADD"),
            InstructionPattern::new(Opcode::Mul, &[Register, Register], "MUL"),
            InstructionPattern::new(Opcode::Cmp, &[Register, Register], "CMP"),
            // Stack
            InstructionPattern::new(Opcode::Push, &[Register], "PUSH"),
            InstructionPattern::new(Opcode::Pop, &[Register], "POP"),
            // Subroutines and jumps
            InstructionPattern::new(Opcode::Call, &[Register], "CALL"),
            InstructionPattern::new(Opcode::Ret, &[], "RET"),
            InstructionPattern::new(Opcode::Jmp, &[Register], "JMP"),
            InstructionPattern::new(Opcode::Jeq, &[Register], "JEQ"),
            InstructionPattern::new(Opcode::Jne, &[Register], "JNE"),
        ];

        let mut map = HashMap::new();
        for pattern in PATTERNS {
            map.insert(pattern.opcode, pattern);
        }
        map
    });

pub fn get_pattern(opcode: Opcode) -> Option<&'static InstructionPattern> {
    INSTRUCTION_PATTERNS.get(&opcode).copied()
}

/// Mnemonics are matched case-insensitively.
pub fn get_pattern_by_mnemonic(mnemonic: &str) -> Option<&'static InstructionPattern> {
    INSTRUCTION_PATTERNS
        .values()
        .find(|pattern| pattern.mnemonic.eq_ignore_ascii_case(mnemonic))
        .copied()
}

/// Comma separated `MNEMONIC=0bXXXXXXXX` list of every opcode, in opcode order.
pub fn known_opcodes() -> String {
    Opcode::iter()
        .map(|op| format!("{op}={:#010b}", op as u8))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::FromPrimitive;

    #[test]
    fn test_all_covered() {
        for op in Opcode::iter() {
            assert!(
                get_pattern(op).is_some(),
                "Pattern not implemented for opcode: {op:?}"
            );
        }
    }

    #[test]
    fn test_operand_count_matches_pattern() {
        for op in Opcode::iter() {
            let pattern = get_pattern(op).unwrap();
            assert_eq!(
                op.operand_count() as usize,
                pattern.operands.len(),
                "operand count bits disagree with pattern for {op}"
            );
        }
    }

    #[test]
    fn test_pattern_lookup() {
        let pattern = get_pattern(Opcode::Ldi).unwrap();
        assert_eq!(pattern.mnemonic, "LDI");
        assert_eq!(pattern.operands, &[OperandKind::Register, OperandKind::Immediate]);
    }

    #[test]
    fn test_mnemonic_lookup() {
        let pattern = get_pattern_by_mnemonic("mul").unwrap();
        assert_eq!(pattern.opcode, Opcode::Mul);
        assert!(get_pattern_by_mnemonic("DIV").is_none());
    }

    #[test]
    fn test_display_matches_mnemonic() {
        for op in Opcode::iter() {
            assert_eq!(op.to_string(), get_pattern(op).unwrap().mnemonic);
        }
    }

    #[test]
    fn test_unknown_byte_is_not_an_opcode() {
        assert_eq!(Opcode::from_u8(0b0000_0010), None);
        assert_eq!(Opcode::from_u8(0b1000_0010), Some(Opcode::Ldi));
    }

    #[test]
    fn test_invalid_opcode_message_lists_known_opcodes() {
        let err = ExecutionError::InvalidOpcode { opcode: 2, pc: 0 };
        let message = err.to_string();
        assert!(message.starts_with("Invalid opcode: 0b00000010 at (@0x00/@0)"));
        assert!(message.contains("HLT=0b00000001"));
        assert!(message.contains("CMP=0b10100111"));
    }
}
