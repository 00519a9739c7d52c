use indexmap::IndexMap;
use ls8_common::{
    get_pattern_by_mnemonic, OperandKind, ProgramImage, ProgramImageHeader, MEMORY_SIZE,
    REGISTER_COUNT,
};
use thiserror::Error;

mod disassembler;

pub use disassembler::{Disassembler, DisassemblerError};

#[derive(Error, Debug)]
pub enum AssemblerError {
    #[error("Unknown instruction: {0}")]
    UnknownInstruction(String),
    #[error("Wrong number of operands for {mnemonic}: expected {expected}, got {got}")]
    WrongOperandCount {
        mnemonic: String,
        expected: usize,
        got: usize,
    },
    #[error("Invalid register name: {0}")]
    InvalidRegister(String),
    #[error("Invalid immediate value: {0}")]
    InvalidImmediate(String),
    #[error("Invalid label: {0}")]
    InvalidLabel(String),
    #[error("Undefined label: {0}")]
    UndefinedLabel(String),
    #[error("Label defined twice: {0}")]
    DuplicateLabel(String),
    #[error("Program is {0} bytes, memory holds {max}", max = MEMORY_SIZE)]
    ProgramTooLarge(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedOperand {
    Register(u8),
    Immediate(u8),
    Label(String),
}

/// Two pass assembler for LS-8 assembly.
///
/// ```text
/// ; comment
/// Loop:
///     LDI R0, 0x0A
///     PRN R0
///     LDI R1, Loop
///     JMP R1
/// ```
#[derive(Debug, Default)]
pub struct Assembler {
    labels: IndexMap<String, u8>,
    current_address: usize,
}

fn strip_comment(line: &str) -> &str {
    line.split(';').next().unwrap_or_default().trim()
}

fn label_name(line: &str) -> Option<&str> {
    line.strip_suffix(':').map(str::trim)
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn split_instruction(line: &str) -> (&str, Vec<&str>) {
    let (mnemonic, rest) = line
        .split_once(char::is_whitespace)
        .unwrap_or((line, ""));
    let operands = if rest.trim().is_empty() {
        vec![]
    } else {
        rest.split(',').map(str::trim).collect()
    };
    (mnemonic, operands)
}

impl Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse_register(reg: &str) -> Result<u8, AssemblerError> {
        let index = reg
            .strip_prefix('R')
            .or_else(|| reg.strip_prefix('r'))
            .and_then(|n| n.parse::<u8>().ok())
            .ok_or_else(|| AssemblerError::InvalidRegister(reg.to_string()))?;

        if (index as usize) < REGISTER_COUNT {
            Ok(index)
        } else {
            Err(AssemblerError::InvalidRegister(reg.to_string()))
        }
    }

    /// Numbers may be decimal, `0x` hex or `0b` binary. Anything starting with
    /// a letter is a label reference.
    pub fn parse_immediate(operand: &str) -> Result<ParsedOperand, AssemblerError> {
        let invalid = || AssemblerError::InvalidImmediate(operand.to_string());

        let value = if let Some(hex) = operand.strip_prefix("0x") {
            u8::from_str_radix(hex, 16).map_err(|_| invalid())?
        } else if let Some(bin) = operand.strip_prefix("0b") {
            u8::from_str_radix(bin, 2).map_err(|_| invalid())?
        } else if operand.starts_with(|c: char| c.is_ascii_digit()) {
            operand.parse::<u8>().map_err(|_| invalid())?
        } else if is_identifier(operand) {
            return Ok(ParsedOperand::Label(operand.to_string()));
        } else {
            return Err(invalid());
        };

        Ok(ParsedOperand::Immediate(value))
    }

    fn parse_operand(
        &self,
        operand: &str,
        expected_type: OperandKind,
    ) -> Result<ParsedOperand, AssemblerError> {
        match expected_type {
            OperandKind::Register => Ok(ParsedOperand::Register(Self::parse_register(operand)?)),
            OperandKind::Immediate => match Self::parse_immediate(operand)? {
                ParsedOperand::Label(label) => self
                    .labels
                    .get(&label)
                    .map(|&addr| ParsedOperand::Immediate(addr))
                    .ok_or(AssemblerError::UndefinedLabel(label)),
                parsed => Ok(parsed),
            },
        }
    }

    fn define_label(&mut self, name: &str) -> Result<(), AssemblerError> {
        if !is_identifier(name) {
            return Err(AssemblerError::InvalidLabel(name.to_string()));
        }
        let address = u8::try_from(self.current_address)
            .map_err(|_| AssemblerError::ProgramTooLarge(self.current_address))?;
        if self.labels.insert(name.to_string(), address).is_some() {
            return Err(AssemblerError::DuplicateLabel(name.to_string()));
        }
        Ok(())
    }

    /// Assembles a single line. Labels must already be known.
    pub fn assemble_line(&mut self, line: &str) -> Result<Vec<u8>, AssemblerError> {
        let line = strip_comment(line);

        if line.is_empty() || label_name(line).is_some() {
            return Ok(vec![]);
        }

        let (mnemonic, operand_strs) = split_instruction(line);

        let pattern = get_pattern_by_mnemonic(mnemonic)
            .ok_or_else(|| AssemblerError::UnknownInstruction(mnemonic.to_string()))?;

        if operand_strs.len() != pattern.operands.len() {
            return Err(AssemblerError::WrongOperandCount {
                mnemonic: pattern.mnemonic.to_string(),
                expected: pattern.operands.len(),
                got: operand_strs.len(),
            });
        }

        let mut result = vec![pattern.opcode as u8];

        for (operand_str, &operand_type) in operand_strs.iter().zip(pattern.operands.iter()) {
            match self.parse_operand(operand_str, operand_type)? {
                ParsedOperand::Register(reg) => result.push(reg),
                ParsedOperand::Immediate(imm) => result.push(imm),
                ParsedOperand::Label(label) => return Err(AssemblerError::UndefinedLabel(label)),
            }
        }

        self.current_address += result.len();
        Ok(result)
    }

    pub fn assemble_program(&mut self, program: &str) -> Result<ProgramImage, AssemblerError> {
        self.labels.clear();
        self.current_address = 0;

        // First pass: collect labels
        for line in program.lines() {
            let line = strip_comment(line);
            if line.is_empty() {
                continue;
            }
            if let Some(label) = label_name(line) {
                self.define_label(label)?;
            } else {
                let (mnemonic, _) = split_instruction(line);
                let pattern = get_pattern_by_mnemonic(mnemonic)
                    .ok_or_else(|| AssemblerError::UnknownInstruction(mnemonic.to_string()))?;
                self.current_address += pattern.operands.len() + 1;
            }
        }

        // Second pass: generate bytes
        self.current_address = 0;
        let mut data = Vec::new();
        for line in program.lines() {
            let mut line_code = self.assemble_line(line)?;
            data.append(&mut line_code);
        }

        if data.len() > MEMORY_SIZE {
            return Err(AssemblerError::ProgramTooLarge(data.len()));
        }

        Ok(ProgramImage {
            header: ProgramImageHeader {
                labels: self.labels.clone(),
                entrypoint: 0,
            },
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use ls8_common::{parse_listing, BufferSink, Cpu, Opcode};

    use super::*;

    fn assemble(program: &str) -> Result<ProgramImage, AssemblerError> {
        Assembler::new().assemble_program(program)
    }

    #[test]
    fn test_simple_assembly() {
        let image = assemble("LDI R0, 8\nPRN R0\nHLT").unwrap();
        assert_eq!(
            image.data,
            vec![Opcode::Ldi as u8, 0, 8, Opcode::Prn as u8, 0, Opcode::Hlt as u8]
        );
        assert!(image.header.labels.is_empty());
        assert_eq!(image.header.entrypoint, 0);
    }

    #[test]
    fn test_case_insensitive_and_number_formats() {
        let image = assemble("ldi r1, 0x10\nLdi R2, 0b101\nldi r3,255").unwrap();
        assert_eq!(image.data, vec![0x82, 1, 16, 0x82, 2, 5, 0x82, 3, 255]);
    }

    #[test]
    fn test_forward_and_backward_labels() {
        let program = "\
            Start:\n\
            LDI R0, End\n\
            JMP R0\n\
            End:\n\
            LDI R1, Start\n\
            HLT\n\
        ";
        let image = assemble(program).unwrap();
        assert_eq!(image.header.labels["Start"], 0);
        assert_eq!(image.header.labels["End"], 5);
        assert_eq!(image.data, vec![0x82, 0, 5, 0x54, 0, 0x82, 1, 0, 0x01]);
    }

    #[test]
    fn test_comments_and_blank_lines() {
        let image = assemble("; header\n\n   HLT ; stop\n;trailing").unwrap();
        assert_eq!(image.data, vec![Opcode::Hlt as u8]);
    }

    #[test]
    fn test_unknown_instruction() {
        assert!(matches!(
            assemble("NOP"),
            Err(AssemblerError::UnknownInstruction(m)) if m == "NOP"
        ));
    }

    #[test]
    fn test_wrong_operand_count() {
        assert!(matches!(
            assemble("add r0"),
            Err(AssemblerError::WrongOperandCount { mnemonic, expected: 2, got: 1 }) if mnemonic == "ADD"
        ));
        assert!(matches!(
            assemble("HLT R0"),
            Err(AssemblerError::WrongOperandCount { expected: 0, got: 1, .. })
        ));
    }

    #[test]
    fn test_invalid_operands() {
        assert!(matches!(
            assemble("PRN R8"),
            Err(AssemblerError::InvalidRegister(r)) if r == "R8"
        ));
        assert!(matches!(
            assemble("PRN 3"),
            Err(AssemblerError::InvalidRegister(_))
        ));
        assert!(matches!(
            assemble("LDI R0, 256"),
            Err(AssemblerError::InvalidImmediate(v)) if v == "256"
        ));
        assert!(matches!(
            assemble("LDI R0, -1"),
            Err(AssemblerError::InvalidImmediate(_))
        ));
    }

    #[test]
    fn test_label_errors() {
        assert!(matches!(
            assemble("LDI R0, Nowhere\nHLT"),
            Err(AssemblerError::UndefinedLabel(l)) if l == "Nowhere"
        ));
        assert!(matches!(
            assemble("A:\nHLT\nA:\nHLT"),
            Err(AssemblerError::DuplicateLabel(l)) if l == "A"
        ));
        assert!(matches!(
            assemble("1abc:\nHLT"),
            Err(AssemblerError::InvalidLabel(_))
        ));
    }

    #[test]
    fn test_program_too_large() {
        let program = "LDI R0, 1\n".repeat(86);
        let err = assemble(&program).unwrap_err();
        assert!(matches!(err, AssemblerError::ProgramTooLarge(258)));
        assert_eq!(err.to_string(), "Program is 258 bytes, memory holds 256");
    }

    #[test]
    fn test_assembler_is_reusable() {
        let mut assembler = Assembler::new();
        assembler.assemble_program("A:\nHLT").unwrap();
        let image = assembler.assemble_program("HLT\nA:\nHLT").unwrap();
        assert_eq!(image.header.labels["A"], 1);
    }

    #[test]
    fn test_demo_sources_match_listings() {
        let cases = [
            (
                include_str!("../../../demos/call.asm"),
                include_str!("../../../demos/call.ls8"),
            ),
            (
                include_str!("../../../demos/sctest.asm"),
                include_str!("../../../demos/sctest.ls8"),
            ),
        ];
        for (source, listing) in cases {
            let image = assemble(source).unwrap();
            assert_eq!(image.data, parse_listing(listing).unwrap());
        }
    }

    #[test]
    fn test_assembled_program_runs() {
        let image = assemble(include_str!("../../../demos/call.asm")).unwrap();
        assert_eq!(image.header.labels["Mult2Print"], 24);

        let mut cpu = Cpu::new(BufferSink::default());
        cpu.load_program(&image.data).unwrap();
        cpu.run().unwrap();
        assert_eq!(cpu.output.values, vec![20, 30, 36, 60]);
    }
}
