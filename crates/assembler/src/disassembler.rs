use std::collections::HashMap;

use ls8_common::{get_pattern, InstructionPattern, OperandKind, Opcode, ProgramImage};
use num_traits::FromPrimitive;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DisassemblerError {
    #[error("Invalid opcode: {0:#010b} at @{1}")]
    InvalidOpcode(u8, usize),
    #[error("Unexpected end of program at @{0}")]
    UnexpectedEnd(usize),
}

#[derive(Debug, Default)]
pub struct Disassembler {
    labels: HashMap<u8, String>,
}

impl Disassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses the image's labels for label lines and `LDI` immediates.
    pub fn from_image(image: &ProgramImage) -> Self {
        let labels = image
            .header
            .labels
            .iter()
            .map(|(name, &addr)| (addr, name.clone()))
            .collect();
        Self { labels }
    }

    fn format_operand(&self, value: u8, kind: OperandKind) -> String {
        match kind {
            OperandKind::Register => format!("R{value}"),
            OperandKind::Immediate => match self.labels.get(&value) {
                Some(label) => label.clone(),
                None => value.to_string(),
            },
        }
    }

    fn decode(
        &self,
        code: &[u8],
        address: usize,
    ) -> Result<(&'static InstructionPattern, String), DisassemblerError> {
        let opcode = code[address];
        let pattern = Opcode::from_u8(opcode)
            .and_then(get_pattern)
            .ok_or(DisassemblerError::InvalidOpcode(opcode, address))?;

        let operands = pattern
            .operands
            .iter()
            .enumerate()
            .map(|(i, &kind)| {
                code.get(address + 1 + i)
                    .map(|&value| self.format_operand(value, kind))
                    .ok_or(DisassemblerError::UnexpectedEnd(address))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let text = if operands.is_empty() {
            pattern.mnemonic.to_string()
        } else {
            format!("{} {}", pattern.mnemonic, operands.join(", "))
        };
        Ok((pattern, text))
    }

    /// Disassembles the instruction at `address`, returning its text and size.
    pub fn disassemble_instruction(
        &self,
        code: &[u8],
        address: usize,
    ) -> Result<(String, usize), DisassemblerError> {
        if address >= code.len() {
            return Err(DisassemblerError::UnexpectedEnd(address));
        }
        let (pattern, text) = self.decode(code, address)?;
        Ok((text, 1 + pattern.operands.len()))
    }

    pub fn disassemble_program(&self, code: &[u8]) -> Result<String, DisassemblerError> {
        let mut result = String::new();
        let mut offset = 0;

        while offset < code.len() {
            if let Some(label) = self.label_at(offset) {
                result.push_str(&format!("{label}:\n"));
            }

            let (instruction, size) = self.disassemble_instruction(code, offset)?;
            result.push_str(&format!("    {instruction}\n"));
            offset += size;
        }

        // A label may point just past the last instruction
        if let Some(label) = self.label_at(code.len()) {
            result.push_str(&format!("{label}:\n"));
        }

        Ok(result)
    }

    /// Renders `code` as an `.ls8` listing, one binary byte per line with the
    /// instruction as a comment on its opcode line.
    pub fn listing(&self, code: &[u8]) -> Result<String, DisassemblerError> {
        let mut result = String::new();
        let mut offset = 0;

        while offset < code.len() {
            if let Some(label) = self.label_at(offset) {
                result.push_str(&format!("# {label} (address {offset}):\n"));
            }

            let (instruction, size) = self.disassemble_instruction(code, offset)?;
            result.push_str(&format!("{:08b} # {instruction}\n", code[offset]));
            for byte in &code[offset + 1..offset + size] {
                result.push_str(&format!("{byte:08b}\n"));
            }
            offset += size;
        }

        if let Some(label) = self.label_at(code.len()) {
            result.push_str(&format!("# {label} (address {}):\n", code.len()));
        }

        Ok(result)
    }

    fn label_at(&self, offset: usize) -> Option<&String> {
        u8::try_from(offset).ok().and_then(|addr| self.labels.get(&addr))
    }
}

#[cfg(test)]
mod tests {
    use ls8_common::parse_listing;

    use super::*;
    use crate::Assembler;

    #[test]
    fn test_simple_disassembly() {
        let code = parse_listing(include_str!("../../../demos/mult.ls8")).unwrap();
        let result = Disassembler::new().disassemble_program(&code).unwrap();
        assert_eq!(
            result,
            "    LDI R0, 8\n    LDI R1, 9\n    MUL R0, R1\n    PRN R0\n    HLT\n"
        );
    }

    #[test]
    fn test_disassembly_with_labels() {
        let image = Assembler::new()
            .assemble_program(include_str!("../../../demos/call.asm"))
            .unwrap();
        let result = Disassembler::from_image(&image)
            .disassemble_program(&image.data)
            .unwrap();
        insta::assert_snapshot!(result, @r"
            LDI R1, Mult2Print
            LDI R0, 10
            CALL R1
            LDI R0, 15
            CALL R1
            LDI R0, 18
            CALL R1
            LDI R0, 30
            CALL R1
            HLT
        Mult2Print:
            ADD R0, R0
            PRN R0
            RET
        ");
    }

    #[test]
    fn test_listing() {
        let image = Assembler::new()
            .assemble_program("LDI R0, 8\nPRN R0\nHLT")
            .unwrap();
        let listing = Disassembler::new().listing(&image.data).unwrap();
        insta::assert_snapshot!(listing, @r"
        10000010 # LDI R0, 8
        00000000
        00001000
        01000111 # PRN R0
        00000000
        00000001 # HLT
        ");
        assert_eq!(parse_listing(&listing).unwrap(), image.data);
    }

    #[test]
    fn test_listing_with_labels_reloads() {
        let image = Assembler::new()
            .assemble_program(include_str!("../../../demos/sctest.asm"))
            .unwrap();
        let listing = Disassembler::from_image(&image).listing(&image.data).unwrap();
        assert!(listing.contains("# Test1 (address 19):\n10000010 # LDI R2, Test2\n"));
        assert_eq!(parse_listing(&listing).unwrap(), image.data);
    }

    #[test]
    fn test_trailing_label_reassembles() {
        let image = Assembler::new()
            .assemble_program("LDI R0, End\nHLT\nEnd:")
            .unwrap();
        let disassembler = Disassembler::from_image(&image);

        let source = disassembler.disassemble_program(&image.data).unwrap();
        assert_eq!(source, "    LDI R0, End\n    HLT\nEnd:\n");
        let reassembled = Assembler::new().assemble_program(&source).unwrap();
        assert_eq!(reassembled.data, image.data);
        assert_eq!(reassembled.header.labels, image.header.labels);

        let listing = disassembler.listing(&image.data).unwrap();
        assert!(listing.ends_with("00000001 # HLT\n# End (address 4):\n"));
        assert_eq!(parse_listing(&listing).unwrap(), image.data);
    }

    #[test]
    fn test_instruction_size() {
        let disassembler = Disassembler::new();
        let code = [0x82, 1, 2, 0x47, 1, 0x01];
        assert_eq!(
            disassembler.disassemble_instruction(&code, 0).unwrap(),
            ("LDI R1, 2".to_string(), 3)
        );
        assert_eq!(
            disassembler.disassemble_instruction(&code, 3).unwrap(),
            ("PRN R1".to_string(), 2)
        );
        assert_eq!(
            disassembler.disassemble_instruction(&code, 5).unwrap(),
            ("HLT".to_string(), 1)
        );
    }

    #[test]
    fn test_invalid_opcode() {
        let err = Disassembler::new()
            .disassemble_program(&[0x01, 0x02])
            .unwrap_err();
        assert!(matches!(err, DisassemblerError::InvalidOpcode(0x02, 1)));
    }

    #[test]
    fn test_truncated_instruction() {
        let err = Disassembler::new()
            .disassemble_program(&[0x82, 0x00])
            .unwrap_err();
        assert!(matches!(err, DisassemblerError::UnexpectedEnd(0)));
    }
}
