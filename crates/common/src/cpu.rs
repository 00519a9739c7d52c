use std::{cmp::Ordering, fmt, io::Write};

use crate::{
    CpuStats, ExecutionError, Opcode, RunMode, MEMORY_SIZE, REGISTER_COUNT, SP, STACK_TOP,
};
use num_traits::FromPrimitive;

/// Condition state written by `CMP`. Exactly one condition holds after the
/// first compare; every compare replaces the previous state.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Flags {
    #[default]
    Unset,
    Less,
    Greater,
    Equal,
}

impl Flags {
    /// The `FL` register encoding: `00000LGE`.
    #[must_use]
    pub const fn bits(self) -> u8 {
        match self {
            Flags::Unset => 0b000,
            Flags::Less => 0b100,
            Flags::Greater => 0b010,
            Flags::Equal => 0b001,
        }
    }
}

impl From<Ordering> for Flags {
    fn from(ordering: Ordering) -> Self {
        match ordering {
            Ordering::Less => Flags::Less,
            Ordering::Greater => Flags::Greater,
            Ordering::Equal => Flags::Equal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AluOp {
    Add,
    Mul,
    Cmp,
}

/// Receives the values printed by `PRN`.
pub trait OutputSink: std::fmt::Debug {
    fn print(&mut self, value: u8) -> Result<(), ExecutionError>;
}

#[derive(Debug)]
pub struct StdoutSink;

impl OutputSink for StdoutSink {
    fn print(&mut self, value: u8) -> Result<(), ExecutionError> {
        writeln!(std::io::stdout().lock(), "{value}")?;
        Ok(())
    }
}

#[derive(Debug)]
pub struct NullSink;

impl OutputSink for NullSink {
    fn print(&mut self, _value: u8) -> Result<(), ExecutionError> {
        Ok(())
    }
}

/// Collects printed values in memory.
#[derive(Debug, Default)]
pub struct BufferSink {
    pub values: Vec<u8>,
}

impl BufferSink {
    /// The printed values rendered the way `StdoutSink` would print them.
    pub fn text(&self) -> String {
        self.values.iter().map(|v| format!("{v}\n")).collect()
    }
}

impl OutputSink for BufferSink {
    fn print(&mut self, value: u8) -> Result<(), ExecutionError> {
        self.values.push(value);
        Ok(())
    }
}

/// PC, flags, the three bytes at PC and the register file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuSnapshot {
    pub pc: u8,
    pub flags: u8,
    pub instruction: [u8; 3],
    pub registers: [u8; REGISTER_COUNT],
}

impl fmt::Display for CpuSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [ir, a, b] = self.instruction;
        write!(
            f,
            "TRACE: {:02X} | {:02X} | {:02X} {:02X} {:02X} |",
            self.pc, self.flags, ir, a, b
        )?;
        for register in self.registers {
            write!(f, " {register:02X}")?;
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct Cpu<O: OutputSink> {
    memory: [u8; MEMORY_SIZE],
    registers: [u8; REGISTER_COUNT],
    pc: u8,
    flags: Flags,
    stats: CpuStats,
    pub output: O,
    halted: bool,
    verbose: bool,
    print_memory_access: bool,
}

impl<O: OutputSink> Cpu<O> {
    pub fn new(output: O) -> Self {
        let mut registers = [0; REGISTER_COUNT];
        registers[SP] = STACK_TOP;
        Self {
            memory: [0; MEMORY_SIZE],
            registers,
            pc: 0,
            flags: Flags::default(),
            stats: CpuStats::default(),
            output,
            halted: false,
            verbose: false,
            print_memory_access: false,
        }
    }

    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    pub fn set_print_memory_access(&mut self, print_memory_access: bool) {
        self.print_memory_access = print_memory_access;
    }

    pub fn set_entrypoint(&mut self, entrypoint: u8) {
        self.pc = entrypoint;
    }

    pub fn get_halted(&self) -> bool {
        self.halted
    }

    pub fn load_memory(&mut self, address: u8, memory: &[u8]) -> Result<(), ExecutionError> {
        let start = address as usize;
        if start + memory.len() > MEMORY_SIZE {
            return Err(ExecutionError::ProgramTooLarge {
                address,
                len: memory.len(),
            });
        }
        self.memory[start..start + memory.len()].copy_from_slice(memory);
        Ok(())
    }

    /// Loads `program` at address 0.
    pub fn load_program(&mut self, program: &[u8]) -> Result<(), ExecutionError> {
        self.load_memory(0, program)
    }

    pub fn execute(&mut self, run_mode: RunMode) -> Result<CpuStats, ExecutionError> {
        match run_mode {
            RunMode::Run => self.run_for(-1),
            RunMode::RunFor(instructions) => self.run_for(instructions),
        }
    }

    /// Runs until `HLT` or a fatal error.
    pub fn run(&mut self) -> Result<CpuStats, ExecutionError> {
        self.execute(RunMode::Run)
    }

    pub fn get_registers(&self) -> &[u8] {
        &self.registers
    }

    pub fn get_mut_registers(&mut self) -> &mut [u8] {
        &mut self.registers
    }

    pub fn get_memory(&self) -> &[u8] {
        &self.memory
    }

    pub fn get_pc(&self) -> u8 {
        self.pc
    }

    pub fn get_flags(&self) -> Flags {
        self.flags
    }

    pub fn get_stats(&self) -> CpuStats {
        self.stats
    }

    pub fn snapshot(&self) -> CpuSnapshot {
        CpuSnapshot {
            pc: self.pc,
            flags: self.flags.bits(),
            instruction: [
                self.memory[self.pc as usize],
                self.memory[self.pc.wrapping_add(1) as usize],
                self.memory[self.pc.wrapping_add(2) as usize],
            ],
            registers: self.registers,
        }
    }

    pub fn print_state(&self) {
        println!();
        println!("========== VM STATE ===========");
        println!();
        println!("PC: {:#04x}", self.pc);
        println!("SP: {:#04x}", self.registers[SP]);
        println!("Flags: {:?} ({:#05b})", self.flags, self.flags.bits());
        println!("Halted: {}", self.halted);
        println!("{}", self.snapshot());
        println!("Memory:");
        for (row, chunk) in self.memory.chunks(16).enumerate() {
            let bytes = chunk
                .iter()
                .map(|b| format!("{b:02X}"))
                .collect::<Vec<_>>()
                .join(" ");
            println!("  {:02X}: {bytes}", row * 16);
        }
    }

    fn run_for(&mut self, instructions: isize) -> Result<CpuStats, ExecutionError> {
        let mut executed = 0;

        while !self.halted && (instructions < 0 || executed < instructions) {
            if self.verbose {
                eprintln!("{}", self.snapshot());
            }

            let ir = self.read_memory(self.pc);
            let operand_a = self.read_memory(self.pc.wrapping_add(1));
            let operand_b = self.read_memory(self.pc.wrapping_add(2));

            let opcode = Opcode::from_u8(ir).ok_or(ExecutionError::InvalidOpcode {
                opcode: ir,
                pc: self.pc,
            })?;

            self.dispatch(opcode, operand_a, operand_b)?;

            self.stats.instructions += 1;
            executed += 1;
        }
        Ok(self.stats)
    }

    fn dispatch(
        &mut self,
        opcode: Opcode,
        operand_a: u8,
        operand_b: u8,
    ) -> Result<(), ExecutionError> {
        match opcode {
            Opcode::Hlt => {
                self.halted = true;
            }
            Opcode::Ldi => {
                self.write_register(operand_a, operand_b)?;
                self.advance(opcode);
            }
            Opcode::Prn => {
                let value = self.read_register(operand_a)?;
                self.output.print(value)?;
                self.advance(opcode);
            }
            Opcode::Add => {
                self.alu(AluOp::Add, operand_a, operand_b)?;
                self.advance(opcode);
            }
            Opcode::Mul => {
                self.alu(AluOp::Mul, operand_a, operand_b)?;
                self.advance(opcode);
            }
            Opcode::Cmp => {
                self.alu(AluOp::Cmp, operand_a, operand_b)?;
                self.advance(opcode);
            }
            Opcode::Push => {
                let value = self.read_register(operand_a)?;
                self.push_stack(value)?;
                self.advance(opcode);
            }
            Opcode::Pop => {
                let reg = self.register_index(operand_a)?;
                self.registers[reg] = self.pop_stack()?;
                self.advance(opcode);
            }
            Opcode::Call => {
                let reg = self.register_index(operand_a)?;
                // Return to the byte after CALL and its operand
                self.push_stack(self.pc.wrapping_add(2))?;
                self.pc = self.registers[reg];
            }
            Opcode::Ret => {
                self.pc = self.pop_stack()?;
            }
            Opcode::Jmp => {
                self.pc = self.read_register(operand_a)?;
            }
            Opcode::Jeq => {
                self.jump_if(self.flags == Flags::Equal, operand_a)?;
            }
            Opcode::Jne => {
                self.jump_if(self.flags != Flags::Equal, operand_a)?;
            }
        }
        Ok(())
    }

    fn advance(&mut self, opcode: Opcode) {
        self.pc = self.pc.wrapping_add(1 + opcode.operand_count());
    }

    fn jump_if(&mut self, condition: bool, reg: u8) -> Result<(), ExecutionError> {
        let target = self.read_register(reg)?;
        if condition {
            self.pc = target;
        } else {
            self.pc = self.pc.wrapping_add(2);
        }
        Ok(())
    }

    fn alu(&mut self, op: AluOp, reg_a: u8, reg_b: u8) -> Result<(), ExecutionError> {
        let a = self.read_register(reg_a)?;
        let b = self.read_register(reg_b)?;

        match op {
            AluOp::Add => self.write_register(reg_a, a.wrapping_add(b))?,
            AluOp::Mul => self.write_register(reg_a, a.wrapping_mul(b))?,
            AluOp::Cmp => self.flags = Flags::from(a.cmp(&b)),
        }
        Ok(())
    }

    fn register_index(&self, reg: u8) -> Result<usize, ExecutionError> {
        if (reg as usize) < REGISTER_COUNT {
            Ok(reg as usize)
        } else {
            Err(ExecutionError::InvalidRegister {
                register: reg,
                pc: self.pc,
            })
        }
    }

    fn read_register(&self, reg: u8) -> Result<u8, ExecutionError> {
        Ok(self.registers[self.register_index(reg)?])
    }

    fn write_register(&mut self, reg: u8, value: u8) -> Result<(), ExecutionError> {
        let index = self.register_index(reg)?;
        self.registers[index] = value;
        Ok(())
    }

    fn read_memory(&mut self, address: u8) -> u8 {
        let value = self.memory[address as usize];
        if self.print_memory_access {
            eprintln!("READ @{address:#04x} = {value:#04x}");
        }
        self.stats.memory_reads += 1;
        value
    }

    fn write_memory(&mut self, address: u8, value: u8) {
        if self.print_memory_access {
            eprintln!("WRITE @{address:#04x}, {value:#04x}");
        }
        self.stats.memory_writes += 1;
        self.memory[address as usize] = value;
    }

    fn push_stack(&mut self, value: u8) -> Result<(), ExecutionError> {
        let sp = self.registers[SP]
            .checked_sub(1)
            .ok_or(ExecutionError::StackOverflow(self.pc))?;

        self.registers[SP] = sp;
        self.write_memory(sp, value);
        Ok(())
    }

    fn pop_stack(&mut self) -> Result<u8, ExecutionError> {
        let sp = self.registers[SP];
        let next = sp
            .checked_add(1)
            .ok_or(ExecutionError::StackUnderflow(self.pc))?;

        let value = self.read_memory(sp);
        self.registers[SP] = next;
        Ok(value)
    }
}
