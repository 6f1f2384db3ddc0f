//! Collaborators for x86-64 targets.
//!
//! [X86_64Registers] describes the general-purpose registers and their 32, 16 and 8-bit views.
//! The functions in this module build pre-classified [Instruction]s carrying the implicit
//! operands of the corresponding x86-64 instruction, for use with [crate::insn::Preclassified].

use crate::insn::{
    Instruction, InstructionKind, LoadAccess, PopAccess, SourceOperand, StoreAccess,
};
use crate::regs::{RegisterInfo, RegisterModel};

static GENERAL_PURPOSE: [[&str; 4]; 16] = [
    ["rax", "eax", "ax", "al"],
    ["rbx", "ebx", "bx", "bl"],
    ["rcx", "ecx", "cx", "cl"],
    ["rdx", "edx", "dx", "dl"],
    ["rsi", "esi", "si", "sil"],
    ["rdi", "edi", "di", "dil"],
    ["rbp", "ebp", "bp", "bpl"],
    ["rsp", "esp", "sp", "spl"],
    ["r8", "r8d", "r8w", "r8b"],
    ["r9", "r9d", "r9w", "r9b"],
    ["r10", "r10d", "r10w", "r10b"],
    ["r11", "r11d", "r11w", "r11b"],
    ["r12", "r12d", "r12w", "r12b"],
    ["r13", "r13d", "r13w", "r13b"],
    ["r14", "r14d", "r14w", "r14b"],
    ["r15", "r15d", "r15w", "r15b"],
];

static GENERAL_PURPOSE_BITS: [u32; 4] = [64, 32, 16, 8];

static PROGRAM_COUNTER: [&str; 3] = ["rip", "eip", "ip"];

static PROGRAM_COUNTER_BITS: [u32; 3] = [64, 32, 16];

pub const STACK_POINTER: &str = "rsp";

/// Register model of the x86-64 general-purpose registers and the instruction pointer.
#[derive(Copy, Clone, Debug, Default)]
pub struct X86_64Registers;

impl X86_64Registers {
    fn group_of(name: &str) -> Option<(&'static [&'static str], &'static [u32])> {
        if let Some(group) = GENERAL_PURPOSE.iter().find(|group| group.contains(&name)) {
            return Some((group.as_slice(), GENERAL_PURPOSE_BITS.as_slice()));
        }

        if PROGRAM_COUNTER.contains(&name) {
            return Some((PROGRAM_COUNTER.as_slice(), PROGRAM_COUNTER_BITS.as_slice()));
        }

        None
    }
}

impl RegisterModel for X86_64Registers {
    fn registers(&self) -> Vec<RegisterInfo> {
        GENERAL_PURPOSE
            .iter()
            .flat_map(|group| group.iter().zip(GENERAL_PURPOSE_BITS))
            .chain(PROGRAM_COUNTER.iter().zip(PROGRAM_COUNTER_BITS))
            .map(|(&name, bits)| RegisterInfo::new(name, bits))
            .collect()
    }

    fn bit_width(&self, name: &str) -> Option<u32> {
        let (group, bits) = Self::group_of(name)?;
        group
            .iter()
            .position(|&alias| alias == name)
            .map(|index| bits[index])
    }

    fn alias_group(&self, name: &str) -> Option<Vec<String>> {
        let (group, _) = Self::group_of(name)?;
        Some(group.iter().map(|alias| alias.to_string()).collect())
    }

    fn program_counter(&self) -> Option<String> {
        Some(PROGRAM_COUNTER[0].to_string())
    }
}

fn register_bits(name: &str) -> u32 {
    X86_64Registers.bit_width(name).unwrap_or(u64::BITS)
}

/// `push reg`
pub fn push(register: &str) -> Instruction {
    Instruction::new(InstructionKind::Push(StoreAccess {
        base: STACK_POINTER.to_string(),
        offset: Some(-(register_bits(register) as i64 / 8)),
        bits: Some(register_bits(register)),
        sources: vec![SourceOperand::Register(register.to_string())],
    }))
    .reads(register)
    .reads(STACK_POINTER)
    .writes(STACK_POINTER)
    .with_text(format!("push {register}"))
}

/// `pop reg`
pub fn pop(register: &str) -> Instruction {
    Instruction::new(InstructionKind::Pop(PopAccess {
        destination: register.to_string(),
        stack_pointer: STACK_POINTER.to_string(),
        offset: register_bits(register) as i64 / 8,
    }))
    .writes(register)
    .reads(STACK_POINTER)
    .writes(STACK_POINTER)
    .with_text(format!("pop {register}"))
}

/// `mov [base + offset], source` storing the full width of `source`.
pub fn store(base: &str, offset: i64, source: &str) -> Instruction {
    Instruction::new(InstructionKind::Store(StoreAccess {
        base: base.to_string(),
        offset: Some(offset),
        bits: Some(register_bits(source)),
        sources: vec![SourceOperand::Register(source.to_string())],
    }))
    .reads(base)
    .reads(source)
    .with_text(format!("mov [{base}{offset:+}], {source}"))
}

/// `mov [base + offset], immediate` storing `bits` bits.
pub fn store_imm(base: &str, offset: i64, immediate: i64, bits: u32) -> Instruction {
    Instruction::new(InstructionKind::Store(StoreAccess {
        base: base.to_string(),
        offset: Some(offset),
        bits: Some(bits),
        sources: vec![SourceOperand::Immediate(immediate)],
    }))
    .reads(base)
    .with_text(format!("mov [{base}{offset:+}], {immediate:#x}"))
}

/// `mov destination, [base + offset]`
pub fn load(destination: &str, base: &str, offset: i64) -> Instruction {
    Instruction::new(InstructionKind::Load(LoadAccess {
        destination: destination.to_string(),
        base: base.to_string(),
        offset: Some(offset),
    }))
    .writes(destination)
    .reads(base)
    .with_text(format!("mov {destination}, [{base}{offset:+}]"))
}

/// `add reg, immediate`
pub fn add_imm(register: &str, immediate: i64) -> Instruction {
    Instruction::new(InstructionKind::AddImmediate {
        register: register.to_string(),
        immediate,
    })
    .writes(register)
    .reads(register)
    .writes("eflags")
    .with_text(format!("add {register}, {immediate:#x}"))
}

/// `mov reg, immediate`
pub fn mov_imm(register: &str, immediate: i64) -> Instruction {
    Instruction::new(InstructionKind::Other)
        .writes(register)
        .with_text(format!("mov {register}, {immediate:#x}"))
}

/// `mov destination, source` between registers
pub fn mov(destination: &str, source: &str) -> Instruction {
    Instruction::new(InstructionKind::Other)
        .writes(destination)
        .reads(source)
        .with_text(format!("mov {destination}, {source}"))
}

/// `call target`
pub fn call(target: u64) -> Instruction {
    Instruction::new(InstructionKind::Call)
        .reads(STACK_POINTER)
        .writes(STACK_POINTER)
        .with_text(format!("call {target:#x}"))
}

/// `ret`
pub fn ret() -> Instruction {
    Instruction::new(InstructionKind::Return)
        .reads(STACK_POINTER)
        .writes(STACK_POINTER)
        .with_text("ret")
}
