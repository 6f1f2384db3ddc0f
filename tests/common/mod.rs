use std::collections::{BTreeMap, HashMap};

use concrete_reverse_exec::arch::x86_64::{self, X86_64Registers};
use concrete_reverse_exec::config::SessionConfig;
use concrete_reverse_exec::equiv::{Equivalence, EquivalenceAnalysis};
use concrete_reverse_exec::insn::{Instruction, InstructionKind, InstructionModel};
use concrete_reverse_exec::mem::LiveMemory;
use concrete_reverse_exec::stepper::ReverseStepper;

/// Instruction as listed by a debugger disassembly.
#[derive(Clone, Debug)]
pub struct Disassembly {
    pub address: u64,
    pub text: &'static str,
    pub crashed: bool,
}

pub fn listing(lines: &[(u64, &'static str)]) -> Vec<Disassembly> {
    lines
        .iter()
        .map(|&(address, text)| Disassembly {
            address,
            text,
            crashed: false,
        })
        .collect()
}

/// Same as [listing] with the last instruction marked as the crashing one.
pub fn crashed_listing(lines: &[(u64, &'static str)]) -> Vec<Disassembly> {
    let mut block = listing(lines);
    if let Some(last) = block.last_mut() {
        last.crashed = true;
    }
    block
}

/// Classifies Intel syntax x86-64 text for the handful of forms used by these tests.
pub struct TextModel;

impl InstructionModel<Disassembly> for TextModel {
    fn classify(&self, instruction: &Disassembly) -> Instruction {
        let classified = parse(instruction.text)
            .at(instruction.address)
            .with_text(instruction.text);

        if instruction.crashed {
            classified.crash_start()
        } else {
            classified
        }
    }
}

fn parse(text: &str) -> Instruction {
    let (mnemonic, operands) = text.split_once(' ').unwrap_or((text, ""));
    let operands = operands
        .split(',')
        .map(str::trim)
        .filter(|operand| !operand.is_empty())
        .collect::<Vec<_>>();

    match (mnemonic, operands.as_slice()) {
        ("push", [register]) => x86_64::push(register),
        ("pop", [register]) => x86_64::pop(register),
        ("ret", []) => x86_64::ret(),
        ("call", [target]) => x86_64::call(parse_immediate(target).expect("call target") as u64),
        ("add", [register, source]) => match parse_immediate(source) {
            Some(immediate) => x86_64::add_imm(register, immediate),
            None => x86_64::mov(register, source).reads(*register),
        },
        ("sub", [register, source]) => match parse_immediate(source) {
            Some(immediate) => x86_64::add_imm(register, -immediate),
            None => x86_64::mov(register, source).reads(*register),
        },
        ("mov", [destination, source]) => {
            if let Some((base, offset)) = parse_memory(destination) {
                match parse_immediate(source) {
                    Some(immediate) => x86_64::store_imm(base, offset, immediate, 64),
                    None => x86_64::store(base, offset, source),
                }
            } else if let Some((base, offset)) = parse_memory(source) {
                x86_64::load(destination, base, offset)
            } else if let Some(immediate) = parse_immediate(source) {
                x86_64::mov_imm(destination, immediate)
            } else {
                x86_64::mov(destination, source)
            }
        }
        _ => Instruction::new(InstructionKind::Other),
    }
}

fn parse_memory(operand: &str) -> Option<(&str, i64)> {
    let inner = operand.strip_prefix('[')?.strip_suffix(']')?;
    match inner.find(['+', '-']) {
        Some(index) => {
            let (base, offset) = inner.split_at(index);
            Some((base, parse_immediate(offset)?))
        }
        None => Some((inner, 0)),
    }
}

fn parse_immediate(text: &str) -> Option<i64> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(digits) => (true, digits),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };

    let value = match digits.strip_prefix("0x") {
        Some(hex) => i64::from_str_radix(hex, 16).ok()?,
        None => digits.parse().ok()?,
    };

    Some(if negative { -value } else { value })
}

/// Memory image captured with the crash.
#[derive(Clone, Debug, Default)]
pub struct CoreImage {
    bytes: BTreeMap<u64, u8>,
}

impl CoreImage {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_u64(mut self, address: u64, value: u64) -> Self {
        for (i, byte) in value.to_le_bytes().into_iter().enumerate() {
            self.bytes.insert(address + i as u64, byte);
        }
        self
    }
}

impl LiveMemory for CoreImage {
    fn read_bytes(&self, address: u64, size: usize) -> Result<Vec<u8>, String> {
        (0..size as u64)
            .map(|i| {
                self.bytes
                    .get(&(address + i))
                    .copied()
                    .ok_or_else(|| format!("{:#x} is not in the core image", address + i))
            })
            .collect()
    }
}

/// Equivalences reported by a dataflow pass, keyed on instruction address and register.
#[derive(Clone, Debug, Default)]
pub struct AddressEquivalence {
    equivalences: HashMap<(u64, String), Vec<Equivalence>>,
}

impl AddressEquivalence {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with(mut self, address: u64, register: &str, equivalence: Equivalence) -> Self {
        self.equivalences
            .entry((address, register.to_string()))
            .or_default()
            .push(equivalence);
        self
    }
}

impl EquivalenceAnalysis<Disassembly> for AddressEquivalence {
    fn equivalent_after(&self, instruction: &Disassembly, register: &str) -> Vec<Equivalence> {
        self.equivalences
            .get(&(instruction.address, register.to_string()))
            .cloned()
            .unwrap_or_default()
    }
}

/// Stepper for `function` with the given crash register state.
pub fn crashed_stepper<'a>(
    function: &str,
    core: &'a CoreImage,
    registers: &[(&str, u64)],
) -> ReverseStepper<'a, Disassembly> {
    let mut stepper = ReverseStepper::new(
        SessionConfig::for_function(function),
        &X86_64Registers,
        &TextModel,
        Some(core),
    )
    .expect("failed to create stepper");

    for &(register, value) in registers {
        stepper.registers_mut().write_uint(register, value, 64);
    }

    stepper
}

pub fn value(stepper: &ReverseStepper<'_, Disassembly>, register: &str) -> Option<u64> {
    stepper.registers().get(register).map(|value| value.value())
}
