use std::collections::HashSet;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use thiserror;

use crate::config::SessionConfig;
use crate::diag::{Diagnostics, LogDiagnostics};
use crate::equiv::{EquivalenceAnalysis, EquivalenceBridge};
use crate::insn::{
    Instruction, InstructionKind, InstructionModel, LoadAccess, PopAccess, StoreAccess,
};
use crate::mem::{self, ByteOverlay, LiveMemory};
use crate::regs::{RegisterBank, RegisterModel, RegisterSnapshot};
use crate::value::HexValue;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The memory overlay could not be created
    #[error(transparent)]
    Memory(#[from] mem::Error),

    #[error("invalid session configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Register state right before an instruction, as reconstructed by a block walk.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub instruction: String,
    pub address: Option<u64>,
    pub registers: Vec<RegisterSnapshot>,
}

/// Concrete reverse execution of one function frame.
///
/// Starting from the crash state, instructions are undone one at a time, last executed first.
/// Each step turns the register bank and memory overlay from the state after the instruction
/// into the state before it. Values that cannot be determined become unknown; nothing in a step
/// fails.
pub struct ReverseStepper<'a, I> {
    config: SessionConfig,
    registers: RegisterBank,
    memory: ByteOverlay<'a>,
    register_model: &'a dyn RegisterModel,
    instructions: &'a dyn InstructionModel<I>,
    equivalence: EquivalenceBridge<'a, I>,
    diagnostics: Box<dyn Diagnostics + 'a>,
}

impl<'a, I> ReverseStepper<'a, I> {
    pub fn new(
        config: SessionConfig,
        register_model: &'a dyn RegisterModel,
        instructions: &'a dyn InstructionModel<I>,
        live: Option<&'a dyn LiveMemory>,
    ) -> Result<Self> {
        if config.default_access_bytes == 0 {
            return Err(Error::InvalidConfig(
                "default access width must be at least one byte".to_string(),
            ));
        }

        let memory = ByteOverlay::new(config.unit_size, live)?;
        Ok(Self {
            registers: RegisterBank::new(register_model),
            memory,
            register_model,
            instructions,
            equivalence: EquivalenceBridge::new(None),
            diagnostics: Box::new(LogDiagnostics),
            config,
        })
    }

    /// Use `analysis` to recover register values that are not directly known.
    pub fn with_equivalence(mut self, analysis: &'a dyn EquivalenceAnalysis<I>) -> Self {
        self.equivalence = EquivalenceBridge::new(Some(analysis));
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: Box<dyn Diagnostics + 'a>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn registers(&self) -> &RegisterBank {
        &self.registers
    }

    /// Mutable access to the register bank, used to seed the crash state.
    pub fn registers_mut(&mut self) -> &mut RegisterBank {
        &mut self.registers
    }

    pub fn memory(&self) -> &ByteOverlay<'a> {
        &self.memory
    }

    /// Start reconstructing another function frame. Registers start over as unknown; the memory
    /// overlay is kept since it describes memory rather than the frame.
    pub fn begin_function(&mut self, name: impl Into<String>) {
        self.config.function_name = name.into();
        self.registers = RegisterBank::new(self.register_model);
    }

    pub fn into_parts(self) -> (RegisterBank, ByteOverlay<'a>) {
        (self.registers, self.memory)
    }

    /// Undo every instruction of `block`, last to first.
    pub fn run_block(&mut self, block: &[I]) {
        for index in (0..block.len()).rev() {
            let previous = index.checked_sub(1).map(|i| &block[i]);
            self.step(&block[index], previous);
        }
    }

    /// Undo every instruction of `block`, last to first, recording the register state reached
    /// after each step. Records are in walk order.
    pub fn run_block_recording(&mut self, block: &[I]) -> Vec<StepRecord> {
        let mut records = Vec::with_capacity(block.len());
        for index in (0..block.len()).rev() {
            let previous = index.checked_sub(1).map(|i| &block[i]);
            let classified = self.instructions.classify(&block[index]);
            if self.config.enabled {
                self.apply(&block[index], previous, &classified);
            }
            records.push(StepRecord {
                instruction: classified.to_string(),
                address: classified.address,
                registers: self.registers.snapshot(),
            });
        }
        records
    }

    /// Undo a single instruction. `previous` is the instruction executed right before it within
    /// the same block, if any.
    pub fn step(&mut self, instruction: &I, previous: Option<&I>) {
        if !self.config.enabled {
            return;
        }

        let classified = self.instructions.classify(instruction);
        self.apply(instruction, previous, &classified);
    }

    fn apply(&mut self, instruction: &I, previous: Option<&I>, classified: &Instruction) {
        self.update_program_counter(classified);

        // Registers already handled by a memory rule are not revisited by the register rules
        let mut handled = HashSet::new();
        match &classified.kind {
            InstructionKind::Store(access) => {
                self.undo_store(instruction, classified, access, false, &mut handled)
            }
            InstructionKind::Push(access) => {
                self.undo_store(instruction, classified, access, true, &mut handled)
            }
            InstructionKind::Pop(access) => self.undo_pop(access, &mut handled),
            InstructionKind::Call | InstructionKind::Return => {
                debug!("{classified} is a frame boundary, state unchanged");
                return;
            }
            InstructionKind::Load(_)
            | InstructionKind::AddImmediate { .. }
            | InstructionKind::Other => (),
        }

        self.undo_register_writes(instruction, previous, classified, handled);
    }

    fn update_program_counter(&mut self, instruction: &Instruction) {
        // The crash state already holds the program counter of the crashing instruction
        if instruction.crash_start {
            return;
        }

        let Some(pc) = self.register_model.program_counter() else {
            return;
        };

        match instruction.address {
            Some(address) => {
                let bits = self.registers.bit_width(&pc).unwrap_or(u64::BITS);
                self.registers.write_uint(&pc, address, bits);
            }
            None => self.registers.invalidate(&pc),
        }
    }

    /// Whether `register` shares storage with `other`, including being the same register.
    fn overlaps(&self, register: &str, other: &str) -> bool {
        register == other
            || self
                .register_model
                .alias_group(other)
                .is_some_and(|group| group.iter().any(|alias| alias == register))
    }

    /// Resolve the current value of `register`, falling back to its equivalents after
    /// `instruction`.
    fn resolve(&self, instruction: &I, register: &str) -> Option<u64> {
        self.registers
            .get(register)
            .map(|value| value.value())
            .or_else(|| {
                self.equivalence
                    .resolve(instruction, register, &self.registers, &self.memory)
            })
    }

    fn undo_store(
        &mut self,
        instruction: &I,
        classified: &Instruction,
        access: &StoreAccess,
        push: bool,
        handled: &mut HashSet<String>,
    ) {
        let base = access.base.as_str();
        let Some(base_value) = self.resolve(instruction, base) else {
            debug!("{classified}: address register {base} not available");
            return;
        };

        // TODO: support pc-relative addressing once instruction sizes are reported
        if self.register_model.is_program_counter(base) {
            debug!("{classified}: pc-relative destination not supported");
            return;
        }

        let Some(offset) = access.offset else {
            if push {
                self.registers.invalidate(base);
                handled.insert(base.to_string());
                self.report_registers();
            }
            return;
        };

        // A push leaves the stack pointer pointing at the stored value
        let address = if push {
            base_value
        } else {
            base_value.wrapping_add_signed(offset)
        };
        let size = access
            .bits
            .map(|bits| bits.div_ceil(u8::BITS) as usize)
            .unwrap_or(self.config.default_access_bytes);

        debug!("{classified}: destination ({base}){offset:+} = {address:#018x}");

        match self.memory.read_unsigned(address, size) {
            Ok(value) => {
                if let Some(source) = access.single_register_source() {
                    self.registers
                        .write_uint(source, value, size as u32 * u8::BITS);
                }
            }
            Err(err) => debug!("{classified}: stored value unknown: {err}"),
        }

        if push {
            let bits = self.registers.bit_width(base).unwrap_or(u64::BITS);
            self.registers
                .write_uint(base, address.wrapping_sub(offset as u64), bits);
            handled.insert(base.to_string());
        }

        if let Err(err) = self.memory.invalidate(address, size) {
            warn!("{classified}: failed to invalidate destination: {err}");
        }

        self.report_registers();
        self.report_memory();
    }

    fn undo_pop(&mut self, access: &PopAccess, handled: &mut HashSet<String>) {
        let destination = access.destination.as_str();
        let stack_pointer = access.stack_pointer.as_str();
        handled.insert(destination.to_string());
        handled.insert(stack_pointer.to_string());

        // The popped value replaced the stack pointer, so its pre-pop value is lost
        if self.overlaps(destination, stack_pointer) {
            debug!("pop into {destination}: stack pointer overwritten, value unknown");
            self.registers.invalidate(destination);
            self.report_registers();
            return;
        }

        if let Some(sp) = self.registers.get(stack_pointer) {
            let slot = sp.value().wrapping_sub(access.offset as u64);
            if let Some(value) = self.registers.get(destination) {
                if let Err(err) = self.memory.write(slot, &value.to_le_bytes()) {
                    warn!("pop into {destination}: failed to restore stack slot: {err}");
                }
                self.report_memory();
            }
            self.registers.write_uint(stack_pointer, slot, sp.bits());
        }

        self.registers.invalidate(destination);
        self.report_registers();
    }

    fn undo_register_writes(
        &mut self,
        instruction: &I,
        previous: Option<&I>,
        classified: &Instruction,
        mut seen: HashSet<String>,
    ) {
        for operand in &classified.registers {
            if !seen.insert(operand.name.clone()) {
                continue;
            }

            let register = operand.name.as_str();
            if !classified.modifies(register) {
                continue;
            }

            debug!("{classified} modifies {register}");

            // Nothing to undo for a register that is already unknown
            let Some(current) = self.registers.get(register) else {
                continue;
            };

            match &classified.kind {
                InstructionKind::Push(_) | InstructionKind::Pop(_) => continue,
                InstructionKind::AddImmediate {
                    register: target,
                    immediate,
                } if target == register => {
                    let value = current.wrapping_sub(*immediate as u64);
                    self.registers
                        .write_uint(register, value.value(), current.bits());
                }
                InstructionKind::Load(access) if access.destination == register => {
                    self.undo_load(instruction, previous, classified, access, current);
                }
                _ => {
                    debug!("{classified}: reverse execution not supported, {register} unknown");
                    self.registers.invalidate(register);
                }
            }

            self.report_registers();
        }
    }

    fn undo_load(
        &mut self,
        instruction: &I,
        previous: Option<&I>,
        classified: &Instruction,
        access: &LoadAccess,
        current: HexValue,
    ) {
        let destination = access.destination.as_str();
        let base = access.base.as_str();

        let Some(offset) = access.offset else {
            self.registers.invalidate(destination);
            return;
        };

        if self.register_model.is_program_counter(base) {
            debug!("{classified}: pc-relative source not supported");
            self.registers.invalidate(destination);
            return;
        }

        // A load through its own destination, or an alias of it, has overwritten the address, so
        // only the value the register had before this instruction can be used
        let base_value = if self.overlaps(base, destination) {
            previous.and_then(|previous| {
                self.equivalence
                    .resolve(previous, base, &self.registers, &self.memory)
            })
        } else {
            self.resolve(instruction, base)
        };

        let Some(base_value) = base_value else {
            debug!("{classified}: source address unknown");
            self.registers.invalidate(destination);
            return;
        };

        let address = base_value.wrapping_add_signed(offset);
        debug!("{classified}: source ({base}){offset:+} = {address:#018x} holds {current}");

        match self.memory.write(address, &current.to_le_bytes()) {
            Ok(()) => self.report_memory(),
            Err(err) => warn!("{classified}: failed to write loaded value back: {err}"),
        }

        self.registers.invalidate(destination);
    }

    fn report_registers(&mut self) {
        let title = format!(
            "Concrete Register Values For Function: {}",
            self.config.function_name
        );
        self.diagnostics.report(&title, &self.registers.dump());
    }

    fn report_memory(&mut self) {
        self.diagnostics
            .report("Concrete Memory Overlay", &self.memory.dump());
    }
}
