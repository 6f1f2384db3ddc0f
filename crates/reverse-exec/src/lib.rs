//! This crate reconstructs the state of a crashed program backwards in time. Given the register
//! and memory state at the crash and the instructions that led to it, each instruction is undone
//! in reverse order to recover concrete register and memory values from before it executed.
//!
//! ### Reconstruction session
//!
//! A [stepper::ReverseStepper] owns the [regs::RegisterBank] of the function frame being
//! reconstructed and a [mem::ByteOverlay] recording memory bytes whose earlier value has been
//! computed. Bytes the overlay does not track are read from the [mem::LiveMemory] of the inferior.
//!
//! Everything target specific comes from collaborators: a [regs::RegisterModel] for register
//! widths and aliasing, an [insn::InstructionModel] for instruction classification and
//! optionally an [equiv::EquivalenceAnalysis] for recovering registers from their equivalents.
//! [arch::x86_64] provides the first two for x86-64.
//!
//! Values that cannot be determined become unknown. Unknown is a regular outcome of
//! reconstruction rather than an error.

/// Target specific collaborators.
pub mod arch;

/// Session configuration.
pub mod config;

/// Diagnostic dumps of reconstruction state.
pub mod diag;

/// Recovery of register values through register equivalences.
pub mod equiv;

/// Classified instructions and the instruction model collaborator.
pub mod insn;

/// Byte granular shadow memory layered over the inferior's memory.
pub mod mem;

/// Per-function register values with alias-consistent updates.
pub mod regs;

/// Counting of memory-touching instructions.
pub mod stats;

/// Reverse execution of instructions.
pub mod stepper;

/// Fixed-width concrete values.
pub mod value;

#[cfg(test)]
mod test_fixture;
