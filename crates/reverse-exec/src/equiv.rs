use log::trace;

use crate::mem::ByteOverlay;
use crate::regs::RegisterBank;

/// A register related to the queried one at a program point.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Equivalence {
    pub register: String,

    /// When set the queried register equals the value stored at `[register + offset]`.
    /// Otherwise it equals `register` itself and `offset` is not used.
    pub dereferenced: bool,

    pub offset: i64,
}

impl Equivalence {
    pub fn register(register: impl Into<String>) -> Self {
        Self {
            register: register.into(),
            dereferenced: false,
            offset: 0,
        }
    }

    pub fn deref(register: impl Into<String>, offset: i64) -> Self {
        Self {
            register: register.into(),
            dereferenced: true,
            offset,
        }
    }
}

/// Dataflow analysis tracking which registers hold equal or pointer-related values.
pub trait EquivalenceAnalysis<I: ?Sized> {
    /// Registers equivalent to `register` right after `instruction` executes.
    fn equivalent_after(&self, instruction: &I, register: &str) -> Vec<Equivalence>;
}

/// Recovers the value of a register from its equivalents when the register itself is unknown.
pub struct EquivalenceBridge<'a, I: ?Sized> {
    analysis: Option<&'a dyn EquivalenceAnalysis<I>>,
}

impl<'a, I: ?Sized> EquivalenceBridge<'a, I> {
    pub fn new(analysis: Option<&'a dyn EquivalenceAnalysis<I>>) -> Self {
        Self { analysis }
    }

    /// Value of `register` after `instruction`, derived from the first equivalent whose value is
    /// currently known.
    pub fn resolve(
        &self,
        instruction: &I,
        register: &str,
        registers: &RegisterBank,
        memory: &ByteOverlay<'_>,
    ) -> Option<u64> {
        let analysis = self.analysis?;

        for equivalence in analysis.equivalent_after(instruction, register) {
            if equivalence.register == register {
                continue;
            }

            let Some(base) = registers.get(&equivalence.register) else {
                continue;
            };

            if !equivalence.dereferenced {
                trace!(
                    "{register} recovered from equivalent {other}",
                    other = equivalence.register
                );
                return Some(base.value());
            }

            let address = base.value().wrapping_add_signed(equivalence.offset);
            let size = registers
                .bit_width(register)
                .unwrap_or(u64::BITS)
                .div_ceil(u8::BITS) as usize;

            if let Ok(value) = memory.read_unsigned(address, size) {
                trace!(
                    "{register} recovered from [{other}{offset:+}]",
                    other = equivalence.register,
                    offset = equivalence.offset
                );
                return Some(value);
            }
        }

        None
    }
}
