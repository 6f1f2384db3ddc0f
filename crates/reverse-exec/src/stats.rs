use std::fmt;

use serde::{Deserialize, Serialize};

use crate::insn::InstructionModel;

/// Number of memory-touching instructions of one function.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionMemoryStats {
    pub function: String,
    pub count: usize,
}

impl FunctionMemoryStats {
    pub fn collect<'i, I: 'i, M: InstructionModel<I> + ?Sized>(
        function: impl Into<String>,
        model: &M,
        instructions: impl IntoIterator<Item = &'i I>,
    ) -> Self {
        Self {
            function: function.into(),
            count: count_memory_instructions(model, instructions),
        }
    }
}

impl fmt::Display for FunctionMemoryStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.function, self.count)
    }
}

/// Count the instructions that access memory: calls, returns, pushes, pops, loads, stores and
/// anything else carrying a memory operand.
pub fn count_memory_instructions<'i, I: 'i, M: InstructionModel<I> + ?Sized>(
    model: &M,
    instructions: impl IntoIterator<Item = &'i I>,
) -> usize {
    instructions
        .into_iter()
        .filter(|instruction| model.classify(instruction).touches_memory())
        .count()
}
