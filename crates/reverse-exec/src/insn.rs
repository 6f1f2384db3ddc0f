use std::fmt;

/// Register mentioned by an instruction, explicitly or implicitly.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegisterOperand {
    pub name: String,

    /// The instruction writes this register.
    pub defined: bool,
}

/// Value operand of a store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceOperand {
    Register(String),
    Immediate(i64),
    Memory { base: String, offset: i64 },
}

/// Memory destination of a store or push.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreAccess {
    /// Register holding the base address. For a push this is the stack pointer.
    pub base: String,

    /// Constant added to the base. For a push this is the implicit stack adjustment, e.g. `-8`.
    pub offset: Option<i64>,

    /// Width of the memory access if it is statically known.
    pub bits: Option<u32>,

    /// Operands whose value is written to memory.
    pub sources: Vec<SourceOperand>,
}

impl StoreAccess {
    /// The single plain register written to memory, if the store has exactly one source and it
    /// is a register.
    pub fn single_register_source(&self) -> Option<&str> {
        match self.sources.as_slice() {
            [SourceOperand::Register(name)] => Some(name),
            _ => None,
        }
    }
}

/// Register destination of a load from `[base + offset]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadAccess {
    pub destination: String,
    pub base: String,
    pub offset: Option<i64>,
}

/// Register destination of a pop from the stack.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PopAccess {
    pub destination: String,
    pub stack_pointer: String,

    /// Implicit stack adjustment, e.g. `8`.
    pub offset: i64,
}

/// Semantic class of an instruction, as far as backward reconstruction cares.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InstructionKind {
    Store(StoreAccess),
    Push(StoreAccess),
    Pop(PopAccess),
    Load(LoadAccess),

    /// `register = register + immediate` with no other non-tied source.
    AddImmediate {
        register: String,
        immediate: i64,
    },

    Call,
    Return,

    /// Anything else. Registers it writes become unknown.
    Other,
}

/// Classified instruction consumed by [crate::stepper::ReverseStepper].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Instruction {
    /// Address the instruction was executed from, if known.
    pub address: Option<u64>,

    /// This is the instruction at which the crash happened.
    pub crash_start: bool,

    pub kind: InstructionKind,

    /// Register operands in operand order, implicit operands included. A register may appear
    /// more than once.
    pub registers: Vec<RegisterOperand>,

    /// The instruction has a memory operand not otherwise described by [Self::kind].
    pub memory_operand: bool,

    /// Disassembly used in log messages.
    pub text: String,
}

impl Instruction {
    pub fn new(kind: InstructionKind) -> Self {
        Self {
            address: None,
            crash_start: false,
            kind,
            registers: Vec::new(),
            memory_operand: false,
            text: String::new(),
        }
    }

    pub fn at(mut self, address: u64) -> Self {
        self.address = Some(address);
        self
    }

    pub fn crash_start(mut self) -> Self {
        self.crash_start = true;
        self
    }

    pub fn reads(mut self, register: impl Into<String>) -> Self {
        self.registers.push(RegisterOperand {
            name: register.into(),
            defined: false,
        });
        self
    }

    pub fn writes(mut self, register: impl Into<String>) -> Self {
        self.registers.push(RegisterOperand {
            name: register.into(),
            defined: true,
        });
        self
    }

    pub fn with_memory_operand(mut self) -> Self {
        self.memory_operand = true;
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    /// Whether any operand slot of this instruction writes `register`.
    pub fn modifies(&self, register: &str) -> bool {
        self.registers
            .iter()
            .any(|operand| operand.defined && operand.name == register)
    }

    /// Whether executing this instruction accesses memory.
    pub fn touches_memory(&self) -> bool {
        match self.kind {
            InstructionKind::Store(_)
            | InstructionKind::Push(_)
            | InstructionKind::Pop(_)
            | InstructionKind::Load(_)
            | InstructionKind::Call
            | InstructionKind::Return => true,
            InstructionKind::AddImmediate { .. } | InstructionKind::Other => self.memory_operand,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(address) = self.address {
            write!(f, "{address:#x}: ")?;
        }

        if self.text.is_empty() {
            write!(f, "{:?}", self.kind)
        } else {
            write!(f, "{}", self.text)
        }
    }
}

/// Target instruction model. Classifies native instructions of type `I`.
pub trait InstructionModel<I: ?Sized> {
    fn classify(&self, instruction: &I) -> Instruction;
}

/// Instruction model for instructions that were classified up front.
#[derive(Copy, Clone, Debug, Default)]
pub struct Preclassified;

impl InstructionModel<Instruction> for Preclassified {
    fn classify(&self, instruction: &Instruction) -> Instruction {
        instruction.clone()
    }
}
