use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use crate::diag::Diagnostics;
use crate::equiv::{Equivalence, EquivalenceAnalysis};
use crate::insn::Instruction;
use crate::mem::LiveMemory;

/// Sparse memory image. Reads of bytes that were never written fail.
#[derive(Clone, Debug, Default)]
pub struct TestMemory {
    bytes: BTreeMap<u64, u8>,
}

impl TestMemory {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_bytes(mut self, address: u64, bytes: &[u8]) -> Self {
        for (i, &byte) in bytes.iter().enumerate() {
            self.bytes.insert(address + i as u64, byte);
        }
        self
    }

    pub fn with_u64(self, address: u64, value: u64) -> Self {
        self.with_bytes(address, &value.to_le_bytes())
    }
}

impl LiveMemory for TestMemory {
    fn read_bytes(&self, address: u64, size: usize) -> Result<Vec<u8>, String> {
        (0..size as u64)
            .map(|i| {
                let byte = address
                    .checked_add(i)
                    .ok_or_else(|| format!("{address:#x} + {i} overflows"))?;
                self.bytes
                    .get(&byte)
                    .copied()
                    .ok_or_else(|| format!("{byte:#x} not mapped"))
            })
            .collect()
    }
}

/// Equivalences keyed on instruction address and register.
#[derive(Clone, Debug, Default)]
pub struct ScriptedEquivalence {
    equivalences: HashMap<(u64, String), Vec<Equivalence>>,
}

impl ScriptedEquivalence {
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

impl EquivalenceAnalysis<Instruction> for ScriptedEquivalence {
    fn equivalent_after(&self, instruction: &Instruction, register: &str) -> Vec<Equivalence> {
        instruction
            .address
            .and_then(|address| self.equivalences.get(&(address, register.to_string())))
            .cloned()
            .unwrap_or_default()
    }
}

/// Diagnostics sink keeping every report for inspection.
#[derive(Clone, Debug, Default)]
pub struct RecordingDiagnostics {
    pub reports: Rc<RefCell<Vec<(String, String)>>>,
}

impl Diagnostics for RecordingDiagnostics {
    fn report(&mut self, title: &str, body: &str) {
        self.reports
            .borrow_mut()
            .push((title.to_string(), body.to_string()));
    }
}
