use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::{HexValue, ParseError};

/// Name and bit width of an architecturally named register.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegisterInfo {
    pub name: String,
    pub bits: u32,
}

impl RegisterInfo {
    pub fn new(name: impl Into<String>, bits: u32) -> Self {
        Self {
            name: name.into(),
            bits,
        }
    }
}

/// Register topology of a target: which registers exist, how wide they are, and which of them
/// overlap.
pub trait RegisterModel {
    /// Every register tracked during reconstruction, in display order.
    fn registers(&self) -> Vec<RegisterInfo>;

    /// Bit width of the register, if it is known to the model.
    fn bit_width(&self, name: &str) -> Option<u32>;

    /// Registers sharing physical storage with `name`, ordered widest to narrowest. The group
    /// includes `name` itself. Returns `None` if the register is unknown to the model.
    fn alias_group(&self, name: &str) -> Option<Vec<String>>;

    /// Name of the program counter register, if the target has one that is tracked.
    fn program_counter(&self) -> Option<String>;

    /// Whether `name` is the program counter or one of its aliases.
    fn is_program_counter(&self, name: &str) -> bool {
        match (self.program_counter(), self.alias_group(name)) {
            (Some(pc), Some(group)) => group.iter().any(|alias| *alias == pc),
            (Some(pc), None) => pc == name,
            (None, _) => false,
        }
    }
}

#[derive(Clone, Debug)]
struct RegisterValue {
    name: String,
    bits: u32,
    value: Option<HexValue>,
}

/// Serializable view of a single register in a [RegisterBank].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterSnapshot {
    pub name: String,
    pub bits: u32,
    pub value: Option<String>,
}

/// Table of current register values for one function being reconstructed.
///
/// The set of registers is fixed at construction. Every value held by the bank has exactly the
/// declared width of its register, and writes through [Self::write_uint] or [Self::invalidate]
/// reach every member of the register's alias group.
#[derive(Clone, Debug)]
pub struct RegisterBank {
    entries: Vec<RegisterValue>,
    index: HashMap<String, usize>,
    aliases: HashMap<String, Vec<String>>,
}

impl RegisterBank {
    /// Create a bank tracking every register of `model`, all initially unknown.
    pub fn new<R: RegisterModel + ?Sized>(model: &R) -> Self {
        let entries = model
            .registers()
            .into_iter()
            .map(|info| RegisterValue {
                name: info.name,
                bits: info.bits.clamp(1, HexValue::MAX_BITS),
                value: None,
            })
            .collect::<Vec<_>>();

        let index = entries
            .iter()
            .enumerate()
            .map(|(i, entry)| (entry.name.clone(), i))
            .collect();

        let aliases = entries
            .iter()
            .filter_map(|entry| {
                model
                    .alias_group(&entry.name)
                    .map(|group| (entry.name.clone(), group))
            })
            .collect();

        Self {
            entries,
            index,
            aliases,
        }
    }

    fn entry(&self, name: &str) -> Option<&RegisterValue> {
        self.index.get(name).map(|&i| &self.entries[i])
    }

    fn entry_mut(&mut self, name: &str) -> Option<&mut RegisterValue> {
        self.index.get(name).map(|&i| &mut self.entries[i])
    }

    /// Whether the register is tracked by this bank.
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Declared bit width of a tracked register.
    pub fn bit_width(&self, name: &str) -> Option<u32> {
        self.entry(name).map(|entry| entry.bits)
    }

    /// Current value of the register, or `None` if it is unknown or untracked.
    pub fn get(&self, name: &str) -> Option<HexValue> {
        self.entry(name).and_then(|entry| entry.value)
    }

    /// Overwrite a single register without touching its aliases. The value is resized to the
    /// register's declared width.
    pub fn set(&mut self, name: &str, value: Option<HexValue>) {
        if let Some(entry) = self.entry_mut(name) {
            entry.value = value.map(|value| value.resize(entry.bits));
        }
    }

    /// Width-aware merge of `new_value` into a single register.
    ///
    /// - `None` makes the register unknown.
    /// - An unknown register adopts the low-order bits of the incoming value that fit.
    /// - A known register takes a same-width value outright, has only its low-order portion
    ///   replaced by a narrower value, and takes the low-order portion of a wider value.
    pub fn update(&mut self, name: &str, new_value: Option<HexValue>) {
        let Some(entry) = self.entry_mut(name) else {
            return;
        };

        entry.value = match (entry.value, new_value) {
            (_, None) => None,
            (None, Some(incoming)) => Some(incoming.resize(entry.bits)),
            (Some(current), Some(incoming)) => Some(current.overlay_low(incoming)),
        };
    }

    /// Render `value` at `width_bits` and merge it into every alias of `name`.
    pub fn write_uint(&mut self, name: &str, value: u64, width_bits: u32) {
        let value = HexValue::new(value, width_bits);
        self.propagate(name, Some(value));
    }

    /// Mark `name` and all of its aliases unknown.
    pub fn invalidate(&mut self, name: &str) {
        self.propagate(name, None);
    }

    /// Load a register from the textual form a debugger reports, e.g. `0x0000000000001000`.
    pub fn seed_hex(&mut self, name: &str, text: &str) -> Result<(), ParseError> {
        let value: HexValue = text.parse()?;
        self.propagate(name, Some(value));
        Ok(())
    }

    fn propagate(&mut self, name: &str, value: Option<HexValue>) {
        match self.aliases.get(name).cloned() {
            Some(group) => {
                for alias in &group {
                    self.update(alias, value);
                }
            }
            None => self.update(name, value),
        }
    }

    /// Registers of the bank, in construction order, with their current values.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<HexValue>)> {
        self.entries
            .iter()
            .map(|entry| (entry.name.as_str(), entry.value))
    }

    pub fn snapshot(&self) -> Vec<RegisterSnapshot> {
        self.entries
            .iter()
            .map(|entry| RegisterSnapshot {
                name: entry.name.clone(),
                bits: entry.bits,
                value: entry.value.map(|value| value.to_string()),
            })
            .collect()
    }

    /// Human readable listing of every register, one per line.
    pub fn dump(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for RegisterBank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            match entry.value {
                Some(value) => writeln!(f, "{name}: {value}", name = entry.name)?,
                None => writeln!(f, "{name}: <not available>", name = entry.name)?,
            }
        }
        Ok(())
    }
}
