/// x86-64 register model and instruction classification.
pub mod x86_64;
