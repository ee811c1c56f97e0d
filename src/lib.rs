//! Architecture-neutral intermediate representation (the "IR") for lifted
//! native instructions, a builder that assembles well-formed IR sequences,
//! and a concrete emulator that executes them over a register file and a
//! byte-addressed memory.
//!
//! The companion crates [`reil-lifter`](../reil_lifter/index.html) and
//! [`reil-smt`](../reil_smt/index.html) consume the types defined here to
//! translate native instructions into IR and to translate IR into SMT
//! assertions, respectively.

pub mod alias;
pub mod builder;
pub mod emulator;
pub mod ir;

pub use alias::AliasMap;
pub use builder::{Builder, BuilderError};
pub use emulator::{
    execute, execute_lite, EmulationFault, Emulator, IrContainer, Memory, MemoryConfig, RegisterFile,
};
pub use ir::{Instruction, IrAddress, Mnemonic, Operand, RegisterName, Width, WidthError};
