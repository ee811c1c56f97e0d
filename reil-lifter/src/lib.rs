//! Lifts native x86 instructions into architecture-neutral IR.
//!
//! A [`NativeInstruction`] is the boundary type this crate consumes: it is
//! deliberately shallow (a mnemonic string, up to three [`NativeOperand`]s,
//! the instruction's address and byte length) because a disassembler's own
//! richer instruction model differs across front ends. [`translate`] turns
//! one of these into the IR sequence a [`reil_core::Builder`] produces, one
//! translator function per mnemonic.

#[cfg(feature = "arm")]
pub mod arm;
pub mod control;
pub mod flags;
pub mod x86;

use reil_core::{Builder, BuilderError, Instruction, Width};
use thiserror::Error;

pub type RegisterName = String;

/// A native operand as the disassembler front end hands it to the lifter.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum NativeOperand {
    Register { name: RegisterName, width: Width },
    Immediate { value: u128, width: Width },
    /// A memory reference `[base + index*scale + disp]`, sized to the width
    /// of the value it addresses.
    Memory {
        base: Option<RegisterName>,
        index: Option<RegisterName>,
        scale: u32,
        disp: i64,
        width: Width,
    },
    /// ARM `{r0, r4-r7}`-style multi-register operand, as used by `ldm`/
    /// `stm`/`push`/`pop`. Only consumed by the [`arm`] stub; the x86
    /// translators never produce or match on this variant.
    RegisterList { registers: Vec<RegisterName>, width: Width },
    /// ARM's barrel-shifter second operand (`r1, lsl #4` or `r1, lsl r2`).
    /// Only consumed by the [`arm`] stub.
    Shifter {
        register: RegisterName,
        op: ShifterOp,
        amount: ShifterAmount,
        width: Width,
    },
}

/// The ARM barrel-shifter operation applied to a [`NativeOperand::Shifter`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ShifterOp {
    Lsl,
    Lsr,
    Asr,
    Ror,
    Rrx,
}

/// The ARM barrel-shifter amount: an immediate count or a register whose low
/// byte is read at lift time.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum ShifterAmount {
    Immediate(u32),
    Register(RegisterName),
}

impl NativeOperand {
    pub fn register(name: impl Into<RegisterName>, width: Width) -> NativeOperand {
        NativeOperand::Register { name: name.into(), width }
    }

    pub fn immediate(value: u128, width: Width) -> NativeOperand {
        NativeOperand::Immediate { value, width }
    }

    pub fn memory(disp: i64, base: Option<RegisterName>, width: Width) -> NativeOperand {
        NativeOperand::Memory { base, index: None, scale: 1, disp, width }
    }

    pub fn width(&self) -> Width {
        match self {
            NativeOperand::Register { width, .. } => *width,
            NativeOperand::Immediate { width, .. } => *width,
            NativeOperand::Memory { width, .. } => *width,
            NativeOperand::RegisterList { width, .. } => *width,
            NativeOperand::Shifter { width, .. } => *width,
        }
    }
}

/// One native instruction as decoded by a disassembler front end.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct NativeInstruction {
    pub mnemonic: String,
    pub operands: Vec<NativeOperand>,
    pub address: u64,
    /// Byte length of the encoded instruction, needed to compute the
    /// fall-through address for control transfers (`CALL`, `Jcc`, `LOOP*`).
    pub length: u8,
}

impl NativeInstruction {
    pub fn new(
        mnemonic: impl Into<String>,
        operands: Vec<NativeOperand>,
        address: u64,
        length: u8,
    ) -> NativeInstruction {
        NativeInstruction { mnemonic: mnemonic.into().to_ascii_lowercase(), operands, address, length }
    }

    pub fn next_address(&self) -> u64 {
        self.address + self.length as u64
    }

    pub fn operand(&self, index: usize) -> Option<&NativeOperand> {
        self.operands.get(index)
    }
}

#[derive(Error, Clone, PartialEq, Eq, Debug)]
pub enum LifterError {
    #[error("no translation for mnemonic {0:?}")]
    UnsupportedMnemonic(String),
    #[error("{0:?} expects an operand at index {1}")]
    MissingOperand(String, usize),
    #[error("{0:?} cannot write to an immediate operand")]
    InvalidDestination(String),
    #[error("operand width {0} is not an admissible IR width")]
    InvalidOperandWidth(u32),
    #[error(transparent)]
    Builder(#[from] BuilderError),
}

/// Lifts a single native instruction into its IR sequence.
pub fn translate(instr: &NativeInstruction) -> Result<Vec<Instruction>, LifterError> {
    let mut builder = Builder::new(instr.address);
    x86::translate_into(&mut builder, instr)?;
    Ok(builder.finish()?)
}
