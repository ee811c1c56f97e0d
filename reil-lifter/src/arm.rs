//! ARM translation sketch.
//!
//! ARM support follows "by analogy" to the x86 lifter in
//! [`crate::x86`]: the same three-step recipe (materialize sources into IR
//! temporaries, compute in a width wide enough to preserve carry/overflow,
//! write back through the alias map) applies, but ARM's condition-on-every-
//! instruction encoding and barrel-shifter second operand change enough of
//! the per-mnemonic detail that a faithful translator is out of scope here.
//! This module covers only the one case that *is* shared verbatim with x86:
//! evaluating the barrel-shifter second operand into a plain IR value, so
//! that a future `translate_into` can reuse [`crate::x86`]'s flag helpers
//! unchanged once the rest of the condition-code and multi-register-transfer
//! machinery is built out.
//!
//! Not implemented: per-instruction condition predication (every ARM
//! instruction, not just branches, carries a condition code), `LDM`/`STM`
//! multi-register transfer, and the full barrel-shifter-as-second-operand
//! addressing mode used by data-processing instructions.

use reil_core::{Builder, Mnemonic, Operand, Width};

use crate::{LifterError, NativeOperand, ShifterAmount, ShifterOp};

/// Evaluates an ARM shifter operand (`rm, <shift> #n` or `rm, <shift> rs`)
/// into a single IR value, mirroring the shift lifting [`crate::x86::shift`]
/// already does for `shl`/`shr`, generalized to all four ARM shift kinds
/// plus `rrx`.
pub fn evaluate_shifter(b: &mut Builder, operand: &NativeOperand) -> Result<Operand, LifterError> {
    let (register, op, amount, width) = match operand {
        NativeOperand::Shifter { register, op, amount, width } => (register, *op, amount, *width),
        other => return Err(LifterError::MissingOperand(format!("{:?}", other), 0)),
    };

    let value = Operand::register(register.clone(), width);
    let shift_amount = match amount {
        ShifterAmount::Immediate(n) => Operand::immediate(*n as u128, width),
        ShifterAmount::Register(r) => Operand::register(r.clone(), width),
    };

    let result = b.temporary(width);
    match op {
        ShifterOp::Lsl => {
            b.add(Mnemonic::Bsh, value, shift_amount, result.clone());
        }
        ShifterOp::Lsr => {
            let negated = b.temporary(width);
            b.add(Mnemonic::Sub, Operand::immediate(0, width), shift_amount, negated.clone());
            b.add(Mnemonic::Bsh, value, negated, result.clone());
        }
        ShifterOp::Asr | ShifterOp::Ror | ShifterOp::Rrx => {
            return Err(LifterError::UnsupportedMnemonic(format!("{:?}", op)));
        }
    }

    Ok(result)
}
