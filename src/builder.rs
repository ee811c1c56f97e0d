use std::collections::HashMap;

use thiserror::Error;

use crate::ir::{Instruction, IrAddress, Mnemonic, Operand, Width};

#[derive(Error, Clone, PartialEq, Eq, Debug)]
pub enum BuilderError {
    #[error("label {0:?} was referenced by a JCC but never defined")]
    UnresolvedLabel(String),
}

/// Assembles a well-formed sequence of IR instructions for a single lifted
/// native instruction.
///
/// Every instruction minted through a `Builder` gets a sequential
/// [`IrAddress`] sharing the native address the builder was created for:
/// one native instruction becomes many IR instructions, addressed by
/// sub-index, with forward label references resolved across a two-pass
/// parse-then-emit.
pub struct Builder {
    native_address: u64,
    next_sub_index: u32,
    next_temp: u32,
    instructions: Vec<Instruction>,
    labels: HashMap<String, IrAddress>,
    pending_jcc_labels: Vec<(usize, String)>,
}

impl Builder {
    pub fn new(native_address: u64) -> Builder {
        Builder {
            native_address,
            next_sub_index: 0,
            next_temp: 0,
            instructions: Vec::new(),
            labels: HashMap::new(),
            pending_jcc_labels: Vec::new(),
        }
    }

    /// Mints a fresh IR temporary of the given width, unique within this
    /// builder's instruction sequence.
    pub fn temporary(&mut self, width: Width) -> Operand {
        let name = format!("t{}", self.next_temp);
        self.next_temp += 1;
        Operand::register(name, width)
    }

    fn next_address(&mut self) -> IrAddress {
        let addr = IrAddress::new(self.native_address, self.next_sub_index)
            .expect("a single lifted instruction should never need more than 256 IR steps");
        self.next_sub_index += 1;
        addr
    }

    /// Marks the IR instruction about to be emitted as the target of `name`,
    /// for later resolution by [`jcc_to_label`](Builder::jcc_to_label).
    pub fn label(&mut self, name: impl Into<String>) {
        let addr = IrAddress::new(self.native_address, self.next_sub_index)
            .expect("a single lifted instruction should never need more than 256 IR steps");
        self.labels.insert(name.into(), addr);
    }

    /// Appends `mnemonic(op0, op1, op2)` at the next IR address and returns
    /// that address.
    pub fn add(&mut self, mnemonic: Mnemonic, op0: Operand, op1: Operand, op2: Operand) -> IrAddress {
        let addr = self.next_address();
        self.instructions.push(Instruction::new(mnemonic, op0, op1, op2, addr));
        addr
    }

    /// Appends a `JCC(condition, EMPTY, target)` instruction whose target is
    /// a label defined elsewhere in this same builder (possibly later),
    /// resolved when [`finish`](Builder::finish) runs.
    pub fn jcc_to_label(&mut self, condition: Operand, label: impl Into<String>) -> IrAddress {
        let addr = self.next_address();
        let placeholder = Operand::immediate(0, Width::new(64).unwrap());
        self.instructions
            .push(Instruction::new(Mnemonic::Jcc, condition, Operand::Empty, placeholder, addr));
        self.pending_jcc_labels.push((self.instructions.len() - 1, label.into()));
        addr
    }

    /// Resolves every pending label reference and returns the finished
    /// instruction sequence.
    pub fn finish(mut self) -> Result<Vec<Instruction>, BuilderError> {
        for (index, label) in &self.pending_jcc_labels {
            let target = self
                .labels
                .get(label)
                .ok_or_else(|| BuilderError::UnresolvedLabel(label.clone()))?;

            let width = Width::new(64).unwrap();
            self.instructions[*index].operands[2] = Operand::immediate(target.packed() as u128, width);
        }

        Ok(self.instructions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::RegisterName;

    #[test]
    fn mints_sequential_addresses_for_one_native_instruction() {
        let mut b = Builder::new(0x1000);
        let w32 = Width::new(32).unwrap();
        let a0 = b.add(Mnemonic::Nop, Operand::Empty, Operand::Empty, Operand::Empty);
        let a1 = b.add(
            Mnemonic::Str,
            Operand::register("eax" as RegisterName, w32),
            Operand::Empty,
            Operand::register("t0", w32),
        );

        assert_eq!(a0.native(), 0x1000);
        assert_eq!(a0.sub_index(), 0);
        assert_eq!(a1.sub_index(), 1);
    }

    #[test]
    fn resolves_forward_label_reference() {
        let mut b = Builder::new(0x2000);
        let cond = Operand::register("t0", Width::new(1).unwrap());
        b.jcc_to_label(cond, "loop_top");
        b.label("loop_top");
        let target_addr = b.add(Mnemonic::Nop, Operand::Empty, Operand::Empty, Operand::Empty);

        let instrs = b.finish().unwrap();
        let jcc = &instrs[0];
        assert_eq!(
            jcc.operand2(),
            &Operand::immediate(target_addr.packed() as u128, Width::new(64).unwrap())
        );
    }

    #[test]
    fn unresolved_label_is_an_error() {
        let mut b = Builder::new(0x3000);
        b.jcc_to_label(Operand::Empty, "nowhere");
        assert_eq!(
            b.finish().unwrap_err(),
            BuilderError::UnresolvedLabel("nowhere".to_string())
        );
    }
}
