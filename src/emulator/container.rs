use std::collections::BTreeMap;

use crate::ir::{Instruction, IrAddress};

/// An address-indexed sequence of IR instructions ready for execution,
/// assembled from one or more [`Builder`](crate::builder::Builder) outputs.
///
/// Holds already-decoded [`Instruction`] values keyed by their
/// [`IrAddress`], since the emulator and SMT translator both need random
/// access by address (a JCC target is an arbitrary `IrAddress`, not
/// necessarily the next one in sequence).
#[derive(Clone, Debug, Default)]
pub struct IrContainer {
    instructions: BTreeMap<u64, Instruction>,
}

impl IrContainer {
    pub fn new() -> IrContainer {
        IrContainer::default()
    }

    pub fn from_instructions(instructions: impl IntoIterator<Item = Instruction>) -> IrContainer {
        let mut container = IrContainer::new();
        for instr in instructions {
            container.insert(instr);
        }
        container
    }

    pub fn insert(&mut self, instruction: Instruction) {
        self.instructions.insert(instruction.address.packed(), instruction);
    }

    pub fn get(&self, address: IrAddress) -> Option<&Instruction> {
        self.instructions.get(&address.packed())
    }

    /// The address of the first instruction whose packed address is strictly
    /// greater than `address`, used to fall through to the next native
    /// instruction once an address's sub-index steps are exhausted.
    pub fn next_after(&self, address: IrAddress) -> Option<IrAddress> {
        self.instructions
            .range((address.packed() + 1)..)
            .next()
            .map(|(packed, _)| IrAddress::from_packed(*packed))
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Instruction> {
        self.instructions.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Mnemonic, Operand};

    fn nop(addr: IrAddress) -> Instruction {
        Instruction::new(Mnemonic::Nop, Operand::Empty, Operand::Empty, Operand::Empty, addr)
    }

    #[test]
    fn next_after_skips_to_following_native_instruction() {
        let mut c = IrContainer::new();
        c.insert(nop(IrAddress::new(0x1000, 0).unwrap()));
        c.insert(nop(IrAddress::new(0x1000, 1).unwrap()));
        c.insert(nop(IrAddress::new(0x1004, 0).unwrap()));

        let after_last_sub = c.next_after(IrAddress::new(0x1000, 1).unwrap());
        assert_eq!(after_last_sub, Some(IrAddress::new(0x1004, 0).unwrap()));
    }
}
