//! The IR data model: widths, operands, mnemonics, addresses and the
//! three-operand instruction shape described in the architecture
//! specification this crate implements.

mod address;
mod instruction;
mod mnemonic;
mod operand;
mod width;

pub use address::IrAddress;
pub use instruction::Instruction;
pub use mnemonic::Mnemonic;
pub use operand::{Operand, RegisterName};
pub use width::{Width, WidthError};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instruction_round_trips_through_text() {
        let instr = Instruction::new(
            Mnemonic::Add,
            Operand::register("t0", Width::new(32).unwrap()),
            Operand::register("t1", Width::new(32).unwrap()),
            Operand::register("t2", Width::new(32).unwrap()),
            IrAddress::new(0x0804_8060, 0).unwrap(),
        );

        let text = instr.to_string();
        let parsed: Instruction = text.parse().expect("textual IR should parse back");

        assert_eq!(instr, parsed);
    }
}
