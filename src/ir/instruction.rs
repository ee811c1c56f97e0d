use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use super::{IrAddress, Mnemonic, Operand, Width};

/// One IR instruction: a mnemonic, up to three operands, and the address
/// that uniquely identifies it (see [`IrAddress`]).
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Instruction {
    pub mnemonic: Mnemonic,
    pub operands: [Operand; 3],
    pub address: IrAddress,
}

impl Instruction {
    pub fn new(
        mnemonic: Mnemonic,
        operand0: Operand,
        operand1: Operand,
        operand2: Operand,
        address: IrAddress,
    ) -> Instruction {
        Instruction {
            mnemonic,
            operands: [operand0, operand1, operand2],
            address,
        }
    }

    pub fn operand0(&self) -> &Operand {
        &self.operands[0]
    }

    pub fn operand1(&self) -> &Operand {
        &self.operands[1]
    }

    pub fn operand2(&self) -> &Operand {
        &self.operands[2]
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} : {} [{}, {}, {}]",
            self.address, self.mnemonic, self.operands[0], self.operands[1], self.operands[2]
        )
    }
}

#[derive(Error, Clone, PartialEq, Eq, Debug)]
pub enum ParseInstructionError {
    #[error("expected \"address : mnemonic [op0, op1, op2]\", got {0:?}")]
    Malformed(String),
    #[error("unknown mnemonic {0:?}")]
    UnknownMnemonic(String),
    #[error("malformed operand {0:?}")]
    MalformedOperand(String),
    #[error("invalid address {0:?}")]
    InvalidAddress(String),
}

impl FromStr for Instruction {
    type Err = ParseInstructionError;

    fn from_str(s: &str) -> Result<Instruction, ParseInstructionError> {
        use ParseInstructionError::*;

        let (addr_text, rest) = s
            .split_once(':')
            .ok_or_else(|| Malformed(s.to_string()))?;
        let rest = rest.trim();

        let (mnemonic_text, operands_text) = rest
            .split_once('[')
            .ok_or_else(|| Malformed(s.to_string()))?;
        let operands_text = operands_text
            .strip_suffix(']')
            .ok_or_else(|| Malformed(s.to_string()))?;

        let address = parse_address(addr_text.trim())?;
        let mnemonic = mnemonic_text
            .trim()
            .parse::<Mnemonic>()
            .map_err(|_| UnknownMnemonic(mnemonic_text.trim().to_string()))?;

        let mut operands = operands_text.splitn(3, ',').map(str::trim);
        let op0 = parse_operand(operands.next().ok_or_else(|| Malformed(s.to_string()))?)?;
        let op1 = parse_operand(operands.next().ok_or_else(|| Malformed(s.to_string()))?)?;
        let op2 = parse_operand(operands.next().ok_or_else(|| Malformed(s.to_string()))?)?;

        Ok(Instruction::new(mnemonic, op0, op1, op2, address))
    }
}

fn parse_address(text: &str) -> Result<IrAddress, ParseInstructionError> {
    let packed = if let Some(hex) = text.strip_prefix("0x") {
        u64::from_str_radix(hex, 16)
    } else {
        text.parse::<u64>()
    }
    .map_err(|_| ParseInstructionError::InvalidAddress(text.to_string()))?;

    Ok(IrAddress::from_packed(packed))
}

fn parse_operand(text: &str) -> Result<Operand, ParseInstructionError> {
    use ParseInstructionError::MalformedOperand;

    if text == "EMPTY" {
        return Ok(Operand::Empty);
    }

    let (value_text, width_text) = text
        .rsplit_once('(')
        .ok_or_else(|| MalformedOperand(text.to_string()))?;
    let width_text = width_text
        .strip_suffix(')')
        .ok_or_else(|| MalformedOperand(text.to_string()))?;
    let value_text = value_text.trim();

    let width = Width::new(
        width_text
            .trim()
            .parse()
            .map_err(|_| MalformedOperand(text.to_string()))?,
    )
    .map_err(|_| MalformedOperand(text.to_string()))?;

    if let Ok(value) = value_text.parse::<u128>() {
        return Ok(Operand::immediate(value, width));
    }

    Ok(Operand::register(value_text.to_string(), width))
}
