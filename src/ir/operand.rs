use std::fmt;

use super::Width;

/// A symbolic register, sub-register alias, or IR temporary name.
///
/// Kept as an owned `String` rather than an interned id: the IR sequences
/// produced by one lift are short-lived and the builder mints only a
/// handful of temporaries per native instruction, so interning would add
/// machinery without a measurable win.
pub type RegisterName = String;

/// One operand slot of an [`Instruction`](super::Instruction).
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Operand {
    Register { name: RegisterName, width: Width },
    Immediate { value: u128, width: Width },
    Empty,
}

impl Operand {
    pub fn register(name: impl Into<RegisterName>, width: Width) -> Operand {
        Operand::Register {
            name: name.into(),
            width,
        }
    }

    pub fn immediate(value: u128, width: Width) -> Operand {
        let mask = if width.bits() >= 128 {
            u128::MAX
        } else {
            (1u128 << width.bits()) - 1
        };

        Operand::Immediate {
            value: value & mask,
            width,
        }
    }

    pub fn width(&self) -> Option<Width> {
        match self {
            Operand::Register { width, .. } => Some(*width),
            Operand::Immediate { width, .. } => Some(*width),
            Operand::Empty => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Operand::Empty)
    }

    pub fn register_name(&self) -> Option<&str> {
        match self {
            Operand::Register { name, .. } => Some(name.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Operand::Register { name, width } => write!(f, "{} ({})", name, width),
            Operand::Immediate { value, width } => write!(f, "{} ({})", value, width),
            Operand::Empty => write!(f, "EMPTY"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn immediate_is_truncated_to_width() {
        let op = Operand::immediate(0x1_ff, Width::new(8).unwrap());
        assert_eq!(op, Operand::Immediate { value: 0xff, width: Width::new(8).unwrap() });
    }

    #[test]
    fn renders_textual_form() {
        assert_eq!(
            Operand::register("eax", Width::new(32).unwrap()).to_string(),
            "eax (32)"
        );
        assert_eq!(Operand::Empty.to_string(), "EMPTY");
    }
}
