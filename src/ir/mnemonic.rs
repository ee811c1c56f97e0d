use std::fmt;
use std::str::FromStr;

use reil_util::ParseEnumError;

/// The exhaustive IR instruction set.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Mnemonic {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Sdiv,
    Mod,
    Smod,
    Bsh,

    // Bitwise
    And,
    Or,
    Xor,

    // Memory
    Ldm,
    Stm,
    Str,

    // Conditional
    Bisz,
    Jcc,

    // Other
    Undef,
    Unkn,
    Nop,
    Ret,

    // Extension
    Sext,
}

macro_rules! impl_mnemonic_display {
    ($($variant:ident => $text:literal),* $(,)?) => {
        impl fmt::Display for Mnemonic {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                let text = match self {
                    $(Mnemonic::$variant => $text,)*
                };
                f.write_str(text)
            }
        }

        impl FromStr for Mnemonic {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Mnemonic, ParseEnumError> {
                match s {
                    $($text => Ok(Mnemonic::$variant),)*
                    _ => Err(ParseEnumError {
                        value: s.to_string(),
                        enum_name: "Mnemonic",
                    }),
                }
            }
        }
    };
}

impl_mnemonic_display! {
    Add => "ADD", Sub => "SUB", Mul => "MUL", Div => "DIV", Sdiv => "SDIV",
    Mod => "MOD", Smod => "SMOD", Bsh => "BSH",
    And => "AND", Or => "OR", Xor => "XOR",
    Ldm => "LDM", Stm => "STM", Str => "STR",
    Bisz => "BISZ", Jcc => "JCC",
    Undef => "UNDEF", Unkn => "UNKN", Nop => "NOP", Ret => "RET",
    Sext => "SEXT",
}
