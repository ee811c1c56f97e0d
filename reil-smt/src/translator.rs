//! Translates IR instructions into lists of SMT-LIB assertions: one method
//! per opcode, a shared sub-register preservation helper for destination
//! writes, and a byte-wise encoding of `LDM`/`STM` against a versioned
//! memory array. The translator never talks to a solver directly — it
//! returns plain [`Expr`] trees, and wiring them into a live
//! [`SolverSupervisor`](crate::solver::SolverSupervisor) is the caller's job.
//! That split keeps the translator testable without a subprocess.

use std::collections::HashMap;

use reil_core::{AliasMap, Instruction, Mnemonic, Operand, Width};
use thiserror::Error;

use crate::expr::{
    bvand, bvlshr, bvmul, bvor, bvshl, bvsdiv, bvsmod, bvudiv, bvurem, bvxor, eq, extract, ite,
    sge, sign_extend, zero_extend, Expr,
};
use crate::ssa::SsaNames;

#[derive(Error, Clone, Eq, PartialEq, Debug)]
pub enum TranslateError {
    #[error("UNKN has no semantics to translate")]
    UnknownInstruction,
    #[error("destination of {0} must be a register operand")]
    NonRegisterDestination(Mnemonic),
    #[error("SEXT destination must be at least as wide as its source")]
    InvalidSignExtend,
    #[error("register {0:?} has no known bit width; register it with SmtTranslator::with_register_width")]
    UnknownRegisterWidth(String),
}

/// Zero-extends or truncates `expr` (currently `from` bits wide) to `to`
/// bits, used to bring two operands onto the same bitvector sort before a
/// same-width SMT-LIB operator like `bvshl` accepts them.
fn resize(expr: Expr, from: u32, to: u32) -> Expr {
    if from == to {
        expr
    } else if from < to {
        zero_extend(expr, to)
    } else {
        extract(expr, 0, to)
    }
}

/// Per-program translation state: the architecture's register-to-base-width
/// table, its sub-register aliasing, and the running SSA version counters.
pub struct SmtTranslator {
    alias_map: AliasMap,
    register_widths: HashMap<String, u32>,
    names: SsaNames,
    address_width: u32,
}

impl SmtTranslator {
    pub fn new(address_width: u32, alias_map: AliasMap) -> SmtTranslator {
        SmtTranslator {
            alias_map,
            register_widths: HashMap::new(),
            names: SsaNames::new(),
            address_width,
        }
    }

    /// Registers the full bit width of a base architectural register (e.g.
    /// `eax` is 32 bits wide even though `translate` may only ever see it
    /// addressed through the `ax`/`al`/`ah` aliases).
    pub fn with_register_width(mut self, base: impl Into<String>, width: u32) -> SmtTranslator {
        self.register_widths.insert(base.into(), width);
        self
    }

    pub fn ssa_names(&self) -> &SsaNames {
        &self.names
    }

    fn register_width(&self, base: &str) -> u32 {
        self.register_widths.get(base).copied().unwrap_or_else(|| {
            // A register with no explicit width entry is assumed to be its
            // own base (no alias ever narrows it further than its use site).
            0
        })
    }

    fn translate_src(&self, operand: &Operand) -> Result<Expr, TranslateError> {
        match operand {
            Operand::Immediate { value, width } => Ok(Expr::constant(width.bits(), *value)),
            Operand::Register { name, width } => {
                let (base, offset, _) = self.alias_map.resolve(name, *width);
                let base_width = self.base_width(base, width.bits());
                let curr = Expr::bitvec(base_width, self.names.get_curr(base));
                if offset == 0 && width.bits() == base_width {
                    Ok(curr)
                } else {
                    Ok(extract(curr, offset, width.bits()))
                }
            }
            Operand::Empty => Ok(Expr::BoolConst(false)),
        }
    }

    fn base_width(&self, base: &str, fallback: u32) -> u32 {
        let known = self.register_width(base);
        if known == 0 {
            fallback
        } else {
            known
        }
    }

    /// Returns the expression the instruction's result must equal, plus any
    /// constraints needed to keep a written sub-register's untouched parent
    /// bits stable across the SSA version bump.
    fn translate_dst(&mut self, operand: &Operand) -> Result<(Expr, Vec<Expr>), TranslateError> {
        match operand {
            Operand::Register { name, width } => {
                let (base, offset, _) = self.alias_map.resolve(name, *width);
                let base = base.to_string();
                let base_width = self.base_width(&base, width.bits());
                let old_name = self.names.get_curr(&base);
                let new_name = self.names.get_next(&base);
                let new_full = Expr::bitvec(base_width, new_name);

                if offset == 0 && width.bits() == base_width {
                    return Ok((new_full, Vec::new()));
                }

                let old_full = Expr::bitvec(base_width, old_name);
                let hi = offset + width.bits();
                let mut constraints = Vec::new();
                if offset > 0 {
                    constraints.push(eq(
                        extract(new_full.clone(), 0, offset),
                        extract(old_full.clone(), 0, offset),
                    ));
                }
                if hi < base_width {
                    constraints.push(eq(
                        extract(new_full.clone(), hi, base_width - hi),
                        extract(old_full, hi, base_width - hi),
                    ));
                }
                Ok((extract(new_full, offset, width.bits()), constraints))
            }
            _ => Err(TranslateError::NonRegisterDestination(Mnemonic::Str)),
        }
    }

    /// Translates one IR instruction into the list of assertions that must
    /// hold across the state transition it represents. An empty list means
    /// the instruction has no data-flow semantics of its own (`JCC`, `NOP`,
    /// `RET`, `UNDEF` — control transfer and register invalidation are a
    /// concern for the caller driving the translation, not the formula).
    pub fn translate(&mut self, instr: &Instruction) -> Result<Vec<Expr>, TranslateError> {
        match instr.mnemonic {
            Mnemonic::Add => self.translate_binary(instr, |a, b| a + b),
            Mnemonic::Sub => self.translate_binary(instr, |a, b| a - b),
            Mnemonic::Mul => self.translate_binary(instr, bvmul),
            Mnemonic::And => self.translate_binary(instr, bvand),
            Mnemonic::Or => self.translate_binary(instr, bvor),
            Mnemonic::Xor => self.translate_binary(instr, bvxor),
            Mnemonic::Div => self.translate_div_mod(instr, bvudiv, false),
            Mnemonic::Sdiv => self.translate_div_mod(instr, bvsdiv, false),
            Mnemonic::Mod => self.translate_div_mod(instr, bvurem, true),
            Mnemonic::Smod => self.translate_div_mod(instr, bvsmod, false),
            Mnemonic::Bsh => self.translate_bsh(instr),
            Mnemonic::Ldm => self.translate_ldm(instr),
            Mnemonic::Stm => self.translate_stm(instr),
            Mnemonic::Str => self.translate_str(instr),
            Mnemonic::Bisz => self.translate_bisz(instr),
            Mnemonic::Sext => self.translate_sext(instr),
            Mnemonic::Jcc | Mnemonic::Nop | Mnemonic::Ret | Mnemonic::Undef => Ok(Vec::new()),
            Mnemonic::Unkn => Err(TranslateError::UnknownInstruction),
        }
    }

    fn translate_binary(
        &mut self,
        instr: &Instruction,
        make: impl Fn(Expr, Expr) -> Expr,
    ) -> Result<Vec<Expr>, TranslateError> {
        let w1 = instr.operand0().width().unwrap_or(Width::new(1).unwrap()).bits();
        let w3 = instr.operand2().width().unwrap_or(Width::new(1).unwrap()).bits();
        let a = self.translate_src(instr.operand0())?;
        let b = self.translate_src(instr.operand1())?;
        let (dst, mut constrs) = self.translate_dst(instr.operand2())?;

        let result = if w3 > w1 {
            make(zero_extend(a, w3), zero_extend(b, w3))
        } else if w3 < w1 {
            extract(make(a, b), 0, w3)
        } else {
            make(a, b)
        };
        constrs.insert(0, eq(dst, result));
        Ok(constrs)
    }

    fn translate_div_mod(
        &mut self,
        instr: &Instruction,
        make: impl Fn(Expr, Expr) -> Expr,
        zero_extend_to_dst: bool,
    ) -> Result<Vec<Expr>, TranslateError> {
        let w1 = instr.operand0().width().unwrap_or(Width::new(1).unwrap()).bits();
        let w3 = instr.operand2().width().unwrap_or(Width::new(1).unwrap()).bits();
        let a = self.translate_src(instr.operand0())?;
        let b = self.translate_src(instr.operand1())?;
        let (dst, mut constrs) = self.translate_dst(instr.operand2())?;

        let result = if zero_extend_to_dst && w3 > w1 {
            make(zero_extend(a, w3), zero_extend(b, w3))
        } else {
            make(a, b)
        };
        constrs.insert(0, eq(dst, result));
        Ok(constrs)
    }

    fn translate_bsh(&mut self, instr: &Instruction) -> Result<Vec<Expr>, TranslateError> {
        let w1 = instr.operand0().width().unwrap_or(Width::new(1).unwrap()).bits();
        let w2 = instr.operand1().width().unwrap_or(Width::new(1).unwrap()).bits();
        let w3 = instr.operand2().width().unwrap_or(Width::new(1).unwrap()).bits();
        let a = self.translate_src(instr.operand0())?;
        let shift = self.translate_src(instr.operand1())?;
        let (dst, mut constrs) = self.translate_dst(instr.operand2())?;

        let (shl_expr, shr_expr) = if w3 > w1 {
            let a_zx = zero_extend(a, w3);
            let shift_zx = resize(shift.clone(), w2, w3);
            let shr = extract(bvlshr(a_zx.clone(), -shift_zx.clone()), 0, w3);
            let shl = extract(bvshl(a_zx, shift_zx), 0, w3);
            (shl, shr)
        } else if w3 < w1 {
            let shift_rx = resize(shift.clone(), w2, w1);
            let shr = extract(bvlshr(a.clone(), -shift_rx.clone()), 0, w3);
            let shl = extract(bvshl(a.clone(), shift_rx), 0, w3);
            (shl, shr)
        } else {
            let shift_rx = resize(shift.clone(), w2, w1);
            (bvshl(a.clone(), shift_rx.clone()), bvlshr(a, -shift_rx))
        };

        let direction = sge(shift, Expr::constant(w2, 0));
        let result = ite(w3, direction, shl_expr, shr_expr);
        constrs.insert(0, eq(dst, result));
        Ok(constrs)
    }

    fn translate_str(&mut self, instr: &Instruction) -> Result<Vec<Expr>, TranslateError> {
        let w1 = instr.operand0().width().unwrap_or(Width::new(1).unwrap()).bits();
        let w3 = instr.operand2().width().unwrap_or(Width::new(1).unwrap()).bits();
        let a = self.translate_src(instr.operand0())?;
        let (dst, mut constrs) = self.translate_dst(instr.operand2())?;

        let result = if w1 == w3 {
            a
        } else if w1 < w3 {
            zero_extend(a, w3)
        } else {
            extract(a, 0, w3)
        };
        constrs.insert(0, eq(dst, result));
        Ok(constrs)
    }

    fn translate_sext(&mut self, instr: &Instruction) -> Result<Vec<Expr>, TranslateError> {
        let w1 = instr.operand0().width().unwrap_or(Width::new(1).unwrap()).bits();
        let w3 = instr.operand2().width().unwrap_or(Width::new(1).unwrap()).bits();
        let a = self.translate_src(instr.operand0())?;
        let (dst, mut constrs) = self.translate_dst(instr.operand2())?;

        let result = if w1 == w3 {
            a
        } else if w1 < w3 {
            sign_extend(a, w3)
        } else {
            return Err(TranslateError::InvalidSignExtend);
        };
        constrs.insert(0, eq(dst, result));
        Ok(constrs)
    }

    fn translate_bisz(&mut self, instr: &Instruction) -> Result<Vec<Expr>, TranslateError> {
        let w3 = instr.operand2().width().unwrap_or(Width::new(1).unwrap()).bits();
        let a = self.translate_src(instr.operand0())?;
        let w1 = instr.operand0().width().unwrap_or(Width::new(1).unwrap()).bits();
        let (dst, mut constrs) = self.translate_dst(instr.operand2())?;

        let is_zero = eq(a, Expr::constant(w1, 0));
        let result = ite(w3, is_zero, Expr::constant(w3, 1), Expr::constant(w3, 0));
        constrs.insert(0, eq(dst, result));
        Ok(constrs)
    }

    /// Byte-wise equality between the destination register and successive
    /// bytes of the current memory array, most-significant byte first (so
    /// the resulting little-endian value matches [`Memory::read_uint`]).
    fn translate_ldm(&mut self, instr: &Instruction) -> Result<Vec<Expr>, TranslateError> {
        let address_width = self.address_width;
        let address = self.translate_src(instr.operand0())?;
        let w3 = instr.operand2().width().unwrap_or(Width::new(1).unwrap()).bits();
        let (dst, mut constrs) = self.translate_dst(instr.operand2())?;

        let mem = Expr::array(address_width, self.names.mem_curr());
        let size_bytes = w3 / 8;
        let mut byte_eqs = Vec::with_capacity(size_bytes as usize);
        for i in 0..size_bytes {
            let byte_addr = address.clone() + Expr::constant(address_width, i as u128);
            let loaded = mem.clone().select(byte_addr);
            let expected = extract(dst.clone(), i * 8, 8);
            byte_eqs.push(eq(loaded, expected));
        }
        constrs.splice(0..0, byte_eqs);
        Ok(constrs)
    }

    /// Stores every byte of the source value into a freshly versioned memory
    /// array, then asserts the new array equals the old one everywhere
    /// except those bytes.
    fn translate_stm(&mut self, instr: &Instruction) -> Result<Vec<Expr>, TranslateError> {
        let address_width = self.address_width;
        let w1 = instr.operand0().width().unwrap_or(Width::new(1).unwrap()).bits();
        let value = self.translate_src(instr.operand0())?;
        let address = self.translate_src(instr.operand2())?;

        let old_mem = Expr::array(address_width, self.names.mem_curr());
        let new_name = self.names.mem_next();
        let new_mem = Expr::array(address_width, new_name);

        let size_bytes = w1 / 8;
        let mut stored = old_mem;
        for i in 0..size_bytes {
            let byte_addr = address.clone() + Expr::constant(address_width, i as u128);
            let byte_val = extract(value.clone(), i * 8, 8);
            stored = stored.store(byte_addr, byte_val);
        }
        Ok(vec![eq(new_mem, stored)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reil_core::{Builder, IrAddress, Mnemonic, Operand};

    fn translator() -> SmtTranslator {
        SmtTranslator::new(32, AliasMap::x86())
            .with_register_width("eax", 32)
            .with_register_width("ebx", 32)
            .with_register_width("ecx", 32)
    }

    fn w(bits: u32) -> Width {
        Width::new(bits).unwrap()
    }

    fn instr(mnemonic: Mnemonic, op0: Operand, op1: Operand, op2: Operand) -> Instruction {
        Instruction::new(mnemonic, op0, op1, op2, IrAddress::new(0x1000, 0).unwrap())
    }

    #[test]
    fn add_with_equal_widths_asserts_direct_sum() {
        let mut t = translator();
        let i = instr(
            Mnemonic::Add,
            Operand::register("eax", w(32)),
            Operand::register("ebx", w(32)),
            Operand::register("ecx", w(32)),
        );
        let assertions = t.translate(&i).unwrap();
        assert_eq!(assertions.len(), 1);
        assert_eq!(assertions[0].to_string(), "(= ecx_1 (bvadd eax_0 ebx_0))");
    }

    #[test]
    fn writing_a_sub_register_preserves_the_untouched_parent_bits() {
        let mut t = translator();
        let i = instr(
            Mnemonic::Str,
            Operand::register("al", w(8)),
            Operand::Empty,
            Operand::register("ah", w(8)),
        );
        let assertions = t.translate(&i).unwrap();
        // main equality (al == ah-slot) plus the low-byte preservation constraint
        assert_eq!(assertions.len(), 2);
        assert!(assertions.iter().any(|a| a.to_string().contains("extract 7 0")));
    }

    #[test]
    fn bisz_of_zero_register_is_one() {
        let mut t = translator();
        let i = instr(
            Mnemonic::Bisz,
            Operand::register("eax", w(32)),
            Operand::Empty,
            Operand::register("ecx", w(8)),
        );
        let assertions = t.translate(&i).unwrap();
        assert_eq!(assertions.len(), 1);
        assert!(assertions[0].to_string().starts_with("(= ecx_1 (ite"));
    }

    #[test]
    fn ldm_reads_one_byte_equality_per_byte_of_width() {
        let mut t = translator();
        let i = instr(
            Mnemonic::Ldm,
            Operand::register("eax", w(32)),
            Operand::Empty,
            Operand::register("ecx", w(32)),
        );
        let assertions = t.translate(&i).unwrap();
        assert_eq!(assertions.len(), 4);
    }

    #[test]
    fn stm_bumps_the_memory_version() {
        let mut t = translator();
        let i = instr(
            Mnemonic::Stm,
            Operand::register("eax", w(8)),
            Operand::Empty,
            Operand::register("ebx", w(32)),
        );
        assert_eq!(t.ssa_names().mem_curr(), "MEM_0");
        let assertions = t.translate(&i).unwrap();
        assert_eq!(assertions.len(), 1);
        assert_eq!(t.ssa_names().mem_curr(), "MEM_1");
        assert!(assertions[0].to_string().starts_with("(= MEM_1 (store MEM_0"));
    }

    #[test]
    fn unkn_refuses_translation() {
        let mut t = translator();
        let i = instr(Mnemonic::Unkn, Operand::Empty, Operand::Empty, Operand::Empty);
        assert_eq!(t.translate(&i), Err(TranslateError::UnknownInstruction));
    }

    #[test]
    fn jcc_has_no_data_flow_assertions() {
        let mut t = translator();
        let i = instr(
            Mnemonic::Jcc,
            Operand::register("eax", w(32)),
            Operand::Empty,
            Operand::immediate(0x2000 << 8, w(32)),
        );
        assert_eq!(t.translate(&i).unwrap(), Vec::new());
    }

    #[test]
    fn builder_sequence_translates_without_error() {
        let mut builder = Builder::new(0x1000);
        builder.add(
            Mnemonic::Add,
            Operand::register("eax", w(32)),
            Operand::register("ebx", w(32)),
            Operand::register("ecx", w(32)),
        );
        let program = builder.finish().unwrap();
        let mut t = translator();
        for i in &program {
            t.translate(i).unwrap();
        }
    }

    #[test]
    fn bsh_resizes_a_narrower_shift_amount_to_match_the_shifted_value() {
        // shl eax, cl: value and destination are 32 bits, the shift amount
        // (cl) is only 8 — bvshl/bvlshr require same-sort operands.
        let mut t = translator();
        let i = instr(
            Mnemonic::Bsh,
            Operand::register("eax", w(32)),
            Operand::register("cl", w(8)),
            Operand::register("ecx", w(32)),
        );
        let assertions = t.translate(&i).unwrap();
        assert_eq!(assertions.len(), 1);
        let text = assertions[0].to_string();
        assert!(text.contains("(bvshl eax_0 ((_ zero_extend 24)"), "{}", text);
        assert!(text.contains("(bvlshr eax_0 (bvneg ((_ zero_extend 24)"), "{}", text);
    }
}
