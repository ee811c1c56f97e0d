//! Per-mnemonic translation for the x86 data-movement, arithmetic, and
//! logic instruction families, plus address computation for memory
//! operands. The control-transfer family lives in [`crate::control`].

use reil_core::{Builder, Mnemonic, Operand, Width};

use crate::flags;
use crate::{control, LifterError, NativeInstruction, NativeOperand};

fn address_width() -> Width {
    Width::new(32).unwrap()
}

fn operand_at<'a>(instr: &'a NativeInstruction, index: usize) -> Result<&'a NativeOperand, LifterError> {
    instr
        .operand(index)
        .ok_or_else(|| LifterError::MissingOperand(instr.mnemonic.clone(), index))
}

/// Computes `base + index*scale + disp` at the architecture's address
/// width, skipping arithmetic for whichever terms are absent.
fn compute_address(b: &mut Builder, base: Option<&str>, index: Option<&str>, scale: u32, disp: i64) -> Operand {
    let aw = address_width();
    let mut acc = base.map(|r| Operand::register(r, aw));

    if let Some(idx) = index {
        let idx_val = Operand::register(idx, aw);
        let scaled = if scale > 1 {
            let t = b.temporary(aw);
            b.add(Mnemonic::Mul, idx_val, Operand::immediate(scale as u128, aw), t.clone());
            t
        } else {
            idx_val
        };
        acc = Some(match acc {
            Some(a) => {
                let t = b.temporary(aw);
                b.add(Mnemonic::Add, a, scaled, t.clone());
                t
            }
            None => scaled,
        });
    }

    if disp != 0 {
        let disp_bits = (disp as i128 as u128) & aw.mask();
        acc = Some(match acc {
            Some(a) => {
                let t = b.temporary(aw);
                b.add(Mnemonic::Add, a, Operand::immediate(disp_bits, aw), t.clone());
                t
            }
            None => Operand::immediate(disp_bits, aw),
        });
    }

    acc.unwrap_or_else(|| Operand::immediate(0, aw))
}

fn read_operand(b: &mut Builder, operand: &NativeOperand) -> Operand {
    match operand {
        NativeOperand::Register { name, width } => Operand::register(name.clone(), *width),
        NativeOperand::Immediate { value, width } => Operand::immediate(*value, *width),
        NativeOperand::Memory { base, index, scale, disp, width } => {
            let address = compute_address(b, base.as_deref(), index.as_deref(), *scale, *disp);
            let loaded = b.temporary(*width);
            b.add(Mnemonic::Ldm, address, Operand::Empty, loaded.clone());
            loaded
        }
    }
}

fn write_operand(b: &mut Builder, instr: &NativeInstruction, operand: &NativeOperand, value: Operand) -> Result<(), LifterError> {
    match operand {
        NativeOperand::Register { name, width } => {
            b.add(Mnemonic::Str, value, Operand::Empty, Operand::register(name.clone(), *width));
            Ok(())
        }
        NativeOperand::Memory { base, index, scale, disp, .. } => {
            let address = compute_address(b, base.as_deref(), index.as_deref(), *scale, *disp);
            b.add(Mnemonic::Stm, value, Operand::Empty, address);
            Ok(())
        }
        NativeOperand::Immediate { .. } => Err(LifterError::InvalidDestination(instr.mnemonic.clone())),
    }
}

fn immediate_u64(instr: &NativeInstruction, index: usize) -> Result<u64, LifterError> {
    match operand_at(instr, index)? {
        NativeOperand::Immediate { value, .. } => Ok(*value as u64),
        _ => Err(LifterError::MissingOperand(instr.mnemonic.clone(), index)),
    }
}

pub fn translate_into(b: &mut Builder, instr: &NativeInstruction) -> Result<(), LifterError> {
    match instr.mnemonic.as_str() {
        "nop" => {
            b.add(Mnemonic::Nop, Operand::Empty, Operand::Empty, Operand::Empty);
            Ok(())
        }
        "mov" => mov(b, instr),
        "add" => arith_with_flags(b, instr, Mnemonic::Add, true),
        "sub" => arith_with_flags(b, instr, Mnemonic::Sub, false),
        "and" => logic_with_flags(b, instr, Mnemonic::And),
        "or" => logic_with_flags(b, instr, Mnemonic::Or),
        "xor" => logic_with_flags(b, instr, Mnemonic::Xor),
        "cmp" => compare(b, instr),
        "test" => test_bits(b, instr),
        "inc" => inc_or_dec(b, instr, true),
        "dec" => inc_or_dec(b, instr, false),
        "neg" => negate(b, instr),
        "not" => complement(b, instr),
        "shl" | "sal" => shift(b, instr, false),
        "shr" => shift(b, instr, true),
        "push" => push(b, instr),
        "pop" => pop(b, instr),
        "ret" | "retn" => {
            let stack_free = match instr.operand(0) {
                Some(_) => immediate_u64(instr, 0)? as u32,
                None => 0,
            };
            control::translate_ret(b, address_width(), stack_free);
            Ok(())
        }
        "call" => {
            let target = immediate_u64(instr, 0)?;
            control::translate_call(b, target, instr.next_address(), address_width());
            Ok(())
        }
        "jmp" => {
            let target = immediate_u64(instr, 0)?;
            control::translate_jmp(b, target);
            Ok(())
        }
        "jcxz" | "jecxz" => {
            let target = immediate_u64(instr, 0)?;
            control::translate_jecxz(b, "ecx", address_width(), target);
            Ok(())
        }
        "loop" => {
            let target = immediate_u64(instr, 0)?;
            control::translate_loop(b, "ecx", address_width(), target);
            Ok(())
        }
        "loope" | "loopz" => {
            let target = immediate_u64(instr, 0)?;
            control::translate_loope(b, "ecx", address_width(), target, instr.next_address());
            Ok(())
        }
        "loopne" | "loopnz" => {
            let target = immediate_u64(instr, 0)?;
            control::translate_loopne(b, "ecx", address_width(), target, instr.next_address());
            Ok(())
        }
        mnemonic if mnemonic.len() > 1 && mnemonic.starts_with('j') => {
            let target = immediate_u64(instr, 0)?;
            control::translate_jcc(b, &mnemonic[1..], target)
        }
        other => Err(LifterError::UnsupportedMnemonic(other.to_string())),
    }
}

fn mov(b: &mut Builder, instr: &NativeInstruction) -> Result<(), LifterError> {
    let dest = operand_at(instr, 0)?;
    let src = operand_at(instr, 1)?;
    let value = read_operand(b, src);
    write_operand(b, instr, dest, value)
}

fn arith_with_flags(b: &mut Builder, instr: &NativeInstruction, op: Mnemonic, is_add: bool) -> Result<(), LifterError> {
    let dest = operand_at(instr, 0)?;
    let src = operand_at(instr, 1)?;
    let width = dest.width();

    let a = read_operand(b, dest);
    let rhs = read_operand(b, src);
    let result = b.temporary(width);
    b.add(op, a.clone(), rhs.clone(), result.clone());

    flags::set_zf(b, result.clone());
    flags::set_sf(b, result.clone(), width);
    flags::set_pf(b, result.clone(), width);
    if is_add {
        flags::set_of_add(b, a.clone(), rhs.clone(), result.clone(), width);
        flags::set_cf_add(b, a, rhs, width);
    } else {
        flags::set_of_sub(b, a.clone(), rhs.clone(), result.clone(), width);
        flags::set_cf_sub(b, a, rhs, width);
    }

    write_operand(b, instr, dest, result)
}

fn logic_with_flags(b: &mut Builder, instr: &NativeInstruction, op: Mnemonic) -> Result<(), LifterError> {
    let dest = operand_at(instr, 0)?;
    let src = operand_at(instr, 1)?;
    let width = dest.width();

    let a = read_operand(b, dest);
    let rhs = read_operand(b, src);
    let result = b.temporary(width);
    b.add(op, a, rhs, result.clone());

    flags::set_zf(b, result.clone());
    flags::set_sf(b, result.clone(), width);
    flags::set_pf(b, result.clone(), width);
    let w1 = Width::new(1).unwrap();
    b.add(Mnemonic::Str, Operand::immediate(0, w1), Operand::Empty, Operand::register("of", w1));
    b.add(Mnemonic::Str, Operand::immediate(0, w1), Operand::Empty, Operand::register("cf", w1));

    write_operand(b, instr, dest, result)
}

fn compare(b: &mut Builder, instr: &NativeInstruction) -> Result<(), LifterError> {
    let dest = operand_at(instr, 0)?;
    let src = operand_at(instr, 1)?;
    let width = dest.width();

    let a = read_operand(b, dest);
    let rhs = read_operand(b, src);
    let result = b.temporary(width);
    b.add(Mnemonic::Sub, a.clone(), rhs.clone(), result.clone());

    flags::set_zf(b, result.clone());
    flags::set_sf(b, result.clone(), width);
    flags::set_pf(b, result.clone(), width);
    flags::set_of_sub(b, a.clone(), rhs.clone(), result, width);
    flags::set_cf_sub(b, a, rhs, width);
    Ok(())
}

fn test_bits(b: &mut Builder, instr: &NativeInstruction) -> Result<(), LifterError> {
    let dest = operand_at(instr, 0)?;
    let src = operand_at(instr, 1)?;
    let width = dest.width();

    let a = read_operand(b, dest);
    let rhs = read_operand(b, src);
    let result = b.temporary(width);
    b.add(Mnemonic::And, a, rhs, result.clone());

    flags::set_zf(b, result.clone());
    flags::set_sf(b, result.clone(), width);
    flags::set_pf(b, result, width);
    let w1 = Width::new(1).unwrap();
    b.add(Mnemonic::Str, Operand::immediate(0, w1), Operand::Empty, Operand::register("of", w1));
    b.add(Mnemonic::Str, Operand::immediate(0, w1), Operand::Empty, Operand::register("cf", w1));
    Ok(())
}

fn inc_or_dec(b: &mut Builder, instr: &NativeInstruction, is_inc: bool) -> Result<(), LifterError> {
    let dest = operand_at(instr, 0)?;
    let width = dest.width();
    let a = read_operand(b, dest);
    let one = Operand::immediate(1, width);
    let result = b.temporary(width);
    let op = if is_inc { Mnemonic::Add } else { Mnemonic::Sub };
    b.add(op, a.clone(), one.clone(), result.clone());

    flags::set_zf(b, result.clone());
    flags::set_sf(b, result.clone(), width);
    flags::set_pf(b, result.clone(), width);
    if is_inc {
        flags::set_of_add(b, a, one, result.clone(), width);
    } else {
        flags::set_of_sub(b, a, one, result.clone(), width);
    }
    // CF is left untouched by INC/DEC on real x86; no carry flag write here.

    write_operand(b, instr, dest, result)
}

fn negate(b: &mut Builder, instr: &NativeInstruction) -> Result<(), LifterError> {
    let dest = operand_at(instr, 0)?;
    let width = dest.width();
    let a = read_operand(b, dest);
    let zero = Operand::immediate(0, width);
    let result = b.temporary(width);
    b.add(Mnemonic::Sub, zero.clone(), a.clone(), result.clone());

    flags::set_zf(b, result.clone());
    flags::set_sf(b, result.clone(), width);
    flags::set_pf(b, result.clone(), width);
    flags::set_of_sub(b, zero.clone(), a.clone(), result.clone(), width);
    flags::set_cf_sub(b, zero, a, width);

    write_operand(b, instr, dest, result)
}

fn complement(b: &mut Builder, instr: &NativeInstruction) -> Result<(), LifterError> {
    let dest = operand_at(instr, 0)?;
    let width = dest.width();
    let a = read_operand(b, dest);
    let mask = Operand::immediate(width.mask(), width);
    let result = b.temporary(width);
    b.add(Mnemonic::Xor, a, mask, result.clone());
    write_operand(b, instr, dest, result)
}

fn shift(b: &mut Builder, instr: &NativeInstruction, is_right: bool) -> Result<(), LifterError> {
    let dest = operand_at(instr, 0)?;
    let amount = operand_at(instr, 1)?;
    let width = dest.width();

    let a = read_operand(b, dest);
    let raw_amount = read_operand(b, amount);
    let amount_width = amount.width();
    let shift_amount = if is_right {
        let negated = b.temporary(amount_width);
        b.add(Mnemonic::Sub, Operand::immediate(0, amount_width), raw_amount, negated.clone());
        negated
    } else {
        raw_amount
    };

    let result = b.temporary(width);
    b.add(Mnemonic::Bsh, a, shift_amount, result.clone());

    flags::set_zf(b, result.clone());
    flags::set_sf(b, result.clone(), width);
    flags::set_pf(b, result.clone(), width);

    write_operand(b, instr, dest, result)
}

fn push(b: &mut Builder, instr: &NativeInstruction) -> Result<(), LifterError> {
    let src = operand_at(instr, 0)?;
    let width = src.width();
    let value = read_operand(b, src);

    let sp = Operand::register("esp", width);
    let new_sp = b.temporary(width);
    b.add(
        Mnemonic::Sub,
        sp.clone(),
        Operand::immediate((width.bits() / 8) as u128, width),
        new_sp.clone(),
    );
    b.add(Mnemonic::Str, new_sp.clone(), Operand::Empty, sp);
    b.add(Mnemonic::Stm, value, Operand::Empty, new_sp);
    Ok(())
}

fn pop(b: &mut Builder, instr: &NativeInstruction) -> Result<(), LifterError> {
    let dest = operand_at(instr, 0)?;
    let width = dest.width();
    let sp = Operand::register("esp", width);

    let value = b.temporary(width);
    b.add(Mnemonic::Ldm, sp.clone(), Operand::Empty, value.clone());
    let new_sp = b.temporary(width);
    b.add(
        Mnemonic::Add,
        sp.clone(),
        Operand::immediate((width.bits() / 8) as u128, width),
        new_sp.clone(),
    );
    b.add(Mnemonic::Str, new_sp, Operand::Empty, sp);

    write_operand(b, instr, dest, value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate;

    fn w(bits: u32) -> Width {
        Width::new(bits).unwrap()
    }

    #[test]
    fn add_writes_five_flags_and_the_sum() {
        let instr = NativeInstruction::new(
            "add",
            vec![NativeOperand::register("eax", w(32)), NativeOperand::register("ebx", w(32))],
            0x1000,
            2,
        );
        let ir = translate(&instr).unwrap();
        assert!(ir.iter().any(|i| i.mnemonic == Mnemonic::Add));
        assert!(ir.iter().any(|i| i.mnemonic == Mnemonic::Bisz));
        let writes_eax = ir
            .iter()
            .any(|i| i.mnemonic == Mnemonic::Str && i.operand2() == &Operand::register("eax", w(32)));
        assert!(writes_eax);
    }

    #[test]
    fn mov_from_memory_lifts_to_ldm_then_str() {
        let instr = NativeInstruction::new(
            "mov",
            vec![
                NativeOperand::register("eax", w(32)),
                NativeOperand::memory(4, Some("ebx".to_string()), w(32)),
            ],
            0x1000,
            3,
        );
        let ir = translate(&instr).unwrap();
        assert!(ir.iter().any(|i| i.mnemonic == Mnemonic::Ldm));
        assert!(ir.iter().any(|i| i.mnemonic == Mnemonic::Str));
    }

    #[test]
    fn cmp_does_not_write_back_to_the_destination() {
        let instr = NativeInstruction::new(
            "cmp",
            vec![NativeOperand::register("eax", w(32)), NativeOperand::register("ebx", w(32))],
            0x1000,
            2,
        );
        let ir = translate(&instr).unwrap();
        assert!(!ir
            .iter()
            .any(|i| i.mnemonic == Mnemonic::Str && i.operand2() == &Operand::register("eax", w(32))));
    }

    #[test]
    fn push_then_pop_round_trips_through_esp() {
        let push_instr = NativeInstruction::new("push", vec![NativeOperand::register("eax", w(32))], 0x1000, 1);
        let pop_instr = NativeInstruction::new("pop", vec![NativeOperand::register("ebx", w(32))], 0x1001, 1);
        assert!(translate(&push_instr).unwrap().iter().any(|i| i.mnemonic == Mnemonic::Stm));
        assert!(translate(&pop_instr).unwrap().iter().any(|i| i.mnemonic == Mnemonic::Ldm));
    }
}
