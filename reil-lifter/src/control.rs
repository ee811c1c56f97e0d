//! The control-transfer family: `JMP`, the full `Jcc` condition-code set,
//! `JCXZ`/`JECXZ`, `CALL`, `RET`, `LOOP`, `LOOPE`, `LOOPNE`.
//!
//! Every jump target is encoded the way [`reil_core::Builder::jcc_to_label`]
//! encodes its own targets: the packed [`IrAddress`] (`native << 8 |
//! sub_index`) as a 64-bit immediate. `CALL`/`RET` push and pop the *raw*
//! native return address, though — not the packed form — since that's the
//! value a caller's own stack-reading code expects to see; `RET` converts
//! it to a packed target with `BSH ... 8` right before jumping.

use reil_core::{Builder, IrAddress, Mnemonic, Operand, Width};

use crate::flags::{bit1, flag};
use crate::LifterError;

fn addr_operand(native_address: u64) -> Operand {
    let packed = IrAddress::new(native_address, 0)
        .expect("native address must fit in the packed IrAddress scheme")
        .packed();
    Operand::immediate(packed as u128, Width::new(64).unwrap())
}

fn always_true() -> Operand {
    Operand::immediate(1, bit1())
}

fn not1(b: &mut Builder, x: Operand) -> Operand {
    let t = b.temporary(bit1());
    b.add(Mnemonic::Bisz, x, Operand::Empty, t.clone());
    t
}

fn and1(b: &mut Builder, x: Operand, y: Operand) -> Operand {
    let t = b.temporary(bit1());
    b.add(Mnemonic::And, x, y, t.clone());
    t
}

fn or1(b: &mut Builder, x: Operand, y: Operand) -> Operand {
    let t = b.temporary(bit1());
    b.add(Mnemonic::Or, x, y, t.clone());
    t
}

fn xor1(b: &mut Builder, x: Operand, y: Operand) -> Operand {
    let t = b.temporary(bit1());
    b.add(Mnemonic::Xor, x, y, t.clone());
    t
}

fn bisz(b: &mut Builder, x: Operand) -> Operand {
    let t = b.temporary(bit1());
    b.add(Mnemonic::Bisz, x, Operand::Empty, t.clone());
    t
}

/// Evaluates an x86 condition code mnemonic suffix (without the leading
/// `j`, e.g. `"ae"`, `"nbe"`, `"le"`) into a fresh 1-bit IR value.
pub fn evaluate_condition(b: &mut Builder, cc: &str) -> Result<Operand, LifterError> {
    let zf = flag("zf");
    let cf = flag("cf");
    let sf = flag("sf");
    let of = flag("of");
    let pf = flag("pf");

    let result = match cc {
        "a" | "nbe" => {
            let not_cf = not1(b, cf);
            let not_zf = not1(b, zf);
            and1(b, not_cf, not_zf)
        }
        "ae" | "nb" | "nc" => not1(b, cf),
        "b" | "c" | "nae" => cf,
        "be" | "na" => or1(b, cf, zf),
        "e" | "z" => zf,
        "g" | "nle" => {
            let not_zf = not1(b, zf);
            let sign_eq = xor1(b, sf, of);
            let sign_eq = not1(b, sign_eq);
            and1(b, not_zf, sign_eq)
        }
        "ge" | "nl" => {
            let differ = xor1(b, sf, of);
            not1(b, differ)
        }
        "l" | "nge" => xor1(b, sf, of),
        "le" | "ng" => {
            let differ = xor1(b, sf, of);
            or1(b, zf, differ)
        }
        "ne" | "nz" => not1(b, zf),
        "no" => not1(b, of),
        "np" | "po" => not1(b, pf),
        "ns" => not1(b, sf),
        "o" => of,
        "p" | "pe" => pf,
        "s" => sf,
        other => return Err(LifterError::UnsupportedMnemonic(format!("j{}", other))),
    };
    Ok(result)
}

/// Unconditional jump.
pub fn translate_jmp(b: &mut Builder, target_native: u64) {
    b.add(Mnemonic::Jcc, always_true(), Operand::Empty, addr_operand(target_native));
}

/// `Jcc`: evaluates `cc` against the current flag registers and jumps if
/// it holds, falling through to the next native instruction otherwise.
pub fn translate_jcc(b: &mut Builder, cc: &str, target_native: u64) -> Result<(), LifterError> {
    let condition = evaluate_condition(b, cc)?;
    b.add(Mnemonic::Jcc, condition, Operand::Empty, addr_operand(target_native));
    Ok(())
}

/// `JCXZ`/`JECXZ`: jump if the counter register is zero.
pub fn translate_jecxz(b: &mut Builder, counter_reg: &str, width: Width, target_native: u64) {
    let is_zero = bisz(b, Operand::register(counter_reg, width));
    b.add(Mnemonic::Jcc, is_zero, Operand::Empty, addr_operand(target_native));
}

/// Pushes the raw (unpacked) return address and jumps to the callee.
pub fn translate_call(b: &mut Builder, target_native: u64, return_native: u64, sp_width: Width) {
    let sp = Operand::register("esp", sp_width);
    let word_size = (sp_width.bits() / 8) as u128;

    let new_sp = b.temporary(sp_width);
    b.add(Mnemonic::Sub, sp.clone(), Operand::immediate(word_size, sp_width), new_sp.clone());
    b.add(Mnemonic::Str, new_sp.clone(), Operand::Empty, sp);
    b.add(Mnemonic::Stm, Operand::immediate(return_native as u128, sp_width), Operand::Empty, new_sp);

    b.add(Mnemonic::Jcc, always_true(), Operand::Empty, addr_operand(target_native));
}

/// Pops the raw return address, adjusts `esp` by the word size plus any
/// immediate stack-cleanup (`RET imm16`), packs the popped address, and
/// jumps to it.
pub fn translate_ret(b: &mut Builder, sp_width: Width, stack_free: u32) {
    let sp = Operand::register("esp", sp_width);
    let raw_target = b.temporary(sp_width);
    b.add(Mnemonic::Ldm, sp.clone(), Operand::Empty, raw_target.clone());

    let word_size = (sp_width.bits() / 8) as u128;
    let new_sp = b.temporary(sp_width);
    b.add(
        Mnemonic::Add,
        sp.clone(),
        Operand::immediate(word_size + stack_free as u128, sp_width),
        new_sp.clone(),
    );
    b.add(Mnemonic::Str, new_sp, Operand::Empty, sp);

    let packed = b.temporary(Width::new(64).unwrap());
    b.add(Mnemonic::Bsh, raw_target, Operand::immediate(8, sp_width), packed.clone());
    b.add(Mnemonic::Jcc, always_true(), Operand::Empty, packed);
}

/// `LOOP`: decrements the counter and jumps back while it is nonzero.
pub fn translate_loop(b: &mut Builder, counter_reg: &str, width: Width, loop_start: u64) {
    let counter = Operand::register(counter_reg, width);
    let new_counter = b.temporary(width);
    b.add(Mnemonic::Sub, counter.clone(), Operand::immediate(1, width), new_counter.clone());
    b.add(Mnemonic::Str, new_counter.clone(), Operand::Empty, counter);

    let is_zero = bisz(b, new_counter);
    let not_zero = not1(b, is_zero);
    b.add(Mnemonic::Jcc, not_zero, Operand::Empty, addr_operand(loop_start));
}

/// `LOOPE`/`LOOPZ`: loops while the counter is nonzero *and* `zf` is set,
/// otherwise falls through past an explicit jump to `end_native` (the
/// instruction right after the loop) so control never silently falls into
/// whatever IR happens to sit at the next packed address.
pub fn translate_loope(b: &mut Builder, counter_reg: &str, width: Width, loop_start: u64, end_native: u64) {
    let branch_cond = loop_decrement_and_test(b, counter_reg, width, true);
    b.add(Mnemonic::Jcc, branch_cond, Operand::Empty, addr_operand(loop_start));
    b.add(Mnemonic::Jcc, always_true(), Operand::Empty, addr_operand(end_native));
}

/// `LOOPNE`/`LOOPNZ`: loops while the counter is nonzero *and* `zf` is
/// clear.
pub fn translate_loopne(b: &mut Builder, counter_reg: &str, width: Width, loop_start: u64, end_native: u64) {
    let branch_cond = loop_decrement_and_test(b, counter_reg, width, false);
    b.add(Mnemonic::Jcc, branch_cond, Operand::Empty, addr_operand(loop_start));
    b.add(Mnemonic::Jcc, always_true(), Operand::Empty, addr_operand(end_native));
}

fn loop_decrement_and_test(b: &mut Builder, counter_reg: &str, width: Width, want_zf: bool) -> Operand {
    let counter = Operand::register(counter_reg, width);
    let new_counter = b.temporary(width);
    b.add(Mnemonic::Sub, counter.clone(), Operand::immediate(1, width), new_counter.clone());
    b.add(Mnemonic::Str, new_counter.clone(), Operand::Empty, counter);

    let is_zero = bisz(b, new_counter);
    let counter_not_zero = not1(b, is_zero);

    let zf_matches = if want_zf { flag("zf") } else { not1(b, flag("zf")) };
    and1(b, counter_not_zero, zf_matches)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jmp_is_an_unconditional_jcc() {
        let mut b = Builder::new(0x1000);
        translate_jmp(&mut b, 0x2000);
        let ir = b.finish().unwrap();
        assert_eq!(ir.len(), 1);
        assert_eq!(ir[0].mnemonic, Mnemonic::Jcc);
        assert_eq!(ir[0].operand0(), &Operand::immediate(1, Width::new(1).unwrap()));
        assert_eq!(
            ir[0].operand2(),
            &Operand::immediate(IrAddress::new(0x2000, 0).unwrap().packed() as u128, Width::new(64).unwrap())
        );
    }

    #[test]
    fn je_evaluates_to_zf_directly() {
        let mut b = Builder::new(0x1000);
        translate_jcc(&mut b, "e", 0x2000).unwrap();
        let ir = b.finish().unwrap();
        assert_eq!(ir.last().unwrap().mnemonic, Mnemonic::Jcc);
        assert_eq!(ir.last().unwrap().operand0(), &Operand::register("zf", Width::new(1).unwrap()));
    }

    #[test]
    fn unknown_condition_code_is_rejected() {
        let mut b = Builder::new(0x1000);
        assert!(translate_jcc(&mut b, "zz", 0x2000).is_err());
    }

    #[test]
    fn ret_pops_then_packs_then_jumps() {
        let mut b = Builder::new(0x1000);
        translate_ret(&mut b, Width::new(32).unwrap(), 0);
        let ir = b.finish().unwrap();
        assert_eq!(ir.last().unwrap().mnemonic, Mnemonic::Jcc);
        assert!(ir.iter().any(|i| i.mnemonic == Mnemonic::Bsh));
        assert!(ir.iter().any(|i| i.mnemonic == Mnemonic::Ldm));
    }

    #[test]
    fn loopne_emits_a_fallthrough_jump_to_the_end_address() {
        let mut b = Builder::new(0x1000);
        translate_loopne(&mut b, "ecx", Width::new(32).unwrap(), 0x1000, 0x1010);
        let ir = b.finish().unwrap();
        let jccs: Vec<_> = ir.iter().filter(|i| i.mnemonic == Mnemonic::Jcc).collect();
        assert_eq!(jccs.len(), 2);
        assert_ne!(jccs[0].operand0(), &Operand::immediate(1, Width::new(1).unwrap()));
        assert_eq!(jccs[1].operand0(), &Operand::immediate(1, Width::new(1).unwrap()));
    }
}
