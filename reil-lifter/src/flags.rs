//! Status flag computation shared by the arithmetic and logic translators.
//!
//! x86 condition codes read five flag registers — `zf`, `sf`, `cf`, `of`,
//! `pf` — that REIL has no primitive for, so every flag is synthesized from
//! `BISZ`/`BSH`/`AND`/`XOR`: by extracting the sign bit with a
//! shift-and-mask, and by widening one step to observe the carry/borrow bit
//! that a same-width addition or subtraction would otherwise discard.

use reil_core::{Builder, Mnemonic, Operand, Width};

pub(crate) fn bit1() -> Width {
    Width::new(1).unwrap()
}

pub(crate) fn flag(name: &str) -> Operand {
    Operand::register(name, bit1())
}

/// Encodes `-n` as a `width`-bit two's complement immediate, for use as a
/// `BSH` shift amount (REIL shifts right when the amount is negative).
fn neg_imm(width: Width, n: u32) -> Operand {
    let value = 0u128.wrapping_sub(n as u128) & width.mask();
    Operand::immediate(value, width)
}

/// Extracts bit `index` of `operand` (0 = least significant) into a fresh
/// 1-bit temporary.
fn bit_at(b: &mut Builder, operand: Operand, width: Width, index: u32) -> Operand {
    let shift = neg_imm(width, index);
    let shifted = b.temporary(width);
    b.add(Mnemonic::Bsh, operand, shift, shifted.clone());
    let bit = b.temporary(bit1());
    b.add(Mnemonic::And, shifted, Operand::immediate(1, width), bit.clone());
    bit
}

fn msb(b: &mut Builder, operand: Operand, width: Width) -> Operand {
    bit_at(b, operand, width, width.bits() - 1)
}

/// `zf = (result == 0)`.
pub fn set_zf(b: &mut Builder, result: Operand) {
    b.add(Mnemonic::Bisz, result, Operand::Empty, flag("zf"));
}

/// `sf = result`'s sign bit.
pub fn set_sf(b: &mut Builder, result: Operand, width: Width) {
    let sign = msb(b, result, width);
    b.add(Mnemonic::Str, sign, Operand::Empty, flag("sf"));
}

/// `pf = 1` iff the low byte of `result` has an even number of set bits.
pub fn set_pf(b: &mut Builder, result: Operand, width: Width) {
    let mut parity = bit_at(b, result.clone(), width, 0);
    for i in 1..8 {
        let bit = bit_at(b, result.clone(), width, i);
        let next = b.temporary(bit1());
        b.add(Mnemonic::Xor, parity, bit, next.clone());
        parity = next;
    }
    b.add(Mnemonic::Xor, parity, Operand::immediate(1, bit1()), flag("pf"));
}

/// `of = 1` iff `a` and `b` share a sign and `result` does not (overflow on
/// addition can only happen between two same-signed operands).
pub fn set_of_add(b: &mut Builder, a: Operand, rhs: Operand, result: Operand, width: Width) {
    let msb_a = msb(b, a.clone(), width);
    let msb_b = msb(b, rhs, width);
    let msb_r = msb(b, result, width);

    let signs_differ = b.temporary(bit1());
    b.add(Mnemonic::Xor, msb_a.clone(), msb_b, signs_differ.clone());
    let same_sign = b.temporary(bit1());
    b.add(Mnemonic::Xor, signs_differ, Operand::immediate(1, bit1()), same_sign.clone());

    let sign_changed = b.temporary(bit1());
    b.add(Mnemonic::Xor, msb_a, msb_r, sign_changed.clone());

    b.add(Mnemonic::And, same_sign, sign_changed, flag("of"));
}

/// `of = 1` iff `a` and `b` differ in sign and `result` doesn't match `a`'s
/// sign (overflow on subtraction happens crossing a sign boundary).
pub fn set_of_sub(b: &mut Builder, a: Operand, rhs: Operand, result: Operand, width: Width) {
    let msb_a = msb(b, a.clone(), width);
    let msb_b = msb(b, rhs, width);
    let msb_r = msb(b, result, width);

    let signs_differ = b.temporary(bit1());
    b.add(Mnemonic::Xor, msb_a.clone(), msb_b, signs_differ.clone());
    let sign_changed = b.temporary(bit1());
    b.add(Mnemonic::Xor, msb_a, msb_r, sign_changed.clone());

    b.add(Mnemonic::And, signs_differ, sign_changed, flag("of"));
}

/// `cf` for an unsigned add: widen one admissible step, add there, and read
/// off the bit that the narrower addition would have discarded.
pub fn set_cf_add(b: &mut Builder, a: Operand, rhs: Operand, width: Width) {
    let wide = width.widen().expect("cf computation needs one bit of headroom above this width");
    let wa = b.temporary(wide);
    b.add(Mnemonic::Str, a, Operand::Empty, wa.clone());
    let wb = b.temporary(wide);
    b.add(Mnemonic::Str, rhs, Operand::Empty, wb.clone());
    let sum = b.temporary(wide);
    b.add(Mnemonic::Add, wa, wb, sum.clone());

    let carry = bit_at(b, sum, wide, width.bits());
    b.add(Mnemonic::Str, carry, Operand::Empty, flag("cf"));
}

/// `cf` for an unsigned sub: same widening trick, reading the borrow bit
/// that underflow leaves set above the operand's own width.
pub fn set_cf_sub(b: &mut Builder, a: Operand, rhs: Operand, width: Width) {
    let wide = width.widen().expect("cf computation needs one bit of headroom above this width");
    let wa = b.temporary(wide);
    b.add(Mnemonic::Str, a, Operand::Empty, wa.clone());
    let wb = b.temporary(wide);
    b.add(Mnemonic::Str, rhs, Operand::Empty, wb.clone());
    let diff = b.temporary(wide);
    b.add(Mnemonic::Sub, wa, wb, diff.clone());

    let borrow = bit_at(b, diff, wide, width.bits());
    b.add(Mnemonic::Str, borrow, Operand::Empty, flag("cf"));
}

#[cfg(test)]
mod tests {
    use super::*;
    use reil_core::Width;

    #[test]
    fn zf_is_a_single_bisz_instruction() {
        let mut b = Builder::new(0x1000);
        set_zf(&mut b, Operand::register("eax", Width::new(32).unwrap()));
        let ir = b.finish().unwrap();
        assert_eq!(ir.len(), 1);
        assert_eq!(ir[0].mnemonic, Mnemonic::Bisz);
    }

    #[test]
    fn cf_add_widens_before_adding() {
        let mut b = Builder::new(0x1000);
        let w8 = Width::new(8).unwrap();
        set_cf_add(&mut b, Operand::register("al", w8), Operand::register("bl", w8), w8);
        let ir = b.finish().unwrap();
        assert!(ir.iter().any(|i| i.mnemonic == Mnemonic::Add));
        let last = ir.last().unwrap();
        assert_eq!(last.operand2(), &Operand::register("cf", Width::new(1).unwrap()));
    }
}
