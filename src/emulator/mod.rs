//! The concrete IR interpreter: a register file, byte-addressed memory, and
//! a fetch-dispatch-advance loop over an [`IrContainer`], with optional
//! pre/post instruction hooks.
//!
//! A single loop fetches one IR unit at the program counter, dispatches it,
//! and decides the next program counter from a small result enum
//! ([`Control`]); pre/post hooks fire around native-instruction boundaries.

mod container;
mod memory;
mod registers;

pub use container::IrContainer;
pub use memory::{Memory, MemoryConfig};
pub use registers::RegisterFile;

use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;
use tracing::{debug, trace};

use crate::ir::{Instruction, IrAddress, Mnemonic, Operand, Width};

/// The three fault kinds the execution loop itself can raise, plus a
/// distinguished variant carrying a hook's propagated error without
/// reusing one of the other three kinds.
#[derive(Error, Debug)]
pub enum EmulationFault {
    #[error("IR program counter points outside the loaded container")]
    InvalidAddress,
    #[error("division by zero")]
    ZeroDivision,
    #[error("UNKN instruction executed")]
    Unknown,
    #[error("hook raised an error: {0}")]
    HookError(Box<dyn StdError + Send + Sync>),
}

impl PartialEq for EmulationFault {
    fn eq(&self, other: &EmulationFault) -> bool {
        matches!(
            (self, other),
            (EmulationFault::InvalidAddress, EmulationFault::InvalidAddress)
                | (EmulationFault::ZeroDivision, EmulationFault::ZeroDivision)
                | (EmulationFault::Unknown, EmulationFault::Unknown)
                | (EmulationFault::HookError(_), EmulationFault::HookError(_))
        )
    }
}

/// What the dispatch of one IR instruction decided the next program
/// counter should be.
enum Control {
    /// Fall through to the next sequential sub-address.
    Next,
    /// A taken `JCC` transferred control to this (already `<<8`-packed)
    /// address.
    Jump(IrAddress),
}

type Hook<P> = Box<
    dyn FnMut(&RegisterFile, &Memory, &Instruction, &mut P) -> Result<(), Box<dyn StdError + Send + Sync>>,
>;

/// Executes IR sequences over a register file and byte memory.
///
/// `P` is the opaque parameter type threaded through to pre/post hooks; it
/// defaults to `()` for callers that don't need one (the [`execute`] and
/// [`execute_lite`] entry points use exactly that default).
pub struct Emulator<P = ()> {
    pub registers: RegisterFile,
    pub memory: Memory,
    program: IrContainer,
    pc: IrAddress,
    pre_hook: Option<Hook<P>>,
    post_hook: Option<Hook<P>>,
    hook_param: P,
}

impl<P> fmt::Debug for Emulator<P> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Emulator")
            .field("pc", &self.pc)
            .field("program_len", &self.program.len())
            .finish()
    }
}

impl<P> Emulator<P> {
    /// Builds an emulator ready to run `program` starting at `start`, with
    /// `hook_param` as the opaque value handed to any registered hook.
    ///
    /// Fails with [`EmulationFault::InvalidAddress`] immediately if `start`
    /// does not name an instruction in `program` — the same check applies
    /// continuously to JCC targets once execution is underway.
    pub fn new(
        program: IrContainer,
        start: IrAddress,
        registers: RegisterFile,
        memory: Memory,
        hook_param: P,
    ) -> Result<Emulator<P>, EmulationFault> {
        if program.get(start).is_none() {
            return Err(EmulationFault::InvalidAddress);
        }

        Ok(Emulator {
            registers,
            memory,
            program,
            pc: start,
            pre_hook: None,
            post_hook: None,
            hook_param,
        })
    }

    /// Registers the at-most-one pre-handler, invoked once per native
    /// instruction boundary before its first IR sub-instruction dispatches.
    pub fn set_pre_hook<F>(&mut self, hook: F)
    where
        F: FnMut(&RegisterFile, &Memory, &Instruction, &mut P) -> Result<(), Box<dyn StdError + Send + Sync>>
            + 'static,
    {
        self.pre_hook = Some(Box::new(hook));
    }

    /// Registers the at-most-one post-handler, invoked once per native
    /// instruction boundary after its last IR sub-instruction dispatches.
    pub fn set_post_hook<F>(&mut self, hook: F)
    where
        F: FnMut(&RegisterFile, &Memory, &Instruction, &mut P) -> Result<(), Box<dyn StdError + Send + Sync>>
            + 'static,
    {
        self.post_hook = Some(Box::new(hook));
    }

    pub fn hook_param(&mut self) -> &mut P {
        &mut self.hook_param
    }

    pub fn pc(&self) -> IrAddress {
        self.pc
    }

    /// Runs until the container is exhausted by ordinary sequential
    /// fall-through (a clean stop, not a fault) or a fault is raised.
    ///
    /// A `JCC` whose target is absent from the container raises
    /// [`EmulationFault::InvalidAddress`] immediately: an explicit jump to
    /// nowhere is a fault, while running off the end of a linear sequence
    /// with no more jumps is ordinary termination (a counted loop falls
    /// through exactly this way once its last conditional branch is not
    /// taken).
    pub fn run(&mut self) -> Result<(), EmulationFault> {
        let mut current_native: Option<u64> = None;

        loop {
            let address = self.pc;
            let instr = self
                .program
                .get(address)
                .cloned()
                .ok_or(EmulationFault::InvalidAddress)?;

            trace!(address = %address, mnemonic = %instr.mnemonic, "fetch");

            let native = address.native();
            if current_native != Some(native) {
                self.invoke_pre_hook(&instr)?;
                current_native = Some(native);
            }

            let control = self.dispatch(&instr)?;

            let next_pc = match control {
                Control::Next => self.program.next_after(address),
                Control::Jump(target) => {
                    if self.program.get(target).is_none() {
                        debug!(target = %target, "JCC target outside container");
                        return Err(EmulationFault::InvalidAddress);
                    }
                    Some(target)
                }
            };

            let leaving_native = match next_pc {
                Some(next) => next.native() != native,
                None => true,
            };
            if leaving_native {
                self.invoke_post_hook(&instr)?;
            }

            match next_pc {
                Some(next) => self.pc = next,
                None => return Ok(()),
            }
        }
    }

    fn invoke_pre_hook(&mut self, instr: &Instruction) -> Result<(), EmulationFault> {
        if let Some(hook) = self.pre_hook.as_mut() {
            hook(&self.registers, &self.memory, instr, &mut self.hook_param)
                .map_err(EmulationFault::HookError)?;
        }
        Ok(())
    }

    fn invoke_post_hook(&mut self, instr: &Instruction) -> Result<(), EmulationFault> {
        if let Some(hook) = self.post_hook.as_mut() {
            hook(&self.registers, &self.memory, instr, &mut self.hook_param)
                .map_err(EmulationFault::HookError)?;
        }
        Ok(())
    }

    fn value_of(&self, operand: &Operand) -> u128 {
        match operand {
            Operand::Register { name, width } => self.registers.read(name, *width),
            Operand::Immediate { value, .. } => *value,
            Operand::Empty => 0,
        }
    }

    fn store_to(&mut self, operand: &Operand, value: u128) {
        if let Operand::Register { name, width } = operand {
            self.registers.write(name, value, *width);
        }
    }

    fn dispatch(&mut self, instr: &Instruction) -> Result<Control, EmulationFault> {
        use Mnemonic::*;

        let op0 = &instr.operands[0];
        let op1 = &instr.operands[1];
        let op2 = &instr.operands[2];

        match instr.mnemonic {
            Add => self.arithmetic(op0, op1, op2, u128::wrapping_add),
            Sub => self.arithmetic(op0, op1, op2, u128::wrapping_sub),
            Mul => self.arithmetic(op0, op1, op2, u128::wrapping_mul),
            And => self.arithmetic(op0, op1, op2, |a, b| a & b),
            Or => self.arithmetic(op0, op1, op2, |a, b| a | b),
            Xor => self.arithmetic(op0, op1, op2, |a, b| a ^ b),
            Div => self.unsigned_division(op0, op1, op2, u128::wrapping_div),
            Mod => self.unsigned_division(op0, op1, op2, u128::wrapping_rem),
            Sdiv => self.signed_division(op0, op1, op2, i128::wrapping_div),
            Smod => self.signed_division(op0, op1, op2, i128::wrapping_rem),
            Bsh => self.barrel_shift(op0, op1, op2),
            Ldm => self.load(op0, op2),
            Stm => self.store(op0, op2),
            Str => self.copy(op0, op2),
            Bisz => self.is_zero(op0, op2),
            Jcc => self.conditional_jump(op0, op2),
            Sext => self.sign_extend(op0, op2),
            Undef => self.undefine(op2),
            Unkn => Err(EmulationFault::Unknown),
            Nop | Ret => Ok(Control::Next),
        }
        .map(|control| {
            trace!(mnemonic = %instr.mnemonic, "dispatched");
            control
        })
    }

    fn arithmetic(
        &mut self,
        op0: &Operand,
        op1: &Operand,
        op2: &Operand,
        f: impl Fn(u128, u128) -> u128,
    ) -> Result<Control, EmulationFault> {
        let w1 = op0.width().expect("arithmetic source 0 carries a width");
        let w3 = op2.width().expect("arithmetic destination carries a width");
        let compute_width = if w3.bits() > w1.bits() { w3 } else { w1 };

        let a = self.value_of(op0) & compute_width.mask();
        let b = self.value_of(op1) & compute_width.mask();
        let result = f(a, b) & compute_width.mask();

        self.store_to(op2, result & w3.mask());
        Ok(Control::Next)
    }

    fn unsigned_division(
        &mut self,
        op0: &Operand,
        op1: &Operand,
        op2: &Operand,
        f: impl Fn(u128, u128) -> u128,
    ) -> Result<Control, EmulationFault> {
        let w = op0.width().expect("division operand carries a width");
        let a = self.value_of(op0) & w.mask();
        let b = self.value_of(op1) & w.mask();
        if b == 0 {
            return Err(EmulationFault::ZeroDivision);
        }
        self.store_to(op2, f(a, b) & w.mask());
        Ok(Control::Next)
    }

    fn signed_division(
        &mut self,
        op0: &Operand,
        op1: &Operand,
        op2: &Operand,
        f: impl Fn(i128, i128) -> i128,
    ) -> Result<Control, EmulationFault> {
        let w = op0.width().expect("division operand carries a width");
        let a = to_signed(self.value_of(op0), w);
        let b = to_signed(self.value_of(op1), w);
        if b == 0 {
            return Err(EmulationFault::ZeroDivision);
        }
        self.store_to(op2, (f(a, b) as u128) & w.mask());
        Ok(Control::Next)
    }

    fn barrel_shift(
        &mut self,
        op0: &Operand,
        op1: &Operand,
        op2: &Operand,
    ) -> Result<Control, EmulationFault> {
        let w1 = op0.width().expect("shifted value carries a width");
        let w2 = op1.width().expect("shift amount carries a width");
        let w3 = op2.width().expect("shift destination carries a width");
        let compute_width = if w3.bits() > w1.bits() { w3 } else { w1 };

        let value = self.value_of(op0) & compute_width.mask();
        let amount = to_signed(self.value_of(op1), w2);
        let magnitude = (amount.unsigned_abs() as u32) % w3.bits();

        let shifted = if amount >= 0 {
            value.checked_shl(magnitude).unwrap_or(0) & compute_width.mask()
        } else {
            value.checked_shr(magnitude).unwrap_or(0)
        };

        self.store_to(op2, shifted & w3.mask());
        Ok(Control::Next)
    }

    fn load(&mut self, addr_op: &Operand, dst_op: &Operand) -> Result<Control, EmulationFault> {
        let w3 = dst_op.width().expect("LDM destination carries a width");
        let address = self.value_of(addr_op) as u64;
        let bytes = ((w3.bits() + 7) / 8).min(16) as usize;
        let value = self.memory.read_uint(address, bytes.max(1));
        self.store_to(dst_op, value & w3.mask());
        Ok(Control::Next)
    }

    fn store(&mut self, src_op: &Operand, addr_op: &Operand) -> Result<Control, EmulationFault> {
        let w1 = src_op.width().expect("STM source carries a width");
        let address = self.value_of(addr_op) as u64;
        let value = self.value_of(src_op) & w1.mask();
        let bytes = ((w1.bits() + 7) / 8).min(16) as usize;
        self.memory.write_uint(address, value, bytes.max(1));
        Ok(Control::Next)
    }

    fn copy(&mut self, src_op: &Operand, dst_op: &Operand) -> Result<Control, EmulationFault> {
        let w3 = dst_op.width().expect("STR destination carries a width");
        let value = self.value_of(src_op);
        self.store_to(dst_op, value & w3.mask());
        Ok(Control::Next)
    }

    fn is_zero(&mut self, src_op: &Operand, dst_op: &Operand) -> Result<Control, EmulationFault> {
        let w3 = dst_op.width().expect("BISZ destination carries a width");
        let value = self.value_of(src_op);
        let result = if value == 0 { 1 } else { 0 };
        self.store_to(dst_op, result & w3.mask());
        Ok(Control::Next)
    }

    fn conditional_jump(&mut self, cond_op: &Operand, target_op: &Operand) -> Result<Control, EmulationFault> {
        if self.value_of(cond_op) != 0 {
            let target = IrAddress::from_packed(self.value_of(target_op) as u64);
            Ok(Control::Jump(target))
        } else {
            Ok(Control::Next)
        }
    }

    fn sign_extend(&mut self, src_op: &Operand, dst_op: &Operand) -> Result<Control, EmulationFault> {
        let w1 = src_op.width().expect("SEXT source carries a width");
        let w3 = dst_op.width().expect("SEXT destination carries a width");
        if w1.bits() > w3.bits() {
            return Err(EmulationFault::Unknown);
        }

        let value = self.value_of(src_op) & w1.mask();
        let result = if w1.bits() == w3.bits() {
            value
        } else {
            sign_extend_value(value, w1, w3)
        };

        self.store_to(dst_op, result & w3.mask());
        Ok(Control::Next)
    }

    fn undefine(&mut self, dst_op: &Operand) -> Result<Control, EmulationFault> {
        let w3 = dst_op.width().expect("UNDEF destination carries a width");
        self.store_to(dst_op, 0 & w3.mask());
        Ok(Control::Next)
    }
}

fn to_signed(value: u128, width: Width) -> i128 {
    let bits = width.bits();
    let masked = value & width.mask();
    if bits == 128 {
        masked as i128
    } else if masked & (1u128 << (bits - 1)) != 0 {
        (masked as i128) - (1i128 << bits)
    } else {
        masked as i128
    }
}

fn sign_extend_value(value: u128, from: Width, to: Width) -> u128 {
    let sign_bit = 1u128 << (from.bits() - 1);
    if value & sign_bit != 0 {
        let fill = to.mask() & !from.mask();
        value | fill
    } else {
        value
    }
}

/// Executes `container` starting at `start` to a clean stop or a fault.
///
/// `registers`/`memory` seed the initial state; omitting either starts from
/// an all-zero register file (with no sub-register aliasing) / an all-zero
/// memory. Returns the final register file and memory on a clean stop, or
/// the fault that interrupted execution.
pub fn execute(
    container: &IrContainer,
    start: IrAddress,
    registers: Option<RegisterFile>,
    memory: Option<Memory>,
) -> Result<(RegisterFile, Memory), EmulationFault> {
    let registers = registers.unwrap_or_else(|| RegisterFile::new(crate::alias::AliasMap::new()));
    let memory = memory.unwrap_or_else(|| Memory::new(MemoryConfig::default()));

    let mut emulator: Emulator<()> = Emulator::new(container.clone(), start, registers, memory, ())?;
    emulator.run()?;
    Ok((emulator.registers, emulator.memory))
}

/// Executes a flat list of IR instructions without an address-indexed
/// container. The first instruction's address is the entry
/// point; `context`, if given, seeds the initial register file and memory.
pub fn execute_lite(
    instructions: impl IntoIterator<Item = Instruction>,
    context: Option<(RegisterFile, Memory)>,
) -> Result<(RegisterFile, Memory), EmulationFault> {
    let instructions: Vec<Instruction> = instructions.into_iter().collect();
    let start = instructions
        .first()
        .map(|instr| instr.address)
        .ok_or(EmulationFault::InvalidAddress)?;

    let container = IrContainer::from_instructions(instructions);
    let (registers, memory) = match context {
        Some((registers, memory)) => (Some(registers), Some(memory)),
        None => (None, None),
    };

    execute(&container, start, registers, memory)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alias::AliasMap;
    use crate::ir::{Instruction, IrAddress, Mnemonic, Operand};

    fn w(bits: u32) -> Width {
        Width::new(bits).unwrap()
    }

    fn reg(name: &str, bits: u32) -> Operand {
        Operand::register(name, w(bits))
    }

    fn imm(value: u128, bits: u32) -> Operand {
        Operand::immediate(value, w(bits))
    }

    #[test]
    fn add_eax_ebx_scenario() {
        let mut regs = RegisterFile::new(AliasMap::x86());
        regs.write("eax", 1, w(32));
        regs.write("ebx", 2, w(32));

        let instrs = vec![Instruction::new(
            Mnemonic::Add,
            reg("eax", 32),
            reg("ebx", 32),
            reg("eax", 32),
            IrAddress::new(0x1000, 0).unwrap(),
        )];

        let (regs, _) = execute_lite(instrs, Some((regs, Memory::new(MemoryConfig::default())))).unwrap();
        assert_eq!(regs.read("eax", w(32)), 3);
        assert_eq!(regs.read("ebx", w(32)), 2);
    }

    #[test]
    fn loop_to_completion_scenario() {
        // mov eax,0; mov ebx,10; L: add eax,1; sub ebx,1; jcc(ebx!=0, L)
        let l_addr = IrAddress::new(0x0804_8060, 2).unwrap();
        let instrs = vec![
            Instruction::new(
                Mnemonic::Str,
                imm(0, 32),
                Operand::Empty,
                reg("eax", 32),
                IrAddress::new(0x0804_8060, 0).unwrap(),
            ),
            Instruction::new(
                Mnemonic::Str,
                imm(10, 32),
                Operand::Empty,
                reg("ebx", 32),
                IrAddress::new(0x0804_8060, 1).unwrap(),
            ),
            Instruction::new(Mnemonic::Add, reg("eax", 32), imm(1, 32), reg("eax", 32), l_addr),
            Instruction::new(
                Mnemonic::Sub,
                reg("ebx", 32),
                imm(1, 32),
                reg("ebx", 32),
                IrAddress::new(0x0804_8060, 3).unwrap(),
            ),
            Instruction::new(
                Mnemonic::Jcc,
                reg("ebx", 32),
                Operand::Empty,
                imm(l_addr.packed() as u128, 64),
                IrAddress::new(0x0804_8060, 4).unwrap(),
            ),
        ];

        let regs = RegisterFile::new(AliasMap::x86());
        let (regs, _) = execute_lite(instrs, Some((regs, Memory::new(MemoryConfig::default())))).unwrap();

        assert_eq!(regs.read("eax", w(32)), 10);
        assert_eq!(regs.read("ebx", w(32)), 0);
    }

    #[test]
    fn sub_register_write_preserves_untouched_bits_scenario() {
        let mut regs = RegisterFile::new(AliasMap::x86());
        regs.write("eax", 0xffff_ffff, w(32));

        let instrs = vec![
            Instruction::new(
                Mnemonic::Str,
                imm(0xdead_beef, 32),
                Operand::Empty,
                reg("eax", 32),
                IrAddress::new(0x2000, 0).unwrap(),
            ),
            Instruction::new(
                Mnemonic::Str,
                imm(0x12, 8),
                Operand::Empty,
                reg("al", 8),
                IrAddress::new(0x2000, 1).unwrap(),
            ),
            Instruction::new(
                Mnemonic::Str,
                imm(0x34, 8),
                Operand::Empty,
                reg("ah", 8),
                IrAddress::new(0x2000, 2).unwrap(),
            ),
        ];

        let (regs, _) = execute_lite(instrs, Some((regs, Memory::new(MemoryConfig::default())))).unwrap();
        assert_eq!(regs.read("eax", w(32)), 0xdead_3412);
    }

    #[test]
    fn division_by_zero_faults() {
        let mut regs = RegisterFile::new(AliasMap::x86());
        regs.write("eax", 10, w(32));
        regs.write("ebx", 0, w(32));

        let instrs = vec![Instruction::new(
            Mnemonic::Div,
            reg("eax", 32),
            reg("ebx", 32),
            reg("eax", 32),
            IrAddress::new(0x3000, 0).unwrap(),
        )];

        let err = execute_lite(instrs, Some((regs, Memory::new(MemoryConfig::default())))).unwrap_err();
        assert_eq!(err, EmulationFault::ZeroDivision);
    }

    #[test]
    fn jump_to_missing_address_faults() {
        let mut regs = RegisterFile::new(AliasMap::x86());
        regs.write("eax", 0xffff_ffff, w(32));

        let instrs = vec![Instruction::new(
            Mnemonic::Jcc,
            imm(1, 1),
            Operand::Empty,
            reg("eax", 64),
            IrAddress::new(0x4000, 0).unwrap(),
        )];

        let err = execute_lite(instrs, Some((regs, Memory::new(MemoryConfig::default())))).unwrap_err();
        assert_eq!(err, EmulationFault::InvalidAddress);
    }

    #[test]
    fn unkn_raises_unknown_fault() {
        let instrs = vec![Instruction::new(
            Mnemonic::Unkn,
            Operand::Empty,
            Operand::Empty,
            Operand::Empty,
            IrAddress::new(0x5000, 0).unwrap(),
        )];

        let err = execute_lite(instrs, None).unwrap_err();
        assert_eq!(err, EmulationFault::Unknown);
    }

    #[test]
    fn memory_round_trips_through_stm_ldm() {
        let instrs = vec![
            Instruction::new(
                Mnemonic::Stm,
                imm(0x1234_5678, 32),
                Operand::Empty,
                imm(0x2000, 32),
                IrAddress::new(0x6000, 0).unwrap(),
            ),
            Instruction::new(
                Mnemonic::Ldm,
                imm(0x2000, 32),
                Operand::Empty,
                reg("eax", 32),
                IrAddress::new(0x6000, 1).unwrap(),
            ),
        ];

        let regs = RegisterFile::new(AliasMap::x86());
        let (regs, _) = execute_lite(instrs, Some((regs, Memory::new(MemoryConfig::default())))).unwrap();
        assert_eq!(regs.read("eax", w(32)), 0x1234_5678);
    }

    #[test]
    fn bisz_double_application_recovers_nonzero_indicator() {
        let mut regs = RegisterFile::new(AliasMap::x86());
        regs.write("eax", 42, w(32));

        let instrs = vec![
            Instruction::new(
                Mnemonic::Bisz,
                reg("eax", 32),
                Operand::Empty,
                reg("t0", 1),
                IrAddress::new(0x7000, 0).unwrap(),
            ),
            Instruction::new(
                Mnemonic::Bisz,
                reg("t0", 1),
                Operand::Empty,
                reg("t1", 1),
                IrAddress::new(0x7000, 1).unwrap(),
            ),
        ];

        let (regs, _) = execute_lite(instrs, Some((regs, Memory::new(MemoryConfig::default())))).unwrap();
        assert_eq!(regs.read("t0", w(1)), 0);
        assert_eq!(regs.read("t1", w(1)), 1);
    }

    #[test]
    fn hooks_fire_once_per_native_instruction() {
        let mut emulator: Emulator<u32> = Emulator::new(
            IrContainer::from_instructions(vec![
                Instruction::new(
                    Mnemonic::Nop,
                    Operand::Empty,
                    Operand::Empty,
                    Operand::Empty,
                    IrAddress::new(0x8000, 0).unwrap(),
                ),
                Instruction::new(
                    Mnemonic::Nop,
                    Operand::Empty,
                    Operand::Empty,
                    Operand::Empty,
                    IrAddress::new(0x8000, 1).unwrap(),
                ),
            ]),
            IrAddress::new(0x8000, 0).unwrap(),
            RegisterFile::new(AliasMap::new()),
            Memory::new(MemoryConfig::default()),
            0u32,
        )
        .unwrap();

        emulator.set_pre_hook(|_, _, _, count| {
            *count += 1;
            Ok(())
        });

        emulator.run().unwrap();
        assert_eq!(*emulator.hook_param(), 1);
    }
}
