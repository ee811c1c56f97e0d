//! Consistency facade binding [`reil_core::emulator`] and [`reil_smt`]
//! together: runs one IR instruction concretely and symbolically from the
//! same initial state and checks the solver's model for the destination
//! register matches the emulator's concrete result.
//!
//! This directly implements the universal consistency invariant: concrete
//! emulation of an instruction and SMT translation of the same instruction,
//! run from the same initial state, must agree on the destination value.

use reil_core::{AliasMap, EmulationFault, Emulator, IrContainer, Instruction, Memory, MemoryConfig, Operand, RegisterFile};
use reil_smt::{CheckResult, Expr, SmtTranslator, SolverError, SolverSupervisor, TranslateError};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ConsistencyError {
    #[error(transparent)]
    Emulation(#[from] EmulationFault),
    #[error(transparent)]
    Translate(#[from] TranslateError),
    #[error(transparent)]
    Solver(#[from] SolverError),
    #[error("instruction's destination is not a register operand, nothing to compare")]
    NoDestination,
}

/// The result of comparing one instruction's concrete and symbolic
/// execution from the same initial state.
#[derive(Clone, Debug)]
pub struct ConsistencyReport {
    pub instruction: String,
    pub destination_register: String,
    pub emulated_value: u128,
    pub solved_value: u128,
    pub consistent: bool,
}

/// Describes the architecture context `assert_consistent` needs to declare
/// registers at their full base width: the alias map (sub-register ->
/// base) and, for each base register touched, its bit width.
pub struct ArchInfo {
    pub alias_map: AliasMap,
    pub address_width: u32,
    pub register_widths: Vec<(String, u32)>,
}

impl ArchInfo {
    pub fn x86_32() -> ArchInfo {
        ArchInfo {
            alias_map: AliasMap::x86(),
            address_width: 32,
            register_widths: vec![
                ("eax".to_string(), 32),
                ("ebx".to_string(), 32),
                ("ecx".to_string(), 32),
                ("edx".to_string(), 32),
                ("esp".to_string(), 32),
                ("ebp".to_string(), 32),
                ("zf".to_string(), 1),
                ("sf".to_string(), 1),
                ("cf".to_string(), 1),
                ("of".to_string(), 1),
                ("pf".to_string(), 1),
            ],
        }
    }
}

/// Runs `instr` concretely from `(registers, memory)` through
/// [`reil_core::emulator::execute`] and symbolically through
/// [`SmtTranslator`] plus a freshly spawned `solver_program`, and reports
/// whether the solver's model for the destination register agrees with the
/// emulator's concrete result.
///
/// `instr`'s destination (operand 2) must be a register; `JCC`/`RET`/`NOP`/
/// `UNDEF` have no single comparable result and return
/// [`ConsistencyError::NoDestination`].
pub fn assert_consistent(
    instr: &Instruction,
    arch: &ArchInfo,
    registers: RegisterFile,
    memory: Memory,
    solver_program: &str,
    solver_args: &[&str],
) -> Result<ConsistencyReport, ConsistencyError> {
    let (dest_name, dest_width) = match instr.operand2() {
        Operand::Register { name, width } => (name.clone(), *width),
        _ => return Err(ConsistencyError::NoDestination),
    };

    info!(instruction = %instr, "checking concrete/symbolic consistency");

    let container = IrContainer::from_instructions(vec![instr.clone()]);
    let mut emulator: Emulator<()> =
        Emulator::new(container, instr.address, registers.clone(), memory.clone(), ())?;
    emulator.run()?;
    let emulated_value = emulator.registers.read(&dest_name, dest_width);

    let mut translator = SmtTranslator::new(arch.address_width, arch.alias_map.clone());
    for (name, width) in &arch.register_widths {
        translator = translator.with_register_width(name.clone(), *width);
    }

    let mut solver = SolverSupervisor::spawn(solver_program, solver_args)?;
    for (name, width) in &arch.register_widths {
        solver.declare_bitvec(&translator.ssa_names().get_init(name), *width)?;
        let value = registers.read(name, reil_core::Width::new(*width).expect("register width must be admissible"));
        solver.assert(reil_smt::expr::eq(
            Expr::bitvec(*width, translator.ssa_names().get_init(name)),
            Expr::constant(*width, value),
        ))?;
    }

    let assertions = translator.translate(instr)?;
    for assertion in assertions {
        solver.assert(assertion)?;
    }

    let (base, offset, slice_width) = arch.alias_map.resolve(&dest_name, dest_width);
    let base_width = arch
        .register_widths
        .iter()
        .find(|(name, _)| name.as_str() == base)
        .map(|(_, w)| *w)
        .unwrap_or_else(|| dest_width.bits());
    let base_curr = Expr::bitvec(base_width, translator.ssa_names().get_curr(base));
    let dest_expr = if offset == 0 && slice_width.bits() == base_width {
        base_curr
    } else {
        reil_smt::expr::extract(base_curr, offset, slice_width.bits())
    };

    match solver.check()? {
        CheckResult::Sat => {}
        other => {
            warn!(?other, "solver did not report sat for a concrete initial state");
        }
    }
    let solved_value = solver.get_value(&dest_expr)?;

    let consistent = solved_value == emulated_value;
    if !consistent {
        warn!(
            emulated = emulated_value,
            solved = solved_value,
            "emulator and SMT translator disagree on the destination value"
        );
    }

    Ok(ConsistencyReport {
        instruction: instr.to_string(),
        destination_register: dest_name,
        emulated_value,
        solved_value,
        consistent,
    })
}

/// An all-zero register file with no sub-register aliasing, for callers
/// that don't need the x86 alias table (e.g. architecture-neutral IR
/// fixtures built straight from temporaries).
pub fn empty_registers() -> RegisterFile {
    RegisterFile::new(AliasMap::new())
}

/// An all-zero memory with the default (zero) fill byte.
pub fn empty_memory() -> Memory {
    Memory::new(MemoryConfig::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reil_core::{IrAddress, Mnemonic, Width};

    fn w(bits: u32) -> Width {
        Width::new(bits).unwrap()
    }

    #[test]
    fn non_register_destination_is_rejected() {
        let instr = Instruction::new(
            Mnemonic::Jcc,
            Operand::immediate(1, w(1)),
            Operand::Empty,
            Operand::immediate(0x2000 << 8, w(64)),
            IrAddress::new(0x1000, 0).unwrap(),
        );
        let arch = ArchInfo::x86_32();
        let err = assert_consistent(&instr, &arch, empty_registers(), empty_memory(), "z3", &["-in"]);
        assert!(matches!(err, Err(ConsistencyError::NoDestination)));
    }
}
