//! Translates IR instruction sequences into SMT-LIB v2 formulas and drives
//! a solver subprocess over them.
//!
//! [`expr`] is the expression algebra every translated formula is built
//! from; [`ssa`] tracks the per-register and per-memory version counters
//! that give each IR write a fresh SMT symbol; [`translator`] walks an IR
//! sequence and emits the assertions that encode it; [`solver`] owns the
//! solver subprocess and the `push`/`pop`/`check-sat`/`get-value` protocol
//! spoken over its stdio.

pub mod expr;
pub mod solver;
pub mod ssa;
pub mod translator;

pub use expr::{BvOp, Expr, PredOp};
pub use solver::{CheckResult, SolverError, SolverSupervisor};
pub use ssa::SsaNames;
pub use translator::{SmtTranslator, TranslateError};
