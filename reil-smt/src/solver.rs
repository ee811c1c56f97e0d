//! A subprocess-driven SMT-LIB v2 solver session.
//!
//! Talks SMT-LIB v2 over the solver's stdin and stdout, keeps a `push`/`pop`
//! stack of declarations and assertions so `reset` and checkpoint/rollback
//! are cheap, and reads responses by balancing parens rather than trusting
//! line boundaries (some solvers wrap long `get-value` replies across
//! lines).

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use thiserror::Error;
use tracing::{debug, trace};

use crate::expr::Expr;

#[derive(Error, Debug)]
pub enum SolverError {
    #[error("failed to launch solver process: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("i/o error talking to solver process: {0}")]
    Io(#[source] std::io::Error),
    #[error("solver process closed its stdout unexpectedly")]
    Eof,
    #[error("solver reported an error: {0}")]
    SolverReported(String),
    #[error("could not parse solver response {0:?}")]
    UnparseableResponse(String),
    #[error("getallvalues exceeded the cap of {0} models")]
    TooManyModels(usize),
    #[error("get_value called without a preceding sat check")]
    NoModel,
}

#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum CheckResult {
    Sat,
    Unsat,
    Unknown,
}

#[derive(Clone, Eq, PartialEq, Debug)]
enum Decl {
    BitVec { name: String, width: u32 },
    Bool { name: String },
    Array { name: String, index_width: u32, element_width: u32 },
}

/// A `push`/`pop` checkpoint: the declarations and assertions in scope when
/// it was taken.
#[derive(Clone, Default)]
struct Frame {
    declarations: Vec<Decl>,
    assertions: Vec<Expr>,
}

/// A running solver subprocess plus the declaration/assertion stack needed
/// to replay state across `reset`.
pub struct SolverSupervisor {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    stack: Vec<Frame>,
    declared: HashMap<String, ()>,
    cached_status: Option<CheckResult>,
}

impl SolverSupervisor {
    /// Spawns `program` (e.g. `"z3"`) with `args` (e.g. `["-in", "-smt2"]`)
    /// and sends the standard preamble: disable global declaration sharing
    /// (so `pop` actually forgets symbols) and select the quantifier-free
    /// array/bitvector logic.
    pub fn spawn(program: &str, args: &[&str]) -> Result<SolverSupervisor, SolverError> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(SolverError::Spawn)?;

        let stdin = child.stdin.take().expect("piped stdin");
        let stdout = BufReader::new(child.stdout.take().expect("piped stdout"));

        let mut solver = SolverSupervisor {
            child,
            stdin,
            stdout,
            stack: vec![Frame::default()],
            declared: HashMap::new(),
            cached_status: None,
        };

        solver.send("(set-option :global-decls false)")?;
        solver.send("(set-option :produce-models true)")?;
        solver.send("(set-logic QF_AUFBV)")?;
        Ok(solver)
    }

    fn send(&mut self, line: &str) -> Result<(), SolverError> {
        trace!(command = line, "smt send");
        writeln!(self.stdin, "{}", line).map_err(SolverError::Io)?;
        self.stdin.flush().map_err(SolverError::Io)
    }

    /// Reads one paren-balanced s-expression response, accumulating extra
    /// lines until parens close (a solver may wrap a long reply).
    fn recv(&mut self) -> Result<String, SolverError> {
        let mut response = String::new();
        let mut depth: i64 = 0;
        let mut seen_open = false;
        loop {
            let mut line = String::new();
            let read = self.stdout.read_line(&mut line).map_err(SolverError::Io)?;
            if read == 0 {
                return Err(SolverError::Eof);
            }
            for c in line.chars() {
                match c {
                    '(' => {
                        depth += 1;
                        seen_open = true;
                    }
                    ')' => depth -= 1,
                    _ => {}
                }
            }
            response.push_str(&line);
            if !seen_open || depth <= 0 {
                break;
            }
        }
        let trimmed = response.trim().to_string();
        trace!(response = %trimmed, "smt recv");
        if trimmed.contains("(error") {
            return Err(SolverError::SolverReported(trimmed));
        }
        Ok(trimmed)
    }

    fn current_frame(&mut self) -> &mut Frame {
        self.stack.last_mut().expect("stack always has a base frame")
    }

    pub fn declare_bitvec(&mut self, name: &str, width: u32) -> Result<(), SolverError> {
        if self.declared.contains_key(name) {
            return Ok(());
        }
        self.send(&format!("(declare-fun {} () (_ BitVec {}))", name, width))?;
        self.declared.insert(name.to_string(), ());
        self.current_frame().declarations.push(Decl::BitVec { name: name.to_string(), width });
        Ok(())
    }

    pub fn declare_bool(&mut self, name: &str) -> Result<(), SolverError> {
        if self.declared.contains_key(name) {
            return Ok(());
        }
        self.send(&format!("(declare-fun {} () Bool)", name))?;
        self.declared.insert(name.to_string(), ());
        self.current_frame().declarations.push(Decl::Bool { name: name.to_string() });
        Ok(())
    }

    pub fn declare_array(&mut self, name: &str, index_width: u32, element_width: u32) -> Result<(), SolverError> {
        if self.declared.contains_key(name) {
            return Ok(());
        }
        self.send(&format!(
            "(declare-fun {} () (Array (_ BitVec {}) (_ BitVec {})))",
            name, index_width, element_width
        ))?;
        self.declared.insert(name.to_string(), ());
        self.current_frame()
            .declarations
            .push(Decl::Array { name: name.to_string(), index_width, element_width });
        Ok(())
    }

    /// Appends the assertion and invalidates any cached `check` result — a
    /// new assertion can only narrow the model space, never widen it, so a
    /// stale `sat`/`unsat` can no longer be trusted.
    pub fn assert(&mut self, expr: Expr) -> Result<(), SolverError> {
        self.send(&format!("(assert {})", expr))?;
        self.current_frame().assertions.push(expr);
        self.cached_status = None;
        Ok(())
    }

    pub fn push(&mut self) -> Result<(), SolverError> {
        self.send("(push 1)")?;
        self.stack.push(Frame::default());
        Ok(())
    }

    pub fn pop(&mut self) -> Result<(), SolverError> {
        self.send("(pop 1)")?;
        let frame = self.stack.pop().expect("pop must be balanced with push");
        for decl in &frame.declarations {
            let name = match decl {
                Decl::BitVec { name, .. } | Decl::Bool { name } | Decl::Array { name, .. } => name,
            };
            self.declared.remove(name);
        }
        self.cached_status = None;
        Ok(())
    }

    /// Tears the session down to its initial state, replaying every
    /// declaration and assertion recorded before `full`, or truly clearing
    /// everything when `full` is set.
    pub fn reset(&mut self, full: bool) -> Result<(), SolverError> {
        self.send("(reset)")?;
        self.send("(set-option :global-decls false)")?;
        self.send("(set-option :produce-models true)")?;
        self.send("(set-logic QF_AUFBV)")?;
        self.declared.clear();
        self.cached_status = None;

        let frames = std::mem::take(&mut self.stack);
        self.stack.push(Frame::default());
        if full {
            return Ok(());
        }
        for frame in frames {
            for decl in frame.declarations {
                match decl {
                    Decl::BitVec { name, width } => self.declare_bitvec(&name, width)?,
                    Decl::Bool { name } => self.declare_bool(&name)?,
                    Decl::Array { name, index_width, element_width } => {
                        self.declare_array(&name, index_width, element_width)?
                    }
                }
            }
            for assertion in frame.assertions {
                self.assert(assertion)?;
            }
        }
        Ok(())
    }

    /// Issues `(check-sat)` only when there is no cached status from a prior
    /// call still valid (no assertion, push, or pop has happened since);
    /// otherwise returns the cached result without touching the subprocess.
    pub fn check(&mut self) -> Result<CheckResult, SolverError> {
        if let Some(status) = self.cached_status {
            return Ok(status);
        }
        self.send("(check-sat)")?;
        let status = match self.recv()?.as_str() {
            "sat" => CheckResult::Sat,
            "unsat" => CheckResult::Unsat,
            "unknown" => CheckResult::Unknown,
            other => return Err(SolverError::UnparseableResponse(other.to_string())),
        };
        self.cached_status = Some(status);
        Ok(status)
    }

    /// Evaluates `expr` under the current model and returns its value as an
    /// unsigned integer. Only meaningful right after `check` returned `Sat`.
    pub fn get_value(&mut self, expr: &Expr) -> Result<u128, SolverError> {
        if self.cached_status != Some(CheckResult::Sat) {
            return Err(SolverError::NoModel);
        }
        self.send(&format!("(get-value ({}))", expr))?;
        let response = self.recv()?;
        parse_get_value_hex(&response)
    }

    /// Enumerates up to `max_count` distinct satisfying values of `expr` by
    /// repeatedly checking, reading off a model value, excluding it, and
    /// checking again.
    pub fn get_all_values(&mut self, expr: &Expr, max_count: usize) -> Result<Vec<u128>, SolverError> {
        self.push()?;
        let mut values = Vec::new();
        loop {
            if self.check()? != CheckResult::Sat {
                break;
            }
            let value = self.get_value(expr)?;
            values.push(value);
            if values.len() > max_count {
                self.pop()?;
                return Err(SolverError::TooManyModels(max_count));
            }
            let width = expr.width().unwrap_or(32);
            self.assert(crate::expr::ne(expr.clone(), Expr::constant(width, value)))?;
        }
        self.pop()?;
        debug!(count = values.len(), "enumerated model values");
        Ok(values)
    }

    pub fn kill(mut self) -> std::io::Result<()> {
        self.child.kill()?;
        self.child.wait().map(|_| ())
    }
}

/// Attempts a graceful `(exit)` before killing the child, guaranteeing the
/// subprocess is released on destruction either way. A solver that is
/// already wedged or has closed its stdin simply ignores the `(exit)`
/// write, and the unconditional `kill` below still runs.
impl Drop for SolverSupervisor {
    fn drop(&mut self) {
        let _ = writeln!(self.stdin, "(exit)");
        let _ = self.stdin.flush();
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Parses a `get-value` response of the shape `((expr #xNNNNNNNN))` or
/// `((expr #bNNNN))` into its unsigned value.
fn parse_get_value_hex(response: &str) -> Result<u128, SolverError> {
    let hash_pos = response
        .find("#x")
        .map(|p| (p, 16))
        .or_else(|| response.find("#b").map(|p| (p, 2)))
        .ok_or_else(|| SolverError::UnparseableResponse(response.to_string()))?;
    let (start, radix) = hash_pos;
    let digits_start = start + 2;
    let digits_end = response[digits_start..]
        .find(|c: char| !c.is_digit(radix))
        .map(|rel| digits_start + rel)
        .unwrap_or(response.len());
    u128::from_str_radix(&response[digits_start..digits_end], radix)
        .map_err(|_| SolverError::UnparseableResponse(response.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex_get_value_response() {
        let resp = "((eax_0 #x0000002a))";
        assert_eq!(parse_get_value_hex(resp).unwrap(), 0x2a);
    }

    #[test]
    fn parses_binary_get_value_response() {
        let resp = "((zf_0 #b1))";
        assert_eq!(parse_get_value_hex(resp).unwrap(), 1);
    }

    #[test]
    fn rejects_a_response_with_no_literal() {
        assert!(parse_get_value_hex("((eax_0 eax_0))").is_err());
    }
}
