/* Interface to the external CDCL engine */

use crate::clause::{Lit, Value, Var};
use crate::params::Params;
use std::f64;
use std::time::Instant;

/// Result of a (possibly budgeted) solver call.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum SolveStatus {
    /// A model has been found.
    Sat,
    /// The problem is unsatisfiable regardless of assumptions.
    Unsat,
    /// The problem is unsatisfiable under the given assumptions; an
    /// incompatible subset can be retrieved with
    /// [`SolverInterface::last_incompatible_decisions`].
    AssumptionsUnsat,
    /// A conflict, time or deterministic-time budget ran out first.
    LimitReached,
}

/// The surface this crate needs from a CDCL SAT solver.
///
/// The presolver only uses the clause-loading half; the prober drives
/// single-decision propagations; the optimizer runs full assumption-based
/// solves. An implementation must keep `deterministic_time` monotonic and
/// reproducible for identical inputs, since all budget-based degradation
/// in this crate keys off it.
pub trait SolverInterface {
    fn num_vars(&self) -> u32;

    /// Declare the variable count (presolve handoff).
    fn set_num_vars(&mut self, n: u32);

    /// Create a fresh variable (used for encoding-node outputs).
    fn new_var(&mut self) -> Var;

    /// Add a problem clause. Returns `false` if the solver is now in an
    /// UNSAT state.
    fn add_clause(&mut self, clause: &[Lit]) -> bool;

    fn add_unit_clause(&mut self, l: Lit) -> bool {
        self.add_clause(&[l])
    }
    fn add_binary_clause(&mut self, a: Lit, b: Lit) -> bool {
        self.add_clause(&[a, b])
    }

    /// Model value of `l`. Precondition: last solve returned `Sat`.
    fn value_lit(&self, l: Lit) -> Value;

    /// Value of `l` if it is fixed at level 0, `Unassigned` otherwise.
    fn value_lvl_0(&self, l: Lit) -> Value;

    fn decision_level(&self) -> u32;
    fn backtrack_to_root_level(&mut self);

    /// The assignment stack, in assignment order.
    fn trail(&self) -> &[Lit];

    /// Make `l` the next decision and propagate; on conflict, analyze and
    /// backjump (possibly to level 0).
    fn enqueue_decision_and_backjump_on_conflict(&mut self, l: Lit);

    /// Monotonic, reproducible work counter.
    fn deterministic_time(&self) -> f64;

    fn num_conflicts(&self) -> u64;

    /// Install per-solve budgets and seeds.
    fn set_parameters(&mut self, params: &Params);

    /// The currently installed parameters.
    fn parameters(&self) -> &Params;

    /// Continue the previous search (same assumptions).
    fn solve(&mut self) -> SolveStatus;

    /// Restart the search under the given assumptions.
    fn reset_and_solve_with_assumptions(&mut self, assumptions: &[Lit]) -> SolveStatus;

    /// Subset of the assumptions responsible for the last
    /// `AssumptionsUnsat` answer, in assumption order.
    fn last_incompatible_decisions(&mut self) -> Vec<Lit>;
}

/// Cooperative wall-clock + deterministic-time budget.
///
/// Wall time only ever decides *when* to stop between iterations; all
/// work-proportional decisions use the deterministic ledger so runs stay
/// reproducible.
#[derive(Debug, Clone)]
pub struct TimeLimit {
    start: Instant,
    max_duration_seconds: f64,
    deterministic_limit: f64,
    deterministic_used: f64,
}

impl TimeLimit {
    pub fn new(max_time_in_seconds: f64, max_deterministic_time: f64) -> Self {
        Self {
            start: Instant::now(),
            max_duration_seconds: max_time_in_seconds,
            deterministic_limit: max_deterministic_time,
            deterministic_used: 0.0,
        }
    }

    pub fn from_params(params: &Params) -> Self {
        Self::new(params.max_time_in_seconds, params.max_deterministic_time)
    }

    pub fn infinite() -> Self {
        Self::new(f64::INFINITY, f64::INFINITY)
    }

    pub fn time_left(&self) -> f64 {
        self.max_duration_seconds - self.start.elapsed().as_secs_f64()
    }

    pub fn deterministic_time_left(&self) -> f64 {
        self.deterministic_limit - self.deterministic_used
    }

    pub fn advance_deterministic_time(&mut self, amount: f64) {
        debug_assert!(amount >= 0.0);
        self.deterministic_used += amount;
    }

    pub fn limit_reached(&self) -> bool {
        self.time_left() <= 0.0 || self.deterministic_time_left() <= 0.0
    }
}
