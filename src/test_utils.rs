//! A deliberately small reference solver for the unit tests.
//!
//! Naive unit propagation over the full clause list, chronological
//! backtracking, assumptions handled as forced first decisions. Slow on
//! anything but toy formulas, which is all the tests need, and entirely
//! deterministic.

use crate::clause::{Lit, Value, Var, VarMap};
use crate::interface::{SolveStatus, SolverInterface};
use crate::params::Params;

pub(crate) struct TestSolver {
    num_vars: u32,
    clauses: Vec<Vec<Lit>>,
    values: VarMap<Value>,
    trail: Vec<Lit>,
    trail_lim: Vec<usize>,
    ok: bool,
    deterministic_time: f64,
    conflicts: u64,
    params: Params,
    last_assumptions: Vec<Lit>,
    last_core: Vec<Lit>,
    model: VarMap<Value>,
}

impl TestSolver {
    pub fn new(num_vars: u32) -> Self {
        let mut solver = Self {
            num_vars: 0,
            clauses: Vec::new(),
            values: VarMap::new(Value::Unassigned),
            trail: Vec::new(),
            trail_lim: Vec::new(),
            ok: true,
            deterministic_time: 0.0,
            conflicts: 0,
            params: Params::default(),
            last_assumptions: Vec::new(),
            last_core: Vec::new(),
            model: VarMap::new(Value::Unassigned),
        };
        solver.set_num_vars(num_vars);
        solver
    }

    /// Test hook to exhaust deterministic-time budgets.
    pub fn consume_deterministic_time(&mut self, amount: f64) {
        self.deterministic_time += amount;
    }

    fn value(&self, l: Lit) -> Value {
        self.values.get(l.variable()).negate_if(!l.is_positive())
    }

    fn assign(&mut self, l: Lit) {
        debug_assert!(self.value(l) == Value::Unassigned);
        self.values
            .set(l.variable(), Value::from_bool(l.is_positive()));
        self.trail.push(l);
    }

    /// Fixpoint unit propagation over every clause. Returns `false` on
    /// conflict.
    fn propagate(&mut self) -> bool {
        self.deterministic_time += 1e-6;
        loop {
            let mut changed = false;
            for ci in 0..self.clauses.len() {
                let mut unassigned: Option<Lit> = None;
                let mut num_unassigned = 0;
                let mut satisfied = false;
                for k in 0..self.clauses[ci].len() {
                    let l = self.clauses[ci][k];
                    match self.value(l) {
                        Value::True => {
                            satisfied = true;
                            break;
                        }
                        Value::Unassigned => {
                            num_unassigned += 1;
                            unassigned = Some(l);
                        }
                        Value::False => {}
                    }
                }
                if satisfied {
                    continue;
                }
                if num_unassigned == 0 {
                    self.conflicts += 1;
                    return false;
                }
                if num_unassigned == 1 {
                    self.assign(unassigned.expect("a unit literal"));
                    self.deterministic_time += 1e-6;
                    changed = true;
                }
            }
            if !changed {
                return true;
            }
        }
    }

    fn backtrack_to(&mut self, level: usize) {
        if level >= self.trail_lim.len() {
            return;
        }
        let target = self.trail_lim[level];
        while self.trail.len() > target {
            let l = self.trail.pop().expect("trail is empty");
            self.values.set(l.variable(), Value::Unassigned);
        }
        self.trail_lim.truncate(level);
    }

    /// Chronological-backtracking search below the current level. `true`
    /// leaves the solver in a full model.
    fn search(&mut self) -> bool {
        let base_level = self.trail_lim.len();
        let mut decisions: Vec<(Var, bool)> = Vec::new();
        loop {
            let next = (0..self.num_vars as usize)
                .map(Var::from_index)
                .find(|&v| !self.values.get(v).is_assigned());
            let v = match next {
                None => return true,
                Some(v) => v,
            };
            self.trail_lim.push(self.trail.len());
            decisions.push((v, false));
            self.assign(Lit::positive(v));
            while !self.propagate() {
                loop {
                    match decisions.pop() {
                        None => {
                            self.backtrack_to(base_level);
                            return false;
                        }
                        Some((_, true)) => {
                            self.backtrack_to(base_level + decisions.len());
                        }
                        Some((var, false)) => {
                            self.backtrack_to(base_level + decisions.len());
                            self.trail_lim.push(self.trail.len());
                            decisions.push((var, true));
                            self.assign(Lit::negative(var));
                            break;
                        }
                    }
                }
            }
        }
    }

    fn solve_internal(&mut self) -> SolveStatus {
        self.backtrack_to(0);
        if !self.ok || !self.propagate() {
            self.ok = false;
            return SolveStatus::Unsat;
        }

        let assumptions = self.last_assumptions.clone();
        for (k, &a) in assumptions.iter().enumerate() {
            match self.value(a) {
                Value::True => continue,
                Value::False => {
                    self.last_core = assumptions[..=k].to_vec();
                    self.backtrack_to(0);
                    return SolveStatus::AssumptionsUnsat;
                }
                Value::Unassigned => {
                    self.trail_lim.push(self.trail.len());
                    self.assign(a);
                    if !self.propagate() {
                        self.last_core = assumptions[..=k].to_vec();
                        self.backtrack_to(0);
                        return SolveStatus::AssumptionsUnsat;
                    }
                }
            }
        }

        if self.search() {
            self.model = self.values.clone();
            return SolveStatus::Sat;
        }
        self.backtrack_to(0);
        if assumptions.is_empty() {
            self.ok = false;
            SolveStatus::Unsat
        } else {
            self.last_core = assumptions;
            SolveStatus::AssumptionsUnsat
        }
    }
}

impl SolverInterface for TestSolver {
    fn num_vars(&self) -> u32 {
        self.num_vars
    }

    fn set_num_vars(&mut self, n: u32) {
        if n > self.num_vars {
            self.num_vars = n;
            self.values.grow_to(n as usize);
        }
    }

    fn new_var(&mut self) -> Var {
        let v = Var::from_index(self.num_vars as usize);
        self.num_vars += 1;
        self.values.grow_to(self.num_vars as usize);
        v
    }

    fn add_clause(&mut self, clause: &[Lit]) -> bool {
        debug_assert_eq!(self.decision_level(), 0);
        if !self.ok {
            return false;
        }
        if clause.is_empty() {
            self.ok = false;
            return false;
        }
        for &l in clause {
            if l.variable().index() >= self.num_vars as usize {
                self.set_num_vars(l.variable().index() as u32 + 1);
            }
        }
        self.clauses.push(clause.to_vec());
        if !self.propagate() {
            self.ok = false;
        }
        self.ok
    }

    fn value_lit(&self, l: Lit) -> Value {
        self.model.get(l.variable()).negate_if(!l.is_positive())
    }

    fn value_lvl_0(&self, l: Lit) -> Value {
        let root_end = self.trail_lim.first().copied().unwrap_or(self.trail.len());
        for &t in &self.trail[..root_end] {
            if t.variable() == l.variable() {
                return Value::from_bool(t == l);
            }
        }
        Value::Unassigned
    }

    fn decision_level(&self) -> u32 {
        self.trail_lim.len() as u32
    }

    fn backtrack_to_root_level(&mut self) {
        self.backtrack_to(0);
    }

    fn trail(&self) -> &[Lit] {
        &self.trail
    }

    fn enqueue_decision_and_backjump_on_conflict(&mut self, l: Lit) {
        debug_assert!(self.value(l) == Value::Unassigned);
        self.trail_lim.push(self.trail.len());
        self.assign(l);
        if !self.propagate() {
            self.backtrack_to(0);
        }
    }

    fn deterministic_time(&self) -> f64 {
        self.deterministic_time
    }

    fn num_conflicts(&self) -> u64 {
        self.conflicts
    }

    fn set_parameters(&mut self, params: &Params) {
        self.params = params.clone();
    }

    fn parameters(&self) -> &Params {
        &self.params
    }

    fn solve(&mut self) -> SolveStatus {
        self.solve_internal()
    }

    fn reset_and_solve_with_assumptions(&mut self, assumptions: &[Lit]) -> SolveStatus {
        self.last_assumptions = assumptions.to_vec();
        self.solve_internal()
    }

    fn last_incompatible_decisions(&mut self) -> Vec<Lit> {
        self.last_core.clone()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn lit(i: i32) -> Lit {
        assert!(i != 0);
        Lit::new(Var::from_index((i.abs() - 1) as usize), i > 0)
    }

    #[test]
    fn test_unit_propagation_at_root() {
        let mut s = TestSolver::new(2);
        s.add_clause(&[lit(1)]);
        s.add_clause(&[lit(-1), lit(2)]);
        assert_eq!(s.value_lvl_0(lit(1)), Value::True);
        assert_eq!(s.value_lvl_0(lit(2)), Value::True);
    }

    #[test]
    fn test_solve_simple() {
        let mut s = TestSolver::new(2);
        s.add_clause(&[lit(1), lit(2)]);
        s.add_clause(&[lit(-1)]);
        assert_eq!(s.reset_and_solve_with_assumptions(&[]), SolveStatus::Sat);
        assert_eq!(s.value_lit(lit(2)), Value::True);
    }

    #[test]
    fn test_unsat() {
        let mut s = TestSolver::new(1);
        s.add_clause(&[lit(1)]);
        assert!(!s.add_clause(&[lit(-1)]));
        assert_eq!(s.reset_and_solve_with_assumptions(&[]), SolveStatus::Unsat);
    }

    #[test]
    fn test_assumption_core_is_ordered_prefix() {
        let mut s = TestSolver::new(3);
        s.add_clause(&[lit(-1), lit(2)]);
        let status = s.reset_and_solve_with_assumptions(&[lit(3), lit(1), lit(-2)]);
        assert_eq!(status, SolveStatus::AssumptionsUnsat);
        assert_eq!(s.last_incompatible_decisions(), vec![lit(3), lit(1), lit(-2)]);
    }

    #[test]
    fn test_decision_probing() {
        let mut s = TestSolver::new(2);
        s.add_clause(&[lit(-1), lit(2)]);
        let before = s.trail().len();
        s.enqueue_decision_and_backjump_on_conflict(lit(1));
        assert_eq!(s.decision_level(), 1);
        let new_lits: Vec<Lit> = s.trail()[before..].to_vec();
        assert_eq!(new_lits, vec![lit(1), lit(2)]);
        s.backtrack_to_root_level();
        assert_eq!(s.trail().len(), 0);
    }

    #[test]
    fn test_conflicting_decision_backjumps_to_root() {
        let mut s = TestSolver::new(2);
        s.add_clause(&[lit(-1), lit(2)]);
        s.add_clause(&[lit(-1), lit(-2)]);
        s.enqueue_decision_and_backjump_on_conflict(lit(1));
        assert_eq!(s.decision_level(), 0);
    }
}
