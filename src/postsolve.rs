//! Reconstruction of original-space solutions after presolving.
//!
//! Every clause the presolver deletes beyond pure redundancy elimination
//! (variable elimination, blocked clauses, literal equivalences) is
//! recorded here together with an *associated literal* of the clause.
//! Replaying the records last-to-first, flipping the associated literal
//! whenever its clause is unsatisfied, turns any model of the reduced
//! problem into a model of the original one.

use crate::clause::{Assignment, Lit, Value, Var, VarMap};
use crate::interface::SolverInterface;
use std::mem;

/// The undo log of the presolver, in original variable space.
#[derive(Debug, Clone, Default)]
pub struct SatPostsolver {
    /// For record `i`, the literal to make true when the recorded clause
    /// is falsified during replay.
    associated_literal: Vec<Lit>,
    /// Start offset of each record in `clauses_literals`.
    clauses_start: Vec<usize>,
    /// Flattened storage of all recorded clauses.
    clauses_literals: Vec<Lit>,
    /// Literals fixed during presolve (units, equivalence collapses).
    assignment: Assignment,
    /// Maps the *current* (reduced) variable space back to the original
    /// one. The domain keeps the original size; entries past the reduced
    /// space are `None`.
    reverse_mapping: VarMap<Option<Var>>,
}

impl SatPostsolver {
    pub fn new(num_variables: usize) -> Self {
        let mut reverse_mapping = VarMap::new(None);
        for v in 0..num_variables {
            reverse_mapping.set(Var::from_index(v), Some(Var::from_index(v)));
        }
        Self {
            associated_literal: Vec::new(),
            clauses_start: Vec::new(),
            clauses_literals: Vec::new(),
            assignment: Assignment::new(num_variables),
            reverse_mapping,
        }
    }

    pub fn num_variables(&self) -> usize {
        self.reverse_mapping.len()
    }

    /// Number of recorded clause removals.
    pub fn num_records(&self) -> usize {
        self.clauses_start.len()
    }

    fn apply_reverse_mapping(&self, l: Lit) -> Lit {
        let image =
            (*self.reverse_mapping.get(l.variable())).expect("reverse-mapping an eliminated variable");
        Lit::new(image, l.is_positive())
    }

    /// Record the removal of `clause` with associated literal `x`.
    /// Both are translated to original space on the way in.
    pub fn add(&mut self, x: Lit, clause: &[Lit]) {
        assert!(!clause.is_empty());
        debug_assert!(clause.contains(&x));
        let x = self.apply_reverse_mapping(x);
        self.associated_literal.push(x);
        self.clauses_start.push(self.clauses_literals.len());
        for &l in clause {
            let l = self.apply_reverse_mapping(l);
            self.clauses_literals.push(l);
        }
    }

    /// Remember that `x` has been fixed to true during presolve.
    pub fn fix_variable(&mut self, x: Lit) {
        let l = self.apply_reverse_mapping(x);
        assert!(!self.assignment.is_literal_assigned(l));
        self.assignment.assign_from_true_literal(l);
    }

    /// Compose a variable renaming (`old -> new`, `None` for eliminated
    /// variables) on top of the reverse mapping, so that later records
    /// arriving in the renamed space still land in original space.
    pub fn apply_mapping(&mut self, mapping: &VarMap<Option<Var>>) {
        let mut new_mapping = VarMap::new(None);
        new_mapping.grow_to(self.reverse_mapping.len());
        for (v, &image) in mapping.values().iter().enumerate() {
            if let Some(image) = image {
                assert!(
                    new_mapping.get(image).is_none(),
                    "duplicate image variable in mapping"
                );
                debug_assert!(image.index() < new_mapping.len());
                let original = (*self.reverse_mapping.get(Var::from_index(v)))
                    .expect("renaming an eliminated variable");
                new_mapping.set(image, Some(original));
            }
        }
        self.reverse_mapping = new_mapping;
    }

    /// Replay the records, last to first, over `assignment` (which must
    /// cover the original variable space). After processing record `i`,
    /// every recorded clause with index `>= i` is satisfied.
    pub fn postsolve(&self, assignment: &mut Assignment) {
        // A valid assignment of the presolved problem may leave variables
        // untouched; any value works, so pick true.
        for v in 0..assignment.num_variables() {
            let var = Var::from_index(v);
            if !assignment.is_variable_assigned(var) {
                assignment.assign_from_true_literal(Lit::positive(var));
            }
        }

        let mut previous_start = self.clauses_literals.len();
        for i in (0..self.clauses_start.len()).rev() {
            let new_start = self.clauses_start[i];
            let mut set_associated_var = true;
            for j in new_start..previous_start {
                if assignment.literal_is_true(self.clauses_literals[j]) {
                    set_associated_var = false;
                    break;
                }
            }
            previous_start = new_start;
            if set_associated_var {
                assignment.unassign_literal(self.associated_literal[i]);
                assignment.assign_from_true_literal(self.associated_literal[i]);
            }
        }
    }

    /// Lift a reduced-space solution to a full original-space solution.
    pub fn postsolve_solution(&mut self, solution: &[bool]) -> Vec<bool> {
        let mut assignment = mem::take(&mut self.assignment);
        for (v, &value) in solution.iter().enumerate() {
            let image = (*self.reverse_mapping.get(Var::from_index(v)))
                .expect("solution assigns an eliminated variable");
            assert!(!assignment.is_variable_assigned(image));
            assignment.assign_from_true_literal(Lit::new(image, value));
        }
        self.postsolve(&mut assignment);
        let result = (0..self.reverse_mapping.len())
            .map(|v| assignment.literal_is_true(Lit::positive(Var::from_index(v))))
            .collect();
        self.assignment = assignment;
        result
    }

    /// Read the solver's model and postsolve it.
    pub fn extract_and_postsolve_solution<S: SolverInterface>(&mut self, solver: &S) -> Vec<bool> {
        let solution: Vec<bool> = (0..solver.num_vars())
            .map(|v| {
                let l = Lit::positive(Var::from_index(v as usize));
                debug_assert!(solver.value_lit(l) != Value::Unassigned);
                solver.value_lit(l) == Value::True
            })
            .collect();
        self.postsolve_solution(&solution)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn lit(i: i32) -> Lit {
        assert!(i != 0);
        Lit::new(Var::from_index((i.abs() - 1) as usize), i > 0)
    }

    fn clause(lits: &[i32]) -> Vec<Lit> {
        let mut c: Vec<Lit> = lits.iter().map(|&i| lit(i)).collect();
        c.sort();
        c
    }

    #[test]
    fn test_replay_sets_associated_literal() {
        // Variable elimination of `a` from {a, b} and {-a, c}: both
        // clauses are recorded, resolvent {b, c} survives.
        let mut p = SatPostsolver::new(3);
        p.add(lit(1), &clause(&[1, 2]));
        p.add(lit(-1), &clause(&[-1, 3]));

        // model of the reduced problem: b = false, c = true
        let mut assignment = Assignment::new(3);
        assignment.assign_from_true_literal(lit(-2));
        assignment.assign_from_true_literal(lit(3));
        p.postsolve(&mut assignment);

        // {-a, c} satisfied by c; {a, b} needed a = true
        assert!(assignment.literal_is_true(lit(1)));
        assert!(assignment.literal_is_true(lit(-2)));
        assert!(assignment.literal_is_true(lit(3)));
    }

    #[test]
    fn test_unassigned_variables_default_to_true() {
        let mut p = SatPostsolver::new(2);
        p.add(lit(-1), &clause(&[-1, -2]));
        let mut assignment = Assignment::new(2);
        // nothing assigned: step one sets everything true, then the
        // record for {-a, -b} flips a
        p.postsolve(&mut assignment);
        assert!(assignment.literal_is_true(lit(-1)));
        assert!(assignment.literal_is_true(lit(2)));
    }

    #[test]
    fn test_apply_mapping_composes() {
        // original space {a, b, c}; b is eliminated, so the reduced space
        // is {a, c} with c renamed to index 1
        let mut p = SatPostsolver::new(3);
        let mut mapping = VarMap::new(None);
        mapping.set(Var::from_index(0), Some(Var::from_index(0)));
        mapping.set(Var::from_index(1), None);
        mapping.set(Var::from_index(2), Some(Var::from_index(1)));
        p.apply_mapping(&mapping);

        // a record in reduced space: literal 2 there is original c
        p.add(lit(2), &clause(&[2]));
        assert_eq!(p.clauses_literals, vec![Lit::positive(Var::from_index(2))]);

        let solution = p.postsolve_solution(&[false, true]);
        assert_eq!(solution.len(), 3);
        assert!(!solution[0]);
        assert!(solution[2]);
    }

    #[test]
    #[should_panic]
    fn test_eliminated_variable_panics() {
        let mut p = SatPostsolver::new(2);
        let mut mapping = VarMap::new(None);
        mapping.set(Var::from_index(0), Some(Var::from_index(0)));
        mapping.set(Var::from_index(1), None);
        p.apply_mapping(&mapping);
        // variable 1 no longer exists in the reduced space
        p.add(lit(2), &clause(&[2]));
    }

    #[test]
    fn test_fix_variable() {
        let mut p = SatPostsolver::new(2);
        p.fix_variable(lit(-2));
        let solution = p.postsolve_solution(&[]);
        assert!(!solution[1]);
    }
}
