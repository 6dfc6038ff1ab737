//! Equivalent-literal detection by probing.
//!
//! Every literal is tentatively decided in the solver; the propagations
//! it triggers are the out-edges of an implicit graph over all literals.
//! Strongly connected components of that graph are equivalence classes.
//! Since propagation is not symmetric, the classes of `x` and `!x` need
//! not mention the same variables, so each class is merged together with
//! the mirrored class of the negations, which is what guarantees
//! `find(!l) == !find(l)`.

use crate::clause::{Lit, LitMap, Value};
use crate::interface::SolverInterface;
use crate::postsolve::SatPostsolver;
use crate::scc::{find_strongly_connected_components, Neighbors};

/// The implicit propagation graph over `2N` literal indices.
struct PropagationGraph<'a, S: SolverInterface> {
    solver: &'a mut S,
    deterministic_time_limit: f64,
    scratchpad: Vec<u32>,
}

impl<'a, S: SolverInterface> Neighbors for PropagationGraph<'a, S> {
    fn neighbors(&mut self, index: u32) -> &[u32] {
        self.scratchpad.clear();
        self.solver.backtrack_to_root_level();

        // Once the budget is spent we keep returning empty adjacency
        // lists: the SCC run finishes quickly and the result is an
        // under-approximation, never wrong.
        if self.solver.deterministic_time() > self.deterministic_time_limit {
            return &self.scratchpad;
        }

        let l = Lit::from_index(index as usize);
        if self.solver.value_lvl_0(l) == Value::Unassigned {
            let trail_index = self.solver.trail().len();
            self.solver.enqueue_decision_and_backjump_on_conflict(l);
            if self.solver.decision_level() > 0 {
                // the +1 skips the decision itself (no l => l edge)
                for &t in &self.solver.trail()[trail_index + 1..] {
                    self.scratchpad.push(t.index() as u32);
                }
            }
        }
        &self.scratchpad
    }
}

/// Union-find over literal indices. Union by size with a first-argument
/// tie-break, so that a merge sequence and its mirrored (negated)
/// sequence produce mirrored trees.
struct Partition {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl Partition {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            size: vec![1; n],
        }
    }

    fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut cur = x;
        while self.parent[cur] != root {
            let next = self.parent[cur];
            self.parent[cur] = root;
            cur = next;
        }
        root
    }

    fn merge(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return;
        }
        if self.size[ra] >= self.size[rb] {
            self.parent[rb] = ra;
            self.size[ra] += self.size[rb];
        } else {
            self.parent[ra] = rb;
            self.size[rb] += self.size[ra];
        }
    }
}

/// Probe every literal, collapse propagation cycles into equivalence
/// classes, and emit a literal-to-representative substitution in
/// `mapping` (left empty when no equivalence was found). Literals fixed
/// anywhere in a class are propagated to the whole class through unit
/// clauses; unfixed non-representative literals get an `(l v !rep)`
/// record in the postsolver so models can be lifted back.
///
/// Returns the number of literals mapped to a representative other than
/// themselves.
pub fn probe_and_find_equivalent_literals<S: SolverInterface>(
    solver: &mut S,
    postsolver: &mut SatPostsolver,
    mapping: &mut LitMap<Option<Lit>>,
) -> usize {
    solver.backtrack_to_root_level();
    mapping.clear();
    let _num_already_fixed = solver.trail().len();

    let deterministic_time_limit = solver.deterministic_time()
        + solver.parameters().presolve_probing_deterministic_time_limit;
    let num_literals = solver.num_vars() as usize * 2;
    let components = {
        let mut graph = PropagationGraph {
            solver: &mut *solver,
            deterministic_time_limit,
            scratchpad: Vec::new(),
        };
        find_strongly_connected_components(num_literals as u32, &mut graph)
    };

    // Merge each nontrivial class with the mirrored class of the
    // negations; one direction of propagation is enough to equate both.
    let mut partition = Partition::new(num_literals);
    let mut found_equivalence = false;
    for component in &components {
        if component.len() > 1 {
            found_equivalence = true;
            let representative = Lit::from_index(component[0] as usize);
            for &i in &component[1..] {
                let l = Lit::from_index(i as usize);
                partition.merge(representative.index(), l.index());
                partition.merge(representative.negate().index(), l.negate().index());
            }
            // a literal and its negation must end up in mirrored classes
            assert_eq!(
                partition.find(representative.negate().index()),
                Lit::from_index(partition.find(representative.index()))
                    .negate()
                    .index(),
                "polarity symmetry lost while merging equivalence classes"
            );
        }
    }

    solver.backtrack_to_root_level();
    let mut num_equiv = 0;
    if found_equivalence {
        // If any literal of a class is fixed, fix the representative.
        for index in 0..num_literals {
            let l = Lit::from_index(index);
            let rep = Lit::from_index(partition.find(index));
            if solver.value_lvl_0(l) != Value::Unassigned
                && solver.value_lvl_0(rep) == Value::Unassigned
            {
                let unit = if solver.value_lvl_0(l) == Value::True {
                    rep
                } else {
                    !rep
                };
                solver.add_unit_clause(unit);
            }
        }

        for index in 0..num_literals {
            let l = Lit::from_index(index);
            let rep = Lit::from_index(partition.find(index));
            mapping.set(l, Some(rep));
            if solver.value_lvl_0(rep) != Value::Unassigned {
                if solver.value_lvl_0(l) == Value::Unassigned {
                    // fixed representative: fix the whole class
                    let unit = if solver.value_lvl_0(rep) == Value::True {
                        l
                    } else {
                        !l
                    };
                    solver.add_unit_clause(unit);
                }
            } else if rep != l {
                assert!(solver.value_lvl_0(l) == Value::Unassigned);
                num_equiv += 1;
                postsolver.add(l, &[l, !rep]);
            }
        }
    }

    info!(
        "probing. fixed {} + {} equiv {} total {}",
        _num_already_fixed,
        solver.trail().len() - _num_already_fixed,
        num_equiv / 2,
        solver.num_vars()
    );
    num_equiv
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::clause::Var;
    use crate::test_utils::TestSolver;

    fn lit(i: i32) -> Lit {
        assert!(i != 0);
        Lit::new(Var::from_index((i.abs() - 1) as usize), i > 0)
    }

    #[test]
    fn test_partition_mirrored_merges() {
        let mut p = Partition::new(8);
        // classes {0, 2, 4} and the mirror {1, 3, 5}
        p.merge(0, 2);
        p.merge(1, 3);
        p.merge(0, 4);
        p.merge(1, 5);
        for x in &[0usize, 2, 4] {
            assert_eq!(p.find(*x) ^ 1, p.find(*x ^ 1));
        }
    }

    #[test]
    fn test_detects_equivalence_cycle() {
        // (-a v b) and (-b v a): a and b imply each other
        let mut solver = TestSolver::new(2);
        solver.add_clause(&[lit(-1), lit(2)]);
        solver.add_clause(&[lit(-2), lit(1)]);
        let mut postsolver = SatPostsolver::new(2);
        let mut mapping = LitMap::new(None);
        let num_equiv =
            probe_and_find_equivalent_literals(&mut solver, &mut postsolver, &mut mapping);

        assert_eq!(num_equiv, 2); // b -> a and -b -> -a
        assert!(!mapping.is_empty());
        let rep_a = (*mapping.get(lit(1))).unwrap();
        let rep_b = (*mapping.get(lit(2))).unwrap();
        assert_eq!(rep_a, rep_b);
        assert_eq!(*mapping.get(lit(-2)), Some(!rep_b));
        // a record (l, {l, !rep}) exists for the non-representative
        assert_eq!(postsolver.num_records(), 2);
    }

    #[test]
    fn test_probing_symmetry_invariant() {
        let mut solver = TestSolver::new(3);
        solver.add_clause(&[lit(-1), lit(2)]);
        solver.add_clause(&[lit(-2), lit(3)]);
        solver.add_clause(&[lit(-3), lit(1)]);
        let mut postsolver = SatPostsolver::new(3);
        let mut mapping = LitMap::new(None);
        probe_and_find_equivalent_literals(&mut solver, &mut postsolver, &mut mapping);
        for index in 0..6 {
            let l = Lit::from_index(index);
            let rep = (*mapping.get(l)).unwrap();
            assert_eq!(*mapping.get(!l), Some(!rep));
        }
    }

    #[test]
    fn test_no_equivalence_leaves_mapping_empty() {
        let mut solver = TestSolver::new(2);
        solver.add_clause(&[lit(1), lit(2)]);
        let mut postsolver = SatPostsolver::new(2);
        let mut mapping = LitMap::new(None);
        let num_equiv =
            probe_and_find_equivalent_literals(&mut solver, &mut postsolver, &mut mapping);
        assert_eq!(num_equiv, 0);
        assert!(mapping.is_empty());
    }

    #[test]
    fn test_fixed_variables_are_not_recorded() {
        // a <=> b, but both are already fixed at the root level: the
        // class never shows up as an equivalence
        let mut solver = TestSolver::new(2);
        solver.add_clause(&[lit(-1), lit(2)]);
        solver.add_clause(&[lit(-2), lit(1)]);
        solver.add_clause(&[lit(1)]);
        let mut postsolver = SatPostsolver::new(2);
        let mut mapping = LitMap::new(None);
        let num_equiv =
            probe_and_find_equivalent_literals(&mut solver, &mut postsolver, &mut mapping);
        assert_eq!(solver.value_lvl_0(lit(2)), Value::True);
        assert_eq!(num_equiv, 0);
        assert_eq!(postsolver.num_records(), 0);
    }

    #[test]
    fn test_budget_exhaustion_degrades_silently() {
        let mut solver = TestSolver::new(2);
        solver.add_clause(&[lit(-1), lit(2)]);
        solver.add_clause(&[lit(-2), lit(1)]);
        let mut params = crate::params::Params::default();
        params.presolve_probing_deterministic_time_limit = 0.0;
        solver.set_parameters(&params);
        solver.consume_deterministic_time(1.0);
        let mut postsolver = SatPostsolver::new(2);
        let mut mapping = LitMap::new(None);
        let num_equiv =
            probe_and_find_equivalent_literals(&mut solver, &mut postsolver, &mut mapping);
        // at most a fraction of the graph was seen, and nothing wrong
        // was concluded from it
        assert_eq!(num_equiv, 0);
        assert!(mapping.is_empty());
    }
}
