//! The CNF presolver.
//!
//! Clauses live in an append-only store and are removed by emptying them;
//! ids are never reused. A per-literal occurrence index drives a
//! subsumption / self-subsuming-resolution fixpoint, then a priority
//! queue over variables drives bounded variable elimination with an
//! incomplete blocked-clause test on the side. All removals that matter
//! for solution reconstruction are pushed to the [`SatPostsolver`].

use crate::clause::{Lit, LitMap, Var, VarMap};
use crate::dense::{DenseIndex, DenseSet};
use crate::interface::SolverInterface;
use crate::params::Params;
use crate::postsolve::SatPostsolver;
use crate::resolution::{compute_resolvant, compute_resolvant_size, simplify_clause, SimplifyResult};
use crate::varqueue::VarQueue;
use smallvec::SmallVec;
use std::cmp;
use std::collections::VecDeque;
use std::mem;
use std::time::Instant;

/// Id of a clause in the presolver's store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ClauseIndex(u32);

impl DenseIndex for ClauseIndex {
    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

type OccList = SmallVec<[ClauseIndex; 4]>;

/// Outcome of one bounded-variable-elimination attempt.
enum BveResult {
    /// Resolving produced the empty clause.
    Unsat,
    /// The variable was eliminated (resolvents added, clauses removed).
    Eliminated,
    /// Elimination was refused (too expensive or nothing to do).
    Skipped,
}

/// Immutable view of clause `a` and mutable view of clause `b != a` from
/// the same store.
fn clause_pair_mut(clauses: &mut [Vec<Lit>], a: usize, b: usize) -> (&[Lit], &mut Vec<Lit>) {
    debug_assert_ne!(a, b);
    if a < b {
        let (lo, hi) = clauses.split_at_mut(b);
        (lo[a].as_slice(), &mut hi[0])
    } else {
        let (lo, hi) = clauses.split_at_mut(a);
        (hi[0].as_slice(), &mut lo[b])
    }
}

/// Shape of the formula, as reported by [`SatPresolver::formula_stats`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FormulaStats {
    pub num_clauses: usize,
    pub num_literals: usize,
    pub num_vars: usize,
    pub num_one_side_vars: usize,
    pub num_simple_definitions: usize,
    pub num_singleton_clauses: usize,
}

#[derive(Debug, Default)]
pub struct SatPresolver {
    /// The clause store. An empty entry is a removed clause.
    clauses: Vec<Vec<Lit>>,
    /// For each literal, the ids of clauses currently containing it. May
    /// transiently hold ids of emptied clauses; those are dropped lazily
    /// during scans.
    literal_to_clauses: LitMap<OccList>,
    /// For each literal, the number of *nonempty* clauses containing it.
    literal_to_clause_sizes: LitMap<u32>,

    /// FIFO of clauses still to be used for simplifying others, with a
    /// membership set so a clause is queued at most once.
    clause_to_process: VecDeque<ClauseIndex>,
    in_clause_to_process: DenseSet<ClauseIndex>,

    var_pq: VarQueue,
    var_pq_initialized: bool,

    /// Literal substitution applied to every inserted clause (from
    /// equivalent-literal probing). Unmapped literals stay themselves.
    equiv_mapping: LitMap<Option<Lit>>,

    params: Params,

    // Statistics.
    num_trivial_clauses: u64,
    num_subsumed_clauses: u64,
    num_blocked_clauses: u64,
    num_eliminated_variables: u64,
}

impl SatPresolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_parameters(&mut self, params: Params) {
        debug_assert!(params.check());
        self.params = params;
    }

    /// Install the literal substitution produced by
    /// [`probe_and_find_equivalent_literals`](crate::probing::probe_and_find_equivalent_literals).
    /// It is applied to every clause added afterwards.
    pub fn set_equivalent_literal_mapping(&mut self, mapping: LitMap<Option<Lit>>) {
        self.equiv_mapping = mapping;
    }

    pub fn num_variables(&self) -> usize {
        self.literal_to_clause_sizes.len() / 2
    }

    /// Number of live (nonempty) clauses.
    pub fn num_clauses(&self) -> usize {
        self.clauses.iter().filter(|c| !c.is_empty()).count()
    }

    pub fn num_trivial_clauses(&self) -> u64 {
        self.num_trivial_clauses
    }
    pub fn num_subsumed_clauses(&self) -> u64 {
        self.num_subsumed_clauses
    }
    pub fn num_blocked_clauses(&self) -> u64 {
        self.num_blocked_clauses
    }
    pub fn num_eliminated_variables(&self) -> u64 {
        self.num_eliminated_variables
    }

    pub fn add_binary_clause(&mut self, a: Lit, b: Lit) {
        self.add_clause(&[a, b]);
    }

    /// Insert a clause. The input must be nonempty; it is canonicalized
    /// (equivalence substitution, sort, dedup) and dropped when trivially
    /// true.
    pub fn add_clause(&mut self, clause: &[Lit]) {
        assert!(!clause.is_empty(), "added an empty clause to the presolver");
        let ci = ClauseIndex(self.clauses.len() as u32);

        let mut clause_ref: Vec<Lit> = clause.to_vec();
        for l in clause_ref.iter_mut() {
            if let Some(image) = *self.equiv_mapping.get(*l) {
                *l = image;
            }
        }
        clause_ref.sort();
        clause_ref.dedup();

        for i in 1..clause_ref.len() {
            if clause_ref[i] == !clause_ref[i - 1] {
                // both polarities of a variable: the clause is trivial
                self.num_trivial_clauses += 1;
                return;
            }
        }

        // Both polarities of every mentioned variable need a slot, or the
        // variable count would come out short.
        let max_literal = *clause_ref.last().unwrap();
        let top = cmp::max(max_literal.index(), max_literal.negate().index()) + 1;
        self.literal_to_clauses.grow_to(top);
        self.literal_to_clause_sizes.grow_to(top);

        for &e in &clause_ref {
            self.literal_to_clauses.get_mut(e).push(ci);
            *self.literal_to_clause_sizes.get_mut(e) += 1;
        }
        self.clauses.push(clause_ref);
        self.in_clause_to_process.insert(ci);
        self.clause_to_process.push_back(ci);
    }

    /// Insert an already-canonical clause (a resolvent). Returns `false`
    /// when the clause is empty, which proves unsatisfiability.
    fn add_clause_internal(&mut self, clause: &mut Vec<Lit>) -> bool {
        if clause.is_empty() {
            return false; // resolving produced the empty clause
        }
        let ci = ClauseIndex(self.clauses.len() as u32);
        let clause_ref = mem::take(clause);
        for &e in &clause_ref {
            self.literal_to_clauses.get_mut(e).push(ci);
            *self.literal_to_clause_sizes.get_mut(e) += 1;
        }
        self.clauses.push(clause_ref);
        self.in_clause_to_process.insert(ci);
        self.clause_to_process.push_back(ci);
        true
    }

    /// Dense renaming of the surviving variables; eliminated variables
    /// map to `None`.
    pub fn variable_mapping(&self) -> VarMap<Option<Var>> {
        let mut result = VarMap::new(None);
        let mut new_var = 0;
        for v in 0..self.num_variables() {
            let var = Var::from_index(v);
            if self.occurrence_weight(var) > 0 {
                result.set(var, Some(Var::from_index(new_var)));
                new_var += 1;
            } else {
                result.set(var, None);
            }
        }
        result
    }

    /// Move the remaining clauses, remapped to the dense variable space,
    /// into `solver`, and drop the internal indexes.
    pub fn load_into_solver<S: SolverInterface>(&mut self, solver: &mut S) {
        // These are not needed anymore; variable_mapping() only relies on
        // the occurrence counts.
        self.var_pq.clear();
        self.var_pq_initialized = false;
        self.clause_to_process.clear();
        self.in_clause_to_process.clear();
        self.literal_to_clauses.clear();

        let mapping = self.variable_mapping();
        let new_size = mapping.values().iter().filter(|v| v.is_some()).count();
        solver.set_num_vars(new_size as u32);

        let mut temp = Vec::new();
        for clause_ref in self.clauses.iter_mut() {
            temp.clear();
            for &l in clause_ref.iter() {
                let image =
                    (*mapping.get(l.variable())).expect("eliminated variable in a live clause");
                temp.push(Lit::new(image, l.is_positive()));
            }
            if !temp.is_empty() {
                solver.add_clause(&temp);
            }
            clause_ref.clear();
            clause_ref.shrink_to_fit();
        }
    }

    /// Run the presolve loop to fixpoint. Returns `false` when the
    /// formula is proven unsatisfiable.
    pub fn presolve(&mut self, postsolver: &mut SatPostsolver) -> bool {
        let timer = Instant::now();
        info!("num trivial clauses: {}", self.num_trivial_clauses);
        self.display_stats(0.0);

        if !self.process_all_clauses() {
            return false;
        }
        self.display_stats(timer.elapsed().as_secs_f64());

        self.initialize_priority_queue();
        while let Some(var) = self.var_pq.pop_min() {
            match self.cross_product(Lit::positive(var), postsolver) {
                BveResult::Unsat => return false,
                BveResult::Eliminated => {
                    if !self.process_all_clauses() {
                        return false;
                    }
                }
                BveResult::Skipped => {}
            }
        }

        self.display_stats(timer.elapsed().as_secs_f64());
        true
    }

    /// Drain the to-process FIFO. Returns `false` on UNSAT.
    fn process_all_clauses(&mut self) -> bool {
        while let Some(ci) = self.clause_to_process.pop_front() {
            self.in_clause_to_process.remove(ci);
            if !self.process_clause_to_simplify_others(ci) {
                return false;
            }
        }
        true
    }

    /// Use the clause `clause_index` to subsume or strengthen other
    /// clauses, walking the occurrence list of its rarest literal (and,
    /// for strengthening only, of that literal's negation). Occurrence
    /// lists are compacted on the way. Returns `false` on UNSAT.
    fn process_clause_to_simplify_others(&mut self, clause_index: ClauseIndex) -> bool {
        if self.clauses[clause_index.index()].is_empty() {
            return true;
        }
        let lit = self.find_literal_with_shortest_occurrence_list(clause_index);

        // Clauses containing `lit`: both subsumption and strengthening
        // can happen here.
        {
            let mut occurrence_list = mem::take(self.literal_to_clauses.get_mut(lit));
            let mut new_index = 0;
            for k in 0..occurrence_list.len() {
                let ci = occurrence_list[k];
                if self.clauses[ci.index()].is_empty() {
                    continue;
                }
                if ci != clause_index {
                    let (clause, other) =
                        clause_pair_mut(&mut self.clauses, clause_index.index(), ci.index());
                    match simplify_clause(clause, other) {
                        SimplifyResult::No => {}
                        SimplifyResult::Subsumes => {
                            self.remove(ci);
                            self.num_subsumed_clauses += 1;
                            continue;
                        }
                        SimplifyResult::Strengthened(p) => {
                            debug_assert_ne!(p, lit);
                            if self.clauses[ci.index()].is_empty() {
                                self.literal_to_clauses.set(lit, occurrence_list);
                                return false; // UNSAT
                            }
                            // ci no longer contains p: fix the index for p
                            // (the list here can't be p's, nor its negation's).
                            let occ_p = self.literal_to_clauses.get_mut(p);
                            let pos = occ_p
                                .iter()
                                .position(|&c| c == ci)
                                .expect("clause missing from occurrence list");
                            occ_p.remove(pos);
                            *self.literal_to_clause_sizes.get_mut(p) -= 1;
                            self.update_priority_queue(p.variable());

                            if !self.in_clause_to_process.contains(ci) {
                                self.in_clause_to_process.insert(ci);
                                self.clause_to_process.push_back(ci);
                            }
                        }
                    }
                }
                occurrence_list[new_index] = ci;
                new_index += 1;
            }
            occurrence_list.truncate(new_index);
            debug_assert_eq!(*self.literal_to_clause_sizes.get(lit) as usize, new_index);
            self.literal_to_clause_sizes.set(lit, new_index as u32);
            self.literal_to_clauses.set(lit, occurrence_list);
        }

        // Clauses containing the negation: only strengthening on `!lit`
        // itself is possible.
        {
            let nlit = !lit;
            let mut something_removed = false;
            let mut occurrence_list = mem::take(self.literal_to_clauses.get_mut(nlit));
            let mut new_index = 0;
            for k in 0..occurrence_list.len() {
                let ci = occurrence_list[k];
                if self.clauses[ci.index()].is_empty() {
                    continue;
                }
                debug_assert_ne!(ci, clause_index);
                let (clause, other) =
                    clause_pair_mut(&mut self.clauses, clause_index.index(), ci.index());
                match simplify_clause(clause, other) {
                    SimplifyResult::No => {}
                    SimplifyResult::Subsumes => {
                        unreachable!("subsumed clause would contain both polarities")
                    }
                    SimplifyResult::Strengthened(p) => {
                        assert_eq!(p, nlit);
                        if self.clauses[ci.index()].is_empty() {
                            self.literal_to_clauses.set(nlit, occurrence_list);
                            return false; // UNSAT
                        }
                        if !self.in_clause_to_process.contains(ci) {
                            self.in_clause_to_process.insert(ci);
                            self.clause_to_process.push_back(ci);
                        }
                        something_removed = true;
                        continue;
                    }
                }
                occurrence_list[new_index] = ci;
                new_index += 1;
            }
            occurrence_list.truncate(new_index);
            self.literal_to_clause_sizes.set(nlit, new_index as u32);
            self.literal_to_clauses.set(nlit, occurrence_list);
            if something_removed {
                self.update_priority_queue(nlit.variable());
            }
        }
        true
    }

    /// One bounded-variable-elimination attempt on the variable of `x`,
    /// with the incomplete blocked-clause test done along the way.
    fn cross_product(&mut self, mut x: Lit, postsolver: &mut SatPostsolver) -> BveResult {
        let s1 = *self.literal_to_clause_sizes.get(x);
        let s2 = *self.literal_to_clause_sizes.get(!x);

        if s1 == 0 && s2 == 0 {
            return BveResult::Skipped;
        }
        // Heuristic: deciding whether x should be eliminated must not
        // cost a quadratic scan over two long lists.
        if s1 > 1 && s2 > 1 && s1 as u64 * s2 as u64 > self.params.presolve_bve_threshold as u64 {
            return BveResult::Skipped;
        }

        // The formula-size budget the resolvents must fit in.
        let clause_weight = self.params.presolve_bve_clause_weight as u64;
        let mut threshold: u64 = 0;
        for &i in self.literal_to_clauses.get(x) {
            if !self.clauses[i.index()].is_empty() {
                threshold += clause_weight + self.clauses[i.index()].len() as u64;
            }
        }
        for &i in self.literal_to_clauses.get(!x) {
            if !self.clauses[i.index()].is_empty() {
                threshold += clause_weight + self.clauses[i.index()].len() as u64;
            }
        }

        // For the blocked-clause detection, prefer the outer loop over
        // the smaller list.
        if s1 < s2 {
            x = !x;
        }

        let occ_pos: OccList = self.literal_to_clauses.get(x).clone();
        let occ_neg: OccList = self.literal_to_clauses.get(!x).clone();

        // Decide whether eliminating the variable shrinks the formula.
        let mut size: u64 = 0;
        let mut aborted = false;
        for &i in &occ_pos {
            if self.clauses[i.index()].is_empty() {
                continue;
            }
            let mut no_resolvant = true;
            if !aborted {
                for &j in &occ_neg {
                    if self.clauses[j.index()].is_empty() {
                        continue;
                    }
                    let rs =
                        compute_resolvant_size(x, &self.clauses[i.index()], &self.clauses[j.index()]);
                    if rs >= 0 {
                        no_resolvant = false;
                        size += clause_weight + rs as u64;
                        if size > threshold {
                            aborted = true;
                            break;
                        }
                    }
                }
            } else {
                for &j in &occ_neg {
                    if self.clauses[j.index()].is_empty() {
                        continue;
                    }
                    if compute_resolvant_size(x, &self.clauses[i.index()], &self.clauses[j.index()])
                        >= 0
                    {
                        no_resolvant = false;
                        break;
                    }
                }
            }
            if no_resolvant {
                // Incomplete blocked-clause detection: every resolvent of
                // this clause on x is a tautology, so it can go, with x
                // (its occurrence in the clause) as associated literal.
                self.remove_and_register_for_postsolve(i, x, postsolver);
                self.num_blocked_clauses += 1;
            }
        }
        if aborted {
            return BveResult::Skipped;
        }

        // Add all the non-trivial resolvents.
        let mut temp = Vec::new();
        for &i in &occ_pos {
            if self.clauses[i.index()].is_empty() {
                continue;
            }
            for &j in &occ_neg {
                if self.clauses[j.index()].is_empty() {
                    continue;
                }
                if compute_resolvant(x, &self.clauses[i.index()], &self.clauses[j.index()], &mut temp)
                {
                    if !self.add_clause_internal(&mut temp) {
                        return BveResult::Unsat;
                    }
                }
            }
        }

        // Delete the old clauses. The associated literal is the
        // occurrence of the eliminated variable inside each clause.
        self.remove_all_clauses_containing(x, postsolver);
        self.remove_all_clauses_containing(!x, postsolver);
        self.num_eliminated_variables += 1;
        BveResult::Eliminated
    }

    /// Empty the clause `ci`, keeping counters and the priority queue in
    /// step. The occurrence lists still holding `ci` are compacted lazily.
    fn remove(&mut self, ci: ClauseIndex) {
        let clause = mem::take(&mut self.clauses[ci.index()]);
        for &e in &clause {
            *self.literal_to_clause_sizes.get_mut(e) -= 1;
            self.update_priority_queue(e.variable());
        }
    }

    /// Like [`remove`](Self::remove), additionally recording the clause
    /// with associated literal `x` for postsolving.
    fn remove_and_register_for_postsolve(
        &mut self,
        ci: ClauseIndex,
        x: Lit,
        postsolver: &mut SatPostsolver,
    ) {
        let clause = mem::take(&mut self.clauses[ci.index()]);
        for &e in &clause {
            *self.literal_to_clause_sizes.get_mut(e) -= 1;
            self.update_priority_queue(e.variable());
        }
        postsolver.add(x, &clause);
    }

    fn remove_all_clauses_containing(&mut self, x: Lit, postsolver: &mut SatPostsolver) {
        let occurrence_list = mem::take(self.literal_to_clauses.get_mut(x));
        for &i in &occurrence_list {
            if !self.clauses[i.index()].is_empty() {
                self.remove_and_register_for_postsolve(i, x, postsolver);
            }
        }
        self.literal_to_clause_sizes.set(x, 0);
    }

    fn find_literal_with_shortest_occurrence_list(&self, clause_index: ClauseIndex) -> Lit {
        let clause = &self.clauses[clause_index.index()];
        debug_assert!(!clause.is_empty());
        let mut result = clause[0];
        for &l in clause.iter() {
            if self.literal_to_clause_sizes.get(l) < self.literal_to_clause_sizes.get(result) {
                result = l;
            }
        }
        result
    }

    /// Priority of a variable: how many live clauses mention it.
    fn occurrence_weight(&self, var: Var) -> u32 {
        *self.literal_to_clause_sizes.get(Lit::positive(var))
            + *self.literal_to_clause_sizes.get(Lit::negative(var))
    }

    fn update_priority_queue(&mut self, var: Var) {
        if !self.var_pq_initialized {
            return;
        }
        let weight = self.occurrence_weight(var);
        self.var_pq.update(var, weight);
    }

    fn initialize_priority_queue(&mut self) {
        for v in 0..self.num_variables() {
            let var = Var::from_index(v);
            let weight = self.occurrence_weight(var);
            self.var_pq.push(var, weight);
        }
        self.var_pq_initialized = true;
    }

    /// Summary counters of the current formula shape.
    pub fn formula_stats(&self) -> FormulaStats {
        let mut stats = FormulaStats::default();
        for c in &self.clauses {
            if !c.is_empty() {
                if c.len() == 1 {
                    stats.num_singleton_clauses += 1;
                }
                stats.num_clauses += 1;
                stats.num_literals += c.len();
            }
        }
        for v in 0..self.num_variables() {
            let var = Var::from_index(v);
            let s1 = *self.literal_to_clause_sizes.get(Lit::positive(var));
            let s2 = *self.literal_to_clause_sizes.get(Lit::negative(var));
            if s1 == 0 && s2 == 0 {
                continue;
            }
            stats.num_vars += 1;
            if s1 == 0 || s2 == 0 {
                stats.num_one_side_vars += 1;
            } else if s1 == 1 || s2 == 1 {
                stats.num_simple_definitions += 1;
            }
        }
        stats
    }

    /// Log a one-line summary of the current formula shape.
    pub fn display_stats(&self, _elapsed_seconds: f64) {
        let _stats = self.formula_stats();
        info!(
            "[{:.3}s] clauses:{} literals:{} vars:{} one_side_vars:{} simple_definition:{} singleton_clauses:{}",
            _elapsed_seconds,
            _stats.num_clauses,
            _stats.num_literals,
            _stats.num_vars,
            _stats.num_one_side_vars,
            _stats.num_simple_definitions,
            _stats.num_singleton_clauses
        );
    }

    /// Iterate over the live clauses (testing only).
    #[cfg(test)]
    pub(crate) fn live_clauses(&self) -> impl Iterator<Item = &Vec<Lit>> {
        self.clauses.iter().filter(|c| !c.is_empty())
    }

    /// Testing hook: check the occurrence-index invariants.
    #[cfg(test)]
    pub(crate) fn check_occurrence_consistency(&self) {
        for index in 0..self.literal_to_clause_sizes.len() {
            let l = Lit::from_index(index);
            let nonempty = self
                .literal_to_clauses
                .get(l)
                .iter()
                .filter(|&&ci| !self.clauses[ci.index()].is_empty())
                .count();
            assert_eq!(
                *self.literal_to_clause_sizes.get(l) as usize,
                nonempty,
                "size mismatch for {:?}",
                l
            );
        }
        for (ci, c) in self.clauses.iter().enumerate() {
            for &l in c {
                let count = self
                    .literal_to_clauses
                    .get(l)
                    .iter()
                    .filter(|&&i| i.index() == ci)
                    .count();
                assert_eq!(count, 1, "clause {} not indexed once under {:?}", ci, l);
            }
        }
    }
}
