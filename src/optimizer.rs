//! Core-guided minimization of a weighted sum of literals.
//!
//! The optimizer owns its SAT solver and a forest of encoding nodes, one
//! root per still-active objective term. Each round it assumes the first
//! output of every heavy-enough node to be false; an unsatisfiable core
//! then names terms that cannot all stay at zero, and the implicated
//! nodes are merged into a fresh totalizer whose first output is asserted
//! true. The proven lower bound never decreases, and the stratified
//! threshold walks down the distinct weights so heavy terms are resolved
//! first.

use crate::clause::{Lit, Value, Var};
use crate::dense::DenseSet;
use crate::encoding::{
    create_initial_encoding_nodes, Coefficient, NodeId, NodeRepository, COEFFICIENT_MAX,
};
use crate::interface::{SolveStatus, SolverInterface, TimeLimit};
use crate::params::Params;

/// A weighted sum of literals to minimize.
#[derive(Debug, Clone, Default)]
pub struct LinearObjective {
    literals: Vec<Lit>,
    coefficients: Vec<Coefficient>,
}

impl LinearObjective {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, literal: Lit, coefficient: Coefficient) {
        self.literals.push(literal);
        self.coefficients.push(coefficient);
    }

    pub fn is_empty(&self) -> bool {
        self.literals.is_empty()
    }

    pub fn literals(&self) -> &[Lit] {
        &self.literals
    }
    pub fn coefficients(&self) -> &[Coefficient] {
        &self.coefficients
    }

    /// Cost of a full assignment.
    pub fn cost_of(&self, solution: &[bool]) -> Coefficient {
        let mut cost = 0;
        for (&l, &c) in self.literals.iter().zip(self.coefficients.iter()) {
            let value = solution[l.variable().index()];
            if value == l.is_positive() {
                cost += c;
            }
        }
        cost
    }
}

/// Shared view of the problem being optimized: the clauses, the
/// objective, and the best feasible solution found so far. The update
/// stamp lets the optimizer reload only what changed between calls.
#[derive(Debug, Clone)]
pub struct ProblemState {
    num_variables: usize,
    clauses: Vec<Vec<Lit>>,
    objective: LinearObjective,
    solution: Option<Vec<bool>>,
    update_stamp: u64,
}

impl ProblemState {
    pub fn new(num_variables: usize, objective: LinearObjective) -> Self {
        Self {
            num_variables,
            clauses: Vec::new(),
            objective,
            solution: None,
            update_stamp: 0,
        }
    }

    pub fn num_variables(&self) -> usize {
        self.num_variables
    }
    pub fn objective(&self) -> &LinearObjective {
        &self.objective
    }
    pub fn update_stamp(&self) -> u64 {
        self.update_stamp
    }

    pub fn add_clause(&mut self, clause: &[Lit]) {
        assert!(!clause.is_empty());
        self.clauses.push(clause.to_vec());
        self.update_stamp += 1;
    }

    fn is_feasible(&self, solution: &[bool]) -> bool {
        solution.len() == self.num_variables
            && self.clauses.iter().all(|c| {
                c.iter()
                    .any(|&l| solution[l.variable().index()] == l.is_positive())
            })
    }

    /// Install a feasible solution (typically the one just reported in
    /// [`LearnedInfo::solution`]).
    pub fn set_solution(&mut self, solution: Vec<bool>) {
        debug_assert!(self.is_feasible(&solution));
        self.solution = Some(solution);
        self.update_stamp += 1;
    }

    pub fn has_feasible_solution(&self) -> bool {
        self.solution.is_some()
    }

    pub fn solution(&self) -> Option<&[bool]> {
        self.solution.as_deref()
    }

    pub fn solution_cost(&self) -> Coefficient {
        let solution = self.solution.as_ref().expect("no feasible solution");
        self.objective.cost_of(solution)
    }
}

/// What one `optimize` call learned: a proven lower bound on the cost
/// and, possibly, an improving solution.
#[derive(Debug, Clone, Default)]
pub struct LearnedInfo {
    pub lower_bound: Coefficient,
    pub solution: Option<Vec<bool>>,
}

impl LearnedInfo {
    pub fn clear(&mut self) {
        self.lower_bound = 0;
        self.solution = None;
    }
}

/// Outcome of one `optimize` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizerStatus {
    /// A budget ran out; call again to make more progress.
    Continue,
    /// A strictly better feasible solution is in `LearnedInfo::solution`.
    SolutionFound,
    /// The best known solution is optimal.
    OptimalSolutionFound,
    /// The problem has no feasible solution.
    Infeasible,
}

pub struct SatCoreBasedOptimizer<S: SolverInterface> {
    solver: S,
    repository: NodeRepository,
    nodes: Vec<NodeId>,
    offset: Coefficient,
    lower_bound: Coefficient,
    upper_bound: Coefficient,
    stratified_lower_bound: Coefficient,
    state_update_stamp: Option<u64>,
    num_loaded_clauses: usize,
    initialized: bool,
    assumptions_already_added: bool,
}

impl<S: SolverInterface> SatCoreBasedOptimizer<S> {
    pub fn new(solver: S) -> Self {
        Self {
            solver,
            repository: NodeRepository::new(),
            nodes: Vec::new(),
            offset: 0,
            lower_bound: 0,
            upper_bound: COEFFICIENT_MAX,
            stratified_lower_bound: 0,
            state_update_stamp: None,
            num_loaded_clauses: 0,
            initialized: false,
            assumptions_already_added: false,
        }
    }

    pub fn solver(&self) -> &S {
        &self.solver
    }

    /// There is nothing to do without an objective.
    pub fn should_be_run(&self, problem_state: &ProblemState) -> bool {
        !problem_state.objective().is_empty()
    }

    fn synchronize_if_needed(&mut self, problem_state: &ProblemState) -> OptimizerStatus {
        if self.state_update_stamp == Some(problem_state.update_stamp()) {
            return OptimizerStatus::Continue;
        }
        self.state_update_stamp = Some(problem_state.update_stamp());

        // Only the clauses added since the last call are loaded.
        self.solver.set_num_vars(problem_state.num_variables() as u32);
        while self.num_loaded_clauses < problem_state.clauses.len() {
            if !self
                .solver
                .add_clause(&problem_state.clauses[self.num_loaded_clauses])
            {
                return if problem_state.has_feasible_solution() {
                    OptimizerStatus::OptimalSolutionFound
                } else {
                    OptimizerStatus::Infeasible
                };
            }
            self.num_loaded_clauses += 1;
        }

        if !self.initialized {
            let objective = problem_state.objective();
            let (nodes, offset) = create_initial_encoding_nodes(
                objective.literals(),
                objective.coefficients(),
                &mut self.repository,
            );
            self.nodes = nodes;
            self.offset = offset;
            self.initialized = true;

            // Used by the stratified approach: start with the heaviest
            // terms only.
            self.stratified_lower_bound = 0;
            for &id in &self.nodes {
                self.stratified_lower_bound =
                    self.stratified_lower_bound.max(self.repository.node(id).weight());
            }
        }

        // Extract the new upper bound.
        if problem_state.has_feasible_solution() {
            self.upper_bound = problem_state.solution_cost() + self.offset;
        }
        OptimizerStatus::Continue
    }

    /// Build the assumption set and start a fresh solve. An `Unsat`
    /// answer here can also mean the gap closed before solving.
    fn solve_with_assumptions(&mut self) -> SolveStatus {
        self.solver.backtrack_to_root_level();
        for &id in &self.nodes {
            let reduced = self.repository.reduce(id, &self.solver);
            self.lower_bound += reduced * self.repository.node(id).weight();
        }
        if self.upper_bound != COEFFICIENT_MAX {
            let gap = self.upper_bound - self.lower_bound;
            if gap <= 0 {
                // The lower bound meets the cost of the synchronized
                // solution: nothing better exists.
                return SolveStatus::Unsat;
            }
            for &id in &self.nodes {
                let weight = self.repository.node(id).weight();
                self.repository
                    .apply_upper_bound(id, gap / weight, &mut self.solver);
            }
        }

        let mut assumptions = Vec::new();
        let mut new_index = 0;
        for k in 0..self.nodes.len() {
            let id = self.nodes[k];
            if self.repository.node(id).size() > 0 {
                if self.repository.node(id).weight() >= self.stratified_lower_bound {
                    assumptions.push(!self.repository.node(id).literal(0));
                }
                self.nodes[new_index] = id;
                new_index += 1;
            }
        }
        self.nodes.truncate(new_index);
        debug_assert!(assumptions.len() <= self.nodes.len());
        self.solver.reset_and_solve_with_assumptions(&assumptions)
    }

    /// One round of core-guided optimization, until a result or a budget
    /// boundary. Re-enter with the same problem state after `Continue`.
    pub fn optimize(
        &mut self,
        parameters: &Params,
        problem_state: &ProblemState,
        learned_info: &mut LearnedInfo,
        time_limit: &mut TimeLimit,
    ) -> OptimizerStatus {
        learned_info.clear();
        match self.synchronize_if_needed(problem_state) {
            OptimizerStatus::Continue => {}
            status => return status,
        }

        let mut conflict_limit = parameters.max_number_of_conflicts;
        let mut deterministic_time_at_last_sync = self.solver.deterministic_time();
        while !time_limit.limit_reached() {
            let mut solve_params = parameters.clone();
            solve_params.max_time_in_seconds = time_limit.time_left();
            solve_params.max_deterministic_time = time_limit.deterministic_time_left();
            solve_params.max_number_of_conflicts = conflict_limit;
            self.solver.set_parameters(&solve_params);

            let old_num_conflicts = self.solver.num_conflicts();
            let sat_status = if self.assumptions_already_added {
                self.solver.solve()
            } else {
                self.solve_with_assumptions()
            };
            time_limit.advance_deterministic_time(
                self.solver.deterministic_time() - deterministic_time_at_last_sync,
            );
            deterministic_time_at_last_sync = self.solver.deterministic_time();

            self.assumptions_already_added = true;
            conflict_limit -= (self.solver.num_conflicts() - old_num_conflicts) as i64;
            learned_info.lower_bound = self.lower_bound - self.offset;

            // Possible because the objective is over-constrained.
            if sat_status == SolveStatus::Unsat {
                return if problem_state.has_feasible_solution() {
                    OptimizerStatus::OptimalSolutionFound
                } else {
                    OptimizerStatus::Infeasible
                };
            }
            if sat_status == SolveStatus::LimitReached || conflict_limit < 0 {
                return OptimizerStatus::Continue;
            }
            if sat_status == SolveStatus::Sat {
                // A solution at this stratification level; move the
                // threshold down to the next distinct weight, if any.
                let old_lower_bound = self.stratified_lower_bound;
                for &id in &self.nodes {
                    let weight = self.repository.node(id).weight();
                    if weight < old_lower_bound {
                        if self.stratified_lower_bound == old_lower_bound
                            || weight > self.stratified_lower_bound
                        {
                            self.stratified_lower_bound = weight;
                        }
                    }
                }

                let solution: Vec<bool> = (0..problem_state.num_variables())
                    .map(|v| {
                        self.solver.value_lit(Lit::positive(Var::from_index(v)))
                            == Value::True
                    })
                    .collect();
                learned_info.solution = Some(solution);
                if self.stratified_lower_bound < old_lower_bound {
                    self.assumptions_already_added = false;
                    return OptimizerStatus::SolutionFound;
                }
                return OptimizerStatus::OptimalSolutionFound;
            }

            // The interesting case: we have a core.
            let mut core = self.solver.last_incompatible_decisions();
            minimize_core(&mut self.solver, &mut core);
            debug!("core of size {}", core.len());

            // The minimum weight over the implicated nodes; the core
            // follows the assumption order, which is the node order.
            let mut min_weight = COEFFICIENT_MAX;
            {
                let mut index = 0;
                for &core_literal in &core {
                    while index < self.nodes.len()
                        && !self.repository.node(self.nodes[index]).literal(0) != core_literal
                    {
                        index += 1;
                    }
                    assert!(index < self.nodes.len(), "core literal matches no assumption");
                    min_weight = min_weight.min(self.repository.node(self.nodes[index]).weight());
                }
            }
            self.solver.backtrack_to_root_level();
            self.assumptions_already_added = false;

            if core.len() == 1 {
                // The single implicated node just grows one level; its
                // first output (and position in the list) is unchanged.
                for k in 0..self.nodes.len() {
                    let id = self.nodes[k];
                    if !self.repository.node(id).literal(0) == core[0] {
                        self.repository.increase_node_size(id, &mut self.solver);
                        break;
                    }
                }
            } else {
                // Split the implicated weight off each core node, merge
                // them into a fresh node of weight `min_weight`, and
                // assert that at least one of the core terms is true.
                let mut to_merge = Vec::new();
                let mut new_node_index = 0;
                let mut index = 0;
                for &core_literal in &core {
                    while !self.repository.node(self.nodes[index]).literal(0) != core_literal {
                        assert!(index < self.nodes.len());
                        self.nodes[new_node_index] = self.nodes[index];
                        new_node_index += 1;
                        index += 1;
                    }
                    to_merge.push(self.nodes[index]);
                    if self.repository.node(self.nodes[index]).weight() > min_weight {
                        let new_weight =
                            self.repository.node(self.nodes[index]).weight() - min_weight;
                        self.repository.node_mut(self.nodes[index]).set_weight(new_weight);
                        self.nodes[new_node_index] = self.nodes[index];
                        new_node_index += 1;
                    }
                    index += 1;
                }
                while index < self.nodes.len() {
                    self.nodes[new_node_index] = self.nodes[index];
                    new_node_index += 1;
                    index += 1;
                }
                self.nodes.truncate(new_node_index);

                let merged = self
                    .repository
                    .lazy_merge_all_with_pq(&to_merge, &mut self.solver);
                self.repository.increase_node_size(merged, &mut self.solver);
                self.repository.node_mut(merged).set_weight(min_weight);
                let ok = self
                    .solver
                    .add_unit_clause(self.repository.node(merged).literal(0));
                assert!(ok, "asserting a core relaxation cannot conflict");
                self.nodes.push(merged);
            }
        }
        OptimizerStatus::Continue
    }
}

/// Try to shrink an unsatisfiable core with one re-solve under the
/// reversed assumptions. The surviving literals keep their original
/// order, which downstream processing relies on.
pub fn minimize_core<S: SolverInterface>(solver: &mut S, core: &mut Vec<Lit>) {
    if core.len() <= 1 {
        return;
    }
    let mut reversed = core.clone();
    reversed.reverse();
    solver.backtrack_to_root_level();
    let status = solver.reset_and_solve_with_assumptions(&reversed);
    if status == SolveStatus::AssumptionsUnsat {
        let new_core = solver.last_incompatible_decisions();
        if new_core.len() < core.len() {
            let _old_size = core.len();
            let mut keep: DenseSet<Lit> = DenseSet::new();
            for &l in &new_core {
                keep.insert(l);
            }
            core.retain(|&l| keep.contains(l));
            debug!("minimized core {} -> {}", _old_size, core.len());
        }
    }
}
