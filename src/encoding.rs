//! Lazy totalizer-style encoding nodes for the core-guided optimizer.
//!
//! A node stands for the number of satisfied objective literals below it.
//! Its output literals are one-directional counters: `literal(k)` is
//! implied whenever the sum reaches `lb + k + 1`, so asserting
//! `!literal(0)` forces the sum down to `lb`. Outputs are materialized
//! one at a time, only when a core asks for them; merging two nodes
//! allocates a parent in the repository and links children by index, so
//! no ownership cycles ever arise.

use crate::clause::{Lit, Value};
use crate::dense::DenseIndex;
use crate::interface::SolverInterface;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Objective weights and bounds.
pub type Coefficient = i64;

/// Stand-in for an infinite bound.
pub const COEFFICIENT_MAX: Coefficient = i64::MAX;

/// Index of a node in its [`NodeRepository`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct NodeId(u32);

impl DenseIndex for NodeId {
    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone)]
pub struct EncodingNode {
    /// Materialized outputs; `literals[k]` certifies `sum >= lb + k + 1`.
    literals: Vec<Lit>,
    /// Number of inputs below this node proven true at the root level.
    lb: i64,
    /// Largest value the sum can still take (shrinks when outputs are
    /// forced false by an upper bound).
    max_sum: i64,
    weight: Coefficient,
    depth: u32,
    child_a: Option<NodeId>,
    child_b: Option<NodeId>,
}

impl EncodingNode {
    pub fn size(&self) -> usize {
        self.literals.len()
    }
    pub fn literal(&self, i: usize) -> Lit {
        self.literals[i]
    }
    pub fn weight(&self) -> Coefficient {
        self.weight
    }
    pub fn set_weight(&mut self, weight: Coefficient) {
        debug_assert!(weight >= 0);
        self.weight = weight;
    }
    pub fn depth(&self) -> u32 {
        self.depth
    }
    fn is_leaf(&self) -> bool {
        self.child_a.is_none()
    }
    /// Largest sum the materialized outputs can certify.
    fn current_ub(&self) -> i64 {
        self.lb + self.literals.len() as i64
    }
    /// Output literal certifying `sum >= k`; requires `lb < k <= current_ub`.
    fn at_least_literal(&self, k: i64) -> Lit {
        debug_assert!(k > self.lb && k <= self.current_ub());
        self.literals[(k - self.lb - 1) as usize]
    }
}

/// Arena owning every encoding node; nodes reference each other through
/// [`NodeId`]s into it.
#[derive(Debug, Default)]
pub struct NodeRepository {
    nodes: Vec<EncodingNode>,
}

impl NodeRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&self, id: NodeId) -> &EncodingNode {
        &self.nodes[id.index()]
    }
    pub fn node_mut(&mut self, id: NodeId) -> &mut EncodingNode {
        &mut self.nodes[id.index()]
    }

    /// A node over a single objective literal.
    pub fn create_leaf(&mut self, literal: Lit, weight: Coefficient) -> NodeId {
        debug_assert!(weight > 0);
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(EncodingNode {
            literals: vec![literal],
            lb: 0,
            max_sum: 1,
            weight,
            depth: 0,
            child_a: None,
            child_b: None,
        });
        id
    }

    /// Absorb outputs the solver has fixed true at the root level; each
    /// one raises the proven lower bound of the node by one. Returns how
    /// many were absorbed.
    pub fn reduce<S: SolverInterface>(&mut self, id: NodeId, solver: &S) -> i64 {
        let node = &mut self.nodes[id.index()];
        let mut i = 0;
        while i < node.literals.len() && solver.value_lvl_0(node.literals[i]) == Value::True {
            i += 1;
        }
        node.literals.drain(..i);
        node.lb += i as i64;
        i as i64
    }

    /// Forbid more than `upper_bound` further satisfied inputs: outputs
    /// from position `upper_bound` on are asserted false and dropped.
    pub fn apply_upper_bound<S: SolverInterface>(
        &mut self,
        id: NodeId,
        upper_bound: i64,
        solver: &mut S,
    ) {
        let node = &mut self.nodes[id.index()];
        let keep = upper_bound.max(0) as usize;
        if node.literals.len() <= keep {
            return;
        }
        for &l in &node.literals[keep..] {
            solver.add_unit_clause(!l);
        }
        node.literals.truncate(keep);
        node.max_sum = node.lb + keep as i64;
    }

    /// Materialize one more output of a merged node (a no-op on leaves
    /// and on nodes whose whole range is already covered). Children are
    /// grown on demand so every new implication has its premises.
    pub fn increase_node_size<S: SolverInterface>(&mut self, id: NodeId, solver: &mut S) -> bool {
        let target = {
            let node = self.node(id);
            if node.is_leaf() || node.current_ub() >= node.max_sum {
                return false;
            }
            node.current_ub() + 1
        };
        let o = Lit::new(solver.new_var(), true);
        {
            let node = self.node_mut(id);
            // counting outputs are monotone
            if let Some(&prev) = node.literals.last() {
                solver.add_binary_clause(!o, prev);
            }
            node.literals.push(o);
        }
        self.add_child_implications(id, target, o, solver);
        true
    }

    /// For every split `i + j == count` of the target sum between the two
    /// children, add `a >= i && b >= j => o`. A side whose requirement is
    /// already proven contributes no premise.
    fn add_child_implications<S: SolverInterface>(
        &mut self,
        id: NodeId,
        count: i64,
        o: Lit,
        solver: &mut S,
    ) {
        let a = self.node(id).child_a.expect("internal node");
        let b = self.node(id).child_b.expect("internal node");

        if count <= self.node(a).lb + self.node(b).lb {
            // both sides together already prove the target
            solver.add_unit_clause(o);
            return;
        }
        let i_min = std::cmp::max(self.node(a).lb, count - self.node(b).max_sum);
        let i_max = std::cmp::min(self.node(a).max_sum, count - self.node(b).lb);
        debug_assert!(i_min <= i_max);

        let mut clause = Vec::with_capacity(3);
        for i in i_min..=i_max {
            let j = count - i;
            clause.clear();
            if i > self.node(a).lb {
                self.ensure_output_for(a, i, solver);
                clause.push(!self.node(a).at_least_literal(i));
            }
            if j > self.node(b).lb {
                self.ensure_output_for(b, j, solver);
                clause.push(!self.node(b).at_least_literal(j));
            }
            clause.push(o);
            solver.add_clause(&clause);
        }
    }

    fn ensure_output_for<S: SolverInterface>(&mut self, id: NodeId, k: i64, solver: &mut S) {
        debug_assert!(k <= self.node(id).max_sum);
        while self.node(id).current_ub() < k {
            let grown = self.increase_node_size(id, solver);
            debug_assert!(grown);
            if !grown {
                break;
            }
        }
    }

    /// Merge two nodes into a fresh parent with a single output.
    pub fn lazy_merge<S: SolverInterface>(
        &mut self,
        a: NodeId,
        b: NodeId,
        solver: &mut S,
    ) -> NodeId {
        debug_assert_ne!(a, b);
        let lb = self.node(a).lb + self.node(b).lb;
        let max_sum = self.node(a).max_sum + self.node(b).max_sum;
        let depth = 1 + self.node(a).depth.max(self.node(b).depth);
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(EncodingNode {
            literals: Vec::new(),
            lb,
            max_sum,
            weight: 0,
            depth,
            child_a: Some(a),
            child_b: Some(b),
        });
        let grown = self.increase_node_size(id, solver);
        debug_assert!(grown);
        id
    }

    /// Merge all of `nodes` into one combining tree, shallowest nodes
    /// first so the tree stays balanced. Deterministic: ties are broken
    /// on the node index.
    pub fn lazy_merge_all_with_pq<S: SolverInterface>(
        &mut self,
        nodes: &[NodeId],
        solver: &mut S,
    ) -> NodeId {
        debug_assert!(!nodes.is_empty());
        let mut pq: BinaryHeap<Reverse<(u32, NodeId)>> = nodes
            .iter()
            .map(|&id| Reverse((self.node(id).depth, id)))
            .collect();
        while pq.len() > 1 {
            let Reverse((_, a)) = pq.pop().expect("merge queue is empty");
            let Reverse((_, b)) = pq.pop().expect("merge queue is empty");
            let parent = self.lazy_merge(a, b, solver);
            pq.push(Reverse((self.node(parent).depth, parent)));
        }
        let Reverse((_, root)) = pq.pop().expect("merge queue is empty");
        root
    }
}

/// One leaf per objective term. Negative coefficients are normalized by
/// flipping the literal; the returned offset keeps the two cost scales
/// aligned (`node-space sum == cost + offset`).
pub fn create_initial_encoding_nodes(
    literals: &[Lit],
    coefficients: &[Coefficient],
    repository: &mut NodeRepository,
) -> (Vec<NodeId>, Coefficient) {
    debug_assert_eq!(literals.len(), coefficients.len());
    let mut offset: Coefficient = 0;
    let mut nodes = Vec::new();
    for (&l, &coeff) in literals.iter().zip(coefficients.iter()) {
        if coeff == 0 {
            continue;
        }
        if coeff > 0 {
            nodes.push(repository.create_leaf(l, coeff));
        } else {
            offset += -coeff;
            nodes.push(repository.create_leaf(!l, -coeff));
        }
    }
    (nodes, offset)
}
