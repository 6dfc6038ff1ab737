//! CNF presolving and core-guided boolean optimization.
//!
//! The presolver shrinks a CNF formula with subsumption, self-subsuming
//! resolution, bounded variable elimination and blocked-clause removal,
//! while the postsolver records enough information to turn any model of
//! the reduced formula back into a model of the original one. On top of
//! the reduced problem, [`SatCoreBasedOptimizer`] minimizes a weighted
//! sum of literals by assumption-based solving and lazy relaxation of
//! unsatisfiable cores. The CDCL engine itself is external and only seen
//! through the [`SolverInterface`] trait.

//======== LOG ============

// stubs when logging is not enabled
#[cfg(not(feature = "logging"))]
#[macro_use]
pub(crate) mod log {
    macro_rules! trace {
        ($( $x:expr ),*) => {};
    }
    macro_rules! debug {
        ($( $x:expr ),*) => {};
    }
    macro_rules! info {
        ($( $x:expr ),*) => {};
    }
}

#[cfg(feature = "logging")]
#[macro_use]
pub extern crate log;

//======== PUBLIC INTERFACE ============

pub mod clause;
pub mod dense;
pub mod encoding;
pub mod interface;
pub mod optimizer;
pub mod params;
pub mod postsolve;
pub mod presolve;
pub mod probing;
pub mod resolution;
pub mod scc;
pub(crate) mod varqueue;

#[cfg(test)]
pub(crate) mod test_utils;

pub use crate::{
    clause::{Assignment, Lit, LitMap, Value, Var, VarMap},
    dense::{DenseIndex, DenseMap, DenseSet},
    encoding::{Coefficient, EncodingNode, NodeId, NodeRepository},
    interface::{SolveStatus, SolverInterface, TimeLimit},
    optimizer::{
        LearnedInfo, LinearObjective, OptimizerStatus, ProblemState, SatCoreBasedOptimizer,
    },
    params::Params,
    postsolve::SatPostsolver,
    presolve::SatPresolver,
    probing::probe_and_find_equivalent_literals,
};
