//! Execution boundary: the chromosome contract, execution results and the
//! per-individual search state.
//!
//! The search never runs a test itself. It hands a candidate to a
//! [`TestExecutor`] and reads back an [`ExecutionResult`] carrying the
//! coverage trace; everything the goal manager does afterwards is driven by
//! that trace and by the per-goal distance functions.

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use crate::goals::TargetId;

/// A candidate test case. The engine only needs cloning, hashing (archive
/// keys) and the statement count used by the archive budget and the
/// shortest-test retention rule.
pub trait Chromosome: Clone + Eq + std::hash::Hash {
    /// Number of executable statements in this test.
    fn size(&self) -> u32;
}

/// An exception observed during a test run, keyed by where it was thrown
/// and what was thrown.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThrownException {
    pub class_name: String,
    pub method_name: String,
    pub exception_type: String,
}

/// Coverage trace of a single execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionTrace {
    pub covered_true_branches: IndexSet<i32>,
    pub covered_false_branches: IndexSet<i32>,
    pub covered_branchless_methods: IndexSet<String>,
    pub exceptions: Vec<ThrownException>,
}

/// Outcome of running one test case.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// The run hit the wall-clock timeout of the sandbox.
    pub timeout: bool,
    /// The test harness itself failed (not an exception thrown by the code
    /// under test).
    pub error: bool,
    pub trace: ExecutionTrace,
}

impl ExecutionResult {
    /// A failed run carries no usable coverage evidence.
    pub fn failed(&self) -> bool {
        self.timeout || self.error
    }
}

/// External test sandbox. May spawn its own worker under a timeout; the
/// result is serialized back before the goal manager mutates any state.
pub trait TestExecutor<C: Chromosome> {
    fn execute(&mut self, test: &C) -> ExecutionResult;
}

/// A population member: the test case plus the search bookkeeping attached
/// to it (last execution, cached per-goal distances, rank and crowding).
#[derive(Debug, Clone)]
pub struct Individual<C: Chromosome> {
    pub test: C,
    pub last_result: Option<ExecutionResult>,
    fitness: IndexMap<TargetId, f64>,
    pub rank: usize,
    pub crowding_distance: f64,
}

impl<C: Chromosome> Individual<C> {
    pub fn new(test: C) -> Self {
        Individual {
            test,
            last_result: None,
            fitness: IndexMap::new(),
            rank: 0,
            crowding_distance: 0.0,
        }
    }

    /// Cached distance for a goal. Goals this individual was never evaluated
    /// against count as maximally distant.
    pub fn fitness_of(&self, target: TargetId) -> f64 {
        self.fitness.get(&target).copied().unwrap_or(f64::INFINITY)
    }

    pub fn set_fitness(&mut self, target: TargetId, value: f64) {
        self.fitness.insert(target, value);
    }

    pub fn has_fitness(&self, target: TargetId) -> bool {
        self.fitness.contains_key(&target)
    }

    pub fn covers(&self, target: TargetId) -> bool {
        self.fitness_of(target) == 0.0
    }
}
