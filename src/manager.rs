//! The goal manager: dynamic selection of search objectives.
//!
//! One flat struct composes the goal pool, the structural graph, the
//! dependency map, two branch-lookup layers (active and shadow), the triad
//! {uncovered, current, covered} and the archive. The predictive behavior
//! is state, not a subtype: buggy goals are live from the start, non-buggy
//! goals sit in the shadow structures until the one-shot trigger merges
//! them in through the four staged activators.
//!
//! Covered targets deliberately stay in `current`: the ranker rewards
//! offspring that keep covering already-covered goals, and removing them
//! would distort the preference fronts.

use std::collections::VecDeque;

use indexmap::{IndexMap, IndexSet};
use log::{debug, info};

use crate::archive::Archive;
use crate::cfg::{CallGraph, ControlFlowModel};
use crate::config::{Criterion, SearchConfig};
use crate::dependencies;
use crate::exceptions::{ExceptionKey, ExceptionRegistry};
use crate::execution::{Chromosome, Individual, TestExecutor};
use crate::goals::{Goal, GoalPool, TargetId, TargetKind};
use crate::graph::StructuralGraph;

/// Branch lookup tables of one layer (live or shadow).
#[derive(Debug, Default)]
pub struct BranchLookup {
    pub true_branches: IndexMap<i32, TargetId>,
    pub false_branches: IndexMap<i32, TargetId>,
    pub branchless_methods: IndexMap<String, TargetId>,
}

impl BranchLookup {
    fn merge_from(&mut self, other: &BranchLookup) {
        self.true_branches
            .extend(other.true_branches.iter().map(|(k, v)| (*k, *v)));
        self.false_branches
            .extend(other.false_branches.iter().map(|(k, v)| (*k, *v)));
        self.branchless_methods
            .extend(other.branchless_methods.iter().map(|(k, v)| (k.clone(), *v)));
    }
}

#[derive(Debug)]
pub struct GoalManager<C: Chromosome> {
    pool: GoalPool<C>,
    graph: StructuralGraph,
    dependencies: IndexMap<TargetId, IndexSet<TargetId>>,
    active: BranchLookup,
    shadow: BranchLookup,

    uncovered: IndexSet<TargetId>,
    current: IndexSet<TargetId>,
    covered: IndexMap<TargetId, C>,

    non_buggy_goals: IndexSet<TargetId>,
    methods: IndexSet<TargetId>,
    non_buggy_methods: IndexSet<TargetId>,

    archive: Archive<C>,
    criteria: IndexSet<Criterion>,
}

impl<C: Chromosome> GoalManager<C> {
    /// Builds the manager: partitions the goals by buggy flag, derives the
    /// structural graph and the dependency map, fills both lookup layers
    /// and seeds `current` with the buggy root branches.
    pub fn new(
        mut pool: GoalPool<C>,
        model: &ControlFlowModel,
        call_graph: Option<&CallGraph>,
        config: &SearchConfig,
    ) -> Self {
        let mut uncovered = IndexSet::new();
        let mut non_buggy_goals = IndexSet::new();
        let mut methods = IndexSet::new();
        let mut non_buggy_methods = IndexSet::new();
        let mut active = BranchLookup::default();
        let mut shadow = BranchLookup::default();

        for goal in pool.iter() {
            let id = goal.id();
            match goal.kind() {
                TargetKind::Branch | TargetKind::BranchlessMethod => {
                    if goal.is_buggy() {
                        uncovered.insert(id);
                    } else {
                        non_buggy_goals.insert(id);
                    }
                }
                TargetKind::Method => {
                    if goal.is_buggy() {
                        uncovered.insert(id);
                        methods.insert(id);
                    } else {
                        non_buggy_goals.insert(id);
                        non_buggy_methods.insert(id);
                    }
                }
                _ => {
                    uncovered.insert(id);
                }
            }
        }

        info!("total number of buggy goals: {}", uncovered.len());
        info!("total number of non-buggy goals: {}", non_buggy_goals.len());

        for goal in pool.iter() {
            if !goal.is_branch_kind() {
                continue;
            }
            let layer = if goal.is_buggy() {
                &mut active
            } else {
                &mut shadow
            };
            match goal.branch_info() {
                None => {
                    layer.branchless_methods.insert(goal.method_key(), goal.id());
                }
                Some(info) => {
                    if info.instrumented {
                        continue;
                    }
                    if info.expression_value {
                        layer.true_branches.insert(info.branch_id, goal.id());
                    } else {
                        layer.false_branches.insert(info.branch_id, goal.id());
                    }
                }
            }
        }

        let graph = StructuralGraph::build(&pool, model);
        let augmentation =
            dependencies::augment(&mut pool, &graph, call_graph, &config.criteria);
        for added in &augmentation.added {
            uncovered.insert(*added);
        }

        let mut current = IndexSet::new();
        for root in graph.roots() {
            if pool.get(*root).is_buggy() {
                current.insert(*root);
            }
        }

        GoalManager {
            pool,
            graph,
            dependencies: augmentation.dependencies,
            active,
            shadow,
            uncovered,
            current,
            covered: IndexMap::new(),
            non_buggy_goals,
            methods,
            non_buggy_methods,
            archive: Archive::new(config.max_archive_statements),
            criteria: config.criteria.clone(),
        }
    }

    /// Seeds Exception goals from the keys a previous search discovered.
    pub fn seed_exceptions(&mut self, registry: &ExceptionRegistry) {
        for key in registry.iter() {
            if self.pool.exception_target(key).is_none() {
                let id = self.pool.add(Goal::exception(key.clone()));
                self.uncovered.insert(id);
            }
        }
    }

    /// Membership test against whichever side of the covered/uncovered
    /// split is cheaper to probe.
    pub fn is_already_covered(&self, target: TargetId) -> bool {
        if self.uncovered.len() < self.covered.len() {
            !self.uncovered.contains(&target)
        } else {
            self.covered.contains_key(&target)
        }
    }

    /// Records a target as covered by a test, keeping the smallest covering
    /// test with more than one statement and archiving the test itself.
    /// Refused outright when the archive statement budget would overflow.
    fn update_covered_goals(&mut self, target: TargetId, test: &C) {
        if !self.archive.contains(test) && !self.archive.try_admit(test) {
            return;
        }

        match self.covered.get(&target).map(|best| best.size()) {
            None => {
                self.covered.insert(target, test.clone());
                self.uncovered.shift_remove(&target);
                // Covered goals stay in `current` on purpose.
            }
            Some(best_size) => {
                let size = test.size();
                if size < best_size && size > 1 {
                    // The previous best remains archived; only the pointer
                    // moves.
                    self.covered.insert(target, test.clone());
                }
            }
        }

        self.archive.record(test, target);
    }

    /// Executes a candidate and updates covered goals, the archive and the
    /// set of current objectives from its coverage trace.
    ///
    /// The work-list descends the structural graph lazily: children and
    /// dependents of a branch become objectives only once the branch itself
    /// is covered. The trace fast path afterwards archives targets covered
    /// along the execution path whose parents left `current` long ago.
    pub fn calculate_fitness<E: TestExecutor<C>>(
        &mut self,
        individual: &mut Individual<C>,
        executor: &mut E,
        registry: &mut ExceptionRegistry,
    ) {
        let result = executor.execute(&individual.test);
        individual.last_result = Some(result.clone());

        if result.failed() {
            let current: Vec<TargetId> = self.current.iter().copied().collect();
            for target in current {
                individual.set_fitness(target, f64::INFINITY);
            }
            return;
        }

        let mut visited: IndexSet<TargetId> = IndexSet::with_capacity(self.uncovered.len() * 2);
        let mut visited_methods: IndexSet<TargetId> = IndexSet::new();
        let mut targets: VecDeque<TargetId> = self.current.iter().copied().collect();

        while let Some(target) = targets.pop_front() {
            if !visited.insert(target) {
                continue;
            }

            let distance = self.pool.get(target).distance(&individual.test, &result);
            individual.set_fitness(target, distance);

            if distance == 0.0 {
                if self.pool.get(target).kind() == TargetKind::Method {
                    visited_methods.insert(target);
                }
                self.update_covered_goals(target, &individual.test);
                if self.pool.get(target).is_branch_kind() {
                    for child in self.graph.children(target) {
                        targets.push_back(child);
                    }
                    if let Some(dependents) = self.dependencies.get(&target) {
                        for dependent in dependents {
                            targets.push_back(*dependent);
                        }
                    }
                }
            } else {
                // Still an open objective; a set re-insert keeps this safe
                // against the fast path below.
                self.current.insert(target);
            }
        }

        // Archive everything the trace proves covered, whether or not the
        // work-list ever reached it.
        let false_hits: Vec<TargetId> = result
            .trace
            .covered_false_branches
            .iter()
            .filter_map(|id| self.active.false_branches.get(id).copied())
            .collect();
        for target in false_hits {
            self.update_covered_goals(target, &individual.test);
        }
        let true_hits: Vec<TargetId> = result
            .trace
            .covered_true_branches
            .iter()
            .filter_map(|id| self.active.true_branches.get(id).copied())
            .collect();
        for target in true_hits {
            self.update_covered_goals(target, &individual.test);
        }
        let branchless_hits: Vec<TargetId> = result
            .trace
            .covered_branchless_methods
            .iter()
            .filter_map(|key| self.active.branchless_methods.get(key).copied())
            .collect();
        for target in branchless_hits {
            self.update_covered_goals(target, &individual.test);
        }

        if self.criteria.contains(&Criterion::Exception) {
            let thrown: Vec<ExceptionKey> = result
                .trace
                .exceptions
                .iter()
                .map(ExceptionKey::from_thrown)
                .collect();
            for key in thrown {
                let target = match self.pool.exception_target(&key) {
                    Some(existing) => existing,
                    None => self.pool.add(Goal::exception(key.clone())),
                };
                individual.set_fitness(target, 0.0);
                self.update_covered_goals(target, &individual.test);
                if registry.register(key.clone()) {
                    debug!("registered newly discovered exception goal {key}");
                }
            }
        }

        if self.criteria.contains(&Criterion::Method) {
            let methods: Vec<TargetId> = self.methods.iter().copied().collect();
            for method in methods {
                if visited_methods.contains(&method) {
                    continue;
                }
                let distance = self.pool.get(method).distance(&individual.test, &result);
                individual.set_fitness(method, distance);
                if distance == 0.0 {
                    self.update_covered_goals(method, &individual.test);
                }
            }
        }
    }

    /// Fills missing fitness entries for the current objectives from an
    /// individual's last execution, so goals that entered `current` after
    /// its evaluation still rank on real distances.
    pub fn ensure_current_fitness(&self, individual: &mut Individual<C>) {
        let result = match individual.last_result.clone() {
            Some(result) => result,
            None => return,
        };
        for target in &self.current {
            if individual.has_fitness(*target) {
                continue;
            }
            let distance = if result.failed() {
                f64::INFINITY
            } else {
                self.pool.get(*target).distance(&individual.test, &result)
            };
            individual.set_fitness(*target, distance);
        }
    }

    /// Path-balancing adjustment: for every branch id with both sides in
    /// the active tables, move `current` membership toward the side with
    /// fewer archived tests per independent path.
    pub fn adjust_current_goals(&mut self) {
        let pairs: Vec<(TargetId, TargetId)> = self
            .active
            .true_branches
            .iter()
            .filter_map(|(id, t)| self.active.false_branches.get(id).map(|f| (*t, *f)))
            .collect();

        for (true_side, false_side) in pairs {
            let tests_true = self.archive.num_tests(true_side);
            let tests_false = self.archive.num_tests(false_side);
            if tests_true == 0 && tests_false == 0 {
                continue;
            }

            let per_path_true =
                f64::from(tests_true) / self.graph.independent_paths(true_side) as f64;
            let per_path_false =
                f64::from(tests_false) / self.graph.independent_paths(false_side) as f64;

            if per_path_true > per_path_false {
                self.current.shift_remove(&true_side);
                self.current.insert(false_side);
            } else if per_path_true < per_path_false {
                self.current.shift_remove(&false_side);
                self.current.insert(true_side);
            }
        }
    }

    /// Adds every non-buggy root branch to the current objectives.
    pub fn activate_non_buggy_current_goals(&mut self) {
        let roots: Vec<TargetId> = self
            .graph
            .roots()
            .iter()
            .copied()
            .filter(|root| !self.pool.get(*root).is_buggy())
            .collect();
        for root in roots {
            self.current.insert(root);
        }
    }

    /// Promotes the hidden non-buggy partition into the uncovered set.
    pub fn activate_non_buggy_uncovered(&mut self) {
        let hidden: Vec<TargetId> = self.non_buggy_goals.iter().copied().collect();
        for goal in hidden {
            if !self.covered.contains_key(&goal) {
                self.uncovered.insert(goal);
            }
        }
    }

    /// Promotes the hidden non-buggy method goals.
    pub fn activate_non_buggy_methods(&mut self) {
        let hidden: Vec<TargetId> = self.non_buggy_methods.iter().copied().collect();
        for method in hidden {
            self.methods.insert(method);
        }
    }

    /// Merges the shadow branch tables into the live ones.
    pub fn activate_non_buggy_branch_maps(&mut self) {
        let shadow = std::mem::take(&mut self.shadow);
        self.active.merge_from(&shadow);
        self.shadow = shadow;
    }

    pub fn current_goals(&self) -> &IndexSet<TargetId> {
        &self.current
    }

    pub fn uncovered_goals(&self) -> &IndexSet<TargetId> {
        &self.uncovered
    }

    pub fn covered_goals(&self) -> &IndexMap<TargetId, C> {
        &self.covered
    }

    pub fn archive(&self) -> &Archive<C> {
        &self.archive
    }

    pub fn pool(&self) -> &GoalPool<C> {
        &self.pool
    }

    pub fn graph(&self) -> &StructuralGraph {
        &self.graph
    }

    pub fn num_tests(&self, target: TargetId) -> u32 {
        self.archive.num_tests(target)
    }

    pub fn num_paths(&self, target: TargetId) -> u64 {
        self.graph.independent_paths(target)
    }

    pub fn covered_count_of_kind(&self, kind: TargetKind) -> usize {
        self.covered
            .keys()
            .filter(|t| self.pool.get(**t).kind() == kind)
            .count()
    }

    pub fn uncovered_count_of_kind(&self, kind: TargetKind) -> usize {
        self.uncovered
            .iter()
            .filter(|t| self.pool.get(**t).kind() == kind)
            .count()
    }
}
