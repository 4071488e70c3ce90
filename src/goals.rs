//! Coverage targets and the goal pool.
//!
//! Every coverage obligation the search can pursue is a [`Goal`] stored in
//! an arena ([`GoalPool`]) and referenced everywhere else by its
//! [`TargetId`]. A goal couples identity (kind, class, method, branch
//! metadata, buggy flag) with an opaque distance function: `distance(test,
//! result)` is a non-negative real where zero means covered. The built-in
//! evaluators for branch, branchless-method, method and exception goals are
//! driven entirely by the execution trace; other criteria plug in their own
//! implementations.

use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::cfg::{ControlDependency, InstructionId};
use crate::exceptions::ExceptionKey;
use crate::execution::{Chromosome, ExecutionResult};

/// Arena index of a goal. Stable for the lifetime of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetId(pub u32);

/// The coverage criterion family a goal belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetKind {
    Branch,
    BranchlessMethod,
    Line,
    Statement,
    Method,
    MethodNoException,
    WeakMutation,
    StrongMutation,
    Input,
    Output,
    TryCatch,
    CBranch,
    Exception,
}

/// Branch-goal metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchInfo {
    pub branch_id: i32,
    pub expression_value: bool,
    /// Back-reference to the branch instruction, held by id.
    pub instruction: Option<InstructionId>,
    /// Synthetic branch added by instrumentation; excluded from the graph
    /// and the lookup tables.
    pub instrumented: bool,
}

/// Distance of a test case from a coverage target. Zero means covered;
/// implementations must not return negative values (the pool clamps
/// defensively).
pub trait Fitness<C: Chromosome> {
    fn distance(&self, test: &C, result: &ExecutionResult) -> f64;
}

impl<C: Chromosome, F> Fitness<C> for F
where
    F: Fn(&C, &ExecutionResult) -> f64,
{
    fn distance(&self, test: &C, result: &ExecutionResult) -> f64 {
        self(test, result)
    }
}

/// Trace-driven distance for one side of a branch.
pub struct BranchFitness {
    branch_id: i32,
    expression_value: bool,
}

impl<C: Chromosome> Fitness<C> for BranchFitness {
    fn distance(&self, _test: &C, result: &ExecutionResult) -> f64 {
        let covered = if self.expression_value {
            result.trace.covered_true_branches.contains(&self.branch_id)
        } else {
            result
                .trace
                .covered_false_branches
                .contains(&self.branch_id)
        };
        if covered {
            0.0
        } else {
            1.0
        }
    }
}

/// Covered when the enclosing branchless method was entered.
pub struct BranchlessMethodFitness {
    method_key: String,
}

impl<C: Chromosome> Fitness<C> for BranchlessMethodFitness {
    fn distance(&self, _test: &C, result: &ExecutionResult) -> f64 {
        if result
            .trace
            .covered_branchless_methods
            .contains(&self.method_key)
        {
            0.0
        } else {
            1.0
        }
    }
}

/// Covered when the method was entered: either its branchless entry shows
/// up in the trace or any of its branches was taken on either side.
pub struct MethodEntryFitness {
    method_key: String,
    branch_ids: Vec<i32>,
}

impl<C: Chromosome> Fitness<C> for MethodEntryFitness {
    fn distance(&self, _test: &C, result: &ExecutionResult) -> f64 {
        if result
            .trace
            .covered_branchless_methods
            .contains(&self.method_key)
        {
            return 0.0;
        }
        let entered = self.branch_ids.iter().any(|id| {
            result.trace.covered_true_branches.contains(id)
                || result.trace.covered_false_branches.contains(id)
        });
        if entered {
            0.0
        } else {
            1.0
        }
    }
}

/// Covered when the execution produced the matching exception.
pub struct ExceptionFitness {
    key: ExceptionKey,
}

impl<C: Chromosome> Fitness<C> for ExceptionFitness {
    fn distance(&self, _test: &C, result: &ExecutionResult) -> f64 {
        let thrown = result.trace.exceptions.iter().any(|e| {
            e.class_name == self.key.class_name
                && e.method_name == self.key.method_name
                && e.exception_type == self.key.exception_type
        });
        if thrown {
            0.0
        } else {
            1.0
        }
    }
}

/// One coverage obligation. Immutable after pool insertion apart from the
/// caches held elsewhere.
pub struct Goal<C: Chromosome> {
    id: TargetId,
    kind: TargetKind,
    buggy: bool,
    class_name: String,
    method_name: String,
    branch: Option<BranchInfo>,
    /// Innermost controlling branch of the instruction a non-branch goal
    /// resides at; `None` for branchless residence.
    control: Option<ControlDependency>,
    /// Calling-context tag of a context-sensitive branch copy.
    context: Option<String>,
    exception: Option<ExceptionKey>,
    evaluator: Arc<dyn Fitness<C>>,
}

impl<C: Chromosome> std::fmt::Debug for Goal<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Goal")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("buggy", &self.buggy)
            .field("class_name", &self.class_name)
            .field("method_name", &self.method_name)
            .field("branch", &self.branch)
            .field("context", &self.context)
            .finish()
    }
}

impl<C: Chromosome> Goal<C> {
    /// A goal with a custom distance function.
    pub fn new(
        kind: TargetKind,
        class_name: impl Into<String>,
        method_name: impl Into<String>,
        buggy: bool,
        evaluator: Arc<dyn Fitness<C>>,
    ) -> Self {
        Goal {
            id: TargetId(u32::MAX),
            kind,
            buggy,
            class_name: class_name.into(),
            method_name: method_name.into(),
            branch: None,
            control: None,
            context: None,
            exception: None,
            evaluator,
        }
    }

    /// One side of a branch, with the trace-driven evaluator.
    pub fn branch(
        branch_id: i32,
        expression_value: bool,
        class_name: impl Into<String>,
        method_name: impl Into<String>,
        buggy: bool,
    ) -> Self {
        let mut goal = Goal::new(
            TargetKind::Branch,
            class_name,
            method_name,
            buggy,
            Arc::new(BranchFitness {
                branch_id,
                expression_value,
            }),
        );
        goal.branch = Some(BranchInfo {
            branch_id,
            expression_value,
            instruction: None,
            instrumented: false,
        });
        goal
    }

    /// Entry goal of a method without any branch.
    pub fn branchless_method(
        class_name: impl Into<String>,
        method_name: impl Into<String>,
        buggy: bool,
    ) -> Self {
        let class_name = class_name.into();
        let method_name = method_name.into();
        let method_key = format!("{class_name}.{method_name}");
        Goal::new(
            TargetKind::BranchlessMethod,
            class_name,
            method_name,
            buggy,
            Arc::new(BranchlessMethodFitness { method_key }),
        )
    }

    /// Method-coverage goal; `branch_ids` are the branches residing in the
    /// method, used as entry evidence.
    pub fn method(
        class_name: impl Into<String>,
        method_name: impl Into<String>,
        buggy: bool,
        branch_ids: Vec<i32>,
    ) -> Self {
        let class_name = class_name.into();
        let method_name = method_name.into();
        let method_key = format!("{class_name}.{method_name}");
        Goal::new(
            TargetKind::Method,
            class_name,
            method_name,
            buggy,
            Arc::new(MethodEntryFitness {
                method_key,
                branch_ids,
            }),
        )
    }

    /// Exception-coverage goal for a discovered exception key.
    pub fn exception(key: ExceptionKey) -> Self {
        let mut goal = Goal::new(
            TargetKind::Exception,
            key.class_name.clone(),
            key.method_name.clone(),
            false,
            Arc::new(ExceptionFitness { key: key.clone() }),
        );
        goal.exception = Some(key);
        goal
    }

    pub fn with_instruction(mut self, instruction: InstructionId) -> Self {
        if let Some(branch) = self.branch.as_mut() {
            branch.instruction = Some(instruction);
        }
        self
    }

    pub fn instrumented(mut self) -> Self {
        if let Some(branch) = self.branch.as_mut() {
            branch.instrumented = true;
        }
        self
    }

    pub fn with_control(mut self, control: ControlDependency) -> Self {
        self.control = Some(control);
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_kind(mut self, kind: TargetKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn id(&self) -> TargetId {
        self.id
    }

    pub fn kind(&self) -> TargetKind {
        self.kind
    }

    pub fn is_buggy(&self) -> bool {
        self.buggy
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    /// `"class.method"` key used by the branchless-method tables and the
    /// defect-score lookup.
    pub fn method_key(&self) -> String {
        format!("{}.{}", self.class_name, self.method_name)
    }

    pub fn branch_info(&self) -> Option<&BranchInfo> {
        self.branch.as_ref()
    }

    pub fn control(&self) -> Option<ControlDependency> {
        self.control
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    pub fn exception_key(&self) -> Option<&ExceptionKey> {
        self.exception.as_ref()
    }

    /// True for the kinds that participate in the structural graph and the
    /// branch lookup tables.
    pub fn is_branch_kind(&self) -> bool {
        matches!(self.kind, TargetKind::Branch | TargetKind::BranchlessMethod)
    }

    pub fn distance(&self, test: &C, result: &ExecutionResult) -> f64 {
        self.evaluator.distance(test, result).max(0.0)
    }

    fn share_evaluator(&self) -> Arc<dyn Fitness<C>> {
        Arc::clone(&self.evaluator)
    }

    /// Context-sensitive copy of this goal, sharing the evaluator.
    pub fn context_copy(&self, context: impl Into<String>) -> Goal<C> {
        Goal {
            id: TargetId(u32::MAX),
            kind: TargetKind::CBranch,
            buggy: self.buggy,
            class_name: self.class_name.clone(),
            method_name: self.method_name.clone(),
            branch: self.branch.clone(),
            control: self.control,
            context: Some(context.into()),
            exception: self.exception.clone(),
            evaluator: self.share_evaluator(),
        }
    }
}

/// Arena of all known goals plus the global lookup indices the graph
/// builder and the trace fast path resolve against.
pub struct GoalPool<C: Chromosome> {
    goals: Vec<Goal<C>>,
    branch_index: IndexMap<(i32, bool), TargetId>,
    branchless_index: IndexMap<String, TargetId>,
    exception_index: IndexMap<ExceptionKey, TargetId>,
}

impl<C: Chromosome> std::fmt::Debug for GoalPool<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoalPool")
            .field("goals", &self.goals.len())
            .finish()
    }
}

impl<C: Chromosome> Default for GoalPool<C> {
    fn default() -> Self {
        GoalPool {
            goals: Vec::new(),
            branch_index: IndexMap::new(),
            branchless_index: IndexMap::new(),
            exception_index: IndexMap::new(),
        }
    }
}

impl<C: Chromosome> GoalPool<C> {
    pub fn new() -> Self {
        GoalPool::default()
    }

    pub fn add(&mut self, mut goal: Goal<C>) -> TargetId {
        let id = TargetId(self.goals.len() as u32);
        goal.id = id;
        match goal.kind {
            TargetKind::Branch => {
                if let Some(info) = goal.branch.as_ref() {
                    if !info.instrumented {
                        self.branch_index
                            .insert((info.branch_id, info.expression_value), id);
                    }
                }
            }
            TargetKind::BranchlessMethod => {
                self.branchless_index.insert(goal.method_key(), id);
            }
            TargetKind::Exception => {
                if let Some(key) = goal.exception.clone() {
                    self.exception_index.insert(key, id);
                }
            }
            _ => {}
        }
        self.goals.push(goal);
        id
    }

    pub fn get(&self, id: TargetId) -> &Goal<C> {
        &self.goals[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.goals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.goals.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = TargetId> + '_ {
        (0..self.goals.len()).map(|i| TargetId(i as u32))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Goal<C>> {
        self.goals.iter()
    }

    pub fn ids_of_kind(&self, kind: TargetKind) -> Vec<TargetId> {
        self.goals
            .iter()
            .filter(|g| g.kind == kind)
            .map(|g| g.id)
            .collect()
    }

    /// Resolves one side of a branch to its goal, instrumented branches
    /// excluded.
    pub fn branch_target(&self, branch_id: i32, expression_value: bool) -> Option<TargetId> {
        self.branch_index
            .get(&(branch_id, expression_value))
            .copied()
    }

    pub fn branchless_target(&self, method_key: &str) -> Option<TargetId> {
        self.branchless_index.get(method_key).copied()
    }

    pub fn exception_target(&self, key: &ExceptionKey) -> Option<TargetId> {
        self.exception_index.get(key).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::ExecutionTrace;

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    struct Tc(u32);

    impl Chromosome for Tc {
        fn size(&self) -> u32 {
            self.0
        }
    }

    fn trace(true_ids: &[i32], false_ids: &[i32], branchless: &[&str]) -> ExecutionResult {
        ExecutionResult {
            timeout: false,
            error: false,
            trace: ExecutionTrace {
                covered_true_branches: true_ids.iter().copied().collect(),
                covered_false_branches: false_ids.iter().copied().collect(),
                covered_branchless_methods: branchless.iter().map(|s| s.to_string()).collect(),
                exceptions: Vec::new(),
            },
        }
    }

    #[test]
    fn test_branch_fitness_matches_expression_value() {
        let mut pool: GoalPool<Tc> = GoalPool::new();
        let t = pool.add(Goal::branch(7, true, "com.example.Stack", "push(I)V", true));
        let f = pool.add(Goal::branch(7, false, "com.example.Stack", "push(I)V", true));

        let result = trace(&[7], &[], &[]);
        assert_eq!(pool.get(t).distance(&Tc(2), &result), 0.0);
        assert_eq!(pool.get(f).distance(&Tc(2), &result), 1.0);
    }

    #[test]
    fn test_branch_index_skips_instrumented_branches() {
        let mut pool: GoalPool<Tc> = GoalPool::new();
        pool.add(Goal::branch(9, true, "com.example.Stack", "push(I)V", false).instrumented());
        assert_eq!(pool.branch_target(9, true), None);
    }

    #[test]
    fn test_branchless_method_lookup() {
        let mut pool: GoalPool<Tc> = GoalPool::new();
        let id = pool.add(Goal::branchless_method("com.example.Stack", "clear()V", false));
        assert_eq!(
            pool.branchless_target("com.example.Stack.clear()V"),
            Some(id)
        );

        let result = trace(&[], &[], &["com.example.Stack.clear()V"]);
        assert_eq!(pool.get(id).distance(&Tc(1), &result), 0.0);
    }

    #[test]
    fn test_method_entry_fitness_accepts_branch_evidence() {
        let mut pool: GoalPool<Tc> = GoalPool::new();
        let id = pool.add(Goal::method(
            "com.example.Stack",
            "push(I)V",
            true,
            vec![7, 8],
        ));
        assert_eq!(pool.get(id).distance(&Tc(1), &trace(&[], &[8], &[])), 0.0);
        assert_eq!(pool.get(id).distance(&Tc(1), &trace(&[], &[], &[])), 1.0);
    }

    #[test]
    fn test_closure_fitness_is_clamped_non_negative() {
        let mut pool: GoalPool<Tc> = GoalPool::new();
        let id = pool.add(Goal::new(
            TargetKind::Line,
            "com.example.Stack",
            "push(I)V",
            false,
            Arc::new(|_: &Tc, _: &ExecutionResult| -3.5),
        ));
        assert_eq!(pool.get(id).distance(&Tc(1), &trace(&[], &[], &[])), 0.0);
    }

    #[test]
    fn test_context_copy_shares_identity_but_tags_context() {
        let mut pool: GoalPool<Tc> = GoalPool::new();
        let base = Goal::branch(3, true, "com.example.Stack", "push(I)V", true);
        let base_id = pool.add(base);
        let copy = pool.get(base_id).context_copy("Main.run->Stack.push");
        let copy_id = pool.add(copy);

        let copy = pool.get(copy_id);
        assert_eq!(copy.kind(), TargetKind::CBranch);
        assert_eq!(copy.context(), Some("Main.run->Stack.push"));
        assert_eq!(copy.branch_info().unwrap().branch_id, 3);
        // The context copy does not displace the base goal in the index.
        assert_eq!(pool.branch_target(3, true), Some(base_id));
    }
}
