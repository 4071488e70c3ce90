//! Per-criterion dependency augmentation.
//!
//! Non-branch targets do not live in the structural graph; they hang off
//! the branch that controls the instruction they cover, or off the
//! enclosing method's branchless entry when nothing controls it. The
//! resulting map is what lets `calculate_fitness` surface a line, mutation
//! or method goal the moment its gating branch is covered. Exception
//! coverage is deliberately absent here; it is derived from execution
//! results instead.

use indexmap::{IndexMap, IndexSet};
use log::warn;

use crate::cfg::CallGraph;
use crate::config::Criterion;
use crate::execution::Chromosome;
use crate::goals::{GoalPool, TargetId, TargetKind};
use crate::graph::StructuralGraph;

/// Output of the augmentation pass: the dependency map plus any goals the
/// pass itself created (context-sensitive branch copies).
#[derive(Debug, Default)]
pub struct Augmentation {
    pub dependencies: IndexMap<TargetId, IndexSet<TargetId>>,
    pub added: Vec<TargetId>,
}

impl Augmentation {
    fn attach(&mut self, anchor: TargetId, dependent: TargetId) {
        self.dependencies.entry(anchor).or_default().insert(dependent);
    }
}

/// Wires every enabled criterion's targets into the dependency map.
pub fn augment<C: Chromosome>(
    pool: &mut GoalPool<C>,
    graph: &StructuralGraph,
    call_graph: Option<&CallGraph>,
    criteria: &IndexSet<Criterion>,
) -> Augmentation {
    let mut augmentation = Augmentation::default();
    for criterion in criteria {
        match criterion {
            // Branches are the graph itself; exceptions are derived from
            // execution results.
            Criterion::Branch | Criterion::Exception => {}
            Criterion::Line => attach_by_control(pool, TargetKind::Line, &mut augmentation),
            Criterion::Statement => {
                attach_by_control(pool, TargetKind::Statement, &mut augmentation)
            }
            Criterion::WeakMutation => {
                attach_by_control(pool, TargetKind::WeakMutation, &mut augmentation)
            }
            Criterion::StrongMutation => {
                attach_by_control(pool, TargetKind::StrongMutation, &mut augmentation)
            }
            Criterion::Input => attach_by_control(pool, TargetKind::Input, &mut augmentation),
            Criterion::Output => attach_by_control(pool, TargetKind::Output, &mut augmentation),
            Criterion::TryCatch => {
                attach_by_control(pool, TargetKind::TryCatch, &mut augmentation)
            }
            Criterion::Method => {
                attach_at_method_entry(pool, graph, TargetKind::Method, &mut augmentation)
            }
            Criterion::MethodNoException => attach_at_method_entry(
                pool,
                graph,
                TargetKind::MethodNoException,
                &mut augmentation,
            ),
            Criterion::CBranch => expand_cbranches(pool, call_graph, &mut augmentation),
        }
    }
    augmentation
}

/// Resolves the anchor of a goal: its innermost controlling branch, or the
/// branchless entry of its method.
fn anchor_of<C: Chromosome>(pool: &GoalPool<C>, target: TargetId) -> Option<TargetId> {
    let goal = pool.get(target);
    match goal.control() {
        Some(cd) => pool.branch_target(cd.branch_id, cd.expression_value),
        None => pool.branchless_target(&goal.method_key()),
    }
}

fn attach_by_control<C: Chromosome>(
    pool: &GoalPool<C>,
    kind: TargetKind,
    augmentation: &mut Augmentation,
) {
    for target in pool.ids_of_kind(kind) {
        match anchor_of(pool, target) {
            Some(anchor) => augmentation.attach(anchor, target),
            None => warn!(
                "no controlling branch or branchless entry for {:?} target {:?}; skipped",
                kind, target
            ),
        }
    }
}

/// Method-style targets attach at their method's entry: to every root
/// branch of the method, or to its branchless entry when the method has no
/// branches.
fn attach_at_method_entry<C: Chromosome>(
    pool: &GoalPool<C>,
    graph: &StructuralGraph,
    kind: TargetKind,
    augmentation: &mut Augmentation,
) {
    for target in pool.ids_of_kind(kind) {
        let goal = pool.get(target);
        let entry_roots: Vec<TargetId> = graph
            .roots()
            .iter()
            .copied()
            .filter(|root| {
                let candidate = pool.get(*root);
                candidate.kind() == TargetKind::Branch
                    && candidate.class_name() == goal.class_name()
                    && candidate.method_name() == goal.method_name()
            })
            .collect();

        if entry_roots.is_empty() {
            match pool.branchless_target(&goal.method_key()) {
                Some(anchor) => augmentation.attach(anchor, target),
                None => warn!(
                    "method target {:?} has neither root branches nor a branchless entry; skipped",
                    target
                ),
            }
        } else {
            for root in entry_roots {
                augmentation.attach(root, target);
            }
        }
    }
}

/// Expands each context-sensitive branch into one copy per calling context
/// and anchors every copy at the controlling branch.
fn expand_cbranches<C: Chromosome>(
    pool: &mut GoalPool<C>,
    call_graph: Option<&CallGraph>,
    augmentation: &mut Augmentation,
) {
    let bases = pool.ids_of_kind(TargetKind::CBranch);
    for base in bases {
        let anchor = anchor_of(pool, base);
        match anchor {
            Some(anchor) => augmentation.attach(anchor, base),
            None => {
                warn!("context branch {:?} has no resolvable anchor; skipped", base);
                continue;
            }
        }
        let contexts: Vec<String> = call_graph
            .map(|cg| cg.contexts_for(&pool.get(base).method_key()).to_vec())
            .unwrap_or_default();
        for context in contexts {
            let copy = pool.get(base).context_copy(context);
            let copy_id = pool.add(copy);
            augmentation.added.push(copy_id);
            if let Some(anchor) = anchor {
                augmentation.attach(anchor, copy_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::{BranchSite, ControlDependency, ControlFlowModel, InstructionId, MethodCfg};
    use crate::goals::Goal;

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    struct Tc(u32);

    impl Chromosome for Tc {
        fn size(&self) -> u32 {
            self.0
        }
    }

    const M: &str = "com.example.Stack.push(I)V";

    fn model_with_root_branch() -> ControlFlowModel {
        let mut cfg = MethodCfg::new();
        let entry = cfg.add_block(None);
        let b0 = cfg.add_block(Some(BranchSite {
            branch_id: 1,
            root_dependent: true,
        }));
        cfg.add_parent(b0, entry, None);
        let mut model = ControlFlowModel::new();
        model.insert(M, cfg);
        model
    }

    fn criteria(list: &[Criterion]) -> IndexSet<Criterion> {
        list.iter().copied().collect()
    }

    #[test]
    fn test_line_targets_attach_to_controlling_branch() {
        let model = model_with_root_branch();
        let mut pool: GoalPool<Tc> = GoalPool::new();
        let branch_true = pool.add(
            Goal::branch(1, true, "com.example.Stack", "push(I)V", true)
                .with_instruction(InstructionId::new(M, 1)),
        );
        let line = pool.add(
            Goal::new(
                TargetKind::Line,
                "com.example.Stack",
                "push(I)V",
                false,
                std::sync::Arc::new(|_: &Tc, _: &crate::execution::ExecutionResult| 1.0),
            )
            .with_control(ControlDependency::new(1, true)),
        );
        let graph = StructuralGraph::build(&pool, &model);

        let augmentation = augment(&mut pool, &graph, None, &criteria(&[Criterion::Line]));
        assert!(augmentation.dependencies[&branch_true].contains(&line));
    }

    #[test]
    fn test_branchless_residence_falls_back_to_method_entry() {
        let model = ControlFlowModel::new();
        let mut pool: GoalPool<Tc> = GoalPool::new();
        let entry = pool.add(Goal::branchless_method("com.example.Stack", "clear()V", false));
        let statement = pool.add(Goal::new(
            TargetKind::Statement,
            "com.example.Stack",
            "clear()V",
            false,
            std::sync::Arc::new(|_: &Tc, _: &crate::execution::ExecutionResult| 1.0),
        ));
        let graph = StructuralGraph::build(&pool, &model);

        let augmentation = augment(&mut pool, &graph, None, &criteria(&[Criterion::Statement]));
        assert!(augmentation.dependencies[&entry].contains(&statement));
    }

    #[test]
    fn test_method_target_attaches_to_root_branches() {
        let model = model_with_root_branch();
        let mut pool: GoalPool<Tc> = GoalPool::new();
        let root_true = pool.add(
            Goal::branch(1, true, "com.example.Stack", "push(I)V", true)
                .with_instruction(InstructionId::new(M, 1)),
        );
        let root_false = pool.add(
            Goal::branch(1, false, "com.example.Stack", "push(I)V", true)
                .with_instruction(InstructionId::new(M, 1)),
        );
        let method = pool.add(Goal::method("com.example.Stack", "push(I)V", true, vec![1]));
        let graph = StructuralGraph::build(&pool, &model);

        let augmentation = augment(&mut pool, &graph, None, &criteria(&[Criterion::Method]));
        assert!(augmentation.dependencies[&root_true].contains(&method));
        assert!(augmentation.dependencies[&root_false].contains(&method));
    }

    #[test]
    fn test_cbranch_expansion_creates_context_copies() {
        let model = model_with_root_branch();
        let mut pool: GoalPool<Tc> = GoalPool::new();
        let anchor = pool.add(
            Goal::branch(1, true, "com.example.Stack", "push(I)V", true)
                .with_instruction(InstructionId::new(M, 1)),
        );
        let base = pool.add(
            Goal::branch(2, true, "com.example.Stack", "push(I)V", true)
                .with_kind(TargetKind::CBranch)
                .with_control(ControlDependency::new(1, true)),
        );
        let mut calls = CallGraph::new();
        calls.add_context("com.example.Stack.push(I)V", "Main.run->Stack.push");
        calls.add_context("com.example.Stack.push(I)V", "Batch.load->Stack.push");
        let graph = StructuralGraph::build(&pool, &model);

        let augmentation = augment(
            &mut pool,
            &graph,
            Some(&calls),
            &criteria(&[Criterion::CBranch]),
        );
        assert_eq!(augmentation.added.len(), 2);
        let dependents = &augmentation.dependencies[&anchor];
        assert!(dependents.contains(&base));
        for copy in &augmentation.added {
            assert!(dependents.contains(copy));
            assert!(pool.get(*copy).context().is_some());
        }
    }
}
