//! Structural goal graph.
//!
//! Directed graph of control dependence among branch targets: an edge
//! `p → f` means `p` is the immediate controlling predicate of `f` at the
//! matching expression value. Built once at manager construction by walking
//! each branch goal's control-flow graph upward, skipping blocks that
//! contain no branch. Roots are the branches reachable from method entry
//! without crossing a predicate; during the search only the children of a
//! covered parent ever become active objectives.

use indexmap::{IndexMap, IndexSet};
use log::{debug, warn};

use crate::cfg::{BlockId, ControlDependency, ControlFlowModel, MethodCfg};
use crate::execution::Chromosome;
use crate::goals::{GoalPool, TargetId};

#[derive(Debug, Default)]
pub struct StructuralGraph {
    children: IndexMap<TargetId, IndexSet<TargetId>>,
    parents: IndexMap<TargetId, IndexSet<TargetId>>,
    roots: IndexSet<TargetId>,
    /// Independent root-to-target path counts, fixed at build.
    paths: IndexMap<TargetId, u64>,
}

impl StructuralGraph {
    /// Builds the graph over the branch-kind goals of the pool.
    /// Instrumented branches must already be excluded from the pool's
    /// branch index; they are skipped here as vertices as well.
    pub fn build<C: Chromosome>(pool: &GoalPool<C>, model: &ControlFlowModel) -> StructuralGraph {
        let mut graph = StructuralGraph::default();

        for goal in pool.iter() {
            if !goal.is_branch_kind() {
                continue;
            }
            let id = goal.id();
            let info = match goal.branch_info() {
                Some(info) => info,
                // Branchless methods have no controlling predicate.
                None => {
                    graph.roots.insert(id);
                    continue;
                }
            };
            if info.instrumented {
                continue;
            }

            let (cfg, block) = match info.instruction.as_ref().and_then(|i| model.resolve(i)) {
                Some(resolved) => resolved,
                None => {
                    graph.roots.insert(id);
                    continue;
                }
            };

            if cfg
                .block(block)
                .and_then(|b| b.branch())
                .map(|site| site.root_dependent)
                .unwrap_or(false)
            {
                graph.roots.insert(id);
            }

            let mut visited: IndexSet<(BlockId, Option<ControlDependency>)> = IndexSet::new();
            let mut has_controlling = false;
            for (parent_block, dependency) in controlling_parents(cfg, block, &mut visited) {
                match dependency {
                    Some(cd) => {
                        has_controlling = true;
                        match pool.branch_target(cd.branch_id, cd.expression_value) {
                            Some(parent) if parent != id => graph.add_edge(parent, id),
                            Some(_) => {}
                            None => {
                                // The controlling predicate has no goal in the
                                // pool; the edge cannot be represented.
                                warn!(
                                    "no goal for controlling branch {} ({}) of target {:?}",
                                    cd.branch_id, cd.expression_value, id
                                );
                            }
                        }
                    }
                    None => {
                        debug!(
                            "walk from {:?} reached block {} without a controlling branch",
                            id, parent_block
                        );
                        graph.roots.insert(id);
                    }
                }
            }

            // A branch nothing controls is an entry predicate.
            if !has_controlling && !graph.roots.contains(&id) {
                graph.roots.insert(id);
            }
        }

        graph.count_paths();
        graph
    }

    fn add_edge(&mut self, parent: TargetId, child: TargetId) {
        self.children.entry(parent).or_default().insert(child);
        self.parents.entry(child).or_default().insert(parent);
    }

    /// Branches with no control predecessor on any incoming path.
    pub fn roots(&self) -> &IndexSet<TargetId> {
        &self.roots
    }

    /// Immediate structural descendants.
    pub fn children(&self, target: TargetId) -> Vec<TargetId> {
        self.children
            .get(&target)
            .map(|c| c.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Immediate structural ancestors.
    pub fn parents(&self, target: TargetId) -> Vec<TargetId> {
        self.parents
            .get(&target)
            .map(|p| p.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Transitive closure of [`StructuralGraph::children`], memoized in the
    /// caller-supplied cache.
    pub fn all_descendants(
        &self,
        target: TargetId,
        cache: &mut IndexMap<TargetId, IndexSet<TargetId>>,
    ) -> IndexSet<TargetId> {
        if let Some(cached) = cache.get(&target) {
            return cached.clone();
        }
        let mut all = IndexSet::new();
        let mut stack: Vec<TargetId> = self.children(target);
        while let Some(next) = stack.pop() {
            if all.insert(next) {
                stack.extend(self.children(next));
            }
        }
        cache.insert(target, all.clone());
        all
    }

    /// Number of independent paths from method entry leading to a target:
    /// one for a root, otherwise the sum over its parents. Targets outside
    /// the graph count one path. Never less than one.
    pub fn independent_paths(&self, target: TargetId) -> u64 {
        self.paths.get(&target).copied().unwrap_or(1)
    }

    fn count_paths(&mut self) {
        let vertices: Vec<TargetId> = self
            .roots
            .iter()
            .copied()
            .chain(self.parents.keys().copied())
            .chain(self.children.keys().copied())
            .collect();
        let mut memo: IndexMap<TargetId, u64> = IndexMap::new();
        for vertex in vertices {
            let mut on_stack = IndexSet::new();
            self.paths_for(vertex, &mut memo, &mut on_stack);
        }
        self.paths = memo;
    }

    fn paths_for(
        &self,
        target: TargetId,
        memo: &mut IndexMap<TargetId, u64>,
        on_stack: &mut IndexSet<TargetId>,
    ) -> u64 {
        if let Some(known) = memo.get(&target) {
            return *known;
        }
        // Back edges contribute nothing.
        if !on_stack.insert(target) {
            return 0;
        }
        let mut count: u64 = if self.roots.contains(&target) { 1 } else { 0 };
        for parent in self.parents(target) {
            count = count.saturating_add(self.paths_for(parent, memo, on_stack));
        }
        on_stack.shift_remove(&target);
        let count = count.max(1);
        memo.insert(target, count);
        count
    }
}

/// Upward DFS for the controlling parents of a block: skips through blocks
/// without a branch, deduplicates on (block, dependency) pairs, and reports
/// a `None` dependency when the walk ran out of predecessors.
fn controlling_parents(
    cfg: &MethodCfg,
    block: BlockId,
    visited: &mut IndexSet<(BlockId, Option<ControlDependency>)>,
) -> Vec<(BlockId, Option<ControlDependency>)> {
    let incoming = cfg.parents_with_cd(block);
    if incoming.is_empty() {
        return vec![(block, None)];
    }
    let mut found = Vec::new();
    for (parent, dependency) in incoming.iter().copied() {
        if !visited.insert((parent, dependency)) {
            continue;
        }
        if cfg.block(parent).map(|b| b.contains_branch()).unwrap_or(false) {
            found.push((parent, dependency));
        } else {
            found.extend(controlling_parents(cfg, parent, visited));
        }
    }
    found
}
