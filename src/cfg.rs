//! Control-flow input model.
//!
//! This is the shape of what the external bytecode extractor hands the
//! goal-graph builder: basic blocks per method, parent edges annotated with
//! the control dependency under which the child is reached, and the calling
//! contexts consumed by context-sensitive branch coverage. The core never
//! inspects instructions; a block either contains a branch site or it does
//! not.

use indexmap::IndexMap;

/// Index of a basic block inside its method.
pub type BlockId = usize;

/// Stable reference to the basic block a branch instruction lives in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstructionId {
    /// `"class.method"` key of the enclosing method.
    pub method: String,
    pub block: BlockId,
}

impl InstructionId {
    pub fn new(method: impl Into<String>, block: BlockId) -> Self {
        InstructionId {
            method: method.into(),
            block,
        }
    }
}

/// The controlling predicate of an edge: reaching the child requires the
/// parent branch to evaluate to `expression_value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ControlDependency {
    pub branch_id: i32,
    pub expression_value: bool,
}

impl ControlDependency {
    pub fn new(branch_id: i32, expression_value: bool) -> Self {
        ControlDependency {
            branch_id,
            expression_value,
        }
    }
}

/// A branch instruction inside a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BranchSite {
    pub branch_id: i32,
    /// Reachable from method entry without crossing any predicate.
    pub root_dependent: bool,
}

#[derive(Debug, Clone, Default)]
pub struct BasicBlock {
    branch: Option<BranchSite>,
    parents: Vec<(BlockId, Option<ControlDependency>)>,
}

impl BasicBlock {
    pub fn branch(&self) -> Option<&BranchSite> {
        self.branch.as_ref()
    }

    pub fn contains_branch(&self) -> bool {
        self.branch.is_some()
    }
}

/// Control-flow graph of one method, blocks addressed by index.
#[derive(Debug, Clone, Default)]
pub struct MethodCfg {
    blocks: Vec<BasicBlock>,
}

impl MethodCfg {
    pub fn new() -> Self {
        MethodCfg::default()
    }

    pub fn add_block(&mut self, branch: Option<BranchSite>) -> BlockId {
        self.blocks.push(BasicBlock {
            branch,
            parents: Vec::new(),
        });
        self.blocks.len() - 1
    }

    /// Records that `child` is reached from `parent`, optionally under a
    /// control dependency of the parent's branch.
    pub fn add_parent(
        &mut self,
        child: BlockId,
        parent: BlockId,
        dependency: Option<ControlDependency>,
    ) {
        self.blocks[child].parents.push((parent, dependency));
    }

    pub fn block(&self, id: BlockId) -> Option<&BasicBlock> {
        self.blocks.get(id)
    }

    /// Incoming edges of a block with their control dependencies, in
    /// registration order.
    pub fn parents_with_cd(&self, id: BlockId) -> &[(BlockId, Option<ControlDependency>)] {
        self.blocks
            .get(id)
            .map(|b| b.parents.as_slice())
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// All method CFGs of the program under test, keyed by `"class.method"`.
#[derive(Debug, Clone, Default)]
pub struct ControlFlowModel {
    methods: IndexMap<String, MethodCfg>,
}

impl ControlFlowModel {
    pub fn new() -> Self {
        ControlFlowModel::default()
    }

    pub fn insert(&mut self, method: impl Into<String>, cfg: MethodCfg) {
        self.methods.insert(method.into(), cfg);
    }

    pub fn method(&self, key: &str) -> Option<&MethodCfg> {
        self.methods.get(key)
    }

    /// Resolves an instruction reference to its method CFG and block.
    pub fn resolve(&self, instruction: &InstructionId) -> Option<(&MethodCfg, BlockId)> {
        let cfg = self.methods.get(&instruction.method)?;
        if instruction.block < cfg.len() {
            Some((cfg, instruction.block))
        } else {
            None
        }
    }
}

/// Calling contexts per method, consumed by context-sensitive branch
/// coverage. A method absent from the map has only its entry context.
#[derive(Debug, Clone, Default)]
pub struct CallGraph {
    contexts: IndexMap<String, Vec<String>>,
}

impl CallGraph {
    pub fn new() -> Self {
        CallGraph::default()
    }

    pub fn add_context(&mut self, method: impl Into<String>, context: impl Into<String>) {
        self.contexts
            .entry(method.into())
            .or_default()
            .push(context.into());
    }

    pub fn contexts_for(&self, method: &str) -> &[String] {
        self.contexts
            .get(method)
            .map(|c| c.as_slice())
            .unwrap_or(&[])
    }
}
