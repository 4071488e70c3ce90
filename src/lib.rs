//! # PreMOSA: Defect-Prediction-Guided Many-Objective Test Generation
//!
//! A search core for automated unit-test generation that pursues the
//! *buggy* parts of a program first. Coverage targets extracted from the
//! program under test are partitioned by per-method defect-prediction
//! scores; the search initially optimizes only the buggy partition and
//! promotes the rest through a one-shot trigger once the buggy goals are
//! exhausted or progress stalls.
//!
//! ## Core Components
//!
//! - **Goal pool** (`goals`): arena of coverage targets with opaque
//!   distance functions, addressed by stable integer ids.
//! - **Structural graph** (`graph`): control dependence among branch
//!   targets, built from the extractor's control-flow model (`cfg`);
//!   drives the lazy expansion of objectives during fitness evaluation.
//! - **Goal manager** (`manager`): the triad {uncovered, current, covered},
//!   the buggy/non-buggy partition with its staged activators, dependency
//!   augmentation per criterion (`dependencies`) and the path-balancing
//!   goal adjustment.
//! - **Archive** (`archive`): shortest covering test per target under a
//!   cumulative statement budget that doubles as a stopping condition.
//! - **Search loop** (`search`): preference sorting, non-dominated sorting
//!   and crowding distance (`ranking`) around externally supplied breeding
//!   operators and test execution (`execution`).
//! - **Defect scores** (`defect`): per-class CSV loading and method-name
//!   normalization; **exception registry** (`exceptions`): cross-run
//!   memory of discovered exception goals.
//!
//! The engine is deterministic for a fixed seed, goal order and executor:
//! every set and map on the hot path is insertion-ordered.

pub mod archive;
pub mod cfg;
pub mod config;
pub mod defect;
pub mod dependencies;
pub mod exceptions;
pub mod execution;
pub mod goals;
pub mod graph;
pub mod manager;
pub mod ranking;
pub mod search;

pub use archive::Archive;
pub use cfg::{BranchSite, CallGraph, ControlDependency, ControlFlowModel, InstructionId, MethodCfg};
pub use config::{ConfigError, Criterion, SearchConfig, SearchVariant};
pub use defect::{DefectModel, MethodPool};
pub use exceptions::{ExceptionKey, ExceptionRegistry};
pub use execution::{Chromosome, ExecutionResult, ExecutionTrace, Individual, TestExecutor, ThrownException};
pub use goals::{Fitness, Goal, GoalPool, TargetId, TargetKind};
pub use graph::StructuralGraph;
pub use manager::GoalManager;
pub use search::{
    CoverageReport, CriterionCoverage, ExitReason, SearchEngine, SearchOperators, SearchOutcome,
    SearchStats,
};
