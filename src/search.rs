//! The many-objective search loop.
//!
//! Each generation breeds offspring through the external operators,
//! evaluates them against the manager's current objectives, rebalances the
//! objectives, ranks the combined parents and offspring by preference plus
//! non-domination, and fills the next population front by front with a
//! crowding-distance tiebreak on the last partial front. A one-shot
//! trigger promotes the non-buggy goal partition into the search; which
//! conditions arm it depends on the configured variant.

use std::time::Instant;

use log::{debug, info};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::cfg::{CallGraph, ControlFlowModel};
use crate::config::{ConfigError, Criterion, SearchConfig, SearchVariant};
use crate::exceptions::ExceptionRegistry;
use crate::execution::{Chromosome, Individual, TestExecutor};
use crate::goals::{GoalPool, TargetKind};
use crate::manager::GoalManager;
use crate::ranking;

/// Population initialization and breeding, supplied by the outer driver.
pub trait SearchOperators<C: Chromosome> {
    fn initial_population(&mut self, size: usize, rng: &mut ChaCha8Rng) -> Vec<C>;

    /// Breeds the offspring of one generation from the evaluated parents.
    fn breed(&mut self, parents: &[Individual<C>], rng: &mut ChaCha8Rng) -> Vec<C>;
}

/// Why the search stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    MaxGenerations,
    MaxEvaluations,
    MaxTime,
    /// The archive statement budget latched.
    ArchiveBudget,
}

/// Covered/uncovered tallies for one criterion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriterionCoverage {
    pub criterion: Criterion,
    pub covered: usize,
    pub uncovered: usize,
    pub ratio: f64,
}

/// Per-criterion coverage summary emitted at the end of the search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverageReport {
    pub criteria: Vec<CriterionCoverage>,
}

impl CoverageReport {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Counters accumulated over one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchStats {
    pub generations: u64,
    pub evaluations: u64,
    pub archived_tests: usize,
    pub archived_statements: u64,
    pub trigger_fired: bool,
    pub trigger_generation: Option<u64>,
    pub adjust_goals_millis: f64,
    pub exit_reason: Option<ExitReason>,
}

/// Result of a run: the archived tests (the suite), the coverage report
/// and the run counters.
#[derive(Debug, Clone)]
pub struct SearchOutcome<C> {
    pub tests: Vec<C>,
    pub report: CoverageReport,
    pub stats: SearchStats,
}

pub struct SearchEngine<C, E, O>
where
    C: Chromosome,
    E: TestExecutor<C>,
    O: SearchOperators<C>,
{
    manager: GoalManager<C>,
    executor: E,
    operators: O,
    registry: ExceptionRegistry,
    config: SearchConfig,
    rng: ChaCha8Rng,
    population: Vec<Individual<C>>,
    iteration: u64,
    evaluations: u64,
    trigger_fired: bool,
    iterations_wo_improvement: u64,
    current_uncovered: usize,
    zero_goals_covered: bool,
    adjust_goals_nanos: u128,
    started: Option<Instant>,
    exit_reason: Option<ExitReason>,
    trigger_generation: Option<u64>,
}

impl<C, E, O> SearchEngine<C, E, O>
where
    C: Chromosome,
    E: TestExecutor<C>,
    O: SearchOperators<C>,
{
    /// Validates the configuration and builds the goal manager, seeding
    /// Exception goals from what the registry already knows.
    pub fn new(
        pool: GoalPool<C>,
        model: &ControlFlowModel,
        call_graph: Option<&CallGraph>,
        config: SearchConfig,
        executor: E,
        operators: O,
        registry: ExceptionRegistry,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let mut manager = GoalManager::new(pool, model, call_graph, &config);
        if config.criterion_enabled(Criterion::Exception) {
            manager.seed_exceptions(&registry);
        }
        let rng = ChaCha8Rng::seed_from_u64(config.seed);
        Ok(SearchEngine {
            manager,
            executor,
            operators,
            registry,
            config,
            rng,
            population: Vec::new(),
            iteration: 0,
            evaluations: 0,
            trigger_fired: false,
            iterations_wo_improvement: 0,
            current_uncovered: 0,
            zero_goals_covered: true,
            adjust_goals_nanos: 0,
            started: None,
            exit_reason: None,
            trigger_generation: None,
        })
    }

    /// Runs the search to a stopping condition and assembles the archived
    /// tests into the outcome.
    pub fn generate_solution(&mut self) -> SearchOutcome<C> {
        self.started = Some(Instant::now());

        if self.manager.current_goals().is_empty() {
            self.fire_trigger("no buggy goals");
        }

        info!(
            "initial number of goals: {} current / {} uncovered",
            self.manager.current_goals().len(),
            self.manager.uncovered_goals().len()
        );

        let initial = self
            .operators
            .initial_population(self.config.population, &mut self.rng);
        let mut population: Vec<Individual<C>> = initial.into_iter().map(Individual::new).collect();
        for individual in population.iter_mut() {
            self.manager
                .calculate_fitness(individual, &mut self.executor, &mut self.registry);
            self.evaluations += 1;
        }
        self.population = population;

        // An initial population that already exhausts the buggy goals arms
        // the trigger before the first generation.
        if !self.trigger_fired && self.manager.uncovered_goals().is_empty() {
            self.fire_trigger("all buggy goals are covered");
        }

        let goals = self.manager.current_goals().clone();
        let fronts = ranking::compute_ranking(&mut self.population, &goals);
        for front in &fronts {
            ranking::assign_crowding_distance(front, &mut self.population, &goals);
        }

        self.current_uncovered = self.manager.uncovered_goals().len();
        if !self.manager.covered_goals().is_empty() {
            self.zero_goals_covered = false;
        }

        while !self.finished() {
            self.evolve();
        }

        info!(
            "search finished after {} generations, {} evaluations; archive holds {} tests",
            self.iteration,
            self.evaluations,
            self.manager.archive().len()
        );

        SearchOutcome {
            tests: self.manager.archive().tests().cloned().collect(),
            report: self.report(),
            stats: self.stats(),
        }
    }

    fn evolve(&mut self) {
        let offspring = self.operators.breed(&self.population, &mut self.rng);
        let mut union: Vec<Individual<C>> = std::mem::take(&mut self.population);
        for test in offspring {
            let mut individual = Individual::new(test);
            self.manager
                .calculate_fitness(&mut individual, &mut self.executor, &mut self.registry);
            self.evaluations += 1;
            union.push(individual);
        }
        debug!("union size = {}", union.len());

        let adjust_started = Instant::now();
        self.manager.adjust_current_goals();
        self.adjust_goals_nanos += adjust_started.elapsed().as_nanos();

        // Parents carry fitness caches from the objectives of their own
        // generation; fill in anything the adjusted goal set added.
        for individual in union.iter_mut() {
            self.manager.ensure_current_fitness(individual);
        }

        let goals = self.manager.current_goals().clone();
        let mut fronts = ranking::compute_ranking(&mut union, &goals);

        let front0_len = fronts.first().map(|f| f.len()).unwrap_or(0);
        let mut remain = self.config.population.max(front0_len);
        let mut selected: Vec<usize> = Vec::new();
        let mut index = 0;
        if fronts.first().map(|f| f.is_empty()).unwrap_or(false) {
            index = 1;
        }

        while index < fronts.len()
            && remain > 0
            && remain >= fronts[index].len()
            && !fronts[index].is_empty()
        {
            ranking::assign_crowding_distance(&fronts[index], &mut union, &goals);
            selected.extend(fronts[index].iter().copied());
            remain -= fronts[index].len();
            index += 1;
        }

        // The next front does not fit whole; take its most spread-out
        // members.
        if remain > 0 && index < fronts.len() && !fronts[index].is_empty() {
            ranking::assign_crowding_distance(&fronts[index], &mut union, &goals);
            ranking::sort_by_crowding_desc(&mut fronts[index], &union);
            selected.extend(fronts[index].iter().copied().take(remain));
        }

        let mut slots: Vec<Option<Individual<C>>> = union.into_iter().map(Some).collect();
        self.population = selected
            .into_iter()
            .map(|i| slots[i].take().expect("front membership is disjoint"))
            .collect();

        self.iteration += 1;
        self.check_trigger();

        debug!(
            "generation {}: covered = {}, current = {}, uncovered = {}",
            self.iteration,
            self.manager.covered_goals().len(),
            self.manager.current_goals().len(),
            self.manager.uncovered_goals().len()
        );
    }

    fn check_trigger(&mut self) {
        if !self.trigger_fired && self.manager.uncovered_goals().is_empty() {
            self.fire_trigger("all buggy goals are covered");
        }

        if self.config.variant == SearchVariant::PreMosa {
            if !self.trigger_fired {
                if self.manager.uncovered_goals().len() == self.current_uncovered {
                    self.iterations_wo_improvement += 1;
                } else {
                    self.current_uncovered = self.manager.uncovered_goals().len();
                    self.iterations_wo_improvement = 0;
                }
                if self.iterations_wo_improvement >= self.config.iterations_wo_improvement {
                    self.fire_trigger("buggy goal coverage stagnated");
                }
            }

            if self.zero_goals_covered && !self.manager.covered_goals().is_empty() {
                self.zero_goals_covered = false;
            }
            if self.zero_goals_covered
                && !self.trigger_fired
                && self.iteration >= self.config.zero_coverage_trigger
            {
                self.fire_trigger("nothing covered at all");
            }
        }
    }

    /// Promotes the non-buggy partition: the four activators, in order,
    /// exactly once.
    fn fire_trigger(&mut self, cause: &str) {
        self.trigger_fired = true;
        self.trigger_generation = Some(self.iteration);
        self.manager.activate_non_buggy_current_goals();
        self.manager.activate_non_buggy_uncovered();
        self.manager.activate_non_buggy_methods();
        self.manager.activate_non_buggy_branch_maps();
        info!(
            "trigger to include non-buggy goals fired after {} generations: {}",
            self.iteration, cause
        );
    }

    fn finished(&mut self) -> bool {
        if self.manager.archive().budget_exceeded() {
            self.exit_reason = Some(ExitReason::ArchiveBudget);
            return true;
        }
        if let Some(max) = self.config.max_generations {
            if self.iteration >= max {
                self.exit_reason = Some(ExitReason::MaxGenerations);
                return true;
            }
        }
        if let Some(max) = self.config.max_evaluations {
            if self.evaluations >= max {
                self.exit_reason = Some(ExitReason::MaxEvaluations);
                return true;
            }
        }
        if let Some(max) = self.config.max_time {
            if let Some(started) = self.started {
                if started.elapsed() >= max {
                    self.exit_reason = Some(ExitReason::MaxTime);
                    return true;
                }
            }
        }
        false
    }

    fn report(&self) -> CoverageReport {
        let criteria = self
            .config
            .criteria
            .iter()
            .map(|criterion| {
                let kinds = kinds_of(*criterion);
                let covered: usize = kinds
                    .iter()
                    .map(|k| self.manager.covered_count_of_kind(*k))
                    .sum();
                let uncovered: usize = kinds
                    .iter()
                    .map(|k| self.manager.uncovered_count_of_kind(*k))
                    .sum();
                let total = covered + uncovered;
                CriterionCoverage {
                    criterion: *criterion,
                    covered,
                    uncovered,
                    ratio: if total == 0 {
                        0.0
                    } else {
                        covered as f64 / total as f64
                    },
                }
            })
            .collect();
        CoverageReport { criteria }
    }

    pub fn stats(&self) -> SearchStats {
        SearchStats {
            generations: self.iteration,
            evaluations: self.evaluations,
            archived_tests: self.manager.archive().len(),
            archived_statements: self.manager.archive().statements(),
            trigger_fired: self.trigger_fired,
            trigger_generation: self.trigger_generation,
            adjust_goals_millis: self.adjust_goals_nanos as f64 / 1_000_000.0,
            exit_reason: self.exit_reason,
        }
    }

    pub fn manager(&self) -> &GoalManager<C> {
        &self.manager
    }

    pub fn trigger_fired(&self) -> bool {
        self.trigger_fired
    }

    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn population(&self) -> &[Individual<C>] {
        &self.population
    }

    pub fn registry(&self) -> &ExceptionRegistry {
        &self.registry
    }

    /// Hands the exception registry back for the next search over the same
    /// program.
    pub fn into_registry(self) -> ExceptionRegistry {
        self.registry
    }
}

/// Target kinds counted under each criterion.
fn kinds_of(criterion: Criterion) -> &'static [TargetKind] {
    match criterion {
        Criterion::Branch => &[TargetKind::Branch, TargetKind::BranchlessMethod],
        Criterion::Exception => &[TargetKind::Exception],
        Criterion::Line => &[TargetKind::Line],
        Criterion::Statement => &[TargetKind::Statement],
        Criterion::WeakMutation => &[TargetKind::WeakMutation],
        Criterion::StrongMutation => &[TargetKind::StrongMutation],
        Criterion::Method => &[TargetKind::Method],
        Criterion::MethodNoException => &[TargetKind::MethodNoException],
        Criterion::Input => &[TargetKind::Input],
        Criterion::Output => &[TargetKind::Output],
        Criterion::TryCatch => &[TargetKind::TryCatch],
        Criterion::CBranch => &[TargetKind::CBranch],
    }
}
