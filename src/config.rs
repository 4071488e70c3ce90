//! Search configuration and the startup error surface.
//!
//! Everything that can make a run invalid before the search starts lives
//! here: the enabled coverage criteria, the population and trigger
//! parameters, the archive statement budget and the location of the
//! defect-score files. Runtime failures (timeouts, missing lookup entries)
//! are deliberately not part of this error type; they are absorbed by the
//! search itself.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

/// Coverage criteria the goal manager knows how to wire into the search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Criterion {
    Branch,
    Exception,
    Line,
    Statement,
    WeakMutation,
    StrongMutation,
    Method,
    MethodNoException,
    Input,
    Output,
    TryCatch,
    CBranch,
}

impl Criterion {
    /// All criteria, in the order they are wired during manager construction.
    pub fn all() -> [Criterion; 12] {
        [
            Criterion::Branch,
            Criterion::Exception,
            Criterion::Line,
            Criterion::Statement,
            Criterion::WeakMutation,
            Criterion::StrongMutation,
            Criterion::Method,
            Criterion::MethodNoException,
            Criterion::Input,
            Criterion::Output,
            Criterion::TryCatch,
            Criterion::CBranch,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Criterion::Branch => "BRANCH",
            Criterion::Exception => "EXCEPTION",
            Criterion::Line => "LINE",
            Criterion::Statement => "STATEMENT",
            Criterion::WeakMutation => "WEAKMUTATION",
            Criterion::StrongMutation => "STRONGMUTATION",
            Criterion::Method => "METHOD",
            Criterion::MethodNoException => "METHODNOEXCEPTION",
            Criterion::Input => "INPUT",
            Criterion::Output => "OUTPUT",
            Criterion::TryCatch => "TRYCATCH",
            Criterion::CBranch => "CBRANCH",
        }
    }
}

impl std::fmt::Display for Criterion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Criterion {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_uppercase();
        Criterion::all()
            .into_iter()
            .find(|c| c.name() == normalized)
            .ok_or_else(|| ConfigError::UnknownCriterion {
                name: s.to_string(),
            })
    }
}

/// Which trigger policy the outer loop runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchVariant {
    /// Fires the non-buggy inclusion trigger only when every buggy goal is
    /// covered.
    DynaMosa,
    /// Additionally fires on coverage stagnation and on prolonged zero
    /// coverage.
    PreMosa,
}

/// Fatal startup errors. Anything constructed from a [`SearchConfig`] that
/// validates cleanly will not surface further `Result`s.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("defect score file not found: {path}")]
    MissingDefectScores { path: PathBuf },

    #[error("malformed defect score row at {path}:{line}")]
    MalformedDefectScores { path: PathBuf, line: usize },

    #[error("unknown coverage criterion: {name}")]
    UnknownCriterion { name: String },

    #[error("invalid configuration parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
}

/// Tunable parameters of the search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Target population size.
    pub population: usize,

    /// Enabled coverage criteria.
    pub criteria: IndexSet<Criterion>,

    /// Trigger policy variant.
    pub variant: SearchVariant,

    /// Consecutive generations without a decrease of the uncovered-goal
    /// count before the non-buggy inclusion trigger fires.
    pub iterations_wo_improvement: u64,

    /// Generation index at which the trigger fires if nothing has been
    /// covered at all.
    pub zero_coverage_trigger: u64,

    /// Cumulative statement budget across archived tests.
    pub max_archive_statements: u64,

    /// Directory holding per-class defect-score CSV files.
    pub dp_dir: Option<PathBuf>,

    /// Seed for every stochastic step owned by the engine.
    pub seed: u64,

    /// Generation cap; `None` leaves termination to the other conditions.
    pub max_generations: Option<u64>,

    /// Fitness-evaluation cap.
    pub max_evaluations: Option<u64>,

    /// Wall-clock cap.
    pub max_time: Option<Duration>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        let mut criteria = IndexSet::new();
        criteria.insert(Criterion::Branch);
        SearchConfig {
            population: 50,
            criteria,
            variant: SearchVariant::PreMosa,
            iterations_wo_improvement: 25,
            zero_coverage_trigger: 20,
            max_archive_statements: 500_000,
            dp_dir: None,
            seed: 0,
            max_generations: None,
            max_evaluations: None,
            max_time: Some(Duration::from_secs(120)),
        }
    }
}

impl SearchConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.population == 0 {
            return Err(ConfigError::InvalidParameter {
                name: "population",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.criteria.is_empty() {
            return Err(ConfigError::InvalidParameter {
                name: "criteria",
                reason: "at least one coverage criterion must be enabled".to_string(),
            });
        }
        if self.max_archive_statements == 0 {
            return Err(ConfigError::InvalidParameter {
                name: "max_archive_statements",
                reason: "an empty archive budget cannot store any test".to_string(),
            });
        }
        Ok(())
    }

    pub fn criterion_enabled(&self, criterion: Criterion) -> bool {
        self.criteria.contains(&criterion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_criterion_parsing_accepts_spec_spellings() {
        assert_eq!("BRANCH".parse::<Criterion>().unwrap(), Criterion::Branch);
        assert_eq!(
            "WeakMutation".parse::<Criterion>().unwrap(),
            Criterion::WeakMutation
        );
        assert_eq!(
            "STRONG_MUTATION".parse::<Criterion>().unwrap(),
            Criterion::StrongMutation
        );
        assert_eq!(
            "methodnoexception".parse::<Criterion>().unwrap(),
            Criterion::MethodNoException
        );
    }

    #[test]
    fn test_unknown_criterion_is_a_config_error() {
        let err = "DATAFLOW".parse::<Criterion>().unwrap_err();
        match err {
            ConfigError::UnknownCriterion { name } => assert_eq!(name, "DATAFLOW"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_default_config_validates() {
        assert!(SearchConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_population_is_rejected() {
        let config = SearchConfig {
            population: 0,
            ..SearchConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
