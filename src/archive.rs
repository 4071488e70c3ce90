//! Archive of covering tests with a cumulative statement budget.
//!
//! The archive maps each retained test to the set of targets it covers and
//! keeps a running total of executable statements across retained tests.
//! Admitting a test that would push the total past the configured limit
//! latches the budget condition instead; the outer loop polls the latch as
//! a stopping condition.

use indexmap::{IndexMap, IndexSet};
use log::debug;

use crate::execution::Chromosome;
use crate::goals::TargetId;

#[derive(Debug)]
pub struct Archive<C: Chromosome> {
    tests: IndexMap<C, IndexSet<TargetId>>,
    tests_per_target: IndexMap<TargetId, u32>,
    statements: u64,
    max_statements: u64,
    budget_exceeded: bool,
}

impl<C: Chromosome> Archive<C> {
    pub fn new(max_statements: u64) -> Self {
        Archive {
            tests: IndexMap::new(),
            tests_per_target: IndexMap::new(),
            statements: 0,
            max_statements,
            budget_exceeded: false,
        }
    }

    pub fn contains(&self, test: &C) -> bool {
        self.tests.contains_key(test)
    }

    /// Checks whether a not-yet-archived test fits the statement budget.
    /// On overflow the latch is set and the test is refused; the counter
    /// itself only ever reflects tests actually retained.
    pub fn try_admit(&mut self, test: &C) -> bool {
        if self.budget_exceeded {
            return false;
        }
        let incoming = u64::from(test.size());
        if self.statements + incoming > self.max_statements {
            debug!(
                "archive statement budget exceeded: {} retained + {} incoming > {}",
                self.statements, incoming, self.max_statements
            );
            self.budget_exceeded = true;
            return false;
        }
        true
    }

    /// Associates a covered target with a test, inserting the test on first
    /// association. Re-recording the same pair is a no-op.
    pub fn record(&mut self, test: &C, target: TargetId) {
        if !self.tests.contains_key(test) {
            self.statements += u64::from(test.size());
            self.tests.insert(test.clone(), IndexSet::new());
        }
        let covered = self.tests.get_mut(test).expect("test inserted above");
        if covered.insert(target) {
            *self.tests_per_target.entry(target).or_insert(0) += 1;
        }
    }

    /// Archived tests in insertion order.
    pub fn tests(&self) -> impl Iterator<Item = &C> {
        self.tests.keys()
    }

    pub fn covered_by(&self, test: &C) -> Option<&IndexSet<TargetId>> {
        self.tests.get(test)
    }

    /// Number of distinct archived tests covering a target; the numerator
    /// of the path-balancing ratio.
    pub fn num_tests(&self, target: TargetId) -> u32 {
        self.tests_per_target.get(&target).copied().unwrap_or(0)
    }

    pub fn statements(&self) -> u64 {
        self.statements
    }

    pub fn budget_exceeded(&self) -> bool {
        self.budget_exceeded
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    struct Tc {
        id: u32,
        statements: u32,
    }

    impl Tc {
        fn new(id: u32, statements: u32) -> Self {
            Tc { id, statements }
        }
    }

    impl Chromosome for Tc {
        fn size(&self) -> u32 {
            self.statements
        }
    }

    #[test]
    fn test_statement_budget_latches_on_overflow() {
        let mut archive: Archive<Tc> = Archive::new(50);
        let first = Tc::new(1, 10);
        let second = Tc::new(2, 20);
        let third = Tc::new(3, 25);

        assert!(archive.try_admit(&first));
        archive.record(&first, TargetId(0));
        assert!(archive.try_admit(&second));
        archive.record(&second, TargetId(1));
        assert_eq!(archive.statements(), 30);

        assert!(!archive.try_admit(&third));
        assert!(archive.budget_exceeded());
        // The counter reflects retained tests only.
        assert_eq!(archive.statements(), 30);
        assert_eq!(archive.len(), 2);

        // Once latched, nothing further is admitted.
        assert!(!archive.try_admit(&Tc::new(4, 1)));
    }

    #[test]
    fn test_exact_fit_is_admitted() {
        let mut archive: Archive<Tc> = Archive::new(30);
        let test = Tc::new(1, 30);
        assert!(archive.try_admit(&test));
        archive.record(&test, TargetId(0));
        assert!(!archive.budget_exceeded());
    }

    #[test]
    fn test_record_deduplicates_targets_per_test() {
        let mut archive: Archive<Tc> = Archive::new(100);
        let test = Tc::new(1, 5);
        archive.record(&test, TargetId(3));
        archive.record(&test, TargetId(3));
        archive.record(&test, TargetId(4));

        assert_eq!(archive.covered_by(&test).unwrap().len(), 2);
        assert_eq!(archive.num_tests(TargetId(3)), 1);
        assert_eq!(archive.statements(), 5);
    }

    #[test]
    fn test_num_tests_counts_distinct_tests() {
        let mut archive: Archive<Tc> = Archive::new(100);
        archive.record(&Tc::new(1, 5), TargetId(0));
        archive.record(&Tc::new(2, 7), TargetId(0));
        assert_eq!(archive.num_tests(TargetId(0)), 2);
        assert_eq!(archive.num_tests(TargetId(9)), 0);
    }
}
