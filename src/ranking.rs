//! Preference sorting, non-dominated sorting and crowding distance.
//!
//! Ranking is always relative to the manager's current objectives. Front
//! zero is the preference front: for every current goal, the individual
//! closest to covering it. Everything else is layered by fast
//! non-dominated sorting. Ties are broken by position so that ranking a
//! population twice yields the same fronts.

use indexmap::IndexSet;

use crate::execution::{Chromosome, Individual};
use crate::goals::TargetId;

/// True when `a` is at least as close on every goal and strictly closer on
/// at least one.
fn dominates<C: Chromosome>(
    a: &Individual<C>,
    b: &Individual<C>,
    goals: &IndexSet<TargetId>,
) -> bool {
    let mut strictly_better = false;
    for goal in goals {
        let fa = a.fitness_of(*goal);
        let fb = b.fitness_of(*goal);
        if fa > fb {
            return false;
        }
        if fa < fb {
            strictly_better = true;
        }
    }
    strictly_better
}

/// Ranks the population into fronts (indices into `population`) and stamps
/// each individual's `rank`. With no current goals everything lands in
/// front zero.
pub fn compute_ranking<C: Chromosome>(
    population: &mut [Individual<C>],
    goals: &IndexSet<TargetId>,
) -> Vec<Vec<usize>> {
    if population.is_empty() {
        return Vec::new();
    }
    if goals.is_empty() {
        for individual in population.iter_mut() {
            individual.rank = 0;
        }
        return vec![(0..population.len()).collect()];
    }

    // Preference front: the best individual per goal.
    let mut preferred: IndexSet<usize> = IndexSet::new();
    for goal in goals {
        let mut best = 0usize;
        let mut best_fitness = population[0].fitness_of(*goal);
        for (index, individual) in population.iter().enumerate().skip(1) {
            let fitness = individual.fitness_of(*goal);
            if fitness < best_fitness {
                best = index;
                best_fitness = fitness;
            }
        }
        preferred.insert(best);
    }

    let mut fronts: Vec<Vec<usize>> = vec![preferred.iter().copied().collect()];

    // Fast non-dominated sorting of the remainder.
    let remainder: Vec<usize> = (0..population.len())
        .filter(|i| !preferred.contains(i))
        .collect();

    let mut domination_count: Vec<usize> = vec![0; population.len()];
    let mut dominated_by: Vec<Vec<usize>> = vec![Vec::new(); population.len()];
    for (pos, &p) in remainder.iter().enumerate() {
        for &q in remainder.iter().skip(pos + 1) {
            if dominates(&population[p], &population[q], goals) {
                dominated_by[p].push(q);
                domination_count[q] += 1;
            } else if dominates(&population[q], &population[p], goals) {
                dominated_by[q].push(p);
                domination_count[p] += 1;
            }
        }
    }

    let mut front: Vec<usize> = remainder
        .iter()
        .copied()
        .filter(|&i| domination_count[i] == 0)
        .collect();
    while !front.is_empty() {
        fronts.push(front.clone());
        let mut next = Vec::new();
        for &p in &front {
            for &q in &dominated_by[p] {
                domination_count[q] -= 1;
                if domination_count[q] == 0 {
                    next.push(q);
                }
            }
        }
        next.sort_unstable();
        front = next;
    }

    for (rank, front) in fronts.iter().enumerate() {
        for &index in front {
            population[index].rank = rank;
        }
    }
    fronts
}

/// Assigns crowding distance within one front over the current goals.
/// Boundary individuals per goal get the maximal distance; goals with no
/// finite spread contribute nothing.
pub fn assign_crowding_distance<C: Chromosome>(
    front: &[usize],
    population: &mut [Individual<C>],
    goals: &IndexSet<TargetId>,
) {
    for &index in front {
        population[index].crowding_distance = 0.0;
    }
    if front.len() <= 2 {
        for &index in front {
            population[index].crowding_distance = f64::INFINITY;
        }
        return;
    }

    for goal in goals {
        let mut ordered: Vec<usize> = front.to_vec();
        ordered.sort_by(|&a, &b| {
            population[a]
                .fitness_of(*goal)
                .partial_cmp(&population[b].fitness_of(*goal))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.cmp(&b))
        });

        let min = population[ordered[0]].fitness_of(*goal);
        let max = population[*ordered.last().expect("front is non-empty")].fitness_of(*goal);
        let spread = max - min;
        if !spread.is_finite() || spread == 0.0 {
            continue;
        }

        population[ordered[0]].crowding_distance = f64::INFINITY;
        population[*ordered.last().expect("front is non-empty")].crowding_distance = f64::INFINITY;
        for window in ordered.windows(3) {
            let (previous, middle, next) = (window[0], window[1], window[2]);
            let gap = (population[next].fitness_of(*goal)
                - population[previous].fitness_of(*goal))
                / spread;
            if population[middle].crowding_distance.is_finite() {
                population[middle].crowding_distance += gap;
            }
        }
    }
}

/// Sorts a front by descending crowding distance (position as tiebreak),
/// for the partial fill of the last selected front.
pub fn sort_by_crowding_desc<C: Chromosome>(front: &mut [usize], population: &[Individual<C>]) {
    front.sort_by(|&a, &b| {
        population[b]
            .crowding_distance
            .partial_cmp(&population[a].crowding_distance)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });
}
