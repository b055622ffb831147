//! Greedy rounding of the fractional placement
//!
//! Candidates are satellites with positive fractional weight. Each round
//! scores every remaining candidate by the density it would newly cover
//! across all epochs (unique) and by the density it sees at all (ideal),
//! picks the best, marks its cities covered and repeats until exactly
//! `deploy_num` satellites are chosen. When too few candidates see any
//! city, visible zero-weight satellites join the pool in index order.
//!
//! Selection order is (unique desc, ideal desc, visible first, weight desc,
//! index asc).

use crate::visibility::VisibilityArena;
use crate::{PlacementError, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::{debug, info};

/// One greedy round's choice
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoundPick {
    pub satellite: usize,
    /// Density of newly covered (city, epoch) pairs
    pub unique: u64,
    /// Density of every (city, epoch) pair the satellite sees
    pub ideal: u64,
    /// Fractional weight from the relaxation
    pub weight: f64,
}

/// Satellite indices in selection order
pub fn selected_indices(picks: &[RoundPick]) -> Vec<usize> {
    picks.iter().map(|p| p.satellite).collect()
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    /// Position in the weight-ordered pool
    rank: usize,
    satellite: usize,
    weight: f64,
}

#[derive(Debug, Clone, Copy)]
struct Scored {
    candidate: Candidate,
    ideal: u64,
    unique: u64,
    /// Sees some city at some epoch, even a zero-density one
    visible: bool,
}

impl Scored {
    /// Greater is better; rank breaks every remaining tie
    fn better(&self, other: &Self) -> Ordering {
        self.unique
            .cmp(&other.unique)
            .then(self.ideal.cmp(&other.ideal))
            .then(self.visible.cmp(&other.visible))
            .then(other.candidate.rank.cmp(&self.candidate.rank))
    }
}

fn sees_anything(satellite: usize, epochs: &[&[Vec<usize>]]) -> bool {
    epochs
        .iter()
        .any(|lists| lists.get(satellite).is_some_and(|cities| !cities.is_empty()))
}

fn score(
    candidate: Candidate,
    epochs: &[&[Vec<usize>]],
    covered: &[Vec<bool>],
    densities: &[u32],
) -> Scored {
    let mut ideal = 0u64;
    let mut unique = 0u64;
    let mut visible = false;
    for (t, lists) in epochs.iter().enumerate() {
        let Some(cities) = lists.get(candidate.satellite) else {
            continue;
        };
        visible |= !cities.is_empty();
        for &k in cities {
            let rho = densities[k] as u64;
            ideal += rho;
            if !covered[t][k] {
                unique += rho;
            }
        }
    }
    Scored {
        candidate,
        ideal,
        unique,
        visible,
    }
}

/// Greedy maximum-coverage selection over explicit per-epoch
/// satellite→cities lists.
///
/// `weights` are (satellite, fractional weight) pairs. Fails with
/// `RoundingUnderflow` when fewer than `deploy_num` satellites see any city
/// at any epoch.
pub fn greedy_select(
    weights: &[(usize, f64)],
    deploy_num: usize,
    densities: &[u32],
    epochs: &[&[Vec<usize>]],
) -> Result<Vec<RoundPick>> {
    if let Some(&k) = epochs
        .iter()
        .flat_map(|lists| lists.iter().flatten())
        .find(|&&k| k >= densities.len())
    {
        return Err(PlacementError::InputMalformed(format!(
            "city {} has no density ({} cities)",
            k,
            densities.len()
        )));
    }

    let mut pool: Vec<(usize, f64)> = weights
        .iter()
        .copied()
        .filter(|&(_, w)| w > 0.0 && w.is_finite())
        .collect();
    pool.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

    let satellites = epochs.iter().map(|lists| lists.len()).max().unwrap_or(0);
    let visible: Vec<usize> = (0..satellites)
        .filter(|&sat| sees_anything(sat, epochs))
        .collect();
    if visible.len() < deploy_num {
        return Err(PlacementError::RoundingUnderflow {
            required: deploy_num,
            available: visible.len(),
        });
    }

    let pooled_visible = pool
        .iter()
        .filter(|&&(sat, _)| sees_anything(sat, epochs))
        .count();
    if pooled_visible < deploy_num {
        let topup: Vec<(usize, f64)> = visible
            .into_iter()
            .filter(|sat| pool.iter().all(|&(pooled, _)| pooled != *sat))
            .map(|sat| (sat, 0.0))
            .collect();
        debug!(
            "Only {} weighted candidates see a city; adding {} zero-weight satellites",
            pooled_visible,
            topup.len()
        );
        pool.extend(topup);
    }

    let mut remaining: Vec<Candidate> = pool
        .into_iter()
        .enumerate()
        .map(|(rank, (satellite, weight))| Candidate {
            rank,
            satellite,
            weight,
        })
        .collect();
    let mut covered = vec![vec![false; densities.len()]; epochs.len()];
    let mut picks = Vec::with_capacity(deploy_num);

    for round in 0..deploy_num {
        let best = remaining
            .par_iter()
            .map(|&c| score(c, epochs, &covered, densities))
            .max_by(|a, b| a.better(b))
            .ok_or(PlacementError::RoundingUnderflow {
                required: deploy_num,
                available: round,
            })?;

        let sat = best.candidate.satellite;
        for (t, lists) in epochs.iter().enumerate() {
            if let Some(cities) = lists.get(sat) {
                for &k in cities {
                    covered[t][k] = true;
                }
            }
        }
        remaining.retain(|c| c.rank != best.candidate.rank);

        debug!(
            "Round {}: satellite {} (unique {}, ideal {}, x {:.3})",
            round, sat, best.unique, best.ideal, best.candidate.weight
        );
        picks.push(RoundPick {
            satellite: sat,
            unique: best.unique,
            ideal: best.ideal,
            weight: best.candidate.weight,
        });
    }

    info!(
        "Rounded to {} satellites, {} unique density covered",
        picks.len(),
        picks.iter().map(|p| p.unique).sum::<u64>()
    );

    Ok(picks)
}

/// Round a fractional placement against a cycle's visibility
pub fn round_placement(
    weights: &[(usize, f64)],
    deploy_num: usize,
    densities: &[u32],
    arena: &VisibilityArena,
) -> Result<Vec<RoundPick>> {
    let epochs: Vec<&[Vec<usize>]> = arena.satellite_city_lists().collect();
    greedy_select(weights, deploy_num, densities, &epochs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::covered_city_counts;
    use crate::visibility::arena_from_lists;
    use proptest::prelude::*;

    fn refs(epochs: &[Vec<Vec<usize>>]) -> Vec<&[Vec<usize>]> {
        epochs.iter().map(|e| e.as_slice()).collect()
    }

    fn scenario_a() -> Vec<Vec<Vec<usize>>> {
        vec![
            vec![vec![0], vec![1], vec![]],
            vec![vec![], vec![1], vec![0, 1]],
        ]
    }

    #[test]
    fn test_scenario_a() {
        let epochs = scenario_a();
        let weights = [(0, 0.9), (1, 0.6), (2, 0.5)];
        let picks = greedy_select(&weights, 2, &[5, 10], &refs(&epochs)).unwrap();

        assert_eq!(selected_indices(&picks), vec![1, 2]);
        assert_eq!((picks[0].unique, picks[0].ideal), (20, 20));
        // sat 2 and sat 0 tie on unique (5); sat 2 wins on ideal (15 vs 5)
        assert_eq!((picks[1].unique, picks[1].ideal), (5, 15));
    }

    #[test]
    fn test_scenario_a_through_arena() {
        let arena = arena_from_lists(3, 2, &scenario_a());
        let picks = round_placement(&[(0, 1.0), (1, 0.5), (2, 0.5)], 2, &[5, 10], &arena).unwrap();
        assert_eq!(selected_indices(&picks), vec![1, 2]);
    }

    #[test]
    fn test_scenario_b_unseen_city() {
        // city 2 is never seen
        let lists = vec![
            vec![vec![0], vec![1]],
            vec![vec![0, 1], vec![]],
        ];
        let arena = arena_from_lists(2, 3, &lists);
        let densities = [3, 4, 1000];

        for epoch in arena.iter() {
            assert!(epoch.visibility.city_satellites[2].is_empty());
            assert!(epoch.visibility.satellite_cities.iter().flatten().all(|&k| k != 2));
            assert!(!(0..2).any(|sat| epoch.visibility.sees_city(sat, 2)));
        }

        let picks = round_placement(&[(0, 0.5), (1, 0.5)], 2, &densities, &arena).unwrap();
        assert_eq!(selected_indices(&picks), vec![0, 1]);
        assert_eq!(picks[0].ideal, 3 + 3 + 4);
        assert_eq!(picks[1].unique, 0);
        assert!(picks.iter().all(|p| p.ideal < 1000));

        let covered = covered_city_counts(&arena, &selected_indices(&picks));
        assert_eq!(covered, vec![2, 2]);
    }

    #[test]
    fn test_visible_zero_weight_fills_pool() {
        // sats 0 and 1 both see city 0; the relaxation put weight on sat 2,
        // which sees nothing
        let epochs = vec![vec![vec![0], vec![0], vec![]]];
        let picks = greedy_select(&[(0, 1.0), (2, 1.0)], 2, &[5], &refs(&epochs)).unwrap();

        assert_eq!(selected_indices(&picks), vec![0, 1]);
        assert_eq!(picks[1].weight, 0.0);
        assert_eq!((picks[1].unique, picks[1].ideal), (0, 5));
    }

    #[test]
    fn test_visible_preferred_over_blind() {
        // sat 0 sees only a zero-density city, sat 1 sees nothing
        let epochs = vec![vec![vec![0], vec![]]];
        let picks = greedy_select(&[(0, 0.2), (1, 0.9)], 1, &[0], &refs(&epochs)).unwrap();
        assert_eq!(picks[0].satellite, 0);
    }

    #[test]
    fn test_scenario_c_select_all() {
        // sat 2 only sees what sat 0 already covers
        let epochs = vec![vec![vec![0, 1], vec![2], vec![0]]];
        let weights = [(0, 1.0), (1, 1.0), (2, 1.0)];
        let picks = greedy_select(&weights, 3, &[2, 2, 2], &refs(&epochs)).unwrap();

        let mut chosen = selected_indices(&picks);
        chosen.sort_unstable();
        assert_eq!(chosen, vec![0, 1, 2]);
        assert_eq!(picks.last().unwrap().unique, 0);
    }

    #[test]
    fn test_tie_break_weight_then_index() {
        // identical coverage everywhere
        let epochs = vec![vec![vec![0], vec![0], vec![0]]];
        let picks = greedy_select(&[(0, 0.2), (1, 0.7), (2, 0.7)], 1, &[1], &refs(&epochs)).unwrap();
        assert_eq!(picks[0].satellite, 1);

        let picks = greedy_select(&[(2, 0.5), (0, 0.5), (1, 0.5)], 3, &[1], &refs(&epochs)).unwrap();
        assert_eq!(selected_indices(&picks), vec![0, 1, 2]);
    }

    #[test]
    fn test_zero_weight_is_not_a_candidate() {
        let epochs = vec![vec![vec![0], vec![1]]];
        let picks = greedy_select(&[(0, 0.0), (1, 1.0)], 1, &[100, 1], &refs(&epochs)).unwrap();
        assert_eq!(picks[0].satellite, 1);
    }

    #[test]
    fn test_underflow() {
        // sat 1 never sees anything
        let epochs = vec![vec![vec![0], vec![]], vec![vec![0], vec![]]];
        let err = greedy_select(&[(0, 1.0), (1, 1.0)], 2, &[1], &refs(&epochs)).unwrap_err();
        assert!(matches!(
            err,
            PlacementError::RoundingUnderflow {
                required: 2,
                available: 1
            }
        ));

        let err = greedy_select(&[(0, 1.0)], 2, &[1], &refs(&epochs)).unwrap_err();
        assert!(matches!(err, PlacementError::RoundingUnderflow { .. }));
    }

    #[test]
    fn test_unknown_city_rejected() {
        let epochs = vec![vec![vec![3]]];
        assert!(matches!(
            greedy_select(&[(0, 1.0)], 1, &[1, 1], &refs(&epochs)),
            Err(PlacementError::InputMalformed(_))
        ));
    }

    /// (epochs[t][sat] = cities, densities, weights)
    fn coverage_scenario() -> impl Strategy<Value = (Vec<Vec<Vec<usize>>>, Vec<u32>, Vec<(usize, f64)>)> {
        (3usize..8, 1usize..6, 1usize..4).prop_flat_map(|(sats, cities, epochs)| {
            (
                prop::collection::vec(prop::collection::vec(prop::collection::vec(any::<bool>(), cities), sats), epochs),
                prop::collection::vec(0u32..50, cities),
                prop::collection::vec(0.01f64..1.0, sats),
            )
                .prop_map(|(vis, densities, w)| {
                    let lists: Vec<Vec<Vec<usize>>> = vis
                        .into_iter()
                        .map(|epoch| {
                            epoch
                                .into_iter()
                                .map(|row| {
                                    row.into_iter()
                                        .enumerate()
                                        .filter_map(|(k, seen)| seen.then_some(k))
                                        .collect()
                                })
                                .collect()
                        })
                        .collect();
                    let weights: Vec<(usize, f64)> = w.into_iter().enumerate().collect();
                    (lists, densities, weights)
                })
        })
    }

    fn usable(epochs: &[Vec<Vec<usize>>], sats: usize) -> usize {
        (0..sats)
            .filter(|&s| epochs.iter().any(|e| !e[s].is_empty()))
            .count()
    }

    proptest! {
        #[test]
        fn prop_exact_distinct_selection((epochs, densities, weights) in coverage_scenario(), d in 1usize..8) {
            let available = usable(&epochs, weights.len());
            prop_assume!(available > 0);
            let deploy = d.min(available);

            let picks = greedy_select(&weights, deploy, &densities, &refs(&epochs)).unwrap();
            let mut chosen = selected_indices(&picks);
            prop_assert_eq!(chosen.len(), deploy);
            chosen.sort_unstable();
            chosen.dedup();
            prop_assert_eq!(chosen.len(), deploy);
        }

        #[test]
        fn prop_idempotent((epochs, densities, weights) in coverage_scenario()) {
            let deploy = usable(&epochs, weights.len());
            prop_assume!(deploy > 0);

            let first = greedy_select(&weights, deploy, &densities, &refs(&epochs)).unwrap();
            let second = greedy_select(&weights, deploy, &densities, &refs(&epochs)).unwrap();
            prop_assert_eq!(first, second);
        }

        #[test]
        fn prop_unique_non_increasing((epochs, densities, weights) in coverage_scenario()) {
            let deploy = usable(&epochs, weights.len());
            prop_assume!(deploy > 0);

            let picks = greedy_select(&weights, deploy, &densities, &refs(&epochs)).unwrap();
            for pair in picks.windows(2) {
                prop_assert!(pair[0].unique >= pair[1].unique);
            }
        }
    }
}
