//! End-to-end placement run
//!
//! Every sampled delay matrix is loaded and checked before any visibility
//! is built, so a bad file fails the run without partial work.

use crate::config::{sample_epochs, ConstellationParameters, PlacementConfig};
use crate::delay::{validate_dimensions, DelayMatrix, DelaySource};
use crate::relaxation::solve_relaxation;
use crate::rounding::{round_placement, selected_indices, RoundPick};
use crate::solver::{LpBackend, LpStatus};
use crate::visibility::{build_arena, VisibilityArena};
use crate::{NodeLayout, PlacementError, Result};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

/// Per-city inputs, indexed like the city columns of the delay matrices
#[derive(Debug, Clone, Default)]
pub struct PlacementInputs {
    /// Scaled population density ρ_k
    pub densities: Vec<u32>,
    /// Cost of serving the city from the ground, w_k
    pub fallback_weights: Vec<f64>,
}

impl PlacementInputs {
    pub fn new(densities: Vec<u32>, fallback_weights: Vec<f64>) -> Self {
        Self {
            densities,
            fallback_weights,
        }
    }

    fn validate(&self, layout: &NodeLayout) -> Result<()> {
        if self.densities.len() != layout.cities || self.fallback_weights.len() != layout.cities {
            return Err(PlacementError::InputMalformed(format!(
                "{} densities and {} fallback weights for {} cities",
                self.densities.len(),
                self.fallback_weights.len(),
                layout.cities
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacementReport {
    pub run_id: String,
    pub generated_at: String,
    pub constellation: String,
    /// Sampled instants, in arena order
    pub epochs: Vec<usize>,
    pub deploy_num: usize,
    pub status: LpStatus,
    /// Relaxation objective d
    pub objective: f64,
    /// Chosen satellites in selection order
    pub selected: Vec<usize>,
    pub rounds: Vec<RoundPick>,
    /// Strictly positive fractional x_i
    pub fractional: Vec<(usize, f64)>,
    /// Cities seen by at least one selected satellite, per epoch
    pub covered_cities: Vec<usize>,
}

/// Cities seen by any of `selected`, per epoch
pub fn covered_city_counts(arena: &VisibilityArena, selected: &[usize]) -> Vec<usize> {
    let cities = arena.layout().cities;
    arena
        .satellite_city_lists()
        .map(|lists| {
            let mut seen = vec![false; cities];
            for &sat in selected {
                for &k in &lists[sat] {
                    seen[k] = true;
                }
            }
            seen.into_iter().filter(|&s| s).count()
        })
        .collect()
}

/// Load every sampled matrix, failing on the first missing or misshapen one
fn load_all(
    source: &dyn DelaySource,
    instants: &[usize],
    layout: &NodeLayout,
) -> Result<Vec<(usize, DelayMatrix)>> {
    instants
        .iter()
        .map(|&instant| {
            let matrix = source.load(instant)?;
            validate_dimensions(&matrix, layout, instant)?;
            Ok((instant, matrix))
        })
        .collect()
}

/// Run sampling, visibility, relaxation and rounding for one constellation
pub fn run_placement(
    config: &PlacementConfig,
    constellation: &ConstellationParameters,
    layout: NodeLayout,
    source: &dyn DelaySource,
    inputs: &PlacementInputs,
    backend: &dyn LpBackend,
) -> Result<PlacementReport> {
    if layout.satellites != constellation.satellites {
        return Err(PlacementError::InputMalformed(format!(
            "layout has {} satellites, {} declares {}",
            layout.satellites, constellation.name, constellation.satellites
        )));
    }
    inputs.validate(&layout)?;

    let instants = sample_epochs(constellation.cycle, config.epoch_stride, config.first_instant)?;
    if instants.is_empty() {
        return Err(PlacementError::InputMalformed(format!(
            "no instants sampled from cycle {} (first {}, stride {})",
            constellation.cycle, config.first_instant, config.epoch_stride
        )));
    }
    info!(
        "{}: sampling {} epochs over a {}-instant cycle",
        constellation.name,
        instants.len(),
        constellation.cycle
    );

    let matrices = load_all(source, &instants, &layout)?;
    let bound = config.effective_bound(constellation);
    let arena = build_arena(&matrices, layout, bound);
    drop(matrices);

    let placement = solve_relaxation(
        &arena,
        &inputs.densities,
        &inputs.fallback_weights,
        config,
        backend,
    )?;
    let rounds = round_placement(&placement.x, config.deploy_num, &inputs.densities, &arena)?;
    let selected = selected_indices(&rounds);
    let covered_cities = covered_city_counts(&arena, &selected);

    info!(
        "Selected {} satellites; worst epoch covers {} of {} cities",
        selected.len(),
        covered_cities.iter().min().copied().unwrap_or(0),
        layout.cities
    );

    Ok(PlacementReport {
        run_id: Uuid::new_v4().to_string(),
        generated_at: chrono::Utc::now().to_rfc3339(),
        constellation: constellation.name.clone(),
        epochs: instants,
        deploy_num: config.deploy_num,
        status: placement.status,
        objective: placement.objective,
        selected,
        rounds,
        fractional: placement.x,
        covered_cities,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delay::InMemoryDelaySource;
    use crate::solver::{GoodLpBackend, LinearProgram, LpOutcome};
    use nalgebra::DMatrix;
    use std::cell::Cell;

    const NEAR: f64 = 1.0;
    const FAR: f64 = 100.0;

    /// 3 sats, 1 gateway, 2 cities; instants 1 and 2
    fn fixture() -> (ConstellationParameters, NodeLayout, InMemoryDelaySource) {
        let layout = NodeLayout::new(3, 1, 2);
        let constellation = ConstellationParameters {
            name: "Test".into(),
            satellites: 3,
            cycle: 2,
            bound: 10.0,
        };
        let mut source = InMemoryDelaySource::new();
        let visible = [
            vec![vec![0], vec![1], vec![]],
            vec![vec![], vec![1], vec![0, 1]],
        ];
        for (t, lists) in visible.iter().enumerate() {
            let mut m = DMatrix::from_element(3, layout.total_nodes(), FAR);
            m[(1, layout.ground_column(0))] = 2.0;
            for (sat, cities) in lists.iter().enumerate() {
                for &k in cities {
                    m[(sat, layout.city_column(k))] = NEAR;
                }
            }
            source.insert(t + 1, m);
        }
        (constellation, layout, source)
    }

    fn config(deploy_num: usize) -> PlacementConfig {
        PlacementConfig {
            deploy_num,
            satellite_capacity: f64::INFINITY,
            epoch_stride: 1,
            time_limit_secs: None,
            ..PlacementConfig::default()
        }
    }

    #[test]
    fn test_end_to_end() {
        let (constellation, layout, source) = fixture();
        let inputs = PlacementInputs::new(vec![5, 10], vec![0.0, 0.0]);

        let report = run_placement(
            &config(2),
            &constellation,
            layout,
            &source,
            &inputs,
            &GoodLpBackend::new(),
        )
        .unwrap();

        assert_eq!(report.epochs, vec![1, 2]);
        assert_eq!(report.status, LpStatus::Optimal);
        // x = (0.75, 1, 0.25) balances both epochs at d = 13.75
        assert!((report.objective - 13.75).abs() < 1e-6);
        assert_eq!(report.selected, vec![1, 2]);
        assert_eq!(report.rounds.len(), 2);
        assert_eq!(report.covered_cities, vec![1, 2]);
        assert!(uuid::Uuid::parse_str(&report.run_id).is_ok());

        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"constellation\":\"Test\""));
    }

    struct CountingBackend {
        calls: Cell<usize>,
    }

    impl LpBackend for CountingBackend {
        fn solve(&self, _: &LinearProgram, _: Option<std::time::Duration>) -> Result<LpOutcome> {
            self.calls.set(self.calls.get() + 1);
            Ok(LpOutcome {
                status: LpStatus::Infeasible,
                values: None,
            })
        }
    }

    #[test]
    fn test_bad_matrix_fails_before_solving() {
        let (constellation, layout, mut source) = fixture();
        source.insert(2, DMatrix::from_element(3, 4, FAR));
        let backend = CountingBackend { calls: Cell::new(0) };
        let inputs = PlacementInputs::new(vec![5, 10], vec![0.0, 0.0]);

        let err = run_placement(&config(2), &constellation, layout, &source, &inputs, &backend)
            .unwrap_err();
        assert!(matches!(err, PlacementError::InputMalformed(_)));
        assert_eq!(backend.calls.get(), 0);
    }

    #[test]
    fn test_missing_epoch_fails() {
        let (mut constellation, layout, source) = fixture();
        constellation.cycle = 3;
        let inputs = PlacementInputs::new(vec![5, 10], vec![0.0, 0.0]);
        assert!(run_placement(
            &config(2),
            &constellation,
            layout,
            &source,
            &inputs,
            &GoodLpBackend::new()
        )
        .is_err());
    }

    #[test]
    fn test_input_lengths_checked() {
        let (constellation, layout, source) = fixture();
        let inputs = PlacementInputs::new(vec![5], vec![0.0, 0.0]);
        assert!(matches!(
            run_placement(&config(2), &constellation, layout, &source, &inputs, &GoodLpBackend::new()),
            Err(PlacementError::InputMalformed(_))
        ));

        let wrong = NodeLayout::new(4, 1, 2);
        let inputs = PlacementInputs::new(vec![5, 10], vec![0.0, 0.0]);
        assert!(run_placement(&config(2), &constellation, wrong, &source, &inputs, &GoodLpBackend::new()).is_err());
    }

    #[test]
    fn test_infeasible_surfaces() {
        let (constellation, layout, source) = fixture();
        let inputs = PlacementInputs::new(vec![5, 10], vec![0.0, 0.0]);
        let backend = CountingBackend { calls: Cell::new(0) };
        assert!(matches!(
            run_placement(&config(2), &constellation, layout, &source, &inputs, &backend),
            Err(PlacementError::Infeasible)
        ));
        assert_eq!(backend.calls.get(), 1);
    }

    #[test]
    fn test_covered_city_counts() {
        let (_, layout, source) = fixture();
        let matrices = load_all(&source, &[1, 2], &layout).unwrap();
        let arena = build_arena(&matrices, layout, 10.0);
        assert_eq!(covered_city_counts(&arena, &[1, 2]), vec![1, 2]);
        assert_eq!(covered_city_counts(&arena, &[0]), vec![1, 0]);
        assert_eq!(covered_city_counts(&arena, &[]), vec![0, 0]);
    }
}
