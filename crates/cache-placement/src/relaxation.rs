//! Continuous relaxation of the cache placement problem
//!
//! ```text
//! max d
//!   Σ_i x_i                                   = D
//!   y_ikt                                    ≤ x_i         (visible (i,k,t) only)
//!   Σ_k y_ikt · ρ_k                          ≤ cap         ∀ i,t
//!   Σ_ik y_ikt · ρ_k · (1 + λ·w_k)  - d      ≥ 0           ∀ t
//!   0 ≤ x, y ≤ 1,  d ≥ 0
//! ```
//!
//! Coverage variables exist only where the satellite sees the city at that
//! epoch; every other y is fixed at zero by omission.

use crate::config::PlacementConfig;
use crate::solver::{Direction, LinearProgram, LpBackend, LpStatus, Sense, VarId};
use crate::visibility::VisibilityArena;
use crate::{PlacementError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Solver values at or below this are treated as zero
pub const ZERO_TOLERANCE: f64 = 1e-9;

/// Key of a coverage variable: (satellite, city, epoch)
pub type CoverageKey = (usize, usize, usize);

/// Fractional (x, y, d) assignment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FractionalPlacement {
    pub status: LpStatus,
    /// Worst-case weighted coverage d
    pub objective: f64,
    /// (satellite, x_i) for every strictly positive x_i, ascending by satellite
    pub x: Vec<(usize, f64)>,
    /// Strictly positive y only; absent keys are zero
    #[serde(skip)]
    pub coverage: BTreeMap<CoverageKey, f64>,
}

impl FractionalPlacement {
    /// `deploy_num / S` on every satellite with no coverage. Satisfies every
    /// constraint with d = 0.
    pub fn uniform(satellites: usize, deploy_num: usize, status: LpStatus) -> Self {
        let share = deploy_num as f64 / satellites as f64;
        Self {
            status,
            objective: 0.0,
            x: (0..satellites).map(|i| (i, share)).collect(),
            coverage: BTreeMap::new(),
        }
    }

    pub fn weight(&self, satellite: usize) -> f64 {
        self.x
            .binary_search_by_key(&satellite, |&(i, _)| i)
            .map(|pos| self.x[pos].1)
            .unwrap_or(0.0)
    }

    pub fn coverage(&self, satellite: usize, city: usize, epoch: usize) -> f64 {
        self.coverage
            .get(&(satellite, city, epoch))
            .copied()
            .unwrap_or(0.0)
    }

    /// Σ x_i
    pub fn total_weight(&self) -> f64 {
        self.x.iter().map(|&(_, w)| w).sum()
    }

    /// Σ_k y_ikt · ρ_k for one satellite at one epoch
    pub fn satellite_load(&self, satellite: usize, epoch: usize, densities: &[u32]) -> f64 {
        self.coverage
            .range((satellite, 0, 0)..(satellite + 1, 0, 0))
            .filter(|&(&(_, _, t), _)| t == epoch)
            .map(|(&(_, k, _), &y)| y * densities[k] as f64)
            .sum()
    }

    /// Σ_ik y_ikt · ρ_k at one epoch
    pub fn epoch_load(&self, epoch: usize, densities: &[u32]) -> f64 {
        self.coverage
            .iter()
            .filter(|&(&(_, _, t), _)| t == epoch)
            .map(|(&(_, k, _), &y)| y * densities[k] as f64)
            .sum()
    }
}

/// The relaxation as a linear program plus the variable bookkeeping needed
/// to read a solution back
#[derive(Debug, Clone)]
pub struct PlacementProgram {
    pub program: LinearProgram,
    pub x: Vec<VarId>,
    pub y: Vec<(CoverageKey, VarId)>,
    pub d: VarId,
}

fn validate(
    arena: &VisibilityArena,
    densities: &[u32],
    fallback_weights: &[f64],
    config: &PlacementConfig,
) -> Result<()> {
    let layout = arena.layout();
    if arena.is_empty() {
        return Err(PlacementError::InputMalformed("no epochs to place over".into()));
    }
    if densities.len() != layout.cities || fallback_weights.len() != layout.cities {
        return Err(PlacementError::InputMalformed(format!(
            "{} cities in layout but {} densities and {} fallback weights",
            layout.cities,
            densities.len(),
            fallback_weights.len()
        )));
    }
    if config.deploy_num == 0 || config.deploy_num > layout.satellites {
        return Err(PlacementError::InputMalformed(format!(
            "deploy_num {} must be in 1..={}",
            config.deploy_num, layout.satellites
        )));
    }
    if config.satellite_capacity.is_nan() || config.satellite_capacity < 0.0 {
        return Err(PlacementError::InputMalformed(format!(
            "satellite capacity {} must be non-negative",
            config.satellite_capacity
        )));
    }
    if !config.lambda.is_finite() || fallback_weights.iter().any(|w| !w.is_finite()) {
        return Err(PlacementError::InputMalformed("lambda and fallback weights must be finite".into()));
    }
    Ok(())
}

/// Build the relaxation for a cycle's worth of visibility
pub fn formulate(
    arena: &VisibilityArena,
    densities: &[u32],
    fallback_weights: &[f64],
    config: &PlacementConfig,
) -> Result<PlacementProgram> {
    validate(arena, densities, fallback_weights, config)?;
    let layout = arena.layout();

    let mut program = LinearProgram::new(Direction::Maximise);
    let x: Vec<VarId> = (0..layout.satellites)
        .map(|i| program.add_variable(format!("x[{}]", i), 0.0, Some(1.0)))
        .collect();
    let d = program.add_variable("d", 0.0, None);

    program.add_constraint(
        "deploy",
        x.iter().map(|&xi| (xi, 1.0)).collect(),
        Sense::Eq,
        config.deploy_num as f64,
    );

    let bonus: Vec<f64> = densities
        .iter()
        .zip(fallback_weights)
        .map(|(&rho, &w)| rho as f64 * (1.0 + config.lambda * w))
        .collect();

    let mut y = Vec::new();
    for (t, lists) in arena.satellite_city_lists().enumerate() {
        let mut epoch_terms = Vec::new();

        for (i, cities) in lists.iter().enumerate() {
            let mut load_terms = Vec::with_capacity(cities.len());

            for &k in cities {
                let yv = program.add_variable(format!("y[{},{},{}]", i, k, t), 0.0, Some(1.0));
                program.add_constraint(
                    format!("coverage[{},{},{}]", i, k, t),
                    vec![(yv, 1.0), (x[i], -1.0)],
                    Sense::Le,
                    0.0,
                );
                load_terms.push((yv, densities[k] as f64));
                epoch_terms.push((yv, bonus[k]));
                y.push(((i, k, t), yv));
            }

            if config.satellite_capacity.is_finite() && !load_terms.is_empty() {
                program.add_constraint(
                    format!("satcap[{},{}]", i, t),
                    load_terms,
                    Sense::Le,
                    config.satellite_capacity,
                );
            }
        }

        epoch_terms.push((d, -1.0));
        program.add_constraint(format!("worst[{}]", t), epoch_terms, Sense::Ge, 0.0);
    }

    program.set_objective(vec![(d, 1.0)]);

    Ok(PlacementProgram { program, x, y, d })
}

fn extract(formulation: &PlacementProgram, values: &[f64], status: LpStatus) -> FractionalPlacement {
    let x = formulation
        .x
        .iter()
        .enumerate()
        .filter_map(|(i, id)| {
            let v = values[id.0];
            (v > ZERO_TOLERANCE).then_some((i, v.min(1.0)))
        })
        .collect();

    let coverage = formulation
        .y
        .iter()
        .filter_map(|&(key, id)| {
            let v = values[id.0];
            (v > ZERO_TOLERANCE).then_some((key, v.min(1.0)))
        })
        .collect();

    FractionalPlacement {
        status,
        objective: values[formulation.d.0].max(0.0),
        x,
        coverage,
    }
}

/// Formulate and solve the relaxation.
///
/// A time-limited solve is accepted. When it carries no values the uniform
/// incumbent (see [`FractionalPlacement::uniform`]) stands in.
pub fn solve_relaxation(
    arena: &VisibilityArena,
    densities: &[u32],
    fallback_weights: &[f64],
    config: &PlacementConfig,
    backend: &dyn LpBackend,
) -> Result<FractionalPlacement> {
    let formulation = formulate(arena, densities, fallback_weights, config)?;
    info!(
        "Relaxation: {} variables ({} coverage), {} constraints over {} epochs",
        formulation.program.variables.len(),
        formulation.y.len(),
        formulation.program.constraints.len(),
        arena.len()
    );

    let outcome = backend.solve(&formulation.program, config.time_limit())?;

    let placement = match (outcome.status, outcome.values) {
        (LpStatus::Infeasible, _) => return Err(PlacementError::Infeasible),
        (LpStatus::Unbounded, _) => return Err(PlacementError::Unbounded),
        (LpStatus::Other(reason), _) => return Err(PlacementError::Solver(reason)),
        (status @ (LpStatus::Optimal | LpStatus::TimeLimited), Some(values)) => {
            if values.len() != formulation.program.variables.len() {
                return Err(PlacementError::Solver(format!(
                    "backend returned {} values for {} variables",
                    values.len(),
                    formulation.program.variables.len()
                )));
            }
            if status == LpStatus::TimeLimited {
                warn!("Relaxation hit its time limit; using best solution found");
            }
            extract(&formulation, &values, status)
        }
        (LpStatus::TimeLimited, None) => {
            warn!("Relaxation hit its time limit with no incumbent; using uniform spread");
            FractionalPlacement::uniform(
                arena.layout().satellites,
                config.deploy_num,
                LpStatus::TimeLimited,
            )
        }
        (LpStatus::Optimal, None) => {
            return Err(PlacementError::Solver("optimal status without values".into()));
        }
    };

    info!(
        "Relaxation status {:?}: d = {:.3}, {} satellites with x > 0",
        placement.status,
        placement.objective,
        placement.x.len()
    );

    Ok(placement)
}
