//! Satellite Cache Placement
//!
//! Picks a fixed-size set of satellites to act as content caches so that the
//! worst-case (over the orbital cycle) density-weighted city coverage is as
//! high as possible, subject to per-satellite serving capacity.
//!
//! # Pipeline
//!
//! ```text
//! sampled epochs ──► delay matrices ──► visibility + relay paths (per epoch)
//!                                              │
//!                                              ▼
//!                                  VisibilityArena (whole cycle)
//!                                     │                    │
//!                                     ▼                    │
//!                      LP relaxation (max d)               │
//!                                     │ x_i                │
//!                                     ▼                    ▼
//!                              greedy rounding ──► deploy_num satellites
//! ```
//!
//! # Relaxation
//!
//! | Constraint | Meaning |
//! |------------|---------|
//! | Σ x_i = D                                   | exact deploy budget |
//! | y_ikt ≤ x_i · vis(i,k,t)                    | serve only via a chosen, visible satellite |
//! | Σ_k y_ikt · ρ_k ≤ cap                       | per-satellite capacity at every epoch |
//! | Σ_ik y_ikt · ρ_k · (1 + λ·w_k) ≥ d          | d bounds coverage at every epoch |

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod config;
pub mod delay;
pub mod pipeline;
pub mod relaxation;
pub mod relay;
pub mod rounding;
pub mod solver;
pub mod visibility;

pub use config::{ConstellationParameters, PlacementConfig};
pub use delay::{DelaySource, InMemoryDelaySource, JsonDelayStore};
pub use pipeline::{run_placement, PlacementInputs, PlacementReport};
pub use relaxation::{solve_relaxation, FractionalPlacement};
pub use relay::RelayHop;
pub use rounding::{round_placement, RoundPick};
pub use solver::{GoodLpBackend, LpBackend, LpStatus};
pub use visibility::{build_arena, EpochArtifacts, EpochVisibility, VisibilityArena};

/// Default number of cache satellites
pub const DEFAULT_DEPLOY_NUM: usize = 44;

/// Default per-satellite serving capacity (scaled density units)
pub const DEFAULT_SATELLITE_CAPACITY: f64 = 2000.0;

/// Default weight of the fallback-distance bonus in the coverage objective
pub const DEFAULT_LAMBDA: f64 = 0.01;

/// Default distance in discrete instants between sampled epochs
pub const DEFAULT_EPOCH_STRIDE: usize = 60;

/// Default wall-clock budget for the LP solve, in seconds
pub const DEFAULT_TIME_LIMIT_SECS: u64 = 180;

#[derive(Error, Debug)]
pub enum PlacementError {
    #[error("Malformed input: {0}")]
    InputMalformed(String),
    #[error("Relaxed placement is infeasible")]
    Infeasible,
    #[error("Relaxed placement is unbounded (bounded variables should make this unreachable)")]
    Unbounded,
    #[error("LP solver failure: {0}")]
    Solver(String),
    #[error("Rounding underflow: need {required} satellites, only {available} usable")]
    RoundingUnderflow { required: usize, available: usize },
    #[error("Asset error: {0}")]
    Asset(#[from] ground_assets::AssetError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PlacementError>;

/// Column layout of a per-epoch delay matrix.
///
/// Satellites occupy columns `0..S`, ground stations `S..S+G` and cities
/// `S+G..S+G+C`. Rows are indexed by satellite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeLayout {
    pub satellites: usize,
    pub ground_stations: usize,
    pub cities: usize,
}

impl NodeLayout {
    pub fn new(satellites: usize, ground_stations: usize, cities: usize) -> Self {
        Self {
            satellites,
            ground_stations,
            cities,
        }
    }

    pub fn total_nodes(&self) -> usize {
        self.satellites + self.ground_stations + self.cities
    }

    #[inline]
    pub fn ground_column(&self, ground_station: usize) -> usize {
        self.satellites + ground_station
    }

    #[inline]
    pub fn city_column(&self, city: usize) -> usize {
        self.satellites + self.ground_stations + city
    }
}
