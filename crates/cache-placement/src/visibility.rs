//! Per-epoch visibility between satellites and the ground tiers
//!
//! A satellite sees a city (or ground station) at an epoch iff their
//! propagation delay is strictly below the configured bound. Each epoch's
//! relation is stored as a dense matrix and as adjacency lists in both
//! directions, then appended to a cycle-wide [`VisibilityArena`].

use crate::delay::DelayMatrix;
use crate::relay::{rank_relay_paths, RelayHop};
use crate::NodeLayout;
use nalgebra::DMatrix;
use rayon::prelude::*;
use tracing::{debug, info};

/// Visibility relation for one epoch
#[derive(Debug, Clone)]
pub struct EpochVisibility {
    /// Satellite x city
    pub city_matrix: DMatrix<bool>,
    /// Satellite x ground station
    pub ground_matrix: DMatrix<bool>,
    pub satellite_cities: Vec<Vec<usize>>,
    pub city_satellites: Vec<Vec<usize>>,
    pub satellite_grounds: Vec<Vec<usize>>,
    pub ground_satellites: Vec<Vec<usize>>,
}

impl EpochVisibility {
    /// Visit every (satellite, ground-or-city) pair once and test `delay < bound`
    pub fn build(delay: &DelayMatrix, layout: &NodeLayout, bound: f64) -> Self {
        let s = layout.satellites;
        let g = layout.ground_stations;
        let c = layout.cities;

        let mut city_matrix = DMatrix::from_element(s, c, false);
        let mut ground_matrix = DMatrix::from_element(s, g, false);
        let mut satellite_cities = vec![Vec::new(); s];
        let mut city_satellites = vec![Vec::new(); c];
        let mut satellite_grounds = vec![Vec::new(); s];
        let mut ground_satellites = vec![Vec::new(); g];

        for sat in 0..s {
            for gs in 0..g {
                if delay[(sat, layout.ground_column(gs))] < bound {
                    ground_matrix[(sat, gs)] = true;
                    ground_satellites[gs].push(sat);
                    satellite_grounds[sat].push(gs);
                }
            }
            for city in 0..c {
                if delay[(sat, layout.city_column(city))] < bound {
                    city_matrix[(sat, city)] = true;
                    city_satellites[city].push(sat);
                    satellite_cities[sat].push(city);
                }
            }
        }

        Self {
            city_matrix,
            ground_matrix,
            satellite_cities,
            city_satellites,
            satellite_grounds,
            ground_satellites,
        }
    }

    #[inline]
    pub fn sees_city(&self, satellite: usize, city: usize) -> bool {
        self.city_matrix[(satellite, city)]
    }

    #[inline]
    pub fn sees_ground(&self, satellite: usize, ground_station: usize) -> bool {
        self.ground_matrix[(satellite, ground_station)]
    }

    /// Number of (satellite, city) visible pairs
    pub fn city_links(&self) -> usize {
        self.satellite_cities.iter().map(Vec::len).sum()
    }
}

/// Everything derived from one sampled epoch
#[derive(Debug, Clone)]
pub struct EpochArtifacts {
    /// Discrete instant this epoch was sampled at
    pub instant: usize,
    pub visibility: EpochVisibility,
    /// Per city, relay hops sorted ascending by latency
    pub relay_paths: Vec<Vec<RelayHop>>,
}

impl EpochArtifacts {
    pub fn build(instant: usize, delay: &DelayMatrix, layout: &NodeLayout, bound: f64) -> Self {
        let visibility = EpochVisibility::build(delay, layout, bound);
        let relay_paths = rank_relay_paths(delay, layout, &visibility);
        debug!(
            "Epoch {}: {} city links, {} cities with a relay path",
            instant,
            visibility.city_links(),
            relay_paths.iter().filter(|p| !p.is_empty()).count()
        );
        Self {
            instant,
            visibility,
            relay_paths,
        }
    }

    /// Lowest-latency relay for a city at this epoch
    pub fn best_relay(&self, city: usize) -> Option<&RelayHop> {
        self.relay_paths.get(city).and_then(|p| p.first())
    }
}

/// Append-only per-epoch artifacts for a whole orbital cycle, indexed by
/// epoch position (not by instant)
#[derive(Debug, Clone)]
pub struct VisibilityArena {
    layout: NodeLayout,
    epochs: Vec<EpochArtifacts>,
}

impl VisibilityArena {
    pub fn new(layout: NodeLayout) -> Self {
        Self {
            layout,
            epochs: Vec::new(),
        }
    }

    pub fn push(&mut self, artifacts: EpochArtifacts) {
        self.epochs.push(artifacts);
    }

    pub fn layout(&self) -> &NodeLayout {
        &self.layout
    }

    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    pub fn get(&self, epoch: usize) -> Option<&EpochArtifacts> {
        self.epochs.get(epoch)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EpochArtifacts> {
        self.epochs.iter()
    }

    /// Satellite -> cities lists, one per epoch
    pub fn satellite_city_lists(&self) -> impl Iterator<Item = &[Vec<usize>]> {
        self.epochs
            .iter()
            .map(|e| e.visibility.satellite_cities.as_slice())
    }

    /// Whether each satellite sees at least one city at some epoch
    pub fn satellites_with_coverage(&self) -> Vec<bool> {
        let mut seen = vec![false; self.layout.satellites];
        for lists in self.satellite_city_lists() {
            for (sat, cities) in lists.iter().enumerate() {
                if !cities.is_empty() {
                    seen[sat] = true;
                }
            }
        }
        seen
    }
}

/// Build every epoch's artifacts in parallel.
///
/// Epochs are independent; each produces its own slot and collection keeps
/// the input order, so arena index `t` matches `matrices[t]`.
pub fn build_arena(matrices: &[(usize, DelayMatrix)], layout: NodeLayout, bound: f64) -> VisibilityArena {
    info!(
        "Building visibility for {} epochs ({} sats, {} gateways, {} cities, bound {})",
        matrices.len(),
        layout.satellites,
        layout.ground_stations,
        layout.cities,
        bound
    );

    let built: Vec<EpochArtifacts> = matrices
        .par_iter()
        .map(|(instant, delay)| EpochArtifacts::build(*instant, delay, &layout, bound))
        .collect();

    let mut arena = VisibilityArena::new(layout);
    for artifacts in built {
        arena.push(artifacts);
    }
    arena
}

/// Arena from explicit per-epoch satellite→cities lists, with no gateways
#[cfg(test)]
pub(crate) fn arena_from_lists(
    satellites: usize,
    cities: usize,
    epochs: &[Vec<Vec<usize>>],
) -> VisibilityArena {
    let layout = NodeLayout::new(satellites, 0, cities);
    let mut arena = VisibilityArena::new(layout);
    for (t, lists) in epochs.iter().enumerate() {
        let mut m = DMatrix::from_element(satellites, layout.total_nodes(), 100.0);
        for (i, seen) in lists.iter().enumerate() {
            for &k in seen {
                m[(i, layout.city_column(k))] = 1.0;
            }
        }
        arena.push(EpochArtifacts::build(t + 1, &m, &layout, 10.0));
    }
    arena
}
