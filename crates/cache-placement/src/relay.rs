//! City-to-gateway relay ranking
//!
//! For each city, every satellite that sees it and also sees at least one
//! gateway yields candidate relays. Latency = sat→city + sat→gateway delay.
//! The placement relaxation does not read these; they are kept for
//! latency-aware routing downstream.

use crate::delay::DelayMatrix;
use crate::visibility::EpochVisibility;
use crate::NodeLayout;
use serde::{Deserialize, Serialize};

/// One city→satellite→gateway relay
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RelayHop {
    pub ground_station: usize,
    pub satellite: usize,
    pub latency_ms: f64,
}

/// Relay hops per city, sorted ascending by latency.
///
/// Cities with no satellite-to-gateway path get an empty list.
pub fn rank_relay_paths(
    delay: &DelayMatrix,
    layout: &NodeLayout,
    visibility: &EpochVisibility,
) -> Vec<Vec<RelayHop>> {
    visibility
        .city_satellites
        .iter()
        .enumerate()
        .map(|(city, satellites)| {
            let mut hops: Vec<RelayHop> = satellites
                .iter()
                .flat_map(|&sat| {
                    let uplink = delay[(sat, layout.city_column(city))];
                    visibility.satellite_grounds[sat].iter().map(move |&gs| RelayHop {
                        ground_station: gs,
                        satellite: sat,
                        latency_ms: uplink + delay[(sat, layout.ground_column(gs))],
                    })
                })
                .collect();
            // stable: equal latencies keep satellite order
            hops.sort_by(|a, b| a.latency_ms.total_cmp(&b.latency_ms));
            hops
        })
        .collect()
}
