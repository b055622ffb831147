//! Placement configuration and constellation parameters

use crate::{
    PlacementError, Result, DEFAULT_DEPLOY_NUM, DEFAULT_EPOCH_STRIDE, DEFAULT_LAMBDA,
    DEFAULT_SATELLITE_CAPACITY, DEFAULT_TIME_LIMIT_SECS,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Rows of the parameter file
const ROW_NAME: usize = 0;
const ROW_SATELLITES: usize = 1;
const ROW_CYCLE: usize = 2;
const ROW_BOUND: usize = 5;
const PARAMETER_ROWS: usize = 6;

/// One constellation column of the parameter file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstellationParameters {
    pub name: String,
    pub satellites: usize,
    /// Cycle length in discrete instants
    pub cycle: usize,
    /// Visibility bound on propagation delay
    pub bound: f64,
}

impl ConstellationParameters {
    /// Load every constellation column from a comma-separated parameter file.
    ///
    /// Row 0 holds names, row 1 satellite counts, row 2 cycle lengths and
    /// row 5 visibility bounds. Rows 3-4 must parse but are not used.
    pub fn load_all(path: impl AsRef<Path>) -> Result<Vec<Self>> {
        let path = path.as_ref();
        info!("Loading constellation parameters from {:?}", path);
        Self::parse(&fs::read_to_string(path)?)
    }

    /// Load one constellation by name, or the first column when `name` is `None`
    pub fn load(path: impl AsRef<Path>, name: Option<&str>) -> Result<Self> {
        let all = Self::load_all(path)?;
        match name {
            Some(name) => all.into_iter().find(|c| c.name == name).ok_or_else(|| {
                PlacementError::InputMalformed(format!("constellation {:?} not in parameter file", name))
            }),
            None => all
                .into_iter()
                .next()
                .ok_or_else(|| PlacementError::InputMalformed("parameter file has no columns".into())),
        }
    }

    pub fn parse(contents: &str) -> Result<Vec<Self>> {
        let rows: Vec<Vec<&str>> = contents
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| l.split(',').map(str::trim).collect())
            .collect();

        if rows.len() < PARAMETER_ROWS {
            return Err(PlacementError::InputMalformed(format!(
                "parameter file needs {} rows, found {}",
                PARAMETER_ROWS,
                rows.len()
            )));
        }

        let columns = rows[ROW_NAME].len();
        let mut numeric: Vec<Vec<f64>> = Vec::with_capacity(rows.len() - 1);
        for (r, row) in rows.iter().enumerate().skip(1) {
            if row.len() != columns {
                return Err(PlacementError::InputMalformed(format!(
                    "parameter row {} has {} columns, expected {}",
                    r,
                    row.len(),
                    columns
                )));
            }
            let values = row
                .iter()
                .map(|v| {
                    v.parse::<f64>().map_err(|_| {
                        PlacementError::InputMalformed(format!("parameter row {}: invalid number {:?}", r, v))
                    })
                })
                .collect::<Result<Vec<f64>>>()?;
            numeric.push(values);
        }

        let value = |row: usize, col: usize| numeric[row - 1][col];

        (0..columns)
            .map(|col| {
                let satellites = value(ROW_SATELLITES, col);
                let cycle = value(ROW_CYCLE, col);
                if satellites < 0.0 || cycle < 0.0 {
                    return Err(PlacementError::InputMalformed(format!(
                        "constellation {:?}: negative satellite count or cycle",
                        rows[ROW_NAME][col]
                    )));
                }
                Ok(Self {
                    name: rows[ROW_NAME][col].to_string(),
                    satellites: satellites as usize,
                    cycle: cycle as usize,
                    bound: value(ROW_BOUND, col),
                })
            })
            .collect()
    }
}

/// Plain configuration record for one placement run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementConfig {
    /// Exact number of cache satellites to select
    pub deploy_num: usize,
    /// Per-satellite serving capacity; infinite disables the constraint
    pub satellite_capacity: f64,
    /// Weight of the fallback-distance bonus
    pub lambda: f64,
    /// Distance between sampled instants
    pub epoch_stride: usize,
    /// First sampled instant
    pub first_instant: usize,
    /// Wall-clock budget for the LP solve
    pub time_limit_secs: Option<u64>,
    /// Visibility bound override; the constellation's bound is used when unset
    pub bound: Option<f64>,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            deploy_num: DEFAULT_DEPLOY_NUM,
            satellite_capacity: DEFAULT_SATELLITE_CAPACITY,
            lambda: DEFAULT_LAMBDA,
            epoch_stride: DEFAULT_EPOCH_STRIDE,
            first_instant: 1,
            time_limit_secs: Some(DEFAULT_TIME_LIMIT_SECS),
            bound: None,
        }
    }
}

impl PlacementConfig {
    /// Load from a JSON file; missing fields take their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading placement config from {:?}", path);
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }

    pub fn time_limit(&self) -> Option<Duration> {
        self.time_limit_secs.map(Duration::from_secs)
    }

    pub fn effective_bound(&self, constellation: &ConstellationParameters) -> f64 {
        self.bound.unwrap_or(constellation.bound)
    }
}

/// Instants sampled over a cycle: `first, first + stride, ...` up to `cycle` inclusive
pub fn sample_epochs(cycle: usize, stride: usize, first: usize) -> Result<Vec<usize>> {
    if stride == 0 {
        return Err(PlacementError::InputMalformed("epoch stride must be positive".into()));
    }
    if first > cycle {
        return Ok(Vec::new());
    }
    Ok((first..=cycle).step_by(stride).collect())
}
