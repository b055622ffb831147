//! Per-epoch propagation delay matrices

use crate::{NodeLayout, PlacementError, Result};
use nalgebra::DMatrix;
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Dense delay matrix: rows are satellites, columns follow [`NodeLayout`]
pub type DelayMatrix = DMatrix<f64>;

/// Source of delay matrices keyed by discrete instant
pub trait DelaySource {
    fn load(&self, instant: usize) -> Result<DelayMatrix>;
}

/// Filesystem store laid out as `<root>/<constellation>/delay/<instant>.json`.
///
/// Each file holds a JSON array of rows.
#[derive(Debug, Clone)]
pub struct JsonDelayStore {
    root: PathBuf,
    constellation: String,
}

impl JsonDelayStore {
    pub fn new(root: impl Into<PathBuf>, constellation: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            constellation: constellation.into(),
        }
    }

    pub fn path_for(&self, instant: usize) -> PathBuf {
        self.root
            .join(&self.constellation)
            .join("delay")
            .join(format!("{}.json", instant))
    }
}

impl DelaySource for JsonDelayStore {
    fn load(&self, instant: usize) -> Result<DelayMatrix> {
        let path = self.path_for(instant);
        debug!("Loading delay matrix {:?}", path);
        let reader = BufReader::new(File::open(&path)?);
        let rows: Vec<Vec<f64>> = serde_json::from_reader(reader)?;
        rows_to_matrix(&path, rows)
    }
}

fn rows_to_matrix(path: &Path, rows: Vec<Vec<f64>>) -> Result<DelayMatrix> {
    let nrows = rows.len();
    let ncols = rows.first().map(Vec::len).unwrap_or(0);
    if let Some((r, row)) = rows.iter().enumerate().find(|(_, row)| row.len() != ncols) {
        return Err(PlacementError::InputMalformed(format!(
            "{:?}: row {} has {} columns, expected {}",
            path,
            r,
            row.len(),
            ncols
        )));
    }
    Ok(DMatrix::from_fn(nrows, ncols, |r, c| rows[r][c]))
}

/// Delay matrices held in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryDelaySource {
    matrices: HashMap<usize, DelayMatrix>,
}

impl InMemoryDelaySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, instant: usize, matrix: DelayMatrix) {
        self.matrices.insert(instant, matrix);
    }
}

impl DelaySource for InMemoryDelaySource {
    fn load(&self, instant: usize) -> Result<DelayMatrix> {
        self.matrices
            .get(&instant)
            .cloned()
            .ok_or_else(|| PlacementError::InputMalformed(format!("no delay matrix for instant {}", instant)))
    }
}

/// Check a matrix against the expected layout.
///
/// Columns must span every satellite, ground station and city; rows must
/// cover at least every satellite.
pub fn validate_dimensions(matrix: &DelayMatrix, layout: &NodeLayout, instant: usize) -> Result<()> {
    if matrix.ncols() != layout.total_nodes() || matrix.nrows() < layout.satellites {
        return Err(PlacementError::InputMalformed(format!(
            "delay matrix at instant {} is {}x{}, expected at least {}x{}",
            instant,
            matrix.nrows(),
            matrix.ncols(),
            layout.satellites,
            layout.total_nodes()
        )));
    }
    Ok(())
}
