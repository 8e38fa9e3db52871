//! Snapshot readers.
//!
//! The pipeline only talks to [`SimulationReader`] and [`Snapshot`]. Two
//! readers ship with the crate: [`JsonSnapshotReader`] for snapshot files on
//! disk and [`SyntheticReader`], which generates deterministic turbulence in
//! memory.

mod json;
mod synthetic;

pub use json::*;
pub use synthetic::*;

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::schema::{Component, ReaderConfig, RunConfig};

/// Parameter holding the grid width in cells.
pub const GRID_WIDTH_PARAMETER: &str = "xcells_ini";

/// Parameter holding the elapsed simulated time.
pub const TIME_PARAMETER: &str = "time";

/// One opened snapshot.
pub trait Snapshot {
    /// File (or virtual path) this snapshot was read from.
    fn path(&self) -> &Path;

    /// Read a scalar parameter.
    fn read_parameter(&self, name: &str) -> Result<f64, ReaderError>;

    /// Cell identifiers in the snapshot's internal order.
    fn read_cell_ids(&self) -> Result<Vec<u64>, ReaderError>;

    /// Read a variable with an operator applied, in internal cell order.
    fn read_variable(&self, name: &str, component: Component) -> Result<Vec<f64>, ReaderError>;

    /// `(x, y)` coordinates of the given cells, in the order given.
    fn cell_coordinates(&self, cell_ids: &[u64]) -> Result<Vec<[f64; 2]>, ReaderError>;
}

/// Opens snapshots by frame index.
pub trait SimulationReader: Send + Sync {
    /// Path of the snapshot for `frame`.
    fn snapshot_path(&self, frame: u32) -> PathBuf;

    /// Open the snapshot for `frame`.
    fn open(&self, frame: u32) -> Result<Box<dyn Snapshot>, ReaderError>;
}

/// `bulk.NNNNNNN.<ext>` under `bulk_path`.
pub fn snapshot_path(bulk_path: &Path, frame: u32, extension: &str) -> PathBuf {
    bulk_path.join(format!("bulk.{frame:07}.{extension}"))
}

/// Build the reader a run is configured with.
pub fn build_reader(config: &RunConfig) -> Box<dyn SimulationReader> {
    match &config.reader {
        ReaderConfig::Json => Box::new(JsonSnapshotReader::new(&config.bulk_path)),
        ReaderConfig::Synthetic(synthetic) => {
            Box::new(SyntheticReader::new(&config.bulk_path, synthetic.clone()))
        }
    }
}

/// Reader errors. Every variant names the snapshot involved.
#[derive(Debug, thiserror::Error)]
pub enum ReaderError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{path} has no variable \"{name}\"")]
    MissingVariable { path: PathBuf, name: String },
    #[error("{path} has no parameter \"{name}\"")]
    MissingParameter { path: PathBuf, name: String },
    #[error("{path}: operator {component} does not apply to variable \"{name}\"")]
    InvalidOperator {
        path: PathBuf,
        name: String,
        component: Component,
    },
    #[error("{path} has no cell {cell_id}")]
    UnknownCell { path: PathBuf, cell_id: u64 },
    #[error("{path} is malformed: {reason}")]
    Malformed { path: PathBuf, reason: String },
}

/// Variable payload: one value or one 3-vector per cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VariableData {
    Scalar(Vec<f64>),
    Vector(Vec<[f64; 3]>),
}

impl VariableData {
    pub fn len(&self) -> usize {
        match self {
            VariableData::Scalar(values) => values.len(),
            VariableData::Vector(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply a read operator. `None` if the operator does not fit the payload.
    pub fn apply(&self, component: Component) -> Option<Vec<f64>> {
        match (self, component) {
            (VariableData::Scalar(values), Component::Pass) => Some(values.clone()),
            (VariableData::Vector(values), Component::Magnitude) => Some(
                values
                    .iter()
                    .map(|v| (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt())
                    .collect(),
            ),
            (VariableData::Vector(values), axis) => {
                let i = axis.axis_index()?;
                Some(values.iter().map(|v| v[i]).collect())
            }
            (VariableData::Scalar(_), _) => None,
        }
    }
}

/// Serialized form of one snapshot. `coordinates[i]` belongs to `cell_ids[i]`
/// and every variable is stored in the same cell order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotData {
    pub parameters: BTreeMap<String, f64>,
    pub cell_ids: Vec<u64>,
    pub coordinates: Vec<[f64; 2]>,
    pub variables: BTreeMap<String, VariableData>,
}

/// A snapshot held fully in memory.
#[derive(Debug)]
pub struct LoadedSnapshot {
    path: PathBuf,
    data: SnapshotData,
    index: HashMap<u64, usize>,
}

impl LoadedSnapshot {
    /// Wrap snapshot data, checking that every array matches the cell count.
    pub fn new(path: PathBuf, data: SnapshotData) -> Result<Self, ReaderError> {
        let cells = data.cell_ids.len();
        let malformed = |reason: String| ReaderError::Malformed {
            path: path.clone(),
            reason,
        };

        if data.coordinates.len() != cells {
            return Err(malformed(format!(
                "{} coordinates for {cells} cells",
                data.coordinates.len()
            )));
        }
        if let Some((name, values)) = data.variables.iter().find(|(_, v)| v.len() != cells) {
            return Err(malformed(format!(
                "variable \"{name}\" has {} values for {cells} cells",
                values.len()
            )));
        }

        let index: HashMap<u64, usize> = data
            .cell_ids
            .iter()
            .enumerate()
            .map(|(i, &id)| (id, i))
            .collect();
        if index.len() != cells {
            return Err(malformed("duplicate cell ids".to_string()));
        }

        Ok(Self { path, data, index })
    }

    pub fn data(&self) -> &SnapshotData {
        &self.data
    }
}

impl Snapshot for LoadedSnapshot {
    fn path(&self) -> &Path {
        &self.path
    }

    fn read_parameter(&self, name: &str) -> Result<f64, ReaderError> {
        self.data
            .parameters
            .get(name)
            .copied()
            .ok_or_else(|| ReaderError::MissingParameter {
                path: self.path.clone(),
                name: name.to_string(),
            })
    }

    fn read_cell_ids(&self) -> Result<Vec<u64>, ReaderError> {
        Ok(self.data.cell_ids.clone())
    }

    fn read_variable(&self, name: &str, component: Component) -> Result<Vec<f64>, ReaderError> {
        let data = self
            .data
            .variables
            .get(name)
            .ok_or_else(|| ReaderError::MissingVariable {
                path: self.path.clone(),
                name: name.to_string(),
            })?;
        data.apply(component)
            .ok_or_else(|| ReaderError::InvalidOperator {
                path: self.path.clone(),
                name: name.to_string(),
                component,
            })
    }

    fn cell_coordinates(&self, cell_ids: &[u64]) -> Result<Vec<[f64; 2]>, ReaderError> {
        cell_ids
            .iter()
            .map(|id| {
                self.index
                    .get(id)
                    .map(|&i| self.data.coordinates[i])
                    .ok_or_else(|| ReaderError::UnknownCell {
                        path: self.path.clone(),
                        cell_id: *id,
                    })
            })
            .collect()
    }
}
