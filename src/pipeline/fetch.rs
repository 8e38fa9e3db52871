//! Reading one key across the frame range into a buffer.

use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, info};
use rayon::prelude::*;

use super::registry::{Buffer, BufferShape, RegistryError};
use crate::compute::{REFERENCE_DENSITY, mean, proton_inertial_length};
use crate::reader::{GRID_WIDTH_PARAMETER, ReaderError, SimulationReader, Snapshot};
use crate::schema::{FetchPolicy, VariableKey};

/// Fetch errors. All of them abort the run.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("cannot read frame {frame}: {source}")]
    FrameRead {
        frame: u32,
        path: PathBuf,
        #[source]
        source: ReaderError,
    },
    #[error("frame {frame} ({path}): {key} has {actual} values, grid has {expected} cells")]
    ShapeMismatch {
        frame: u32,
        path: PathBuf,
        key: VariableKey,
        expected: usize,
        actual: usize,
    },
    #[error("frame {frame} ({path}) has a different set of cells than the start frame")]
    CellSetChanged { frame: u32, path: PathBuf },
    #[error("grid of {path} is not usable: {reason}")]
    InvalidGrid { path: PathBuf, reason: String },
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

fn open_frame(reader: &dyn SimulationReader, frame: u32) -> Result<Box<dyn Snapshot>, FetchError> {
    reader.open(frame).map_err(|source| FetchError::FrameRead {
        frame,
        path: reader.snapshot_path(frame),
        source,
    })
}

fn frame_error(frame: u32, snapshot: &dyn Snapshot) -> impl Fn(ReaderError) -> FetchError + '_ {
    move |source| FetchError::FrameRead {
        frame,
        path: snapshot.path().to_path_buf(),
        source,
    }
}

/// Square grid geometry, read once from the start frame.
#[derive(Debug, Clone)]
pub struct GridInfo {
    /// Cells per side.
    pub width: usize,
    /// Cell identifiers in ascending order; buffer columns follow this order.
    pub cell_ids: Vec<u64>,
    /// `(x, y)` of every cell, in `cell_ids` order.
    pub coordinates: Vec<[f64; 2]>,
    /// Cell spacing along the first row (m).
    pub dx: f64,
    /// Proton inertial length at the reference density (m).
    pub inertial_length: f64,
}

impl GridInfo {
    pub fn read(reader: &dyn SimulationReader, frame: u32) -> Result<Self, FetchError> {
        let snapshot = open_frame(reader, frame)?;
        let path = snapshot.path().to_path_buf();
        let invalid = |reason: String| FetchError::InvalidGrid {
            path: path.clone(),
            reason,
        };

        let width_param = snapshot
            .read_parameter(GRID_WIDTH_PARAMETER)
            .map_err(frame_error(frame, snapshot.as_ref()))?;
        if !(width_param >= 2.0 && width_param.fract() == 0.0) {
            return Err(invalid(format!("{GRID_WIDTH_PARAMETER} = {width_param}")));
        }
        let width = width_param as usize;

        let mut cell_ids = snapshot
            .read_cell_ids()
            .map_err(frame_error(frame, snapshot.as_ref()))?;
        cell_ids.sort_unstable();
        if cell_ids.len() != width * width {
            return Err(invalid(format!(
                "{} cells do not form a {width}x{width} grid",
                cell_ids.len()
            )));
        }

        let coordinates = snapshot
            .cell_coordinates(&cell_ids)
            .map_err(frame_error(frame, snapshot.as_ref()))?;
        let dx = coordinates[1][0] - coordinates[0][0];
        if !(dx > 0.0 && dx.is_finite()) {
            return Err(invalid(format!("cell spacing {dx} along the first row")));
        }

        Ok(Self {
            width,
            cell_ids,
            coordinates,
            dx,
            inertial_length: proton_inertial_length(REFERENCE_DENSITY),
        })
    }

    /// Number of cells.
    #[inline]
    pub fn cells(&self) -> usize {
        self.cell_ids.len()
    }

    /// Cell-centre x positions of the first row, in units of d_p.
    pub fn x_axis(&self) -> Vec<f64> {
        self.coordinates[..self.width]
            .iter()
            .map(|c| c[0] / self.inertial_length)
            .collect()
    }

    /// Cell-centre y positions of the first column, in units of d_p.
    pub fn y_axis(&self) -> Vec<f64> {
        self.coordinates
            .iter()
            .step_by(self.width)
            .map(|c| c[1] / self.inertial_length)
            .collect()
    }

    /// Cell spacing in units of d_p.
    pub fn dx_dp(&self) -> f64 {
        self.dx / self.inertial_length
    }
}

/// Per-frame permutation putting cells into ascending id order.
#[derive(Debug, Clone)]
pub struct CellOrdering {
    permutations: Vec<Vec<usize>>,
}

impl CellOrdering {
    /// Argsort the cell ids of every frame in `start..=end`, in parallel.
    pub fn compute(
        reader: &dyn SimulationReader,
        grid: &GridInfo,
        start: u32,
        end: u32,
    ) -> Result<Self, FetchError> {
        let permutations = (start..=end)
            .into_par_iter()
            .map(|frame| {
                let snapshot = open_frame(reader, frame)?;
                let ids = snapshot
                    .read_cell_ids()
                    .map_err(frame_error(frame, snapshot.as_ref()))?;
                let mut order: Vec<usize> = (0..ids.len()).collect();
                order.sort_unstable_by_key(|&i| ids[i]);

                let same_cells = ids.len() == grid.cells()
                    && order.iter().zip(&grid.cell_ids).all(|(&i, &id)| ids[i] == id);
                if !same_cells {
                    return Err(FetchError::CellSetChanged {
                        frame,
                        path: snapshot.path().to_path_buf(),
                    });
                }
                Ok(order)
            })
            .collect::<Result<Vec<_>, _>>()?;

        debug!("Computed cell ordering for {} frames", permutations.len());
        Ok(Self { permutations })
    }

    /// Permutation of frame `index` (relative to the start frame).
    pub fn permutation(&self, index: usize) -> &[usize] {
        &self.permutations[index]
    }

    pub fn frame_count(&self) -> usize {
        self.permutations.len()
    }
}

/// Everything a fetch job needs; shared by all jobs of a run.
pub struct FetchContext {
    pub reader: Arc<dyn SimulationReader>,
    pub grid: GridInfo,
    pub ordering: CellOrdering,
    pub start_frame: u32,
    pub end_frame: u32,
}

impl FetchContext {
    /// Read the grid from the start frame and order every frame's cells.
    pub fn prepare(
        reader: Arc<dyn SimulationReader>,
        start_frame: u32,
        end_frame: u32,
    ) -> Result<Self, FetchError> {
        let grid = GridInfo::read(reader.as_ref(), start_frame)?;
        info!(
            "Grid {}x{} cells, dx = {:.3} d_p",
            grid.width,
            grid.width,
            grid.dx_dp()
        );
        let ordering = CellOrdering::compute(reader.as_ref(), &grid, start_frame, end_frame)?;
        Ok(Self {
            reader,
            grid,
            ordering,
            start_frame,
            end_frame,
        })
    }

    pub fn frame_count(&self) -> usize {
        (self.end_frame - self.start_frame) as usize + 1
    }

    /// Read `key` for every frame into one buffer allocated up front.
    pub fn fetch(&self, key: VariableKey) -> Result<Buffer, FetchError> {
        let frames = self.frame_count();
        let name = key.field.reader_name();
        let policy = key.policy();

        let shape = match policy {
            FetchPolicy::Parameter => BufferShape::scalar(frames),
            FetchPolicy::Raw | FetchPolicy::MeanCentered => {
                BufferShape::grid(frames, self.grid.cells())
            }
        };
        let mut data = vec![0.0; shape.len()];

        for (index, slot) in data.chunks_exact_mut(shape.frame_len()).enumerate() {
            let frame = self.start_frame + index as u32;
            let snapshot = open_frame(self.reader.as_ref(), frame)?;
            let read_error = frame_error(frame, snapshot.as_ref());

            if policy == FetchPolicy::Parameter {
                slot[0] = snapshot.read_parameter(name).map_err(read_error)?;
                continue;
            }

            let values = snapshot
                .read_variable(name, key.component)
                .map_err(read_error)?;
            if values.len() != slot.len() {
                return Err(FetchError::ShapeMismatch {
                    frame,
                    path: snapshot.path().to_path_buf(),
                    key,
                    expected: slot.len(),
                    actual: values.len(),
                });
            }
            for (dst, &src) in slot.iter_mut().zip(self.ordering.permutation(index)) {
                *dst = values[src];
            }
            if policy == FetchPolicy::MeanCentered {
                let m = mean(slot);
                slot.iter_mut().for_each(|v| *v -= m);
            }
        }

        debug!("Fetched {} {}", key, shape);
        Ok(Buffer::new(key, shape, data)?)
    }
}
