//! Deterministic synthetic turbulence.
//!
//! A handful of divergence-free Fourier modes with a Kolmogorov amplitude
//! spectrum, advected in time, plus per-frame noise. Velocity follows the
//! magnetic fluctuation Alfvénically so that the cross-helicity diagnostics
//! have something to show. Cells are emitted in a different shuffled order
//! every frame, as a real simulation would.

use std::f64::consts::TAU;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use rand::prelude::*;
use rand_distr::Normal;

use super::{
    GRID_WIDTH_PARAMETER, LoadedSnapshot, ReaderError, SimulationReader, Snapshot, SnapshotData,
    TIME_PARAMETER, VariableData, snapshot_path, write_snapshot,
};
use crate::compute::{MU_0, PROTON_MASS, REFERENCE_DENSITY};
use crate::schema::{Field, SyntheticConfig};

const MODE_COUNT: usize = 16;
const NOISE_FRACTION: f64 = 0.05;
const CROSS_CORRELATION: f64 = 0.8;
const DENSITY_CONTRAST: f64 = 0.05;

#[derive(Debug, Clone)]
struct Mode {
    k: [f64; 2],
    amplitude: f64,
    phase: f64,
    /// Angle between the in-plane polarisation and z.
    tilt: f64,
    frequency: f64,
}

/// Generates snapshots in memory instead of reading files.
#[derive(Debug, Clone)]
pub struct SyntheticReader {
    bulk_path: PathBuf,
    config: SyntheticConfig,
    modes: Vec<Mode>,
}

impl SyntheticReader {
    pub const EXTENSION: &'static str = "synthetic";

    pub fn new(bulk_path: impl AsRef<Path>, config: SyntheticConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let kmax = (config.width / 4).max(1) as i64;

        let mut modes: Vec<Mode> = (0..MODE_COUNT)
            .map(|_| {
                let (kx, ky) = loop {
                    let kx = rng.gen_range(-kmax..=kmax);
                    let ky = rng.gen_range(-kmax..=kmax);
                    if kx != 0 || ky != 0 {
                        break (kx as f64, ky as f64);
                    }
                };
                let k = (kx * kx + ky * ky).sqrt();
                Mode {
                    k: [kx, ky],
                    amplitude: k.powf(-5.0 / 6.0),
                    phase: rng.gen_range(0.0..TAU),
                    tilt: rng.gen_range(0.0..TAU),
                    frequency: 0.2 * k,
                }
            })
            .collect();

        // Scale so the summed fluctuation has the configured rms.
        let total: f64 = modes.iter().map(|m| m.amplitude * m.amplitude).sum();
        let norm = config.amplitude * config.guide_field_nt * 1e-9 * (2.0 / total).sqrt();
        for mode in &mut modes {
            mode.amplitude *= norm;
        }

        Self {
            bulk_path: bulk_path.as_ref().to_path_buf(),
            config,
            modes,
        }
    }

    pub fn config(&self) -> &SyntheticConfig {
        &self.config
    }

    /// Generate the snapshot of one frame.
    pub fn generate(&self, frame: u32) -> Result<SnapshotData, ReaderError> {
        let width = self.config.width;
        let cells = width * width;
        let dx = self.config.cell_size;
        let time = f64::from(frame) * self.config.dt;
        let b0 = self.config.guide_field_nt * 1e-9;
        let alfven_scale = (MU_0 * REFERENCE_DENSITY * PROTON_MASS).sqrt();

        let mut rng = StdRng::seed_from_u64(
            self.config
                .seed
                .wrapping_add(u64::from(frame).wrapping_mul(0x9E37_79B9_7F4A_7C15)),
        );
        let noise = Normal::new(0.0, (NOISE_FRACTION * self.config.amplitude * b0).abs())
            .map_err(|e| ReaderError::Malformed {
                path: self.snapshot_path(frame),
                reason: format!("noise distribution: {e}"),
            })?;

        // Fields on the ordered grid, row-major with x fastest.
        let mut b = vec![[0.0f64; 3]; cells];
        let mut rho = vec![REFERENCE_DENSITY; cells];
        for (index, (cell_b, cell_rho)) in b.iter_mut().zip(rho.iter_mut()).enumerate() {
            let x = (index % width) as f64 / width as f64;
            let y = (index / width) as f64 / width as f64;
            let mut db = [0.0; 3];
            let mut compress = 0.0;
            for mode in &self.modes {
                let arg = TAU * (mode.k[0] * x + mode.k[1] * y) + mode.phase
                    - mode.frequency * time;
                let k = (mode.k[0] * mode.k[0] + mode.k[1] * mode.k[1]).sqrt();
                let s = mode.amplitude * arg.sin();
                // Perpendicular to k in-plane keeps the field divergence-free.
                db[0] += -mode.k[1] / k * mode.tilt.cos() * s;
                db[1] += mode.k[0] / k * mode.tilt.cos() * s;
                db[2] += mode.tilt.sin() * s;
                compress += arg.cos();
            }
            *cell_b = [
                db[0] + noise.sample(&mut rng),
                db[1] + noise.sample(&mut rng),
                b0 + db[2] + noise.sample(&mut rng),
            ];
            *cell_rho *= 1.0 + DENSITY_CONTRAST * compress / MODE_COUNT as f64;
        }

        let v: Vec<[f64; 3]> = b
            .iter()
            .map(|cell| {
                let scale = -CROSS_CORRELATION / alfven_scale;
                [
                    scale * cell[0] + noise.sample(&mut rng) / alfven_scale,
                    scale * cell[1] + noise.sample(&mut rng) / alfven_scale,
                    scale * (cell[2] - b0),
                ]
            })
            .collect();

        let j = curl(&b, width, dx);

        // Emit cells in a frame-specific order.
        let mut order: Vec<usize> = (0..cells).collect();
        order.shuffle(&mut rng);

        let mut data = SnapshotData {
            cell_ids: order.iter().map(|&i| i as u64 + 1).collect(),
            coordinates: order
                .iter()
                .map(|&i| {
                    [
                        ((i % width) as f64 + 0.5) * dx,
                        ((i / width) as f64 + 0.5) * dx,
                    ]
                })
                .collect(),
            ..SnapshotData::default()
        };
        data.parameters.insert(TIME_PARAMETER.to_string(), time);
        data.parameters
            .insert(GRID_WIDTH_PARAMETER.to_string(), width as f64);
        data.parameters.insert("dt".to_string(), self.config.dt);

        let reorder = |values: &[[f64; 3]]| -> VariableData {
            VariableData::Vector(order.iter().map(|&i| values[i]).collect())
        };
        data.variables
            .insert(Field::B.reader_name().to_string(), reorder(&b));
        data.variables
            .insert(Field::V.reader_name().to_string(), reorder(&v));
        data.variables
            .insert(Field::J.reader_name().to_string(), reorder(&j));
        data.variables.insert(
            Field::Rho.reader_name().to_string(),
            VariableData::Scalar(order.iter().map(|&i| rho[i]).collect()),
        );

        Ok(data)
    }

    /// Write generated frames as JSON snapshots into `dir`.
    pub fn export(
        &self,
        dir: &Path,
        frames: RangeInclusive<u32>,
    ) -> Result<Vec<PathBuf>, ReaderError> {
        frames
            .map(|frame| {
                let path = snapshot_path(dir, frame, super::JsonSnapshotReader::EXTENSION);
                write_snapshot(&path, &self.generate(frame)?)?;
                Ok(path)
            })
            .collect()
    }
}

impl SimulationReader for SyntheticReader {
    fn snapshot_path(&self, frame: u32) -> PathBuf {
        snapshot_path(&self.bulk_path, frame, Self::EXTENSION)
    }

    fn open(&self, frame: u32) -> Result<Box<dyn Snapshot>, ReaderError> {
        let snapshot = LoadedSnapshot::new(self.snapshot_path(frame), self.generate(frame)?)?;
        Ok(Box::new(snapshot))
    }
}

/// Periodic central-difference curl of a 2D field, divided by μ0.
fn curl(b: &[[f64; 3]], width: usize, dx: f64) -> Vec<[f64; 3]> {
    let at = |x: usize, y: usize| b[y * width + x];
    (0..b.len())
        .map(|index| {
            let x = index % width;
            let y = index / width;
            let east = at((x + 1) % width, y);
            let west = at((x + width - 1) % width, y);
            let north = at(x, (y + 1) % width);
            let south = at(x, (y + width - 1) % width);
            let d_dx = |c: usize| (east[c] - west[c]) / (2.0 * dx);
            let d_dy = |c: usize| (north[c] - south[c]) / (2.0 * dx);
            [
                d_dy(2) / MU_0,
                -d_dx(2) / MU_0,
                (d_dx(1) - d_dy(0)) / MU_0,
            ]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Component;

    fn reader(width: usize) -> SyntheticReader {
        SyntheticReader::new(
            "synthetic",
            SyntheticConfig {
                width,
                ..SyntheticConfig::default()
            },
        )
    }

    #[test]
    fn test_synthetic_is_deterministic() {
        let a = reader(16).generate(3).unwrap();
        let b = reader(16).generate(3).unwrap();
        assert_eq!(a.cell_ids, b.cell_ids);
        assert_eq!(a.variables, b.variables);
    }

    #[test]
    fn test_synthetic_order_changes_between_frames() {
        let r = reader(16);
        let a = r.generate(0).unwrap();
        let b = r.generate(1).unwrap();
        assert_ne!(a.cell_ids, b.cell_ids);

        let mut sorted = a.cell_ids.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (1..=256).collect::<Vec<u64>>());
    }

    #[test]
    fn test_synthetic_parameters() {
        let r = reader(8);
        let snapshot = r.open(4).unwrap();
        assert_eq!(snapshot.read_parameter(TIME_PARAMETER).unwrap(), 2.0);
        assert_eq!(snapshot.read_parameter(GRID_WIDTH_PARAMETER).unwrap(), 8.0);
        assert!(
            snapshot
                .path()
                .to_string_lossy()
                .ends_with("bulk.0000004.synthetic")
        );
    }

    #[test]
    fn test_synthetic_field_magnitudes() {
        let snapshot = reader(32).open(0).unwrap();
        let bz = snapshot.read_variable("vg_b_vol", Component::Z).unwrap();
        let mean_bz = bz.iter().sum::<f64>() / bz.len() as f64;
        assert!((mean_bz - 5e-9).abs() < 1e-9, "guide field {mean_bz}");

        let rho = snapshot.read_variable("proton/vg_rho", Component::Pass).unwrap();
        assert!(rho.iter().all(|&n| n > 0.0));

        let j = snapshot.read_variable("vg_j", Component::Magnitude).unwrap();
        assert!(j.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_coordinates_follow_cell_ids() {
        let snapshot = reader(8).open(2).unwrap();
        let coords = snapshot.cell_coordinates(&[1, 2, 9]).unwrap();
        let dx = SyntheticConfig::default().cell_size;
        assert_eq!(coords[0], [0.5 * dx, 0.5 * dx]);
        assert_eq!(coords[1], [1.5 * dx, 0.5 * dx]);
        assert_eq!(coords[2], [0.5 * dx, 1.5 * dx]);
    }
}
