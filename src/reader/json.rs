//! Snapshots stored as JSON files.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use super::{LoadedSnapshot, ReaderError, SimulationReader, Snapshot, SnapshotData, snapshot_path};

/// Reads `bulk.NNNNNNN.json` files from a directory.
#[derive(Debug, Clone)]
pub struct JsonSnapshotReader {
    bulk_path: PathBuf,
}

impl JsonSnapshotReader {
    pub const EXTENSION: &'static str = "json";

    pub fn new(bulk_path: impl AsRef<Path>) -> Self {
        Self {
            bulk_path: bulk_path.as_ref().to_path_buf(),
        }
    }

    /// Load one snapshot file.
    pub fn load(path: &Path) -> Result<LoadedSnapshot, ReaderError> {
        let file = File::open(path).map_err(|source| ReaderError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let data: SnapshotData =
            serde_json::from_reader(BufReader::new(file)).map_err(|source| ReaderError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        LoadedSnapshot::new(path.to_path_buf(), data)
    }
}

impl SimulationReader for JsonSnapshotReader {
    fn snapshot_path(&self, frame: u32) -> PathBuf {
        snapshot_path(&self.bulk_path, frame, Self::EXTENSION)
    }

    fn open(&self, frame: u32) -> Result<Box<dyn Snapshot>, ReaderError> {
        let path = self.snapshot_path(frame);
        log::trace!("Opening {}", path.display());
        Ok(Box::new(Self::load(&path)?))
    }
}

/// Write snapshot data as a JSON file readable by [`JsonSnapshotReader`].
pub fn write_snapshot(path: &Path, data: &SnapshotData) -> Result<(), ReaderError> {
    let io_error = |source| ReaderError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = File::create(path).map_err(io_error)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, data).map_err(|source| ReaderError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    writer.flush().map_err(io_error)?;
    Ok(())
}
