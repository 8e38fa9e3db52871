//! Turning rendered frames into files.
//!
//! Every output goes through a [`FrameEncoder`] opened by an
//! [`EncoderFactory`]. [`FileEncoders`] picks the encoder from the output
//! extension:
//!
//! - `mp4`, `gif`: raw RGB piped into the system `ffmpeg`
//! - `png`: the last frame saved as a still image
//! - `tbv`: the frame archive below, readable without external tools
//!
//! # Archive format
//!
//! ```text
//! Header (64 bytes):
//!   Magic "TBVA", version u16, compression u16
//!   Width u32, height u32, panel rows u16, panel cols u16, panel size u32
//!   Frame count u64, frame rate f32, title length u32
//!   First and last simulated time f64 (NaN for stills), reserved 8 bytes
//!
//! Title: UTF-8 plot title
//!
//! Frame data: width * height * 3 bytes of RGB8 per frame, optionally LZ4
//!
//! Frame table at the end (frame_count * 20 bytes):
//!   Offset u64, stored size u32, simulated time f64
//! ```

mod format;
mod player;
mod raster;
mod recorder;
mod still;
mod video;

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

pub use format::{ARCHIVE_MAGIC, ARCHIVE_VERSION, ArchiveHeader, CompressionType, FrameEntry};
pub use player::{ArchivePlayer, FrameIterator};
pub use raster::{RgbFrame, rasterize};
pub use recorder::{ArchiveRecorder, ArchiveStats};
pub use still::StillEncoder;
pub use video::VideoEncoder;

use crate::render::FramePlot;
use crate::schema::{OutputFormat, RenderSettings};

/// Encoder errors.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot start {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("ffmpeg failed on {path} ({status}): {stderr}")]
    Ffmpeg {
        path: PathBuf,
        status: String,
        stderr: String,
    },
    #[error("drawing failed: {0}")]
    Draw(String),
    #[error("frame is {actual:?} pixels, the output was opened at {expected:?}")]
    FrameSize {
        expected: (u32, u32),
        actual: (u32, u32),
    },
    #[error("{0}: no frames were pushed")]
    Empty(PathBuf),
    #[error("{0}: unsupported output extension")]
    UnsupportedExtension(PathBuf),
    #[error("{path}: invalid archive: {reason}")]
    InvalidArchive { path: PathBuf, reason: String },
}

impl EncodeError {
    pub(crate) fn io(path: &Path) -> impl FnOnce(std::io::Error) -> EncodeError + '_ {
        move |source| EncodeError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// What an encoder wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedOutput {
    pub path: PathBuf,
    pub format: OutputFormat,
    pub frames: usize,
    pub width: u32,
    pub height: u32,
}

impl fmt::Display for EncodedOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} frame{}, {}x{})",
            self.path.display(),
            self.frames,
            if self.frames == 1 { "" } else { "s" },
            self.width,
            self.height
        )
    }
}

/// Accepts the frames of one output in order.
pub trait FrameEncoder: Send {
    fn push(&mut self, plot: &FramePlot) -> Result<(), EncodeError>;

    /// Flush and close the output.
    fn finish(self: Box<Self>) -> Result<EncodedOutput, EncodeError>;
}

/// Opens encoders for output paths.
pub trait EncoderFactory: Send + Sync {
    fn open(&self, path: &Path, settings: &RenderSettings) -> Result<Box<dyn FrameEncoder>, EncodeError>;
}

/// Encoders writing real files, chosen by extension.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileEncoders;

impl EncoderFactory for FileEncoders {
    fn open(&self, path: &Path, settings: &RenderSettings) -> Result<Box<dyn FrameEncoder>, EncodeError> {
        let format =
            OutputFormat::from_path(path).ok_or_else(|| EncodeError::UnsupportedExtension(path.to_path_buf()))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(EncodeError::io(parent))?;
        }

        Ok(match format {
            OutputFormat::Mp4 | OutputFormat::Gif => Box::new(VideoEncoder::new(path, format, settings)),
            OutputFormat::Png => Box::new(StillEncoder::new(path, settings.panel_size)),
            OutputFormat::Archive => Box::new(ArchiveRecorder::create(
                path,
                settings.fps,
                settings.panel_size,
                CompressionType::default(),
            )?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_unsupported_extension() {
        let dir = tempdir().unwrap();
        let result = FileEncoders.open(&dir.path().join("out.avi"), &RenderSettings::default());
        assert!(matches!(result, Err(EncodeError::UnsupportedExtension(_))));
    }

    #[test]
    fn test_open_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plots/run/out.tbv");
        let encoder = FileEncoders.open(&path, &RenderSettings::default()).unwrap();
        assert!(path.parent().unwrap().is_dir());
        drop(encoder);
    }

    #[test]
    fn test_encoded_output_display() {
        let output = EncodedOutput {
            path: PathBuf::from("a.png"),
            format: OutputFormat::Png,
            frames: 1,
            width: 480,
            height: 520,
        };
        assert_eq!(output.to_string(), "a.png (1 frame, 480x520)");
    }
}
