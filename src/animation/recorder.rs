//! Writing diagnostics archives.

use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::debug;

use super::format::{ArchiveHeader, CompressionType, FrameEntry, compress_lz4, time_span};
use super::{EncodeError, EncodedOutput, FrameEncoder, RgbFrame, rasterize};
use crate::render::FramePlot;
use crate::schema::OutputFormat;

/// Records one diagnostic's frames, with their simulated times, into a
/// `.tbv` archive.
///
/// Usage:
/// ```ignore
/// let mut recorder = ArchiveRecorder::create("run_2D_rho.tbv", 5, 480, CompressionType::None)?;
/// recorder.begin("rho", (1, 1))?;
/// for (plot, t) in frames {
///     recorder.record(&rasterize(&plot, 480)?, Some(t))?;
/// }
/// let stats = recorder.finalize()?;
/// ```
pub struct ArchiveRecorder {
    path: PathBuf,
    writer: BufWriter<File>,
    header: ArchiveHeader,
    title: Option<String>,
    entries: Vec<FrameEntry>,
}

impl ArchiveRecorder {
    /// Create the file. Title and frame size are fixed by [`begin`] and the
    /// first recorded frame.
    ///
    /// [`begin`]: ArchiveRecorder::begin
    pub fn create(
        path: impl AsRef<Path>,
        fps: u32,
        panel_size: u32,
        compression: CompressionType,
    ) -> Result<Self, EncodeError> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).map_err(EncodeError::io(&path))?;

        Ok(Self {
            path,
            writer: BufWriter::new(file),
            header: ArchiveHeader {
                width: 0,
                height: 0,
                rows: 1,
                cols: 1,
                panel_size,
                frame_count: 0,
                fps: fps as f32,
                compression,
                title_len: 0,
                time_span: None,
            },
            title: None,
            entries: Vec::new(),
        })
    }

    /// Write the placeholder header and the title. Later calls keep the
    /// first title.
    pub fn begin(&mut self, title: &str, (rows, cols): (usize, usize)) -> Result<(), EncodeError> {
        if self.title.is_some() {
            return Ok(());
        }
        // Cut on a character boundary within the limit
        let mut end = title.len().min(super::format::MAX_TITLE_LEN as usize);
        while !title.is_char_boundary(end) {
            end -= 1;
        }
        let title = &title[..end];

        self.header.rows = u16::try_from(rows).unwrap_or(u16::MAX);
        self.header.cols = u16::try_from(cols).unwrap_or(u16::MAX);
        self.header.title_len = title.len() as u32;
        self.writer
            .write_all(&self.header.to_bytes())
            .map_err(EncodeError::io(&self.path))?;
        self.writer
            .write_all(title.as_bytes())
            .map_err(EncodeError::io(&self.path))?;
        self.title = Some(title.to_string());
        Ok(())
    }

    pub fn frames_written(&self) -> u64 {
        self.entries.len() as u64
    }

    /// Append one frame showing simulated time `time`.
    pub fn record(&mut self, frame: &RgbFrame, time: Option<f64>) -> Result<(), EncodeError> {
        if self.entries.is_empty() {
            self.begin("", (1, 1))?;
            self.header.width = frame.width;
            self.header.height = frame.height;
        } else if (self.header.width, self.header.height) != frame.size() {
            return Err(EncodeError::FrameSize {
                expected: (self.header.width, self.header.height),
                actual: frame.size(),
            });
        }

        let offset = self
            .writer
            .stream_position()
            .map_err(EncodeError::io(&self.path))?;
        let stored = match self.header.compression {
            CompressionType::None => None,
            CompressionType::Lz4 => Some(compress_lz4(&frame.pixels).map_err(EncodeError::io(&self.path))?),
        };
        let bytes = stored.as_deref().unwrap_or(&frame.pixels);
        let size = u32::try_from(bytes.len()).map_err(|_| EncodeError::InvalidArchive {
            path: self.path.clone(),
            reason: format!("frame of {} bytes", bytes.len()),
        })?;
        self.writer
            .write_all(bytes)
            .map_err(EncodeError::io(&self.path))?;
        self.entries.push(FrameEntry { offset, size, time });
        Ok(())
    }

    /// Append the frame table and rewrite the header with the final count
    /// and time span.
    pub fn finalize(mut self) -> Result<ArchiveStats, EncodeError> {
        let path = self.path.clone();
        self.begin("", (1, 1))?;

        let table_offset = self.writer.stream_position().map_err(EncodeError::io(&path))?;
        for entry in &self.entries {
            self.writer
                .write_all(&entry.to_bytes())
                .map_err(EncodeError::io(&path))?;
        }

        self.header.frame_count = self.entries.len() as u64;
        self.header.time_span = time_span(&self.entries);
        self.writer.seek(SeekFrom::Start(0)).map_err(EncodeError::io(&path))?;
        self.writer
            .write_all(&self.header.to_bytes())
            .map_err(EncodeError::io(&path))?;
        self.writer.flush().map_err(EncodeError::io(&path))?;

        let frame_count = self.header.frame_count;
        let data_bytes = table_offset.saturating_sub(self.header.data_start());
        Ok(ArchiveStats {
            title: self.title.unwrap_or_default(),
            frame_count,
            total_bytes: table_offset + frame_count * FrameEntry::SIZE as u64,
            average_frame_size: if frame_count > 0 { data_bytes / frame_count } else { 0 },
            compression: self.header.compression,
            width: self.header.width,
            height: self.header.height,
            time_span: self.header.time_span,
        })
    }
}

impl FrameEncoder for ArchiveRecorder {
    fn push(&mut self, plot: &FramePlot) -> Result<(), EncodeError> {
        let frame = rasterize(plot, self.header.panel_size)?;
        self.begin(&plot.title, (plot.rows, plot.cols))?;
        self.record(&frame, plot.time)
    }

    fn finish(self: Box<Self>) -> Result<EncodedOutput, EncodeError> {
        if self.entries.is_empty() {
            return Err(EncodeError::Empty(self.path.clone()));
        }
        let path = self.path.clone();
        let stats = self.finalize()?;
        debug!("{}: {}", path.display(), stats);
        Ok(EncodedOutput {
            path,
            format: OutputFormat::Archive,
            frames: stats.frame_count as usize,
            width: stats.width,
            height: stats.height,
        })
    }
}

/// Statistics of a finished archive.
#[derive(Debug, Clone)]
pub struct ArchiveStats {
    pub title: String,
    pub frame_count: u64,
    /// Total file size in bytes.
    pub total_bytes: u64,
    /// Average stored frame size.
    pub average_frame_size: u64,
    pub compression: CompressionType,
    pub width: u32,
    pub height: u32,
    pub time_span: Option<(f64, f64)>,
}

impl std::fmt::Display for ArchiveStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "\"{}\": {} frames of {}x{}",
            self.title, self.frame_count, self.width, self.height
        )?;
        if let Some((first, last)) = self.time_span {
            write!(f, " covering {first:.1}s..{last:.1}s")?;
        }
        write!(
            f,
            ", {} bytes total, {} bytes/frame avg ({:?} compression)",
            self.total_bytes, self.average_frame_size, self.compression
        )
    }
}
