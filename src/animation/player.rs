//! Reading diagnostics archives back.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use super::format::{ArchiveHeader, CompressionType, FrameEntry, decompress_lz4};
use super::{EncodeError, RgbFrame};

/// Random access to the frames of a `.tbv` archive, by index or by
/// simulated time.
///
/// Usage:
/// ```ignore
/// let mut player = ArchivePlayer::open("run_2D_rho.tbv")?;
/// println!("{}: {} frames", player.title(), player.frame_count());
/// let index = player.frame_at_time(2.0).unwrap_or(0);
/// let frame = player.read_frame(index)?;
/// ```
pub struct ArchivePlayer {
    path: PathBuf,
    reader: BufReader<File>,
    header: ArchiveHeader,
    title: String,
    entries: Vec<FrameEntry>,
}

impl ArchivePlayer {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, EncodeError> {
        let path = path.as_ref().to_path_buf();
        let invalid = |reason: String| EncodeError::InvalidArchive {
            path: path.clone(),
            reason,
        };

        let file = File::open(&path).map_err(EncodeError::io(&path))?;
        let mut reader = BufReader::new(file);

        let mut bytes = [0u8; ArchiveHeader::SIZE];
        reader
            .read_exact(&mut bytes)
            .map_err(|e| invalid(format!("header: {e}")))?;
        let header = ArchiveHeader::from_bytes(bytes).map_err(|e| invalid(e.to_string()))?;

        let mut title = vec![0u8; header.title_len as usize];
        reader
            .read_exact(&mut title)
            .map_err(|e| invalid(format!("title: {e}")))?;
        let title = String::from_utf8(title).map_err(|e| invalid(format!("title: {e}")))?;

        // The frame table is the last thing in the file
        let file_len = reader.seek(SeekFrom::End(0)).map_err(EncodeError::io(&path))?;
        let table_start = header
            .frame_count
            .checked_mul(FrameEntry::SIZE as u64)
            .and_then(|len| file_len.checked_sub(len))
            .filter(|start| *start >= header.data_start())
            .ok_or_else(|| invalid(format!("{} frames do not fit in {} bytes", header.frame_count, file_len)))?;
        reader
            .seek(SeekFrom::Start(table_start))
            .map_err(EncodeError::io(&path))?;

        let mut entries = Vec::with_capacity(header.frame_count as usize);
        for i in 0..header.frame_count {
            let mut bytes = [0u8; FrameEntry::SIZE];
            reader.read_exact(&mut bytes).map_err(EncodeError::io(&path))?;
            let entry = FrameEntry::from_bytes(bytes);
            if entry.offset < header.data_start() || entry.offset + entry.size as u64 > table_start {
                return Err(invalid(format!("frame {i} lies outside the frame data")));
            }
            entries.push(entry);
        }

        Ok(Self {
            path,
            reader,
            header,
            title,
            entries,
        })
    }

    pub fn header(&self) -> &ArchiveHeader {
        &self.header
    }

    /// Title of the diagnostic, without the time label.
    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn frame_count(&self) -> u64 {
        self.header.frame_count
    }

    /// Frame width and height in pixels.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.header.width, self.header.height)
    }

    /// Panel rows and columns of every frame.
    pub fn layout(&self) -> (usize, usize) {
        (self.header.rows as usize, self.header.cols as usize)
    }

    pub fn fps(&self) -> f32 {
        self.header.fps
    }

    /// Simulated time shown by a frame.
    pub fn frame_time(&self, frame_index: u64) -> Option<f64> {
        self.entries.get(frame_index as usize)?.time
    }

    /// The frame whose time is closest to `seconds`; the earlier frame on ties.
    pub fn frame_at_time(&self, seconds: f64) -> Option<u64> {
        if !seconds.is_finite() {
            return None;
        }
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(i, e)| Some((i, (e.time? - seconds).abs())))
            .fold(None, |best: Option<(usize, f64)>, (i, d)| match best {
                Some((_, best_d)) if best_d <= d => best,
                _ => Some((i, d)),
            })
            .map(|(i, _)| i as u64)
    }

    /// Read one frame by index.
    pub fn read_frame(&mut self, frame_index: u64) -> Result<RgbFrame, EncodeError> {
        let entry = *self
            .entries
            .get(frame_index as usize)
            .ok_or_else(|| EncodeError::InvalidArchive {
                path: self.path.clone(),
                reason: format!(
                    "frame {} out of range ({} frames)",
                    frame_index, self.header.frame_count
                ),
            })?;

        self.reader
            .seek(SeekFrom::Start(entry.offset))
            .map_err(EncodeError::io(&self.path))?;
        let mut data = vec![0u8; entry.size as usize];
        self.reader
            .read_exact(&mut data)
            .map_err(EncodeError::io(&self.path))?;

        let pixels = match self.header.compression {
            CompressionType::None => data,
            CompressionType::Lz4 => decompress_lz4(&data).map_err(EncodeError::io(&self.path))?,
        };
        if pixels.len() != self.header.frame_size() {
            return Err(EncodeError::InvalidArchive {
                path: self.path.clone(),
                reason: format!(
                    "frame {} has {} bytes, expected {}",
                    frame_index,
                    pixels.len(),
                    self.header.frame_size()
                ),
            });
        }

        Ok(RgbFrame {
            width: self.header.width,
            height: self.header.height,
            pixels,
        })
    }

    /// Iterate over every frame in order.
    pub fn frames(&mut self) -> FrameIterator<'_> {
        FrameIterator {
            player: self,
            current: 0,
        }
    }
}

/// Sequential frames of an [`ArchivePlayer`].
pub struct FrameIterator<'a> {
    player: &'a mut ArchivePlayer,
    current: u64,
}

impl Iterator for FrameIterator<'_> {
    type Item = Result<RgbFrame, EncodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current >= self.player.frame_count() {
            return None;
        }
        let frame = self.player.read_frame(self.current);
        self.current += 1;
        Some(frame)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.player.frame_count() - self.current) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for FrameIterator<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::{ArchiveRecorder, CompressionType, FrameEncoder};
    use crate::render::{AxisSpec, FramePlot, LinePanel, Panel, Series};
    use std::fs;
    use tempfile::tempdir;

    fn gradient(width: u32, height: u32, base: u8) -> RgbFrame {
        let pixels = (0..width * height * 3)
            .map(|i| base.wrapping_add((i % 251) as u8))
            .collect();
        RgbFrame {
            width,
            height,
            pixels,
        }
    }

    fn record(path: &Path, frames: &[RgbFrame], compression: CompressionType) {
        let mut recorder = ArchiveRecorder::create(path, 7, 480, compression).unwrap();
        recorder.begin("rho", (1, 1)).unwrap();
        for (i, frame) in frames.iter().enumerate() {
            recorder.record(frame, Some(i as f64 * 0.5)).unwrap();
        }
        recorder.finalize().unwrap();
    }

    #[test]
    fn test_record_and_playback() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("play.tbv");
        let frames: Vec<RgbFrame> = (0..5).map(|i| gradient(12, 9, i * 40)).collect();
        record(&path, &frames, CompressionType::None);

        let mut player = ArchivePlayer::open(&path).unwrap();
        assert_eq!(player.title(), "rho");
        assert_eq!(player.frame_count(), 5);
        assert_eq!(player.dimensions(), (12, 9));
        assert_eq!(player.fps(), 7.0);
        assert_eq!(player.header().time_span, Some((0.0, 2.0)));
        assert_eq!(player.frame_time(3), Some(1.5));

        assert_eq!(player.read_frame(3).unwrap(), frames[3]);
        let all: Vec<RgbFrame> = player.frames().collect::<Result<_, _>>().unwrap();
        assert_eq!(all, frames);
    }

    #[test]
    fn test_seek_by_time() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seek.tbv");
        let frames: Vec<RgbFrame> = (0..5).map(|i| gradient(4, 4, i)).collect();
        record(&path, &frames, CompressionType::None);

        let player = ArchivePlayer::open(&path).unwrap();
        assert_eq!(player.frame_at_time(1.1), Some(2));
        assert_eq!(player.frame_at_time(1.25), Some(2));
        assert_eq!(player.frame_at_time(-3.0), Some(0));
        assert_eq!(player.frame_at_time(99.0), Some(4));
        assert_eq!(player.frame_at_time(f64::NAN), None);
    }

    #[test]
    fn test_plots_carry_title_layout_and_time() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rms.tbv");
        let panel = LinePanel {
            title: "B_perp".to_string(),
            x: AxisSpec::linear("t [s]", (0.0, 1.0)),
            y: AxisSpec::linear("RMS [nT]", (0.0, 1.0)),
            series: vec![Series::data("B_perp", vec![(0.0, 0.5)])],
        };
        let mut recorder = Box::new(ArchiveRecorder::create(&path, 5, 160, CompressionType::None).unwrap());
        for t in [0.0, 0.5] {
            recorder
                .push(&FramePlot {
                    title: "RMS of B_perp".to_string(),
                    time: Some(t),
                    rows: 2,
                    cols: 1,
                    panels: vec![Panel::Lines(panel.clone()), Panel::Lines(panel.clone())],
                })
                .unwrap();
        }
        let output = recorder.finish().unwrap();
        assert_eq!(output.frames, 2);

        let player = ArchivePlayer::open(&path).unwrap();
        assert_eq!(player.title(), "RMS of B_perp");
        assert_eq!(player.layout(), (2, 1));
        assert_eq!(player.dimensions(), (160, 320 + crate::render::TITLE_HEIGHT));
        assert_eq!(player.frame_time(1), Some(0.5));
    }

    #[test]
    fn test_out_of_range_frame() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("one.tbv");
        record(&path, &[gradient(4, 4, 0)], CompressionType::None);

        let mut player = ArchivePlayer::open(&path).unwrap();
        assert_eq!(player.frame_time(1), None);
        assert!(matches!(
            player.read_frame(1),
            Err(EncodeError::InvalidArchive { .. })
        ));
    }

    #[test]
    fn test_truncated_archive_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cut.tbv");
        record(&path, &[gradient(16, 16, 0), gradient(16, 16, 1)], CompressionType::None);

        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..ArchiveHeader::SIZE + 20]).unwrap();
        assert!(matches!(
            ArchivePlayer::open(&path),
            Err(EncodeError::InvalidArchive { .. })
        ));
    }

    #[cfg(feature = "lz4")]
    #[test]
    fn test_lz4_playback() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("lz4.tbv");
        let frames = vec![gradient(32, 8, 3), gradient(32, 8, 9)];
        record(&path, &frames, CompressionType::Lz4);

        let mut player = ArchivePlayer::open(&path).unwrap();
        assert_eq!(player.read_frame(1).unwrap(), frames[1]);
    }
}
