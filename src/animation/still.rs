//! Single still images.

use std::path::{Path, PathBuf};

use super::raster::save_png;
use super::{EncodeError, EncodedOutput, FrameEncoder};
use crate::render::FramePlot;
use crate::schema::OutputFormat;

/// Keeps the last pushed frame and writes it as a PNG on finish.
pub struct StillEncoder {
    path: PathBuf,
    panel_size: u32,
    last: Option<FramePlot>,
    pushed: usize,
}

impl StillEncoder {
    pub fn new(path: &Path, panel_size: u32) -> Self {
        Self {
            path: path.to_path_buf(),
            panel_size,
            last: None,
            pushed: 0,
        }
    }
}

impl FrameEncoder for StillEncoder {
    fn push(&mut self, plot: &FramePlot) -> Result<(), EncodeError> {
        self.last = Some(plot.clone());
        self.pushed += 1;
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<EncodedOutput, EncodeError> {
        let StillEncoder {
            path,
            panel_size,
            last,
            pushed,
        } = *self;
        let plot = last.ok_or_else(|| EncodeError::Empty(path.clone()))?;
        if pushed > 1 {
            log::debug!("{}: kept the last of {} frames", path.display(), pushed);
        }
        let (width, height) = save_png(&plot, panel_size, &path)?;
        Ok(EncodedOutput {
            path,
            format: OutputFormat::Png,
            frames: 1,
            width,
            height,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{AxisSpec, LinePanel, Panel, Series};

    fn plot(title: &str) -> FramePlot {
        FramePlot {
            title: title.to_string(),
            time: None,
            rows: 1,
            cols: 1,
            panels: vec![Panel::Lines(LinePanel {
                title: title.to_string(),
                x: AxisSpec::linear("t [s]", (0.0, 1.0)),
                y: AxisSpec::linear("rms", (0.0, 2.0)),
                series: vec![Series::data("B", vec![(0.0, 1.0), (1.0, 1.5)])],
            })],
        }
    }

    #[test]
    fn test_still_writes_last_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.png");
        let mut encoder = Box::new(StillEncoder::new(&path, 96));
        encoder.push(&plot("first")).unwrap();
        encoder.push(&plot("second")).unwrap();
        assert_eq!(encoder.last.as_ref().unwrap().title, "second");

        let output = encoder.finish().unwrap();
        assert_eq!((output.frames, output.width, output.height), (1, 96, 136));
        assert!(path.is_file());
    }

    #[test]
    fn test_still_without_frames() {
        let encoder = Box::new(StillEncoder::new(Path::new("x.png"), 96));
        assert!(matches!(encoder.finish(), Err(EncodeError::Empty(_))));
    }
}
