//! Run configuration for diagnostic rendering.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::request::RawRequest;

fn default_file_type() -> String {
    ".mp4".to_string()
}

fn default_fps() -> u32 {
    5
}

fn default_panel_size() -> u32 {
    480
}

fn default_group_by_variable() -> bool {
    true
}

fn default_ffmpeg() -> PathBuf {
    PathBuf::from("ffmpeg")
}

/// Top-level run configuration. Everything a run needs is carried here and
/// passed explicitly into the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Directory holding `bulk.NNNNNNN.<ext>` snapshot files.
    pub bulk_path: PathBuf,
    /// First frame index (inclusive).
    pub start_frame: u32,
    /// Last frame index (inclusive).
    pub end_frame: u32,
    /// Prefix of every output file, usually `dir/run_name`.
    pub output_prefix: String,
    /// Output type: `.mp4`, `.gif` or `.tbv` (leading dot optional).
    #[serde(default = "default_file_type")]
    pub file_type: String,
    /// Encoder frame rate.
    #[serde(default = "default_fps")]
    pub fps: u32,
    /// Edge length of one plot panel in pixels.
    #[serde(default = "default_panel_size")]
    pub panel_size: u32,
    /// Worker threads for both phases (None = one per core).
    #[serde(default)]
    pub workers: Option<usize>,
    /// Abort a phase that takes longer than this many seconds.
    #[serde(default)]
    pub phase_timeout_secs: Option<u64>,
    /// Fetch and release buffers one request-variable group at a time.
    #[serde(default = "default_group_by_variable")]
    pub group_by_variable: bool,
    /// ffmpeg binary used for `.mp4` / `.gif` output.
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg_path: PathBuf,
    /// Where snapshots come from.
    #[serde(default)]
    pub reader: ReaderConfig,
    /// Requested animations as `[kind, variable, component, params]` tuples.
    pub animations: Vec<RawRequest>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            bulk_path: PathBuf::from("bulk"),
            start_frame: 0,
            end_frame: 20,
            output_prefix: "plots/run".to_string(),
            file_type: default_file_type(),
            fps: default_fps(),
            panel_size: default_panel_size(),
            workers: None,
            phase_timeout_secs: None,
            group_by_variable: true,
            ffmpeg_path: default_ffmpeg(),
            reader: ReaderConfig::Synthetic(SyntheticConfig::default()),
            animations: vec![
                RawRequest::new("2D", "B", "x", json!("unitless")),
                RawRequest::new("triple", "v", "x", json!("unit")),
                RawRequest::new("2D", "rho", "pass", json!("unit")),
                RawRequest::new("fourier", "B", "perp", json!(["1D"])),
                RawRequest::new("fourier", "B", "x", json!(["x", 0.5])),
                RawRequest::new("sf", "B", "x", json!([2, 4, 8])),
                RawRequest::new("kurtosis", "B", "x", json!([1, 2, 4, 8, 16])),
                RawRequest::new("rms", "B", "perp", json!("unit")),
                RawRequest::new("rms", "bv", "pass", json!("summary")),
            ],
        }
    }
}

impl RunConfig {
    /// Number of frames in the inclusive range.
    #[inline]
    pub fn frame_count(&self) -> usize {
        (self.end_frame.saturating_sub(self.start_frame) as usize) + 1
    }

    /// Encoder settings derived from this configuration.
    pub fn render_settings(&self) -> RenderSettings {
        RenderSettings {
            fps: self.fps,
            panel_size: self.panel_size,
            ffmpeg_path: self.ffmpeg_path.clone(),
        }
    }

    /// Validate configuration parameters. Requests are validated separately.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.start_frame > self.end_frame {
            return Err(ConfigError::InvalidFrameRange {
                start: self.start_frame,
                end: self.end_frame,
            });
        }
        if self.fps == 0 {
            return Err(ConfigError::InvalidFrameRate);
        }
        if self.panel_size < MIN_PANEL_SIZE {
            return Err(ConfigError::InvalidPanelSize(self.panel_size));
        }
        if self.workers == Some(0) {
            return Err(ConfigError::InvalidWorkers);
        }
        if self.phase_timeout_secs == Some(0) {
            return Err(ConfigError::InvalidTimeout);
        }
        if self.output_prefix.is_empty() {
            return Err(ConfigError::EmptyOutputPrefix);
        }
        if let ReaderConfig::Synthetic(synthetic) = &self.reader {
            synthetic.validate()?;
        }
        Ok(())
    }
}

/// Smallest panel that still leaves room for axes and labels.
pub const MIN_PANEL_SIZE: u32 = 64;

/// Snapshot source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReaderConfig {
    /// JSON snapshot files under `bulk_path`.
    #[default]
    Json,
    /// Deterministic synthetic turbulence, no files needed.
    Synthetic(SyntheticConfig),
}

/// Parameters of the synthetic turbulence generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntheticConfig {
    /// Grid edge length in cells (square grid).
    pub width: usize,
    /// Cell size in metres.
    pub cell_size: f64,
    /// Simulated seconds between frames.
    pub dt: f64,
    /// Guide field along z in nT.
    pub guide_field_nt: f64,
    /// Fluctuation amplitude relative to the guide field.
    pub amplitude: f64,
    /// Random seed.
    pub seed: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            width: 64,
            cell_size: 300e3,
            dt: 0.5,
            guide_field_nt: 5.0,
            amplitude: 0.3,
            seed: 42,
        }
    }
}

impl SyntheticConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width < 4 {
            return Err(ConfigError::InvalidSyntheticGrid(self.width));
        }
        if self.cell_size <= 0.0 || self.dt <= 0.0 {
            return Err(ConfigError::InvalidSyntheticSpacing);
        }
        Ok(())
    }
}

/// Supported output file types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    Mp4,
    Gif,
    /// Single still image.
    Png,
    /// Raw frame archive readable by [`crate::animation::ArchivePlayer`].
    Archive,
}

impl OutputFormat {
    /// Parse a file type such as `".mp4"` or `"gif"`.
    pub fn parse(file_type: &str) -> Option<Self> {
        let ext = file_type.strip_prefix('.').unwrap_or(file_type);
        match ext.to_ascii_lowercase().as_str() {
            "mp4" => Some(OutputFormat::Mp4),
            "gif" => Some(OutputFormat::Gif),
            "png" => Some(OutputFormat::Png),
            "tbv" => Some(OutputFormat::Archive),
            _ => None,
        }
    }

    /// Pick the format from an output path's extension.
    pub fn from_path(path: &std::path::Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::parse)
    }

    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Mp4 => "mp4",
            OutputFormat::Gif => "gif",
            OutputFormat::Png => "png",
            OutputFormat::Archive => "tbv",
        }
    }

    /// False for still images.
    pub fn is_animated(self) -> bool {
        !matches!(self, OutputFormat::Png)
    }
}

/// Settings shared by every encoder of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderSettings {
    pub fps: u32,
    pub panel_size: u32,
    pub ffmpeg_path: PathBuf,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            fps: default_fps(),
            panel_size: default_panel_size(),
            ffmpeg_path: default_ffmpeg(),
        }
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Frame range is empty: start {start} > end {end}")]
    InvalidFrameRange { start: u32, end: u32 },
    #[error("Frame rate must be positive")]
    InvalidFrameRate,
    #[error("Panel size {0} is below the minimum of {MIN_PANEL_SIZE} px")]
    InvalidPanelSize(u32),
    #[error("Worker count must be non-zero")]
    InvalidWorkers,
    #[error("Phase timeout must be positive")]
    InvalidTimeout,
    #[error("Output prefix must not be empty")]
    EmptyOutputPrefix,
    #[error("Synthetic grid width {0} is too small (minimum 4)")]
    InvalidSyntheticGrid(usize),
    #[error("Synthetic cell size and time step must be positive")]
    InvalidSyntheticSpacing,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        let config = RunConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.frame_count(), 21);
    }

    #[test]
    fn test_config_defaults_from_minimal_json() {
        let text = r#"{
            "bulk_path": "/data/run1",
            "start_frame": 3,
            "end_frame": 5,
            "output_prefix": "out/run1",
            "animations": [["2D", "rho", "pass", "unit"], ["rms", "B", "x"]]
        }"#;
        let config: RunConfig = serde_json::from_str(text).unwrap();
        assert_eq!(config.fps, 5);
        assert_eq!(config.panel_size, 480);
        assert_eq!(config.file_type, ".mp4");
        assert!(config.group_by_variable);
        assert!(matches!(config.reader, ReaderConfig::Json));
        assert_eq!(config.frame_count(), 3);
        assert_eq!(config.animations.len(), 2);
    }

    #[test]
    fn test_synthetic_reader_json() {
        let text = r#"{"type": "synthetic", "width": 32, "cell_size": 1.0,
            "dt": 1.0, "guide_field_nt": 5.0, "amplitude": 0.1, "seed": 7}"#;
        let reader: ReaderConfig = serde_json::from_str(text).unwrap();
        match reader {
            ReaderConfig::Synthetic(synthetic) => assert_eq!(synthetic.width, 32),
            other => panic!("expected synthetic reader, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_configs() {
        let mut config = RunConfig {
            start_frame: 4,
            end_frame: 2,
            ..RunConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidFrameRange { start: 4, end: 2 })
        ));

        config.end_frame = 4;
        config.fps = 0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidFrameRate)));

        config.fps = 5;
        config.workers = Some(0);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidWorkers)));

        config.workers = None;
        config.reader = ReaderConfig::Synthetic(SyntheticConfig {
            width: 2,
            ..SyntheticConfig::default()
        });
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidSyntheticGrid(2))
        ));
    }

    #[test]
    fn test_output_format_parse() {
        assert_eq!(OutputFormat::parse(".mp4"), Some(OutputFormat::Mp4));
        assert_eq!(OutputFormat::parse("GIF"), Some(OutputFormat::Gif));
        assert_eq!(OutputFormat::parse("tbv"), Some(OutputFormat::Archive));
        assert_eq!(OutputFormat::parse(".avi"), None);
        assert_eq!(
            OutputFormat::from_path(std::path::Path::new("a/b_rms.png")),
            Some(OutputFormat::Png)
        );
        assert!(!OutputFormat::Png.is_animated());
    }
}
