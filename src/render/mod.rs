//! Renderers: turn bound buffers into a finite sequence of plot frames.
//!
//! A renderer never touches pixels. It produces [`FramePlot`]s, a small
//! description of panels (heatmaps or line charts) that an encoder from
//! [`crate::animation`] rasterises.

mod heatmap;
mod rms;
mod spectrum;
mod structure;

pub use heatmap::{HeatmapRenderer, TripleHeatmapRenderer};
pub use rms::{ResidualPoint, RmsRenderer, perpendicular_rms, residual_energy};
pub use spectrum::SpectrumRenderer;
pub use structure::{KurtosisRenderer, StructureRenderer, standardized_increments, subplot_grid};

use log::warn;

use crate::pipeline::{BoundRequest, BufferView};
use crate::schema::{AnimationKind, AnimationRequest, Component, DisplayComponent, Field, VariableKey};

/// Extra pixels above the panel grid for the frame title.
pub const TITLE_HEIGHT: u32 = 40;

/// How heatmap values map onto the colour bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorScale {
    /// Diverging map over `range`.
    Linear,
    /// Sequential map over `log10(range)`.
    Log10,
}

/// A pseudocolour mesh over a regular grid.
#[derive(Debug, Clone, PartialEq)]
pub struct HeatmapPanel {
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    /// Outer edges of the first and last column.
    pub x_extent: (f64, f64),
    /// Outer edges of the first and last row.
    pub y_extent: (f64, f64),
    pub width: usize,
    pub height: usize,
    /// Row-major, row 0 at the bottom.
    pub values: Vec<f64>,
    /// Colour bar limits.
    pub range: (f64, f64),
    pub scale: ColorScale,
    pub colorbar_label: String,
}

/// One plot axis.
#[derive(Debug, Clone, PartialEq)]
pub struct AxisSpec {
    pub label: String,
    pub range: (f64, f64),
    pub log: bool,
}

impl AxisSpec {
    pub fn linear(label: impl Into<String>, range: (f64, f64)) -> Self {
        Self {
            label: label.into(),
            range,
            log: false,
        }
    }

    pub fn log(label: impl Into<String>, range: (f64, f64)) -> Self {
        Self {
            label: label.into(),
            range,
            log: true,
        }
    }
}

/// Visual weight of a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStyle {
    /// Measured data.
    Data,
    /// Reference curve such as a power law or a Gaussian.
    Reference,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub label: String,
    pub points: Vec<(f64, f64)>,
    pub style: LineStyle,
}

impl Series {
    pub fn data(label: impl Into<String>, points: Vec<(f64, f64)>) -> Self {
        Self {
            label: label.into(),
            points,
            style: LineStyle::Data,
        }
    }

    pub fn reference(label: impl Into<String>, points: Vec<(f64, f64)>) -> Self {
        Self {
            label: label.into(),
            points,
            style: LineStyle::Reference,
        }
    }
}

/// A line chart.
#[derive(Debug, Clone, PartialEq)]
pub struct LinePanel {
    pub title: String,
    pub x: AxisSpec,
    pub y: AxisSpec,
    pub series: Vec<Series>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Panel {
    Heatmap(HeatmapPanel),
    Lines(LinePanel),
}

/// Everything drawn for one output frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FramePlot {
    pub title: String,
    /// Simulated time of the frame in seconds, `None` for still images.
    pub time: Option<f64>,
    pub rows: usize,
    pub cols: usize,
    /// Row-major panel order.
    pub panels: Vec<Panel>,
}

impl FramePlot {
    /// Pixel size of this plot with square panels of `panel_size` pixels.
    pub fn pixel_size(&self, panel_size: u32) -> (u32, u32) {
        (
            self.cols as u32 * panel_size,
            self.rows as u32 * panel_size + TITLE_HEIGHT,
        )
    }

    /// Title line including the time label.
    pub fn heading(&self) -> String {
        match self.time {
            Some(time) => format!("{}  t = {}", self.title, time_label(time)),
            None => self.title.clone(),
        }
    }

    /// Index of the first panel holding a non-finite number.
    fn first_non_finite(&self) -> Option<usize> {
        self.panels.iter().position(|panel| match panel {
            Panel::Heatmap(h) => {
                !(h.values.iter().all(|v| v.is_finite())
                    && h.range.0.is_finite()
                    && h.range.1.is_finite())
            }
            Panel::Lines(l) => l
                .series
                .iter()
                .flat_map(|s| &s.points)
                .any(|(x, y)| !(x.is_finite() && y.is_finite())),
        })
    }
}

/// Label of a frame's simulated time.
pub fn time_label(seconds: f64) -> String {
    format!("{seconds:.1}s")
}

/// Renderer errors.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("{kind} renderer has no buffer for {key}")]
    MissingInput { kind: AnimationKind, key: VariableKey },
    #[error("frame {frame}: {reason}")]
    DegenerateFrame { frame: usize, reason: String },
    #[error("frame {frame}: panel {panel} contains NaN or infinite values")]
    NonFinite { frame: usize, panel: usize },
    #[error("frame {frame} requested, renderer has {count}")]
    FrameOutOfRange { frame: usize, count: usize },
}

/// Produces plot frames for one request.
pub trait Renderer: Send {
    /// Number of frames this renderer produces.
    fn frame_count(&self) -> usize;

    /// Plot of frame `frame` (0-based, `< frame_count()`).
    fn draw(&mut self, frame: usize) -> Result<FramePlot, RenderError>;
}

/// Yields every frame of a renderer exactly once, in order.
///
/// Stops after the first error. Frames holding NaN or infinite values are
/// reported as [`RenderError::NonFinite`] instead of being yielded.
pub struct FrameSequence {
    renderer: Box<dyn Renderer>,
    next: usize,
    count: usize,
}

impl FrameSequence {
    pub fn new(renderer: Box<dyn Renderer>) -> Self {
        let count = renderer.frame_count();
        Self {
            renderer,
            next: 0,
            count,
        }
    }
}

impl Iterator for FrameSequence {
    type Item = Result<FramePlot, RenderError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.count {
            return None;
        }
        let frame = self.next;
        self.next += 1;

        let result = self.renderer.draw(frame).and_then(|plot| {
            match plot.first_non_finite() {
                Some(panel) => Err(RenderError::NonFinite { frame, panel }),
                None => Ok(plot),
            }
        });
        if result.is_err() {
            self.next = self.count;
        }
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.count - self.next;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for FrameSequence {}

/// Build the renderer matching a bound request's kind.
pub fn build_renderer(bound: &BoundRequest) -> Result<Box<dyn Renderer>, RenderError> {
    let renderer: Box<dyn Renderer> = match &bound.named.request {
        AnimationRequest::Heatmap2D {
            variable,
            component,
            normalization,
        } => Box::new(HeatmapRenderer::new(bound, *variable, *component, *normalization)?),
        AnimationRequest::HeatmapTriple {
            variable,
            normalization,
        } => Box::new(TripleHeatmapRenderer::new(bound, *variable, *normalization)?),
        AnimationRequest::FourierSpectrum {
            variable,
            component,
            mode,
        } => Box::new(SpectrumRenderer::new(bound, *variable, *component, *mode)?),
        AnimationRequest::StructureFunction {
            variable,
            component,
            offsets,
        } => Box::new(StructureRenderer::new(bound, *variable, *component, offsets)?),
        AnimationRequest::Kurtosis {
            variable,
            component,
            offsets,
        } => Box::new(KurtosisRenderer::new(bound, *variable, *component, offsets)?),
        AnimationRequest::Rms {
            variable,
            component,
            mode,
        } => Box::new(RmsRenderer::new(bound, *variable, *component, *mode)?),
    };
    Ok(renderer)
}

/// Look up the view of `field`/`component` on a bound request.
pub(crate) fn input(
    bound: &BoundRequest,
    field: Field,
    component: Component,
) -> Result<BufferView, RenderError> {
    let key = VariableKey::new(field, component);
    bound
        .buffers
        .get(&key)
        .cloned()
        .ok_or(RenderError::MissingInput {
            kind: bound.named.request.kind(),
            key,
        })
}

/// The fetched stream(s) behind a displayed component.
#[derive(Debug, Clone)]
pub(crate) enum DisplaySource {
    Single(BufferView),
    Perpendicular { x: BufferView, y: BufferView },
}

impl DisplaySource {
    pub(crate) fn bind(
        bound: &BoundRequest,
        field: Field,
        component: DisplayComponent,
    ) -> Result<Self, RenderError> {
        match component.fetched() {
            Some(c) => Ok(DisplaySource::Single(input(bound, field, c)?)),
            None => Ok(DisplaySource::Perpendicular {
                x: input(bound, field, Component::X)?,
                y: input(bound, field, Component::Y)?,
            }),
        }
    }

    /// The single stream, or `None` for a perpendicular pair.
    pub(crate) fn single(&self) -> Option<&BufferView> {
        match self {
            DisplaySource::Single(view) => Some(view),
            DisplaySource::Perpendicular { .. } => None,
        }
    }

    /// Every underlying stream.
    pub(crate) fn views(&self) -> Vec<&BufferView> {
        match self {
            DisplaySource::Single(view) => vec![view],
            DisplaySource::Perpendicular { x, y } => vec![x, y],
        }
    }
}

/// Display label such as `B_x` or `rho`.
pub(crate) fn quantity_label(field: Field, component: DisplayComponent) -> String {
    match component {
        DisplayComponent::Pass => field.short_name().to_string(),
        DisplayComponent::Magnitude => format!("|{}|", field.short_name()),
        DisplayComponent::Perpendicular => format!("{}_perp", field.short_name()),
        DisplayComponent::X | DisplayComponent::Y | DisplayComponent::Z => {
            format!("{}_{}", field.short_name(), component)
        }
    }
}

/// Widen `(lo, hi)` so it is non-empty, padding by `fraction` of its span.
pub(crate) fn padded_range(lo: f64, hi: f64, fraction: f64) -> (f64, f64) {
    if hi > lo {
        let pad = (hi - lo) * fraction;
        (lo - pad, hi + pad)
    } else {
        let pad = lo.abs().max(1.0) * 0.5;
        (lo - pad, hi + pad)
    }
}

/// Positive range for a log axis: the finite positive extent of `values`,
/// widened by `decades` on each side.
pub(crate) fn log_range<'a>(values: impl IntoIterator<Item = &'a f64>, decades: f64) -> (f64, f64) {
    let positive = values.into_iter().filter(|v| **v > 0.0);
    match crate::compute::finite_range(positive) {
        Some((lo, hi)) if hi > lo => (lo / 10f64.powf(decades), hi * 10f64.powf(decades)),
        Some((v, _)) => (v / 10.0, v * 10.0),
        None => (0.1, 10.0),
    }
}

/// Warn once per renderer about skipped points.
pub(crate) fn warn_skipped(output: &std::path::Path, skipped: usize, what: &str) {
    if skipped > 0 {
        warn!(
            "{}: skipped {} {} with zero variance",
            output.display(),
            skipped,
            what
        );
    }
}
