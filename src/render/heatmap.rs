//! Pseudocolour maps of one or three field components.

use std::sync::Arc;

use super::{
    ColorScale, FramePlot, HeatmapPanel, Panel, RenderError, Renderer, input, quantity_label,
};
use crate::compute::{finite_range, mean};
use crate::pipeline::{BoundRequest, BufferView, GridInfo};
use crate::schema::{Component, DisplayComponent, FetchPolicy, Field, Normalization, VariableKey};

/// Scales one stream frame by frame according to the normalization.
#[derive(Debug, Clone)]
struct Normalizer {
    normalization: Normalization,
    unit_scale: f64,
    magnitude: Option<BufferView>,
}

impl Normalizer {
    fn new(bound: &BoundRequest, field: Field, normalization: Normalization) -> Result<Self, RenderError> {
        let magnitude = match normalization {
            Normalization::Unit => None,
            Normalization::Unitless => Some(input(bound, field, Component::Magnitude)?),
        };
        Ok(Self {
            normalization,
            unit_scale: field.unit_scale(),
            magnitude,
        })
    }

    /// Divisor for frame `frame`. Fails when the frame's mean magnitude is zero.
    fn divisor(&self, frame: usize) -> Result<f64, RenderError> {
        match &self.magnitude {
            None => Ok(self.unit_scale),
            Some(magnitude) => {
                let m = mean(magnitude.frame(frame));
                if m.is_finite() && m != 0.0 {
                    Ok(m)
                } else {
                    Err(RenderError::DegenerateFrame {
                        frame,
                        reason: format!("mean field magnitude is {m}, cannot normalize"),
                    })
                }
            }
        }
    }

    fn apply(&self, view: &BufferView, frame: usize) -> Result<Vec<f64>, RenderError> {
        let divisor = self.divisor(frame)?;
        Ok(view.frame(frame).iter().map(|v| v / divisor).collect())
    }

    fn colorbar_label(&self, field: Field) -> String {
        match self.normalization {
            Normalization::Unit => field.unit_name().to_string(),
            Normalization::Unitless => format!("/ <|{}|>", field.short_name()),
        }
    }
}

/// Colour limits over every frame of every view: symmetric around zero for
/// fluctuation streams, the plain extent for raw streams.
fn color_range(views: &[BufferView], normalizer: &Normalizer) -> Result<(f64, f64), RenderError> {
    let mut extent: Option<(f64, f64)> = None;
    for view in views {
        for frame in 0..view.frame_count() {
            let values = normalizer.apply(view, frame)?;
            if let Some((lo, hi)) = finite_range(&values) {
                extent = Some(match extent {
                    None => (lo, hi),
                    Some((a, b)) => (a.min(lo), b.max(hi)),
                });
            }
        }
    }
    let (lo, hi) = extent.unwrap_or((-1.0, 1.0));

    let fluctuation = views
        .iter()
        .all(|v| v.key().policy() == FetchPolicy::MeanCentered);
    let (lo, hi) = if fluctuation {
        let limit = lo.abs().max(hi.abs());
        (-limit, limit)
    } else {
        (lo, hi)
    };
    Ok(if hi > lo { (lo, hi) } else { (lo - 1.0, hi + 1.0) })
}

fn grid_panel(
    grid: &GridInfo,
    title: String,
    values: Vec<f64>,
    range: (f64, f64),
    colorbar_label: String,
) -> HeatmapPanel {
    let half = grid.dx_dp() / 2.0;
    let x = grid.x_axis();
    let y = grid.y_axis();
    let extent = |axis: &[f64]| match (axis.first(), axis.last()) {
        (Some(first), Some(last)) => (first - half, last + half),
        _ => (0.0, 1.0),
    };
    HeatmapPanel {
        title,
        x_label: "x [d_p]".to_string(),
        y_label: "y [d_p]".to_string(),
        x_extent: extent(&x),
        y_extent: extent(&y),
        width: grid.width,
        height: grid.width,
        values,
        range,
        scale: ColorScale::Linear,
        colorbar_label,
    }
}

/// One component of one field per frame.
pub struct HeatmapRenderer {
    grid: Arc<GridInfo>,
    time: BufferView,
    view: BufferView,
    normalizer: Normalizer,
    title: String,
    colorbar_label: String,
    range: (f64, f64),
}

impl HeatmapRenderer {
    pub fn new(
        bound: &BoundRequest,
        field: Field,
        component: DisplayComponent,
        normalization: Normalization,
    ) -> Result<Self, RenderError> {
        let fetched = component.fetched().ok_or(RenderError::MissingInput {
            kind: bound.named.request.kind(),
            key: VariableKey::new(field, Component::X),
        })?;
        let view = input(bound, field, fetched)?;
        let normalizer = Normalizer::new(bound, field, normalization)?;
        let range = color_range(std::slice::from_ref(&view), &normalizer)?;

        Ok(Self {
            grid: Arc::clone(&bound.grid),
            time: bound.time.clone(),
            title: quantity_label(field, component),
            colorbar_label: normalizer.colorbar_label(field),
            view,
            normalizer,
            range,
        })
    }

    /// Colour limits shared by every frame.
    pub fn range(&self) -> (f64, f64) {
        self.range
    }
}

impl Renderer for HeatmapRenderer {
    fn frame_count(&self) -> usize {
        self.view.frame_count()
    }

    fn draw(&mut self, frame: usize) -> Result<FramePlot, RenderError> {
        let values = self.normalizer.apply(&self.view, frame)?;
        Ok(FramePlot {
            title: self.title.clone(),
            time: Some(self.time.scalar(frame)),
            rows: 1,
            cols: 1,
            panels: vec![Panel::Heatmap(grid_panel(
                &self.grid,
                self.title.clone(),
                values,
                self.range,
                self.colorbar_label.clone(),
            ))],
        })
    }
}

/// x, y and z of one field side by side on a shared colour scale.
pub struct TripleHeatmapRenderer {
    grid: Arc<GridInfo>,
    time: BufferView,
    field: Field,
    views: [BufferView; 3],
    normalizer: Normalizer,
    colorbar_label: String,
    range: (f64, f64),
}

impl TripleHeatmapRenderer {
    pub fn new(
        bound: &BoundRequest,
        field: Field,
        normalization: Normalization,
    ) -> Result<Self, RenderError> {
        let views = [
            input(bound, field, Component::X)?,
            input(bound, field, Component::Y)?,
            input(bound, field, Component::Z)?,
        ];
        let normalizer = Normalizer::new(bound, field, normalization)?;
        let range = color_range(&views, &normalizer)?;

        Ok(Self {
            grid: Arc::clone(&bound.grid),
            time: bound.time.clone(),
            field,
            colorbar_label: normalizer.colorbar_label(field),
            views,
            normalizer,
            range,
        })
    }

    pub fn range(&self) -> (f64, f64) {
        self.range
    }
}

impl Renderer for TripleHeatmapRenderer {
    fn frame_count(&self) -> usize {
        self.views[0].frame_count()
    }

    fn draw(&mut self, frame: usize) -> Result<FramePlot, RenderError> {
        let components = [DisplayComponent::X, DisplayComponent::Y, DisplayComponent::Z];
        let panels = self
            .views
            .iter()
            .zip(components)
            .map(|(view, component)| {
                let values = self.normalizer.apply(view, frame)?;
                Ok(Panel::Heatmap(grid_panel(
                    &self.grid,
                    quantity_label(self.field, component),
                    values,
                    self.range,
                    self.colorbar_label.clone(),
                )))
            })
            .collect::<Result<Vec<_>, RenderError>>()?;

        Ok(FramePlot {
            title: format!("{} components", self.field),
            time: Some(self.time.scalar(frame)),
            rows: 1,
            cols: 3,
            panels,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{Buffer, BufferShape};
    use crate::render::testing;
    use crate::schema::RawRequest;
    use serde_json::json;

    #[test]
    fn test_range_is_symmetric_for_fluctuations() {
        let bound = testing::bind(RawRequest::new("2D", "B", "y", json!("unit")), 16, 3);
        let renderer = HeatmapRenderer::new(
            &bound,
            Field::B,
            DisplayComponent::Y,
            Normalization::Unit,
        )
        .unwrap();
        let (lo, hi) = renderer.range();
        assert_eq!(lo, -hi);
        assert!(hi > 0.0);
    }

    #[test]
    fn test_density_keeps_raw_extent() {
        let bound = testing::bind(RawRequest::new("2D", "rho", "pass", json!("unit")), 16, 2);
        let mut renderer = HeatmapRenderer::new(
            &bound,
            Field::Rho,
            DisplayComponent::Pass,
            Normalization::Unit,
        )
        .unwrap();
        let (lo, hi) = renderer.range();
        // Density in 1/cm^3 sits around one
        assert!(lo > 0.5 && hi < 1.5, "range {lo}..{hi}");

        let plot = renderer.draw(1).unwrap();
        assert_eq!(plot.time.map(crate::render::time_label).as_deref(), Some("0.5s"));
        match &plot.panels[0] {
            Panel::Heatmap(h) => {
                assert_eq!(h.values.len(), 256);
                assert!(h.values.iter().all(|v| *v >= lo && *v <= hi));
            }
            other => panic!("expected a heatmap, got {other:?}"),
        }
    }

    #[test]
    fn test_triple_shares_one_scale() {
        let bound = testing::bind(RawRequest::new("triple", "B", "x", json!("unitless")), 16, 2);
        let mut renderer =
            TripleHeatmapRenderer::new(&bound, Field::B, Normalization::Unitless).unwrap();
        let plot = renderer.draw(0).unwrap();
        assert_eq!((plot.rows, plot.cols, plot.panels.len()), (1, 3, 3));
        let ranges: Vec<(f64, f64)> = plot
            .panels
            .iter()
            .map(|p| match p {
                Panel::Heatmap(h) => h.range,
                Panel::Lines(_) => panic!("expected heatmaps"),
            })
            .collect();
        assert!(ranges.iter().all(|r| *r == renderer.range()));
    }

    #[test]
    fn test_zero_mean_magnitude_is_degenerate() {
        let mut bound = testing::bind(RawRequest::new("2D", "B", "x", json!("unitless")), 8, 2);
        let key = VariableKey::new(Field::B, Component::Magnitude);
        let zeros = Buffer::new(key, BufferShape::grid(2, 64), vec![0.0; 128]).unwrap();
        bound.buffers.insert(key, zeros.view());

        let err = HeatmapRenderer::new(
            &bound,
            Field::B,
            DisplayComponent::X,
            Normalization::Unitless,
        )
        .err()
        .unwrap();
        assert!(matches!(err, RenderError::DegenerateFrame { frame: 0, .. }));
    }
}
