//! Increment statistics: structure-function densities and kurtosis.

use std::path::PathBuf;

use log::debug;

use super::{
    AxisSpec, DisplaySource, FramePlot, LinePanel, Panel, RenderError, Renderer, Series,
    padded_range, quantity_label, warn_skipped,
};
use crate::compute::{
    GaussianKde, LineSampler, excess_kurtosis, finite_range, linspace, standard_normal_pdf,
    standardize,
};
use crate::pipeline::{BoundRequest, BufferView};
use crate::schema::{DisplayComponent, Field};

/// Standardised increments are evaluated on `[-KDE_EXTENT, KDE_EXTENT]`.
const KDE_EXTENT: f64 = 6.0;
const KDE_POINTS: usize = 241;
const DENSITY_RANGE: (f64, f64) = (1e-4, 1.0);

/// Rows and columns of the subplot grid for `panels` structure functions.
pub fn subplot_grid(panels: usize) -> (usize, usize) {
    match panels {
        0..=3 => (1, panels.max(1)),
        4 => (2, 2),
        5 | 6 => (2, 3),
        _ => (3, 3),
    }
}

/// Increments of `field` at `offset` along the sampled lines, shifted to
/// zero mean and scaled to unit variance. `None` for a zero-variance sample.
pub fn standardized_increments(sampler: &LineSampler, field: &[f64], offset: usize) -> Option<Vec<f64>> {
    standardize(&sampler.increments(field, offset))
}

fn single_view(bound: &BoundRequest, field: Field, component: DisplayComponent) -> Result<BufferView, RenderError> {
    match DisplaySource::bind(bound, field, component)? {
        DisplaySource::Single(view) => Ok(view),
        DisplaySource::Perpendicular { x, .. } => Ok(x),
    }
}

/// Empirical density of standardised increments, one panel per offset.
pub struct StructureRenderer {
    time: BufferView,
    view: BufferView,
    sampler: LineSampler,
    offsets: Vec<usize>,
    dx_dp: f64,
    title: String,
    output: PathBuf,
    reference: Vec<(f64, f64)>,
    grid: (usize, usize),
    skipped: usize,
}

impl StructureRenderer {
    pub fn new(
        bound: &BoundRequest,
        field: Field,
        component: DisplayComponent,
        offsets: &[usize],
    ) -> Result<Self, RenderError> {
        let points = linspace(-KDE_EXTENT, KDE_EXTENT, KDE_POINTS);
        let reference = points
            .iter()
            .map(|&x| (x, standard_normal_pdf(x)))
            .collect();

        Ok(Self {
            time: bound.time.clone(),
            view: single_view(bound, field, component)?,
            sampler: LineSampler::new(bound.grid.width),
            offsets: offsets.to_vec(),
            dx_dp: bound.grid.dx_dp(),
            title: format!("Structure functions of {}", quantity_label(field, component)),
            output: bound.named.output.clone(),
            reference,
            grid: subplot_grid(offsets.len()),
            skipped: 0,
        })
    }

    fn panel(&mut self, frame: usize, offset: usize) -> LinePanel {
        let mut series = Vec::with_capacity(2);
        let increments = standardized_increments(&self.sampler, self.view.frame(frame), offset);
        match increments.and_then(GaussianKde::new) {
            Some(kde) => {
                let density = self
                    .reference
                    .iter()
                    .map(|&(x, _)| (x, kde.evaluate(x)))
                    .collect();
                series.push(Series::data("increments", density));
            }
            None => self.skipped += 1,
        }
        series.push(Series::reference("Gaussian", self.reference.clone()));

        LinePanel {
            title: format!("offset {} ({:.1} d_p)", offset, offset as f64 * self.dx_dp),
            x: AxisSpec::linear("increment / sigma", (-KDE_EXTENT, KDE_EXTENT)),
            y: AxisSpec::log("density", DENSITY_RANGE),
            series,
        }
    }
}

impl Renderer for StructureRenderer {
    fn frame_count(&self) -> usize {
        self.view.frame_count()
    }

    fn draw(&mut self, frame: usize) -> Result<FramePlot, RenderError> {
        let offsets = self.offsets.clone();
        let panels = offsets
            .into_iter()
            .map(|offset| Panel::Lines(self.panel(frame, offset)))
            .collect();

        if frame + 1 == self.frame_count() {
            warn_skipped(&self.output, self.skipped, "structure-function panels");
        }
        Ok(FramePlot {
            title: self.title.clone(),
            time: Some(self.time.scalar(frame)),
            rows: self.grid.0,
            cols: self.grid.1,
            panels,
        })
    }
}

/// Excess kurtosis of increments against inverse offset.
pub struct KurtosisRenderer {
    time: BufferView,
    title: String,
    /// Per frame, `(1 / offset, kurtosis)` for every offset with spread.
    points: Vec<Vec<(f64, f64)>>,
    x_range: (f64, f64),
    y_range: (f64, f64),
}

impl KurtosisRenderer {
    pub fn new(
        bound: &BoundRequest,
        field: Field,
        component: DisplayComponent,
        offsets: &[usize],
    ) -> Result<Self, RenderError> {
        let view = single_view(bound, field, component)?;
        let sampler = LineSampler::new(bound.grid.width);
        let dx_dp = bound.grid.dx_dp();

        let mut skipped = 0;
        let points: Vec<Vec<(f64, f64)>> = view
            .frames()
            .map(|values| {
                let mut frame_points: Vec<(f64, f64)> = offsets
                    .iter()
                    .filter_map(|&offset| {
                        let kurtosis = excess_kurtosis(&sampler.increments(values, offset));
                        if kurtosis.is_none() {
                            skipped += 1;
                        }
                        kurtosis.map(|k| (1.0 / (offset as f64 * dx_dp), k))
                    })
                    .collect();
                frame_points.sort_by(|a, b| a.0.total_cmp(&b.0));
                frame_points
            })
            .collect();
        warn_skipped(&bound.named.output, skipped, "kurtosis points");

        let inverse: Vec<f64> = offsets.iter().map(|&o| 1.0 / (o as f64 * dx_dp)).collect();
        let x_range = match finite_range(&inverse) {
            Some((lo, hi)) if hi > lo => (lo / 1.5, hi * 1.5),
            Some((v, _)) => (v / 2.0, v * 2.0),
            None => (0.1, 1.0),
        };
        let kurtoses: Vec<f64> = points.iter().flatten().map(|(_, k)| *k).chain([0.0]).collect();
        let y_range = match finite_range(&kurtoses) {
            Some((lo, hi)) => padded_range(lo, hi, 0.1),
            None => (-1.0, 1.0),
        };
        debug!(
            "Kurtosis of {} over {} offsets",
            quantity_label(field, component),
            offsets.len()
        );

        Ok(Self {
            time: bound.time.clone(),
            title: format!("Kurtosis of {} increments", quantity_label(field, component)),
            points,
            x_range,
            y_range,
        })
    }
}

impl Renderer for KurtosisRenderer {
    fn frame_count(&self) -> usize {
        self.points.len()
    }

    fn draw(&mut self, frame: usize) -> Result<FramePlot, RenderError> {
        let points = self
            .points
            .get(frame)
            .cloned()
            .ok_or(RenderError::FrameOutOfRange {
                frame,
                count: self.points.len(),
            })?;
        let gaussian = vec![(self.x_range.0, 0.0), (self.x_range.1, 0.0)];

        Ok(FramePlot {
            title: self.title.clone(),
            time: Some(self.time.scalar(frame)),
            rows: 1,
            cols: 1,
            panels: vec![Panel::Lines(LinePanel {
                title: self.title.clone(),
                x: AxisSpec::log("1 / offset [1/d_p]", self.x_range),
                y: AxisSpec::linear("excess kurtosis", self.y_range),
                series: vec![
                    Series::data("kurtosis", points),
                    Series::reference("Gaussian", gaussian),
                ],
            })],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::{mean, population_std};
    use crate::pipeline::{Buffer, BufferShape};
    use crate::render::testing;
    use crate::schema::{Component, RawRequest, VariableKey};
    use serde_json::json;

    #[test]
    fn test_subplot_grid() {
        assert_eq!(subplot_grid(1), (1, 1));
        assert_eq!(subplot_grid(3), (1, 3));
        assert_eq!(subplot_grid(4), (2, 2));
        assert_eq!(subplot_grid(5), (2, 3));
        assert_eq!(subplot_grid(6), (2, 3));
        assert_eq!(subplot_grid(9), (3, 3));
    }

    #[test]
    fn test_one_panel_per_offset_with_standardized_data() {
        let bound = testing::bind(RawRequest::new("sf", "B", "x", json!([10, 20, 40])), 64, 1);
        let mut renderer =
            StructureRenderer::new(&bound, Field::B, DisplayComponent::X, &[10, 20, 40]).unwrap();
        let plot = renderer.draw(0).unwrap();
        assert_eq!(plot.panels.len(), 3);
        assert_eq!((plot.rows, plot.cols), (1, 3));

        let view = bound.buffers[&VariableKey::new(Field::B, Component::X)].clone();
        for offset in [10, 20, 40] {
            let z = standardized_increments(&renderer.sampler, view.frame(0), offset).unwrap();
            assert!(mean(&z).abs() < 1e-9);
            assert!((population_std(&z) - 1.0).abs() < 1e-9);
        }
        for panel in &plot.panels {
            match panel {
                Panel::Lines(lines) => assert_eq!(lines.series.len(), 2),
                other => panic!("expected line charts, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_constant_field_skips_density() {
        let mut bound = testing::bind(RawRequest::new("sf", "B", "x", json!([1, 2])), 8, 1);
        let key = VariableKey::new(Field::B, Component::X);
        let flat = Buffer::new(key, BufferShape::grid(1, 64), vec![2.5; 64]).unwrap();
        bound.buffers.insert(key, flat.view());

        let mut renderer =
            StructureRenderer::new(&bound, Field::B, DisplayComponent::X, &[1, 2]).unwrap();
        let plot = renderer.draw(0).unwrap();
        for panel in &plot.panels {
            match panel {
                // Only the Gaussian reference remains
                Panel::Lines(lines) => assert_eq!(lines.series.len(), 1),
                other => panic!("expected line charts, got {other:?}"),
            }
        }
        assert_eq!(renderer.skipped, 2);
    }

    #[test]
    fn test_kurtosis_points_sorted_by_inverse_offset() {
        let bound = testing::bind(
            RawRequest::new("kurtosis", "B", "y", json!([1, 2, 4, 8])),
            32,
            2,
        );
        let mut renderer =
            KurtosisRenderer::new(&bound, Field::B, DisplayComponent::Y, &[1, 2, 4, 8]).unwrap();
        assert_eq!(renderer.frame_count(), 2);

        let plot = renderer.draw(1).unwrap();
        match &plot.panels[0] {
            Panel::Lines(lines) => {
                let data = &lines.series[0].points;
                assert_eq!(data.len(), 4);
                assert!(data.windows(2).all(|w| w[0].0 < w[1].0));
                assert!(data.iter().all(|(_, k)| *k >= -2.0));
            }
            other => panic!("expected a line chart, got {other:?}"),
        }
        assert!(matches!(
            renderer.draw(2),
            Err(RenderError::FrameOutOfRange { frame: 2, count: 2 })
        ));
    }
}
