//! RMS time series and the residual-energy diagnostics.

use super::{
    AxisSpec, FramePlot, LinePanel, Panel, RenderError, Renderer, Series, input, log_range,
    padded_range, quantity_label, warn_skipped,
};
use crate::compute::{MU_0, PROTON_MASS, finite_range, mean, population_std};
use crate::pipeline::{BoundRequest, BufferView};
use crate::schema::{Component, DisplayComponent, Field, RmsMode, Variable};

/// Velocity/magnetic balance of one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResidualPoint {
    /// Normalised cross helicity `2<dv.b> / (E_v + E_b)`.
    pub cross_helicity: f64,
    /// Normalised residual energy `(E_v - E_b) / (E_v + E_b)`.
    pub residual_energy: f64,
    /// Alfvén ratio `E_v / E_b`, `None` without magnetic fluctuations.
    pub alfven_ratio: Option<f64>,
    /// `E_v = <|dv|^2>` (m^2/s^2).
    pub kinetic: f64,
    /// `E_b = <|b|^2>` with `b = dB / sqrt(mu0 rho m_p)` (m^2/s^2).
    pub magnetic: f64,
}

/// Residual-energy diagnostics of one frame of mean-centred `b` and `v`
/// components and raw number density.
///
/// `None` when any density is non-positive or both energies vanish.
pub fn residual_energy(b: [&[f64]; 3], v: [&[f64]; 3], rho: &[f64]) -> Option<ResidualPoint> {
    let cells = rho.len();
    if cells == 0 {
        return None;
    }

    let (mut kinetic, mut magnetic, mut cross) = (0.0, 0.0, 0.0);
    for i in 0..cells {
        let density = rho[i];
        if !(density > 0.0 && density.is_finite()) {
            return None;
        }
        let alfven = (MU_0 * density * PROTON_MASS).sqrt();
        for axis in 0..3 {
            let bi = b[axis][i] / alfven;
            let vi = v[axis][i];
            kinetic += vi * vi;
            magnetic += bi * bi;
            cross += vi * bi;
        }
    }
    let n = cells as f64;
    let (kinetic, magnetic, cross) = (kinetic / n, magnetic / n, cross / n);

    let total = kinetic + magnetic;
    if !(total > 0.0 && total.is_finite()) {
        return None;
    }
    Some(ResidualPoint {
        cross_helicity: 2.0 * cross / total,
        residual_energy: (kinetic - magnetic) / total,
        alfven_ratio: (magnetic > 0.0).then(|| kinetic / magnetic),
        kinetic,
        magnetic,
    })
}

/// One chart of one or more time series.
#[derive(Debug, Clone)]
struct Chart {
    title: String,
    y: AxisSpec,
    curves: Vec<(String, Vec<Option<f64>>)>,
}

impl Chart {
    fn linear(title: &str, y_label: &str, curves: Vec<(String, Vec<Option<f64>>)>) -> Self {
        let values: Vec<f64> = curves.iter().flat_map(|(_, c)| c.iter().flatten().copied()).collect();
        let range = match finite_range(&values) {
            Some((lo, hi)) => padded_range(lo, hi, 0.1),
            None => (-1.0, 1.0),
        };
        Self {
            title: title.to_string(),
            y: AxisSpec::linear(y_label, range),
            curves,
        }
    }

    fn log(title: &str, y_label: &str, curves: Vec<(String, Vec<Option<f64>>)>) -> Self {
        let values: Vec<f64> = curves.iter().flat_map(|(_, c)| c.iter().flatten().copied()).collect();
        Self {
            title: title.to_string(),
            y: AxisSpec::log(y_label, log_range(&values, 0.2)),
            curves,
        }
    }

    fn fixed(title: &str, y_label: &str, range: (f64, f64), curves: Vec<(String, Vec<Option<f64>>)>) -> Self {
        Self {
            title: title.to_string(),
            y: AxisSpec::linear(y_label, range),
            curves,
        }
    }

    /// Panel showing frames `0..=last`.
    fn panel(&self, times: &[f64], x_range: (f64, f64), last: usize) -> LinePanel {
        let series = self
            .curves
            .iter()
            .map(|(label, values)| {
                let points = times
                    .iter()
                    .zip(values)
                    .take(last + 1)
                    .filter_map(|(t, v)| v.map(|v| (*t, v)))
                    .collect();
                Series::data(label.clone(), points)
            })
            .collect();
        LinePanel {
            title: self.title.clone(),
            x: AxisSpec::linear("t [s]", x_range),
            y: self.y.clone(),
            series,
        }
    }
}

/// Growing RMS time series, or a single summary image of the whole run.
pub struct RmsRenderer {
    mode: RmsMode,
    title: String,
    times: Vec<f64>,
    x_range: (f64, f64),
    /// Charts drawn in animated mode.
    animated: Vec<Chart>,
    /// Charts drawn in summary mode.
    summary: Vec<Chart>,
}

impl RmsRenderer {
    pub fn new(
        bound: &BoundRequest,
        variable: Variable,
        component: DisplayComponent,
        mode: RmsMode,
    ) -> Result<Self, RenderError> {
        let times: Vec<f64> = bound.time.as_slice().to_vec();
        let (lo, hi) = finite_range(&times).unwrap_or((0.0, 1.0));
        let x_range = if hi > lo { (lo, hi) } else { padded_range(lo, hi, 0.0) };

        let (title, animated, summary) = match variable {
            Variable::Field(field) => {
                let chart = field_chart(bound, field, component)?;
                let title = format!("RMS of {}", quantity_label(field, component));
                (title, vec![chart.clone()], vec![chart])
            }
            Variable::Residual => {
                let charts = residual_charts(bound)?;
                let title = "Cross helicity and residual energy".to_string();
                (title, vec![charts[0].clone()], charts.to_vec())
            }
        };

        Ok(Self {
            mode,
            title,
            times,
            x_range,
            animated,
            summary,
        })
    }
}

impl Renderer for RmsRenderer {
    fn frame_count(&self) -> usize {
        match self.mode {
            RmsMode::Animated => self.times.len(),
            RmsMode::Summary => 1,
        }
    }

    fn draw(&mut self, frame: usize) -> Result<FramePlot, RenderError> {
        let count = self.frame_count();
        if frame >= count {
            return Err(RenderError::FrameOutOfRange { frame, count });
        }
        let (charts, last, time) = match self.mode {
            RmsMode::Animated => (&self.animated, frame, Some(self.times[frame])),
            RmsMode::Summary => (&self.summary, self.times.len().saturating_sub(1), None),
        };
        let panels: Vec<Panel> = charts
            .iter()
            .map(|chart| Panel::Lines(chart.panel(&self.times, self.x_range, last)))
            .collect();

        Ok(FramePlot {
            title: self.title.clone(),
            time,
            rows: panels.len(),
            cols: 1,
            panels,
        })
    }
}

/// Population standard deviation of the in-plane magnitude `sqrt(x^2 + y^2)`.
pub fn perpendicular_rms(x: &[f64], y: &[f64]) -> f64 {
    let magnitude: Vec<f64> = x.iter().zip(y).map(|(a, b)| a.hypot(*b)).collect();
    population_std(&magnitude)
}

fn std_series(view: &BufferView, scale: f64) -> Vec<Option<f64>> {
    view.frames().map(|f| Some(population_std(f) / scale)).collect()
}

fn field_chart(bound: &BoundRequest, field: Field, component: DisplayComponent) -> Result<Chart, RenderError> {
    let scale = field.unit_scale();
    let y_label = format!("RMS [{}]", field.unit_name());
    let title = format!("RMS of {}", quantity_label(field, component));

    let curves = match component.fetched() {
        Some(c) => vec![(
            quantity_label(field, component),
            std_series(&input(bound, field, c)?, scale),
        )],
        None => {
            let x = input(bound, field, Component::X)?;
            let y = input(bound, field, Component::Y)?;
            let z = input(bound, field, Component::Z)?;
            let perpendicular = x
                .frames()
                .zip(y.frames())
                .map(|(fx, fy)| Some(perpendicular_rms(fx, fy) / scale))
                .collect();
            vec![
                (format!("{}_perp", field.short_name()), perpendicular),
                (format!("{}_par", field.short_name()), std_series(&z, scale)),
            ]
        }
    };
    Ok(Chart::linear(&title, &y_label, curves))
}

fn residual_charts(bound: &BoundRequest) -> Result<[Chart; 3], RenderError> {
    let b = [
        input(bound, Field::B, Component::X)?,
        input(bound, Field::B, Component::Y)?,
        input(bound, Field::B, Component::Z)?,
    ];
    let v = [
        input(bound, Field::V, Component::X)?,
        input(bound, Field::V, Component::Y)?,
        input(bound, Field::V, Component::Z)?,
    ];
    let rho = input(bound, Field::Rho, Component::Pass)?;

    let points: Vec<Option<ResidualPoint>> = (0..rho.frame_count())
        .map(|i| {
            residual_energy(
                [b[0].frame(i), b[1].frame(i), b[2].frame(i)],
                [v[0].frame(i), v[1].frame(i), v[2].frame(i)],
                rho.frame(i),
            )
        })
        .collect();
    let skipped = points.iter().filter(|p| p.is_none()).count();
    warn_skipped(&bound.named.output, skipped, "residual-energy frames");
    if let Some(first) = points.iter().flatten().next() {
        log::debug!(
            "Residual energy at the first frame: sigma_c = {:.3}, sigma_r = {:.3}, <rho> = {:.3e}",
            first.cross_helicity,
            first.residual_energy,
            mean(rho.frame(0))
        );
    }

    let series = |f: fn(&ResidualPoint) -> Option<f64>| -> Vec<Option<f64>> {
        points.iter().map(|p| p.as_ref().and_then(f)).collect()
    };
    Ok([
        Chart::fixed(
            "Cross helicity and residual energy",
            "normalised",
            (-1.05, 1.05),
            vec![
                ("sigma_c".to_string(), series(|p| Some(p.cross_helicity))),
                ("sigma_r".to_string(), series(|p| Some(p.residual_energy))),
            ],
        ),
        Chart::linear(
            "Alfven ratio",
            "r_A",
            vec![("r_A".to_string(), series(|p| p.alfven_ratio))],
        ),
        Chart::log(
            "Fluctuation energies",
            "E [m^2/s^2]",
            vec![
                ("E_v".to_string(), series(|p| Some(p.kinetic))),
                ("E_b".to_string(), series(|p| Some(p.magnetic))),
            ],
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{Buffer, BufferShape};
    use crate::render::testing;
    use crate::schema::{RawRequest, VariableKey};
    use serde_json::{Value, json};

    fn series_lengths(plot: &FramePlot) -> Vec<usize> {
        plot.panels
            .iter()
            .flat_map(|p| match p {
                Panel::Lines(lines) => lines.series.iter().map(|s| s.points.len()).collect(),
                Panel::Heatmap(_) => Vec::new(),
            })
            .collect()
    }

    #[test]
    fn test_alfvenic_fluctuations() {
        // v = b exactly: pure outward Alfvén wave
        let rho = vec![1e6; 4];
        let alfven = (MU_0 * 1e6 * PROTON_MASS).sqrt();
        let bx = [1e-9, -1e-9, 2e-9, -2e-9];
        let vx: Vec<f64> = bx.iter().map(|b| b / alfven).collect();
        let zero = [0.0; 4];

        let point = residual_energy([&bx, &zero, &zero], [&vx, &zero, &zero], &rho).unwrap();
        assert!((point.cross_helicity - 1.0).abs() < 1e-12);
        assert!(point.residual_energy.abs() < 1e-12);
        assert!((point.alfven_ratio.unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_degenerate_residual_frames() {
        let zero = [0.0; 3];
        assert!(residual_energy([&zero; 3], [&zero; 3], &[1e6; 3]).is_none());
        let b = [1e-9, -1e-9, 0.0];
        assert!(residual_energy([&b, &zero, &zero], [&zero; 3], &[1e6, 0.0, 1e6]).is_none());

        // Kinetic energy only: ratio undefined, residual energy +1
        let point = residual_energy([&zero; 3], [&b, &zero, &zero], &[1e6; 3]).unwrap();
        assert_eq!(point.alfven_ratio, None);
        assert!((point.residual_energy - 1.0).abs() < 1e-12);
    }

    /// One frame of four B cells given in nT.
    fn b_view(component: Component, values: [f64; 4]) -> BufferView {
        let data = values.iter().map(|v| v * Field::B.unit_scale()).collect();
        Buffer::new(VariableKey::new(Field::B, component), BufferShape::grid(1, 4), data)
            .unwrap()
            .view()
    }

    fn perpendicular_chart(x: [f64; 4], y: [f64; 4], z: [f64; 4]) -> Chart {
        let mut bound = testing::bind(RawRequest::new("rms", "B", "perp", Value::Null), 8, 1);
        for (component, values) in [(Component::X, x), (Component::Y, y), (Component::Z, z)] {
            bound
                .buffers
                .insert(VariableKey::new(Field::B, component), b_view(component, values));
        }
        field_chart(&bound, Field::B, DisplayComponent::Perpendicular).unwrap()
    }

    #[test]
    fn test_perpendicular_rms_of_magnitude() {
        assert_eq!(perpendicular_rms(&[1.0, -1.0, 1.0, -1.0], &[0.0; 4]), 0.0);
        // |d_perp| = [5, 0, 5, 0]
        let rms = perpendicular_rms(&[3.0, 0.0, -3.0, 0.0], &[4.0, 0.0, 4.0, 0.0]);
        assert!((rms - 2.5).abs() < 1e-12);
    }

    #[test]
    fn test_perpendicular_chart_values() {
        // Flipping sign leaves |dB_perp| constant
        let chart = perpendicular_chart([1.0, -1.0, 1.0, -1.0], [0.0; 4], [2.0, -2.0, 0.0, 0.0]);
        assert_eq!(chart.curves[0].0, "B_perp");
        let perp = chart.curves[0].1[0].unwrap();
        let par = chart.curves[1].1[0].unwrap();
        assert!(perp.abs() < 1e-9, "perp = {perp}");
        assert!((par - 2f64.sqrt()).abs() < 1e-9, "par = {par}");

        let chart = perpendicular_chart([3.0, 0.0, -3.0, 0.0], [4.0, 0.0, 4.0, 0.0], [0.0; 4]);
        let perp = chart.curves[0].1[0].unwrap();
        assert!((perp - 2.5).abs() < 1e-9, "perp = {perp}");
    }

    #[test]
    fn test_animated_series_grows() {
        let bound = testing::bind(RawRequest::new("rms", "B", "perp", Value::Null), 8, 3);
        let mut renderer = RmsRenderer::new(
            &bound,
            Variable::Field(Field::B),
            DisplayComponent::Perpendicular,
            RmsMode::Animated,
        )
        .unwrap();
        assert_eq!(renderer.frame_count(), 3);
        assert_eq!(series_lengths(&renderer.draw(0).unwrap()), vec![1, 1]);
        let last = renderer.draw(2).unwrap();
        assert_eq!(series_lengths(&last), vec![3, 3]);
        assert_eq!(last.heading(), "RMS of B_perp  t = 1.0s");
    }

    #[test]
    fn test_residual_summary_is_one_three_panel_image() {
        let bound = testing::bind(RawRequest::new("rms", "bv", "pass", json!("summary")), 8, 3);
        let mut renderer = RmsRenderer::new(
            &bound,
            Variable::Residual,
            DisplayComponent::Pass,
            RmsMode::Summary,
        )
        .unwrap();
        assert_eq!(renderer.frame_count(), 1);
        let plot = renderer.draw(0).unwrap();
        assert_eq!(plot.panels.len(), 3);
        assert_eq!(plot.time, None);
        assert_eq!(series_lengths(&plot), vec![3, 3, 3, 3, 3]);
        assert!(renderer.draw(1).is_err());
    }

    #[test]
    fn test_synthetic_run_is_anti_correlated() {
        // The synthetic generator drives v against B
        let bound = testing::bind(RawRequest::new("rms", "bv", "pass", Value::Null), 16, 1);
        let charts = residual_charts(&bound).unwrap();
        let sigma_c = charts[0].curves[0].1[0].unwrap();
        assert!(sigma_c < -0.5, "sigma_c = {sigma_c}");
    }
}
