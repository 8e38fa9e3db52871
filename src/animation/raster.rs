//! Drawing `FramePlot`s with plotters.

use std::fmt::Display;
use std::path::Path;
use std::sync::OnceLock;

use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::style::{FontStyle, register_font};

use super::EncodeError;
use crate::render::{
    AxisSpec, ColorScale, FramePlot, HeatmapPanel, LinePanel, LineStyle, Panel, TITLE_HEIGHT,
};

const COLORBAR_STEPS: usize = 64;
const DATA_COLORS: [RGBColor; 5] = [BLUE, RED, GREEN, MAGENTA, CYAN];
const REFERENCE_COLOR: RGBColor = RGBColor(110, 110, 110);
/// Data series this short also get point markers.
const MARKER_LIMIT: usize = 64;

/// Every label is drawn with this face, registered as `sans-serif`.
const SANS_FONT: &[u8] = include_bytes!("../../assets/DejaVuSans.ttf");
static FONT_REGISTERED: OnceLock<Result<(), String>> = OnceLock::new();

/// One RGB8 image, rows top to bottom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbFrame {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl RgbFrame {
    pub const CHANNELS: u32 = 3;

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Colour at `(x, y)` with `y` counted from the top.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let i = (y as usize * self.width as usize + x as usize) * 3;
        [self.pixels[i], self.pixels[i + 1], self.pixels[i + 2]]
    }
}

fn draw_error(e: impl Display) -> EncodeError {
    EncodeError::Draw(e.to_string())
}

/// Register the embedded font once per process.
fn ensure_font() -> Result<(), EncodeError> {
    FONT_REGISTERED
        .get_or_init(|| {
            register_font("sans-serif", FontStyle::Normal, SANS_FONT)
                .map_err(|_| "embedded font: invalid font data".to_string())
        })
        .clone()
        .map_err(EncodeError::Draw)
}

/// Draw `plot` into memory with square panels of `panel_size` pixels.
pub fn rasterize(plot: &FramePlot, panel_size: u32) -> Result<RgbFrame, EncodeError> {
    let (width, height) = plot.pixel_size(panel_size);
    let mut pixels = vec![0u8; width as usize * height as usize * RgbFrame::CHANNELS as usize];
    {
        let root = BitMapBackend::with_buffer(&mut pixels, (width, height)).into_drawing_area();
        draw_plot(&root, plot)?;
        root.present().map_err(draw_error)?;
    }
    Ok(RgbFrame {
        width,
        height,
        pixels,
    })
}

/// Draw `plot` straight into an image file.
pub fn save_png(plot: &FramePlot, panel_size: u32, path: &Path) -> Result<(u32, u32), EncodeError> {
    let size = plot.pixel_size(panel_size);
    let root = BitMapBackend::new(path, size).into_drawing_area();
    draw_plot(&root, plot)?;
    root.present().map_err(draw_error)?;
    Ok(size)
}

pub(crate) fn draw_plot<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    plot: &FramePlot,
) -> Result<(), EncodeError> {
    ensure_font()?;
    root.fill(&WHITE).map_err(draw_error)?;
    let (band, body) = root.split_vertically(TITLE_HEIGHT);
    band.titled(&plot.heading(), ("sans-serif", 22))
        .map_err(draw_error)?;

    let areas = body.split_evenly((plot.rows.max(1), plot.cols.max(1)));
    for (area, panel) in areas.iter().zip(&plot.panels) {
        match panel {
            Panel::Heatmap(heatmap) => draw_heatmap(area, heatmap)?,
            Panel::Lines(lines) => draw_lines(area, lines)?,
        }
    }
    Ok(())
}

/// A drawable interval: finite and non-empty.
fn span((lo, hi): (f64, f64)) -> (f64, f64) {
    match (lo.is_finite(), hi.is_finite()) {
        (true, true) if hi > lo => (lo, hi),
        (true, true) => (lo.min(hi) - 0.5, lo.max(hi) + 0.5),
        _ => (0.0, 1.0),
    }
}

fn log_span((lo, hi): (f64, f64)) -> (f64, f64) {
    let hi = if hi > 0.0 { hi } else { 1.0 };
    let lo = if lo > 0.0 && lo < hi { lo } else { hi * 1e-3 };
    span((lo.log10(), hi.log10()))
}

/// Blue, white, red.
fn diverging(t: f64) -> RGBColor {
    let t = t.clamp(0.0, 1.0);
    if t < 0.5 {
        let s = t / 0.5;
        let c = (s * 255.0) as u8;
        RGBColor(c, c, 255)
    } else {
        let s = (1.0 - t) / 0.5;
        let c = (s * 255.0) as u8;
        RGBColor(255, c, c)
    }
}

/// Black, red, yellow, white.
fn sequential(t: f64) -> RGBColor {
    let t = t.clamp(0.0, 1.0) * 3.0;
    let ramp = |s: f64| (s.clamp(0.0, 1.0) * 255.0) as u8;
    RGBColor(ramp(t), ramp(t - 1.0), ramp(t - 2.0))
}

fn color_of(value: f64, range: (f64, f64), scale: ColorScale) -> RGBColor {
    match scale {
        ColorScale::Linear => {
            let (lo, hi) = span(range);
            diverging((value - lo) / (hi - lo))
        }
        ColorScale::Log10 => {
            let (lo, hi) = log_span(range);
            if value > 0.0 {
                sequential((value.log10() - lo) / (hi - lo))
            } else {
                sequential(0.0)
            }
        }
    }
}

fn draw_heatmap<DB: DrawingBackend>(
    area: &DrawingArea<DB, Shift>,
    panel: &HeatmapPanel,
) -> Result<(), EncodeError> {
    let (width, _) = area.dim_in_pixel();
    let bar = (width as i32 / 6).max(48);
    let (map_area, bar_area) = area.split_horizontally(width as i32 - bar);

    let (x0, x1) = span(panel.x_extent);
    let (y0, y1) = span(panel.y_extent);
    let mut chart = ChartBuilder::on(&map_area)
        .caption(&panel.title, ("sans-serif", 16))
        .margin(6)
        .x_label_area_size(30)
        .y_label_area_size(40)
        .build_cartesian_2d(x0..x1, y0..y1)
        .map_err(draw_error)?;
    chart
        .configure_mesh()
        .disable_mesh()
        .x_desc(panel.x_label.as_str())
        .y_desc(panel.y_label.as_str())
        .draw()
        .map_err(draw_error)?;

    let (cols, rows) = (panel.width.max(1), panel.height.max(1));
    let dx = (x1 - x0) / cols as f64;
    let dy = (y1 - y0) / rows as f64;
    let cells = (0..rows).flat_map(|row| (0..cols).map(move |col| (row, col)));
    chart
        .draw_series(cells.filter_map(|(row, col)| {
            let value = *panel.values.get(row * cols + col)?;
            let x = x0 + col as f64 * dx;
            let y = y0 + row as f64 * dy;
            Some(Rectangle::new(
                [(x, y), (x + dx, y + dy)],
                color_of(value, panel.range, panel.scale).filled(),
            ))
        }))
        .map_err(draw_error)?;

    draw_colorbar(&bar_area, panel)
}

fn draw_colorbar<DB: DrawingBackend>(
    area: &DrawingArea<DB, Shift>,
    panel: &HeatmapPanel,
) -> Result<(), EncodeError> {
    let (lo, hi) = match panel.scale {
        ColorScale::Linear => span(panel.range),
        ColorScale::Log10 => log_span(panel.range),
    };
    let mut chart = ChartBuilder::on(area)
        .margin_top(30)
        .margin_bottom(36)
        .margin_right(4)
        .set_label_area_size(LabelAreaPosition::Right, 36)
        .build_cartesian_2d(0.0..1.0, lo..hi)
        .map_err(draw_error)?;
    let log = panel.scale == ColorScale::Log10;
    let tick = |v: &f64| tick_label(*v, log);
    chart
        .configure_mesh()
        .disable_mesh()
        .disable_x_axis()
        .y_label_formatter(&tick)
        .y_desc(panel.colorbar_label.as_str())
        .draw()
        .map_err(draw_error)?;

    let step = (hi - lo) / COLORBAR_STEPS as f64;
    chart
        .draw_series((0..COLORBAR_STEPS).map(|i| {
            let t = (i as f64 + 0.5) / COLORBAR_STEPS as f64;
            let color = match panel.scale {
                ColorScale::Linear => diverging(t),
                ColorScale::Log10 => sequential(t),
            };
            let y = lo + i as f64 * step;
            Rectangle::new([(0.0, y), (1.0, y + step)], color.filled())
        }))
        .map_err(draw_error)?;
    Ok(())
}

fn tick_label(value: f64, log: bool) -> String {
    if log {
        format!("1e{value:.0}")
    } else if value != 0.0 && (value.abs() >= 1e4 || value.abs() < 1e-2) {
        format!("{value:.1e}")
    } else {
        format!("{value:.2}")
    }
}

fn axis_span(axis: &AxisSpec) -> (f64, f64) {
    if axis.log {
        log_span(axis.range)
    } else {
        span(axis.range)
    }
}

/// Points in chart coordinates, dropping those a log axis cannot show.
fn chart_points(points: &[(f64, f64)], x: &AxisSpec, y: &AxisSpec) -> Vec<(f64, f64)> {
    let project = |v: f64, log: bool| {
        if !log {
            Some(v)
        } else if v > 0.0 {
            Some(v.log10())
        } else {
            None
        }
    };
    points
        .iter()
        .filter_map(|&(px, py)| Some((project(px, x.log)?, project(py, y.log)?)))
        .collect()
}

fn draw_lines<DB: DrawingBackend>(
    area: &DrawingArea<DB, Shift>,
    panel: &LinePanel,
) -> Result<(), EncodeError> {
    let (x0, x1) = axis_span(&panel.x);
    let (y0, y1) = axis_span(&panel.y);
    let mut chart = ChartBuilder::on(area)
        .caption(&panel.title, ("sans-serif", 16))
        .margin(8)
        .x_label_area_size(30)
        .y_label_area_size(50)
        .build_cartesian_2d(x0..x1, y0..y1)
        .map_err(draw_error)?;

    let x_tick = |v: &f64| tick_label(*v, panel.x.log);
    let y_tick = |v: &f64| tick_label(*v, panel.y.log);
    chart
        .configure_mesh()
        .x_desc(panel.x.label.as_str())
        .y_desc(panel.y.label.as_str())
        .x_label_formatter(&x_tick)
        .y_label_formatter(&y_tick)
        .draw()
        .map_err(draw_error)?;

    let mut data_index = 0;
    for series in &panel.series {
        let points = chart_points(&series.points, &panel.x, &panel.y);
        let (color, width) = match series.style {
            LineStyle::Data => {
                data_index += 1;
                (DATA_COLORS[(data_index - 1) % DATA_COLORS.len()], 2)
            }
            LineStyle::Reference => (REFERENCE_COLOR, 1),
        };

        if series.style == LineStyle::Data && points.len() <= MARKER_LIMIT {
            chart
                .draw_series(points.iter().map(|&p| Circle::new(p, 3, color.filled())))
                .map_err(draw_error)?;
        }
        chart
            .draw_series(LineSeries::new(points, color.stroke_width(width)))
            .map_err(draw_error)?
            .label(series.label.as_str())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 16, y)], color.stroke_width(width)));
    }

    chart
        .configure_series_labels()
        .border_style(BLACK)
        .background_style(WHITE.mix(0.8))
        .draw()
        .map_err(draw_error)?;
    Ok(())
}
