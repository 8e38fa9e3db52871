//! Fourier spectra of slices, diagonals and whole frames.

use std::f64::consts::SQRT_2;

use super::{
    AxisSpec, ColorScale, DisplaySource, FramePlot, HeatmapPanel, LinePanel, Panel, RenderError,
    Renderer, Series, log_range, quantity_label,
};
use crate::compute::{RadialBins, SpectralTransform, fftshift, fftshift2d, wavenumbers};
use crate::pipeline::{BoundRequest, BufferView};
use crate::schema::{Diagonal, DisplayComponent, Field, FourierMode, SliceAxis};

/// Most bins a radial spectrum is split into.
const MAX_RADIAL_BINS: usize = 500;

/// Decades below the global maximum shown by 2D spectra.
const LOG_DECADES_2D: f64 = 9.0;

/// Power-law slopes drawn for comparison, with their labels.
const SLOPES: [(f64, &str); 3] = [(2.0, "k^-2"), (5.0 / 3.0, "k^-5/3"), (3.0, "k^-3")];

/// Amplitude or power spectrum of one component per frame.
pub struct SpectrumRenderer {
    time: BufferView,
    source: DisplaySource,
    mode: FourierMode,
    transform: SpectralTransform,
    width: usize,
    /// Sample spacing of the transformed lines in d_p.
    spacing: f64,
    /// Wavenumber of every plotted bin in 1/d_p.
    k_axis: Vec<f64>,
    bins: Option<RadialBins>,
    title: String,
    global_max: f64,
    y_range: (f64, f64),
}

impl SpectrumRenderer {
    pub fn new(
        bound: &BoundRequest,
        field: Field,
        component: DisplayComponent,
        mode: FourierMode,
    ) -> Result<Self, RenderError> {
        let source = DisplaySource::bind(bound, field, component)?;
        let width = bound.grid.width;
        let dx = bound.grid.dx_dp();
        let spacing = match mode {
            FourierMode::Diagonal { .. } | FourierMode::TraceDiagonal => SQRT_2 * dx,
            _ => dx,
        };

        let (k_axis, bins) = match mode {
            FourierMode::Radial1D => {
                let bins = RadialBins::new(width, dx, (width / 2).clamp(1, MAX_RADIAL_BINS));
                (bins.centers().to_vec(), Some(bins))
            }
            FourierMode::Full2D => (fftshift(&wavenumbers(width, dx)), None),
            _ => (wavenumbers(width, spacing)[..width / 2].to_vec(), None),
        };

        let mut renderer = Self {
            time: bound.time.clone(),
            source,
            mode,
            transform: SpectralTransform::new(width),
            width,
            spacing,
            k_axis,
            bins,
            title: format!("Spectrum of {}", quantity_label(field, component)),
            global_max: 0.0,
            y_range: (0.0, 1.0),
        };

        let frames = renderer.frame_count();
        let mut maxima = Vec::with_capacity(frames);
        let mut values = Vec::new();
        for frame in 0..frames {
            let spectrum = renderer.spectrum(frame);
            maxima.push(spectrum.iter().copied().fold(0.0, f64::max));
            if !mode.is_full_grid() || mode == FourierMode::Radial1D {
                values.extend(renderer.plotted(&spectrum).into_iter().map(|(_, y)| y));
            }
        }
        renderer.global_max = maxima.iter().copied().fold(0.0, f64::max);
        if !(renderer.global_max > 0.0 && renderer.global_max.is_finite()) {
            return Err(RenderError::DegenerateFrame {
                frame: 0,
                reason: format!("{} is zero in every frame", renderer.title),
            });
        }
        renderer.y_range = log_range(&values, 0.5);
        Ok(renderer)
    }

    /// Spectrum of frame `frame`: per-bin values for line modes, a
    /// row-major `width x width` map for 2D.
    fn spectrum(&self, frame: usize) -> Vec<f64> {
        match self.mode {
            FourierMode::Principal { axis, location } => {
                self.slice_amplitude(frame, axis, location)
            }
            FourierMode::Diagonal { direction } => self.diagonal_amplitude(frame, direction),
            FourierMode::Trace {
                x_location,
                y_location,
            } => sum(
                self.slice_amplitude(frame, SliceAxis::X, x_location),
                self.slice_amplitude(frame, SliceAxis::Y, y_location),
            ),
            FourierMode::TraceDiagonal => sum(
                self.diagonal_amplitude(frame, Diagonal::Rising),
                self.diagonal_amplitude(frame, Diagonal::Falling),
            ),
            FourierMode::Radial1D => {
                let power = self.total_power(frame);
                let Some(bins) = &self.bins else {
                    return Vec::new();
                };
                let nbins = bins.len() as f64;
                let scale = self.spacing * self.spacing / (nbins * nbins);
                bins.accumulate(&power).into_iter().map(|p| p * scale).collect()
            }
            FourierMode::Full2D => fftshift2d(&self.total_power(frame), self.width),
        }
    }

    /// `|F|^2` summed over the displayed components.
    fn total_power(&self, frame: usize) -> Vec<f64> {
        let mut total = vec![0.0; self.width * self.width];
        for view in self.source.views() {
            for (t, p) in total.iter_mut().zip(self.transform.power2d(view.frame(frame))) {
                *t += p;
            }
        }
        total
    }

    fn single_frame(&self, frame: usize) -> &[f64] {
        // Line modes are only accepted for single components.
        self.source
            .single()
            .or_else(|| self.source.views().first().copied())
            .map(|view| view.frame(frame))
            .unwrap_or(&[])
    }

    fn slice_amplitude(&self, frame: usize, axis: SliceAxis, location: f64) -> Vec<f64> {
        let width = self.width;
        let field = self.single_frame(frame);
        let line = ((width as f64 * location) as usize).min(width - 1);
        let samples: Vec<f64> = match axis {
            SliceAxis::X => field[line * width..(line + 1) * width].to_vec(),
            SliceAxis::Y => (0..width).map(|y| field[y * width + line]).collect(),
        };
        self.transform.half_amplitude(&samples)
    }

    fn diagonal_amplitude(&self, frame: usize, direction: Diagonal) -> Vec<f64> {
        let width = self.width;
        let field = self.single_frame(frame);
        let samples: Vec<f64> = (0..width)
            .map(|j| match direction {
                Diagonal::Rising => field[j * width + j],
                Diagonal::Falling => field[(width - 1 - j) * width + j],
            })
            .collect();
        self.transform.half_amplitude(&samples)
    }

    /// `(k, value)` pairs that can go on log-log axes.
    fn plotted(&self, spectrum: &[f64]) -> Vec<(f64, f64)> {
        self.k_axis
            .iter()
            .copied()
            .zip(spectrum.iter().copied())
            .filter(|(k, v)| *k > 0.0 && *v > 0.0)
            .collect()
    }

    /// Power laws through the global maximum at the first non-zero wavenumber.
    fn reference_lines(&self) -> Vec<Series> {
        let positive: Vec<f64> = self.k_axis.iter().copied().filter(|k| *k > 0.0).collect();
        let (Some(&k1), Some(&k_end)) = (positive.first(), positive.last()) else {
            return Vec::new();
        };
        let slopes = if self.mode == FourierMode::Radial1D {
            &SLOPES[..]
        } else {
            &SLOPES[..2]
        };
        slopes
            .iter()
            .map(|&(alpha, label)| {
                let at = |k: f64| self.global_max * (k / k1).powf(-alpha);
                Series::reference(label, vec![(k1, at(k1)), (k_end, at(k_end))])
            })
            .collect()
    }

    fn k_label(&self) -> &'static str {
        match self.mode {
            FourierMode::Radial1D => "|k| [1/d_p]",
            FourierMode::Diagonal { .. } | FourierMode::TraceDiagonal => "k_diag [1/d_p]",
            FourierMode::Principal {
                axis: SliceAxis::Y, ..
            } => "k_y [1/d_p]",
            _ => "k_x [1/d_p]",
        }
    }

    fn full_map_panel(&self, spectrum: Vec<f64>) -> HeatmapPanel {
        let dk = if self.k_axis.len() > 1 {
            self.k_axis[1] - self.k_axis[0]
        } else {
            1.0
        };
        let extent = match (self.k_axis.first(), self.k_axis.last()) {
            (Some(first), Some(last)) => (first - dk / 2.0, last + dk / 2.0),
            _ => (-1.0, 1.0),
        };
        HeatmapPanel {
            title: self.title.clone(),
            x_label: "k_x [1/d_p]".to_string(),
            y_label: "k_y [1/d_p]".to_string(),
            x_extent: extent,
            y_extent: extent,
            width: self.width,
            height: self.width,
            values: spectrum,
            range: (
                self.global_max / 10f64.powf(LOG_DECADES_2D),
                self.global_max,
            ),
            scale: ColorScale::Log10,
            colorbar_label: "|F|^2".to_string(),
        }
    }
}

impl Renderer for SpectrumRenderer {
    fn frame_count(&self) -> usize {
        self.time.frame_count()
    }

    fn draw(&mut self, frame: usize) -> Result<FramePlot, RenderError> {
        let spectrum = self.spectrum(frame);
        let panel = if self.mode == FourierMode::Full2D {
            Panel::Heatmap(self.full_map_panel(spectrum))
        } else {
            let positive: Vec<f64> = self.k_axis.iter().copied().filter(|k| *k > 0.0).collect();
            let x_range = match (positive.first(), positive.last()) {
                (Some(lo), Some(hi)) if hi > lo => (*lo, *hi),
                _ => (0.1, 1.0),
            };
            let mut series = vec![Series::data("spectrum", self.plotted(&spectrum))];
            series.extend(self.reference_lines());
            let y_label = if self.mode == FourierMode::Radial1D {
                "power"
            } else {
                "|F|"
            };
            Panel::Lines(LinePanel {
                title: self.title.clone(),
                x: AxisSpec::log(self.k_label(), x_range),
                y: AxisSpec::log(y_label, self.y_range),
                series,
            })
        };

        Ok(FramePlot {
            title: self.title.clone(),
            time: Some(self.time.scalar(frame)),
            rows: 1,
            cols: 1,
            panels: vec![panel],
        })
    }
}

fn sum(mut a: Vec<f64>, b: Vec<f64>) -> Vec<f64> {
    for (x, y) in a.iter_mut().zip(b) {
        *x += y;
    }
    a
}
