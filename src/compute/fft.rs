//! Fourier transforms for spectra on square grids.
//!
//! Uses rustfft with plans cached per grid width. Frequency helpers follow
//! the usual `fftfreq` / `fftshift` conventions.

use std::f64::consts::TAU;
use std::sync::Arc;

use num_complex::Complex;
use rustfft::{Fft, FftPlanner};

/// Forward transforms of rows, diagonals and whole fields of a `width x width` grid.
pub struct SpectralTransform {
    width: usize,
    // Cached plan, rows and columns share it on a square grid
    fft: Arc<dyn Fft<f64>>,
}

impl SpectralTransform {
    pub fn new(width: usize) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(width);
        Self { width, fft }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Complex spectrum of one line of `width` samples.
    pub fn fft(&self, signal: &[f64]) -> Vec<Complex<f64>> {
        debug_assert_eq!(signal.len(), self.width);
        let mut data: Vec<Complex<f64>> = signal.iter().map(|&x| Complex::new(x, 0.0)).collect();
        self.fft.process(&mut data);
        data
    }

    /// Magnitudes of the first `width / 2` (non-negative frequency) bins.
    pub fn half_amplitude(&self, signal: &[f64]) -> Vec<f64> {
        self.fft(signal)
            .iter()
            .take(self.width / 2)
            .map(|c| c.norm())
            .collect()
    }

    /// 2D transform of a row-major field.
    pub fn fft2d(&self, input: &[f64]) -> Vec<Complex<f64>> {
        debug_assert_eq!(input.len(), self.width * self.width);
        let width = self.width;

        let mut data: Vec<Complex<f64>> = input.iter().map(|&x| Complex::new(x, 0.0)).collect();

        // Row-wise FFT
        for row in data.chunks_exact_mut(width) {
            self.fft.process(row);
        }

        // Column-wise FFT
        let mut col_buffer = vec![Complex::new(0.0, 0.0); width];
        for x in 0..width {
            for (y, slot) in col_buffer.iter_mut().enumerate() {
                *slot = data[y * width + x];
            }
            self.fft.process(&mut col_buffer);
            for (y, value) in col_buffer.iter().enumerate() {
                data[y * width + x] = *value;
            }
        }

        data
    }

    /// `|F|^2` of a row-major field.
    pub fn power2d(&self, input: &[f64]) -> Vec<f64> {
        self.fft2d(input).iter().map(|c| c.norm_sqr()).collect()
    }
}

/// Sample frequencies of an `n`-point transform with sample spacing `spacing`.
pub fn fftfreq(n: usize, spacing: f64) -> Vec<f64> {
    let scale = 1.0 / (n as f64 * spacing);
    let positive = n.div_ceil(2);
    (0..n)
        .map(|i| {
            let index = if i < positive {
                i as f64
            } else {
                i as f64 - n as f64
            };
            index * scale
        })
        .collect()
}

/// Angular wavenumbers `2π·fftfreq`.
pub fn wavenumbers(n: usize, spacing: f64) -> Vec<f64> {
    fftfreq(n, spacing).into_iter().map(|f| TAU * f).collect()
}

/// Move the zero-frequency bin to the centre of a 1D spectrum.
pub fn fftshift<T: Copy>(data: &[T]) -> Vec<T> {
    let mut shifted = data.to_vec();
    shifted.rotate_left(data.len().div_ceil(2));
    shifted
}

/// Move the zero-frequency bin to the centre of a row-major square spectrum.
pub fn fftshift2d<T: Copy>(data: &[T], width: usize) -> Vec<T> {
    let split = width.div_ceil(2);
    (0..data.len())
        .map(|index| {
            let x = (index % width + split) % width;
            let y = (index / width + split) % width;
            data[y * width + x]
        })
        .collect()
}

/// Radial binning of a square 2D power map into `|k|` shells.
#[derive(Debug, Clone)]
pub struct RadialBins {
    centers: Vec<f64>,
    bin_of_cell: Vec<usize>,
}

impl RadialBins {
    /// Bins spanning `[0, max|k|]` evenly for a `width x width` grid with
    /// sample spacing `spacing`. Cells at exactly `max|k|` land in the last bin.
    pub fn new(width: usize, spacing: f64, nbins: usize) -> Self {
        let nbins = nbins.max(1);
        let k = wavenumbers(width, spacing);
        let magnitude: Vec<f64> = (0..width * width)
            .map(|index| k[index % width].hypot(k[index / width]))
            .collect();
        let k_max = magnitude.iter().copied().fold(0.0, f64::max);
        let bin_width = if k_max > 0.0 { k_max / nbins as f64 } else { 1.0 };

        let bin_of_cell = magnitude
            .iter()
            .map(|&m| ((m / bin_width) as usize).min(nbins - 1))
            .collect();
        let centers = (0..nbins).map(|i| (i as f64 + 0.5) * bin_width).collect();

        Self {
            centers,
            bin_of_cell,
        }
    }

    /// Bin centres.
    pub fn centers(&self) -> &[f64] {
        &self.centers
    }

    pub fn len(&self) -> usize {
        self.centers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.centers.is_empty()
    }

    /// Sum a row-major power map into the bins.
    pub fn accumulate(&self, power: &[f64]) -> Vec<f64> {
        let mut totals = vec![0.0; self.centers.len()];
        for (&bin, &p) in self.bin_of_cell.iter().zip(power) {
            totals[bin] += p;
        }
        totals
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fftfreq_matches_convention() {
        assert_eq!(fftfreq(4, 1.0), vec![0.0, 0.25, -0.5, -0.25]);
        assert_eq!(fftfreq(5, 0.5), vec![0.0, 0.4, 0.8, -0.8, -0.4]);
    }

    #[test]
    fn test_fftshift_centres_zero() {
        assert_eq!(fftshift(&[0, 1, 2, -2, -1]), vec![-2, -1, 0, 1, 2]);
        assert_eq!(fftshift(&[0, 1, -2, -1]), vec![-2, -1, 0, 1]);

        let grid: Vec<usize> = (0..16).collect();
        let shifted = fftshift2d(&grid, 4);
        // The (0, 0) bin ends up at (2, 2).
        assert_eq!(shifted[2 * 4 + 2], 0);
        assert_eq!(shifted[0], 2 * 4 + 2);
    }

    #[test]
    fn test_single_mode_peaks_at_its_bin() {
        let width = 32;
        let transform = SpectralTransform::new(width);
        let mode = 5;
        let signal: Vec<f64> = (0..width)
            .map(|i| (TAU * mode as f64 * i as f64 / width as f64).cos())
            .collect();
        let amplitude = transform.half_amplitude(&signal);
        assert_eq!(amplitude.len(), width / 2);

        let peak = amplitude
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i);
        assert_eq!(peak, Some(mode));
        assert!((amplitude[mode] - width as f64 / 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_power2d_parseval() {
        let width = 16;
        let transform = SpectralTransform::new(width);
        let input: Vec<f64> = (0..width * width)
            .map(|i| ((i * 17) % 11) as f64 - 5.0)
            .collect();
        let power = transform.power2d(&input);

        let spatial: f64 = input.iter().map(|x| x * x).sum();
        let spectral: f64 = power.iter().sum::<f64>() / (width * width) as f64;
        assert!(
            (spatial - spectral).abs() < 1e-8 * spatial,
            "Parseval mismatch: {} vs {}",
            spatial,
            spectral
        );
    }

    #[test]
    fn test_radial_bins_conserve_power() {
        let width = 16;
        let bins = RadialBins::new(width, 0.5, 8);
        assert_eq!(bins.len(), 8);

        let power: Vec<f64> = (0..width * width).map(|i| (i % 7) as f64).collect();
        let binned = bins.accumulate(&power);
        let total: f64 = power.iter().sum();
        assert!((binned.iter().sum::<f64>() - total).abs() < 1e-9);

        // The DC cell alone sits in the first bin's lower edge.
        let mut dc = vec![0.0; width * width];
        dc[0] = 1.0;
        assert_eq!(bins.accumulate(&dc)[0], 1.0);
    }

    #[test]
    fn test_radial_bin_centres_increase() {
        let bins = RadialBins::new(8, 1.0, 4);
        let centers = bins.centers();
        assert!(centers.windows(2).all(|w| w[0] < w[1]));
        // max |k| is the corner: sqrt(2) * pi for unit spacing
        let k_max = std::f64::consts::PI * 2f64.sqrt();
        assert!((centers[3] - 3.5 * k_max / 4.0).abs() < 1e-12);
    }
}
