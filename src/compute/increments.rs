//! Field increments along sampled grid lines.

/// Number of equal parts the grid is cut into when choosing sample lines.
const LINE_DIVISIONS: usize = 16;

/// Picks rows and columns of a `width x width` grid and takes periodic
/// differences along them.
#[derive(Debug, Clone)]
pub struct LineSampler {
    width: usize,
    lines: Vec<usize>,
}

impl LineSampler {
    /// Sample the lines at `i * width / 16` for `i = 1..16`.
    pub fn new(width: usize) -> Self {
        let mut lines: Vec<usize> = (1..LINE_DIVISIONS)
            .map(|i| i * width / LINE_DIVISIONS)
            .filter(|&line| line < width)
            .collect();
        lines.dedup();
        Self { width, lines }
    }

    /// Indices of the sampled rows (the same indices are used for columns).
    pub fn lines(&self) -> &[usize] {
        &self.lines
    }

    /// Number of increments produced per offset.
    pub fn sample_count(&self) -> usize {
        2 * self.lines.len() * self.width
    }

    /// `f(p) - f(p - offset)` along every sampled row, then every sampled
    /// column, wrapping at the grid edge. `field` is row-major.
    pub fn increments(&self, field: &[f64], offset: usize) -> Vec<f64> {
        let width = self.width;
        debug_assert_eq!(field.len(), width * width);
        let shift = width - offset % width;

        let mut out = Vec::with_capacity(self.sample_count());
        for &y in &self.lines {
            let row = &field[y * width..(y + 1) * width];
            out.extend((0..width).map(|x| row[x] - row[(x + shift) % width]));
        }
        for &x in &self.lines {
            out.extend(
                (0..width).map(|y| field[y * width + x] - field[((y + shift) % width) * width + x]),
            );
        }
        out
    }
}
