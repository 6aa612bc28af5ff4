//! Edge/gradient scanner.
//!
//! Computes the Sobel gradient of a preprocessed frame and keeps only the
//! directionless magnitude `sqrt(gx² + gy²)`, so vertical structures (table
//! legs, walls) and horizontal ones (baseboards, cables) both register.
//!
//! Each column is then scanned bottom-up: the first row whose magnitude
//! exceeds the edge sensitivity is the column's nearest edge, a proxy for
//! the nearest depth boundary in that direction.

use std::ops::Range;

use crate::preprocess::GrayFrame;

type Kernel3 = [[f32; 3]; 3];

const SOBEL_KERNEL_X: Kernel3 = [[-1.0, 0.0, 1.0], [-2.0, 0.0, 2.0], [-1.0, 0.0, 1.0]];
const SOBEL_KERNEL_Y: Kernel3 = [[-1.0, -2.0, -1.0], [0.0, 0.0, 0.0], [1.0, 2.0, 1.0]];

/// Nearest qualifying edge of one pixel column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnProfile {
    pub column: usize,
    /// Row of the lowest (closest) strong edge; `None` when the column has
    /// no edge above the sensitivity and must be left out of aggregation.
    pub nearest_row: Option<usize>,
}

/// A single (column, row) edge reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnEdge {
    pub column: usize,
    pub row: usize,
}

/// Per-frame scan output.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanResult {
    pub width: usize,
    pub height: usize,
    pub columns: Vec<ColumnProfile>,
}

impl ScanResult {
    /// Build a scan result directly from per-column nearest rows.
    pub fn from_rows(width: usize, height: usize, rows: &[Option<usize>]) -> Self {
        let columns = rows
            .iter()
            .enumerate()
            .map(|(column, &nearest_row)| ColumnProfile {
                column,
                nearest_row,
            })
            .collect();
        Self {
            width,
            height,
            columns,
        }
    }

    /// The `n` closest edge readings among `columns`, closest first.
    ///
    /// Ties on row are broken by column index so the result is stable.
    pub fn nearest_edges(&self, columns: Range<usize>, n: usize) -> Vec<ColumnEdge> {
        let end = columns.end.min(self.columns.len());
        let start = columns.start.min(end);
        let mut edges: Vec<ColumnEdge> = self.columns[start..end]
            .iter()
            .filter_map(|c| {
                c.nearest_row.map(|row| ColumnEdge {
                    column: c.column,
                    row,
                })
            })
            .collect();
        edges.sort_by(|a, b| b.row.cmp(&a.row).then(a.column.cmp(&b.column)));
        edges.truncate(n);
        edges
    }

    /// Number of columns with any qualifying edge.
    pub fn edge_columns(&self) -> usize {
        self.columns.iter().filter(|c| c.nearest_row.is_some()).count()
    }
}

/// Directionless gradient magnitude for every pixel.
pub fn gradient_magnitude(frame: &GrayFrame) -> GrayFrame {
    let (w, h) = (frame.width, frame.height);
    let mut mag = GrayFrame::new(w, h);
    if w == 0 || h == 0 {
        return mag;
    }

    for y in 0..h {
        let y_idx = [y.saturating_sub(1), y, (y + 1).min(h - 1)];
        for x in 0..w {
            let x_idx = [x.saturating_sub(1), x, (x + 1).min(w - 1)];

            let mut sum_x = 0.0;
            let mut sum_y = 0.0;
            for (ky, &yy) in y_idx.iter().enumerate() {
                for (kx, &xx) in x_idx.iter().enumerate() {
                    let sample = frame.get(xx, yy);
                    sum_x += sample * SOBEL_KERNEL_X[ky][kx];
                    sum_y += sample * SOBEL_KERNEL_Y[ky][kx];
                }
            }
            mag.set(x, y, (sum_x * sum_x + sum_y * sum_y).sqrt());
        }
    }
    mag
}

/// Thresholds the gradient magnitude and finds each column's nearest edge.
#[derive(Debug, Clone, Copy)]
pub struct EdgeScanner {
    /// Gradient magnitude a pixel must exceed to count as an edge.  Lower
    /// values pick up more (and weaker) edges.
    pub sensitivity: f32,
}

impl EdgeScanner {
    pub fn new(sensitivity: f32) -> Self {
        Self { sensitivity }
    }

    pub fn scan(&self, frame: &GrayFrame) -> ScanResult {
        let mag = gradient_magnitude(frame);
        self.scan_magnitude(&mag)
    }

    /// Column scan over an already computed magnitude map.
    pub fn scan_magnitude(&self, mag: &GrayFrame) -> ScanResult {
        let columns = (0..mag.width)
            .map(|x| ColumnProfile {
                column: x,
                nearest_row: (0..mag.height).rev().find(|&y| mag.get(x, y) > self.sensitivity),
            })
            .collect();
        ScanResult {
            width: mag.width,
            height: mag.height,
            columns,
        }
    }
}
