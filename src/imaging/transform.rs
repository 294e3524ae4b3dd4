//! Pixel transforms over [`PixelMatrix`].
//!
//! All operations borrow their input and return a new matrix. Everything
//! here is deterministic except [`PixelMatrix::salt_and_pepper`], which
//! takes the random source as an argument.

use rand::Rng;

use super::matrix::PixelMatrix;
use crate::error::TransformError;

/// Default blur window.
pub const DEFAULT_BLUR_KERNEL: usize = 16;

/// Default segmentation threshold.
pub const DEFAULT_SEGMENT_THRESHOLD: u8 = 100;

/// Draws below this become white.
const SALT_PROBABILITY: f64 = 0.2;

/// Draws above this become black.
const PEPPER_THRESHOLD: f64 = 0.8;

/// Concatenation direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    /// Side by side; heights must match.
    Horizontal,
    /// Stacked; widths must match.
    Vertical,
}

impl Axis {
    fn label(self) -> &'static str {
        match self {
            Self::Horizontal => "horizontal",
            Self::Vertical => "vertical",
        }
    }
}

impl PixelMatrix {
    /// Box blur with a `kernel` x `kernel` window over the valid area only.
    ///
    /// The output is `(H - k + 1) x (W - k + 1)`; each sample is the
    /// truncated mean of its window.
    pub fn blur(&self, kernel: usize) -> Result<PixelMatrix, TransformError> {
        let (h, w) = self.dimensions();
        if kernel == 0 || kernel > h || kernel > w {
            return Err(TransformError::InvalidKernelSize {
                kernel,
                rows: h,
                cols: w,
            });
        }

        // Summed-area table with a zero border: sat[y][x] = sum of rows[..y][..x].
        let mut sat = vec![vec![0u64; w + 1]; h + 1];
        for (y, row) in self.rows().iter().enumerate() {
            let mut running = 0u64;
            for (x, &v) in row.iter().enumerate() {
                running += u64::from(v);
                sat[y + 1][x + 1] = sat[y][x + 1] + running;
            }
        }

        let area = (kernel * kernel) as u64;
        let out_h = h - kernel + 1;
        let out_w = w - kernel + 1;
        let rows = (0..out_h)
            .map(|y| {
                (0..out_w)
                    .map(|x| {
                        let sum = sat[y + kernel][x + kernel] + sat[y][x]
                            - sat[y][x + kernel]
                            - sat[y + kernel][x];
                        // Mean of u8 samples always fits.
                        (sum / area) as u8
                    })
                    .collect()
            })
            .collect();

        Ok(PixelMatrix::from_rows_unchecked(rows))
    }

    /// Rotate 90 degrees clockwise: `out[j][H-1-i] = in[i][j]`.
    pub fn rotate_clockwise(&self) -> PixelMatrix {
        let (h, w) = self.dimensions();
        let mut rotated = vec![vec![0u8; h]; w];
        for (i, row) in self.rows().iter().enumerate() {
            for (j, &v) in row.iter().enumerate() {
                rotated[j][h - 1 - i] = v;
            }
        }
        PixelMatrix::from_rows_unchecked(rotated)
    }

    /// Horizontal edge detector: each row becomes the absolute differences
    /// of adjacent samples, so width `W` becomes `W - 1`.
    pub fn contour(&self) -> PixelMatrix {
        let rows = self
            .rows()
            .iter()
            .map(|row| row.windows(2).map(|p| p[0].abs_diff(p[1])).collect())
            .collect();
        PixelMatrix::from_rows_unchecked(rows)
    }

    /// Impulse noise: each sample independently becomes white with
    /// probability 0.2, black with probability 0.2, or stays unchanged.
    pub fn salt_and_pepper<R: Rng>(&self, rng: &mut R) -> PixelMatrix {
        let rows = self
            .rows()
            .iter()
            .map(|row| {
                row.iter()
                    .map(|&v| {
                        let draw: f64 = rng.gen_range(0.0..1.0);
                        if draw < SALT_PROBABILITY {
                            255
                        } else if draw > PEPPER_THRESHOLD {
                            0
                        } else {
                            v
                        }
                    })
                    .collect()
            })
            .collect();
        PixelMatrix::from_rows_unchecked(rows)
    }

    /// Binary threshold: samples above `threshold` become 255, the rest 0.
    pub fn segment(&self, threshold: u8) -> PixelMatrix {
        let rows = self
            .rows()
            .iter()
            .map(|row| {
                row.iter()
                    .map(|&v| if v > threshold { 255 } else { 0 })
                    .collect()
            })
            .collect();
        PixelMatrix::from_rows_unchecked(rows)
    }

    /// Join `other` onto this matrix along `axis`.
    ///
    /// The vertical check compares first-row widths; rows are uniform by
    /// construction, so that covers every row.
    pub fn concat(&self, other: &PixelMatrix, axis: Axis) -> Result<PixelMatrix, TransformError> {
        let compatible = match axis {
            Axis::Horizontal => self.height() == other.height(),
            Axis::Vertical => self.width() == other.width(),
        };
        if !compatible {
            return Err(TransformError::IncompatibleDimensions {
                axis: axis.label(),
                left_rows: self.height(),
                left_cols: self.width(),
                right_rows: other.height(),
                right_cols: other.width(),
            });
        }

        let rows = match axis {
            Axis::Horizontal => self
                .rows()
                .iter()
                .zip(other.rows())
                .map(|(a, b)| a.iter().chain(b).copied().collect())
                .collect(),
            Axis::Vertical => self.rows().iter().chain(other.rows()).cloned().collect(),
        };
        Ok(PixelMatrix::from_rows_unchecked(rows))
    }

    /// Concatenate choosing the axis from the shapes: side by side when the
    /// heights match, otherwise stacked when the widths match.
    pub fn concat_auto(&self, other: &PixelMatrix) -> Result<PixelMatrix, TransformError> {
        if self.height() == other.height() {
            self.concat(other, Axis::Horizontal)
        } else {
            self.concat(other, Axis::Vertical)
        }
    }
}
