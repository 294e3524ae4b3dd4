//! Rectangular grid of luminance samples.
//!
//! Every transform in [`super::transform`] works on a [`PixelMatrix`].
//! Construction validates that all rows have the same width, so code that
//! only inspects the first row (e.g. vertical concatenation) sees the
//! width of every row.

use std::io::Cursor;

use image::{GrayImage, ImageFormat, Luma};

use crate::error::{CodecError, TransformError};

/// Luminance image stored row-major as `rows[y][x]`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PixelMatrix {
    rows: Vec<Vec<u8>>,
}

impl PixelMatrix {
    /// Build a matrix from rows, rejecting ragged input.
    pub fn from_rows(rows: Vec<Vec<u8>>) -> Result<Self, TransformError> {
        if let Some(first) = rows.first() {
            let expected = first.len();
            if let Some((row, found)) = rows
                .iter()
                .enumerate()
                .find(|(_, r)| r.len() != expected)
                .map(|(i, r)| (i, r.len()))
            {
                return Err(TransformError::RaggedRows {
                    row,
                    expected,
                    found,
                });
            }
        }
        Ok(Self { rows })
    }

    /// A `height` x `width` matrix where every sample is `value`.
    pub fn filled(height: usize, width: usize, value: u8) -> Self {
        Self {
            rows: vec![vec![value; width]; height],
        }
    }

    /// Build a matrix by evaluating `f(row, col)` for every sample.
    pub fn from_fn(height: usize, width: usize, mut f: impl FnMut(usize, usize) -> u8) -> Self {
        let rows = (0..height)
            .map(|y| (0..width).map(|x| f(y, x)).collect())
            .collect();
        Self { rows }
    }

    /// Internal constructor for transforms that guarantee rectangular output.
    pub(crate) fn from_rows_unchecked(rows: Vec<Vec<u8>>) -> Self {
        debug_assert!(rows.windows(2).all(|w| w[0].len() == w[1].len()));
        Self { rows }
    }

    /// Number of rows.
    pub fn height(&self) -> usize {
        self.rows.len()
    }

    /// Width of the first row (every row, by construction).
    pub fn width(&self) -> usize {
        self.rows.first().map_or(0, Vec::len)
    }

    /// `(height, width)`.
    pub fn dimensions(&self) -> (usize, usize) {
        (self.height(), self.width())
    }

    pub fn is_empty(&self) -> bool {
        self.height() == 0 || self.width() == 0
    }

    pub fn rows(&self) -> &[Vec<u8>] {
        &self.rows
    }

    /// Sample at `(row, col)`, if in bounds.
    pub fn get(&self, row: usize, col: usize) -> Option<u8> {
        self.rows.get(row).and_then(|r| r.get(col)).copied()
    }

    /// Iterate over every sample, row by row.
    pub fn samples(&self) -> impl Iterator<Item = u8> + '_ {
        self.rows.iter().flat_map(|r| r.iter().copied())
    }

    // ── Codec ───────────────────────────────────────────────────────

    /// Decode PNG or JPEG bytes into a luminance matrix.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.is_empty() {
            return Err(CodecError::EmptyInput);
        }
        let img = image::load_from_memory(bytes).map_err(|e| CodecError::Decode(e.to_string()))?;
        Ok(Self::from_gray(&img.to_luma8()))
    }

    /// Convert a decoded grayscale image.
    pub fn from_gray(img: &GrayImage) -> Self {
        let (w, h) = (img.width() as usize, img.height() as usize);
        let rows = img
            .as_raw()
            .chunks(w.max(1))
            .take(h)
            .map(<[u8]>::to_vec)
            .collect();
        Self { rows }
    }

    /// Convert into a grayscale image buffer.
    pub fn to_gray(&self) -> Result<GrayImage, CodecError> {
        let (h, w) = self.dimensions();
        let too_large = || CodecError::TooLarge { rows: h, cols: w };
        let width = u32::try_from(w).map_err(|_| too_large())?;
        let height = u32::try_from(h).map_err(|_| too_large())?;
        Ok(GrayImage::from_fn(width, height, |x, y| {
            Luma([self.rows[y as usize][x as usize]])
        }))
    }

    /// Encode as PNG bytes.
    pub fn encode_png(&self) -> Result<Vec<u8>, CodecError> {
        if self.is_empty() {
            return Err(CodecError::Encode(format!(
                "cannot encode a {}x{} image",
                self.height(),
                self.width()
            )));
        }
        let gray = self.to_gray()?;
        let mut buf = Cursor::new(Vec::new());
        gray.write_to(&mut buf, ImageFormat::Png)
            .map_err(|e| CodecError::Encode(e.to_string()))?;
        Ok(buf.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ragged_rows_rejected() {
        let err = PixelMatrix::from_rows(vec![vec![1, 2, 3], vec![4, 5]]).unwrap_err();
        assert_eq!(
            err,
            TransformError::RaggedRows {
                row: 1,
                expected: 3,
                found: 2
            }
        );
    }

    #[test]
    fn empty_matrix_has_zero_dimensions() {
        let m = PixelMatrix::from_rows(vec![]).unwrap();
        assert_eq!(m.dimensions(), (0, 0));
        assert!(m.is_empty());
    }

    #[test]
    fn from_fn_is_row_major() {
        let m = PixelMatrix::from_fn(2, 3, |y, x| (y * 10 + x) as u8);
        assert_eq!(m.rows(), &[vec![0, 1, 2], vec![10, 11, 12]]);
        assert_eq!(m.get(1, 2), Some(12));
        assert_eq!(m.get(2, 0), None);
    }

    #[test]
    fn png_encode_decode_preserves_samples() {
        let m = PixelMatrix::from_fn(5, 7, |y, x| (y * 30 + x * 3) as u8);
        let png = m.encode_png().unwrap();
        let back = PixelMatrix::decode(&png).unwrap();
        assert_eq!(back, m);
    }

    #[test]
    fn decode_rejects_empty_and_garbage() {
        assert!(matches!(PixelMatrix::decode(&[]), Err(CodecError::EmptyInput)));
        assert!(matches!(
            PixelMatrix::decode(&[0xFF, 0x00, 0x13]),
            Err(CodecError::Decode(_))
        ));
    }

    #[test]
    fn encode_rejects_empty_matrix() {
        let m = PixelMatrix::filled(3, 0, 0);
        assert!(matches!(m.encode_png(), Err(CodecError::Encode(_))));
    }
}
