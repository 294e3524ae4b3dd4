//! Luminance images and the filters the relay applies to them.

pub mod filter;
pub mod matrix;
pub mod transform;

pub use filter::{CaptionCommand, Filter, normalize_caption};
pub use matrix::PixelMatrix;
pub use transform::{Axis, DEFAULT_BLUR_KERNEL, DEFAULT_SEGMENT_THRESHOLD};

use crate::error::{DispatchError, TransformError};

/// Tunables for the single-photo filters.
#[derive(Debug, Clone, Copy)]
pub struct FilterSettings {
    pub blur_kernel: usize,
    pub segment_threshold: u8,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            blur_kernel: DEFAULT_BLUR_KERNEL,
            segment_threshold: DEFAULT_SEGMENT_THRESHOLD,
        }
    }
}

/// Apply a single-photo filter.
pub fn apply_filter(
    image: &PixelMatrix,
    filter: Filter,
    settings: FilterSettings,
) -> Result<PixelMatrix, DispatchError> {
    let out = match filter {
        Filter::Blur => image.blur(settings.blur_kernel)?,
        Filter::Rotate => image.rotate_clockwise(),
        Filter::SaltAndPepper => image.salt_and_pepper(&mut rand::thread_rng()),
        Filter::Contour => image.contour(),
        Filter::Segment => image.segment(settings.segment_threshold),
        Filter::Concat => {
            return Err(DispatchError::NotEnoughPhotos {
                filter: "concat",
                needed: 2,
                got: 1,
            });
        }
    };
    Ok(out)
}

/// Fold every image into one, left to right.
///
/// Each step goes side by side when the heights match and stacks when the
/// widths match.
pub fn concat_all(images: &[PixelMatrix]) -> Result<PixelMatrix, DispatchError> {
    let Some((first, rest)) = images.split_first() else {
        return Err(DispatchError::NotEnoughPhotos {
            filter: "concat",
            needed: 2,
            got: 0,
        });
    };
    if rest.is_empty() {
        return Err(DispatchError::NotEnoughPhotos {
            filter: "concat",
            needed: 2,
            got: 1,
        });
    }
    rest.iter()
        .try_fold(first.clone(), |acc, next| acc.concat_auto(next))
        .map_err(|e: TransformError| e.into())
}
