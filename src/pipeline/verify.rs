//! Pixel-wise comparison of two backends' outputs after 8-bit quantization.

use image::RgbImage;

use crate::error::{Error, Result};
use crate::image::{tensor_to_image, ImageTensor};

/// Result of comparing two enhanced images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifyReport {
    pub width: u32,
    pub height: u32,
    /// Largest absolute difference of any channel value, in 8-bit steps.
    pub max_abs_diff: u8,
    /// Number of channel values that differ at all.
    pub differing_values: usize,
    /// Largest difference accepted as equivalent.
    pub tolerance: u8,
}

impl VerifyReport {
    /// Whether the two outputs are equivalent within tolerance.
    #[must_use]
    pub const fn passed(&self) -> bool {
        self.max_abs_diff <= self.tolerance
    }
}

/// Both backends' outputs for one input, plus their comparison.
#[derive(Debug, Clone)]
pub struct Verification {
    pub native: ImageTensor,
    pub onnx: ImageTensor,
    pub report: VerifyReport,
}

/// Quantize both tensors to 8-bit RGB and compare them.
///
/// # Errors
///
/// Returns an error if either tensor is not an RGB image or their sizes differ.
pub fn compare_tensors(
    native: &ImageTensor,
    other: &ImageTensor,
    tolerance: u8,
) -> Result<VerifyReport> {
    compare_images(&tensor_to_image(native)?, &tensor_to_image(other)?, tolerance)
}

/// Compare two 8-bit RGB images value by value.
///
/// # Errors
///
/// Returns an error if the images differ in size.
pub fn compare_images(a: &RgbImage, b: &RgbImage, tolerance: u8) -> Result<VerifyReport> {
    if a.dimensions() != b.dimensions() {
        return Err(Error::ShapeMismatch {
            expected: format!("{:?}", a.dimensions()),
            actual: format!("{:?}", b.dimensions()),
        });
    }

    let (max_abs_diff, differing_values) = a
        .as_raw()
        .iter()
        .zip(b.as_raw())
        .map(|(&x, &y)| x.abs_diff(y))
        .filter(|&d| d > 0)
        .fold((0u8, 0usize), |(max, count), d| (max.max(d), count + 1));

    let (width, height) = a.dimensions();
    Ok(VerifyReport {
        width,
        height,
        max_abs_diff,
        differing_values,
        tolerance,
    })
}
