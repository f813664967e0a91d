//! Image loading utilities.

use std::path::Path;

use image::{DynamicImage, GenericImageView};
use ndarray::Array4;

use crate::error::{Error, Result};

use super::{ImageTensor, PIXEL_SCALE, RGB_CHANNELS};

/// Load an image from disk and convert to a normalized tensor.
///
/// The image is:
/// 1. Decoded from the specified path (format inferred from content)
/// 2. Converted to RGB, dropping any alpha channel
/// 3. Normalized to [0, 1]
/// 4. Returned as NCHW tensor (1, 3, H, W) at its native resolution
///
/// # Errors
///
/// Returns an error if the image cannot be decoded or has a zero dimension.
pub fn load_image<P: AsRef<Path>>(path: P) -> Result<ImageTensor> {
    let path = path.as_ref();

    let img = image::open(path).map_err(|source| Error::ImageLoad {
        path: path.to_path_buf(),
        source,
    })?;

    let (width, height) = img.dimensions();
    tracing::debug!("Decoded {} ({width}x{height})", path.display());

    if width == 0 || height == 0 {
        return Err(Error::UnsupportedDimensions {
            width: width as usize,
            height: height as usize,
            reason: "image has no pixels".to_string(),
        });
    }

    Ok(image_to_tensor(&img))
}

/// Convert a `DynamicImage` to a normalized NCHW tensor.
#[must_use]
pub fn image_to_tensor(img: &DynamicImage) -> ImageTensor {
    let rgb = img.to_rgb8();
    let (width, height) = (rgb.width() as usize, rgb.height() as usize);

    let mut tensor = Array4::<f32>::zeros((1, RGB_CHANNELS, height, width));

    for (x, y, pixel) in rgb.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for c in 0..RGB_CHANNELS {
            tensor[[0, c, y, x]] = f32::from(pixel[c]) / PIXEL_SCALE;
        }
    }

    tensor
}
