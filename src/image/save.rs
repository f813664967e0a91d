//! Image saving utilities.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use image::{ImageBuffer, Rgb, RgbImage};

use crate::error::{Error, Result};

use super::{ImageTensor, PIXEL_SCALE, RGB_CHANNELS};

/// Save a tensor as an image file.
///
/// The tensor is:
/// 1. Reduced to its first batch element
/// 2. Rescaled from [0, 1] to [0, 255], clipped and truncated to 8 bits
/// 3. Saved to the specified path (format inferred from extension)
///
/// # Arguments
///
/// * `tensor` - NCHW tensor with values in [0, 1]
/// * `path` - Output file path
/// * `quality` - JPEG quality (1-100), ignored for other formats
///
/// # Errors
///
/// Returns an error if the tensor is not an RGB image or the file cannot be written.
pub fn save_image<P: AsRef<Path>>(tensor: &ImageTensor, path: P, quality: u8) -> Result<()> {
    let path = path.as_ref();

    let img = image::DynamicImage::ImageRgb8(tensor_to_image(tensor)?);

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase);

    match extension.as_deref() {
        Some("jpg" | "jpeg") => {
            let file = File::create(path).map_err(|source| Error::ImageSave {
                path: path.to_path_buf(),
                source: source.into(),
            })?;
            let mut output = BufWriter::new(file);
            let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut output, quality);
            img.write_with_encoder(encoder)
                .map_err(|source| Error::ImageSave {
                    path: path.to_path_buf(),
                    source,
                })?;
            output.flush().map_err(|source| Error::ImageSave {
                path: path.to_path_buf(),
                source: source.into(),
            })?;
        }
        None => {
            img.save_with_format(path, image::ImageFormat::Png)
                .map_err(|source| Error::ImageSave {
                    path: path.to_path_buf(),
                    source,
                })?;
        }
        _ => {
            img.save(path).map_err(|source| Error::ImageSave {
                path: path.to_path_buf(),
                source,
            })?;
        }
    }

    tracing::debug!("Wrote {}", path.display());
    Ok(())
}

/// Convert a normalized NCHW tensor to an 8-bit RGB image.
///
/// Only the first batch element is used.
///
/// # Errors
///
/// Returns an error if the tensor is empty, does not have three channels, or is
/// too large to address as an image.
pub fn tensor_to_image(tensor: &ImageTensor) -> Result<RgbImage> {
    let (batch, channels, height, width) = tensor.dim();

    if batch == 0 || channels != RGB_CHANNELS {
        return Err(Error::ShapeMismatch {
            expected: format!("(>=1, {RGB_CHANNELS}, H, W)"),
            actual: format!("{:?}", tensor.shape()),
        });
    }

    let too_large = || Error::UnsupportedDimensions {
        width,
        height,
        reason: "exceeds the addressable image size".to_string(),
    };
    let w = u32::try_from(width).map_err(|_| too_large())?;
    let h = u32::try_from(height).map_err(|_| too_large())?;

    let img = ImageBuffer::from_fn(w, h, |x, y| {
        let (x, y) = (x as usize, y as usize);
        Rgb([
            denormalize(tensor[[0, 0, y, x]]),
            denormalize(tensor[[0, 1, y, x]]),
            denormalize(tensor[[0, 2, y, x]]),
        ])
    });

    Ok(img)
}

/// Denormalize a value from [0, 1] to [0, 255] with clamping.
#[inline]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn denormalize(value: f32) -> u8 {
    // Safe: clamped to [0, 255] range before casting; NaN saturates to 0
    (value * PIXEL_SCALE).clamp(0.0, PIXEL_SCALE) as u8
}
