//! Image loading, conversion, and saving utilities.

mod load;
mod save;

pub use load::{image_to_tensor, load_image};
pub use save::{save_image, tensor_to_image};

use ndarray::Array4;

/// Image tensor in NCHW format (batch, channels, height, width).
/// Values are normalized to [0, 1].
pub type ImageTensor = Array4<f32>;

/// Number of channels in RGB images.
pub const RGB_CHANNELS: usize = 3;

/// Scale between 8-bit pixel values and normalized floats.
pub const PIXEL_SCALE: f32 = 255.0;
