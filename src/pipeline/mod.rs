//! Load-enhance-save pipeline and the cross-backend check.

mod enhance;
mod onnx;
mod verify;

pub use enhance::{Config, Pipeline, DEFAULT_WEIGHTS};
pub use onnx::OnnxModel;
pub use verify::{compare_images, compare_tensors, Verification, VerifyReport};
