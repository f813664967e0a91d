//! Custom error types for lowlight.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the lowlight library.
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to load an image file.
    #[error("failed to load image from {path}: {source}")]
    ImageLoad {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// Failed to save an image file.
    #[error("failed to save image to {path}: {source}")]
    ImageSave {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// Image dimensions are not supported.
    #[error("unsupported image dimensions {width}x{height}: {reason}")]
    UnsupportedDimensions {
        width: usize,
        height: usize,
        reason: String,
    },

    /// The weight file could not be read.
    #[error("failed to read weights from {path}: {source}")]
    WeightsRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The weight file is not a valid named-tensor store.
    #[error("malformed weight file: {source}")]
    WeightsFormat {
        #[source]
        source: safetensors::SafeTensorError,
    },

    /// A declared parameter was found with an element type we cannot use.
    #[error("parameter {name} has unsupported dtype {dtype}")]
    UnsupportedDtype { name: String, dtype: String },

    /// A declared parameter was found with the wrong shape.
    #[error("parameter {name} has shape {actual:?}, expected {expected:?}")]
    WeightShape {
        name: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// Failed to load an ONNX model.
    #[error("failed to load ONNX model {name}: {source}")]
    ModelLoad {
        name: String,
        #[source]
        source: ort::Error,
    },

    /// Model inference failed.
    #[error("model inference failed: {source}")]
    Inference {
        #[source]
        source: ort::Error,
    },

    /// Invalid parameter value.
    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Shape mismatch in tensor operations.
    #[error("tensor shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },
}

/// Result type alias for lowlight operations.
pub type Result<T> = std::result::Result<T, Error>;
