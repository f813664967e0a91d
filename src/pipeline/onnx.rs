//! Alternate runtime: the same network exported to ONNX and run through `ort`.

use std::path::Path;

use ndarray::Array4;
use ort::session::Session;
use ort::value::Tensor;

use crate::error::{Error, Result};
use crate::image::ImageTensor;

/// An exported enhancement model loaded into an ONNX Runtime session.
///
/// The export declares batch, height and width as dynamic axes, so images of
/// any size can be fed without resizing.
pub struct OnnxModel {
    name: String,
    session: Session,
}

impl OnnxModel {
    /// Load an ONNX model session.
    ///
    /// # Errors
    ///
    /// Returns an error if the model cannot be loaded.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let name = path.display().to_string();

        tracing::info!("Loading ONNX model {name}");

        let session = Session::builder()
            .map_err(|source| Error::ModelLoad {
                name: name.clone(),
                source,
            })?
            .commit_from_file(path)
            .map_err(|source| Error::ModelLoad {
                name: name.clone(),
                source,
            })?;

        Ok(Self { name, session })
    }

    /// Load an ONNX model already held in memory, e.g. one embedded in the binary.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid model.
    pub fn from_memory(name: impl Into<String>, bytes: &[u8]) -> Result<Self> {
        let name = name.into();

        tracing::info!("Loading ONNX model {name} ({} bytes)", bytes.len());

        let session = Session::builder()
            .map_err(|source| Error::ModelLoad {
                name: name.clone(),
                source,
            })?
            .commit_from_memory(bytes)
            .map_err(|source| Error::ModelLoad {
                name: name.clone(),
                source,
            })?;

        Ok(Self { name, session })
    }

    /// Where the model was loaded from.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the exported model on an NCHW image tensor.
    ///
    /// # Errors
    ///
    /// Returns an error if inference fails or the output is not a 4D tensor.
    pub fn run(&mut self, input: &ImageTensor) -> Result<ImageTensor> {
        let input_value =
            Tensor::from_array(input.clone()).map_err(|source| Error::Inference { source })?;

        let outputs = self
            .session
            .run(ort::inputs![input_value])
            .map_err(|source| Error::Inference { source })?;

        let output = outputs
            .values()
            .next()
            .ok_or_else(|| Error::ShapeMismatch {
                expected: "enhanced image output".to_string(),
                actual: "no output".to_string(),
            })?;

        extract_array4(&output)
    }
}

/// Extract a 4D array from an ONNX value.
#[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
fn extract_array4(value: &ort::value::ValueRef<'_>) -> Result<Array4<f32>> {
    let (shape_info, data) = value
        .try_extract_tensor::<f32>()
        .map_err(|source| Error::Inference { source })?;

    // Safe: concrete output dimensions are never negative
    let dims: Vec<usize> = shape_info.iter().map(|&x| x as usize).collect();

    if dims.len() != 4 {
        return Err(Error::ShapeMismatch {
            expected: "4D tensor".to_string(),
            actual: format!("{}D tensor", dims.len()),
        });
    }

    Array4::from_shape_vec((dims[0], dims[1], dims[2], dims[3]), data.to_vec()).map_err(|_| {
        Error::ShapeMismatch {
            expected: format!("{dims:?}"),
            actual: format!("{} values", data.len()),
        }
    })
}
