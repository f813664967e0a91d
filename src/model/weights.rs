//! Named-tensor weight store and the partial-load policy.
//!
//! Weights are persisted as a `safetensors` file mapping parameter names to
//! tensors. A model applies only the entries whose names it declares:
//!
//! - declared and present: shapes must match exactly, then the value is copied
//! - declared and absent: the parameter keeps its default value
//! - present but not declared: ignored

use std::collections::BTreeMap;
use std::path::Path;

use ndarray::{Array, ArrayD, Dimension, IxDyn};
use safetensors::{Dtype, SafeTensors};

use crate::error::{Error, Result};

/// A single stored tensor.
#[derive(Debug, Clone)]
enum Entry {
    /// Floating point data widened or kept as `f32`.
    Float(ArrayD<f32>),
    /// Data of a type no layer consumes (integer counters and the like).
    Other { dtype: Dtype },
}

/// Mapping from parameter name to tensor, loaded once before inference.
#[derive(Debug, Clone, Default)]
pub struct WeightSet {
    entries: BTreeMap<String, Entry>,
}

/// Outcome of applying a [`WeightSet`] to a model.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Declared names that were found and copied, in application order.
    pub applied: Vec<String>,
    /// Declared parameters with no entry; they keep their defaults.
    pub missing: Vec<String>,
    /// Entries that match no declared name.
    pub ignored: Vec<String>,
}

impl WeightSet {
    /// Read a `safetensors` file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WeightsRead`] if the file cannot be read and
    /// [`Error::WeightsFormat`] if its contents are malformed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let bytes = std::fs::read(path).map_err(|source| Error::WeightsRead {
            path: path.to_path_buf(),
            source,
        })?;

        let weights = Self::from_bytes(&bytes)?;
        tracing::info!(
            "Read {} tensors from {}",
            weights.len(),
            path.display()
        );
        Ok(weights)
    }

    /// Parse an in-memory `safetensors` buffer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WeightsFormat`] if the buffer is not a valid store.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let tensors =
            SafeTensors::deserialize(bytes).map_err(|source| Error::WeightsFormat { source })?;

        let mut entries = BTreeMap::new();
        for (name, view) in tensors.tensors() {
            let shape = view.shape().to_vec();
            let entry = match view.dtype() {
                Dtype::F32 => Entry::Float(decode(&name, &shape, view.data(), decode_f32)?),
                Dtype::F64 => Entry::Float(decode(&name, &shape, view.data(), decode_f64)?),
                dtype => {
                    tracing::debug!("Keeping {name} ({dtype:?}) as opaque");
                    Entry::Other { dtype }
                }
            };
            entries.insert(name, entry);
        }

        Ok(Self { entries })
    }

    /// Add or replace a floating point tensor.
    pub fn insert(&mut self, name: impl Into<String>, tensor: ArrayD<f32>) {
        self.entries.insert(name.into(), Entry::Float(tensor));
    }

    /// Number of stored tensors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the set holds no tensors.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stored names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Look up a floating point tensor.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ArrayD<f32>> {
        match self.entries.get(name)? {
            Entry::Float(tensor) => Some(tensor),
            Entry::Other { .. } => None,
        }
    }

    /// Copy every present alias of one parameter into `target`, in order.
    ///
    /// Several names may address the same shared parameter; each present one is
    /// applied and the last wins. If none is present the first name is recorded
    /// as missing.
    pub(crate) fn assign<D: Dimension>(
        &self,
        names: &[String],
        target: &mut Array<f32, D>,
        report: &mut LoadReport,
    ) -> Result<()> {
        let mut found = false;

        for name in names {
            let Some(entry) = self.entries.get(name) else {
                continue;
            };

            let tensor = match entry {
                Entry::Float(tensor) => tensor,
                Entry::Other { dtype } => {
                    return Err(Error::UnsupportedDtype {
                        name: name.clone(),
                        dtype: format!("{dtype:?}"),
                    });
                }
            };

            if tensor.shape() != target.shape() {
                return Err(Error::WeightShape {
                    name: name.clone(),
                    expected: target.shape().to_vec(),
                    actual: tensor.shape().to_vec(),
                });
            }

            for (dst, &src) in target.iter_mut().zip(tensor.iter()) {
                *dst = src;
            }
            tracing::debug!("Applied {name} {:?}", tensor.shape());
            report.applied.push(name.clone());
            found = true;
        }

        if !found {
            if let Some(first) = names.first() {
                report.missing.push(first.clone());
            }
        }

        Ok(())
    }

    /// Names that no declared parameter consumed.
    pub(crate) fn unused(&self, applied: &[String]) -> Vec<String> {
        self.names()
            .filter(|name| !applied.iter().any(|a| a == name))
            .map(String::from)
            .collect()
    }
}

/// Expand every prefix with `suffix`, e.g. `["conv.1"]` + `running_var`.
pub(crate) fn param_names<P: AsRef<str>>(prefixes: &[P], suffix: &str) -> Vec<String> {
    prefixes
        .iter()
        .map(|prefix| format!("{}.{suffix}", prefix.as_ref()))
        .collect()
}

fn decode(
    name: &str,
    shape: &[usize],
    data: &[u8],
    convert: fn(&[u8]) -> Vec<f32>,
) -> Result<ArrayD<f32>> {
    ArrayD::from_shape_vec(IxDyn(shape), convert(data)).map_err(|_| Error::ShapeMismatch {
        expected: format!("{name} with shape {shape:?}"),
        actual: format!("{} bytes of data", data.len()),
    })
}

fn decode_f32(data: &[u8]) -> Vec<f32> {
    data.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

#[allow(clippy::cast_possible_truncation)]
fn decode_f64(data: &[u8]) -> Vec<f32> {
    data.chunks_exact(8)
        .map(|b| f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]) as f32)
        .collect()
}
