//! # lowlight
//!
//! Low-light image enhancement with a small self-calibrated illumination network.
//!
//! The network predicts a per-pixel illumination map `L` for an input image `I`.
//! The enhanced image is the reflectance recovered from the Retinex model
//! `I = R × L`:
//!
//! ```text
//! R = clamp(I / clamp(L, 0.0001, 1), 0, 1)
//! ```
//!
//! Pretrained weights are read from a `safetensors` file. An exported ONNX copy of
//! the same network can be run through `ort` to cross-check the native forward pass.
//!
//! ## Example
//!
//! ```no_run
//! use lowlight::{Config, Pipeline};
//!
//! # fn main() -> lowlight::Result<()> {
//! let config = Config::default();
//! let pipeline = Pipeline::new(config)?;
//!
//! pipeline.process("dark.jpg", "enhanced.png")?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod image;
pub mod model;
pub mod pipeline;

pub use error::{Error, Result};
pub use model::{EnhanceConfig, EnhanceNetwork, FinetuneModel, WeightSet};
pub use pipeline::{Config, OnnxModel, Pipeline, VerifyReport};
