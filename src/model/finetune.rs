//! Retinex decomposition on top of the illumination network.

use std::path::Path;

use ndarray::Zip;

use crate::error::{Error, Result};
use crate::image::ImageTensor;

use super::network::{EnhanceConfig, EnhanceNetwork};
use super::weights::{LoadReport, WeightSet};

/// Prefix of the illumination network's parameters in a persisted model.
pub const ENHANCE_PREFIX: &str = "enhance";

/// Inference model: predicts illumination, then divides it out.
///
/// Immutable after construction, so one instance may serve concurrent callers.
#[derive(Debug, Clone)]
pub struct FinetuneModel {
    enhance: EnhanceNetwork,
    report: LoadReport,
}

impl FinetuneModel {
    /// Build the default network (one block, three channels) and apply the
    /// `enhance.*` entries of `weights`.
    ///
    /// # Errors
    ///
    /// Returns an error if a matching entry has the wrong shape or dtype.
    pub fn new(weights: &WeightSet) -> Result<Self> {
        Self::with_config(EnhanceConfig::default(), weights)
    }

    /// Build with an explicit network configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or a matching entry has
    /// the wrong shape or dtype.
    pub fn with_config(config: EnhanceConfig, weights: &WeightSet) -> Result<Self> {
        let mut enhance = EnhanceNetwork::new(config)?;
        let report = enhance.load_weights(ENHANCE_PREFIX, weights)?;

        Ok(Self { enhance, report })
    }

    /// Read weights from a `safetensors` file and build the default model.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or its weights do not fit.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::new(&WeightSet::load(path)?)
    }

    /// The underlying illumination network.
    #[must_use]
    pub const fn network(&self) -> &EnhanceNetwork {
        &self.enhance
    }

    /// Which weights were applied when the model was built.
    #[must_use]
    pub const fn load_report(&self) -> &LoadReport {
        &self.report
    }

    /// Predict the illumination map, every element in [0.0001, 1].
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not an RGB NCHW tensor.
    pub fn illumination(&self, input: &ImageTensor) -> Result<ImageTensor> {
        self.enhance.forward(input)
    }

    /// Enhance an image: `clamp(input / illumination(input), 0, 1)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not an RGB NCHW tensor.
    pub fn forward(&self, input: &ImageTensor) -> Result<ImageTensor> {
        let illumination = self.illumination(input)?;
        decompose(input, &illumination)
    }
}

/// Recover reflectance: elementwise `input / illumination`, clipped to [0, 1].
///
/// Dark pixels over a dim illumination estimate are amplified; that is the
/// enhancement.
///
/// # Errors
///
/// Returns an error if the two tensors differ in shape.
pub fn decompose(input: &ImageTensor, illumination: &ImageTensor) -> Result<ImageTensor> {
    if input.shape() != illumination.shape() {
        return Err(Error::ShapeMismatch {
            expected: format!("{:?}", input.shape()),
            actual: format!("{:?}", illumination.shape()),
        });
    }

    Ok(Zip::from(input)
        .and(illumination)
        .map_collect(|&i, &l| (i / l).clamp(0.0, 1.0)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::network::tests::{random_input, random_weights};
    use ndarray::{Array4, ArrayD, IxDyn};

    #[test]
    fn test_decompose_divides_and_clamps() {
        let input =
            Array4::from_shape_vec((1, 3, 1, 2), vec![0.2, 0.5, 0.0, 0.9, 0.3, 0.01]).unwrap();
        let illumination =
            Array4::from_shape_vec((1, 3, 1, 2), vec![0.4, 0.25, 0.0001, 1.0, 0.6, 0.0001])
                .unwrap();

        let out = decompose(&input, &illumination).unwrap();

        let expected = [0.5, 1.0, 0.0, 0.9, 0.5, 1.0];
        for (got, want) in out.iter().zip(expected) {
            assert!((got - want).abs() < 1e-6, "{got} != {want}");
        }
    }

    #[test]
    fn test_decompose_rejects_mismatched_shapes() {
        let err = decompose(&Array4::zeros((1, 3, 2, 2)), &Array4::ones((1, 3, 2, 3))).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
    }

    #[test]
    fn test_output_range_and_shape() {
        let weights = random_weights(EnhanceConfig::default(), ENHANCE_PREFIX, 41);
        let model = FinetuneModel::new(&weights).unwrap();

        for (seed, (h, w)) in [(1, (16, 24)), (2, (3, 3)), (3, (40, 10))] {
            let input = random_input(h, w, seed);
            let out = model.forward(&input).unwrap();

            assert_eq!(out.shape(), input.shape());
            assert!(out.iter().all(|&v| (0.0..=1.0).contains(&v)));
        }
    }

    #[test]
    fn test_black_input_stays_finite() {
        let weights = random_weights(EnhanceConfig::default(), ENHANCE_PREFIX, 43);
        let model = FinetuneModel::new(&weights).unwrap();

        let out = model.forward(&Array4::zeros((1, 3, 8, 8))).unwrap();
        assert!(out.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_default_parameters_brighten_dark_pixels() {
        // Unloaded network: illumination = min(x + 0.5, 1)
        let model = FinetuneModel::new(&WeightSet::default()).unwrap();
        let out = model.forward(&Array4::from_elem((1, 3, 2, 2), 0.1)).unwrap();

        let expected = 0.1 / 0.6;
        assert!(out.iter().all(|&v| (v - expected).abs() < 1e-6));
        assert_eq!(model.load_report().missing.len(), 10);
    }

    #[test]
    fn test_only_enhance_prefix_is_applied() {
        let config = EnhanceConfig::default();
        let mut weights = random_weights(config, ENHANCE_PREFIX, 47);
        let calibrate = random_weights(config, "calibrate", 53);
        for name in calibrate.names() {
            weights.insert(name, ArrayD::zeros(IxDyn(&[1])));
        }

        let model = FinetuneModel::new(&weights).unwrap();
        let report = model.load_report();

        assert!(report.missing.is_empty());
        assert!(report.applied.iter().all(|n| n.starts_with("enhance.")));
        assert!(report.ignored.iter().all(|n| n.starts_with("calibrate.")));
        assert_eq!(report.ignored.len(), 16);
    }

    #[test]
    fn test_shape_invariance_on_ones() {
        let weights = random_weights(EnhanceConfig::default(), ENHANCE_PREFIX, 59);
        let model = FinetuneModel::new(&weights).unwrap();

        for size in [64, 256] {
            let out = model.forward(&Array4::ones((1, 3, size, size))).unwrap();
            assert_eq!(out.shape(), &[1, 3, size, size]);
        }
    }

    #[test]
    fn test_missing_weight_file() {
        let err = FinetuneModel::from_file("/nonexistent/lowlight/weights.safetensors").unwrap_err();
        assert!(matches!(err, Error::WeightsRead { .. }));
    }
}
