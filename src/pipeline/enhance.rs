//! Main enhancement pipeline.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::image::{self, ImageTensor};
use crate::model::{EnhanceConfig, FinetuneModel, WeightSet};

use super::onnx::OnnxModel;
use super::verify::{compare_tensors, Verification};

/// Default weight file, the "difficult" finetuned variant converted to safetensors.
pub const DEFAULT_WEIGHTS: &str = "model_weights_difficult.safetensors";

/// Configuration for the enhancement pipeline.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the `safetensors` weight file.
    pub weights: PathBuf,

    /// Shape of the illumination network.
    pub network: EnhanceConfig,

    /// Output JPEG quality (1-100).
    pub output_quality: u8,

    /// Largest 8-bit difference accepted when cross-checking backends.
    pub tolerance: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            weights: PathBuf::from(DEFAULT_WEIGHTS),
            network: EnhanceConfig::default(),
            output_quality: 95,
            tolerance: 1,
        }
    }
}

impl Config {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any parameter is out of valid range.
    pub fn validate(&self) -> Result<()> {
        self.network.validate()?;

        if !(1..=100).contains(&self.output_quality) {
            return Err(Error::InvalidParameter {
                name: "output_quality".to_string(),
                reason: "must be between 1 and 100".to_string(),
            });
        }

        Ok(())
    }
}

/// Loads weights once, then enhances any number of images.
pub struct Pipeline {
    config: Config,
    model: FinetuneModel,
}

impl Pipeline {
    /// Create a new pipeline with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the weights cannot be
    /// read or do not fit the network.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        tracing::info!("Initializing pipeline with config: {config:?}");

        let weights = WeightSet::load(&config.weights)?;
        let model = FinetuneModel::with_config(config.network, &weights)?;

        tracing::info!("Pipeline initialized successfully");

        Ok(Self { config, model })
    }

    /// Build a pipeline around an already constructed model.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn with_model(config: Config, model: FinetuneModel) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, model })
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// The loaded model.
    #[must_use]
    pub const fn model(&self) -> &FinetuneModel {
        &self.model
    }

    /// Enhance an image tensor.
    ///
    /// # Errors
    ///
    /// Returns an error if the tensor is not an RGB NCHW image.
    pub fn enhance(&self, input: &ImageTensor) -> Result<ImageTensor> {
        self.model.forward(input)
    }

    /// Enhance an image file and write the result.
    ///
    /// # Arguments
    ///
    /// * `input_path` - Path to the input image
    /// * `output_path` - Path to save the enhanced image
    ///
    /// # Errors
    ///
    /// Returns an error if processing fails.
    pub fn process<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        input_path: P,
        output_path: Q,
    ) -> Result<()> {
        let input_path = input_path.as_ref();
        let output_path = output_path.as_ref();

        tracing::info!("Processing image: {}", input_path.display());
        let input = image::load_image(input_path)?;

        tracing::info!("Running enhancement...");
        let output = self.enhance(&input)?;

        tracing::info!("Saving output to: {}", output_path.display());
        image::save_image(&output, output_path, self.config.output_quality)?;

        tracing::info!("Processing complete");
        Ok(())
    }

    /// Run one image through both the native network and an exported model and
    /// compare the 8-bit results.
    ///
    /// # Errors
    ///
    /// Returns an error if either backend fails or their outputs differ in size.
    pub fn verify<P: AsRef<Path>>(
        &self,
        input_path: P,
        exported: &mut OnnxModel,
    ) -> Result<Verification> {
        let input_path = input_path.as_ref();

        tracing::info!(
            "Cross-checking {} against {}",
            input_path.display(),
            exported.name()
        );
        let input = image::load_image(input_path)?;

        tracing::info!("Running native forward pass...");
        let native = self.enhance(&input)?;

        tracing::info!("Running exported model...");
        let onnx = exported.run(&input)?;

        let report = compare_tensors(&native, &onnx, self.config.tolerance)?;
        if report.passed() {
            tracing::info!(
                "Outputs match: max difference {} ({} values differ)",
                report.max_abs_diff,
                report.differing_values
            );
        } else {
            tracing::warn!(
                "Outputs diverge: max difference {} exceeds tolerance {}",
                report.max_abs_diff,
                report.tolerance
            );
        }

        Ok(Verification {
            native,
            onnx,
            report,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::onnx::tests::{default_enhance_model, identity_model};
    use ndarray::Array4;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_config_rejects_quality_out_of_range() {
        let config = Config {
            output_quality: 0,
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_missing_weights_fail_pipeline_creation() {
        let config = Config {
            weights: PathBuf::from("/nonexistent/lowlight/weights.safetensors"),
            ..Config::default()
        };
        assert!(matches!(
            Pipeline::new(config),
            Err(Error::WeightsRead { .. })
        ));
    }

    #[test]
    fn test_process_writes_enhanced_image() {
        let model = FinetuneModel::new(&WeightSet::default()).unwrap();
        let pipeline = Pipeline::with_model(Config::default(), model).unwrap();

        let dir = std::env::temp_dir();
        let id = std::process::id();
        let input_path = dir.join(format!("lowlight-in-{id}.png"));
        let output_path = dir.join(format!("lowlight-out-{id}.png"));

        let dark = Array4::from_elem((1, 3, 6, 9), 0.2);
        image::save_image(&dark, &input_path, 95).unwrap();

        pipeline.process(&input_path, &output_path).unwrap();
        let enhanced = image::load_image(&output_path).unwrap();

        std::fs::remove_file(&input_path).ok();
        std::fs::remove_file(&output_path).ok();

        assert_eq!(enhanced.shape(), &[1, 3, 6, 9]);
        // 51/255 over an illumination of 0.7 brightens to 72/255.
        assert!(enhanced.iter().all(|&v| v > 0.2 && v <= 1.0));
    }

    fn gradient_image(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("lowlight-{name}-{}.png", std::process::id()));
        // 7x5, spanning both the brightened and the pass-through range.
        let tensor = Array4::from_shape_fn((1, 3, 5, 7), |(_, c, y, x)| {
            let step = u8::try_from(c * 35 + y * 7 + x).unwrap();
            f32::from(step) / 104.0
        });
        image::save_image(&tensor, &path, 95).unwrap();
        path
    }

    #[test]
    fn test_verify_matches_equivalent_export() {
        let model = FinetuneModel::new(&WeightSet::default()).unwrap();
        let pipeline = Pipeline::with_model(Config::default(), model).unwrap();
        let mut exported = OnnxModel::from_memory("default", &default_enhance_model()).unwrap();

        let path = gradient_image("verify-match");
        let verification = pipeline.verify(&path, &mut exported);
        std::fs::remove_file(&path).ok();
        let verification = verification.unwrap();

        assert_eq!(verification.native.shape(), &[1, 3, 5, 7]);
        assert_eq!(verification.onnx.shape(), &[1, 3, 5, 7]);
        assert_eq!((verification.report.width, verification.report.height), (7, 5));
        assert!(verification.report.passed(), "{:?}", verification.report);
    }

    #[test]
    fn test_verify_feeds_loaded_image_and_flags_divergence() {
        let model = FinetuneModel::new(&WeightSet::default()).unwrap();
        let pipeline = Pipeline::with_model(Config::default(), model).unwrap();
        let mut exported = OnnxModel::from_memory("identity", &identity_model()).unwrap();

        let path = gradient_image("verify-diverge");
        let input = image::load_image(&path).unwrap();
        let verification = pipeline.verify(&path, &mut exported);
        std::fs::remove_file(&path).ok();
        let verification = verification.unwrap();

        // The identity export echoes exactly what the native side was given.
        assert_eq!(verification.onnx, input);
        assert_eq!(verification.native, pipeline.enhance(&input).unwrap());
        assert!(!verification.report.passed());
        assert!(verification.report.differing_values > 0);
    }
}
