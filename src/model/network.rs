//! Illumination estimator.
//!
//! ```text
//! input (N,3,H,W)
//!   -> conv3x3(3->C) -> relu
//!   -> L x [ fea + relu(bn(conv3x3(C->C)(fea))) ]   one shared block
//!   -> conv3x3(C->3) -> sigmoid
//!   -> + input -> clamp(0.0001, 1)
//! ```

use crate::error::{Error, Result};
use crate::image::{ImageTensor, RGB_CHANNELS};

use super::layers::{clamp_inplace, relu_inplace, sigmoid_inplace, BatchNorm2d, Conv2d};
use super::weights::{LoadReport, WeightSet};

/// Lower bound of the illumination map. Keeps the decomposition division finite.
pub const ILLUMINATION_FLOOR: f32 = 0.0001;

/// Upper bound of the illumination map.
pub const ILLUMINATION_CEIL: f32 = 1.0;

const KERNEL_SIZE: usize = 3;

/// Shape of the illumination network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnhanceConfig {
    /// Number of times the shared residual block is applied.
    pub layers: usize,

    /// Feature channels between the input and output projections.
    pub channels: usize,
}

impl Default for EnhanceConfig {
    fn default() -> Self {
        Self {
            layers: 1,
            channels: 3,
        }
    }
}

impl EnhanceConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if `channels` is zero.
    pub fn validate(&self) -> Result<()> {
        if self.channels == 0 {
            return Err(Error::InvalidParameter {
                name: "channels".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

/// conv -> batch norm -> relu.
#[derive(Debug, Clone)]
struct ConvBlock {
    conv: Conv2d,
    norm: BatchNorm2d,
}

impl ConvBlock {
    fn new(channels: usize) -> Self {
        Self {
            conv: Conv2d::new(channels, channels, KERNEL_SIZE),
            norm: BatchNorm2d::new(channels),
        }
    }

    fn forward(&self, input: &ImageTensor) -> ImageTensor {
        let mut fea = self.conv.forward(input);
        self.norm.forward_inplace(&mut fea);
        relu_inplace(&mut fea);
        fea
    }
}

/// Predicts a per-pixel illumination map with the same shape as its input.
///
/// The residual body is a single block applied `layers` times, so there is
/// exactly one set of body parameters regardless of depth. In the persisted
/// state dictionary that block is reachable both as `conv.*` and as
/// `blocks.{i}.*`; all of those names load into the same tensors.
#[derive(Debug, Clone)]
pub struct EnhanceNetwork {
    config: EnhanceConfig,
    in_conv: Conv2d,
    block: ConvBlock,
    out_conv: Conv2d,
}

impl EnhanceNetwork {
    /// Build a network with default parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: EnhanceConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            config,
            in_conv: Conv2d::new(RGB_CHANNELS, config.channels, KERNEL_SIZE),
            block: ConvBlock::new(config.channels),
            out_conv: Conv2d::new(config.channels, RGB_CHANNELS, KERNEL_SIZE),
        })
    }

    /// The configuration this network was built with.
    #[must_use]
    pub const fn config(&self) -> &EnhanceConfig {
        &self.config
    }

    /// Every declared parameter name under `prefix`, with its expected shape,
    /// in the order weights are applied.
    #[must_use]
    pub fn parameters(&self, prefix: &str) -> Vec<(String, Vec<usize>)> {
        let mut params = Vec::new();

        push_conv(&mut params, &[qualified(prefix, "in_conv.0")], &self.in_conv);
        push_conv(&mut params, &self.body_prefixes(prefix, 0), &self.block.conv);
        for suffix in ["weight", "bias", "running_mean", "running_var"] {
            for module in self.body_prefixes(prefix, 1) {
                params.push((format!("{module}.{suffix}"), vec![self.config.channels]));
            }
        }
        push_conv(&mut params, &[qualified(prefix, "out_conv.0")], &self.out_conv);

        params
    }

    /// Apply matching entries of `weights` whose names start with `prefix`.
    ///
    /// Unknown names are ignored and absent names keep their defaults. A
    /// matching name with the wrong shape fails and leaves the network as it was.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WeightShape`] or [`Error::UnsupportedDtype`] for a
    /// declared parameter that cannot be applied.
    pub fn load_weights(&mut self, prefix: &str, weights: &WeightSet) -> Result<LoadReport> {
        let mut staged = self.clone();
        let mut report = LoadReport::default();

        staged
            .in_conv
            .load(&[qualified(prefix, "in_conv.0")], weights, &mut report)?;
        staged
            .block
            .conv
            .load(&self.body_prefixes(prefix, 0), weights, &mut report)?;
        staged
            .block
            .norm
            .load(&self.body_prefixes(prefix, 1), weights, &mut report)?;
        staged
            .out_conv
            .load(&[qualified(prefix, "out_conv.0")], weights, &mut report)?;

        report.ignored = weights.unused(&report.applied);

        if !report.missing.is_empty() {
            tracing::warn!(
                "{} parameters not in weight set, keeping defaults: {:?}",
                report.missing.len(),
                report.missing
            );
        }
        for name in &report.ignored {
            tracing::debug!("Ignoring unrecognized weight {name}");
        }
        tracing::info!(
            "Applied {} weights ({} missing, {} ignored)",
            report.applied.len(),
            report.missing.len(),
            report.ignored.len()
        );

        *self = staged;
        Ok(report)
    }

    /// Predict the illumination map.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not an (N, 3, H, W) tensor with N, H and W
    /// all positive.
    pub fn forward(&self, input: &ImageTensor) -> Result<ImageTensor> {
        check_input(input)?;

        let mut fea = self.in_conv.forward(input);
        relu_inplace(&mut fea);

        for _ in 0..self.config.layers {
            let residual = self.block.forward(&fea);
            fea += &residual;
        }

        let mut illumination = self.out_conv.forward(&fea);
        sigmoid_inplace(&mut illumination);

        illumination += input;
        clamp_inplace(&mut illumination, ILLUMINATION_FLOOR, ILLUMINATION_CEIL);

        Ok(illumination)
    }

    /// Names under which the shared block's sub-module `index` is persisted:
    /// `conv.{index}` first, then `blocks.{i}.{index}` for each application.
    fn body_prefixes(&self, prefix: &str, index: usize) -> Vec<String> {
        std::iter::once(qualified(prefix, &format!("conv.{index}")))
            .chain(
                (0..self.config.layers)
                    .map(|i| qualified(prefix, &format!("blocks.{i}.{index}"))),
            )
            .collect()
    }
}

fn push_conv(params: &mut Vec<(String, Vec<usize>)>, modules: &[String], conv: &Conv2d) {
    for (suffix, shape) in [("weight", conv.weight().shape()), ("bias", conv.bias().shape())] {
        for module in modules {
            params.push((format!("{module}.{suffix}"), shape.to_vec()));
        }
    }
}

fn qualified(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

fn check_input(input: &ImageTensor) -> Result<()> {
    let (batch, channels, height, width) = input.dim();

    if batch == 0 || channels != RGB_CHANNELS {
        return Err(Error::ShapeMismatch {
            expected: format!("(>=1, {RGB_CHANNELS}, H, W)"),
            actual: format!("{:?}", input.shape()),
        });
    }

    if height == 0 || width == 0 {
        return Err(Error::UnsupportedDimensions {
            width,
            height,
            reason: "image has no pixels".to_string(),
        });
    }

    Ok(())
}
