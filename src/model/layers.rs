//! Inference-only layers operating on NCHW `ndarray` tensors.

use std::ops::Range;

use ndarray::{s, Array1, Array4};

use crate::error::Result;

use super::weights::{param_names, LoadReport, WeightSet};

/// Epsilon used by batch normalization (framework default).
pub const BATCH_NORM_EPS: f32 = 1e-5;

/// 2D convolution with stride 1, dilation 1 and same padding.
#[derive(Debug, Clone)]
pub struct Conv2d {
    weight: Array4<f32>,
    bias: Array1<f32>,
    padding: usize,
}

impl Conv2d {
    /// Create a zero-initialized convolution.
    ///
    /// Padding is `(kernel_size - 1) / 2`, so odd kernels keep the spatial size.
    #[must_use]
    pub fn new(in_channels: usize, out_channels: usize, kernel_size: usize) -> Self {
        Self {
            weight: Array4::zeros((out_channels, in_channels, kernel_size, kernel_size)),
            bias: Array1::zeros(out_channels),
            padding: kernel_size.saturating_sub(1) / 2,
        }
    }

    /// Number of input channels.
    #[must_use]
    pub fn in_channels(&self) -> usize {
        self.weight.dim().1
    }

    /// Number of output channels.
    #[must_use]
    pub fn out_channels(&self) -> usize {
        self.weight.dim().0
    }

    /// Kernel weights, shape (out, in, k, k).
    #[must_use]
    pub const fn weight(&self) -> &Array4<f32> {
        &self.weight
    }

    /// Per output channel bias.
    #[must_use]
    pub const fn bias(&self) -> &Array1<f32> {
        &self.bias
    }

    /// Apply `{prefix}.weight` and `{prefix}.bias` for every alias prefix.
    pub(crate) fn load<P: AsRef<str>>(
        &mut self,
        prefixes: &[P],
        weights: &WeightSet,
        report: &mut LoadReport,
    ) -> Result<()> {
        weights.assign(&param_names(prefixes, "weight"), &mut self.weight, report)?;
        weights.assign(&param_names(prefixes, "bias"), &mut self.bias, report)
    }

    /// Convolve the input. The caller guarantees the channel count matches.
    ///
    /// Each kernel tap adds a shifted copy of the input plane into the output
    /// plane, so positions that would read outside the image read zero.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn forward(&self, input: &Array4<f32>) -> Array4<f32> {
        let (batch, in_channels, height, width) = input.dim();
        let (out_channels, kernel_in, kernel_h, kernel_w) = self.weight.dim();
        debug_assert_eq!(in_channels, kernel_in, "conv input channels");

        let mut output = Array4::<f32>::zeros((batch, out_channels, height, width));

        for n in 0..batch {
            for oc in 0..out_channels {
                let mut plane = output.slice_mut(s![n, oc, .., ..]);
                plane.fill(self.bias[oc]);

                for ic in 0..in_channels {
                    let source = input.slice(s![n, ic, .., ..]);

                    for ky in 0..kernel_h {
                        let dy = ky as isize - self.padding as isize;
                        let Some((dst_rows, src_rows)) = shifted_range(height, dy) else {
                            continue;
                        };

                        for kx in 0..kernel_w {
                            let dx = kx as isize - self.padding as isize;
                            let Some((dst_cols, src_cols)) = shifted_range(width, dx) else {
                                continue;
                            };

                            let tap = self.weight[[oc, ic, ky, kx]];
                            plane
                                .slice_mut(s![dst_rows.clone(), dst_cols])
                                .scaled_add(tap, &source.slice(s![src_rows.clone(), src_cols]));
                        }
                    }
                }
            }
        }

        output
    }
}

/// Destination and source index ranges for reading `offset` cells away along an
/// axis of length `len`. `None` when the shift leaves no overlap.
fn shifted_range(len: usize, offset: isize) -> Option<(Range<usize>, Range<usize>)> {
    let shift = offset.unsigned_abs();
    if shift >= len {
        return None;
    }
    if offset >= 0 {
        Some((0..len - shift, shift..len))
    } else {
        Some((shift..len, 0..len - shift))
    }
}

/// Batch normalization over channels using stored running statistics.
#[derive(Debug, Clone)]
pub struct BatchNorm2d {
    weight: Array1<f32>,
    bias: Array1<f32>,
    running_mean: Array1<f32>,
    running_var: Array1<f32>,
    eps: f32,
}

impl BatchNorm2d {
    /// Identity-initialized normalization: unit scale, zero shift, zero mean, unit variance.
    #[must_use]
    pub fn new(channels: usize) -> Self {
        Self {
            weight: Array1::ones(channels),
            bias: Array1::zeros(channels),
            running_mean: Array1::zeros(channels),
            running_var: Array1::ones(channels),
            eps: BATCH_NORM_EPS,
        }
    }

    pub(crate) fn load<P: AsRef<str>>(
        &mut self,
        prefixes: &[P],
        weights: &WeightSet,
        report: &mut LoadReport,
    ) -> Result<()> {
        weights.assign(&param_names(prefixes, "weight"), &mut self.weight, report)?;
        weights.assign(&param_names(prefixes, "bias"), &mut self.bias, report)?;
        weights.assign(
            &param_names(prefixes, "running_mean"),
            &mut self.running_mean,
            report,
        )?;
        weights.assign(&param_names(prefixes, "running_var"), &mut self.running_var, report)
    }

    /// Normalize in place: `(x - mean) / sqrt(var + eps) * weight + bias`.
    pub fn forward_inplace(&self, tensor: &mut Array4<f32>) {
        for c in 0..tensor.dim().1 {
            let scale = self.weight[c] / (self.running_var[c] + self.eps).sqrt();
            let shift = self.running_mean[c].mul_add(-scale, self.bias[c]);
            tensor
                .slice_mut(s![.., c, .., ..])
                .mapv_inplace(|v| v.mul_add(scale, shift));
        }
    }
}

/// Zero out negative values.
pub fn relu_inplace(tensor: &mut Array4<f32>) {
    tensor.mapv_inplace(|v| v.max(0.0));
}

/// Logistic sigmoid.
pub fn sigmoid_inplace(tensor: &mut Array4<f32>) {
    tensor.mapv_inplace(|v| 1.0 / (1.0 + (-v).exp()));
}

/// Clip every element to `[min, max]`.
pub fn clamp_inplace(tensor: &mut Array4<f32>, min: f32, max: f32) {
    tensor.mapv_inplace(|v| v.clamp(min, max));
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array, ArrayD, IxDyn};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn ramp(height: usize, width: usize) -> Array4<f32> {
        Array::from_shape_fn((1, 1, height, width), |(_, _, y, x)| (y * width + x) as f32)
    }

    fn single_tap_conv(ky: usize, kx: usize) -> Conv2d {
        let mut weights = WeightSet::default();
        let mut kernel = ArrayD::<f32>::zeros(IxDyn(&[1, 1, 3, 3]));
        kernel[[0, 0, ky, kx]] = 1.0;
        weights.insert("c.weight", kernel);

        let mut conv = Conv2d::new(1, 1, 3);
        conv.load(&["c"], &weights, &mut LoadReport::default()).unwrap();
        conv
    }

    #[test]
    fn test_padding_keeps_spatial_size() {
        let conv = Conv2d::new(3, 5, 3);
        let out = conv.forward(&Array4::zeros((2, 3, 7, 4)));
        assert_eq!(out.shape(), &[2, 5, 7, 4]);
    }

    #[test]
    fn test_center_tap_is_identity() {
        let input = ramp(4, 5);
        let out = single_tap_conv(1, 1).forward(&input);
        assert_eq!(out, input);
    }

    #[test]
    fn test_corner_tap_reads_zero_padding() {
        let input = ramp(3, 3);
        // Top-left tap: out[y][x] = in[y - 1][x - 1]
        let out = single_tap_conv(0, 0).forward(&input);

        assert_eq!(out[[0, 0, 0, 0]], 0.0);
        assert_eq!(out[[0, 0, 0, 2]], 0.0);
        assert_eq!(out[[0, 0, 2, 0]], 0.0);
        assert_eq!(out[[0, 0, 1, 1]], input[[0, 0, 0, 0]]);
        assert_eq!(out[[0, 0, 2, 2]], input[[0, 0, 1, 1]]);
    }

    #[test]
    fn test_conv_on_single_pixel() {
        let out = single_tap_conv(0, 2).forward(&Array4::ones((1, 1, 1, 1)));
        assert_eq!(out[[0, 0, 0, 0]], 0.0);
    }

    #[test]
    fn test_conv_sums_channels_and_adds_bias() {
        let mut weights = WeightSet::default();
        weights.insert("c.weight", ArrayD::from_elem(IxDyn(&[1, 2, 1, 1]), 0.5));
        weights.insert("c.bias", ArrayD::from_elem(IxDyn(&[1]), 0.25));
        let mut conv = Conv2d::new(2, 1, 1);
        conv.load(&["c"], &weights, &mut LoadReport::default()).unwrap();

        let out = conv.forward(&Array4::from_elem((1, 2, 2, 2), 1.0));
        assert!(out.iter().all(|&v| (v - 1.25).abs() < 1e-6));
    }

    #[test]
    #[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
    fn test_conv_matches_direct_sum() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut weights = WeightSet::default();
        weights.insert(
            "c.weight",
            ArrayD::from_shape_fn(IxDyn(&[4, 3, 3, 3]), |_| rng.random_range(-1.0..1.0)),
        );
        weights.insert(
            "c.bias",
            ArrayD::from_shape_fn(IxDyn(&[4]), |_| rng.random_range(-1.0..1.0)),
        );
        let mut conv = Conv2d::new(3, 4, 3);
        conv.load(&["c"], &weights, &mut LoadReport::default()).unwrap();

        let input = Array4::from_shape_fn((2, 3, 5, 7), |_| rng.random::<f32>());
        let out = conv.forward(&input);

        let (height, width) = (5_isize, 7_isize);
        for ((n, oc, y, x), &got) in out.indexed_iter() {
            let mut want = conv.bias()[oc];
            for ic in 0..3 {
                for ky in 0..3 {
                    for kx in 0..3 {
                        let sy = y as isize + ky as isize - 1;
                        let sx = x as isize + kx as isize - 1;
                        if (0..height).contains(&sy) && (0..width).contains(&sx) {
                            want += conv.weight()[[oc, ic, ky, kx]]
                                * input[[n, ic, sy as usize, sx as usize]];
                        }
                    }
                }
            }
            assert!((got - want).abs() < 1e-5, "({n}, {oc}, {y}, {x}): {got} != {want}");
        }
    }

    #[test]
    fn test_batch_norm_uses_running_statistics() {
        let mut weights = WeightSet::default();
        weights.insert("bn.weight", ArrayD::from_elem(IxDyn(&[1]), 2.0));
        weights.insert("bn.bias", ArrayD::from_elem(IxDyn(&[1]), 1.0));
        weights.insert("bn.running_mean", ArrayD::from_elem(IxDyn(&[1]), 3.0));
        weights.insert("bn.running_var", ArrayD::from_elem(IxDyn(&[1]), 4.0 - BATCH_NORM_EPS));
        let mut norm = BatchNorm2d::new(1);
        norm.load(&["bn"], &weights, &mut LoadReport::default()).unwrap();

        let mut tensor = Array4::from_elem((1, 1, 2, 2), 5.0);
        norm.forward_inplace(&mut tensor);

        // (5 - 3) / 2 * 2 + 1
        assert!(tensor.iter().all(|&v| (v - 3.0).abs() < 1e-5));
    }

    #[test]
    fn test_default_batch_norm_is_near_identity() {
        let mut tensor = ramp(2, 2);
        let expected = tensor.clone();
        BatchNorm2d::new(1).forward_inplace(&mut tensor);

        for (a, b) in tensor.iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-4);
        }
    }

    #[test]
    fn test_activations() {
        let mut tensor = Array4::from_shape_vec((1, 1, 1, 3), vec![-2.0, 0.0, 3.0]).unwrap();
        relu_inplace(&mut tensor);
        assert_eq!(tensor.as_slice().unwrap(), &[0.0, 0.0, 3.0]);

        let mut tensor = Array4::from_shape_vec((1, 1, 1, 3), vec![-100.0, 0.0, 100.0]).unwrap();
        sigmoid_inplace(&mut tensor);
        assert!(tensor[[0, 0, 0, 0]] < 1e-6);
        assert!((tensor[[0, 0, 0, 1]] - 0.5).abs() < 1e-6);
        assert!((tensor[[0, 0, 0, 2]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_clamp_is_idempotent() {
        let mut tensor = Array4::from_shape_vec((1, 1, 2, 2), vec![-1.0, 0.00005, 0.5, 7.0]).unwrap();
        clamp_inplace(&mut tensor, 0.0001, 1.0);
        let once = tensor.clone();
        clamp_inplace(&mut tensor, 0.0001, 1.0);

        assert_eq!(tensor, once);
        assert_eq!(once.as_slice().unwrap(), &[0.0001, 0.0001, 0.5, 1.0]);
    }
}
