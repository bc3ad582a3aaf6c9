//! # Parameterized Hypercomplex Convolution
//!
//! A [`PhConv2d`] factors its convolution kernel as a sum of Kronecker products:
//!
//! ```text
//! W = sum_i kron(A[i], F[i])
//! ```
//!
//! where ``A: [n, n, n]`` holds the learned algebra (multiplication rules) and
//! ``F: [n, out/n, in/n, k, k]`` holds the learned filters. Block ``(a, b)`` of
//! ``W`` is ``sum_i A[i, a, b] * F[i]``.
//!
//! For ``n > 1`` this uses roughly ``1/n`` of the parameters of a dense ``Conv2d``
//! with the same channel counts.

use crate::layers::init::LayerRole;
use anyhow::bail;
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::module::{Module, Param};
use burn::nn::Initializer;
use burn::prelude::{Backend, Tensor};
use burn::tensor::module::conv2d;
use burn::tensor::ops::ConvOptions;

/// [`PhConv2d`] Meta.
pub trait PhConv2dMeta {
    /// The hypercomplex algebra dimension, ``n``.
    fn algebra_dim(&self) -> usize;

    /// Number of input channels.
    fn in_channels(&self) -> usize;

    /// Number of output channels.
    fn out_channels(&self) -> usize;

    /// Square kernel size.
    fn kernel_size(&self) -> usize;

    /// Square stride.
    fn stride(&self) -> usize;

    /// Symmetric zero padding.
    fn padding(&self) -> usize;

    /// The output resolution for a given input resolution.
    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        let k = self.kernel_size();
        let s = self.stride();
        let p = self.padding();
        input_resolution.map(|x| (x + 2 * p - k) / s + 1)
    }
}

/// [`PhConv2d`] Config.
#[derive(Config, Debug)]
pub struct PhConv2dConfig {
    /// The hypercomplex algebra dimension, ``n``.
    pub n: usize,

    /// ``[in_channels, out_channels]``; both must be divisible by ``n``.
    pub channels: [usize; 2],

    /// Square kernel size.
    pub kernel_size: usize,

    /// Square stride.
    #[config(default = 1)]
    pub stride: usize,

    /// Symmetric zero padding.
    #[config(default = 0)]
    pub padding: usize,

    /// Whether to learn an additive bias.
    #[config(default = true)]
    pub bias: bool,

    /// Initializer for the algebra and filter tensors.
    #[config(default = "LayerRole::Convolutional.initializer()")]
    pub initializer: Initializer,
}

impl PhConv2dMeta for PhConv2dConfig {
    fn algebra_dim(&self) -> usize {
        self.n
    }

    fn in_channels(&self) -> usize {
        self.channels[0]
    }

    fn out_channels(&self) -> usize {
        self.channels[1]
    }

    fn kernel_size(&self) -> usize {
        self.kernel_size
    }

    fn stride(&self) -> usize {
        self.stride
    }

    fn padding(&self) -> usize {
        self.padding
    }
}

impl PhConv2dConfig {
    /// Check that the hypercomplex factorization applies to this config.
    pub fn try_validate(&self) -> anyhow::Result<()> {
        let n = self.n;
        if n == 0 {
            bail!("algebra dimension n must be >= 1");
        }
        if self.kernel_size == 0 {
            bail!("kernel_size must be >= 1");
        }
        if self.stride == 0 {
            bail!("stride must be >= 1");
        }
        for (name, channels) in [
            ("in_channels", self.in_channels()),
            ("out_channels", self.out_channels()),
        ] {
            if channels == 0 || channels % n != 0 {
                bail!("{name}({channels}) is not divisible by algebra dimension n({n})");
            }
        }
        Ok(())
    }

    /// Panic if `try_validate` returns an error.
    pub fn expect_valid(&self) {
        if let Err(err) = self.try_validate() {
            panic!("{err}");
        }
    }

    /// Initialize a [`PhConv2d`], or report a configuration error.
    pub fn try_init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> anyhow::Result<PhConv2d<B>> {
        self.try_validate()?;

        let n = self.n;
        let k = self.kernel_size;
        let in_n = self.in_channels() / n;
        let out_n = self.out_channels() / n;

        let algebra =
            self.initializer
                .init_with([n, n, n], Some(n * n), Some(n * n), device);

        let filters = self.initializer.init_with(
            [n, out_n, in_n, k, k],
            Some(out_n * in_n * k * k),
            Some(n * in_n * k * k),
            device,
        );

        let bias = if self.bias {
            let bound = 1.0 / ((self.in_channels() * k * k) as f64).sqrt();
            Some(
                Initializer::Uniform {
                    min: -bound,
                    max: bound,
                }
                .init([self.out_channels()], device),
            )
        } else {
            None
        };

        Ok(PhConv2d {
            algebra,
            filters,
            bias,
            stride: self.stride,
            padding: self.padding,
        })
    }

    /// Initialize a [`PhConv2d`].
    ///
    /// # Panics
    ///
    /// If the config is invalid.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> PhConv2d<B> {
        self.try_init(device).unwrap_or_else(|err| panic!("{err}"))
    }
}

/// Parameterized hypercomplex 2d convolution.
///
/// Implements [`PhConv2dMeta`].
#[derive(Module, Debug)]
pub struct PhConv2d<B: Backend> {
    /// Algebra rules, ``[n, n, n]``.
    pub algebra: Param<Tensor<B, 3>>,

    /// Filter components, ``[n, out_channels/n, in_channels/n, k, k]``.
    pub filters: Param<Tensor<B, 5>>,

    /// Optional bias, ``[out_channels]``.
    pub bias: Option<Param<Tensor<B, 1>>>,

    /// Square stride.
    pub stride: usize,

    /// Symmetric zero padding.
    pub padding: usize,
}

impl<B: Backend> PhConv2dMeta for PhConv2d<B> {
    fn algebra_dim(&self) -> usize {
        self.algebra.dims()[0]
    }

    fn in_channels(&self) -> usize {
        let [n, _, in_n, _, _] = self.filters.dims();
        n * in_n
    }

    fn out_channels(&self) -> usize {
        let [n, out_n, _, _, _] = self.filters.dims();
        n * out_n
    }

    fn kernel_size(&self) -> usize {
        self.filters.dims()[3]
    }

    fn stride(&self) -> usize {
        self.stride
    }

    fn padding(&self) -> usize {
        self.padding
    }
}

impl<B: Backend> PhConv2d<B> {
    /// Assemble the dense kernel from the algebra and filter components.
    ///
    /// # Returns
    ///
    /// A ``[out_channels, in_channels, k, k]`` tensor.
    pub fn weight(&self) -> Tensor<B, 4> {
        let [n, out_n, in_n, kh, kw] = self.filters.dims();

        // [i, a, o, b, c, kk]; kernel dims are folded to stay within rank 6.
        let a = self.algebra.val().reshape([n, n, 1, n, 1, 1]);
        let f = self.filters.val().reshape([n, 1, out_n, 1, in_n, kh * kw]);

        (a * f)
            .sum_dim(0)
            .reshape([n * out_n, n * in_n, kh, kw])
    }

    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, in_height, in_width]``.
    ///
    /// # Returns
    ///
    /// ``[batch, out_channels, out_height, out_width]``
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch, in_height, in_width] = unpack_shape_contract!(
            ["batch", "in_channels", "in_height", "in_width"],
            &input,
            &["batch", "in_height", "in_width"],
            &[("in_channels", self.in_channels())]
        );
        let [out_height, out_width] = self.output_resolution([in_height, in_width]);

        let options = ConvOptions::new(
            [self.stride, self.stride],
            [self.padding, self.padding],
            [1, 1],
            1,
        );
        let x = conv2d(
            input,
            self.weight(),
            self.bias.as_ref().map(|bias| bias.val()),
            options,
        );

        assert_shape_contract_periodically!(
            ["batch", "out_channels", "out_height", "out_width"],
            &x,
            &[
                ("batch", batch),
                ("out_channels", self.out_channels()),
                ("out_height", out_height),
                ("out_width", out_width)
            ]
        );

        x
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bimm_contracts::assert_shape_contract;
    use burn::backend::{Autodiff, NdArray};
    use burn::tensor::Distribution;
    use hamcrest::prelude::*;

    #[test]
    fn test_phconv_config() {
        let config = PhConv2dConfig::new(4, [8, 16], 3)
            .with_stride(2)
            .with_padding(1);
        config.try_validate().unwrap();

        assert_eq!(config.algebra_dim(), 4);
        assert_eq!(config.in_channels(), 8);
        assert_eq!(config.out_channels(), 16);
        assert_eq!(config.output_resolution([8, 8]), [4, 4]);
        assert_eq!(config.output_resolution([7, 7]), [4, 4]);
        assert!(config.bias);
    }

    #[test]
    fn test_phconv_config_rejects_indivisible_channels() {
        let err = PhConv2dConfig::new(4, [6, 16], 3)
            .try_validate()
            .unwrap_err();
        assert_that!(
            err.to_string(),
            equal_to("in_channels(6) is not divisible by algebra dimension n(4)".to_string())
        );

        let err = PhConv2dConfig::new(3, [6, 16], 3)
            .try_validate()
            .unwrap_err();
        assert_that!(
            err.to_string(),
            equal_to("out_channels(16) is not divisible by algebra dimension n(3)".to_string())
        );

        assert!(PhConv2dConfig::new(0, [4, 4], 3).try_validate().is_err());
        assert!(PhConv2dConfig::new(2, [4, 4], 3)
            .with_stride(0)
            .try_validate()
            .is_err());
    }

    #[test]
    #[should_panic(expected = "is not divisible by algebra dimension")]
    fn test_phconv_init_panics() {
        type B = NdArray<f32>;
        let device = Default::default();
        let _conv: PhConv2d<B> = PhConv2dConfig::new(4, [3, 16], 3).init(&device);
    }

    #[test]
    fn test_phconv_num_params() {
        type B = NdArray<f32>;
        let device = Default::default();

        let conv: PhConv2d<B> = PhConv2dConfig::new(4, [8, 16], 3).init(&device);
        assert_eq!(conv.algebra_dim(), 4);
        assert_eq!(conv.in_channels(), 8);
        assert_eq!(conv.out_channels(), 16);
        assert_eq!(conv.kernel_size(), 3);

        // n^3 + out*in*k*k/n + out
        assert_eq!(conv.num_params(), 64 + 16 * 8 * 9 / 4 + 16);

        let conv: PhConv2d<B> = PhConv2dConfig::new(4, [8, 16], 3)
            .with_bias(false)
            .init(&device);
        assert_eq!(conv.num_params(), 64 + 16 * 8 * 9 / 4);
    }

    #[test]
    fn test_phconv_weight_is_sum_of_kronecker_products() {
        type B = NdArray<f32>;
        let device = Default::default();

        let conv: PhConv2d<B> = PhConv2d {
            algebra: Param::from_tensor(Tensor::from_floats(
                [[[1.0, 2.0], [3.0, 4.0]], [[0.0, 1.0], [1.0, 0.0]]],
                &device,
            )),
            filters: Param::from_tensor(Tensor::from_floats(
                [[[[[2.0]]]], [[[[10.0]]]]],
                &device,
            )),
            bias: None,
            stride: 1,
            padding: 0,
        };

        let expected: Tensor<B, 4> =
            Tensor::from_floats([[[[2.0]], [[14.0]]], [[[16.0]], [[8.0]]]], &device);
        conv.weight()
            .to_data()
            .assert_eq(&expected.to_data(), true);
    }

    #[test]
    fn test_phconv_n1_is_scaled_dense_conv() {
        type B = NdArray<f32>;
        let device = Default::default();

        let conv: PhConv2d<B> = PhConv2dConfig::new(1, [3, 5], 3).init(&device);
        let scale = conv.algebra.val().reshape([1, 1, 1, 1]);
        let expected = conv.filters.val().reshape([5, 3, 3, 3]) * scale;

        conv.weight()
            .to_data()
            .assert_eq(&expected.to_data(), true);
    }

    #[test]
    fn test_phconv_forward() {
        type B = Autodiff<NdArray<f32>>;
        let device = Default::default();

        let conv: PhConv2d<B> = PhConv2dConfig::new(2, [4, 6], 3)
            .with_stride(2)
            .with_padding(1)
            .init(&device);

        let input = Tensor::random([2, 4, 8, 8], Distribution::Default, &device);
        let output = conv.forward(input);

        assert_shape_contract!(
            ["batch", "out_channels", "out_height", "out_width"],
            &output,
            &[
                ("batch", 2),
                ("out_channels", 6),
                ("out_height", 4),
                ("out_width", 4)
            ]
        );

        let grads = output.sum().backward();
        assert!(conv.algebra.grad(&grads).is_some());
        assert!(conv.filters.grad(&grads).is_some());
    }
}
