use burn::module::Param;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{Linear, LinearConfig, PaddingConfig2d};
use burn::prelude::*;
use burn::tensor::activation::leaky_relu;

/// Instance normalization whose scale and shift come from a style vector.
#[derive(Module, Debug)]
pub struct AdaptiveInstanceNorm<B: Backend> {
    style: Linear<B>,
    #[module(ignore)]
    channels: usize,
    #[module(ignore)]
    epsilon: f64,
}

impl<B: Backend> AdaptiveInstanceNorm<B> {
    pub fn new(latent_width: usize, channels: usize, epsilon: f64, device: &B::Device) -> Self {
        let style = LinearConfig::new(latent_width, channels * 2).init(device);
        Self {
            style,
            channels,
            epsilon,
        }
    }

    /// Normalize `x` per channel, then modulate it with the style `w` (`[batch, latent_width]`).
    pub fn forward(&self, x: Tensor<B, 4>, w: Tensor<B, 2>) -> Tensor<B, 4> {
        let style = self.style.forward(w);
        let scale = style.clone().slice_dim(1, 0..self.channels).add_scalar(1.0);
        let shift = style.slice_dim(1, self.channels..(self.channels * 2));

        let mean = x.clone().mean_dims(&[2, 3]);
        let var = x.clone().sub(mean.clone()).square().mean_dims(&[2, 3]);
        let norm = (x - mean).div((var + self.epsilon).sqrt());

        let batch = norm.dims()[0];
        let scale = scale.reshape([batch, self.channels, 1, 1]);
        let shift = shift.reshape([batch, self.channels, 1, 1]);
        norm.mul(scale).add(shift)
    }
}

/// 3x3 convolution, scaled noise, leaky ReLU and style modulation.
#[derive(Module, Debug)]
pub struct StyledConv<B: Backend> {
    conv: Conv2d<B>,
    noise_weight: Param<Tensor<B, 1>>,
    adain: AdaptiveInstanceNorm<B>,
}

impl<B: Backend> StyledConv<B> {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        latent_width: usize,
        device: &B::Device,
    ) -> Self {
        let conv = Conv2dConfig::new([in_channels, out_channels], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init(device);
        Self {
            conv,
            noise_weight: Param::from_tensor(Tensor::zeros([1], device)),
            adain: AdaptiveInstanceNorm::new(latent_width, out_channels, 1e-5, device),
        }
    }

    /// `noise` is `[batch, 1, h, w]`; `None` uses the fixed all-zero buffer.
    pub fn forward(&self, x: Tensor<B, 4>, w: Tensor<B, 2>, noise: Option<Tensor<B, 4>>) -> Tensor<B, 4> {
        let mut x = self.conv.forward(x);
        if let Some(noise) = noise {
            let weight = self.noise_weight.val().reshape([1, 1, 1, 1]);
            x = x.add(noise.mul(weight));
        }
        let x = leaky_relu(x, 0.2);
        self.adain.forward(x, w)
    }
}
