use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig};
use burn::nn::{Linear, LinearConfig, PaddingConfig2d};
use burn::prelude::*;
use burn::tensor::activation::leaky_relu;

/// Configuration for the image-to-latent encoder.
#[derive(Config, Debug)]
pub struct StyleEncoderConfig {
    pub input_channels: usize,
    pub encoder_dim: usize,
    pub latent_width: usize,
    /// Number of latent vectors produced per image.
    pub n_codes: usize,
}

/// Strided conv stack pooled into `n_codes` latent vectors.
#[derive(Module, Debug)]
pub struct StyleEncoder<B: Backend> {
    convs: Vec<Conv2d<B>>,
    pool: AdaptiveAvgPool2d,
    head: Linear<B>,
    #[module(ignore)]
    n_codes: usize,
    #[module(ignore)]
    latent_width: usize,
}

impl StyleEncoderConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> StyleEncoder<B> {
        let dim = self.encoder_dim;
        let convs = vec![
            down_conv(self.input_channels, dim, device),
            down_conv(dim, dim * 2, device),
            down_conv(dim * 2, dim * 4, device),
            down_conv(dim * 4, dim * 4, device),
        ];
        StyleEncoder {
            convs,
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            head: LinearConfig::new(dim * 4, self.n_codes * self.latent_width).init(device),
            n_codes: self.n_codes,
            latent_width: self.latent_width,
        }
    }
}

impl<B: Backend> StyleEncoder<B> {
    /// Encode `[batch, c, h, w]` images into `[batch, n_codes, latent_width]`.
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 3> {
        let mut x = images;
        for conv in &self.convs {
            x = leaky_relu(conv.forward(x), 0.2);
        }
        let x = self.pool.forward(x);
        let [batch, channels, _, _] = x.dims();
        self.head
            .forward(x.reshape([batch, channels]))
            .reshape([batch, self.n_codes, self.latent_width])
    }
}

fn down_conv<B: Backend>(in_channels: usize, out_channels: usize, device: &B::Device) -> Conv2d<B> {
    Conv2dConfig::new([in_channels, out_channels], [3, 3])
        .with_stride([2, 2])
        .with_padding(PaddingConfig2d::Explicit(1, 1))
        .init(device)
}
