use crate::model::layers::StyledConv;
use burn::module::Param;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::activation::leaky_relu;
use burn::tensor::module::interpolate;
use burn::tensor::ops::{InterpolateMode, InterpolateOptions};
use burn::tensor::Distribution;

/// Configuration for the style-based generator.
#[derive(Config, Debug)]
pub struct StyleGeneratorConfig {
    pub latent_width: usize,
    pub channels: usize,
    /// Square output side; a power of two, at least 4.
    pub output_size: usize,
    #[config(default = 2)]
    pub mapping_layers: usize,
}

impl StyleGeneratorConfig {
    /// Resolution stages from 4x4 up to `output_size`.
    pub fn stages(&self) -> usize {
        (self.output_size.max(4).trailing_zeros() as usize).saturating_sub(1)
    }

    /// One style vector per styled convolution, two per stage.
    pub fn n_styles(&self) -> usize {
        self.stages() * 2
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> StyleGenerator<B> {
        let mapping = (0..self.mapping_layers)
            .map(|_| LinearConfig::new(self.latent_width, self.latent_width).init(device))
            .collect();
        let constant = Tensor::random(
            [1, self.channels, 4, 4],
            Distribution::Normal(0.0, 1.0),
            device,
        );
        let layers = (0..self.n_styles())
            .map(|_| StyledConv::new(self.channels, self.channels, self.latent_width, device))
            .collect();
        let to_rgb = Conv2dConfig::new([self.channels, 3], [1, 1]).init(device);

        StyleGenerator {
            mapping,
            constant: Param::from_tensor(constant),
            layers,
            to_rgb,
        }
    }
}

/// Mapping network plus a synthesis network driven by per-layer styles.
#[derive(Module, Debug)]
pub struct StyleGenerator<B: Backend> {
    mapping: Vec<Linear<B>>,
    constant: Param<Tensor<B, 4>>,
    layers: Vec<StyledConv<B>>,
    to_rgb: Conv2d<B>,
}

impl<B: Backend> StyleGenerator<B> {
    pub fn n_styles(&self) -> usize {
        self.layers.len()
    }

    /// Map raw codes `[batch, latent_width]` into the intermediate latent space.
    pub fn map_code(&self, code: Tensor<B, 2>) -> Tensor<B, 2> {
        let norm = code.clone().square().mean_dim(1).add_scalar(1e-8).sqrt();
        let mut w = code.div(norm);
        for layer in &self.mapping {
            w = leaky_relu(layer.forward(w), 0.2);
        }
        w
    }

    /// Render `[batch, n_styles, latent_width]` per-layer latents to RGB in `[-1, 1]`.
    pub fn synthesize(&self, codes: Tensor<B, 3>, randomize_noise: bool) -> Tensor<B, 4> {
        let [batch, _, _] = codes.dims();
        let device = codes.device();
        let mut x = self.constant.val().repeat(&[batch, 1, 1, 1]);

        for (idx, layer) in self.layers.iter().enumerate() {
            if idx > 0 && idx % 2 == 0 {
                let [_, _, height, width] = x.dims();
                x = interpolate(
                    x,
                    [height * 2, width * 2],
                    InterpolateOptions::new(InterpolateMode::Nearest),
                );
            }
            let w = codes.clone().slice_dim(1, idx..(idx + 1)).squeeze_dim::<2>(1);
            let noise = randomize_noise.then(|| {
                let [_, _, height, width] = x.dims();
                Tensor::random([batch, 1, height, width], Distribution::Normal(0.0, 1.0), &device)
            });
            x = layer.forward(x, w, noise);
        }

        self.to_rgb.forward(x).tanh()
    }
}
