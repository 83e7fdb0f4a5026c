use crate::error::{InferenceError, Result};
use burn::prelude::*;
use burn::tensor::TensorData;

/// Ordered set of per-layer latent indices eligible for override.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LayerMask(Vec<usize>);

impl LayerMask {
    /// Build a mask, dropping repeated indices but keeping first-seen order.
    pub fn new(indices: impl IntoIterator<Item = usize>) -> Self {
        let mut unique = Vec::new();
        for index in indices {
            if !unique.contains(&index) {
                unique.push(index);
            }
        }
        Self(unique)
    }

    /// Parse a comma-separated list such as `"8,9,10"`.
    pub fn parse(value: &str) -> Result<Self> {
        let mut indices = Vec::new();
        for token in value.split(',') {
            let index = token.trim().parse::<usize>().map_err(|_| {
                InferenceError::MalformedLatentMask {
                    value: value.to_string(),
                    token: token.trim().to_string(),
                }
            })?;
            indices.push(index);
        }
        Ok(Self::new(indices))
    }

    pub fn indices(&self) -> &[usize] {
        &self.0
    }

    pub fn contains(&self, index: usize) -> bool {
        self.0.contains(&index)
    }

    /// Check every index addresses one of `n_styles` layers.
    pub fn validate(&self, n_styles: usize) -> Result<()> {
        match self.0.iter().find(|&&index| index >= n_styles) {
            Some(&index) => Err(InferenceError::LatentMaskOutOfRange { index, n_styles }),
            None => Ok(()),
        }
    }
}

/// A per-layer latent to blend into the masked layers of an encoding.
#[derive(Clone, Debug)]
pub struct LatentInjection<B: Backend> {
    pub mask: LayerMask,
    /// `[1 | batch, n_styles, latent_width]`
    pub latent: Tensor<B, 3>,
    pub alpha: f32,
}

/// Blend `injection` into `codes` at the masked layers.
///
/// Masked layer `i` becomes `(1 - alpha) * codes[:, i] + alpha * latent[:, i]`;
/// other layers are left as they are. With `alpha == 0` the codes come back
/// unchanged.
pub fn mix_latents<B: Backend>(codes: Tensor<B, 3>, injection: &LatentInjection<B>) -> Tensor<B, 3> {
    let [batch, n_styles, _] = codes.dims();
    let device = codes.device();

    let weights: Vec<f32> = (0..n_styles)
        .map(|layer| {
            if injection.mask.contains(layer) {
                injection.alpha
            } else {
                0.0
            }
        })
        .collect();
    let inject_weight =
        Tensor::<B, 1>::from_data(TensorData::new(weights, [n_styles]), &device).reshape([1, n_styles, 1]);
    let keep_weight = inject_weight.clone().neg().add_scalar(1.0);

    let mut latent = injection.latent.clone();
    if latent.dims()[0] != batch {
        latent = latent.repeat(&[batch, 1, 1]);
    }

    codes.mul(keep_weight).add(latent.mul(inject_weight))
}
