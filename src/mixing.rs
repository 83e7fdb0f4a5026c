use crate::config::InferenceConfig;
use crate::error::Result;
use crate::model::{DecodeOptions, LatentInjection, LayerMask, StyleModel};
use burn::prelude::*;
use burn::tensor::TensorData;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use std::marker::PhantomData;
use tracing::debug;

/// How a batch is pushed through the model; fixed for the whole run.
#[derive(Clone, Debug, PartialEq)]
pub enum MixingMode {
    /// One decode call over the entire batch.
    BulkForward,
    /// Each sample gets its own random style injected into `mask` layers.
    PerSampleMixing { mask: LayerMask, alpha: f32 },
}

impl MixingMode {
    /// Masked layers are replaced outright when no alpha is configured.
    pub fn from_config(config: &InferenceConfig) -> Self {
        match &config.latent_mask {
            Some(mask) => MixingMode::PerSampleMixing {
                mask: mask.clone(),
                alpha: config.mix_alpha.unwrap_or(1.0),
            },
            None => MixingMode::BulkForward,
        }
    }
}

/// Owns the model and turns input batches into output batches.
///
/// In [`MixingMode::PerSampleMixing`] every sample draws an independent
/// standard-normal code, so outputs differ between runs unless a seed is set.
pub struct MixingController<B: Backend, M: StyleModel<B>> {
    model: M,
    mode: MixingMode,
    resize_outputs: bool,
    rng: StdRng,
    _backend: PhantomData<B>,
}

impl<B: Backend, M: StyleModel<B>> MixingController<B, M> {
    /// Fails if the mode's mask addresses layers the model does not have.
    pub fn new(model: M, mode: MixingMode, resize_outputs: bool, seed: Option<u64>) -> Result<Self> {
        if let MixingMode::PerSampleMixing { mask, .. } = &mode {
            mask.validate(model.n_styles())?;
        }
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            model,
            mode,
            resize_outputs,
            rng,
            _backend: PhantomData,
        })
    }

    pub fn mode(&self) -> &MixingMode {
        &self.mode
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Run one batch; outputs keep the input order.
    pub fn run_on_batch(&mut self, inputs: Tensor<B, 4>) -> Tensor<B, 4> {
        let Self {
            model,
            mode,
            resize_outputs,
            rng,
            ..
        } = self;

        match mode {
            MixingMode::BulkForward => model.decode(inputs, DecodeOptions::plain(*resize_outputs)),
            MixingMode::PerSampleMixing { mask, alpha } => {
                let batch = inputs.dims()[0];
                let device = inputs.device();
                let mut outputs = Vec::with_capacity(batch);
                for index in 0..batch {
                    let code = sample_code::<B>(rng, model.latent_width(), &device);
                    let injection = LatentInjection {
                        mask: mask.clone(),
                        latent: model.latent_from_code(code),
                        alpha: *alpha,
                    };
                    let sample = inputs.clone().narrow(0, index, 1);
                    let options = DecodeOptions::plain(*resize_outputs).with_injection(injection);
                    outputs.push(model.decode(sample, options));
                }
                debug!(batch, "mixed styles per sample");
                Tensor::cat(outputs, 0)
            }
        }
    }
}

/// Draw a `[1, width]` standard-normal code.
fn sample_code<B: Backend>(rng: &mut StdRng, width: usize, device: &B::Device) -> Tensor<B, 2> {
    let values: Vec<f32> = (0..width).map(|_| rng.sample(StandardNormal)).collect();
    Tensor::from_data(TensorData::new(values, [1, width]), device)
}
