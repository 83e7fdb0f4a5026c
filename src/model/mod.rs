pub mod encoder;
pub mod generator;
pub mod latent;
pub mod layers;

use burn::module::Param;
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig};
use burn::prelude::*;
use encoder::{StyleEncoder, StyleEncoderConfig};
use generator::{StyleGenerator, StyleGeneratorConfig};

pub use latent::{mix_latents, LatentInjection, LayerMask};

/// Side length outputs are pooled to when resizing is requested.
pub const RESIZED_OUTPUT_SIZE: usize = 256;

/// What an encoder/generator pair must offer the inference pipeline.
///
/// Implementations are driven from a single thread; callers never overlap
/// calls on one instance.
pub trait StyleModel<B: Backend> {
    /// Length of one latent vector.
    fn latent_width(&self) -> usize;

    /// Number of per-layer latent vectors the generator consumes.
    fn n_styles(&self) -> usize;

    /// Encode `inputs` and render them back to images.
    fn decode(&self, inputs: Tensor<B, 4>, options: DecodeOptions<B>) -> Tensor<B, 4>;

    /// Map raw codes `[batch, latent_width]` to per-layer latents
    /// `[batch, n_styles, latent_width]`.
    fn latent_from_code(&self, code: Tensor<B, 2>) -> Tensor<B, 3>;
}

/// Per-call switches for [`StyleModel::decode`].
#[derive(Clone, Debug)]
pub struct DecodeOptions<B: Backend> {
    pub randomize_noise: bool,
    /// Pool outputs down to 256x256.
    pub resize: bool,
    pub injection: Option<LatentInjection<B>>,
}

impl<B: Backend> DecodeOptions<B> {
    /// Deterministic noise, no injection.
    pub fn plain(resize: bool) -> Self {
        Self {
            randomize_noise: false,
            resize,
            injection: None,
        }
    }

    pub fn with_injection(mut self, injection: LatentInjection<B>) -> Self {
        self.injection = Some(injection);
        self
    }
}

/// Hyperparameters of the encoder/generator pair, stored with each checkpoint.
#[derive(Config, Debug)]
pub struct PspConfig {
    #[config(default = 3)]
    pub input_channels: usize,
    #[config(default = 1024)]
    pub output_size: usize,
    /// Encode a single latent and share it across all layers.
    #[config(default = false)]
    pub learn_in_w: bool,
    #[config(default = true)]
    pub start_from_latent_avg: bool,
    #[config(default = 512)]
    pub latent_width: usize,
    #[config(default = 64)]
    pub encoder_dim: usize,
    #[config(default = 32)]
    pub synthesis_dim: usize,
}

impl PspConfig {
    pub fn generator_config(&self) -> StyleGeneratorConfig {
        StyleGeneratorConfig::new(self.latent_width, self.synthesis_dim, self.output_size)
    }

    pub fn encoder_config(&self) -> StyleEncoderConfig {
        let n_codes = if self.learn_in_w { 1 } else { self.n_styles() };
        StyleEncoderConfig::new(
            self.input_channels,
            self.encoder_dim,
            self.latent_width,
            n_codes,
        )
    }

    /// `2 * log2(output_size) - 2`, e.g. 18 for 1024 and 14 for 256.
    pub fn n_styles(&self) -> usize {
        self.generator_config().n_styles()
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> PspNet<B> {
        let n_styles = self.n_styles();
        PspNet {
            encoder: self.encoder_config().init(device),
            generator: self.generator_config().init(device),
            latent_avg: Param::from_tensor(Tensor::zeros([n_styles, self.latent_width], device)),
            face_pool: AdaptiveAvgPool2dConfig::new([RESIZED_OUTPUT_SIZE, RESIZED_OUTPUT_SIZE]).init(),
            n_styles,
            latent_width: self.latent_width,
            learn_in_w: self.learn_in_w,
            start_from_latent_avg: self.start_from_latent_avg,
        }
    }
}

/// Encoder into the generator's per-layer latent space, plus the generator.
#[derive(Module, Debug)]
pub struct PspNet<B: Backend> {
    encoder: StyleEncoder<B>,
    generator: StyleGenerator<B>,
    latent_avg: Param<Tensor<B, 2>>,
    face_pool: AdaptiveAvgPool2d,
    #[module(ignore)]
    n_styles: usize,
    #[module(ignore)]
    latent_width: usize,
    #[module(ignore)]
    learn_in_w: bool,
    #[module(ignore)]
    start_from_latent_avg: bool,
}

impl<B: Backend> PspNet<B> {
    /// Per-layer latents `[batch, n_styles, latent_width]` for `images`.
    pub fn encode(&self, images: Tensor<B, 4>) -> Tensor<B, 3> {
        let mut codes = self.encoder.forward(images);
        if self.learn_in_w {
            codes = codes.repeat(&[1, self.n_styles, 1]);
        }
        if self.start_from_latent_avg {
            codes = codes.add(self.latent_avg.val().unsqueeze::<3>());
        }
        codes
    }
}

impl<B: Backend> StyleModel<B> for PspNet<B> {
    fn latent_width(&self) -> usize {
        self.latent_width
    }

    fn n_styles(&self) -> usize {
        self.n_styles
    }

    fn decode(&self, inputs: Tensor<B, 4>, options: DecodeOptions<B>) -> Tensor<B, 4> {
        let mut codes = self.encode(inputs);
        if let Some(injection) = &options.injection {
            codes = mix_latents(codes, injection);
        }
        let images = self.generator.synthesize(codes, options.randomize_noise);
        if options.resize {
            self.face_pool.forward(images)
        } else {
            images
        }
    }

    fn latent_from_code(&self, code: Tensor<B, 2>) -> Tensor<B, 3> {
        self.generator
            .map_code(code)
            .unsqueeze_dim::<3>(1)
            .repeat(&[1, self.n_styles, 1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    fn tiny_config() -> PspConfig {
        PspConfig::new()
            .with_output_size(8)
            .with_latent_width(8)
            .with_encoder_dim(4)
            .with_synthesis_dim(4)
    }

    #[test]
    fn style_count_follows_output_size() {
        assert_eq!(PspConfig::new().n_styles(), 18);
        assert_eq!(PspConfig::new().with_output_size(256).n_styles(), 14);
        assert_eq!(tiny_config().n_styles(), 4);
    }

    #[test]
    fn decode_produces_native_resolution_images() {
        let device = Default::default();
        let model = tiny_config().init::<TestBackend>(&device);
        let inputs = Tensor::<TestBackend, 4>::zeros([2, 3, 32, 32], &device);
        let outputs = model.decode(inputs, DecodeOptions::plain(false));
        assert_eq!(outputs.dims(), [2, 3, 8, 8]);
    }

    #[test]
    fn resize_pools_to_256() {
        let device = Default::default();
        let model = tiny_config().init::<TestBackend>(&device);
        let inputs = Tensor::<TestBackend, 4>::zeros([1, 3, 16, 16], &device);
        let outputs = model.decode(inputs, DecodeOptions::plain(true));
        assert_eq!(outputs.dims(), [1, 3, 256, 256]);
    }

    #[test]
    fn learn_in_w_shares_one_code_across_layers() {
        let device = Default::default();
        let model = tiny_config().with_learn_in_w(true).init::<TestBackend>(&device);
        let inputs = Tensor::<TestBackend, 4>::ones([1, 3, 16, 16], &device);
        let codes = model.encode(inputs);
        assert_eq!(codes.dims(), [1, 4, 8]);
        let first = codes.clone().slice_dim(1, 0..1).into_data().to_vec::<f32>().unwrap();
        let last = codes.slice_dim(1, 3..4).into_data().to_vec::<f32>().unwrap();
        assert_eq!(first, last);
    }

    #[test]
    fn latent_from_code_covers_every_layer() {
        let device = Default::default();
        let model = tiny_config().init::<TestBackend>(&device);
        let code = Tensor::<TestBackend, 2>::ones([1, 8], &device);
        assert_eq!(model.latent_from_code(code).dims(), [1, 4, 8]);
    }
}
