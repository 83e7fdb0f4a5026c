use crate::error::{self, InferenceError};
use crate::model::{LayerMask, PspConfig};
use crate::transforms::transforms_for;
use burn::config::Config;
use std::path::{Path, PathBuf};

/// Options saved next to the weights when a checkpoint is written.
#[derive(Config, Debug)]
pub struct CheckpointOptions {
    /// Selects the inference transform set.
    pub dataset_type: String,
    pub model: PspConfig,
}

/// Run-time options, as given on the command line.
#[derive(Clone, Debug)]
pub struct RunOptions {
    pub data_path: PathBuf,
    pub exp_dir: PathBuf,
    pub checkpoint_path: PathBuf,
    pub test_batch_size: usize,
    pub test_workers: usize,
    pub n_images: Option<usize>,
    pub resize_factors: Option<String>,
    pub couple_outputs: bool,
    pub resize_outputs: bool,
    pub latent_mask: Option<String>,
    pub mix_alpha: Option<f32>,
    pub seed: Option<u64>,
    /// `dataset_type` replaces the checkpoint's; the architecture fields
    /// must agree with it.
    pub dataset_type: Option<String>,
    pub output_size: Option<usize>,
    pub learn_in_w: Option<bool>,
}

impl RunOptions {
    pub fn new(data_path: impl Into<PathBuf>, exp_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_path: data_path.into(),
            exp_dir: exp_dir.into(),
            checkpoint_path: PathBuf::new(),
            test_batch_size: 2,
            test_workers: 2,
            n_images: None,
            resize_factors: None,
            couple_outputs: false,
            resize_outputs: false,
            latent_mask: None,
            mix_alpha: None,
            seed: None,
            dataset_type: None,
            output_size: None,
            learn_in_w: None,
        }
    }
}

/// Validated settings for one inference run.
#[derive(Clone, Debug)]
pub struct InferenceConfig {
    pub data_path: PathBuf,
    pub exp_dir: PathBuf,
    pub checkpoint_path: PathBuf,
    pub batch_size: usize,
    pub workers: usize,
    /// Stop once this many samples have been processed; checked between batches.
    pub n_images: Option<usize>,
    pub resize_factor: Option<u32>,
    pub couple_outputs: bool,
    pub resize_outputs: bool,
    pub latent_mask: Option<LayerMask>,
    /// Blend strength for injected latents; `None` replaces masked layers outright.
    pub mix_alpha: Option<f32>,
    pub seed: Option<u64>,
    pub dataset_type: String,
    pub model: PspConfig,
}

impl InferenceConfig {
    /// Merge run-time options over checkpoint options and validate the result.
    pub fn resolve(run: RunOptions, mut checkpoint: CheckpointOptions) -> error::Result<Self> {
        if let Some(dataset_type) = run.dataset_type.clone() {
            checkpoint.dataset_type = dataset_type;
        }
        // Architecture fields are fixed by the trained weights.
        if let Some(output_size) = run.output_size {
            if output_size != checkpoint.model.output_size {
                return Err(InferenceError::config(
                    "output_size",
                    format!(
                        "{output_size} does not match the checkpoint's {}",
                        checkpoint.model.output_size
                    ),
                ));
            }
        }
        if let Some(learn_in_w) = run.learn_in_w {
            if learn_in_w != checkpoint.model.learn_in_w {
                return Err(InferenceError::config(
                    "learn_in_w",
                    format!(
                        "{learn_in_w} does not match the checkpoint's {}",
                        checkpoint.model.learn_in_w
                    ),
                ));
            }
        }
        if run.test_batch_size == 0 {
            return Err(InferenceError::config("test_batch_size", "must be at least 1"));
        }
        if let Some(0) = run.n_images {
            return Err(InferenceError::config("n_images", "must be at least 1"));
        }
        let output_size = checkpoint.model.output_size;
        if output_size < 4 || !output_size.is_power_of_two() {
            return Err(InferenceError::config(
                "output_size",
                format!("{output_size} is not a power of two of at least 4"),
            ));
        }
        if let Some(alpha) = run.mix_alpha {
            if !(0.0..=1.0).contains(&alpha) {
                return Err(InferenceError::config(
                    "mix_alpha",
                    format!("{alpha} is outside [0, 1]"),
                ));
            }
        }

        let resize_factor = run
            .resize_factors
            .as_deref()
            .map(parse_resize_factors)
            .transpose()?;
        let transform = transforms_for(&checkpoint.dataset_type, resize_factor)?;
        if transform.channels() != checkpoint.model.input_channels {
            return Err(InferenceError::config(
                "dataset_type",
                format!(
                    "`{}` yields {}-channel inputs but the model expects {}",
                    checkpoint.dataset_type,
                    transform.channels(),
                    checkpoint.model.input_channels
                ),
            ));
        }
        let latent_mask = run.latent_mask.as_deref().map(LayerMask::parse).transpose()?;
        if let Some(mask) = &latent_mask {
            mask.validate(checkpoint.model.n_styles())?;
        }

        Ok(Self {
            data_path: run.data_path,
            exp_dir: run.exp_dir,
            checkpoint_path: run.checkpoint_path,
            batch_size: run.test_batch_size,
            workers: run.test_workers,
            n_images: run.n_images,
            resize_factor,
            couple_outputs: run.couple_outputs,
            resize_outputs: run.resize_outputs,
            latent_mask,
            mix_alpha: run.mix_alpha,
            seed: run.seed,
            dataset_type: checkpoint.dataset_type,
            model: checkpoint.model,
        })
    }

    pub fn results_dir(&self) -> PathBuf {
        self.output_dir("inference_results")
    }

    pub fn coupled_dir(&self) -> PathBuf {
        self.output_dir("inference_coupled")
    }

    pub fn stats_path(&self) -> PathBuf {
        self.exp_dir.join("stats.txt")
    }

    fn output_dir(&self, name: &str) -> PathBuf {
        let dir = self.exp_dir.join(name);
        match self.resize_factor {
            Some(factor) => dir.join(format!("downsampling_{factor}")),
            None => dir,
        }
    }
}

/// Parse `resize_factors`, which must hold exactly one positive integer.
pub fn parse_resize_factors(value: &str) -> error::Result<u32> {
    let factors: Vec<&str> = value.split(',').collect();
    if factors.len() != 1 {
        return Err(InferenceError::config(
            "resize_factors",
            "provide a single downsampling factor when running inference",
        ));
    }
    match factors[0].trim().parse::<u32>() {
        Ok(factor) if factor > 0 => Ok(factor),
        _ => Err(InferenceError::config(
            "resize_factors",
            format!("`{value}` is not a positive integer"),
        )),
    }
}

/// Load `config.json`-style checkpoint options.
pub fn load_checkpoint_options(path: &Path) -> error::Result<CheckpointOptions> {
    if !path.is_file() {
        return Err(InferenceError::NotFound {
            what: "checkpoint options",
            path: path.to_path_buf(),
        });
    }
    CheckpointOptions::load(path)
        .map_err(|err| InferenceError::config("checkpoint_path", format!("{}: {err:?}", path.display())))
}
