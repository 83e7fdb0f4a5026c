#![recursion_limit = "256"]
use anyhow::{Context, Result};
use clap::Parser;
use psp_burn::checkpoint::{load_model, resolve_checkpoint};
use psp_burn::config::{load_checkpoint_options, InferenceConfig, RunOptions};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[cfg(feature = "cuda")]
type Backend = burn::backend::Cuda<f32, i32>;
#[cfg(not(feature = "cuda"))]
type Backend = burn::backend::NdArray<f32>;

#[derive(Parser, Debug)]
#[command(about = "Batched pSp inference with optional style mixing")]
struct Args {
    /// Directory of input images, searched recursively.
    #[arg(long)]
    data_path: PathBuf,
    /// Results, comparison strips and stats.txt are written here.
    #[arg(long)]
    exp_dir: PathBuf,
    /// Checkpoint directory (config.json + weights) or a .mpk weights file.
    #[arg(long)]
    checkpoint_path: PathBuf,
    #[arg(long, default_value_t = 2)]
    test_batch_size: usize,
    /// Background loader threads; 0 loads on the main thread.
    #[arg(long, default_value_t = 2)]
    test_workers: usize,
    /// Stop after this many images (rounded up to a whole batch).
    #[arg(long)]
    n_images: Option<usize>,
    /// Downsampling factor for super-resolution checkpoints.
    #[arg(long)]
    resize_factors: Option<String>,
    /// Write a comparison strip for every image, not just every 100th.
    #[arg(long, default_value_t = false)]
    couple_outputs: bool,
    /// Pool outputs to 256x256.
    #[arg(long, default_value_t = false)]
    resize_outputs: bool,
    /// Comma-separated latent layers to mix, e.g. "8,9,10".
    #[arg(long)]
    latent_mask: Option<String>,
    /// Blend strength for mixed layers, in [0, 1].
    #[arg(long)]
    mix_alpha: Option<f32>,
    /// Seed for style-mixing codes.
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long)]
    dataset_type: Option<String>,
    /// Checked against the checkpoint; a mismatch is rejected.
    #[arg(long)]
    output_size: Option<usize>,
    /// Checked against the checkpoint; a mismatch is rejected.
    #[arg(long)]
    learn_in_w: Option<bool>,
}

impl Args {
    fn into_run_options(self) -> RunOptions {
        RunOptions {
            data_path: self.data_path,
            exp_dir: self.exp_dir,
            checkpoint_path: self.checkpoint_path,
            test_batch_size: self.test_batch_size,
            test_workers: self.test_workers,
            n_images: self.n_images,
            resize_factors: self.resize_factors,
            couple_outputs: self.couple_outputs,
            resize_outputs: self.resize_outputs,
            latent_mask: self.latent_mask,
            mix_alpha: self.mix_alpha,
            seed: self.seed,
            dataset_type: self.dataset_type,
            output_size: self.output_size,
            learn_in_w: self.learn_in_w,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let run_options = Args::parse().into_run_options();
    let device = Default::default();

    let checkpoint = resolve_checkpoint(&run_options.checkpoint_path)
        .context("failed to resolve checkpoint")?;
    let checkpoint_options = load_checkpoint_options(&checkpoint.options_path)
        .context("failed to load checkpoint options")?;
    let config = InferenceConfig::resolve(run_options, checkpoint_options)
        .context("invalid inference options")?;
    info!(
        checkpoint = %checkpoint.weights.display(),
        dataset_type = %config.dataset_type,
        output_size = config.model.output_size,
        "loaded options"
    );

    let model = load_model::<Backend>(&checkpoint, &config.model, &device)
        .context("failed to load model weights")?;
    let summary = psp_burn::run::<Backend, _>(&config, model, &device).context("inference failed")?;

    info!(
        results = %config.results_dir().display(),
        samples = summary.samples,
        "done"
    );
    Ok(())
}
