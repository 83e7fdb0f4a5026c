use crate::batch::BatchSource;
use crate::composite::{Compositor, OutputDirs};
use crate::config::InferenceConfig;
use crate::data::{InferenceDataset, SampleLoader};
use crate::error::Result;
use crate::mixing::{MixingController, MixingMode};
use crate::model::StyleModel;
use crate::stats::RunStats;
use crate::transforms::transforms_for;
use burn::prelude::*;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// What a finished run produced.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunSummary {
    pub batches: usize,
    pub samples: usize,
    /// Trailing samples that did not fill a batch.
    pub dropped: usize,
    pub coupled: usize,
    /// The line written to `stats.txt`, if any batch ran.
    pub report: Option<String>,
}

/// Run inference over every full batch under `config.data_path`.
///
/// All configuration is checked before any output directory is created.
/// Batches are processed one at a time on the calling thread; only the model
/// call of each batch is timed, up to the point the device has finished it.
pub fn run<B: Backend, M: StyleModel<B>>(
    config: &InferenceConfig,
    model: M,
    device: &B::Device,
) -> Result<RunSummary> {
    let transform = transforms_for(&config.dataset_type, config.resize_factor)?;
    let input_range = transform.range();
    let mode = MixingMode::from_config(config);
    let mut controller = MixingController::new(model, mode, config.resize_outputs, config.seed)?;

    let dataset = Arc::new(InferenceDataset::new(
        &config.data_path,
        SampleLoader::resizing(),
        transform,
    )?);
    let dirs = OutputDirs::for_run(config);
    dirs.create()?;
    let compositor = Compositor::from_config(config, input_range);

    let mut source: BatchSource<B> =
        BatchSource::new(dataset.clone(), config.batch_size, config.workers, device.clone());
    info!(
        data = %config.data_path.display(),
        images = dataset.paths().len(),
        batches = source.num_batches(),
        batch_size = config.batch_size,
        mode = ?controller.mode(),
        "starting inference"
    );

    let mut stats = RunStats::new();
    let mut summary = RunSummary {
        dropped: source.dropped(),
        ..RunSummary::default()
    };
    let mut global_index = 0;

    loop {
        if config.n_images.map(|limit| global_index >= limit).unwrap_or(false) {
            info!(processed = global_index, "reached n_images");
            break;
        }
        let Some(batch) = source.next() else {
            break;
        };
        let batch = batch?;
        let count = batch.len();

        let tic = Instant::now();
        let outputs = controller.run_on_batch(batch.inputs.clone());
        // Queued kernels must finish before the timer stops.
        let _ = B::sync(device);
        let elapsed = tic.elapsed();
        stats.record(elapsed);

        let artifacts = compositor.write_batch(&batch.paths, batch.inputs, outputs, global_index)?;
        debug!(
            batch = summary.batches,
            start = global_index,
            secs = elapsed.as_secs_f64(),
            coupled = artifacts.coupled.len(),
            "batch done"
        );

        summary.batches += 1;
        summary.samples += count;
        summary.coupled += artifacts.coupled.len();
        global_index += count;
    }

    summary.report = stats.write_report(&config.stats_path())?;
    info!(
        batches = summary.batches,
        samples = summary.samples,
        dropped = summary.dropped,
        coupled = summary.coupled,
        "inference finished"
    );
    Ok(summary)
}
