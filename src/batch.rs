use crate::data::{InferenceDataset, PreparedSample};
use crate::error::{InferenceError, Result};
use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;
use burn::tensor::TensorData;
use std::path::PathBuf;
use std::sync::mpsc::{sync_channel, Receiver};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::debug;

/// Batches each loader worker may run ahead of the consumer.
const PREFETCH_DEPTH: usize = 2;

/// A full-size batch of transformed inputs and the files they came from.
#[derive(Clone, Debug)]
pub struct InferenceBatch<B: Backend> {
    pub inputs: Tensor<B, 4>,
    pub paths: Vec<PathBuf>,
}

impl<B: Backend> InferenceBatch<B> {
    pub fn len(&self) -> usize {
        self.paths.len()
    }
}

/// Stacks prepared samples into a BCHW tensor.
#[derive(Clone, Debug, Default)]
pub struct InferenceBatcher;

impl<B: Backend> Batcher<B, PreparedSample, InferenceBatch<B>> for InferenceBatcher {
    fn batch(&self, items: Vec<PreparedSample>, device: &B::Device) -> InferenceBatch<B> {
        let batch_size = items.len();
        let [channels, height, width] = items
            .first()
            .map(|item| item.image.shape())
            .unwrap_or([3, 0, 0]);
        let mut data = Vec::with_capacity(batch_size * channels * height * width);
        let mut paths = Vec::with_capacity(batch_size);

        for item in items {
            data.extend_from_slice(&item.image.data);
            paths.push(item.path);
        }

        let inputs = Tensor::<B, 4>::from_data(
            TensorData::new(data, [batch_size, channels, height, width]),
            device,
        );
        InferenceBatch { inputs, paths }
    }
}

/// Iterates a dataset in fixed-size batches, in enumeration order.
///
/// A trailing group shorter than `batch_size` is never yielded. With
/// `workers > 0`, loading and transforms run on background threads that stay
/// at most `PREFETCH_DEPTH` batches ahead; batches still arrive in order.
pub struct BatchSource<B: Backend> {
    dataset: Arc<InferenceDataset>,
    batch_size: usize,
    num_batches: usize,
    next_batch: usize,
    batcher: InferenceBatcher,
    device: B::Device,
    prefetch: Option<Prefetcher>,
}

impl<B: Backend> BatchSource<B> {
    pub fn new(
        dataset: Arc<InferenceDataset>,
        batch_size: usize,
        workers: usize,
        device: B::Device,
    ) -> Self {
        let num_batches = dataset.paths().len().checked_div(batch_size).unwrap_or(0);
        let prefetch = (workers > 0 && num_batches > 0)
            .then(|| Prefetcher::spawn(dataset.clone(), batch_size, num_batches, workers));
        Self {
            dataset,
            batch_size,
            num_batches,
            next_batch: 0,
            batcher: InferenceBatcher,
            device,
            prefetch,
        }
    }

    pub fn num_batches(&self) -> usize {
        self.num_batches
    }

    /// Samples left over after the last full batch.
    pub fn dropped(&self) -> usize {
        self.dataset.paths().len() - self.num_batches * self.batch_size
    }
}

impl<B: Backend> Iterator for BatchSource<B> {
    type Item = Result<InferenceBatch<B>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_batch >= self.num_batches {
            return None;
        }
        let batch_idx = self.next_batch;
        self.next_batch += 1;

        let samples = match &self.prefetch {
            Some(prefetch) => prefetch.recv(batch_idx),
            None => load_group(&self.dataset, batch_idx, self.batch_size),
        };
        match samples {
            Ok(samples) => {
                debug!(batch = batch_idx, size = samples.len(), "batch ready");
                Some(Ok(self.batcher.batch(samples, &self.device)))
            }
            Err(err) => {
                self.next_batch = self.num_batches;
                Some(Err(err))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.num_batches - self.next_batch;
        (remaining, Some(remaining))
    }
}

/// Load and transform the samples of batch `batch_idx`.
fn load_group(
    dataset: &InferenceDataset,
    batch_idx: usize,
    batch_size: usize,
) -> Result<Vec<PreparedSample>> {
    let start = batch_idx * batch_size;
    let mut samples: Vec<PreparedSample> = Vec::with_capacity(batch_size);
    for index in start..start + batch_size {
        let sample = dataset.prepare(index)?;
        if let Some(first) = samples.first() {
            if first.image.shape() != sample.image.shape() {
                return Err(InferenceError::Shape(format!(
                    "{} is {:?} but {} is {:?}",
                    sample.path.display(),
                    sample.image.shape(),
                    first.path.display(),
                    first.image.shape()
                )));
            }
        }
        samples.push(sample);
    }
    Ok(samples)
}

/// Loader threads; worker `w` owns batches `w, w + workers, ...`.
struct Prefetcher {
    receivers: Vec<Receiver<Result<Vec<PreparedSample>>>>,
    handles: Vec<JoinHandle<()>>,
}

impl Prefetcher {
    fn spawn(
        dataset: Arc<InferenceDataset>,
        batch_size: usize,
        num_batches: usize,
        workers: usize,
    ) -> Self {
        let workers = workers.min(num_batches);
        let mut receivers = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);

        for worker in 0..workers {
            let (tx, rx) = sync_channel(PREFETCH_DEPTH);
            let dataset = dataset.clone();
            let handle = std::thread::spawn(move || {
                for batch_idx in (worker..num_batches).step_by(workers) {
                    let group = load_group(&dataset, batch_idx, batch_size);
                    let failed = group.is_err();
                    // A closed channel means the consumer stopped early.
                    if tx.send(group).is_err() || failed {
                        break;
                    }
                }
            });
            receivers.push(rx);
            handles.push(handle);
        }

        Self { receivers, handles }
    }

    fn recv(&self, batch_idx: usize) -> Result<Vec<PreparedSample>> {
        let worker = batch_idx % self.receivers.len();
        self.receivers[worker]
            .recv()
            .map_err(|_| InferenceError::WorkerDisconnected(worker))?
    }
}

impl Drop for Prefetcher {
    fn drop(&mut self) {
        self.receivers.clear();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}
