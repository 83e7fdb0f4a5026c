use std::path::PathBuf;
use thiserror::Error;

/// Failures surfaced by the inference pipeline.
///
/// Configuration problems are raised before the first batch is loaded; the
/// remaining variants abort the run where they occur.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("invalid option `{option}`: {reason}")]
    Config { option: &'static str, reason: String },
    #[error("malformed latent_mask `{value}`: token `{token}` is not a layer index")]
    MalformedLatentMask { value: String, token: String },
    #[error("latent_mask index {index} is out of range for a model with {n_styles} styles")]
    LatentMaskOutOfRange { index: usize, n_styles: usize },
    #[error("{what} not found: {}", path.display())]
    NotFound { what: &'static str, path: PathBuf },
    #[error("failed to decode image {}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to write {}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("i/o error on {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to load checkpoint: {0}")]
    Checkpoint(String),
    #[error("failed to read tensor data: {0}")]
    Tensor(String),
    #[error("image shape mismatch: {0}")]
    Shape(String),
    #[error("loader worker {0} stopped before delivering its batch")]
    WorkerDisconnected(usize),
}

impl InferenceError {
    pub(crate) fn config(option: &'static str, reason: impl Into<String>) -> Self {
        Self::Config {
            option,
            reason: reason.into(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, InferenceError>;
