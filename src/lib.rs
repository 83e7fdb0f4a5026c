//! Batched inference for pSp-style image-to-image models.
//!
//! Images under a data root are enumerated in sorted order, transformed and
//! batched, pushed through a [`model::StyleModel`] (optionally with per-sample
//! style mixing), and written out as results plus side-by-side comparison
//! strips. Per-batch model time is summarized in `stats.txt`.

pub mod batch;
pub mod checkpoint;
pub mod composite;
pub mod config;
pub mod data;
pub mod error;
pub mod inference;
pub mod mixing;
pub mod model;
pub mod stats;
pub mod transforms;
pub mod utils;

pub use error::{InferenceError, Result};
pub use inference::{run, RunSummary};
