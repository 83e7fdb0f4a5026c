use crate::config::CheckpointOptions;
use crate::error::{InferenceError, Result};
use crate::model::{PspConfig, PspNet};
use burn::config::Config;
use burn::prelude::*;
use burn::record::{CompactRecorder, Recorder};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

const OPTIONS_FILE: &str = "config.json";
const WEIGHTS_STEM: &str = "model";
const WEIGHTS_EXTENSION: &str = "mpk";

/// Where a checkpoint's options and weights live.
///
/// `weights` has no extension; the recorder appends it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedCheckpoint {
    pub options_path: PathBuf,
    pub weights: PathBuf,
}

/// Locate `config.json` and the weights for a checkpoint directory.
///
/// Weights are taken from `model.mpk` if present, otherwise from the highest
/// `model-<step>.mpk`. Both the
/// directory itself and a `checkpoint/` subdirectory are searched.
/// A path to a `.mpk` file is used as is, with options read from its directory.
pub fn resolve_checkpoint(path: &Path) -> Result<ResolvedCheckpoint> {
    if path.is_file() {
        if path.extension().map(|ext| ext == WEIGHTS_EXTENSION).unwrap_or(false) {
            let dir = path.parent().unwrap_or_else(|| Path::new("."));
            return Ok(ResolvedCheckpoint {
                options_path: find_options(dir)?,
                weights: path.with_extension(""),
            });
        }
        return Err(InferenceError::config(
            "checkpoint_path",
            format!("{} is not a .{WEIGHTS_EXTENSION} weights file", path.display()),
        ));
    }
    if !path.is_dir() {
        return Err(InferenceError::NotFound {
            what: "checkpoint",
            path: path.to_path_buf(),
        });
    }

    let options_path = find_options(path)?;
    let search_dirs = [path.to_path_buf(), path.join("checkpoint")];

    for dir in &search_dirs {
        let plain = dir.join(WEIGHTS_STEM);
        if plain.with_extension(WEIGHTS_EXTENSION).is_file() {
            return Ok(ResolvedCheckpoint {
                options_path,
                weights: plain,
            });
        }
    }

    let mut best: Option<(usize, PathBuf)> = None;
    for dir in &search_dirs {
        let Ok(entries) = fs::read_dir(dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let entry_path = entry.path();
            if !is_model_checkpoint_file(&entry_path) {
                continue;
            }
            if let Some(step) = checkpoint_step(&entry_path) {
                if best.as_ref().map(|(b, _)| step > *b).unwrap_or(true) {
                    best = Some((step, entry_path));
                }
            }
        }
    }

    match best {
        Some((_, weights)) => Ok(ResolvedCheckpoint {
            options_path,
            weights: weights.with_extension(""),
        }),
        None => Err(InferenceError::NotFound {
            what: "model weights",
            path: path.to_path_buf(),
        }),
    }
}

fn find_options(dir: &Path) -> Result<PathBuf> {
    let options = dir.join(OPTIONS_FILE);
    if options.is_file() {
        return Ok(options);
    }
    // Weights inside `checkpoint/` keep their options one level up.
    if let Some(parent) = dir.parent() {
        let options = parent.join(OPTIONS_FILE);
        if dir.file_name().map(|name| name == "checkpoint").unwrap_or(false) && options.is_file() {
            return Ok(options);
        }
    }
    Err(InferenceError::NotFound {
        what: "checkpoint options",
        path: dir.join(OPTIONS_FILE),
    })
}

fn is_model_checkpoint_file(path: &Path) -> bool {
    if !path.is_file() {
        return false;
    }
    let file_name = path.file_name().map(|s| s.to_string_lossy()).unwrap_or_default();
    file_name.starts_with("model-")
        && path.extension().map(|s| s == WEIGHTS_EXTENSION).unwrap_or(false)
}

fn checkpoint_step(path: &Path) -> Option<usize> {
    let stem = path.file_stem()?.to_string_lossy();
    let step = stem.strip_prefix("model-")?;
    step.parse::<usize>().ok()
}

/// Build a network from `config` and load the resolved weights into it.
pub fn load_model<B: Backend>(
    checkpoint: &ResolvedCheckpoint,
    config: &PspConfig,
    device: &B::Device,
) -> Result<PspNet<B>> {
    let record = CompactRecorder::new()
        .load(checkpoint.weights.clone(), device)
        .map_err(|err| {
            InferenceError::Checkpoint(format!("{}: {err:?}", checkpoint.weights.display()))
        })?;
    info!(weights = %checkpoint.weights.display(), "loaded checkpoint");
    Ok(config.init::<B>(device).load_record(record))
}

/// Write `config.json` and `model.mpk` into `dir`.
pub fn save_checkpoint<B: Backend>(
    dir: &Path,
    options: &CheckpointOptions,
    model: PspNet<B>,
) -> Result<ResolvedCheckpoint> {
    fs::create_dir_all(dir).map_err(|err| InferenceError::io(dir, err))?;
    let options_path = dir.join(OPTIONS_FILE);
    options
        .save(&options_path)
        .map_err(|err| InferenceError::io(options_path.as_path(), err))?;
    let weights = dir.join(WEIGHTS_STEM);
    model
        .save_file(weights.clone(), &CompactRecorder::new())
        .map_err(|err| InferenceError::Checkpoint(format!("{}: {err:?}", weights.display())))?;
    Ok(ResolvedCheckpoint {
        options_path,
        weights,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_checkpoint_options;
    use crate::model::{DecodeOptions, StyleModel};
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"").unwrap();
    }

    #[test]
    fn prefers_plain_model_file() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("config.json"));
        touch(&dir.path().join("model.mpk"));
        touch(&dir.path().join("model-40.mpk"));
        let resolved = resolve_checkpoint(dir.path()).unwrap();
        assert_eq!(resolved.weights, dir.path().join("model"));
        assert_eq!(resolved.options_path, dir.path().join("config.json"));
    }

    #[test]
    fn falls_back_to_highest_step() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("config.json"));
        touch(&dir.path().join("checkpoint/model-9.mpk"));
        touch(&dir.path().join("checkpoint/model-120.mpk"));
        touch(&dir.path().join("checkpoint/optim-500.mpk"));
        let resolved = resolve_checkpoint(dir.path()).unwrap();
        assert_eq!(resolved.weights, dir.path().join("checkpoint/model-120"));
    }

    #[test]
    fn weights_file_path_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("config.json"));
        touch(&dir.path().join("checkpoint/model-3.mpk"));
        let resolved = resolve_checkpoint(&dir.path().join("checkpoint/model-3.mpk")).unwrap();
        assert_eq!(resolved.weights, dir.path().join("checkpoint/model-3"));
        assert_eq!(resolved.options_path, dir.path().join("config.json"));
    }

    #[test]
    fn missing_pieces_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            resolve_checkpoint(&dir.path().join("nope")),
            Err(InferenceError::NotFound { what: "checkpoint", .. })
        ));
        assert!(matches!(
            resolve_checkpoint(dir.path()),
            Err(InferenceError::NotFound { what: "checkpoint options", .. })
        ));
        touch(&dir.path().join("config.json"));
        assert!(matches!(
            resolve_checkpoint(dir.path()),
            Err(InferenceError::NotFound { what: "model weights", .. })
        ));
    }

    #[test]
    fn saved_checkpoint_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let model_config = PspConfig::new()
            .with_output_size(8)
            .with_latent_width(8)
            .with_encoder_dim(4)
            .with_synthesis_dim(4);
        let options = CheckpointOptions::new("ffhq_encode".to_string(), model_config.clone());
        let model = model_config.init::<TestBackend>(&device);
        let inputs = Tensor::<TestBackend, 4>::ones([1, 3, 16, 16], &device);
        let expected = model
            .decode(inputs.clone(), DecodeOptions::plain(false))
            .into_data()
            .to_vec::<f32>()
            .unwrap();

        save_checkpoint(dir.path(), &options, model).unwrap();
        let resolved = resolve_checkpoint(dir.path()).unwrap();
        let loaded_options = load_checkpoint_options(&resolved.options_path).unwrap();
        let loaded = load_model::<TestBackend>(&resolved, &loaded_options.model, &device).unwrap();
        let actual = loaded
            .decode(inputs, DecodeOptions::plain(false))
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        assert_eq!(actual.len(), expected.len());
        // Weights are stored at half precision.
        let mean_diff =
            actual.iter().zip(&expected).map(|(a, e)| (a - e).abs()).sum::<f32>() / actual.len() as f32;
        assert!(mean_diff < 0.1, "mean difference {mean_diff}");
    }
}
