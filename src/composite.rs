use crate::config::InferenceConfig;
use crate::data::load_image;
use crate::error::{InferenceError, Result};
use crate::model::RESIZED_OUTPUT_SIZE;
use crate::transforms::ValueRange;
use crate::utils::{concat_images_horiz, resize_square, save_image, tensor_to_images, Interpolation};
use burn::prelude::*;
use image::RgbImage;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Every sample whose run index is a multiple of this gets a comparison strip.
pub const COUPLE_EVERY: usize = 100;

/// Destination directories for one run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputDirs {
    pub results: PathBuf,
    pub coupled: PathBuf,
}

impl OutputDirs {
    pub fn for_run(config: &InferenceConfig) -> Self {
        Self {
            results: config.results_dir(),
            coupled: config.coupled_dir(),
        }
    }

    pub fn create(&self) -> Result<()> {
        for dir in [&self.results, &self.coupled] {
            fs::create_dir_all(dir).map_err(|err| InferenceError::io(dir.as_path(), err))?;
        }
        Ok(())
    }
}

/// Files written for one batch.
#[derive(Clone, Debug, Default)]
pub struct BatchArtifacts {
    pub results: Vec<PathBuf>,
    pub coupled: Vec<PathBuf>,
}

/// Turns model outputs into result images and comparison strips.
#[derive(Clone, Debug)]
pub struct Compositor {
    dirs: OutputDirs,
    couple_outputs: bool,
    panel_size: u32,
    resize_factor: Option<u32>,
    input_range: ValueRange,
}

impl Compositor {
    pub fn new(
        dirs: OutputDirs,
        couple_outputs: bool,
        panel_size: u32,
        resize_factor: Option<u32>,
        input_range: ValueRange,
    ) -> Self {
        Self {
            dirs,
            couple_outputs,
            panel_size,
            resize_factor,
            input_range,
        }
    }

    /// Panels follow the resized output size when outputs are pooled, else the
    /// model's native size.
    pub fn from_config(config: &InferenceConfig, input_range: ValueRange) -> Self {
        let panel_size = if config.resize_outputs {
            RESIZED_OUTPUT_SIZE
        } else {
            config.model.output_size
        };
        Self::new(
            OutputDirs::for_run(config),
            config.couple_outputs,
            panel_size as u32,
            config.resize_factor,
            input_range,
        )
    }

    pub fn should_couple(&self, global_index: usize) -> bool {
        self.couple_outputs || global_index % COUPLE_EVERY == 0
    }

    /// Lay out `[source?, echo, result]` as one strip of square panels.
    pub fn comparison(
        &self,
        source: Option<&RgbImage>,
        echo: &RgbImage,
        result: &RgbImage,
    ) -> Result<RgbImage> {
        let size = self.panel_size;
        let mut panels = Vec::with_capacity(3);
        if let Some(source) = source {
            panels.push(resize_square(source, size, Interpolation::Linear));
        }
        panels.push(resize_square(echo, size, Interpolation::Nearest));
        panels.push(resize_square(result, size, Interpolation::Linear));
        concat_images_horiz(&panels)
    }

    /// Write every output of a batch; `start_index` is the run index of the
    /// batch's first sample.
    pub fn write_batch<B: Backend>(
        &self,
        paths: &[PathBuf],
        inputs: Tensor<B, 4>,
        outputs: Tensor<B, 4>,
        start_index: usize,
    ) -> Result<BatchArtifacts> {
        let results = tensor_to_images(outputs, ValueRange::Signed)?;
        if results.len() != paths.len() {
            return Err(InferenceError::Shape(format!(
                "{} outputs for {} inputs",
                results.len(),
                paths.len()
            )));
        }

        let couple: Vec<bool> = (0..paths.len())
            .map(|i| self.should_couple(start_index + i))
            .collect();
        let echoes = if couple.contains(&true) {
            tensor_to_images(inputs, self.input_range)?
        } else {
            Vec::new()
        };

        let mut artifacts = BatchArtifacts::default();
        for (i, (path, result)) in paths.iter().zip(&results).enumerate() {
            let name = file_name(path)?;

            if couple[i] {
                let source = match self.resize_factor {
                    Some(_) => Some(load_image(path)?),
                    None => None,
                };
                let strip = self.comparison(source.as_ref(), &echoes[i], result)?;
                let target = self.dirs.coupled.join(name);
                save_image(&strip, &target)?;
                debug!(index = start_index + i, path = %target.display(), "wrote comparison");
                artifacts.coupled.push(target);
            }

            let target = self.dirs.results.join(name);
            save_image(result, &target)?;
            artifacts.results.push(target);
        }

        Ok(artifacts)
    }
}

fn file_name(path: &Path) -> Result<&std::ffi::OsStr> {
    path.file_name()
        .ok_or_else(|| InferenceError::config("data_path", format!("{} has no file name", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use image::Rgb;

    type TestBackend = NdArray<f32>;

    fn compositor(root: &Path, couple_outputs: bool, resize_factor: Option<u32>) -> Compositor {
        let dirs = OutputDirs {
            results: root.join("results"),
            coupled: root.join("coupled"),
        };
        dirs.create().unwrap();
        Compositor::new(dirs, couple_outputs, 8, resize_factor, ValueRange::Signed)
    }

    fn write_source(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        RgbImage::from_pixel(12, 12, Rgb([10, 200, 30])).save(&path).unwrap();
        path
    }

    #[test]
    fn every_hundredth_sample_is_coupled() {
        let dir = tempfile::tempdir().unwrap();
        let plain = compositor(dir.path(), false, None);
        let coupled = (0..250).filter(|&i| plain.should_couple(i)).collect::<Vec<_>>();
        assert_eq!(coupled, vec![0, 100, 200]);

        let all = compositor(dir.path(), true, None);
        assert_eq!((0..250).filter(|&i| all.should_couple(i)).count(), 250);
    }

    #[test]
    fn strips_have_one_panel_per_image() {
        let dir = tempfile::tempdir().unwrap();
        let comp = compositor(dir.path(), false, None);
        let echo = RgbImage::new(4, 4);
        let result = RgbImage::new(8, 8);
        assert_eq!(comp.comparison(None, &echo, &result).unwrap().dimensions(), (16, 8));
        let source = RgbImage::new(30, 30);
        assert_eq!(
            comp.comparison(Some(&source), &echo, &result).unwrap().dimensions(),
            (24, 8)
        );
    }

    #[test]
    fn write_batch_names_outputs_after_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let inputs_dir = dir.path().join("in");
        fs::create_dir_all(&inputs_dir).unwrap();
        let paths = vec![write_source(&inputs_dir, "a.png"), write_source(&inputs_dir, "b.jpg")];

        let comp = compositor(dir.path(), false, None);
        let device = Default::default();
        let inputs = Tensor::<TestBackend, 4>::zeros([2, 3, 4, 4], &device);
        let outputs = Tensor::<TestBackend, 4>::ones([2, 3, 8, 8], &device);

        let artifacts = comp.write_batch(&paths, inputs.clone(), outputs.clone(), 99).unwrap();
        assert_eq!(
            artifacts.results,
            vec![dir.path().join("results/a.png"), dir.path().join("results/b.jpg")]
        );
        // Index 99 is skipped, index 100 is coupled.
        assert_eq!(artifacts.coupled, vec![dir.path().join("coupled/b.jpg")]);

        let strip = image::open(&artifacts.coupled[0]).unwrap();
        assert_eq!((strip.width(), strip.height()), (16, 8));
        let result = image::open(&artifacts.results[0]).unwrap().to_rgb8();
        assert_eq!(result.get_pixel(0, 0).0, [255, 255, 255]);
    }

    #[test]
    fn downsampled_runs_lead_with_the_source() {
        let dir = tempfile::tempdir().unwrap();
        let paths = vec![write_source(dir.path(), "face.png")];
        let comp = compositor(dir.path(), true, Some(4));
        let device = Default::default();
        let inputs = Tensor::<TestBackend, 4>::zeros([1, 3, 4, 4], &device);
        let outputs = Tensor::<TestBackend, 4>::zeros([1, 3, 8, 8], &device);

        let artifacts = comp.write_batch(&paths, inputs, outputs, 3).unwrap();
        let strip = image::open(&artifacts.coupled[0]).unwrap().to_rgb8();
        assert_eq!(strip.dimensions(), (24, 8));
        assert_eq!(strip.get_pixel(4, 4).0, [10, 200, 30]);
    }

    #[test]
    fn mismatched_batch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let comp = compositor(dir.path(), false, None);
        let device = Default::default();
        let inputs = Tensor::<TestBackend, 4>::zeros([1, 3, 4, 4], &device);
        let outputs = Tensor::<TestBackend, 4>::zeros([1, 3, 8, 8], &device);
        let paths = vec![PathBuf::from("a.png"), PathBuf::from("b.png")];
        assert!(comp.write_batch(&paths, inputs, outputs, 0).is_err());
    }
}
