use crate::error::{InferenceError, Result};
use crate::transforms::{TensorImage, TransformPipeline, INFERENCE_SIZE};
use image::imageops::FilterType;
use image::{ImageReader, RgbImage};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const IMG_EXTENSIONS: [&str; 11] = [
    "jpg", "JPG", "jpeg", "JPEG", "png", "PNG", "ppm", "PPM", "bmp", "BMP", "tiff",
];

/// A decoded RGB image and the file it came from.
#[derive(Debug, Clone)]
pub struct ImageSample {
    pub path: PathBuf,
    pub image: RgbImage,
}

/// A sample after the dataset transform, ready for batching.
#[derive(Debug, Clone)]
pub struct PreparedSample {
    pub path: PathBuf,
    pub image: TensorImage,
}

pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMG_EXTENSIONS.contains(&ext))
        .unwrap_or(false)
}

/// Recursively list image files under `root`, sorted by path.
///
/// The position of a path in this list is its sample index for the whole run.
/// A missing root or a root without any image is an error.
pub fn make_dataset(root: &Path) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        return Err(InferenceError::NotFound {
            what: "data directory",
            path: root.to_path_buf(),
        });
    }

    let pattern = format!(
        "{}/**/*",
        glob::Pattern::escape(&root.to_string_lossy())
    );
    let entries = glob::glob(&pattern)
        .map_err(|err| InferenceError::config("data_path", err.to_string()))?;

    let mut paths = Vec::new();
    for entry in entries {
        let path = entry.map_err(|err| {
            let path = err.path().to_path_buf();
            InferenceError::io(path, err.into_error())
        })?;
        if path.is_file() && is_image_file(&path) {
            paths.push(path);
        }
    }
    paths.sort_by(|a, b| a.as_os_str().cmp(b.as_os_str()));

    if paths.is_empty() {
        return Err(InferenceError::NotFound {
            what: "image files",
            path: root.to_path_buf(),
        });
    }
    debug!(root = %root.display(), count = paths.len(), "enumerated images");
    Ok(paths)
}

/// Decode an image file into RGB.
///
/// The format is sniffed from the file contents; the extension only decides
/// whether a file is enumerated at all.
pub fn load_image(path: &Path) -> Result<RgbImage> {
    let reader = ImageReader::open(path)
        .and_then(|reader| reader.with_guessed_format())
        .map_err(|err| InferenceError::io(path, err))?;
    let img = reader
        .decode()
        .map_err(|source| InferenceError::Decode {
            path: path.to_path_buf(),
            source,
        })?
        .to_rgb8();
    Ok(img)
}

/// Reads images from disk, optionally normalizing them to a square size.
#[derive(Debug, Clone, Copy)]
pub struct SampleLoader {
    target_size: Option<u32>,
}

impl SampleLoader {
    /// Loader that resizes every image to the 256x256 inference size.
    pub fn resizing() -> Self {
        Self {
            target_size: Some(INFERENCE_SIZE),
        }
    }

    /// Loader that keeps the stored resolution.
    pub fn native() -> Self {
        Self { target_size: None }
    }

    pub fn target_size(&self) -> Option<u32> {
        self.target_size
    }

    pub fn load(&self, path: &Path) -> Result<ImageSample> {
        let mut image = load_image(path)?;
        if let Some(size) = self.target_size {
            if image.dimensions() != (size, size) {
                image = image::imageops::resize(&image, size, size, FilterType::Triangle);
            }
        }
        Ok(ImageSample {
            path: path.to_path_buf(),
            image,
        })
    }
}

/// Sorted image files under a root, loaded and transformed on demand.
#[derive(Debug, Clone)]
pub struct InferenceDataset {
    paths: Vec<PathBuf>,
    loader: SampleLoader,
    transform: TransformPipeline,
}

impl InferenceDataset {
    pub fn new(root: &Path, loader: SampleLoader, transform: TransformPipeline) -> Result<Self> {
        let paths = make_dataset(root)?;
        Ok(Self {
            paths,
            loader,
            transform,
        })
    }

    /// The realized path list; index `i` here is sample `i` of the run.
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn load(&self, index: usize) -> Result<ImageSample> {
        let path = self.paths.get(index).ok_or_else(|| InferenceError::NotFound {
            what: "sample index",
            path: PathBuf::from(index.to_string()),
        })?;
        self.loader.load(path)
    }

    /// Load sample `index` and run the transform on it.
    pub fn prepare(&self, index: usize) -> Result<PreparedSample> {
        let sample = self.load(index)?;
        Ok(PreparedSample {
            image: self.transform.apply(&sample.image),
            path: sample.path,
        })
    }
}

/// Generated results paired with their ground-truth images by file name.
#[derive(Debug, Clone)]
pub struct GtResDataset {
    pairs: Vec<(PathBuf, PathBuf)>,
    transform: Option<TransformPipeline>,
}

impl GtResDataset {
    /// Pair every `.jpg`/`.png` in `root` with the same name in `gt_dir`.
    ///
    /// Ground-truth files are always looked up as `.jpg`.
    pub fn new(root: &Path, gt_dir: &Path, transform: Option<TransformPipeline>) -> Result<Self> {
        let entries = fs::read_dir(root).map_err(|err| InferenceError::io(root, err))?;
        let mut pairs = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| InferenceError::io(root, err))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(".jpg") || name.ends_with(".png") {
                let gt_name = name.replace(".png", ".jpg");
                pairs.push((entry.path(), gt_dir.join(gt_name)));
            }
        }
        pairs.sort();
        Ok(Self { pairs, transform })
    }

    pub fn pairs(&self) -> &[(PathBuf, PathBuf)] {
        &self.pairs
    }

    /// Load `(result, ground_truth)` for pair `index`.
    pub fn load(&self, index: usize) -> Result<(TensorImage, TensorImage)> {
        let (from_path, to_path) = self.pairs.get(index).ok_or_else(|| InferenceError::NotFound {
            what: "pair index",
            path: PathBuf::from(index.to_string()),
        })?;
        let from_im = load_image(from_path)?;
        let to_im = load_image(to_path)?;
        let transform = self
            .transform
            .clone()
            .unwrap_or_else(|| TransformPipeline::new(crate::transforms::ValueRange::Unit));
        Ok((transform.apply(&from_im), transform.apply(&to_im)))
    }
}
