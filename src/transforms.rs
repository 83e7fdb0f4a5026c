use crate::error::{InferenceError, Result};
use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbImage};

/// Side length every inference transform resizes to.
pub const INFERENCE_SIZE: u32 = 256;

/// Numeric range a transform pipeline maps 8-bit pixels into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueRange {
    /// `[-1, 1]`, the generator's working range.
    Signed,
    /// `[0, 1]`, used by sketch inputs.
    Unit,
}

impl ValueRange {
    fn from_u8(self, value: u8) -> f32 {
        match self {
            ValueRange::Signed => (value as f32 / 127.5) - 1.0,
            ValueRange::Unit => value as f32 / 255.0,
        }
    }

    /// Map a value in this range back to `[0, 1]`, clipping overshoot.
    pub fn to_unit(self, value: f32) -> f32 {
        let unit = match self {
            ValueRange::Signed => (value + 1.0) * 0.5,
            ValueRange::Unit => value,
        };
        unit.clamp(0.0, 1.0)
    }
}

/// CHW float pixels produced by a transform pipeline.
#[derive(Clone, Debug, PartialEq)]
pub struct TensorImage {
    pub data: Vec<f32>,
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

impl TensorImage {
    pub fn shape(&self) -> [usize; 3] {
        [self.channels, self.height, self.width]
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum TransformStep {
    /// Resize to a square side with linear interpolation.
    Resize(u32),
    /// Bicubic downsample by `factor`, then linear upsample back to the current size.
    Degrade { factor: u32 },
    /// Collapse to luma; the pipeline then emits a single channel.
    Grayscale,
}

/// Ordered image transforms ending in a CHW float conversion.
#[derive(Clone, Debug)]
pub struct TransformPipeline {
    steps: Vec<TransformStep>,
    range: ValueRange,
}

impl TransformPipeline {
    pub fn new(range: ValueRange) -> Self {
        Self {
            steps: Vec::new(),
            range,
        }
    }

    pub fn then(mut self, step: TransformStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn range(&self) -> ValueRange {
        self.range
    }

    pub fn steps(&self) -> &[TransformStep] {
        &self.steps
    }

    pub fn channels(&self) -> usize {
        if self.steps.contains(&TransformStep::Grayscale) {
            1
        } else {
            3
        }
    }

    /// Run every step on `image` and convert the result to CHW floats.
    pub fn apply(&self, image: &RgbImage) -> TensorImage {
        let mut current = image.clone();
        for step in &self.steps {
            current = match step {
                TransformStep::Resize(size) => {
                    imageops::resize(&current, *size, *size, FilterType::Triangle)
                }
                TransformStep::Degrade { factor } => degrade(&current, *factor),
                TransformStep::Grayscale => {
                    DynamicImage::ImageLuma8(imageops::grayscale(&current)).to_rgb8()
                }
            };
        }
        image_to_chw(&current, self.channels(), self.range)
    }
}

/// Build the inference transform for a dataset type.
pub fn transforms_for(dataset_type: &str, resize_factor: Option<u32>) -> Result<TransformPipeline> {
    let pipeline = match dataset_type {
        "ffhq_encode" | "ffhq_frontalize" => TransformPipeline::new(ValueRange::Signed)
            .then(TransformStep::Resize(INFERENCE_SIZE)),
        "celebs_super_resolution" => {
            let factor = resize_factor.ok_or_else(|| {
                InferenceError::config(
                    "resize_factors",
                    "celebs_super_resolution needs a downsampling factor",
                )
            })?;
            TransformPipeline::new(ValueRange::Signed)
                .then(TransformStep::Resize(INFERENCE_SIZE))
                .then(TransformStep::Degrade { factor })
        }
        "celebs_sketch_to_face" => TransformPipeline::new(ValueRange::Unit)
            .then(TransformStep::Resize(INFERENCE_SIZE))
            .then(TransformStep::Grayscale),
        other => {
            return Err(InferenceError::config(
                "dataset_type",
                format!("unknown dataset type `{other}`"),
            ))
        }
    };
    Ok(pipeline)
}

fn degrade(image: &RgbImage, factor: u32) -> RgbImage {
    let (width, height) = image.dimensions();
    let factor = factor.max(1);
    let low_w = (width / factor).max(1);
    let low_h = (height / factor).max(1);
    let low = imageops::resize(image, low_w, low_h, FilterType::CatmullRom);
    imageops::resize(&low, width, height, FilterType::Triangle)
}

fn image_to_chw(img: &RgbImage, channels: usize, range: ValueRange) -> TensorImage {
    let (width, height) = img.dimensions();
    let hw = (width * height) as usize;
    let mut data = vec![0.0f32; hw * channels];

    for y in 0..height {
        for x in 0..width {
            let pixel = img.get_pixel(x, y).0;
            let idx = (y * width + x) as usize;
            for c in 0..channels {
                data[c * hw + idx] = range.from_u8(pixel[c]);
            }
        }
    }

    TensorImage {
        data,
        channels,
        height: height as usize,
        width: width as usize,
    }
}
