use crate::error::{InferenceError, Result};
use crate::transforms::ValueRange;
use burn::prelude::*;
use image::imageops::FilterType;
use image::{GenericImage, Rgb, RgbImage};
use std::path::Path;

/// Interpolation kernels used when sizing comparison panels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Interpolation {
    Linear,
    Nearest,
}

impl Interpolation {
    fn filter(self) -> FilterType {
        match self {
            Interpolation::Linear => FilterType::Triangle,
            Interpolation::Nearest => FilterType::Nearest,
        }
    }
}

/// Convert a BCHW tensor in `range` to 8-bit RGB images.
///
/// Single-channel tensors are replicated across R, G and B.
pub fn tensor_to_images<B: Backend>(tensor: Tensor<B, 4>, range: ValueRange) -> Result<Vec<RgbImage>> {
    let [batch, channels, height, width] = tensor.dims();
    if channels != 1 && channels != 3 {
        return Err(InferenceError::Shape(format!(
            "expected 1 or 3 channels for images, got {channels}"
        )));
    }

    let values = tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|err| InferenceError::Tensor(format!("{err:?}")))?;
    let hw = height * width;
    let mut images = Vec::with_capacity(batch);

    for b in 0..batch {
        let base = b * channels * hw;
        let plane = |c: usize, idx: usize| {
            let offset = if channels == 1 { 0 } else { c * hw };
            (range.to_unit(values[base + offset + idx]) * 255.0) as u8
        };
        let mut img = RgbImage::new(width as u32, height as u32);
        for y in 0..height {
            for x in 0..width {
                let idx = y * width + x;
                img.put_pixel(
                    x as u32,
                    y as u32,
                    Rgb([plane(0, idx), plane(1, idx), plane(2, idx)]),
                );
            }
        }
        images.push(img);
    }

    Ok(images)
}

/// Resize to a `size` x `size` square.
pub fn resize_square(img: &RgbImage, size: u32, interpolation: Interpolation) -> RgbImage {
    if img.dimensions() == (size, size) {
        return img.clone();
    }
    image::imageops::resize(img, size, size, interpolation.filter())
}

/// Concatenate equal-height images left to right.
pub fn concat_images_horiz(images: &[RgbImage]) -> Result<RgbImage> {
    let first = images
        .first()
        .ok_or_else(|| InferenceError::Shape("no images to concatenate".to_string()))?;
    let height = first.height();
    if let Some(odd) = images.iter().find(|img| img.height() != height) {
        return Err(InferenceError::Shape(format!(
            "panel heights differ: {} vs {}",
            height,
            odd.height()
        )));
    }
    let total_width: u32 = images.iter().map(|img| img.width()).sum();
    let mut out = RgbImage::new(total_width, height);

    let mut offset_x = 0;
    for img in images {
        out.copy_from(img, offset_x, 0)
            .map_err(|err| InferenceError::Shape(err.to_string()))?;
        offset_x += img.width();
    }

    Ok(out)
}

/// Encode `img` to `path`, picking the format from the extension.
pub fn save_image(img: &RgbImage, path: &Path) -> Result<()> {
    img.save(path).map_err(|source| InferenceError::Write {
        path: path.to_path_buf(),
        source,
    })
}
