use std::{fs, path::Path};

use image::{GrayImage, RgbImage};
use machine_learning::MlErr;
use ndarray::{Array3, ArrayView1, ArrayView3, Axis, concatenate, s};

use crate::{Result, SolverErr};

/// A `C x H x W` image.
pub type Image = Array3<f32>;

/// Reshapes a flattened row back into a `C x H x W` image.
pub fn unflatten(row: ArrayView1<f32>, shape: [usize; 3]) -> Result<Image> {
    Ok(row.to_owned().into_shape_with_order(shape)?)
}

/// Undoes a per-channel normalization, `x * std + mean`.
pub fn denormalize(image: &mut Image, mean: &[f32], std: &[f32]) -> Result<()> {
    let channels = image.len_of(Axis(0));

    for (what, values) in [("denormalize mean", mean), ("denormalize std", std)] {
        if values.len() != channels {
            return Err(MlErr::SizeMismatch {
                what,
                got: values.len(),
                expected: channels,
            }
            .into());
        }
    }

    for (c, mut channel) in image.outer_iter_mut().enumerate() {
        channel.mapv_inplace(|x| x * std[c] + mean[c]);
    }

    Ok(())
}

/// Maps values in `[low, high]` onto `[0, 1]`, clamping anything outside.
pub fn rescale(image: &Image, low: f32, high: f32) -> Image {
    let span = (high - low).max(f32::EPSILON);
    image.mapv(|x| ((x - low) / span).clamp(0.0, 1.0))
}

/// Stacks images on top of each other.
pub fn vstack(images: &[Image]) -> Result<Image> {
    stack(images, Axis(1))
}

/// Places images side by side.
pub fn hstack(images: &[Image]) -> Result<Image> {
    stack(images, Axis(2))
}

fn stack(images: &[Image], axis: Axis) -> Result<Image> {
    let views: Vec<ArrayView3<f32>> = images.iter().map(|img| img.view()).collect();
    Ok(concatenate(axis, &views)?)
}

/// Adds `padding` black columns on the right of the image.
pub fn pad_right(image: &Image, padding: usize) -> Image {
    let (c, h, w) = image.dim();
    let mut padded = Image::zeros((c, h, w + padding));
    padded.slice_mut(s![.., .., ..w]).assign(image);
    padded
}

/// Tiles images into a grid of `nrow` images per row, surrounded and separated by `padding`
/// black pixels. Every image must have the same shape.
pub fn make_grid(images: &[Image], nrow: usize, padding: usize) -> Result<Image> {
    let Some(first) = images.first() else {
        return Err(SolverErr::Config("can't make a grid out of no images".into()));
    };

    let (c, h, w) = first.dim();
    let xmaps = nrow.clamp(1, images.len());
    let ymaps = images.len().div_ceil(xmaps);
    let (cell_h, cell_w) = (h + padding, w + padding);

    let mut grid = Image::zeros((c, ymaps * cell_h + padding, xmaps * cell_w + padding));

    for (k, image) in images.iter().enumerate() {
        if image.dim() != (c, h, w) {
            return Err(MlErr::SizeMismatch {
                what: "grid image",
                got: image.len(),
                expected: first.len(),
            }
            .into());
        }

        let (y, x) = (k / xmaps * cell_h + padding, k % xmaps * cell_w + padding);
        grid.slice_mut(s![.., y..y + h, x..x + w]).assign(image);
    }

    Ok(grid)
}

/// Writes a 1 or 3 channel image with values in `[0, 1]` as a PNG file, creating any missing
/// parent directory.
pub fn save_png(image: &Image, path: &Path) -> Result<()> {
    let (c, h, w) = image.dim();
    let to_u8 = |x: f32| (x * 255.0 + 0.5).clamp(0.0, 255.0) as u8;

    // `image` wants interleaved channels.
    let data: Vec<u8> = image
        .view()
        .permuted_axes([1, 2, 0])
        .iter()
        .map(|&x| to_u8(x))
        .collect();

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let too_large = || SolverErr::Config(format!("image of {w}x{h} is too large"));
    let (w, h) = (
        u32::try_from(w).map_err(|_| too_large())?,
        u32::try_from(h).map_err(|_| too_large())?,
    );

    match c {
        1 => GrayImage::from_raw(w, h, data)
            .ok_or_else(too_large)?
            .save(path)?,
        3 => RgbImage::from_raw(w, h, data)
            .ok_or_else(too_large)?
            .save(path)?,
        _ => {
            return Err(SolverErr::Config(format!(
                "can't write an image with {c} channels"
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use ndarray::{Array1, array};

    use super::*;

    #[test]
    fn denormalize_per_channel() {
        let mut image = Array3::from_elem((2, 1, 1), 1.0);
        denormalize(&mut image, &[0.5, 0.0], &[0.5, 2.0]).unwrap();

        assert_eq!(image.into_raw_vec_and_offset().0, [1.0, 2.0]);
    }

    #[test]
    fn denormalize_checks_channels() {
        let mut image = Array3::zeros((3, 1, 1));
        assert!(denormalize(&mut image, &[0.5], &[0.5]).is_err());
    }

    #[test]
    fn rescale_maps_range() {
        let image = array![[[-1.0, 0.0, 1.0, 3.0]]];
        assert_eq!(rescale(&image, -1.0, 1.0), array![[[0.0, 0.5, 1.0, 1.0]]]);
    }

    #[test]
    fn unflatten_keeps_channel_major_order() {
        let row = Array1::from_iter((0..8).map(|i| i as f32));
        let image = unflatten(row.view(), [2, 2, 2]).unwrap();

        assert_eq!(image[[1, 0, 1]], 5.0);
    }

    #[test]
    fn grid_layout() {
        let images: Vec<Image> = (0..3)
            .map(|i| Array3::from_elem((1, 2, 2), i as f32 + 1.))
            .collect();
        let grid = make_grid(&images, 2, 1).unwrap();

        assert_eq!(grid.dim(), (1, 7, 7));
        assert_eq!(grid[[0, 0, 0]], 0.0);
        assert_eq!(grid[[0, 1, 1]], 1.0);
        assert_eq!(grid[[0, 1, 4]], 2.0);
        assert_eq!(grid[[0, 4, 1]], 3.0);
        assert_eq!(grid[[0, 4, 4]], 0.0);
    }

    #[test]
    fn stacking_and_padding() {
        let a = Array3::from_elem((1, 2, 3), 1.0);
        let b = Array3::from_elem((1, 2, 3), 2.0);

        assert_eq!(vstack(&[a.clone(), b.clone()]).unwrap().dim(), (1, 4, 3));

        let strip = hstack(&[pad_right(&a, 30), b]).unwrap();
        assert_eq!(strip.dim(), (1, 2, 36));
        assert_eq!(strip[[0, 0, 10]], 0.0);
        assert_eq!(strip[[0, 0, 35]], 2.0);
    }

    #[test]
    fn writes_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("images").join("sample.png");
        let image = Array3::from_elem((3, 4, 5), 0.5);

        save_png(&image, &path).unwrap();

        let read = image::open(&path).unwrap();
        assert_eq!((read.width(), read.height()), (5, 4));
    }
}
