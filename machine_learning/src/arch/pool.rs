use ndarray::{Array2, ArrayView2};

use crate::{MlErr, Result};

/// Average pooling over non-overlapping `factor x factor` windows of a batch of images.
///
/// Images travel flattened, one per row, in `C x H x W` order.
#[derive(Clone, Debug)]
pub struct AvgPool2d {
    channels: usize,
    size: (usize, usize),
    factor: usize,
}

impl AvgPool2d {
    /// Creates a new `AvgPool2d`.
    ///
    /// # Arguments
    /// * `channels` - The amount of channels of each image.
    /// * `size` - The input height and width.
    /// * `factor` - The downsampling factor, must divide both sides of the input.
    pub fn new(channels: usize, size: (usize, usize), factor: usize) -> Result<Self> {
        let (h, w) = size;

        for side in [h, w] {
            if factor == 0 || side % factor != 0 {
                return Err(MlErr::NotDivisible {
                    size: side,
                    target: factor,
                });
            }
        }

        Ok(Self {
            channels,
            size,
            factor,
        })
    }

    /// Builds the pooling that takes square images of side `from` down to side `to`.
    pub fn resize(channels: usize, from: usize, to: usize) -> Result<Self> {
        if to == 0 || from % to != 0 {
            return Err(MlErr::NotDivisible {
                size: from,
                target: to,
            });
        }

        Self::new(channels, (from, from), from / to)
    }

    pub fn input_len(&self) -> usize {
        self.channels * self.size.0 * self.size.1
    }

    pub fn output_size(&self) -> (usize, usize) {
        (self.size.0 / self.factor, self.size.1 / self.factor)
    }

    pub fn output_len(&self) -> usize {
        let (oh, ow) = self.output_size();
        self.channels * oh * ow
    }

    /// Downsamples every row of `x`.
    pub fn forward(&self, x: ArrayView2<f32>) -> Result<Array2<f32>> {
        self.check_cols("pooling input", x.ncols(), self.input_len())?;

        let (h, w) = self.size;
        let (oh, ow) = self.output_size();
        let f = self.factor;
        let area = (f * f) as f32;
        let mut y = Array2::zeros((x.nrows(), self.output_len()));

        for (row, mut out) in x.outer_iter().zip(y.outer_iter_mut()) {
            for c in 0..self.channels {
                for i in 0..h {
                    for j in 0..w {
                        out[c * oh * ow + (i / f) * ow + j / f] += row[c * h * w + i * w + j];
                    }
                }
            }
        }

        y /= area;
        Ok(y)
    }

    /// Spreads the downstream derivative `d` evenly over each pooling window.
    pub fn backward(&self, d: ArrayView2<f32>) -> Result<Array2<f32>> {
        self.check_cols("pooling delta", d.ncols(), self.output_len())?;

        let (h, w) = self.size;
        let (oh, ow) = self.output_size();
        let f = self.factor;
        let area = (f * f) as f32;
        let mut dx = Array2::zeros((d.nrows(), self.input_len()));

        for (row, mut out) in d.outer_iter().zip(dx.outer_iter_mut()) {
            for c in 0..self.channels {
                for i in 0..h {
                    for j in 0..w {
                        out[c * h * w + i * w + j] = row[c * oh * ow + (i / f) * ow + j / f] / area;
                    }
                }
            }
        }

        Ok(dx)
    }

    fn check_cols(&self, what: &'static str, got: usize, expected: usize) -> Result<()> {
        if got != expected {
            return Err(MlErr::SizeMismatch { what, got, expected });
        }

        Ok(())
    }
}
