use std::{collections::BTreeMap, path::Path, sync::Arc};

use ndarray::{ArrayD, Axis};
use rand::{Rng, seq::SliceRandom};

use super::Batch;
use crate::{MlErr, Result, checkpoint};

/// A dataset held entirely in memory, made of named channels of equal length.
///
/// Cloning is cheap, clones share the underlying data.
#[derive(Debug, Clone)]
pub struct InMemoryDataset {
    channels: Arc<BTreeMap<String, ArrayD<f32>>>,
    len: usize,
}

impl InMemoryDataset {
    /// Creates a new dataset out of its channels.
    ///
    /// # Errors
    /// Fails if the channels don't all hold the same amount of samples.
    pub fn new(channels: BTreeMap<String, ArrayD<f32>>) -> Result<Self> {
        let len = channels
            .values()
            .next()
            .map_or(0, |values| values.len_of(Axis(0)));

        if let Some(values) = channels.values().find(|v| v.len_of(Axis(0)) != len) {
            return Err(MlErr::SizeMismatch {
                what: "dataset channel length",
                got: values.len_of(Axis(0)),
                expected: len,
            });
        }

        Ok(Self {
            channels: Arc::new(channels),
            len,
        })
    }

    /// Loads a dataset from a safetensors file, every tensor in it becomes a channel.
    pub fn from_safetensors(path: &Path) -> Result<Self> {
        Self::new(checkpoint::load_tensors(path)?)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn channel_names(&self) -> impl Iterator<Item = &str> {
        self.channels.keys().map(String::as_str)
    }

    /// Gathers the samples at `indices` into a batch.
    pub fn select(&self, indices: &[usize]) -> Batch {
        self.channels
            .iter()
            .fold(Batch::new(), |batch, (name, values)| {
                batch.with(name.clone(), values.select(Axis(0), indices))
            })
    }

    /// Randomly splits the dataset in two, the first part holding `fraction` of the samples.
    ///
    /// # Errors
    /// Fails if `fraction` is outside `[0, 1]`.
    pub fn random_split<R: Rng>(&self, fraction: f32, rng: &mut R) -> Result<(Self, Self)> {
        if !(0.0..=1.0).contains(&fraction) {
            return Err(MlErr::InvalidDistribution(format!(
                "split fraction {fraction} is outside [0, 1]"
            )));
        }

        let mut indices: Vec<usize> = (0..self.len).collect();
        indices.shuffle(rng);

        let cut = (self.len as f32 * fraction).round() as usize;
        let (first, second) = indices.split_at(cut);

        Ok((self.subset(first)?, self.subset(second)?))
    }

    fn subset(&self, indices: &[usize]) -> Result<Self> {
        let channels = self
            .channels
            .iter()
            .map(|(name, values)| (name.clone(), values.select(Axis(0), indices)))
            .collect();

        Self::new(channels)
    }
}
