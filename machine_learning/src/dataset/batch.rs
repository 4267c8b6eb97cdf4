use std::collections::BTreeMap;

use ndarray::{Array2, ArrayD, ArrayViewD, Axis};

use crate::{MlErr, Result};

/// A batch of samples split into named channels, every channel's first axis indexes the
/// samples.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    channels: BTreeMap<String, ArrayD<f32>>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a channel to the batch, replacing any previous channel with the same name.
    pub fn insert(&mut self, name: impl Into<String>, values: ArrayD<f32>) {
        self.channels.insert(name.into(), values);
    }

    /// Builder flavour of `insert`.
    pub fn with(mut self, name: impl Into<String>, values: ArrayD<f32>) -> Self {
        self.insert(name, values);
        self
    }

    /// Returns the amount of samples in the batch.
    pub fn len(&self) -> usize {
        self.channels
            .values()
            .next()
            .map_or(0, |values| values.len_of(Axis(0)))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.channels.keys().map(String::as_str)
    }

    pub fn channel(&self, name: &str) -> Result<ArrayViewD<'_, f32>> {
        self.channels
            .get(name)
            .map(|values| values.view())
            .ok_or_else(|| MlErr::MissingChannel {
                name: name.to_string(),
            })
    }

    /// Returns the shape of a single sample of the given channel.
    pub fn sample_shape(&self, name: &str) -> Result<Vec<usize>> {
        Ok(self.channel(name)?.shape()[1..].to_vec())
    }

    /// Returns the given channel with every sample flattened into a row.
    pub fn flat(&self, name: &str) -> Result<Array2<f32>> {
        let values = self.channel(name)?;
        let n = values.len_of(Axis(0));
        let rest: usize = values.shape()[1..].iter().product();

        let flat = values
            .as_standard_layout()
            .into_owned()
            .into_shape_with_order((n, rest))?;

        Ok(flat)
    }
}
