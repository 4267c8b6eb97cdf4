use std::num::NonZeroUsize;

use rand::{rngs::StdRng, seq::SliceRandom};

use super::{Batch, InMemoryDataset};

/// Splits a dataset into batches, optionally reshuffling the samples on every pass.
#[derive(Debug, Clone)]
pub struct DataLoader {
    dataset: InMemoryDataset,
    batch_size: NonZeroUsize,
    shuffle: Option<StdRng>,
}

impl DataLoader {
    /// Creates a new `DataLoader`.
    ///
    /// # Arguments
    /// * `dataset` - The samples to iterate.
    /// * `batch_size` - The maximum amount of samples per batch.
    /// * `shuffle` - The random source used to reshuffle each pass, `None` keeps the dataset's
    ///   order.
    pub fn new(
        dataset: InMemoryDataset,
        batch_size: NonZeroUsize,
        shuffle: Option<StdRng>,
    ) -> Self {
        Self {
            dataset,
            batch_size,
            shuffle,
        }
    }

    pub fn dataset(&self) -> &InMemoryDataset {
        &self.dataset
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size.get()
    }

    /// Returns the amount of batches in a pass.
    pub fn len(&self) -> usize {
        self.dataset.len().div_ceil(self.batch_size.get())
    }

    pub fn is_empty(&self) -> bool {
        self.dataset.is_empty()
    }

    /// Starts a new pass over the dataset.
    pub fn batches(&mut self) -> Batches {
        let mut order: Vec<usize> = (0..self.dataset.len()).collect();

        if let Some(rng) = &mut self.shuffle {
            order.shuffle(rng);
        }

        Batches {
            dataset: self.dataset.clone(),
            order,
            batch_size: self.batch_size.get(),
            cursor: 0,
        }
    }

    /// Returns the first batch of a new pass, `None` when the dataset is empty.
    pub fn first(&mut self) -> Option<Batch> {
        self.batches().next()
    }
}

/// A single pass over a `DataLoader`'s dataset.
#[derive(Debug)]
pub struct Batches {
    dataset: InMemoryDataset,
    order: Vec<usize>,
    batch_size: usize,
    cursor: usize,
}

impl Iterator for Batches {
    type Item = Batch;

    fn next(&mut self) -> Option<Batch> {
        if self.cursor >= self.order.len() {
            return None;
        }

        let end = (self.cursor + self.batch_size).min(self.order.len());
        let batch = self.dataset.select(&self.order[self.cursor..end]);
        self.cursor = end;

        Some(batch)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = (self.order.len() - self.cursor).div_ceil(self.batch_size);
        (left, Some(left))
    }
}

impl ExactSizeIterator for Batches {}

/// The training and validation loaders of a run.
#[derive(Debug, Clone)]
pub struct DataLoaders {
    pub train: DataLoader,
    pub val: DataLoader,
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use ndarray::{ArrayD, IxDyn};
    use rand::SeedableRng;

    use super::*;

    fn dataset(len: usize) -> InMemoryDataset {
        let xs = ArrayD::from_shape_fn(IxDyn(&[len, 1]), |idx| idx[0] as f32);
        InMemoryDataset::new(BTreeMap::from([("x".to_string(), xs)])).unwrap()
    }

    fn xs(batch: &Batch) -> Vec<f32> {
        batch.channel("x").unwrap().iter().copied().collect()
    }

    #[test]
    fn batches_respect_batch_size() {
        let mut dl = DataLoader::new(dataset(5), NonZeroUsize::new(2).unwrap(), None);
        assert_eq!(dl.len(), 3);

        let batches: Vec<_> = dl.batches().map(|b| xs(&b)).collect();
        assert_eq!(batches, [vec![0., 1.], vec![2., 3.], vec![4.]]);

        let first = dl.first().unwrap();
        assert_eq!(xs(&first), [0., 1.]);
    }

    #[test]
    fn shuffled_passes_cover_the_dataset() {
        let rng = StdRng::seed_from_u64(11);
        let mut dl = DataLoader::new(dataset(6), NonZeroUsize::new(4).unwrap(), Some(rng));

        for _ in 0..3 {
            let mut seen: Vec<f32> = dl.batches().flat_map(|b| xs(&b)).collect();
            seen.sort_by(f32::total_cmp);
            assert_eq!(seen, [0., 1., 2., 3., 4., 5.]);
        }
    }

    #[test]
    fn empty_dataset_has_no_batches() {
        let mut dl = DataLoader::new(dataset(0), NonZeroUsize::MIN, None);

        assert!(dl.is_empty());
        assert_eq!(dl.len(), 0);
        assert!(dl.first().is_none());
    }
}
