use std::{num::NonZeroUsize, path::Path};

use log::info;
use machine_learning::dataset::{DataLoader, DataLoaders, InMemoryDataset};
use rand::{SeedableRng, rngs::StdRng};

use crate::{Result, SolverErr};

/// Splits a dataset into shuffled training and validation loaders.
///
/// # Arguments
/// * `dataset` - The samples to split.
/// * `validation_split` - The fraction of samples held out for validation.
/// * `batch_size` - The batch size of both loaders.
/// * `rng` - Drives the split and seeds each loader's shuffling.
pub fn split_loaders(
    dataset: &InMemoryDataset,
    validation_split: f32,
    batch_size: NonZeroUsize,
    rng: &mut StdRng,
) -> Result<DataLoaders> {
    let (train, val) = dataset.random_split(1.0 - validation_split, rng)?;

    if train.is_empty() {
        return Err(SolverErr::EmptyLoader { name: "train" });
    }

    info!(
        "{} training and {} validation samples",
        train.len(),
        val.len()
    );

    Ok(DataLoaders {
        train: DataLoader::new(train, batch_size, Some(StdRng::from_rng(rng))),
        val: DataLoader::new(val, batch_size, Some(StdRng::from_rng(rng))),
    })
}

/// Loads a safetensors dataset and splits it, see `split_loaders`.
pub fn load_loaders(
    path: &Path,
    validation_split: f32,
    batch_size: NonZeroUsize,
    rng: &mut StdRng,
) -> Result<DataLoaders> {
    let dataset = InMemoryDataset::from_safetensors(path)?;
    info!("loaded {} samples from {}", dataset.len(), path.display());
    split_loaders(&dataset, validation_split, batch_size, rng)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use machine_learning::checkpoint;
    use ndarray::{ArrayD, IxDyn};

    use super::*;

    fn dataset(len: usize) -> BTreeMap<String, ArrayD<f32>> {
        let xs = ArrayD::from_shape_fn(IxDyn(&[len, 3]), |idx| idx[0] as f32);
        BTreeMap::from([("x".to_string(), xs)])
    }

    #[test]
    fn splits_by_fraction() {
        let ds = InMemoryDataset::new(dataset(10)).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let loaders = split_loaders(&ds, 0.2, NonZeroUsize::new(3).unwrap(), &mut rng).unwrap();

        assert_eq!(loaders.train.dataset().len(), 8);
        assert_eq!(loaders.val.dataset().len(), 2);
        assert_eq!(loaders.train.len(), 3);
    }

    #[test]
    fn loads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.safetensors");
        let data = dataset(5);
        checkpoint::save_tensors(&path, data.iter().map(|(k, v)| (k.clone(), v.view()))).unwrap();

        let mut rng = StdRng::seed_from_u64(0);
        let loaders = load_loaders(&path, 0.4, NonZeroUsize::MIN, &mut rng).unwrap();
        assert_eq!(loaders.train.dataset().len(), 3);
    }

    #[test]
    fn empty_training_split_is_an_error() {
        let ds = InMemoryDataset::new(dataset(0)).unwrap();
        let mut rng = StdRng::seed_from_u64(0);

        assert!(matches!(
            split_loaders(&ds, 0.2, NonZeroUsize::MIN, &mut rng),
            Err(SolverErr::EmptyLoader { .. })
        ));
    }
}
