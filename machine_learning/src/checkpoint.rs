use std::{collections::BTreeMap, fs, path::Path};

use log::debug;
use ndarray::{ArrayD, ArrayViewD, IxDyn};
use safetensors::{
    SafeTensors,
    tensor::{Dtype, TensorView},
};

use crate::{MlErr, Result, arch::Network};

/// Writes the given named `f32` tensors into a safetensors file, creating any missing parent
/// directory.
///
/// # Arguments
/// * `path` - Where to write the file.
/// * `tensors` - The tensors to store, keyed by name.
pub fn save_tensors<'a, I>(path: &Path, tensors: I) -> Result<()>
where
    I: IntoIterator<Item = (String, ArrayViewD<'a, f32>)>,
{
    let tensors: Vec<_> = tensors
        .into_iter()
        .map(|(name, view)| {
            let shape = view.shape().to_vec();
            let data: Vec<f32> = view.iter().copied().collect();
            (name, shape, data)
        })
        .collect();

    let mut views = BTreeMap::new();
    for (name, shape, data) in &tensors {
        let view = TensorView::new(Dtype::F32, shape.clone(), bytemuck::cast_slice(data))?;
        views.insert(name.clone(), view);
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let bytes = safetensors::serialize(&views, &None)?;
    fs::write(path, bytes)?;

    debug!("saved {} tensors to {}", views.len(), path.display());
    Ok(())
}

/// Reads every tensor stored in a safetensors file.
///
/// # Errors
/// Fails on io errors, malformed files or tensors not stored as `f32`.
pub fn load_tensors(path: &Path) -> Result<BTreeMap<String, ArrayD<f32>>> {
    let data = fs::read(path)?;
    let tensors = SafeTensors::deserialize(&data)?;

    let mut out = BTreeMap::new();
    for (name, view) in tensors.tensors() {
        if view.dtype() != Dtype::F32 {
            return Err(MlErr::UnsupportedDtype { name });
        }

        // The file's bytes carry no alignment guarantee.
        let values: Vec<f32> = bytemuck::pod_collect_to_vec(view.data());
        let array = ArrayD::from_shape_vec(IxDyn(view.shape()), values)?;
        out.insert(name, array);
    }

    Ok(out)
}

/// Reads a single named tensor out of a safetensors file.
pub fn load_tensor(path: &Path, name: &str) -> Result<ArrayD<f32>> {
    load_tensors(path)?
        .remove(name)
        .ok_or_else(|| MlErr::MissingTensor {
            name: name.to_string(),
        })
}

impl Network {
    /// Stores the network's parameters, one tensor per parameter block.
    pub fn save(&self, path: &Path) -> Result<()> {
        let params = self.params();
        let blocks = self.arch().param_blocks();

        let mut tensors = Vec::with_capacity(blocks.len());
        for block in blocks {
            let data = &params[block.offset..block.offset + block.len];
            let view = ArrayViewD::from_shape(IxDyn(&block.shape), data)?;
            tensors.push((block.name, view));
        }

        save_tensors(path, tensors)
    }

    /// Replaces the network's parameters with the ones stored at `path`.
    ///
    /// # Errors
    /// Fails if a parameter block is missing from the file or has a different shape. The
    /// network is left untouched on failure.
    pub fn load(&mut self, path: &Path) -> Result<()> {
        let mut tensors = load_tensors(path)?;
        let mut params = Vec::with_capacity(self.size());

        for block in self.arch().param_blocks() {
            let tensor = tensors
                .remove(&block.name)
                .ok_or_else(|| MlErr::MissingTensor {
                    name: block.name.clone(),
                })?;

            if tensor.shape() != block.shape.as_slice() {
                return Err(MlErr::SizeMismatch {
                    what: "checkpoint tensor",
                    got: tensor.len(),
                    expected: block.len,
                });
            }

            params.extend(tensor.iter().copied());
        }

        self.set_params(params)?;
        debug!(name = self.name(); "loaded network from {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::{
        arch::{Sequential, activations::ActFn, layers::Layer},
        initialization::RandParamGen,
    };

    fn network(seed: u64) -> Network {
        let arch = Sequential::new([
            Layer::dense((3, 4), Some(ActFn::leaky_relu(0.2))),
            Layer::dense((4, 2), None),
        ]);
        let mut rng = StdRng::seed_from_u64(seed);
        let mut weights = RandParamGen::normal(&mut rng, arch.size(), 0., 1.).unwrap();
        let params = arch.init_weights(&mut weights).unwrap();

        Network::new("net", arch, params).unwrap()
    }

    #[test]
    fn network_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("net.safetensors");

        let original = network(1);
        original.save(&path).unwrap();

        let mut restored = network(2);
        assert_ne!(restored.params(), original.params());

        restored.load(&path).unwrap();
        assert_eq!(restored.params(), original.params());
    }

    #[test]
    fn load_rejects_other_architectures() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("net.safetensors");
        network(1).save(&path).unwrap();

        let arch = Sequential::new([Layer::dense((3, 5), None), Layer::dense((5, 2), None)]);
        let size = arch.size();
        let mut other = Network::new("other", arch, vec![0.0; size]).unwrap();

        assert!(matches!(
            other.load(&path),
            Err(MlErr::SizeMismatch { .. })
        ));
        assert!(other.params().iter().all(|&p| p == 0.0));
    }

    #[test]
    fn missing_tensor_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latent.safetensors");
        let latent = ArrayD::from_elem(IxDyn(&[1, 4]), 0.5f32);
        save_tensors(&path, [("latent".to_string(), latent.view())]).unwrap();

        assert_eq!(load_tensor(&path, "latent").unwrap(), latent);
        assert!(matches!(
            load_tensor(&path, "audio"),
            Err(MlErr::MissingTensor { .. })
        ));
    }
}
