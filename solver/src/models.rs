use log::info;
use machine_learning::{
    arch::{Network, Sequential, activations::ActFn, layers::Layer},
    initialization::RandParamGen,
};
use rand::Rng;

use crate::{Result, SolverErr, config::NetConfig};

/// Builds a feed-forward network `input -> hidden... -> output` with weights drawn from
/// `N(0, init_std)` and zero biases.
///
/// # Arguments
/// * `name` - The network's name.
/// * `input`, `output` - The network's input and output sizes.
/// * `net` - The hidden layers, their activation and the weight initialization.
/// * `output_act` - The activation applied to the last layer, if any.
/// * `rng` - The source the weights are drawn from.
pub fn mlp<R: Rng>(
    name: &str,
    input: usize,
    output: usize,
    net: &NetConfig,
    output_act: Option<ActFn>,
    rng: &mut R,
) -> Result<Network> {
    if input == 0 || output == 0 {
        return Err(SolverErr::Config(format!(
            "{name}: input ({input}) and output ({output}) sizes must be positive"
        )));
    }
    net.validate(name)?;

    let mut dims = Vec::with_capacity(net.hidden.len() + 2);
    dims.push(input);
    dims.extend(&net.hidden);
    dims.push(output);

    let last = dims.len() - 2;
    let layers = dims.windows(2).enumerate().map(|(i, w)| {
        let act_fn = if i == last {
            output_act.clone()
        } else {
            Some(net.activation.into())
        };

        Layer::dense((w[0], w[1]), act_fn)
    });

    let arch = Sequential::new(layers);
    let mut weights = RandParamGen::normal(rng, arch.size(), 0.0, net.init_std)?;
    let params = arch.init_weights(&mut weights)?;

    Ok(Network::new(name, arch, params)?)
}

/// Logs the total and trainable parameter counts of every network.
pub fn log_param_counts<'n>(networks: impl IntoIterator<Item = &'n Network>) {
    for net in networks {
        info!(
            "{}: # params {} (trainable {})",
            net.name(),
            net.size(),
            net.trainable_size()
        );
    }
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::config::ActivationConfig;

    #[test]
    fn builds_the_requested_shape() {
        let mut rng = StdRng::seed_from_u64(0);
        let net = NetConfig::new(vec![8, 4], ActivationConfig::Tanh, 0.02);
        let model = mlp("g", 6, 2, &net, None, &mut rng).unwrap();

        assert_eq!(model.size(), (6 + 1) * 8 + (8 + 1) * 4 + (4 + 1) * 2);
        assert_eq!(model.arch().input_size(), 6);
        assert_eq!(model.arch().output_size(), 2);
        assert!(model.requires_grad());
    }

    #[test]
    fn no_hidden_layers_is_a_single_dense() {
        let mut rng = StdRng::seed_from_u64(0);
        let net = NetConfig::new(vec![], ActivationConfig::Tanh, 0.02);
        let model = mlp("d", 3, 1, &net, Some(ActFn::tanh()), &mut rng).unwrap();

        assert_eq!(model.size(), 4);
    }

    #[test]
    fn zero_sizes_are_rejected() {
        let mut rng = StdRng::seed_from_u64(0);
        let net = NetConfig::new(vec![0], ActivationConfig::Tanh, 0.02);

        assert!(mlp("g", 3, 1, &net, None, &mut rng).is_err());
        assert!(mlp("g", 0, 1, &NetConfig::default(), None, &mut rng).is_err());
    }
}
