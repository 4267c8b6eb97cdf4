use machine_learning::arch::activations::ActFn;
use serde::{Deserialize, Serialize};

use crate::{Result, SolverErr};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationConfig {
    Sigmoid { amp: f32 },
    Tanh,
    LeakyRelu { slope: f32 },
}

impl Default for ActivationConfig {
    fn default() -> Self {
        Self::LeakyRelu { slope: 0.2 }
    }
}

impl From<ActivationConfig> for ActFn {
    fn from(config: ActivationConfig) -> Self {
        match config {
            ActivationConfig::Sigmoid { amp } => ActFn::sigmoid(amp),
            ActivationConfig::Tanh => ActFn::tanh(),
            ActivationConfig::LeakyRelu { slope } => ActFn::leaky_relu(slope),
        }
    }
}

/// The hidden part of a feed-forward network, its input and output sizes are set by whoever
/// builds it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetConfig {
    pub hidden: Vec<usize>,
    pub activation: ActivationConfig,
    /// The standard deviation of the normal distribution the weights are drawn from.
    pub init_std: f32,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            hidden: vec![128],
            activation: ActivationConfig::default(),
            init_std: 0.02,
        }
    }
}

impl NetConfig {
    pub fn new(hidden: Vec<usize>, activation: ActivationConfig, init_std: f32) -> Self {
        Self {
            hidden,
            activation,
            init_std,
        }
    }

    pub fn validate(&self, name: &str) -> Result<()> {
        if let Some(i) = self.hidden.iter().position(|&h| h == 0) {
            return Err(SolverErr::Config(format!(
                "{name}: hidden layer {i} must have at least one unit"
            )));
        }

        if !self.init_std.is_finite() || self.init_std <= 0.0 {
            return Err(SolverErr::Config(format!(
                "{name}: init_std ({}) must be positive",
                self.init_std
            )));
        }

        Ok(())
    }
}
