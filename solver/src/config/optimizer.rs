use machine_learning::optimization::{
    Adam, GradientDescent, GradientDescentWithMomentum, Optimizer,
};
use serde::{Deserialize, Serialize};

use crate::{Result, SolverErr};

/// The optimizer a network is trained with.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerConfig {
    Adam { lr: f32, b1: f32, b2: f32, eps: f32 },
    GradientDescent { lr: f32 },
    GradientDescentWithMomentum { lr: f32, mu: f32 },
}

impl OptimizerConfig {
    /// The `Adam` setup adversarial training usually runs with.
    pub fn adam(lr: f32) -> Self {
        Self::Adam {
            lr,
            b1: 0.5,
            b2: 0.999,
            eps: 1e-8,
        }
    }

    pub fn lr(&self) -> f32 {
        match *self {
            Self::Adam { lr, .. }
            | Self::GradientDescent { lr }
            | Self::GradientDescentWithMomentum { lr, .. } => lr,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let lr = self.lr();
        if !lr.is_finite() || lr < 0.0 {
            return Err(SolverErr::Config(format!(
                "learning rate ({lr}) must be finite and non negative"
            )));
        }

        match *self {
            Self::Adam { b1, b2, eps, .. } => {
                if !(0.0..1.0).contains(&b1) || !(0.0..1.0).contains(&b2) {
                    return Err(SolverErr::Config(format!(
                        "adam betas ({b1}, {b2}) must lie in [0, 1)"
                    )));
                }
                if eps <= 0.0 {
                    return Err(SolverErr::Config("adam eps must be positive".into()));
                }
            }
            Self::GradientDescentWithMomentum { mu, .. } if !(0.0..1.0).contains(&mu) => {
                return Err(SolverErr::Config(format!(
                    "momentum ({mu}) must lie in [0, 1)"
                )));
            }
            _ => {}
        }

        Ok(())
    }

    /// Builds the optimizer for a network with `len` parameters.
    pub fn build(&self, len: usize) -> Box<dyn Optimizer> {
        match *self {
            Self::Adam { lr, b1, b2, eps } => Box::new(Adam::new(len, lr, b1, b2, eps)),
            Self::GradientDescent { lr } => Box::new(GradientDescent::new(lr)),
            Self::GradientDescentWithMomentum { lr, mu } => {
                Box::new(GradientDescentWithMomentum::new(len, lr, mu))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_snake_case() {
        let config: OptimizerConfig =
            serde_json::from_str(r#"{"gradient_descent_with_momentum": {"lr": 0.1, "mu": 0.9}}"#)
                .unwrap();

        assert_eq!(
            config,
            OptimizerConfig::GradientDescentWithMomentum { lr: 0.1, mu: 0.9 }
        );
        assert_eq!(config.build(3).learning_rate(), 0.1);
    }

    #[test]
    fn rejects_bad_hyperparameters() {
        assert!(OptimizerConfig::GradientDescent { lr: -1.0 }.validate().is_err());
        assert!(OptimizerConfig::Adam { lr: 0.1, b1: 1.0, b2: 0.9, eps: 1e-8 }
            .validate()
            .is_err());
        assert!(OptimizerConfig::adam(2e-4).validate().is_ok());
    }
}
