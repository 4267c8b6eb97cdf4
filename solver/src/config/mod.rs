mod audio;
mod gan;
mod model;
mod optimizer;

pub use audio::{AudioArgs, AudioConfig, RunMode, ValidationSource};
pub use gan::{ClassifierConfig, GanConfig};
pub use model::{ActivationConfig, NetConfig};
pub use optimizer::OptimizerConfig;
