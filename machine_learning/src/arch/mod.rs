pub mod activations;
pub mod layers;
pub mod loss;
mod network;
mod pool;
mod sequential;

pub use network::{EvalGuard, Mode, Network};
pub use pool::AvgPool2d;
pub use sequential::{ParamBlock, Sequential, Trace};
