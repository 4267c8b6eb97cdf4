mod dense;
mod layer;

pub use dense::{Dense, LayerTrace};
pub use layer::Layer;
