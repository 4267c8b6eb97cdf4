mod bce;
mod l1;
mod loss_fn;
mod mse;

pub use bce::BceWithLogits;
pub use l1::L1;
pub use loss_fn::LossFn;
pub use mse::Mse;
