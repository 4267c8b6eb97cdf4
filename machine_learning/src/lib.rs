//! Small dense networks over flat `f32` parameter slices, with everything needed to train them
//! outside a full autodiff framework.

pub mod arch;
pub mod checkpoint;
pub mod dataset;
pub mod error;
pub mod initialization;
pub mod optimization;

pub use error::{MlErr, Result};
