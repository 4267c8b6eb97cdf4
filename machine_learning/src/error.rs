use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

use ndarray::ShapeError;
use safetensors::SafeTensorError;

/// The result type used in the entire machine learning module.
pub type Result<T> = std::result::Result<T, MlErr>;

/// The machine learning module's error type.
#[derive(Debug)]
pub enum MlErr {
    SizeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    Shape(ShapeError),
    FrozenNetwork {
        name: String,
    },
    MissingTensor {
        name: String,
    },
    UnsupportedDtype {
        name: String,
    },
    MissingChannel {
        name: String,
    },
    NotDivisible {
        size: usize,
        target: usize,
    },
    InvalidDistribution(String),
    Safetensors(SafeTensorError),
    Io(io::Error),
}

impl Display for MlErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MlErr::SizeMismatch {
                what,
                got,
                expected,
            } => write!(
                f,
                "There's a size mismatch for {what}, got {got} and expected {expected}"
            ),
            MlErr::Shape(e) => write!(f, "invalid array shape: {e}"),
            MlErr::FrozenNetwork { name } => {
                write!(f, "tried to optimize the frozen network '{name}'")
            }
            MlErr::MissingTensor { name } => write!(f, "checkpoint has no tensor named '{name}'"),
            MlErr::UnsupportedDtype { name } => {
                write!(f, "tensor '{name}' is not stored as f32")
            }
            MlErr::MissingChannel { name } => write!(f, "batch has no channel named '{name}'"),
            MlErr::NotDivisible { size, target } => {
                write!(f, "cannot downsample a size of {size} into {target}")
            }
            MlErr::InvalidDistribution(msg) => write!(f, "invalid distribution: {msg}"),
            MlErr::Safetensors(e) => write!(f, "safetensors error: {e}"),
            MlErr::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for MlErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MlErr::Shape(e) => Some(e),
            MlErr::Safetensors(e) => Some(e),
            MlErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ShapeError> for MlErr {
    fn from(value: ShapeError) -> Self {
        Self::Shape(value)
    }
}

impl From<SafeTensorError> for MlErr {
    fn from(value: SafeTensorError) -> Self {
        Self::Safetensors(value)
    }
}

impl From<io::Error> for MlErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}
