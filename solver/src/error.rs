use std::{error::Error, fmt, io, path::PathBuf};

use machine_learning::MlErr;
use ndarray::ShapeError;

/// The result type used across the solvers.
pub type Result<T> = std::result::Result<T, SolverErr>;

/// All errors that can occur while setting up or running a solver.
#[derive(Debug)]
pub enum SolverErr {
    /// Invalid configuration, caught before any iteration runs.
    Config(String),
    /// A numerical or model error bubbling up from `machine_learning`.
    Ml(MlErr),
    Io(io::Error),
    Image(image::ImageError),
    Json(serde_json::Error),
    /// A loader produced no batch where at least one was needed.
    EmptyLoader { name: &'static str },
    /// A checkpoint path that doesn't follow the `model<step>` naming.
    CheckpointName(PathBuf),
    /// An external program exited unsuccessfully.
    Subprocess { program: String, code: Option<i32> },
}

impl fmt::Display for SolverErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "invalid config: {msg}"),
            Self::Ml(e) => write!(f, "{e}"),
            Self::Io(e) => write!(f, "io error: {e}"),
            Self::Image(e) => write!(f, "image error: {e}"),
            Self::Json(e) => write!(f, "json error: {e}"),
            Self::EmptyLoader { name } => write!(f, "the {name} loader yielded no batch"),
            Self::CheckpointName(path) => {
                write!(f, "can't read a step out of checkpoint {}", path.display())
            }
            Self::Subprocess { program, code } => match code {
                Some(code) => write!(f, "{program} exited with status {code}"),
                None => write!(f, "{program} was terminated by a signal"),
            },
        }
    }
}

impl Error for SolverErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Ml(e) => Some(e),
            Self::Io(e) => Some(e),
            Self::Image(e) => Some(e),
            Self::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<MlErr> for SolverErr {
    fn from(e: MlErr) -> Self {
        Self::Ml(e)
    }
}

impl From<ShapeError> for SolverErr {
    fn from(e: ShapeError) -> Self {
        Self::Ml(MlErr::Shape(e))
    }
}

impl From<io::Error> for SolverErr {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<image::ImageError> for SolverErr {
    fn from(e: image::ImageError) -> Self {
        Self::Image(e)
    }
}

impl From<serde_json::Error> for SolverErr {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}
