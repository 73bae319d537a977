use thiserror::Error;

use crate::k_means::Quantization;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Buffer of length {len} does not hold {width}x{height} RGBA pixels")]
    BufferShape { len: usize, width: u32, height: u32 },

    #[error("Did not converge within {iterations} iterations")]
    NonConvergence {
        iterations: usize,
        best_effort: Box<Quantization>,
    },

    #[error("Cancelled after {iterations} iterations")]
    Cancelled { iterations: usize },
}

impl Error {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Recovers the last computed state from a [`Error::NonConvergence`].
    pub fn into_best_effort(self) -> Option<Quantization> {
        match self {
            Error::NonConvergence { best_effort, .. } => Some(*best_effort),
            _ => None,
        }
    }
}
