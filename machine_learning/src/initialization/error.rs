use std::{error::Error, fmt};

use rand_distr::{NormalError, uniform::Error as UniformError};

/// A distribution a `RandParamGen` was asked for but can't sample from.
#[derive(Debug)]
pub enum RandErr {
    /// An empty or non finite uniform range.
    Uniform(UniformError),
    /// A negative or non finite standard deviation.
    Normal(NormalError),
}

impl From<NormalError> for RandErr {
    fn from(e: NormalError) -> Self {
        Self::Normal(e)
    }
}

impl From<UniformError> for RandErr {
    fn from(e: UniformError) -> Self {
        Self::Uniform(e)
    }
}

impl fmt::Display for RandErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uniform(e) => write!(f, "invalid uniform distribution: {e}"),
            Self::Normal(e) => write!(f, "invalid normal distribution: {e}"),
        }
    }
}

impl Error for RandErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Uniform(e) => Some(e),
            Self::Normal(e) => Some(e),
        }
    }
}
