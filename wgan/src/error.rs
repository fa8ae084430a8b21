use std::{fmt, io};

use machine_learning::MlErr;
use safetensors::SafeTensorError;

/// The result type used in the entire wgan crate.
pub type Result<T> = std::result::Result<T, WganErr>;

/// All errors that can occur while training or sampling.
#[derive(Debug)]
pub enum WganErr {
    /// Invalid configuration, caught before touching any data.
    InvalidConfig(String),
    /// A malformed or inconsistent image dataset.
    InvalidDataset(String),
    /// A checkpoint that doesn't match the networks it's loaded into.
    Checkpoint(String),
    Ml(MlErr),
    Io(io::Error),
    Json(serde_json::Error),
    SafeTensors(SafeTensorError),
    Csv(csv::Error),
    Image(image::ImageError),
}

impl fmt::Display for WganErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            Self::InvalidDataset(msg) => write!(f, "invalid dataset: {msg}"),
            Self::Checkpoint(msg) => write!(f, "invalid checkpoint: {msg}"),
            Self::Ml(e) => write!(f, "model error: {e}"),
            Self::Io(e) => write!(f, "io error: {e}"),
            Self::Json(e) => write!(f, "json error: {e}"),
            Self::SafeTensors(e) => write!(f, "safetensors error: {e}"),
            Self::Csv(e) => write!(f, "csv error: {e}"),
            Self::Image(e) => write!(f, "image error: {e}"),
        }
    }
}

impl std::error::Error for WganErr {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Ml(e) => Some(e),
            Self::Io(e) => Some(e),
            Self::Json(e) => Some(e),
            Self::SafeTensors(e) => Some(e),
            Self::Csv(e) => Some(e),
            Self::Image(e) => Some(e),
            _ => None,
        }
    }
}

impl From<MlErr> for WganErr {
    fn from(e: MlErr) -> Self {
        Self::Ml(e)
    }
}

impl From<io::Error> for WganErr {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for WganErr {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

impl From<SafeTensorError> for WganErr {
    fn from(e: SafeTensorError) -> Self {
        Self::SafeTensors(e)
    }
}

impl From<csv::Error> for WganErr {
    fn from(e: csv::Error) -> Self {
        Self::Csv(e)
    }
}

impl From<image::ImageError> for WganErr {
    fn from(e: image::ImageError) -> Self {
        Self::Image(e)
    }
}

impl From<WganErr> for io::Error {
    fn from(e: WganErr) -> Self {
        match e {
            WganErr::Io(e) => e,
            e => io::Error::other(e),
        }
    }
}
