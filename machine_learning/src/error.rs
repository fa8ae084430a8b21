use std::{
    error::Error,
    fmt::{self, Display},
};

use crate::initialization::RandErr;

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
    IncompatibleLayers {
        layer: usize,
        input: usize,
        previous_output: usize,
    },
    InvalidLayer {
        layer: &'static str,
        reason: String,
    },
    InvalidClipValue(f32),
    ParamGenExhausted {
        got: usize,
        expected: usize,
    },
    ParamGen(RandErr),
    MissingForwardPass(&'static str),
    InvalidBatchSize,
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
                "There's a size mismatch on {what}, got {got} and expected {expected}"
            ),
            MlErr::IncompatibleLayers {
                layer,
                input,
                previous_output,
            } => write!(
                f,
                "Layer {layer} expects {input} inputs but the previous layer outputs {previous_output}"
            ),
            MlErr::InvalidLayer { layer, reason } => {
                write!(f, "Invalid {layer} layer: {reason}")
            }
            MlErr::InvalidClipValue(c) => {
                write!(f, "The clip value must be positive and finite, got {c}")
            }
            MlErr::ParamGenExhausted { got, expected } => write!(
                f,
                "The parameter generator ran out of values, generated {got} of the expected {expected}"
            ),
            MlErr::ParamGen(e) => write!(f, "Failed to build a parameter generator: {e}"),
            MlErr::MissingForwardPass(layer) => {
                write!(f, "Tried to backpropagate through a {layer} layer before a forward pass")
            }
            MlErr::InvalidBatchSize => write!(f, "The batch size must be greater than zero"),
        }
    }
}

impl Error for MlErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MlErr::ParamGen(e) => Some(e),
            _ => None,
        }
    }
}

impl From<RandErr> for MlErr {
    fn from(value: RandErr) -> Self {
        Self::ParamGen(value)
    }
}
