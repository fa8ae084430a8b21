use ndarray::Array2;
use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::{MlErr, Result, arch::Mode};

/// Inverted dropout: in training mode every feature is zeroed with probability `rate` and the
/// survivors are scaled by `1 / (1 - rate)`, in evaluation mode the layer is the identity.
#[derive(Debug, Clone)]
pub struct Dropout {
    features: usize,
    rate: f32,
    rng: StdRng,
    mask: Option<Array2<f32>>,
}

impl Dropout {
    /// Creates a new `Dropout` layer.
    ///
    /// # Arguments
    /// * `features` - The width of the rows flowing through the layer.
    /// * `rate` - The probability of dropping each feature.
    /// * `seed` - The seed of the layer's own random number generator.
    ///
    /// # Errors
    /// An `InvalidLayer` if the rate is not within `[0, 1)`.
    pub fn new(features: usize, rate: f32, seed: u64) -> Result<Self> {
        if !(0.0..1.0).contains(&rate) {
            return Err(MlErr::InvalidLayer {
                layer: "dropout",
                reason: format!("the rate must be within [0, 1), got {rate}"),
            });
        }

        Ok(Self {
            features,
            rate,
            rng: StdRng::seed_from_u64(seed),
            mask: None,
        })
    }

    pub fn features(&self) -> usize {
        self.features
    }

    pub fn forward(&mut self, x: Array2<f32>, mode: Mode) -> Result<Array2<f32>> {
        if x.ncols() != self.features {
            return Err(MlErr::SizeMismatch {
                what: "dropout input",
                got: x.ncols(),
                expected: self.features,
            });
        }

        if mode == Mode::Eval || self.rate == 0. {
            self.mask = None;
            return Ok(x);
        }

        let keep = 1. / (1. - self.rate);
        let rate = self.rate;
        let rng = &mut self.rng;
        let mask = Array2::from_shape_simple_fn(x.dim(), || {
            if rng.random::<f32>() < rate { 0. } else { keep }
        });

        let y = &x * &mask;
        self.mask = Some(mask);
        Ok(y)
    }

    pub fn backward(&mut self, d: Array2<f32>) -> Result<Array2<f32>> {
        match &self.mask {
            Some(mask) if mask.dim() != d.dim() => Err(MlErr::SizeMismatch {
                what: "dropout delta",
                got: d.len(),
                expected: mask.len(),
            }),
            Some(mask) => Ok(d * mask),
            None => Ok(d),
        }
    }
}
