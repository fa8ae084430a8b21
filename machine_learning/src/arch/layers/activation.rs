use ndarray::Array2;

use crate::{MlErr, Result, arch::activations::ActFn};

/// An activation function applied as its own layer, with no parameters.
#[derive(Debug, Clone)]
pub struct Activation {
    features: usize,
    act_fn: ActFn,
    z: Option<Array2<f32>>,
}

impl Activation {
    pub fn new(features: usize, act_fn: ActFn) -> Self {
        Self {
            features,
            act_fn,
            z: None,
        }
    }

    pub fn features(&self) -> usize {
        self.features
    }

    pub fn forward(&mut self, z: Array2<f32>) -> Result<Array2<f32>> {
        if z.ncols() != self.features {
            return Err(MlErr::SizeMismatch {
                what: "activation input",
                got: z.ncols(),
                expected: self.features,
            });
        }

        let a = z.mapv(|z| self.act_fn.f(z));
        self.z = Some(z);
        Ok(a)
    }

    pub fn backward(&mut self, mut d: Array2<f32>) -> Result<Array2<f32>> {
        let z = self
            .z
            .as_ref()
            .ok_or(MlErr::MissingForwardPass("activation"))?;

        if d.dim() != z.dim() {
            return Err(MlErr::SizeMismatch {
                what: "activation delta",
                got: d.len(),
                expected: z.len(),
            });
        }

        d.zip_mut_with(z, |d, &z| *d *= self.act_fn.df(z));
        Ok(d)
    }
}
