use ndarray::{linalg, prelude::*};

use crate::{MlErr, Result, arch::activations::ActFn};

/// A fully connected layer: `a = act_fn(x·W + b)`.
///
/// The parameters are laid out as the `(in, out)` row-major weight matrix followed by the `out`
/// biases.
#[derive(Debug, Clone)]
pub struct Dense {
    dim: (usize, usize),
    act_fn: Option<ActFn>,
    size: usize,

    // Forward metadata
    x: Option<Array2<f32>>,
    z: Option<Array2<f32>>,
}

impl Dense {
    /// Creates a new `Dense` layer.
    ///
    /// # Arguments
    /// * `dim` - The amount of inputs and outputs of the layer.
    /// * `act_fn` - An optional activation function applied to the affine output.
    pub fn new(dim: (usize, usize), act_fn: Option<ActFn>) -> Self {
        Self {
            dim,
            size: (dim.0 + 1) * dim.1,
            act_fn,
            x: None,
            z: None,
        }
    }

    /// Returns the size of this layer.
    ///
    /// # Returns
    /// The amount of parameters this layer has.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn dim(&self) -> (usize, usize) {
        self.dim
    }

    /// The `(fan_in, fan_out)` of the weight matrix and the amount of biases.
    pub fn param_shapes(&self) -> ((usize, usize), usize) {
        (self.dim, self.dim.1)
    }

    pub fn forward(&mut self, params: &[f32], x: Array2<f32>) -> Result<Array2<f32>> {
        self.check_input(&x)?;
        let (w, b) = self.view_params(params)?;

        let mut z = Array2::zeros((x.nrows(), self.dim.1));
        linalg::general_mat_mul(1.0, &x, &w, 0.0, &mut z);
        z += &b;

        self.x = Some(x);

        let Some(ref act_fn) = self.act_fn else {
            self.z = None;
            return Ok(z);
        };

        let a = z.mapv(|z| act_fn.f(z));
        self.z = Some(z);
        Ok(a)
    }

    /// Accumulates this layer's gradient into `grad` and returns the delta of its input.
    pub fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        mut d: Array2<f32>,
    ) -> Result<Array2<f32>> {
        let x = self.x.as_ref().ok_or(MlErr::MissingForwardPass("dense"))?;

        if let (Some(act_fn), Some(z)) = (&self.act_fn, &self.z) {
            d.zip_mut_with(z, |d, &z| *d *= act_fn.df(z));
        }

        let (mut dw, mut db) = self.view_grad(grad)?;
        linalg::general_mat_mul(1.0, &x.t(), &d, 1.0, &mut dw);
        db += &d.sum_axis(Axis(0));

        let (w, _) = self.view_params(params)?;
        Ok(d.dot(&w.t()))
    }

    fn check_input(&self, x: &Array2<f32>) -> Result<()> {
        if x.ncols() != self.dim.0 {
            return Err(MlErr::SizeMismatch {
                what: "dense input",
                got: x.ncols(),
                expected: self.dim.0,
            });
        }

        Ok(())
    }

    /// Gives a view of the raw gradient slice as the delta weights and delta biases of this layer.
    fn view_grad<'a>(
        &self,
        grad: &'a mut [f32],
    ) -> Result<(ArrayViewMut2<'a, f32>, ArrayViewMut1<'a, f32>)> {
        let w_size = self.size - self.dim.1;
        if grad.len() != self.size {
            return Err(MlErr::SizeMismatch {
                what: "dense gradient",
                got: grad.len(),
                expected: self.size,
            });
        }

        let (dw_raw, db_raw) = grad.split_at_mut(w_size);
        let dw = ArrayViewMut2::from_shape(self.dim, dw_raw).expect("checked above");
        let db = ArrayViewMut1::from_shape(self.dim.1, db_raw).expect("checked above");
        Ok((dw, db))
    }

    /// Gives a view of the raw parameter slice as the weights and biases of this layer.
    fn view_params<'a>(&self, params: &'a [f32]) -> Result<(ArrayView2<'a, f32>, ArrayView1<'a, f32>)> {
        let w_size = self.size - self.dim.1;
        if params.len() != self.size {
            return Err(MlErr::SizeMismatch {
                what: "dense parameters",
                got: params.len(),
                expected: self.size,
            });
        }

        let weights = ArrayView2::from_shape(self.dim, &params[..w_size]).expect("checked above");
        let biases = ArrayView1::from_shape(self.dim.1, &params[w_size..]).expect("checked above");
        Ok((weights, biases))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::layers::grad_check;

    #[test]
    fn forward_is_affine() {
        let mut dense = Dense::new((2, 1), None);
        // w = [2, -1], b = 0.5
        let params = [2., -1., 0.5];
        let x = array![[1., 1.], [3., 2.]];

        let y = dense.forward(&params, x).unwrap();
        assert_eq!(y, array![[1.5], [4.5]]);
    }

    #[test]
    fn backward_before_forward_fails() {
        let mut dense = Dense::new((2, 1), None);
        let mut grad = [0.; 3];
        let d = Array2::zeros((1, 1));
        assert!(dense.backward(&[0.; 3], &mut grad, d).is_err());
    }

    #[test]
    fn gradients_match_finite_differences() {
        let layer = Dense::new((4, 3), Some(ActFn::tanh()));
        grad_check::check_layer(layer.into(), 4, 5);
    }
}
