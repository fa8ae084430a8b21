use rayon::prelude::*;

use super::{Optimizer, optimizer::check_sizes};
use crate::Result;

/// RMSprop: every step is divided by a moving average of the gradient's magnitude.
#[derive(Debug, Clone)]
pub struct RmsProp {
    learning_rate: f32,
    rho: f32,
    epsilon: f32,
    s: Box<[f32]>,
}

impl RmsProp {
    /// Creates a new `RmsProp` optimizer.
    ///
    /// # Arguments
    /// * `len` - The amount of parameters this instance should hold.
    /// * `learning_rate` - The coefficient that modulates the amount of training per update.
    /// * `rho` - Discount factor of the squared gradient moving average.
    /// * `epsilon` - Small constant for numerical stability.
    ///
    /// # Returns
    /// A new `RmsProp` instance.
    pub fn new(len: usize, learning_rate: f32, rho: f32, epsilon: f32) -> Self {
        Self {
            learning_rate,
            rho,
            epsilon,
            s: vec![0.; len].into_boxed_slice(),
        }
    }

    /// The moving average of the squared gradient, one value per parameter.
    pub fn state(&self) -> &[f32] {
        &self.s
    }

    /// Restores a moving average saved from `state`.
    pub fn load_state(&mut self, s: &[f32]) -> Result<()> {
        check_sizes(s, &self.s)?;
        self.s.copy_from_slice(s);
        Ok(())
    }
}

impl Optimizer for RmsProp {
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()> {
        check_sizes(grad, params)?;
        check_sizes(grad, &self.s)?;

        let Self {
            learning_rate: lr,
            rho,
            epsilon: eps,
            ..
        } = *self;

        params
            .par_iter_mut()
            .zip(grad.par_iter())
            .zip(self.s.par_iter_mut())
            .for_each(|((p, g), s)| {
                *s = rho * *s + (1. - rho) * g.powi(2);
                *p -= lr * g / (s.sqrt() + eps);
            });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_step_is_normalized() {
        let mut opt = RmsProp::new(2, 0.1, 0.9, 0.);
        let mut params = [1., 1.];
        opt.update_params(&[2., -0.5], &mut params).unwrap();

        // s = 0.1 * g^2, so the step is lr * sign(g) / sqrt(0.1)
        let step = 0.1 / 0.1f32.sqrt();
        assert!((params[0] - (1. - step)).abs() < 1e-5);
        assert!((params[1] - (1. + step)).abs() < 1e-5);
    }

    #[test]
    fn restored_state_continues_the_average() {
        let mut opt = RmsProp::new(1, 0.1, 0.9, 1e-7);
        let mut params = [1.];
        opt.update_params(&[2.], &mut params).unwrap();

        let mut resumed = RmsProp::new(1, 0.1, 0.9, 1e-7);
        resumed.load_state(opt.state()).unwrap();
        assert!(resumed.load_state(&[0.; 2]).is_err());

        let mut a = params;
        let mut b = params;
        opt.update_params(&[2.], &mut a).unwrap();
        resumed.update_params(&[2.], &mut b).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn size_mismatch() {
        let mut opt = RmsProp::new(3, 0.1, 0.9, 1e-7);
        let mut params = [0.; 2];
        assert!(opt.update_params(&[0.; 2], &mut params).is_err());
    }
}
