use rayon::prelude::*;

use crate::{MlErr, Result, optimization::Optimizer};

/// Owns a model's flat parameter buffer together with a gradient buffer of the same size.
///
/// Layers never own their parameters, they borrow their slice of the buffer when traversing the
/// model forwards (`front`) or backwards (`back`).
#[derive(Debug, Clone)]
pub struct ParamStore {
    params: Vec<f32>,
    grad: Vec<f32>,
}

impl ParamStore {
    /// Creates a new `ParamStore`.
    ///
    /// # Arguments
    /// * `params` - The initial parameters of the model.
    ///
    /// # Returns
    /// A new `ParamStore` instance with a zeroed gradient.
    pub fn new(params: Vec<f32>) -> Self {
        let grad = vec![0.; params.len()];
        Self { params, grad }
    }

    /// Creates a `ParamStore` of `size` zeroed parameters.
    pub fn zeros(size: usize) -> Self {
        Self::new(vec![0.; size])
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn params(&self) -> &[f32] {
        &self.params
    }

    pub fn grad(&self) -> &[f32] {
        &self.grad
    }

    /// Replaces the parameters with the given ones.
    ///
    /// # Errors
    /// A `SizeMismatch` if `params` does not hold exactly as many values as the store.
    pub fn load(&mut self, params: &[f32]) -> Result<()> {
        if params.len() != self.params.len() {
            return Err(MlErr::SizeMismatch {
                what: "loaded parameters",
                got: params.len(),
                expected: self.params.len(),
            });
        }

        self.params.copy_from_slice(params);
        Ok(())
    }

    /// Creates a new `FrontIter` parameter iterator.
    ///
    /// The returned iterator iterates the model's layers forward.
    pub fn front(&self) -> FrontIter<'_> {
        FrontIter {
            rest: &self.params,
        }
    }

    /// Creates a new `BackIter` parameter iterator.
    ///
    /// The returned iterator iterates the model's layers backwards, yielding the parameters and
    /// the gradient of each layer.
    pub fn back(&mut self) -> BackIter<'_> {
        BackIter {
            params: &self.params,
            grad: &mut self.grad,
        }
    }

    /// Zeros out the gradient.
    pub fn zero_grad(&mut self) {
        self.grad.par_iter_mut().for_each(|g| *g = 0.);
    }

    /// Applies the accumulated gradient onto the parameters.
    ///
    /// # Arguments
    /// * `optimizer` - The optimizer that dictates how to update the parameters.
    pub fn optimize<O: Optimizer>(&mut self, optimizer: &mut O) -> Result<()> {
        optimizer.update_params(&self.grad, &mut self.params)
    }

    /// Clamps every parameter into `[-c, c]`.
    ///
    /// # Errors
    /// An `InvalidClipValue` if `c` is not positive and finite.
    pub fn clip(&mut self, c: f32) -> Result<()> {
        crate::optimization::clip_params(&mut self.params, c)
    }
}

/// A model's layer iterator.
///
/// This iterator iterates the layers of a model from the front.
pub struct FrontIter<'pm> {
    rest: &'pm [f32],
}

impl<'pm> FrontIter<'pm> {
    /// Tries to yield the next `n` parameters.
    ///
    /// # Returns
    /// The parameters of the next layer or `None` if there are less than `n` left.
    pub fn next(&mut self, n: usize) -> Option<&'pm [f32]> {
        if n > self.rest.len() {
            return None;
        }

        let (params, rest) = self.rest.split_at(n);
        self.rest = rest;
        Some(params)
    }

    /// The amount of parameters that have not been yielded yet.
    pub fn remaining(&self) -> usize {
        self.rest.len()
    }
}

/// A model's layer iterator.
///
/// This iterator iterates the layers of a model from the back.
pub struct BackIter<'pm> {
    params: &'pm [f32],
    grad: &'pm mut [f32],
}

impl<'pm> BackIter<'pm> {
    /// Tries to yield the parameters and gradient of the last `n` values not yet yielded.
    ///
    /// # Returns
    /// An option denoting if there still were `n` parameters and gradients.
    pub fn next(&mut self, n: usize) -> Option<(&'pm [f32], &'pm mut [f32])> {
        let len = self.params.len();
        if n > len {
            return None;
        }

        let (params_rest, params) = self.params.split_at(len - n);
        let grad = std::mem::take(&mut self.grad);
        let (grad_rest, grad) = grad.split_at_mut(len - n);

        self.params = params_rest;
        self.grad = grad_rest;
        Some((params, grad))
    }

    /// The amount of parameters that have not been yielded yet.
    pub fn remaining(&self) -> usize {
        self.params.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LAYER_SIZES: [usize; 4] = [9, 15, 5, 10];

    fn gen_store() -> ParamStore {
        let params = LAYER_SIZES
            .iter()
            .enumerate()
            .flat_map(|(i, &size)| std::iter::repeat_n(i as f32, size))
            .collect();

        ParamStore::new(params)
    }

    #[test]
    fn front() {
        let store = gen_store();
        let mut front = store.front();

        for (i, &size) in LAYER_SIZES.iter().enumerate() {
            let params = front.next(size).unwrap();
            assert_eq!(params.len(), size);
            assert!(params.iter().all(|&p| p == i as f32));
        }

        assert_eq!(front.remaining(), 0);
        assert!(front.next(1).is_none());
    }

    #[test]
    fn back() {
        let mut store = gen_store();
        let mut back = store.back();

        for (i, &size) in LAYER_SIZES.iter().enumerate().rev() {
            let (params, grad) = back.next(size).unwrap();
            assert_eq!(params.len(), size);
            assert_eq!(grad.len(), size);
            assert!(params.iter().all(|&p| p == i as f32));
            grad.fill(i as f32 + 1.);
        }

        assert!(back.next(1).is_none());

        let expected: Vec<f32> = LAYER_SIZES
            .iter()
            .enumerate()
            .flat_map(|(i, &size)| std::iter::repeat_n(i as f32 + 1., size))
            .collect();
        assert_eq!(store.grad(), expected.as_slice());

        store.zero_grad();
        assert!(store.grad().iter().all(|&g| g == 0.));
    }

    #[test]
    fn load_checks_size() {
        let mut store = ParamStore::zeros(3);
        assert!(store.load(&[1., 2.]).is_err());

        store.load(&[1., 2., 3.]).unwrap();
        assert_eq!(store.params(), &[1., 2., 3.]);
    }

    #[test]
    fn clip_bounds_every_param() {
        let mut store = ParamStore::new(vec![-3., -0.005, 0., 0.02, 7.]);
        store.clip(0.01).unwrap();
        assert_eq!(store.params(), &[-0.01, -0.005, 0., 0.01, 0.01]);

        assert!(store.clip(0.).is_err());
        assert!(store.clip(f32::NAN).is_err());
    }
}
