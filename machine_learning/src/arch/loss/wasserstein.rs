use ndarray::{Array2, ArrayView2};

use super::LossFn;

/// The Wasserstein critic loss `mean(y * y_pred)`.
///
/// Real samples are labeled `-1` and generated ones `+1`, so minimizing it pushes the critic to
/// score real samples higher than generated ones.
#[derive(Debug, Default, Clone, Copy)]
pub struct Wasserstein;

impl Wasserstein {
    pub const REAL: f32 = -1.;
    pub const FAKE: f32 = 1.;

    pub fn new() -> Self {
        Self
    }
}

impl LossFn for Wasserstein {
    fn loss(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> f32 {
        (&y * &y_pred).mean().unwrap_or_default()
    }

    fn loss_prime(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Array2<f32> {
        y.mapv(|y| y / y_pred.len() as f32)
    }
}
