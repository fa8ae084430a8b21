use ndarray::prelude::*;

use crate::{MlErr, Result, arch::Mode};

/// Batch normalization over `channels` groups of `spatial` contiguous features.
///
/// Dense outputs use `spatial = 1`, convolution outputs use `spatial = height * width` so every
/// channel is normalized over the batch and all of its positions.
///
/// The trainable parameters are laid out as the `channels` scales (gamma) followed by the
/// `channels` shifts (beta). The running statistics are not trainable, they are the layer's
/// buffers and get updated as `running = momentum * running + (1 - momentum) * batch`.
#[derive(Debug, Clone)]
pub struct BatchNorm {
    channels: usize,
    spatial: usize,
    momentum: f32,
    epsilon: f32,
    running_mean: Vec<f32>,
    running_var: Vec<f32>,

    // Forward metadata
    x_hat: Option<Array3<f32>>,
    std_inv: Option<Array1<f32>>,
    mode: Mode,
}

impl BatchNorm {
    /// Creates a new `BatchNorm` layer.
    ///
    /// # Arguments
    /// * `channels` - The amount of independently normalized groups.
    /// * `spatial` - The amount of features in each group.
    /// * `momentum` - The decay of the running statistics.
    /// * `epsilon` - Added to the variance before taking its square root.
    pub fn new(channels: usize, spatial: usize, momentum: f32, epsilon: f32) -> Self {
        Self {
            channels,
            spatial,
            momentum,
            epsilon,
            running_mean: vec![0.; channels],
            running_var: vec![1.; channels],
            x_hat: None,
            std_inv: None,
            mode: Mode::Train,
        }
    }

    pub fn size(&self) -> usize {
        2 * self.channels
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn features(&self) -> usize {
        self.channels * self.spatial
    }

    /// The running mean followed by the running variance.
    pub fn buffers(&self) -> Vec<f32> {
        let mut buffers = self.running_mean.clone();
        buffers.extend_from_slice(&self.running_var);
        buffers
    }

    pub fn buffers_len(&self) -> usize {
        2 * self.channels
    }

    /// Restores the running statistics saved by `buffers`.
    pub fn load_buffers(&mut self, buffers: &[f32]) -> Result<()> {
        if buffers.len() != self.buffers_len() {
            return Err(MlErr::SizeMismatch {
                what: "batch norm buffers",
                got: buffers.len(),
                expected: self.buffers_len(),
            });
        }

        let (mean, var) = buffers.split_at(self.channels);
        self.running_mean.copy_from_slice(mean);
        self.running_var.copy_from_slice(var);
        Ok(())
    }

    pub fn forward(&mut self, params: &[f32], x: Array2<f32>, mode: Mode) -> Result<Array2<f32>> {
        if x.ncols() != self.features() {
            return Err(MlErr::SizeMismatch {
                what: "batch norm input",
                got: x.ncols(),
                expected: self.features(),
            });
        }

        let (gamma, beta) = self.view_params(params)?;
        let (n, c, s) = (x.nrows(), self.channels, self.spatial);
        let x = into_3d(x, (n, c, s));

        let (mean, var) = match mode {
            Mode::Train => {
                if n == 0 {
                    return Err(MlErr::SizeMismatch {
                        what: "batch norm batch",
                        got: 0,
                        expected: 1,
                    });
                }

                let len = (n * s) as f32;
                let mut mean = Array1::zeros(c);
                let mut var = Array1::zeros(c);
                for ch in 0..c {
                    let xc = x.slice(s![.., ch, ..]);
                    let mu = xc.sum() / len;
                    mean[ch] = mu;
                    var[ch] = xc.fold(0., |acc, &v| acc + (v - mu).powi(2)) / len;
                }

                let m = self.momentum;
                for ch in 0..c {
                    self.running_mean[ch] = m * self.running_mean[ch] + (1. - m) * mean[ch];
                    self.running_var[ch] = m * self.running_var[ch] + (1. - m) * var[ch];
                }

                (mean, var)
            }
            Mode::Eval | Mode::Frozen => (
                Array1::from(self.running_mean.clone()),
                Array1::from(self.running_var.clone()),
            ),
        };

        let eps = self.epsilon;
        let std_inv = var.mapv(|v| 1. / (v + eps).sqrt());
        let broadcast = |a: &Array1<f32>| a.clone().into_shape_with_order((1, c, 1)).expect("same length");

        let x_hat = (&x - &broadcast(&mean)) * &broadcast(&std_inv);
        let y = &x_hat * &broadcast(&gamma.to_owned()) + &broadcast(&beta.to_owned());

        self.x_hat = Some(x_hat);
        self.std_inv = Some(std_inv);
        self.mode = mode;

        Ok(into_2d(y, (n, c * s)))
    }

    pub fn backward(&mut self, params: &[f32], grad: &mut [f32], d: Array2<f32>) -> Result<Array2<f32>> {
        let (Some(x_hat), Some(std_inv)) = (&self.x_hat, &self.std_inv) else {
            return Err(MlErr::MissingForwardPass("batch norm"));
        };

        let (gamma, _) = self.view_params(params)?;
        let (n, c, s) = x_hat.dim();
        if d.dim() != (n, c * s) {
            return Err(MlErr::SizeMismatch {
                what: "batch norm delta",
                got: d.len(),
                expected: n * c * s,
            });
        }

        let d = into_3d(d, (n, c, s));
        let (dgamma, dbeta) = grad.split_at_mut(c);
        let mut dx = Array3::zeros((n, c, s));

        for ch in 0..c {
            let dy = d.slice(s![.., ch, ..]);
            let xh = x_hat.slice(s![.., ch, ..]);

            let sum_dy = dy.sum();
            let sum_dy_xh = (&dy * &xh).sum();
            dgamma[ch] += sum_dy_xh;
            dbeta[ch] += sum_dy;

            let scale = gamma[ch] * std_inv[ch];
            let mut dx_ch = dx.slice_mut(s![.., ch, ..]);

            match self.mode {
                Mode::Train => {
                    let m = (n * s) as f32;
                    let mean_dy = sum_dy / m;
                    let mean_dy_xh = sum_dy_xh / m;

                    dx_ch.zip_mut_with(&dy, |dx, &dy| *dx = dy - mean_dy);
                    dx_ch.zip_mut_with(&xh, |dx, &xh| *dx = scale * (*dx - xh * mean_dy_xh));
                }
                Mode::Eval | Mode::Frozen => dx_ch.zip_mut_with(&dy, |dx, &dy| *dx = scale * dy),
            }
        }

        Ok(into_2d(dx, (n, c * s)))
    }

    fn view_params<'a>(&self, params: &'a [f32]) -> Result<(ArrayView1<'a, f32>, ArrayView1<'a, f32>)> {
        if params.len() != self.size() {
            return Err(MlErr::SizeMismatch {
                what: "batch norm parameters",
                got: params.len(),
                expected: self.size(),
            });
        }

        let (gamma, beta) = params.split_at(self.channels);
        Ok((ArrayView1::from(gamma), ArrayView1::from(beta)))
    }
}

fn into_3d(x: Array2<f32>, shape: (usize, usize, usize)) -> Array3<f32> {
    x.as_standard_layout()
        .into_owned()
        .into_shape_with_order(shape)
        .expect("the amount of elements is preserved")
}

fn into_2d(x: Array3<f32>, shape: (usize, usize)) -> Array2<f32> {
    x.as_standard_layout()
        .into_owned()
        .into_shape_with_order(shape)
        .expect("the amount of elements is preserved")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::layers::grad_check;

    #[test]
    fn normalizes_each_channel() {
        let mut bn = BatchNorm::new(2, 2, 0.8, 1e-5);
        let params = [1., 1., 0., 0.];
        let x = array![[1., 3., 10., 10.], [5., 7., 30., 30.]];

        let y = bn.forward(&params, x, Mode::Train).unwrap();

        for ch in 0..2 {
            let values = y.slice(s![.., 2 * ch..2 * ch + 2]);
            let mean = values.mean().unwrap();
            let var = values.mapv(|v| (v - mean).powi(2)).mean().unwrap();
            assert!(mean.abs() < 1e-5);
            assert!((var - 1.).abs() < 1e-3);
        }
    }

    #[test]
    fn running_statistics_follow_the_momentum() {
        let mut bn = BatchNorm::new(1, 1, 0.8, 1e-3);
        let params = [1., 0.];
        let x = array![[2.], [4.]];

        bn.forward(&params, x, Mode::Train).unwrap();
        let buffers = bn.buffers();

        // batch mean 3, batch var 1
        assert!((buffers[0] - 0.6).abs() < 1e-6);
        assert!((buffers[1] - 1.).abs() < 1e-6);
    }

    #[test]
    fn eval_uses_running_statistics() {
        let mut bn = BatchNorm::new(1, 1, 0.8, 0.);
        bn.load_buffers(&[2., 4.]).unwrap();

        let y = bn.forward(&[3., 1.], array![[4.], [0.]], Mode::Eval).unwrap();
        assert_eq!(y, array![[4.], [-2.]]);
    }

    #[test]
    fn frozen_keeps_running_statistics() {
        let mut bn = BatchNorm::new(1, 1, 0.8, 0.);
        bn.load_buffers(&[2., 4.]).unwrap();

        let y = bn.forward(&[3., 1.], array![[4.], [0.]], Mode::Frozen).unwrap();
        assert_eq!(y, array![[4.], [-2.]]);
        assert_eq!(bn.buffers(), [2., 4.]);

        let mut grad = [0.; 2];
        let dx = bn.backward(&[3., 1.], &mut grad, array![[1.], [2.]]).unwrap();
        // the running statistics are constants: dx = gamma / std * dy
        assert_eq!(dx, array![[1.5], [3.]]);
        assert_eq!(grad, [-1., 3.]);
    }

    #[test]
    fn gradients_match_finite_differences() {
        let layer = BatchNorm::new(3, 4, 0.9, 1e-3);
        grad_check::check_layer(layer.into(), 12, 5);
    }
}
