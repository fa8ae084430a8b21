use ndarray::prelude::*;

use crate::{MlErr, Result};

/// Nearest neighbour upsampling of channels-first images by an integer factor.
#[derive(Debug, Clone)]
pub struct Upsample {
    input: (usize, usize, usize),
    factor: usize,
}

impl Upsample {
    /// Creates a new `Upsample` layer.
    ///
    /// # Errors
    /// An `InvalidLayer` if the factor or any input dimension is zero.
    pub fn new(input: (usize, usize, usize), factor: usize) -> Result<Self> {
        let (c, h, w) = input;
        if factor == 0 || c == 0 || h == 0 || w == 0 {
            return Err(MlErr::InvalidLayer {
                layer: "upsample",
                reason: format!("input {input:?} and factor {factor} must all be non zero"),
            });
        }

        Ok(Self { input, factor })
    }

    pub fn input_len(&self) -> usize {
        let (c, h, w) = self.input;
        c * h * w
    }

    pub fn output_len(&self) -> usize {
        self.input_len() * self.factor * self.factor
    }

    pub fn output_shape(&self) -> (usize, usize, usize) {
        let (c, h, w) = self.input;
        (c, h * self.factor, w * self.factor)
    }

    pub fn forward(&self, x: Array2<f32>) -> Result<Array2<f32>> {
        if x.ncols() != self.input_len() {
            return Err(MlErr::SizeMismatch {
                what: "upsample input",
                got: x.ncols(),
                expected: self.input_len(),
            });
        }

        let n = x.nrows();
        let (c, h, w) = self.input;
        let f = self.factor as isize;
        let x = x
            .as_standard_layout()
            .into_owned()
            .into_shape_with_order((n, c, h, w))
            .expect("input width checked above");

        let mut y = Array4::zeros((n, c, h * self.factor, w * self.factor));
        for di in 0..f {
            for dj in 0..f {
                y.slice_mut(s![.., .., di..;f, dj..;f]).assign(&x);
            }
        }

        Ok(y
            .into_shape_with_order((n, self.output_len()))
            .expect("standard layout"))
    }

    /// Every input pixel receives the sum of the deltas of the pixels it was copied into.
    pub fn backward(&self, d: Array2<f32>) -> Result<Array2<f32>> {
        if d.ncols() != self.output_len() {
            return Err(MlErr::SizeMismatch {
                what: "upsample delta",
                got: d.ncols(),
                expected: self.output_len(),
            });
        }

        let n = d.nrows();
        let (c, h, w) = self.input;
        let f = self.factor as isize;
        let d = d
            .as_standard_layout()
            .into_owned()
            .into_shape_with_order((n, c, h * self.factor, w * self.factor))
            .expect("delta width checked above");

        let mut dx = Array4::zeros((n, c, h, w));
        for di in 0..f {
            for dj in 0..f {
                dx += &d.slice(s![.., .., di..;f, dj..;f]);
            }
        }

        Ok(dx
            .into_shape_with_order((n, self.input_len()))
            .expect("standard layout"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::layers::grad_check;

    #[test]
    fn repeats_every_pixel() {
        let up = Upsample::new((1, 2, 2), 2).unwrap();
        let y = up.forward(array![[1., 2., 3., 4.]]).unwrap();

        let expected = array![[
            1., 1., 2., 2., //
            1., 1., 2., 2., //
            3., 3., 4., 4., //
            3., 3., 4., 4.,
        ]];
        assert_eq!(y, expected);
        assert_eq!(up.output_shape(), (1, 4, 4));
    }

    #[test]
    fn backward_sums_the_copies() {
        let up = Upsample::new((2, 1, 1), 2).unwrap();
        let d = array![[1., 2., 3., 4., 10., 20., 30., 40.]];
        assert_eq!(up.backward(d).unwrap(), array![[10., 100.]]);
    }

    #[test]
    fn gradients_match_finite_differences() {
        let layer = Upsample::new((2, 3, 2), 2).unwrap();
        grad_check::check_layer(layer.into(), 12, 3);
    }
}
