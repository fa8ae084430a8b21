use ndarray::prelude::*;
use rayon::prelude::*;

use crate::{MlErr, Result, arch::activations::ActFn};

/// A 2D convolution over channels-first images flattened into the rows of a batch.
///
/// Uses "same" padding: the output has `ceil(h / stride) x ceil(w / stride)` positions and the
/// padding that requires is split evenly, the extra row or column going after the image.
///
/// The parameters are laid out as the `(filters, channels * kernel * kernel)` row-major kernel
/// matrix followed by the `filters` biases.
#[derive(Debug, Clone)]
pub struct Conv2d {
    input: (usize, usize, usize),
    filters: usize,
    kernel: usize,
    stride: usize,
    act_fn: Option<ActFn>,

    out_hw: (usize, usize),
    pad: (usize, usize),

    // Forward metadata
    x: Option<Array2<f32>>,
    z: Option<Array2<f32>>,
}

impl Conv2d {
    /// Creates a new `Conv2d` layer.
    ///
    /// # Arguments
    /// * `input` - The `(channels, height, width)` of the input images.
    /// * `filters` - The amount of output channels.
    /// * `kernel` - The side of the square kernel.
    /// * `stride` - The step between two kernel applications.
    /// * `act_fn` - An optional activation function.
    ///
    /// # Errors
    /// An `InvalidLayer` if any dimension or the stride is zero.
    pub fn new(
        input: (usize, usize, usize),
        filters: usize,
        kernel: usize,
        stride: usize,
        act_fn: Option<ActFn>,
    ) -> Result<Self> {
        let (c, h, w) = input;
        if c == 0 || h == 0 || w == 0 || filters == 0 || kernel == 0 || stride == 0 {
            return Err(MlErr::InvalidLayer {
                layer: "conv2d",
                reason: format!(
                    "input {input:?}, filters {filters}, kernel {kernel} and stride {stride} must all be non zero"
                ),
            });
        }

        let same = |len: usize| {
            let out = len.div_ceil(stride);
            let total = ((out - 1) * stride + kernel).saturating_sub(len);
            (out, total / 2)
        };

        let (oh, pad_h) = same(h);
        let (ow, pad_w) = same(w);

        Ok(Self {
            input,
            filters,
            kernel,
            stride,
            act_fn,
            out_hw: (oh, ow),
            pad: (pad_h, pad_w),
            x: None,
            z: None,
        })
    }

    pub fn size(&self) -> usize {
        self.filters * (self.patch_len() + 1)
    }

    pub fn input_len(&self) -> usize {
        let (c, h, w) = self.input;
        c * h * w
    }

    pub fn output_len(&self) -> usize {
        self.filters * self.out_hw.0 * self.out_hw.1
    }

    /// The `(channels, height, width)` of the produced images.
    pub fn output_shape(&self) -> (usize, usize, usize) {
        (self.filters, self.out_hw.0, self.out_hw.1)
    }

    /// The `(fan_in, fan_out)` of the kernel and the amount of biases.
    pub fn param_shapes(&self) -> ((usize, usize), usize) {
        let k2 = self.kernel * self.kernel;
        ((self.input.0 * k2, self.filters * k2), self.filters)
    }

    fn patch_len(&self) -> usize {
        self.input.0 * self.kernel * self.kernel
    }

    pub fn forward(&mut self, params: &[f32], x: Array2<f32>) -> Result<Array2<f32>> {
        if x.ncols() != self.input_len() {
            return Err(MlErr::SizeMismatch {
                what: "conv2d input",
                got: x.ncols(),
                expected: self.input_len(),
            });
        }

        let (w, b) = self.view_params(params)?;
        let mut z = Array2::zeros((x.nrows(), self.output_len()));

        z.axis_iter_mut(Axis(0))
            .into_par_iter()
            .zip(x.axis_iter(Axis(0)).into_par_iter())
            .for_each(|(mut z_row, x_row)| {
                let cols = self.im2col(x_row);
                let mut out = w.dot(&cols);
                out += &b.insert_axis(Axis(1));
                z_row.assign(&Array::from_iter(out.iter().copied()));
            });

        self.x = Some(x);

        let Some(ref act_fn) = self.act_fn else {
            self.z = None;
            return Ok(z);
        };

        let a = z.mapv(|z| act_fn.f(z));
        self.z = Some(z);
        Ok(a)
    }

    pub fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        mut d: Array2<f32>,
    ) -> Result<Array2<f32>> {
        let x = self.x.as_ref().ok_or(MlErr::MissingForwardPass("conv2d"))?;
        if d.ncols() != self.output_len() {
            return Err(MlErr::SizeMismatch {
                what: "conv2d delta",
                got: d.ncols(),
                expected: self.output_len(),
            });
        }

        if let (Some(act_fn), Some(z)) = (&self.act_fn, &self.z) {
            d.zip_mut_with(z, |d, &z| *d *= act_fn.df(z));
        }

        let (w, _) = self.view_params(params)?;
        let (oh, ow) = self.out_hw;
        let filters = self.filters;
        let patch_len = self.patch_len();

        let mut dx = Array2::zeros((x.nrows(), self.input_len()));
        let (dw, db) = dx
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .zip(x.axis_iter(Axis(0)).into_par_iter())
            .zip(d.axis_iter(Axis(0)).into_par_iter())
            .map(|((mut dx_row, x_row), d_row)| {
                let d_out = Array2::from_shape_vec((filters, oh * ow), d_row.to_vec())
                    .expect("delta width checked above");

                let cols = self.im2col(x_row);
                let dw = d_out.dot(&cols.t());
                let db = d_out.sum_axis(Axis(1));

                let dcols = w.t().dot(&d_out);
                self.col2im(dcols.view(), &mut dx_row);

                (dw, db)
            })
            .reduce(
                || (Array2::zeros((filters, patch_len)), Array1::zeros(filters)),
                |(dw_a, db_a), (dw_b, db_b)| (dw_a + dw_b, db_a + db_b),
            );

        let (mut dw_view, mut db_view) = self.view_grad(grad)?;
        dw_view += &dw;
        db_view += &db;

        Ok(dx)
    }

    /// Unrolls the receptive field of every output position into the columns of a
    /// `(channels * kernel * kernel, out_h * out_w)` matrix.
    fn im2col(&self, x: ArrayView1<f32>) -> Array2<f32> {
        let (c, h, w) = self.input;
        let (oh, ow) = self.out_hw;
        let k = self.kernel;
        let mut cols = Array2::zeros((self.patch_len(), oh * ow));

        for ch in 0..c {
            for ki in 0..k {
                for kj in 0..k {
                    let row = (ch * k + ki) * k + kj;
                    for oi in 0..oh {
                        let Some(i) = self.source(oi, ki, self.pad.0, h) else {
                            continue;
                        };

                        for oj in 0..ow {
                            if let Some(j) = self.source(oj, kj, self.pad.1, w) {
                                cols[[row, oi * ow + oj]] = x[(ch * h + i) * w + j];
                            }
                        }
                    }
                }
            }
        }

        cols
    }

    /// The inverse scatter of `im2col`, accumulating overlapping patches.
    fn col2im(&self, cols: ArrayView2<f32>, dx: &mut ArrayViewMut1<f32>) {
        let (c, h, w) = self.input;
        let (oh, ow) = self.out_hw;
        let k = self.kernel;

        for ch in 0..c {
            for ki in 0..k {
                for kj in 0..k {
                    let row = (ch * k + ki) * k + kj;
                    for oi in 0..oh {
                        let Some(i) = self.source(oi, ki, self.pad.0, h) else {
                            continue;
                        };

                        for oj in 0..ow {
                            if let Some(j) = self.source(oj, kj, self.pad.1, w) {
                                dx[(ch * h + i) * w + j] += cols[[row, oi * ow + oj]];
                            }
                        }
                    }
                }
            }
        }
    }

    /// Maps an output position and kernel offset to the input coordinate, `None` on padding.
    fn source(&self, out: usize, offset: usize, pad: usize, len: usize) -> Option<usize> {
        (out * self.stride + offset)
            .checked_sub(pad)
            .filter(|&i| i < len)
    }

    fn view_params<'a>(&self, params: &'a [f32]) -> Result<(ArrayView2<'a, f32>, ArrayView1<'a, f32>)> {
        if params.len() != self.size() {
            return Err(MlErr::SizeMismatch {
                what: "conv2d parameters",
                got: params.len(),
                expected: self.size(),
            });
        }

        let (w, b) = params.split_at(self.filters * self.patch_len());
        let w = ArrayView2::from_shape((self.filters, self.patch_len()), w).expect("checked above");
        Ok((w, ArrayView1::from(b)))
    }

    fn view_grad<'a>(
        &self,
        grad: &'a mut [f32],
    ) -> Result<(ArrayViewMut2<'a, f32>, ArrayViewMut1<'a, f32>)> {
        if grad.len() != self.size() {
            return Err(MlErr::SizeMismatch {
                what: "conv2d gradient",
                got: grad.len(),
                expected: self.size(),
            });
        }

        let (dw, db) = grad.split_at_mut(self.filters * self.patch_len());
        let dw = ArrayViewMut2::from_shape((self.filters, self.patch_len()), dw).expect("checked above");
        Ok((dw, ArrayViewMut1::from(db)))
    }
}
