use std::{cell::RefCell, rc::Rc};

use ndarray::Array2;
use rand::Rng;

use super::{Activation, BatchNorm, Conv2d, Dense, Dropout, Upsample};
use crate::{
    Result,
    arch::{Mode, activations::ActFn},
    initialization::{ConstParamGen, ParamGen, RandParamGen},
};

/// A layer of a `Sequential` model.
#[derive(Debug, Clone)]
pub enum Layer {
    Dense(Dense),
    Conv2d(Conv2d),
    BatchNorm(BatchNorm),
    Upsample(Upsample),
    Activation(Activation),
    Dropout(Dropout),
}
use Layer::*;

impl Layer {
    pub fn dense(dim: (usize, usize), act_fn: Option<ActFn>) -> Self {
        Self::Dense(super::Dense::new(dim, act_fn))
    }

    pub fn conv2d(
        input: (usize, usize, usize),
        filters: usize,
        kernel: usize,
        stride: usize,
        act_fn: Option<ActFn>,
    ) -> Result<Self> {
        super::Conv2d::new(input, filters, kernel, stride, act_fn).map(Self::Conv2d)
    }

    pub fn batch_norm(channels: usize, spatial: usize, momentum: f32, epsilon: f32) -> Self {
        Self::BatchNorm(super::BatchNorm::new(channels, spatial, momentum, epsilon))
    }

    pub fn upsample(input: (usize, usize, usize), factor: usize) -> Result<Self> {
        super::Upsample::new(input, factor).map(Self::Upsample)
    }

    pub fn activation(features: usize, act_fn: ActFn) -> Self {
        Self::Activation(super::Activation::new(features, act_fn))
    }

    pub fn dropout(features: usize, rate: f32, seed: u64) -> Result<Self> {
        super::Dropout::new(features, rate, seed).map(Self::Dropout)
    }

    /// The amount of trainable parameters of this layer.
    pub fn size(&self) -> usize {
        match self {
            Dense(l) => l.size(),
            Conv2d(l) => l.size(),
            BatchNorm(l) => l.size(),
            Upsample(_) | Activation(_) | Dropout(_) => 0,
        }
    }

    pub fn input_size(&self) -> usize {
        match self {
            Dense(l) => l.dim().0,
            Conv2d(l) => l.input_len(),
            BatchNorm(l) => l.features(),
            Upsample(l) => l.input_len(),
            Activation(l) => l.features(),
            Dropout(l) => l.features(),
        }
    }

    pub fn output_size(&self) -> usize {
        match self {
            Dense(l) => l.dim().1,
            Conv2d(l) => l.output_len(),
            BatchNorm(l) => l.features(),
            Upsample(l) => l.output_len(),
            Activation(l) => l.features(),
            Dropout(l) => l.features(),
        }
    }

    pub fn forward(&mut self, params: &[f32], x: Array2<f32>, mode: Mode) -> Result<Array2<f32>> {
        match self {
            Dense(l) => l.forward(params, x),
            Conv2d(l) => l.forward(params, x),
            BatchNorm(l) => l.forward(params, x, mode),
            Upsample(l) => l.forward(x),
            Activation(l) => l.forward(x),
            Dropout(l) => l.forward(x, mode),
        }
    }

    /// Accumulates the gradient of the layer's parameters into `grad` and returns the delta of
    /// its input.
    pub fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        d: Array2<f32>,
    ) -> Result<Array2<f32>> {
        match self {
            Dense(l) => l.backward(params, grad, d),
            Conv2d(l) => l.backward(params, grad, d),
            BatchNorm(l) => l.backward(params, grad, d),
            Upsample(l) => l.backward(d),
            Activation(l) => l.backward(d),
            Dropout(l) => l.backward(d),
        }
    }

    /// The non trainable state of the layer.
    pub fn buffers(&self) -> Vec<f32> {
        match self {
            BatchNorm(l) => l.buffers(),
            _ => Vec::new(),
        }
    }

    pub fn buffers_len(&self) -> usize {
        match self {
            BatchNorm(l) => l.buffers_len(),
            _ => 0,
        }
    }

    pub fn load_buffers(&mut self, buffers: &[f32]) -> Result<()> {
        match self {
            BatchNorm(l) => l.load_buffers(buffers),
            _ => Ok(()),
        }
    }

    /// The generators of this layer's initial parameters, in layout order.
    ///
    /// Kernels are Glorot uniform, biases and shifts start at zero and scales at one.
    pub fn init_params<R: Rng + 'static>(
        &self,
        rng: &Rc<RefCell<R>>,
    ) -> Result<Vec<Box<dyn ParamGen>>> {
        let kernel = |(fan_in, fan_out): (usize, usize), biases: usize| -> Result<_> {
            let limit = self.size() - biases;
            let param_gens: Vec<Box<dyn ParamGen>> = vec![
                Box::new(RandParamGen::xavier_uniform(rng.clone(), limit, fan_in, fan_out)?),
                Box::new(ConstParamGen::new(0., biases)),
            ];
            Ok(param_gens)
        };

        match self {
            Dense(l) => {
                let (fans, biases) = l.param_shapes();
                kernel(fans, biases)
            }
            Conv2d(l) => {
                let (fans, biases) = l.param_shapes();
                kernel(fans, biases)
            }
            BatchNorm(l) => Ok(vec![
                Box::new(ConstParamGen::new(1., l.channels())),
                Box::new(ConstParamGen::new(0., l.channels())),
            ]),
            Upsample(_) | Activation(_) | Dropout(_) => Ok(Vec::new()),
        }
    }
}

impl From<super::Dense> for Layer {
    fn from(value: super::Dense) -> Self {
        Self::Dense(value)
    }
}

impl From<super::Conv2d> for Layer {
    fn from(value: super::Conv2d) -> Self {
        Self::Conv2d(value)
    }
}

impl From<super::BatchNorm> for Layer {
    fn from(value: super::BatchNorm) -> Self {
        Self::BatchNorm(value)
    }
}

impl From<super::Upsample> for Layer {
    fn from(value: super::Upsample) -> Self {
        Self::Upsample(value)
    }
}

impl From<super::Activation> for Layer {
    fn from(value: super::Activation) -> Self {
        Self::Activation(value)
    }
}

impl From<super::Dropout> for Layer {
    fn from(value: super::Dropout) -> Self {
        Self::Dropout(value)
    }
}
