use std::{cell::RefCell, rc::Rc};

use machine_learning::{
    arch::{
        Mode, Model, Sequential,
        activations::ActFn,
        layers::{Conv2d, Layer},
    },
    params::ParamStore,
};
use ndarray::Array2;
use rand::Rng;

use crate::{Result, WganErr, config::ModelConfig};

/// A model together with its parameters.
#[derive(Debug, Clone)]
pub struct Network {
    model: Sequential,
    store: ParamStore,
}

impl Network {
    /// Pairs `model` with freshly initialized parameters.
    pub fn new<R: Rng + 'static>(model: Sequential, rng: Rc<RefCell<R>>) -> Result<Self> {
        let store = model.init_params(rng)?;
        Ok(Self { model, store })
    }

    pub fn model(&self) -> &Sequential {
        &self.model
    }

    pub fn store(&self) -> &ParamStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut ParamStore {
        &mut self.store
    }

    pub fn size(&self) -> usize {
        self.model.size()
    }

    pub fn input_size(&self) -> usize {
        self.model.input_size()
    }

    pub fn output_size(&self) -> usize {
        self.model.output_size()
    }

    pub fn forward(&mut self, x: Array2<f32>, mode: Mode) -> Result<Array2<f32>> {
        Ok(self.model.forward(&self.store, x, mode)?)
    }

    /// Accumulates the gradient of the last forward pass and returns the delta of its input.
    pub fn backward(&mut self, d: Array2<f32>) -> Result<Array2<f32>> {
        Ok(self.model.backward(&mut self.store, d)?)
    }

    /// The evaluation mode score of every image, for a network with a single output.
    pub fn score(&mut self, images: Array2<f32>) -> Result<Vec<f32>> {
        let scores = self.forward(images, Mode::Eval)?;
        Ok(scores.column(0).to_vec())
    }

    pub fn buffers(&self) -> Vec<f32> {
        self.model.buffers()
    }

    /// Replaces the parameters and buffers, checking both sizes against this network.
    pub fn load(&mut self, params: &[f32], buffers: &[f32]) -> Result<()> {
        if params.len() != self.size() || buffers.len() != self.model.buffers_len() {
            return Err(WganErr::Checkpoint(format!(
                "got {} parameters and {} buffers for a network with {} and {}",
                params.len(),
                buffers.len(),
                self.size(),
                self.model.buffers_len()
            )));
        }

        self.store.load(params)?;
        self.model.load_buffers(buffers)?;
        Ok(())
    }
}

/// Maps `latent_dim` noise into `tanh` images.
///
/// A dense projection to `f` channels at a quarter of the image size, then two nearest
/// upsamplings each followed by a convolution, batch normalization and `relu`, and a final
/// convolution down to the image channels.
pub fn build_generator(config: &ModelConfig) -> Result<Sequential> {
    let (c, h, w) = config.image_shape();
    let f = config.generator_filters;
    let (qh, qw) = (h / 4, w / 4);
    let (momentum, eps) = (config.batch_norm_momentum, config.batch_norm_epsilon);

    let layers = vec![
        Layer::dense((config.latent_dim, f * qh * qw), Some(ActFn::relu())),
        Layer::upsample((f, qh, qw), 2)?,
        Layer::conv2d((f, 2 * qh, 2 * qw), f, 4, 1, None)?,
        Layer::batch_norm(f, 4 * qh * qw, momentum, eps),
        Layer::activation(f * 4 * qh * qw, ActFn::relu()),
        Layer::upsample((f, 2 * qh, 2 * qw), 2)?,
        Layer::conv2d((f, h, w), f / 2, 4, 1, None)?,
        Layer::batch_norm(f / 2, h * w, momentum, eps),
        Layer::activation(f / 2 * h * w, ActFn::relu()),
        Layer::conv2d((f / 2, h, w), c, 4, 1, Some(ActFn::tanh()))?,
    ];

    Ok(Sequential::new(layers)?)
}

/// Scores images with a single unbounded value, higher meaning more realistic.
///
/// Four strided convolutions with `leaky_relu` and dropout, batch normalized after the first,
/// and a linear dense output.
///
/// # Arguments
/// * `config` - The shape of the network.
/// * `seed` - The base seed of the dropout layers.
pub fn build_critic(config: &ModelConfig, seed: u64) -> Result<Sequential> {
    let f = config.critic_filters;
    let (momentum, eps) = (config.batch_norm_momentum, config.batch_norm_epsilon);
    let alpha = config.leaky_relu_alpha;

    let mut layers: Vec<Layer> = Vec::new();
    let mut shape = config.image_shape();

    let convs = [(f, 2), (2 * f, 2), (4 * f, 2), (8 * f, 1)];
    for (i, (filters, stride)) in convs.into_iter().enumerate() {
        let conv = Conv2d::new(shape, filters, 3, stride, None)?;
        shape = conv.output_shape();
        let (c, h, w) = shape;
        layers.push(conv.into());

        if i > 0 {
            layers.push(Layer::batch_norm(c, h * w, momentum, eps));
        }
        layers.push(Layer::activation(c * h * w, ActFn::leaky_relu(alpha)));
        layers.push(Layer::dropout(c * h * w, config.dropout, seed + i as u64)?);
    }

    let (c, h, w) = shape;
    layers.push(Layer::dense((c * h * w, 1), None));

    Ok(Sequential::new(layers)?)
}
