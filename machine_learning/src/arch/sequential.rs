use std::{cell::RefCell, rc::Rc};

use ndarray::{Array2, ArrayView2};
use rand::Rng;

use super::{Mode, Model, layers::Layer, loss::LossFn};
use crate::{
    MlErr, Result,
    initialization::{ChainedParamGen, ParamGen},
    optimization::Optimizer,
    params::ParamStore,
};

/// A sequential model: information flows forward when computing an output and backward when
/// computing the *deltas* of its layers.
#[derive(Debug, Clone)]
pub struct Sequential {
    layers: Vec<Layer>,
}

impl Sequential {
    /// Creates a new `Sequential`.
    ///
    /// # Arguments
    /// * `layers` - The layers the sequential is composed of.
    ///
    /// # Returns
    /// A new `Sequential` instance or an error if two adjacent layers don't fit together.
    pub fn new<I>(layers: I) -> Result<Self>
    where
        I: IntoIterator<Item = Layer>,
    {
        let model = Self {
            layers: layers.into_iter().collect(),
        };

        model.validate()?;
        Ok(model)
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn input_size(&self) -> usize {
        self.layers.first().map_or(0, Layer::input_size)
    }

    pub fn output_size(&self) -> usize {
        self.layers.last().map_or(0, Layer::output_size)
    }

    /// Checks that every layer takes as many inputs as the previous one outputs.
    pub fn validate(&self) -> Result<()> {
        for (i, pair) in self.layers.windows(2).enumerate() {
            let (previous_output, input) = (pair[0].output_size(), pair[1].input_size());
            if previous_output != input {
                return Err(MlErr::IncompatibleLayers {
                    layer: i + 1,
                    input,
                    previous_output,
                });
            }
        }

        Ok(())
    }

    /// Samples the initial parameters of every layer from its default initializers.
    ///
    /// # Arguments
    /// * `rng` - The random number generator shared by every initializer.
    pub fn init_params<R: Rng + 'static>(&self, rng: Rc<RefCell<R>>) -> Result<ParamStore> {
        let mut param_gen = ChainedParamGen::default();
        for layer in &self.layers {
            for layer_gen in layer.init_params(&rng)? {
                param_gen.push(layer_gen);
            }
        }

        let size = self.size();
        let params = param_gen.sample(size).unwrap_or_default();
        if params.len() != size {
            return Err(MlErr::ParamGenExhausted {
                got: params.len(),
                expected: size,
            });
        }

        Ok(ParamStore::new(params))
    }

    /// Makes a forward pass through the network.
    ///
    /// # Arguments
    /// * `store` - The model's parameters.
    /// * `x` - The input data.
    /// * `mode` - Whether batch normalization and dropout run in training or inference mode.
    ///
    /// # Returns
    /// The prediction for the given input or an error if occurred.
    pub fn forward(&mut self, store: &ParamStore, mut x: Array2<f32>, mode: Mode) -> Result<Array2<f32>> {
        let mut front = store.front();
        let nlayers = self.layers.len();

        for (i, layer) in self.layers.iter_mut().enumerate() {
            let size = layer.size();
            let params = front.next(size).ok_or(MlErr::SizeMismatch {
                what: "layers",
                got: i,
                expected: nlayers,
            })?;

            x = layer.forward(params, x, mode)?;
        }

        Ok(x)
    }

    /// Backpropagates `d`, the delta of the model's output, through the layers of the last
    /// forward pass.
    ///
    /// The gradient of every parameter is accumulated into the store's gradient.
    ///
    /// # Returns
    /// The delta of the model's input.
    pub fn backward(&mut self, store: &mut ParamStore, mut d: Array2<f32>) -> Result<Array2<f32>> {
        let mut back = store.back();
        let nlayers = self.layers.len();

        for (i, layer) in self.layers.iter_mut().rev().enumerate() {
            let size = layer.size();
            let (params, grad) = back.next(size).ok_or(MlErr::SizeMismatch {
                what: "layers",
                got: i,
                expected: nlayers,
            })?;

            d = layer.backward(params, grad, d)?;
        }

        Ok(d)
    }

    /// Every layer's buffers, concatenated in layer order.
    pub fn buffers(&self) -> Vec<f32> {
        self.layers.iter().flat_map(Layer::buffers).collect()
    }

    pub fn buffers_len(&self) -> usize {
        self.layers.iter().map(Layer::buffers_len).sum()
    }

    /// Restores the buffers saved by `buffers`.
    pub fn load_buffers(&mut self, buffers: &[f32]) -> Result<()> {
        if buffers.len() != self.buffers_len() {
            return Err(MlErr::SizeMismatch {
                what: "model buffers",
                got: buffers.len(),
                expected: self.buffers_len(),
            });
        }

        let mut rest = buffers;
        for layer in &mut self.layers {
            let (layer_buffers, tail) = rest.split_at(layer.buffers_len());
            layer.load_buffers(layer_buffers)?;
            rest = tail;
        }

        Ok(())
    }
}

impl Model for Sequential {
    fn size(&self) -> usize {
        self.layers.iter().map(Layer::size).sum()
    }

    // NOTE: since getting the actual loss would require forwarding over all batches again at
    // the end of the backprop iterations, we are approximating it by averaging the loss at
    // each batch.
    fn backprop<'a, O, L, I>(
        &mut self,
        store: &mut ParamStore,
        optimizer: &mut O,
        loss_fn: &L,
        batches: I,
    ) -> Result<f32>
    where
        O: Optimizer,
        L: LossFn,
        I: IntoIterator<Item = (ArrayView2<'a, f32>, ArrayView2<'a, f32>)>,
    {
        let mut total_loss = 0.0;
        let mut num_batches = 0;

        for (x, y) in batches {
            store.zero_grad();

            let y_pred = self.forward(store, x.to_owned(), Mode::Train)?;
            total_loss += loss_fn.loss(y_pred.view(), y);
            num_batches += 1;

            let d = loss_fn.loss_prime(y_pred.view(), y);
            self.backward(store, d)?;
            store.optimize(optimizer)?;
        }

        Ok(total_loss / num_batches.max(1) as f32)
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::{
        arch::{activations::ActFn, loss::Mse},
        dataset::Dataset,
        optimization::{Adam, GradientDescent},
    };

    fn seeded_rng(seed: u64) -> Rc<RefCell<StdRng>> {
        Rc::new(RefCell::new(StdRng::seed_from_u64(seed)))
    }

    #[test]
    fn incompatible_layers_are_rejected() {
        let layers = [Layer::dense((2, 3), None), Layer::dense((4, 1), None)];

        match Sequential::new(layers) {
            Err(MlErr::IncompatibleLayers {
                layer,
                input,
                previous_output,
            }) => assert_eq!((layer, input, previous_output), (1, 4, 3)),
            other => panic!("expected incompatible layers, got {other:?}"),
        }
    }

    #[test]
    fn forward_uses_each_layer_slice() {
        let mut model = Sequential::new([Layer::dense((1, 1), None), Layer::dense((1, 1), None)]).unwrap();
        // y = 3 * (2 * x + 1) - 1
        let store = ParamStore::new(vec![2., 1., 3., -1.]);

        let y = model.forward(&store, array![[1.], [0.]], Mode::Eval).unwrap();
        assert_eq!(y, array![[8.], [2.]]);
    }

    #[test]
    fn backward_returns_the_input_delta() {
        let mut model = Sequential::new([Layer::dense((2, 1), None)]).unwrap();
        let mut store = ParamStore::new(vec![2., -3., 0.5]);

        model.forward(&store, array![[1., 1.]], Mode::Train).unwrap();
        let dx = model.backward(&mut store, array![[1.]]).unwrap();

        assert_eq!(dx, array![[2., -3.]]);
        assert_eq!(store.grad(), &[1., 1., 1.]);
    }

    #[test]
    fn buffers_round_trip() {
        let layers = [
            Layer::dense((2, 4), None),
            Layer::batch_norm(4, 1, 0.5, 1e-3),
            Layer::dense((4, 2), None),
            Layer::batch_norm(2, 1, 0.5, 1e-3),
        ];
        let mut model = Sequential::new(layers).unwrap();
        let store = model.init_params(seeded_rng(0)).unwrap();

        model.forward(&store, array![[1., 2.], [3., -4.]], Mode::Train).unwrap();
        let buffers = model.buffers();
        assert_eq!(buffers.len(), 12);

        let mut fresh = Sequential::new(model.layers().to_vec()).unwrap();
        fresh.load_buffers(&vec![0.; 12]).unwrap();
        fresh.load_buffers(&buffers).unwrap();
        assert_eq!(fresh.buffers(), buffers);

        assert!(fresh.load_buffers(&buffers[1..]).is_err());
    }

    #[test]
    fn init_params_is_reproducible() {
        let model = Sequential::new([
            Layer::conv2d((1, 4, 4), 2, 3, 1, None).unwrap(),
            Layer::batch_norm(2, 16, 0.8, 1e-3),
            Layer::dense((32, 1), None),
        ])
        .unwrap();

        let a = model.init_params(seeded_rng(9)).unwrap();
        let b = model.init_params(seeded_rng(9)).unwrap();
        assert_eq!(a.len(), model.size());
        assert_eq!(a.params(), b.params());
    }

    #[test]
    fn xor_converges() {
        let xor = [
            0.0, 0.0, 0.0, //
            0.0, 1.0, 1.0, //
            1.0, 0.0, 1.0, //
            1.0, 1.0, 0.0, //
        ];

        let dataset = Dataset::new(xor.into(), 2, 1).unwrap();
        let mut model = Sequential::new([
            Layer::dense((2, 8), Some(ActFn::tanh())),
            Layer::dense((8, 1), Some(ActFn::sigmoid(1.))),
        ])
        .unwrap();

        let mut store = model.init_params(seeded_rng(5)).unwrap();
        let mut optimizer = Adam::new(store.len(), 0.05, 0.9, 0.999, 1e-7);

        for _ in 0..1500 {
            model
                .backprop(&mut store, &mut optimizer, &Mse, dataset.batches(4).unwrap())
                .unwrap();
        }

        let y_pred = model.forward(&store, dataset.x().to_owned(), Mode::Eval).unwrap();
        let err = Mse.loss(y_pred.view(), dataset.y());
        assert!(err < 0.01, "xor did not converge: {err}");
    }

    #[test]
    fn train_on_batch_takes_one_step() {
        let mut model = Sequential::new([Layer::dense((1, 1), None)]).unwrap();
        let mut store = ParamStore::new(vec![0., 0.]);
        let mut optimizer = GradientDescent::new(0.5);

        let (x, y) = (array![[1.]], array![[2.]]);
        let loss = model
            .train_on_batch(&mut store, &mut optimizer, &Mse, x.view(), y.view())
            .unwrap();

        // d = 2 * (0 - 2) = -4 for both the weight and the bias
        assert_eq!(loss, 4.);
        assert_eq!(store.params(), &[2., 2.]);
    }
}
