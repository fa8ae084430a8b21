use ndarray::ArrayView2;

use crate::{arch::loss::LossFn, error::Result, optimization::Optimizer, params::ParamStore};

pub trait Model {
    /// Returns the amount of parameters in the model.
    fn size(&self) -> usize;

    /// Computes the gradient of the loss function with respect to the parameters of the model over
    /// the provided batches. **The parameters get updated** for each batch according to the
    /// optimization algorithm.
    ///
    /// # Arguments
    /// * `store` - The model's parameters and gradient buffer.
    /// * `optimizer` - The optimizer that dictates how to update the weights on each gradient calculation.
    /// * `loss_fn` - The loss function.
    /// * `batches` - The batches of data.
    ///
    /// # Returns
    /// The average batch loss.
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
        I: IntoIterator<Item = (ArrayView2<'a, f32>, ArrayView2<'a, f32>)>;

    /// Runs `backprop` over a single batch.
    fn train_on_batch<O, L>(
        &mut self,
        store: &mut ParamStore,
        optimizer: &mut O,
        loss_fn: &L,
        x: ArrayView2<f32>,
        y: ArrayView2<f32>,
    ) -> Result<f32>
    where
        O: Optimizer,
        L: LossFn,
    {
        self.backprop(store, optimizer, loss_fn, std::iter::once((x, y)))
    }
}
