mod loss_fn;
mod mse;
mod wasserstein;

pub use loss_fn::LossFn;
pub use mse::Mse;
pub use wasserstein::Wasserstein;
