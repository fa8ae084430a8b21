pub mod activations;
pub mod layers;
pub mod loss;
mod mode;
mod model;
mod sequential;

pub use mode::Mode;
pub use model::Model;
pub use sequential::Sequential;
