pub mod checkpoint;
pub mod config;
pub mod data;
pub mod error;
pub mod networks;
pub mod sampling;
pub mod training;

pub use config::WganConfig;
pub use error::{Result, WganErr};
pub use training::{TrainingMetrics, WganTrainer};
