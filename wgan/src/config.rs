use std::{fs, path::Path, path::PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Result, WganErr};

/// The whole configuration of a training run, read from JSON.
///
/// Every field has a default so a partial file only overrides what it names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WganConfig {
    pub data: DataConfig,
    pub model: ModelConfig,
    pub training: TrainingConfig,
    pub sampling: SamplingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// IDX3 file with the training images.
    pub images: PathBuf,
    /// IDX1 file with the training labels, only needed to filter by digit.
    pub labels: Option<PathBuf>,
    /// Train only on the images of this digit.
    pub digit: Option<u8>,
    /// Use at most this many images.
    pub limit: Option<usize>,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            images: PathBuf::from("data/train-images-idx3-ubyte"),
            labels: None,
            digit: None,
            limit: None,
        }
    }
}

/// The shape of both networks, stored with every checkpoint so they can be rebuilt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub latent_dim: usize,
    pub image_height: usize,
    pub image_width: usize,
    pub channels: usize,
    /// Filters of the generator's first convolution, the second one has half.
    pub generator_filters: usize,
    /// Filters of the critic's first convolution, doubled on each of the next three.
    pub critic_filters: usize,
    pub dropout: f32,
    pub leaky_relu_alpha: f32,
    pub batch_norm_momentum: f32,
    pub batch_norm_epsilon: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            latent_dim: 100,
            image_height: 28,
            image_width: 28,
            channels: 1,
            generator_filters: 128,
            critic_filters: 16,
            dropout: 0.25,
            leaky_relu_alpha: 0.2,
            batch_norm_momentum: 0.8,
            batch_norm_epsilon: 1e-3,
        }
    }
}

impl ModelConfig {
    /// The `(channels, height, width)` of the images.
    pub fn image_shape(&self) -> (usize, usize, usize) {
        (self.channels, self.image_height, self.image_width)
    }

    pub fn image_len(&self) -> usize {
        self.channels * self.image_height * self.image_width
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub batch_size: usize,
    /// Critic iterations per generator iteration.
    pub n_critic: usize,
    /// Critic parameters are clamped into `[-clip_value, clip_value]` after every update.
    pub clip_value: f32,
    pub learning_rate: f32,
    pub rho: f32,
    pub epsilon: f32,
    pub checkpoint_every: usize,
    pub checkpoint_dir: PathBuf,
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 50,
            batch_size: 64,
            n_critic: 5,
            clip_value: 0.01,
            learning_rate: 5e-5,
            rho: 0.9,
            epsilon: 1e-7,
            checkpoint_every: 10,
            checkpoint_dir: PathBuf::from("checkpoints"),
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub count: usize,
    pub cols: usize,
    /// Write a sample grid every this many epochs while training.
    pub sample_every: Option<usize>,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            count: 25,
            cols: 5,
            sample_every: None,
        }
    }
}

impl WganConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Checks the configuration before any data is loaded.
    ///
    /// # Errors
    /// An `InvalidConfig` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(WganErr::InvalidConfig(msg));
        let (model, training, sampling) = (&self.model, &self.training, &self.sampling);

        if training.epochs == 0 {
            return invalid("training.epochs must be greater than zero".into());
        }
        if training.batch_size == 0 {
            return invalid("training.batch_size must be greater than zero".into());
        }
        if training.n_critic == 0 {
            return invalid("training.n_critic must be greater than zero".into());
        }
        if training.checkpoint_every == 0 {
            return invalid("training.checkpoint_every must be greater than zero".into());
        }
        if !(training.clip_value.is_finite() && training.clip_value > 0.) {
            return invalid(format!(
                "training.clip_value must be positive, got {}",
                training.clip_value
            ));
        }
        if !(training.learning_rate.is_finite() && training.learning_rate > 0.) {
            return invalid(format!(
                "training.learning_rate must be positive, got {}",
                training.learning_rate
            ));
        }
        if !(0.0..1.0).contains(&training.rho) {
            return invalid(format!("training.rho must be within [0, 1), got {}", training.rho));
        }
        if !(training.epsilon.is_finite() && training.epsilon > 0.) {
            return invalid(format!(
                "training.epsilon must be positive, got {}",
                training.epsilon
            ));
        }

        if model.latent_dim == 0 || model.channels == 0 {
            return invalid("model.latent_dim and model.channels must be greater than zero".into());
        }
        if model.image_height == 0
            || model.image_width == 0
            || model.image_height % 4 != 0
            || model.image_width % 4 != 0
        {
            return invalid(format!(
                "the image size must be a non zero multiple of 4, got {}x{}",
                model.image_height, model.image_width
            ));
        }
        if model.generator_filters < 2 || model.critic_filters == 0 {
            return invalid(
                "model.generator_filters must be at least 2 and model.critic_filters at least 1"
                    .into(),
            );
        }
        if !(0.0..1.0).contains(&model.dropout) {
            return invalid(format!(
                "model.dropout must be within [0, 1), got {}",
                model.dropout
            ));
        }
        if !(0.0..1.0).contains(&model.batch_norm_momentum) {
            return invalid(format!(
                "model.batch_norm_momentum must be within [0, 1), got {}",
                model.batch_norm_momentum
            ));
        }
        if !(model.batch_norm_epsilon.is_finite() && model.batch_norm_epsilon > 0.) {
            return invalid(format!(
                "model.batch_norm_epsilon must be positive, got {}",
                model.batch_norm_epsilon
            ));
        }

        if let Some(digit) = self.data.digit {
            if digit > 9 {
                return invalid(format!("data.digit must be a single digit, got {digit}"));
            }
            if self.data.labels.is_none() {
                return invalid("data.digit requires data.labels".into());
            }
        }
        if self.data.limit == Some(0) {
            return invalid("data.limit must be greater than zero".into());
        }

        if sampling.count == 0 || sampling.cols == 0 {
            return invalid("sampling.count and sampling.cols must be greater than zero".into());
        }
        if sampling.sample_every == Some(0) {
            return invalid("sampling.sample_every must be greater than zero".into());
        }

        Ok(())
    }
}
