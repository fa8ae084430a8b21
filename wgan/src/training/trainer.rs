use log::{debug, info, warn};
use machine_learning::{
    arch::{
        Mode,
        loss::{LossFn, Wasserstein},
    },
    dataset::Dataset,
    optimization::RmsProp,
};
use ndarray::{Array2, ArrayView2};
use rand::rngs::StdRng;

use super::{EpochMetrics, TrainingMetrics};
use crate::{
    Result, WganErr,
    checkpoint::{self, TrainerState},
    config::{ModelConfig, SamplingConfig, TrainingConfig, WganConfig},
    networks::Network,
    sampling,
};

/// The losses of one critic iteration.
struct CriticStep {
    loss: f32,
    wasserstein: f32,
}

/// Trains a generator against a weight clipped critic.
pub struct WganTrainer {
    training: TrainingConfig,
    sampling: SamplingConfig,
    model: ModelConfig,

    generator: Network,
    critic: Network,
    generator_opt: RmsProp,
    critic_opt: RmsProp,

    rng: StdRng,
    metrics: TrainingMetrics,
    critic_iters: usize,
    generator_iters: usize,
    last_generator_loss: f32,
}

impl WganTrainer {
    /// Creates a new `WganTrainer`.
    ///
    /// # Arguments
    /// * `config` - The run's configuration.
    /// * `generator` - Maps `latent_dim` noise into images.
    /// * `critic` - Scores images with a single value.
    /// * `rng` - Drives the shuffling and the noise.
    ///
    /// # Errors
    /// An `InvalidConfig` if the networks don't fit each other or the configuration.
    pub fn new(
        config: &WganConfig,
        generator: Network,
        critic: Network,
        rng: StdRng,
    ) -> Result<Self> {
        let model = &config.model;
        if generator.input_size() != model.latent_dim {
            return Err(WganErr::InvalidConfig(format!(
                "the generator takes {} inputs but the latent dimension is {}",
                generator.input_size(),
                model.latent_dim
            )));
        }
        if generator.output_size() != critic.input_size() || critic.input_size() != model.image_len() {
            return Err(WganErr::InvalidConfig(format!(
                "the generator outputs {} values, the critic takes {} and an image has {}",
                generator.output_size(),
                critic.input_size(),
                model.image_len()
            )));
        }
        if critic.output_size() != 1 {
            return Err(WganErr::InvalidConfig(format!(
                "the critic must output a single score, not {}",
                critic.output_size()
            )));
        }

        let t = &config.training;
        let generator_opt = RmsProp::new(generator.size(), t.learning_rate, t.rho, t.epsilon);
        let critic_opt = RmsProp::new(critic.size(), t.learning_rate, t.rho, t.epsilon);

        Ok(Self {
            training: config.training.clone(),
            sampling: config.sampling.clone(),
            model: config.model.clone(),
            generator,
            critic,
            generator_opt,
            critic_opt,
            rng,
            metrics: TrainingMetrics::new(),
            critic_iters: 0,
            generator_iters: 0,
            last_generator_loss: 0.,
        })
    }

    /// Continues the history of a resumed run.
    pub fn with_metrics(mut self, metrics: TrainingMetrics) -> Self {
        self.last_generator_loss = metrics.last().map_or(0., |m| m.generator_loss);
        self.metrics = metrics;
        self
    }

    /// Restores the optimizers and the critic iteration count of a resumed run.
    ///
    /// # Errors
    /// A `Checkpoint` error if the optimizer state doesn't fit the networks.
    pub fn with_state(mut self, state: TrainerState) -> Result<Self> {
        let restore = |opt: &mut RmsProp, s: &[f32], which: &str| {
            opt.load_state(s).map_err(|_| {
                WganErr::Checkpoint(format!(
                    "{} optimizer values for the {which} but it has {} parameters",
                    s.len(),
                    opt.state().len()
                ))
            })
        };

        restore(&mut self.generator_opt, &state.generator_opt, "generator")?;
        restore(&mut self.critic_opt, &state.critic_opt, "critic")?;
        self.critic_iters = state.critic_iters;
        self.generator_iters = state.critic_iters / self.training.n_critic;
        Ok(self)
    }

    /// The optimizer state and iteration count a checkpoint needs to resume from.
    pub fn state(&self) -> TrainerState {
        TrainerState {
            critic_iters: self.critic_iters,
            generator_opt: self.generator_opt.state().to_vec(),
            critic_opt: self.critic_opt.state().to_vec(),
        }
    }

    pub fn critic_iters(&self) -> usize {
        self.critic_iters
    }

    pub fn generator_iters(&self) -> usize {
        self.generator_iters
    }

    pub fn generator(&self) -> &Network {
        &self.generator
    }

    pub fn critic(&self) -> &Network {
        &self.critic
    }

    pub fn metrics(&self) -> &TrainingMetrics {
        &self.metrics
    }

    /// Trains from the epoch after `start_epoch` up to the configured amount of epochs.
    ///
    /// Every batch is one critic iteration and every `n_critic` critic iterations the generator
    /// takes one step. Checkpoints are written every `checkpoint_every` epochs and after the last
    /// one.
    pub fn train(&mut self, dataset: &mut Dataset, start_epoch: usize) -> Result<&TrainingMetrics> {
        if dataset.x_size() != self.model.image_len() {
            return Err(WganErr::InvalidDataset(format!(
                "the dataset has {} values per image but the model expects {}",
                dataset.x_size(),
                self.model.image_len()
            )));
        }

        let epochs = self.training.epochs;
        info!(
            "training epochs {} to {epochs} on {} images, {} critic iterations per generator iteration",
            start_epoch + 1,
            dataset.len(),
            self.training.n_critic
        );

        for epoch in start_epoch + 1..=epochs {
            let metrics = self.train_epoch(dataset, epoch)?;
            self.metrics.record(metrics);

            info!(
                "epoch {epoch}/{epochs} [critic loss: {:.6}] [generator loss: {:.6}] [wasserstein: {:.6}]",
                metrics.critic_loss, metrics.generator_loss, metrics.wasserstein
            );

            if epoch % self.training.checkpoint_every == 0 || epoch == epochs {
                let path = checkpoint::save_checkpoint(
                    &self.training.checkpoint_dir,
                    epoch,
                    &self.generator,
                    &self.critic,
                    &self.metrics,
                    &self.model,
                )?;
                checkpoint::save_trainer_state(path, &self.state())?;
            }

            if self.sampling.sample_every.is_some_and(|every| epoch % every == 0) {
                self.save_samples(epoch);
            }
        }

        Ok(&self.metrics)
    }

    fn train_epoch(&mut self, dataset: &mut Dataset, epoch: usize) -> Result<EpochMetrics> {
        dataset.shuffle(&mut self.rng);

        let (mut critic_loss, mut wasserstein, mut critic_steps) = (0., 0., 0);
        let (mut generator_loss, mut generator_steps) = (0., 0);

        for (batch, (x, _)) in dataset.batches(self.training.batch_size)?.enumerate() {
            let step = self.critic_step(x)?;
            critic_loss += step.loss;
            wasserstein += step.wasserstein;
            critic_steps += 1;
            self.critic_iters += 1;

            if self.critic_iters % self.training.n_critic == 0 {
                let loss = self.generator_step()?;
                generator_loss += loss;
                generator_steps += 1;
                debug!("epoch {epoch} batch {batch}: critic {:.6}, generator {loss:.6}", step.loss);
            } else {
                debug!("epoch {epoch} batch {batch}: critic {:.6}", step.loss);
            }
        }

        if generator_steps > 0 {
            self.last_generator_loss = generator_loss / generator_steps as f32;
        }

        let critic_steps = critic_steps.max(1) as f32;
        Ok(EpochMetrics {
            epoch,
            critic_loss: critic_loss / critic_steps,
            generator_loss: self.last_generator_loss,
            wasserstein: wasserstein / critic_steps,
        })
    }

    /// One critic update on a real batch and an equally sized generated batch, followed by the
    /// clipping of every critic parameter.
    fn critic_step(&mut self, real: ArrayView2<f32>) -> Result<CriticStep> {
        let n = real.nrows();
        let noise = sampling::noise(&mut self.rng, n, self.model.latent_dim);
        let fake = self.generator.forward(noise, Mode::Train)?;

        self.critic.store_mut().zero_grad();

        let real_labels = Array2::from_elem((n, 1), Wasserstein::REAL);
        let real_scores = self.critic.forward(real.to_owned(), Mode::Train)?;
        let real_loss = Wasserstein.loss(real_scores.view(), real_labels.view());
        self.critic
            .backward(Wasserstein.loss_prime(real_scores.view(), real_labels.view()))?;

        let fake_labels = Array2::from_elem((n, 1), Wasserstein::FAKE);
        let fake_scores = self.critic.forward(fake, Mode::Train)?;
        let fake_loss = Wasserstein.loss(fake_scores.view(), fake_labels.view());
        self.critic
            .backward(Wasserstein.loss_prime(fake_scores.view(), fake_labels.view()))?;

        let store = self.critic.store_mut();
        store.optimize(&mut self.critic_opt)?;
        store.clip(self.training.clip_value)?;

        Ok(CriticStep {
            loss: 0.5 * (real_loss + fake_loss),
            wasserstein: real_scores.mean().unwrap_or_default() - fake_scores.mean().unwrap_or_default(),
        })
    }

    /// One generator update through the frozen critic.
    ///
    /// The critic's batch norms keep their running statistics and its parameters aren't updated,
    /// the gradient it accumulates here is zeroed by the next critic step.
    fn generator_step(&mut self) -> Result<f32> {
        let n = self.training.batch_size;
        let noise = sampling::noise(&mut self.rng, n, self.model.latent_dim);

        self.generator.store_mut().zero_grad();

        let fake = self.generator.forward(noise, Mode::Train)?;
        let scores = self.critic.forward(fake, Mode::Frozen)?;
        let labels = Array2::from_elem((n, 1), Wasserstein::REAL);
        let loss = Wasserstein.loss(scores.view(), labels.view());

        let d = self
            .critic
            .backward(Wasserstein.loss_prime(scores.view(), labels.view()))?;
        self.generator.backward(d)?;
        self.generator.store_mut().optimize(&mut self.generator_opt)?;
        self.generator_iters += 1;

        Ok(loss)
    }

    /// Writes a grid of generated samples next to the checkpoints, only warning on failure.
    fn save_samples(&mut self, epoch: usize) {
        let (count, cols) = (self.sampling.count, self.sampling.cols);
        let noise = sampling::noise(&mut self.rng, count, self.model.latent_dim);
        let path = self
            .training
            .checkpoint_dir
            .join("samples")
            .join(format!("epoch_{epoch:04}.png"));

        let saved = sampling::generate(&mut self.generator, noise).and_then(|images| {
            sampling::save_grid(&path, images.view(), self.model.image_shape(), cols)
        });

        if let Err(e) = saved {
            warn!("failed to save the epoch {epoch} samples to {}: {e}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, path::Path, rc::Rc};

    use approx::assert_relative_eq;
    use rand::SeedableRng;

    use super::*;
    use crate::networks;

    fn tiny_config(dir: &Path, n_critic: usize, epochs: usize) -> WganConfig {
        let mut config = WganConfig::default();
        config.model.latent_dim = 4;
        config.model.image_height = 8;
        config.model.image_width = 8;
        config.model.generator_filters = 2;
        config.model.critic_filters = 1;

        config.training.epochs = epochs;
        config.training.batch_size = 2;
        config.training.n_critic = n_critic;
        config.training.checkpoint_every = 100;
        config.training.checkpoint_dir = dir.to_path_buf();
        config.training.learning_rate = 1e-3;
        config
    }

    fn trainer(config: &WganConfig) -> WganTrainer {
        let rng = Rc::new(RefCell::new(StdRng::seed_from_u64(3)));
        let generator = networks::build_generator(&config.model).unwrap();
        let critic = networks::build_critic(&config.model, 3).unwrap();
        let generator = Network::new(generator, rng.clone()).unwrap();
        let critic = Network::new(critic, rng).unwrap();

        WganTrainer::new(config, generator, critic, StdRng::seed_from_u64(7)).unwrap()
    }

    fn images(n: usize) -> Array2<f32> {
        Array2::from_shape_fn((n, 64), |(i, j)| if j % 8 == i % 8 { 1. } else { -1. })
    }

    fn dataset(n: usize) -> Dataset {
        Dataset::from_arrays(images(n), Array2::zeros((n, 0))).unwrap()
    }

    #[test]
    fn generator_step_leaves_the_critic_frozen() {
        let dir = tempfile::tempdir().unwrap();
        let mut trainer = trainer(&tiny_config(dir.path(), 2, 1));

        let critic_params = trainer.critic.store().params().to_vec();
        let critic_buffers = trainer.critic.buffers();
        let generator_params = trainer.generator.store().params().to_vec();

        trainer.generator_step().unwrap();

        assert_eq!(trainer.critic.store().params(), critic_params.as_slice());
        assert_eq!(trainer.critic.buffers(), critic_buffers);
        assert_ne!(trainer.generator.store().params(), generator_params.as_slice());
        assert_eq!(trainer.generator_iters(), 1);
    }

    #[test]
    fn generator_steps_every_n_critic_iterations_across_epochs() {
        let dir = tempfile::tempdir().unwrap();
        let mut trainer = trainer(&tiny_config(dir.path(), 2, 1));
        // 3 batches per epoch
        let mut data = dataset(6);

        trainer.train(&mut data, 0).unwrap();
        assert_eq!((trainer.critic_iters(), trainer.generator_iters()), (3, 1));

        trainer.training.epochs = 2;
        trainer.train(&mut data, 1).unwrap();
        assert_eq!((trainer.critic_iters(), trainer.generator_iters()), (6, 3));
        assert_eq!(trainer.metrics().len(), 2);
    }

    #[test]
    fn epochs_without_a_generator_step_carry_its_loss() {
        let dir = tempfile::tempdir().unwrap();
        let mut trainer = trainer(&tiny_config(dir.path(), 5, 1));
        let mut data = dataset(6);

        let generator_params = trainer.generator.store().params().to_vec();
        trainer.train(&mut data, 0).unwrap();
        assert_eq!(trainer.generator_iters(), 0);
        assert_eq!(trainer.generator.store().params(), generator_params.as_slice());

        // the only generator step is the 5th critic iteration, in the second epoch
        trainer.training.epochs = 3;
        trainer.train(&mut data, 1).unwrap();
        assert_eq!((trainer.critic_iters(), trainer.generator_iters()), (9, 1));

        let epochs = trainer.metrics().epochs();
        assert_eq!(epochs[0].generator_loss, 0.);
        assert_ne!(epochs[1].generator_loss, 0.);
        assert_eq!(epochs[2].generator_loss, epochs[1].generator_loss);
    }

    #[test]
    fn critic_step_reports_the_score_gap() {
        let dir = tempfile::tempdir().unwrap();
        let config = tiny_config(dir.path(), 2, 1);
        let mut trainer = trainer(&config);
        let real = images(4);

        // replay the step on copies to get the scores the critic gave before its update
        let mut rng = trainer.rng.clone();
        let mut generator = trainer.generator.clone();
        let mut critic = trainer.critic.clone();
        let noise = sampling::noise(&mut rng, 4, config.model.latent_dim);
        let fake = generator.forward(noise, Mode::Train).unwrap();
        let real_scores = critic.forward(real.clone(), Mode::Train).unwrap();
        let fake_scores = critic.forward(fake, Mode::Train).unwrap();
        let gap = real_scores.mean().unwrap() - fake_scores.mean().unwrap();

        let step = trainer.critic_step(real.view()).unwrap();
        assert_relative_eq!(step.wasserstein, gap, epsilon = 1e-6);
        assert_relative_eq!(step.loss, -0.5 * gap, epsilon = 1e-6);

        let clip = config.training.clip_value;
        assert!(trainer.critic.store().params().iter().all(|p| p.abs() <= clip));
    }

    #[test]
    fn state_restores_the_schedule() {
        let dir = tempfile::tempdir().unwrap();
        let config = tiny_config(dir.path(), 2, 1);
        let mut trained = trainer(&config);
        trained.train(&mut dataset(6), 0).unwrap();

        let state = trained.state();
        assert_eq!(state.critic_iters, 3);

        let resumed = trainer(&config).with_state(state.clone()).unwrap();
        assert_eq!(resumed.state(), state);
        assert_eq!(resumed.generator_iters(), 1);

        let mut wrong = state;
        wrong.critic_opt.pop();
        assert!(matches!(
            trainer(&config).with_state(wrong),
            Err(WganErr::Checkpoint(_))
        ));
    }
}
