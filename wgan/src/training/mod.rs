mod metrics;
mod trainer;

use std::{cell::RefCell, rc::Rc};

use log::{info, warn};
use rand::{SeedableRng, rngs::StdRng};

pub use metrics::{EpochMetrics, TrainingMetrics};
pub use trainer::WganTrainer;

use crate::{
    Result, WganErr, checkpoint,
    config::WganConfig,
    data,
    networks::{self, Network},
};

/// Runs a whole training session as configured.
///
/// With `resume`, the networks, optimizers and metrics history are restored from the latest
/// checkpoint in the checkpoint directory and training continues from the epoch after it.
/// Without a checkpoint to resume from, training starts from scratch.
///
/// # Returns
/// The metrics of every epoch, including the resumed ones.
pub fn run(config: &WganConfig, resume: bool) -> Result<TrainingMetrics> {
    config.validate()?;
    let seed = config.training.seed;

    let mut dataset = data::load_dataset(&config.data, &config.model)?;

    let init_rng = Rc::new(RefCell::new(StdRng::seed_from_u64(seed)));
    let mut generator = Network::new(networks::build_generator(&config.model)?, init_rng.clone())?;
    let mut critic = Network::new(networks::build_critic(&config.model, seed)?, init_rng)?;
    info!(
        "generator has {} parameters, critic has {}",
        generator.size(),
        critic.size()
    );

    let mut start_epoch = 0;
    let mut metrics = TrainingMetrics::new();
    let mut state = None;

    let latest = if resume {
        checkpoint::find_latest_checkpoint(&config.training.checkpoint_dir)?
    } else {
        None
    };

    if let Some(path) = latest {
        let meta = checkpoint::load_meta(&path)?;
        if meta.model != config.model {
            return Err(WganErr::Checkpoint(format!(
                "{} was trained with a different model configuration",
                path.display()
            )));
        }

        let (meta, mut history) = checkpoint::load_checkpoint(&path, &mut generator, &mut critic)?;
        history.truncate(meta.epoch);
        start_epoch = meta.epoch;
        metrics = history;

        state = checkpoint::load_trainer_state(&path)?;
        if state.is_none() {
            warn!(
                "{} has no optimizer state, both optimizers restart from scratch",
                path.display()
            );
        }
        info!("resuming after epoch {start_epoch}");
    } else if resume {
        info!(
            "no checkpoint in {}, starting from scratch",
            config.training.checkpoint_dir.display()
        );
    }

    if start_epoch >= config.training.epochs {
        info!("already trained for {start_epoch} epochs");
        return Ok(metrics);
    }

    // a resumed run doesn't replay the noise of the epochs it skips
    let rng = StdRng::seed_from_u64(seed.wrapping_add(start_epoch as u64));
    let mut trainer = WganTrainer::new(config, generator, critic, rng)?.with_metrics(metrics);
    if let Some(state) = state {
        trainer = trainer.with_state(state)?;
    }
    let metrics = trainer.train(&mut dataset, start_epoch)?;

    Ok(metrics.clone())
}
