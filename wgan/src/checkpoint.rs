use std::{
    fs,
    path::{Path, PathBuf},
};

use log::info;
use safetensors::{Dtype, SafeTensors, serialize_to_file, tensor::TensorView};
use serde::{Deserialize, Serialize};

use crate::{
    Result, WganErr,
    config::ModelConfig,
    networks::Network,
    training::TrainingMetrics,
};

pub const GENERATOR_FILE: &str = "generator.safetensors";
pub const CRITIC_FILE: &str = "critic.safetensors";
pub const META_FILE: &str = "meta.json";
pub const METRICS_FILE: &str = "metrics.csv";
pub const TRAINER_FILE: &str = "trainer.safetensors";

const DIR_PREFIX: &str = "checkpoint_epoch_";
const PARAMS_TENSOR: &str = "params";
const BUFFERS_TENSOR: &str = "buffers";
const GENERATOR_OPT_TENSOR: &str = "generator_opt";
const CRITIC_OPT_TENSOR: &str = "critic_opt";
const CRITIC_ITERS_TENSOR: &str = "critic_iters";

/// What a checkpoint records besides the networks themselves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub epoch: usize,
    pub critic_loss: f32,
    pub generator_loss: f32,
    pub wasserstein: f32,
    /// RFC 3339 time of the save.
    pub timestamp: String,
    /// The shape both networks were built with.
    pub model: ModelConfig,
}

/// What a resumed run needs to continue exactly where the trainer stopped.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainerState {
    /// Critic iterations taken so far, the generator steps on every `n_critic`-th one.
    pub critic_iters: usize,
    /// The RMSprop moving averages of both networks.
    pub generator_opt: Vec<f32>,
    pub critic_opt: Vec<f32>,
}

/// The directory of the checkpoint of `epoch` inside `dir`.
pub fn checkpoint_path<P: AsRef<Path>>(dir: P, epoch: usize) -> PathBuf {
    dir.as_ref().join(format!("{DIR_PREFIX}{epoch:04}"))
}

/// Saves both networks, the metadata and the metrics history as the checkpoint of `epoch`.
///
/// # Returns
/// The directory of the new checkpoint.
pub fn save_checkpoint<P: AsRef<Path>>(
    dir: P,
    epoch: usize,
    generator: &Network,
    critic: &Network,
    metrics: &TrainingMetrics,
    model: &ModelConfig,
) -> Result<PathBuf> {
    let path = checkpoint_path(dir, epoch);
    fs::create_dir_all(&path)?;

    save_network(path.join(GENERATOR_FILE), generator)?;
    save_network(path.join(CRITIC_FILE), critic)?;

    let last = metrics.last();
    let meta = CheckpointMeta {
        epoch,
        critic_loss: last.map_or(0., |m| m.critic_loss),
        generator_loss: last.map_or(0., |m| m.generator_loss),
        wasserstein: last.map_or(0., |m| m.wasserstein),
        timestamp: chrono::Utc::now().to_rfc3339(),
        model: model.clone(),
    };
    fs::write(path.join(META_FILE), serde_json::to_string_pretty(&meta)?)?;
    metrics.save_csv(path.join(METRICS_FILE))?;

    info!("saved checkpoint to {}", path.display());
    Ok(path)
}

/// Loads both networks from a checkpoint directory.
///
/// # Returns
/// The checkpoint's metadata and metrics history.
pub fn load_checkpoint<P: AsRef<Path>>(
    path: P,
    generator: &mut Network,
    critic: &mut Network,
) -> Result<(CheckpointMeta, TrainingMetrics)> {
    let path = path.as_ref();
    let meta = load_meta(path)?;

    load_network(path.join(GENERATOR_FILE), generator)?;
    load_network(path.join(CRITIC_FILE), critic)?;

    let metrics_path = path.join(METRICS_FILE);
    let metrics = if metrics_path.exists() {
        TrainingMetrics::load_csv(metrics_path)?
    } else {
        TrainingMetrics::new()
    };

    info!("loaded checkpoint from {} (epoch {})", path.display(), meta.epoch);
    Ok((meta, metrics))
}

pub fn load_meta<P: AsRef<Path>>(path: P) -> Result<CheckpointMeta> {
    let content = fs::read_to_string(path.as_ref().join(META_FILE))?;
    Ok(serde_json::from_str(&content)?)
}

/// Every checkpoint inside `dir` with its epoch, oldest first.
pub fn list_checkpoints<P: AsRef<Path>>(dir: P) -> Result<Vec<(usize, PathBuf)>> {
    let dir = dir.as_ref();
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut checkpoints = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }

        let name = entry.file_name();
        let epoch = name
            .to_str()
            .and_then(|name| name.strip_prefix(DIR_PREFIX))
            .and_then(|epoch| epoch.parse().ok());

        if let Some(epoch) = epoch {
            checkpoints.push((epoch, entry.path()));
        }
    }

    checkpoints.sort_by_key(|&(epoch, _)| epoch);
    Ok(checkpoints)
}

pub fn find_latest_checkpoint<P: AsRef<Path>>(dir: P) -> Result<Option<PathBuf>> {
    Ok(list_checkpoints(dir)?.pop().map(|(_, path)| path))
}

/// Writes the optimizer state next to the networks of a checkpoint.
pub fn save_trainer_state<P: AsRef<Path>>(path: P, state: &TrainerState) -> Result<()> {
    let critic_iters = (state.critic_iters as u64).to_le_bytes();

    let tensors = [
        (
            GENERATOR_OPT_TENSOR,
            TensorView::new(
                Dtype::F32,
                vec![state.generator_opt.len()],
                bytemuck::cast_slice(&state.generator_opt),
            )?,
        ),
        (
            CRITIC_OPT_TENSOR,
            TensorView::new(
                Dtype::F32,
                vec![state.critic_opt.len()],
                bytemuck::cast_slice(&state.critic_opt),
            )?,
        ),
        (
            CRITIC_ITERS_TENSOR,
            TensorView::new(Dtype::U64, vec![1], &critic_iters)?,
        ),
    ];

    serialize_to_file(tensors, &None, &path.as_ref().join(TRAINER_FILE))?;
    Ok(())
}

/// Reads the optimizer state of a checkpoint, `None` if it was saved without one.
pub fn load_trainer_state<P: AsRef<Path>>(path: P) -> Result<Option<TrainerState>> {
    let path = path.as_ref().join(TRAINER_FILE);
    if !path.exists() {
        return Ok(None);
    }

    let bytes = fs::read(path)?;
    let tensors = SafeTensors::deserialize(&bytes)?;

    let iters = tensors.tensor(CRITIC_ITERS_TENSOR)?;
    let critic_iters = match (iters.dtype(), iters.data()) {
        (Dtype::U64, &[b0, b1, b2, b3, b4, b5, b6, b7]) => {
            u64::from_le_bytes([b0, b1, b2, b3, b4, b5, b6, b7]) as usize
        }
        (dtype, data) => {
            return Err(WganErr::Checkpoint(format!(
                "tensor {CRITIC_ITERS_TENSOR} is {} bytes of {dtype:?}, expected a single U64",
                data.len()
            )));
        }
    };

    Ok(Some(TrainerState {
        critic_iters,
        generator_opt: read_f32s(&tensors, GENERATOR_OPT_TENSOR)?,
        critic_opt: read_f32s(&tensors, CRITIC_OPT_TENSOR)?,
    }))
}

/// Writes the parameters and buffers of a network as two `F32` tensors.
pub fn save_network<P: AsRef<Path>>(path: P, network: &Network) -> Result<()> {
    let params = network.store().params();
    let buffers = network.buffers();

    let tensors = [
        (
            PARAMS_TENSOR,
            TensorView::new(Dtype::F32, vec![params.len()], bytemuck::cast_slice(params))?,
        ),
        (
            BUFFERS_TENSOR,
            TensorView::new(Dtype::F32, vec![buffers.len()], bytemuck::cast_slice(&buffers))?,
        ),
    ];

    serialize_to_file(tensors, &None, path.as_ref())?;
    Ok(())
}

/// Reads a network written by `save_network` into `network`.
///
/// # Errors
/// A `Checkpoint` error if a tensor is missing, isn't `F32` or doesn't fit the network.
pub fn load_network<P: AsRef<Path>>(path: P, network: &mut Network) -> Result<()> {
    let bytes = fs::read(path.as_ref())?;
    let tensors = SafeTensors::deserialize(&bytes)?;

    let params = read_f32s(&tensors, PARAMS_TENSOR)?;
    let buffers = read_f32s(&tensors, BUFFERS_TENSOR)?;
    network.load(&params, &buffers)
}

fn read_f32s(tensors: &SafeTensors, name: &str) -> Result<Vec<f32>> {
    let tensor = tensors.tensor(name)?;
    if tensor.dtype() != Dtype::F32 {
        return Err(WganErr::Checkpoint(format!(
            "tensor {name} is {:?}, expected F32",
            tensor.dtype()
        )));
    }

    let values = tensor
        .data()
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();

    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_names_sort_by_epoch() {
        let dir = tempfile::tempdir().unwrap();
        for epoch in [10, 2, 100, 1] {
            fs::create_dir_all(checkpoint_path(dir.path(), epoch)).unwrap();
        }
        fs::create_dir_all(dir.path().join("samples")).unwrap();
        fs::write(dir.path().join("checkpoint_epoch_0005"), "not a directory").unwrap();

        let epochs: Vec<usize> = list_checkpoints(dir.path())
            .unwrap()
            .into_iter()
            .map(|(epoch, _)| epoch)
            .collect();
        assert_eq!(epochs, [1, 2, 10, 100]);

        let latest = find_latest_checkpoint(dir.path()).unwrap().unwrap();
        assert!(latest.ends_with("checkpoint_epoch_0100"));
    }

    #[test]
    fn trainer_state_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(load_trainer_state(dir.path()).unwrap(), None);

        let state = TrainerState {
            critic_iters: 17,
            generator_opt: vec![0.5, 0.25],
            critic_opt: vec![1e-3; 5],
        };
        save_trainer_state(dir.path(), &state).unwrap();

        assert_eq!(load_trainer_state(dir.path()).unwrap(), Some(state));
    }

    #[test]
    fn missing_directory_has_no_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_latest_checkpoint(dir.path().join("nope")).unwrap().is_none());
    }
}
