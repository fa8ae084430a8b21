use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::Result;

/// The averages of one training epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub critic_loss: f32,
    pub generator_loss: f32,
    /// `mean D(real) - mean D(fake)`, the critic's estimate of the Wasserstein distance.
    pub wasserstein: f32,
}

/// The per epoch history of a training run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingMetrics {
    epochs: Vec<EpochMetrics>,
}

impl TrainingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, metrics: EpochMetrics) {
        self.epochs.push(metrics);
    }

    pub fn epochs(&self) -> &[EpochMetrics] {
        &self.epochs
    }

    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    pub fn last(&self) -> Option<&EpochMetrics> {
        self.epochs.last()
    }

    /// Drops every epoch after `epoch`, used when resuming from an older checkpoint.
    pub fn truncate(&mut self, epoch: usize) {
        self.epochs.retain(|m| m.epoch <= epoch);
    }

    pub fn save_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        for epoch in &self.epochs {
            writer.serialize(epoch)?;
        }

        writer.flush()?;
        Ok(())
    }

    pub fn load_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)?;
        let epochs = reader.deserialize().collect::<csv::Result<_>>()?;
        Ok(Self { epochs })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn epoch(epoch: usize) -> EpochMetrics {
        EpochMetrics {
            epoch,
            critic_loss: -0.5 * epoch as f32,
            generator_loss: 0.25,
            wasserstein: 1e-3,
        }
    }

    #[test]
    fn csv_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.csv");

        let mut metrics = TrainingMetrics::new();
        (1..=3).for_each(|e| metrics.record(epoch(e)));
        metrics.save_csv(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("epoch,critic_loss,generator_loss,wasserstein"));
        assert_eq!(TrainingMetrics::load_csv(&path).unwrap(), metrics);
    }

    #[test]
    fn truncate_drops_later_epochs() {
        let mut metrics = TrainingMetrics::new();
        (1..=5).for_each(|e| metrics.record(epoch(e)));

        metrics.truncate(2);
        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics.last().unwrap().epoch, 2);
    }
}
