#![allow(dead_code)]

use std::{fs, path::Path};

use wgan::WganConfig;

pub const IMAGES: usize = 12;

/// Writes an IDX3 file of `count` 8x8 images and an IDX1 file labeling them `i % 10`.
pub fn write_mnist_like(dir: &Path, count: usize) {
    let mut images = Vec::new();
    images.extend(0x0803u32.to_be_bytes());
    for dim in [count as u32, 8, 8] {
        images.extend(dim.to_be_bytes());
    }
    for i in 0..count {
        // a vertical bar whose column depends on the image
        images.extend((0..64).map(|p| if p % 8 == i % 8 { 255u8 } else { 0 }));
    }
    fs::write(dir.join("images"), images).unwrap();

    let mut labels = Vec::new();
    labels.extend(0x0801u32.to_be_bytes());
    labels.extend((count as u32).to_be_bytes());
    labels.extend((0..count).map(|i| (i % 10) as u8));
    fs::write(dir.join("labels"), labels).unwrap();
}

/// A configuration small enough to train in a test.
pub fn tiny_config(dir: &Path) -> WganConfig {
    write_mnist_like(dir, IMAGES);

    let mut config = WganConfig::default();
    config.data.images = dir.join("images");
    config.data.labels = Some(dir.join("labels"));

    config.model.latent_dim = 4;
    config.model.image_height = 8;
    config.model.image_width = 8;
    config.model.generator_filters = 2;
    config.model.critic_filters = 1;

    config.training.epochs = 3;
    config.training.batch_size = 4;
    config.training.n_critic = 2;
    config.training.checkpoint_every = 2;
    config.training.checkpoint_dir = dir.join("checkpoints");
    config.training.learning_rate = 1e-3;

    config.sampling.count = 4;
    config.sampling.cols = 2;
    config
}
