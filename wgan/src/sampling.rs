use std::{cell::RefCell, path::Path, rc::Rc};

use image::{GrayImage, Luma};
use log::info;
use machine_learning::arch::Mode;
use ndarray::{Array2, ArrayView2};
use ndarray_rand::{RandomExt, rand_distr::StandardNormal};
use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::{
    Result, WganErr,
    checkpoint::{self, CheckpointMeta},
    data::denormalize,
    networks::{self, Network},
};

/// Standard normal noise, one `latent_dim` row per image to generate.
pub fn noise<R: Rng>(rng: &mut R, count: usize, latent_dim: usize) -> Array2<f32> {
    Array2::random_using((count, latent_dim), StandardNormal, rng)
}

/// Generates one image per noise row with the generator in evaluation mode.
pub fn generate(generator: &mut Network, noise: Array2<f32>) -> Result<Array2<f32>> {
    generator.forward(noise, Mode::Eval)
}

/// The evaluation mode critic score of every image.
pub fn score(critic: &mut Network, images: Array2<f32>) -> Result<Vec<f32>> {
    critic.score(images)
}

/// Tiles the images into a grid of `cols` columns, left to right and top to bottom.
///
/// Multi channel images are averaged into gray, cells without an image are left black.
pub fn image_grid(
    images: ArrayView2<f32>,
    shape: (usize, usize, usize),
    cols: usize,
) -> Result<GrayImage> {
    let (c, h, w) = shape;
    if images.ncols() != c * h * w || cols == 0 {
        return Err(WganErr::InvalidConfig(format!(
            "can't tile images of {} values as {shape:?} in {cols} columns",
            images.ncols()
        )));
    }

    let rows = images.nrows().div_ceil(cols).max(1);
    let grid = GrayImage::from_fn((cols * w) as u32, (rows * h) as u32, |x, y| {
        let (x, y) = (x as usize, y as usize);
        let i = (y / h) * cols + x / w;
        if i >= images.nrows() {
            return Luma([0]);
        }

        let (row, col) = (y % h, x % w);
        let value = (0..c).map(|ch| images[[i, (ch * h + row) * w + col]]).sum::<f32>() / c as f32;
        Luma([denormalize(value)])
    });

    Ok(grid)
}

/// Writes `image_grid` to `path`, its format given by the extension.
pub fn save_grid<P: AsRef<Path>>(
    path: P,
    images: ArrayView2<f32>,
    shape: (usize, usize, usize),
    cols: usize,
) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    image_grid(images, shape, cols)?.save(path)?;
    info!("saved {} samples to {}", images.nrows(), path.display());
    Ok(())
}

/// Rebuilds both networks from a checkpoint, writes a grid of `count` generated images to
/// `output` and returns the critic's score of each of them.
pub fn sample_from_checkpoint<P, Q>(
    path: P,
    count: usize,
    cols: usize,
    output: Q,
    seed: u64,
) -> Result<Vec<f32>>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    let path = path.as_ref();
    let CheckpointMeta { model, epoch, .. } = checkpoint::load_meta(path)?;

    let rng = Rc::new(RefCell::new(StdRng::seed_from_u64(seed)));
    let mut generator = Network::new(networks::build_generator(&model)?, rng.clone())?;
    let mut critic = Network::new(networks::build_critic(&model, seed)?, rng.clone())?;
    checkpoint::load_checkpoint(path, &mut generator, &mut critic)?;
    info!("sampling {count} images from the epoch {epoch} checkpoint");

    let noise = noise(&mut *rng.borrow_mut(), count, model.latent_dim);
    let images = generate(&mut generator, noise)?;
    save_grid(output, images.view(), model.image_shape(), cols)?;

    score(&mut critic, images)
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn grid_layout() {
        // three 1x2 images in two columns
        let images = array![[-1., 1.], [1., 1.], [-1., -1.]];
        let grid = image_grid(images.view(), (1, 1, 2), 2).unwrap();

        assert_eq!(grid.dimensions(), (4, 2));
        assert_eq!(grid.get_pixel(0, 0).0, [0]);
        assert_eq!(grid.get_pixel(1, 0).0, [255]);
        assert_eq!(grid.get_pixel(2, 0).0, [255]);
        assert_eq!(grid.get_pixel(0, 1).0, [0]);
        // the missing fourth image
        assert_eq!(grid.get_pixel(3, 1).0, [0]);
    }

    #[test]
    fn grid_rejects_wrong_shapes() {
        let images = Array2::zeros((2, 5));
        assert!(image_grid(images.view(), (1, 2, 2), 2).is_err());
        assert!(image_grid(images.view(), (1, 1, 5), 0).is_err());
    }

    #[test]
    fn noise_is_standard_normal() {
        let mut rng = StdRng::seed_from_u64(0);
        let noise = noise(&mut rng, 200, 50);

        let mean = noise.mean().unwrap();
        let var = noise.mapv(|v| (v - mean).powi(2)).mean().unwrap();
        assert!(mean.abs() < 0.05);
        assert!((var - 1.).abs() < 0.1);
    }
}
