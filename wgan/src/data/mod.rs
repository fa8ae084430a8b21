mod idx;

pub use idx::{IdxImages, parse_idx_images, parse_idx_labels, read_idx_images, read_idx_labels};

use log::info;
use machine_learning::dataset::Dataset;
use ndarray::Array2;

use crate::{
    Result, WganErr,
    config::{DataConfig, ModelConfig},
};

/// Maps a pixel into `[-1, 1]`, the range of the generator's `tanh` output.
pub fn normalize(pixel: u8) -> f32 {
    (pixel as f32 - 127.5) / 127.5
}

/// Maps a generated value back into a pixel, clamping anything out of range.
pub fn denormalize(x: f32) -> u8 {
    ((x + 1.) * 127.5).round().clamp(0., 255.) as u8
}

/// Loads the training images into a `Dataset` of normalized rows with no targets.
///
/// # Errors
/// An `InvalidDataset` if the files are malformed, their sizes disagree with the model or no
/// image is left after filtering.
pub fn load_dataset(data: &DataConfig, model: &ModelConfig) -> Result<Dataset> {
    let images = read_idx_images(&data.images)?;
    if (images.rows, images.cols) != (model.image_height, model.image_width) || model.channels != 1
    {
        return Err(WganErr::InvalidDataset(format!(
            "the idx images are 1x{}x{} but the model expects {:?}",
            images.rows,
            images.cols,
            model.image_shape()
        )));
    }

    let mut selected: Vec<usize> = match (data.digit, &data.labels) {
        (Some(digit), Some(labels)) => {
            let labels = read_idx_labels(labels)?;
            if labels.len() != images.count {
                return Err(WganErr::InvalidDataset(format!(
                    "{} labels for {} images",
                    labels.len(),
                    images.count
                )));
            }

            (0..images.count).filter(|&i| labels[i] == digit).collect()
        }
        (Some(_), None) => {
            return Err(WganErr::InvalidDataset(
                "filtering by digit requires a labels file".into(),
            ));
        }
        (None, _) => (0..images.count).collect(),
    };

    if let Some(limit) = data.limit {
        selected.truncate(limit);
    }

    if selected.is_empty() {
        return Err(WganErr::InvalidDataset("no images left to train on".into()));
    }

    let x = Array2::from_shape_fn((selected.len(), images.image_len()), |(row, col)| {
        normalize(images.image(selected[row])[col])
    });
    let y = Array2::zeros((selected.len(), 0));

    info!(
        "loaded {} of {} images from {}",
        selected.len(),
        images.count,
        data.images.display()
    );
    Ok(Dataset::from_arrays(x, y)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_bounds() {
        assert_eq!(normalize(0), -1.);
        assert_eq!(normalize(255), 1.);
        assert!(normalize(128).abs() < 0.01);
    }

    #[test]
    fn denormalize_inverts_and_clamps() {
        for pixel in [0, 1, 64, 127, 200, 255] {
            assert_eq!(denormalize(normalize(pixel)), pixel);
        }

        assert_eq!(denormalize(-3.), 0);
        assert_eq!(denormalize(3.), 255);
    }
}
