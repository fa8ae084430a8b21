use ndarray::{Array2, ArrayView2, Axis, s};
use rand::{Rng, seq::SliceRandom};

use crate::{MlErr, Result};

/// An in memory dataset of `(x, y)` sample rows.
#[derive(Debug, Clone)]
pub struct Dataset {
    x: Array2<f32>,
    y: Array2<f32>,
}

impl Dataset {
    /// Creates a new `Dataset` out of a row-major buffer of samples.
    ///
    /// # Arguments
    /// * `data` - Every sample's `x_size` features followed by its `y_size` targets.
    /// * `x_size` - The amount of features of a sample.
    /// * `y_size` - The amount of targets of a sample.
    ///
    /// # Errors
    /// A `SizeMismatch` if `data` is not a whole amount of samples.
    pub fn new(data: Vec<f32>, x_size: usize, y_size: usize) -> Result<Self> {
        let row = x_size + y_size;
        if row == 0 || data.len() % row != 0 {
            return Err(MlErr::SizeMismatch {
                what: "dataset buffer",
                got: data.len(),
                expected: data.len().next_multiple_of(row.max(1)),
            });
        }

        let rows = data.len() / row;
        let full = Array2::from_shape_vec((rows, row), data).map_err(|_| MlErr::SizeMismatch {
            what: "dataset buffer",
            got: rows * row,
            expected: rows * row,
        })?;

        let (x, y) = full.view().split_at(Axis(1), x_size);
        Ok(Self {
            x: x.to_owned(),
            y: y.to_owned(),
        })
    }

    /// Creates a new `Dataset` out of already split features and targets.
    ///
    /// # Errors
    /// A `SizeMismatch` if both arrays don't have the same amount of rows.
    pub fn from_arrays(x: Array2<f32>, y: Array2<f32>) -> Result<Self> {
        if x.nrows() != y.nrows() {
            return Err(MlErr::SizeMismatch {
                what: "dataset targets",
                got: y.nrows(),
                expected: x.nrows(),
            });
        }

        Ok(Self { x, y })
    }

    pub fn len(&self) -> usize {
        self.x.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.x.nrows() == 0
    }

    pub fn x_size(&self) -> usize {
        self.x.ncols()
    }

    pub fn y_size(&self) -> usize {
        self.y.ncols()
    }

    pub fn x(&self) -> ArrayView2<'_, f32> {
        self.x.view()
    }

    pub fn y(&self) -> ArrayView2<'_, f32> {
        self.y.view()
    }

    /// Randomly permutes the samples, keeping every `x` row with its `y` row.
    pub fn shuffle<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.shuffle(rng);

        self.x = self.x.select(Axis(0), &order);
        self.y = self.y.select(Axis(0), &order);
    }

    /// Splits the dataset into consecutive batches of `batch_size` samples, the last one may be
    /// shorter.
    ///
    /// # Errors
    /// An `InvalidBatchSize` if `batch_size` is zero.
    pub fn batches(
        &self,
        batch_size: usize,
    ) -> Result<impl Iterator<Item = (ArrayView2<'_, f32>, ArrayView2<'_, f32>)>> {
        if batch_size == 0 {
            return Err(MlErr::InvalidBatchSize);
        }

        let len = self.len();
        Ok((0..len).step_by(batch_size).map(move |start| {
            let end = (start + batch_size).min(len);
            (
                self.x.slice(s![start..end, ..]),
                self.y.slice(s![start..end, ..]),
            )
        }))
    }
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    fn dataset() -> Dataset {
        // x = [i, i], y = [10 * i]
        let data = (0..10)
            .flat_map(|i| [i as f32, i as f32, 10. * i as f32])
            .collect();
        Dataset::new(data, 2, 1).unwrap()
    }

    #[test]
    fn rejects_partial_rows() {
        assert!(Dataset::new(vec![0.; 7], 2, 1).is_err());
        assert!(Dataset::new(vec![], 0, 0).is_err());
    }

    #[test]
    fn last_batch_may_be_shorter() {
        let dataset = dataset();
        let sizes: Vec<usize> = dataset
            .batches(4)
            .unwrap()
            .map(|(x, y)| {
                assert_eq!(x.nrows(), y.nrows());
                x.nrows()
            })
            .collect();

        assert_eq!(sizes, [4, 4, 2]);
        assert!(dataset.batches(0).is_err());
    }

    #[test]
    fn shuffle_keeps_pairs_together() {
        let mut dataset = dataset();
        dataset.shuffle(&mut StdRng::seed_from_u64(17));

        let firsts: Vec<f32> = dataset.x().column(0).to_vec();
        assert_ne!(firsts, (0..10).map(|i| i as f32).collect::<Vec<_>>());

        for (x, y) in dataset.x().rows().into_iter().zip(dataset.y().rows()) {
            assert_eq!(x[0], x[1]);
            assert_eq!(y[0], 10. * x[0]);
        }
    }

    #[test]
    fn empty_targets() {
        let dataset = Dataset::from_arrays(Array2::ones((3, 4)), Array2::zeros((3, 0))).unwrap();
        assert_eq!(dataset.y_size(), 0);
        assert_eq!(dataset.batches(2).unwrap().count(), 2);
    }
}
