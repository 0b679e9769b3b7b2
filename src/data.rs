//! Seeded minibatch generation for the training loop.

use ndarray::{Array1, Array2, Axis};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// An infinite stream of uniformly resampled minibatches over a fixed dataset.
///
/// Every call to [`next_batch`](BatchGenerator::next_batch) draws `batch_size`
/// row indices with replacement, so each minibatch is an unbiased subsample of
/// the training set. When the requested batch size is at least the dataset
/// size, the full dataset is returned instead.
#[derive(Debug, Clone)]
pub struct BatchGenerator<T> {
    x: Array2<T>,
    y: Array1<T>,
    batch_size: usize,
    rng: SmallRng,
}

impl<T: Clone> BatchGenerator<T> {
    /// Creates a generator over `(x, y)` with the given batch size.
    ///
    /// Without a seed, the index stream is seeded from the thread-local RNG.
    pub fn new(x: Array2<T>, y: Array1<T>, batch_size: usize, seed: Option<u64>) -> Self {
        debug_assert_eq!(x.nrows(), y.len());
        debug_assert!(batch_size > 0);
        let rng = match seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::seed_from_u64(rand::rng().random::<u64>()),
        };
        Self {
            x,
            y,
            batch_size,
            rng,
        }
    }

    /// Draws the next minibatch.
    pub fn next_batch(&mut self) -> (Array2<T>, Array1<T>) {
        let n = self.x.nrows();
        if self.batch_size >= n {
            return (self.x.clone(), self.y.clone());
        }
        let indices: Vec<usize> = (0..self.batch_size)
            .map(|_| self.rng.random_range(0..n))
            .collect();
        (
            self.x.select(Axis(0), &indices),
            self.y.select(Axis(0), &indices),
        )
    }
}
