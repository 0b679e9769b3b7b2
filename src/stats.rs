//! Small summary statistics used by tests and examples.

use core::fmt;
use ndarray::{Array1, ArrayView1};
use ndarray_stats::{MaybeNan, QuantileExt};
use num_traits::Float;
use std::cmp::Ordering;

/// A five-number-style summary of a sample of values.
#[derive(Clone, Debug, PartialEq, PartialOrd)]
pub struct BasicStats<T> {
    pub name: String,
    pub min: T,
    pub median: T,
    pub max: T,
    pub mean: T,
    pub std: T,
}

impl<T: fmt::Display> fmt::Display for BasicStats<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} in [{:.2}, {:.2}], median: {:.2}, mean: {:.2} ± {:.2}",
            self.name, self.min, self.max, self.median, self.mean, self.std
        )
    }
}

/// Computes min/median/max/mean/std of `data`, labeled with `name`.
///
/// NaNs compare equal so they neither panic nor dominate the sort.
pub fn basic_stats<T>(name: &str, mut data: Array1<T>) -> BasicStats<T>
where
    T: Float + fmt::Display + MaybeNan,
    T::NotNan: Ord,
{
    assert!(!data.is_empty(), "basic_stats called on an empty array");
    let min = *data.min_skipnan();
    let max = *data.max_skipnan();
    data.as_slice_mut()
        .expect("Expected stats input to be contiguous")
        .sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let median = data[data.len() / 2];
    let n = T::from(data.len()).unwrap();
    let mean = data.sum() / n;
    let std = if data.len() > 1 {
        (data.mapv(|x| (x - mean) * (x - mean)).sum() / (n - T::one())).sqrt()
    } else {
        T::zero()
    };
    BasicStats {
        name: name.to_string(),
        min,
        median,
        max,
        mean,
        std,
    }
}

/// Root-mean-square error between predictions and targets.
pub fn rmse<T>(predictions: ArrayView1<T>, targets: ArrayView1<T>) -> T
where
    T: Float,
{
    assert_eq!(
        predictions.len(),
        targets.len(),
        "rmse called with mismatched lengths"
    );
    let n = T::from(predictions.len()).unwrap();
    let sum_sq = predictions
        .iter()
        .zip(targets.iter())
        .fold(T::zero(), |acc, (&p, &t)| acc + (p - t) * (p - t));
    (sum_sq / n).sqrt()
}
