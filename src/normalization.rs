//! Zero-mean unit-variance normalization helpers.
//!
//! Inputs are normalized per feature column, regression targets with a single
//! scalar mean/std pair. The recorded statistics are what the model later uses
//! to map predictions (and their variances) back to the original scale:
//! denormalizing a mean applies `m * std + mean`, denormalizing a variance
//! multiplies by `std^2`.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use num_traits::{Float, FromPrimitive};

/// Normalizes each feature column of `x` to zero mean and unit variance.
///
/// Returns the normalized matrix together with the per-column means and
/// standard deviations. Columns with zero variance get a standard deviation
/// of one so constant features pass through shifted but unscaled.
///
/// # Panics
///
/// Panics if `x` has no rows; there is no meaningful mean to record.
pub fn normalize_features<T>(x: ArrayView2<T>) -> (Array2<T>, Array1<T>, Array1<T>)
where
    T: Float + FromPrimitive,
{
    let mean = x
        .mean_axis(Axis(0))
        .expect("Expected a non-empty training matrix when normalizing features");
    let std = x
        .std_axis(Axis(0), T::zero())
        .mapv(|s| if s > T::zero() { s } else { T::one() });
    let normalized = apply_feature_normalization(x, &mean, &std);
    (normalized, mean, std)
}

/// Applies previously recorded per-column statistics to `x`.
pub fn apply_feature_normalization<T>(
    x: ArrayView2<T>,
    mean: &Array1<T>,
    std: &Array1<T>,
) -> Array2<T>
where
    T: Float,
{
    let mut out = x.to_owned();
    for mut row in out.rows_mut() {
        for (v, (m, s)) in row.iter_mut().zip(mean.iter().zip(std.iter())) {
            *v = (*v - *m) / *s;
        }
    }
    out
}

/// Normalizes a target vector to zero mean and unit variance.
///
/// Returns the normalized targets together with their scalar mean and
/// standard deviation. A zero standard deviation is replaced by one.
///
/// # Panics
///
/// Panics if `y` is empty; there is no meaningful mean to record.
pub fn normalize_targets<T>(y: ArrayView1<T>) -> (Array1<T>, T, T)
where
    T: Float + FromPrimitive,
{
    let mean = y
        .mean()
        .expect("Expected a non-empty target vector when normalizing targets");
    let std = y.std(T::zero());
    let std = if std > T::zero() { std } else { T::one() };
    let normalized = y.mapv(|v| (v - mean) / std);
    (normalized, mean, std)
}

/// Inverse of [`normalize_targets`] for a vector of predictions.
pub fn denormalize_targets<T>(y: ArrayView1<T>, mean: T, std: T) -> Array1<T>
where
    T: Float,
{
    y.mapv(|v| v * std + mean)
}
