/*!
# Posterior sample collection and the predictive ensemble.

[`SampleCollector`] watches the global iteration counter of a training run
and decides which parameter states count as posterior draws: everything
before `burn_in_steps` is discarded, afterwards every `keep_every`-th state
is deep-copied into an immutable [`Sample`], up to a hard cap of
`max_samples`. The cap is a resource-control guarantee as much as a
statistical one; the collector is the only component that accumulates
memory during training.

[`PredictiveEnsemble`] replays a caller-supplied forward function over the
retained samples and aggregates the per-sample predictions into a mean and
an empirical variance. The variance is *total* uncertainty: the spread of
per-sample mean predictions, with no separate aleatoric term folded in.
*/

use crate::error::SgmcmcError;
use ndarray::{Array1, Array2, ArrayD, Axis};
use num_traits::{Float, FromPrimitive};
use rayon::prelude::*;

/// An immutable snapshot of every trainable tensor at one iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample<T> {
    tensors: Vec<ArrayD<T>>,
}

impl<T: Clone> Sample<T> {
    /// Deep-copies the given parameter tensors.
    pub fn snapshot(parameters: &[ArrayD<T>]) -> Self {
        Self {
            tensors: parameters.to_vec(),
        }
    }

    /// The snapshotted tensors, in parameter order.
    pub fn tensors(&self) -> &[ArrayD<T>] {
        &self.tensors
    }
}

/// Applies the burn-in/thinning rule and stores the retained snapshots.
#[derive(Debug, Clone)]
pub struct SampleCollector<T> {
    burn_in_steps: usize,
    keep_every: usize,
    max_samples: usize,
    samples: Vec<Sample<T>>,
}

impl<T: Clone> SampleCollector<T> {
    /// Creates a collector; `keep_every` and `max_samples` must be positive.
    pub fn new(
        burn_in_steps: usize,
        keep_every: usize,
        max_samples: usize,
    ) -> Result<Self, SgmcmcError> {
        if keep_every == 0 {
            return Err(SgmcmcError::InvalidConfig(
                "keep_every must be positive".into(),
            ));
        }
        if max_samples == 0 {
            return Err(SgmcmcError::InvalidConfig(
                "max_samples must be positive".into(),
            ));
        }
        Ok(Self {
            burn_in_steps,
            keep_every,
            max_samples,
            samples: Vec::with_capacity(max_samples),
        })
    }

    /// Observes the parameter state after the update at 0-indexed iteration
    /// `t` and snapshots it when the thinning schedule selects it.
    ///
    /// A snapshot is taken iff `t >= burn_in_steps`,
    /// `(t - burn_in_steps) % keep_every == 0` and the cap has not been
    /// reached. Returns whether a snapshot was stored.
    pub fn observe(&mut self, t: usize, parameters: &[ArrayD<T>]) -> bool {
        if self.samples.len() >= self.max_samples {
            return false;
        }
        if t < self.burn_in_steps || (t - self.burn_in_steps) % self.keep_every != 0 {
            return false;
        }
        self.samples.push(Sample::snapshot(parameters));
        true
    }

    /// Number of retained samples so far.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether nothing has been retained yet.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Whether the `max_samples` cap has been reached.
    pub fn is_full(&self) -> bool {
        self.samples.len() >= self.max_samples
    }

    /// The retained samples, oldest first.
    pub fn samples(&self) -> &[Sample<T>] {
        &self.samples
    }

    /// Consumes the collector, yielding the retained samples.
    pub fn into_samples(self) -> Vec<Sample<T>> {
        self.samples
    }
}

/// Aggregates per-sample predictions into a mean and an empirical variance.
#[derive(Debug, Clone, Copy)]
pub struct PredictiveEnsemble<'a, T> {
    samples: &'a [Sample<T>],
}

impl<'a, T> PredictiveEnsemble<'a, T>
where
    T: Float + FromPrimitive + Send + Sync,
{
    /// Wraps a non-empty sample set; an empty one is a precondition
    /// violation surfaced as [`SgmcmcError::NotTrained`].
    pub fn new(samples: &'a [Sample<T>]) -> Result<Self, SgmcmcError> {
        if samples.is_empty() {
            return Err(SgmcmcError::NotTrained);
        }
        Ok(Self { samples })
    }

    /// Runs `forward` once per sample (in parallel, samples are independent)
    /// and stacks the predictions into `[n_samples, n_points]`.
    ///
    /// Panics if `forward` returns vectors of inconsistent length.
    pub fn predictions<F>(&self, forward: F) -> Array2<T>
    where
        F: Fn(&Sample<T>) -> Array1<T> + Sync + Send,
    {
        let rows: Vec<Array1<T>> = self.samples.par_iter().map(forward).collect();
        let n_points = rows[0].len();
        let mut out = Array2::zeros((rows.len(), n_points));
        for (mut row, prediction) in out.rows_mut().into_iter().zip(rows.iter()) {
            assert_eq!(
                prediction.len(),
                n_points,
                "forward function returned inconsistent prediction lengths"
            );
            row.assign(prediction);
        }
        out
    }

    /// Predictive mean and empirical (population) variance across samples.
    pub fn mean_and_variance<F>(&self, forward: F) -> (Array1<T>, Array1<T>)
    where
        F: Fn(&Sample<T>) -> Array1<T> + Sync + Send,
    {
        let predictions = self.predictions(forward);
        let mean = predictions
            .mean_axis(Axis(0))
            .expect("Expected at least one sample in the ensemble");
        let n = T::from(predictions.nrows()).unwrap();
        let mut variance = Array1::zeros(mean.len());
        for row in predictions.rows() {
            for (v, (&p, &m)) in variance.iter_mut().zip(row.iter().zip(mean.iter())) {
                *v = *v + (p - m) * (p - m);
            }
        }
        variance.mapv_inplace(|v| v / n);
        (mean, variance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, IxDyn};

    fn tensors(value: f64) -> Vec<ArrayD<f64>> {
        vec![
            ArrayD::from_elem(IxDyn(&[2, 2]), value),
            ArrayD::from_elem(IxDyn(&[2]), -value),
        ]
    }

    #[test]
    fn test_collector_rejects_zero_intervals() {
        assert!(SampleCollector::<f64>::new(0, 0, 5).is_err());
        assert!(SampleCollector::<f64>::new(0, 1, 0).is_err());
        assert!(SampleCollector::<f64>::new(0, 1, 5).is_ok());
    }

    #[test]
    fn test_no_burn_in_keep_every_one_collects_exactly_n() {
        let n = 7;
        let mut collector = SampleCollector::new(0, 1, n).unwrap();
        for t in 0..20 {
            let collected = collector.observe(t, &tensors(t as f64));
            assert_eq!(collected, t < n, "unexpected decision at t = {}", t);
        }
        assert_eq!(collector.len(), n);
        assert!(collector.is_full());
        // First n iterations were kept, in order.
        for (i, sample) in collector.samples().iter().enumerate() {
            assert_eq!(sample.tensors()[0][[0, 0]], i as f64);
        }
    }

    #[test]
    fn test_burn_in_and_thinning_schedule() {
        let mut collector = SampleCollector::new(3, 2, 100).unwrap();
        let mut kept = Vec::new();
        for t in 0..12 {
            if collector.observe(t, &tensors(t as f64)) {
                kept.push(t);
            }
        }
        assert_eq!(kept, vec![3, 5, 7, 9, 11]);
    }

    #[test]
    fn test_snapshots_are_deep_copies() {
        let mut collector = SampleCollector::new(0, 1, 4).unwrap();
        let mut params = tensors(1.0);
        collector.observe(0, &params);
        params[0].fill(999.0);
        assert_eq!(collector.samples()[0].tensors()[0][[0, 0]], 1.0);
    }

    #[test]
    fn test_empty_ensemble_is_rejected() {
        let samples: Vec<Sample<f64>> = Vec::new();
        assert_eq!(
            PredictiveEnsemble::new(&samples).unwrap_err(),
            SgmcmcError::NotTrained
        );
    }

    #[test]
    fn test_identical_snapshots_have_zero_variance() {
        // Two identical snapshots: the mean equals the common value exactly,
        // so the variance must be exactly zero, not just small.
        let samples = vec![
            Sample::snapshot(&tensors(0.3)),
            Sample::snapshot(&tensors(0.3)),
        ];
        let ensemble = PredictiveEnsemble::new(&samples).unwrap();
        let (mean, variance) =
            ensemble.mean_and_variance(|s| arr1(&[s.tensors()[0][[0, 0]], 2.0]));
        assert_eq!(mean, arr1(&[0.3, 2.0]));
        assert_eq!(variance, arr1(&[0.0, 0.0]));
    }

    #[test]
    fn test_mean_and_variance_of_known_ensemble() {
        let samples = vec![
            Sample::snapshot(&tensors(1.0)),
            Sample::snapshot(&tensors(2.0)),
            Sample::snapshot(&tensors(3.0)),
        ];
        let ensemble = PredictiveEnsemble::new(&samples).unwrap();
        let (mean, variance) =
            ensemble.mean_and_variance(|s| arr1(&[s.tensors()[0][[0, 0]]]));
        assert!((mean[0] - 2.0).abs() < 1e-12);
        // Population variance of {1, 2, 3} around 2 is 2/3.
        assert!((variance[0] - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_predictions_matrix_shape() {
        let samples = vec![
            Sample::snapshot(&tensors(1.0)),
            Sample::snapshot(&tensors(2.0)),
        ];
        let ensemble = PredictiveEnsemble::new(&samples).unwrap();
        let predictions = ensemble.predictions(|s| {
            let v = s.tensors()[0][[0, 0]];
            arr1(&[v, v + 1.0, v + 2.0])
        });
        assert_eq!(predictions.dim(), (2, 3));
        assert_eq!(predictions[[1, 2]], 4.0);
    }
}
