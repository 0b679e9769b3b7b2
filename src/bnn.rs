/*!
# Bayesian neural network regression via adaptive SGHMC.

[`BayesianNeuralNetwork`] wires the pieces together: it normalizes the
training data, builds a network from a factory, then drives the
[`Sghmc`](crate::sghmc::Sghmc) stepper over a stream of minibatches in a
plain loop, letting a [`SampleCollector`](crate::ensemble::SampleCollector)
snapshot the weights on the thinning schedule. Prediction replays every
snapshot through the network and reports the ensemble mean together with
the empirical variance of the per-snapshot predictions, mapped back to the
original output scale.

The number of post-burn-in iterations is capped at `keep_every * n_nets`,
so the retained ensemble never exceeds `n_nets` snapshots no matter how
many steps were requested.

## Example

```rust
use ndarray::Array2;
use sgmcmc_bnn::bnn::{BayesianNeuralNetwork, BnnConfig};

let x = Array2::from_shape_fn((32, 1), |(i, _)| i as f64 / 32.0);
let y = x.column(0).mapv(|v| (6.0 * v).sin());

let config = BnnConfig {
    n_steps: 120,
    n_burn_in_steps: 40,
    keep_every: 8,
    n_nets: 10,
    batch_size: 8,
    ..BnnConfig::default()
};
let mut model = BayesianNeuralNetwork::new(config).unwrap().set_seed(42);
model.train(x.view(), y.view()).unwrap();
assert_eq!(model.samples().len(), 10);

let (mean, variance) = model.predict(x.view()).unwrap();
assert_eq!(mean.len(), 32);
assert!(variance.iter().all(|&v| v >= 0.0));
```
*/

use crate::data::BatchGenerator;
use crate::ensemble::{PredictiveEnsemble, Sample, SampleCollector};
use crate::error::SgmcmcError;
use crate::net::{default_network, RegressionNetwork, TanhMlp};
use crate::normalization::{
    apply_feature_normalization, denormalize_targets, normalize_features, normalize_targets,
};
use crate::sghmc::{Sghmc, SghmcConfig};
use core::fmt;
use indicatif::{ProgressBar, ProgressStyle};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use ndarray::LinalgScalar;
use num_traits::{Float, FromPrimitive, ToPrimitive};
use rand::distr::Distribution as RandDistribution;
use rand_distr::StandardNormal;
use std::time::{Duration, Instant};

/// Run parameters of a training/prediction cycle.
///
/// `lr`, `mdecay` and `noise` feed the stepper; the remaining fields drive
/// minibatching, burn-in, thinning and normalization. Defaults follow the
/// scale-adapted SGHMC reference setup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BnnConfig<T> {
    /// Stepper learning rate.
    pub lr: T,
    /// Stepper momentum decay (friction).
    pub mdecay: T,
    /// Stepper gradient-noise estimate.
    pub noise: T,
    /// Total number of training iterations, burn-in included.
    pub n_steps: usize,
    /// Iterations before any sample is retained.
    pub n_burn_in_steps: usize,
    /// Thinning interval between retained samples.
    pub keep_every: usize,
    /// Target ensemble size.
    pub n_nets: usize,
    /// Minibatch size.
    pub batch_size: usize,
    /// Normalize input features to zero mean, unit variance.
    pub normalize_input: bool,
    /// Normalize regression targets to zero mean, unit variance.
    pub normalize_output: bool,
}

impl<T: Float> Default for BnnConfig<T> {
    fn default() -> Self {
        Self {
            lr: T::from(1e-2).unwrap(),
            mdecay: T::from(0.05).unwrap(),
            noise: T::zero(),
            n_steps: 50_000,
            n_burn_in_steps: 3_000,
            keep_every: 100,
            n_nets: 100,
            batch_size: 20,
            normalize_input: true,
            normalize_output: true,
        }
    }
}

impl<T> BnnConfig<T>
where
    T: Float + fmt::Display,
{
    /// Validates all hyperparameters, rejecting bad values before any
    /// training iteration runs.
    pub fn validate(&self) -> Result<(), SgmcmcError> {
        if self.n_steps <= self.n_burn_in_steps {
            return Err(SgmcmcError::InvalidConfig(format!(
                "n_steps ({}) must exceed n_burn_in_steps ({})",
                self.n_steps, self.n_burn_in_steps
            )));
        }
        if self.batch_size == 0 {
            return Err(SgmcmcError::InvalidConfig(
                "batch_size must be positive".into(),
            ));
        }
        if self.keep_every == 0 {
            return Err(SgmcmcError::InvalidConfig(
                "keep_every must be positive".into(),
            ));
        }
        if self.n_nets == 0 {
            return Err(SgmcmcError::InvalidConfig(
                "n_nets must be positive".into(),
            ));
        }
        // Stepper hyperparameters share the stepper's domain checks.
        SghmcConfig::new(self.lr, self.n_burn_in_steps, self.mdecay, self.noise, T::one())?;
        Ok(())
    }

    /// Post-burn-in iterations actually executed: the request capped at
    /// `keep_every * n_nets` so the ensemble cannot outgrow `n_nets`.
    pub fn n_sampling_steps(&self) -> usize {
        (self.n_steps - self.n_burn_in_steps).min(self.keep_every * self.n_nets)
    }
}

/// Factory type used by the default constructor.
pub type DefaultNetworkFactory<T> = fn(usize, Option<u64>) -> TanhMlp<T>;

/// A Bayesian feed-forward regression model trained with adaptive SGHMC.
///
/// Generic over the scalar type, the network implementation and the factory
/// that builds a fresh network once the input dimension is known at
/// training time. Substituting the factory swaps in a custom architecture
/// or loss; the default is [`TanhMlp`] via [`default_network`].
#[derive(Debug, Clone)]
pub struct BayesianNeuralNetwork<T, N, F> {
    config: BnnConfig<T>,
    network_factory: F,
    network: Option<N>,
    samples: Vec<Sample<T>>,
    x_stats: Option<(Array1<T>, Array1<T>)>,
    y_stats: Option<(T, T)>,
    seed: Option<u64>,
}

impl<T> BayesianNeuralNetwork<T, TanhMlp<T>, DefaultNetworkFactory<T>>
where
    T: Float + LinalgScalar + FromPrimitive + ToPrimitive + fmt::Display + Send + Sync,
    StandardNormal: RandDistribution<T>,
{
    /// Creates a model with the default tanh architecture.
    pub fn new(config: BnnConfig<T>) -> Result<Self, SgmcmcError> {
        Self::with_network_factory(config, default_network::<T> as DefaultNetworkFactory<T>)
    }
}

impl<T, N, F> BayesianNeuralNetwork<T, N, F>
where
    T: Float + LinalgScalar + FromPrimitive + ToPrimitive + fmt::Display + Send + Sync,
    StandardNormal: RandDistribution<T>,
    N: RegressionNetwork<T> + Send + Sync,
    F: Fn(usize, Option<u64>) -> N,
{
    /// Creates a model around a custom network factory.
    ///
    /// The factory receives the input dimension and an optional seed and
    /// must return a freshly initialized network.
    pub fn with_network_factory(config: BnnConfig<T>, network_factory: F) -> Result<Self, SgmcmcError> {
        config.validate()?;
        Ok(Self {
            config,
            network_factory,
            network: None,
            samples: Vec::new(),
            x_stats: None,
            y_stats: None,
            seed: None,
        })
    }

    /// Fixes all random sources (initialization, injected noise, batch
    /// subsampling) for reproducible runs.
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// The validated configuration.
    pub fn config(&self) -> &BnnConfig<T> {
        &self.config
    }

    /// The retained posterior samples, oldest first.
    pub fn samples(&self) -> &[Sample<T>] {
        &self.samples
    }

    /// Whether a posterior ensemble is available for prediction.
    pub fn is_trained(&self) -> bool {
        !self.samples.is_empty()
    }

    /// Trains the model on `(x, y)`, replacing any previous ensemble.
    pub fn train(&mut self, x: ArrayView2<T>, y: ArrayView1<T>) -> Result<(), SgmcmcError> {
        self.train_inner(x, y, false)
    }

    /// Like [`train`](Self::train), with a progress bar reporting the
    /// running minibatch loss.
    pub fn train_progress(&mut self, x: ArrayView2<T>, y: ArrayView1<T>) -> Result<(), SgmcmcError> {
        self.train_inner(x, y, true)
    }

    fn train_inner(
        &mut self,
        x: ArrayView2<T>,
        y: ArrayView1<T>,
        show_progress: bool,
    ) -> Result<(), SgmcmcError> {
        if x.nrows() == 0 || x.ncols() == 0 {
            return Err(SgmcmcError::InvalidConfig(
                "training set must be non-empty".into(),
            ));
        }
        if x.nrows() != y.len() {
            return Err(SgmcmcError::ShapeMismatch {
                expected: vec![x.nrows()],
                actual: vec![y.len()],
            });
        }

        self.samples.clear();
        let n_datapoints = x.nrows();

        let (x_train, x_stats) = if self.config.normalize_input {
            let (normalized, mean, std) = normalize_features(x);
            (normalized, Some((mean, std)))
        } else {
            (x.to_owned(), None)
        };
        let (y_train, y_stats) = if self.config.normalize_output {
            let (normalized, mean, std) = normalize_targets(y);
            (normalized, Some((mean, std)))
        } else {
            (y.to_owned(), None)
        };
        self.x_stats = x_stats;
        self.y_stats = y_stats;

        let mut network = (self.network_factory)(x.ncols(), self.seed);

        let sghmc_config = SghmcConfig::new(
            self.config.lr,
            self.config.n_burn_in_steps,
            self.config.mdecay,
            self.config.noise,
            T::from(n_datapoints).unwrap(),
        )?;
        let mut sampler = Sghmc::new(sghmc_config);
        if let Some(seed) = self.seed {
            sampler = sampler.set_seed(seed.wrapping_add(1));
        }

        let mut batches = BatchGenerator::new(
            x_train,
            y_train,
            self.config.batch_size,
            self.seed.map(|s| s.wrapping_add(0x9E3779B97F4A7C15)),
        );
        let mut collector = SampleCollector::new(
            self.config.n_burn_in_steps,
            self.config.keep_every,
            self.config.n_nets,
        )?;

        let total_steps = self.config.n_burn_in_steps + self.config.n_sampling_steps();
        let pb = show_progress.then(|| {
            let pb = ProgressBar::new(total_steps as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{prefix:8} {bar:40.cyan/blue} {pos}/{len} ({eta}) | {msg}")
                    .unwrap()
                    .progress_chars("=>-"),
            );
            pb.set_prefix("SGHMC");
            pb
        });
        let mut last_sync = Instant::now();
        let sync_interval = Duration::from_millis(500);

        for t in 0..total_steps {
            let (xb, yb) = batches.next_batch();
            let (loss, grads) = network.loss_and_gradients(xb.view(), yb.view(), n_datapoints);
            for (id, (param, grad)) in network
                .parameters_mut()
                .iter_mut()
                .zip(grads.iter())
                .enumerate()
            {
                sampler.step(id, param, grad.as_ref())?;
            }
            collector.observe(t, network.parameters());

            if let Some(pb) = &pb {
                pb.inc(1);
                if t + 1 == total_steps || last_sync.elapsed() >= sync_interval {
                    pb.set_message(format!("loss≈{:.4}", loss.to_f64().unwrap_or(f64::NAN)));
                    last_sync = Instant::now();
                }
            }
        }
        if let Some(pb) = &pb {
            pb.finish_with_message("Done!");
        }

        self.samples = collector.into_samples();
        self.network = Some(network);
        Ok(())
    }

    /// Predictive mean and total variance for a batch of inputs.
    ///
    /// Fails with [`SgmcmcError::NotTrained`] when no posterior samples
    /// exist. The variance is the empirical spread of the per-snapshot mean
    /// predictions, rescaled by the squared output standard deviation when
    /// output normalization was active.
    pub fn predict(&self, x: ArrayView2<T>) -> Result<(Array1<T>, Array1<T>), SgmcmcError> {
        let network = self.network.as_ref().ok_or(SgmcmcError::NotTrained)?;
        let ensemble = PredictiveEnsemble::new(&self.samples)?;
        let x_in = self.normalized_input(x);

        let (mut mean, mut variance) = ensemble.mean_and_variance(|sample| {
            Self::forward_snapshot(network, sample, x_in.view())
        });

        if let Some((y_mean, y_std)) = self.y_stats {
            mean = denormalize_targets(mean.view(), y_mean, y_std);
            variance.mapv_inplace(|v| v * y_std * y_std);
        }
        Ok((mean, variance))
    }

    /// Per-snapshot predictions, one row per retained sample, on the
    /// original output scale.
    pub fn predict_samples(&self, x: ArrayView2<T>) -> Result<Array2<T>, SgmcmcError> {
        let network = self.network.as_ref().ok_or(SgmcmcError::NotTrained)?;
        let ensemble = PredictiveEnsemble::new(&self.samples)?;
        let x_in = self.normalized_input(x);

        let mut predictions = ensemble.predictions(|sample| {
            Self::forward_snapshot(network, sample, x_in.view())
        });
        if let Some((y_mean, y_std)) = self.y_stats {
            predictions.mapv_inplace(|v| v * y_std + y_mean);
        }
        Ok(predictions)
    }

    fn normalized_input(&self, x: ArrayView2<T>) -> Array2<T> {
        match &self.x_stats {
            Some((mean, std)) => apply_feature_normalization(x, mean, std),
            None => x.to_owned(),
        }
    }

    fn forward_snapshot(network: &N, sample: &Sample<T>, x: ArrayView2<T>) -> Array1<T> {
        let mut net = network.clone();
        net.set_parameters(sample.tensors())
            .expect("Expected snapshot shapes to match the trained network");
        // Channel 0 is the predictive mean; the learned log-variance channel
        // is not part of the reported uncertainty.
        net.forward(x).column(0).to_owned()
    }
}
