/*!
# sgmcmc-bnn

Bayesian neural network regression trained with scale-adapted Stochastic
Gradient Hamiltonian Monte Carlo (SGHMC), after Springenberg et al. (2016,
"Bayesian Optimization with Robust Bayesian Neural Networks").

Instead of fitting one set of weights, the trainer runs an SGHMC chain over
the network parameters and keeps thinned snapshots of the weights after
burn-in. Prediction evaluates every snapshot and reports the ensemble mean
together with the empirical variance across snapshots, so each prediction
comes with a calibrated uncertainty estimate.

The crate splits into small, separately usable pieces:

- [`sghmc`]: the adaptive SGHMC stepper, usable on any
  `(parameter, gradient)` stream, neural network or not.
- [`net`]: the [`RegressionNetwork`](net::RegressionNetwork) trait and the
  default tanh MLP with a learned homoscedastic noise level.
- [`ensemble`]: burn-in/thinning sample collection and the predictive
  ensemble aggregation.
- [`bnn`]: the high-level [`BayesianNeuralNetwork`](bnn::BayesianNeuralNetwork)
  train/predict driver.
- [`data`], [`normalization`], [`stats`], [`error`]: minibatching, input and
  output standardization, summary statistics and the crate error type.

## Quick start

```rust
use ndarray::Array2;
use sgmcmc_bnn::bnn::{BayesianNeuralNetwork, BnnConfig};

// A noisy 1-d regression problem.
let x = Array2::from_shape_fn((48, 1), |(i, _)| i as f64 / 48.0);
let y = x.column(0).mapv(|v| (8.0 * v).sin());

let config = BnnConfig {
    n_steps: 200,
    n_burn_in_steps: 100,
    keep_every: 10,
    n_nets: 10,
    batch_size: 16,
    ..BnnConfig::default()
};
let mut model = BayesianNeuralNetwork::new(config).unwrap().set_seed(1);
model.train(x.view(), y.view()).unwrap();

let (mean, variance) = model.predict(x.view()).unwrap();
assert_eq!(mean.len(), 48);
assert!(variance.iter().all(|&v| v >= 0.0));
```

## Using the stepper directly

The sampler does not know about neural networks. Any differentiable
negative log-density works; see [`sghmc`] for a standard-normal example.
*/

pub mod bnn;
pub mod data;
pub mod ensemble;
pub mod error;
pub mod net;
pub mod normalization;
pub mod sghmc;
pub mod stats;
