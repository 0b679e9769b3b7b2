/*!
# Adaptive Stochastic Gradient Hamiltonian Monte Carlo.

This module implements the scale-adapted SGHMC update of
Springenberg et al. (2016): a discretized stochastic differential equation
whose injected Gaussian noise is calibrated against the friction (`mdecay`)
and gradient-noise (`noise`) terms so that, after burn-in, the iterates are
approximate draws from the posterior the gradients describe.

Each trainable tensor carries its own [`ParameterState`]: an iteration
counter, exponential-moving estimates `g` (gradient mean) and `v_hat`
(gradient second moment), an effective-sample-size-like weight `tau`, and
the HMC-style momentum. During burn-in the statistics adapt; once burn-in
ends they freeze, fixing the per-element preconditioner `1/sqrt(v_hat)` so
the remaining iterations are valid sampling steps.

The sampler holds the state in an explicit map keyed by a caller-chosen
parameter index. It never attaches hidden state to the parameter tensors
themselves, which keeps snapshots and state inspection straightforward.

## Example: sampling a standard normal

For a target `p(θ) ∝ exp(-U(θ))` the stepper consumes `∇U`. With
`U(θ) = θ²/2` the gradient is just `θ`:

```rust
use ndarray::{ArrayD, IxDyn};
use sgmcmc_bnn::sghmc::{Sghmc, SghmcConfig};

let config = SghmcConfig::new(0.01, 100, 0.05, 0.0, 1.0).unwrap();
let mut sampler = Sghmc::new(config).set_seed(7);

let mut theta = ArrayD::<f64>::zeros(IxDyn(&[1]));
for _ in 0..500 {
    let gradient = theta.clone(); // ∇U(θ) = θ
    sampler.step(0, &mut theta, Some(&gradient)).unwrap();
}
assert!(theta[[0]].is_finite());
```
*/

use crate::error::SgmcmcError;
use core::fmt;
use ndarray::{ArrayD, Zip};
use num_traits::Float;
use rand::distr::Distribution as RandDistribution;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use std::collections::HashMap;

/// Hyperparameters of the SGHMC stepper, validated at construction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SghmcConfig<T> {
    /// Base learning rate (step size of the discretization).
    pub lr: T,
    /// Number of initial iterations during which the adaptive statistics
    /// (`tau`, `g`, `v_hat`) are updated.
    pub burn_in_steps: usize,
    /// Momentum decay, the friction term of the underlying SDE.
    pub mdecay: T,
    /// Estimated scale of the minibatch gradient noise.
    pub noise: T,
    /// Rescale factor from minibatch gradients to full-batch gradients,
    /// typically the number of training datapoints.
    pub scale_grad: T,
}

impl<T> SghmcConfig<T>
where
    T: Float + fmt::Display,
{
    /// Validates and builds a stepper configuration.
    ///
    /// Requires `lr > 0`, `mdecay >= 0`, `noise >= 0` and `scale_grad > 0`;
    /// anything else is rejected before a single step runs.
    pub fn new(
        lr: T,
        burn_in_steps: usize,
        mdecay: T,
        noise: T,
        scale_grad: T,
    ) -> Result<Self, SgmcmcError> {
        if !(lr > T::zero()) {
            return Err(SgmcmcError::InvalidConfig(format!(
                "lr must be positive, got {}",
                lr
            )));
        }
        if !(mdecay >= T::zero()) {
            return Err(SgmcmcError::InvalidConfig(format!(
                "mdecay must be non-negative, got {}",
                mdecay
            )));
        }
        if !(noise >= T::zero()) {
            return Err(SgmcmcError::InvalidConfig(format!(
                "noise must be non-negative, got {}",
                noise
            )));
        }
        if !(scale_grad > T::zero()) {
            return Err(SgmcmcError::InvalidConfig(format!(
                "scale_grad must be positive, got {}",
                scale_grad
            )));
        }
        Ok(Self {
            lr,
            burn_in_steps,
            mdecay,
            noise,
            scale_grad,
        })
    }
}

/// Per-parameter adaptive state, one instance per trainable tensor.
///
/// All fields share the shape of the parameter they belong to. `tau`, `g`
/// and `v_hat` start at one (so the preconditioner is finite from the first
/// step) and only change during burn-in; `momentum` starts at zero and is
/// updated on every step.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterState<T> {
    /// Number of updates applied to this tensor so far.
    pub iteration: u64,
    /// Effective-sample-size-like weight controlling how fast `g` and
    /// `v_hat` adapt.
    pub tau: ArrayD<T>,
    /// Exponential-moving estimate of the gradient mean.
    pub g: ArrayD<T>,
    /// Exponential-moving estimate of the gradient second moment; strictly
    /// positive, used as `1/sqrt(v_hat)` preconditioner.
    pub v_hat: ArrayD<T>,
    /// HMC-style momentum carried across steps.
    pub momentum: ArrayD<T>,
}

impl<T: Float> ParameterState<T> {
    fn new(shape: ndarray::IxDyn) -> Self {
        Self {
            iteration: 0,
            tau: ArrayD::ones(shape.clone()),
            g: ArrayD::ones(shape.clone()),
            v_hat: ArrayD::ones(shape.clone()),
            momentum: ArrayD::zeros(shape),
        }
    }
}

/// The adaptive SGHMC stepper.
///
/// Drives one tensor at a time: [`step`](Sghmc::step) takes the parameter
/// index, the current value and the minibatch gradient, mutates the value
/// and the associated [`ParameterState`] in place and returns nothing else.
/// State is created lazily the first time a tensor is updated.
#[derive(Debug, Clone)]
pub struct Sghmc<T> {
    config: SghmcConfig<T>,
    states: HashMap<usize, ParameterState<T>>,
    rng: SmallRng,
}

impl<T> Sghmc<T>
where
    T: Float,
    StandardNormal: RandDistribution<T>,
{
    /// Creates a stepper with a randomly seeded noise source.
    pub fn new(config: SghmcConfig<T>) -> Self {
        Self {
            config,
            states: HashMap::new(),
            rng: SmallRng::seed_from_u64(rand::rng().random::<u64>()),
        }
    }

    /// Reseeds the injected-noise RNG for reproducible runs.
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.rng = SmallRng::seed_from_u64(seed);
        self
    }

    /// The validated configuration this stepper runs with.
    pub fn config(&self) -> &SghmcConfig<T> {
        &self.config
    }

    /// The adaptive state of parameter `id`, if it has been stepped before.
    pub fn state(&self, id: usize) -> Option<&ParameterState<T>> {
        self.states.get(&id)
    }

    /// Performs one SGHMC update on `parameter`.
    ///
    /// A `None` gradient marks the tensor as frozen for this iteration: the
    /// parameter, its state and its iteration counter are left untouched.
    /// A gradient whose shape differs from the parameter is an error; the
    /// caller decides whether to abort the run.
    pub fn step(
        &mut self,
        id: usize,
        parameter: &mut ArrayD<T>,
        gradient: Option<&ArrayD<T>>,
    ) -> Result<(), SgmcmcError> {
        let Some(gradient) = gradient else {
            return Ok(());
        };
        if gradient.shape() != parameter.shape() {
            return Err(SgmcmcError::ShapeMismatch {
                expected: parameter.shape().to_vec(),
                actual: gradient.shape().to_vec(),
            });
        }

        let Self {
            config,
            states,
            rng,
        } = self;
        let state = states
            .entry(id)
            .or_insert_with(|| ParameterState::new(parameter.raw_dim()));

        state.iteration += 1;
        let in_burn_in = state.iteration <= config.burn_in_steps as u64;

        let one = T::one();
        let two = T::from(2.0).unwrap();
        // Floor for the analytic noise variance; over-aggressive friction or
        // noise settings can drive it negative. Numerical guard only.
        let variance_floor = T::from(1e-16).unwrap();

        let lr = config.lr;
        let lr_scaled = config.lr / config.scale_grad.sqrt();
        let mdecay = config.mdecay;
        let noise = config.noise;

        Zip::from(parameter)
            .and(&mut state.tau)
            .and(&mut state.g)
            .and(&mut state.v_hat)
            .and(&mut state.momentum)
            .and(gradient)
            .for_each(|theta, tau, g, v_hat, momentum, &grad| {
                let r_t = one / (*tau + one);
                let minv_t = one / v_hat.sqrt();

                if in_burn_in {
                    *tau = *tau + (one - *tau * (*g * *g / *v_hat));
                    *g = *g + (-*g * r_t + r_t * grad);
                    *v_hat = *v_hat + (-*v_hat * r_t + r_t * grad * grad);
                }

                let noise_scale = two * lr_scaled.powi(2) * mdecay * minv_t
                    - two * lr_scaled.powi(3) * minv_t * minv_t * noise
                    - lr_scaled.powi(4);
                let sigma = noise_scale.max(variance_floor).sqrt();
                let sample: T = rng.sample(StandardNormal);

                // Note the gradient term uses the unscaled lr; only the
                // injected noise works on the lr_scaled scale.
                *momentum = *momentum - lr * lr * minv_t * grad - mdecay * *momentum
                    + sample * sigma;
                *theta = *theta + *momentum;
            });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::IxDyn;

    fn config(lr: f64, burn_in: usize, mdecay: f64, noise: f64) -> SghmcConfig<f64> {
        SghmcConfig::new(lr, burn_in, mdecay, noise, 1.0).unwrap()
    }

    fn tensor(values: &[f64]) -> ArrayD<f64> {
        ArrayD::from_shape_vec(IxDyn(&[values.len()]), values.to_vec()).unwrap()
    }

    #[test]
    fn test_config_rejects_bad_hyperparameters() {
        assert!(SghmcConfig::new(-0.1, 0, 0.05, 0.0, 1.0).is_err());
        assert!(SghmcConfig::new(0.0, 0, 0.05, 0.0, 1.0).is_err());
        assert!(SghmcConfig::new(0.01, 0, -0.05, 0.0, 1.0).is_err());
        assert!(SghmcConfig::new(0.01, 0, 0.05, -1.0, 1.0).is_err());
        assert!(SghmcConfig::new(0.01, 0, 0.05, 0.0, 0.0).is_err());
        assert!(SghmcConfig::new(0.01, 0, 0.05, 0.0, 100.0).is_ok());
    }

    #[test]
    fn test_state_created_lazily_and_initialized() {
        let mut sampler = Sghmc::new(config(0.01, 10, 0.05, 0.0)).set_seed(1);
        assert!(sampler.state(0).is_none());

        let mut theta = tensor(&[0.5, -0.5]);
        let grad = tensor(&[1.0, -1.0]);
        sampler.step(0, &mut theta, Some(&grad)).unwrap();

        let state = sampler.state(0).unwrap();
        assert_eq!(state.iteration, 1);
        assert_eq!(state.tau.shape(), theta.shape());
        assert_eq!(state.momentum.shape(), theta.shape());
    }

    #[test]
    fn test_missing_gradient_skips_parameter_entirely() {
        let mut sampler = Sghmc::new(config(0.01, 10, 0.05, 0.0)).set_seed(2);
        let mut theta = tensor(&[1.0, 2.0, 3.0]);
        let before = theta.clone();

        sampler.step(0, &mut theta, None).unwrap();
        assert_eq!(theta, before);
        assert!(sampler.state(0).is_none());

        let grad = tensor(&[0.1, 0.1, 0.1]);
        sampler.step(0, &mut theta, Some(&grad)).unwrap();
        assert_eq!(sampler.state(0).unwrap().iteration, 1);

        // Skipped iterations do not advance the counter either.
        sampler.step(0, &mut theta, None).unwrap();
        assert_eq!(sampler.state(0).unwrap().iteration, 1);
    }

    #[test]
    fn test_shape_mismatch_is_surfaced() {
        let mut sampler = Sghmc::new(config(0.01, 10, 0.05, 0.0)).set_seed(3);
        let mut theta = tensor(&[1.0, 2.0]);
        let grad = tensor(&[1.0, 2.0, 3.0]);
        let err = sampler.step(0, &mut theta, Some(&grad)).unwrap_err();
        assert_eq!(
            err,
            SgmcmcError::ShapeMismatch {
                expected: vec![2],
                actual: vec![3],
            }
        );
    }

    #[test]
    fn test_v_hat_stays_positive_and_tau_non_negative() {
        let mut sampler = Sghmc::new(config(0.01, 1000, 0.05, 0.0)).set_seed(4);
        let mut rng = SmallRng::seed_from_u64(11);
        let mut theta = tensor(&[0.0; 8]);

        for _ in 0..500 {
            let grad = ArrayD::from_shape_fn(IxDyn(&[8]), |_| {
                let g: f64 = rng.sample(StandardNormal);
                g * 3.0
            });
            sampler.step(0, &mut theta, Some(&grad)).unwrap();
            let state = sampler.state(0).unwrap();
            assert!(
                state.v_hat.iter().all(|&v| v > 0.0),
                "v_hat must stay strictly positive"
            );
            assert!(
                state.tau.iter().all(|&t| t >= 0.0),
                "tau must stay non-negative"
            );
        }
    }

    #[test]
    fn test_burn_in_statistics_freeze_after_burn_in() {
        let burn_in = 5;
        let mut sampler = Sghmc::new(config(0.01, burn_in, 0.05, 0.0)).set_seed(5);
        let mut theta = tensor(&[0.3, -0.2]);
        let grad = tensor(&[0.7, -1.3]);

        for _ in 0..burn_in {
            sampler.step(0, &mut theta, Some(&grad)).unwrap();
        }
        let frozen = sampler.state(0).unwrap().clone();

        for _ in 0..20 {
            sampler.step(0, &mut theta, Some(&grad)).unwrap();
        }
        let state = sampler.state(0).unwrap();
        assert_eq!(state.tau, frozen.tau, "tau must freeze after burn-in");
        assert_eq!(state.g, frozen.g, "g must freeze after burn-in");
        assert_eq!(state.v_hat, frozen.v_hat, "v_hat must freeze after burn-in");
        assert_ne!(
            state.momentum, frozen.momentum,
            "momentum must keep evolving after burn-in"
        );
        assert_eq!(state.iteration, (burn_in + 20) as u64);
    }

    #[test]
    fn test_zero_friction_zero_noise_is_finite_and_noise_dominated() {
        // With mdecay = 0 and noise = 0 the analytic variance is negative
        // (-lr_scaled^4) and the floor kicks in, so sigma == 1e-8. Under a
        // zero gradient, parameter motion comes from injected noise alone.
        let mut sampler = Sghmc::new(config(0.01, 0, 0.0, 0.0)).set_seed(6);
        let mut theta = tensor(&[0.0; 4]);
        let zero_grad = tensor(&[0.0; 4]);

        for _ in 0..1000 {
            sampler.step(0, &mut theta, Some(&zero_grad)).unwrap();
        }

        assert!(theta.iter().all(|v| v.is_finite()));
        let state = sampler.state(0).unwrap();
        assert!(state.momentum.iter().all(|v| v.is_finite()));
        // sigma = sqrt(1e-16); after 1000 steps the random walk stays tiny.
        assert!(
            theta.iter().all(|v| v.abs() < 1e-3),
            "drift without gradient must stem from injected noise only, got {:?}",
            theta
        );
    }

    #[test]
    fn test_gradient_descends_the_potential() {
        // Quadratic bowl U(θ) = θ²/2: repeated steps must move θ toward 0.
        let mut sampler = Sghmc::new(config(0.1, 50, 0.05, 0.0)).set_seed(7);
        let mut theta = tensor(&[4.0]);
        let mut trailing = Vec::new();
        for t in 0..800 {
            let grad = theta.clone();
            sampler.step(0, &mut theta, Some(&grad)).unwrap();
            if t >= 400 {
                trailing.push(theta[[0]].abs());
            }
        }
        let trailing_mean: f64 = trailing.iter().sum::<f64>() / trailing.len() as f64;
        assert!(
            trailing_mean < 2.0,
            "expected θ to hover near the mode, trailing mean |θ| = {}",
            trailing_mean
        );
    }

    #[test]
    fn test_independent_parameters_have_independent_state() {
        let mut sampler = Sghmc::new(config(0.01, 10, 0.05, 0.0)).set_seed(8);
        let mut a = tensor(&[1.0]);
        let mut b = tensor(&[1.0, 2.0]);
        let ga = tensor(&[0.5]);
        let gb = tensor(&[0.5, -0.5]);

        sampler.step(0, &mut a, Some(&ga)).unwrap();
        sampler.step(1, &mut b, Some(&gb)).unwrap();
        sampler.step(1, &mut b, Some(&gb)).unwrap();

        assert_eq!(sampler.state(0).unwrap().iteration, 1);
        assert_eq!(sampler.state(1).unwrap().iteration, 2);
        assert_eq!(sampler.state(1).unwrap().tau.shape(), &[2]);
    }
}
