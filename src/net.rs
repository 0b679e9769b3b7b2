/*!
# Feed-forward regression networks and their gradient source.

The sampler in [`crate::sghmc`] only consumes `(parameter, gradient)` pairs;
this module supplies them. [`RegressionNetwork`] is the contract the model
driver trains against: an ordered list of parameter tensors, a forward pass
producing a `[batch, 2]` output (predictive mean in channel 0, a learned
log-variance in channel 1), and the analytic gradient of the training loss
with respect to every tensor.

[`TanhMlp`] is the default implementation: tanh hidden layers, a linear mean
output and a single trainable log-variance bias broadcast as the second
output channel. Its loss is the Gaussian negative log-likelihood of the mean
channel under the learned variance, plus a Gaussian prior over the
log-variance and a Gaussian (L2) prior over all trainable tensors, matching
the scale-adapted SGHMC setup this crate implements.
*/

use crate::error::SgmcmcError;
use ndarray::{Array1, Array2, ArrayD, ArrayView1, ArrayView2, Axis, Ix1, Ix2, IxDyn};
use ndarray::LinalgScalar;
use num_traits::Float;
use rand::distr::Distribution as RandDistribution;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

/// Guard added to `exp(log_var)` before inversion.
const VARIANCE_GUARD: f64 = 1e-16;
/// Mean of the Gaussian prior over the predictive variance (log scale is
/// taken of this value).
const LOG_VARIANCE_PRIOR_MEAN: f64 = 1e-6;
/// Variance of the Gaussian prior over the log-variance output.
const LOG_VARIANCE_PRIOR_VARIANCE: f64 = 0.01;
/// Weight-decay strength of the Gaussian prior over all parameters.
const WEIGHT_DECAY: f64 = 1.0;
/// Initial value of the learned log-variance bias.
const LOG_VARIANCE_INIT: f64 = 1e-3;

/// The forward-evaluation and gradient-source contract consumed by
/// [`crate::bnn::BayesianNeuralNetwork`].
///
/// Parameter tensors are exposed as an ordered slice; their indices are the
/// identifiers the sampler keys its per-parameter state by. A gradient entry
/// of `None` marks the corresponding tensor as frozen for that minibatch.
pub trait RegressionNetwork<T>: Clone {
    /// The ordered trainable tensors.
    fn parameters(&self) -> &[ArrayD<T>];

    /// Mutable access for the in-place sampler updates.
    fn parameters_mut(&mut self) -> &mut [ArrayD<T>];

    /// Restores all tensors from a snapshot taken with [`Self::parameters`].
    fn set_parameters(&mut self, values: &[ArrayD<T>]) -> Result<(), SgmcmcError>;

    /// Forward pass over a `[batch, input_dim]` matrix, returning
    /// `[batch, 2]`: predictive mean and log-variance.
    fn forward(&self, x: ArrayView2<T>) -> Array2<T>;

    /// Training loss over a minibatch plus its gradient per tensor, aligned
    /// with [`Self::parameters`]. `n_datapoints` is the full dataset size the
    /// priors are normalized by.
    fn loss_and_gradients(
        &self,
        x: ArrayView2<T>,
        y: ArrayView1<T>,
        n_datapoints: usize,
    ) -> (T, Vec<Option<ArrayD<T>>>);
}

/// Tanh multi-layer perceptron with a learned homoscedastic log-variance.
///
/// Parameter layout: `W_0, b_0, ..., W_{L-1}, b_{L-1}, log_var` where `W_i`
/// has shape `[fan_in, fan_out]`, biases are vectors and `log_var` is a
/// single-element tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct TanhMlp<T> {
    dims: Vec<usize>,
    params: Vec<ArrayD<T>>,
}

/// The architecture used when no custom network factory is supplied:
/// three tanh layers of 50 units each.
pub fn default_network<T>(input_dim: usize, seed: Option<u64>) -> TanhMlp<T>
where
    T: Float + LinalgScalar,
    StandardNormal: RandDistribution<T>,
{
    TanhMlp::new(input_dim, &[50, 50, 50], seed)
}

impl<T> TanhMlp<T>
where
    T: Float + LinalgScalar,
    StandardNormal: RandDistribution<T>,
{
    /// Builds a network with the given hidden layer widths.
    ///
    /// Weights use variance-scaling initialization (`std = sqrt(1/fan_in)`),
    /// biases start at zero and the log-variance bias at
    /// `ln(LOG_VARIANCE_INIT)`.
    pub fn new(input_dim: usize, hidden_units: &[usize], seed: Option<u64>) -> Self {
        assert!(input_dim > 0, "input dimension must be positive");
        let mut rng = match seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::seed_from_u64(rand::rng().random::<u64>()),
        };

        let mut dims = Vec::with_capacity(hidden_units.len() + 2);
        dims.push(input_dim);
        dims.extend_from_slice(hidden_units);
        dims.push(1);

        let mut params = Vec::with_capacity(2 * (dims.len() - 1) + 1);
        for window in dims.windows(2) {
            let (fan_in, fan_out) = (window[0], window[1]);
            let std = T::from(1.0 / fan_in as f64).unwrap().sqrt();
            let weight = ArrayD::from_shape_fn(IxDyn(&[fan_in, fan_out]), |_| {
                let z: T = rng.sample(StandardNormal);
                z * std
            });
            params.push(weight);
            params.push(ArrayD::zeros(IxDyn(&[fan_out])));
        }
        let log_var =
            ArrayD::from_elem(IxDyn(&[1]), T::from(LOG_VARIANCE_INIT).unwrap().ln());
        params.push(log_var);

        Self { dims, params }
    }

    fn n_layers(&self) -> usize {
        self.dims.len() - 1
    }

    fn weight(&self, layer: usize) -> ArrayView2<'_, T> {
        self.params[2 * layer]
            .view()
            .into_dimensionality::<Ix2>()
            .expect("Expected weight tensors to stay two-dimensional")
    }

    fn bias(&self, layer: usize) -> ArrayView1<'_, T> {
        self.params[2 * layer + 1]
            .view()
            .into_dimensionality::<Ix1>()
            .expect("Expected bias tensors to stay one-dimensional")
    }

    fn log_var(&self) -> T {
        self.params[2 * self.n_layers()][[0]]
    }

    /// Hidden activations (input included) and the mean output `[batch, 1]`.
    fn activations(&self, x: ArrayView2<T>) -> (Vec<Array2<T>>, Array2<T>) {
        let l = self.n_layers();
        let mut acts: Vec<Array2<T>> = Vec::with_capacity(l);
        acts.push(x.to_owned());
        for i in 0..l - 1 {
            let z = acts[i].dot(&self.weight(i)) + &self.bias(i);
            acts.push(z.mapv(|v| v.tanh()));
        }
        let f = acts[l - 1].dot(&self.weight(l - 1)) + &self.bias(l - 1);
        (acts, f)
    }
}

impl<T> RegressionNetwork<T> for TanhMlp<T>
where
    T: Float + LinalgScalar,
    StandardNormal: RandDistribution<T>,
{
    fn parameters(&self) -> &[ArrayD<T>] {
        &self.params
    }

    fn parameters_mut(&mut self) -> &mut [ArrayD<T>] {
        &mut self.params
    }

    fn set_parameters(&mut self, values: &[ArrayD<T>]) -> Result<(), SgmcmcError> {
        if values.len() != self.params.len() {
            return Err(SgmcmcError::ShapeMismatch {
                expected: vec![self.params.len()],
                actual: vec![values.len()],
            });
        }
        for (param, value) in self.params.iter_mut().zip(values.iter()) {
            if param.shape() != value.shape() {
                return Err(SgmcmcError::ShapeMismatch {
                    expected: param.shape().to_vec(),
                    actual: value.shape().to_vec(),
                });
            }
            param.clone_from(value);
        }
        Ok(())
    }

    fn forward(&self, x: ArrayView2<T>) -> Array2<T> {
        let (_, f) = self.activations(x);
        let mut out = Array2::zeros((f.nrows(), 2));
        out.column_mut(0).assign(&f.column(0));
        out.column_mut(1).fill(self.log_var());
        out
    }

    fn loss_and_gradients(
        &self,
        x: ArrayView2<T>,
        y: ArrayView1<T>,
        n_datapoints: usize,
    ) -> (T, Vec<Option<ArrayD<T>>>) {
        let l = self.n_layers();
        let half = T::from(0.5).unwrap();
        let two = T::from(2.0).unwrap();
        let n_batch = T::from(x.nrows()).unwrap();
        let n_data = T::from(n_datapoints).unwrap();
        let n_params_total =
            T::from(self.params.iter().map(|p| p.len()).sum::<usize>()).unwrap();
        let wdecay = T::from(WEIGHT_DECAY).unwrap();

        let (acts, f) = self.activations(x);
        let log_var = self.log_var();
        let e_lv = log_var.exp();
        let var_inv = (e_lv + T::from(VARIANCE_GUARD).unwrap()).recip();
        let prior_log_mean = T::from(LOG_VARIANCE_PRIOR_MEAN).unwrap().ln();
        let prior_var = T::from(LOG_VARIANCE_PRIOR_VARIANCE).unwrap();

        let residual: Array1<T> = &y - &f.column(0);
        let sum_sq = residual.mapv(|r| r * r).sum();

        // Log-likelihood of the data, normalized per batch; priors are
        // normalized per dataset so minibatch gradients stay unbiased
        // estimates of the full-data gradient.
        let ll_data = (-half * var_inv * sum_sq - half * log_var * n_batch) / n_batch;
        let ll_lv_prior = (-(log_var - prior_log_mean) * (log_var - prior_log_mean)
            / (two * prior_var)
            - half * prior_var.ln())
            / n_data;
        let sum_sq_params = self
            .params
            .iter()
            .map(|p| p.mapv(|w| w * w).sum())
            .fold(T::zero(), |acc, s| acc + s);
        let ll_weight_prior = -wdecay * half * sum_sq_params / n_params_total / n_data;
        let loss = -(ll_data + ll_lv_prior + ll_weight_prior);

        // d(loss)/d(mean output), shape [batch, 1].
        let delta = residual
            .mapv(|r| -r * var_inv / n_batch)
            .insert_axis(Axis(1));

        let mut grads: Vec<Option<ArrayD<T>>> = vec![None; self.params.len()];
        let prior_scale = wdecay / (n_params_total * n_data);

        // Output layer, then backprop through the tanh stack.
        let mut upstream = delta.dot(&self.weight(l - 1).t());
        grads[2 * (l - 1)] = Some(
            (acts[l - 1].t().dot(&delta) + &self.weight(l - 1).mapv(|w| w * prior_scale))
                .into_dyn(),
        );
        grads[2 * (l - 1) + 1] = Some(
            (delta.sum_axis(Axis(0)) + &self.bias(l - 1).mapv(|b| b * prior_scale)).into_dyn(),
        );
        for i in (0..l - 1).rev() {
            let dz = &upstream * &acts[i + 1].mapv(|a| T::one() - a * a);
            grads[2 * i] = Some(
                (acts[i].t().dot(&dz) + &self.weight(i).mapv(|w| w * prior_scale)).into_dyn(),
            );
            grads[2 * i + 1] = Some(
                (dz.sum_axis(Axis(0)) + &self.bias(i).mapv(|b| b * prior_scale)).into_dyn(),
            );
            upstream = dz.dot(&self.weight(i).t());
        }

        // Log-variance gradient: data term, its own prior, and the shared
        // weight prior.
        let d_ll_data = (half * sum_sq * e_lv * var_inv * var_inv - half * n_batch) / n_batch;
        let d_ll_prior = -(log_var - prior_log_mean) / prior_var / n_data;
        let d_log_var = -(d_ll_data + d_ll_prior) + log_var * prior_scale;
        grads[2 * l] = Some(ArrayD::from_elem(IxDyn(&[1]), d_log_var));

        (loss, grads)
    }
}
