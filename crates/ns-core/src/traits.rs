//! Core traits for NextStat
//!
//! Inference code never looks at a concrete model or minimizer. It consumes
//! these capabilities: a density model that can evaluate, integrate and sample
//! itself, a loss over the full parameter vector, a builder that turns models
//! and replacement data into a loss, and a minimizer over a [`ParameterSet`].

use std::sync::Arc;

use rand::RngCore;

use crate::{Dataset, FitResult, ParameterSet, Result};

/// Central-difference gradient with step `1e-8 * max(|x_i|, 1)`.
pub fn numerical_gradient(
    params: &[f64],
    mut f: impl FnMut(&[f64]) -> Result<f64>,
) -> Result<Vec<f64>> {
    let mut grad = vec![0.0; params.len()];
    let mut work = params.to_vec();
    for i in 0..params.len() {
        let eps = 1e-8 * params[i].abs().max(1.0);
        work[i] = params[i] + eps;
        let f_plus = f(&work)?;
        work[i] = params[i] - eps;
        let f_minus = f(&work)?;
        work[i] = params[i];
        grad[i] = (f_plus - f_minus) / (2.0 * eps);
    }
    Ok(grad)
}

/// One-dimensional probability model over a continuous observable.
///
/// `params` is always the full parameter vector of the analysis; models pick
/// the entries they depend on by index.
pub trait DensityModel: Send + Sync {
    /// Human-readable model name
    fn name(&self) -> &str;

    /// Length of the parameter vector this model was built against
    fn n_params(&self) -> usize;

    /// Observable range `(lo, hi)`
    fn space(&self) -> (f64, f64);

    /// Whether the event count is part of the likelihood
    fn is_extended(&self) -> bool;

    /// Normalized density at `x`
    fn pdf(&self, x: f64, params: &[f64]) -> Result<f64>;

    /// Integral over `bounds`: expected events for extended models, probability otherwise
    fn integrate(&self, bounds: (f64, f64), params: &[f64]) -> Result<f64>;

    /// Expected number of events over the full space (1 for non-extended models)
    fn expected_events(&self, params: &[f64]) -> Result<f64>;

    /// Draw a dataset. `n = None` draws a Poisson-fluctuated count for
    /// extended models.
    fn sample(&self, n: Option<usize>, params: &[f64], rng: &mut dyn RngCore) -> Result<Dataset>;

    /// Negative log-likelihood of `data`, without constant terms
    fn nll(&self, data: &Dataset, params: &[f64]) -> Result<f64>;

    /// NLL and its gradient with respect to every parameter
    fn nll_grad(&self, data: &Dataset, params: &[f64]) -> Result<(f64, Vec<f64>)> {
        let nll = self.nll(data, params)?;
        let grad = numerical_gradient(params, |p| self.nll(data, p))?;
        Ok((nll, grad))
    }
}

/// Negative log-likelihood functional over the full parameter vector.
pub trait Loss: Send + Sync {
    /// Evaluate the NLL
    fn nll(&self, params: &[f64]) -> Result<f64>;

    /// Gradient of the NLL (numerical if not overridden)
    fn grad_nll(&self, params: &[f64]) -> Result<Vec<f64>> {
        numerical_gradient(params, |p| self.nll(p))
    }

    /// NLL and gradient in one pass
    fn nll_grad(&self, params: &[f64]) -> Result<(f64, Vec<f64>)> {
        Ok((self.nll(params)?, self.grad_nll(params)?))
    }
}

/// Builds a loss from models and (possibly replacement) datasets.
pub trait LossBuilder: Send + Sync {
    /// Build the loss for `datasets`, one per model
    fn build(&self, models: &[Arc<dyn DensityModel>], datasets: &[Dataset])
    -> Result<Arc<dyn Loss>>;
}

impl<F> LossBuilder for F
where
    F: Fn(&[Arc<dyn DensityModel>], &[Dataset]) -> Result<Arc<dyn Loss>> + Send + Sync,
{
    fn build(
        &self,
        models: &[Arc<dyn DensityModel>],
        datasets: &[Dataset],
    ) -> Result<Arc<dyn Loss>> {
        self(models, datasets)
    }
}

/// Minimizer over the floating parameters of a [`ParameterSet`].
pub trait Minimizer: Send + Sync {
    /// Minimize `loss`, starting from the current values of `params` and
    /// holding fixed parameters at their values.
    fn minimize(&self, loss: &dyn Loss, params: &ParameterSet) -> Result<FitResult>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    struct Parabola;

    impl Loss for Parabola {
        fn nll(&self, p: &[f64]) -> Result<f64> {
            Ok((p[0] - 1.0).powi(2) + 3.0 * p[1] * p[1])
        }
    }

    #[test]
    fn test_default_gradient() {
        let g = Parabola.grad_nll(&[2.0, -1.0]).unwrap();
        assert_relative_eq!(g[0], 2.0, epsilon = 1e-5);
        assert_relative_eq!(g[1], -6.0, epsilon = 1e-5);
        let (f, _) = Parabola.nll_grad(&[1.0, 0.0]).unwrap();
        assert_eq!(f, 0.0);
    }

    #[test]
    fn test_closure_loss_builder() {
        let builder = |_m: &[Arc<dyn DensityModel>], d: &[Dataset]| -> Result<Arc<dyn Loss>> {
            assert_eq!(d.len(), 1);
            Ok(Arc::new(Parabola))
        };
        let data = Dataset::new(vec![0.5], (0.0, 1.0)).unwrap();
        let loss = builder.build(&[], &[data]).unwrap();
        assert_eq!(loss.nll(&[1.0, 0.0]).unwrap(), 0.0);
    }
}
