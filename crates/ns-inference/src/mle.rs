//! Maximum Likelihood Estimation

use crate::optimizer::{LbfgsbOptimizer, ObjectiveFunction, OptimizationResult, OptimizerConfig};
use ns_core::{Error, FitResult, Loss, Minimizer, ParameterSet, Result};

/// Maximum Likelihood Estimator
///
/// Fits statistical models by minimizing negative log-likelihood over the
/// floating parameters of a [`ParameterSet`].
#[derive(Debug, Clone, Default)]
pub struct MaximumLikelihoodEstimator {
    config: OptimizerConfig,
}

/// Loss restricted to the floating parameters; fixed ones are spliced back in.
struct FloatingObjective<'a> {
    loss: &'a dyn Loss,
    full: Vec<f64>,
    floating: &'a [usize],
}

impl FloatingObjective<'_> {
    fn expand(&self, sub: &[f64]) -> Vec<f64> {
        let mut full = self.full.clone();
        for (&i, &v) in self.floating.iter().zip(sub) {
            full[i] = v;
        }
        full
    }

    fn restrict(&self, grad: &[f64]) -> Vec<f64> {
        self.floating.iter().map(|&i| grad[i]).collect()
    }
}

impl ObjectiveFunction for FloatingObjective<'_> {
    fn eval(&self, params: &[f64]) -> Result<f64> {
        self.loss.nll(&self.expand(params))
    }

    fn gradient(&self, params: &[f64]) -> Result<Vec<f64>> {
        Ok(self.restrict(&self.loss.grad_nll(&self.expand(params))?))
    }

    fn eval_grad(&self, params: &[f64]) -> Result<(f64, Vec<f64>)> {
        let (nll, grad) = self.loss.nll_grad(&self.expand(params))?;
        Ok((nll, self.restrict(&grad)))
    }
}

impl MaximumLikelihoodEstimator {
    /// Create a new MLE with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Create MLE with custom optimizer configuration
    pub fn with_config(config: OptimizerConfig) -> Self {
        Self { config }
    }

    /// Access the optimizer configuration.
    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Minimize `loss` over the floating parameters and return the raw optimizer result
    /// in the floating subspace.
    pub fn fit_minimum(&self, loss: &dyn Loss, params: &ParameterSet) -> Result<OptimizationResult> {
        let floating = params.floating_indices();
        let objective = FloatingObjective { loss, full: params.values(), floating: &floating };
        let init: Vec<f64> = floating.iter().map(|&i| objective.full[i]).collect();
        let bounds = floating.iter().map(|&i| params.bounds(i)).collect::<Result<Vec<_>>>()?;
        LbfgsbOptimizer::new(self.config.clone()).minimize(&objective, &init, &bounds)
    }
}

impl Minimizer for MaximumLikelihoodEstimator {
    fn minimize(&self, loss: &dyn Loss, params: &ParameterSet) -> Result<FitResult> {
        let mut full = params.values();
        let floating = params.floating_indices();
        if floating.is_empty() {
            let nll = loss.nll(&full)?;
            return Ok(FitResult::new(full, nll, true, 0, 1, "no floating parameters"));
        }

        let opt = self.fit_minimum(loss, params)?;
        if !opt.fval.is_finite() {
            return Err(Error::Computation(format!("non-finite NLL at minimum: {}", opt)));
        }
        if !opt.converged {
            log::debug!("fit did not converge: {}", opt.message);
        }
        for (&i, &v) in floating.iter().zip(&opt.parameters) {
            full[i] = v;
        }
        Ok(FitResult::new(full, opt.fval, opt.converged, opt.n_iter, opt.n_fev, opt.message))
    }
}
