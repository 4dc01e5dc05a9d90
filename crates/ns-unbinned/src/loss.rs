//! Negative log-likelihood over several channels, with constraint terms.

use std::sync::Arc;

use ns_core::{Dataset, DensityModel, Error, Loss, LossBuilder, Result};

/// Constraint (penalty) term for nuisance parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Constraint {
    /// Gaussian constraint.
    Gaussian {
        /// Constraint mean.
        mean: f64,
        /// Constraint sigma (standard deviation), must be finite and > 0.
        sigma: f64,
    },
}

impl Constraint {
    fn validate(&self) -> Result<()> {
        match *self {
            Constraint::Gaussian { mean, sigma } => {
                if !mean.is_finite() || !sigma.is_finite() || sigma <= 0.0 {
                    return Err(Error::Validation(format!(
                        "Gaussian constraint requires finite mean and sigma > 0, got mean={mean}, sigma={sigma}"
                    )));
                }
                Ok(())
            }
        }
    }

    fn nll_and_grad(&self, x: f64) -> (f64, f64) {
        match *self {
            Constraint::Gaussian { mean, sigma } => {
                let z = (x - mean) / sigma;
                (0.5 * z * z, z / sigma)
            }
        }
    }
}

/// Sum of channel NLLs plus constraint penalties.
pub struct UnbinnedNll {
    models: Vec<Arc<dyn DensityModel>>,
    datasets: Vec<Dataset>,
    constraints: Vec<(usize, Constraint)>,
}

impl UnbinnedNll {
    /// One dataset per model; constraints are `(parameter index, constraint)`.
    pub fn new(
        models: Vec<Arc<dyn DensityModel>>,
        datasets: Vec<Dataset>,
        constraints: Vec<(usize, Constraint)>,
    ) -> Result<Self> {
        if models.is_empty() || models.len() != datasets.len() {
            return Err(Error::Validation(format!(
                "need one dataset per model, got {} models and {} datasets",
                models.len(),
                datasets.len()
            )));
        }
        for (_, c) in &constraints {
            c.validate()?;
        }
        Ok(Self { models, datasets, constraints })
    }

    fn check_constraints(&self, params: &[f64]) -> Result<()> {
        match self.constraints.iter().find(|(i, _)| *i >= params.len()) {
            Some((i, _)) => Err(Error::Validation(format!(
                "constraint on parameter index {i}, but only {} parameters given",
                params.len()
            ))),
            None => Ok(()),
        }
    }
}

impl Loss for UnbinnedNll {
    fn nll(&self, params: &[f64]) -> Result<f64> {
        self.check_constraints(params)?;
        let mut total = 0.0;
        for (m, d) in self.models.iter().zip(&self.datasets) {
            total += m.nll(d, params)?;
        }
        for (i, c) in &self.constraints {
            total += c.nll_and_grad(params[*i]).0;
        }
        Ok(total)
    }

    fn grad_nll(&self, params: &[f64]) -> Result<Vec<f64>> {
        Ok(self.nll_grad(params)?.1)
    }

    fn nll_grad(&self, params: &[f64]) -> Result<(f64, Vec<f64>)> {
        self.check_constraints(params)?;
        let mut total = 0.0;
        let mut grad = vec![0.0f64; params.len()];
        for (m, d) in self.models.iter().zip(&self.datasets) {
            let (nll, g) = m.nll_grad(d, params)?;
            total += nll;
            for (acc, gi) in grad.iter_mut().zip(g) {
                *acc += gi;
            }
        }
        for (i, c) in &self.constraints {
            let (nll, g) = c.nll_and_grad(params[*i]);
            total += nll;
            grad[*i] += g;
        }
        Ok((total, grad))
    }
}

/// Builds [`UnbinnedNll`] losses carrying the same constraints for every dataset
/// (observed, toys, Asimov).
#[derive(Debug, Clone, Default)]
pub struct UnbinnedLossBuilder {
    constraints: Vec<(usize, Constraint)>,
}

impl UnbinnedLossBuilder {
    /// Builder without constraints.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a constraint on parameter `index`.
    pub fn with_constraint(mut self, index: usize, constraint: Constraint) -> Result<Self> {
        constraint.validate()?;
        self.constraints.push((index, constraint));
        Ok(self)
    }
}

impl LossBuilder for UnbinnedLossBuilder {
    fn build(
        &self,
        models: &[Arc<dyn DensityModel>],
        datasets: &[Dataset],
    ) -> Result<Arc<dyn Loss>> {
        Ok(Arc::new(UnbinnedNll::new(models.to_vec(), datasets.to_vec(), self.constraints.clone())?))
    }
}
