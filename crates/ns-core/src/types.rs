//! Common data types for NextStat

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Result of a minimization over the floating parameters of a model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    /// Parameter values at the minimum (full vector, fixed parameters included)
    pub parameters: Vec<f64>,

    /// Negative log-likelihood at minimum
    pub nll: f64,

    /// Convergence status
    pub converged: bool,

    /// Number of iterations
    pub n_iter: u64,

    /// Number of function evaluations
    pub n_fev: usize,

    /// Termination message from the minimizer
    pub message: String,
}

impl FitResult {
    /// Create a new fit result
    pub fn new(
        parameters: Vec<f64>,
        nll: f64,
        converged: bool,
        n_iter: u64,
        n_fev: usize,
        message: impl Into<String>,
    ) -> Self {
        Self { parameters, nll, converged, n_iter, n_fev, message: message.into() }
    }

    /// Value of parameter `index`, or an error when the fit does not carry it.
    pub fn value(&self, index: usize) -> Result<f64> {
        self.parameters.get(index).copied().ok_or_else(|| {
            Error::Validation(format!(
                "parameter index {} out of range for fit result with {} parameters",
                index,
                self.parameters.len()
            ))
        })
    }
}

/// One-dimensional dataset with optional per-event weights.
///
/// Unweighted data are points drawn from a model; weighted data are used for
/// Asimov datasets, where each point is a bin center carrying the expected
/// number of events in its bin.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    values: Vec<f64>,
    weights: Option<Vec<f64>>,
    bounds: (f64, f64),
}

impl Dataset {
    /// Unweighted dataset. Every value must be finite and inside `bounds`.
    pub fn new(values: Vec<f64>, bounds: (f64, f64)) -> Result<Self> {
        validate_bounds(bounds)?;
        validate_values(&values, bounds)?;
        Ok(Self { values, weights: None, bounds })
    }

    /// Weighted dataset. Weights must be finite and match `values` in length.
    pub fn weighted(values: Vec<f64>, weights: Vec<f64>, bounds: (f64, f64)) -> Result<Self> {
        validate_bounds(bounds)?;
        validate_values(&values, bounds)?;
        if weights.len() != values.len() {
            return Err(Error::Validation(format!(
                "weights length mismatch: expected {}, got {}",
                values.len(),
                weights.len()
            )));
        }
        if let Some(i) = weights.iter().position(|w| !w.is_finite()) {
            return Err(Error::Validation(format!("weight[{}] is not finite: {}", i, weights[i])));
        }
        Ok(Self { values, weights: Some(weights), bounds })
    }

    /// Observed values.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Per-event weights, `None` for unweighted data.
    pub fn weights(&self) -> Option<&[f64]> {
        self.weights.as_deref()
    }

    /// Weight of event `i` (1 for unweighted data).
    #[inline]
    pub fn weight(&self, i: usize) -> f64 {
        self.weights.as_ref().map_or(1.0, |w| w[i])
    }

    /// Sum of weights (number of events for unweighted data).
    pub fn sum_weights(&self) -> f64 {
        match &self.weights {
            Some(w) => w.iter().sum(),
            None => self.values.len() as f64,
        }
    }

    /// Observable range `(lo, hi)`.
    pub fn bounds(&self) -> (f64, f64) {
        self.bounds
    }

    /// Number of events.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// `true` when the dataset has no events.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn validate_bounds((lo, hi): (f64, f64)) -> Result<()> {
    if !(lo.is_finite() && hi.is_finite() && lo < hi) {
        return Err(Error::Validation(format!("invalid observable bounds: ({}, {})", lo, hi)));
    }
    Ok(())
}

fn validate_values(values: &[f64], (lo, hi): (f64, f64)) -> Result<()> {
    for (i, &x) in values.iter().enumerate() {
        if !x.is_finite() {
            return Err(Error::Validation(format!("value[{}] is not finite: {}", i, x)));
        }
        if x < lo || x > hi {
            return Err(Error::Validation(format!(
                "value[{}]={} outside bounds ({}, {})",
                i, x, lo, hi
            )));
        }
    }
    Ok(())
}
