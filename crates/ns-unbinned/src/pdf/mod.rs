//! Unbinned probability density functions (PDFs).

use ns_core::{Error, Result};

mod exponential;
mod gaussian;

pub use exponential::ExponentialPdf;
pub use gaussian::GaussianPdf;

/// Trait for normalized one-dimensional PDFs used in event-level likelihoods.
///
/// Implementations define a **proper density** on the observable support
/// `(lo, hi)`; parameters are the PDF's own shape parameters, in a fixed order.
pub trait UnbinnedPdf: Send + Sync {
    /// Number of shape parameters for this PDF.
    fn n_params(&self) -> usize;

    /// Short stable identifier used in messages.
    fn pdf_tag(&self) -> &'static str;

    /// Evaluate `log p(x | params)` for all points.
    ///
    /// `out` must have the same length as `xs`.
    fn log_prob_batch(
        &self,
        xs: &[f64],
        support: (f64, f64),
        params: &[f64],
        out: &mut [f64],
    ) -> Result<()> {
        let mut tmp_grad = vec![0.0f64; xs.len() * self.n_params()];
        self.log_prob_grad_batch(xs, support, params, out, &mut tmp_grad)
    }

    /// Evaluate `log p(x|params)` and its gradient w.r.t the shape parameters.
    ///
    /// - `out_logp` must have length `xs.len()`.
    /// - `out_grad` must have length `xs.len() * self.n_params()` and is laid out as
    ///   row-major `[event0_param0, event0_param1, ..., event1_param0, ...]`.
    fn log_prob_grad_batch(
        &self,
        xs: &[f64],
        support: (f64, f64),
        params: &[f64],
        out_logp: &mut [f64],
        out_grad: &mut [f64],
    ) -> Result<()>;

    /// Probability mass inside `interval` (clipped to the support).
    fn interval_fraction(
        &self,
        support: (f64, f64),
        params: &[f64],
        interval: (f64, f64),
    ) -> Result<f64>;

    /// Draw `n_events` points from the PDF on `support`.
    fn sample(
        &self,
        params: &[f64],
        n_events: usize,
        support: (f64, f64),
        rng: &mut dyn rand::RngCore,
    ) -> Result<Vec<f64>>;
}

/// Uniform(0,1) from RngCore (open interval).
#[inline]
pub(crate) fn u01(rng: &mut dyn rand::RngCore) -> f64 {
    // Add 0.5 to avoid exact 0; denominator is 2^64.
    (rng.next_u64() as f64 + 0.5) * (1.0 / 18446744073709551616.0_f64)
}

pub(crate) fn check_support(tag: &str, (a, b): (f64, f64)) -> Result<()> {
    if !a.is_finite() || !b.is_finite() || a >= b {
        return Err(Error::Validation(format!(
            "{tag} requires finite support with low < high, got ({a}, {b})"
        )));
    }
    Ok(())
}

pub(crate) fn check_lengths(
    tag: &str,
    n: usize,
    n_params: usize,
    out_logp: &[f64],
    out_grad: &[f64],
) -> Result<()> {
    if out_logp.len() != n {
        return Err(Error::Validation(format!(
            "{tag} out_logp length mismatch: expected {n}, got {}",
            out_logp.len()
        )));
    }
    let expected_grad_len = n * n_params;
    if out_grad.len() != expected_grad_len {
        return Err(Error::Validation(format!(
            "{tag} out_grad length mismatch: expected {expected_grad_len}, got {}",
            out_grad.len()
        )));
    }
    Ok(())
}
