use crate::pdf::{UnbinnedPdf, check_lengths, check_support, u01};
use ns_core::{Error, Result};
use ns_prob::math::log_diff_exp;

/// Exponential-family PDF `p(x) ∝ exp(λ x)` normalized on the observable bounds.
///
/// This is a convenient HEP background shape; unlike the "rate-parameter exponential",
/// `λ` is allowed to be any real number.
#[derive(Debug, Clone, Default)]
pub struct ExponentialPdf;

impl ExponentialPdf {
    /// Create a new exponential PDF; the single parameter is `lambda`.
    pub fn new() -> Self {
        Self
    }
}

fn lambda_of(params: &[f64]) -> Result<f64> {
    if params.len() != 1 {
        return Err(Error::Validation(format!(
            "ExponentialPdf expects 1 param (lambda), got {}",
            params.len()
        )));
    }
    let lambda = params[0];
    if !lambda.is_finite() {
        return Err(Error::Validation(format!(
            "ExponentialPdf parameter must be finite, got lambda={lambda}"
        )));
    }
    Ok(lambda)
}

impl UnbinnedPdf for ExponentialPdf {
    fn n_params(&self) -> usize {
        1
    }

    fn pdf_tag(&self) -> &'static str {
        "exponential"
    }

    fn log_prob_grad_batch(
        &self,
        xs: &[f64],
        support: (f64, f64),
        params: &[f64],
        out_logp: &mut [f64],
        out_grad: &mut [f64],
    ) -> Result<()> {
        let lambda = lambda_of(params)?;
        check_support("ExponentialPdf", support)?;
        check_lengths("ExponentialPdf", xs.len(), 1, out_logp, out_grad)?;

        // logZ = log ∫_a^b exp(λ x) dx
        let (log_z, ex) = logz_and_ex(lambda, support.0, support.1)?;

        for (i, &x) in xs.iter().enumerate() {
            out_logp[i] = lambda * x - log_z;
            out_grad[i] = x - ex;
        }

        Ok(())
    }

    fn interval_fraction(
        &self,
        support: (f64, f64),
        params: &[f64],
        (lo, hi): (f64, f64),
    ) -> Result<f64> {
        let lambda = lambda_of(params)?;
        check_support("ExponentialPdf", support)?;
        let (a, b) = support;
        let (lo, hi) = (lo.max(a), hi.min(b));
        if lo >= hi {
            return Ok(0.0);
        }
        let (log_z, _) = logz_and_ex(lambda, a, b)?;
        let cumulative = |t: f64| -> Result<f64> {
            if t <= a {
                return Ok(0.0);
            }
            if t >= b {
                return Ok(1.0);
            }
            Ok((logz_and_ex(lambda, a, t)?.0 - log_z).exp())
        };
        Ok((cumulative(hi)? - cumulative(lo)?).clamp(0.0, 1.0))
    }

    fn sample(
        &self,
        params: &[f64],
        n_events: usize,
        support: (f64, f64),
        rng: &mut dyn rand::RngCore,
    ) -> Result<Vec<f64>> {
        let lambda = lambda_of(params)?;
        check_support("ExponentialPdf sample", support)?;
        let (a, b) = support;
        let width = b - a;

        // Inverse CDF: x = a + ln(1 + u·(exp(λ(b-a)) - 1)) / λ
        let span = (lambda * width).exp_m1();
        Ok((0..n_events)
            .map(|_| {
                let u = u01(rng);
                let x = if lambda.abs() < 1e-12 || !span.is_finite() {
                    a + u * width
                } else {
                    a + (u * span).ln_1p() / lambda
                };
                x.clamp(a, b)
            })
            .collect())
    }
}

/// Return `(logZ, E[x])` for the bounded exponential family `p(x) ∝ exp(λ x)` on `[a,b]`.
fn logz_and_ex(lambda: f64, a: f64, b: f64) -> Result<(f64, f64)> {
    debug_assert!(a < b);

    // Small-λ limit: uniform on [a,b].
    if lambda.abs() < 1e-12 {
        let z = b - a;
        if !(z.is_finite() && z > 0.0) {
            return Err(Error::Validation(format!(
                "invalid bounds for ExponentialPdf: ({a}, {b})"
            )));
        }
        return Ok((z.ln(), 0.5 * (a + b)));
    }

    let t_a = lambda * a;
    let t_b = lambda * b;

    // log|exp(t_b) - exp(t_a)|
    let (hi_t, lo_t) = if t_b >= t_a { (t_b, t_a) } else { (t_a, t_b) };
    let log_num = if hi_t == lo_t { f64::NEG_INFINITY } else { log_diff_exp(hi_t, lo_t) };
    let log_z = log_num - lambda.abs().ln();

    // E[x] = d/dλ logZ = (x_hi - x_lo*r)/(1-r) - 1/λ, where r=exp(lo-hi).
    let (x_hi, x_lo, r) =
        if t_b >= t_a { (b, a, (t_a - t_b).exp()) } else { (a, b, (t_b - t_a).exp()) };
    let denom = 1.0 - r;
    if denom <= 0.0 {
        // Numerically indistinguishable from uniform.
        return Ok(((b - a).ln(), 0.5 * (a + b)));
    }
    let ratio = (x_hi - x_lo * r) / denom;
    let ex = ratio - 1.0 / lambda;

    Ok((log_z, ex))
}
