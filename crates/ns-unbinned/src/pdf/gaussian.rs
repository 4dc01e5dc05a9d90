use crate::pdf::{UnbinnedPdf, check_lengths, check_support, u01};
use ns_core::{Error, Result};
use ns_prob::normal;

/// Truncated Gaussian PDF `N(μ, σ)` normalized on the observable bounds.
#[derive(Debug, Clone, Default)]
pub struct GaussianPdf;

impl GaussianPdf {
    /// Create a new Gaussian PDF; parameters are `(mu, sigma)`.
    pub fn new() -> Self {
        Self
    }
}

fn mu_sigma(params: &[f64]) -> Result<(f64, f64)> {
    if params.len() != 2 {
        return Err(Error::Validation(format!(
            "GaussianPdf expects 2 params (mu, sigma), got {}",
            params.len()
        )));
    }
    let (mu, sigma) = (params[0], params[1]);
    if !mu.is_finite() || !sigma.is_finite() || sigma <= 0.0 {
        return Err(Error::Validation(format!(
            "GaussianPdf parameters must be finite with sigma > 0, got mu={mu}, sigma={sigma}"
        )));
    }
    Ok((mu, sigma))
}

/// Normalization constant Z = Phi(z_b) - Phi(z_a), floored for extreme truncation.
fn norm_const(z_a: f64, z_b: f64) -> f64 {
    let z = normal::cdf(z_b) - normal::cdf(z_a);
    if !z.is_finite() || z <= 0.0 { f64::MIN_POSITIVE } else { z }
}

impl UnbinnedPdf for GaussianPdf {
    fn n_params(&self) -> usize {
        2
    }

    fn pdf_tag(&self) -> &'static str {
        "gaussian"
    }

    fn log_prob_grad_batch(
        &self,
        xs: &[f64],
        support: (f64, f64),
        params: &[f64],
        out_logp: &mut [f64],
        out_grad: &mut [f64],
    ) -> Result<()> {
        let (mu, sigma) = mu_sigma(params)?;
        check_support("GaussianPdf", support)?;
        check_lengths("GaussianPdf", xs.len(), 2, out_logp, out_grad)?;
        let (a, b) = support;

        let inv_sigma = 1.0 / sigma;
        let z_a = (a - mu) * inv_sigma;
        let z_b = (b - mu) * inv_sigma;
        let z = norm_const(z_a, z_b);
        let log_norm = z.ln() + sigma.ln();

        // Derivatives of logZ.
        let phi_a = normal::std_pdf(z_a);
        let phi_b = normal::std_pdf(z_b);
        let dlogz_dmu = (phi_a - phi_b) * inv_sigma / z;
        let dlogz_dsigma = (z_a * phi_a - z_b * phi_b) * inv_sigma / z;

        for (i, &x) in xs.iter().enumerate() {
            let z_x = (x - mu) * inv_sigma;
            out_logp[i] = normal::logpdf(z_x, 0.0, 1.0)? - log_norm;

            // d/dmu logp = (z/σ) - d/dmu logZ
            out_grad[2 * i] = z_x * inv_sigma - dlogz_dmu;
            // d/dsigma logp = ((z^2 - 1)/σ) - d/dsigma logZ
            out_grad[2 * i + 1] = (z_x * z_x - 1.0) * inv_sigma - dlogz_dsigma;
        }

        Ok(())
    }

    fn interval_fraction(
        &self,
        support: (f64, f64),
        params: &[f64],
        (lo, hi): (f64, f64),
    ) -> Result<f64> {
        let (mu, sigma) = mu_sigma(params)?;
        check_support("GaussianPdf", support)?;
        let (a, b) = support;
        let (lo, hi) = (lo.max(a), hi.min(b));
        if lo >= hi {
            return Ok(0.0);
        }
        let z = norm_const((a - mu) / sigma, (b - mu) / sigma);
        let mass = normal::cdf((hi - mu) / sigma) - normal::cdf((lo - mu) / sigma);
        Ok((mass / z).clamp(0.0, 1.0))
    }

    fn sample(
        &self,
        params: &[f64],
        n_events: usize,
        support: (f64, f64),
        rng: &mut dyn rand::RngCore,
    ) -> Result<Vec<f64>> {
        let (mu, sigma) = mu_sigma(params)?;
        check_support("GaussianPdf sample", support)?;
        let (a, b) = support;

        // Inverse CDF restricted to [Phi(z_a), Phi(z_b)].
        let cdf_a = normal::cdf((a - mu) / sigma);
        let cdf_b = normal::cdf((b - mu) / sigma);
        if cdf_b.partial_cmp(&cdf_a) != Some(core::cmp::Ordering::Greater) {
            return Err(Error::Computation(format!(
                "GaussianPdf support ({a}, {b}) has no mass for mu={mu}, sigma={sigma}"
            )));
        }
        Ok((0..n_events)
            .map(|_| {
                let u = cdf_a + u01(rng) * (cdf_b - cdf_a);
                (mu + sigma * normal::ppf(u)).clamp(a, b)
            })
            .collect())
    }
}
