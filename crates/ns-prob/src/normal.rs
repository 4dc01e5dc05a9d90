//! Normal distribution utilities.
//!
//! Besides the parametric log-density, this module carries the standard normal
//! CDF, survival function and their inverses, which turn test statistics into
//! p-values and p-values into significances.

use ns_core::{Error, Result};
use statrs::function::erf::{erfc, erfc_inv};

/// Natural log of `sqrt(2π)`.
///
/// `ln(sqrt(2π)) = 0.5*ln(2π)` (precomputed to keep this crate const-friendly).
const LN_SQRT_2PI: f64 = 0.918_938_533_204_672_7;

/// Log-PDF of a Normal distribution `N(mu, sigma)` at `x`.
///
/// `log p(x) = -0.5 * ((x-mu)/sigma)^2 - ln(sigma) - ln(sqrt(2π))`
pub fn logpdf(x: f64, mu: f64, sigma: f64) -> Result<f64> {
    if !sigma.is_finite() || sigma <= 0.0 {
        return Err(Error::Validation(format!("sigma must be finite and > 0, got {}", sigma)));
    }
    let z = (x - mu) / sigma;
    Ok(-0.5 * z * z - sigma.ln() - LN_SQRT_2PI)
}

/// Negative log-likelihood for a Normal distribution `N(mu, sigma)` at `x`.
pub fn nll(x: f64, mu: f64, sigma: f64) -> Result<f64> {
    Ok(-logpdf(x, mu, sigma)?)
}

/// Standard normal density.
#[inline]
pub fn std_pdf(z: f64) -> f64 {
    (-0.5 * z * z - LN_SQRT_2PI).exp()
}

/// Standard normal CDF `Φ(z)`.
#[inline]
pub fn cdf(z: f64) -> f64 {
    0.5 * erfc(-z / std::f64::consts::SQRT_2)
}

/// Standard normal survival function `1 - Φ(z)`, accurate in the upper tail.
#[inline]
pub fn sf(z: f64) -> f64 {
    0.5 * erfc(z / std::f64::consts::SQRT_2)
}

/// Standard normal quantile `Φ⁻¹(p)`.
///
/// `p <= 0` maps to `-∞`, `p >= 1` to `+∞`, NaN stays NaN.
pub fn ppf(p: f64) -> f64 {
    if p.is_nan() {
        return f64::NAN;
    }
    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }
    -std::f64::consts::SQRT_2 * erfc_inv(2.0 * p)
}

/// Inverse survival function `Φ⁻¹(1 - p)`, accurate for small `p`.
pub fn isf(p: f64) -> f64 {
    -ppf(p)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_standard_at_zero() {
        let lp = logpdf(0.0, 0.0, 1.0).unwrap();
        assert!((lp + LN_SQRT_2PI).abs() < 1e-12);
        assert_relative_eq!(std_pdf(0.0), lp.exp(), epsilon = 1e-15);
    }

    #[test]
    fn test_symmetry() {
        let lp1 = logpdf(1.3, 0.0, 2.0).unwrap();
        let lp2 = logpdf(-1.3, 0.0, 2.0).unwrap();
        assert!((lp1 - lp2).abs() < 1e-12);
    }

    #[test]
    fn test_invalid_sigma() {
        assert!(logpdf(0.0, 0.0, 0.0).is_err());
        assert!(logpdf(0.0, 0.0, -1.0).is_err());
    }

    #[test]
    fn test_cdf_reference_values() {
        assert_eq!(cdf(0.0), 0.5);
        assert_eq!(sf(0.0), 0.5);
        assert_relative_eq!(cdf(1.0), 0.841_344_746_068_542_9, epsilon = 1e-10);
        assert_relative_eq!(sf(1.644_853_626_951_472_2), 0.05, epsilon = 1e-10);
        // 5 sigma one-sided tail
        assert_relative_eq!(sf(5.0), 2.866_515_718_791_939e-7, max_relative = 1e-9);
    }

    #[test]
    fn test_quantiles_invert_cdf() {
        for &p in &[1e-9, 0.01, 0.05, 0.3, 0.5, 0.8, 0.975] {
            assert_relative_eq!(cdf(ppf(p)), p, max_relative = 1e-10);
            assert_relative_eq!(sf(isf(p)), p, max_relative = 1e-10);
        }
        assert_relative_eq!(ppf(0.975), 1.959_963_984_540_054, epsilon = 1e-9);
        assert_eq!(ppf(0.0), f64::NEG_INFINITY);
        assert_eq!(ppf(1.0), f64::INFINITY);
        assert!(ppf(f64::NAN).is_nan());
    }
}
