//! Small numerically-stable math utilities used across probability code.

/// Stable `log(exp(a) - exp(b))` for `a >= b`.
///
/// Returns `-∞` when `a == b`.
#[inline]
pub fn log_diff_exp(a: f64, b: f64) -> f64 {
    if b == f64::NEG_INFINITY {
        return a;
    }
    let d = b - a;
    if d >= 0.0 {
        return f64::NEG_INFINITY;
    }
    // log(1 - exp(d)): expm1 near 0, ln_1p in the tail
    if d > -std::f64::consts::LN_2 { a + (-d.exp_m1()).ln() } else { a + (-d.exp()).ln_1p() }
}

/// Stable `log(Σ exp(x_i))`.
pub fn logsumexp(xs: &[f64]) -> f64 {
    let m = xs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !m.is_finite() {
        return m;
    }
    m + xs.iter().map(|&x| (x - m).exp()).sum::<f64>().ln()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_log_diff_exp() {
        assert_relative_eq!(log_diff_exp(2.0, 1.0), (2f64.exp() - 1f64.exp()).ln(), epsilon = 1e-12);
        assert_relative_eq!(log_diff_exp(0.0, -1e-10), (1e-10f64).ln(), max_relative = 1e-6);
        assert_relative_eq!(log_diff_exp(-3.0, -50.0), -3.0, epsilon = 1e-12);
        assert_eq!(log_diff_exp(1.0, 1.0), f64::NEG_INFINITY);
        assert_eq!(log_diff_exp(1.5, f64::NEG_INFINITY), 1.5);
    }

    #[test]
    fn test_logsumexp() {
        assert_relative_eq!(logsumexp(&[0.0, 0.0]), std::f64::consts::LN_2, epsilon = 1e-15);
        assert_relative_eq!(logsumexp(&[1000.0, 1000.0]), 1000.0 + std::f64::consts::LN_2);
        assert_eq!(logsumexp(&[]), f64::NEG_INFINITY);
    }
}
