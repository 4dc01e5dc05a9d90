//! Profile likelihood primitive.
//!
//! Every statistic in this crate is built from one operation: fix the parameter
//! of interest at a value, re-minimize over the remaining floating parameters
//! and read off the NLL. The ratio statistic is `q = 2·(NLL(θ_fixed) − NLL(θ̂))`
//! (Cowan et al., arXiv:1007.1727).

use ns_core::{Loss, Minimizer, ParameterSet, Result};

/// Signature of a profiling function: `(minimizer, loss, parameters, index, value) -> NLL`.
///
/// The parameter set is the starting point of the fit; the function must leave
/// it as it found it.
pub type ProfileFn = fn(&dyn Minimizer, &dyn Loss, &mut ParameterSet, usize, f64) -> Result<f64>;

/// Minimized NLL with parameter `index` fixed at `value`.
///
/// The parameter's value and floating flag are restored on return, including
/// when the minimizer fails. A non-converged fit is logged and its NLL returned.
pub fn profile_likelihood(
    minimizer: &dyn Minimizer,
    loss: &dyn Loss,
    params: &mut ParameterSet,
    index: usize,
    value: f64,
) -> Result<f64> {
    let fixed = params.fix(index, value)?;
    let fit = minimizer.minimize(loss, &fixed)?;
    if !fit.converged {
        log::warn!(
            "profile fit at {}={} did not converge ({}); using NLL={}",
            fixed.get(index)?.name,
            value,
            fit.message,
            fit.nll
        );
    }
    Ok(fit.nll)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MaximumLikelihoodEstimator;
    use approx::assert_relative_eq;
    use ns_core::{Error, FitResult, Parameter};

    struct GaussianSample(Vec<f64>);

    impl Loss for GaussianSample {
        fn nll(&self, p: &[f64]) -> Result<f64> {
            let (mu, sigma) = (p[0], p[1]);
            Ok(self.0.iter().map(|x| 0.5 * ((x - mu) / sigma).powi(2) + sigma.ln()).sum())
        }
    }

    fn params() -> ParameterSet {
        ParameterSet::new(vec![
            Parameter::new("mu", 0.0, (-5.0, 5.0)),
            Parameter::new("sigma", 1.0, (0.01, 10.0)),
        ])
        .unwrap()
    }

    #[test]
    fn test_profile_matches_analytic_minimum() {
        let data = vec![0.8, 1.1, 0.9, 1.4, 1.3, 0.7, 1.0, 1.2];
        let loss = GaussianSample(data.clone());
        let mut p = params();
        let mu = 1.5;
        let nll =
            profile_likelihood(&MaximumLikelihoodEstimator::new(), &loss, &mut p, 0, mu).unwrap();

        // sigma_hat(mu)^2 = mean((x - mu)^2); NLL = n/2 + n ln sigma_hat
        let n = data.len() as f64;
        let s2 = data.iter().map(|x| (x - mu).powi(2)).sum::<f64>() / n;
        assert_relative_eq!(nll, 0.5 * n + 0.5 * n * s2.ln(), epsilon = 1e-6);

        assert_eq!(p.values()[0], 0.0);
        assert!(p.is_floating(0).unwrap());
    }

    struct Exploding;

    impl Minimizer for Exploding {
        fn minimize(&self, _loss: &dyn Loss, _params: &ParameterSet) -> Result<FitResult> {
            Err(Error::Computation("line search failed".into()))
        }
    }

    #[test]
    fn test_state_restored_when_minimizer_fails() {
        let loss = GaussianSample(vec![1.0]);
        let mut p = params();
        assert!(profile_likelihood(&Exploding, &loss, &mut p, 1, 2.0).is_err());
        assert_eq!(p.values(), vec![0.0, 1.0]);
        assert!(p.is_floating(1).unwrap());
    }

    #[test]
    fn test_profile_fn_pointer() {
        let f: ProfileFn = profile_likelihood;
        let loss = GaussianSample(vec![0.0, 2.0]);
        let mut p = params();
        let nll = f(&MaximumLikelihoodEstimator::new(), &loss, &mut p, 0, 1.0).unwrap();
        // sigma_hat = 1 at mu = 1
        assert_relative_eq!(nll, 1.0, epsilon = 1e-6);
    }
}
