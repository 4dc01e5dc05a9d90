//! Hypothesis-test orchestrators.
//!
//! Each orchestrator owns a [`Calculator`](crate::Calculator), scans the null
//! POI values through it once, memoizes the resulting p-value table and turns
//! it into a physics answer:
//!
//! - [`Discovery`]: one-sided discovery p-value and Gaussian significance,
//! - [`ConfidenceInterval`]: two-sided interval from the crossings of a
//!   target p-value,
//! - [`UpperLimit`]: observed and expected (CLs or CLs+b) upper limits.
//!
//! Summaries are logged at `info` level; every result type also implements
//! `Display`.

use std::fmt;

use ns_core::{Error, Result};

use crate::config::Config;
use crate::interp::{Spline, sorted_unique};
use crate::poi::Poi;

mod confidence_interval;
mod discovery;
mod upper_limit;

pub use confidence_interval::{ConfidenceInterval, IntervalResult};
pub use discovery::{Discovery, DiscoveryResult};
pub use upper_limit::{UpperLimit, UpperLimitPValues, UpperLimitResult};

/// Expected-band ordering: median, +1σ, +2σ, −1σ, −2σ.
pub const NSIGMA_ORDER: [f64; 5] = [0.0, 1.0, 2.0, -1.0, -2.0];

const CLB_MIN: f64 = 1e-300;

/// CLs = CLs+b / CLb, guarded against CLb underflow in the far tails.
pub(crate) fn safe_cls(clsb: f64, clb: f64) -> f64 {
    if !(clsb.is_finite() && clb.is_finite()) {
        return 0.0;
    }
    if clb <= CLB_MIN {
        return if clsb <= CLB_MIN { 0.0 } else { 1.0 };
    }
    (clsb / clb).clamp(0.0, 1.0)
}

/// The tested parameter must float in the configuration, otherwise every
/// profiled fit would ignore the POI value.
fn check_poi_floating(config: &Config, poi: &Poi) -> Result<()> {
    if !config.parameters().is_floating(poi.index())? {
        return Err(Error::Configuration(format!(
            "parameter of interest '{}' is fixed in the model configuration",
            poi.name()
        )));
    }
    Ok(())
}

fn check_alpha(alpha: f64) -> Result<()> {
    if !(alpha > 0.0 && alpha < 1.0) {
        return Err(Error::Validation(format!("alpha must lie in (0, 1), got {alpha}")));
    }
    Ok(())
}

/// Smallest POI value where the interpolated p-value curve crosses `alpha`.
fn first_crossing(pois: &[f64], pvalues: &[f64], alpha: f64) -> Option<f64> {
    let shifted: Vec<f64> = pvalues.iter().map(|p| p - alpha).collect();
    let (xs, ys) = sorted_unique(pois, &shifted);
    match Spline::fit(&xs, &ys) {
        Ok(spline) => spline.first_root(0.0),
        Err(e) => {
            log::warn!("cannot interpolate p-value scan: {e}");
            None
        }
    }
}

struct Opt(Option<f64>);

impl fmt::Display for Opt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(v) => write!(f, "{v:.4}"),
            None => write!(f, "none"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_safe_cls() {
        assert_relative_eq!(safe_cls(0.02, 0.5), 0.04);
        assert_eq!(safe_cls(0.0, 0.0), 0.0);
        assert_eq!(safe_cls(1e-3, 0.0), 1.0);
        assert_eq!(safe_cls(f64::NAN, 0.5), 0.0);
        assert_eq!(safe_cls(0.6, 0.5), 1.0);
    }

    #[test]
    fn test_first_crossing_linear_scan() {
        let pois = [1.0, 2.0, 3.0, 4.0, 5.0];
        let p = [0.5, 0.3, 0.1, 0.03, 0.01];
        let x = first_crossing(&pois, &p, 0.05).unwrap();
        assert!(x > 3.0 && x < 4.0, "{x}");
        assert!(first_crossing(&pois, &p, 0.001).is_none());
    }

    #[test]
    fn test_alpha_range() {
        assert!(check_alpha(0.05).is_ok());
        assert!(check_alpha(0.0).is_err());
        assert!(check_alpha(1.0).is_err());
        assert!(check_alpha(f64::NAN).is_err());
    }
}
