//! Profile-likelihood-ratio test statistic and its truncation rules.
//!
//! Both calculators go through [`qdist`] / [`qdist_array`]: this is the only
//! place where the sign convention of the statistic is decided.

use ns_core::{Error, Result};

/// Which fluctuations of the best fit count against the tested value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sidedness {
    /// Upper limits: `q = 0` when the best fit lies above the tested value.
    OneSided,
    /// Discovery: `q = 0` when the best fit lies below the tested value.
    OneSidedDiscovery,
    /// Intervals: no truncation.
    TwoSided,
}

impl Sidedness {
    /// Map the `(onesided, onesideddiscovery)` flag pair; discovery wins when both are set.
    pub fn from_flags(onesided: bool, onesideddiscovery: bool) -> Self {
        if onesideddiscovery {
            Sidedness::OneSidedDiscovery
        } else if onesided {
            Sidedness::OneSided
        } else {
            Sidedness::TwoSided
        }
    }

    /// `true` for either one-sided convention.
    pub fn is_one_sided(self) -> bool {
        !matches!(self, Sidedness::TwoSided)
    }
}

/// Options shared by every p-value computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestStatistic {
    /// Snap negative best-fit POI values to 0 (physical boundary).
    pub qtilde: bool,
    /// Truncation convention.
    pub sidedness: Sidedness,
}

impl TestStatistic {
    /// One-sided statistic for upper limits.
    pub fn upper_limit(qtilde: bool) -> Self {
        Self { qtilde, sidedness: Sidedness::OneSided }
    }

    /// One-sided discovery statistic `q0`.
    pub fn discovery() -> Self {
        Self { qtilde: false, sidedness: Sidedness::OneSidedDiscovery }
    }

    /// Untruncated statistic for confidence intervals.
    pub fn two_sided(qtilde: bool) -> Self {
        Self { qtilde, sidedness: Sidedness::TwoSided }
    }

    /// Apply the qtilde snap to a best-fit POI value.
    pub fn snap_bestfit(&self, bestfit: f64) -> f64 {
        if self.qtilde && bestfit < 0.0 { 0.0 } else { bestfit }
    }
}

/// `q = 2·(nll1 − nll2)`.
#[inline]
pub fn q(nll1: f64, nll2: f64) -> f64 {
    2.0 * (nll1 - nll2)
}

/// Truncate a single statistic.
#[inline]
pub fn qdist(q: f64, bestfit: f64, poi_value: f64, sidedness: Sidedness) -> f64 {
    match sidedness {
        Sidedness::OneSidedDiscovery if bestfit < poi_value || q < 0.0 => 0.0,
        Sidedness::OneSided if bestfit > poi_value || q < 0.0 => 0.0,
        _ => q,
    }
}

/// Truncate a distribution of statistics.
///
/// `bestfit` and `poi_value` either match `qs` in length or hold a single
/// value broadcast to every entry; any other length is a validation error.
/// Entries whose `q` is NaN or infinite are dropped before truncation.
pub fn qdist_array(
    qs: &[f64],
    bestfit: &[f64],
    poi_value: &[f64],
    sidedness: Sidedness,
) -> Result<Vec<f64>> {
    for (what, xs) in [("best-fit values", bestfit), ("POI values", poi_value)] {
        if xs.len() != 1 && xs.len() != qs.len() {
            return Err(Error::Validation(format!(
                "{} {what} for {} statistics, expected 1 or {}",
                xs.len(),
                qs.len(),
                qs.len()
            )));
        }
    }
    let at = |xs: &[f64], i: usize| if xs.len() == 1 { xs[0] } else { xs[i] };
    Ok(qs
        .iter()
        .enumerate()
        .filter(|(_, q)| q.is_finite())
        .map(|(i, &q)| qdist(q, at(bestfit, i), at(poi_value, i), sidedness))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_q_is_twice_the_difference() {
        for &(a, b) in &[(10.0, 4.0), (-3.5, 1.25), (1e12, 1e12 - 1.0), (0.1, 0.3)] {
            assert_eq!(q(a, b), 2.0 * (a - b));
        }
    }

    #[test]
    fn test_one_sided_zeroes_excess() {
        let qs = [1.0, 2.0, 3.0, -0.5];
        let bestfit = [0.5, 2.5, 1.0, 0.0];
        let out = qdist_array(&qs, &bestfit, &[1.5], Sidedness::OneSided).unwrap();
        assert_eq!(out, vec![1.0, 0.0, 3.0, 0.0]);
        assert!(out.iter().all(|&q| q >= 0.0));
    }

    #[test]
    fn test_discovery_flips_condition() {
        let qs = [1.0, 2.0, 3.0];
        let bestfit = [0.5, 2.5, 1.0];
        let out = qdist_array(&qs, &bestfit, &[1.5], Sidedness::OneSidedDiscovery).unwrap();
        assert_eq!(out, vec![0.0, 2.0, 0.0]);
    }

    #[test]
    fn test_two_sided_unchanged() {
        let qs = [1.0, -2.0, 3.0];
        assert_eq!(qdist_array(&qs, &[10.0], &[0.0], Sidedness::TwoSided).unwrap(), qs.to_vec());
    }

    #[test]
    fn test_non_finite_dropped_before_truncation() {
        let qs = [f64::NAN, 4.0, f64::INFINITY, f64::NEG_INFINITY, 1.0];
        let bestfit = [0.0, 0.0, 0.0, 0.0, 5.0];
        let out = qdist_array(&qs, &bestfit, &[1.0], Sidedness::OneSided).unwrap();
        // the last entry keeps its own best fit (5 > 1) after filtering
        assert_eq!(out, vec![4.0, 0.0]);
    }

    #[test]
    fn test_per_entry_poi_values() {
        let out = qdist_array(&[1.0, 1.0], &[2.0], &[1.0, 3.0], Sidedness::OneSided).unwrap();
        assert_eq!(out, vec![0.0, 1.0]);
    }

    #[test]
    fn test_length_mismatch_is_an_error() {
        let qs = [1.0, 2.0, 3.0];
        let err = qdist_array(&qs, &[0.0, 1.0], &[1.0], Sidedness::OneSided).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        let err = qdist_array(&qs, &[0.0], &[], Sidedness::TwoSided).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_flags_and_snap() {
        assert_eq!(Sidedness::from_flags(true, true), Sidedness::OneSidedDiscovery);
        assert_eq!(Sidedness::from_flags(false, false), Sidedness::TwoSided);
        assert!(Sidedness::OneSided.is_one_sided());
        assert_eq!(TestStatistic::upper_limit(true).snap_bestfit(-0.3), 0.0);
        assert_eq!(TestStatistic::upper_limit(false).snap_bestfit(-0.3), -0.3);
    }
}
