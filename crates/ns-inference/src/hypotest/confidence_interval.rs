use std::fmt;

use ns_core::{Error, Result};

use super::{Opt, check_alpha, check_poi_floating};
use crate::calculator::Calculator;
use crate::interp::{Spline, sorted_unique};
use crate::poi::Poi;
use crate::test_statistic::TestStatistic;

/// Two-sided interval on the POI.
#[derive(Debug, Clone, PartialEq)]
pub struct IntervalResult {
    /// POI name.
    pub name: String,
    /// Target p-value (`1 − CL`).
    pub alpha: f64,
    /// Observed best-fit POI value.
    pub observed: f64,
    /// Lower edge, `None` when the scan never crosses `alpha` below the maximum.
    pub band_m: Option<f64>,
    /// Upper edge, `None` when the scan never crosses `alpha` above the maximum.
    pub band_p: Option<f64>,
}

impl fmt::Display for IntervalResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} < {} < {} at {:.1}% C.L. (observed {:.4})",
            Opt(self.band_m),
            self.name,
            Opt(self.band_p),
            (1.0 - self.alpha) * 100.0,
            self.observed
        )
    }
}

/// Confidence interval from a two-sided p-value scan over a POI grid.
#[derive(Debug)]
pub struct ConfidenceInterval<C> {
    poinull: Poi,
    calculator: C,
    qtilde: bool,
    pvalues: Option<Vec<f64>>,
}

impl<C: Calculator> ConfidenceInterval<C> {
    /// Scan `poinull` (a grid on a floating parameter) with `calculator`.
    pub fn new(poinull: Poi, calculator: C) -> Result<Self> {
        check_poi_floating(calculator.config(), &poinull)?;
        Ok(Self { poinull, calculator, qtilde: false, pvalues: None })
    }

    /// Builder form of [`set_qtilde`](Self::set_qtilde).
    pub fn with_qtilde(mut self, qtilde: bool) -> Self {
        self.set_qtilde(qtilde);
        self
    }

    /// Whether the bounded (`qtilde`) statistic is used.
    pub fn qtilde(&self) -> bool {
        self.qtilde
    }

    /// Switch the statistic; drops the memoized scan.
    pub fn set_qtilde(&mut self, qtilde: bool) {
        self.qtilde = qtilde;
        self.pvalues = None;
    }

    /// The scanned grid.
    pub fn poinull(&self) -> &Poi {
        &self.poinull
    }

    /// The wrapped calculator.
    pub fn calculator(&self) -> &C {
        &self.calculator
    }

    /// Give the calculator back, with its caches.
    pub fn into_calculator(self) -> C {
        self.calculator
    }

    /// Two-sided p-value at every grid value, computed on first call.
    pub fn pvalues(&mut self) -> Result<&[f64]> {
        if self.pvalues.is_none() {
            let stat = TestStatistic::two_sided(self.qtilde);
            let pv = self.calculator.pvalue(&self.poinull, None, stat)?;
            self.pvalues = Some(pv.null);
        }
        Ok(self.pvalues.as_deref().unwrap_or_default())
    }

    /// Interval at confidence level `1 − alpha`.
    ///
    /// The scan is split at its maximum; each side is interpolated as
    /// POI(p) and evaluated at `alpha`. A side the scan never brings down to
    /// `alpha` yields `None`. Edges that do not bracket the observed best fit
    /// mean the scan is not a single-peaked curve, and are an error.
    pub fn interval(&mut self, alpha: f64) -> Result<IntervalResult> {
        check_alpha(alpha)?;
        let observed = self.calculator.config().bestfit()?.value(self.poinull.index())?;
        let pvalues = self.pvalues()?.to_vec();

        let mut points: Vec<(f64, f64)> =
            self.poinull.values().iter().copied().zip(pvalues).filter(|(_, p)| p.is_finite()).collect();
        points.sort_by(|a, b| a.0.total_cmp(&b.0));
        if points.is_empty() {
            return Err(Error::Computation(format!("no finite p-value in the scan of {}", self.poinull)));
        }
        let imax = points
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.1.total_cmp(&b.1.1))
            .map(|(i, _)| i)
            .unwrap_or(0);

        let band_m = branch_crossing(&points[..=imax], alpha, "lower");
        let band_p = branch_crossing(&points[imax..], alpha, "upper");
        check_brackets(self.poinull.name(), observed, band_m, band_p)?;

        let r = IntervalResult { name: self.poinull.name().to_string(), alpha, observed, band_m, band_p };
        log::info!("confidence interval ({}): {}", self.calculator.kind(), r);
        Ok(r)
    }
}

/// Requires `band_m < observed < band_p` for whichever edges exist.
fn check_brackets(name: &str, observed: f64, band_m: Option<f64>, band_p: Option<f64>) -> Result<()> {
    let below = band_m.is_none_or(|m| m < observed);
    let above = band_p.is_none_or(|p| p > observed);
    if below && above {
        return Ok(());
    }
    Err(Error::Computation(format!(
        "p-value scan of {name} is not single-peaked around the best fit: \
         interval ({}, {}) does not contain {observed}",
        Opt(band_m),
        Opt(band_p)
    )))
}

/// Interpolates POI as a function of p on one side of the maximum.
fn branch_crossing(points: &[(f64, f64)], alpha: f64, side: &str) -> Option<f64> {
    let (pois, ps): (Vec<f64>, Vec<f64>) = points.iter().copied().unzip();
    let (ps, pois) = sorted_unique(&ps, &pois);
    let (lo, hi) = (ps.first().copied()?, ps.last().copied()?);
    if alpha < lo || alpha > hi {
        log::warn!("{side} branch of the scan covers p in [{lo:.3e}, {hi:.3e}], alpha = {alpha} is outside");
        return None;
    }
    if ps.len() != points.len() {
        log::warn!("{side} branch of the scan is not strictly monotone, repeated p-values dropped");
    }
    match Spline::fit(&ps, &pois) {
        Ok(spline) => Some(spline.eval(alpha)),
        Err(e) => {
            log::warn!("cannot interpolate the {side} branch of the scan: {e}");
            None
        }
    }
}
