//! The calculator contract shared by the asymptotic and toy-based calibrations.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use ns_core::{Error, Result};

use crate::config::Config;
use crate::poi::{Poi, PoiKey};
use crate::test_statistic::{self, TestStatistic};

/// Which calibration a calculator uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalculatorKind {
    /// Closed-form asymptotic distributions (Asimov dataset).
    Asymptotic,
    /// Empirical distributions from pseudo-experiments.
    Frequentist,
}

impl fmt::Display for CalculatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalculatorKind::Asymptotic => write!(f, "asymptotic"),
            CalculatorKind::Frequentist => write!(f, "frequentist"),
        }
    }
}

/// p-values for every value of the null POI.
#[derive(Debug, Clone, PartialEq)]
pub struct PValues {
    /// p-value of the null hypothesis (CLs+b).
    pub null: Vec<f64>,
    /// p-value of the alternate hypothesis (CLb), when one was given.
    pub alt: Option<Vec<f64>>,
}

/// Turns profiled likelihoods into calibrated p-values.
///
/// Calculators memoize profiled NLLs per POI value for their whole lifetime,
/// hence the `&mut self` receivers.
pub trait Calculator {
    /// The analysis configuration.
    fn config(&self) -> &Arc<Config>;

    /// Calibration strategy.
    fn kind(&self) -> CalculatorKind;

    /// Observed p-values for each value of `poinull`, and for the alternate
    /// hypothesis when `poialt` is given.
    fn pvalue(&mut self, poinull: &Poi, poialt: Option<&Poi>, stat: TestStatistic) -> Result<PValues>;

    /// Expected p-values under the alternate hypothesis, one row per entry of
    /// `nsigma`, one column per value of `poinull`.
    fn expected_pvalue(
        &mut self,
        poinull: &Poi,
        poialt: &Poi,
        nsigma: &[f64],
        cls: bool,
        stat: TestStatistic,
    ) -> Result<Vec<Vec<f64>>>;

    /// Expected POI value at which the p-value crosses `alpha`, one entry per
    /// entry of `nsigma`.
    fn expected_poi(
        &mut self,
        poinull: &Poi,
        poialt: &Poi,
        nsigma: &[f64],
        alpha: f64,
        cls: bool,
        stat: TestStatistic,
    ) -> Result<Vec<f64>>;
}

/// Memoized profiled NLL on the observed data, keyed by POI value.
#[derive(Debug)]
pub(crate) struct ObservedNll {
    config: Arc<Config>,
    cache: HashMap<PoiKey, f64>,
}

impl ObservedNll {
    pub(crate) fn new(config: Arc<Config>) -> Self {
        Self { config, cache: HashMap::new() }
    }

    pub(crate) fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// Profiled observed NLL at every value of `poi`.
    #[cfg(test)]
    pub(crate) fn nll(&mut self, poi: &Poi) -> Result<Vec<f64>> {
        poi.values().iter().map(|&v| self.nll_at(poi.index(), v)).collect()
    }

    pub(crate) fn nll_at(&mut self, index: usize, value: f64) -> Result<f64> {
        let key = PoiKey::from(value);
        if let Some(&nll) = self.cache.get(&key) {
            return Ok(nll);
        }
        let loss = self.config.obsloss()?;
        let nll = self.config.pll(loss.as_ref(), index, value)?;
        self.cache.insert(key, nll);
        Ok(nll)
    }

    /// Best-fit POI value on the observed data, snapped to 0 under qtilde.
    pub(crate) fn bestfit_poi(&self, poi: &Poi, stat: TestStatistic) -> Result<f64> {
        let bf = self.config.bestfit()?.value(poi.index())?;
        Ok(stat.snap_bestfit(bf))
    }

    /// Observed statistic for every value of `poinull`, truncated against the
    /// shared best fit.
    pub(crate) fn qobs(&mut self, poinull: &Poi, stat: TestStatistic) -> Result<Vec<f64>> {
        log::debug!("computing observed q for {poinull}");
        let bf = self.bestfit_poi(poinull, stat)?;
        let nll_bf = self.nll_at(poinull.index(), bf)?;
        poinull
            .values()
            .iter()
            .map(|&v| {
                let q = test_statistic::q(self.nll_at(poinull.index(), v)?, nll_bf);
                Ok(test_statistic::qdist(q, bf, v, stat.sidedness))
            })
            .collect()
    }
}

/// Shared argument checks for calculator entry points.
pub(crate) fn check_hypotheses(poinull: &Poi, poialt: Option<&Poi>) -> Result<()> {
    if let Some(alt) = poialt {
        poinull.ensure_same_parameter(alt)?;
        if !alt.is_scalar() {
            return Err(Error::Validation(format!(
                "alternate hypothesis must hold a single value, got {alt}"
            )));
        }
    }
    Ok(())
}
