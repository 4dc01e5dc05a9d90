//! Asymptotic calculator (Cowan, Cranmer, Gross, Vitells, arXiv:1007.1727).
//!
//! The distribution of the alternate-hypothesis statistic is read off a single
//! Asimov dataset: for every model, bin centers over its space weighted by the
//! expected yield in each bin, evaluated at the nuisance parameters fitted with
//! the POI fixed at its alternate value.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use ns_core::{Dataset, Error, Loss, Result};
use ns_prob::normal;
use serde::{Deserialize, Serialize};

use crate::calculator::{Calculator, CalculatorKind, ObservedNll, PValues, check_hypotheses};
use crate::config::Config;
use crate::poi::{Poi, PoiKey};
use crate::test_statistic::{self, TestStatistic};

/// Smallest Asimov statistic used in square roots and divisions.
pub const QALT_MIN: f64 = 1e-7;

/// Asimov dataset construction options.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AsimovConfig {
    /// Number of equal-width bins spanning each model's space.
    pub nbins: usize,
}

impl Default for AsimovConfig {
    fn default() -> Self {
        Self { nbins: 100 }
    }
}

/// Calculator calibrated with asymptotic formulae.
pub struct AsymptoticCalculator {
    obs: ObservedNll,
    asimov: AsimovConfig,
    datasets: HashMap<PoiKey, Vec<Dataset>>,
    losses: HashMap<PoiKey, Arc<dyn Loss>>,
    // (alternate value, profiled value) -> NLL
    nll: HashMap<(PoiKey, PoiKey), f64>,
}

impl fmt::Debug for AsymptoticCalculator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsymptoticCalculator")
            .field("obs", &self.obs)
            .field("asimov", &self.asimov)
            .field("asimov_datasets", &self.datasets.len())
            .field("cached_nll", &self.nll.len())
            .finish_non_exhaustive()
    }
}

impl AsymptoticCalculator {
    /// Calculator with the default Asimov binning.
    pub fn new(config: Arc<Config>) -> Self {
        Self::with_asimov_config(config, AsimovConfig::default())
    }

    /// Calculator with explicit Asimov options.
    pub fn with_asimov_config(config: Arc<Config>, asimov: AsimovConfig) -> Self {
        Self {
            obs: ObservedNll::new(config),
            asimov,
            datasets: HashMap::new(),
            losses: HashMap::new(),
            nll: HashMap::new(),
        }
    }

    /// Asimov options.
    pub fn asimov_config(&self) -> &AsimovConfig {
        &self.asimov
    }

    /// Asimov datasets for the alternate hypothesis `poialt`, one per model.
    pub fn asimov_dataset(&mut self, poialt: &Poi) -> Result<&[Dataset]> {
        let key = poialt.key();
        if !self.datasets.contains_key(&key) {
            let datasets = self.build_asimov(poialt)?;
            self.datasets.insert(key, datasets);
        }
        Ok(&self.datasets[&key])
    }

    fn build_asimov(&self, poialt: &Poi) -> Result<Vec<Dataset>> {
        let nbins = self.asimov.nbins;
        if nbins == 0 {
            return Err(Error::Validation("Asimov dataset needs at least one bin".into()));
        }
        let config = self.obs.config();
        log::info!("fitting nuisance parameters for the alternate hypothesis {poialt}");
        let loss = config.obsloss()?;
        let mut start = config.parameters_at_bestfit()?;
        let fit = {
            let fixed = start.fix(poialt.index(), poialt.value())?;
            config.minimizer().minimize(loss.as_ref(), &fixed)?
        };
        if !fit.converged {
            log::warn!("Asimov nuisance fit at {poialt} did not converge: {}", fit.message);
        }
        let mut values = fit.parameters;
        values[poialt.index()] = poialt.value();

        config
            .channels()
            .map(|(model, observed)| {
                let (lo, hi) = model.space();
                let width = (hi - lo) / nbins as f64;
                let norm = if model.is_extended() { 1.0 } else { observed.sum_weights() };
                let mut centers = Vec::with_capacity(nbins);
                let mut weights = Vec::with_capacity(nbins);
                for i in 0..nbins {
                    let a = lo + i as f64 * width;
                    let b = if i + 1 == nbins { hi } else { a + width };
                    centers.push(0.5 * (a + b));
                    weights.push(norm * model.integrate((a, b), &values)?);
                }
                Dataset::weighted(centers, weights, (lo, hi))
            })
            .collect()
    }

    /// Loss on the Asimov datasets of `poialt`.
    pub fn asimov_loss(&mut self, poialt: &Poi) -> Result<Arc<dyn Loss>> {
        let key = poialt.key();
        if let Some(loss) = self.losses.get(&key) {
            return Ok(loss.clone());
        }
        let datasets = self.asimov_dataset(poialt)?.to_vec();
        let loss = self.obs.config().build_loss(&datasets)?;
        self.losses.insert(key, loss.clone());
        Ok(loss)
    }

    /// Profiled Asimov NLL of `poialt` at every value of `poigrid`.
    pub fn asimov_nll(&mut self, poigrid: &Poi, poialt: &Poi) -> Result<Vec<f64>> {
        let alt = poialt.key();
        let mut out = Vec::with_capacity(poigrid.len());
        for &v in poigrid.values() {
            let key = (alt, PoiKey::from(v));
            let nll = match self.nll.get(&key) {
                Some(&nll) => nll,
                None => {
                    let loss = self.asimov_loss(poialt)?;
                    let nll = self.obs.config().pll(loss.as_ref(), poigrid.index(), v)?;
                    self.nll.insert(key, nll);
                    nll
                }
            };
            out.push(nll);
        }
        Ok(out)
    }

    /// Asimov statistic of every value of `poinull` against `poialt`, not truncated.
    fn qalt_raw(&mut self, poinull: &Poi, poialt: &Poi) -> Result<Vec<f64>> {
        let nll_alt = self.asimov_nll(poialt, poialt)?[0];
        Ok(self
            .asimov_nll(poinull, poialt)?
            .into_iter()
            .map(|nll| test_statistic::q(nll, nll_alt))
            .collect())
    }
}

#[inline]
fn clamp_qalt(qalt: f64) -> f64 {
    if qalt < QALT_MIN { QALT_MIN } else { qalt }
}

/// Observed p-values for one tested value given the observed and Asimov statistics.
fn asymptotic_pvalues(qobs: f64, qalt: Option<f64>, stat: TestStatistic) -> (f64, Option<f64>) {
    let one_sided = stat.sidedness.is_one_sided();
    let sqrtqobs = qobs.max(0.0).sqrt();
    let pnull =
        if one_sided { normal::sf(sqrtqobs) } else { 2.0 * normal::sf(sqrtqobs) };
    let Some(qalt) = qalt else {
        return (pnull, None);
    };
    let sqrtqalt = qalt.sqrt();

    if stat.qtilde && qobs > qalt && qalt > 0.0 {
        let mut pnull = normal::sf((qobs + qalt) / (2.0 * sqrtqalt));
        let mut palt = normal::sf((qobs - qalt) / (2.0 * sqrtqalt));
        if !one_sided {
            pnull += normal::sf(sqrtqobs);
            palt += normal::sf(sqrtqobs + sqrtqalt);
        }
        return (pnull, Some(palt));
    }

    let palt = if one_sided {
        normal::sf(sqrtqobs - sqrtqalt)
    } else {
        normal::sf(sqrtqobs + sqrtqalt) + normal::sf(sqrtqobs - sqrtqalt)
    };
    (pnull, Some(palt))
}

impl Calculator for AsymptoticCalculator {
    fn config(&self) -> &Arc<Config> {
        self.obs.config()
    }

    fn kind(&self) -> CalculatorKind {
        CalculatorKind::Asymptotic
    }

    fn pvalue(&mut self, poinull: &Poi, poialt: Option<&Poi>, stat: TestStatistic) -> Result<PValues> {
        check_hypotheses(poinull, poialt)?;
        let qobs = self.obs.qobs(poinull, stat)?;

        let qalt = match poialt {
            Some(alt) => {
                let raw = self.qalt_raw(poinull, alt)?;
                let q = raw
                    .iter()
                    .zip(poinull.values())
                    .map(|(&q, &v)| clamp_qalt(test_statistic::qdist(q, alt.value(), v, stat.sidedness)))
                    .collect::<Vec<_>>();
                Some(q)
            }
            None => None,
        };

        let mut null = Vec::with_capacity(qobs.len());
        let mut alt = qalt.as_ref().map(|_| Vec::with_capacity(qobs.len()));
        for (i, &q) in qobs.iter().enumerate() {
            let (pn, pa) = asymptotic_pvalues(q, qalt.as_ref().map(|qa| qa[i]), stat);
            null.push(pn);
            if let (Some(out), Some(pa)) = (alt.as_mut(), pa) {
                out.push(pa);
            }
        }
        Ok(PValues { null, alt })
    }

    fn expected_pvalue(
        &mut self,
        poinull: &Poi,
        poialt: &Poi,
        nsigma: &[f64],
        cls: bool,
        _stat: TestStatistic,
    ) -> Result<Vec<Vec<f64>>> {
        check_hypotheses(poinull, Some(poialt))?;
        let qalt: Vec<f64> = self.qalt_raw(poinull, poialt)?.into_iter().map(clamp_qalt).collect();
        Ok(nsigma
            .iter()
            .map(|&ns| {
                qalt.iter()
                    .map(|&q| {
                        let clsb = normal::sf(q.sqrt() - ns);
                        let p = if cls { clsb / normal::cdf(ns) } else { clsb };
                        p.max(0.0)
                    })
                    .collect()
            })
            .collect())
    }

    fn expected_poi(
        &mut self,
        poinull: &Poi,
        poialt: &Poi,
        nsigma: &[f64],
        alpha: f64,
        cls: bool,
        _stat: TestStatistic,
    ) -> Result<Vec<f64>> {
        check_hypotheses(poinull, Some(poialt))?;
        if !poinull.is_scalar() {
            return Err(Error::Validation(format!(
                "asymptotic expected POI needs a single null value, got {poinull}"
            )));
        }
        let qalt = clamp_qalt(self.qalt_raw(poinull, poialt)?[0]);
        let sigma = (poinull.value() - poialt.value()).abs() / qalt.sqrt();
        Ok(nsigma
            .iter()
            .map(|&ns| {
                let level = if cls { alpha * normal::cdf(ns) } else { alpha };
                poialt.value() + sigma * (normal::ppf(1.0 - level) + ns)
            })
            .collect())
    }
}
