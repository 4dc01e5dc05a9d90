//! Toy-based (frequentist) calculator.
//!
//! Test-statistic distributions are sampled from pseudo-experiments generated
//! at each hypothesis value. Toys run in parallel with rayon; toy `k` of a
//! generation value draws from its own RNG seeded from `(seed, value, k)`, so
//! an ensemble does not depend on the number of threads or their scheduling.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use ns_core::{Error, ParameterSet, Result};
use ns_prob::normal;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::calculator::{Calculator, CalculatorKind, ObservedNll, PValues, check_hypotheses};
use crate::config::Config;
use crate::interp::{Spline, sorted_unique};
use crate::poi::{Poi, PoiKey};
use crate::test_statistic::{self, TestStatistic, qdist_array};
use crate::toys::{ToyResult, ToyStore};

/// Toy generation options.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ToyConfig {
    /// Toys per null-hypothesis value.
    pub ntoysnull: usize,
    /// Toys per alternate-hypothesis value.
    pub ntoysalt: usize,
    /// Base seed of every toy RNG.
    pub seed: u64,
    /// Toys drawn per batch relative to the number still missing.
    pub oversampling: f64,
    /// Give up after this many batches. `None` keeps drawing until enough
    /// toys have converged.
    pub max_batches: Option<usize>,
}

impl Default for ToyConfig {
    fn default() -> Self {
        Self { ntoysnull: 1000, ntoysalt: 1000, seed: 0, oversampling: 1.2, max_batches: None }
    }
}

/// Fit results of one converged toy.
#[derive(Debug, Clone)]
struct ToyOutcome {
    bestfit: f64,
    nll_bestfit: f64,
    nll: Vec<f64>,
}

fn splitmix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Seed of toy `index` generated at `generation`.
fn toy_seed(seed: u64, generation: f64, index: u64) -> u64 {
    let g = PoiKey::from(generation).value().to_bits();
    splitmix64(seed ^ splitmix64(g)).wrapping_add(index)
}

/// Minimizer failures are treated like non-converged fits; everything else propagates.
fn discard_on_failure<T>(r: Result<T>) -> Result<Option<T>> {
    match r {
        Ok(v) => Ok(Some(v)),
        Err(Error::Computation(msg)) => {
            log::debug!("toy fit failed: {msg}");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Draw, fit and profile one toy. `Ok(None)` means the toy is discarded.
fn run_toy(
    config: &Config,
    start: &mut ParameterSet,
    index: usize,
    generation: &[f64],
    eval: &[f64],
    seed: u64,
) -> Result<Option<ToyOutcome>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let datasets = config.sampler().sample(config.models(), config.datasets(), generation, &mut rng)?;
    let loss = config.build_loss(&datasets)?;

    let Some(fit) = discard_on_failure(config.minimizer().minimize(loss.as_ref(), start))? else {
        return Ok(None);
    };
    if !fit.converged {
        return Ok(None);
    }
    let bestfit = fit.value(index)?;
    let Some(nll_bestfit) = discard_on_failure(config.pll_from(start, loss.as_ref(), index, bestfit))?
    else {
        return Ok(None);
    };
    let mut nll = Vec::with_capacity(eval.len());
    for &v in eval {
        match discard_on_failure(config.pll_from(start, loss.as_ref(), index, v))? {
            Some(x) => nll.push(x),
            None => return Ok(None),
        }
    }
    Ok(Some(ToyOutcome { bestfit, nll_bestfit, nll }))
}

/// Finite entries of `xs`, ascending.
fn sorted_finite(xs: &[f64]) -> Vec<f64> {
    let mut v: Vec<f64> = xs.iter().copied().filter(|x| x.is_finite()).collect();
    v.sort_by(f64::total_cmp);
    v
}

/// Fraction of `sorted` at or above `threshold`.
fn tail_prob_sorted(sorted: &[f64], threshold: f64) -> Result<f64> {
    let n = sorted.len();
    if n == 0 {
        return Err(Error::Computation(
            "empty toy distribution after removing non-finite entries".into(),
        ));
    }
    let idx = sorted.partition_point(|v| *v < threshold);
    Ok((n - idx) as f64 / n as f64)
}

/// Linear-interpolation quantile of an ascending slice, `p` in `[0, 1]`.
fn quantile_sorted(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return f64::NAN;
    }
    if p <= 0.0 {
        return sorted[0];
    }
    if p >= 1.0 {
        return sorted[n - 1];
    }
    let idx = p * ((n - 1) as f64);
    let lo = idx.floor() as usize;
    let hi = idx.ceil() as usize;
    if lo == hi {
        return sorted[lo];
    }
    let w = idx - (lo as f64);
    sorted[lo] + w * (sorted[hi] - sorted[lo])
}

fn push_unique(values: &mut Vec<f64>, v: f64) {
    if !values.iter().any(|&x| PoiKey::from(x) == PoiKey::from(v)) {
        values.push(v);
    }
}

/// Calculator calibrated with pseudo-experiments.
#[derive(Debug)]
pub struct FrequentistCalculator {
    obs: ObservedNll,
    toy_config: ToyConfig,
    toys: ToyStore,
    // generation values whose ensembles this calculator drew itself
    generated: HashSet<PoiKey>,
}

impl FrequentistCalculator {
    /// Calculator with `ntoysnull` / `ntoysalt` toys per hypothesis value and
    /// default generation options.
    pub fn new(config: Arc<Config>, ntoysnull: usize, ntoysalt: usize) -> Self {
        Self {
            obs: ObservedNll::new(config),
            toy_config: ToyConfig { ntoysnull, ntoysalt, ..ToyConfig::default() },
            toys: ToyStore::new(),
            generated: HashSet::new(),
        }
    }

    /// Calculator with explicit generation options.
    pub fn with_toy_config(config: Arc<Config>, toy_config: ToyConfig) -> Result<Self> {
        if !toy_config.oversampling.is_finite() || toy_config.oversampling < 1.0 {
            return Err(Error::Validation(format!(
                "oversampling factor must be >= 1, got {}",
                toy_config.oversampling
            )));
        }
        if toy_config.max_batches == Some(0) {
            return Err(Error::Validation("max_batches must be at least 1".into()));
        }
        Ok(Self { obs: ObservedNll::new(config), toy_config, toys: ToyStore::new(), generated: HashSet::new() })
    }

    /// Generation options.
    pub fn toy_config(&self) -> &ToyConfig {
        &self.toy_config
    }

    /// Every ensemble generated or loaded so far.
    pub fn toys(&self) -> &ToyStore {
        &self.toys
    }

    /// Use an externally generated ensemble for `poigen`, replacing any ensemble
    /// already held for that value.
    ///
    /// Injected ensembles are never regenerated: they must already be
    /// profiled at every POI value a later test needs.
    pub fn add_toys(&mut self, poigen: &Poi, toys: ToyResult) -> Result<()> {
        for gen_poi in poigen {
            self.toys.add_toys(gen_poi.value(), toys.clone())?;
            self.generated.remove(&gen_poi.key());
        }
        Ok(())
    }

    /// Write every ensemble to `path` (JSON).
    pub fn toys_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        self.toys.to_file(&path)?;
        log::info!("toys saved to '{}'", path.as_ref().display());
        Ok(())
    }

    /// Replace the ensembles with those stored at `path`.
    pub fn toys_from_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.toys = ToyStore::from_file(&path)?;
        self.generated.clear();
        log::info!(
            "read toys for {} generation values from '{}'",
            self.toys.len(),
            path.as_ref().display()
        );
        Ok(())
    }

    /// Generate `ntoys` converged toys at `poigen` and profile each at every
    /// value of `poieval`.
    ///
    /// Toys start from the observed best fit with the POI moved to the
    /// generation value. Batches of `oversampling × missing` toys are drawn
    /// until enough of them converged.
    pub fn dotoys(&self, poigen: &Poi, ntoys: usize, poieval: &[f64]) -> Result<ToyResult> {
        if ntoys == 0 {
            return Err(Error::Validation("number of toys must be positive".into()));
        }
        if !poigen.is_scalar() {
            return Err(Error::Validation(format!("toys are generated at a single value, got {poigen}")));
        }
        let config = self.obs.config().as_ref();
        let index = poigen.index();
        let generation = poigen.value();
        let mut start = config.parameters_at_bestfit()?;
        start.set_value(index, generation)?;
        let gen_values = start.values();
        let mut eval = Vec::with_capacity(poieval.len());
        for &v in poieval {
            push_unique(&mut eval, v);
        }

        let mut result = ToyResult {
            bestfit_values: Vec::with_capacity(ntoys),
            bestfit_nll: Vec::with_capacity(ntoys),
            nll: eval.iter().map(|&v| (PoiKey::from(v), Vec::with_capacity(ntoys))).collect(),
        };
        let eval_keys: Vec<PoiKey> = eval.iter().map(|&v| PoiKey::from(v)).collect();
        let ToyConfig { seed, oversampling, max_batches, .. } = self.toy_config;
        let mut next_index = 0u64;
        let mut batches = 0usize;

        while result.len() < ntoys {
            if max_batches.is_some_and(|max| batches >= max) {
                return Err(Error::Computation(format!(
                    "only {} of {ntoys} toys at {poigen} converged after {batches} batches",
                    result.len()
                )));
            }
            let missing = ntoys - result.len();
            let nbatch = ((missing as f64 * oversampling).ceil() as usize).max(1);
            let outcomes: Vec<Result<Option<ToyOutcome>>> = (0..nbatch)
                .into_par_iter()
                .map_init(
                    || start.clone(),
                    |params, k| {
                        let s = toy_seed(seed, generation, next_index + k as u64);
                        run_toy(config, params, index, &gen_values, &eval, s)
                    },
                )
                .collect();
            next_index += nbatch as u64;
            batches += 1;

            let mut converged = 0usize;
            for outcome in outcomes {
                let Some(toy) = outcome? else { continue };
                converged += 1;
                if result.len() == ntoys {
                    continue;
                }
                result.bestfit_values.push(toy.bestfit);
                result.bestfit_nll.push(toy.nll_bestfit);
                for (key, nll) in eval_keys.iter().zip(toy.nll) {
                    if let Some(v) = result.nll.get_mut(key) {
                        v.push(nll);
                    }
                }
            }
            log::debug!(
                "toys at {poigen}: batch {batches} drew {nbatch}, {converged} converged, {}/{ntoys} collected",
                result.len()
            );
        }
        Ok(result)
    }

    /// Make sure every value of `poigen` has an ensemble profiled at its own
    /// value and at every value of `eval`.
    ///
    /// An ensemble this calculator generated earlier but which lacks some of
    /// those values is regenerated with the union of old and new values; the
    /// per-toy seeds reproduce the same pseudo-experiments. Injected or loaded
    /// ensembles that lack a value are an error.
    fn ensure_toys(&mut self, poigen: &Poi, ntoys: usize, eval: Vec<f64>, label: &str) -> Result<()> {
        for p in poigen {
            let mut toeval = vec![p.value()];
            for &v in &eval {
                push_unique(&mut toeval, v);
            }
            if let Some(existing) = self.toys.get(p.value()) {
                let missing: Vec<f64> =
                    toeval.iter().copied().filter(|&v| existing.nll_at(v).is_none()).collect();
                if missing.is_empty() {
                    continue;
                }
                if !self.generated.contains(&p.key()) {
                    return Err(Error::Validation(format!(
                        "{label} toys at {p} were supplied without profiles at {missing:?}"
                    )));
                }
                for v in existing.evaluated() {
                    push_unique(&mut toeval, v);
                }
                log::info!("regenerating {ntoys} {label} hypothesis toys for {p} to profile them at {missing:?}");
            } else {
                log::info!("generating {ntoys} {label} hypothesis toys for {p}");
            }
            let result = self.dotoys(&p, ntoys, &toeval)?;
            self.toys.add_toys(p.value(), result)?;
            self.generated.insert(p.key());
        }
        Ok(())
    }

    /// Ensure null-hypothesis ensembles exist for every value of `poinull`,
    /// each profiled at its own value, at the alternate values and at 0 when
    /// `qtilde` is set.
    pub fn dotoys_null(&mut self, poinull: &Poi, poialt: Option<&Poi>, qtilde: bool) -> Result<()> {
        let mut eval: Vec<f64> = poialt.map(|a| a.values().to_vec()).unwrap_or_default();
        if qtilde {
            push_unique(&mut eval, 0.0);
        }
        self.ensure_toys(poinull, self.toy_config.ntoysnull, eval, "null")
    }

    /// Ensure alternate-hypothesis ensembles exist for every value of
    /// `poialt`, each profiled at its own value, at every null value and at 0
    /// when `qtilde` is set.
    pub fn dotoys_alt(&mut self, poialt: &Poi, poinull: Option<&Poi>, qtilde: bool) -> Result<()> {
        let mut eval: Vec<f64> = poinull.map(|n| n.values().to_vec()).unwrap_or_default();
        if qtilde {
            push_unique(&mut eval, 0.0);
        }
        self.ensure_toys(poialt, self.toy_config.ntoysalt, eval, "alternate")
    }

    fn ensemble(&self, poigen: &Poi) -> Result<&ToyResult> {
        self.toys.get(poigen.value()).ok_or_else(|| {
            Error::Validation(format!("no toys generated at {poigen}"))
        })
    }

    /// Profiled NLLs of the toys generated at `poigen`, evaluated at `poi`.
    pub fn nll(&self, poigen: &Poi, poi: &Poi) -> Result<&[f64]> {
        self.ensemble(poigen)?.nll_at(poi.value()).ok_or_else(|| {
            Error::Validation(format!("toys generated at {poigen} were not profiled at {poi}"))
        })
    }

    /// Best-fit POI of each toy at `poigen`; negative values become 0 under qtilde.
    pub fn poi_bestfit(&self, poigen: &Poi, qtilde: bool) -> Result<Vec<f64>> {
        let bf = &self.ensemble(poigen)?.bestfit_values;
        Ok(bf.iter().map(|&b| if qtilde && b < 0.0 { 0.0 } else { b }).collect())
    }

    /// NLL at each toy's best fit; under qtilde, toys with a negative best fit
    /// use their NLL profiled at 0.
    pub fn nll_bestfit(&self, poigen: &Poi, qtilde: bool) -> Result<Vec<f64>> {
        let toys = self.ensemble(poigen)?;
        if !qtilde {
            return Ok(toys.bestfit_nll.clone());
        }
        let nll_zero = toys.nll_at(0.0).ok_or_else(|| {
            Error::Validation(format!("toys generated at {poigen} were not profiled at 0"))
        })?;
        Ok(toys
            .bestfit_values
            .iter()
            .zip(&toys.bestfit_nll)
            .zip(nll_zero)
            .map(|((&bf, &nll), &nll0)| if bf < 0.0 { nll0 } else { nll })
            .collect())
    }

    /// Statistic of the null toys at `poi` against their own best fits.
    pub fn qnull(&self, poi: &Poi, qtilde: bool) -> Result<Vec<f64>> {
        let nll1 = self.nll(poi, poi)?;
        let nll2 = self.nll_bestfit(poi, qtilde)?;
        Ok(nll1.iter().zip(&nll2).map(|(&a, &b)| test_statistic::q(a, b)).collect())
    }

    /// Statistic at `poi` of the toys generated at `poialt`.
    pub fn qalt(&self, poi: &Poi, poialt: &Poi, qtilde: bool) -> Result<Vec<f64>> {
        let nll1 = self.nll(poialt, poi)?;
        let nll2 = self.nll_bestfit(poialt, qtilde)?;
        Ok(nll1.iter().zip(&nll2).map(|(&a, &b)| test_statistic::q(a, b)).collect())
    }

    /// Truncated, finite, ascending null distribution at `p`.
    fn null_distribution(&self, p: &Poi, stat: TestStatistic) -> Result<Vec<f64>> {
        let q = self.qnull(p, stat.qtilde)?;
        let bf = self.poi_bestfit(p, stat.qtilde)?;
        Ok(sorted_finite(&qdist_array(&q, &bf, &[p.value()], stat.sidedness)?))
    }

    /// Truncated, finite, ascending alternate distribution at `p`.
    fn alt_distribution(&self, p: &Poi, poialt: &Poi, stat: TestStatistic) -> Result<Vec<f64>> {
        let q = self.qalt(p, poialt, stat.qtilde)?;
        let bf = self.poi_bestfit(poialt, stat.qtilde)?;
        Ok(sorted_finite(&qdist_array(&q, &bf, &[p.value()], stat.sidedness)?))
    }

    fn ensure_hypotheses(&mut self, poinull: &Poi, poialt: Option<&Poi>, qtilde: bool) -> Result<()> {
        // alternate first: its ensemble then already covers every null value
        if let Some(alt) = poialt {
            self.dotoys_alt(alt, Some(poinull), qtilde)?;
        }
        self.dotoys_null(poinull, poialt, qtilde)
    }

    /// Empirical p-values of the observed statistics `qobs`, one per value of `poinull`.
    pub fn pvalue_q(
        &mut self,
        qobs: &[f64],
        poinull: &Poi,
        poialt: Option<&Poi>,
        stat: TestStatistic,
    ) -> Result<PValues> {
        if qobs.len() != poinull.len() {
            return Err(Error::Validation(format!(
                "got {} observed statistics for {} null values",
                qobs.len(),
                poinull.len()
            )));
        }
        self.ensure_hypotheses(poinull, poialt, stat.qtilde)?;

        let mut null = Vec::with_capacity(poinull.len());
        let mut alt = poialt.map(|_| Vec::with_capacity(poinull.len()));
        for (p, &q) in poinull.iter().zip(qobs) {
            null.push(tail_prob_sorted(&self.null_distribution(&p, stat)?, q)?);
            if let (Some(out), Some(a)) = (alt.as_mut(), poialt) {
                out.push(tail_prob_sorted(&self.alt_distribution(&p, a, stat)?, q)?);
            }
        }
        Ok(PValues { null, alt })
    }
}

impl Calculator for FrequentistCalculator {
    fn config(&self) -> &Arc<Config> {
        self.obs.config()
    }

    fn kind(&self) -> CalculatorKind {
        CalculatorKind::Frequentist
    }

    fn pvalue(&mut self, poinull: &Poi, poialt: Option<&Poi>, stat: TestStatistic) -> Result<PValues> {
        check_hypotheses(poinull, poialt)?;
        let qobs = self.obs.qobs(poinull, stat)?;
        self.pvalue_q(&qobs, poinull, poialt, stat)
    }

    fn expected_pvalue(
        &mut self,
        poinull: &Poi,
        poialt: &Poi,
        nsigma: &[f64],
        cls: bool,
        stat: TestStatistic,
    ) -> Result<Vec<Vec<f64>>> {
        check_hypotheses(poinull, Some(poialt))?;
        self.ensure_hypotheses(poinull, Some(poialt), stat.qtilde)?;

        let mut out = vec![Vec::with_capacity(poinull.len()); nsigma.len()];
        for p in poinull {
            let qnull = self.null_distribution(&p, stat)?;
            let qalt = self.alt_distribution(&p, poialt, stat)?;
            let mut clsb = Vec::with_capacity(qalt.len());
            let mut clb = Vec::with_capacity(qalt.len());
            for &q in &qalt {
                clsb.push(tail_prob_sorted(&qnull, q)?);
                clb.push(tail_prob_sorted(&qalt, q)?);
            }
            clsb.sort_by(f64::total_cmp);
            clb.sort_by(f64::total_cmp);
            for (row, &ns) in out.iter_mut().zip(nsigma) {
                let frac = normal::cdf(ns);
                let psb = quantile_sorted(&clsb, frac);
                let p = if cls { psb / quantile_sorted(&clb, frac) } else { psb };
                row.push(p.max(0.0));
            }
        }
        Ok(out)
    }

    fn expected_poi(
        &mut self,
        poinull: &Poi,
        poialt: &Poi,
        nsigma: &[f64],
        alpha: f64,
        cls: bool,
        stat: TestStatistic,
    ) -> Result<Vec<f64>> {
        check_hypotheses(poinull, Some(poialt))?;
        self.ensure_hypotheses(poinull, Some(poialt), stat.qtilde)?;

        let grid: Vec<Poi> = poinull.iter().collect();
        let mut null_dists = Vec::with_capacity(grid.len());
        let mut alt_dists = Vec::with_capacity(grid.len());
        let mut alt_nll: Vec<&[f64]> = Vec::with_capacity(grid.len());
        for p in &grid {
            null_dists.push(self.null_distribution(p, stat)?);
            alt_dists.push(self.alt_distribution(p, poialt, stat)?);
        }
        for p in &grid {
            alt_nll.push(self.nll(poialt, p)?);
        }
        let bf = self.poi_bestfit(poialt, stat.qtilde)?;
        let nll_bf = self.nll_bestfit(poialt, stat.qtilde)?;

        let mut limits = Vec::with_capacity(bf.len());
        let mut ys = vec![0.0; grid.len()];
        'toys: for i in 0..bf.len() {
            for (j, p) in grid.iter().enumerate() {
                let q = test_statistic::q(alt_nll[j][i], nll_bf[i]);
                if !q.is_finite() {
                    continue 'toys;
                }
                let q = test_statistic::qdist(q, bf[i], p.value(), stat.sidedness);
                let pnull = tail_prob_sorted(&null_dists[j], q)?;
                let p = if cls { pnull / tail_prob_sorted(&alt_dists[j], q)? } else { pnull };
                ys[j] = p - alpha;
            }
            let (xs, curve) = sorted_unique(poinull.values(), &ys);
            let Ok(spline) = Spline::fit(&xs, &curve) else { continue };
            if let Some(root) = spline.first_root(0.0) {
                limits.push(root);
            }
        }
        if limits.is_empty() {
            return Err(Error::Computation(format!(
                "no alternate toy at {poialt} crosses alpha={alpha} over {poinull}"
            )));
        }
        log::debug!("expected POI from {} of {} alternate toys", limits.len(), bf.len());
        limits.sort_by(f64::total_cmp);
        Ok(nsigma.iter().map(|&ns| quantile_sorted(&limits, normal::cdf(ns))).collect())
    }
}
