use std::fmt;

use ns_core::{Error, Result};

use super::{NSIGMA_ORDER, Opt, check_alpha, check_poi_floating, first_crossing, safe_cls};
use crate::calculator::{Calculator, CalculatorKind, check_hypotheses};
use crate::poi::Poi;
use crate::test_statistic::TestStatistic;

/// p-value table of an upper-limit scan, one entry per null POI value.
#[derive(Debug, Clone, PartialEq)]
pub struct UpperLimitPValues {
    /// CLs+b / CLb.
    pub cls: Vec<f64>,
    /// Observed p-value of the signal-plus-background hypothesis.
    pub clsb: Vec<f64>,
    /// Observed p-value of the alternate (background-like) hypothesis.
    pub clb: Vec<f64>,
    /// Median expected p-value.
    pub exp: Vec<f64>,
    /// Expected p-value, +1σ.
    pub exp_p1: Vec<f64>,
    /// Expected p-value, +2σ.
    pub exp_p2: Vec<f64>,
    /// Expected p-value, −1σ.
    pub exp_m1: Vec<f64>,
    /// Expected p-value, −2σ.
    pub exp_m2: Vec<f64>,
}

/// Observed and expected upper limits. `None` means the p-value never
/// crosses `alpha` in the scanned range.
#[derive(Debug, Clone, PartialEq)]
pub struct UpperLimitResult {
    /// POI name.
    pub name: String,
    /// Observed limit.
    pub observed: Option<f64>,
    /// Median expected limit.
    pub exp: Option<f64>,
    /// Expected limit, +1σ.
    pub exp_p1: Option<f64>,
    /// Expected limit, +2σ.
    pub exp_p2: Option<f64>,
    /// Expected limit, −1σ.
    pub exp_m1: Option<f64>,
    /// Expected limit, −2σ.
    pub exp_m2: Option<f64>,
}

impl fmt::Display for UpperLimitResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = &self.name;
        writeln!(f, "Observed upper limit: {n} = {}", Opt(self.observed))?;
        writeln!(f, "Expected upper limit: {n} = {}", Opt(self.exp))?;
        writeln!(f, "Expected upper limit +1 sigma: {n} = {}", Opt(self.exp_p1))?;
        writeln!(f, "Expected upper limit -1 sigma: {n} = {}", Opt(self.exp_m1))?;
        writeln!(f, "Expected upper limit +2 sigma: {n} = {}", Opt(self.exp_p2))?;
        write!(f, "Expected upper limit -2 sigma: {n} = {}", Opt(self.exp_m2))
    }
}

/// Upper limit from a one-sided scan of the null POI grid against a
/// background-like alternate.
#[derive(Debug)]
pub struct UpperLimit<C> {
    poinull: Poi,
    poialt: Poi,
    calculator: C,
    qtilde: bool,
    cls: bool,
    pvalues: Option<UpperLimitPValues>,
}

impl<C: Calculator> UpperLimit<C> {
    /// Scan `poinull` against the single-valued `poialt`.
    ///
    /// The alternate hypothesis is mandatory: CLs and the expected bands
    /// are both defined against it.
    pub fn new(poinull: Poi, poialt: Option<Poi>, calculator: C) -> Result<Self> {
        let poialt = poialt.ok_or_else(|| {
            Error::Configuration(format!(
                "upper limit on '{}' needs an alternate hypothesis for CLs and expected limits",
                poinull.name()
            ))
        })?;
        check_hypotheses(&poinull, Some(&poialt))?;
        check_poi_floating(calculator.config(), &poinull)?;
        Ok(Self { poinull, poialt, calculator, qtilde: false, cls: true, pvalues: None })
    }

    /// Builder form of [`set_qtilde`](Self::set_qtilde).
    pub fn with_qtilde(mut self, qtilde: bool) -> Self {
        self.set_qtilde(qtilde);
        self
    }

    /// Builder form of [`set_cls`](Self::set_cls).
    pub fn with_cls(mut self, cls: bool) -> Self {
        self.set_cls(cls);
        self
    }

    /// Whether the bounded (`qtilde`) statistic is used.
    pub fn qtilde(&self) -> bool {
        self.qtilde
    }

    /// Switch the statistic; drops the memoized table.
    pub fn set_qtilde(&mut self, qtilde: bool) {
        self.qtilde = qtilde;
        self.pvalues = None;
    }

    /// Whether limits use CLs (default) rather than CLs+b.
    pub fn cls(&self) -> bool {
        self.cls
    }

    /// Switch between CLs and CLs+b; drops the memoized table.
    pub fn set_cls(&mut self, cls: bool) {
        self.cls = cls;
        self.pvalues = None;
    }

    /// The scanned grid.
    pub fn poinull(&self) -> &Poi {
        &self.poinull
    }

    /// The alternate hypothesis.
    pub fn poialt(&self) -> &Poi {
        &self.poialt
    }

    /// The wrapped calculator.
    pub fn calculator(&self) -> &C {
        &self.calculator
    }

    /// Give the calculator back, with its caches.
    pub fn into_calculator(self) -> C {
        self.calculator
    }

    fn stat(&self) -> TestStatistic {
        TestStatistic::upper_limit(self.qtilde)
    }

    /// Observed and expected p-values over the grid, computed on first call.
    pub fn pvalues(&mut self) -> Result<&UpperLimitPValues> {
        if self.pvalues.is_none() {
            let table = self.scan()?;
            self.pvalues = Some(table);
        }
        self.pvalues.as_ref().ok_or_else(|| Error::Computation("p-value table missing".into()))
    }

    fn scan(&mut self) -> Result<UpperLimitPValues> {
        let stat = self.stat();
        let pv = self.calculator.pvalue(&self.poinull, Some(&self.poialt), stat)?;
        let clsb = pv.null;
        let clb = pv
            .alt
            .ok_or_else(|| Error::Computation(format!("no alternate p-values for {}", self.poialt)))?;
        let cls = clsb.iter().zip(&clb).map(|(&sb, &b)| safe_cls(sb, b)).collect();

        let rows = self.calculator.expected_pvalue(&self.poinull, &self.poialt, &NSIGMA_ORDER, self.cls, stat)?;
        let [exp, exp_p1, exp_p2, exp_m1, exp_m2]: [Vec<f64>; 5] = rows.try_into().map_err(|rows: Vec<_>| {
            Error::Computation(format!("expected {} expected-p-value rows, got {}", NSIGMA_ORDER.len(), rows.len()))
        })?;
        log::debug!("upper-limit scan of {} done ({} points)", self.poinull.name(), self.poinull.len());
        Ok(UpperLimitPValues { cls, clsb, clb, exp, exp_p1, exp_p2, exp_m1, exp_m2 })
    }

    /// Limits at confidence level `1 − alpha`.
    ///
    /// The observed limit is the first crossing of `alpha` among grid values
    /// above the observed best fit. Frequentist expected limits are crossings
    /// of the expected bands over the whole grid. Asymptotic expected limits
    /// are computed in closed form at the observed limit, and are all `None`
    /// when there is no observed limit.
    pub fn upperlimit(&mut self, alpha: f64) -> Result<UpperLimitResult> {
        check_alpha(alpha)?;
        let stat = self.stat();
        let use_cls = self.cls;
        let bestfit = self.calculator.config().bestfit()?.value(self.poinull.index())?;
        let grid = self.poinull.values().to_vec();
        let table = self.pvalues()?.clone();

        let observed_p = if use_cls { &table.cls } else { &table.clsb };
        let (sel_poi, sel_p): (Vec<f64>, Vec<f64>) =
            grid.iter().zip(observed_p).filter(|(x, _)| **x > bestfit).map(|(&x, &p)| (x, p)).unzip();
        let observed = first_crossing(&sel_poi, &sel_p, alpha);

        let mut r = UpperLimitResult {
            name: self.poinull.name().to_string(),
            observed,
            exp: None,
            exp_p1: None,
            exp_p2: None,
            exp_m1: None,
            exp_m2: None,
        };
        match self.calculator.kind() {
            CalculatorKind::Frequentist => {
                r.exp = first_crossing(&grid, &table.exp, alpha);
                r.exp_p1 = first_crossing(&grid, &table.exp_p1, alpha);
                r.exp_p2 = first_crossing(&grid, &table.exp_p2, alpha);
                r.exp_m1 = first_crossing(&grid, &table.exp_m1, alpha);
                r.exp_m2 = first_crossing(&grid, &table.exp_m2, alpha);
            }
            CalculatorKind::Asymptotic => {
                if let Some(obs) = observed {
                    let at = self.poinull.with_values(vec![obs])?;
                    let bands =
                        self.calculator.expected_poi(&at, &self.poialt, &NSIGMA_ORDER, alpha, use_cls, stat)?;
                    if let [exp, p1, p2, m1, m2] = bands[..] {
                        r.exp = Some(exp);
                        r.exp_p1 = Some(p1);
                        r.exp_p2 = Some(p2);
                        r.exp_m1 = Some(m1);
                        r.exp_m2 = Some(m2);
                    }
                } else {
                    log::warn!("no observed upper limit on '{}' in the scanned range", self.poinull.name());
                }
            }
        }
        log::info!(
            "upper limit at {:.1}% C.L. ({}, {}):\n{}",
            (1.0 - alpha) * 100.0,
            self.calculator.kind(),
            if use_cls { "CLs" } else { "CLs+b" },
            r
        );
        Ok(r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asymptotic::AsymptoticCalculator;
    use crate::testing;

    fn grid() -> Vec<f64> {
        (1..=40).map(f64::from).collect()
    }

    #[test]
    fn test_asymptotic_upper_limit_bands() {
        let config = testing::upper_limit_config();
        let p = config.parameters();
        let poinull = Poi::new(p, "Nsig", grid()).unwrap();
        let poialt = Poi::scalar(p, "Nsig", 0.0).unwrap();
        let mut ul = UpperLimit::new(poinull, Some(poialt), AsymptoticCalculator::new(config.clone())).unwrap();
        let r = ul.upperlimit(0.05).unwrap();

        let obs = r.observed.unwrap();
        let bf = config.bestfit().unwrap().parameters[0];
        assert!(obs > bf && obs < 40.0, "{r}");
        let (exp, p1, p2, m1, m2) =
            (r.exp.unwrap(), r.exp_p1.unwrap(), r.exp_p2.unwrap(), r.exp_m1.unwrap(), r.exp_m2.unwrap());
        assert!(exp < p1 && p1 < p2, "{r}");
        assert!(m2 < m1 && m1 < exp, "{r}");

        let table = ul.pvalues().unwrap();
        assert_eq!(table.cls.len(), 40);
        for ((&cls, &sb), &b) in table.cls.iter().zip(&table.clsb).zip(&table.clb) {
            assert!((0.0..=1.0).contains(&cls));
            assert!(sb <= b + 1e-12);
        }
    }

    #[test]
    fn test_cls_setter_drops_table() {
        let config = testing::upper_limit_config();
        let p = config.parameters();
        let poinull = Poi::new(p, "Nsig", vec![5.0, 10.0, 15.0]).unwrap();
        let poialt = Poi::scalar(p, "Nsig", 0.0).unwrap();
        let mut ul = UpperLimit::new(poinull, Some(poialt), AsymptoticCalculator::new(config)).unwrap();
        let cls_exp = ul.pvalues().unwrap().exp.clone();
        ul.set_cls(false);
        assert!(ul.pvalues.is_none());
        let clsb_exp = ul.pvalues().unwrap().exp.clone();
        for (a, b) in cls_exp.iter().zip(&clsb_exp) {
            assert!(b <= a, "CLs+b {b} above CLs {a}");
        }
    }

    #[test]
    fn test_missing_alternate_is_a_configuration_error() {
        let config = testing::upper_limit_config();
        let poinull = Poi::new(config.parameters(), "Nsig", grid()).unwrap();
        let err = UpperLimit::new(poinull, None, AsymptoticCalculator::new(config)).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
