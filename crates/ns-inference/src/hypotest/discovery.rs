use std::fmt;

use ns_core::{Error, Result};
use ns_prob::normal;

use super::check_poi_floating;
use crate::calculator::Calculator;
use crate::poi::Poi;
use crate::test_statistic::TestStatistic;

/// Outcome of a discovery test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiscoveryResult {
    /// p-value of the background-only hypothesis.
    pub pnull: f64,
    /// Gaussian significance `Z = Φ⁻¹(1 − pnull)`.
    pub significance: f64,
}

impl fmt::Display for DiscoveryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p-value for the null hypothesis = {:.3e}, significance = {:.3} sigma", self.pnull, self.significance)
    }
}

/// Tests a single "no signal" POI value with the one-sided discovery
/// statistic.
#[derive(Debug)]
pub struct Discovery<C> {
    poinull: Poi,
    calculator: C,
    result: Option<DiscoveryResult>,
}

impl<C: Calculator> Discovery<C> {
    /// `poinull` must hold exactly one value, on a floating parameter.
    pub fn new(poinull: Poi, calculator: C) -> Result<Self> {
        if !poinull.is_scalar() {
            return Err(Error::Validation(format!(
                "discovery tests a single null value, got {poinull}"
            )));
        }
        check_poi_floating(calculator.config(), &poinull)?;
        Ok(Self { poinull, calculator, result: None })
    }

    /// The null hypothesis.
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

    /// p-value and significance, computed on first call.
    pub fn result(&mut self) -> Result<DiscoveryResult> {
        if let Some(r) = self.result {
            return Ok(r);
        }
        let pv = self.calculator.pvalue(&self.poinull, None, TestStatistic::discovery())?;
        let pnull = pv.null[0];
        let r = DiscoveryResult { pnull, significance: normal::isf(pnull) };
        log::info!("discovery test on {} ({}): {}", self.poinull, self.calculator.kind(), r);
        self.result = Some(r);
        Ok(r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asymptotic::AsymptoticCalculator;
    use crate::testing;
    use approx::assert_relative_eq;

    #[test]
    fn test_discovery_significance() {
        let config = testing::discovery_config();
        let poinull = Poi::scalar(config.parameters(), "Nsig", 0.0).unwrap();
        let mut d = Discovery::new(poinull, AsymptoticCalculator::new(config.clone())).unwrap();
        let r = d.result().unwrap();
        assert_relative_eq!(config.bestfit().unwrap().parameters[0], 25.0, epsilon = 1.0);
        // Z = sqrt(q0) for the one-sided asymptotic test
        assert_relative_eq!(r.significance, 3.85, epsilon = 0.05);
        assert_relative_eq!(r.pnull, normal::sf(r.significance), max_relative = 1e-9);
        assert_eq!(d.result().unwrap(), r);
    }

    #[test]
    fn test_discovery_rejects_grid() {
        let config = testing::discovery_config();
        let poinull = Poi::new(config.parameters(), "Nsig", vec![0.0, 1.0]).unwrap();
        let err = Discovery::new(poinull, AsymptoticCalculator::new(config)).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_discovery_rejects_fixed_poi() {
        let config = testing::fixed_poi_config();
        let poinull = Poi::scalar(config.parameters(), "Nsig", 0.0).unwrap();
        let err = Discovery::new(poinull, AsymptoticCalculator::new(config)).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
