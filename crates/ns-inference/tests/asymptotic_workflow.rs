//! End-to-end tests with the asymptotic calculator.

use approx::assert_relative_eq;
use ns_core::Error;
use ns_inference::testing;
use ns_inference::{AsymptoticCalculator, Calculator, ConfidenceInterval, Discovery, Poi, TestStatistic, UpperLimit};

#[test]
fn discovery_of_injected_signal() {
    // 300 background and 25 signal events
    let config = testing::discovery_config();
    let poinull = Poi::scalar(config.parameters(), "Nsig", 0.0).unwrap();
    let mut discovery = Discovery::new(poinull, AsymptoticCalculator::new(config.clone())).unwrap();
    let r = discovery.result().unwrap();
    assert_relative_eq!(config.bestfit().unwrap().parameters[0], 25.0, epsilon = 1.0);
    assert_relative_eq!(r.significance, 3.85, epsilon = 0.05);
    assert!(r.pnull < 1e-4, "{r}");
}

#[test]
fn weak_signal_discovery() {
    let config = testing::midpoint_config(300, 10);
    let poinull = Poi::scalar(config.parameters(), "Nsig", 0.0).unwrap();
    let r = Discovery::new(poinull, AsymptoticCalculator::new(config)).unwrap().result().unwrap();
    assert_relative_eq!(r.significance, 1.71, epsilon = 0.05);
}

#[test]
fn pvalue_at_bestfit_is_one_half() {
    let config = testing::discovery_config();
    let bf = config.bestfit().unwrap().parameters[0];
    let at_bf = Poi::scalar(config.parameters(), "Nsig", bf).unwrap();
    let mut calc = AsymptoticCalculator::new(config);
    let pv = calc.pvalue(&at_bf, None, TestStatistic::discovery()).unwrap();
    assert_relative_eq!(pv.null[0], 0.5, epsilon = 1e-3);
}

#[test]
fn upper_limit_bands_are_ordered() {
    let config = testing::upper_limit_config();
    let p = config.parameters();
    let poinull = Poi::new(p, "Nsig", (1..=40).map(f64::from).collect::<Vec<_>>()).unwrap();
    let poialt = Poi::scalar(p, "Nsig", 0.0).unwrap();
    let mut ul = UpperLimit::new(poinull, Some(poialt), AsymptoticCalculator::new(config)).unwrap();
    let r = ul.upperlimit(0.05).unwrap();

    let obs = r.observed.expect("observed limit inside the grid");
    assert!(obs > 1.0 && obs < 40.0, "{r}");
    let exp = r.exp.unwrap();
    assert!(exp < r.exp_p1.unwrap() && r.exp_p1.unwrap() < r.exp_p2.unwrap(), "{r}");
    assert!(r.exp_m2.unwrap() < r.exp_m1.unwrap() && r.exp_m1.unwrap() < exp, "{r}");
}

#[test]
fn clsb_limit_is_tighter_than_cls() {
    let config = testing::upper_limit_config();
    let p = config.parameters();
    let grid: Vec<f64> = (1..=40).map(f64::from).collect();
    let poialt = Poi::scalar(p, "Nsig", 0.0).unwrap();

    let poinull = Poi::new(p, "Nsig", grid).unwrap();
    let mut ul = UpperLimit::new(poinull, Some(poialt), AsymptoticCalculator::new(config)).unwrap();
    let cls = ul.upperlimit(0.05).unwrap().observed.unwrap();
    ul.set_cls(false);
    let clsb = ul.upperlimit(0.05).unwrap().observed.unwrap();
    assert!(clsb <= cls + 1e-9, "CLs+b limit {clsb} above CLs limit {cls}");
}

#[test]
fn interval_on_signal_mean() {
    let config = testing::interval_config();
    let idx = config.parameters().index_of("mean").unwrap();
    let bf = config.bestfit().unwrap().parameters[idx];
    let grid: Vec<f64> = (0..30).map(|i| 1.15 + 0.11 * f64::from(i) / 29.0).collect();
    let poinull = Poi::new(config.parameters(), "mean", grid).unwrap();
    let mut ci = ConfidenceInterval::new(poinull, AsymptoticCalculator::new(config)).unwrap();

    let r68 = ci.interval(0.32).unwrap();
    let (m68, p68) = (r68.band_m.unwrap(), r68.band_p.unwrap());
    assert!(m68 < r68.observed && r68.observed < p68, "{r68}");
    assert_eq!(r68.observed, bf);

    let r90 = ci.interval(0.1).unwrap();
    if let (Some(m90), Some(p90)) = (r90.band_m, r90.band_p) {
        assert!(m90 < m68 && p68 < p90, "{r90} vs {r68}");
    }
}

#[test]
fn mismatched_hypotheses_are_rejected() {
    let config = testing::upper_limit_config();
    let p = config.parameters();
    let poinull = Poi::new(p, "Nsig", vec![1.0, 2.0]).unwrap();
    let poialt = Poi::scalar(p, "Nbkg", 300.0).unwrap();
    let err = UpperLimit::new(poinull, Some(poialt), AsymptoticCalculator::new(config)).unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
}
