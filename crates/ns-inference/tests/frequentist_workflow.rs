//! End-to-end tests with toys: persistence, orchestrators and the asymptotic
//! cross-check.

use approx::assert_relative_eq;
use ns_inference::testing;
use ns_inference::{
    AsymptoticCalculator, Calculator, ConfidenceInterval, Discovery, FrequentistCalculator, Poi, TestStatistic,
    ToyConfig, ToyStore, UpperLimit,
};

fn toy_config(ntoys: usize) -> ToyConfig {
    ToyConfig { ntoysnull: ntoys, ntoysalt: ntoys, seed: 42, ..ToyConfig::default() }
}

#[test]
fn toys_survive_a_file_round_trip() {
    let config = testing::upper_limit_config();
    let p = config.parameters();
    let poinull = Poi::new(p, "Nsig", vec![10.0, 20.0]).unwrap();
    let poialt = Poi::scalar(p, "Nsig", 0.0).unwrap();
    let stat = TestStatistic::upper_limit(false);

    let mut first = FrequentistCalculator::with_toy_config(config.clone(), toy_config(40)).unwrap();
    let pv = first.pvalue(&poinull, Some(&poialt), stat).unwrap();
    assert_eq!(first.toys().len(), 3);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("toys.json");
    first.toys_to_file(&path).unwrap();

    let mut second = FrequentistCalculator::with_toy_config(config.clone(), toy_config(40)).unwrap();
    second.toys_from_file(&path).unwrap();
    assert_eq!(second.toys(), first.toys());
    assert_eq!(ToyStore::from_file(&path).unwrap(), *first.toys());

    // nothing left to generate: identical p-values from the reloaded ensembles
    let again = second.pvalue(&poinull, Some(&poialt), stat).unwrap();
    assert_eq!(again, pv);
    assert_eq!(second.toys().len(), 3);
}

#[test]
fn injected_toys_are_used_as_is() {
    let config = testing::upper_limit_config();
    let p = config.parameters();
    let poinull = Poi::scalar(p, "Nsig", 15.0).unwrap();
    let donor = FrequentistCalculator::with_toy_config(config.clone(), toy_config(30)).unwrap();
    let toys = donor.dotoys(&poinull, 30, &[15.0]).unwrap();
    assert_eq!(toys.len(), 30);

    let mut calc = FrequentistCalculator::with_toy_config(config.clone(), toy_config(1000)).unwrap();
    calc.add_toys(&poinull, toys.clone()).unwrap();
    let pv = calc.pvalue(&poinull, None, TestStatistic::upper_limit(false)).unwrap();
    assert!((0.0..=1.0).contains(&pv.null[0]));
    assert_eq!(calc.toys().get(15.0), Some(&toys));
}

#[test]
fn toys_agree_with_asymptotics() {
    let config = testing::upper_limit_config();
    let p = config.parameters();
    let grid: Vec<f64> = (0..12).map(|i| 2.0 + 3.0 * f64::from(i)).collect();
    let poialt = Poi::scalar(p, "Nsig", 0.0).unwrap();

    let mut asy = UpperLimit::new(
        Poi::new(p, "Nsig", grid.clone()).unwrap(),
        Some(poialt.clone()),
        AsymptoticCalculator::new(config.clone()),
    )
    .unwrap();
    let asy = asy.upperlimit(0.05).unwrap();

    let calc = FrequentistCalculator::with_toy_config(config.clone(), toy_config(200)).unwrap();
    let mut freq = UpperLimit::new(Poi::new(p, "Nsig", grid).unwrap(), Some(poialt), calc).unwrap();
    let freq = freq.upperlimit(0.05).unwrap();

    let (exp, p1, p2, m1, m2) =
        (freq.exp.unwrap(), freq.exp_p1.unwrap(), freq.exp_p2.unwrap(), freq.exp_m1.unwrap(), freq.exp_m2.unwrap());
    assert!(m2 <= m1 && m1 <= exp && exp <= p1 && p1 <= p2, "{freq}");

    assert_relative_eq!(freq.observed.unwrap(), asy.observed.unwrap(), max_relative = 0.25);
    assert_relative_eq!(exp, asy.exp.unwrap(), max_relative = 0.3);
    assert_relative_eq!(p1, asy.exp_p1.unwrap(), max_relative = 0.3);
    assert_relative_eq!(m1, asy.exp_m1.unwrap(), max_relative = 0.3);
    assert_relative_eq!(p2, asy.exp_p2.unwrap(), max_relative = 0.5);
    assert_relative_eq!(m2, asy.exp_m2.unwrap(), max_relative = 0.5);
}

#[test]
fn toy_discovery_matches_asymptotics() {
    // 300 background and 10 signal events: about 1.7 sigma
    let config = testing::midpoint_config(300, 10);
    let poinull = Poi::scalar(config.parameters(), "Nsig", 0.0).unwrap();

    let asy = Discovery::new(poinull.clone(), AsymptoticCalculator::new(config.clone())).unwrap().result().unwrap();
    let calc = FrequentistCalculator::with_toy_config(config.clone(), toy_config(500)).unwrap();
    let mut discovery = Discovery::new(poinull, calc).unwrap();
    let freq = discovery.result().unwrap();

    assert!(freq.pnull > 0.0 && freq.pnull < 0.2, "{freq}");
    assert_relative_eq!(freq.significance, asy.significance, epsilon = 0.3);
    assert_eq!(discovery.calculator().toys().get(0.0).map(|t| t.len()), Some(500));
}

#[test]
fn toy_interval_brackets_the_signal_yield() {
    let config = testing::discovery_config();
    let bf = config.bestfit().unwrap().parameters[0];
    let grid: Vec<f64> = (0..11).map(|i| 10.0 + 3.0 * f64::from(i)).collect();

    let asy = ConfidenceInterval::new(
        Poi::new(config.parameters(), "Nsig", grid.clone()).unwrap(),
        AsymptoticCalculator::new(config.clone()),
    )
    .unwrap()
    .interval(0.32)
    .unwrap();

    let calc = FrequentistCalculator::with_toy_config(config.clone(), toy_config(100)).unwrap();
    let mut ci = ConfidenceInterval::new(Poi::new(config.parameters(), "Nsig", grid).unwrap(), calc).unwrap();
    let freq = ci.interval(0.32).unwrap();

    let (m, p) = (freq.band_m.unwrap(), freq.band_p.unwrap());
    assert!(m < bf && bf < p, "{freq}");
    assert_relative_eq!(m, asy.band_m.unwrap(), epsilon = 3.0);
    assert_relative_eq!(p, asy.band_p.unwrap(), epsilon = 3.0);
    assert_eq!(ci.calculator().toys().len(), 11);
}
