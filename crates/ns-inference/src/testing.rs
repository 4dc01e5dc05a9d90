//! Fixtures for tests and benchmarks: a Gaussian signal over an exponential
//! background on (0.1, 3.0).
//!
//! Available to this crate's unit tests and, through the `test-utils`
//! feature, to integration tests and benchmarks. Parameter order of every
//! fixture: Nsig, Nbkg, mean, sigma, lambda.

use std::sync::Arc;

use ns_core::{Dataset, DensityModel, Minimizer, Parameter, ParameterSet};
use ns_prob::normal;
use ns_unbinned::{
    Constraint, ExponentialPdf, GaussianPdf, Process, UnbinnedLossBuilder, UnbinnedModel,
    UnbinnedPdf, YieldExpr,
};
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::config::Config;
use crate::mle::MaximumLikelihoodEstimator;

/// Observable range of every fixture.
pub const SUPPORT: (f64, f64) = (0.1, 3.0);

const LAMBDA: f64 = -2.0;
const MEAN: f64 = 1.2;
const SIGMA: f64 = 0.1;

/// Extended two-process model over [`SUPPORT`].
pub fn model() -> Arc<dyn DensityModel> {
    Arc::new(
        UnbinnedModel::new(
            "mass",
            SUPPORT,
            5,
            vec![
                Process::new("signal", Arc::new(GaussianPdf::new()), vec![2, 3], YieldExpr::Parameter(0)),
                Process::new("background", Arc::new(ExponentialPdf::new()), vec![4], YieldExpr::Parameter(1)),
            ],
        )
        .unwrap(),
    )
}

/// `nbkg` background and `nsig` signal events drawn with `seed`.
pub fn sample_data(nbkg: usize, nsig: usize, seed: u64) -> Dataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut values = ExponentialPdf::new().sample(&[LAMBDA], nbkg, SUPPORT, &mut rng).unwrap();
    values.extend(GaussianPdf::new().sample(&[MEAN, SIGMA], nsig, SUPPORT, &mut rng).unwrap());
    Dataset::new(values, SUPPORT).unwrap()
}

/// Events at the mid-quantiles `(i + 0.5) / n` of each shape: a sample with no
/// statistical fluctuation, so its fit results can be pinned.
pub fn midpoint_data(nbkg: usize, nsig: usize) -> Dataset {
    let (lo, hi) = SUPPORT;
    let (a, b) = ((LAMBDA * lo).exp(), (LAMBDA * hi).exp());
    let mut values: Vec<f64> = (0..nbkg)
        .map(|i| {
            let u = (i as f64 + 0.5) / nbkg as f64;
            (a + (b - a) * u).ln() / LAMBDA
        })
        .collect();
    values.extend((0..nsig).map(|i| MEAN + SIGMA * normal::ppf((i as f64 + 0.5) / nsig as f64)));
    Dataset::new(values, SUPPORT).unwrap()
}

/// Yields bounded by the event count `n`; mean and sigma float only when
/// `shape_floating` is set.
pub fn parameters(n: f64, nsig_lo: f64, shape_floating: bool) -> ParameterSet {
    let (mean, sigma) = if shape_floating {
        (Parameter::new("mean", MEAN, (0.5, 2.0)), Parameter::new("sigma", SIGMA, (0.02, 0.2)))
    } else {
        (Parameter::fixed("mean", MEAN, (0.1, 2.0)), Parameter::fixed("sigma", SIGMA, (0.02, 0.2)))
    };
    ParameterSet::new(vec![
        Parameter::new("Nsig", 20.0, (nsig_lo, n)),
        Parameter::new("Nbkg", n, (0.0, 1.1 * n)),
        mean,
        sigma,
        Parameter::new("lambda", LAMBDA, (-4.0, -1.0)),
    ])
    .unwrap()
}

fn config(
    data: Dataset,
    params: ParameterSet,
    builder: UnbinnedLossBuilder,
    minimizer: Arc<dyn Minimizer>,
) -> Arc<Config> {
    Arc::new(Config::new(vec![model()], vec![data], params, Arc::new(builder), minimizer).unwrap())
}

/// [`midpoint_data`] with the shape fixed and the signal yield free to go
/// negative.
///
/// The profile-likelihood fit recovers `nsig`; the observed discovery
/// significance is 3.85 sigma for 300 + 25 events and 1.71 sigma for 300 + 10.
pub fn midpoint_config(nbkg: usize, nsig: usize) -> Arc<Config> {
    let data = midpoint_data(nbkg, nsig);
    let params = parameters(data.len() as f64, -20.0, false);
    config(data, params, UnbinnedLossBuilder::new(), Arc::new(MaximumLikelihoodEstimator::new()))
}

/// 300 background and 25 signal events at their mid-quantiles.
pub fn discovery_config() -> Arc<Config> {
    midpoint_config(300, 25)
}

/// [`discovery_config`] with a custom minimizer.
pub fn config_with_minimizer(minimizer: Arc<dyn Minimizer>) -> Arc<Config> {
    let data = midpoint_data(300, 25);
    let params = parameters(data.len() as f64, -20.0, false);
    config(data, params, UnbinnedLossBuilder::new(), minimizer)
}

/// 300 background and 10 signal events with a Gaussian constraint on lambda.
pub fn upper_limit_config() -> Arc<Config> {
    let data = sample_data(300, 10, 11);
    let params = parameters(data.len() as f64, -20.0, false);
    let builder = UnbinnedLossBuilder::new()
        .with_constraint(4, Constraint::Gaussian { mean: -2.022148383099551, sigma: 0.0748696 })
        .unwrap();
    config(data, params, builder, Arc::new(MaximumLikelihoodEstimator::new()))
}

/// 500 background and 80 signal events, mean and sigma floating.
pub fn interval_config() -> Arc<Config> {
    let data = sample_data(500, 80, 3);
    let params = parameters(data.len() as f64, 0.0, true);
    config(data, params, UnbinnedLossBuilder::new(), Arc::new(MaximumLikelihoodEstimator::new()))
}

/// [`discovery_config`] with the signal yield fixed.
pub fn fixed_poi_config() -> Arc<Config> {
    let data = midpoint_data(300, 25);
    let mut params = parameters(data.len() as f64, -20.0, false);
    params.set_floating(0, false).unwrap();
    config(data, params, UnbinnedLossBuilder::new(), Arc::new(MaximumLikelihoodEstimator::new()))
}
