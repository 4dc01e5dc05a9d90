//! # ns-inference
//!
//! Profile-likelihood hypothesis testing for NextStat.
//!
//! This crate provides:
//! - Maximum Likelihood Estimation (MLE) and the profile-likelihood primitive
//! - The profile-likelihood-ratio test statistic and its truncation rules
//! - Asymptotic (Asimov) and frequentist (toy-based) calculators
//! - Discovery, confidence-interval and upper-limit orchestrators
//!
//! ## Architecture
//!
//! This crate depends on the `DensityModel`, `LossBuilder` and `Minimizer`
//! traits from ns-core, NOT on concrete model backends. A [`Config`] bundles
//! them with the observed data; calculators consume a shared `Arc<Config>`.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Asymptotic calculator (Asimov datasets, closed-form p-values).
pub mod asymptotic;
/// Calculator contract shared by the asymptotic and toy-based calibrations.
pub mod calculator;
/// Analysis configuration: models, data, loss builder, minimizer, sampler.
pub mod config;
/// Toy-based calculator.
pub mod frequentist;
/// Discovery, confidence-interval and upper-limit orchestrators.
pub mod hypotest;
/// Interpolating splines with root finding.
pub mod interp;
/// Maximum-likelihood estimation via L-BFGS-B.
pub mod mle;
/// Generic numerical optimizer (L-BFGS-B backend).
pub mod optimizer;
/// Parameter-of-interest handle.
pub mod poi;
/// Profile likelihood primitive.
pub mod profile_likelihood;
/// Test statistic and truncation rules.
pub mod test_statistic;
/// Toy ensembles and their persistence.
pub mod toys;

/// Model and data fixtures for tests and benchmarks.
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use asymptotic::{AsimovConfig, AsymptoticCalculator};
pub use calculator::{Calculator, CalculatorKind, PValues};
pub use config::{BaseSampler, Config, ToySampler};
pub use frequentist::{FrequentistCalculator, ToyConfig};
pub use hypotest::{
    ConfidenceInterval, Discovery, DiscoveryResult, IntervalResult, UpperLimit, UpperLimitPValues,
    UpperLimitResult,
};
pub use interp::{Spline, SplineKind};
pub use mle::MaximumLikelihoodEstimator;
pub use optimizer::{LbfgsbOptimizer, ObjectiveFunction, OptimizationResult, OptimizerConfig};
pub use poi::{Poi, PoiKey};
pub use profile_likelihood::{ProfileFn, profile_likelihood};
pub use test_statistic::{Sidedness, TestStatistic};
pub use toys::{ToyResult, ToyStore};
