//! Analysis configuration: models, observed data, loss construction,
//! minimization, toy sampling and the memoized global best fit.

use std::fmt;
use std::sync::{Arc, OnceLock};

use ns_core::{
    Dataset, DensityModel, Error, FitResult, Loss, LossBuilder, Minimizer, ParameterSet, Result,
};
use rand::RngCore;

use crate::profile_likelihood::{ProfileFn, profile_likelihood};

/// Draws one pseudo-dataset per model at a fixed parameter point.
pub trait ToySampler: Send + Sync {
    /// Sample replacement datasets for `models` at `params`. `observed` gives the
    /// real datasets, e.g. for their sizes.
    fn sample(
        &self,
        models: &[Arc<dyn DensityModel>],
        observed: &[Dataset],
        params: &[f64],
        rng: &mut dyn RngCore,
    ) -> Result<Vec<Dataset>>;
}

/// Poisson-fluctuated event counts for extended models, observed counts otherwise.
#[derive(Debug, Clone, Copy, Default)]
pub struct BaseSampler;

impl ToySampler for BaseSampler {
    fn sample(
        &self,
        models: &[Arc<dyn DensityModel>],
        observed: &[Dataset],
        params: &[f64],
        rng: &mut dyn RngCore,
    ) -> Result<Vec<Dataset>> {
        models
            .iter()
            .zip(observed)
            .map(|(m, d)| {
                let n = if m.is_extended() { None } else { Some(d.len()) };
                m.sample(n, params, rng)
            })
            .collect()
    }
}

/// Everything a calculator needs to know about the analysis.
///
/// Shared by reference (`Arc<Config>`) across calculators; the observed loss
/// and the best fit are computed at most once.
pub struct Config {
    models: Vec<Arc<dyn DensityModel>>,
    datasets: Vec<Dataset>,
    parameters: ParameterSet,
    loss_builder: Arc<dyn LossBuilder>,
    minimizer: Arc<dyn Minimizer>,
    sampler: Arc<dyn ToySampler>,
    pll: ProfileFn,
    obsloss: OnceLock<Arc<dyn Loss>>,
    bestfit: OnceLock<FitResult>,
}

impl Config {
    /// One observed dataset per model.
    pub fn new(
        models: Vec<Arc<dyn DensityModel>>,
        datasets: Vec<Dataset>,
        parameters: ParameterSet,
        loss_builder: Arc<dyn LossBuilder>,
        minimizer: Arc<dyn Minimizer>,
    ) -> Result<Self> {
        if models.is_empty() {
            return Err(Error::Validation("configuration needs at least one model".into()));
        }
        if models.len() != datasets.len() {
            return Err(Error::Validation(format!(
                "need one dataset per model, got {} models and {} datasets",
                models.len(),
                datasets.len()
            )));
        }
        for (m, d) in models.iter().zip(&datasets) {
            if m.n_params() != parameters.len() {
                return Err(Error::Validation(format!(
                    "model '{}' expects {} parameters, parameter set has {}",
                    m.name(),
                    m.n_params(),
                    parameters.len()
                )));
            }
            let ((lo, hi), (a, b)) = (d.bounds(), m.space());
            if lo < a || hi > b {
                return Err(Error::Validation(format!(
                    "dataset range ({lo}, {hi}) exceeds the space ({a}, {b}) of model '{}'",
                    m.name()
                )));
            }
        }
        Ok(Self {
            models,
            datasets,
            parameters,
            loss_builder,
            minimizer,
            sampler: Arc::new(BaseSampler),
            pll: profile_likelihood,
            obsloss: OnceLock::new(),
            bestfit: OnceLock::new(),
        })
    }

    /// Replace the toy sampler.
    pub fn with_sampler(mut self, sampler: Arc<dyn ToySampler>) -> Self {
        self.sampler = sampler;
        self
    }

    /// Replace the profiling function.
    pub fn with_pll(mut self, pll: ProfileFn) -> Self {
        self.pll = pll;
        self
    }

    /// Use a precomputed best fit instead of fitting the observed data.
    pub fn with_bestfit(mut self, fit: FitResult) -> Result<Self> {
        self.set_bestfit(fit)?;
        Ok(self)
    }

    /// Models, in channel order.
    pub fn models(&self) -> &[Arc<dyn DensityModel>] {
        &self.models
    }

    /// Observed datasets, in channel order.
    pub fn datasets(&self) -> &[Dataset] {
        &self.datasets
    }

    /// `(model, dataset)` pairs.
    pub fn channels(&self) -> impl Iterator<Item = (&Arc<dyn DensityModel>, &Dataset)> {
        self.models.iter().zip(&self.datasets)
    }

    /// Parameters with their initial values and floating flags.
    pub fn parameters(&self) -> &ParameterSet {
        &self.parameters
    }

    /// The minimizer.
    pub fn minimizer(&self) -> &dyn Minimizer {
        self.minimizer.as_ref()
    }

    /// The toy sampler.
    pub fn sampler(&self) -> &dyn ToySampler {
        self.sampler.as_ref()
    }

    /// Build a loss for replacement datasets.
    pub fn build_loss(&self, datasets: &[Dataset]) -> Result<Arc<dyn Loss>> {
        self.loss_builder.build(&self.models, datasets)
    }

    /// Loss on the observed data.
    pub fn obsloss(&self) -> Result<Arc<dyn Loss>> {
        if let Some(loss) = self.obsloss.get() {
            return Ok(loss.clone());
        }
        let loss = self.build_loss(&self.datasets)?;
        Ok(self.obsloss.get_or_init(|| loss).clone())
    }

    /// Free fit on the observed data, computed once.
    pub fn bestfit(&self) -> Result<&FitResult> {
        if let Some(fit) = self.bestfit.get() {
            return Ok(fit);
        }
        log::info!("fitting observed data for the best-fit point");
        let loss = self.obsloss()?;
        let fit = self.minimizer.minimize(loss.as_ref(), &self.parameters)?;
        if !fit.converged {
            log::warn!("best fit on observed data did not converge: {}", fit.message);
        }
        log::debug!("best fit: nll={} parameters={:?}", fit.nll, fit.parameters);
        Ok(self.bestfit.get_or_init(|| fit))
    }

    /// Replace the memoized best fit.
    pub fn set_bestfit(&mut self, fit: FitResult) -> Result<()> {
        if fit.parameters.len() != self.parameters.len() {
            return Err(Error::Validation(format!(
                "best fit carries {} parameters, configuration has {}",
                fit.parameters.len(),
                self.parameters.len()
            )));
        }
        self.bestfit = OnceLock::from(fit);
        Ok(())
    }

    /// Forget the memoized best fit; the next [`Config::bestfit`] call refits.
    pub fn invalidate_bestfit(&mut self) {
        self.bestfit = OnceLock::new();
    }

    /// Parameter set with every value moved to the best fit.
    pub fn parameters_at_bestfit(&self) -> Result<ParameterSet> {
        let mut params = self.parameters.clone();
        params.set_values(&self.bestfit()?.parameters)?;
        Ok(params)
    }

    /// Profiled NLL of `loss` with parameter `index` fixed at `value`, starting
    /// from the best fit.
    pub fn pll(&self, loss: &dyn Loss, index: usize, value: f64) -> Result<f64> {
        let mut start = self.parameters_at_bestfit()?;
        self.pll_from(&mut start, loss, index, value)
    }

    /// Profiled NLL starting from an explicit parameter point.
    pub fn pll_from(
        &self,
        start: &mut ParameterSet,
        loss: &dyn Loss,
        index: usize,
        value: f64,
    ) -> Result<f64> {
        (self.pll)(self.minimizer.as_ref(), loss, start, index, value)
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("models", &self.models.iter().map(|m| m.name()).collect::<Vec<_>>())
            .field("n_events", &self.datasets.iter().map(Dataset::len).collect::<Vec<_>>())
            .field("parameters", &self.parameters.names())
            .field("bestfit", &self.bestfit.get().map(|fit| fit.nll))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mle::MaximumLikelihoodEstimator;
    use crate::testing;
    use ns_unbinned::UnbinnedLossBuilder;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn config() -> Config {
        let data = testing::sample_data(300, 40, 7);
        let params = testing::parameters(data.len() as f64, -20.0, false);
        Config::new(
            vec![testing::model()],
            vec![data],
            params,
            Arc::new(UnbinnedLossBuilder::new()),
            Arc::new(MaximumLikelihoodEstimator::new()),
        )
        .unwrap()
    }

    fn constant_pll(_: &dyn Minimizer, _: &dyn Loss, _: &mut ParameterSet, _: usize, value: f64) -> Result<f64> {
        Ok(value * 10.0)
    }

    #[test]
    fn test_rejects_inconsistent_channels() {
        let data = testing::sample_data(50, 0, 1);
        let params = testing::parameters(50.0, 0.0, false);
        let build = |models: Vec<Arc<dyn DensityModel>>, datasets: Vec<Dataset>| {
            Config::new(
                models,
                datasets,
                params.clone(),
                Arc::new(UnbinnedLossBuilder::new()),
                Arc::new(MaximumLikelihoodEstimator::new()),
            )
        };
        assert!(matches!(build(vec![], vec![]), Err(Error::Validation(_))));
        assert!(matches!(build(vec![testing::model()], vec![data.clone(), data]), Err(Error::Validation(_))));
        let wide = Dataset::new(vec![0.5, 1.0], (0.0, 5.0)).unwrap();
        assert!(matches!(build(vec![testing::model()], vec![wide]), Err(Error::Validation(_))));
    }

    #[test]
    fn test_bestfit_is_memoized() {
        let config = config();
        let a = config.bestfit().unwrap() as *const FitResult;
        let b = config.bestfit().unwrap() as *const FitResult;
        assert!(std::ptr::eq(a, b));
        let fit = config.bestfit().unwrap();
        assert!(fit.converged);
        assert!(fit.parameters[0] > 15.0 && fit.parameters[0] < 70.0, "{:?}", fit.parameters);
        let start = config.parameters_at_bestfit().unwrap();
        assert_eq!(start.values(), fit.parameters);
        assert!(start.is_floating(0).unwrap());
    }

    #[test]
    fn test_bestfit_override_and_invalidate() {
        let fitted = config().bestfit().unwrap().clone();
        let mut fake = fitted.clone();
        fake.parameters[0] = 3.0;
        let mut config = config().with_bestfit(fake.clone()).unwrap();
        assert_eq!(config.bestfit().unwrap(), &fake);

        let short = FitResult::new(vec![1.0], 0.0, true, 0, 0, "");
        assert!(config.set_bestfit(short).is_err());

        config.invalidate_bestfit();
        assert_eq!(config.bestfit().unwrap().parameters, fitted.parameters);
    }

    #[test]
    fn test_custom_profile_function() {
        let config = config().with_pll(constant_pll);
        let loss = config.obsloss().unwrap();
        assert_eq!(config.pll(loss.as_ref(), 0, 2.5).unwrap(), 25.0);
    }

    #[test]
    fn test_base_sampler_fluctuates_extended_counts() {
        let config = config();
        let params = config.bestfit().unwrap().parameters.clone();
        let mut rng = StdRng::seed_from_u64(1);
        let sizes: Vec<usize> = (0..20)
            .map(|_| {
                let toys = config.sampler().sample(config.models(), config.datasets(), &params, &mut rng).unwrap();
                assert_eq!(toys.len(), 1);
                toys[0].len()
            })
            .collect();
        assert!(sizes.iter().any(|&n| n != sizes[0]));
        let mean = sizes.iter().sum::<usize>() as f64 / sizes.len() as f64;
        assert!((mean - 340.0).abs() < 30.0, "{mean}");
    }
}
