//! Extended unbinned mixture model.

use std::sync::Arc;

use ns_core::{Dataset, DensityModel, Error, Result};
use rand_distr::{Distribution, Poisson};

use crate::pdf::{UnbinnedPdf, u01};

/// Densities below this floor are clamped so the NLL stays finite when a
/// negative yield cancels the mixture locally.
const DENSITY_FLOOR: f64 = 1e-300;

/// Yield expression of a process.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum YieldExpr {
    /// Constant yield.
    Fixed(f64),
    /// Yield equal to the parameter at this index.
    Parameter(usize),
}

impl YieldExpr {
    fn value(&self, params: &[f64]) -> f64 {
        match *self {
            YieldExpr::Fixed(v) => v,
            YieldExpr::Parameter(i) => params[i],
        }
    }
}

/// A mixture component: a shape and its yield.
#[derive(Clone)]
pub struct Process {
    /// Process name (e.g. "signal").
    pub name: String,
    /// Shape of this process.
    pub pdf: Arc<dyn UnbinnedPdf>,
    /// Global parameter indices feeding the PDF shape parameters, in PDF order.
    pub shape_params: Vec<usize>,
    /// Expected number of events.
    pub yield_expr: YieldExpr,
}

impl Process {
    /// Create a process.
    pub fn new(
        name: impl Into<String>,
        pdf: Arc<dyn UnbinnedPdf>,
        shape_params: Vec<usize>,
        yield_expr: YieldExpr,
    ) -> Self {
        Self { name: name.into(), pdf, shape_params, yield_expr }
    }

    fn shape(&self, params: &[f64]) -> Vec<f64> {
        self.shape_params.iter().map(|&i| params[i]).collect()
    }
}

impl std::fmt::Debug for Process {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Process")
            .field("name", &self.name)
            .field("pdf", &self.pdf.pdf_tag())
            .field("shape_params", &self.shape_params)
            .field("yield_expr", &self.yield_expr)
            .finish()
    }
}

/// Mixture `f(x) = Σ_p ν_p · pdf_p(x)` over a bounded one-dimensional observable.
///
/// Extended models add the Poisson term `Σν` to the NLL; non-extended models
/// normalize the mixture by `Σν`.
#[derive(Debug, Clone)]
pub struct UnbinnedModel {
    name: String,
    support: (f64, f64),
    n_params: usize,
    processes: Vec<Process>,
    extended: bool,
}

impl UnbinnedModel {
    /// Create an extended model over `support` for a parameter vector of length `n_params`.
    pub fn new(
        name: impl Into<String>,
        support: (f64, f64),
        n_params: usize,
        processes: Vec<Process>,
    ) -> Result<Self> {
        let name = name.into();
        let (a, b) = support;
        if !a.is_finite() || !b.is_finite() || a >= b {
            return Err(Error::Validation(format!(
                "model '{name}' needs finite support with low < high, got ({a}, {b})"
            )));
        }
        if processes.is_empty() {
            return Err(Error::Validation(format!("model '{name}' has no processes")));
        }
        for p in &processes {
            if p.shape_params.len() != p.pdf.n_params() {
                return Err(Error::Validation(format!(
                    "process '{}' binds {} shape params, {} pdf expects {}",
                    p.name,
                    p.shape_params.len(),
                    p.pdf.pdf_tag(),
                    p.pdf.n_params()
                )));
            }
            let yield_index = match p.yield_expr {
                YieldExpr::Parameter(i) => Some(i),
                YieldExpr::Fixed(v) if !v.is_finite() => {
                    return Err(Error::Validation(format!(
                        "process '{}' has a non-finite fixed yield {v}",
                        p.name
                    )));
                }
                YieldExpr::Fixed(_) => None,
            };
            if let Some(&i) = p.shape_params.iter().chain(yield_index.iter()).find(|&&i| i >= n_params)
            {
                return Err(Error::Validation(format!(
                    "process '{}' references parameter index {i}, model has {n_params}",
                    p.name
                )));
            }
        }
        Ok(Self { name, support, n_params, processes, extended: true })
    }

    /// Switch between extended and non-extended likelihoods.
    pub fn with_extended(mut self, extended: bool) -> Self {
        self.extended = extended;
        self
    }

    /// Mixture components.
    pub fn processes(&self) -> &[Process] {
        &self.processes
    }

    fn check_params(&self, params: &[f64]) -> Result<()> {
        if params.len() != self.n_params {
            return Err(Error::Validation(format!(
                "model '{}' expects {} parameters, got {}",
                self.name,
                self.n_params,
                params.len()
            )));
        }
        Ok(())
    }

    fn yields(&self, params: &[f64]) -> Vec<f64> {
        self.processes.iter().map(|p| p.yield_expr.value(params)).collect()
    }

    fn eval(&self, data: &Dataset, params: &[f64], with_grad: bool) -> Result<(f64, Vec<f64>)> {
        self.check_params(params)?;
        let xs = data.values();
        let n = xs.len();
        let yields = self.yields(params);
        let total: f64 = yields.iter().sum();

        let mut logps = Vec::with_capacity(self.processes.len());
        let mut shape_grads = Vec::with_capacity(self.processes.len());
        for p in &self.processes {
            let k = p.pdf.n_params();
            let mut logp = vec![0.0f64; n];
            let mut grad = vec![0.0f64; n * k];
            p.pdf.log_prob_grad_batch(xs, self.support, &p.shape(params), &mut logp, &mut grad)?;
            logps.push(logp);
            shape_grads.push(grad);
        }

        let mut nll = 0.0;
        let mut g = vec![0.0f64; if with_grad { self.n_params } else { 0 }];
        let mut dens = vec![0.0f64; self.processes.len()];
        for i in 0..n {
            let w = data.weight(i);
            let mut d = 0.0;
            for (j, lp) in logps.iter().enumerate() {
                dens[j] = lp[i].exp();
                d += yields[j] * dens[j];
            }
            if !(d.is_finite() && d > DENSITY_FLOOR) {
                nll -= w * DENSITY_FLOOR.ln();
                continue;
            }
            nll -= w * d.ln();
            if !with_grad {
                continue;
            }
            for (j, p) in self.processes.iter().enumerate() {
                let r = w * dens[j] / d;
                if let YieldExpr::Parameter(k) = p.yield_expr {
                    g[k] -= r;
                }
                let k_p = p.shape_params.len();
                for (s, &idx) in p.shape_params.iter().enumerate() {
                    g[idx] -= yields[j] * r * shape_grads[j][i * k_p + s];
                }
            }
        }

        // Extended term Σν, or normalization W·ln(Σν).
        let dtotal = if self.extended {
            nll += total;
            1.0
        } else {
            let sum_w = data.sum_weights();
            nll += sum_w * total.max(DENSITY_FLOOR).ln();
            sum_w / total.max(DENSITY_FLOOR)
        };
        if with_grad {
            for p in &self.processes {
                if let YieldExpr::Parameter(k) = p.yield_expr {
                    g[k] += dtotal;
                }
            }
        }
        Ok((nll, g))
    }
}

impl DensityModel for UnbinnedModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn n_params(&self) -> usize {
        self.n_params
    }

    fn space(&self) -> (f64, f64) {
        self.support
    }

    fn is_extended(&self) -> bool {
        self.extended
    }

    fn pdf(&self, x: f64, params: &[f64]) -> Result<f64> {
        self.check_params(params)?;
        let yields = self.yields(params);
        let total: f64 = yields.iter().sum();
        let mut d = 0.0;
        for (p, nu) in self.processes.iter().zip(&yields) {
            let mut lp = [0.0f64];
            p.pdf.log_prob_batch(&[x], self.support, &p.shape(params), &mut lp)?;
            d += nu * lp[0].exp();
        }
        Ok(d / total)
    }

    fn integrate(&self, bounds: (f64, f64), params: &[f64]) -> Result<f64> {
        self.check_params(params)?;
        let yields = self.yields(params);
        let mut acc = 0.0;
        for (p, nu) in self.processes.iter().zip(&yields) {
            acc += nu * p.pdf.interval_fraction(self.support, &p.shape(params), bounds)?;
        }
        if self.extended { Ok(acc) } else { Ok(acc / yields.iter().sum::<f64>()) }
    }

    fn expected_events(&self, params: &[f64]) -> Result<f64> {
        self.check_params(params)?;
        if self.extended { Ok(self.yields(params).iter().sum()) } else { Ok(1.0) }
    }

    fn sample(&self, n: Option<usize>, params: &[f64], rng: &mut dyn rand::RngCore) -> Result<Dataset> {
        self.check_params(params)?;
        // Negative yields cannot be sampled; they only shift the total.
        let yields: Vec<f64> = self.yields(params).into_iter().map(|v| v.max(0.0)).collect();
        let total: f64 = yields.iter().sum();

        let n_events = match n {
            Some(n) => n,
            None if !self.extended => {
                return Err(Error::Validation(format!(
                    "model '{}' is not extended; an explicit event count is required",
                    self.name
                )));
            }
            None if total <= 0.0 => 0,
            None => {
                let poisson = Poisson::new(total).map_err(|e| {
                    Error::Computation(format!("invalid Poisson mean {total}: {e}"))
                })?;
                poisson.sample(&mut *rng) as usize
            }
        };
        if n_events > 0 && total <= 0.0 {
            return Err(Error::Computation(format!(
                "model '{}' has no positive yield to sample from",
                self.name
            )));
        }

        // Multinomial split of the events across processes.
        let mut counts = vec![0usize; self.processes.len()];
        for _ in 0..n_events {
            let mut u = u01(rng) * total;
            let mut pick = counts.len() - 1;
            for (j, nu) in yields.iter().enumerate() {
                if u < *nu {
                    pick = j;
                    break;
                }
                u -= nu;
            }
            counts[pick] += 1;
        }

        let mut values = Vec::with_capacity(n_events);
        for (p, &count) in self.processes.iter().zip(&counts) {
            if count > 0 {
                values.extend(p.pdf.sample(&p.shape(params), count, self.support, rng)?);
            }
        }
        Dataset::new(values, self.support)
    }

    fn nll(&self, data: &Dataset, params: &[f64]) -> Result<f64> {
        Ok(self.eval(data, params, false)?.0)
    }

    fn nll_grad(&self, data: &Dataset, params: &[f64]) -> Result<(f64, Vec<f64>)> {
        self.eval(data, params, true)
    }
}
