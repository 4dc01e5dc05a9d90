//! Named fit parameters with bounds, floating flags and scoped fixing.

use std::collections::HashSet;
use std::ops::{Deref, DerefMut};

use crate::{Error, Result};

/// A single model parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    /// Stable parameter name.
    pub name: String,
    /// Current value (the starting point of the next fit).
    pub init: f64,
    /// Bounds `(low, high)` (LBFGS-B box constraints).
    pub bounds: (f64, f64),
    /// Whether minimizers may move this parameter.
    pub floating: bool,
}

impl Parameter {
    /// Floating parameter with the given starting value and bounds.
    pub fn new(name: impl Into<String>, init: f64, bounds: (f64, f64)) -> Self {
        Self { name: name.into(), init, bounds, floating: true }
    }

    /// Parameter held constant by the minimizer.
    pub fn fixed(name: impl Into<String>, value: f64, bounds: (f64, f64)) -> Self {
        Self { name: name.into(), init: value, bounds, floating: false }
    }
}

/// Ordered set of parameters. Indices into this set are the indices of the
/// parameter vector every [`Loss`](crate::Loss) and model receives.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSet {
    params: Vec<Parameter>,
}

impl ParameterSet {
    /// Validate and build a parameter set.
    pub fn new(params: Vec<Parameter>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(params.len());
        for p in &params {
            if p.name.is_empty() {
                return Err(Error::Validation("parameter name must not be empty".into()));
            }
            if !seen.insert(p.name.as_str()) {
                return Err(Error::Validation(format!("duplicate parameter name '{}'", p.name)));
            }
            let (lo, hi) = p.bounds;
            if lo.is_nan() || hi.is_nan() || lo > hi {
                return Err(Error::Validation(format!(
                    "invalid bounds for '{}': ({}, {})",
                    p.name, lo, hi
                )));
            }
            if !p.init.is_finite() || p.init < lo || p.init > hi {
                return Err(Error::Validation(format!(
                    "initial value of '{}' ({}) is outside its bounds ({}, {})",
                    p.name, p.init, lo, hi
                )));
            }
        }
        Ok(Self { params })
    }

    /// Number of parameters.
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// `true` when the set is empty.
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Index of the parameter called `name`.
    pub fn index_of(&self, name: &str) -> Result<usize> {
        self.params
            .iter()
            .position(|p| p.name == name)
            .ok_or_else(|| Error::Validation(format!("unknown parameter '{}'", name)))
    }

    /// Parameter at `index`.
    pub fn get(&self, index: usize) -> Result<&Parameter> {
        self.params.get(index).ok_or_else(|| {
            Error::Validation(format!(
                "parameter index {} out of range ({} parameters)",
                index,
                self.params.len()
            ))
        })
    }

    /// Parameter names in index order.
    pub fn names(&self) -> Vec<&str> {
        self.params.iter().map(|p| p.name.as_str()).collect()
    }

    /// Current values in index order.
    pub fn values(&self) -> Vec<f64> {
        self.params.iter().map(|p| p.init).collect()
    }

    /// Bounds of parameter `index`.
    pub fn bounds(&self, index: usize) -> Result<(f64, f64)> {
        Ok(self.get(index)?.bounds)
    }

    /// Whether parameter `index` is floating.
    pub fn is_floating(&self, index: usize) -> Result<bool> {
        Ok(self.get(index)?.floating)
    }

    /// Indices of all floating parameters.
    pub fn floating_indices(&self) -> Vec<usize> {
        self.params.iter().enumerate().filter(|(_, p)| p.floating).map(|(i, _)| i).collect()
    }

    /// Set the value of parameter `index`; it must lie inside the bounds.
    pub fn set_value(&mut self, index: usize, value: f64) -> Result<()> {
        let p = self.get_mut(index)?;
        let (lo, hi) = p.bounds;
        if !value.is_finite() || value < lo || value > hi {
            return Err(Error::Validation(format!(
                "value {} for '{}' is outside its bounds ({}, {})",
                value, p.name, lo, hi
            )));
        }
        p.init = value;
        Ok(())
    }

    /// Set all values at once, clamping each into its bounds.
    ///
    /// Used to move the starting point to a fit result, where values may sit
    /// a rounding error outside the box.
    pub fn set_values(&mut self, values: &[f64]) -> Result<()> {
        if values.len() != self.params.len() {
            return Err(Error::Validation(format!(
                "expected {} parameter values, got {}",
                self.params.len(),
                values.len()
            )));
        }
        for (p, &v) in self.params.iter_mut().zip(values) {
            if v.is_finite() {
                p.init = v.clamp(p.bounds.0, p.bounds.1);
            }
        }
        Ok(())
    }

    /// Mark parameter `index` floating or fixed.
    pub fn set_floating(&mut self, index: usize, floating: bool) -> Result<()> {
        self.get_mut(index)?.floating = floating;
        Ok(())
    }

    /// Fix parameter `index` at `value` until the returned guard is dropped.
    ///
    /// The previous value and floating flag are restored on drop, whatever the
    /// exit path of the scope holding the guard.
    pub fn fix(&mut self, index: usize, value: f64) -> Result<FixGuard<'_>> {
        let prev = self.get(index)?;
        let (prev_value, prev_floating) = (prev.init, prev.floating);
        self.set_value(index, value)?;
        self.params[index].floating = false;
        Ok(FixGuard { set: self, index, prev_value, prev_floating })
    }

    fn get_mut(&mut self, index: usize) -> Result<&mut Parameter> {
        let n = self.params.len();
        self.params.get_mut(index).ok_or_else(|| {
            Error::Validation(format!("parameter index {} out of range ({} parameters)", index, n))
        })
    }
}

/// Scoped fix of one parameter, see [`ParameterSet::fix`].
#[derive(Debug)]
pub struct FixGuard<'a> {
    set: &'a mut ParameterSet,
    index: usize,
    prev_value: f64,
    prev_floating: bool,
}

impl Deref for FixGuard<'_> {
    type Target = ParameterSet;

    fn deref(&self) -> &ParameterSet {
        self.set
    }
}

impl DerefMut for FixGuard<'_> {
    fn deref_mut(&mut self) -> &mut ParameterSet {
        self.set
    }
}

impl Drop for FixGuard<'_> {
    fn drop(&mut self) {
        let p = &mut self.set.params[self.index];
        p.init = self.prev_value;
        p.floating = self.prev_floating;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set() -> ParameterSet {
        ParameterSet::new(vec![
            Parameter::new("mu", 1.0, (-1.0, 10.0)),
            Parameter::new("bkg", 100.0, (0.0, 1000.0)),
            Parameter::fixed("lumi", 1.0, (0.5, 1.5)),
        ])
        .unwrap()
    }

    #[test]
    fn test_validation() {
        let dup = ParameterSet::new(vec![
            Parameter::new("a", 0.0, (0.0, 1.0)),
            Parameter::new("a", 0.0, (0.0, 1.0)),
        ]);
        assert!(matches!(dup, Err(Error::Validation(_))));
        assert!(ParameterSet::new(vec![Parameter::new("a", 0.0, (1.0, 0.0))]).is_err());
        assert!(ParameterSet::new(vec![Parameter::new("a", 5.0, (0.0, 1.0))]).is_err());
        assert!(ParameterSet::new(vec![Parameter::new("", 0.0, (0.0, 1.0))]).is_err());
    }

    #[test]
    fn test_lookup() {
        let s = set();
        assert_eq!(s.index_of("bkg").unwrap(), 1);
        assert!(matches!(s.index_of("sigma"), Err(Error::Validation(_))));
        assert_eq!(s.floating_indices(), vec![0, 1]);
        assert_eq!(s.names(), vec!["mu", "bkg", "lumi"]);
    }

    #[test]
    fn test_set_value_bounds() {
        let mut s = set();
        s.set_value(0, 3.0).unwrap();
        assert_eq!(s.values()[0], 3.0);
        assert!(s.set_value(0, 11.0).is_err());
        s.set_values(&[20.0, 50.0, 1.0]).unwrap();
        assert_eq!(s.values(), vec![10.0, 50.0, 1.0]);
    }

    #[test]
    fn test_fix_guard_restores() {
        let mut s = set();
        {
            let guard = s.fix(0, 2.5).unwrap();
            assert_eq!(guard.values()[0], 2.5);
            assert!(!guard.is_floating(0).unwrap());
            assert_eq!(guard.floating_indices(), vec![1]);
        }
        assert_eq!(s.values()[0], 1.0);
        assert!(s.is_floating(0).unwrap());
    }

    #[test]
    fn test_fix_guard_restores_on_error_path() {
        fn fails(s: &mut ParameterSet) -> Result<()> {
            let _guard = s.fix(1, 42.0)?;
            Err(Error::Computation("minimizer exploded".into()))
        }
        let mut s = set();
        assert!(fails(&mut s).is_err());
        assert_eq!(s.values()[1], 100.0);
        assert!(s.is_floating(1).unwrap());
    }

    #[test]
    fn test_fix_out_of_bounds_leaves_state() {
        let mut s = set();
        assert!(s.fix(0, 100.0).is_err());
        assert_eq!(s.values()[0], 1.0);
        assert!(s.is_floating(0).unwrap());
    }
}
