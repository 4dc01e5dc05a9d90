//! Parameter-of-interest handle.

use std::fmt;
use std::hash::{Hash, Hasher};

use ns_core::{Error, ParameterSet, Result};

/// Hashable scalar POI value, used as a cache key.
///
/// `-0.0` and `0.0` map to the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoiKey(u64);

impl PoiKey {
    /// The scalar value behind this key.
    pub fn value(self) -> f64 {
        f64::from_bits(self.0)
    }
}

impl From<f64> for PoiKey {
    fn from(v: f64) -> Self {
        PoiKey(if v == 0.0 { 0.0f64.to_bits() } else { v.to_bits() })
    }
}

/// A model parameter bound to one or more candidate values.
///
/// Immutable once built. Equality and hashing use `(name, values)`.
#[derive(Debug, Clone)]
pub struct Poi {
    name: String,
    index: usize,
    bounds: (f64, f64),
    values: Vec<f64>,
}

fn check_values(name: &str, (lo, hi): (f64, f64), values: &[f64]) -> Result<()> {
    if values.is_empty() {
        return Err(Error::Validation(format!("POI '{name}' needs at least one value")));
    }
    if let Some(v) = values.iter().find(|v| !v.is_finite()) {
        return Err(Error::Validation(format!("POI '{name}' has a non-finite value {v}")));
    }
    if let Some(v) = values.iter().find(|&&v| v < lo || v > hi) {
        return Err(Error::Validation(format!(
            "POI '{name}' value {v} is outside the parameter bounds ({lo}, {hi})"
        )));
    }
    Ok(())
}

impl Poi {
    /// POI on parameter `name` of `params` with the given values: at least
    /// one, all finite and inside the parameter bounds.
    pub fn new(params: &ParameterSet, name: &str, values: impl Into<Vec<f64>>) -> Result<Self> {
        let index = params.index_of(name)?;
        let bounds = params.bounds(index)?;
        let values = values.into();
        check_values(name, bounds, &values)?;
        Ok(Self { name: name.to_string(), index, bounds, values })
    }

    /// Single-valued POI.
    pub fn scalar(params: &ParameterSet, name: &str, value: f64) -> Result<Self> {
        Self::new(params, name, vec![value])
    }

    /// Same parameter, different values.
    pub fn with_values(&self, values: impl Into<Vec<f64>>) -> Result<Self> {
        let values = values.into();
        check_values(&self.name, self.bounds, &values)?;
        Ok(Self { name: self.name.clone(), index: self.index, bounds: self.bounds, values })
    }

    /// Parameter name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parameter index in the configuration's parameter set.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Bounds of the underlying parameter.
    pub fn bounds(&self) -> (f64, f64) {
        self.bounds
    }

    /// All values, in order.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// First value (the value of a scalar POI).
    pub fn value(&self) -> f64 {
        self.values[0]
    }

    /// Cache key of the first value.
    pub fn key(&self) -> PoiKey {
        PoiKey::from(self.value())
    }

    /// Number of scalar values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Always `false`: a POI carries at least one value.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Whether this POI holds exactly one value.
    pub fn is_scalar(&self) -> bool {
        self.values.len() == 1
    }

    /// Single-valued POIs, one per value, in order.
    pub fn iter(&self) -> impl Iterator<Item = Poi> + '_ {
        self.values
            .iter()
            .map(|&v| Poi { name: self.name.clone(), index: self.index, bounds: self.bounds, values: vec![v] })
    }

    /// Fail unless `other` refers to the same parameter.
    pub fn ensure_same_parameter(&self, other: &Poi) -> Result<()> {
        if self.name != other.name {
            return Err(Error::Configuration(format!(
                "null and alternate hypotheses test different parameters: '{}' vs '{}'",
                self.name, other.name
            )));
        }
        Ok(())
    }
}

impl PartialEq for Poi {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.values.len() == other.values.len()
            && self.values.iter().zip(&other.values).all(|(&a, &b)| PoiKey::from(a) == PoiKey::from(b))
    }
}

impl Eq for Poi {}

impl Hash for Poi {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        for &v in &self.values {
            PoiKey::from(v).hash(state);
        }
    }
}

impl<'a> IntoIterator for &'a Poi {
    type Item = Poi;
    type IntoIter = Box<dyn Iterator<Item = Poi> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}

impl fmt::Display for Poi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_scalar() {
            write!(f, "POI('{}', value={})", self.name, self.values[0])
        } else {
            write!(f, "POI('{}', values={:?})", self.name, self.values)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ns_core::Parameter;
    use std::collections::HashSet;

    fn params() -> ParameterSet {
        ParameterSet::new(vec![
            Parameter::new("Nsig", 0.0, (-10.0, 100.0)),
            Parameter::new("Nbkg", 300.0, (0.0, 1000.0)),
        ])
        .unwrap()
    }

    #[test]
    fn test_construction() {
        let p = params();
        let poi = Poi::new(&p, "Nsig", vec![1.0, 2.0, 3.0]).unwrap();
        assert_eq!(poi.index(), 0);
        assert_eq!(poi.len(), 3);
        assert!(!poi.is_scalar());
        assert!(matches!(Poi::scalar(&p, "mass", 1.0), Err(Error::Validation(_))));
        assert!(Poi::new(&p, "Nsig", Vec::<f64>::new()).is_err());
        assert!(Poi::scalar(&p, "Nsig", f64::NAN).is_err());
    }

    #[test]
    fn test_values_outside_bounds_are_rejected() {
        let p = params();
        let err = Poi::new(&p, "Nsig", vec![10.0, 410.0]).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(Poi::scalar(&p, "Nsig", -10.5).is_err());
        let edge = Poi::new(&p, "Nsig", vec![-10.0, 100.0]).unwrap();
        assert_eq!(edge.bounds(), (-10.0, 100.0));
        assert!(edge.with_values(vec![50.0]).is_ok());
        assert!(matches!(edge.with_values(vec![101.0]), Err(Error::Validation(_))));
    }

    #[test]
    fn test_iteration_yields_scalars() {
        let p = params();
        let poi = Poi::new(&p, "Nsig", vec![1.0, 2.0]).unwrap();
        let parts: Vec<Poi> = poi.iter().collect();
        assert_eq!(parts.len(), 2);
        assert!(parts.iter().all(|q| q.is_scalar() && q.name() == "Nsig"));
        assert_eq!(parts[1].value(), 2.0);
        let mut n = 0;
        for q in &poi {
            n += q.len();
        }
        assert_eq!(n, 2);
    }

    #[test]
    fn test_equality_and_hash() {
        let p = params();
        let a = Poi::scalar(&p, "Nsig", 0.0).unwrap();
        let b = Poi::scalar(&p, "Nsig", -0.0).unwrap();
        let c = Poi::scalar(&p, "Nbkg", 0.0).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        let set: HashSet<Poi> = [a.clone(), b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
        assert_eq!(a.key(), PoiKey::from(-0.0));
        assert_eq!(PoiKey::from(2.5).value(), 2.5);
        assert!(a.ensure_same_parameter(&Poi::scalar(&p, "Nbkg", 1.0).unwrap()).is_err());
    }

    #[test]
    fn test_display() {
        let p = params();
        assert_eq!(Poi::scalar(&p, "Nsig", 1.5).unwrap().to_string(), "POI('Nsig', value=1.5)");
    }
}
