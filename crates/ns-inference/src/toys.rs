//! Toy ensembles and their JSON persistence.
//!
//! On disk, ensembles are keyed by the generation POI value written as text:
//!
//! ```json
//! { "10": { "bestfit": { "values": [..], "nll": [..] },
//!           "nll": { "0": [..], "10": [..] } } }
//! ```
//!
//! Non-finite numbers are written as `null` and read back as NaN.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use ns_core::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::poi::PoiKey;

/// One ensemble of pseudo-experiments generated at a fixed POI value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToyResult {
    /// Best-fit POI value of each toy.
    pub bestfit_values: Vec<f64>,
    /// NLL at each toy's best fit.
    pub bestfit_nll: Vec<f64>,
    /// Profiled NLL of each toy, per evaluated POI value.
    pub nll: HashMap<PoiKey, Vec<f64>>,
}

impl ToyResult {
    /// Number of toys.
    pub fn len(&self) -> usize {
        self.bestfit_values.len()
    }

    /// `true` when the ensemble holds no toys.
    pub fn is_empty(&self) -> bool {
        self.bestfit_values.is_empty()
    }

    /// Profiled NLLs at `value`, if evaluated.
    pub fn nll_at(&self, value: f64) -> Option<&[f64]> {
        self.nll.get(&PoiKey::from(value)).map(Vec::as_slice)
    }

    /// POI values with profiled NLLs, ascending.
    pub fn evaluated(&self) -> Vec<f64> {
        let mut v: Vec<f64> = self.nll.keys().map(|k| k.value()).collect();
        v.sort_by(f64::total_cmp);
        v
    }

    fn validate(&self) -> Result<()> {
        let n = self.len();
        if self.bestfit_nll.len() != n {
            return Err(Error::Validation(format!(
                "toy ensemble has {n} best-fit values but {} best-fit NLLs",
                self.bestfit_nll.len()
            )));
        }
        if let Some((k, v)) = self.nll.iter().find(|(_, v)| v.len() != n) {
            return Err(Error::Validation(format!(
                "toy ensemble has {n} toys but {} NLLs at {}",
                v.len(),
                k.value()
            )));
        }
        Ok(())
    }
}

/// Toy ensembles keyed by generation value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToyStore {
    toys: HashMap<PoiKey, ToyResult>,
}

#[derive(Serialize, Deserialize)]
struct BestfitRecord {
    values: Vec<Option<f64>>,
    nll: Vec<Option<f64>>,
}

#[derive(Serialize, Deserialize)]
struct ToyRecord {
    bestfit: BestfitRecord,
    nll: BTreeMap<String, Vec<Option<f64>>>,
}

fn to_record(xs: &[f64]) -> Vec<Option<f64>> {
    xs.iter().map(|&x| x.is_finite().then_some(x)).collect()
}

fn from_record(xs: Vec<Option<f64>>) -> Vec<f64> {
    xs.into_iter().map(|x| x.unwrap_or(f64::NAN)).collect()
}

fn parse_key(text: &str) -> Result<PoiKey> {
    let v: f64 = text
        .trim()
        .parse()
        .map_err(|_| Error::Validation(format!("invalid POI value key '{text}' in toy file")))?;
    if !v.is_finite() {
        return Err(Error::Validation(format!("non-finite POI value key '{text}' in toy file")));
    }
    Ok(PoiKey::from(v))
}

impl ToyStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of generation values.
    pub fn len(&self) -> usize {
        self.toys.len()
    }

    /// `true` when no ensemble is stored.
    pub fn is_empty(&self) -> bool {
        self.toys.is_empty()
    }

    /// Ensemble generated at `generation`.
    pub fn get(&self, generation: f64) -> Option<&ToyResult> {
        self.toys.get(&PoiKey::from(generation))
    }

    /// Mutable ensemble generated at `generation`.
    pub fn get_mut(&mut self, generation: f64) -> Option<&mut ToyResult> {
        self.toys.get_mut(&PoiKey::from(generation))
    }

    /// Generation values, ascending.
    pub fn generation_values(&self) -> Vec<f64> {
        let mut v: Vec<f64> = self.toys.keys().map(|k| k.value()).collect();
        v.sort_by(f64::total_cmp);
        v
    }

    /// Store an ensemble, replacing any ensemble at the same generation value.
    pub fn add_toys(&mut self, generation: f64, toys: ToyResult) -> Result<()> {
        if !generation.is_finite() {
            return Err(Error::Validation(format!("non-finite generation value {generation}")));
        }
        toys.validate()?;
        if self.toys.insert(PoiKey::from(generation), toys).is_some() {
            log::debug!("replaced toy ensemble generated at {generation}");
        }
        Ok(())
    }

    /// Merge every ensemble of `other` into this store.
    pub fn extend(&mut self, other: ToyStore) {
        self.toys.extend(other.toys);
    }

    /// Serialize to the JSON layout described in the module docs.
    pub fn to_json(&self) -> Result<String> {
        let records: BTreeMap<String, ToyRecord> = self
            .toys
            .iter()
            .map(|(gen_key, t)| {
                let nll = t.nll.iter().map(|(k, v)| (k.value().to_string(), to_record(v))).collect();
                let record = ToyRecord {
                    bestfit: BestfitRecord {
                        values: to_record(&t.bestfit_values),
                        nll: to_record(&t.bestfit_nll),
                    },
                    nll,
                };
                (gen_key.value().to_string(), record)
            })
            .collect();
        Ok(serde_json::to_string_pretty(&records)?)
    }

    /// Parse the JSON layout described in the module docs.
    pub fn from_json(json: &str) -> Result<Self> {
        let records: BTreeMap<String, ToyRecord> = serde_json::from_str(json)?;
        let mut store = Self::new();
        for (gen_text, record) in records {
            let generation = parse_key(&gen_text)?;
            let nll = record
                .nll
                .into_iter()
                .map(|(k, v)| Ok((parse_key(&k)?, from_record(v))))
                .collect::<Result<HashMap<_, _>>>()?;
            let toys = ToyResult {
                bestfit_values: from_record(record.bestfit.values),
                bestfit_nll: from_record(record.bestfit.nll),
                nll,
            };
            store.add_toys(generation.value(), toys)?;
        }
        Ok(store)
    }

    /// Write every ensemble to `path`.
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Read ensembles from `path`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ensemble() -> ToyResult {
        let mut nll = HashMap::new();
        nll.insert(PoiKey::from(0.0), vec![10.5, 11.25, f64::NAN]);
        nll.insert(PoiKey::from(2.5), vec![12.0, 0.1 + 0.2, 9.75]);
        ToyResult {
            bestfit_values: vec![1.0 / 3.0, -0.25, 2.0],
            bestfit_nll: vec![9.0, 10.0, std::f64::consts::PI],
            nll,
        }
    }

    #[test]
    fn test_json_round_trip_is_exact() {
        let mut store = ToyStore::new();
        store.add_toys(2.5, ensemble()).unwrap();
        store.add_toys(0.0, ensemble()).unwrap();
        let back = ToyStore::from_json(&store.to_json().unwrap()).unwrap();
        assert_eq!(back.generation_values(), vec![0.0, 2.5]);
        let (a, b) = (store.get(2.5).unwrap(), back.get(2.5).unwrap());
        assert_eq!(a.bestfit_values, b.bestfit_values);
        assert_eq!(a.bestfit_nll, b.bestfit_nll);
        assert_eq!(a.nll_at(2.5), b.nll_at(2.5));
        let nll0 = b.nll_at(0.0).unwrap();
        assert_eq!(&nll0[..2], &[10.5, 11.25]);
        assert!(nll0[2].is_nan());
    }

    #[test]
    fn test_layout_uses_text_keys() {
        let mut store = ToyStore::new();
        store.add_toys(10.0, ensemble()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&store.to_json().unwrap()).unwrap();
        let entry = &value["10"];
        assert!(entry["bestfit"]["values"].is_array());
        assert!(entry["bestfit"]["nll"].is_array());
        assert!(entry["nll"]["2.5"].is_array());
        assert!(entry["nll"]["0"][2].is_null());
    }

    #[test]
    fn test_add_toys_validates_lengths() {
        let mut store = ToyStore::new();
        let mut bad = ensemble();
        bad.bestfit_nll.pop();
        assert!(matches!(store.add_toys(1.0, bad), Err(Error::Validation(_))));
        let mut bad = ensemble();
        bad.nll.insert(PoiKey::from(5.0), vec![1.0]);
        assert!(store.add_toys(1.0, bad).is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn test_add_toys_replaces() {
        let mut store = ToyStore::new();
        store.add_toys(1.0, ensemble()).unwrap();
        store.add_toys(1.0, ToyResult::default()).unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.get(1.0).unwrap().is_empty());
    }

    #[test]
    fn test_bad_key_rejected() {
        let json = r#"{"abc": {"bestfit": {"values": [], "nll": []}, "nll": {}}}"#;
        assert!(matches!(ToyStore::from_json(json), Err(Error::Validation(_))));
        assert!(matches!(ToyStore::from_json("[1, 2"), Err(Error::Json(_))));
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("toys.json");
        let mut store = ToyStore::new();
        store.add_toys(0.5, ensemble()).unwrap();
        store.to_file(&path).unwrap();
        let back = ToyStore::from_file(&path).unwrap();
        assert_eq!(back.get(0.5).unwrap().evaluated(), vec![0.0, 2.5]);
    }
}
