//! Build and search parameters.
//!
//! The [`Params`] bag is a string-keyed map used at the crate boundary and
//! by the autotuner, which reports its chosen configuration through it.
//! Internally every component consumes one of the strongly-typed records
//! ([`IndexParams`], [`SearchParams`], [`AutotuneParams`]) constructed once
//! at build/search entry.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::distance::DistanceKind;
use crate::error::{NaborError, Result};

/// Index algorithm selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    Linear,
    KdTree,
    KMeans,
    Composite,
    /// Accepted by the enumeration for plug-in use; not provided here.
    VpTree,
}

impl Algorithm {
    /// Canonical lowercase name, as used in the [`Params`] bag.
    pub fn as_str(self) -> &'static str {
        match self {
            Algorithm::Linear => "linear",
            Algorithm::KdTree => "kdtree",
            Algorithm::KMeans => "kmeans",
            Algorithm::Composite => "composite",
            Algorithm::VpTree => "vptree",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = NaborError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "linear" => Ok(Algorithm::Linear),
            "kdtree" => Ok(Algorithm::KdTree),
            "kmeans" => Ok(Algorithm::KMeans),
            "composite" => Ok(Algorithm::Composite),
            "vptree" => Ok(Algorithm::VpTree),
            other => Err(NaborError::Unsupported(other.to_string())),
        }
    }
}

/// Strategy for picking the initial cluster centers of a k-means split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CentersInit {
    /// Distinct members sampled uniformly.
    Random,
    /// Farthest-point heuristic with a deterministic first pick.
    Gonzales,
    /// Sampling proportional to squared distance from chosen centers.
    #[serde(rename = "kmeanspp")]
    KMeansPp,
}

impl CentersInit {
    pub fn as_str(self) -> &'static str {
        match self {
            CentersInit::Random => "random",
            CentersInit::Gonzales => "gonzales",
            CentersInit::KMeansPp => "kmeanspp",
        }
    }
}

impl fmt::Display for CentersInit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CentersInit {
    type Err = NaborError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "random" => Ok(CentersInit::Random),
            "gonzales" => Ok(CentersInit::Gonzales),
            "kmeanspp" | "kmeans++" => Ok(CentersInit::KMeansPp),
            other => Err(NaborError::Unsupported(other.to_string())),
        }
    }
}

/// Structural build options, consumed once when an index is constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexParams {
    pub algorithm: Algorithm,
    /// KD forest size.
    pub trees: usize,
    /// k-means branching factor.
    pub branching: usize,
    /// Max Lloyd iterations; `-1` means iterate until assignments stabilize.
    pub iterations: i32,
    pub centers_init: CentersInit,
    pub distance: DistanceKind,
    /// Seeds every random choice made during the build when set.
    pub random_seed: Option<u64>,
}

impl Default for IndexParams {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::KdTree,
            trees: 4,
            branching: 32,
            iterations: 11,
            centers_init: CentersInit::Random,
            distance: DistanceKind::Euclidean,
            random_seed: None,
        }
    }
}

/// Per-query options.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchParams {
    /// Leaf-scoring budget shared across a whole forest/tree; `-1` means
    /// unlimited (the traversal becomes exact).
    pub checks: i32,
    /// Cluster-boundary blend for k-means traversal, in `[0, 1]`.
    pub cb_index: f32,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            checks: 32,
            cb_index: 0.4,
        }
    }
}

impl SearchParams {
    /// Query with the given checks budget and default `cb_index`.
    pub fn with_checks(checks: i32) -> Self {
        Self {
            checks,
            ..Self::default()
        }
    }

    /// Unlimited budget: tree traversals return exact results.
    pub fn exact() -> Self {
        Self::with_checks(-1)
    }
}

/// Autotuner inputs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AutotuneParams {
    /// Fraction of exact matches the tuned index must reach, in `(0, 1)`.
    pub target_precision: f32,
    /// Weight of build time in the cost function.
    pub build_weight: f32,
    /// Weight of index memory in the cost function.
    pub memory_weight: f32,
    /// Fraction of the dataset used as the tuning sample, in `(0, 1]`.
    pub sample_fraction: f32,
}

impl Default for AutotuneParams {
    fn default() -> Self {
        Self {
            target_precision: 0.9,
            build_weight: 0.01,
            memory_weight: 0.0,
            sample_fraction: 0.1,
        }
    }
}

/// A dynamically-typed parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(String),
}

/// String-keyed parameter bag carried across the crate boundary.
///
/// Recognized keys: `algorithm`, `checks`, `cb_index`, `trees`,
/// `branching`, `iterations`, `centers_init`, `target_precision`,
/// `build_weight`, `memory_weight`, `sample_fraction`, `random_seed`,
/// and the autotuner output `speedup`. Unrecognized keys are kept but
/// ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Params(BTreeMap<String, Value>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_int(&mut self, key: &str, value: i64) {
        self.0.insert(key.to_string(), Value::Int(value));
    }

    pub fn set_float(&mut self, key: &str, value: f64) {
        self.0.insert(key.to_string(), Value::Float(value));
    }

    pub fn set_str(&mut self, key: &str, value: &str) {
        self.0.insert(key.to_string(), Value::Str(value.to_string()));
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.0.get(key)? {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_float(&self, key: &str) -> Option<f64> {
        match self.0.get(key)? {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            Value::Str(_) => None,
        }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.0.get(key)? {
            Value::Str(v) => Some(v),
            _ => None,
        }
    }

    /// Typed build options, falling back to defaults for absent or
    /// ill-typed entries.
    pub fn to_index_params(&self) -> IndexParams {
        let defaults = IndexParams::default();
        IndexParams {
            algorithm: self
                .get_str("algorithm")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.algorithm),
            trees: self
                .get_int("trees")
                .filter(|&t| t > 0)
                .map(|t| t as usize)
                .unwrap_or(defaults.trees),
            branching: self
                .get_int("branching")
                .filter(|&b| b >= 2)
                .map(|b| b as usize)
                .unwrap_or(defaults.branching),
            iterations: self
                .get_int("iterations")
                .map(|i| i as i32)
                .unwrap_or(defaults.iterations),
            centers_init: self
                .get_str("centers_init")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.centers_init),
            distance: defaults.distance,
            random_seed: self.get_int("random_seed").filter(|&s| s > 0).map(|s| s as u64),
        }
    }

    /// Typed search options, falling back to defaults.
    pub fn to_search_params(&self) -> SearchParams {
        let defaults = SearchParams::default();
        SearchParams {
            checks: self
                .get_int("checks")
                .map(|c| c as i32)
                .unwrap_or(defaults.checks),
            cb_index: self
                .get_float("cb_index")
                .map(|c| c as f32)
                .unwrap_or(defaults.cb_index),
        }
    }

    /// Autotuner inputs; `target_precision` must be present for the tuner
    /// to be invoked at all.
    pub fn to_autotune_params(&self) -> AutotuneParams {
        let defaults = AutotuneParams::default();
        AutotuneParams {
            target_precision: self
                .get_float("target_precision")
                .map(|p| p as f32)
                .unwrap_or(-1.0),
            build_weight: self
                .get_float("build_weight")
                .map(|w| w as f32)
                .unwrap_or(defaults.build_weight),
            memory_weight: self
                .get_float("memory_weight")
                .map(|w| w as f32)
                .unwrap_or(defaults.memory_weight),
            sample_fraction: self
                .get_float("sample_fraction")
                .map(|f| f as f32)
                .unwrap_or(defaults.sample_fraction),
        }
    }

    /// Write structural build options back into the bag.
    pub fn set_index_params(&mut self, params: &IndexParams) {
        self.set_str("algorithm", params.algorithm.as_str());
        self.set_int("trees", params.trees as i64);
        self.set_int("branching", params.branching as i64);
        self.set_int("iterations", params.iterations as i64);
        self.set_str("centers_init", params.centers_init.as_str());
        if let Some(seed) = params.random_seed {
            self.set_int("random_seed", seed as i64);
        }
    }

    /// Write search options back into the bag.
    pub fn set_search_params(&mut self, params: &SearchParams) {
        self.set_int("checks", params.checks as i64);
        self.set_float("cb_index", params.cb_index as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn algorithm_round_trips_through_strings() {
        for algo in [
            Algorithm::Linear,
            Algorithm::KdTree,
            Algorithm::KMeans,
            Algorithm::Composite,
            Algorithm::VpTree,
        ] {
            assert_eq!(algo.as_str().parse::<Algorithm>().unwrap(), algo);
        }
        assert!("flat".parse::<Algorithm>().is_err());
    }

    #[test]
    fn bag_falls_back_to_defaults() {
        let params = Params::new();
        let index = params.to_index_params();
        assert_eq!(index, IndexParams::default());
        let search = params.to_search_params();
        assert_eq!(search, SearchParams::default());
    }

    #[test]
    fn bag_round_trips_typed_records() {
        let index = IndexParams {
            algorithm: Algorithm::KMeans,
            trees: 8,
            branching: 64,
            iterations: 7,
            centers_init: CentersInit::Gonzales,
            distance: DistanceKind::Euclidean,
            random_seed: Some(42),
        };
        let mut bag = Params::new();
        bag.set_index_params(&index);
        assert_eq!(bag.to_index_params(), index);
    }

    #[test]
    fn ill_typed_entries_are_ignored() {
        let mut bag = Params::new();
        bag.set_str("trees", "many");
        bag.set_int("branching", 1); // below the minimum of 2
        let index = bag.to_index_params();
        assert_eq!(index.trees, IndexParams::default().trees);
        assert_eq!(index.branching, IndexParams::default().branching);
    }
}
