//! Covariate and target containers used by the sampler.
//!
//! `Data` owns the covariate matrix and the (optionally normalized) target.
//! A `DataPartition` selects the observations routed to one tree node and
//! memoizes the sum of the target over them. The memo is keyed on the
//! `Target` version, so replacing the target values invalidates every
//! partition sum without having to visit the partitions.
#![allow(non_snake_case)]

use std::cell::Cell;

use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Min/max of the training target, used to map targets into [-0.5, 0.5]
/// and back.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Normalization {
    /// Minimum of the raw target.
    pub min: f64,
    /// Maximum of the raw target.
    pub max: f64,
}

impl Normalization {
    /// Records the range of `y`.
    pub fn fit(y: ArrayView1<f64>) -> Result<Self> {
        if y.is_empty() {
            return Err(Error::DegenerateData("target vector is empty".into()));
        }
        if y.iter().any(|v| !v.is_finite()) {
            return Err(Error::DegenerateData(
                "target vector contains non-finite values".into(),
            ));
        }
        let min = y.fold(f64::INFINITY, |acc, &v| acc.min(v));
        let max = y.fold(f64::NEG_INFINITY, |acc, &v| acc.max(v));

        Ok(Self { min, max })
    }

    /// Width of the training range.
    pub fn scale(&self) -> f64 {
        self.max - self.min
    }

    /// Whether the training target was constant.
    pub fn is_degenerate(&self) -> bool {
        self.scale() <= 0.0
    }

    /// Maps `y` into [-0.5, 0.5]. A constant training target maps to zero.
    pub fn normalize(&self, y: ArrayView1<f64>) -> Array1<f64> {
        if self.is_degenerate() {
            return Array1::zeros(y.len());
        }
        let scale = self.scale();
        y.mapv(|v| -0.5 + (v - self.min) / scale)
    }

    /// Inverse of `normalize`.
    pub fn unnormalize(&self, y: ArrayView1<f64>) -> Array1<f64> {
        let scale = self.scale();
        y.mapv(|v| self.min + (v + 0.5) * scale)
    }
}

/// Target values seen by one tree, tagged with a version that advances on
/// every update.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    values: Array1<f64>,
    version: u64,
}

impl Target {
    /// Creates a new `Target` at version zero.
    pub fn new(values: Array1<f64>) -> Self {
        Self { values, version: 0 }
    }

    /// Current target values.
    pub fn values(&self) -> &Array1<f64> {
        &self.values
    }

    /// Replaces the underlying values. Every partition sum computed against
    /// an earlier version becomes stale.
    pub fn update_values(&mut self, values: Array1<f64>) {
        debug_assert_eq!(values.len(), self.values.len());
        self.values = values;
        self.version += 1;
    }

    /// Version of the current values.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Number of observations.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the target has no observations.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Memoized partition sum together with the target version it was computed
/// from.
#[derive(Debug, Clone, Default)]
pub struct SummedValueCache {
    value: Cell<Option<f64>>,
    source_version: Cell<u64>,
}

impl SummedValueCache {
    /// Returns the cached value if it was computed from `version`,
    /// otherwise recomputes it with `compute`.
    pub fn get_or_compute(&self, version: u64, compute: impl FnOnce() -> f64) -> f64 {
        match self.value.get() {
            Some(value) if self.source_version.get() == version => value,
            _ => {
                let value = compute();
                self.value.set(Some(value));
                self.source_version.set(version);
                value
            }
        }
    }

    /// Whether a value computed from `version` is held.
    pub fn is_up_to_date(&self, version: u64) -> bool {
        self.value.get().is_some() && self.source_version.get() == version
    }

    /// Drops the cached value.
    pub fn invalidate(&self) {
        self.value.set(None);
    }
}

/// The observations routed to one node.
///
/// `mask[i] == true` means observation `i` is excluded from the partition.
#[derive(Debug, Clone)]
pub struct DataPartition {
    mask: Array1<bool>,
    inverse_mask: Array1<f64>,
    n_obsv: usize,
    summed: SummedValueCache,
}

impl DataPartition {
    /// Partition containing every one of `n` observations.
    pub fn full(n: usize) -> Self {
        Self::from_mask(Array1::from_elem(n, false))
    }

    /// Creates a partition from an exclusion mask.
    pub fn from_mask(mask: Array1<bool>) -> Self {
        let inverse_mask = mask.mapv(|excluded| if excluded { 0.0 } else { 1.0 });
        let n_obsv = mask.iter().filter(|&&excluded| !excluded).count();

        Self {
            mask,
            inverse_mask,
            n_obsv,
            summed: SummedValueCache::default(),
        }
    }

    /// Exclusion mask.
    pub fn mask(&self) -> &Array1<bool> {
        &self.mask
    }

    /// Number of observations in the partition.
    pub fn n_obsv(&self) -> usize {
        self.n_obsv
    }

    /// Whether the partition holds no observation.
    pub fn is_empty(&self) -> bool {
        self.n_obsv == 0
    }

    /// Indices of the included observations, in ascending order.
    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.mask
            .iter()
            .enumerate()
            .filter_map(|(i, &excluded)| (!excluded).then_some(i))
    }

    /// Sum of `target` over the included observations.
    pub fn summed_masked_value(&self, target: &Target) -> f64 {
        self.summed.get_or_compute(target.version(), || {
            (target.values() * &self.inverse_mask).sum()
        })
    }

    /// Whether the memoized sum is valid for the current `target`.
    pub fn cache_up_to_date(&self, target: &Target) -> bool {
        self.summed.is_up_to_date(target.version())
    }

    /// Mean of `target` over the partition, zero when empty.
    pub fn mean_value(&self, target: &Target) -> f64 {
        if self.n_obsv == 0 {
            return 0.0;
        }
        self.summed_masked_value(target) / self.n_obsv as f64
    }

    /// Values of column `feature` for the included observations.
    pub fn feature_values(&self, X: &Array2<f64>, feature: usize) -> Vec<f64> {
        let column = X.column(feature);
        self.indices()
            .map(|i| column[i])
            .filter(|x| x.is_finite())
            .collect()
    }

    /// Whether `feature` takes at least two distinct finite values in the
    /// partition.
    pub fn is_splittable_on(&self, X: &Array2<f64>, feature: usize) -> bool {
        let column = X.column(feature);
        let mut first: Option<f64> = None;
        for x in self.indices().map(|i| column[i]).filter(|x| x.is_finite()) {
            match first {
                None => first = Some(x),
                Some(v) if v != x => return true,
                Some(_) => {}
            }
        }

        false
    }

    /// Features a split could be drawn from.
    pub fn splittable_features(&self, X: &Array2<f64>) -> Vec<usize> {
        (0..X.ncols())
            .filter(|&feature| self.is_splittable_on(X, feature))
            .collect()
    }

    /// Whether any feature can split the partition.
    pub fn is_splittable(&self, X: &Array2<f64>) -> bool {
        (0..X.ncols()).any(|feature| self.is_splittable_on(X, feature))
    }
}

/// Covariates and target of one fit.
#[derive(Debug, Clone)]
pub struct Data {
    X: Array2<f64>,
    y: Target,
    raw_y: Array1<f64>,
    normalization: Option<Normalization>,
}

impl Data {
    /// Creates a new `Data`, normalizing `y` into [-0.5, 0.5] when requested.
    pub fn new(X: Array2<f64>, y: Array1<f64>, normalize: bool) -> Result<Self> {
        if X.nrows() == 0 {
            return Err(Error::DegenerateData("no observations".into()));
        }
        if X.ncols() == 0 {
            return Err(Error::DegenerateData("no covariates".into()));
        }
        if X.nrows() != y.len() {
            return Err(Error::DegenerateData(format!(
                "X has {} rows but y has {} values",
                X.nrows(),
                y.len()
            )));
        }
        if X.iter().any(|x| !x.is_finite()) {
            return Err(Error::DegenerateData(
                "covariates contain non-finite values".into(),
            ));
        }

        let normalization = Normalization::fit(y.view())?;
        let (values, normalization) = if normalize {
            if normalization.is_degenerate() {
                log::warn!(
                    "target is constant ({}); normalization maps it to zero",
                    normalization.min
                );
            }
            (normalization.normalize(y.view()), Some(normalization))
        } else {
            (y.clone(), None)
        };

        Ok(Self {
            X,
            y: Target::new(values),
            raw_y: y,
            normalization,
        })
    }

    /// Covariate matrix
    pub fn X(&self) -> &Array2<f64> {
        &self.X
    }

    /// Response (target) vector, normalized if requested at construction.
    pub fn y(&self) -> &Target {
        &self.y
    }

    /// The target as it was passed in.
    pub fn unnormalized_y(&self) -> &Array1<f64> {
        &self.raw_y
    }

    /// Normalization applied to the target, if any.
    pub fn normalization(&self) -> Option<&Normalization> {
        self.normalization.as_ref()
    }

    /// Number of observations.
    pub fn n_obsv(&self) -> usize {
        self.X.nrows()
    }

    /// Number of covariates.
    pub fn n_features(&self) -> usize {
        self.X.ncols()
    }

    /// Multiplier from normalized to raw target units.
    pub fn normalizing_scale(&self) -> f64 {
        self.normalization.map_or(1.0, |n| n.scale())
    }

    /// Maps values from the sampler's scale back to the raw target scale.
    pub fn unnormalize_y(&self, y: ArrayView1<f64>) -> Array1<f64> {
        match &self.normalization {
            Some(normalization) => normalization.unnormalize(y),
            None => y.to_owned(),
        }
    }

    /// Mean of the (normalized) target.
    pub fn y_mean(&self) -> f64 {
        self.y.values().mean().unwrap_or(0.0)
    }
}
