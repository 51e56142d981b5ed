//! Ensemble model state owned by one chain.
//!
//! A chain never clones a live `Model` from another chain. Each chain builds
//! its own state from an immutable `ModelTemplate` (hyperparameters plus the
//! initial tree topology) and a read-only `Data`.
#![allow(non_snake_case)]

use std::sync::Arc;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::data::{Data, Target};
use crate::error::{Error, Result};
use crate::forest::TreeState;
use crate::tree::{DecisionTree, Predict};

/// Priors and ensemble size shared by every chain.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hyperparameters {
    /// Number of trees.
    pub n_trees: usize,
    /// alpha parameter to control node depth.
    pub alpha: f64,
    /// beta parameter to control node depth.
    pub beta: f64,
    /// Shape of the inverse-gamma prior on sigma.
    pub sigma_a: f64,
    /// Scale of the inverse-gamma prior on sigma.
    pub sigma_b: f64,
    /// Controls the leaf-prior standard deviation.
    pub k: f64,
}

impl Hyperparameters {
    /// Standard deviation of the leaf-value prior.
    pub fn sigma_m(&self) -> f64 {
        0.5 / (self.k * (self.n_trees as f64).sqrt())
    }
}

/// Residual standard deviation and its inverse-gamma prior.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sigma {
    /// Prior shape.
    pub a: f64,
    /// Prior scale.
    pub b: f64,
    /// Multiplier from normalized to raw target units.
    pub scale: f64,
    current: f64,
}

impl Sigma {
    /// Creates a `Sigma` starting at one (in normalized units).
    pub fn new(a: f64, b: f64, scale: f64) -> Self {
        Self {
            a,
            b,
            scale,
            current: 1.0,
        }
    }

    /// Current value in normalized units.
    pub fn current_value(&self) -> f64 {
        self.current
    }

    /// Current value in raw target units.
    pub fn current_unnormalized_value(&self) -> f64 {
        self.current * self.scale
    }

    /// Sets the current value.
    pub fn set_value(&mut self, value: f64) {
        self.current = value;
    }
}

/// Immutable starting point every chain builds its state from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelTemplate {
    /// Shared hyperparameters.
    pub params: Hyperparameters,
    /// Initial topology and leaf values of each tree.
    pub initial_trees: Vec<DecisionTree>,
}

impl ModelTemplate {
    /// Template of `params.n_trees` single-leaf trees, each holding an equal
    /// share of the target mean.
    pub fn new(params: Hyperparameters, data: &Data) -> Self {
        let leaf_value = data.y_mean() / params.n_trees as f64;
        let initial_trees = (0..params.n_trees)
            .map(|_| DecisionTree::new(leaf_value))
            .collect();

        Self {
            params,
            initial_trees,
        }
    }
}

/// State of the ensemble within one chain.
#[derive(Debug, Clone)]
pub struct Model {
    data: Arc<Data>,
    params: Hyperparameters,
    trees: Vec<TreeState>,
    sigma: Sigma,
    predictions: Array1<f64>,
}

impl Model {
    /// Builds a fresh chain state from `template`.
    pub fn from_template(template: &ModelTemplate, data: Arc<Data>) -> Result<Self> {
        if template.initial_trees.len() != template.params.n_trees {
            return Err(Error::Configuration(format!(
                "template holds {} trees but n_trees is {}",
                template.initial_trees.len(),
                template.params.n_trees
            )));
        }

        let X = data.X();
        let y = data.y().values();
        let trees: Vec<TreeState> = template
            .initial_trees
            .iter()
            .map(|tree| TreeState::from_tree(tree.clone(), X, Target::new(y.clone())))
            .collect();

        let mut predictions = Array1::zeros(data.n_obsv());
        for tree in &trees {
            predictions += tree.committed_in_sample();
        }

        let p = template.params;
        let sigma = Sigma::new(p.sigma_a, p.sigma_b, data.normalizing_scale());

        Ok(Self {
            data,
            params: p,
            trees,
            sigma,
            predictions,
        })
    }

    /// Shared data.
    pub fn data(&self) -> &Data {
        &self.data
    }

    /// Hyperparameters.
    pub fn params(&self) -> &Hyperparameters {
        &self.params
    }

    /// Number of trees.
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Leaf-prior standard deviation.
    pub fn sigma_m(&self) -> f64 {
        self.params.sigma_m()
    }

    /// Residual standard deviation.
    pub fn sigma(&self) -> &Sigma {
        &self.sigma
    }

    /// Mutable residual standard deviation.
    pub fn sigma_mut(&mut self) -> &mut Sigma {
        &mut self.sigma
    }

    /// All trees.
    pub fn trees(&self) -> &[TreeState] {
        &self.trees
    }

    /// One tree.
    pub fn tree(&self, tree_id: usize) -> &TreeState {
        &self.trees[tree_id]
    }

    /// One tree, mutably.
    pub fn tree_mut(&mut self, tree_id: usize) -> &mut TreeState {
        &mut self.trees[tree_id]
    }

    /// Sum-of-trees in-sample prediction, as of the last committed tree.
    pub fn predict(&self) -> &Array1<f64> {
        &self.predictions
    }

    /// Target minus the ensemble prediction.
    pub fn residuals(&self) -> Array1<f64> {
        self.data.y().values() - &self.predictions
    }

    /// Points tree `tree_id` at the residuals left by every other tree.
    pub fn refresh_residuals(&mut self, tree_id: usize) {
        let tree = &self.trees[tree_id];
        let others = &self.predictions - tree.committed_in_sample();
        let partial = self.data.y().values() - &others;
        self.trees[tree_id].update_target(partial);
    }

    /// Folds the current leaf values of tree `tree_id` into the ensemble
    /// prediction.
    pub fn commit_tree(&mut self, tree_id: usize) {
        let delta = self.trees[tree_id].commit_in_sample();
        self.predictions += &delta;
    }

    /// Structure-only copy of the current state.
    pub fn snapshot(&self) -> ModelSample {
        ModelSample {
            trees: self.trees.iter().map(|t| t.tree().clone()).collect(),
            sigma: self.sigma.current_value(),
            sigma_unnormalized: self.sigma.current_unnormalized_value(),
        }
    }
}

/// A retained posterior sample of the ensemble.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSample {
    /// Trees of the ensemble.
    pub trees: Vec<DecisionTree>,
    /// Residual standard deviation, in normalized units.
    pub sigma: f64,
    /// Residual standard deviation, in target units.
    pub sigma_unnormalized: f64,
}

impl Predict for ModelSample {
    /// Sum of trees, on the sampler's (normalized) scale.
    fn predict(&self, X: &Array2<f64>) -> Array1<f64> {
        let mut predictions = Array1::zeros(X.nrows());
        for tree in &self.trees {
            predictions += &tree.predict(X);
        }

        predictions
    }
}
