//! Implements the conjugate sampling operations of the Gibbs sweep.
//!
//! This module provides:
//! - `TreePrior`: the depth-dependent probability of a node splitting
//! - `LeafValueSampler`: normal-normal posterior draws for leaf values
//! - `VarianceSampler`: inverse-gamma posterior draws for the residual
//!   standard deviation

use rand::Rng;
use rand_distr::{Distribution, Gamma};

use crate::error::{Error, Result};
use crate::model::{Model, Sigma};
use crate::sampler::NormalScalarSampler;

/// Prior over tree structure.
///
/// A node at depth `d` splits with probability `alpha * (1 + d)^(-beta)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreePrior {
    /// Parameter contained within (0, 1) used to control node depth.
    pub alpha: f64,
    /// Parameter contained within [0, infinity) used to control node depth.
    pub beta: f64,
}

impl TreePrior {
    /// Creates a new `TreePrior`.
    pub fn new(alpha: f64, beta: f64) -> Self {
        Self { alpha, beta }
    }

    /// Prior probability that a node at `depth` is a split node.
    pub fn probability_split(&self, depth: usize) -> f64 {
        self.alpha * (1. + depth as f64).powf(-self.beta)
    }

    /// Log-probability that a node at `depth` splits.
    pub fn log_probability_split(&self, depth: usize) -> f64 {
        self.probability_split(depth).ln()
    }

    /// Log-probability that a node at `depth` stays a leaf.
    pub fn log_probability_not_split(&self, depth: usize) -> f64 {
        (1. - self.probability_split(depth)).ln()
    }
}

/// Normal posterior of a leaf value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LeafPosterior {
    /// Posterior mean.
    pub mean: f64,
    /// Posterior variance.
    pub variance: f64,
}

impl LeafPosterior {
    /// Posterior of a leaf mean under a `N(0, prior_var)` prior, given `n`
    /// observations summing to `summed` with noise standard deviation
    /// `sigma`.
    ///
    /// With `n == 0` the posterior equals the prior.
    pub fn new(prior_var: f64, sigma: f64, n: usize, summed: f64) -> Self {
        let var = sigma * sigma;
        let n = n as f64;
        let variance = 1. / (1. / prior_var + n / var);
        // likelihood_mean * prior_var / (likelihood_var + prior_var), with
        // likelihood_mean = summed / n and likelihood_var = var / n.
        let mean = summed * prior_var / (var + n * prior_var);

        Self { mean, variance }
    }
}

/// Draws leaf values from their conditional posterior.
#[derive(Debug, Clone, Copy, Default)]
pub struct LeafValueSampler;

impl LeafValueSampler {
    /// Posterior of the value of `node` in tree `tree_id`.
    pub fn posterior(&self, model: &Model, tree_id: usize, node: usize) -> Result<LeafPosterior> {
        let tree = model.tree(tree_id);
        let summed = tree.summed_value(node)?;
        let prior_var = model.sigma_m().powi(2);

        Ok(LeafPosterior::new(
            prior_var,
            model.sigma().current_value(),
            tree.n_obsv(node),
            summed,
        ))
    }

    /// Draws a value for `node` of tree `tree_id`.
    ///
    /// The posterior variance is divided by the number of trees so that the
    /// sum of trees carries the ensemble-level leaf variance.
    pub fn sample(
        &self,
        model: &Model,
        tree_id: usize,
        node: usize,
        normal: &mut NormalScalarSampler,
    ) -> Result<f64> {
        let posterior = self.posterior(model, tree_id, node)?;
        let n_trees = model.n_trees() as f64;

        Ok(posterior.mean + normal.sample() * (posterior.variance / n_trees).sqrt())
    }

    /// Draws a value for `node` and assigns it to the leaf.
    pub fn step(
        &self,
        model: &mut Model,
        tree_id: usize,
        node: usize,
        normal: &mut NormalScalarSampler,
    ) -> Result<f64> {
        let value = self.sample(model, tree_id, node, normal)?;
        model.tree_mut(tree_id).set_value(node, value)?;
        Ok(value)
    }
}

/// Draws the residual standard deviation from its conditional posterior.
#[derive(Debug, Clone, Copy, Default)]
pub struct VarianceSampler;

impl VarianceSampler {
    /// Posterior shape and scale of the residual variance given the
    /// ensemble residuals.
    pub fn posterior(&self, sigma: &Sigma, residuals: &[f64]) -> (f64, f64) {
        let shape = sigma.a + residuals.len() as f64 / 2.;
        let scale = sigma.b + 0.5 * residuals.iter().map(|r| r * r).sum::<f64>();
        (shape, scale)
    }

    /// Draws a new residual standard deviation.
    pub fn sample<R: Rng + ?Sized>(&self, model: &Model, rng: &mut R) -> Result<f64> {
        let residuals = model.residuals();
        let residuals = residuals.to_vec();
        let (shape, scale) = self.posterior(model.sigma(), &residuals);

        // Precision ~ Gamma(shape, rate = scale), sigma = precision^(-1/2).
        let gamma = Gamma::new(shape, 1. / scale).map_err(|e| {
            Error::DegenerateData(format!(
                "invalid sigma posterior (shape {shape}, scale {scale}): {e}"
            ))
        })?;
        let draw = gamma.sample(rng).powf(-0.5);

        if !(draw.is_finite() && draw > 0.) {
            return Err(Error::DegenerateData(format!(
                "sigma draw {draw} is not a positive finite value"
            )));
        }

        Ok(draw)
    }

    /// Draws a new residual standard deviation and stores it in the model.
    pub fn step<R: Rng + ?Sized>(&self, model: &mut Model, rng: &mut R) -> Result<f64> {
        let draw = self.sample(model, rng)?;
        model.sigma_mut().set_value(draw);
        Ok(draw)
    }
}
