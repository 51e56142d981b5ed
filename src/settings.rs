//! User-facing settings for fitting a BART ensemble.
//!
//! `BartSettings` holds every knob of a fit: the ensemble size, the priors on
//! tree structure and residual variance, the grow/prune proposal weights and
//! the chain schedule (burn-in, samples, thinning). Settings are validated
//! eagerly so that a malformed configuration never reaches a running chain.

use serde::{Deserialize, Serialize};

use crate::chain::ChainConfig;
use crate::error::{Error, Result};
use crate::model::Hyperparameters;

const PROBABILITY_TOLERANCE: f64 = 1e-9;

/// BartSettings are parameters used to fit a BART ensemble with
/// independent Gibbs chains.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BartSettings {
    /// Number of trees in the ensemble.
    pub n_trees: usize,
    /// Number of independent chains.
    pub n_chains: usize,
    /// Shape parameter of the inverse-gamma prior on sigma.
    pub sigma_a: f64,
    /// Scale parameter of the inverse-gamma prior on sigma.
    pub sigma_b: f64,
    /// Number of recorded iterations per chain (before thinning).
    pub n_samples: usize,
    /// Number of burn-in iterations per chain.
    pub n_burn: usize,
    /// Fraction of sampling iterations to retain, in (0, 1].
    pub thin: f64,
    /// Probability of proposing a grow mutation.
    pub p_grow: f64,
    /// Probability of proposing a prune mutation.
    pub p_prune: f64,
    /// Parameter contained in (0, 1) controlling node depth.
    pub alpha: f64,
    /// Parameter contained in [0, infinity) controlling node depth.
    pub beta: f64,
    /// Number of leaf-prior standard deviations spanning half the normalized range.
    pub k: f64,
    /// Whether to keep the in-sample prediction of every retained sample.
    pub store_in_sample_predictions: bool,
    /// Whether to keep per-iteration acceptance indicators.
    pub store_acceptance_trace: bool,
    /// Number of worker threads; `None` uses the global rayon pool.
    pub n_jobs: Option<usize>,
    /// Base seed; chain `c` uses `seed + c`. `None` draws a seed at fit time.
    pub seed: Option<u64>,
    /// Number of pre-drawn standard normals per refill.
    pub scalar_pool_size: usize,
    /// Whether to normalize the target into [-0.5, 0.5].
    pub normalize: bool,
}

impl Default for BartSettings {
    fn default() -> Self {
        Self {
            n_trees: 50,
            n_chains: 4,
            sigma_a: 0.001,
            sigma_b: 0.001,
            n_samples: 200,
            n_burn: 200,
            thin: 0.1,
            p_grow: 0.5,
            p_prune: 0.5,
            alpha: 0.95,
            beta: 2.0,
            k: 2.0,
            store_in_sample_predictions: true,
            store_acceptance_trace: true,
            n_jobs: None,
            seed: None,
            scalar_pool_size: 50_000,
            normalize: true,
        }
    }
}

impl BartSettings {
    /// Parses settings from JSON, filling missing fields with defaults, and
    /// validates the result.
    pub fn from_json(json: &str) -> Result<Self> {
        let settings: BartSettings = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Checks every hyperparameter, failing on the first invalid one.
    pub fn validate(&self) -> Result<()> {
        if self.n_trees == 0 {
            return Err(config_error("n_trees must be positive"));
        }
        if self.n_chains == 0 {
            return Err(config_error("n_chains must be positive"));
        }
        if !(self.thin > 0.0 && self.thin <= 1.0) {
            return Err(config_error(format!(
                "thin must be in (0, 1], got {}",
                self.thin
            )));
        }
        validate_mutation_probabilities(self.p_grow, self.p_prune)?;
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return Err(config_error(format!(
                "alpha must be in (0, 1), got {}",
                self.alpha
            )));
        }
        if !(self.beta >= 0.0 && self.beta.is_finite()) {
            return Err(config_error(format!(
                "beta must be non-negative, got {}",
                self.beta
            )));
        }
        if !(self.sigma_a > 0.0 && self.sigma_b > 0.0) {
            return Err(config_error("sigma_a and sigma_b must be positive"));
        }
        if !(self.k > 0.0 && self.k.is_finite()) {
            return Err(config_error(format!("k must be positive, got {}", self.k)));
        }
        if self.scalar_pool_size == 0 {
            return Err(config_error("scalar_pool_size must be positive"));
        }
        if self.n_jobs == Some(0) {
            return Err(config_error("n_jobs must be positive when set"));
        }

        Ok(())
    }

    /// Model hyperparameters shared by every chain.
    pub fn hyperparameters(&self) -> Hyperparameters {
        Hyperparameters {
            n_trees: self.n_trees,
            alpha: self.alpha,
            beta: self.beta,
            sigma_a: self.sigma_a,
            sigma_b: self.sigma_b,
            k: self.k,
        }
    }

    /// Schedule of a single chain.
    pub fn chain_config(&self) -> ChainConfig {
        ChainConfig {
            n_burn: self.n_burn,
            n_samples: self.n_samples,
            thin: self.thin,
            store_in_sample_predictions: self.store_in_sample_predictions,
            store_acceptance_trace: self.store_acceptance_trace,
        }
    }
}

/// Grow and prune probabilities must be non-negative and sum to one.
pub(crate) fn validate_mutation_probabilities(p_grow: f64, p_prune: f64) -> Result<()> {
    if !(p_grow >= 0.0 && p_prune >= 0.0) {
        return Err(config_error(format!(
            "p_grow and p_prune must be non-negative, got ({p_grow}, {p_prune})"
        )));
    }
    if (p_grow + p_prune - 1.0).abs() > PROBABILITY_TOLERANCE {
        return Err(config_error(format!(
            "p_grow + p_prune must sum to 1, got {}",
            p_grow + p_prune
        )));
    }

    Ok(())
}

fn config_error(msg: impl Into<String>) -> Error {
    Error::Configuration(msg.into())
}
